//! Pixel string descriptors
//!
//! A descriptor says, for every byte a physical string receives, which frame
//! channel feeds it and which brightness table corrects it. Maps are built
//! and bounds-checked once at configuration time so the per-frame path is a
//! straight indexed walk.

use serde::Deserialize;
use std::fmt::Write as _;

use crate::brightness::{BrightnessMap, Correction};
use crate::error::{OutputError, Result};
use crate::frame::{ChannelRange, Frame, MAX_CHANNELS};

/// Map entry used for null pixels. Never a valid frame index.
pub const NULL_CHANNEL: usize = MAX_CHANNELS;

/// Wire order of the three colour bytes of a pixel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColorOrder {
    #[default]
    Rgb,
    Rbg,
    Grb,
    Gbr,
    Brg,
    Bgr,
}

impl ColorOrder {
    /// For each wire byte, the offset of the source colour within an RGB pixel
    fn offsets(self) -> [usize; 3] {
        match self {
            ColorOrder::Rgb => [0, 1, 2],
            ColorOrder::Rbg => [0, 2, 1],
            ColorOrder::Grb => [1, 0, 2],
            ColorOrder::Gbr => [1, 2, 0],
            ColorOrder::Brg => [2, 0, 1],
            ColorOrder::Bgr => [2, 1, 0],
        }
    }
}

fn default_group_count() -> usize {
    1
}

/// A run of RGB pixels fed from consecutive frame channels
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VirtualStringConfig {
    pub start_channel: i64,
    /// Physical pixels driven by this run
    pub pixel_count: usize,
    /// Consecutive physical pixels sharing one source pixel
    #[serde(default = "default_group_count")]
    pub group_count: usize,
    #[serde(default)]
    pub reverse: bool,
    #[serde(default)]
    pub color_order: ColorOrder,
    /// Dark pixels emitted before the run
    #[serde(default)]
    pub null_nodes: usize,
    #[serde(flatten)]
    pub correction: Correction,
}

/// Configuration of one physical string
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PixelStringConfig {
    pub port_number: u8,
    /// Explicit channel index per output byte
    #[serde(default)]
    pub output_map: Option<Vec<i64>>,
    /// Declared byte count, checked against the mapped channels
    #[serde(default)]
    pub output_channel_count: Option<usize>,
    #[serde(default)]
    pub virtual_strings: Vec<VirtualStringConfig>,
    /// Correction for an explicit `outputMap`
    #[serde(flatten)]
    pub correction: Correction,
}

/// Validated, ready-to-send string descriptor
#[derive(Debug, Clone)]
pub struct PixelString {
    port_number: u8,
    output_map: Vec<usize>,
    brightness_map: BrightnessMap,
}

fn channel_index(channel: i64) -> Result<usize> {
    if channel < 0 {
        return Err(OutputError::config(format!(
            "channel index {channel} is negative"
        )));
    }
    let index = channel as usize;
    if index >= MAX_CHANNELS {
        return Err(OutputError::config(format!(
            "channel index {index} exceeds channel space of {MAX_CHANNELS}"
        )));
    }
    Ok(index)
}

impl PixelString {
    /// Validate a descriptor config and build its channel map and tables
    pub fn new(config: &PixelStringConfig) -> Result<Self> {
        Self::with_max_channels(config, MAX_CHANNELS)
    }

    /// Like [`PixelString::new`], rejecting strings that map more than
    /// `max_channels` output bytes before any map is allocated
    pub fn with_max_channels(config: &PixelStringConfig, max_channels: usize) -> Result<Self> {
        let mut output_map = Vec::new();
        let mut brightness_map = BrightnessMap::new();

        match &config.output_map {
            Some(_) if !config.virtual_strings.is_empty() => {
                return Err(OutputError::config(
                    "string declares both outputMap and virtualStrings",
                ));
            }
            Some(map) => {
                if map.len() > max_channels {
                    return Err(OutputError::config(format!(
                        "port {} maps {} channels, maximum is {}",
                        config.port_number,
                        map.len(),
                        max_channels
                    )));
                }
                config.correction.validate()?;
                let table = config.correction.table();
                for &channel in map {
                    output_map.push(channel_index(channel)?);
                    brightness_map.push(&table);
                }
            }
            None => {
                for vs in &config.virtual_strings {
                    Self::expand_virtual_string(vs, max_channels, &mut output_map, &mut brightness_map)?;
                }
            }
        }

        if let Some(declared) = config.output_channel_count {
            if declared != output_map.len() {
                return Err(OutputError::config(format!(
                    "port {} declares {} output channels but maps {}",
                    config.port_number,
                    declared,
                    output_map.len()
                )));
            }
        }

        if output_map.len() % 3 != 0 {
            tracing::warn!(
                "port {} maps {} channels, not a whole number of RGB pixels",
                config.port_number,
                output_map.len()
            );
        }

        Ok(PixelString {
            port_number: config.port_number,
            output_map,
            brightness_map,
        })
    }

    fn expand_virtual_string(
        vs: &VirtualStringConfig,
        max_channels: usize,
        output_map: &mut Vec<usize>,
        brightness_map: &mut BrightnessMap,
    ) -> Result<()> {
        if vs.group_count == 0 {
            return Err(OutputError::config("groupCount must be at least 1"));
        }
        vs.correction.validate()?;
        let table = vs.correction.table();
        let start = channel_index(vs.start_channel)?;

        let total = vs
            .null_nodes
            .checked_add(vs.pixel_count)
            .and_then(|pixels| pixels.checked_mul(3))
            .and_then(|channels| channels.checked_add(output_map.len()));
        if !matches!(total, Some(total) if total <= max_channels) {
            return Err(OutputError::config(format!(
                "virtual string with {} pixels and {} null nodes exceeds {} output channels",
                vs.pixel_count, vs.null_nodes, max_channels
            )));
        }

        for _ in 0..vs.null_nodes * 3 {
            output_map.push(NULL_CHANNEL);
            brightness_map.push_dark();
        }

        let sources = vs.pixel_count.div_ceil(vs.group_count);
        let end = sources.checked_mul(3).and_then(|len| len.checked_add(start));
        if sources > 0 && !matches!(end, Some(end) if end <= MAX_CHANNELS) {
            return Err(OutputError::config(format!(
                "virtual string at channel {start} with {sources} pixels runs past the channel space"
            )));
        }

        let offsets = vs.color_order.offsets();
        for i in 0..vs.pixel_count {
            let physical = if vs.reverse { vs.pixel_count - 1 - i } else { i };
            let base = start + (physical / vs.group_count) * 3;
            for offset in offsets {
                output_map.push(base + offset);
                brightness_map.push(&table);
            }
        }

        Ok(())
    }

    pub fn port_number(&self) -> u8 {
        self.port_number
    }

    pub fn output_channel_count(&self) -> usize {
        self.output_map.len()
    }

    pub fn pixel_count(&self) -> usize {
        self.output_map.len() / 3
    }

    pub fn output_map(&self) -> &[usize] {
        &self.output_map
    }

    pub fn brightness_map(&self) -> &BrightnessMap {
        &self.brightness_map
    }

    /// Write the corrected bytes for `frame` into `out`, which must hold at
    /// least `output_channel_count()` bytes
    #[inline]
    pub fn render(&self, frame: &Frame, out: &mut [u8]) {
        for (p, (&channel, byte)) in self.output_map.iter().zip(out.iter_mut()).enumerate() {
            *byte = self.brightness_map.lookup(p, frame.channel(channel));
        }
    }

    /// Channels this string reads, null pixels excluded
    pub fn required_channel_range(&self) -> ChannelRange {
        self.output_map.iter().copied().collect()
    }

    pub fn dump_config(&self) -> String {
        let mut out = String::new();
        let _ = write!(
            out,
            "port {}: {} channels ({} pixels), reads {}",
            self.port_number,
            self.output_channel_count(),
            self.pixel_count(),
            self.required_channel_range()
        );
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn build(value: serde_json::Value) -> Result<PixelString> {
        let config: PixelStringConfig = serde_json::from_value(value)?;
        PixelString::new(&config)
    }

    #[test]
    fn test_virtual_string_map() {
        let ps = build(json!({
            "portNumber": 1,
            "virtualStrings": [{ "startChannel": 30, "pixelCount": 2 }]
        }))
        .unwrap();
        assert_eq!(ps.port_number(), 1);
        assert_eq!(ps.output_map(), &[30, 31, 32, 33, 34, 35]);
        assert_eq!(ps.pixel_count(), 2);
    }

    #[test]
    fn test_color_order_and_reverse() {
        let ps = build(json!({
            "portNumber": 0,
            "virtualStrings": [{
                "startChannel": 0, "pixelCount": 2, "colorOrder": "GRB", "reverse": true
            }]
        }))
        .unwrap();
        assert_eq!(ps.output_map(), &[4, 3, 5, 1, 0, 2]);
    }

    #[test]
    fn test_group_count_and_null_nodes() {
        let ps = build(json!({
            "portNumber": 0,
            "virtualStrings": [{
                "startChannel": 9, "pixelCount": 2, "groupCount": 2, "nullNodes": 1
            }]
        }))
        .unwrap();
        assert_eq!(
            ps.output_map(),
            &[NULL_CHANNEL, NULL_CHANNEL, NULL_CHANNEL, 9, 10, 11, 9, 10, 11]
        );
        assert_eq!(ps.required_channel_range(), ChannelRange { min: 9, max: 11 });

        let frame = Frame::from(vec![255u8; 12]);
        let mut out = vec![0xAA; 9];
        ps.render(&frame, &mut out);
        assert_eq!(out, [0, 0, 0, 255, 255, 255, 255, 255, 255]);
    }

    #[test]
    fn test_explicit_map_with_correction() {
        let ps = build(json!({
            "portNumber": 2,
            "outputMap": [5, 0, 3],
            "outputChannelCount": 3,
            "brightness": 50
        }))
        .unwrap();
        let frame = Frame::from(vec![200, 0, 0, 100, 0, 40]);
        let mut out = [0u8; 3];
        ps.render(&frame, &mut out);
        assert_eq!(out, [20, 100, 50]);
    }

    #[test]
    fn test_zero_frame_gives_table_zero_entries() {
        let ps = build(json!({
            "portNumber": 0,
            "virtualStrings": [
                { "startChannel": 0, "pixelCount": 2 },
                { "startChannel": 6, "pixelCount": 1, "minLevel": 5, "gamma": 2.2 }
            ]
        }))
        .unwrap();
        let frame = Frame::blank(16);
        let mut out = vec![0xFF; ps.output_channel_count()];
        ps.render(&frame, &mut out);
        for (p, byte) in out.iter().enumerate() {
            assert_eq!(*byte, ps.brightness_map().lookup(p, 0));
            assert_eq!(*byte, 0);
        }
    }

    #[test]
    fn test_declared_count_mismatch() {
        let err = build(json!({
            "portNumber": 0,
            "outputChannelCount": 9,
            "virtualStrings": [{ "startChannel": 0, "pixelCount": 2 }]
        }))
        .unwrap_err();
        assert!(matches!(err, OutputError::Configuration(_)));
    }

    #[test]
    fn test_negative_channel_rejected() {
        assert!(build(json!({ "portNumber": 0, "outputMap": [0, -1, 2] })).is_err());
        assert!(build(json!({
            "portNumber": 0,
            "virtualStrings": [{ "startChannel": -3, "pixelCount": 1 }]
        }))
        .is_err());
    }

    #[test]
    fn test_out_of_space_rejected() {
        assert!(build(json!({
            "portNumber": 0,
            "virtualStrings": [{ "startChannel": MAX_CHANNELS - 3, "pixelCount": 2 }]
        }))
        .is_err());
    }

    #[test]
    fn test_huge_counts_rejected_before_expanding() {
        for vs in [
            json!({ "startChannel": 0, "pixelCount": 1, "nullNodes": u64::MAX / 2 }),
            json!({ "startChannel": 0, "pixelCount": u64::MAX, "nullNodes": 1 }),
            json!({ "startChannel": 0, "pixelCount": 1_000_000_000u64, "groupCount": 1_000_000_000u64 }),
        ] {
            let err = build(json!({ "portNumber": 0, "virtualStrings": [vs] })).unwrap_err();
            assert!(matches!(err, OutputError::Configuration(_)));
        }
    }

    #[test]
    fn test_max_channels_limit() {
        let config: PixelStringConfig = serde_json::from_value(json!({
            "portNumber": 0,
            "virtualStrings": [
                { "startChannel": 0, "pixelCount": 2 },
                { "startChannel": 6, "pixelCount": 1, "nullNodes": 1 }
            ]
        }))
        .unwrap();
        assert!(PixelString::with_max_channels(&config, 12).is_ok());
        assert!(PixelString::with_max_channels(&config, 11).is_err());

        let explicit: PixelStringConfig =
            serde_json::from_value(json!({ "portNumber": 0, "outputMap": [0, 1, 2, 3] })).unwrap();
        assert!(PixelString::with_max_channels(&explicit, 3).is_err());
    }

    #[test]
    fn test_empty_string() {
        let ps = build(json!({ "portNumber": 3 })).unwrap();
        assert_eq!(ps.output_channel_count(), 0);
        assert!(ps.required_channel_range().is_empty());
    }
}
