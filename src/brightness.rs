//! Per-channel brightness correction lookup tables
//!
//! Every output byte position owns a 256-entry table mapping the raw channel
//! level to the level actually transmitted. Tables for all positions of a
//! string live in one flat array indexed `slot * 256 + raw` so the per-frame
//! lookup is a single indexed load.

use serde::{Deserialize, Serialize};

use crate::error::{OutputError, Result};

pub const TABLE_SIZE: usize = 256;

fn default_brightness() -> f32 {
    100.0
}

fn default_gamma() -> f32 {
    1.0
}

/// Correction parameters for a run of channels
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Correction {
    /// Percentage of full output, 0-100
    #[serde(default = "default_brightness")]
    pub brightness: f32,
    #[serde(default = "default_gamma")]
    pub gamma: f32,
    /// Floor applied to any non-zero input
    #[serde(default)]
    pub min_level: Option<u8>,
    /// Ceiling applied to every output
    #[serde(default)]
    pub max_level: Option<u8>,
}

impl Default for Correction {
    fn default() -> Self {
        Self {
            brightness: default_brightness(),
            gamma: default_gamma(),
            min_level: None,
            max_level: None,
        }
    }
}

impl Correction {
    pub fn validate(&self) -> Result<()> {
        if !self.brightness.is_finite() || !(0.0..=100.0).contains(&self.brightness) {
            return Err(OutputError::config(format!(
                "brightness {} out of range 0-100",
                self.brightness
            )));
        }
        if !self.gamma.is_finite() || self.gamma <= 0.0 {
            return Err(OutputError::config(format!(
                "gamma {} must be positive",
                self.gamma
            )));
        }
        if let (Some(min), Some(max)) = (self.min_level, self.max_level) {
            if min > max {
                return Err(OutputError::config(format!(
                    "minLevel {min} is above maxLevel {max}"
                )));
            }
        }
        Ok(())
    }

    /// Build the 256-entry lookup for these parameters
    pub fn table(&self) -> [u8; TABLE_SIZE] {
        let scale = self.brightness / 100.0;
        let mut table = [0u8; TABLE_SIZE];

        for (raw, out) in table.iter_mut().enumerate() {
            let level = 255.0 * (raw as f32 / 255.0).powf(self.gamma) * scale;
            let mut value = level.round().clamp(0.0, 255.0) as u8;

            if let Some(max) = self.max_level {
                value = value.min(max);
            }
            if let Some(min) = self.min_level {
                if raw > 0 {
                    value = value.max(min);
                }
            }
            *out = value;
        }

        table
    }
}

/// Flat arena of lookup tables, one per output byte position
#[derive(Debug, Clone, Default)]
pub struct BrightnessMap {
    tables: Vec<u8>,
}

impl BrightnessMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(slots: usize) -> Self {
        Self {
            tables: Vec::with_capacity(slots * TABLE_SIZE),
        }
    }

    pub fn push(&mut self, table: &[u8; TABLE_SIZE]) {
        self.tables.extend_from_slice(table);
    }

    /// Append a table that always yields 0 (null pixels)
    pub fn push_dark(&mut self) {
        self.tables.resize(self.tables.len() + TABLE_SIZE, 0);
    }

    /// Number of output positions covered
    pub fn len(&self) -> usize {
        self.tables.len() / TABLE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    #[inline]
    pub fn lookup(&self, slot: usize, raw: u8) -> u8 {
        self.tables[slot * TABLE_SIZE + raw as usize]
    }

    /// The full table for one output position
    pub fn slot(&self, slot: usize) -> &[u8] {
        &self.tables[slot * TABLE_SIZE..(slot + 1) * TABLE_SIZE]
    }
}
