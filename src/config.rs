use serde::{Deserialize, Serialize};

fn default_true() -> bool {
    true
}

fn default_frame_size() -> usize {
    65_536
}

/// Daemon configuration document
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub source: SourceConfig,
    /// Channels in the working frame buffer
    #[serde(default = "default_frame_size")]
    pub frame_size: usize,
    /// Raw per-output objects; each driver parses its own fields
    pub channel_outputs: Vec<serde_json::Value>,
}

/// OPC listener feeding frames into the dispatcher
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceConfig {
    pub host: String,
    pub port: u16,
    /// Frame channel receiving the first byte of each OPC message
    #[serde(default)]
    pub channel_offset: usize,
}

/// Fields common to every channel output config
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputHeader {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub start_channel: usize,
    pub channel_count: usize,
    /// Run the driver on its own worker thread
    #[serde(default)]
    pub threaded: bool,
}

impl OutputHeader {
    /// Keys consumed by the header, not passed through as driver settings
    pub const KEYS: &'static [&'static str] =
        &["type", "enabled", "startChannel", "channelCount", "threaded"];
}
