//! Ordered set of active outputs
//!
//! Outputs that fail to build or initialize are logged and left out; the rest
//! keep receiving frames.

use crate::config::OutputHeader;
use crate::frame::{ChannelRange, Frame};
use crate::output::{create_output, ChannelOutput};

#[derive(Default)]
pub struct OutputRegistry {
    outputs: Vec<Box<dyn ChannelOutput>>,
}

impl OutputRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build every enabled output, skipping the ones that fail
    pub fn from_config(configs: &[serde_json::Value]) -> Self {
        let mut registry = Self::new();

        for (i, config) in configs.iter().enumerate() {
            let header: OutputHeader = match serde_json::from_value(config.clone()) {
                Ok(header) => header,
                Err(e) => {
                    tracing::error!("✗ Output #{}: invalid configuration: {}", i, e);
                    continue;
                }
            };

            if !header.enabled {
                tracing::info!("Output #{} ({}) disabled", i, header.kind);
                continue;
            }

            match create_output(&header, config) {
                Ok(output) => {
                    tracing::info!(
                        "✓ Output #{} ({}) channels {}",
                        i,
                        header.kind,
                        output.required_channel_range()
                    );
                    registry.push(output);
                }
                Err(e) => tracing::error!("✗ Failed to initialize output #{} ({}): {}", i, header.kind, e),
            }
        }

        registry
    }

    /// Add an already initialized output
    pub fn push(&mut self, output: Box<dyn ChannelOutput>) {
        self.outputs.push(output);
    }

    pub fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outputs.is_empty()
    }

    /// Send one frame to every output in order, returning the channels handled
    pub fn dispatch(&mut self, frame: &Frame) -> usize {
        self.outputs
            .iter_mut()
            .map(|output| output.send_frame(frame))
            .sum()
    }

    /// Channels needed by any output
    pub fn required_channel_range(&self) -> ChannelRange {
        self.outputs
            .iter()
            .fold(ChannelRange::EMPTY, |range, o| range.union(o.required_channel_range()))
    }

    pub fn dump_config(&self) -> String {
        self.outputs
            .iter()
            .enumerate()
            .map(|(i, o)| format!("Output #{}: {}", i, o.dump_config()))
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Close every output. Safe to call more than once.
    pub fn close(&mut self) {
        for output in &mut self.outputs {
            output.close();
        }
    }
}

impl Drop for OutputRegistry {
    fn drop(&mut self) {
        self.close();
    }
}
