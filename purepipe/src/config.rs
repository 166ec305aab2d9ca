// SPDX-License-Identifier: MIT OR Apache-2.0

/// Default capacity of a stage's input queue and output buffer.
pub const DEFAULT_BUFFER_SIZE: usize = 16;

/// Configuration applied when a stage is created.
///
/// The buffer size is the backpressure window of a stage: a producer has to wait as soon as
/// this many records are queued and not yet taken by the next stage.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StageConfig {
    buffer_size: usize,
    label: Option<String>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            label: None,
        }
    }
}

impl StageConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the buffer size, values below 1 are raised to 1.
    pub fn with_buffer_size(mut self, buffer_size: usize) -> Self {
        self.buffer_size = buffer_size.max(1);
        self
    }

    /// Sets a human readable name which shows up in logs and `Debug` output.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    pub fn label(&self) -> Option<&str> {
        self.label.as_deref()
    }

    /// Config for a stage created internally on behalf of the stage configured by `self`.
    pub(crate) fn child(&self, name: &str) -> Self {
        Self {
            buffer_size: self.buffer_size,
            label: self.label.as_ref().map(|label| format!("{label}/{name}")),
        }
    }
}
