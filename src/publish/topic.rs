//! MQTT topic names derived from the configured prefix and gateway id.

/// `<prefix><gateway_id>/up`, where every log entry is published.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topics {
    up: String,
}

impl Topics {
    pub fn new(prefix: &str, gateway_id: &str) -> Self {
        Self {
            up: format!("{prefix}{gateway_id}/up"),
        }
    }

    /// Rebuild after the prefix changed.
    pub fn set_prefix(&mut self, prefix: &str, gateway_id: &str) {
        *self = Self::new(prefix, gateway_id);
    }

    pub fn up(&self) -> &str {
        &self.up
    }
}
