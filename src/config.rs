//! Driver configuration, loadable from TOML.
//!
//! Every field has a default, so an empty document is a valid configuration:
//!
//! ```toml
//! cancel_timeout_ms = 500
//! dispatch = "inline"
//!
//! [[devices]]
//! vendor_id = 0x045E
//! product_id = 0x028E
//! protocol_variant = 1
//! display_name = "RedGear Wired Gamepad"
//! ```

use crate::consts;
use crate::error::Result;
use crate::registry::CompatibilityEntry;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Where decoding and event forwarding run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispatchMode {
    /// Completion handler copies the frame into a bounded queue; a per-session
    /// worker thread decodes and reports.
    #[default]
    Deferred,
    /// Decode and report directly on the completion path. Only for sinks
    /// that never block.
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Upper bound on waiting for a cancelled transfer on detach.
    pub cancel_timeout_ms: u64,
    pub dispatch: DispatchMode,
    /// Capacity of the deferred dispatch queue (frames).
    pub queue_depth: usize,
    /// Maximum number of concurrently claimed devices.
    pub max_sessions: usize,
    /// How many detached handles are remembered so that a repeated detach
    /// still succeeds. Oldest are forgotten first.
    pub retired_capacity: usize,
    /// Ask the decoder for axis events. Rejected: axis bytes are not decoded.
    pub report_axes: bool,
    /// Replaces the built-in compatibility table when present.
    pub devices: Option<Vec<CompatibilityEntry>>,
}

impl Default for DriverConfig {
    fn default() -> Self {
        DriverConfig {
            cancel_timeout_ms: consts::DEFAULT_CANCEL_TIMEOUT_MS,
            dispatch: DispatchMode::default(),
            queue_depth: consts::DEFAULT_QUEUE_DEPTH,
            max_sessions: consts::DEFAULT_MAX_SESSIONS,
            retired_capacity: consts::DEFAULT_RETIRED_CAPACITY,
            report_axes: false,
            devices: None,
        }
    }
}

impl DriverConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        Ok(toml::from_str(s)?)
    }

    /// Reads and parses a TOML configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    #[inline]
    pub fn cancel_timeout(&self) -> Duration {
        Duration::from_millis(self.cancel_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_is_default() {
        let cfg = DriverConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, DriverConfig::default());
        assert_eq!(cfg.dispatch, DispatchMode::Deferred);
        assert_eq!(cfg.cancel_timeout(), Duration::from_millis(1000));
    }

    #[test]
    fn test_unknown_dispatch_mode_rejected() {
        assert!(DriverConfig::from_toml_str("dispatch = \"threaded\"").is_err());
    }
}
