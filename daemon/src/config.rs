//! Daemon configuration.
//!
//! The daemon reads one TOML file (default `holyrig.toml`) naming the bind
//! address, where schemas and models live, and the rigs to drive:
//!
//! ```toml
//! bind = "127.0.0.1:14250"
//! schema_dir = "schemas"
//! model_dir = "models"
//!
//! [[rigs]]
//! id = "ic7300"
//! model = "IC-7300"
//! port = "/dev/ttyUSB0"
//! baud_rate = 19200
//! poll_interval_ms = 250
//! ```

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Deserialize;

use holyrig_core::RigSettings;

/// The daemon's configuration file.
#[derive(Debug, Deserialize)]
pub struct DaemonConfig {
    /// UDP address the JSON-RPC server binds.
    #[serde(default = "defaults::bind")]
    pub bind: String,
    /// Directory holding `*.schema` files.
    #[serde(default = "defaults::schema_dir")]
    pub schema_dir: PathBuf,
    /// Directory holding `*.toml` model files.
    #[serde(default = "defaults::model_dir")]
    pub model_dir: PathBuf,
    /// Pending notifications tolerated per subscriber before the oldest
    /// are dropped.
    #[serde(default = "defaults::subscriber_queue")]
    pub subscriber_queue: usize,
    /// The rigs to drive.
    #[serde(default)]
    pub rigs: Vec<RigSettings>,
}

mod defaults {
    use std::path::PathBuf;

    pub fn bind() -> String {
        "127.0.0.1:14250".to_string()
    }

    pub fn schema_dir() -> PathBuf {
        PathBuf::from("schemas")
    }

    pub fn model_dir() -> PathBuf {
        PathBuf::from("models")
    }

    pub fn subscriber_queue() -> usize {
        32
    }
}

impl DaemonConfig {
    /// Read and parse the configuration file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        toml::from_str(&content).with_context(|| format!("failed to parse {}", path.display()))
    }
}
