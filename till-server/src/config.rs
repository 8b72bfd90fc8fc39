//! Engine configuration
//!
//! # Environment variables
//!
//! Every knob can be overridden via environment variable:
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | WORK_DIR | /var/lib/till | working directory (database, logs) |
//! | BUS_CAPACITY | 4096 | change-bus broadcast channel capacity |
//! | DRAFT_IDLE_MS | 1800000 | idle window before a draft is auto-discarded (30 min) |
//! | SESSION_IDLE_MS | 14400000 | idle window before an open session is abandoned (4 h) |
//! | SWEEP_INTERVAL_MS | 60000 | background sweep period (1 min) |

use std::path::PathBuf;

/// Engine configuration
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Working directory; the redb database lives at `<work_dir>/staging.redb`
    pub work_dir: String,
    /// Change-bus broadcast channel capacity
    pub bus_capacity: usize,
    /// Drafts idle longer than this are eligible for automatic discard
    pub draft_idle_ms: i64,
    /// Open sessions idle longer than this transition to abandoned
    pub session_idle_ms: i64,
    /// Background sweep period
    pub sweep_interval_ms: u64,
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/till".into()),
            bus_capacity: std::env::var("BUS_CAPACITY")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4096),
            draft_idle_ms: std::env::var("DRAFT_IDLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30 * 60 * 1000),
            session_idle_ms: std::env::var("SESSION_IDLE_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4 * 60 * 60 * 1000),
            sweep_interval_ms: std::env::var("SWEEP_INTERVAL_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(60_000),
        }
    }

    /// Path of the engine database file
    pub fn db_path(&self) -> PathBuf {
        PathBuf::from(&self.work_dir).join("staging.redb")
    }

    /// Override the working directory (common in tests)
    pub fn with_work_dir(mut self, work_dir: impl Into<String>) -> Self {
        self.work_dir = work_dir.into();
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
