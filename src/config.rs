//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - spiral.toml (default configuration)
//! - spiral.local.toml (git-ignored local overrides)
//! - Environment variables (SPIRAL_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # spiral.toml
//! [engine]
//! max_steps = 200000
//! scheduler = "sequential"
//!
//! [logging]
//! level = "debug"
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! SPIRAL_ENGINE__MAX_STEPS=500000
//! SPIRAL_LOGGING__LEVEL=trace
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::eval::EvalOptions;
use crate::runtime::Discipline;
use crate::session::SessionOptions;

/// Main configuration struct
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Expression-evaluator step ceiling
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Scheduler step ceiling for PIR sessions
    #[serde(default = "default_max_steps")]
    pub max_scheduler_steps: u64,

    /// Cooperative yield interval in steps
    #[serde(default = "default_yield_interval")]
    pub yield_interval: u64,

    /// Scheduling discipline (eager, sequential, parallel, breadth-first,
    /// depth-first)
    #[serde(default)]
    pub scheduler: Discipline,

    /// Attach the race detector to PIR sessions
    #[serde(default)]
    pub detect_races: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_max_steps() -> u64 {
    100_000
}
fn default_yield_interval() -> u64 {
    64
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. spiral.toml (base configuration)
    /// 2. spiral.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (SPIRAL_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("spiral.toml"))
            .merge(Toml::file("spiral.local.toml"))
            .merge(Env::prefixed("SPIRAL_").split("__"))
            .extract()
    }

    /// Load configuration from a specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("SPIRAL_").split("__"))
            .extract()
    }

    /// Session options derived from this configuration.
    pub fn session_options(&self, trace: bool) -> SessionOptions {
        SessionOptions {
            eval: EvalOptions {
                max_steps: self.engine.max_steps,
                trace,
            },
            discipline: self.engine.scheduler,
            max_scheduler_steps: self.engine.max_scheduler_steps,
            yield_interval: self.engine.yield_interval,
            detect_races: self.engine.detect_races,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_steps: default_max_steps(),
            max_scheduler_steps: default_max_steps(),
            yield_interval: default_yield_interval(),
            scheduler: Discipline::default(),
            detect_races: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}
