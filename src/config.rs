//! Engine and server configuration.
//!
//! Loaded from a TOML file (absent file means defaults) and then overridden by
//! environment variables:
//! - `ROCKET_PHASEGATE_CONFIG` - Config file path
//! - `ROCKET_PHASEGATE_DB` - Database path
//! - `ROCKET_PHASEGATE_API_KEY` - Bearer token required by the REST API
//! - `ROCKET_PHASEGATE_CORS_ORIGINS` - Comma-separated allowed origins
//! - `ROCKET_PHASEGATE_RATE_LIMIT` - Requests per minute per client when an API key is set

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    pub database_path: Option<PathBuf>,
    pub learning: LearningConfig,
    pub health: HealthConfig,
    pub alerts: AlertConfig,
    pub server: ServerConfig,
}

/// Confidence arithmetic and propagation thresholds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LearningConfig {
    pub validation_increment: f64,
    pub reference_increment: f64,
    /// Minimum confidence for a learning to be propagation-ready.
    pub readiness_confidence: f64,
    /// Minimum relevance for a target to enter the propagation queue.
    pub relevance_threshold: f64,
    /// Minimum word overlap before the conflict scan looks for opposing guidance.
    pub conflict_similarity: f64,
}

impl Default for LearningConfig {
    fn default() -> Self {
        Self {
            validation_increment: 0.15,
            reference_increment: 0.10,
            readiness_confidence: 0.80,
            relevance_threshold: 0.60,
            conflict_similarity: 0.3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct HealthConfig {
    pub healthy_min: f64,
    pub concerning_min: f64,
    pub efficiency_weight: f64,
    pub quality_weight: f64,
    /// Quality points lost per thrashing backward transition.
    pub thrash_penalty: f64,
    /// Quality points lost per open blocker.
    pub blocker_penalty: f64,
    /// Expected total agent minutes for complexity levels 1, 2 and 3.
    pub expected_minutes: [f64; 3],
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            healthy_min: 70.0,
            concerning_min: 50.0,
            efficiency_weight: 0.4,
            quality_weight: 0.6,
            thrash_penalty: 10.0,
            blocker_penalty: 5.0,
            expected_minutes: [120.0, 480.0, 1440.0],
        }
    }
}

impl HealthConfig {
    pub fn expected_minutes_for(&self, complexity_level: u8) -> f64 {
        let index = complexity_level.clamp(1, 3) as usize - 1;
        self.expected_minutes[index]
    }
}

/// Warning and critical thresholds for one alert dimension.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Threshold {
    pub warning: f64,
    pub critical: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AlertConfig {
    /// Alerts when the overall score falls below these values.
    pub overall_score: Threshold,
    /// The remaining dimensions alert when the value reaches the threshold.
    pub efficiency_ratio: Threshold,
    pub thrash_count: Threshold,
    pub open_blockers: Threshold,
    pub open_conflicts: Threshold,
    pub conflict_age_hours: Threshold,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            overall_score: Threshold {
                warning: 70.0,
                critical: 50.0,
            },
            efficiency_ratio: Threshold {
                warning: 1.5,
                critical: 2.0,
            },
            thrash_count: Threshold {
                warning: 2.0,
                critical: 4.0,
            },
            open_blockers: Threshold {
                warning: 3.0,
                critical: 5.0,
            },
            open_conflicts: Threshold {
                warning: 5.0,
                critical: 10.0,
            },
            conflict_age_hours: Threshold {
                warning: 48.0,
                critical: 168.0,
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    pub api_key: Option<String>,
    pub cors_origins: Option<Vec<String>>,
    pub rate_limit_per_minute: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 17010,
            api_key: None,
            cors_origins: None,
            rate_limit_per_minute: 100,
        }
    }
}

impl EngineConfig {
    /// Load from the configured file location, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = std::env::var("ROCKET_PHASEGATE_CONFIG")
            .map(PathBuf::from)
            .ok()
            .or_else(default_config_path);

        let mut config = match path {
            Some(path) if path.exists() => Self::from_file(&path)?,
            _ => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    fn apply_env(&mut self) {
        if let Ok(path) = std::env::var("ROCKET_PHASEGATE_DB") {
            self.database_path = Some(PathBuf::from(path));
        }
        if let Ok(key) = std::env::var("ROCKET_PHASEGATE_API_KEY") {
            self.server.api_key = Some(key);
        }
        if let Ok(origins) = std::env::var("ROCKET_PHASEGATE_CORS_ORIGINS") {
            self.server.cors_origins = Some(
                origins
                    .split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect(),
            );
        }
        if let Some(limit) = std::env::var("ROCKET_PHASEGATE_RATE_LIMIT")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            self.server.rate_limit_per_minute = limit;
        }
    }

    /// Reject thresholds that would make scoring meaningless.
    pub fn validate(&self) -> Result<()> {
        let l = &self.learning;
        for (name, value) in [
            ("learning.validation_increment", l.validation_increment),
            ("learning.reference_increment", l.reference_increment),
            ("learning.readiness_confidence", l.readiness_confidence),
            ("learning.relevance_threshold", l.relevance_threshold),
            ("learning.conflict_similarity", l.conflict_similarity),
        ] {
            if !(0.0..=1.0).contains(&value) {
                anyhow::bail!("{} must be between 0 and 1, got {}", name, value);
            }
        }

        let h = &self.health;
        if h.concerning_min > h.healthy_min {
            anyhow::bail!(
                "health.concerning_min ({}) must not exceed health.healthy_min ({})",
                h.concerning_min,
                h.healthy_min
            );
        }
        if ((h.efficiency_weight + h.quality_weight) - 1.0).abs() > 1e-9 {
            anyhow::bail!("health.efficiency_weight and health.quality_weight must sum to 1");
        }
        if h.expected_minutes.iter().any(|m| *m <= 0.0) {
            anyhow::bail!("health.expected_minutes must all be positive");
        }
        Ok(())
    }
}

fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "rocket-phasegate")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}
