//! Runtime configuration
//!
//! Loaded from `facet.toml` in the working directory, or from a path given on
//! the command line. Every field falls back to its default when absent.

use anyhow::{Context, Result};
use facet_core::parser::ContextVars;
use facet_core::types::MAX_PATTERN_LEN;
use facet_core::FacetError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "facet.toml";

/// Time signature as numerator/denominator
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FacetConfig {
    pub bpm: f64,
    pub steps: usize,
    /// Tick scale: one step lasts `(60000 / bpm) / steps * beats_per_bar` ms
    pub beats_per_bar: u32,
    pub sample_rate: u32,
    /// Reruns are held back while CPU load is at or above this fraction
    pub cpu_threshold: f64,
    pub cpu_poll_ms: u64,
    pub eval_timeout_ms: u64,
    pub max_buffer_len: usize,
    /// Largest pattern a single operation may build
    pub max_pattern_len: usize,
    pub time_signature: TimeSignature,
    pub artifact_dir: PathBuf,
    pub write_artifacts: bool,
    /// Port name (or part of one) to connect on startup
    pub midi_port: Option<String>,
    pub log_level: String,
    /// Fixed seed for reproducible sessions
    pub seed: Option<u64>,
}

impl Default for FacetConfig {
    fn default() -> Self {
        Self {
            bpm: 90.0,
            steps: 16,
            beats_per_bar: 4,
            sample_rate: 44100,
            cpu_threshold: 0.5,
            cpu_poll_ms: 50,
            eval_timeout_ms: 4000,
            max_buffer_len: 1024,
            max_pattern_len: MAX_PATTERN_LEN,
            time_signature: TimeSignature::default(),
            artifact_dir: PathBuf::from("tmp"),
            write_artifacts: true,
            midi_port: None,
            log_level: "info".to_string(),
            seed: None,
        }
    }
}

impl FacetConfig {
    /// Parse a TOML document
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: FacetConfig = toml::from_str(content).context("invalid configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("could not read {}", path.display()))?;
        Self::from_toml(&content)
    }

    /// Load the explicit path if given, otherwise `facet.toml` if it exists,
    /// otherwise the defaults
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_file(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::load_from_file(default_path)
                } else {
                    Ok(Self::default())
                }
            }
        }
    }

    /// Reject settings the transport cannot run with
    pub fn validate(&self) -> Result<(), FacetError> {
        validate_bpm(self.bpm)?;
        validate_steps(self.steps)?;
        if self.beats_per_bar == 0 {
            return Err(FacetError::TransportConfig(
                "beats_per_bar must be at least 1".to_string(),
            ));
        }
        if self.max_pattern_len < self.max_buffer_len {
            return Err(FacetError::TransportConfig(
                "max_pattern_len must be at least max_buffer_len".to_string(),
            ));
        }
        if self.time_signature.denominator == 0 {
            return Err(FacetError::TransportConfig(
                "time signature denominator must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Context variables for the first evaluation of a session
    pub fn context_vars(&self) -> ContextVars {
        ContextVars {
            bpm: self.bpm,
            time_num: self.time_signature.numerator as f64,
            time_denom: self.time_signature.denominator as f64,
            sample_rate: self.sample_rate as f64,
            ..ContextVars::default()
        }
    }

    pub fn log_filter(&self) -> log::LevelFilter {
        self.log_level
            .parse()
            .unwrap_or(log::LevelFilter::Warn)
    }
}

pub fn validate_bpm(bpm: f64) -> Result<(), FacetError> {
    if bpm.is_finite() && bpm > 0.0 {
        Ok(())
    } else {
        Err(FacetError::TransportConfig(format!(
            "bpm must be a positive number, got {}",
            bpm
        )))
    }
}

pub fn validate_steps(steps: usize) -> Result<(), FacetError> {
    if steps == 0 {
        Err(FacetError::TransportConfig(
            "steps must be at least 1".to_string(),
        ))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = FacetConfig::default();
        assert_eq!(config.bpm, 90.0);
        assert_eq!(config.steps, 16);
        assert_eq!(config.cpu_threshold, 0.5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config = FacetConfig::from_toml(
            r#"
            bpm = 120.0
            midi_port = "IAC"

            [time_signature]
            numerator = 3
            "#,
        )
        .unwrap();
        assert_eq!(config.bpm, 120.0);
        assert_eq!(config.steps, 16);
        assert_eq!(config.midi_port.as_deref(), Some("IAC"));
        assert_eq!(config.time_signature.numerator, 3);
        assert_eq!(config.time_signature.denominator, 4);
        assert_eq!(config.context_vars().time_num, 3.0);
    }

    #[test]
    fn test_invalid_transport_settings() {
        assert!(FacetConfig::from_toml("bpm = 0.0").is_err());
        assert!(FacetConfig::from_toml("steps = 0").is_err());
        assert!(FacetConfig::from_toml("max_pattern_len = 16").is_err());
        assert!(matches!(
            validate_bpm(f64::NAN),
            Err(FacetError::TransportConfig(_))
        ));
    }

    #[test]
    fn test_log_filter_falls_back_to_warn() {
        let config = FacetConfig {
            log_level: "chatty".to_string(),
            ..FacetConfig::default()
        };
        assert_eq!(config.log_filter(), log::LevelFilter::Warn);
        assert_eq!(FacetConfig::default().log_filter(), log::LevelFilter::Info);
    }
}
