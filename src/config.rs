use anyhow::{Context, Result};
use std::time::Duration;

use crate::audio::player::PlayerSettings;

#[derive(Debug, Clone)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub command_prefix: String,

    // Audio
    pub stuck_threshold: Duration,
    pub frame_buffer: usize,
    pub default_volume: f32,

    // Búsqueda
    pub search_results: usize,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();
        let config = Self::from_lookup(|key| std::env::var(key).ok())?;

        // Validate configuration before returning
        config.validate()?;

        Ok(config)
    }

    /// Builds the configuration from an arbitrary variable source, falling
    /// back to defaults for everything but the token.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let defaults = Self::default();
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Ok(Self {
            // Discord
            discord_token: var("DISCORD_TOKEN").context("DISCORD_TOKEN no está definido")?,
            command_prefix: var("COMMAND_PREFIX").unwrap_or(defaults.command_prefix),

            // Audio
            stuck_threshold: match var("STUCK_THRESHOLD") {
                Some(val) => humantime::parse_duration(val.trim())
                    .with_context(|| format!("STUCK_THRESHOLD inválido: {}", val))?,
                None => defaults.stuck_threshold,
            },
            frame_buffer: match var("FRAME_BUFFER") {
                Some(val) => val.trim().parse().context("FRAME_BUFFER inválido")?,
                None => defaults.frame_buffer,
            },
            default_volume: match var("DEFAULT_VOLUME") {
                Some(val) => val.trim().parse().context("DEFAULT_VOLUME inválido")?,
                None => defaults.default_volume,
            },

            // Búsqueda
            search_results: match var("SEARCH_RESULTS") {
                Some(val) => val.trim().parse().context("SEARCH_RESULTS inválido")?,
                None => defaults.search_results,
            },
        })
    }

    /// Validates configuration values for correctness.
    ///
    /// # Validation Rules
    ///
    /// - Token and command prefix must not be empty
    /// - Stuck threshold, frame buffer and search results must be > 0
    /// - Volume must be between 0.0 and 2.0
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.command_prefix.trim().is_empty() {
            anyhow::bail!("Command prefix must not be empty");
        }

        if self.stuck_threshold.is_zero() {
            anyhow::bail!("Stuck threshold must be greater than 0");
        }

        if self.frame_buffer == 0 {
            anyhow::bail!("Frame buffer must be greater than 0");
        }

        if !(0.0..=2.0).contains(&self.default_volume) {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.search_results == 0 {
            anyhow::bail!("Search results must be greater than 0");
        }

        Ok(())
    }

    /// Returns a summary of the current configuration for logging, without
    /// the token.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Commands: prefix '{}'\n  \
            Audio: {}% vol, {} frames buffered, stuck after {}\n  \
            Search: {} results",
            self.command_prefix,
            (self.default_volume * 100.0).round() as u32,
            self.frame_buffer,
            humantime::format_duration(self.stuck_threshold),
            self.search_results,
        )
    }

    pub fn player_settings(&self) -> PlayerSettings {
        PlayerSettings {
            stuck_threshold: self.stuck_threshold,
            frame_buffer: self.frame_buffer,
            volume: self.default_volume,
        }
    }
}

/// Default configuration values.
///
/// Used as fallbacks when environment variables are not provided.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Discord (no defaults - must be provided)
            discord_token: String::new(),
            command_prefix: "!".to_string(),

            // Audio defaults
            stuck_threshold: Duration::from_secs(10),
            frame_buffer: 50, // 1s a 20ms por frame
            default_volume: 1.0,

            search_results: 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_fill_everything_but_the_token() {
        let config = Config::from_lookup(lookup(&[("DISCORD_TOKEN", "abc")])).unwrap();

        assert_eq!(config.discord_token, "abc");
        assert_eq!(config.command_prefix, "!");
        assert_eq!(config.stuck_threshold, Duration::from_secs(10));
        assert_eq!(config.frame_buffer, 50);
        assert_eq!(config.search_results, 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn missing_token_is_an_error() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "  ")])).is_err());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = Config::from_lookup(lookup(&[
            ("DISCORD_TOKEN", "abc"),
            ("COMMAND_PREFIX", "?"),
            ("STUCK_THRESHOLD", "2500ms"),
            ("FRAME_BUFFER", "10"),
            ("DEFAULT_VOLUME", "0.5"),
            ("SEARCH_RESULTS", "3"),
        ]))
        .unwrap();

        assert_eq!(config.command_prefix, "?");
        assert_eq!(config.stuck_threshold, Duration::from_millis(2500));
        assert_eq!(config.frame_buffer, 10);
        assert_eq!(config.default_volume, 0.5);
        assert_eq!(config.search_results, 3);

        let settings = config.player_settings();
        assert_eq!(settings.frame_buffer, 10);
        assert_eq!(settings.volume, 0.5);
    }

    #[test]
    fn malformed_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "a"), ("STUCK_THRESHOLD", "soon")])).is_err());
        assert!(Config::from_lookup(lookup(&[("DISCORD_TOKEN", "a"), ("FRAME_BUFFER", "-1")])).is_err());
    }

    #[test]
    fn validation_catches_out_of_range_values() {
        let valid = Config {
            discord_token: "abc".to_string(),
            ..Config::default()
        };
        assert!(valid.validate().is_ok());

        for broken in [
            Config { frame_buffer: 0, ..valid.clone() },
            Config { search_results: 0, ..valid.clone() },
            Config { default_volume: 2.5, ..valid.clone() },
            Config { stuck_threshold: Duration::ZERO, ..valid.clone() },
            Config { command_prefix: String::new(), ..valid.clone() },
            Config::default(),
        ] {
            assert!(broken.validate().is_err());
        }
    }

    #[test]
    fn summary_never_contains_the_token() {
        let config = Config {
            discord_token: "super-secret".to_string(),
            ..Config::default()
        };
        let summary = config.summary();
        assert!(!summary.contains("super-secret"));
        assert!(summary.contains("10s"));
    }
}
