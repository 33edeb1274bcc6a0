use config::Config;
use serde::Deserialize;
use std::path::PathBuf;
use tracing::*;

use crate::{
    link::LinkConfig,
    platform::{Capability, HapticsConfig, Peer},
    spiral::SpiralConfig,
};

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    #[serde(default)]
    pub link: LinkConfig,
    #[serde(default)]
    pub peers: Vec<Peer>,
    #[serde(default)]
    pub spiral: SpiralConfig,
    #[serde(default)]
    pub haptics: HapticsConfig,
    #[serde(default = "Capability::all")]
    pub capabilities: Vec<Capability>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            link: LinkConfig::default(),
            peers: vec![],
            spiral: SpiralConfig::default(),
            haptics: HapticsConfig::default(),
            capabilities: Capability::all(),
        }
    }
}

impl AppConfig {
    pub fn load_config(config: &Option<PathBuf>) -> anyhow::Result<Self> {
        let environment = config::Environment::with_prefix("APP")
            .prefix_separator("_")
            .separator("__");
        let settings = if let Some(config) = config {
            info!("Using configuration from {:?}", config);
            Config::builder()
                .add_source(config::File::with_name(
                    config
                        .to_str()
                        .ok_or_else(|| anyhow::anyhow!("Failed to convert path"))?,
                ))
                .add_source(environment)
                .build()?
        } else {
            info!("Using dev configuration");
            Config::builder()
                .add_source(config::File::with_name("config/settings"))
                .add_source(config::File::with_name("config/dev_settings").required(false))
                .add_source(environment)
                .build()?
        };

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        let spiral = &self.spiral;
        anyhow::ensure!(spiral.step_ms > 0, "spiral.step_ms must be positive");
        anyhow::ensure!(
            spiral.growth.is_finite() && spiral.growth >= 1.0,
            "spiral.growth must be a finite number of at least 1.0, got {}",
            spiral.growth
        );
        anyhow::ensure!(
            (1..=SpiralConfig::LEG_LIMIT).contains(&spiral.max_legs),
            "spiral.max_legs must be between 1 and {}, got {}",
            SpiralConfig::LEG_LIMIT,
            spiral.max_legs
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    static DEFAULT_CONFIG: &str = include_str!("../config/settings.yaml");

    #[test]
    fn test_config() {
        let builder = Config::builder()
            .add_source(config::File::from_str(
                DEFAULT_CONFIG,
                config::FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let config = builder.try_deserialize::<AppConfig>().unwrap();
        assert_eq!(config.link.peer_name, "ESP32_Direction_Control");
        assert_eq!(config.peers.len(), 1);
        assert_eq!(config.spiral.step_ms, 100);
        assert_eq!(config.capabilities, Capability::all());
        config.validate().unwrap();
    }

    #[test]
    fn empty_config_uses_defaults() {
        let builder = Config::builder()
            .add_source(config::File::from_str("{}", config::FileFormat::Json))
            .build()
            .unwrap();
        let config = builder.try_deserialize::<AppConfig>().unwrap();
        assert_eq!(config.link.baud_rate, 115200);
        assert!(config.peers.is_empty());
        assert_eq!(config.haptics.duration_ms, 50);
        assert_eq!(config.spiral.max_legs, 12);
    }

    #[test]
    fn bad_spiral_settings_are_rejected() {
        let mut config = AppConfig::default();
        config.spiral.growth = -1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spiral.growth = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spiral.max_legs = 5000;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.spiral.step_ms = 0;
        assert!(config.validate().is_err());

        AppConfig::default().validate().unwrap();
    }
}
