//! Configuration management with file persistence

use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::bandit::{IntervalMethod, StrategyConfig, StrategyKind};
use crate::features::DEFAULT_DIMENSION;

/// Arbiter configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engine: EngineConfig,
    pub routing: RoutingConfig,
    pub feedback: FeedbackConfig,
}

/// Bandit strategy selection and tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub strategy: StrategyKind,
    pub dimension: usize,
    pub exploration_alpha: f64,
    pub learning_rate: f64,
    pub propensity_floor: f64,
    pub interval_method: IntervalMethod,
    pub seed: Option<u64>,
}

/// Eligibility filtering and decision construction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutingConfig {
    /// Agents below this health score are never routed to
    pub health_floor: f64,
    /// Runner-ups reported with each decision
    pub max_alternatives: usize,
    /// Capacity given to arms registered without a profile
    pub default_max_parallel_tasks: u32,
}

/// Feedback queue and drain worker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    pub capacity: usize,
    pub batch_size: usize,
    pub drain_interval_ms: u64,
    /// Enqueues that wake the worker before its next tick
    pub trigger_threshold: usize,
    pub shutdown_timeout_secs: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::ThompsonSampling,
            dimension: DEFAULT_DIMENSION,
            exploration_alpha: 1.0,
            learning_rate: 0.01,
            propensity_floor: 0.01,
            interval_method: IntervalMethod::Exact,
            seed: None,
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            health_floor: 0.4,
            max_alternatives: 2,
            default_max_parallel_tasks: 3,
        }
    }
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            capacity: 500,
            batch_size: 10,
            drain_interval_ms: 100,
            trigger_threshold: 10,
            shutdown_timeout_secs: 5,
        }
    }
}

impl EngineConfig {
    /// Strategy tuning derived from this section
    pub fn strategy_config(&self) -> StrategyConfig {
        StrategyConfig {
            dimension: self.dimension,
            exploration_alpha: self.exploration_alpha,
            learning_rate: self.learning_rate,
            propensity_floor: self.propensity_floor,
            interval_method: self.interval_method,
            seed: self.seed,
        }
    }
}

impl FeedbackConfig {
    pub fn drain_interval(&self) -> Duration {
        Duration::from_millis(self.drain_interval_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Config {
    /// Get the config directory path
    pub fn config_dir() -> anyhow::Result<PathBuf> {
        let dir = if let Ok(custom_dir) = env::var("ARBITER_CONFIG_DIR") {
            PathBuf::from(custom_dir)
        } else {
            dirs::config_dir()
                .ok_or_else(|| anyhow!("Could not determine config directory"))?
                .join("arbiter")
        };
        Ok(dir)
    }

    /// Get the config file path
    pub fn config_path() -> anyhow::Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.toml"))
    }

    /// Load configuration from file, or use defaults if it doesn't exist
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Load configuration from a specific file
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            let config: Config = toml::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
            config.validate()?;
            Ok(config)
        } else {
            // Return default config without creating file
            Ok(Config::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self) -> anyhow::Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Save configuration to a specific file
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        self.validate()?;

        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).with_context(|| {
                format!("Failed to create config directory: {}", dir.display())
            })?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        let engine = &self.engine;
        if engine.dimension == 0 {
            return Err(anyhow!("engine.dimension must be at least 1"));
        }
        if !(engine.exploration_alpha.is_finite() && engine.exploration_alpha >= 0.0) {
            return Err(anyhow!("engine.exploration_alpha must be non-negative"));
        }
        if !(engine.learning_rate.is_finite() && engine.learning_rate > 0.0) {
            return Err(anyhow!("engine.learning_rate must be positive"));
        }
        if !(engine.propensity_floor > 0.0 && engine.propensity_floor <= 1.0) {
            return Err(anyhow!("engine.propensity_floor must be in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.routing.health_floor) {
            return Err(anyhow!("routing.health_floor must be between 0.0 and 1.0"));
        }
        if self.routing.default_max_parallel_tasks == 0 {
            return Err(anyhow!("routing.default_max_parallel_tasks must be at least 1"));
        }
        let feedback = &self.feedback;
        if feedback.capacity == 0 || feedback.batch_size == 0 {
            return Err(anyhow!(
                "feedback.capacity and feedback.batch_size must be at least 1"
            ));
        }
        if feedback.drain_interval_ms == 0 {
            return Err(anyhow!("feedback.drain_interval_ms must be at least 1"));
        }
        Ok(())
    }

    /// Get a configuration value by key
    pub fn get(&self, key: &str) -> anyhow::Result<String> {
        match key {
            // Engine settings
            "engine.strategy" => Ok(self.engine.strategy.to_string()),
            "engine.dimension" => Ok(self.engine.dimension.to_string()),
            "engine.exploration_alpha" => Ok(self.engine.exploration_alpha.to_string()),
            "engine.learning_rate" => Ok(self.engine.learning_rate.to_string()),
            "engine.propensity_floor" => Ok(self.engine.propensity_floor.to_string()),
            "engine.interval_method" => Ok(self.engine.interval_method.to_string()),
            "engine.seed" => Ok(self
                .engine
                .seed
                .map(|s| s.to_string())
                .unwrap_or_else(|| "(not set)".to_string())),

            // Routing settings
            "routing.health_floor" => Ok(self.routing.health_floor.to_string()),
            "routing.max_alternatives" => Ok(self.routing.max_alternatives.to_string()),
            "routing.default_max_parallel_tasks" => {
                Ok(self.routing.default_max_parallel_tasks.to_string())
            }

            // Feedback settings
            "feedback.capacity" => Ok(self.feedback.capacity.to_string()),
            "feedback.batch_size" => Ok(self.feedback.batch_size.to_string()),
            "feedback.drain_interval_ms" => Ok(self.feedback.drain_interval_ms.to_string()),
            "feedback.trigger_threshold" => Ok(self.feedback.trigger_threshold.to_string()),
            "feedback.shutdown_timeout_secs" => {
                Ok(self.feedback.shutdown_timeout_secs.to_string())
            }

            _ => Err(anyhow!("Unknown configuration key: {}", key)),
        }
    }

    /// Set a configuration value by key
    pub fn set(&mut self, key: &str, value: &str) -> anyhow::Result<()> {
        match key {
            // Engine settings
            "engine.strategy" => {
                self.engine.strategy = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "engine.dimension" => {
                let dimension: usize = value
                    .parse()
                    .with_context(|| format!("Invalid dimension value: {}", value))?;
                if dimension == 0 {
                    return Err(anyhow!("Dimension must be at least 1"));
                }
                self.engine.dimension = dimension;
            }
            "engine.exploration_alpha" => {
                let alpha: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid exploration_alpha value: {}", value))?;
                if !(alpha.is_finite() && alpha >= 0.0) {
                    return Err(anyhow!("Exploration alpha must be non-negative"));
                }
                self.engine.exploration_alpha = alpha;
            }
            "engine.learning_rate" => {
                let rate: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid learning_rate value: {}", value))?;
                if !(rate.is_finite() && rate > 0.0) {
                    return Err(anyhow!("Learning rate must be positive"));
                }
                self.engine.learning_rate = rate;
            }
            "engine.propensity_floor" => {
                let floor: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid propensity_floor value: {}", value))?;
                if !(floor > 0.0 && floor <= 1.0) {
                    return Err(anyhow!("Propensity floor must be in (0, 1]"));
                }
                self.engine.propensity_floor = floor;
            }
            "engine.interval_method" => {
                self.engine.interval_method = value.parse().map_err(|e: String| anyhow!(e))?;
            }
            "engine.seed" => {
                self.engine.seed = if value.is_empty() || value == "none" {
                    None
                } else {
                    Some(
                        value
                            .parse()
                            .with_context(|| format!("Invalid seed value: {}", value))?,
                    )
                };
            }

            // Routing settings
            "routing.health_floor" => {
                let floor: f64 = value
                    .parse()
                    .with_context(|| format!("Invalid health_floor value: {}", value))?;
                if !(0.0..=1.0).contains(&floor) {
                    return Err(anyhow!("Health floor must be between 0.0 and 1.0"));
                }
                self.routing.health_floor = floor;
            }
            "routing.max_alternatives" => {
                self.routing.max_alternatives = value
                    .parse()
                    .with_context(|| format!("Invalid max_alternatives value: {}", value))?;
            }
            "routing.default_max_parallel_tasks" => {
                let max: u32 = value
                    .parse()
                    .with_context(|| format!("Invalid max_parallel_tasks value: {}", value))?;
                if max == 0 {
                    return Err(anyhow!("Max parallel tasks must be at least 1"));
                }
                self.routing.default_max_parallel_tasks = max;
            }

            // Feedback settings
            "feedback.capacity" => {
                self.feedback.capacity = parse_positive(value, "capacity")?;
            }
            "feedback.batch_size" => {
                self.feedback.batch_size = parse_positive(value, "batch_size")?;
            }
            "feedback.drain_interval_ms" => {
                self.feedback.drain_interval_ms =
                    parse_positive::<u64>(value, "drain_interval_ms")?;
            }
            "feedback.trigger_threshold" => {
                self.feedback.trigger_threshold = value
                    .parse()
                    .with_context(|| format!("Invalid trigger_threshold value: {}", value))?;
            }
            "feedback.shutdown_timeout_secs" => {
                self.feedback.shutdown_timeout_secs = value
                    .parse()
                    .with_context(|| format!("Invalid shutdown_timeout_secs value: {}", value))?;
            }

            _ => {
                return Err(anyhow!("Unknown configuration key: {}", key));
            }
        }
        Ok(())
    }

    /// List all configuration keys and their values
    pub fn list(&self) -> anyhow::Result<Vec<(String, String)>> {
        let keys = vec![
            "engine.strategy",
            "engine.dimension",
            "engine.exploration_alpha",
            "engine.learning_rate",
            "engine.propensity_floor",
            "engine.interval_method",
            "engine.seed",
            "routing.health_floor",
            "routing.max_alternatives",
            "routing.default_max_parallel_tasks",
            "feedback.capacity",
            "feedback.batch_size",
            "feedback.drain_interval_ms",
            "feedback.trigger_threshold",
            "feedback.shutdown_timeout_secs",
        ];

        keys.into_iter()
            .map(|key| {
                let value = self.get(key)?;
                Ok((key.to_string(), value))
            })
            .collect()
    }

    /// Reset configuration to defaults
    pub fn reset() -> anyhow::Result<()> {
        let path = Self::config_path()?;
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("Failed to remove config file: {}", path.display()))?;
        }
        Ok(())
    }
}

fn parse_positive<T>(value: &str, name: &str) -> anyhow::Result<T>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let parsed: T = value
        .parse()
        .with_context(|| format!("Invalid {} value: {}", name, value))?;
    if parsed <= T::default() {
        return Err(anyhow!("{} must be at least 1", name));
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.engine.strategy, StrategyKind::ThompsonSampling);
        assert_eq!(config.engine.dimension, 12);
        assert_eq!(config.feedback.capacity, 500);
        assert_eq!(config.feedback.drain_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_set_and_get() {
        let mut config = Config::default();
        config.set("engine.strategy", "linucb").unwrap();
        config.set("routing.health_floor", "0.6").unwrap();
        config.set("engine.seed", "42").unwrap();

        assert_eq!(config.get("engine.strategy").unwrap(), "linucb");
        assert_eq!(config.get("routing.health_floor").unwrap(), "0.6");
        assert_eq!(config.engine.seed, Some(42));
    }

    #[test]
    fn test_set_rejects_invalid_values() {
        let mut config = Config::default();
        assert!(config.set("engine.strategy", "epsilon_greedy").is_err());
        assert!(config.set("routing.health_floor", "1.5").is_err());
        assert!(config.set("feedback.batch_size", "0").is_err());
        assert!(config.set("engine.dimension", "twelve").is_err());
        assert!(config.set("nope", "1").is_err());
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_list_covers_every_key() {
        let config = Config::default();
        let entries = config.list().unwrap();
        assert_eq!(entries.len(), 15);
        assert!(entries.iter().any(|(k, v)| k == "engine.interval_method" && v == "exact"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.set("engine.strategy", "doubly_robust").unwrap();
        config.set("feedback.capacity", "64").unwrap();
        config.save_to(&path).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let loaded = Config::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(loaded, Config::default());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "[engine]\nstrategy = \"linucb\"\n").unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.strategy, StrategyKind::LinUcb);
        assert_eq!(loaded.routing, RoutingConfig::default());
    }
}
