//! Configuration loading and typed config structures.
//!
//! The canonical configuration lives in `gridmarket-config.yaml` at the
//! project root. This module defines strongly-typed structs that mirror
//! the YAML structure, provides a loader, and validates structural
//! constraints before a run starts: a configuration that cannot produce a
//! functioning market fails fast with a descriptive error.

use std::path::Path;

use rust_decimal::Decimal;
use serde::Deserialize;

use gridmarket_agents::PopulationSpec;
use gridmarket_types::AdjustmentRule;

/// Errors that can occur when loading or validating configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration violates a structural constraint.
    #[error("invalid configuration: {reason}")]
    Invalid {
        /// What is wrong with the configuration.
        reason: String,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level simulation configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct SimulationConfig {
    /// Run bounds and reproducibility settings.
    #[serde(default)]
    pub run: RunConfig,

    /// Agent population counts.
    #[serde(default)]
    pub population: PopulationConfig,

    /// Market parameters.
    #[serde(default)]
    pub market: MarketConfig,

    /// Policy levers and regulator rule parameters.
    #[serde(default)]
    pub policy: PolicyConfig,

    /// Metrics parameters.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Decision oracle parameters.
    #[serde(default)]
    pub oracle: OracleConfig,
}

impl SimulationConfig {
    /// Load configuration from a YAML file at the given path.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yml::from_str(yaml)?;
        Ok(config)
    }

    /// Check structural constraints.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] with a descriptive reason; the run
    /// must not start when validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| Err(ConfigError::Invalid { reason });

        if self.run.ticks == 0 {
            return invalid("run.ticks must be at least 1".to_owned());
        }
        if self.population.consumers == 0 {
            return invalid("population.consumers must be at least 1".to_owned());
        }
        if self.population.producers == 0 {
            return invalid("population.producers must be at least 1".to_owned());
        }
        if self.population.utilities == 0 {
            return invalid("population.utilities must be at least 1".to_owned());
        }
        if self.market.initial_price <= Decimal::ZERO {
            return invalid(format!(
                "market.initial_price must be positive, got {}",
                self.market.initial_price
            ));
        }
        if self.metrics.window == 0 {
            return invalid("metrics.window must be at least 1".to_owned());
        }
        if self.policy.carbon_tax < Decimal::ZERO {
            return invalid("policy.carbon_tax must not be negative".to_owned());
        }
        if self.policy.renewable_incentive < Decimal::ZERO {
            return invalid("policy.renewable_incentive must not be negative".to_owned());
        }
        if self.policy.renewable_target < Decimal::ZERO
            || self.policy.renewable_target > Decimal::ONE
        {
            return invalid(format!(
                "policy.renewable_target must be within 0..=1, got {}",
                self.policy.renewable_target
            ));
        }
        if self.policy.max_step < Decimal::ZERO {
            return invalid("policy.max_step must not be negative".to_owned());
        }
        if self.policy.gouging_multiple < Decimal::ONE {
            return invalid(format!(
                "policy.gouging_multiple must be at least 1, got {}",
                self.policy.gouging_multiple
            ));
        }
        if self.policy.shortfall_penalty_rate < Decimal::ZERO {
            return invalid("policy.shortfall_penalty_rate must not be negative".to_owned());
        }
        if self.market.producer_renewable_share < Decimal::ZERO
            || self.market.producer_renewable_share > Decimal::ONE
        {
            return invalid(format!(
                "market.producer_renewable_share must be within 0..=1, got {}",
                self.market.producer_renewable_share
            ));
        }
        Ok(())
    }

    /// The regulator's adjustment rule derived from policy parameters.
    pub fn adjustment_rule(&self) -> AdjustmentRule {
        AdjustmentRule {
            renewable_target: self.policy.renewable_target,
            volatility_ceiling: self.policy.volatility_ceiling,
            growth_floor: self.policy.growth_floor,
            max_step: self.policy.max_step,
            gouging_multiple: self.policy.gouging_multiple,
            gouging_fine_rate: self.policy.gouging_fine_rate,
        }
    }

    /// The population spec derived from this configuration.
    pub fn population_spec(&self) -> PopulationSpec {
        PopulationSpec {
            consumers: self.population.consumers,
            prosumers: self.population.prosumers,
            producers: self.population.producers,
            utilities: self.population.utilities,
            seed: self.run.seed,
            initial_price: self.market.initial_price,
            carbon_tax: self.policy.carbon_tax,
            renewable_incentive: self.policy.renewable_incentive,
            rule: self.adjustment_rule(),
            producer_renewable_share: self.market.producer_renewable_share,
            history_window: self.market.history_window,
            personas: self.market.personas.clone(),
        }
    }
}

/// Run bounds and reproducibility settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunConfig {
    /// Number of ticks to simulate.
    #[serde(default = "default_ticks")]
    pub ticks: u64,

    /// Random seed; the only source of randomness in a run.
    #[serde(default = "default_seed")]
    pub seed: u64,

    /// Real-time milliseconds between ticks; 0 runs flat out.
    #[serde(default)]
    pub tick_interval_ms: u64,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            ticks: default_ticks(),
            seed: default_seed(),
            tick_interval_ms: 0,
        }
    }
}

/// Agent population counts.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PopulationConfig {
    /// Number of consumers.
    #[serde(default = "default_consumers")]
    pub consumers: u32,

    /// Number of prosumers; may be 0.
    #[serde(default = "default_prosumers")]
    pub prosumers: u32,

    /// Number of producers.
    #[serde(default = "default_producers")]
    pub producers: u32,

    /// Number of utilities.
    #[serde(default = "default_utilities")]
    pub utilities: u32,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            consumers: default_consumers(),
            prosumers: default_prosumers(),
            producers: default_producers(),
            utilities: default_utilities(),
        }
    }
}

/// Market parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MarketConfig {
    /// Initial price anchor before the first clearing.
    #[serde(default = "default_initial_price")]
    pub initial_price: Decimal,

    /// Observation window length per agent.
    #[serde(default = "default_history_window")]
    pub history_window: usize,

    /// Fraction of producers spawned renewable, in `0..=1`.
    #[serde(default = "default_producer_renewable_share")]
    pub producer_renewable_share: Decimal,

    /// Persona labels cycled across agents; opaque to the core.
    #[serde(default = "default_personas")]
    pub personas: Vec<String>,
}

impl Default for MarketConfig {
    fn default() -> Self {
        Self {
            initial_price: default_initial_price(),
            history_window: default_history_window(),
            producer_renewable_share: default_producer_renewable_share(),
            personas: default_personas(),
        }
    }
}

/// Policy levers and regulator rule parameters.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PolicyConfig {
    /// Initial per-unit carbon tax.
    #[serde(default = "default_carbon_tax")]
    pub carbon_tax: Decimal,

    /// Initial per-unit renewable incentive.
    #[serde(default = "default_renewable_incentive")]
    pub renewable_incentive: Decimal,

    /// Target renewable penetration, in `0..=1`.
    #[serde(default = "default_renewable_target")]
    pub renewable_target: Decimal,

    /// Volatility above which tax hikes are suppressed.
    #[serde(default = "default_volatility_ceiling")]
    pub volatility_ceiling: f64,

    /// Penetration growth per tick below which the incentive rises.
    #[serde(default = "default_growth_floor")]
    pub growth_floor: f64,

    /// Maximum absolute lever change per tick.
    #[serde(default = "default_max_step")]
    pub max_step: Decimal,

    /// Asks above this multiple of the trailing clearing price are gouging.
    #[serde(default = "default_gouging_multiple")]
    pub gouging_multiple: Decimal,

    /// Fine per unit of excess ask price.
    #[serde(default = "default_gouging_fine_rate")]
    pub gouging_fine_rate: Decimal,

    /// Penalty rate on undelivered contract value.
    #[serde(default = "default_shortfall_penalty_rate")]
    pub shortfall_penalty_rate: Decimal,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            carbon_tax: default_carbon_tax(),
            renewable_incentive: default_renewable_incentive(),
            renewable_target: default_renewable_target(),
            volatility_ceiling: default_volatility_ceiling(),
            growth_floor: default_growth_floor(),
            max_step: default_max_step(),
            gouging_multiple: default_gouging_multiple(),
            gouging_fine_rate: default_gouging_fine_rate(),
            shortfall_penalty_rate: default_shortfall_penalty_rate(),
        }
    }
}

/// Metrics parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricsConfig {
    /// Rolling window length for volatility and stability, in ticks.
    #[serde(default = "default_metrics_window")]
    pub window: usize,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window: default_metrics_window(),
        }
    }
}

/// Decision oracle parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OracleConfig {
    /// Per-agent deadline for oracle replies, in milliseconds.
    #[serde(default = "default_oracle_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_oracle_timeout_ms(),
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions (serde default requires named functions)
// ---------------------------------------------------------------------------

const fn default_ticks() -> u64 {
    168
}

const fn default_seed() -> u64 {
    42
}

const fn default_consumers() -> u32 {
    100
}

const fn default_prosumers() -> u32 {
    20
}

const fn default_producers() -> u32 {
    10
}

const fn default_utilities() -> u32 {
    5
}

fn default_initial_price() -> Decimal {
    Decimal::new(100, 0)
}

const fn default_history_window() -> usize {
    24
}

fn default_producer_renewable_share() -> Decimal {
    Decimal::new(3, 1)
}

fn default_personas() -> Vec<String> {
    vec![
        "eco_friendly".to_owned(),
        "profit_driven".to_owned(),
        "balanced".to_owned(),
    ]
}

fn default_carbon_tax() -> Decimal {
    Decimal::new(10, 0)
}

fn default_renewable_incentive() -> Decimal {
    Decimal::new(5, 0)
}

fn default_renewable_target() -> Decimal {
    Decimal::new(3, 1)
}

const fn default_volatility_ceiling() -> f64 {
    15.0
}

const fn default_growth_floor() -> f64 {
    0.005
}

fn default_max_step() -> Decimal {
    Decimal::new(2, 0)
}

fn default_gouging_multiple() -> Decimal {
    Decimal::new(12, 1)
}

fn default_gouging_fine_rate() -> Decimal {
    Decimal::new(2, 0)
}

fn default_shortfall_penalty_rate() -> Decimal {
    Decimal::new(5, 1)
}

const fn default_metrics_window() -> usize {
    24
}

const fn default_oracle_timeout_ms() -> u64 {
    8_000
}
