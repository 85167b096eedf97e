use backcast_core::costs::BpsCost;
use backcast_core::engine::backtest::{Benchmark, EngineConfig};
use backcast_core::strategy::{StrategyKind, StrategyParams};
use backcast_core::types::ProductMode;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub run: RunConfig,
    pub paths: PathsConfig,
    #[serde(default)]
    pub costs: CostsConfig,
    #[serde(default)]
    pub account: AccountConfig,
    #[serde(default)]
    pub data_quality: DataQualityConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct RunConfig {
    pub run_id: String,
    pub ticker: String,
    #[serde(default = "default_initial_capital")]
    pub initial_capital: f64,
    #[serde(default = "default_strategy")]
    pub strategy: String,
    /// Strategy parameters by name; unknown names are rejected when the
    /// strategy is built.
    #[serde(default)]
    pub params: StrategyParams,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PathsConfig {
    pub ohlcv_csv: String,
    pub benchmark_csv: Option<String>,
    #[serde(default = "default_out_dir")]
    pub out_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct CostsConfig {
    #[serde(default)]
    pub fee_bps: f64,
    #[serde(default)]
    pub flat_fee_per_leg: f64,
    /// Fraction of price, e.g. 0.001 for 10 bps.
    #[serde(default = "default_slippage")]
    pub slippage: f64,
}

impl Default for CostsConfig {
    fn default() -> Self {
        Self {
            fee_bps: 0.0,
            flat_fee_per_leg: 0.0,
            slippage: default_slippage(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AccountConfig {
    #[serde(default)]
    pub product: ProductMode,
    #[serde(default = "default_risk_free_rate")]
    pub risk_free_rate: f64,
    #[serde(default = "default_margin_rate")]
    pub margin_rate: f64,
}

impl Default for AccountConfig {
    fn default() -> Self {
        Self {
            product: ProductMode::default(),
            risk_free_rate: default_risk_free_rate(),
            margin_rate: default_margin_rate(),
        }
    }
}

/// Limits enforced by `validate --strict`. Unset limits mean zero tolerance.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct DataQualityConfig {
    pub step_seconds: Option<i64>,
    pub max_gaps: Option<usize>,
    pub max_duplicates: Option<usize>,
    pub max_out_of_order: Option<usize>,
    pub max_invalid_close: Option<usize>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct LogConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_initial_capital() -> f64 {
    EngineConfig::default().initial_capital
}

fn default_strategy() -> String {
    "buy_and_hold".to_string()
}

fn default_out_dir() -> String {
    "runs".to_string()
}

fn default_slippage() -> f64 {
    EngineConfig::default().slippage
}

fn default_risk_free_rate() -> f64 {
    EngineConfig::default().risk_free_rate
}

fn default_margin_rate() -> f64 {
    EngineConfig::default().margin_rate
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    pub fn engine_config(&self, benchmark: Option<Benchmark>) -> EngineConfig {
        EngineConfig {
            initial_capital: self.run.initial_capital,
            slippage: self.costs.slippage,
            product: self.account.product,
            risk_free_rate: self.account.risk_free_rate,
            margin_rate: self.account.margin_rate,
            benchmark,
        }
    }

    pub fn cost_model(&self) -> BpsCost {
        BpsCost {
            fee_bps: self.costs.fee_bps,
            flat_fee_per_leg: self.costs.flat_fee_per_leg,
        }
    }

    pub fn strategy(&self) -> Result<StrategyKind, String> {
        StrategyKind::from_name(&self.run.strategy, &self.run.params)
            .map_err(|err| format!("invalid [run] strategy: {err}"))
    }

    /// Rejects values serde accepts but a run cannot use.
    pub fn validate(&self) -> Result<(), String> {
        if self.run.run_id.trim().is_empty() {
            return Err("run.run_id must not be empty".to_string());
        }
        if self.run.ticker.trim().is_empty() {
            return Err("run.ticker must not be empty".to_string());
        }
        if !self.run.initial_capital.is_finite() || self.run.initial_capital <= 0.0 {
            return Err(format!(
                "run.initial_capital must be positive (got {})",
                self.run.initial_capital
            ));
        }
        if !(0.0..1.0).contains(&self.costs.slippage) {
            return Err(format!(
                "costs.slippage must be in [0, 1) (got {})",
                self.costs.slippage
            ));
        }
        if self.costs.fee_bps < 0.0 || self.costs.flat_fee_per_leg < 0.0 {
            return Err("costs must not be negative".to_string());
        }
        if !(0.0..=1.0).contains(&self.account.margin_rate) {
            return Err(format!(
                "account.margin_rate must be in [0, 1] (got {})",
                self.account.margin_rate
            ));
        }
        if self.data_quality.step_seconds.is_some_and(|step| step <= 0) {
            return Err("data_quality.step_seconds must be positive".to_string());
        }
        self.strategy().map(|_| ())
    }
}

pub fn load_config(path: &Path) -> Result<Config, String> {
    load_config_with_source(path).map(|(config, _)| config)
}

/// Parsed config plus the raw TOML it came from.
pub fn load_config_with_source(path: &Path) -> Result<(Config, String), String> {
    let contents = fs::read_to_string(path)
        .map_err(|err| format!("failed to read config {}: {}", path.display(), err))?;
    let config: Config = toml::from_str(&contents)
        .map_err(|err| format!("failed to parse TOML {}: {}", path.display(), err))?;
    config.validate()?;
    Ok((config, contents))
}
