//! Runtime configuration.
//!
//! Loaded in layers, later layers winning:
//! 1. Default values in code
//! 2. An optional `stockflow.toml`
//! 3. Environment variable overrides with the `STOCKFLOW__` prefix
//!    (e.g. `STOCKFLOW__ALLOCATION__MAX_RETRIES=16`)

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use serde::Deserialize;

use stockflow_inventory::IssuancePolicy;

pub const DEFAULT_FILE: &str = "stockflow";
pub const ENV_PREFIX: &str = "STOCKFLOW";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StockflowConfig {
    pub allocation: AllocationConfig,
    pub receipts: ReceiptsConfig,
    pub alerts: AlertsConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AllocationConfig {
    /// Policy used when the caller does not name one.
    pub default_policy: IssuancePolicy,
    /// Skip batches already expired on the allocation date.
    pub exclude_expired: bool,
    /// Re-plans after a lost optimistic-concurrency race.
    pub max_retries: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReceiptsConfig {
    pub number_prefix: String,
    pub number_max_attempts: u32,
    pub default_currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AlertsConfig {
    pub expiry_warning_days: u32,
    pub scan_interval_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LogConfig {
    /// `EnvFilter` directives used when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            default_policy: IssuancePolicy::Fifo,
            exclude_expired: true,
            max_retries: 8,
        }
    }
}

impl Default for ReceiptsConfig {
    fn default() -> Self {
        Self {
            number_prefix: "PR".to_string(),
            number_max_attempts: 10,
            default_currency: "USD".to_string(),
        }
    }
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            expiry_warning_days: 30,
            scan_interval_secs: 3600,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl Default for StockflowConfig {
    fn default() -> Self {
        Self {
            allocation: AllocationConfig::default(),
            receipts: ReceiptsConfig::default(),
            alerts: AlertsConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl StockflowConfig {
    /// Load `stockflow.toml` (if present) and environment overrides.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(DEFAULT_FILE)
    }

    /// Like [`StockflowConfig::load`], reading the file named `file` instead.
    pub fn load_from(file: &str) -> Result<Self, ConfigError> {
        let builder = with_defaults()?
            .add_source(File::with_name(file).required(false))
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            );
        finish(builder)
    }

    /// Defaults overlaid with an inline TOML document; no environment lookup.
    pub fn from_toml(toml: &str) -> Result<Self, ConfigError> {
        finish(with_defaults()?.add_source(File::from_str(toml, FileFormat::Toml)))
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let prefix = self.receipts.number_prefix.trim();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::Message(format!(
                "receipts.number_prefix must be alphanumeric (got '{prefix}')"
            )));
        }
        if self.receipts.number_max_attempts == 0 {
            return Err(ConfigError::Message(
                "receipts.number_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.receipts.default_currency.trim().is_empty() {
            return Err(ConfigError::Message(
                "receipts.default_currency is required".to_string(),
            ));
        }
        if self.alerts.scan_interval_secs == 0 {
            return Err(ConfigError::Message(
                "alerts.scan_interval_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    let d = StockflowConfig::default();
    config::Config::builder()
        .set_default("allocation.default_policy", d.allocation.default_policy.to_string())?
        .set_default("allocation.exclude_expired", d.allocation.exclude_expired)?
        .set_default("allocation.max_retries", d.allocation.max_retries)?
        .set_default("receipts.number_prefix", d.receipts.number_prefix)?
        .set_default("receipts.number_max_attempts", d.receipts.number_max_attempts)?
        .set_default("receipts.default_currency", d.receipts.default_currency)?
        .set_default("alerts.expiry_warning_days", d.alerts.expiry_warning_days)?
        .set_default("alerts.scan_interval_secs", d.alerts.scan_interval_secs)?
        .set_default("log.filter", d.log.filter)
}

fn finish(builder: ConfigBuilder<DefaultState>) -> Result<StockflowConfig, ConfigError> {
    let cfg: StockflowConfig = builder.build()?.try_deserialize()?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = StockflowConfig::from_toml("").unwrap();
        assert_eq!(cfg, StockflowConfig::default());
    }

    #[test]
    fn file_values_override_defaults() {
        let cfg = StockflowConfig::from_toml(
            r#"
            [allocation]
            default_policy = "FEFO"
            exclude_expired = false

            [receipts]
            number_prefix = "GRN"
            "#,
        )
        .unwrap();

        assert_eq!(cfg.allocation.default_policy, IssuancePolicy::Fefo);
        assert!(!cfg.allocation.exclude_expired);
        assert_eq!(cfg.allocation.max_retries, 8);
        assert_eq!(cfg.receipts.number_prefix, "GRN");
        assert_eq!(cfg.receipts.number_max_attempts, 10);
    }

    #[test]
    fn rejects_unusable_values() {
        let err = StockflowConfig::from_toml("[receipts]\nnumber_prefix = \"P-R\"").unwrap_err();
        assert!(err.to_string().contains("number_prefix"));

        assert!(StockflowConfig::from_toml("[allocation]\ndefault_policy = \"RANDOM\"").is_err());
    }
}
