//! Application configuration.
//!
//! Loaded from a TOML file with `FXGATE__`-prefixed environment
//! overrides layered on top.

use std::path::PathBuf;

use fxgate_exec::ExecConfig;
use fxgate_health::HealthConfig;
use fxgate_hub::{HubConfig, RateLimiterConfig, ServerConfig};
use fxgate_risk::{RiskConfig, SessionCalendarConfig};
use fxgate_store::StoreConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration load failed: {0}")]
    Load(#[from] config::ConfigError),

    #[error("Configuration invalid: {0}")]
    Invalid(String),
}

/// One FIX counterparty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LpSessionConfig {
    /// LP identifier (also the seqnum-store key).
    pub id: String,
    pub host: String,
    pub port: u16,
    /// Optional SOCKS5 proxy, `host:port`.
    #[serde(default)]
    pub socks5_proxy: Option<String>,
    pub sender_comp_id: String,
    pub target_comp_id: String,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_interval_secs: u32,
    #[serde(default = "default_exchange_id")]
    pub exchange_id: String,
    #[serde(default = "default_quote_ccy")]
    pub quote_ccy: String,
    #[serde(default)]
    pub reset_seq_on_logon: bool,
}

fn default_heartbeat_secs() -> u32 {
    30
}

fn default_exchange_id() -> String {
    "XOFF".to_string()
}

fn default_quote_ccy() -> String {
    "USD".to_string()
}

/// Account trading profile as configured.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub id: String,
    #[serde(default = "default_group")]
    pub group: String,
    /// Flow toxicity in [0,1]; supplied by an external scorer.
    #[serde(default)]
    pub toxicity: f64,
}

fn default_group() -> String {
    "retail".to_string()
}

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub calendar: SessionCalendarConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub exec: ExecConfig,
    #[serde(default)]
    pub rate_limit: RateLimiterConfig,
    /// Directory for rules.db, seqnums, audit and order history.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// HS256 secret for client JWTs; unset means accept-any (dev only).
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default)]
    pub lps: Vec<LpSessionConfig>,
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    /// Symbols subscribed on every LP session.
    #[serde(default)]
    pub symbols: Vec<String>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("data")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            store: StoreConfig::default(),
            hub: HubConfig::default(),
            risk: RiskConfig::default(),
            calendar: SessionCalendarConfig::default(),
            health: HealthConfig::default(),
            exec: ExecConfig::default(),
            rate_limit: RateLimiterConfig::default(),
            data_dir: default_data_dir(),
            jwt_secret: None,
            lps: Vec::new(),
            accounts: Vec::new(),
            symbols: Vec::new(),
        }
    }
}

impl AppConfig {
    /// Load from a TOML file plus `FXGATE__SECTION__KEY` env overrides.
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix("FXGATE").separator("__"))
            .build()?;
        let app: AppConfig = settings.try_deserialize()?;
        app.validate()?;
        Ok(app)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for lp in &self.lps {
            if lp.id.is_empty() {
                return Err(ConfigError::Invalid("lp id must not be empty".to_string()));
            }
            if lp.host.is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "lp {} host must not be empty",
                    lp.id
                )));
            }
        }
        for symbol in &self.symbols {
            fxgate_core::Symbol::parse(symbol)
                .map_err(|e| ConfigError::Invalid(format!("bad symbol {symbol}: {e}")))?;
        }
        for account in &self.accounts {
            if !(0.0..=1.0).contains(&account.toxicity) {
                return Err(ConfigError::Invalid(format!(
                    "account {} toxicity outside [0,1]",
                    account.id
                )));
            }
        }
        Ok(())
    }

    pub fn rules_db_path(&self) -> PathBuf {
        self.data_dir.join("rules.db")
    }

    pub fn seq_dir(&self) -> PathBuf {
        self.data_dir.join("seqnums")
    }

    pub fn audit_dir(&self) -> PathBuf {
        self.data_dir.join("routing_audit")
    }

    pub fn history_dir(&self) -> PathBuf {
        self.data_dir.join("order_history")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_minimal_config_parses_with_defaults() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
symbols = ["EURUSD", "GBPUSD"]

[server]
port = 9001

[[lps]]
id = "LP_A"
host = "lp-a.example.com"
port = 9880
sender_comp_id = "FXGATE"
target_comp_id = "LPA"

[[accounts]]
id = "demo-1"
group = "demo"
toxicity = 0.2
"#
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 9001);
        assert_eq!(config.lps.len(), 1);
        assert_eq!(config.lps[0].heartbeat_interval_secs, 30);
        assert_eq!(config.accounts[0].group, "demo");
        assert_eq!(config.store.ring_cap, 50_000);
        assert_eq!(config.hub.client_queue, 1_024);
    }

    #[test]
    fn test_invalid_symbol_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("app.toml");
        std::fs::write(&path, "symbols = [\"eur/usd\"]\n").unwrap();
        assert!(AppConfig::from_file(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_toxicity_bounds_enforced() {
        let config = AppConfig {
            accounts: vec![AccountConfig {
                id: "a".to_string(),
                group: "retail".to_string(),
                toxicity: 1.5,
            }],
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
