use std::collections::HashSet;
use std::path::PathBuf;
use std::time::Duration;

use alloy_primitives::Address;
use anyhow::{anyhow, Result};
use serde::Deserialize;

use crate::handlers::HandlerKind;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Network {
    #[default]
    Mainnet,
    Testnet,
}

impl Network {
    pub fn default_url(&self) -> &'static str {
        match self {
            Network::Mainnet => "https://mainnet.vechain.org",
            Network::Testnet => "https://testnet.vechain.org",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub network: Network,
    pub url: Option<String>, // overrides the public node of `network`
}

impl NodeConfig {
    pub fn url(&self) -> String {
        self.url
            .clone()
            .unwrap_or_else(|| self.network.default_url().to_string())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexingConfig {
    #[serde(default)]
    pub starting_block: u64,
    #[serde(default = "default_polling_interval_ms")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default = "default_backpressure_high_water")]
    pub backpressure_high_water: usize,
    #[serde(default = "default_backpressure_pause_ms")]
    pub backpressure_pause_ms: u64,
    #[serde(default = "default_max_backoff_multiplier")]
    pub max_backoff_multiplier: u32,
    #[serde(default = "default_status_log_interval_secs")]
    pub status_log_interval_secs: u64,
}

fn default_polling_interval_ms() -> u64 {
    5_000
}

fn default_page_size() -> u64 {
    1_000
}

fn default_backpressure_high_water() -> usize {
    10_000
}

fn default_backpressure_pause_ms() -> u64 {
    5_000
}

fn default_max_backoff_multiplier() -> u32 {
    8
}

fn default_status_log_interval_secs() -> u64 {
    30
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            starting_block: 0,
            polling_interval_ms: default_polling_interval_ms(),
            page_size: default_page_size(),
            backpressure_high_water: default_backpressure_high_water(),
            backpressure_pause_ms: default_backpressure_pause_ms(),
            max_backoff_multiplier: default_max_backoff_multiplier(),
            status_log_interval_secs: default_status_log_interval_secs(),
        }
    }
}

impl IndexingConfig {
    pub fn polling_interval(&self) -> Duration {
        Duration::from_millis(self.polling_interval_ms)
    }

    pub fn backpressure_pause(&self) -> Duration {
        Duration::from_millis(self.backpressure_pause_ms)
    }

    pub fn status_log_interval(&self) -> Duration {
        Duration::from_secs(self.status_log_interval_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessorConfig {
    #[serde(default = "default_retry_attempts")]
    pub retry_attempts: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
}

fn default_retry_attempts() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    1_000
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            retry_attempts: default_retry_attempts(),
            retry_delay_ms: default_retry_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PgCfg {
    pub dsn: String,
    #[serde(default = "default_schema_path")]
    pub schema: PathBuf, // SQL file applied on connect
}

fn default_schema_path() -> PathBuf {
    PathBuf::from("./init.sql")
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3001
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContractCfg {
    pub name: String,
    pub address: Address,
    pub abi_path: PathBuf,
    pub handler: HandlerKind,
    /// Restricts the node filter to these event names; the whole contract when absent.
    pub events: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub processor: ProcessorConfig,
    pub postgres: PgCfg,
    #[serde(default)]
    pub server: ServerConfig,
    pub contracts: Vec<ContractCfg>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let config_builder = config::Config::builder()
            .add_source(config::File::from(PathBuf::from(path)))
            // Add environment variables with prefix "INGESTOR__", e.g. INGESTOR__POSTGRES__DSN
            .add_source(
                config::Environment::with_prefix("INGESTOR")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config_builder.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = config::Config::builder()
            .add_source(config::File::from_str(yaml, config::FileFormat::Yaml))
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.indexing.page_size == 0 {
            return Err(anyhow!("indexing.page_size must be greater than zero"));
        }
        if self.indexing.polling_interval_ms == 0 {
            return Err(anyhow!("indexing.polling_interval_ms must be greater than zero"));
        }
        if self.indexing.max_backoff_multiplier == 0 {
            return Err(anyhow!("indexing.max_backoff_multiplier must be at least 1"));
        }
        if self.processor.retry_attempts == 0 {
            return Err(anyhow!("processor.retry_attempts must be at least 1"));
        }
        if self.contracts.is_empty() {
            return Err(anyhow!("At least one contract must be configured"));
        }

        let mut seen = HashSet::new();
        for contract in &self.contracts {
            if !seen.insert(contract.address) {
                return Err(anyhow!(
                    "Contract '{}' reuses address {}",
                    contract.name,
                    contract.address
                ));
            }
            if matches!(&contract.events, Some(events) if events.is_empty()) {
                return Err(anyhow!(
                    "Contract '{}' has an empty events list; omit it to watch all events",
                    contract.name
                ));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy_primitives::address;

    const MINIMAL: &str = r#"
postgres:
  dsn: "host=localhost user=postgres dbname=ingestor"
contracts:
  - name: Lottery
    address: "0x1c6e8c6b3a2f0c9f7e5a4b3c2d1e0f9a8b7c6d5e"
    abi_path: ./abis/Lottery.json
    handler: lottery
"#;

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_yaml(MINIMAL).unwrap();

        assert_eq!(config.node.network, Network::Mainnet);
        assert_eq!(config.node.url(), "https://mainnet.vechain.org");
        assert_eq!(config.indexing.starting_block, 0);
        assert_eq!(config.indexing.polling_interval(), Duration::from_millis(5_000));
        assert_eq!(config.indexing.page_size, 1_000);
        assert_eq!(config.indexing.backpressure_high_water, 10_000);
        assert_eq!(config.indexing.max_backoff_multiplier, 8);
        assert_eq!(config.processor.retry_attempts, 3);
        assert_eq!(config.processor.retry_delay_ms, 1_000);
        assert_eq!(config.server.port, 3001);
        assert_eq!(config.postgres.schema, PathBuf::from("./init.sql"));
        assert_eq!(config.log_level, "info");
        assert_eq!(config.contracts[0].handler, HandlerKind::Lottery);
        assert_eq!(
            config.contracts[0].address,
            address!("1c6e8c6b3a2f0c9f7e5a4b3c2d1e0f9a8b7c6d5e")
        );
        assert!(config.contracts[0].events.is_none());
    }

    #[test]
    fn test_testnet_and_url_override() {
        let yaml = format!("node:\n  network: testnet\n{MINIMAL}");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.node.url(), "https://testnet.vechain.org");

        let yaml = format!("node:\n  network: testnet\n  url: http://localhost:8669\n{MINIMAL}");
        let config = Config::from_yaml(&yaml).unwrap();
        assert_eq!(config.node.url(), "http://localhost:8669");
    }

    #[test]
    fn test_zero_page_size_rejected() {
        let yaml = format!("indexing:\n  page_size: 0\n{MINIMAL}");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_zero_retry_attempts_rejected() {
        let yaml = format!("processor:\n  retry_attempts: 0\n{MINIMAL}");
        assert!(Config::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_duplicate_contract_address_rejected() {
        let yaml = format!(
            "{MINIMAL}  - name: Other\n    address: \"0x1C6E8C6B3A2F0C9F7E5A4B3C2D1E0F9A8B7C6D5E\"\n    abi_path: ./abis/Other.json\n    handler: passthrough\n"
        );
        let err = Config::from_yaml(&yaml).unwrap_err();
        assert!(err.to_string().contains("reuses address"));
    }

    #[test]
    fn test_no_contracts_rejected() {
        let yaml = "postgres:\n  dsn: x\ncontracts: []\n";
        assert!(Config::from_yaml(yaml).is_err());
    }
}
