//! Configuration for the registry node

use crate::registry::{DEFAULT_EVENT_CAPACITY, DEFAULT_MAILBOX_CAPACITY};
use crate::types::{Address, Token};
use serde::{Deserialize, Serialize};

/// Node configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// Registry identity ledger addresses are derived from
    pub registry_address: Address,

    /// Per-ledger actor mailbox size
    pub mailbox_capacity: usize,

    /// Broadcast buffer for event subscribers
    pub event_capacity: usize,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Ledgers to deploy at startup
    pub tokens: Vec<TokenConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            service_name: "streampay-node".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            registry_address: Address::from_low_u64(1),
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            logging: LoggingConfig::default(),
            tokens: Vec::new(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

/// Token to deploy a ledger for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenConfig {
    /// Token address
    pub address: Address,

    /// Token decimals
    pub decimals: u8,
}

impl From<TokenConfig> for Token {
    fn from(config: TokenConfig) -> Self {
        Token::new(config.address, config.decimals)
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Load from environment variables
    ///
    /// `STREAMPAY_TOKENS` is a comma-separated list of `address:decimals`.
    pub fn from_env() -> crate::Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    fn from_vars(var: impl Fn(&str) -> Option<String>) -> crate::Result<Self> {
        let mut config = Config::default();

        if let Some(name) = var("STREAMPAY_SERVICE_NAME") {
            config.service_name = name;
        }

        if let Some(address) = var("STREAMPAY_REGISTRY_ADDRESS") {
            config.registry_address = address.parse()?;
        }

        if let Some(capacity) = var("STREAMPAY_MAILBOX_CAPACITY") {
            config.mailbox_capacity = parse_capacity("STREAMPAY_MAILBOX_CAPACITY", &capacity)?;
        }

        if let Some(capacity) = var("STREAMPAY_EVENT_CAPACITY") {
            config.event_capacity = parse_capacity("STREAMPAY_EVENT_CAPACITY", &capacity)?;
        }

        if let Some(level) = var("STREAMPAY_LOG_LEVEL") {
            config.logging.level = level;
        }

        if let Some(format) = var("STREAMPAY_LOG_FORMAT") {
            config.logging.json = format.eq_ignore_ascii_case("json");
        }

        if let Some(tokens) = var("STREAMPAY_TOKENS") {
            config.tokens = tokens
                .split(',')
                .map(str::trim)
                .filter(|entry| !entry.is_empty())
                .map(parse_token)
                .collect::<crate::Result<_>>()?;
        }

        Ok(config)
    }
}

fn parse_capacity(key: &str, value: &str) -> crate::Result<usize> {
    match value.parse::<usize>() {
        Ok(capacity) if capacity > 0 => Ok(capacity),
        _ => Err(crate::Error::Config(format!(
            "{} must be a positive integer, got {:?}",
            key, value
        ))),
    }
}

fn parse_token(entry: &str) -> crate::Result<TokenConfig> {
    let (address, decimals) = entry
        .split_once(':')
        .ok_or_else(|| {
            crate::Error::Config(format!("token entry {:?} is not address:decimals", entry))
        })?;
    let decimals = decimals
        .parse()
        .map_err(|_| crate::Error::Config(format!("invalid decimals in token entry {:?}", entry)))?;

    Ok(TokenConfig {
        address: address.parse()?,
        decimals,
    })
}
