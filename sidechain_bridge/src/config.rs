use crate::error::BridgeConfigError;
use url::Url;

pub const DEFAULT_LOOPBACK_URL: &str = "ws://127.0.0.1:7777";
pub const LOOPBACK_URL_ENV: &str = "SIDECHAIN_LOOPBACK_URL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeConfig {
    /// Where the loopback transport connects when no host channel is injected.
    pub loopback_url: Url,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            loopback_url: Url::parse(DEFAULT_LOOPBACK_URL).expect("default loopback url is valid"),
        }
    }
}

impl BridgeConfig {
    pub fn with_loopback_url(url: &str) -> Result<Self, BridgeConfigError> {
        let loopback_url = Url::parse(url).map_err(|source| BridgeConfigError::InvalidUrl {
            value: url.to_string(),
            source,
        })?;
        if !matches!(loopback_url.scheme(), "ws" | "wss") {
            return Err(BridgeConfigError::UnsupportedScheme(loopback_url.scheme().to_string()));
        }
        Ok(Self { loopback_url })
    }

    /// Defaults, with `SIDECHAIN_LOOPBACK_URL` overriding the loopback address.
    pub fn from_env() -> Result<Self, BridgeConfigError> {
        match std::env::var(LOOPBACK_URL_ENV) {
            Ok(url) if !url.trim().is_empty() => Self::with_loopback_url(url.trim()),
            _ => Ok(Self::default()),
        }
    }
}
