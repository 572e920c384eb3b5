//! Client configuration from environment variables.

use anyhow::{bail, Context, Result};
use url::Url;

pub const DEFAULT_RELAY_URL: &str = "ws://localhost:3001/ws";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    pub relay_url: Url,
    /// Simulate a connection when the relay cannot be reached.
    pub demo_mode: bool,
}

impl ClientConfig {
    /// Parse the configuration from the process environment.
    ///
    /// Environment variables:
    /// - `PA_RELAY_URL`: relay WebSocket endpoint (default: "ws://localhost:3001/ws")
    /// - `PA_DEMO_MODE`: "1" or "true" enables the offline demo fallback
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let relay_url = lookup("PA_RELAY_URL").unwrap_or_else(|| DEFAULT_RELAY_URL.to_string());
        let demo_mode = lookup("PA_DEMO_MODE")
            .map(|flag| matches!(flag.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);

        Ok(Self {
            relay_url: parse_relay_url(&relay_url)?,
            demo_mode,
        })
    }
}

/// Parse a relay endpoint, accepting only `ws` and `wss` URLs.
pub fn parse_relay_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("invalid relay URL: {}", raw))?;
    match url.scheme() {
        "ws" | "wss" => Ok(url),
        other => bail!("relay URL must use ws:// or wss://, got {}://", other),
    }
}
