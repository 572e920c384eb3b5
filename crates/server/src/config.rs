//! Server configuration from environment variables.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use anyhow::{Context, Result};

pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";

/// Which browser origins may open the WebSocket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorsOrigin {
    Any,
    Exact(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub cors_origin: CorsOrigin,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            cors_origin: CorsOrigin::Exact(DEFAULT_CORS_ORIGIN.to_string()),
        }
    }
}

impl ServerConfig {
    /// Parse the configuration from the process environment.
    ///
    /// Environment variables:
    /// - `PA_BIND_ADDR`: interface to listen on (default: "0.0.0.0")
    /// - `PA_PORT`: TCP port (default: 3001)
    /// - `PA_CORS_ORIGIN`: allowed origin, or "*" for any (default: "http://localhost:3000")
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(addr) = lookup("PA_BIND_ADDR") {
            config.bind_addr = addr
                .parse()
                .with_context(|| format!("PA_BIND_ADDR is not an IP address: {}", addr))?;
        }
        if let Some(port) = lookup("PA_PORT") {
            config.port = port
                .parse()
                .with_context(|| format!("PA_PORT is not a port number: {}", port))?;
        }
        if let Some(origin) = lookup("PA_CORS_ORIGIN") {
            config.cors_origin = match origin.trim() {
                "*" => CorsOrigin::Any,
                exact => CorsOrigin::Exact(exact.to_string()),
            };
        }

        Ok(config)
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}
