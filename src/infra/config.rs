//! Centralized configuration (environment variables + defaults).

use crate::error::{EntityError, Result};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    Memory,
    Postgres,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// `memory://` or `postgres://…` / `postgresql://…`.
    pub url: String,
    pub max_connections: u32,
}

impl StoreConfig {
    /// Reads `DATABASE_URL` (required) and `DATABASE_MAX_CONNECTIONS`
    /// (default 5), loading `.env` first if present.
    pub fn from_env() -> Result<Self> {
        dotenv::dotenv().ok();
        Ok(Self {
            url: database_url()?,
            max_connections: max_connections()?,
        })
    }

    pub fn memory() -> Self {
        Self {
            url: "memory://".to_string(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }

    pub fn backend(&self) -> Result<Backend> {
        let scheme = self.url.split("://").next().unwrap_or_default().to_lowercase();
        match scheme.as_str() {
            "memory" => Ok(Backend::Memory),
            "postgres" | "postgresql" if self.url.contains("://") => Ok(Backend::Postgres),
            _ => Err(EntityError::Configuration(format!(
                "unsupported store url '{}' (expected memory:// or postgres://)",
                self.url
            ))),
        }
    }
}

/// Database URL must be provided (no default) for safety.
pub fn database_url() -> Result<String> {
    std::env::var("DATABASE_URL").map_err(|_| EntityError::Configuration("DATABASE_URL must be set".to_string()))
}

pub fn max_connections() -> Result<u32> {
    match std::env::var("DATABASE_MAX_CONNECTIONS") {
        Err(_) => Ok(DEFAULT_MAX_CONNECTIONS),
        Ok(v) => v
            .trim()
            .parse::<u32>()
            .map(|n| n.max(1))
            .map_err(|_| EntityError::Configuration("DATABASE_MAX_CONNECTIONS must be a valid u32".to_string())),
    }
}
