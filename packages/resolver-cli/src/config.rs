use anyhow::{Context, Result};
use dotenvy::dotenv;
use entity_resolver::sources::fns::DEFAULT_FNS_BASE_URL;
use entity_resolver::ResolverConfig;
use std::env;
use std::path::PathBuf;

const DEFAULT_USER_AGENT: &str = concat!("entity-resolver/", env!("CARGO_PKG_VERSION"));

/// CLI configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub resolver: ResolverConfig,
    pub fns_base_url: String,
    pub kontur_api_key: Option<String>,
    pub user_agent: String,
    pub rules_path: Option<PathBuf>,
    pub cache_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Ok(Self {
            resolver: ResolverConfig::from_env().context("invalid RESOLVER_* settings")?,
            fns_base_url: env::var("FNS_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_FNS_BASE_URL.to_string()),
            kontur_api_key: env::var("KONTUR_API_KEY").ok(),
            user_agent: env::var("HH_USER_AGENT")
                .unwrap_or_else(|_| DEFAULT_USER_AGENT.to_string()),
            rules_path: env::var("RESOLVER_RULES_PATH").ok().map(PathBuf::from),
            cache_url: env::var("RESOLVER_CACHE_URL").ok(),
        })
    }
}
