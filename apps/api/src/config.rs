use std::path::PathBuf;
use std::str::FromStr;

use anyhow::{Context, Result};

/// Application configuration loaded from environment variables.
/// Fails at startup if required variables are missing or malformed.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub anthropic_api_key: String,
    /// Absent key selects the local hashing embedder.
    pub embedding_api_key: Option<String>,
    pub embedding_api_base: String,
    pub embedding_model: String,
    pub index_dir: PathBuf,
    pub relevance_threshold: f32,
    pub relevance_top_k: usize,
    /// Row limit the agent is told to respect unless the user asks for more.
    pub result_limit: u32,
    pub query_timeout_secs: u64,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        Ok(Config {
            database_url: require_env("DATABASE_URL")?,
            anthropic_api_key: require_env("ANTHROPIC_API_KEY")?,
            embedding_api_key: std::env::var("EMBEDDING_API_KEY")
                .ok()
                .filter(|k| !k.trim().is_empty()),
            embedding_api_base: std::env::var("EMBEDDING_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            index_dir: PathBuf::from(
                std::env::var("INDEX_DIR").unwrap_or_else(|_| "./indexes".to_string()),
            ),
            relevance_threshold: parse_env("RELEVANCE_THRESHOLD", 0.25)?,
            relevance_top_k: parse_env("RELEVANCE_TOP_K", 4)?,
            result_limit: parse_env("RESULT_LIMIT", 10)?,
            query_timeout_secs: parse_env("QUERY_TIMEOUT_SECS", 30)?,
            port: parse_env("PORT", 8080)?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn parse_env<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{key} has an invalid value: '{raw}'")),
        Err(_) => Ok(default),
    }
}
