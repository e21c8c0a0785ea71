use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Config {
    /// Port the service listens on
    pub port: u16,
    /// Path to the SQLite database file
    pub database_url: String,
    /// Base URL of the model provider gateway
    pub gateway_base_url: String,
    /// Model identifier requested from the provider
    pub model: String,
    /// Base URL of the OAuth provider used for credential re-verification
    pub oauth_provider_base_url: String,
    /// Interval between scheduled-task due checks
    pub scheduler_tick: Duration,
    /// Allowed CORS origins for browser clients
    pub allowed_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let port = env_parse("AGENTD_PORT", 8080)?;
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "data/agentd.db".to_string());
        let gateway_base_url = std::env::var("GATEWAY_BASE_URL")
            .unwrap_or_else(|_| "https://api.anthropic.com".to_string());
        let model = std::env::var("AGENTD_MODEL")
            .unwrap_or_else(|_| "claude-haiku-4-5-20251001".to_string());
        let oauth_provider_base_url = std::env::var("OAUTH_PROVIDER_BASE_URL")
            .unwrap_or_else(|_| "https://atyourservice.ai".to_string());
        let scheduler_tick = Duration::from_millis(env_parse("AGENTD_SCHEDULER_TICK_MS", 5_000)?);

        let allowed_origins = std::env::var("AGENTD_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| {
                vec![
                    "http://localhost:3000".to_string(),
                    "http://127.0.0.1:3000".to_string(),
                ]
            });

        Ok(Self {
            port,
            database_url,
            gateway_base_url,
            model,
            oauth_provider_base_url,
            scheduler_tick,
            allowed_origins,
        })
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("Invalid {key} '{value}': {e}")),
        Err(_) => Ok(default),
    }
}
