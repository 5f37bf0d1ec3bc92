use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::progression::RetryPolicy;

pub const DEFAULT_AI_GATEWAY_URL: &str = "https://ai.gateway.lovable.dev/v1/chat/completions";
pub const DEFAULT_AI_MODEL: &str = "google/gemini-2.5-flash";

pub fn load_environment() -> Result<(), Box<dyn std::error::Error>> {
    let is_production =
        dotenvy::var("ROCKET_PROFILE").unwrap_or("development".to_string()) == "production";

    let env_files = if is_production {
        vec!["config/common.env", "config/prod.env", ".secrets.env"]
    } else {
        vec!["config/common.env", "config/dev.env", ".secrets.env"]
    };

    for env_file in env_files {
        load_env_file(env_file)?;
    }

    Ok(())
}

fn load_env_file(path: &str) -> Result<(), Box<dyn std::error::Error>> {
    if !Path::new(path).exists() {
        warn!("Warning: Environment file {} not found, skipping", path);
        return Ok(());
    }

    dotenvy::from_filename_override(path)?;
    info!("Loaded environment from: {}", path);
    Ok(())
}

/// First admin account, created at launch when both `ADMIN_USERNAME` and
/// `ADMIN_PASSWORD` are set.
#[derive(Clone)]
pub struct AdminBootstrap {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for AdminBootstrap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminBootstrap")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub ai_gateway_url: String,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
    pub retry: RetryPolicy,
    pub session_ttl_hours: i64,
    pub admin: Option<AdminBootstrap>,
}

fn parsed_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("{} has an invalid value: {}", name, raw)),
        _ => Ok(default),
    }
}

impl AppConfig {
    pub fn from_env() -> Result<Self> {
        let max_attempts: u32 = parsed_var("XP_RETRY_MAX_ATTEMPTS", 5)?;
        let base_delay_ms: u64 = parsed_var("XP_RETRY_BASE_DELAY_MS", 25)?;

        if max_attempts == 0 {
            anyhow::bail!("XP_RETRY_MAX_ATTEMPTS must be at least 1");
        }

        let admin = match (
            std::env::var("ADMIN_USERNAME").ok().filter(|v| !v.trim().is_empty()),
            std::env::var("ADMIN_PASSWORD").ok().filter(|v| !v.is_empty()),
        ) {
            (Some(username), Some(password)) => {
                if password.len() < 8 {
                    anyhow::bail!("ADMIN_PASSWORD must be at least 8 characters");
                }
                Some(AdminBootstrap {
                    username: username.trim().to_string(),
                    password,
                })
            }
            (None, None) => None,
            _ => anyhow::bail!("ADMIN_USERNAME and ADMIN_PASSWORD must be set together"),
        };

        Ok(Self {
            database_url: std::env::var("DATABASE_URL").unwrap_or_default(),
            ai_gateway_url: std::env::var("AI_GATEWAY_URL")
                .unwrap_or_else(|_| DEFAULT_AI_GATEWAY_URL.to_string()),
            ai_api_key: std::env::var("AI_API_KEY").ok(),
            ai_model: std::env::var("AI_MODEL").unwrap_or_else(|_| DEFAULT_AI_MODEL.to_string()),
            retry: RetryPolicy {
                max_attempts,
                base_delay: Duration::from_millis(base_delay_ms),
            },
            session_ttl_hours: parsed_var("SESSION_TTL_HOURS", 1)?,
            admin,
        })
    }
}
