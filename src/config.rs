//! Configuration loaded from environment variables.
//!
//! Required:
//! - `SUPABASE_URL` - project URL, e.g. `https://xyz.supabase.co`
//! - `SUPABASE_ANON_KEY` - public anon key used for auth and row access
//!
//! Optional:
//! - `GEMINI_API_KEY` - key for the generative API. When absent, only the
//!   rewrite/suggest operations fail; everything else keeps working.
//! - `GEMINI_MODEL` - model name (default `gemini-pro`)
//! - `GEMINI_API_URL` - API base (default Google's v1beta endpoint)
//! - `HOST` / `PORT` - bind address for the HTTP API (default `127.0.0.1:3000`)
//! - `WORKING_DIR` - where `.taskmaster/` state lives (default current dir)
//! - `MAX_CONCURRENT_AI` - bound on in-flight AI calls (default 2)

use std::path::PathBuf;

use thiserror::Error;

pub const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-pro";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_MAX_CONCURRENT_AI: usize = 2;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

/// Supabase project settings.
#[derive(Debug, Clone)]
pub struct SupabaseConfig {
    pub url: String,
    pub anon_key: String,
}

/// Generative API settings.
#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub api_url: String,
}

/// Application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub supabase: SupabaseConfig,
    pub gemini: GeminiConfig,
    pub host: String,
    pub port: u16,
    pub working_dir: PathBuf,
    pub max_concurrent_ai: usize,
}

impl Config {
    /// Load configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let supabase_url = get("SUPABASE_URL")
            .ok_or_else(|| ConfigError::MissingEnvVar("SUPABASE_URL".to_string()))?;
        url::Url::parse(&supabase_url)
            .map_err(|e| ConfigError::InvalidValue("SUPABASE_URL".to_string(), e.to_string()))?;

        let anon_key = get("SUPABASE_ANON_KEY")
            .ok_or_else(|| ConfigError::MissingEnvVar("SUPABASE_ANON_KEY".to_string()))?;

        let api_key = get("GEMINI_API_KEY");
        if api_key.is_none() {
            tracing::warn!("GEMINI_API_KEY not set; AI rewrite and suggestion are disabled");
        }

        let port = match get("PORT") {
            Some(p) => p
                .parse::<u16>()
                .map_err(|e| ConfigError::InvalidValue("PORT".to_string(), e.to_string()))?,
            None => DEFAULT_PORT,
        };

        let max_concurrent_ai = match get("MAX_CONCURRENT_AI") {
            Some(n) => match n.parse::<usize>() {
                Ok(0) => {
                    return Err(ConfigError::InvalidValue(
                        "MAX_CONCURRENT_AI".to_string(),
                        "must be at least 1".to_string(),
                    ))
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::InvalidValue(
                        "MAX_CONCURRENT_AI".to_string(),
                        e.to_string(),
                    ))
                }
            },
            None => DEFAULT_MAX_CONCURRENT_AI,
        };

        let working_dir = get("WORKING_DIR")
            .map(PathBuf::from)
            .or_else(|| std::env::current_dir().ok())
            .unwrap_or_else(|| PathBuf::from("."));

        Ok(Self {
            supabase: SupabaseConfig {
                url: supabase_url.trim_end_matches('/').to_string(),
                anon_key,
            },
            gemini: GeminiConfig {
                api_key,
                model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
                api_url: get("GEMINI_API_URL")
                    .unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string())
                    .trim_end_matches('/')
                    .to_string(),
            },
            host: get("HOST").unwrap_or_else(|| DEFAULT_HOST.to_string()),
            port,
            working_dir,
            max_concurrent_ai,
        })
    }

    /// Directory holding persisted local state.
    pub fn state_dir(&self) -> PathBuf {
        self.working_dir.join(".taskmaster")
    }
}
