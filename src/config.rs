use anyhow::{Result, anyhow};
use serde::Deserialize;
use std::env;
use tracing::{info, warn};

use crate::llm_providers::ProviderKind;

// Import logging macros
use crate::{log_system_event, log_validation};

/// Complete application configuration loaded from environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub server: ServerConfig,
    pub generation: GenerationConfig,
    pub logging: LoggingConfig,
}

/// Database connection configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

/// Model provider configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub kind: ProviderKind,
    pub model: Option<String>,
}

/// HTTP server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub port: u16,
    pub host: String,
}

/// Background generation tuning
#[derive(Debug, Clone, Deserialize)]
pub struct GenerationConfig {
    pub max_concurrent: usize,       // simultaneous provider calls per task
    pub cards_per_section: usize,    // quota when no keywords are given
    pub pipeline_timeout_secs: u64,  // wall clock budget per task
    pub table_max_entries: usize,    // live status table size cap
    pub table_max_age_hours: i64,    // live status entry age cap
    pub reaper_interval_secs: u64,
}

/// Logging system configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub file_enabled: bool,
    pub console_enabled: bool,
    pub log_directory: String,
}

impl Config {
    /// Load configuration from environment variables with sensible defaults
    pub fn from_env() -> Result<Self> {
        log_system_event!(config, "Loading application configuration from environment variables");

        let database_config = DatabaseConfig::from_env()?;
        let provider_config = ProviderConfig::from_env()?;
        let server_config = ServerConfig::from_env()?;
        let generation_config = GenerationConfig::from_env()?;
        let logging_config = LoggingConfig::from_env()?;

        let config = Config {
            database: database_config,
            provider: provider_config,
            server: server_config,
            generation: generation_config,
            logging: logging_config,
        };

        log_system_event!(config, "Configuration loaded successfully");
        config.log_configuration_summary();

        Ok(config)
    }

    /// Log a summary of loaded configuration (without sensitive data)
    fn log_configuration_summary(&self) {
        info!(
            database_url_masked = %mask_sensitive_data(&self.database.url),
            provider = ?self.provider.kind,
            model = ?self.provider.model,
            server_address = %format!("{}:{}", self.server.host, self.server.port),
            max_concurrent = self.generation.max_concurrent,
            cards_per_section = self.generation.cards_per_section,
            pipeline_timeout_secs = self.generation.pipeline_timeout_secs,
            log_level = %self.logging.level,
            "Configuration summary"
        );
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        // Validate database URL format
        if !self.database.url.contains("sqlite:") && !self.database.url.contains("postgres://") {
            return Err(anyhow!(
                "DATABASE_URL must start with 'sqlite:' or 'postgres://'"
            ));
        }

        // Validate server port range
        if self.server.port == 0 {
            return Err(anyhow!("Server port must be greater than 0"));
        }

        if self.generation.max_concurrent == 0 {
            return Err(anyhow!("MAX_CONCURRENT_GENERATIONS must be at least 1"));
        }

        if self.generation.cards_per_section == 0 {
            return Err(anyhow!("CARDS_PER_SECTION must be at least 1"));
        }

        if self.generation.pipeline_timeout_secs == 0 {
            return Err(anyhow!("PIPELINE_TIMEOUT_SECS must be greater than 0"));
        }

        if self.generation.table_max_entries == 0 {
            return Err(anyhow!("TASK_TABLE_MAX_ENTRIES must be at least 1"));
        }

        // Validate provider API key presence
        if self.provider.api_key.is_empty() || self.provider.api_key == "your-api-key" {
            warn!("Provider API key appears to be placeholder or empty - generation may not work");
        }

        // Validate log level
        if !["trace", "debug", "info", "warn", "error"]
            .contains(&self.logging.level.to_lowercase().as_str())
        {
            warn!(
                "Invalid log level '{}', using 'info' as fallback",
                self.logging.level
            );
        }

        log_validation!(
            success,
            "configuration",
            "Configuration validation completed successfully"
        );
        Ok(())
    }
}

impl DatabaseConfig {
    fn from_env() -> Result<Self> {
        let url =
            env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:path_generator.db".to_string());

        Ok(DatabaseConfig { url })
    }
}

impl ProviderConfig {
    fn from_env() -> Result<Self> {
        let api_key = env::var("LLM_API_KEY").unwrap_or_else(|_| "your-api-key".to_string());

        let base_url = env::var("LLM_BASE_URL").ok();

        let provider_str = env::var("LLM_PROVIDER").unwrap_or_else(|_| "openai".to_string());

        let kind = match provider_str.to_lowercase().as_str() {
            "gemini" | "google" => ProviderKind::Gemini,
            "openai" | "chatgpt" | "gpt" => ProviderKind::OpenAI,
            _ => {
                info!("Unknown provider '{}', defaulting to OpenAI", provider_str);
                ProviderKind::OpenAI
            }
        };

        let model = env::var("LLM_MODEL").ok();

        Ok(ProviderConfig {
            api_key,
            base_url,
            kind,
            model,
        })
    }
}

impl ServerConfig {
    fn from_env() -> Result<Self> {
        let port_str = env::var("PORT").unwrap_or_else(|_| "3000".to_string());

        let port = port_str.parse::<u16>().map_err(|_| {
            anyhow!(
                "Invalid PORT value: '{}'. Must be a number between 1-65535",
                port_str
            )
        })?;

        let host = env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string());

        Ok(ServerConfig { port, host })
    }
}

impl GenerationConfig {
    fn from_env() -> Result<Self> {
        let max_concurrent = parse_env_number("MAX_CONCURRENT_GENERATIONS", 5)?;
        let cards_per_section = parse_env_number("CARDS_PER_SECTION", 4)?;
        let pipeline_timeout_secs = parse_env_number("PIPELINE_TIMEOUT_SECS", 1500)?;
        let table_max_entries = parse_env_number("TASK_TABLE_MAX_ENTRIES", 100)?;
        let table_max_age_hours = parse_env_number("TASK_TABLE_MAX_AGE_HOURS", 24)?;
        let reaper_interval_secs = parse_env_number("TASK_REAPER_INTERVAL_SECS", 300)?;

        Ok(GenerationConfig {
            max_concurrent,
            cards_per_section,
            pipeline_timeout_secs,
            table_max_entries,
            table_max_age_hours,
            reaper_interval_secs,
        })
    }
}

impl LoggingConfig {
    /// Public so logging can come up before the full configuration loads.
    pub fn from_env() -> Result<Self> {
        let level = env::var("RUST_LOG").unwrap_or_else(|_| "info,path_generator=debug".to_string());

        let file_enabled = env::var("LOG_FILE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let console_enabled = env::var("LOG_CONSOLE_ENABLED")
            .unwrap_or_else(|_| "true".to_string())
            .parse::<bool>()
            .unwrap_or(true);

        let log_directory = env::var("LOG_DIRECTORY").unwrap_or_else(|_| "logs".to_string());

        Ok(LoggingConfig {
            level,
            file_enabled,
            console_enabled,
            log_directory,
        })
    }
}

fn parse_env_number<T: std::str::FromStr>(name: &str, default: T) -> Result<T> {
    match env::var(name) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|_| anyhow!("Invalid {} value: '{}'. Must be a number", name, raw)),
        Err(_) => Ok(default),
    }
}

/// Mask sensitive data in configuration for safe logging
fn mask_sensitive_data(data: &str) -> String {
    if data.len() <= 8 {
        "*".repeat(data.len())
    } else {
        format!("{}***{}", &data[..4], &data[data.len() - 4..])
    }
}
