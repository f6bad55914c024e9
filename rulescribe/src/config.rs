//! Configuration for RuleScribe
//!
//! Tunables live in [`ScribeConfig`] (YAML, every section defaulted).
//! Credentials and endpoints come from CLI arguments or the environment via
//! [`Args`], and are laid over the file with [`Args::load_config`].

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use scribe_agent::backend::gemini::GEMINI_BASE_URL;

/// Fields at or above this confidence are handed to the critic as protected.
pub const DEFAULT_PROTECTION_THRESHOLD: f64 = 0.7;

/// Minimum age of `updated_at` before complete links are re-resolved.
pub const DEFAULT_LINK_COOLDOWN_DAYS: i64 = 30;

/// Desktop browser User-Agent for link verification.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Configuration loading errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("{0}")]
    Invalid(String),
}

/// Complete RuleScribe configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScribeConfig {
    /// Completion service settings
    pub completion: CompletionConfig,
    /// Generate/critique pipeline settings
    pub generation: GenerationConfig,
    /// Link resolution settings
    pub links: LinkConfig,
}

impl ScribeConfig {
    /// Load config from YAML.
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    /// Serialize to YAML.
    pub fn to_yaml(&self) -> Result<String, serde_yaml::Error> {
        serde_yaml::to_string(self)
    }

    /// Read and parse a YAML file.
    pub fn from_file(path: &std::path::Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Completion service configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// REST base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Sampling temperature
    pub temperature: f32,
    /// Output token cap
    pub max_output_tokens: Option<u32>,
    /// Per-request timeout (seconds)
    pub timeout_secs: u64,
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    /// Backoff before the second attempt (ms), doubling afterwards
    pub base_delay_ms: u64,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_string(),
            model: "models/gemini-2.5-flash".to_string(),
            temperature: 0.1,
            max_output_tokens: None,
            timeout_secs: 60,
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

impl CompletionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }
}

/// Pipeline configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Confidence at or above which a field is protected
    pub protection_threshold: f64,
    /// Repository matches included as context for new games
    pub context_match_limit: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            protection_threshold: DEFAULT_PROTECTION_THRESHOLD,
            context_match_limit: 3,
        }
    }
}

/// Link resolution configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Cooldown before complete links are re-checked (days)
    pub cooldown_days: i64,
    /// Timeout for each verification request (seconds)
    pub http_timeout_secs: u64,
    /// User-Agent sent with verification requests
    pub user_agent: String,
    /// Hosts accepted for `amazon_url`
    pub marketplace_domains: Vec<String>,
    /// Affiliate tracking id written into the `tag` parameter
    pub amazon_tracking_id: Option<String>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            cooldown_days: DEFAULT_LINK_COOLDOWN_DAYS,
            http_timeout_secs: 10,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            marketplace_domains: vec!["amazon.co.jp".to_string(), "amazon.com".to_string()],
            amazon_tracking_id: None,
        }
    }
}

impl LinkConfig {
    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

/// RuleScribe - board game metadata backfill
#[derive(Parser, Debug, Clone)]
#[command(name = "rulescribe")]
#[command(about = "Generate, critique and link-check board game records")]
pub struct Args {
    /// YAML config file with tunables
    #[arg(long, env = "SCRIBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Gemini API key
    #[arg(long, env = "GEMINI_API_KEY", hide_env_values = true)]
    pub gemini_api_key: Option<String>,

    /// Model override (e.g. models/gemini-2.5-flash)
    #[arg(long, env = "GEMINI_MODEL")]
    pub gemini_model: Option<String>,

    /// Completion endpoint override
    #[arg(long, env = "GEMINI_BASE_URL")]
    pub gemini_base_url: Option<String>,

    /// PostgREST base URL of the game store
    #[arg(long, env = "SUPABASE_URL")]
    pub supabase_url: Option<String>,

    /// Service role key for the game store
    #[arg(long, env = "SUPABASE_SERVICE_ROLE_KEY", hide_env_values = true)]
    pub supabase_key: Option<String>,

    /// Affiliate tracking id for marketplace links
    #[arg(long, env = "AMAZON_TRACKING_ID")]
    pub amazon_tracking_id: Option<String>,

    /// Log level
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Generate a new game record from a free-text query
    Generate { query: String },
    /// Regenerate an existing record using itself as context
    Regenerate { slug: String },
    /// Re-resolve external links of a record
    Links {
        slug: String,
        /// Ignore the staleness cooldown
        #[arg(long)]
        force: bool,
    },
    /// Search stored games
    Search { query: String },
    /// List recently updated games
    Recent {
        #[arg(long, default_value = "20")]
        limit: usize,
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Show one game (counts as a view)
    Show { slug: String },
}

impl Command {
    /// Whether the command calls the completion service.
    pub fn needs_completion(&self) -> bool {
        matches!(
            self,
            Command::Generate { .. } | Command::Regenerate { .. } | Command::Links { .. }
        )
    }
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.command.needs_completion()
            && self.gemini_api_key.as_deref().map_or(true, str::is_empty)
        {
            return Err("GEMINI_API_KEY is required for this command".to_string());
        }

        if self.supabase_url.is_some() != self.supabase_key.is_some() {
            return Err(
                "SUPABASE_URL and SUPABASE_SERVICE_ROLE_KEY must be set together".to_string(),
            );
        }

        if let Command::Recent { limit, .. } = self.command {
            if limit == 0 {
                return Err("--limit must be positive".to_string());
            }
        }

        Ok(())
    }

    /// Whether the PostgREST store is configured.
    pub fn has_store(&self) -> bool {
        self.supabase_url.is_some() && self.supabase_key.is_some()
    }

    /// Load the config file (if any) and apply argument overrides.
    pub fn load_config(&self) -> Result<ScribeConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ScribeConfig::from_file(path)?,
            None => ScribeConfig::default(),
        };

        if let Some(model) = &self.gemini_model {
            config.completion.model = model.clone();
        }
        if let Some(base_url) = &self.gemini_base_url {
            config.completion.base_url = base_url.clone();
        }
        if let Some(tag) = &self.amazon_tracking_id {
            config.links.amazon_tracking_id = Some(tag.clone()).filter(|t| !t.is_empty());
        }

        if !(0.0..=1.0).contains(&config.generation.protection_threshold) {
            return Err(ConfigError::Invalid(format!(
                "generation.protection_threshold must be within [0, 1], got {}",
                config.generation.protection_threshold
            )));
        }
        if config.links.cooldown_days < 0 {
            return Err(ConfigError::Invalid(
                "links.cooldown_days must not be negative".to_string(),
            ));
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(extra: &[&str]) -> Args {
        let mut argv = vec!["rulescribe"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = ScribeConfig::default();
        assert_eq!(config.generation.protection_threshold, 0.7);
        assert_eq!(config.links.cooldown_days, 30);
        assert_eq!(config.completion.max_attempts, 3);
        assert!(config.links.marketplace_domains.contains(&"amazon.co.jp".to_string()));
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = ScribeConfig::from_yaml("links:\n  cooldown_days: 7\n").unwrap();
        assert_eq!(config.links.cooldown_days, 7);
        assert_eq!(config.links.http_timeout_secs, 10);
        assert_eq!(config.generation, GenerationConfig::default());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = ScribeConfig::default();
        let yaml = config.to_yaml().unwrap();
        assert_eq!(ScribeConfig::from_yaml(&yaml).unwrap(), config);
    }

    #[test]
    fn test_overrides() {
        let args = args(&[
            "--gemini-api-key",
            "k",
            "--gemini-model",
            "models/test",
            "--amazon-tracking-id",
            "scribe-22",
            "generate",
            "Catan",
        ]);
        assert!(args.validate().is_ok());

        let config = args.load_config().unwrap();
        assert_eq!(config.completion.model, "models/test");
        assert_eq!(config.links.amazon_tracking_id.as_deref(), Some("scribe-22"));
    }

    fn explicit_args(command: Command) -> Args {
        Args {
            config: None,
            gemini_api_key: None,
            gemini_model: None,
            gemini_base_url: None,
            supabase_url: None,
            supabase_key: None,
            amazon_tracking_id: None,
            log_level: "info".to_string(),
            command,
        }
    }

    #[test]
    fn test_generate_requires_key() {
        let mut args = explicit_args(Command::Generate {
            query: "Catan".into(),
        });
        assert!(args.validate().is_err());

        args.gemini_api_key = Some(String::new());
        assert!(args.validate().is_err());

        args.gemini_api_key = Some("k".into());
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_search_without_key() {
        let mut args = explicit_args(Command::Search {
            query: "catan".into(),
        });
        assert!(args.validate().is_ok());
        assert!(!args.has_store());

        args.supabase_url = Some("http://localhost:54321".into());
        assert!(args.validate().is_err());

        args.supabase_key = Some("service-key".into());
        assert!(args.validate().is_ok());
        assert!(args.has_store());
    }

    #[test]
    fn test_recent_limit_positive() {
        let args = explicit_args(Command::Recent {
            limit: 0,
            offset: 0,
        });
        assert!(args.validate().is_err());
    }
}
