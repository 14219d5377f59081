//! Application settings.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables. Every section has a `Default`, so a TOML file only
//! needs the keys it changes.
//!
//! ```toml
//! [openalex]
//! mailto = "me@example.org"
//! max_retries = 5
//!
//! [server]
//! port = 9000
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::rerank::Aggregation;

/// Errors that can occur while loading settings.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Settings file could not be read
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Settings file is not valid TOML for this schema
    #[error("Failed to parse settings: {0}")]
    Parse(#[from] toml::de::Error),

    /// Environment variable has an unusable value
    #[error("Invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },

    /// Settings are well-formed but out of range
    #[error("Invalid settings: {0}")]
    Invalid(String),
}

/// Result type for settings operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub openalex: OpenAlexSettings,
    pub search: SearchSettings,
    pub models: ModelSettings,
    pub server: ServerSettings,
}

/// OpenAlex client settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OpenAlexSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub max_retries: u32,
    /// Seconds; the n-th retry waits `backoff_factor * 2^n` plus jitter
    pub backoff_factor: f64,
    /// Contact address for the OpenAlex polite pool
    pub mailto: Option<String>,
}

impl Default for OpenAlexSettings {
    fn default() -> Self {
        Self {
            base_url: "https://api.openalex.org".to_string(),
            timeout_secs: 20,
            max_retries: 3,
            backoff_factor: 0.8,
            mailto: None,
        }
    }
}

/// Relaxation loop settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSettings {
    /// Page size used when a request carries no hint
    pub page_size: usize,
    /// Use the `.no_stem` variants of the search fields
    pub exact_no_stem: bool,
}

impl Default for SearchSettings {
    fn default() -> Self {
        Self {
            page_size: 40,
            exact_no_stem: false,
        }
    }
}

/// Local model settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSettings {
    /// fastembed `EmbeddingModel` variant name
    pub embedding_model: String,
    /// fastembed `RerankerModel` variant name
    pub reranker_model: String,
    /// Model cache directory; a temporary directory is used when unset
    pub cache_dir: Option<PathBuf>,
    pub aggregation: Aggregation,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            embedding_model: "AllMiniLML6V2".to_string(),
            reranker_model: "BGERerankerBase".to_string(),
            cache_dir: None,
            aggregation: Aggregation::Mean,
        }
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Origins allowed by CORS
    pub cors_origins: Vec<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: vec![
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:5173".to_string(),
                "http://localhost:3000".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl Settings {
    /// Load settings: defaults, then `path` if given, then the environment.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read or parsed, an
    /// environment override is malformed, or the result fails validation
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Parse a TOML settings file on top of the defaults.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&text)?)
    }

    /// Apply environment overrides read through `lookup`.
    ///
    /// Blank values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("OPENALEX_BASE_URL") {
            self.openalex.base_url = v;
        }
        if let Some(v) = get("OPENALEX_TIMEOUT_S") {
            self.openalex.timeout_secs = parse_env("OPENALEX_TIMEOUT_S", &v)?;
        }
        if let Some(v) = get("OPENALEX_MAX_RETRIES") {
            self.openalex.max_retries = parse_env("OPENALEX_MAX_RETRIES", &v)?;
        }
        if let Some(v) = get("OPENALEX_BACKOFF_FACTOR") {
            self.openalex.backoff_factor = parse_env("OPENALEX_BACKOFF_FACTOR", &v)?;
        }
        if let Some(v) = get("OPENALEX_MAILTO") {
            self.openalex.mailto = Some(v);
        }
        if let Some(v) = get("RESEARCH_FINDER_HOST") {
            self.server.host = v;
        }
        if let Some(v) = get("RESEARCH_FINDER_PORT") {
            self.server.port = parse_env("RESEARCH_FINDER_PORT", &v)?;
        }
        if let Some(v) = get("RESEARCH_FINDER_CACHE_DIR") {
            self.models.cache_dir = Some(PathBuf::from(v));
        }
        Ok(())
    }

    /// Check value ranges.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.openalex.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("openalex.base_url cannot be empty".to_string()));
        }
        if self.openalex.timeout_secs == 0 {
            return Err(ConfigError::Invalid("openalex.timeout_secs must be positive".to_string()));
        }
        if !self.openalex.backoff_factor.is_finite() || self.openalex.backoff_factor < 0.0 {
            return Err(ConfigError::Invalid(
                "openalex.backoff_factor must be a finite, non-negative number".to_string(),
            ));
        }
        if !(1..=200).contains(&self.search.page_size) {
            return Err(ConfigError::Invalid(format!(
                "search.page_size must be within 1..=200, got {}",
                self.search.page_size
            )));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> ConfigResult<T> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.openalex.base_url, "https://api.openalex.org");
        assert_eq!(settings.openalex.timeout_secs, 20);
        assert_eq!(settings.openalex.max_retries, 3);
        assert_eq!(settings.search.page_size, 40);
        assert!(!settings.search.exact_no_stem);
        assert_eq!(settings.models.aggregation, Aggregation::Mean);
        assert_eq!(settings.server.port, 8000);
        for origin in ["http://localhost:5173", "http://localhost:3000", "http://127.0.0.1:3000"] {
            assert!(settings.server.cors_origins.iter().any(|o| o == origin));
        }
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[openalex]\nmailto = \"me@example.org\"\n\n[search]\nexact_no_stem = true\n\n[models]\naggregation = \"max\""
        )
        .unwrap();

        let settings = Settings::from_file(file.path()).unwrap();
        assert_eq!(settings.openalex.mailto.as_deref(), Some("me@example.org"));
        assert_eq!(settings.openalex.max_retries, 3);
        assert!(settings.search.exact_no_stem);
        assert_eq!(settings.search.page_size, 40);
        assert_eq!(settings.models.aggregation, Aggregation::Max);
        assert_eq!(settings.models.embedding_model, "AllMiniLML6V2");
    }

    #[test]
    fn test_malformed_toml() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nport = \"not a number\"").unwrap();
        assert!(matches!(
            Settings::from_file(file.path()),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_missing_file() {
        let result = Settings::load(Some(Path::new("/nonexistent/research-finder.toml")));
        assert!(matches!(result, Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_env_overrides() {
        let mut settings = Settings::default();
        settings
            .apply_env(env(&[
                ("OPENALEX_BASE_URL", "http://localhost:9999"),
                ("OPENALEX_TIMEOUT_S", "5"),
                ("OPENALEX_MAX_RETRIES", "0"),
                ("OPENALEX_BACKOFF_FACTOR", "0.25"),
                ("OPENALEX_MAILTO", "ops@example.org"),
                ("RESEARCH_FINDER_PORT", "9000"),
                ("RESEARCH_FINDER_CACHE_DIR", "/tmp/models"),
                ("RESEARCH_FINDER_HOST", "   "),
            ]))
            .unwrap();

        assert_eq!(settings.openalex.base_url, "http://localhost:9999");
        assert_eq!(settings.openalex.timeout_secs, 5);
        assert_eq!(settings.openalex.max_retries, 0);
        assert!((settings.openalex.backoff_factor - 0.25).abs() < 1e-9);
        assert_eq!(settings.openalex.mailto.as_deref(), Some("ops@example.org"));
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.models.cache_dir, Some(PathBuf::from("/tmp/models")));
    }

    #[test]
    fn test_env_invalid_number() {
        let mut settings = Settings::default();
        let result = settings.apply_env(env(&[("RESEARCH_FINDER_PORT", "eighty")]));
        assert!(matches!(result, Err(ConfigError::InvalidEnv { .. })));
    }

    #[test]
    fn test_validate_ranges() {
        let mut settings = Settings::default();
        settings.search.page_size = 0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.search.page_size = 201;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.openalex.base_url = " ".to_string();
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.openalex.backoff_factor = -1.0;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.openalex.backoff_factor = f64::INFINITY;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.openalex.backoff_factor = f64::NAN;
        assert!(settings.validate().is_err());

        let mut settings = Settings::default();
        settings.openalex.timeout_secs = 0;
        assert!(settings.validate().is_err());
    }
}
