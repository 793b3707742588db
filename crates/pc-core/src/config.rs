//! Configuration types and loading

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default upload limit: 10 MiB
pub const DEFAULT_MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Remote store configuration
    pub storage: StorageConfig,

    /// Piece handling limits and presentation
    pub pieces: PiecesConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Root directory of the directory-backed store
    pub local_path: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PiecesConfig {
    /// Maximum upload size in bytes
    pub max_file_size: u64,
    /// Wording used for citations and manifests
    pub citation_style: CitationStyle,
}

impl Default for PiecesConfig {
    fn default() -> Self {
        Self {
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            citation_style: CitationStyle::default(),
        }
    }
}

/// Wording of inserted citations and manifests
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum CitationStyle {
    #[default]
    English,
    French,
}

impl FromStr for CitationStyle {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "english" | "en" => Ok(Self::English),
            "french" | "fr" => Ok(Self::French),
            _ => Err(ConfigError::invalid(
                "PIECES_CITATION_STYLE",
                format!("expected 'english' or 'french', got '{}'", s),
            )),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// tracing-subscriber EnvFilter directive
    pub filter: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            storage: StorageConfig {
                local_path: "./pieces-data".to_string(),
            },
            pieces: PiecesConfig::default(),
            logging: LoggingConfig {
                filter: "info,pc_pieces=debug".to_string(),
                json: false,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let parse_bool = |v: String| v == "true" || v == "1" || v == "yes";

        if let Some(path) = lookup("PIECES_STORAGE_PATH") {
            config.storage.local_path = path;
        }

        if let Some(size) = lookup("PIECES_MAX_FILE_SIZE") {
            config.pieces.max_file_size = size
                .trim()
                .parse()
                .map_err(|e| ConfigError::invalid("PIECES_MAX_FILE_SIZE", format!("{}", e)))?;
        }

        if let Some(style) = lookup("PIECES_CITATION_STYLE") {
            config.pieces.citation_style = style.parse()?;
        }

        if let Some(filter) = lookup("PIECES_LOG") {
            config.logging.filter = filter;
        }
        if let Some(v) = lookup("PIECES_LOG_JSON") {
            config.logging.json = parse_bool(v);
        }

        Ok(config)
    }

    /// Resolve the storage root as a path
    pub fn storage_root(&self) -> std::path::PathBuf {
        std::path::PathBuf::from(&self.storage.local_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.pieces.max_file_size, 10 * 1024 * 1024);
        assert_eq!(config.pieces.citation_style, CitationStyle::English);
        assert!(!config.logging.json);
    }

    #[test]
    fn test_overrides() {
        let config = AppConfig::from_lookup(lookup(&[
            ("PIECES_STORAGE_PATH", "/tmp/pieces"),
            ("PIECES_MAX_FILE_SIZE", "2048"),
            ("PIECES_CITATION_STYLE", "French"),
            ("PIECES_LOG_JSON", "1"),
        ]))
        .unwrap();

        assert_eq!(config.storage.local_path, "/tmp/pieces");
        assert_eq!(config.pieces.max_file_size, 2048);
        assert_eq!(config.pieces.citation_style, CitationStyle::French);
        assert!(config.logging.json);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let err = AppConfig::from_lookup(lookup(&[("PIECES_MAX_FILE_SIZE", "ten")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "PIECES_MAX_FILE_SIZE"
        ));

        let err =
            AppConfig::from_lookup(lookup(&[("PIECES_CITATION_STYLE", "klingon")])).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref key, .. } if key == "PIECES_CITATION_STYLE"
        ));
    }

    #[test]
    fn test_citation_style_parses_names_and_codes() {
        assert_eq!("fr".parse::<CitationStyle>().unwrap(), CitationStyle::French);
        assert_eq!(" English ".parse::<CitationStyle>().unwrap(), CitationStyle::English);
        assert!("de".parse::<CitationStyle>().is_err());
    }
}
