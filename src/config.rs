//! Configuration loading and schema definitions.
//!
//! The orchestration core never parses files: it consumes a validated
//! [`Config`] struct. This module is the edge that produces one from a
//! TOML file or string.

pub mod schema;

pub use schema::*;

use std::path::{Path, PathBuf};

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Fatal configuration errors, surfaced before any test runs.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Concurrency must be at least 1.
    #[error("invalid concurrency {0}: must be at least 1")]
    InvalidConcurrency(usize),

    /// The per-test timeout must be at least one second.
    #[error("invalid per-test timeout: must be at least 1 second")]
    InvalidPerTestTimeout,

    /// A configured build timeout of zero would abort immediately.
    #[error("invalid build timeout: must be at least 1 second when set")]
    InvalidBuildTimeout,

    /// A matrix dimension with no values would erase every unit.
    #[error("matrix dimension {0} is empty")]
    EmptyMatrixDimension(usize),

    /// The runner command template could not be used.
    #[error("invalid runner command: {0}")]
    InvalidRunnerCommand(String),

    /// The config file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML or does not match the schema.
    #[error("failed to parse config: {0}")]
    Parse(#[from] Box<toml::de::Error>),
}

/// Loads configuration from a TOML file and validates it.
///
/// # Example
///
/// ```no_run
/// use gridrun::config::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("gridrun.toml"))?;
/// println!("concurrency: {}", config.build.concurrency);
/// # Ok::<(), gridrun::config::ConfigError>(())
/// ```
pub fn load_config(path: &Path) -> ConfigResult<Config> {
    let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    load_config_str(&contents)
}

/// Loads configuration from a TOML string and validates it.
///
/// # Example
///
/// ```
/// use gridrun::config::load_config_str;
///
/// let config = load_config_str(r#"
///     [build]
///     concurrency = 4
///     max_retries = 1
/// "#)?;
///
/// assert_eq!(config.build.concurrency, 4);
/// # Ok::<(), gridrun::config::ConfigError>(())
/// ```
pub fn load_config_str(contents: &str) -> ConfigResult<Config> {
    let config: Config = toml::from_str(contents).map_err(Box::new)?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let config = load_config_str("[build]\n").unwrap();
        assert_eq!(config.build.concurrency, 4);
        assert_eq!(config.build.max_retries, 2);
        assert!(config.build.autosplit);
        assert!(config.build.smart_ordering);
    }

    #[test]
    fn test_invalid_concurrency_rejected() {
        let err = load_config_str("[build]\nconcurrency = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidConcurrency(0)));
    }

    #[test]
    fn test_empty_matrix_dimension_rejected() {
        let err = load_config_str("[build]\nmatrix_dims = [[\"chrome\"], []]\n").unwrap_err();
        assert!(matches!(err, ConfigError::EmptyMatrixDimension(1)));
    }

    #[test]
    fn test_zero_build_timeout_rejected() {
        let err = load_config_str("[build]\nbuild_timeout_secs = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBuildTimeout));
    }

    #[test]
    fn test_full_config_round_trip() {
        let config = load_config_str(
            r#"
            [build]
            concurrency = 8
            max_retries = 1
            per_test_timeout_secs = 120
            build_timeout_secs = 3600
            autosplit = false
            smart_ordering = false
            matrix_dims = [["chrome", "firefox"], ["linux"]]

            [runner]
            command = "pytest {id} --browser {matrix}"

            [discovery]
            ids = ["a", "b"]

            [history]
            path = "state/history.json"
            "#,
        )
        .unwrap();

        assert_eq!(config.build.concurrency, 8);
        assert_eq!(config.build.matrix_dims.len(), 2);
        assert!(!config.build.autosplit);
        assert_eq!(config.runner.command, "pytest {id} --browser {matrix}");
        assert_eq!(config.discovery.ids, ["a", "b"]);
        assert_eq!(config.history.path, PathBuf::from("state/history.json"));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(matches!(
            load_config_str("[build\nconcurrency=2"),
            Err(ConfigError::Parse(_))
        ));
    }
}
