//! Configuration file loading.
//!
//! Configuration is read from TOML files at a project-local or
//! XDG-compliant location.

use crate::config::types::RuntimeConfig;
use crate::error::RuntimeError;
use std::path::{Path, PathBuf};

/// Default configuration file name for project-local config.
const LOCAL_CONFIG_NAME: &str = "toolbox-runtime.toml";

/// Default configuration file name within the XDG config directory.
const XDG_CONFIG_NAME: &str = "config.toml";

/// Application name for XDG directory lookup.
const APP_NAME: &str = "toolbox-runtime";

/// Loads configuration from the default search paths.
///
/// Search order:
/// 1. `./toolbox-runtime.toml` (project-local)
/// 2. `~/.config/toolbox-runtime/config.toml` (XDG config)
///
/// Returns the default configuration if no file is found.
///
/// # Errors
///
/// Returns an error if a config file exists but cannot be parsed or
/// fails validation.
pub fn load() -> Result<RuntimeConfig, RuntimeError> {
    for path in search_paths() {
        if path.exists() {
            tracing::debug!(path = %path.display(), "Loading configuration");
            return from_path(&path);
        }
    }
    Ok(RuntimeConfig::default())
}

/// Loads configuration from a specific file path.
///
/// # Errors
///
/// Returns an error if the file cannot be read, is not valid TOML, does
/// not match the expected schema or fails validation.
pub fn from_path(path: &Path) -> Result<RuntimeConfig, RuntimeError> {
    let contents = std::fs::read_to_string(path).map_err(|e| {
        RuntimeError::configuration(
            "config_file",
            format!("failed to read '{}': {}", path.display(), e),
        )
    })?;

    from_str(&contents).map_err(|e| {
        RuntimeError::configuration(
            "config_file",
            format!("failed to load '{}': {}", path.display(), e),
        )
    })
}

/// Parses and validates configuration from a TOML string.
///
/// # Errors
///
/// Returns an error if the TOML is invalid, doesn't match the schema or
/// fails validation.
pub fn from_str(toml_str: &str) -> Result<RuntimeConfig, RuntimeError> {
    let config: RuntimeConfig = toml::from_str(toml_str)
        .map_err(|e| RuntimeError::configuration("config", format!("invalid TOML: {e}")))?;
    config.validate()?;
    Ok(config)
}

/// Returns the paths that would be searched for configuration files.
#[must_use]
pub fn search_paths() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from(LOCAL_CONFIG_NAME)];
    if let Some(dir) = xdg_config_dir() {
        paths.push(dir.join(XDG_CONFIG_NAME));
    }
    paths
}

/// Returns the XDG config directory for the runtime.
///
/// This is `~/.config/toolbox-runtime` on most systems.
#[must_use]
pub fn xdg_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join(APP_NAME))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::LogLevel;
    use crate::tools::sandbox::SandboxMode;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn empty_toml_is_the_default() {
        assert_eq!(from_str("").unwrap(), RuntimeConfig::default());
    }

    #[test]
    fn from_str_parses_sections() {
        let toml = r#"
            [registry]
            builtin_dir = "/opt/tools"
            dev_paths = ["a.json", "dir"]

            [sandbox]
            mode = "in_process"
            warm_count = 0

            [relay]
            max_pending = 8

            [logging]
            level = "debug"
        "#;

        let config = from_str(toml).unwrap();
        assert_eq!(config.registry.builtin_dir, PathBuf::from("/opt/tools"));
        assert_eq!(config.registry.dev_paths.len(), 2);
        assert_eq!(config.registry.upload_dir, PathBuf::from("plugins/uploaded"));
        assert_eq!(config.sandbox.mode, SandboxMode::InProcess);
        assert_eq!(config.sandbox.warm_count, 0);
        assert_eq!(config.relay.max_pending, 8);
        assert_eq!(config.logging.level, LogLevel::Debug);
    }

    #[test]
    fn from_str_error_on_invalid_toml() {
        let err = from_str("this is not valid toml [[[").unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn from_str_rejects_invalid_values() {
        let err = from_str("[relay]\nmax_pending = 0").unwrap_err();
        assert!(err.to_string().contains("relay.max_pending"));
    }

    #[test]
    fn from_path_reads_file() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(file, "[storage]\nupload_prefix = \"outputs\"").unwrap();

        let config = from_path(&config_path).unwrap();
        assert_eq!(config.storage.upload_prefix, "outputs");
    }

    #[test]
    fn from_path_error_on_missing_file() {
        let err = from_path(Path::new("/nonexistent/path/config.toml")).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn search_paths_starts_with_local() {
        let paths = search_paths();
        assert_eq!(paths[0], PathBuf::from(LOCAL_CONFIG_NAME));
        if let Some(dir) = xdg_config_dir() {
            assert!(dir.ends_with(APP_NAME));
        }
    }
}
