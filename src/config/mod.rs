//! Configuration management for the toolbox runtime.
//!
//! # Configuration File Format
//!
//! Configuration is stored in TOML format. The search order is:
//! 1. `./toolbox-runtime.toml` (project-local)
//! 2. `~/.config/toolbox-runtime/config.toml` (XDG config)
//!
//! All sections are optional; see [`RuntimeConfig`] for the layout.
//!
//! # Usage
//!
//! ```rust,ignore
//! use toolbox_runtime::config;
//!
//! // Load from default search paths
//! let config = config::load()?;
//!
//! // Load from a specific path
//! let config = config::from_path(Path::new("/etc/toolbox-runtime/config.toml"))?;
//! ```

mod file;
mod types;

pub use file::{from_path, from_str, load, search_paths, xdg_config_dir};
pub use types::{RegistrySection, RelaySection, RuntimeConfig, SandboxSection, StorageSection};
