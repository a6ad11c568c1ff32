//! Configuration loading and root folder resolution
//!
//! The root folder holds the shared SQLite database and any service-local
//! files. Resolution priority order:
//! 1. `CLX_ROOT_FOLDER` environment variable (highest priority)
//! 2. TOML config file (`cantolex/config.toml` in the platform config dir)
//! 3. OS-dependent compiled default (fallback)
//!
//! Missing config files never cause termination; the resolver degrades to
//! the compiled default with a warning.

use std::path::PathBuf;

/// Environment variable overriding the root folder for all services
pub const ROOT_FOLDER_ENV: &str = "CLX_ROOT_FOLDER";

/// Resolves the root folder for a named service module
pub struct RootFolderResolver {
    module_name: String,
}

impl RootFolderResolver {
    pub fn new(module_name: impl Into<String>) -> Self {
        Self {
            module_name: module_name.into(),
        }
    }

    /// Resolve the root folder using the documented priority order
    pub fn resolve(&self) -> PathBuf {
        // Priority 1: Environment variable
        if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
            if !path.is_empty() {
                tracing::debug!(
                    module = %self.module_name,
                    root_folder = %path,
                    "Root folder resolved from environment"
                );
                return PathBuf::from(path);
            }
        }

        // Priority 2: TOML config file
        if let Some(path) = root_folder_from_config_file() {
            tracing::debug!(
                module = %self.module_name,
                root_folder = %path.display(),
                "Root folder resolved from config file"
            );
            return path;
        }

        // Priority 3: OS-dependent compiled default
        let default = default_root_folder();
        tracing::warn!(
            module = %self.module_name,
            root_folder = %default.display(),
            "No root folder configured, using compiled default"
        );
        default
    }
}

/// Prepares a resolved root folder for use (directory + database path)
pub struct RootFolderInitializer {
    root_folder: PathBuf,
}

impl RootFolderInitializer {
    pub fn new(root_folder: PathBuf) -> Self {
        Self { root_folder }
    }

    /// Create the root folder directory if it does not exist
    pub fn ensure_directory_exists(&self) -> crate::Result<()> {
        if !self.root_folder.exists() {
            std::fs::create_dir_all(&self.root_folder)?;
            tracing::info!(
                root_folder = %self.root_folder.display(),
                "Created root folder directory"
            );
        }
        Ok(())
    }

    /// Path of the shared SQLite database inside the root folder
    pub fn database_path(&self) -> PathBuf {
        self.root_folder.join("cantolex.db")
    }

    pub fn root_folder(&self) -> &PathBuf {
        &self.root_folder
    }
}

/// Read `root_folder` from the platform config file, if present
fn root_folder_from_config_file() -> Option<PathBuf> {
    let config_path = config_file_path()?;
    let toml_content = std::fs::read_to_string(&config_path).ok()?;
    let config: toml::Value = toml::from_str(&toml_content).ok()?;
    config
        .get("root_folder")
        .and_then(|v| v.as_str())
        .map(PathBuf::from)
}

/// Platform config file location (`<config dir>/cantolex/config.toml`)
fn config_file_path() -> Option<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("cantolex").join("config.toml"));
    if let Some(path) = &user_config {
        if path.exists() {
            return user_config;
        }
    }
    if cfg!(target_os = "linux") {
        let system_config = PathBuf::from("/etc/cantolex/config.toml");
        if system_config.exists() {
            return Some(system_config);
        }
    }
    None
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("cantolex"))
        .unwrap_or_else(|| PathBuf::from("./cantolex_data"))
}
