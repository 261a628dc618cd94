//! Path utilities and XDG directory discovery

use crate::ConfigError;
use directories::ProjectDirs;
use std::path::{Path, PathBuf};

/// XDG-compliant paths for the shardlord control plane.
pub struct Paths {
    project_dirs: Option<ProjectDirs>,
}

impl Paths {
    /// Create a new Paths instance with XDG discovery
    pub fn new() -> Self {
        Self {
            project_dirs: ProjectDirs::from("dev", "shardlord", "shardlord"),
        }
    }

    /// Get user config directory (~/.config/shardlord/)
    pub fn user_config_dir(&self) -> Result<PathBuf, ConfigError> {
        self.project_dirs
            .as_ref()
            .map(|p| p.config_dir().to_path_buf())
            .ok_or_else(|| {
                ConfigError::XdgError("failed to determine user config directory".to_string())
            })
    }

    /// Get user config file path (~/.config/shardlord/config.toml)
    pub fn user_config_file(&self) -> Result<PathBuf, ConfigError> {
        Ok(self.user_config_dir()?.join("config.toml"))
    }

    /// Get cluster config file path (shardlord.toml)
    pub fn cluster_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("shardlord.toml")
    }

    /// Get local config file path (shardlord.local.toml, gitignored)
    pub fn local_config_file(project_dir: impl AsRef<Path>) -> PathBuf {
        project_dir.as_ref().join("shardlord.local.toml")
    }

    /// Check if a cluster directory is initialized (has shardlord.toml)
    pub fn is_initialized(project_dir: impl AsRef<Path>) -> bool {
        Self::cluster_config_file(project_dir).exists()
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_xdg_paths() {
        let paths = Paths::new();

        if let Ok(config_dir) = paths.user_config_dir() {
            assert!(config_dir.to_string_lossy().contains("shardlord"));
        }
    }

    #[test]
    fn test_cluster_paths() {
        let temp_dir = tempdir().expect("Failed to create temp dir");
        let project_dir = temp_dir.path();

        let config_file = Paths::cluster_config_file(project_dir);
        assert_eq!(config_file, project_dir.join("shardlord.toml"));

        let local_file = Paths::local_config_file(project_dir);
        assert_eq!(local_file, project_dir.join("shardlord.local.toml"));

        assert!(!Paths::is_initialized(project_dir));

        std::fs::write(&config_file, "[engine]\ncmd_retry_naptime_ms = 10000\n").unwrap();
        assert!(Paths::is_initialized(project_dir));
    }
}
