use std::path::{Path, PathBuf};

use gru_glue_host::{HostConfig, CONFIG_FILE};

/// Where the active configuration came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigOrigin {
    /// Given with `--config`.
    Explicit(PathBuf),
    /// Found walking up from the working directory.
    Project(PathBuf),
    /// The per-user file under the platform config directory.
    User(PathBuf),
    Default,
}

#[derive(Debug, Clone)]
pub struct ProjectContext {
    pub origin: ConfigOrigin,
    pub config: HostConfig,
}

impl ProjectContext {
    pub fn describe(&self) -> String {
        match &self.origin {
            ConfigOrigin::Explicit(path) | ConfigOrigin::Project(path) | ConfigOrigin::User(path) => {
                path.display().to_string()
            }
            ConfigOrigin::Default => "built-in defaults".to_string(),
        }
    }
}

/// `<config dir>/gruglue/gruglue.toml`
pub fn user_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("gruglue").join(CONFIG_FILE))
}

/// Resolve the configuration for the current directory.
pub fn detect_project_context(explicit: Option<&Path>) -> anyhow::Result<ProjectContext> {
    if let Some(path) = explicit {
        return Ok(ProjectContext {
            origin: ConfigOrigin::Explicit(path.to_path_buf()),
            config: HostConfig::load(path)?,
        });
    }
    detect_project_context_from(&std::env::current_dir()?, user_config_path().as_deref())
}

/// Walk up from `start` looking for `gruglue.toml`, then try `user_config`,
/// then fall back to defaults.
pub fn detect_project_context_from(
    start: &Path,
    user_config: Option<&Path>,
) -> anyhow::Result<ProjectContext> {
    let mut dir = start.to_path_buf();
    loop {
        let candidate = dir.join(CONFIG_FILE);
        if candidate.is_file() {
            return Ok(ProjectContext {
                config: HostConfig::load(&candidate)?,
                origin: ConfigOrigin::Project(candidate),
            });
        }
        if !dir.pop() {
            break;
        }
    }
    if let Some(path) = user_config.filter(|p| p.is_file()) {
        return Ok(ProjectContext {
            config: HostConfig::load(path)?,
            origin: ConfigOrigin::User(path.to_path_buf()),
        });
    }
    Ok(ProjectContext {
        origin: ConfigOrigin::Default,
        config: HostConfig::default(),
    })
}
