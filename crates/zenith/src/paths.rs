use std::env;
use std::ffi::OsString;
use std::path::PathBuf;

use anyhow::{Context, Result};
use directories_next::ProjectDirs;
use tracing::debug;

const ENV_CONFIG_DIR: &str = "ZENITH_CONFIG_DIR";

const SETTINGS_FILE: &str = "zenith.toml";

/// `zenith.toml` inside `$ZENITH_CONFIG_DIR`, or inside the per-user config
/// directory when the variable is unset or empty.
pub fn settings_file() -> Result<PathBuf> {
    let config_dir = match config_dir_override(env::var_os(ENV_CONFIG_DIR)) {
        Some(dir) => {
            debug!(path = %dir.display(), "using config directory from {ENV_CONFIG_DIR}");
            dir
        }
        None => ProjectDirs::from("org", "Zenith", "zenith")
            .context("failed to determine the user config directory")?
            .config_dir()
            .to_path_buf(),
    };
    Ok(config_dir.join(SETTINGS_FILE))
}

fn config_dir_override(value: Option<OsString>) -> Option<PathBuf> {
    value.filter(|value| !value.is_empty()).map(PathBuf::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn override_names_the_config_directory() {
        assert_eq!(
            config_dir_override(Some(OsString::from("/srv/zenith"))),
            Some(PathBuf::from("/srv/zenith"))
        );
    }

    #[test]
    fn empty_or_missing_override_is_ignored() {
        assert_eq!(config_dir_override(Some(OsString::new())), None);
        assert_eq!(config_dir_override(None), None);
    }
}
