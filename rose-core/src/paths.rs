// ABOUTME: XDG Base Directory paths for config, data and logs
// ABOUTME: Falls back to local directories when no home directory can be determined

use directories::ProjectDirs;
use std::path::PathBuf;

const QUALIFIER: &str = "com";
const ORGANIZATION: &str = "rose";
const APPLICATION: &str = "rose";

pub fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from(QUALIFIER, ORGANIZATION, APPLICATION)
}

/// e.g. ~/.local/share/rose/, or ./data without XDG directories
pub fn data_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("./data"))
}

pub fn log_dir() -> PathBuf {
    data_dir().join("logs")
}

/// Default location of the session database
pub fn default_db_path() -> PathBuf {
    data_dir().join("sessions.db")
}

/// e.g. ~/.config/rose/, or the current directory without XDG directories
pub fn config_dir() -> PathBuf {
    project_dirs()
        .map(|p| p.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

pub fn config_file() -> PathBuf {
    config_dir().join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_nest_under_their_roots() {
        assert!(log_dir().starts_with(data_dir()));
        assert!(default_db_path().starts_with(data_dir()));
        assert!(config_file().starts_with(config_dir()));
        assert_eq!(config_file().file_name().unwrap(), "config.toml");
    }
}
