use std::path::PathBuf;

/// Application directory (~/.food_delivery)
pub fn app_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(".food_delivery")
}

/// config.json path
pub fn config_json_path() -> PathBuf {
    app_dir().join("config.json")
}

/// Session file inside the given data directory
pub fn session_store_path(data_dir: &std::path::Path) -> PathBuf {
    data_dir.join("session.json")
}
