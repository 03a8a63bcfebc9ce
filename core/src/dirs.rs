use std::{env, path::PathBuf};

#[must_use]
pub fn config_file_dir() -> PathBuf {
    let mut dir = dirs::config_local_dir().unwrap_or_else(|| PathBuf::from("/tmp/config"));
    dir.reserve("/dragboard/wayland.toml".len());
    dir.push("dragboard");
    dir
}

#[must_use]
pub fn config_file() -> PathBuf {
    if let Some(s) = env::var_os("DRAGBOARD_CONFIG") {
        return PathBuf::from(s);
    }

    let mut file = config_file_dir();
    file.push("wayland.toml");
    file
}
