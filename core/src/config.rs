use std::{fs, io::ErrorKind, path::Path};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{Error, IoErr, Result, action::SurfaceSize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct V1 {
    #[serde(default = "size_")]
    pub width: u32,
    #[serde(default = "size_")]
    pub height: u32,
    #[serde(default = "text_")]
    pub copy_text: String,
    /// Append the input serial to copied text so successive copies differ.
    #[serde(default = "stamp_serial_")]
    pub stamp_serial: bool,
    #[serde(default = "text_")]
    pub drag_text: String,
}

impl Default for V1 {
    fn default() -> Self {
        Self {
            width: size_(),
            height: size_(),
            copy_text: text_(),
            stamp_serial: stamp_serial_(),
            drag_text: text_(),
        }
    }
}

impl V1 {
    #[must_use]
    pub const fn surface(&self) -> SurfaceSize {
        SurfaceSize {
            width: self.width,
            height: self.height,
        }
    }

    #[must_use]
    pub fn copy_payload(&self, serial: u32) -> String {
        if self.stamp_serial {
            format!("{} {serial}", self.copy_text)
        } else {
            self.copy_text.clone()
        }
    }
}

#[derive(Serialize, Deserialize, Debug)]
#[serde(tag = "version")]
pub enum Config {
    #[serde(rename = "1")]
    V1(V1),
}

impl Config {
    #[must_use]
    pub fn to_latest(self) -> Latest {
        match self {
            Self::V1(c) => c,
        }
    }

    /// Reads the config at `file`, falling back to defaults if there is
    /// none.
    pub fn load(file: &Path) -> Result<Self> {
        match fs::read_to_string(file) {
            Ok(contents) => {
                debug!("Loading config from {file:?}.");
                Self::parse(&contents, file)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!("No config at {file:?}, using defaults.");
                Ok(Self::default())
            }
            Err(e) => Err(e).map_io_err(|| format!("Failed to read config file: {file:?}")),
        }
    }

    fn parse(contents: &str, file: &Path) -> Result<Self> {
        toml::from_str(contents).map_err(|error| Error::Config {
            error,
            file: file.to_path_buf(),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::V1(V1::default())
    }
}

pub type Latest = V1;

const fn size_() -> u32 {
    400
}

fn text_() -> String {
    "way way wayland".to_string()
}

const fn stamp_serial_() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(contents: &str) -> Result<Latest> {
        Config::parse(contents, Path::new("wayland.toml")).map(Config::to_latest)
    }

    #[test]
    fn defaults() {
        let config = parse("version = \"1\"").unwrap();
        assert_eq!(config, V1::default());
        assert_eq!(
            config.surface(),
            SurfaceSize {
                width: 400,
                height: 400
            }
        );
        assert_eq!(config.copy_payload(12), "way way wayland 12");
        assert_eq!(config.drag_text, "way way wayland");
    }

    #[test]
    fn overrides() {
        let config = parse(
            r#"
            version = "1"
            width = 640
            copy_text = "hello"
            stamp_serial = false
            "#,
        )
        .unwrap();

        assert_eq!(config.width, 640);
        assert_eq!(config.height, 400);
        assert_eq!(config.copy_payload(12), "hello");
    }

    #[test]
    fn unversioned_is_rejected() {
        assert!(matches!(parse("width = 1"), Err(Error::Config { .. })));
        assert!(matches!(
            parse("version = \"2\""),
            Err(Error::Config { .. })
        ));
    }

    #[test]
    fn missing_file_uses_defaults() {
        let config = Config::load(Path::new("/nonexistent/dragboard/wayland.toml")).unwrap();
        assert_eq!(config.to_latest(), V1::default());
    }
}
