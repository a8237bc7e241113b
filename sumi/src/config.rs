//! # Preferences
//!
//! TOML-backed engine configuration: canvas size, refresh rate, history depth,
//! storage backend. Parse failures fall back to defaults with a logged warning -
//! a broken preferences file must never stop the program from starting.

use std::path::{Path, PathBuf};

use sumi_core::texture::{Extent, ExtentError};

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Preferences {
    pub canvas: Canvas,
    pub frame: Frame,
    pub history: History,
    pub storage: Storage,
    pub brush: Brush,
}
impl Default for Preferences {
    fn default() -> Self {
        Self {
            canvas: Canvas::default(),
            frame: Frame::default(),
            history: History::default(),
            storage: Storage::default(),
            brush: Brush::default(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Canvas {
    pub width: u32,
    pub height: u32,
}
impl Default for Canvas {
    fn default() -> Self {
        Self {
            width: 1080,
            height: 1080,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Frame {
    /// Display refresh driving the per-stroke frame ticker.
    pub refresh_hz: u32,
}
impl Default for Frame {
    fn default() -> Self {
        Self { refresh_hz: 60 }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct History {
    /// Bound on undo depth; the oldest snapshot is released beyond it.
    pub depth: usize,
}
impl Default for History {
    fn default() -> Self {
        Self {
            depth: sumi_core::history::DEFAULT_DEPTH,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    Memory,
    Disk,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Storage {
    pub backend: Backend,
    /// Directory for the disk backend. Defaults to the platform data dir.
    pub dir: Option<PathBuf>,
}
impl Default for Storage {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            dir: None,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
#[serde(default)]
pub struct Brush {
    /// Stamp diameter, texture pixels.
    pub diameter: f32,
    /// Soft-edge radius, texture pixels.
    pub blur: f32,
}
impl Default for Brush {
    fn default() -> Self {
        Self {
            diameter: 16.0,
            blur: 4.0,
        }
    }
}

impl Preferences {
    /// Standard location of the preferences file, if the platform has one.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        Some(dirs::config_dir()?.join("sumi").join("preferences.toml"))
    }
    /// Load from `path`, falling back to defaults on any failure. A missing
    /// file is the normal first-run case and logs at debug only.
    #[must_use]
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(text) => match toml::from_str(&text) {
                Ok(preferences) => preferences,
                Err(e) => {
                    log::warn!(
                        "failed to parse preferences at {}, using defaults: {e}",
                        path.display()
                    );
                    Self::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::debug!("no preferences at {}, using defaults", path.display());
                Self::default()
            }
            Err(e) => {
                log::warn!(
                    "failed to read preferences at {}, using defaults: {e}",
                    path.display()
                );
                Self::default()
            }
        }
    }
    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Unwrap is fine - Preferences serializes to a plain table.
        let text = toml::to_string_pretty(self).unwrap();
        std::fs::write(path, text)
    }
    /// The session canvas extent. Errs when configured below the minimum - the
    /// one configuration problem that cannot be defaulted away silently.
    pub fn extent(&self) -> Result<Extent, ExtentError> {
        Extent::new(self.canvas.width, self.canvas.height)
    }
    /// Directory the disk backend stores textures in.
    #[must_use]
    pub fn storage_dir(&self) -> PathBuf {
        self.storage.dir.clone().unwrap_or_else(|| {
            dirs::data_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("sumi")
                .join("textures")
        })
    }
}
