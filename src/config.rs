//! Settings access.
//!
//! The settings UI owns persistence; the engine only needs typed lookups
//! with defaults, plus the two writes the picture/clock shortcuts make.
//! [`ConfigStore`] is that accessor. [`JsonConfigStore`] backs it with a
//! flat JSON object on disk (or in memory for tests).
//!
//! [`Settings`] is the typed snapshot taken on every (re)activation.

use crate::error::{MatrixError, Result};
use crate::raster::{Quality, Rotation};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::Duration;

pub const KEY_BRIGHTNESS: &str = "matrix_brightness";
pub const KEY_RUNNING: &str = "matrix_running";
pub const KEY_INTERVAL: &str = "matrix_interval";
pub const KEY_AUTO: &str = "matrix_auto";
pub const KEY_LID: &str = "matrix_lid";
pub const KEY_ROTATION: &str = "matrix_rotation";
pub const KEY_ZOOM: &str = "matrix_zoom";
pub const KEY_X: &str = "matrix_x";
pub const KEY_Y: &str = "matrix_y";
pub const KEY_CONTRAST: &str = "matrix_contrast";
pub const KEY_QUALITY: &str = "matrix_quality";
pub const KEY_SPEED: &str = "matrix_speed";
pub const KEY_PICTURE: &str = "matrix_picture";
pub const KEY_OFF_RETRIES: &str = "matrix_off_retries";

pub const RUNNING_PICTURE: i64 = 2;
pub const RUNNING_CLOCK: i64 = 3;
pub const RUNNING_AUDIO: i64 = 4;

/// Default frame interval for built-in animation polling.
pub const DEFAULT_TICK: Duration = Duration::from_millis(100);

/// Read (and occasionally write) access to the external settings store.
pub trait ConfigStore: Send + Sync {
    fn get_int(&self, key: &str, default: i64) -> i64;

    /// Missing keys read as `false`.
    fn get_bool(&self, key: &str) -> bool;

    fn get_string(&self, key: &str) -> Option<String>;

    fn set_int(&self, key: &str, value: i64);

    fn set_bool(&self, key: &str, value: bool);

    fn set_string(&self, key: &str, value: &str);
}

/// Flat JSON object of settings, optionally mirrored to a file.
///
/// Booleans are also accepted as `0`/`1` integers, which is how older
/// settings files store them.
pub struct JsonConfigStore {
    path: Option<PathBuf>,
    values: RwLock<Map<String, Value>>,
}

impl JsonConfigStore {
    /// Open a settings file. A missing file starts empty and is created on
    /// first write; a corrupt one is an error.
    pub fn open(path: &Path) -> Result<Self> {
        let values = match fs::read_to_string(path) {
            Ok(text) if text.trim().is_empty() => Map::new(),
            Ok(text) => match serde_json::from_str::<Value>(&text) {
                Ok(Value::Object(map)) => map,
                Ok(_) => {
                    return Err(MatrixError::Config(format!(
                        "{} is not a JSON object",
                        path.display()
                    )));
                }
                Err(e) => {
                    return Err(MatrixError::Config(format!("{}: {e}", path.display())));
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        Ok(Self {
            path: Some(path.to_path_buf()),
            values: RwLock::new(values),
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            values: RwLock::new(Map::new()),
        }
    }

    fn read(&self, key: &str) -> Option<Value> {
        self.values
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .cloned()
    }

    fn write(&self, key: &str, value: Value) {
        let snapshot = {
            let mut values = self.values.write().unwrap_or_else(PoisonError::into_inner);
            values.insert(key.to_string(), value);
            values.clone()
        };

        if let Some(path) = &self.path {
            if let Err(e) = save(path, &snapshot) {
                tracing::warn!("Failed to persist settings to {}: {}", path.display(), e);
            }
        }
    }
}

fn save(path: &Path, values: &Map<String, Value>) -> Result<()> {
    let text = serde_json::to_string_pretty(values)
        .map_err(|e| MatrixError::Config(e.to_string()))?;
    fs::write(path, text)?;
    Ok(())
}

impl ConfigStore for JsonConfigStore {
    fn get_int(&self, key: &str, default: i64) -> i64 {
        match self.read(key) {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .unwrap_or(default),
            Some(Value::Bool(b)) => b as i64,
            Some(Value::String(s)) => s.trim().parse().unwrap_or(default),
            _ => default,
        }
    }

    fn get_bool(&self, key: &str) -> bool {
        match self.read(key) {
            Some(Value::Bool(b)) => b,
            Some(Value::Number(n)) => n.as_i64() == Some(1),
            _ => false,
        }
    }

    fn get_string(&self, key: &str) -> Option<String> {
        match self.read(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    fn set_int(&self, key: &str, value: i64) {
        self.write(key, Value::from(value));
    }

    fn set_bool(&self, key: &str, value: bool) {
        self.write(key, Value::from(value));
    }

    fn set_string(&self, key: &str, value: &str) {
        self.write(key, Value::from(value));
    }
}

// ── Typed snapshot ─────────────────────────────────────────────────

/// What `matrix_running` asks for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunningMode {
    BuiltIn(u8),
    Picture,
    Clock,
    Audio,
}

impl RunningMode {
    pub fn from_setting(value: i64) -> Self {
        match value {
            RUNNING_PICTURE => Self::Picture,
            RUNNING_CLOCK => Self::Clock,
            RUNNING_AUDIO => Self::Audio,
            other => Self::BuiltIn(other.clamp(0, u8::MAX as i64) as u8),
        }
    }

    pub fn as_setting(&self) -> i64 {
        match self {
            Self::BuiltIn(i) => *i as i64,
            Self::Picture => RUNNING_PICTURE,
            Self::Clock => RUNNING_CLOCK,
            Self::Audio => RUNNING_AUDIO,
        }
    }
}

/// Every matrix setting the engine reads, as of one activation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(default)]
pub struct Settings {
    /// Brightness level; 0 turns the display off
    pub brightness: u8,
    /// Running mode: 2 picture, 3 clock, 4 audio, other values pick a built-in animation
    pub running: i64,
    /// Built-in animation tick in milliseconds (0 = 100 ms)
    pub interval: u32,
    /// Turn the display off while on battery
    pub auto_battery_saver: bool,
    /// Turn the display off while the lid is closed
    pub lid_aware: bool,
    /// Pixel addressing scheme: 0 planar, 1 diagonal
    pub rotation: u8,
    /// Picture zoom in percent
    pub zoom: u32,
    /// Horizontal pan in LEDs
    pub x: i32,
    /// Vertical pan in LEDs
    pub y: i32,
    /// Picture contrast in percent
    pub contrast: u32,
    /// Interpolation quality code
    pub quality: u8,
    /// Minimum animated picture frame interval in milliseconds
    pub speed: u32,
    /// Last selected picture
    pub picture: Option<String>,
    /// How many times the power-off command is sent
    pub off_retries: u8,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            brightness: 0,
            running: 0,
            interval: 0,
            auto_battery_saver: false,
            lid_aware: false,
            rotation: 0,
            zoom: 100,
            x: 0,
            y: 0,
            contrast: 100,
            quality: 0,
            speed: 50,
            picture: None,
            off_retries: 2,
        }
    }
}

fn clamp_u8(v: i64) -> u8 {
    v.clamp(0, u8::MAX as i64) as u8
}

fn clamp_u32(v: i64) -> u32 {
    v.clamp(0, u32::MAX as i64) as u32
}

fn clamp_i32(v: i64) -> i32 {
    v.clamp(i32::MIN as i64, i32::MAX as i64) as i32
}

impl Settings {
    pub fn load(store: &dyn ConfigStore) -> Self {
        let d = Self::default();
        Self {
            brightness: clamp_u8(store.get_int(KEY_BRIGHTNESS, d.brightness as i64)),
            running: store.get_int(KEY_RUNNING, d.running),
            interval: clamp_u32(store.get_int(KEY_INTERVAL, d.interval as i64)),
            auto_battery_saver: store.get_bool(KEY_AUTO),
            lid_aware: store.get_bool(KEY_LID),
            rotation: clamp_u8(store.get_int(KEY_ROTATION, d.rotation as i64)),
            zoom: clamp_u32(store.get_int(KEY_ZOOM, d.zoom as i64)),
            x: clamp_i32(store.get_int(KEY_X, d.x as i64)),
            y: clamp_i32(store.get_int(KEY_Y, d.y as i64)),
            contrast: clamp_u32(store.get_int(KEY_CONTRAST, d.contrast as i64)),
            quality: clamp_u8(store.get_int(KEY_QUALITY, d.quality as i64)),
            speed: clamp_u32(store.get_int(KEY_SPEED, d.speed as i64)),
            picture: store.get_string(KEY_PICTURE),
            // The display-off command is always sent at least twice.
            off_retries: clamp_u8(store.get_int(KEY_OFF_RETRIES, d.off_retries as i64)).max(2),
        }
    }

    /// Write every field back to the store.
    pub fn store(&self, store: &dyn ConfigStore) {
        store.set_int(KEY_BRIGHTNESS, self.brightness as i64);
        store.set_int(KEY_RUNNING, self.running);
        store.set_int(KEY_INTERVAL, self.interval as i64);
        store.set_bool(KEY_AUTO, self.auto_battery_saver);
        store.set_bool(KEY_LID, self.lid_aware);
        store.set_int(KEY_ROTATION, self.rotation as i64);
        store.set_int(KEY_ZOOM, self.zoom as i64);
        store.set_int(KEY_X, self.x as i64);
        store.set_int(KEY_Y, self.y as i64);
        store.set_int(KEY_CONTRAST, self.contrast as i64);
        store.set_int(KEY_QUALITY, self.quality as i64);
        store.set_int(KEY_SPEED, self.speed as i64);
        if let Some(picture) = &self.picture {
            store.set_string(KEY_PICTURE, picture);
        }
        store.set_int(KEY_OFF_RETRIES, self.off_retries as i64);
    }

    pub fn running_mode(&self) -> RunningMode {
        RunningMode::from_setting(self.running)
    }

    pub fn builtin_interval(&self) -> Duration {
        if self.interval == 0 {
            DEFAULT_TICK
        } else {
            Duration::from_millis(self.interval as u64)
        }
    }

    pub fn rotation(&self) -> Rotation {
        Rotation::from_setting(self.rotation)
    }

    pub fn quality(&self) -> Quality {
        Quality::from_setting(self.quality)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    #[test]
    fn empty_store_yields_defaults() {
        let store = JsonConfigStore::in_memory();
        assert_eq!(Settings::load(&store), Settings::default());
    }

    #[test]
    fn missing_file_opens_empty_and_persists_on_write() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");

        let store = JsonConfigStore::open(&path).unwrap();
        store.set_int(KEY_BRIGHTNESS, 3);
        store.set_string(KEY_PICTURE, "/tmp/cat.gif");

        let reopened = JsonConfigStore::open(&path).unwrap();
        assert_eq!(reopened.get_int(KEY_BRIGHTNESS, 0), 3);
        assert_eq!(reopened.get_string(KEY_PICTURE).as_deref(), Some("/tmp/cat.gif"));
    }

    #[test]
    fn corrupt_file_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, "{ not json").unwrap();
        assert!(matches!(JsonConfigStore::open(&path), Err(MatrixError::Config(_))));
    }

    #[test]
    fn non_object_file_is_a_config_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, "[1, 2]").unwrap();
        assert!(matches!(JsonConfigStore::open(&path), Err(MatrixError::Config(_))));
    }

    #[test]
    fn booleans_accept_integer_encoding() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("settings.json");
        fs::write(&path, r#"{"matrix_auto": 1, "matrix_lid": true, "matrix_zoom": "150"}"#)
            .unwrap();

        let settings = Settings::load(&JsonConfigStore::open(&path).unwrap());
        assert!(settings.auto_battery_saver);
        assert!(settings.lid_aware);
        assert_eq!(settings.zoom, 150);
    }

    #[rstest]
    #[case(0, RunningMode::BuiltIn(0))]
    #[case(1, RunningMode::BuiltIn(1))]
    #[case(2, RunningMode::Picture)]
    #[case(3, RunningMode::Clock)]
    #[case(4, RunningMode::Audio)]
    #[case(5, RunningMode::BuiltIn(5))]
    fn running_mode_mapping(#[case] value: i64, #[case] expected: RunningMode) {
        assert_eq!(RunningMode::from_setting(value), expected);
        assert_eq!(expected.as_setting(), value);
    }

    #[rstest]
    #[case(0, 2)]
    #[case(1, 2)]
    #[case(3, 3)]
    fn off_retries_never_below_two(#[case] stored: i64, #[case] expected: u8) {
        let store = JsonConfigStore::in_memory();
        store.set_int(KEY_OFF_RETRIES, stored);
        assert_eq!(Settings::load(&store).off_retries, expected);
    }

    #[test]
    fn store_then_load_keeps_every_field() {
        let store = JsonConfigStore::in_memory();
        let settings = Settings {
            brightness: 2,
            running: 4,
            interval: 250,
            auto_battery_saver: true,
            lid_aware: true,
            rotation: 1,
            zoom: 80,
            x: -3,
            y: 7,
            contrast: 120,
            quality: 5,
            speed: 90,
            picture: Some("a.png".into()),
            off_retries: 3,
        };
        settings.store(&store);
        assert_eq!(Settings::load(&store), settings);
    }

    #[test]
    fn zero_interval_means_default_tick() {
        assert_eq!(Settings::default().builtin_interval(), DEFAULT_TICK);
        let s = Settings {
            interval: 250,
            ..Settings::default()
        };
        assert_eq!(s.builtin_interval(), Duration::from_millis(250));
    }
}
