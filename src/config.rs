use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Error;
use log::warn;
use serde::{Deserialize, Serialize};
use thiserror::Error as ErrorDerive;

use crate::dmx::Rgb;
use crate::topology::{Segment, Topology};

pub const KEY_FAILOVER_TIMEOUT_MS: &str = "failover_timeout_ms";
pub const KEY_DEFAULT_COLOR: &str = "default_color";
pub const KEY_BRIGHTNESS: &str = "brightness";

pub const DEFAULT_FAILOVER_TIMEOUT_MS: u32 = 2000;
pub const DEFAULT_COLOR: Rgb = Rgb::new(0, 0, 255);
pub const DEFAULT_BRIGHTNESS: u8 = 128;

#[derive(Debug, ErrorDerive)]
pub enum PersistError {
    #[error("failed to write settings: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode settings: {0}")]
    Encode(#[from] ron::Error),
}

/// Non-volatile storage as the settings code sees it: typed values
/// under string keys, one namespace per store. Colors travel packed as
/// 24-bit RGB and the brightness as the low byte of a u32.
pub trait KeyValueStore {
    fn get_u32(&self, key: &str) -> Option<u32>;
    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), PersistError>;
}

/// RON-file-backed store. Unreadable or missing files start empty, so
/// loading never fails; writes rewrite the whole file synchronously.
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, u32>,
}

impl FileStore {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let values = match fs::read_to_string(&path) {
            Ok(text) => match ron::from_str(&text) {
                Ok(values) => values,
                Err(e) => {
                    warn!(
                        "settings file {} is unreadable, starting from defaults: {}",
                        path.display(),
                        e
                    );
                    BTreeMap::new()
                }
            },
            Err(_) => BTreeMap::new(),
        };

        FileStore { path, values }
    }
}

impl KeyValueStore for FileStore {
    fn get_u32(&self, key: &str) -> Option<u32> {
        self.values.get(key).copied()
    }

    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), PersistError> {
        self.values.insert(key.to_string(), value);
        let text = ron::ser::to_string_pretty(&self.values, Default::default())?;
        fs::write(&self.path, text)?;
        Ok(())
    }
}

/// In-memory store for tests and bring-up on hosts without writable
/// storage. `fail_writes` simulates a broken backing medium.
#[derive(Default)]
pub struct MemoryStore {
    values: BTreeMap<String, u32>,
    pub fail_writes: bool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }
}

impl KeyValueStore for MemoryStore {
    fn get_u32(&self, key: &str) -> Option<u32> {
        self.values.get(key).copied()
    }

    fn put_u32(&mut self, key: &str, value: u32) -> Result<(), PersistError> {
        if self.fail_writes {
            return Err(PersistError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "simulated write failure",
            )));
        }
        self.values.insert(key.to_string(), value);
        Ok(())
    }
}

/// Operator-tunable settings, one process-wide instance owned by the
/// control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    pub failover_timeout_ms: u32,
    pub default_color: Rgb,
    pub brightness: u8,
}

impl Config {
    pub fn failover_timeout(&self) -> Duration {
        Duration::from_millis(self.failover_timeout_ms as u64)
    }
}

/// A partial settings change; unset fields keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConfigUpdate {
    pub failover_timeout_ms: Option<u32>,
    pub default_color: Option<Rgb>,
    pub brightness: Option<u8>,
}

impl ConfigUpdate {
    pub fn is_empty(&self) -> bool {
        self.failover_timeout_ms.is_none()
            && self.default_color.is_none()
            && self.brightness.is_none()
    }
}

pub struct ConfigStore<S> {
    store: S,
    current: Config,
}

impl<S: KeyValueStore> ConfigStore<S> {
    /// Loads the settings, falling back to the hard-coded default for
    /// each missing key independently. Never fails.
    pub fn load(store: S) -> Self {
        let current = Config {
            failover_timeout_ms: store
                .get_u32(KEY_FAILOVER_TIMEOUT_MS)
                .unwrap_or(DEFAULT_FAILOVER_TIMEOUT_MS),
            default_color: store
                .get_u32(KEY_DEFAULT_COLOR)
                .map(Rgb::from_packed)
                .unwrap_or(DEFAULT_COLOR),
            brightness: store
                .get_u32(KEY_BRIGHTNESS)
                .map(|v| v.min(255) as u8)
                .unwrap_or(DEFAULT_BRIGHTNESS),
        };

        ConfigStore { store, current }
    }

    pub fn current(&self) -> Config {
        self.current
    }

    /// Merges the provided fields and writes the full merged settings
    /// through to storage. The merged values stay in effect even when
    /// the write fails; the error goes back to the caller so the
    /// failure is visible where the update came from.
    pub fn update(&mut self, update: ConfigUpdate) -> Result<(), PersistError> {
        if let Some(timeout) = update.failover_timeout_ms {
            self.current.failover_timeout_ms = timeout;
        }
        if let Some(color) = update.default_color {
            self.current.default_color = color;
        }
        if let Some(brightness) = update.brightness {
            self.current.brightness = brightness;
        }

        self.store
            .put_u32(KEY_FAILOVER_TIMEOUT_MS, self.current.failover_timeout_ms)?;
        self.store
            .put_u32(KEY_DEFAULT_COLOR, self.current.default_color.to_packed())?;
        self.store
            .put_u32(KEY_BRIGHTNESS, self.current.brightness as u32)
    }

    pub fn into_store(self) -> S {
        self.store
    }
}

/// A settings change as it arrives from the settings service, every
/// field still the raw string the operator sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsRequest {
    /// Failover timeout in milliseconds, decimal.
    pub timeout: Option<String>,
    /// Default color as 6 hex digits, with or without a leading '#'.
    pub color: Option<String>,
    /// Brightness 0-255, decimal.
    pub brightness: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub reason: String,
}

impl SettingsRequest {
    /// Parses each field independently: malformed fields are reported
    /// by name, the well-formed rest still applies.
    pub fn parse(&self) -> (ConfigUpdate, Vec<FieldError>) {
        let mut update = ConfigUpdate::default();
        let mut rejected = Vec::new();

        if let Some(raw) = &self.timeout {
            match raw.trim().parse::<u32>() {
                Ok(timeout) => update.failover_timeout_ms = Some(timeout),
                Err(e) => rejected.push(FieldError {
                    field: "timeout",
                    reason: e.to_string(),
                }),
            }
        }

        if let Some(raw) = &self.color {
            match parse_hex_color(raw) {
                Ok(color) => update.default_color = Some(color),
                Err(reason) => rejected.push(FieldError {
                    field: "color",
                    reason,
                }),
            }
        }

        if let Some(raw) = &self.brightness {
            match raw.trim().parse::<u8>() {
                Ok(brightness) => update.brightness = Some(brightness),
                Err(e) => rejected.push(FieldError {
                    field: "brightness",
                    reason: e.to_string(),
                }),
            }
        }

        (update, rejected)
    }
}

fn parse_hex_color(raw: &str) -> Result<Rgb, String> {
    let hex = raw.trim();
    let hex = hex.strip_prefix('#').unwrap_or(hex);
    if hex.len() != 6 {
        return Err(format!("expected 6 hex digits, got {:?}", raw));
    }
    u32::from_str_radix(hex, 16)
        .map(Rgb::from_packed)
        .map_err(|e| e.to_string())
}

/// The result of one settings update, handed back to whoever issued
/// it.
#[derive(Debug)]
pub struct SettingsOutcome {
    /// Fields that failed to parse; the rest were still applied.
    pub rejected: Vec<FieldError>,
    /// Result of the durable write for the applied fields.
    pub persisted: Result<(), PersistError>,
    /// Settings in effect after the update.
    pub config: Config,
}

/// Per-site wiring that never changes at runtime: how many LEDs hang
/// off the controller, how they map onto the universe, and where to
/// listen.
#[derive(Debug, Deserialize, Serialize, PartialEq, Eq)]
pub struct Deployment {
    pub led_count: usize,
    pub universe: u16,
    pub bind_addr: String,
    pub topology: Topology,
}

impl Deployment {
    pub fn load() -> Result<Deployment, Error> {
        Deployment::load_from("deployment.ron")
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Deployment, Error> {
        let text = fs::read_to_string(path)?;
        let deployment: Deployment = ron::from_str(&text)?;
        Ok(deployment)
    }

    /// The original faderboard: five daughterboards of 24 straight
    /// LEDs each, packed back to back in one universe.
    pub fn five_board_default() -> Deployment {
        let boards = 5;
        let leds_per_board = 24;

        Deployment {
            led_count: boards * leds_per_board,
            universe: 0,
            bind_addr: "0.0.0.0:6454".to_string(),
            topology: Topology {
                segments: (0..boards)
                    .map(|board| Segment::Normal {
                        count: leds_per_board,
                        channel: board * leds_per_board * 3,
                    })
                    .collect(),
            },
        }
    }
}
