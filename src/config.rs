//! Configuration management
//!
//! The settings are a flat key/value set of strings, owned at runtime by the state hub
//! and persisted through a [`SettingsBackend`]. The on-disk backend is a flat TOML table
//! in the XDG config directory.

use color_eyre::eyre::{Result, WrapErr, bail, eyre};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

use crate::protocol::{CurrentOutput, OUTPUT_COUNT, Output};

/// Raw persisted form of the settings
pub type KeyValueMap = BTreeMap<String, String>;

const CONFIG_DIR_NAME: &str = "soundbrick";
const CONFIG_FILE_NAME: &str = "config.toml";

const LABEL_KEYS: [&str; OUTPUT_COUNT] = ["output1", "output2", "output3", "output4"];

// ============================================================================
// Setting Keys
// ============================================================================

/// A named setting. Also the topic name for change subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SettingKey {
    /// User-visible label of an output (`output1`..`output4`)
    Label(Output),
    /// Which outputs take part in cycling (`enabled`)
    Enabled,
    /// Last device-confirmed output (`current_output`)
    CurrentOutput,
    /// Device network address (`ip`)
    DeviceAddress,
    /// Platform key code bound to "cycle output" (`hotkey`)
    Hotkey,
    /// Desktop notifications on/off (`notify`)
    Notify,
    /// Daemon log level (`log_level`)
    LogLevel,
}

impl SettingKey {
    /// Every known key, in file order
    pub const ALL: [SettingKey; 10] = [
        SettingKey::Label(Output::ALL[0]),
        SettingKey::Label(Output::ALL[1]),
        SettingKey::Label(Output::ALL[2]),
        SettingKey::Label(Output::ALL[3]),
        SettingKey::Enabled,
        SettingKey::CurrentOutput,
        SettingKey::DeviceAddress,
        SettingKey::Hotkey,
        SettingKey::Notify,
        SettingKey::LogLevel,
    ];

    /// Persisted key name
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Label(output) => LABEL_KEYS[output.index()],
            Self::Enabled => "enabled",
            Self::CurrentOutput => "current_output",
            Self::DeviceAddress => "ip",
            Self::Hotkey => "hotkey",
            Self::Notify => "notify",
            Self::LogLevel => "log_level",
        }
    }

    /// Value used when the key is missing from the persisted set
    #[must_use]
    pub fn default_value(self) -> String {
        match self {
            Self::Label(output) => format!("Output {}", output.position()),
            Self::Enabled => "ON, ON, ON, ON".to_string(),
            Self::CurrentOutput => "0".to_string(),
            Self::DeviceAddress => String::new(),
            Self::Hotkey => "220".to_string(),
            Self::Notify => "true".to_string(),
            Self::LogLevel => "info".to_string(),
        }
    }

    /// Validate and normalize a value submitted for this key
    ///
    /// # Errors
    /// Returns a human-readable reason when the value is not acceptable.
    pub fn normalize(self, value: &str) -> std::result::Result<String, String> {
        let value = value.trim();
        match self {
            Self::Label(_) => {
                if value.is_empty() {
                    Err("label cannot be empty".to_string())
                } else {
                    Ok(value.to_string())
                }
            }
            Self::Enabled => parse_enabled(value)
                .map(format_enabled)
                .ok_or_else(|| format!("expected four ON/OFF values, got '{value}'")),
            Self::CurrentOutput => CurrentOutput::parse(value)
                .map(CurrentOutput::to_setting)
                .ok_or_else(|| format!("expected 0-3 or 4 (muted), got '{value}'")),
            Self::DeviceAddress => Ok(value.to_string()),
            Self::Hotkey => value
                .parse::<u32>()
                .map(|code| code.to_string())
                .map_err(|_| format!("hotkey must be a numeric key code, got '{value}'")),
            Self::Notify => match value.to_ascii_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok("true".to_string()),
                "false" | "off" | "no" | "0" => Ok("false".to_string()),
                _ => Err(format!("expected true or false, got '{value}'")),
            },
            Self::LogLevel => match value.to_ascii_lowercase().as_str() {
                level @ ("error" | "warn" | "info" | "debug" | "trace") => Ok(level.to_string()),
                _ => Err(format!(
                    "invalid log_level '{value}'. Must be: error, warn, info, debug, or trace"
                )),
            },
        }
    }
}

impl fmt::Display for SettingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for SettingKey {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|key| key.name() == lower)
            .ok_or_else(|| {
                let known: Vec<_> = Self::ALL.iter().map(|k| k.name()).collect();
                format!("unknown setting '{s}'. Known: {}", known.join(", "))
            })
    }
}

impl TryFrom<String> for SettingKey {
    type Error = String;

    fn try_from(value: String) -> std::result::Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SettingKey> for String {
    fn from(key: SettingKey) -> Self {
        key.name().to_string()
    }
}

/// Parse the `enabled` list (`"ON, OFF, ON, ON"`), case-insensitive
#[must_use]
pub fn parse_enabled(value: &str) -> Option<[bool; OUTPUT_COUNT]> {
    let mut flags = [false; OUTPUT_COUNT];
    let mut parts = value.split(',');
    for flag in &mut flags {
        *flag = match parts.next()?.trim().to_ascii_uppercase().as_str() {
            "ON" => true,
            "OFF" => false,
            _ => return None,
        };
    }
    parts.next().is_none().then_some(flags)
}

/// Persisted form of the `enabled` list
#[must_use]
pub fn format_enabled(flags: [bool; OUTPUT_COUNT]) -> String {
    flags
        .iter()
        .map(|&on| if on { "ON" } else { "OFF" })
        .collect::<Vec<_>>()
        .join(", ")
}

// ============================================================================
// ConfigStore
// ============================================================================

/// In-memory settings, keyed by lowercase name
///
/// Unknown keys are kept so they survive a save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigStore {
    values: KeyValueMap,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::from_map(KeyValueMap::new())
    }
}

impl ConfigStore {
    /// Build a store from loaded values, filling in defaults for missing keys
    #[must_use]
    pub fn from_map(map: KeyValueMap) -> Self {
        let mut values: KeyValueMap = map
            .into_iter()
            .map(|(key, value)| (key.trim().to_ascii_lowercase(), value))
            .collect();

        for key in SettingKey::ALL {
            values
                .entry(key.name().to_string())
                .or_insert_with(|| key.default_value());
        }

        Self { values }
    }

    /// Load through a backend
    ///
    /// # Errors
    /// Returns an error if the backend cannot produce the settings.
    pub fn load(backend: &mut dyn SettingsBackend) -> Result<Self> {
        let map = backend.load()?;
        let store = Self::from_map(map);
        debug!("Loaded {} settings from {}", store.values.len(), backend.describe());
        Ok(store)
    }

    /// Raw value of a setting
    #[must_use]
    pub fn get(&self, key: SettingKey) -> &str {
        self.values.get(key.name()).map_or("", String::as_str)
    }

    /// Replace a value, returning whether anything changed
    pub(crate) fn set(&mut self, key: SettingKey, value: String) -> bool {
        match self.values.get(key.name()) {
            Some(old) if *old == value => false,
            _ => {
                self.values.insert(key.name().to_string(), value);
                true
            }
        }
    }

    /// Persisted form
    #[must_use]
    pub fn to_map(&self) -> KeyValueMap {
        self.values.clone()
    }

    /// Label of an output
    #[must_use]
    pub fn label(&self, output: Output) -> &str {
        self.get(SettingKey::Label(output))
    }

    /// All four labels, in output order
    #[must_use]
    pub fn labels(&self) -> [String; OUTPUT_COUNT] {
        Output::ALL.map(|output| self.label(output).to_string())
    }

    /// Which outputs participate in cycling
    ///
    /// A malformed list falls back to all outputs enabled.
    #[must_use]
    pub fn enabled(&self) -> [bool; OUTPUT_COUNT] {
        let raw = self.get(SettingKey::Enabled);
        parse_enabled(raw).unwrap_or_else(|| {
            warn!("Ignoring malformed enabled list '{}'", raw);
            [true; OUTPUT_COUNT]
        })
    }

    /// Last device-confirmed output, if the stored value is valid
    #[must_use]
    pub fn current_output(&self) -> Option<CurrentOutput> {
        CurrentOutput::parse(self.get(SettingKey::CurrentOutput))
    }

    #[must_use]
    pub fn device_address(&self) -> &str {
        self.get(SettingKey::DeviceAddress).trim()
    }

    #[must_use]
    pub fn hotkey(&self) -> Option<u32> {
        self.get(SettingKey::Hotkey).trim().parse().ok()
    }

    #[must_use]
    pub fn notifications_enabled(&self) -> bool {
        SettingKey::Notify
            .normalize(self.get(SettingKey::Notify))
            .map_or(true, |v| v == "true")
    }

    /// Configured log level, or `info` if the stored one is invalid
    #[must_use]
    pub fn log_level(&self) -> String {
        SettingKey::LogLevel
            .normalize(self.get(SettingKey::LogLevel))
            .unwrap_or_else(|_| SettingKey::LogLevel.default_value())
    }

    /// Check every known value, collecting problems
    ///
    /// # Errors
    /// Returns an error listing every invalid setting.
    pub fn validate(&self) -> Result<()> {
        let problems: Vec<String> = SettingKey::ALL
            .iter()
            .filter_map(|key| {
                key.normalize(self.get(*key))
                    .err()
                    .map(|reason| format!("{key}: {reason}"))
            })
            .collect();

        if !problems.is_empty() {
            bail!("Invalid settings:\n  {}", problems.join("\n  "));
        }
        Ok(())
    }

    /// Print a human-readable summary of the settings
    pub fn print_summary(&self, source: &str) {
        println!("✓ Configuration valid\n");

        println!("Outputs:");
        let enabled = self.enabled();
        for output in Output::ALL {
            let state = if enabled[output.index()] { "enabled" } else { "disabled" };
            println!("  {}. {} ({})", output.position(), self.label(output), state);
        }

        let current = match self.current_output() {
            Some(CurrentOutput::Active(output)) => self.label(output).to_string(),
            Some(CurrentOutput::Muted) => "muted".to_string(),
            None => "unknown".to_string(),
        };
        println!("\nCurrent output: {current}");

        let address = self.device_address();
        println!(
            "Device address: {}",
            if address.is_empty() { "(not set)" } else { address }
        );
        println!("Hotkey code: {}", self.get(SettingKey::Hotkey));
        println!("Notifications: {}", self.notifications_enabled());
        println!("Log level: {}", self.log_level());

        println!("\nConfig: {source}");
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Load/save collaborator for the settings
pub trait SettingsBackend: Send {
    /// Load the persisted settings, creating them with defaults if absent
    ///
    /// # Errors
    /// Returns an error if the settings exist but cannot be read or parsed.
    fn load(&mut self) -> Result<KeyValueMap>;

    /// Persist the full settings set
    ///
    /// # Errors
    /// Returns an error if writing fails.
    fn save(&mut self, values: &KeyValueMap) -> Result<()>;

    /// Where the settings live, for log messages
    fn describe(&self) -> String;
}

/// Settings stored as a flat TOML table of strings
#[derive(Debug, Clone)]
pub struct TomlFileBackend {
    path: PathBuf,
}

impl TomlFileBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve the settings file location
    ///
    /// An explicit path wins; dev mode uses the working directory; otherwise the XDG
    /// config directory.
    ///
    /// # Errors
    /// Returns an error if the config directory cannot be determined.
    pub fn resolve_path(explicit: Option<&Path>, dev: bool) -> Result<PathBuf> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if dev {
            return Ok(PathBuf::from(CONFIG_FILE_NAME));
        }
        let config_dir = dirs::config_dir()
            .ok_or_else(|| eyre!("Could not determine config directory"))?
            .join(CONFIG_DIR_NAME);
        Ok(config_dir.join(CONFIG_FILE_NAME))
    }

    fn write_map(&self, values: &KeyValueMap) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .wrap_err_with(|| format!("Failed to create config dir: {parent:?}"))?;
        }

        let mut contents = String::from("# Sound Brick settings\n");
        contents.push_str(
            &toml::to_string(values).wrap_err("Failed to serialize settings")?,
        );

        // Write-then-rename so a crash never leaves a truncated file behind
        let tmp_path = self.path.with_extension("toml.tmp");
        fs::write(&tmp_path, contents)
            .wrap_err_with(|| format!("Failed to write config: {tmp_path:?}"))?;
        fs::rename(&tmp_path, &self.path)
            .wrap_err_with(|| format!("Failed to replace config: {:?}", self.path))?;
        Ok(())
    }
}

impl SettingsBackend for TomlFileBackend {
    fn load(&mut self) -> Result<KeyValueMap> {
        if !self.path.exists() {
            info!("Creating default config at {:?}", self.path);
            self.write_map(&ConfigStore::default().to_map())?;
        }

        let contents = fs::read_to_string(&self.path)
            .wrap_err_with(|| format!("Failed to read config: {:?}", self.path))?;
        let table: toml::Table = toml::from_str(&contents)
            .wrap_err_with(|| format!("Failed to parse config: {:?}", self.path))?;

        let mut map = KeyValueMap::new();
        for (key, value) in table {
            // Hand-edited files may use bare numbers/booleans
            let value = match value {
                toml::Value::String(s) => s,
                toml::Value::Integer(i) => i.to_string(),
                toml::Value::Boolean(b) => b.to_string(),
                toml::Value::Float(f) => f.to_string(),
                other => {
                    warn!("Ignoring non-scalar setting '{}' = {}", key, other);
                    continue;
                }
            };
            map.insert(key, value);
        }
        Ok(map)
    }

    fn save(&mut self, values: &KeyValueMap) -> Result<()> {
        self.write_map(values)
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Settings held in memory only
///
/// Clones share the same storage, so a caller can keep a handle to observe what the
/// hub persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    values: Arc<Mutex<Option<KeyValueMap>>>,
    saves: Arc<AtomicUsize>,
}

impl MemoryBackend {
    /// Backend that starts out holding `values`
    #[must_use]
    pub fn with_values(values: KeyValueMap) -> Self {
        Self {
            values: Arc::new(Mutex::new(Some(values))),
            saves: Arc::default(),
        }
    }

    /// Last persisted values
    #[must_use]
    pub fn snapshot(&self) -> KeyValueMap {
        self.values
            .lock()
            .map(|guard| guard.clone().unwrap_or_default())
            .unwrap_or_default()
    }

    /// Number of completed saves
    #[must_use]
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }
}

impl SettingsBackend for MemoryBackend {
    fn load(&mut self) -> Result<KeyValueMap> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| eyre!("Settings mutex poisoned: {e}"))?;
        Ok(guard
            .get_or_insert_with(|| ConfigStore::default().to_map())
            .clone())
    }

    fn save(&mut self, values: &KeyValueMap) -> Result<()> {
        let mut guard = self
            .values
            .lock()
            .map_err(|e| eyre!("Settings mutex poisoned: {e}"))?;
        *guard = Some(values.clone());
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}
