//! Device configuration and its persistent store
//!
//! Every field has a bound. Local edits (the configuration portal), remote
//! overrides (`/config`) and the persisted blob all go through the same
//! validators, so a stored config is always valid.

use crate::storage::{BlobKey, Storage, StorageError};
use core::fmt::Write;
use heapless::String;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

/// Exclusive upper bound on the host length
pub const MAX_HOST_LEN: usize = 128;
/// Exclusive upper bound on the content path length
pub const MAX_PATH_LEN: usize = 64;

pub const DEFAULT_HOST: &str = "192.168.86.34";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_PATH: &str = "/image_packed";
pub const DEFAULT_INTERVAL_MINUTES: u16 = 15;
pub const DEFAULT_START_HOUR: u8 = 8;
pub const DEFAULT_END_HOUR: u8 = 20;

const INTERVAL_RANGE: core::ops::RangeInclusive<i64> = 1..=1440;
const TZ_RANGE: core::ops::RangeInclusive<i64> = -720..=840;

/// Size of the serialized config blob buffer
const BLOB_SIZE: usize = 512;

/// Runtime tunables
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceConfig {
    pub server_host: String<MAX_HOST_LEN>,
    pub server_port: u16,
    pub content_path: String<MAX_PATH_LEN>,
    pub refresh_interval_minutes: u16,
    /// Local hour the active window opens
    pub active_start_hour: u8,
    /// Local hour the active window closes (exclusive)
    pub active_end_hour: u8,
    pub timezone_offset_minutes: i16,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let mut server_host = String::new();
        let _ = server_host.push_str(DEFAULT_HOST);
        let mut content_path = String::new();
        let _ = content_path.push_str(DEFAULT_PATH);

        Self {
            server_host,
            server_port: DEFAULT_PORT,
            content_path,
            refresh_interval_minutes: DEFAULT_INTERVAL_MINUTES,
            active_start_hour: DEFAULT_START_HOUR,
            active_end_hour: DEFAULT_END_HOUR,
            timezone_offset_minutes: 0,
        }
    }
}

impl DeviceConfig {
    /// `http://host:port/path`
    pub fn content_url(&self) -> String<256> {
        self.endpoint_url(&self.content_path)
    }

    /// URL of another endpoint on the same server (`/hash`, `/config`)
    pub fn endpoint_url(&self, path: &str) -> String<256> {
        let mut url = String::new();
        let _ = write!(url, "http://{}:{}{}", self.server_host, self.server_port, path);
        url
    }
}

/// A field failed validation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    InvalidHost,
    InvalidPort,
    InvalidPath,
    InvalidInterval,
    InvalidHour,
    InvalidTimezone,
    Storage(StorageError),
}

impl From<StorageError> for ConfigError {
    fn from(e: StorageError) -> Self {
        ConfigError::Storage(e)
    }
}

pub fn validate_host(host: &str) -> Result<String<MAX_HOST_LEN>, ConfigError> {
    let host = host.trim();
    if host.is_empty() || host.len() >= MAX_HOST_LEN {
        return Err(ConfigError::InvalidHost);
    }
    String::try_from(host).map_err(|_| ConfigError::InvalidHost)
}

pub fn validate_port(port: i64) -> Result<u16, ConfigError> {
    match u16::try_from(port) {
        Ok(p) if p > 0 => Ok(p),
        _ => Err(ConfigError::InvalidPort),
    }
}

/// Accepts `image` or `/image`, always returns a leading slash
pub fn validate_path(path: &str) -> Result<String<MAX_PATH_LEN>, ConfigError> {
    let path = path.trim();
    if path.is_empty() || path.len() >= MAX_PATH_LEN {
        return Err(ConfigError::InvalidPath);
    }
    let mut out = String::new();
    if !path.starts_with('/') {
        out.push('/').map_err(|_| ConfigError::InvalidPath)?;
    }
    out.push_str(path).map_err(|_| ConfigError::InvalidPath)?;
    Ok(out)
}

pub fn validate_interval(minutes: i64) -> Result<u16, ConfigError> {
    if INTERVAL_RANGE.contains(&minutes) {
        Ok(minutes as u16)
    } else {
        Err(ConfigError::InvalidInterval)
    }
}

pub fn validate_hour(hour: i64) -> Result<u8, ConfigError> {
    if (0..=23).contains(&hour) {
        Ok(hour as u8)
    } else {
        Err(ConfigError::InvalidHour)
    }
}

pub fn validate_timezone(minutes: i64) -> Result<i16, ConfigError> {
    if TZ_RANGE.contains(&minutes) {
        Ok(minutes as i16)
    } else {
        Err(ConfigError::InvalidTimezone)
    }
}

/// Sparse, unvalidated set of fields
///
/// Used for the persisted blob, the portal form and as the input of
/// [`ConfigStore::apply_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ConfigUpdate<'a> {
    #[serde(borrow)]
    pub server_host: Option<&'a str>,
    pub server_port: Option<i64>,
    #[serde(borrow)]
    pub content_path: Option<&'a str>,
    pub refresh_interval_minutes: Option<i64>,
    pub active_start_hour: Option<i64>,
    pub active_end_hour: Option<i64>,
    pub timezone_offset_minutes: Option<i64>,
}

/// Payload of the remote `/config` endpoint
///
/// Keys are read independently: a mistyped value drops only that key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Current time, mandatory for a successful sync
    pub utc_epoch: Option<u64>,
    pub refresh_interval_minutes: Option<i64>,
    pub active_start_hour: Option<i64>,
    pub active_end_hour: Option<i64>,
    pub timezone_offset_minutes: Option<i64>,
}

/// The remote payload is not a JSON object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidPayload;

/// Read one key of a JSON object, `None` when absent or of the wrong type
macro_rules! remote_field {
    ($body:expr, $key:ident: $ty:ty) => {{
        #[derive(Deserialize)]
        struct Field {
            $key: Option<$ty>,
        }
        match serde_json_core::from_slice::<Field>($body) {
            Ok((field, _)) => field.$key,
            Err(e) => {
                warn!("Remote {} ignored: {:?}", stringify!($key), e);
                None
            }
        }
    }};
}

impl RemoteConfig {
    pub fn parse(body: &[u8]) -> Result<Self, InvalidPayload> {
        #[derive(Deserialize)]
        struct Object {}

        if let Err(e) = serde_json_core::from_slice::<Object>(body) {
            warn!("Invalid remote config payload: {:?}", e);
            return Err(InvalidPayload);
        }

        Ok(Self {
            utc_epoch: remote_field!(body, utc_epoch: u64),
            refresh_interval_minutes: remote_field!(body, refresh_interval_minutes: i64),
            active_start_hour: remote_field!(body, active_start_hour: i64),
            active_end_hour: remote_field!(body, active_end_hour: i64),
            timezone_offset_minutes: remote_field!(body, timezone_offset_minutes: i64),
        })
    }
}

/// Holds the live config and persists every successful mutation
///
/// The live config only changes once the new one is stored.
pub struct ConfigStore<S> {
    config: DeviceConfig,
    storage: S,
}

impl<S: Storage> ConfigStore<S> {
    /// Load from the config blob. Missing or invalid fields fall back to defaults.
    pub fn load(mut storage: S) -> Self {
        let mut buf = [0u8; BLOB_SIZE];
        let mut config = DeviceConfig::default();

        match storage.load(BlobKey::Config, &mut buf) {
            Ok(Some(len)) => match serde_json_core::from_slice::<ConfigUpdate>(&buf[..len]) {
                Ok((stored, _)) => {
                    let rejected = merge_per_field(&mut config, &stored);
                    if rejected > 0 {
                        warn!("{} stored config field(s) invalid, using defaults", rejected);
                    }
                }
                Err(e) => warn!("Config blob unreadable ({:?}), using defaults", e),
            },
            Ok(None) => info!("No stored config, using defaults"),
            Err(e) => warn!("Config load failed: {:?}", e),
        }

        Self { config, storage }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn set_server_host(&mut self, host: &str) -> Result<(), ConfigError> {
        let host = validate_host(host)?;
        self.update(|c| c.server_host = host)
    }

    pub fn set_server_port(&mut self, port: i64) -> Result<(), ConfigError> {
        let port = validate_port(port)?;
        self.update(|c| c.server_port = port)
    }

    pub fn set_content_path(&mut self, path: &str) -> Result<(), ConfigError> {
        let path = validate_path(path)?;
        self.update(|c| c.content_path = path)
    }

    pub fn set_refresh_interval(&mut self, minutes: i64) -> Result<(), ConfigError> {
        let minutes = validate_interval(minutes)?;
        self.update(|c| c.refresh_interval_minutes = minutes)
    }

    pub fn set_active_start_hour(&mut self, hour: i64) -> Result<(), ConfigError> {
        let hour = validate_hour(hour)?;
        self.update(|c| c.active_start_hour = hour)
    }

    pub fn set_active_end_hour(&mut self, hour: i64) -> Result<(), ConfigError> {
        let hour = validate_hour(hour)?;
        self.update(|c| c.active_end_hour = hour)
    }

    pub fn set_timezone_offset(&mut self, minutes: i64) -> Result<(), ConfigError> {
        let minutes = validate_timezone(minutes)?;
        self.update(|c| c.timezone_offset_minutes = minutes)
    }

    /// Validate every present field, then apply them all and persist once.
    /// Nothing changes when any field is invalid.
    pub fn apply_all(&mut self, update: &ConfigUpdate) -> Result<(), ConfigError> {
        let mut next = self.config.clone();
        if let Some(host) = update.server_host {
            next.server_host = validate_host(host)?;
        }
        if let Some(port) = update.server_port {
            next.server_port = validate_port(port)?;
        }
        if let Some(path) = update.content_path {
            next.content_path = validate_path(path)?;
        }
        if let Some(minutes) = update.refresh_interval_minutes {
            next.refresh_interval_minutes = validate_interval(minutes)?;
        }
        if let Some(hour) = update.active_start_hour {
            next.active_start_hour = validate_hour(hour)?;
        }
        if let Some(hour) = update.active_end_hour {
            next.active_end_hour = validate_hour(hour)?;
        }
        if let Some(minutes) = update.timezone_offset_minutes {
            next.timezone_offset_minutes = validate_timezone(minutes)?;
        }

        self.commit(next)?;
        info!("Config updated: {}", self.config.content_url());
        Ok(())
    }

    /// Apply the schedule fields present in a remote payload. Out-of-range
    /// values are skipped one by one. Returns how many fields changed.
    pub fn apply_remote_override(&mut self, remote: &RemoteConfig) -> Result<usize, ConfigError> {
        let update = ConfigUpdate {
            refresh_interval_minutes: remote.refresh_interval_minutes,
            active_start_hour: remote.active_start_hour,
            active_end_hour: remote.active_end_hour,
            timezone_offset_minutes: remote.timezone_offset_minutes,
            ..ConfigUpdate::default()
        };

        let mut next = self.config.clone();
        let rejected = merge_per_field(&mut next, &update);
        if rejected > 0 {
            warn!("Ignored {} out-of-range remote field(s)", rejected);
        }

        let changed = count_changes(&self.config, &next);
        if changed > 0 {
            info!(
                "Remote override: interval {} min, window {}-{}, tz {}",
                next.refresh_interval_minutes,
                next.active_start_hour,
                next.active_end_hour,
                next.timezone_offset_minutes
            );
            self.commit(next)?;
        }
        Ok(changed)
    }

    pub fn reset_to_defaults(&mut self) -> Result<(), ConfigError> {
        self.commit(DeviceConfig::default())?;
        info!("Config reset to defaults");
        Ok(())
    }

    fn update(&mut self, change: impl FnOnce(&mut DeviceConfig)) -> Result<(), ConfigError> {
        let mut next = self.config.clone();
        change(&mut next);
        self.commit(next)
    }

    /// Store `next`, then make it live
    fn commit(&mut self, next: DeviceConfig) -> Result<(), ConfigError> {
        let mut buf = [0u8; BLOB_SIZE];
        let len =
            serde_json_core::to_slice(&next, &mut buf).map_err(|_| StorageError::Corrupted)?;
        self.storage.store(BlobKey::Config, &buf[..len])?;
        debug!("Config saved ({} bytes)", len);
        self.config = next;
        Ok(())
    }
}

/// Apply each valid field independently. Returns the number rejected.
fn merge_per_field(config: &mut DeviceConfig, update: &ConfigUpdate) -> usize {
    let mut rejected = 0;
    let mut take = |ok: bool| {
        if !ok {
            rejected += 1;
        }
    };

    if let Some(host) = update.server_host {
        take(validate_host(host).map(|v| config.server_host = v).is_ok());
    }
    if let Some(port) = update.server_port {
        take(validate_port(port).map(|v| config.server_port = v).is_ok());
    }
    if let Some(path) = update.content_path {
        take(validate_path(path).map(|v| config.content_path = v).is_ok());
    }
    if let Some(minutes) = update.refresh_interval_minutes {
        take(validate_interval(minutes).map(|v| config.refresh_interval_minutes = v).is_ok());
    }
    if let Some(hour) = update.active_start_hour {
        take(validate_hour(hour).map(|v| config.active_start_hour = v).is_ok());
    }
    if let Some(hour) = update.active_end_hour {
        take(validate_hour(hour).map(|v| config.active_end_hour = v).is_ok());
    }
    if let Some(minutes) = update.timezone_offset_minutes {
        take(validate_timezone(minutes).map(|v| config.timezone_offset_minutes = v).is_ok());
    }

    rejected
}

fn count_changes(a: &DeviceConfig, b: &DeviceConfig) -> usize {
    [
        a.server_host != b.server_host,
        a.server_port != b.server_port,
        a.content_path != b.content_path,
        a.refresh_interval_minutes != b.refresh_interval_minutes,
        a.active_start_hour != b.active_start_hour,
        a.active_end_hour != b.active_end_hour,
        a.timezone_offset_minutes != b.timezone_offset_minutes,
    ]
    .iter()
    .filter(|&&changed| changed)
    .count()
}
