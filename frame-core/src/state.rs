//! State retained across deep sleep
//!
//! Loaded once at boot, handed to the wake cycle, returned updated and committed
//! right before sleeping. The firmware keeps the encoded form in RTC memory and
//! mirrors it to the `STATE.JSN` blob for the power-loss case.

use crate::freshness::Token;
use crate::storage::{BlobKey, Storage, StorageError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

/// Upper bound of the encoded state
pub const ENCODED_MAX: usize = 256;

/// Why the chip came out of reset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum WakeCause {
    /// First boot or power loss
    #[default]
    PowerOn,
    /// Deep sleep timer
    Timer,
    /// Configuration button
    Button,
    /// Software restart after a panel failure
    Restart,
    Other,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetainedState {
    pub boot_count: u32,
    pub last_wake_cause: WakeCause,
    /// Token of the content on glass
    pub committed_hash: Option<Token>,
    /// The clock has been set from the server since power-on
    pub clock_synced: bool,
    pub last_battery_mv: Option<u16>,
    pub last_sleep_secs: u64,
}

impl Default for RetainedState {
    fn default() -> Self {
        Self::new()
    }
}

impl RetainedState {
    pub const fn new() -> Self {
        Self {
            boot_count: 0,
            last_wake_cause: WakeCause::PowerOn,
            committed_hash: None,
            clock_synced: false,
            last_battery_mv: None,
            last_sleep_secs: 0,
        }
    }

    /// Record a new boot
    pub fn on_boot(&mut self, cause: WakeCause) {
        self.boot_count = self.boot_count.wrapping_add(1);
        self.last_wake_cause = cause;
        if cause == WakeCause::PowerOn {
            // RTC time is lost with power
            self.clock_synced = false;
        }
        debug!("Boot #{} ({:?})", self.boot_count, cause);
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, StorageError> {
        serde_json_core::to_slice(self, buf).map_err(|_| StorageError::BufferTooSmall)
    }

    /// Decode, defaulting missing keys
    pub fn decode(bytes: &[u8]) -> Result<Self, StorageError> {
        serde_json_core::from_slice::<RetainedState>(bytes)
            .map(|(state, _)| state)
            .map_err(|_| StorageError::Corrupted)
    }

    /// Read the storage copy, `None` when absent or unreadable
    pub fn load_from<S: Storage>(storage: &mut S) -> Option<Self> {
        let mut buf = [0u8; ENCODED_MAX];
        match storage.load(BlobKey::State, &mut buf) {
            Ok(Some(len)) => match Self::decode(&buf[..len]) {
                Ok(state) => Some(state),
                Err(e) => {
                    warn!("State blob unreadable: {:?}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                warn!("State load failed: {:?}", e);
                None
            }
        }
    }

    pub fn save_to<S: Storage>(&self, storage: &mut S) -> Result<(), StorageError> {
        let mut buf = [0u8; ENCODED_MAX];
        let len = self.encode(&mut buf)?;
        storage.store(BlobKey::State, &buf[..len])
    }
}
