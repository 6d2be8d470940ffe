//! Retained state slot in RTC fast memory
//!
//! The slot holds the encoded state rather than the struct itself, so a slot
//! left over from another firmware can only fail to decode.

use log::{info, warn};
use spectra_frame_core::state::{ENCODED_MAX, RetainedState};
use spectra_frame_core::storage::Storage;

/// Magic number to validate RTC memory state
const SLOT_MAGIC: u32 = 0x5EC7_F4A3;

#[repr(C)]
struct Slot {
    magic: u32,
    len: u16,
    bytes: [u8; ENCODED_MAX],
}

impl Slot {
    const fn new() -> Self {
        Self {
            magic: 0,
            len: 0,
            bytes: [0; ENCODED_MAX],
        }
    }

    fn is_valid(&self) -> bool {
        self.magic == SLOT_MAGIC && (self.len as usize) <= ENCODED_MAX
    }
}

/// RTC fast memory state - persists across deep sleep
#[esp_hal::ram(unstable(rtc_fast))]
static mut SLOT: Slot = Slot::new();

/// Where the state came from at boot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// RTC memory survived, the chip did not lose power
    Rtc,
    /// Mirror on storage
    Storage,
    /// Nothing usable, starting fresh
    Fresh,
}

/// State in the RTC slot, if it holds a valid encoding
fn read_slot() -> Option<RetainedState> {
    // SAFETY: single core, read once at boot before anything else touches the slot
    let slot = unsafe { &*(&raw const SLOT) };
    if !slot.is_valid() {
        return None;
    }
    match RetainedState::decode(&slot.bytes[..slot.len as usize]) {
        Ok(state) => Some(state),
        Err(e) => {
            warn!("RTC state unreadable: {:?}", e);
            None
        }
    }
}

/// Load the retained state, RTC first, then the storage mirror
pub fn load<S: Storage>(storage: &mut S) -> (RetainedState, Origin) {
    if let Some(state) = read_slot() {
        return (state, Origin::Rtc);
    }
    match RetainedState::load_from(storage) {
        Some(state) => {
            info!("Restored state from storage");
            (state, Origin::Storage)
        }
        None => (RetainedState::new(), Origin::Fresh),
    }
}

/// Write the state to the RTC slot and mirror it to storage
pub fn commit<S: Storage>(state: &RetainedState, storage: &mut S) {
    let mut bytes = [0u8; ENCODED_MAX];
    let len = match state.encode(&mut bytes) {
        Ok(len) => len,
        Err(e) => {
            warn!("State encode failed: {:?}", e);
            return;
        }
    };

    // SAFETY: single core, written once right before sleep or restart
    unsafe {
        let slot = &mut *(&raw mut SLOT);
        slot.bytes = bytes;
        slot.len = len as u16;
        slot.magic = SLOT_MAGIC;
    }

    if let Err(e) = storage.store(spectra_frame_core::storage::BlobKey::State, &bytes[..len]) {
        warn!("State mirror not written: {:?}", e);
    }
}
