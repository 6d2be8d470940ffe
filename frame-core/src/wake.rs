//! One wake → act → sleep cycle
//!
//! ```text
//! battery ─▶ connect ─▶ /config ─▶ window? ─▶ /hash ─▶ changed? ─▶ content ─▶ panel
//!              │                     │ no                │ no
//!              └─────── fail ────────┴───────────────────┴──────▶ sleep duration
//! ```
//!
//! The cycle owns no hardware. Network, battery, clock and panel come in
//! through traits; retained state comes in as a value and goes back out
//! updated, the caller commits it before sleeping.

use crate::config::{ConfigStore, DeviceConfig, RemoteConfig};
use crate::framebuffer::Framebuffer;
use crate::freshness::{ChangeDetector, Freshness, Token};
use crate::http::{DeviceHeaders, Url};
use crate::panel::{Panel, PanelError};
use crate::schedule;
use crate::state::RetainedState;
use crate::storage::Storage;
use core::fmt::Debug;
use heapless::String;
use log::{debug, error, info, warn};

/// What the firmware does after the cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// Deep sleep with a timer wake
    Sleep { seconds: u64 },
    /// Abnormal panel state, reboot
    Restart,
}

/// Result of one GET
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fetched {
    /// Bytes copied into the destination
    pub len: usize,
    /// Body bytes received, including any that did not fit
    pub total: usize,
    /// Authoritative token from the response headers
    pub image_hash: Option<Token>,
}

/// Network side of the cycle
#[allow(async_fn_in_trait)]
pub trait ContentSource {
    type Error: Debug;

    /// Bring up connectivity
    async fn connect(&mut self) -> Result<(), Self::Error>;

    /// Drop connectivity; safe to call when not connected
    async fn release(&mut self);

    /// GET `url`, copying the body into `dst` (truncated at its end)
    async fn get(
        &mut self,
        url: &Url<'_>,
        headers: &DeviceHeaders,
        dst: &mut [u8],
    ) -> Result<Fetched, Self::Error>;
}

pub trait Battery {
    /// Battery voltage, `None` when the reading failed
    fn read_millivolts(&mut self) -> Option<u16>;
}

pub trait Clock {
    /// Current UTC unix time in seconds
    fn now_utc(&self) -> u64;
    fn set_utc(&mut self, utc: u64);
}

/// Size of the `/config` response buffer
const CONFIG_BODY_MAX: usize = 512;
/// Size of the `/hash` response buffer
const HASH_BODY_MAX: usize = 64;

/// The collaborators of one wake cycle
pub struct WakeCycle<'a, S, P, N, B, C> {
    pub store: &'a mut ConfigStore<S>,
    pub panel: &'a mut P,
    pub network: &'a mut N,
    pub battery: &'a mut B,
    pub clock: &'a mut C,
    /// 12 lowercase hex digits of the station MAC
    pub device_id: String<12>,
}

impl<S, P, N, B, C> WakeCycle<'_, S, P, N, B, C>
where
    S: Storage,
    P: Panel,
    N: ContentSource,
    B: Battery,
    C: Clock,
{
    /// Run one cycle for a `W` x `H` panel
    pub async fn run<const W: usize, const H: usize>(
        mut self,
        mut state: RetainedState,
    ) -> (RetainedState, CycleOutcome) {
        // Measure before the radio is on
        let battery_mv = self.battery.read_millivolts();
        match battery_mv {
            Some(mv) => info!("Battery: {} mV", mv),
            None => warn!("Battery read failed"),
        }
        state.last_battery_mv = battery_mv;

        let headers = DeviceHeaders {
            device_id: self.device_id.clone(),
            battery_mv,
        };

        let mut detector = ChangeDetector::new(state.committed_hash.clone());
        let mut outcome = None;

        match self.network.connect().await {
            Ok(()) => {
                outcome = self
                    .connected::<W, H>(&headers, &mut state, &mut detector)
                    .await;
                self.network.release().await;
            }
            Err(e) => {
                warn!("Network unavailable ({:?}), keeping previous content", e);
                // Association may have started the radio
                self.network.release().await;
            }
        }

        state.committed_hash = detector.committed().cloned();

        let outcome = outcome.unwrap_or_else(|| {
            let seconds = schedule::compute_sleep_duration(
                self.store.config(),
                self.clock.now_utc(),
                state.clock_synced,
            );
            CycleOutcome::Sleep { seconds }
        });

        if let CycleOutcome::Sleep { seconds } = outcome {
            info!("Sleeping for {} s", seconds);
            state.last_sleep_secs = seconds;
        }
        (state, outcome)
    }

    /// Steps that need the network. `Some` only when the cycle must restart.
    async fn connected<const W: usize, const H: usize>(
        &mut self,
        headers: &DeviceHeaders,
        state: &mut RetainedState,
        detector: &mut ChangeDetector,
    ) -> Option<CycleOutcome> {
        self.sync(headers, state).await;

        let config = self.store.config();
        let now = self.clock.now_utc();
        if state.clock_synced
            && !schedule::is_within_active_window(
                now,
                config.active_start_hour,
                config.active_end_hour,
                config.timezone_offset_minutes,
            )
        {
            info!(
                "Outside active window {}-{}, skipping update",
                config.active_start_hour, config.active_end_hour
            );
            return None;
        }

        let token = match self.fetch_hash(headers).await {
            Some(token) => token,
            None => return None,
        };
        if detector.check(token.as_deref()) == Freshness::Unchanged {
            info!("Content unchanged");
            return None;
        }

        let mut frame = match Framebuffer::<W, H>::try_new() {
            Ok(frame) => frame,
            Err(e) => {
                error!("Framebuffer allocation failed ({} bytes)", e.requested);
                return None;
            }
        };

        let authoritative = self.fetch_content(headers, &mut frame).await?;

        // Nothing else needs the radio, the refresh takes tens of seconds
        self.network.release().await;

        let outcome = match self.panel.show(&frame) {
            Ok(report) => {
                if !report.refresh_completed() {
                    warn!("Refresh did not confirm completion");
                }
                detector.commit(authoritative.as_deref());
                None
            }
            Err(PanelError::Timeout(phase)) => {
                error!("Panel timeout during {:?}", phase);
                detector.commit(authoritative.as_deref());
                None
            }
            Err(PanelError::Bus(e)) => {
                error!("Panel bus failure: {:?}", e);
                // Committed so the restarted cycle does not fetch the same content again
                detector.commit(authoritative.as_deref());
                Some(CycleOutcome::Restart)
            }
        };
        self.panel.cut_power();
        outcome
    }

    /// Pull `/config`: overrides first, then the clock
    async fn sync(&mut self, headers: &DeviceHeaders, state: &mut RetainedState) {
        let url_text = self.store.config().endpoint_url("/config");
        let Ok(url) = Url::parse(&url_text) else {
            warn!("Invalid config URL {}", url_text);
            return;
        };

        let mut body = [0u8; CONFIG_BODY_MAX];
        let fetched = match self.network.get(&url, headers, &mut body).await {
            Ok(fetched) => fetched,
            Err(e) => {
                warn!("Config fetch failed: {:?}", e);
                return;
            }
        };

        let Ok(remote) = RemoteConfig::parse(&body[..fetched.len]) else {
            return;
        };

        match self.store.apply_remote_override(&remote) {
            Ok(0) => debug!("No remote overrides"),
            Ok(n) => info!("Applied {} remote override(s)", n),
            Err(e) => warn!("Remote override not persisted: {:?}", e),
        }

        match remote.utc_epoch {
            Some(utc) => {
                self.clock.set_utc(utc);
                state.clock_synced = true;
                info!("Clock set to {}", utc);
            }
            None => warn!("Config response has no utc_epoch, clock not synced"),
        }
    }

    /// `Some(token)` on a response (token itself may be malformed), `None` on failure
    async fn fetch_hash(&mut self, headers: &DeviceHeaders) -> Option<Option<String<HASH_BODY_MAX>>> {
        let url_text = self.store.config().endpoint_url("/hash");
        let url = Url::parse(&url_text).ok()?;

        let mut body = [0u8; HASH_BODY_MAX];
        match self.network.get(&url, headers, &mut body).await {
            Ok(fetched) => {
                let text = core::str::from_utf8(&body[..fetched.len]).ok();
                Some(text.and_then(|t| String::try_from(t).ok()))
            }
            Err(e) => {
                warn!("Hash check failed: {:?}", e);
                None
            }
        }
    }

    /// Stream the content body into `frame`. `None` when the fetch failed or was short.
    async fn fetch_content<const W: usize, const H: usize>(
        &mut self,
        headers: &DeviceHeaders,
        frame: &mut Framebuffer<W, H>,
    ) -> Option<Option<Token>> {
        let url_text = self.store.config().content_url();
        let url = Url::parse(&url_text).ok()?;
        info!("Fetching {}", url_text);

        let fetched = match self.network.get(&url, headers, frame.as_mut_slice()).await {
            Ok(fetched) => fetched,
            Err(e) => {
                error!("Content fetch failed: {:?}", e);
                return None;
            }
        };

        if fetched.len < Framebuffer::<W, H>::LEN {
            error!(
                "Content too short: {} of {} bytes",
                fetched.len,
                Framebuffer::<W, H>::LEN
            );
            return None;
        }
        if fetched.total > fetched.len {
            warn!("Content is {} bytes, truncated to {}", fetched.total, fetched.len);
        }
        Some(fetched.image_hash)
    }
}

/// Sleep used when the cycle could not run at all
pub fn fallback_sleep(config: &DeviceConfig) -> u64 {
    schedule::compute_sleep_duration(config, 0, false)
}
