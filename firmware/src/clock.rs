//! Wall clock on the RTC timer
//!
//! The RTC keeps counting through deep sleep, so once it has been set from the
//! server it stays valid until power is lost.

use esp_hal::rtc_cntl::Rtc;
use spectra_frame_core::wake::Clock;

pub struct RtcClock<'a, 'd> {
    rtc: &'a Rtc<'d>,
}

impl<'a, 'd> RtcClock<'a, 'd> {
    pub fn new(rtc: &'a Rtc<'d>) -> Self {
        Self { rtc }
    }
}

impl Clock for RtcClock<'_, '_> {
    fn now_utc(&self) -> u64 {
        self.rtc.current_time_us() / 1_000_000
    }

    fn set_utc(&mut self, utc: u64) {
        self.rtc.set_current_time_us(utc * 1_000_000);
    }
}
