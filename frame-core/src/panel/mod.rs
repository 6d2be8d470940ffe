//! Driver for the Seeed 13.3" Spectra 6 e-paper panel (two UC8179 controllers)
//!
//! ```text
//!     ┌──────────────────────────────┐
//!     │  PRIMARY   (CS0)  rows 0-599 │
//!     ├──────────────────────────────┤
//!     │  SECONDARY (CS1)  rows 600+  │
//!     └──────────────────────────────┘
//! ```
//!
//! Both controllers share SCK, MOSI, D/C, RESET and BUSY; only the chip selects
//! are separate. Every [`Spectra6::display`] runs the full
//! reset → init → load → refresh → power-off → sleep sequence, there is no
//! partial update path.

mod color;
pub mod command;
pub mod transpose;

pub use color::Color;
pub use transpose::Half;

use crate::framebuffer::Framebuffer;
use alloc::vec;
use command::{Command, Step, Target};
use embedded_hal::delay::DelayNs;
use embedded_hal::digital::{InputPin, OutputPin};
use embedded_hal::spi::SpiBus;
use log::{debug, error, info, warn};

/// Busy line poll interval
const POLL_INTERVAL_MS: u32 = 10;

/// Reset line hold time (each level)
const RESET_HOLD_MS: u32 = 10;

/// Time for the panel supply rail to settle after switching on
const POWER_SETTLE_MS: u32 = 10;

/// Level the BUSY line reads while a controller is working
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyLevel {
    Low,
    High,
}

/// What to do when the refresh itself does not report completion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RefreshTimeoutPolicy {
    /// Run the normal power-off, then deep sleep
    #[default]
    PowerDown,
    /// Skip power-off and send deep sleep straight away
    SleepOnly,
}

/// Timing and polarity knobs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PanelConfig {
    /// Busy level of the BUSY line. The EE02 carrier inverts it: low while busy.
    pub busy_level: BusyLevel,
    pub reset_timeout_ms: u32,
    pub cascade_timeout_ms: u32,
    pub power_on_timeout_ms: u32,
    /// A full Spectra 6 refresh takes 20-30 s
    pub refresh_timeout_ms: u32,
    pub power_off_timeout_ms: u32,
    pub refresh_timeout_policy: RefreshTimeoutPolicy,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            busy_level: BusyLevel::Low,
            reset_timeout_ms: 2_000,
            cascade_timeout_ms: 1_000,
            power_on_timeout_ms: 5_000,
            refresh_timeout_ms: 60_000,
            power_off_timeout_ms: 5_000,
            refresh_timeout_policy: RefreshTimeoutPolicy::PowerDown,
        }
    }
}

/// Driver state, advanced linearly by [`Spectra6::display`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PanelState {
    Unpowered,
    Reset,
    Configured,
    Loading,
    Refreshing,
    PowerSaved,
    Sleeping,
}

/// Wait that hit its bound
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub waited_ms: u32,
}

/// Step of the sequence a busy wait belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Reset,
    Cascade,
    PowerOn,
    Refresh,
    PowerOff,
}

/// Panel error types
#[derive(Debug)]
pub enum PanelError<E> {
    /// SPI bus error
    Bus(E),
    /// Hard timeout (reset never became ready)
    Timeout(Phase),
}

impl<E> From<E> for PanelError<E> {
    fn from(e: E) -> Self {
        PanelError::Bus(e)
    }
}

/// Outcome of a completed display sequence
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    /// Waits that timed out but were tolerated
    pub timeouts: heapless::Vec<Phase, 4>,
}

impl RefreshReport {
    /// True when the panel confirmed the refresh finished
    pub fn refresh_completed(&self) -> bool {
        !self.timeouts.contains(&Phase::Refresh)
    }

    fn note(&mut self, phase: Phase) {
        let _ = self.timeouts.push(phase);
    }
}

/// Control pins for both controllers
pub struct Pins<OUT, IN> {
    pub cs_primary: OUT,
    pub cs_secondary: OUT,
    pub dc: OUT,
    pub rst: OUT,
    pub busy: IN,
    /// Panel supply rail enable
    pub power: OUT,
}

/// Something that can put a framebuffer on glass
pub trait Panel {
    type Error: core::fmt::Debug;

    /// Run the whole display sequence for `frame`
    fn show<const W: usize, const H: usize>(
        &mut self,
        frame: &Framebuffer<W, H>,
    ) -> Result<RefreshReport, PanelError<Self::Error>>;

    /// Cut the panel supply rail before deep sleep
    fn cut_power(&mut self);
}

/// Driver for the dual-controller 13.3" Spectra 6 panel
pub struct Spectra6<SPI, OUT, IN, DELAY> {
    spi: SPI,
    pins: Pins<OUT, IN>,
    delay: DELAY,
    config: PanelConfig,
    state: PanelState,
}

impl<SPI, OUT, IN, DELAY> Spectra6<SPI, OUT, IN, DELAY>
where
    SPI: SpiBus,
    OUT: OutputPin,
    IN: InputPin,
    DELAY: DelayNs,
{
    /// Create a driver. No bus traffic happens until [`Self::display`].
    pub fn new(spi: SPI, mut pins: Pins<OUT, IN>, delay: DELAY, config: PanelConfig) -> Self {
        let _ = pins.cs_primary.set_high();
        let _ = pins.cs_secondary.set_high();
        let _ = pins.dc.set_low();
        let _ = pins.rst.set_high();

        Self {
            spi,
            pins,
            delay,
            config,
            state: PanelState::Unpowered,
        }
    }

    /// Current position in the display sequence
    pub fn state(&self) -> PanelState {
        self.state
    }

    /// Display a framebuffer.
    ///
    /// A reset timeout is a hard failure, but power-off and deep sleep are still
    /// sent before it is returned. Ready timeouts after that are tolerated and
    /// reported in the [`RefreshReport`].
    pub fn display<const W: usize, const H: usize>(
        &mut self,
        frame: &Framebuffer<W, H>,
    ) -> Result<RefreshReport, PanelError<SPI::Error>> {
        info!("Spectra6: starting display sequence");
        let mut report = RefreshReport::default();

        let result = self.bring_up_and_refresh(frame, &mut report);

        let skip_power_off = matches!(result, Ok(()))
            && !report.refresh_completed()
            && self.config.refresh_timeout_policy == RefreshTimeoutPolicy::SleepOnly;

        // Cleanup runs regardless of how far the sequence got
        let cleanup = self.power_down(skip_power_off, &mut report);

        match (result, cleanup) {
            (Err(e), _) => {
                match &e {
                    PanelError::Timeout(phase) => error!("Spectra6: display failed, {:?} timeout", phase),
                    PanelError::Bus(_) => error!("Spectra6: display failed, bus error"),
                }
                Err(e)
            }
            (Ok(()), Err(e)) => Err(e),
            (Ok(()), Ok(())) => {
                if report.timeouts.is_empty() {
                    info!("Spectra6: display complete");
                } else {
                    warn!("Spectra6: display finished with timeouts {:?}", report.timeouts);
                }
                Ok(report)
            }
        }
    }

    /// Switch the panel supply rail off
    pub fn power_off_rail(&mut self) {
        let _ = self.pins.power.set_low();
        self.state = PanelState::Unpowered;
    }

    fn bring_up_and_refresh<const W: usize, const H: usize>(
        &mut self,
        frame: &Framebuffer<W, H>,
        report: &mut RefreshReport,
    ) -> Result<(), PanelError<SPI::Error>> {
        self.hardware_reset()?;
        self.init()?;
        self.load(frame, report)?;
        self.refresh(report)
    }

    /// Power the rail, pulse reset, wait for ready
    fn hardware_reset(&mut self) -> Result<(), PanelError<SPI::Error>> {
        debug!("Spectra6: hardware reset");
        let _ = self.pins.power.set_high();
        self.delay.delay_ms(POWER_SETTLE_MS);

        let _ = self.pins.rst.set_low();
        self.delay.delay_ms(RESET_HOLD_MS);
        let _ = self.pins.rst.set_high();
        self.delay.delay_ms(RESET_HOLD_MS);
        self.state = PanelState::Reset;

        self.wait_until_idle(self.config.reset_timeout_ms)
            .map_err(|t| {
                error!("Spectra6: reset not ready after {} ms", t.waited_ms);
                PanelError::Timeout(Phase::Reset)
            })
    }

    fn init(&mut self) -> Result<(), SPI::Error> {
        debug!("Spectra6: running init sequence");
        for step in command::INIT_SEQUENCE {
            self.send(step)?;
            self.settle(step);
        }
        self.state = PanelState::Configured;
        Ok(())
    }

    /// Stream both halves of the frame, transposed
    fn load<const W: usize, const H: usize>(
        &mut self,
        frame: &Framebuffer<W, H>,
        report: &mut RefreshReport,
    ) -> Result<(), SPI::Error> {
        self.state = PanelState::Loading;

        self.send(&command::CASCADE_SETUP)?;
        if self.wait_until_idle(self.config.cascade_timeout_ms).is_err() {
            warn!("Spectra6: cascade setup not ready, continuing");
            report.note(Phase::Cascade);
        }
        self.settle(&command::CASCADE_SETUP);

        let mut row = vec![0u8; transpose::output_row_bytes::<W, H>()];
        for half in [Half::Primary, Half::Secondary] {
            let target = match half {
                Half::Primary => Target::Primary,
                Half::Secondary => Target::Secondary,
            };

            self.begin(target)?;
            self.write_command(Command::DTM)?;
            self.spi.flush()?;
            let _ = self.pins.dc.set_high();
            for out_row in 0..transpose::output_rows::<W, H>() {
                transpose::transpose_row(frame, half, out_row, &mut row);
                self.spi.write(&row)?;
            }
            self.end(target)?;
            debug!("Spectra6: {:?} half sent", half);
        }

        Ok(())
    }

    /// Power on, trigger the refresh, wait for it to finish
    fn refresh(&mut self, report: &mut RefreshReport) -> Result<(), PanelError<SPI::Error>> {
        self.state = PanelState::Refreshing;

        let timeout = self.config.power_on_timeout_ms;
        if self.send_and_wait(&command::POWER_ON, timeout)?.is_err() {
            warn!("Spectra6: power on not ready, continuing");
            report.note(Phase::PowerOn);
        }

        info!("Spectra6: refreshing (20-30 s)");
        let timeout = self.config.refresh_timeout_ms;
        match self.send_and_wait(&command::REFRESH, timeout)? {
            Ok(()) => info!("Spectra6: refresh complete"),
            // Re-triggering a refresh mid-flight can damage the panel
            Err(t) => {
                error!("Spectra6: refresh timeout after {} ms", t.waited_ms);
                report.note(Phase::Refresh);
            }
        }
        Ok(())
    }

    /// Power-off (unless skipped) and controller deep sleep
    fn power_down(
        &mut self,
        skip_power_off: bool,
        report: &mut RefreshReport,
    ) -> Result<(), PanelError<SPI::Error>> {
        if !skip_power_off {
            let timeout = self.config.power_off_timeout_ms;
            if self.send_and_wait(&command::POWER_OFF, timeout)?.is_err() {
                warn!("Spectra6: power off not ready");
                report.note(Phase::PowerOff);
            }
        }
        self.state = PanelState::PowerSaved;

        debug!("Spectra6: entering deep sleep");
        self.send(&command::DEEP_SLEEP)?;
        self.state = PanelState::Sleeping;
        Ok(())
    }

    /// Poll BUSY until ready or the bound runs out
    pub fn wait_until_idle(&mut self, timeout_ms: u32) -> Result<(), Timeout> {
        let mut waited_ms = 0;
        while self.is_busy() {
            if waited_ms >= timeout_ms {
                return Err(Timeout { waited_ms });
            }
            self.delay.delay_ms(POLL_INTERVAL_MS);
            waited_ms += POLL_INTERVAL_MS;
        }
        Ok(())
    }

    /// Check if a controller is still busy
    pub fn is_busy(&mut self) -> bool {
        match self.config.busy_level {
            BusyLevel::Low => self.pins.busy.is_low().unwrap_or(true),
            BusyLevel::High => self.pins.busy.is_high().unwrap_or(true),
        }
    }

    /// Send one table step with the chip-select framing of its target
    fn send(&mut self, step: &Step) -> Result<(), SPI::Error> {
        if step.target == Target::Cascade {
            let _ = self.pins.cs_secondary.set_low();
            if step.lead_ms > 0 {
                self.delay.delay_ms(step.lead_ms);
            }
            self.primary_write(step)?;
            let _ = self.pins.cs_secondary.set_high();
        } else {
            self.begin(step.target)?;
            self.write_command(step.command)?;
            self.write_data(step.data)?;
            self.end(step.target)?;
        }
        Ok(())
    }

    /// Cascade step whose busy wait happens while the secondary is still selected
    fn send_and_wait(
        &mut self,
        step: &Step,
        timeout_ms: u32,
    ) -> Result<Result<(), Timeout>, SPI::Error> {
        let _ = self.pins.cs_secondary.set_low();
        self.primary_write(step)?;
        let waited = self.wait_until_idle(timeout_ms);
        let _ = self.pins.cs_secondary.set_high();
        self.settle(step);
        Ok(waited)
    }

    /// Write framed by the primary CS only; the secondary CS is left alone
    fn primary_write(&mut self, step: &Step) -> Result<(), SPI::Error> {
        let _ = self.pins.dc.set_low();
        let _ = self.pins.cs_primary.set_low();
        self.write_command(step.command)?;
        self.write_data(step.data)?;
        self.spi.flush()?;
        let _ = self.pins.cs_primary.set_high();
        Ok(())
    }

    fn settle(&mut self, step: &Step) {
        if step.settle_ms > 0 {
            self.delay.delay_ms(step.settle_ms);
        }
    }

    /// Assert the chip select(s) of a non-cascade target
    fn begin(&mut self, target: Target) -> Result<(), SPI::Error> {
        match target {
            Target::Primary => {
                let _ = self.pins.cs_secondary.set_high();
                let _ = self.pins.dc.set_low();
                let _ = self.pins.cs_primary.set_low();
            }
            Target::Secondary => {
                let _ = self.pins.cs_primary.set_high();
                let _ = self.pins.dc.set_low();
                let _ = self.pins.cs_secondary.set_low();
            }
            Target::Broadcast | Target::Cascade => {
                let _ = self.pins.dc.set_low();
                let _ = self.pins.cs_primary.set_low();
                let _ = self.pins.cs_secondary.set_low();
            }
        }
        Ok(())
    }

    fn end(&mut self, target: Target) -> Result<(), SPI::Error> {
        self.spi.flush()?;
        match target {
            Target::Primary => {
                let _ = self.pins.cs_primary.set_high();
            }
            Target::Secondary => {
                let _ = self.pins.cs_secondary.set_high();
            }
            Target::Broadcast | Target::Cascade => {
                let _ = self.pins.cs_primary.set_high();
                let _ = self.pins.cs_secondary.set_high();
            }
        }
        Ok(())
    }

    /// Send a command byte (D/C low)
    fn write_command(&mut self, command: Command) -> Result<(), SPI::Error> {
        let _ = self.pins.dc.set_low();
        self.spi.write(&[command.addr()])
    }

    /// Send data bytes (D/C high)
    fn write_data(&mut self, data: &[u8]) -> Result<(), SPI::Error> {
        if data.is_empty() {
            return Ok(());
        }
        self.spi.flush()?;
        let _ = self.pins.dc.set_high();
        self.spi.write(data)
    }
}

impl<SPI, OUT, IN, DELAY> Panel for Spectra6<SPI, OUT, IN, DELAY>
where
    SPI: SpiBus,
    OUT: OutputPin,
    IN: InputPin,
    DELAY: DelayNs,
{
    type Error = SPI::Error;

    fn show<const W: usize, const H: usize>(
        &mut self,
        frame: &Framebuffer<W, H>,
    ) -> Result<RefreshReport, PanelError<Self::Error>> {
        self.display(frame)
    }

    fn cut_power(&mut self) {
        self.power_off_rail();
    }
}
