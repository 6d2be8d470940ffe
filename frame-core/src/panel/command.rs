//! Command definitions for the dual UC8179 controllers of the 13.3" Spectra 6 panel
//!
//! The init data comes from the panel vendor's reference sequence. Besides the
//! opcode and payload, every step records which controller(s) it is addressed
//! to; the two halves desynchronize if a shared register is programmed on one
//! chip only.

/// Display commands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
#[allow(clippy::upper_case_acronyms, non_camel_case_types)]
pub enum Command {
    /// Panel Setting
    PSR = 0x00,
    /// Power Setting
    PWR = 0x01,
    /// Power Off
    POF = 0x02,
    /// Power On
    PON = 0x04,
    /// Booster Soft Start (negative)
    BTST_N = 0x05,
    /// Booster Soft Start (positive)
    BTST_P = 0x06,
    /// Deep Sleep
    DSLP = 0x07,
    /// Data Start Transmission
    DTM = 0x10,
    /// Display Refresh
    DRF = 0x12,
    /// VCOM and Data Interval Setting
    CDI = 0x50,
    /// TCON Setting
    TCON = 0x60,
    /// Resolution Setting
    TRES = 0x61,
    /// Vendor analog setting (primary only)
    R74 = 0x74,
    /// AGID
    AGID = 0x86,
    /// Vendor booster trim
    RB0 = 0xB0,
    /// Vendor booster trim
    RB1 = 0xB1,
    /// Vendor booster trim
    RB6 = 0xB6,
    /// Vendor booster trim
    RB7 = 0xB7,
    /// Cascade Setting
    CCSET = 0xE0,
    /// Power Saving
    PWS = 0xE3,
    /// Command Header
    CMDH = 0xF0,
}

impl Command {
    /// Get the command address byte
    #[inline]
    pub fn addr(self) -> u8 {
        self as u8
    }
}

/// Which controller(s) a transfer is addressed to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Primary CS only; secondary CS is forced high first
    Primary,
    /// Secondary CS only; primary CS is forced high first
    Secondary,
    /// Both CS lines asserted together for the whole command + data write
    Broadcast,
    /// Secondary CS held low around a primary-framed write. Shared timing and
    /// voltage registers, and the power/refresh commands, go out this way.
    Cascade,
}

/// One entry of a command table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub command: Command,
    pub target: Target,
    pub data: &'static [u8],
    /// Delay after asserting the secondary CS, before the write (cascade only)
    pub lead_ms: u32,
    /// Delay after the step is complete
    pub settle_ms: u32,
}

impl Step {
    const fn new(command: Command, target: Target, data: &'static [u8], settle_ms: u32) -> Self {
        Self {
            command,
            target,
            data,
            lead_ms: 0,
            settle_ms,
        }
    }

    const fn with_lead(mut self, lead_ms: u32) -> Self {
        self.lead_ms = lead_ms;
        self
    }
}

use Command::*;
use Target::*;

/// Ordered initialization table run after every hardware reset
pub const INIT_SEQUENCE: &[Step] = &[
    Step::new(R74, Primary, &[0xC0, 0x1C, 0x1C, 0xCC, 0xCC, 0xCC, 0x15, 0x15, 0x55], 0),
    Step::new(CMDH, Cascade, &[0x49, 0x55, 0x13, 0x5D, 0x05, 0x10], 10).with_lead(10),
    Step::new(PSR, Cascade, &[0xDF, 0x69], 10),
    Step::new(CDI, Cascade, &[0x37], 10),
    Step::new(TCON, Cascade, &[0x03, 0x03], 10),
    Step::new(AGID, Cascade, &[0x10], 10),
    Step::new(PWS, Cascade, &[0x22], 10),
    // 0x04B0 = 1200 gate lines, 0x0320 = 800 sources per controller
    Step::new(TRES, Cascade, &[0x04, 0xB0, 0x03, 0x20], 10),
    Step::new(PWR, Primary, &[0x0F, 0x00, 0x28, 0x2C, 0x28, 0x38], 10),
    Step::new(RB6, Primary, &[0x07], 10),
    Step::new(BTST_P, Primary, &[0xD8, 0x18], 10),
    Step::new(RB7, Primary, &[0x01], 10),
    Step::new(BTST_N, Primary, &[0xD8, 0x18], 10),
    Step::new(RB0, Primary, &[0x01], 10),
    Step::new(RB1, Primary, &[0x02], 10),
];

/// Cascade setting sent before pixel data
pub const CASCADE_SETUP: Step = Step::new(CCSET, Cascade, &[0x01], 10);
/// Power on the charge pumps
pub const POWER_ON: Step = Step::new(PON, Cascade, &[], 30);
/// Trigger the physical refresh
pub const REFRESH: Step = Step::new(DRF, Cascade, &[0x01], 30);
/// Power off the charge pumps
pub const POWER_OFF: Step = Step::new(POF, Cascade, &[0x00], 30);
/// Controller deep sleep (check code 0xA5)
pub const DEEP_SLEEP: Step = Step::new(DSLP, Broadcast, &[0xA5], 0);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_targets() {
        let cascade: heapless::Vec<u8, 16> = INIT_SEQUENCE
            .iter()
            .filter(|s| s.target == Cascade)
            .map(|s| s.command.addr())
            .collect();
        assert_eq!(&cascade[..], &[0xF0, 0x00, 0x50, 0x60, 0x86, 0xE3, 0x61]);

        assert_eq!(INIT_SEQUENCE[0].command, R74);
        assert_eq!(INIT_SEQUENCE[0].target, Primary);
        assert!(INIT_SEQUENCE[8..].iter().all(|s| s.target == Primary));
        assert!(INIT_SEQUENCE.iter().all(|s| s.target != Broadcast));
    }

    #[test]
    fn test_only_header_has_lead() {
        for step in INIT_SEQUENCE {
            let expected = if step.command == CMDH { 10 } else { 0 };
            assert_eq!(step.lead_ms, expected, "{:?}", step.command);
        }
    }
}
