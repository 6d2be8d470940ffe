//! Color codes for the Spectra 6 (6-color) e-paper controllers

/// 6-color palette for Spectra 6 e-paper.
///
/// The discriminants are the 4-bit codes the UC8179 expects on the wire; 0x4 is
/// not a color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum Color {
    /// Black (0x00)
    Black = 0x00,
    /// White (0x01)
    #[default]
    White = 0x01,
    /// Yellow (0x02)
    Yellow = 0x02,
    /// Red (0x03)
    Red = 0x03,
    /// Blue (0x05)
    Blue = 0x05,
    /// Green (0x06)
    Green = 0x06,
}

impl Color {
    /// Get the 4-bit color value
    #[inline]
    pub const fn to_4bit(self) -> u8 {
        self as u8
    }

    /// Get a byte with this color in both pixel positions (for fills)
    #[inline]
    pub const fn to_dual_pixel(self) -> u8 {
        let c = self as u8;
        (c << 4) | c
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_skip_four() {
        let codes = [
            Color::Black,
            Color::White,
            Color::Yellow,
            Color::Red,
            Color::Blue,
            Color::Green,
        ]
        .map(Color::to_4bit);
        assert_eq!(codes, [0x0, 0x1, 0x2, 0x3, 0x5, 0x6]);
    }

    #[test]
    fn test_dual_pixel() {
        assert_eq!(Color::White.to_dual_pixel(), 0x11);
        assert_eq!(Color::Green.to_dual_pixel(), 0x66);
    }
}
