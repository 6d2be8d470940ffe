//! Buffer transposition for the controller data stream
//!
//! The framebuffer is stored by displayed row, the controllers consume data by
//! output row. Output row `r` is buffer column `W - 1 - r`; within an output row
//! each byte packs two vertically adjacent pixels (even row in the high nibble).
//! The primary controller gets the top half of the buffer rows, the secondary
//! the bottom half, walked with the same column order.

use crate::framebuffer::Framebuffer;

/// Half of the panel owned by one controller
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Half {
    /// Rows `[0, H/2)`
    Primary,
    /// Rows `[H/2, H)`
    Secondary,
}

impl Half {
    /// First buffer row of this half
    pub const fn first_row(self, height: usize) -> usize {
        match self {
            Half::Primary => 0,
            Half::Secondary => height / 2,
        }
    }
}

/// Number of output rows each controller receives
pub const fn output_rows<const W: usize, const H: usize>() -> usize {
    W
}

/// Bytes per output row (half the rows, two pixels per byte)
pub const fn output_row_bytes<const W: usize, const H: usize>() -> usize {
    H / 4
}

/// Fill `dst` with output row `out_row` of `half`.
///
/// `dst` must be exactly `H / 4` bytes.
pub fn transpose_row<const W: usize, const H: usize>(
    frame: &Framebuffer<W, H>,
    half: Half,
    out_row: usize,
    dst: &mut [u8],
) {
    debug_assert_eq!(dst.len(), output_row_bytes::<W, H>());

    let col = W - 1 - out_row;
    let base = half.first_row(H);

    for (k, byte) in dst.iter_mut().enumerate() {
        let even = frame.pixel_at(col, base + 2 * k);
        let odd = frame.pixel_at(col, base + 2 * k + 1);
        *byte = (even << 4) | odd;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::Color;
    use alloc::vec;
    use alloc::vec::Vec;

    type Tiny = Framebuffer<4, 8>;

    fn stream(frame: &Tiny, half: Half) -> Vec<u8> {
        let mut out = Vec::new();
        let mut row = vec![0u8; output_row_bytes::<4, 8>()];
        for r in 0..output_rows::<4, 8>() {
            transpose_row(frame, half, r, &mut row);
            out.extend_from_slice(&row);
        }
        out
    }

    #[test]
    fn test_block_in_primary_half() {
        // 2x2 red block at x=2..3, y=1..2 on white
        let mut frame = Tiny::try_new().unwrap();
        frame.fill_rect(2, 1, 2, 2, Color::Red);

        // Output rows walk columns 3, 2, 1, 0; bytes pair rows (0,1) and (2,3)
        assert_eq!(
            stream(&frame, Half::Primary),
            [0x13, 0x31, 0x13, 0x31, 0x11, 0x11, 0x11, 0x11]
        );
        assert_eq!(stream(&frame, Half::Secondary), [0x11; 8]);
    }

    #[test]
    fn test_secondary_uses_bottom_rows() {
        let mut frame = Tiny::try_new().unwrap();
        frame.set_pixel(0, 7, Color::Blue);
        frame.set_pixel(3, 4, Color::Black);

        // Column 3 comes first, column 0 last
        assert_eq!(
            stream(&frame, Half::Secondary),
            [0x01, 0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x15]
        );
        assert_eq!(stream(&frame, Half::Primary), [0x11; 8]);
    }

    #[test]
    fn test_row_pairs_even_high() {
        let mut frame = Tiny::try_new().unwrap();
        frame.set_pixel(3, 0, Color::Green);
        frame.set_pixel(3, 1, Color::Yellow);

        let mut row = [0u8; 2];
        transpose_row(&frame, Half::Primary, 0, &mut row);
        assert_eq!(row, [0x62, 0x11]);
    }
}
