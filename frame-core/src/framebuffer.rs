//! Framebuffer for the 13.3" Spectra 6 panel
//!
//! The panel is 1600x1200 pixels with 4 bits per pixel (6 colors).
//! Two pixels are packed per byte: high nibble = even x, low nibble = odd x.
//! This is exactly the layout the image server emits, so a downloaded body is
//! copied in verbatim.
//!
//! The framebuffer is allocated from the heap (PSRAM on the board) once per wake
//! cycle. Allocation is fallible so a fragmented heap ends the display step
//! instead of aborting the firmware.

use crate::panel::Color;
use alloc::boxed::Box;
use alloc::vec::Vec;
use log::{debug, warn};

/// Panel width in pixels
pub const WIDTH: usize = 1600;
/// Panel height in pixels
pub const HEIGHT: usize = 1200;
/// Buffer size: 4 bits per pixel, 2 pixels per byte
pub const BUFFER_SIZE: usize = WIDTH * HEIGHT / 2;

/// Framebuffer with the geometry of the physical panel
pub type PanelFrame = Framebuffer<WIDTH, HEIGHT>;

/// The heap could not provide a contiguous buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationError {
    pub requested: usize,
}

/// Packed 4bpp framebuffer of `W` x `H` pixels
pub struct Framebuffer<const W: usize, const H: usize> {
    buffer: Box<[u8]>,
}

impl<const W: usize, const H: usize> Framebuffer<W, H> {
    /// Bytes per displayed row
    pub const ROW_BYTES: usize = W / 2;
    /// Total buffer length in bytes
    pub const LEN: usize = W * H / 2;

    // Even width for nibble pairs, rows divisible into two halves of row pairs
    const GEOMETRY: () = assert!(W % 2 == 0 && H % 4 == 0 && W > 0 && H > 0);

    /// Allocate a framebuffer initialized to white
    pub fn try_new() -> Result<Self, AllocationError> {
        let () = Self::GEOMETRY;

        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(Self::LEN)
            .map_err(|_| AllocationError { requested: Self::LEN })?;
        buffer.resize(Self::LEN, Color::White.to_dual_pixel());

        debug!("Framebuffer allocated: {}x{} ({} bytes)", W, H, Self::LEN);
        Ok(Self {
            buffer: buffer.into_boxed_slice(),
        })
    }

    /// Overwrite the buffer from packed bytes.
    ///
    /// Bytes beyond the capacity are dropped so a slightly oversized body still
    /// displays. Returns the number of bytes copied.
    pub fn load(&mut self, raw: &[u8]) -> usize {
        if raw.len() > Self::LEN {
            warn!(
                "Image data is {} bytes, truncating to {}",
                raw.len(),
                Self::LEN
            );
        }
        self.load_at(0, raw)
    }

    /// Copy a chunk at a byte offset, truncating at the end of the buffer.
    /// Returns the number of bytes copied.
    pub fn load_at(&mut self, offset: usize, chunk: &[u8]) -> usize {
        if offset >= Self::LEN {
            return 0;
        }
        let to_copy = chunk.len().min(Self::LEN - offset);
        self.buffer[offset..offset + to_copy].copy_from_slice(&chunk[..to_copy]);
        to_copy
    }

    /// Read the 4-bit code at (x, y).
    ///
    /// # Panics
    /// If the coordinate is outside the panel.
    #[inline]
    pub fn pixel_at(&self, x: usize, y: usize) -> u8 {
        let byte = self.buffer[Self::index(x, y)];
        if x % 2 == 0 { byte >> 4 } else { byte & 0x0F }
    }

    /// Write a single pixel at (x, y).
    ///
    /// # Panics
    /// If the coordinate is outside the panel.
    #[inline]
    pub fn set_pixel(&mut self, x: usize, y: usize, color: Color) {
        let idx = Self::index(x, y);
        let byte = &mut self.buffer[idx];
        if x % 2 == 0 {
            *byte = (*byte & 0x0F) | (color.to_4bit() << 4);
        } else {
            *byte = (*byte & 0xF0) | color.to_4bit();
        }
    }

    /// Fill a rectangular region with a color
    pub fn fill_rect(&mut self, x: usize, y: usize, width: usize, height: usize, color: Color) {
        for row in y..y + height {
            for col in x..x + width {
                self.set_pixel(col, row, color);
            }
        }
    }

    /// Get the raw buffer slice
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get mutable access to the raw buffer (for streaming a download in)
    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    #[inline]
    fn index(x: usize, y: usize) -> usize {
        assert!(
            x < W && y < H,
            "pixel ({}, {}) outside {}x{} framebuffer",
            x,
            y,
            W,
            H
        );
        y * Self::ROW_BYTES + x / 2
    }
}
