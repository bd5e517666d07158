//! Panel abstraction: packed framebuffer and the driver contract.
//!
//! The engine never talks SPI. It draws into a [`FrameBuffer`] (or asks the
//! driver to) and hands the driver a refresh-mode directive; the electrical
//! protocol lives behind the [`PanelDriver`] trait. [`MemoryPanel`] is the
//! host-side reference driver used for development (`--stdout` mode) and for
//! the engine's own tests.

use embedded_graphics::{
    mono_font::{ascii::FONT_10X20, MonoTextStyle},
    pixelcolor::BinaryColor,
    prelude::*,
    text::{Baseline, Text},
};
use thiserror::Error;

/// Native pixel depth of the panel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PixelDepth {
    /// 1 bit per pixel, bit-packed MSB first, 1 = white
    Mono,
    /// 4 bits per pixel, two pixels per byte, high nibble first, 0xF = white
    Gray4,
}

impl PixelDepth {
    pub fn bits(self) -> u32 {
        match self {
            PixelDepth::Mono => 1,
            PixelDepth::Gray4 => 4,
        }
    }

    /// Packed bytes per scanline at this depth.
    pub fn bytes_per_row(self, width: u32) -> usize {
        match self {
            PixelDepth::Mono => width.div_ceil(8) as usize,
            PixelDepth::Gray4 => width.div_ceil(2) as usize,
        }
    }

    /// Total packed buffer size for a panel of these dimensions.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        self.bytes_per_row(width) * height as usize
    }
}

/// The two ink states the engine draws with. Grayscale panels still render
/// text and clears in pure black/white; intermediate levels only ever come
/// from a decoded template.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Color {
    White,
    Black,
}

/// Panel refresh mode, matching the scheduler's decision.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshMode {
    /// Slow whole-panel waveform; clears residual charge
    Full,
    /// Fast windowed waveform; accumulates ghosting
    Partial,
}

/// Panel I/O fault.
#[derive(Error, Debug)]
pub enum DriverError {
    #[error("panel I/O fault: {0}")]
    Io(String),
    #[error("blit size mismatch: got {got} bytes, framebuffer holds {want}")]
    BlitSize { got: usize, want: usize },
}

/// A packed in-memory pixel buffer with the panel's native layout.
///
/// Rows are `bytes_per_row` wide; 1 bpp packs 8 pixels per byte MSB first
/// (1 = white), 4 bpp packs 2 pixels per byte high-nibble first
/// (0xF = white). New buffers start all white.
pub struct FrameBuffer {
    width: u32,
    height: u32,
    depth: PixelDepth,
    pixels: Vec<u8>,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, depth: PixelDepth) -> Self {
        Self {
            width,
            height,
            depth,
            pixels: vec![0xFF; depth.buffer_len(width, height)],
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn depth(&self) -> PixelDepth {
        self.depth
    }

    pub fn data(&self) -> &[u8] {
        &self.pixels
    }

    /// Overwrite the whole buffer from an equally sized packed source
    /// (a decoded template).
    pub fn overwrite(&mut self, source: &[u8]) -> Result<(), DriverError> {
        if source.len() != self.pixels.len() {
            return Err(DriverError::BlitSize {
                got: source.len(),
                want: self.pixels.len(),
            });
        }
        self.pixels.copy_from_slice(source);
        Ok(())
    }

    pub fn set_pixel(&mut self, x: u32, y: u32, color: Color) {
        if x >= self.width || y >= self.height {
            return;
        }
        let bytes_per_row = self.depth.bytes_per_row(self.width);
        match self.depth {
            PixelDepth::Mono => {
                let index = y as usize * bytes_per_row + (x / 8) as usize;
                let mask = 0x80 >> (x % 8);
                match color {
                    Color::White => self.pixels[index] |= mask,
                    Color::Black => self.pixels[index] &= !mask,
                }
            }
            PixelDepth::Gray4 => {
                let index = y as usize * bytes_per_row + (x / 2) as usize;
                let (mask, nibble) = if x % 2 == 0 {
                    (0x0F, if color == Color::White { 0xF0 } else { 0x00 })
                } else {
                    (0xF0, if color == Color::White { 0x0F } else { 0x00 })
                };
                self.pixels[index] = (self.pixels[index] & mask) | nibble;
            }
        }
    }

    /// True when the pixel is fully white (4 bpp: the 0xF level).
    pub fn is_white(&self, x: u32, y: u32) -> bool {
        if x >= self.width || y >= self.height {
            return true;
        }
        let bytes_per_row = self.depth.bytes_per_row(self.width);
        match self.depth {
            PixelDepth::Mono => {
                let byte = self.pixels[y as usize * bytes_per_row + (x / 8) as usize];
                byte & (0x80 >> (x % 8)) != 0
            }
            PixelDepth::Gray4 => {
                let byte = self.pixels[y as usize * bytes_per_row + (x / 2) as usize];
                let nibble = if x % 2 == 0 { byte >> 4 } else { byte & 0x0F };
                nibble == 0x0F
            }
        }
    }

    pub fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Color) {
        for py in y..y.saturating_add(h).min(self.height) {
            for px in x..x.saturating_add(w).min(self.width) {
                self.set_pixel(px, py, color);
            }
        }
    }

    pub fn clear(&mut self, color: Color) {
        let byte = match (self.depth, color) {
            (_, Color::White) => 0xFF,
            (_, Color::Black) => 0x00,
        };
        self.pixels.fill(byte);
    }

    /// Draw a text line with its top-left corner at (x, y).
    pub fn draw_text(&mut self, x: u32, y: u32, text: &str) {
        let style = MonoTextStyle::new(&FONT_10X20, BinaryColor::On);
        let anchor = Point::new(x as i32, y as i32);
        // Error type is Infallible; out-of-bounds pixels are clipped above.
        let _ = Text::with_baseline(text, anchor, style, Baseline::Top).draw(self);
    }
}

impl OriginDimensions for FrameBuffer {
    fn size(&self) -> Size {
        Size::new(self.width, self.height)
    }
}

impl DrawTarget for FrameBuffer {
    type Color = BinaryColor;
    type Error = core::convert::Infallible;

    fn draw_iter<I>(&mut self, pixels: I) -> Result<(), Self::Error>
    where
        I: IntoIterator<Item = Pixel<Self::Color>>,
    {
        for Pixel(point, color) in pixels {
            if point.x >= 0 && point.y >= 0 {
                let ink = if color.is_on() {
                    Color::Black
                } else {
                    Color::White
                };
                self.set_pixel(point.x as u32, point.y as u32, ink);
            }
        }
        Ok(())
    }
}

/// The driver contract the scheduler draws through.
///
/// Implementations are synchronous and blocking; `refresh` with
/// `blocking = true` must not return until the panel is idle again.
pub trait PanelDriver {
    /// Replace the panel's backing image with a packed full-screen bitmap
    /// (the decoded template), without refreshing.
    fn blit(&mut self, pixels: &[u8]) -> Result<(), DriverError>;

    /// Fill a rectangle with a flat color, without refreshing.
    fn fill_rect(&mut self, x: u32, y: u32, w: u32, h: u32, color: Color)
        -> Result<(), DriverError>;

    /// Draw a text line with its top-left corner at (x, y), without
    /// refreshing.
    fn draw_text(&mut self, x: u32, y: u32, text: &str) -> Result<(), DriverError>;

    /// Push the drawn image to the glass using the given waveform.
    fn refresh(&mut self, mode: RefreshMode, blocking: bool) -> Result<(), DriverError>;
}

/// One recorded driver operation, kept by [`MemoryPanel`] so tests can
/// assert exactly what the scheduler asked for.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PanelOp {
    Blit,
    FillRect { x: u32, y: u32, w: u32, h: u32 },
    Text { x: u32, y: u32, text: String },
    Refresh(RefreshMode),
}

/// In-memory panel driver: renders into a [`FrameBuffer`] and records every
/// operation. Doubles as the `--stdout` development display.
pub struct MemoryPanel {
    frame: FrameBuffer,
    ops: Vec<PanelOp>,
}

impl MemoryPanel {
    pub fn new(width: u32, height: u32, depth: PixelDepth) -> Self {
        Self {
            frame: FrameBuffer::new(width, height, depth),
            ops: Vec::new(),
        }
    }

    pub fn frame(&self) -> &FrameBuffer {
        &self.frame
    }

    pub fn ops(&self) -> &[PanelOp] {
        &self.ops
    }

    pub fn clear_ops(&mut self) {
        self.ops.clear();
    }

    /// Count of completed refreshes in the given mode.
    pub fn refresh_count(&self, mode: RefreshMode) -> usize {
        self.ops
            .iter()
            .filter(|op| matches!(op, PanelOp::Refresh(m) if *m == mode))
            .count()
    }

    /// Coarse ASCII rendering of the frame for terminal development mode.
    /// Samples the buffer down to a fixed character grid; '#' is ink.
    pub fn dump_ascii(&self) -> String {
        const COLS: u32 = 100;
        const ROWS: u32 = 40;
        let x_step = (self.frame.width() / COLS).max(1);
        let y_step = (self.frame.height() / ROWS).max(1);

        let mut out = String::with_capacity(((COLS + 1) * ROWS) as usize);
        let mut y = 0;
        while y < self.frame.height() {
            let mut x = 0;
            while x < self.frame.width() {
                out.push(if self.frame.is_white(x, y) { ' ' } else { '#' });
                x += x_step;
            }
            out.push('\n');
            y += y_step;
        }
        out
    }
}

impl PanelDriver for MemoryPanel {
    fn blit(&mut self, pixels: &[u8]) -> Result<(), DriverError> {
        self.frame.overwrite(pixels)?;
        self.ops.push(PanelOp::Blit);
        Ok(())
    }

    fn fill_rect(
        &mut self,
        x: u32,
        y: u32,
        w: u32,
        h: u32,
        color: Color,
    ) -> Result<(), DriverError> {
        self.frame.fill_rect(x, y, w, h, color);
        self.ops.push(PanelOp::FillRect { x, y, w, h });
        Ok(())
    }

    fn draw_text(&mut self, x: u32, y: u32, text: &str) -> Result<(), DriverError> {
        self.frame.draw_text(x, y, text);
        self.ops.push(PanelOp::Text {
            x,
            y,
            text: text.to_string(),
        });
        Ok(())
    }

    fn refresh(&mut self, mode: RefreshMode, _blocking: bool) -> Result<(), DriverError> {
        self.ops.push(PanelOp::Refresh(mode));
        Ok(())
    }
}
