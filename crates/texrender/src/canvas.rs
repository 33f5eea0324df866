//! Software drawing onto locked stream buffers.
//!
//! Only what the generated-bitmap source needs: a two-stop linear gradient
//! and block text from an embedded 5x7 font.

use image::{ImageBuffer, Rgba};

use crate::stream::{PixelFormat, SurfaceBuffer, SurfaceError};

const GLYPH_WIDTH: u32 = 5;
const GLYPH_HEIGHT: u32 = 7;
const GLYPH_ADVANCE: u32 = GLYPH_WIDTH + 1;

pub const GRADIENT_TOP: Rgba<u8> = Rgba([0x1E, 0x3C, 0xB4, 0xFF]);
pub const GRADIENT_BOTTOM: Rgba<u8> = Rgba([0xF0, 0x8C, 0x28, 0xFF]);
pub const TEXT_COLOR: Rgba<u8> = Rgba([0xFF, 0xFF, 0xFF, 0xFF]);

/// A mutable RGBA view over a locked [`SurfaceBuffer`].
pub struct Canvas<'a> {
    image: ImageBuffer<Rgba<u8>, &'a mut [u8]>,
}

impl<'a> Canvas<'a> {
    pub fn new(buffer: &'a mut SurfaceBuffer) -> Result<Self, SurfaceError> {
        let format = buffer.format();
        if format != PixelFormat::Rgba8888 {
            return Err(SurfaceError::UnsupportedFormat(format));
        }
        let (width, height) = (buffer.width(), buffer.height());
        let geometry = buffer.geometry();
        let image = ImageBuffer::from_raw(width, height, buffer.bits_mut()).ok_or(
            SurfaceError::GeometryMismatch {
                expected: geometry,
                actual: geometry,
            },
        )?;
        Ok(Self { image })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    /// Fills the whole canvas with a vertical gradient from `top` to `bottom`.
    pub fn fill_vertical_gradient(&mut self, top: Rgba<u8>, bottom: Rgba<u8>) {
        let span = self.image.height().saturating_sub(1).max(1) as f32;
        for (_, y, pixel) in self.image.enumerate_pixels_mut() {
            let t = y as f32 / span;
            *pixel = lerp(top, bottom, t);
        }
    }

    /// Draws `text` with its top-left corner at `(x, y)`, each font pixel
    /// scaled to a `scale`-sized square. Pixels off the canvas are clipped.
    pub fn draw_text(&mut self, x: i64, y: i64, scale: u32, color: Rgba<u8>, text: &str) {
        let scale = scale.max(1);
        let mut pen_x = x;
        for ch in text.chars() {
            let rows = glyph(ch);
            for (row, bits) in rows.iter().enumerate() {
                for column in 0..GLYPH_WIDTH {
                    if bits & (1 << (GLYPH_WIDTH - 1 - column)) == 0 {
                        continue;
                    }
                    let left = pen_x + i64::from(column * scale);
                    let top = y + row as i64 * i64::from(scale);
                    self.fill_rect(left, top, scale, scale, color);
                }
            }
            pen_x += i64::from(GLYPH_ADVANCE * scale);
        }
    }

    /// Draws `text` centred on the canvas at the largest scale that fits.
    pub fn draw_text_centered(&mut self, color: Rgba<u8>, text: &str) {
        let (text_width, _) = text_extent(text, 1);
        if text_width == 0 {
            return;
        }
        let fit_x = self.width() / text_width;
        let fit_y = self.height() / GLYPH_HEIGHT;
        let scale = fit_x.min(fit_y).clamp(1, 8);
        let (width, height) = text_extent(text, scale);
        let x = (i64::from(self.width()) - i64::from(width)) / 2;
        let y = (i64::from(self.height()) - i64::from(height)) / 2;
        self.draw_text(x, y, scale, color, text);
    }

    fn fill_rect(&mut self, x: i64, y: i64, width: u32, height: u32, color: Rgba<u8>) {
        let (canvas_width, canvas_height) = (i64::from(self.width()), i64::from(self.height()));
        let x0 = x.clamp(0, canvas_width);
        let y0 = y.clamp(0, canvas_height);
        let x1 = (x + i64::from(width)).clamp(0, canvas_width);
        let y1 = (y + i64::from(height)).clamp(0, canvas_height);
        for py in y0..y1 {
            for px in x0..x1 {
                self.image.put_pixel(px as u32, py as u32, color);
            }
        }
    }
}

/// Width and height in pixels of `text` at `scale`, without trailing spacing.
pub fn text_extent(text: &str, scale: u32) -> (u32, u32) {
    let count = text.chars().count() as u32;
    if count == 0 {
        return (0, 0);
    }
    let width = (count * GLYPH_ADVANCE - 1) * scale;
    (width, GLYPH_HEIGHT * scale)
}

fn lerp(from: Rgba<u8>, to: Rgba<u8>, t: f32) -> Rgba<u8> {
    let t = t.clamp(0.0, 1.0);
    let mut out = [0u8; 4];
    for (channel, value) in out.iter_mut().enumerate() {
        let a = f32::from(from.0[channel]);
        let b = f32::from(to.0[channel]);
        *value = (a + (b - a) * t).round() as u8;
    }
    Rgba(out)
}

/// Row bitmaps, most significant of the low five bits is the leftmost pixel.
fn glyph(ch: char) -> [u8; 7] {
    match ch.to_ascii_uppercase() {
        ' ' => [0x00; 7],
        'A' => [0x0E, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1E],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ',' => [0x00, 0x00, 0x00, 0x00, 0x0C, 0x04, 0x08],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '!' => [0x04, 0x04, 0x04, 0x04, 0x04, 0x00, 0x04],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        _ => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x00, 0x04],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gles::{Gles, RecordingGles, TextureTarget};
    use crate::stream::StreamTexture;

    fn locked(width: u32, height: u32, format: PixelFormat) -> (StreamTexture, SurfaceBuffer) {
        let mut gl = RecordingGles::new(1, 1);
        let texture = gl.create_texture().unwrap();
        let stream = StreamTexture::new(texture, TextureTarget::Texture2d);
        let surface = stream.surface();
        surface.set_buffers_geometry(width, height, format).unwrap();
        let buffer = surface.lock().unwrap();
        (stream, buffer)
    }

    #[test]
    fn gradient_runs_top_to_bottom() {
        let (_stream, mut buffer) = locked(3, 5, PixelFormat::Rgba8888);
        let mut canvas = Canvas::new(&mut buffer).unwrap();
        canvas.fill_vertical_gradient(GRADIENT_TOP, GRADIENT_BOTTOM);
        drop(canvas);

        let bits = buffer.bits();
        assert_eq!(&bits[..4], &GRADIENT_TOP.0);
        let last_row = (5 - 1) * 3 * 4;
        assert_eq!(&bits[last_row..last_row + 4], &GRADIENT_BOTTOM.0);
    }

    #[test]
    fn text_marks_pixels_and_clips() {
        let (_stream, mut buffer) = locked(16, 16, PixelFormat::Rgba8888);
        let mut canvas = Canvas::new(&mut buffer).unwrap();
        canvas.draw_text(-3, 12, 2, TEXT_COLOR, "T");
        drop(canvas);

        // Top bar of the T lands on row 12; columns left of x=0 are clipped.
        let row = 12 * 16 * 4;
        assert_eq!(&buffer.bits()[row..row + 4], &TEXT_COLOR.0);
        assert!(buffer.bits().iter().filter(|&&b| b == 0xFF).count() > 0);
    }

    #[test]
    fn centered_text_stays_inside() {
        let (_stream, mut buffer) = locked(64, 32, PixelFormat::Rgba8888);
        let mut canvas = Canvas::new(&mut buffer).unwrap();
        canvas.draw_text_centered(TEXT_COLOR, "GL TEST");
        drop(canvas);

        let lit = buffer
            .bits()
            .chunks_exact(4)
            .filter(|px| *px == TEXT_COLOR.0)
            .count();
        assert!(lit > 0);
    }

    #[test]
    fn extent_ignores_trailing_gap() {
        assert_eq!(text_extent("", 3), (0, 0));
        assert_eq!(text_extent("AB", 1), (11, 7));
        assert_eq!(text_extent("AB", 2), (22, 14));
    }

    #[test]
    fn non_rgba_buffers_are_refused() {
        let (_stream, mut buffer) = locked(2, 2, PixelFormat::Rgb565);
        assert_eq!(
            Canvas::new(&mut buffer).err(),
            Some(SurfaceError::UnsupportedFormat(PixelFormat::Rgb565))
        );
    }
}
