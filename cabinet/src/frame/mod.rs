//! The frame model shared by every console family. A frame is a plain RGBA buffer; the cores
//! produce them, the console emulators decorate them, and the [`pipeline`] encodes them for
//! transport.

pub mod pipeline;

use image::imageops;
use image::imageops::FilterType;
use image::RgbaImage;

/// Four bytes per pixel: red, green, blue, alpha.
pub type Rgba = [u8; 4];

/// A rendered screen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame(RgbaImage);

/// An inclusive pixel rectangle, `[x0, y0, x1, y1]`.
pub type Rect = [i64; 4];

/// How a HUD shape is painted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Paint {
    pub fill: Rgba,
    pub outline: Rgba,
}

impl Frame {
    /// Wraps an RGBA buffer. Returns `None` if the buffer does not hold exactly
    /// `width * height` pixels.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Option<Self> {
        if pixels.len() != 4 * width as usize * height as usize {
            return None;
        }
        RgbaImage::from_raw(width, height, pixels).map(Self)
    }

    /// A frame where every pixel is `color`.
    pub fn filled(width: u32, height: u32, color: Rgba) -> Self {
        Self(RgbaImage::from_pixel(width, height, image::Rgba(color)))
    }

    pub fn width(&self) -> u32 {
        self.0.width()
    }

    pub fn height(&self) -> u32 {
        self.0.height()
    }

    pub fn size(&self) -> (u32, u32) {
        self.0.dimensions()
    }

    pub fn is_empty(&self) -> bool {
        self.width() == 0 || self.height() == 0
    }

    pub fn pixels(&self) -> &[u8] {
        self.0.as_raw()
    }

    pub fn into_pixels(self) -> Vec<u8> {
        self.0.into_raw()
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<Rgba> {
        self.0.get_pixel_checked(x, y).map(|px| px.0)
    }

    /// Writes a pixel. Coordinates outside of the frame are ignored.
    pub fn put_pixel(&mut self, x: i64, y: i64, color: Rgba) {
        let (Ok(x), Ok(y)) = (u32::try_from(x), u32::try_from(y)) else {
            return;
        };
        if let Some(px) = self.0.get_pixel_mut_checked(x, y) {
            *px = image::Rgba(color);
        }
    }

    /// Returns a copy of the frame scaled to the given size with nearest-neighbour sampling. An
    /// empty frame scales to a transparent one.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        if (width, height) == self.size() {
            return self.clone();
        }
        if self.is_empty() {
            return Self::filled(width, height, [0; 4]);
        }
        Self(imageops::resize(&self.0, width, height, FilterType::Nearest))
    }

    /// Converts the frame to greyscale with the ITU-R 601-2 luma transform. Like any conversion
    /// to a luminance-only image, the alpha channel is dropped (every pixel becomes opaque).
    pub fn greyscale(&self) -> Self {
        let mut grey = self.0.clone();
        for px in grey.pixels_mut() {
            let [r, g, b, _] = px.0;
            let luma = ((r as u32 * 299 + g as u32 * 587 + b as u32 * 114 + 500) / 1000) as u8;
            *px = image::Rgba([luma, luma, luma, 255]);
        }
        Self(grey)
    }

    /// Pastes `src` with its top-left corner at `(x, y)`, blending by the source alpha.
    pub fn paste_masked(&mut self, src: &Frame, x: i64, y: i64) {
        imageops::overlay(&mut self.0, &src.0, x, y);
    }

    /// Draws a filled rectangle with a one pixel outline. The corners are inclusive.
    pub fn draw_rect(&mut self, [x0, y0, x1, y1]: Rect, paint: Paint) {
        for y in y0..=y1 {
            for x in x0..=x1 {
                let edge = x == x0 || x == x1 || y == y0 || y == y1;
                self.put_pixel(x, y, if edge { paint.outline } else { paint.fill });
            }
        }
    }

    /// Draws a filled ellipse, inscribed in the inclusive rectangle, with a one pixel outline.
    pub fn draw_ellipse(&mut self, [x0, y0, x1, y1]: Rect, paint: Paint) {
        // Work in doubled coordinates so that the centre and the radii stay integral.
        let (cx, cy) = (x0 + x1 + 1, y0 + y1 + 1);
        let (rx, ry) = ((x1 - x0 + 1) as f64, (y1 - y0 + 1) as f64);
        let inside = |x: i64, y: i64, shrink: f64| {
            let (rx, ry) = (rx - shrink, ry - shrink);
            if rx <= 0.0 || ry <= 0.0 {
                return false;
            }
            let dx = (2 * x + 1 - cx) as f64 / rx;
            let dy = (2 * y + 1 - cy) as f64 / ry;
            dx * dx + dy * dy <= 1.0
        };
        for y in y0..=y1 {
            for x in x0..=x1 {
                if inside(x, y, 2.0) {
                    self.put_pixel(x, y, paint.fill);
                } else if inside(x, y, 0.0) {
                    self.put_pixel(x, y, paint.outline);
                }
            }
        }
    }
}

impl From<RgbaImage> for Frame {
    fn from(image: RgbaImage) -> Self {
        Self(image)
    }
}
