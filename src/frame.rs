//! Captured frames.
//!
//! A `Frame` lives for one loop iteration. The only place frames outlive the
//! iteration is inside an open clip recording, which copies the pixels out.

use anyhow::{anyhow, Result};
use chrono::{DateTime, Local};

/// One RGB24 capture.
#[derive(Clone, Debug)]
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: DateTime<Local>,
}

impl Frame {
    pub fn new(pixels: Vec<u8>, width: u32, height: u32) -> Result<Self> {
        Self::captured(pixels, width, height, Local::now())
    }

    pub fn captured(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        captured_at: DateTime<Local>,
    ) -> Result<Self> {
        let expected = rgb_len(width, height)?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            captured_at,
        })
    }

    /// Uniform frame, mostly useful for synthetic sources and tests.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self> {
        let len = rgb_len(width, height)?;
        let mut pixels = Vec::with_capacity(len);
        for _ in 0..(len / 3) {
            pixels.extend_from_slice(&rgb);
        }
        Self::new(pixels, width, height)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    /// Set one pixel; coordinates outside the frame are ignored.
    pub fn put_pixel(&mut self, x: i64, y: i64, rgb: [u8; 3]) {
        if x < 0 || y < 0 || x >= self.width as i64 || y >= self.height as i64 {
            return;
        }
        let idx = (y as usize * self.width as usize + x as usize) * 3;
        self.pixels[idx..idx + 3].copy_from_slice(&rgb);
    }

    /// Filled square of side `2 * radius + 1` centred on (x, y).
    ///
    /// Dots that cannot touch the frame are skipped.
    pub fn draw_dot(&mut self, x: f32, y: f32, radius: i64, rgb: [u8; 3]) {
        let reach = radius.max(0) as f32;
        if !x.is_finite()
            || !y.is_finite()
            || x < -reach - 0.5
            || y < -reach - 0.5
            || x > self.width as f32 + reach
            || y > self.height as f32 + reach
        {
            return;
        }
        let (cx, cy) = (x.round() as i64, y.round() as i64);
        for dy in -radius..=radius {
            for dx in -radius..=radius {
                self.put_pixel(cx + dx, cy + dy, rgb);
            }
        }
    }

    /// Bresenham line, clipped to the frame before rasterizing.
    pub fn draw_line(&mut self, from: (f32, f32), to: (f32, f32), rgb: [u8; 3]) {
        let Some((from, to)) = self.clip_segment(from, to) else {
            return;
        };
        let (mut x0, mut y0) = (from.0.round() as i64, from.1.round() as i64);
        let (x1, y1) = (to.0.round() as i64, to.1.round() as i64);
        let dx = (x1 - x0).abs();
        let dy = -(y1 - y0).abs();
        let sx = if x0 < x1 { 1 } else { -1 };
        let sy = if y0 < y1 { 1 } else { -1 };
        let mut err = dx + dy;
        loop {
            self.put_pixel(x0, y0, rgb);
            if x0 == x1 && y0 == y1 {
                break;
            }
            let e2 = 2 * err;
            if e2 >= dy {
                err += dy;
                x0 += sx;
            }
            if e2 <= dx {
                err += dx;
                y0 += sy;
            }
        }
    }

    /// Cohen-Sutherland clip of a segment to `[0, w-1] x [0, h-1]`.
    ///
    /// Clipped endpoints land exactly on the edge they crossed. Non-finite
    /// input draws nothing.
    fn clip_segment(
        &self,
        from: (f32, f32),
        to: (f32, f32),
    ) -> Option<((f32, f32), (f32, f32))> {
        const LEFT: u8 = 1;
        const RIGHT: u8 = 2;
        const TOP: u8 = 4;
        const BOTTOM: u8 = 8;

        if self.width == 0 || self.height == 0 {
            return None;
        }
        if ![from.0, from.1, to.0, to.1].iter().all(|v| v.is_finite()) {
            return None;
        }
        let (x_max, y_max) = (f64::from(self.width - 1), f64::from(self.height - 1));
        let outcode = |(x, y): (f64, f64)| {
            let mut code = 0;
            if x < 0.0 {
                code |= LEFT;
            } else if x > x_max {
                code |= RIGHT;
            }
            if y < 0.0 {
                code |= TOP;
            } else if y > y_max {
                code |= BOTTOM;
            }
            code
        };

        let mut p0 = (f64::from(from.0), f64::from(from.1));
        let mut p1 = (f64::from(to.0), f64::from(to.1));
        // each pass moves one endpoint onto an edge
        for _ in 0..8 {
            let (c0, c1) = (outcode(p0), outcode(p1));
            if c0 | c1 == 0 {
                return Some(((p0.0 as f32, p0.1 as f32), (p1.0 as f32, p1.1 as f32)));
            }
            if c0 & c1 != 0 {
                return None;
            }
            let out = if c0 != 0 { c0 } else { c1 };
            let (dx, dy) = (p1.0 - p0.0, p1.1 - p0.1);
            let point = if out & BOTTOM != 0 {
                (p0.0 + dx * (y_max - p0.1) / dy, y_max)
            } else if out & TOP != 0 {
                (p0.0 + dx * (0.0 - p0.1) / dy, 0.0)
            } else if out & RIGHT != 0 {
                (x_max, p0.1 + dy * (x_max - p0.0) / dx)
            } else {
                (0.0, p0.1 + dy * (0.0 - p0.0) / dx)
            };
            if out == c0 {
                p0 = point;
            } else {
                p1 = point;
            }
        }
        None
    }

    pub fn draw_rect(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, rgb: [u8; 3]) {
        self.draw_line((x1, y1), (x2, y1), rgb);
        self.draw_line((x2, y1), (x2, y2), rgb);
        self.draw_line((x2, y2), (x1, y2), rgb);
        self.draw_line((x1, y2), (x1, y1), rgb);
    }

    /// Nearest-neighbour resize to the monitoring resolution.
    ///
    /// Returns the frame unchanged when it already has the requested size.
    pub fn resized(self, width: u32, height: u32) -> Result<Frame> {
        if self.width == width && self.height == height {
            return Ok(self);
        }
        if self.width == 0 || self.height == 0 {
            return Err(anyhow!("cannot resize an empty frame"));
        }
        let len = rgb_len(width, height)?;
        let mut out = Vec::with_capacity(len);
        let (src_w, src_h) = (self.width as usize, self.height as usize);
        for y in 0..height as usize {
            let sy = (y * src_h / height as usize).min(src_h - 1);
            for x in 0..width as usize {
                let sx = (x * src_w / width as usize).min(src_w - 1);
                let idx = (sy * src_w + sx) * 3;
                out.extend_from_slice(&self.pixels[idx..idx + 3]);
            }
        }
        Frame::captured(out, width, height, self.captured_at)
    }
}

pub(crate) fn rgb_len(width: u32, height: u32) -> Result<usize> {
    (width as usize)
        .checked_mul(height as usize)
        .and_then(|v| v.checked_mul(3))
        .ok_or_else(|| anyhow!("frame dimensions overflow"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_wrong_buffer_length() {
        assert!(Frame::new(vec![0u8; 10], 2, 2).is_err());
        assert!(Frame::new(vec![0u8; 12], 2, 2).is_ok());
    }

    #[test]
    fn resize_keeps_capture_time_and_samples_nearest_pixel() {
        let mut pixels = vec![0u8; 2 * 2 * 3];
        // bottom-right pixel is red
        pixels[9] = 255;
        let frame = Frame::new(pixels, 2, 2).unwrap();
        let captured_at = frame.captured_at;

        let big = frame.resized(4, 4).unwrap();
        assert_eq!(big.width, 4);
        assert_eq!(big.captured_at, captured_at);
        assert_eq!(big.pixel(3, 3), Some([255, 0, 0]));
        assert_eq!(big.pixel(2, 2), Some([255, 0, 0]));
        assert_eq!(big.pixel(1, 1), Some([0, 0, 0]));
        assert_eq!(big.pixel(4, 0), None);
    }

    #[test]
    fn drawing_clips_to_frame_bounds() {
        let mut frame = Frame::filled(5, 5, [0, 0, 0]).unwrap();
        frame.draw_line((-3.0, 2.0), (10.0, 2.0), [9, 9, 9]);
        for x in 0..5 {
            assert_eq!(frame.pixel(x, 2), Some([9, 9, 9]));
        }
        assert_eq!(frame.pixel(0, 1), Some([0, 0, 0]));

        frame.draw_dot(0.0, 0.0, 1, [1, 1, 1]);
        assert_eq!(frame.pixel(1, 1), Some([1, 1, 1]));
        frame.draw_rect(1.0, 1.0, 3.0, 4.0, [7, 7, 7]);
        assert_eq!(frame.pixel(3, 4), Some([7, 7, 7]));
        assert_eq!(frame.pixel(2, 3), Some([0, 0, 0]));
    }

    #[test]
    fn far_off_frame_shapes_are_clipped_not_walked() {
        let mut frame = Frame::filled(8, 4, [0, 0, 0]).unwrap();
        frame.draw_rect(1.0, 1.0, 1e20, 3.0, [5, 5, 5]);
        for x in 1..8 {
            assert_eq!(frame.pixel(x, 1), Some([5, 5, 5]));
            assert_eq!(frame.pixel(x, 3), Some([5, 5, 5]));
        }
        assert_eq!(frame.pixel(1, 2), Some([5, 5, 5]));
        assert_eq!(frame.pixel(0, 0), Some([0, 0, 0]));

        let mut frame = Frame::filled(8, 4, [0, 0, 0]).unwrap();
        frame.draw_line((2.0, 2.0), (1e9, 1e9), [6, 6, 6]);
        assert_eq!(frame.pixel(2, 2), Some([6, 6, 6]));
        frame.draw_line((-1e9, 0.0), (-1e9, 3.0), [7, 7, 7]);
        frame.draw_line((0.0, f32::NAN), (3.0, 1.0), [7, 7, 7]);
        frame.draw_line((1.0, f32::INFINITY), (3.0, 1.0), [7, 7, 7]);
        frame.draw_dot(1e9, 1e9, 2, [8, 8, 8]);
        frame.draw_dot(f32::INFINITY, 1.0, 2, [8, 8, 8]);
        assert!(frame.pixels().iter().all(|&v| v != 7 && v != 8));

        frame.draw_line((-f32::MAX, 0.0), (f32::MAX, 0.0), [9, 9, 9]);
        for x in 0..8 {
            assert_eq!(frame.pixel(x, 0), Some([9, 9, 9]));
        }
    }

    #[test]
    fn filled_frame_is_uniform() {
        let frame = Frame::filled(3, 2, [1, 2, 3]).unwrap();
        assert_eq!(frame.pixels().len(), 18);
        assert_eq!(frame.pixel(2, 1), Some([1, 2, 3]));
    }
}
