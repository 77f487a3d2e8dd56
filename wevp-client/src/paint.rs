// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use crate::buffer::BufferGeometry;

/// A writable view of a surface's current buffer.
pub struct Canvas<'a> {
    pub pixels: &'a mut [u8],
    pub geometry: BufferGeometry,
    pub scale: u32,
}

/// Fills a canvas. Implementations own the pixel content; the surface owns
/// the geometry.
pub trait Painter {
    fn paint(&mut self, canvas: &mut Canvas<'_>, time: u32);
}

impl<P: Painter + ?Sized> Painter for Box<P> {
    fn paint(&mut self, canvas: &mut Canvas<'_>, time: u32) {
        (**self).paint(canvas, time)
    }
}

const BACKGROUND: u32 = 0xff20_2020;
const LINE: u32 = 0xffe0_6c1c;
const GAP: u32 = 0xfff0_f0f0;

/// Scrolling horizontal stripes inside a margin.
#[derive(Debug, Clone)]
pub struct LinePainter {
    margin: u32,
    line_width: u32,
}

impl LinePainter {
    /// Pixels per second.
    const SPEED: u32 = 100;

    pub fn new(margin: u32, line_width: u32) -> Self {
        Self {
            margin,
            line_width: line_width.max(1),
        }
    }
}

impl Painter for LinePainter {
    fn paint(&mut self, canvas: &mut Canvas<'_>, time: u32) {
        let BufferGeometry {
            width,
            height,
            stride,
            ..
        } = canvas.geometry;

        let (width, height) = (width as usize, height as usize);
        let margin = (self.margin * canvas.scale) as usize;
        let band = (self.line_width * canvas.scale) as usize;
        let offset = (time as u64 * Self::SPEED as u64 * canvas.scale as u64 / 1000) as usize;

        let inner_x = margin..width.saturating_sub(margin);
        let inner_y = margin..height.saturating_sub(margin);

        for (y, row) in canvas
            .pixels
            .chunks_exact_mut(stride as usize)
            .take(height)
            .enumerate()
        {
            let stripe = if ((y + offset) / band) % 2 == 0 {
                LINE
            } else {
                GAP
            };

            for (x, px) in row.chunks_exact_mut(4).take(width).enumerate() {
                let color = if inner_y.contains(&y) && inner_x.contains(&x) {
                    stripe
                } else {
                    BACKGROUND
                };

                px.copy_from_slice(&color.to_le_bytes());
            }
        }
    }
}
