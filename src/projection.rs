//! Rendering of pinhole views from equirectangular panoramas.

use crate::{
    camera::PinholeCamera, error::RenderError, frame::Frame, intrinsics::CameraIntrinsics,
    view::View,
};
use image::{Rgb, RgbImage};
use nalgebra::Point2;
use rayon::prelude::*;

/// Renders `view` from the equirectangular `frame`.
///
/// Every output pixel center is unprojected with `intrinsics`, rotated into
/// the panoramic frame by the view's orientation, and resampled bilinearly
/// from the panorama. Longitude wraps around the seam of the panorama while
/// latitude clamps at the poles.
///
/// Rows are rendered in parallel. The output only depends on the arguments.
pub fn render(
    frame: &Frame<'_>,
    view: &View,
    intrinsics: &CameraIntrinsics,
) -> Result<RgbImage, RenderError> {
    let source = Equirect::new(frame.pixels())?;
    let camera = PinholeCamera::for_view(view, *intrinsics);

    let width = intrinsics.width();
    let mut output = RgbImage::new(width, intrinsics.height());
    let row_len = width as usize * 3;

    let buffer: &mut [u8] = &mut output;
    buffer
        .par_chunks_mut(row_len)
        .enumerate()
        .for_each(|(row, pixels)| {
            for (col, pixel) in pixels.chunks_exact_mut(3).enumerate() {
                let sky_point = camera.trace_from_pixel(col as u32, row as u32);
                let Rgb(rgb) = source.sample(&sky_point.to_equirect(source.width, source.height));
                pixel.copy_from_slice(&rgb);
            }
        });

    Ok(output)
}

/// A validated view into an equirectangular RGB buffer.
struct Equirect<'a> {
    raw: &'a [u8],
    width: u32,
    height: u32,
}

impl<'a> Equirect<'a> {
    fn new(image: &'a RgbImage) -> Result<Self, RenderError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(RenderError::EmptyFrame);
        }

        let raw = image.as_raw().as_slice();
        let expected = width as usize * height as usize * 3;
        if raw.len() != expected {
            return Err(RenderError::CorruptFrame {
                width,
                height,
                len: raw.len(),
                expected,
            });
        }

        Ok(Self { raw, width, height })
    }

    fn texel(&self, col: usize, row: usize) -> [f64; 3] {
        let i = (row * self.width as usize + col) * 3;
        [
            self.raw[i] as f64,
            self.raw[i + 1] as f64,
            self.raw[i + 2] as f64,
        ]
    }

    /// Bilinearly samples the panorama at fractional pixel coordinates.
    fn sample(&self, point: &Point2<f64>) -> Rgb<u8> {
        let width = self.width as i64;
        let max_row = self.height as f64 - 1.;

        let x = point.x;
        let y = point.y.clamp(0., max_row);

        let x0 = x.floor();
        let y0 = y.floor();
        let tx = x - x0;
        let ty = y - y0;

        // Columns wrap around the seam.
        let col0 = (x0 as i64).rem_euclid(width) as usize;
        let col1 = (x0 as i64 + 1).rem_euclid(width) as usize;

        // Rows clamp at the poles.
        let row0 = y0 as usize;
        let row1 = (y0 + 1.).min(max_row) as usize;

        let p00 = self.texel(col0, row0);
        let p01 = self.texel(col1, row0);
        let p10 = self.texel(col0, row1);
        let p11 = self.texel(col1, row1);

        let mut rgb = [0u8; 3];
        for c in 0..3 {
            let top = p00[c] + (p01[c] - p00[c]) * tx;
            let bottom = p10[c] + (p11[c] - p10[c]) * tx;
            rgb[c] = (top + (bottom - top) * ty).round().clamp(0., 255.) as u8;
        }

        Rgb(rgb)
    }
}
