use anyhow::{Context, Result, anyhow};
use fast_image_resize as fir;
use ndarray::Array4;
use rayon::prelude::*;

use crate::types::{Frame, Landmark, NUM_LANDMARKS};

pub const LANDMARK_INPUT_SIZE: u32 = 224;
pub const PALM_INPUT_SIZE: u32 = 192;

/// How a full frame was letterboxed into a square model input.
#[derive(Clone, Debug)]
pub struct LetterboxInfo {
    pub scale: f32,
    pub pad_x: f32,
    pub pad_y: f32,
    pub orig_w: u32,
    pub orig_h: u32,
}

/// How a rotated square crop maps back onto the full frame.
#[derive(Clone, Debug)]
pub struct CropTransform {
    pub center: (f32, f32),
    pub side: f32,
    pub angle: f32,
    pub output_size: u32,
    pub orig_w: u32,
    pub orig_h: u32,
}

fn check_frame(frame: &Frame) -> Result<()> {
    let expected_len = (frame.width as usize)
        .saturating_mul(frame.height as usize)
        .saturating_mul(4);
    if frame.rgba.len() != expected_len {
        return Err(anyhow!(
            "frame buffer size mismatch: got {}, expected {}",
            frame.rgba.len(),
            expected_len
        ));
    }
    Ok(())
}

/// Letterboxes the frame into a `target_size` square and normalizes it into
/// an NHWC float tensor.
pub fn prepare_frame_with_size(
    frame: &Frame,
    target_size: u32,
) -> Result<(Array4<f32>, LetterboxInfo)> {
    check_frame(frame)?;

    let scale = target_size as f32 / (frame.width.max(frame.height) as f32);
    let new_w = (frame.width as f32 * scale).round().max(1.0) as u32;
    let new_h = (frame.height as f32 * scale).round().max(1.0) as u32;

    let src_image = fir::images::Image::from_vec_u8(
        frame.width,
        frame.height,
        frame.rgba.clone(),
        fir::PixelType::U8x4,
    )?;
    let mut dst_image = fir::images::Image::new(new_w, new_h, fir::PixelType::U8x4);
    let mut resizer = fir::Resizer::new();
    let resize_options = fir::ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Interpolation(fir::FilterType::Bilinear));
    resizer
        .resize(&src_image, &mut dst_image, Some(&resize_options))
        .context("fast resize failed")?;
    let resized = dst_image.into_vec();

    let pad_x = ((target_size as i64 - new_w as i64) / 2).max(0) as usize;
    let pad_y = ((target_size as i64 - new_h as i64) / 2).max(0) as usize;
    let mut canvas = vec![0u8; (target_size as usize) * (target_size as usize) * 4];
    for px in canvas.chunks_mut(4) {
        px[3] = 255;
    }
    let dst_stride = target_size as usize * 4;
    let src_stride = new_w as usize * 4;
    for row in 0..(new_h as usize) {
        let dst_offset = (pad_y + row) * dst_stride + pad_x * 4;
        let src_offset = row * src_stride;
        let dst_slice = &mut canvas[dst_offset..dst_offset + src_stride];
        let src_slice = &resized[src_offset..src_offset + src_stride];
        dst_slice.copy_from_slice(src_slice);
    }

    let normalized: Vec<f32> = canvas
        .par_chunks_exact(4)
        .flat_map_iter(|px| {
            [
                px[0] as f32 / 255.0,
                px[1] as f32 / 255.0,
                px[2] as f32 / 255.0,
            ]
        })
        .collect();
    let input = Array4::<f32>::from_shape_vec(
        (1, target_size as usize, target_size as usize, 3),
        normalized,
    )
    .map_err(|err| anyhow!("failed to build input tensor: {err}"))?;

    let letterbox = LetterboxInfo {
        scale,
        pad_x: pad_x as f32,
        pad_y: pad_y as f32,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((input, letterbox))
}

/// Samples a rotated square window out of the frame into an NHWC float
/// tensor, bilinear, zero-padded outside the frame.
pub fn prepare_rotated_crop(
    frame: &Frame,
    center: (f32, f32),
    side: f32,
    angle: f32,
    output_size: u32,
) -> Result<(Array4<f32>, CropTransform)> {
    check_frame(frame)?;

    let mut data =
        Vec::with_capacity((output_size as usize).saturating_mul(output_size as usize * 3));
    let half = output_size as f32 / 2.0;
    let scale = side / output_size as f32;
    let cos = angle.cos();
    let sin = angle.sin();

    for y in 0..output_size {
        let dy = (y as f32 + 0.5 - half) * scale;
        for x in 0..output_size {
            let dx = (x as f32 + 0.5 - half) * scale;
            let src_x = center.0 + dx * cos - dy * sin;
            let src_y = center.1 + dx * sin + dy * cos;
            let rgb = sample_rgb(frame, src_x, src_y);
            data.extend_from_slice(&rgb);
        }
    }

    let array =
        Array4::<f32>::from_shape_vec((1, output_size as usize, output_size as usize, 3), data)
            .map_err(|err| anyhow!("failed to build rotated crop tensor: {err}"))?;

    let transform = CropTransform {
        center,
        side,
        angle,
        output_size,
        orig_w: frame.width,
        orig_h: frame.height,
    };

    Ok((array, transform))
}

/// Splits the landmark model's flat output into crop-space points.
pub fn decode_landmarks(flat: &[f32]) -> Result<Vec<[f32; 3]>> {
    if flat.len() < NUM_LANDMARKS * 3 {
        return Err(anyhow!(
            "unexpected landmarks length: got {}, need {}",
            flat.len(),
            NUM_LANDMARKS * 3
        ));
    }

    let mut landmarks = Vec::with_capacity(NUM_LANDMARKS);
    for chunk in flat.chunks_exact(3).take(NUM_LANDMARKS) {
        landmarks.push([chunk[0], chunk[1], chunk[2]]);
    }
    Ok(landmarks)
}

/// Maps crop-space points back through the crop transform and normalizes
/// them against the full frame: x and y land in `[0, 1]`, z keeps the model's
/// relative-depth convention scaled by frame width.
pub fn normalize_landmarks(raw: &[[f32; 3]], transform: &CropTransform) -> Vec<Landmark> {
    let crop_scale = transform.side / transform.output_size.max(1) as f32;
    let frame_w = transform.orig_w.max(1) as f32;
    let frame_h = transform.orig_h.max(1) as f32;

    raw.iter()
        .map(|[x, y, z]| {
            let (sx, sy) = transform.project(*x, *y);
            Landmark::new(sx / frame_w, sy / frame_h, z * crop_scale / frame_w)
        })
        .collect()
}

impl CropTransform {
    /// Crop-space point to full-frame pixel coordinates, clamped to the
    /// frame.
    pub fn project(&self, x: f32, y: f32) -> (f32, f32) {
        let half = self.output_size as f32 / 2.0;
        let scale = self.side / self.output_size as f32;
        let dx = (x - half) * scale;
        let dy = (y - half) * scale;
        let cos = self.angle.cos();
        let sin = self.angle.sin();
        let ox = self.center.0 + dx * cos - dy * sin;
        let oy = self.center.1 + dx * sin + dy * cos;
        (
            ox.clamp(0.0, (self.orig_w.saturating_sub(1)) as f32),
            oy.clamp(0.0, (self.orig_h.saturating_sub(1)) as f32),
        )
    }
}

fn sample_rgb(frame: &Frame, x: f32, y: f32) -> [f32; 3] {
    if x.is_nan() || y.is_nan() {
        return [0.0, 0.0, 0.0];
    }
    let x0 = x.floor();
    let y0 = y.floor();
    let x1 = x0 + 1.0;
    let y1 = y0 + 1.0;

    let (w, h) = (frame.width as i32, frame.height as i32);
    let fetch = |cx: f32, cy: f32| -> [f32; 3] {
        let ix = cx as i32;
        let iy = cy as i32;
        if ix < 0 || iy < 0 || ix >= w || iy >= h {
            return [0.0, 0.0, 0.0];
        }
        let idx = ((iy as u32 * frame.width + ix as u32) as usize) * 4;
        if idx + 2 >= frame.rgba.len() {
            return [0.0, 0.0, 0.0];
        }
        [
            frame.rgba[idx] as f32 / 255.0,
            frame.rgba[idx + 1] as f32 / 255.0,
            frame.rgba[idx + 2] as f32 / 255.0,
        ]
    };

    let fx = x - x0;
    let fy = y - y0;
    let c00 = fetch(x0, y0);
    let c10 = fetch(x1, y0);
    let c01 = fetch(x0, y1);
    let c11 = fetch(x1, y1);

    let lerp = |a: f32, b: f32, t: f32| a + (b - a) * t;
    [
        lerp(lerp(c00[0], c10[0], fx), lerp(c01[0], c11[0], fx), fy),
        lerp(lerp(c00[1], c10[1], fx), lerp(c01[1], c11[1], fx), fy),
        lerp(lerp(c00[2], c10[2], fx), lerp(c01[2], c11[2], fx), fy),
    ]
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn solid_frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let mut rgba = Vec::with_capacity((width * height * 4) as usize);
        for _ in 0..(width * height) {
            rgba.extend_from_slice(&[rgb[0], rgb[1], rgb[2], 255]);
        }
        Frame {
            rgba,
            width,
            height,
            timestamp: Instant::now(),
        }
    }

    #[test]
    fn letterbox_centers_a_wide_frame() {
        let frame = solid_frame(100, 50, [255, 0, 0]);
        let (input, letterbox) = prepare_frame_with_size(&frame, 224).unwrap();

        assert_eq!(input.shape(), &[1, 224, 224, 3]);
        assert_eq!(letterbox.pad_x, 0.0);
        assert_eq!(letterbox.pad_y, 56.0);
        assert!((letterbox.scale - 2.24).abs() < 1e-6);
        // Padding row is black, content row is red.
        assert_eq!(input[[0, 0, 112, 0]], 0.0);
        assert!((input[[0, 112, 112, 0]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn mismatched_buffer_is_rejected() {
        let mut frame = solid_frame(10, 10, [0, 0, 0]);
        frame.rgba.pop();
        assert!(prepare_frame_with_size(&frame, 224).is_err());
        assert!(prepare_rotated_crop(&frame, (5.0, 5.0), 10.0, 0.0, 32).is_err());
    }

    #[test]
    fn rotated_crop_samples_frame_content() {
        let frame = solid_frame(16, 16, [0, 255, 0]);
        let (input, transform) =
            prepare_rotated_crop(&frame, (8.0, 8.0), 8.0, 0.0, 8).unwrap();

        assert_eq!(input.shape(), &[1, 8, 8, 3]);
        assert!((input[[0, 4, 4, 1]] - 1.0).abs() < 1e-6);
        assert_eq!(transform.output_size, 8);
    }

    #[test]
    fn crop_projection_round_trips_the_center() {
        let transform = CropTransform {
            center: (50.0, 25.0),
            side: 100.0,
            angle: 0.0,
            output_size: 224,
            orig_w: 100,
            orig_h: 50,
        };
        let (x, y) = transform.project(112.0, 112.0);
        assert!((x - 50.0).abs() < 1e-3);
        assert!((y - 25.0).abs() < 1e-3);
    }

    #[test]
    fn normalize_landmarks_maps_into_unit_range() {
        let transform = CropTransform {
            center: (50.0, 25.0),
            side: 100.0,
            angle: 0.0,
            output_size: 224,
            orig_w: 100,
            orig_h: 50,
        };
        let raw = vec![[112.0, 112.0, 22.4]];
        let normalized = normalize_landmarks(&raw, &transform);

        assert!((normalized[0].x - 0.5).abs() < 1e-3);
        assert!((normalized[0].y - 0.5).abs() < 2e-2);
        // z scales by crop side over output size, then by frame width.
        assert!((normalized[0].z - 0.1).abs() < 1e-3);
    }

    #[test]
    fn decode_landmarks_requires_full_output() {
        assert!(decode_landmarks(&[0.0; 10]).is_err());
        let flat: Vec<f32> = (0..63).map(|v| v as f32).collect();
        let decoded = decode_landmarks(&flat).unwrap();
        assert_eq!(decoded.len(), NUM_LANDMARKS);
        assert_eq!(decoded[1], [3.0, 4.0, 5.0]);
    }
}
