//! Frame type and pixel conversion — YUYV/MJPG to RGB, dark detection, JPEG stills.

use image::{ImageFormat, RgbImage};
use presence_core::types::StillError;
use presence_core::Still;

/// A captured RGB camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Packed RGB8 pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub captured_at: std::time::Instant,
    /// Driver sequence number, for log correlation.
    pub sequence: u32,
}

impl Frame {
    /// Average luma (0.0–255.0).
    pub fn avg_brightness(&self) -> f32 {
        let gray = luma(&self.data);
        if gray.is_empty() {
            return 0.0;
        }
        gray.iter().map(|&b| b as f32).sum::<f32>() / gray.len() as f32
    }

    /// Encode as a JPEG still for submission.
    pub fn to_still(&self, quality: u8) -> Result<Still, FrameError> {
        let rgb = RgbImage::from_raw(self.width, self.height, self.data.clone()).ok_or(
            FrameError::InvalidLength {
                expected: (self.width * self.height * 3) as usize,
                actual: self.data.len(),
            },
        )?;
        Ok(Still::from_rgb(&rgb, quality)?)
    }
}

fn clamp_u8(v: i32) -> u8 {
    v.clamp(0, 255) as u8
}

/// Convert packed YUYV (4:2:2) to packed RGB8 using BT.601 coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share
/// the chroma pair.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for chunk in yuyv[..expected].chunks_exact(4) {
        let d = chunk[1] as i32 - 128;
        let e = chunk[3] as i32 - 128;
        for y in [chunk[0], chunk[2]] {
            let c = 298 * (y as i32 - 16);
            rgb.push(clamp_u8((c + 409 * e + 128) >> 8));
            rgb.push(clamp_u8((c - 100 * d - 208 * e + 128) >> 8));
            rgb.push(clamp_u8((c + 516 * d + 128) >> 8));
        }
    }
    Ok(rgb)
}

/// Decode one MJPG buffer to packed RGB8, returning the decoded dimensions.
pub fn mjpeg_to_rgb(buf: &[u8]) -> Result<(Vec<u8>, u32, u32), FrameError> {
    let img = image::load_from_memory_with_format(buf, ImageFormat::Jpeg)
        .map_err(|e| FrameError::Decode(e.to_string()))?
        .to_rgb8();
    let (w, h) = img.dimensions();
    Ok((img.into_raw(), w, h))
}

/// Luma plane of a packed RGB8 buffer.
pub fn luma(rgb: &[u8]) -> Vec<u8> {
    rgb.chunks_exact(3)
        .map(|p| {
            let y = 0.299 * p[0] as f32 + 0.587 * p[1] as f32 + 0.114 * p[2] as f32;
            y.round().clamp(0.0, 255.0) as u8
        })
        .collect()
}

/// Luma values below this count as black.
const DARK_LUMA: u8 = 32;

/// Whether more than `max_dark_fraction` of the pixels are black. An empty
/// plane counts as dark.
pub fn is_dark_frame(gray: &[u8], max_dark_fraction: f32) -> bool {
    match gray.len() {
        0 => true,
        total => {
            let black = gray.iter().filter(|&&y| y < DARK_LUMA).count();
            black as f32 > max_dark_fraction * total as f32
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid buffer length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
    #[error("MJPG decode failed: {0}")]
    Decode(String),
    #[error(transparent)]
    Encode(#[from] StillError),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(width: u32, height: u32, rgb: [u8; 3]) -> Frame {
        let data = rgb
            .iter()
            .copied()
            .cycle()
            .take((width * height * 3) as usize)
            .collect();
        Frame {
            data,
            width,
            height,
            captured_at: std::time::Instant::now(),
            sequence: 0,
        }
    }

    #[test]
    fn test_yuyv_black_and_white() {
        // 2x1 image: both pixels share U=V=128 (no chroma)
        let black = yuyv_to_rgb(&[16, 128, 16, 128], 2, 1).unwrap();
        assert_eq!(black, vec![0, 0, 0, 0, 0, 0]);

        let white = yuyv_to_rgb(&[235, 128, 235, 128], 2, 1).unwrap();
        assert_eq!(white, vec![255; 6]);
    }

    #[test]
    fn test_yuyv_mid_gray() {
        let gray = yuyv_to_rgb(&[126, 128, 126, 128], 2, 1).unwrap();
        assert_eq!(gray, vec![128; 6]);
    }

    #[test]
    fn test_yuyv_red_chroma() {
        // Strong V pushes red up and green down.
        let rgb = yuyv_to_rgb(&[81, 90, 81, 240], 2, 1).unwrap();
        assert!(rgb[0] > 200, "red channel: {}", rgb[0]);
        assert!(rgb[1] < 60, "green channel: {}", rgb[1]);
    }

    #[test]
    fn test_yuyv_short_buffer() {
        let err = yuyv_to_rgb(&[100, 128], 2, 1).unwrap_err();
        assert!(matches!(err, FrameError::InvalidLength { expected: 4, actual: 2 }));
    }

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(&[255, 255, 255, 0, 0, 0]), vec![255, 0]);
        assert_eq!(luma(&[0, 255, 0]), vec![150]);
    }

    #[test]
    fn test_dark_detection() {
        assert!(is_dark_frame(&[], 0.95));
        assert!(is_dark_frame(&[3u8; 64], 0.95));
        assert!(!is_dark_frame(&[200u8; 64], 0.95));

        // 90 black + 10 lit pixels: dark at a 0.8 cutoff, not at 0.95.
        let mostly_black: Vec<u8> = (0..100).map(|i| if i < 90 { 5 } else { 140 }).collect();
        assert!(is_dark_frame(&mostly_black, 0.8));
        assert!(!is_dark_frame(&mostly_black, 0.95));
    }

    #[test]
    fn test_frame_to_still_and_back() {
        let still = frame(16, 12, [90, 140, 200]).to_still(90).unwrap();
        assert_eq!((still.width, still.height), (16, 12));

        let (rgb, w, h) = mjpeg_to_rgb(&still.bytes).unwrap();
        assert_eq!((w, h), (16, 12));
        assert_eq!(rgb.len(), 16 * 12 * 3);
    }

    #[test]
    fn test_frame_to_still_short_buffer() {
        let mut f = frame(4, 4, [1, 2, 3]);
        f.data.truncate(10);
        assert!(matches!(f.to_still(90), Err(FrameError::InvalidLength { .. })));
    }

    #[test]
    fn test_avg_brightness() {
        assert!((frame(4, 4, [128, 128, 128]).avg_brightness() - 128.0).abs() < 0.5);
    }
}
