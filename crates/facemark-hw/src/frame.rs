//! Frame type and pixel conversion from YUYV, GREY and RGB24 to packed RGB.

/// A decoded camera frame in packed RGB24.
#[derive(Debug, Clone)]
pub struct Frame {
    /// RGB pixel data (width * height * 3 bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Playback position in milliseconds since the stream started.
    pub timestamp_ms: f64,
    pub sequence: u32,
}

impl Frame {
    /// Wrap an already-decoded RGB24 buffer, validating its length.
    pub fn from_rgb(
        data: Vec<u8>,
        width: u32,
        height: u32,
        timestamp_ms: f64,
    ) -> Result<Self, FrameError> {
        let expected = (width as usize) * (height as usize) * 3;
        if data.len() != expected {
            return Err(FrameError::InvalidLength {
                format: "RGB24",
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            data,
            width,
            height,
            timestamp_ms,
            sequence: 0,
        })
    }
}

/// Convert packed YUYV (4:2:2) to RGB24 using BT.601 limited-range coefficients.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; both pixels share U/V.
pub fn yuyv_to_rgb(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width as usize) * (height as usize);
    let expected = pixels * 2;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }

    let mut rgb = Vec::with_capacity(pixels * 3);
    for quad in yuyv[..expected].chunks_exact(4) {
        let u = quad[1] as f32 - 128.0;
        let v = quad[3] as f32 - 128.0;
        for y in [quad[0], quad[2]] {
            let c = 1.164 * (y as f32 - 16.0);
            rgb.push(clamp_u8(c + 1.596 * v));
            rgb.push(clamp_u8(c - 0.392 * u - 0.813 * v));
            rgb.push(clamp_u8(c + 2.017 * u));
        }
    }
    Ok(rgb)
}

/// Expand 8-bit grayscale to RGB24 by replicating the luma channel.
pub fn grey_to_rgb(gray: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let pixels = (width as usize) * (height as usize);
    if gray.len() < pixels {
        return Err(FrameError::InvalidLength {
            format: "GREY",
            expected: pixels,
            actual: gray.len(),
        });
    }
    Ok(gray[..pixels].iter().flat_map(|&g| [g, g, g]).collect())
}

fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid {format} length: expected {expected}, got {actual}")]
    InvalidLength {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_rgb_black_and_white() {
        // 2x1 image: Y0=16 (black), Y1=235 (white), neutral chroma
        let yuyv = vec![16, 128, 235, 128];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert_eq!(rgb, vec![0, 0, 0, 255, 255, 255]);
    }

    #[test]
    fn test_yuyv_to_rgb_output_length() {
        let yuyv = vec![128u8; 4 * 2 * 2];
        let rgb = yuyv_to_rgb(&yuyv, 4, 2).unwrap();
        assert_eq!(rgb.len(), 4 * 2 * 3);
    }

    #[test]
    fn test_yuyv_to_rgb_red_chroma() {
        // High V pushes red up and green down.
        let yuyv = vec![81, 90, 81, 240];
        let rgb = yuyv_to_rgb(&yuyv, 2, 1).unwrap();
        assert!(rgb[0] > 200, "red channel: {}", rgb[0]);
        assert!(rgb[1] < 50, "green channel: {}", rgb[1]);
    }

    #[test]
    fn test_yuyv_invalid_length() {
        let yuyv = vec![100, 128]; // too short for 2x1
        let result = yuyv_to_rgb(&yuyv, 2, 1);
        assert!(matches!(
            result,
            Err(FrameError::InvalidLength { expected: 4, actual: 2, .. })
        ));
    }

    #[test]
    fn test_grey_to_rgb() {
        let rgb = grey_to_rgb(&[7, 200], 2, 1).unwrap();
        assert_eq!(rgb, vec![7, 7, 7, 200, 200, 200]);
    }

    #[test]
    fn test_grey_too_short() {
        assert!(grey_to_rgb(&[1, 2, 3], 2, 2).is_err());
    }

    #[test]
    fn test_from_rgb_validates_length() {
        assert!(Frame::from_rgb(vec![0; 12], 2, 2, 0.0).is_ok());
        assert!(Frame::from_rgb(vec![0; 11], 2, 2, 0.0).is_err());
    }

    #[test]
    fn test_from_rgb_keeps_timestamp() {
        let frame = Frame::from_rgb(vec![0; 640 * 480 * 3], 640, 480, 16.7).unwrap();
        assert_eq!((frame.width, frame.height), (640, 480));
        assert_eq!(frame.timestamp_ms, 16.7);
        assert_eq!(frame.sequence, 0);
    }
}
