//! Frame type and image processing — YUYV conversion, dark detection,
//! CLAHE contrast enhancement, horizontal mirroring.

/// A captured grayscale camera frame.
#[derive(Clone)]
pub struct Frame {
    /// Grayscale pixel data (width * height bytes).
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub timestamp: std::time::Instant,
    pub sequence: u32,
    pub is_dark: bool,
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("invalid YUYV length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },
}

/// Convert packed YUYV (4:2:2) to grayscale by extracting the Y channel.
///
/// YUYV packs two pixels per 4 bytes: [Y0, U, Y1, V]; grayscale is every
/// even-indexed byte.
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::InvalidLength {
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Whether more than `threshold_pct` of the pixels fall in the darkest
/// histogram bucket (0–31). Empty frames count as dark.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

/// Mirror a grayscale frame left-to-right in place.
///
/// Attendance subjects face the camera; mirroring keeps the rendered
/// preview in the orientation people expect from a mirror.
pub fn mirror_horizontal(gray: &mut [u8], width: u32, height: u32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || gray.len() < w * h {
        return;
    }
    for row in gray.chunks_exact_mut(w).take(h) {
        row.reverse();
    }
}

/// Contrast-Limited Adaptive Histogram Equalization, in place.
///
/// The frame is divided into a square tile grid; each tile gets a clipped
/// histogram and CDF, and pixels are remapped by bilinear blending of the
/// four surrounding tile CDFs.
pub fn clahe_enhance(gray: &mut [u8], width: u32, height: u32, tiles: u32, clip_limit: f32) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || gray.len() < w * h {
        return;
    }

    let t = tiles as usize;
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }
    let tile_pixels = tile_w * tile_h;

    // Per-tile clipped histograms → normalized CDFs
    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);

    for row in 0..t {
        for col in 0..t {
            let mut hist = [0u32; 256];
            for y in row * tile_h..(row + 1) * tile_h {
                for x in col * tile_w..(col + 1) * tile_w {
                    hist[gray[y * w + x] as usize] += 1;
                }
            }

            let clip = (clip_limit * tile_pixels as f32) as u32;
            let mut excess = 0u32;
            for bin in hist.iter_mut() {
                if *bin > clip {
                    excess += *bin - clip;
                    *bin = clip;
                }
            }
            let redist = excess / 256;
            let leftover = (excess % 256) as usize;
            for (i, bin) in hist.iter_mut().enumerate() {
                *bin += redist;
                if i < leftover {
                    *bin += 1;
                }
            }

            let mut cdf = [0f32; 256];
            cdf[0] = hist[0] as f32;
            for i in 1..256 {
                cdf[i] = cdf[i - 1] + hist[i] as f32;
            }
            let cdf_min = cdf.iter().find(|&&v| v > 0.0).copied().unwrap_or(0.0);
            let denom = tile_pixels as f32 - cdf_min;
            if denom > 0.0 {
                for v in cdf.iter_mut() {
                    *v = ((*v - cdf_min) / denom * 255.0).clamp(0.0, 255.0);
                }
            }
            cdfs.push(cdf);
        }
    }

    // Remap pixels, blending between neighbouring tile CDFs
    for y in 0..h {
        for x in 0..w {
            let pixel = gray[y * w + x] as usize;

            let fy = ((y as f32 / tile_h as f32) - 0.5).clamp(0.0, (t - 1) as f32);
            let fx = ((x as f32 / tile_w as f32) - 0.5).clamp(0.0, (t - 1) as f32);

            let r0 = fy as usize;
            let c0 = fx as usize;
            let r1 = (r0 + 1).min(t - 1);
            let c1 = (c0 + 1).min(t - 1);

            let dy = fy - r0 as f32;
            let dx = fx - c0 as f32;

            let tl = cdfs[r0 * t + c0][pixel];
            let tr = cdfs[r0 * t + c1][pixel];
            let bl = cdfs[r1 * t + c0][pixel];
            let br = cdfs[r1 * t + c1][pixel];

            let top = tl * (1.0 - dx) + tr * dx;
            let bot = bl * (1.0 - dx) + br * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn yuyv_extracts_y_channel() {
        // 2x1 image: [Y0=40, U, Y1=210, V]
        let yuyv = vec![40, 128, 210, 128];
        assert_eq!(yuyv_to_grayscale(&yuyv, 2, 1).unwrap(), vec![40, 210]);
    }

    #[test]
    fn yuyv_larger_frame() {
        let yuyv: Vec<u8> = (0..24).collect();
        let gray = yuyv_to_grayscale(&yuyv, 4, 3).unwrap();
        assert_eq!(gray, vec![0, 2, 4, 6, 8, 10, 12, 14, 16, 18, 20, 22]);
    }

    #[test]
    fn yuyv_rejects_short_buffer() {
        assert!(yuyv_to_grayscale(&[1, 2], 2, 1).is_err());
    }

    #[test]
    fn dark_frame_black() {
        assert!(is_dark_frame(&vec![0u8; 500], 0.95));
    }

    #[test]
    fn dark_frame_lit() {
        assert!(!is_dark_frame(&vec![140u8; 500], 0.95));
    }

    #[test]
    fn dark_frame_empty() {
        assert!(is_dark_frame(&[], 0.95));
    }

    #[test]
    fn dark_frame_threshold_boundary() {
        // 96% dark → dark; 94% dark → not dark
        let mut mostly_dark = vec![5u8; 960];
        mostly_dark.extend(vec![200u8; 40]);
        assert!(is_dark_frame(&mostly_dark, 0.95));

        let mut borderline = vec![5u8; 940];
        borderline.extend(vec![200u8; 60]);
        assert!(!is_dark_frame(&borderline, 0.95));
    }

    #[test]
    fn mirror_reverses_rows() {
        let mut gray = vec![
            1, 2, 3, //
            4, 5, 6,
        ];
        mirror_horizontal(&mut gray, 3, 2);
        assert_eq!(gray, vec![3, 2, 1, 6, 5, 4]);
    }

    #[test]
    fn mirror_twice_is_identity() {
        let original: Vec<u8> = (0..64).collect();
        let mut gray = original.clone();
        mirror_horizontal(&mut gray, 8, 8);
        mirror_horizontal(&mut gray, 8, 8);
        assert_eq!(gray, original);
    }

    #[test]
    fn mirror_short_buffer_is_noop() {
        let mut gray = vec![1, 2, 3];
        mirror_horizontal(&mut gray, 4, 4);
        assert_eq!(gray, vec![1, 2, 3]);
    }

    #[test]
    fn clahe_raises_contrast() {
        // Low-contrast 16x16 frame, values within 100–110.
        let w = 16u32;
        let h = 16u32;
        let mut gray: Vec<u8> = (0..(w * h) as usize).map(|i| 100 + (i % 11) as u8).collect();

        let before = stddev(&gray);
        clahe_enhance(&mut gray, w, h, 2, 0.02);
        let after = stddev(&gray);

        assert!(after > before, "contrast should grow: before={before:.2}, after={after:.2}");
    }

    #[test]
    fn clahe_tiny_frame_is_noop() {
        let mut gray = vec![100u8; 4];
        let copy = gray.clone();
        clahe_enhance(&mut gray, 2, 2, 8, 0.02);
        assert_eq!(gray, copy);
    }

    fn stddev(data: &[u8]) -> f32 {
        let n = data.len() as f32;
        let mean = data.iter().map(|&b| b as f32).sum::<f32>() / n;
        let var = data.iter().map(|&b| (b as f32 - mean).powi(2)).sum::<f32>() / n;
        var.sqrt()
    }
}
