//! Frame annotation and status rendering.
//!
//! Detection rectangles are painted straight into the grayscale frame;
//! status text goes to the log instead of an on-screen HUD, and the frame
//! that first confirms a student can be saved as a PNG snapshot.

use chrono::NaiveTime;
use image::{GrayImage, ImageError};
use rollcall_core::BoundingBox;
use std::path::{Path, PathBuf};

/// The line shown below the session status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Banner {
    /// Attendance window has closed for the day.
    Closed,
    /// Waiting for a confirmed identification.
    Prompt,
    /// A student is confirmed present.
    Marked { name: String },
}

/// One frame's worth of status information.
#[derive(Debug, Clone)]
pub struct Overlay {
    pub class_name: String,
    pub class_start: String,
    pub now: NaiveTime,
    /// Seconds left in the window; `None` once closed or still pending.
    pub remaining_secs: Option<u32>,
    pub banner: Banner,
}

impl Overlay {
    /// Render the status text lines.
    pub fn status_lines(&self) -> Vec<String> {
        let mut lines = vec![
            format!("Class: {}", self.class_name),
            format!("Class timing: {}", self.class_start),
            format!("Current time: {}", self.now.format("%H:%M:%S")),
        ];

        if let Some(remaining) = self.remaining_secs {
            lines.push(format!("Time remaining: {remaining}s"));
        }

        match &self.banner {
            Banner::Closed => lines.push("Attendance window closed".to_string()),
            Banner::Prompt => lines.push("Please stand in front of the camera".to_string()),
            Banner::Marked { name } => lines.push(format!(
                "{name}, you are now marked as present in {}",
                self.class_name
            )),
        }

        lines
    }
}

const BOX_THICKNESS: usize = 2;
const BOX_INTENSITY: u8 = 255;

/// Paint a detection rectangle into a grayscale frame in place.
///
/// Coordinates are clamped to the frame; degenerate boxes are skipped.
pub fn draw_box(gray: &mut [u8], width: u32, height: u32, face: &BoundingBox) {
    let w = width as usize;
    let h = height as usize;
    if w == 0 || h == 0 || gray.len() < w * h {
        return;
    }

    let clamp_x = |v: f32| (v.max(0.0) as usize).min(w - 1);
    let clamp_y = |v: f32| (v.max(0.0) as usize).min(h - 1);

    let x1 = clamp_x(face.x);
    let y1 = clamp_y(face.y);
    let x2 = clamp_x(face.x + face.width);
    let y2 = clamp_y(face.y + face.height);
    if x2 <= x1 || y2 <= y1 {
        return;
    }

    for t in 0..BOX_THICKNESS {
        // Horizontal edges
        for x in x1..=x2 {
            let top = (y1 + t).min(h - 1);
            let bottom = y2.saturating_sub(t);
            gray[top * w + x] = BOX_INTENSITY;
            gray[bottom * w + x] = BOX_INTENSITY;
        }
        // Vertical edges
        for y in y1..=y2 {
            let left = (x1 + t).min(w - 1);
            let right = x2.saturating_sub(t);
            gray[y * w + left] = BOX_INTENSITY;
            gray[y * w + right] = BOX_INTENSITY;
        }
    }
}

/// Write the confirming frame of a newly marked student as a PNG.
///
/// Named `<date>_<student_id>.png` inside `snapshot_dir`.
pub fn save_snapshot(
    snapshot_dir: &Path,
    date: &str,
    student_id: &str,
    gray: &[u8],
    width: u32,
    height: u32,
) -> Result<PathBuf, SnapshotError> {
    std::fs::create_dir_all(snapshot_dir)
        .map_err(|e| SnapshotError::CreateDir(snapshot_dir.display().to_string(), e))?;

    let image = GrayImage::from_raw(width, height, gray.to_vec())
        .ok_or(SnapshotError::BadDimensions { width, height })?;

    let path = snapshot_dir.join(format!("{date}_{student_id}.png"));
    image.save(&path)?;
    Ok(path)
}

#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("failed to create snapshot directory {0}")]
    CreateDir(String, #[source] std::io::Error),
    #[error("frame data does not match {width}x{height}")]
    BadDimensions { width: u32, height: u32 },
    #[error("failed to encode snapshot: {0}")]
    Encode(#[from] ImageError),
}
