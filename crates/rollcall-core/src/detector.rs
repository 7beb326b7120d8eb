//! SCRFD face detector via ONNX Runtime.
//!
//! Anchor-free SCRFD decoding over three stride levels with NMS
//! post-processing. The input frame is letterboxed into a 640×640
//! square; detections are mapped back to frame coordinates.

use crate::types::BoundingBox;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const CONFIDENCE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Scale and padding applied by the letterbox resize, kept around to map
/// detections back into frame coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

/// Output tensor indices for one stride: (score, bbox, kps).
type StrideSlots = (usize, usize, usize);

/// SCRFD-based face detector.
pub struct FaceDetector {
    session: Session,
    /// Per-stride output slots for strides [8, 16, 32], discovered by
    /// tensor name at load time with a positional fallback.
    stride_slots: [StrideSlots; 3],
}

impl FaceDetector {
    /// Load an SCRFD ONNX model (e.g. det_500m.onnx or det_10g.onnx).
    pub fn load(model_path: &str) -> Result<Self, DetectorError> {
        if !Path::new(model_path).exists() {
            return Err(DetectorError::ModelNotFound(model_path.to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)
            .map_err(ort::Error::from)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> =
            session.outputs().iter().map(|o| o.name().to_string()).collect();

        tracing::info!(
            path = model_path,
            outputs = ?output_names,
            "loaded SCRFD detector"
        );

        if output_names.len() < 9 {
            return Err(DetectorError::InferenceFailed(format!(
                "SCRFD model must expose 9 outputs (3 strides × score/bbox/kps), got {}",
                output_names.len()
            )));
        }

        let stride_slots = map_output_slots(&output_names);
        tracing::debug!(?stride_slots, "SCRFD output tensor mapping");

        Ok(Self { session, stride_slots })
    }

    /// Detect faces in a grayscale frame, returning boxes sorted by
    /// descending confidence.
    pub fn detect(
        &mut self,
        gray: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<BoundingBox>, DetectorError> {
        let (input, letterbox) = preprocess(gray, width as usize, height as usize);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();

        for (pos, &stride) in STRIDES.iter().enumerate() {
            let (score_slot, bbox_slot, kps_slot) = self.stride_slots[pos];

            let (_, scores) = outputs[score_slot]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores stride {stride}: {e}")))?;
            let (_, bboxes) = outputs[bbox_slot]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("bboxes stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_slot]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("kps stride {stride}: {e}")))?;

            candidates.extend(decode_stride(scores, bboxes, kps, stride, &letterbox));
        }

        let mut faces = nms(candidates, NMS_IOU_THRESHOLD);
        faces.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        Ok(faces)
    }
}

/// Letterbox a grayscale frame into the square NCHW input tensor.
///
/// Bilinear resize, then normalization to the SCRFD input distribution.
/// Padding is filled with the mean pixel value so it normalizes to zero.
fn preprocess(gray: &[u8], width: usize, height: usize) -> (Array4<f32>, Letterbox) {
    let scale = (INPUT_SIZE as f32 / width as f32).min(INPUT_SIZE as f32 / height as f32);
    let new_w = (width as f32 * scale).round() as usize;
    let new_h = (height as f32 * scale).round() as usize;
    let pad_x = (INPUT_SIZE - new_w) as f32 / 2.0;
    let pad_y = (INPUT_SIZE - new_h) as f32 / 2.0;

    let resized = bilinear_resize(gray, width, height, new_w, new_h);

    let x_off = pad_x.floor() as usize;
    let y_off = pad_y.floor() as usize;

    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            let inside =
                y >= y_off && y < y_off + new_h && x >= x_off && x < x_off + new_w;
            let pixel = if inside {
                resized[(y - y_off) * new_w + (x - x_off)] as f32
            } else {
                PIXEL_MEAN
            };

            let normalized = (pixel - PIXEL_MEAN) / PIXEL_STD;
            // Grayscale replicated across the three input channels.
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    (tensor, Letterbox { scale, pad_x, pad_y })
}

/// Bilinear grayscale resize with half-pixel-center sampling.
fn bilinear_resize(src: &[u8], sw: usize, sh: usize, dw: usize, dh: usize) -> Vec<u8> {
    let x_ratio = sw as f32 / dw as f32;
    let y_ratio = sh as f32 / dh as f32;

    let mut dst = vec![0u8; dw * dh];
    for y in 0..dh {
        let sy = ((y as f32 + 0.5) * y_ratio - 0.5).max(0.0);
        let y0 = (sy.floor() as usize).min(sh - 1);
        let y1 = (y0 + 1).min(sh - 1);
        let fy = sy - y0 as f32;

        for x in 0..dw {
            let sx = ((x as f32 + 0.5) * x_ratio - 0.5).max(0.0);
            let x0 = (sx.floor() as usize).min(sw - 1);
            let x1 = (x0 + 1).min(sw - 1);
            let fx = sx - x0 as f32;

            let tl = src[y0 * sw + x0] as f32;
            let tr = src[y0 * sw + x1] as f32;
            let bl = src[y1 * sw + x0] as f32;
            let br = src[y1 * sw + x1] as f32;

            let top = tl + (tr - tl) * fx;
            let bot = bl + (br - bl) * fx;
            dst[y * dw + x] = (top + (bot - top) * fy).round().clamp(0.0, 255.0) as u8;
        }
    }
    dst
}

/// Map output tensor names to per-stride (score, bbox, kps) slots.
///
/// Exports with named tensors ("score_8", "bbox_16", "kps_32", ...) are
/// mapped by name. Exports with opaque numeric names fall back to the
/// conventional positional layout: [0-2]=scores, [3-5]=bboxes, [6-8]=kps.
fn map_output_slots(names: &[String]) -> [StrideSlots; 3] {
    let find = |prefix: &str, stride: usize| -> Option<usize> {
        let target = format!("{prefix}_{stride}");
        names.iter().position(|n| n == &target)
    };

    let fully_named = STRIDES.iter().all(|&s| {
        find("score", s).is_some() && find("bbox", s).is_some() && find("kps", s).is_some()
    });

    if fully_named {
        std::array::from_fn(|i| {
            let s = STRIDES[i];
            (
                find("score", s).unwrap(),
                find("bbox", s).unwrap(),
                find("kps", s).unwrap(),
            )
        })
    } else {
        tracing::info!(?names, "SCRFD output names not recognized, assuming positional layout");
        [(0, 3, 6), (1, 4, 7), (2, 5, 8)]
    }
}

/// Decode anchor-free detections for one stride level and map them back
/// from letterboxed space into frame space.
fn decode_stride(
    scores: &[f32],
    bboxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
) -> Vec<BoundingBox> {
    let grid = INPUT_SIZE / stride;
    let num_anchors = grid * grid * ANCHORS_PER_CELL;

    let mut detections = Vec::new();

    for idx in 0..num_anchors {
        let score = scores.get(idx).copied().unwrap_or(0.0);
        if score <= CONFIDENCE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_cx = (cell % grid) as f32 * stride as f32;
        let anchor_cy = (cell / grid) as f32 * stride as f32;

        // Box regression: distances from the anchor center to each edge,
        // in stride units.
        let off = idx * 4;
        if off + 3 >= bboxes.len() {
            continue;
        }
        let x1 = anchor_cx - bboxes[off] * stride as f32;
        let y1 = anchor_cy - bboxes[off + 1] * stride as f32;
        let x2 = anchor_cx + bboxes[off + 2] * stride as f32;
        let y2 = anchor_cy + bboxes[off + 3] * stride as f32;

        // Five landmark points, offsets from the anchor center.
        let koff = idx * 10;
        let landmarks = if koff + 9 < kps.len() {
            let mut points = [(0.0f32, 0.0f32); 5];
            for (i, point) in points.iter_mut().enumerate() {
                let lx = anchor_cx + kps[koff + i * 2] * stride as f32;
                let ly = anchor_cy + kps[koff + i * 2 + 1] * stride as f32;
                *point = (
                    (lx - letterbox.pad_x) / letterbox.scale,
                    (ly - letterbox.pad_y) / letterbox.scale,
                );
            }
            Some(points)
        } else {
            None
        };

        detections.push(BoundingBox {
            x: (x1 - letterbox.pad_x) / letterbox.scale,
            y: (y1 - letterbox.pad_y) / letterbox.scale,
            width: (x2 - x1) / letterbox.scale,
            height: (y2 - y1) / letterbox.scale,
            confidence: score,
            landmarks,
        });
    }

    detections
}

/// Non-maximum suppression keyed on IoU overlap.
fn nms(mut detections: Vec<BoundingBox>, iou_threshold: f32) -> Vec<BoundingBox> {
    detections.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<BoundingBox> = Vec::new();
    let mut suppressed = vec![false; detections.len()];

    for i in 0..detections.len() {
        if suppressed[i] {
            continue;
        }
        for j in (i + 1)..detections.len() {
            if !suppressed[j] && iou(&detections[i], &detections[j]) > iou_threshold {
                suppressed[j] = true;
            }
        }
        keep.push(detections[i].clone());
    }

    keep
}

/// Intersection-over-union of two boxes.
fn iou(a: &BoundingBox, b: &BoundingBox) -> f32 {
    let x1 = a.x.max(b.x);
    let y1 = a.y.max(b.y);
    let x2 = (a.x + a.width).min(b.x + b.width);
    let y2 = (a.y + a.height).min(b.y + b.height);

    let inter = (x2 - x1).max(0.0) * (y2 - y1).max(0.0);
    let union = a.width * a.height + b.width * b.height - inter;

    if union > 0.0 { inter / union } else { 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bbox(x: f32, y: f32, w: f32, h: f32, conf: f32) -> BoundingBox {
        BoundingBox { x, y, width: w, height: h, confidence: conf, landmarks: None }
    }

    #[test]
    fn iou_identical_boxes() {
        let a = bbox(10.0, 10.0, 80.0, 80.0, 1.0);
        assert!((iou(&a, &a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn iou_disjoint_boxes() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(100.0, 100.0, 10.0, 10.0, 1.0);
        assert!(iou(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn iou_half_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0, 1.0);
        let b = bbox(0.0, 5.0, 10.0, 10.0, 1.0);
        // intersection 10x5 = 50, union 200 - 50 = 150
        assert!((iou(&a, &b) - 50.0 / 150.0).abs() < 1e-6);
    }

    #[test]
    fn nms_drops_overlapping_lower_confidence() {
        let dets = vec![
            bbox(0.0, 0.0, 100.0, 100.0, 0.95),
            bbox(4.0, 4.0, 100.0, 100.0, 0.80),
            bbox(300.0, 300.0, 40.0, 40.0, 0.60),
        ];
        let kept = nms(dets, 0.4);
        assert_eq!(kept.len(), 2);
        assert!((kept[0].confidence - 0.95).abs() < 1e-6);
        assert!((kept[1].confidence - 0.60).abs() < 1e-6);
    }

    #[test]
    fn nms_keeps_disjoint_boxes() {
        let dets = vec![
            bbox(0.0, 0.0, 10.0, 10.0, 0.9),
            bbox(60.0, 60.0, 10.0, 10.0, 0.7),
        ];
        assert_eq!(nms(dets, 0.4).len(), 2);
    }

    #[test]
    fn nms_empty_input() {
        assert!(nms(vec![], 0.4).is_empty());
    }

    #[test]
    fn map_output_slots_named() {
        let names: Vec<String> = [
            "score_8", "score_16", "score_32",
            "bbox_8", "bbox_16", "bbox_32",
            "kps_8", "kps_16", "kps_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = map_output_slots(&names);
        assert_eq!(slots, [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn map_output_slots_named_shuffled() {
        let names: Vec<String> = [
            "kps_8", "score_8", "bbox_8",
            "kps_16", "score_16", "bbox_16",
            "kps_32", "score_32", "bbox_32",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let slots = map_output_slots(&names);
        assert_eq!(slots, [(1, 2, 0), (4, 5, 3), (7, 8, 6)]);
    }

    #[test]
    fn map_output_slots_numeric_fallback() {
        let names: Vec<String> = (440..449).map(|i: usize| i.to_string()).collect();
        assert_eq!(map_output_slots(&names), [(0, 3, 6), (1, 4, 7), (2, 5, 8)]);
    }

    #[test]
    fn letterbox_roundtrip() {
        // A 320x240 frame letterboxed into 640x640 and back.
        let scale = (640.0f32 / 320.0).min(640.0 / 240.0);
        let new_w = (320.0 * scale).round();
        let new_h = (240.0 * scale).round();
        let lb = Letterbox {
            scale,
            pad_x: (640.0 - new_w) / 2.0,
            pad_y: (640.0 - new_h) / 2.0,
        };

        let (ox, oy) = (123.0f32, 77.0f32);
        let lx = ox * lb.scale + lb.pad_x;
        let ly = oy * lb.scale + lb.pad_y;
        assert!(((lx - lb.pad_x) / lb.scale - ox).abs() < 0.1);
        assert!(((ly - lb.pad_y) / lb.scale - oy).abs() < 0.1);
    }

    #[test]
    fn bilinear_resize_preserves_uniform_frames() {
        let src = vec![200u8; 64 * 48];
        let dst = bilinear_resize(&src, 64, 48, 128, 96);
        assert_eq!(dst.len(), 128 * 96);
        assert!(dst.iter().all(|&p| p == 200));
    }

    #[test]
    fn decode_stride_skips_low_scores() {
        let grid = INPUT_SIZE / 32;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let scores = vec![0.1f32; anchors];
        let bboxes = vec![1.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        let lb = Letterbox { scale: 1.0, pad_x: 0.0, pad_y: 0.0 };

        assert!(decode_stride(&scores, &bboxes, &kps, 32, &lb).is_empty());
    }

    #[test]
    fn decode_stride_maps_box_to_frame_space() {
        let grid = INPUT_SIZE / 32;
        let anchors = grid * grid * ANCHORS_PER_CELL;
        let mut scores = vec![0.0f32; anchors];
        scores[0] = 0.9;
        // 2 stride-units out in every direction from anchor (0, 0).
        let bboxes = vec![2.0f32; anchors * 4];
        let kps = vec![0.0f32; anchors * 10];
        let lb = Letterbox { scale: 2.0, pad_x: 10.0, pad_y: 20.0 };

        let dets = decode_stride(&scores, &bboxes, &kps, 32, &lb);
        assert_eq!(dets.len(), 1);
        let d = &dets[0];
        // letterboxed box is (-64, -64)..(64, 64)
        assert!((d.x - (-64.0 - 10.0) / 2.0).abs() < 1e-4);
        assert!((d.y - (-64.0 - 20.0) / 2.0).abs() < 1e-4);
        assert!((d.width - 128.0 / 2.0).abs() < 1e-4);
        assert!((d.height - 128.0 / 2.0).abs() < 1e-4);
        assert!(d.landmarks.is_some());
    }
}
