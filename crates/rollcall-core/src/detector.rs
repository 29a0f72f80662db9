//! SCRFD face detection via ONNX Runtime.
//!
//! The frame is letterboxed into a 640x640 tensor, the three stride
//! levels (8/16/32, two anchors per cell) are decoded anchor-free, and
//! overlapping candidates are pruned with NMS before mapping everything
//! back to frame coordinates.

use crate::types::DetectedFace;
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::Path;
use thiserror::Error;

/// File name of the detection model inside the model directory.
pub const DETECTOR_MODEL_FILE: &str = "det_10g.onnx";

const INPUT_SIZE: usize = 640;
const PIXEL_MEAN: f32 = 127.5;
const PIXEL_STD: f32 = 128.0;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_IOU_THRESHOLD: f32 = 0.4;
const STRIDES: [usize; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
/// 3 strides x (score, bbox, kps) tensors.
const EXPECTED_OUTPUTS: usize = 9;

#[derive(Error, Debug)]
pub enum DetectorError {
    #[error("detector model not found: {0}")]
    ModelNotFound(String),
    #[error("detector inference failed: {0}")]
    InferenceFailed(String),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Letterbox geometry, used to map detections back to frame coordinates.
struct Letterbox {
    scale: f32,
    pad_x: f32,
    pad_y: f32,
}

impl Letterbox {
    /// Fit a `src_width` x `src_height` frame into a `dst` square,
    /// preserving aspect ratio and centering the content.
    fn fit(src_width: usize, src_height: usize, dst: usize) -> Letterbox {
        let scale = (dst as f32 / src_width as f32).min(dst as f32 / src_height as f32);
        let content_w = (src_width as f32 * scale).round();
        let content_h = (src_height as f32 * scale).round();
        Letterbox {
            scale,
            pad_x: (dst as f32 - content_w) / 2.0,
            pad_y: (dst as f32 - content_h) / 2.0,
        }
    }

    /// Map a point in letterboxed tensor space back to frame space.
    fn to_frame(&self, x: f32, y: f32) -> (f32, f32) {
        ((x - self.pad_x) / self.scale, (y - self.pad_y) / self.scale)
    }
}

/// Per-stride output tensor positions: (score, bbox, kps).
type OutputTriple = (usize, usize, usize);

/// SCRFD face detector. Construction loads the ONNX session; every
/// detection after that is CPU inference on a letterboxed tensor.
pub struct FaceDetector {
    session: Session,
    /// Output tensor positions for strides 8/16/32, discovered by name at
    /// load time with a positional fallback.
    outputs: [OutputTriple; 3],
}

impl FaceDetector {
    pub fn load(model_path: &Path) -> Result<Self, DetectorError> {
        if !model_path.exists() {
            return Err(DetectorError::ModelNotFound(
                model_path.display().to_string(),
            ));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(model_path)?;

        let output_names: Vec<String> = session
            .outputs()
            .iter()
            .map(|o| o.name().to_string())
            .collect();

        tracing::info!(
            path = %model_path.display(),
            outputs = ?output_names,
            "detector model loaded"
        );

        if output_names.len() < EXPECTED_OUTPUTS {
            return Err(DetectorError::InferenceFailed(format!(
                "detection model must expose {EXPECTED_OUTPUTS} outputs, got {}",
                output_names.len()
            )));
        }

        Ok(Self {
            session,
            outputs: map_outputs(&output_names),
        })
    }

    /// Detect faces in a grayscale frame.
    ///
    /// Returns detections in descending confidence order; an empty vector
    /// is a perfectly normal result.
    pub fn detect(
        &mut self,
        frame: &[u8],
        width: u32,
        height: u32,
    ) -> Result<Vec<DetectedFace>, DetectorError> {
        let letterbox = Letterbox::fit(width as usize, height as usize, INPUT_SIZE);
        let input = preprocess(frame, width as usize, height as usize, &letterbox);

        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        let mut candidates = Vec::new();
        for (slot, &stride) in STRIDES.iter().enumerate() {
            let (score_idx, bbox_idx, kps_idx) = self.outputs[slot];

            let (_, scores) = outputs[score_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("scores, stride {stride}: {e}")))?;
            let (_, boxes) = outputs[bbox_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("boxes, stride {stride}: {e}")))?;
            let (_, kps) = outputs[kps_idx]
                .try_extract_tensor::<f32>()
                .map_err(|e| DetectorError::InferenceFailed(format!("landmarks, stride {stride}: {e}")))?;

            decode_stride(scores, boxes, kps, stride, &letterbox, &mut candidates);
        }

        Ok(nms(candidates, NMS_IOU_THRESHOLD))
    }
}

/// Build the NCHW input tensor: letterbox the grayscale frame into the
/// square, sampling bilinearly, and replicate the channel three times.
/// Padding uses the pixel mean so it normalizes to zero.
fn preprocess(frame: &[u8], width: usize, height: usize, letterbox: &Letterbox) -> Array4<f32> {
    let mut tensor = Array4::<f32>::zeros((1, 3, INPUT_SIZE, INPUT_SIZE));
    let inv_scale = 1.0 / letterbox.scale;

    for y in 0..INPUT_SIZE {
        for x in 0..INPUT_SIZE {
            // Center-aligned inverse mapping of this tensor pixel.
            let src_x = (x as f32 - letterbox.pad_x + 0.5) * inv_scale - 0.5;
            let src_y = (y as f32 - letterbox.pad_y + 0.5) * inv_scale - 0.5;

            let in_content = src_x > -1.0
                && src_x < width as f32
                && src_y > -1.0
                && src_y < height as f32;

            let pixel = if in_content {
                bilinear_sample(frame, width, height, src_x, src_y)
            } else {
                PIXEL_MEAN
            };

            let normalized = (pixel - PIXEL_MEAN) / PIXEL_STD;
            tensor[[0, 0, y, x]] = normalized;
            tensor[[0, 1, y, x]] = normalized;
            tensor[[0, 2, y, x]] = normalized;
        }
    }

    tensor
}

fn bilinear_sample(frame: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    let x0 = (x.floor() as i32).clamp(0, width as i32 - 1) as usize;
    let y0 = (y.floor() as i32).clamp(0, height as i32 - 1) as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = (x - x.floor()).clamp(0.0, 1.0);
    let fy = (y - y.floor()).clamp(0.0, 1.0);

    let tl = frame[y0 * width + x0] as f32;
    let tr = frame[y0 * width + x1] as f32;
    let bl = frame[y1 * width + x0] as f32;
    let br = frame[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}

/// Resolve output tensor positions for each stride.
///
/// Some SCRFD exports name their outputs ("score_8", "bbox_16", ...);
/// others use opaque numeric names. Named outputs are matched directly,
/// anything else falls back to the conventional layout of three score
/// tensors, then three box tensors, then three landmark tensors.
fn map_outputs(names: &[String]) -> [OutputTriple; 3] {
    let position = |prefix: &str, stride: usize| {
        let wanted = format!("{prefix}_{stride}");
        names.iter().position(|n| *n == wanted)
    };

    let all_named = STRIDES.iter().all(|&s| {
        position("score", s).is_some() && position("bbox", s).is_some() && position("kps", s).is_some()
    });

    if all_named {
        std::array::from_fn(|i| {
            let s = STRIDES[i];
            (
                position("score", s).unwrap_or(i),
                position("bbox", s).unwrap_or(3 + i),
                position("kps", s).unwrap_or(6 + i),
            )
        })
    } else {
        tracing::debug!(?names, "detector outputs unnamed, assuming positional layout");
        std::array::from_fn(|i| (i, 3 + i, 6 + i))
    }
}

/// Decode one stride level into frame-space detections.
fn decode_stride(
    scores: &[f32],
    boxes: &[f32],
    kps: &[f32],
    stride: usize,
    letterbox: &Letterbox,
    out: &mut Vec<DetectedFace>,
) {
    let grid = INPUT_SIZE / stride;
    let anchors = grid * grid * ANCHORS_PER_CELL;

    for idx in 0..anchors {
        let Some(&score) = scores.get(idx) else {
            break;
        };
        if score <= SCORE_THRESHOLD {
            continue;
        }

        let cell = idx / ANCHORS_PER_CELL;
        let anchor_x = ((cell % grid) * stride) as f32;
        let anchor_y = ((cell / grid) * stride) as f32;

        // Boxes are left/top/right/bottom offsets from the anchor center,
        // in stride units. Landmarks are center offsets per point.
        let b = idx * 4;
        let k = idx * 10;
        if b + 3 >= boxes.len() || k + 9 >= kps.len() {
            break;
        }

        let (left, top) = letterbox.to_frame(
            anchor_x - boxes[b] * stride as f32,
            anchor_y - boxes[b + 1] * stride as f32,
        );
        let (right, bottom) = letterbox.to_frame(
            anchor_x + boxes[b + 2] * stride as f32,
            anchor_y + boxes[b + 3] * stride as f32,
        );

        let landmarks = std::array::from_fn(|p| {
            letterbox.to_frame(
                anchor_x + kps[k + p * 2] * stride as f32,
                anchor_y + kps[k + p * 2 + 1] * stride as f32,
            )
        });

        out.push(DetectedFace {
            left,
            top,
            right,
            bottom,
            confidence: score,
            landmarks,
        });
    }
}

/// Greedy non-maximum suppression. Returns survivors in descending
/// confidence order.
fn nms(mut candidates: Vec<DetectedFace>, iou_threshold: f32) -> Vec<DetectedFace> {
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let mut keep: Vec<DetectedFace> = Vec::new();
    for candidate in candidates {
        if keep.iter().all(|kept| iou(kept, &candidate) <= iou_threshold) {
            keep.push(candidate);
        }
    }
    keep
}

/// Intersection-over-union of two detections.
fn iou(a: &DetectedFace, b: &DetectedFace) -> f32 {
    let inter_w = (a.right.min(b.right) - a.left.max(b.left)).max(0.0);
    let inter_h = (a.bottom.min(b.bottom) - a.top.max(b.top)).max(0.0);
    let inter = inter_w * inter_h;
    let union = a.area() + b.area() - inter;

    if union > 0.0 {
        inter / union
    } else {
        0.0
    }
}
