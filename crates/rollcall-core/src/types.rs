//! Core data types shared across the attendance pipeline.

/// Dimensionality of a face descriptor.
pub const EMBEDDING_DIM: usize = 128;

/// A 128-dimensional face descriptor.
///
/// Descriptors are kept in the raw network output space. The roster
/// averaging contract and the Euclidean match threshold are both defined
/// on raw values, so nothing in the pipeline may renormalize them.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    /// The all-zero placeholder written for identities with no usable
    /// enrollment photos. Never used for matching.
    pub fn zeros() -> Self {
        Self {
            values: vec![0.0; EMBEDDING_DIM],
        }
    }

    /// Euclidean distance to another descriptor.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// True if every coordinate is exactly zero (the placeholder sentinel).
    pub fn is_zero(&self) -> bool {
        self.values.iter().all(|&v| v == 0.0)
    }

    /// Per-dimension arithmetic mean of a set of descriptors.
    ///
    /// An empty set yields the zero placeholder.
    pub fn mean(descriptors: &[Embedding]) -> Embedding {
        if descriptors.is_empty() {
            return Embedding::zeros();
        }

        let mut sums = vec![0.0f32; EMBEDDING_DIM];
        for descriptor in descriptors {
            for (sum, value) in sums.iter_mut().zip(descriptor.values.iter()) {
                *sum += value;
            }
        }

        let count = descriptors.len() as f32;
        Embedding {
            values: sums.into_iter().map(|s| s / count).collect(),
        }
    }
}

/// An enrolled identity: roster code plus display name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    /// Stable roster code (e.g. a roll number). Attendance is keyed on it.
    pub code: String,
    /// Human-readable name, used for logs only.
    pub name: String,
}

/// A face found by the detector, in frame pixel coordinates.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub left: f32,
    pub top: f32,
    pub right: f32,
    pub bottom: f32,
    pub confidence: f32,
    /// Five-point landmarks: [left eye, right eye, nose, left mouth, right mouth].
    /// Required downstream for descriptor alignment.
    pub landmarks: [(f32, f32); 5],
}

impl DetectedFace {
    pub fn width(&self) -> f32 {
        self.right - self.left
    }

    pub fn height(&self) -> f32 {
        self.bottom - self.top
    }

    pub fn area(&self) -> f32 {
        self.width().max(0.0) * self.height().max(0.0)
    }

    /// Box center, used for frame-to-frame identity propagation.
    pub fn centroid(&self) -> (f32, f32) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }

    /// Where a name label for this face belongs: left edge, a quarter of
    /// the box height below the bottom edge.
    pub fn label_anchor(&self) -> (f32, f32) {
        (self.left, self.bottom + self.height() / 4.0)
    }
}

/// A face in the current frame together with whatever identity the
/// tracker has resolved for it. Rebuilt wholesale every frame.
#[derive(Debug, Clone)]
pub struct TrackedFace {
    /// `None` renders as "unknown".
    pub identity: Option<Identity>,
    pub centroid: (f32, f32),
    pub label_anchor: (f32, f32),
}

impl TrackedFace {
    pub fn display_name(&self) -> &str {
        self.identity.as_ref().map_or("unknown", |id| id.name.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(value: f32) -> Embedding {
        Embedding {
            values: vec![value; EMBEDDING_DIM],
        }
    }

    #[test]
    fn euclidean_distance_of_identical_is_zero() {
        let a = filled(0.25);
        assert_eq!(a.euclidean_distance(&a), 0.0);
    }

    #[test]
    fn euclidean_distance_single_axis() {
        let mut a = Embedding::zeros();
        let b = Embedding::zeros();
        a.values[7] = 3.0;
        assert!((a.euclidean_distance(&b) - 3.0).abs() < 1e-6);
    }

    #[test]
    fn euclidean_distance_is_symmetric() {
        let a = filled(0.1);
        let b = filled(0.9);
        assert!((a.euclidean_distance(&b) - b.euclidean_distance(&a)).abs() < 1e-6);
    }

    #[test]
    fn zeros_is_the_sentinel() {
        assert!(Embedding::zeros().is_zero());
        assert_eq!(Embedding::zeros().values.len(), EMBEDDING_DIM);
    }

    #[test]
    fn nonzero_anywhere_is_not_sentinel() {
        let mut e = Embedding::zeros();
        e.values[EMBEDDING_DIM - 1] = 1e-9;
        assert!(!e.is_zero());
    }

    #[test]
    fn mean_is_per_dimension() {
        let descriptors = [filled(1.0), filled(2.0), filled(3.0)];
        let mean = Embedding::mean(&descriptors);
        assert!(mean.values.iter().all(|&v| (v - 2.0).abs() < 1e-6));
    }

    #[test]
    fn mean_of_single_descriptor_is_itself() {
        let d = filled(0.42);
        assert_eq!(Embedding::mean(std::slice::from_ref(&d)), d);
    }

    #[test]
    fn mean_of_empty_set_is_the_sentinel() {
        let mean = Embedding::mean(&[]);
        assert!(mean.is_zero());
        assert_eq!(mean.values.len(), EMBEDDING_DIM);
    }

    #[test]
    fn centroid_is_box_center() {
        let face = DetectedFace {
            left: 10.0,
            top: 20.0,
            right: 30.0,
            bottom: 60.0,
            confidence: 0.9,
            landmarks: [(0.0, 0.0); 5],
        };
        assert_eq!(face.centroid(), (20.0, 40.0));
    }

    #[test]
    fn label_anchor_sits_below_the_box() {
        let face = DetectedFace {
            left: 10.0,
            top: 20.0,
            right: 30.0,
            bottom: 60.0,
            confidence: 0.9,
            landmarks: [(0.0, 0.0); 5],
        };
        // height 40, so the label hangs 10 below the bottom edge
        assert_eq!(face.label_anchor(), (10.0, 70.0));
    }

    #[test]
    fn display_name_falls_back_to_unknown() {
        let face = TrackedFace {
            identity: None,
            centroid: (0.0, 0.0),
            label_anchor: (0.0, 0.0),
        };
        assert_eq!(face.display_name(), "unknown");

        let face = TrackedFace {
            identity: Some(Identity {
                code: "S001".into(),
                name: "Alice Johnson".into(),
            }),
            centroid: (0.0, 0.0),
            label_anchor: (0.0, 0.0),
        };
        assert_eq!(face.display_name(), "Alice Johnson");
    }
}
