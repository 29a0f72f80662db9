//! Frame-to-frame identity continuity.
//!
//! Descriptor extraction and roster classification are two orders of
//! magnitude slower than detection, so they only run when the scene
//! changes or a reclassification is due. In between, identities ride
//! along on nearest-centroid assignment from the previous frame.
//!
//! Known limitation: nearest-centroid assignment can swap identities when
//! two faces cross paths within one frame interval. The periodic forced
//! reclassification bounds how long such a swap can persist.

use crate::types::{DetectedFace, TrackedFace};

/// Stable frames containing an unknown face before recognition is forced.
pub const DEFAULT_RECLASSIFY_INTERVAL: u32 = 10;

/// What the caller must do to finish the current frame.
#[derive(Debug, PartialEq, Eq)]
pub enum FramePlan {
    /// Identities were carried forward by nearest centroid and the frame
    /// is already committed. Read it back with [`FrameTracker::current`].
    Carried,
    /// The scene changed or the reclassification interval elapsed. Run
    /// recognition on every detection, ignoring all prior assignments,
    /// and hand the results to [`FrameTracker::commit`].
    Recognize,
}

/// Tracks which identity each on-screen face belongs to across frames.
pub struct FrameTracker {
    reclassify_interval: u32,
    /// Consecutive carried frames in which at least one face was unknown.
    unknown_streak: u32,
    previous: Vec<TrackedFace>,
}

impl FrameTracker {
    pub fn new(reclassify_interval: u32) -> Self {
        Self {
            reclassify_interval,
            unknown_streak: 0,
            previous: Vec::new(),
        }
    }

    /// Decide how to handle the detections of the current frame.
    ///
    /// When the face count matches the previous frame and no forced
    /// reclassification is due, each detection takes the identity of the
    /// nearest previous-frame centroid and the frame commits itself.
    /// Otherwise the tracker resets its reclassification counter and asks
    /// the caller to recognize from scratch.
    pub fn plan(&mut self, detections: &[DetectedFace]) -> FramePlan {
        let stable = detections.len() == self.previous.len()
            && self.unknown_streak < self.reclassify_interval;

        if !stable {
            self.unknown_streak = 0;
            return FramePlan::Recognize;
        }

        let carried: Vec<TrackedFace> = detections
            .iter()
            .map(|det| TrackedFace {
                identity: self.nearest_previous_identity(det.centroid()),
                centroid: det.centroid(),
                label_anchor: det.label_anchor(),
            })
            .collect();

        if carried.iter().any(|face| face.identity.is_none()) {
            self.unknown_streak += 1;
        } else {
            self.unknown_streak = 0;
        }

        self.previous = carried;
        FramePlan::Carried
    }

    /// Install freshly recognized faces as the current frame. An empty set
    /// clears every tracked identity (the scene emptied out).
    pub fn commit(&mut self, recognized: Vec<TrackedFace>) {
        self.previous = recognized;
    }

    /// The faces of the most recently completed frame.
    pub fn current(&self) -> &[TrackedFace] {
        &self.previous
    }

    fn nearest_previous_identity(&self, centroid: (f32, f32)) -> Option<crate::types::Identity> {
        let mut best_distance = f32::INFINITY;
        let mut best: Option<&TrackedFace> = None;

        for prev in &self.previous {
            let dx = prev.centroid.0 - centroid.0;
            let dy = prev.centroid.1 - centroid.1;
            let distance = (dx * dx + dy * dy).sqrt();
            if distance < best_distance {
                best_distance = distance;
                best = Some(prev);
            }
        }

        best.and_then(|face| face.identity.clone())
    }
}

impl Default for FrameTracker {
    fn default() -> Self {
        Self::new(DEFAULT_RECLASSIFY_INTERVAL)
    }
}
