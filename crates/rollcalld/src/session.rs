//! The attendance session: one camera, one course, one day.
//!
//! `spawn_session` opens every resource up front (fail fast), then runs
//! the frame loop on a dedicated OS thread. The loop is fully
//! synchronous; the async world only holds the cancellation token and
//! joins the thread.

use std::collections::HashSet;
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::NaiveDate;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use rollcall_core::{
    DescriptorExtractor, DetectedFace, EuclideanMatcher, FaceDetector, FramePlan, FrameTracker,
    Identity, Matcher, Roster, TrackedFace,
};
use rollcall_hw::Camera;
use rollcall_store::{AttendanceLedger, MarkOutcome};

use crate::config::Config;

/// Progress log cadence, in frames.
const PROGRESS_EVERY: u64 = 100;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("camera: {0}")]
    Camera(#[from] rollcall_hw::CameraError),
    #[error("detector: {0}")]
    Detector(#[from] rollcall_core::DetectorError),
    #[error("descriptor: {0}")]
    Descriptor(#[from] rollcall_core::DescriptorError),
    #[error("roster: {0}")]
    Roster(#[from] rollcall_core::RosterError),
    #[error("ledger: {0}")]
    Ledger(#[from] rollcall_store::LedgerError),
    #[error("failed to spawn session thread: {0}")]
    Spawn(std::io::Error),
}

/// Counters reported when the session ends.
#[derive(Debug)]
pub struct SessionReport {
    pub frames: u64,
    /// Distinct students whose present flag flipped during this session.
    pub newly_marked: usize,
}

/// Handle to a running session. Cancel the token to stop it after the
/// in-flight frame; join the thread for the report.
pub struct SessionHandle {
    pub token: CancellationToken,
    pub thread: JoinHandle<Result<SessionReport, SessionError>>,
}

/// Everything the frame loop owns.
struct SessionResources {
    camera: Camera,
    detector: FaceDetector,
    extractor: DescriptorExtractor,
    matcher: EuclideanMatcher,
    roster: Roster,
    tracker: FrameTracker,
    ledger: AttendanceLedger,
}

/// Open the camera, models, roster, and ledger, prepopulate the day's
/// attendance rows, and start the frame loop on its own thread.
///
/// Any resource failure here is fatal and reported before a single
/// frame is processed.
pub fn spawn_session(
    config: &Config,
    course_id: i64,
    date: NaiveDate,
) -> Result<SessionHandle, SessionError> {
    let camera = Camera::open(&config.camera_device)?;
    let detector = FaceDetector::load(&config.detector_model_path())?;
    let extractor = DescriptorExtractor::load(&config.descriptor_model_path())?;

    let roster = Roster::load(&config.roster_path)?;
    let matchable = roster.matchable_count();
    if matchable == 0 {
        tracing::warn!(
            entries = roster.len(),
            "roster has no matchable entries, nobody can be recognized this session"
        );
    }

    let ledger = AttendanceLedger::open(&config.db_path)?;
    let students = ledger.enrolled_students()?.len();
    let prepopulated = ledger.prepopulate(course_id, date)?;
    tracing::info!(
        course_id,
        date = %date,
        students,
        matchable,
        prepopulated,
        "attendance rows ready"
    );

    let resources = SessionResources {
        camera,
        detector,
        extractor,
        matcher: EuclideanMatcher::new(config.match_threshold),
        roster,
        tracker: FrameTracker::new(config.reclassify_interval),
        ledger,
    };

    let token = CancellationToken::new();
    let loop_token = token.clone();
    let warmup = config.warmup_frames;

    let thread = std::thread::Builder::new()
        .name("rollcall-session".into())
        .spawn(move || run_session(resources, course_id, date, warmup, loop_token))
        .map_err(SessionError::Spawn)?;

    Ok(SessionHandle { token, thread })
}

fn run_session(
    mut res: SessionResources,
    course_id: i64,
    date: NaiveDate,
    warmup_frames: usize,
    token: CancellationToken,
) -> Result<SessionReport, SessionError> {
    tracing::info!("session thread started");
    let mut stream = res.camera.stream()?;

    if warmup_frames > 0 {
        tracing::debug!(count = warmup_frames, "discarding warmup frames");
        for _ in 0..warmup_frames {
            stream.grab()?;
        }
    }

    let mut marked: HashSet<String> = HashSet::new();
    let mut frames: u64 = 0;
    let mut newly_marked = 0usize;
    let started = Instant::now();

    while !token.is_cancelled() {
        // The only blocking call in the loop. A capture failure here is
        // fatal: without frames there is no session.
        let frame = stream.grab()?;
        frames += 1;

        let detections = match res.detector.detect(&frame.data, frame.width, frame.height) {
            Ok(detections) => detections,
            Err(err) => {
                tracing::warn!(error = %err, sequence = frame.sequence, "detection failed, skipping frame");
                continue;
            }
        };

        let faces = apply_frame(&mut res.tracker, &detections, |det| {
            classify_face(
                &mut res.extractor,
                &res.matcher,
                &res.roster,
                &frame.data,
                frame.width,
                frame.height,
                det,
            )
        });

        newly_marked += mark_recognized(&res.ledger, &mut marked, &faces, course_id, date);

        tracing::debug!(
            sequence = frame.sequence,
            faces = faces.len(),
            names = ?faces.iter().map(TrackedFace::display_name).collect::<Vec<_>>(),
            anchors = ?faces.iter().map(|f| f.label_anchor).collect::<Vec<_>>(),
            "frame processed"
        );

        if frames % PROGRESS_EVERY == 0 {
            let fps = frames as f64 / started.elapsed().as_secs_f64();
            tracing::info!(frames, newly_marked, "session running at {fps:.1} fps");
        }
    }

    tracing::info!(frames, newly_marked, "session stopped");
    Ok(SessionReport {
        frames,
        newly_marked,
    })
}

/// Run one frame through the tracker. On a recognize frame, `classify`
/// is called once per detection; on a carried frame it is never called.
/// Returns the finished frame's faces.
fn apply_frame(
    tracker: &mut FrameTracker,
    detections: &[DetectedFace],
    mut classify: impl FnMut(&DetectedFace) -> Option<Identity>,
) -> Vec<TrackedFace> {
    if tracker.plan(detections) == FramePlan::Recognize {
        let recognized = detections
            .iter()
            .map(|det| TrackedFace {
                identity: classify(det),
                centroid: det.centroid(),
                label_anchor: det.label_anchor(),
            })
            .collect();
        tracker.commit(recognized);
    }
    tracker.current().to_vec()
}

/// Extract a descriptor for one detection and resolve it against the
/// roster. Extraction failures leave the face unknown; the session
/// keeps running.
fn classify_face(
    extractor: &mut DescriptorExtractor,
    matcher: &EuclideanMatcher,
    roster: &Roster,
    frame: &[u8],
    width: u32,
    height: u32,
    det: &DetectedFace,
) -> Option<Identity> {
    let descriptor = match extractor.extract(frame, width, height, det) {
        Ok(descriptor) => descriptor,
        Err(err) => {
            tracing::warn!(error = %err, "descriptor extraction failed, face stays unknown");
            return None;
        }
    };

    let result = matcher.classify(&descriptor, roster.entries());
    match &result.identity {
        Some(identity) => {
            tracing::debug!(code = %identity.code, name = %identity.name, distance = result.distance, "face recognized");
        }
        None => {
            tracing::debug!(distance = result.distance, "face not recognized");
        }
    }
    result.identity
}

/// Write attendance for every face that resolved to a known identity.
///
/// `marked` short-circuits repeat writes for codes this session already
/// settled; the ledger itself stays idempotent regardless. Failed
/// writes are logged and retried naturally the next time the face shows
/// up recognized. Returns how many students were newly marked.
fn mark_recognized(
    ledger: &AttendanceLedger,
    marked: &mut HashSet<String>,
    faces: &[TrackedFace],
    course_id: i64,
    date: NaiveDate,
) -> usize {
    let mut newly = 0;
    for face in faces {
        let Some(identity) = &face.identity else {
            continue;
        };
        if marked.contains(&identity.code) {
            continue;
        }

        match ledger.mark_present(&identity.code, course_id, date) {
            Ok(MarkOutcome::NewlyMarked) => {
                tracing::info!(code = %identity.code, name = %identity.name, "attendance marked");
                marked.insert(identity.code.clone());
                newly += 1;
            }
            Ok(MarkOutcome::AlreadyPresent) => {
                marked.insert(identity.code.clone());
            }
            Ok(MarkOutcome::UnknownStudent) => {
                tracing::warn!(code = %identity.code, name = %identity.name, "recognized face has no student record");
                // Enrollment is fixed for the life of the session, so
                // this cannot resolve itself; silence further warnings.
                marked.insert(identity.code.clone());
            }
            Err(err) => {
                tracing::warn!(code = %identity.code, error = %err, "attendance write failed");
            }
        }
    }
    newly
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(cx: f32, cy: f32) -> DetectedFace {
        DetectedFace {
            left: cx - 15.0,
            top: cy - 15.0,
            right: cx + 15.0,
            bottom: cy + 15.0,
            confidence: 0.95,
            landmarks: [(cx, cy); 5],
        }
    }

    fn identity(code: &str, name: &str) -> Option<Identity> {
        Some(Identity {
            code: code.into(),
            name: name.into(),
        })
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 5, 14).unwrap()
    }

    #[test]
    fn apply_frame_classifies_only_on_recognize_frames() {
        let mut tracker = FrameTracker::new(10);
        let mut calls = 0;

        // First frame: scene change, every detection classified.
        let faces = apply_frame(&mut tracker, &[det(50.0, 50.0)], |_| {
            calls += 1;
            identity("S001", "Alice")
        });
        assert_eq!(calls, 1);
        assert_eq!(faces[0].display_name(), "Alice");

        // Stable frame: carried, no classification.
        let faces = apply_frame(&mut tracker, &[det(53.0, 51.0)], |_| {
            calls += 1;
            None
        });
        assert_eq!(calls, 1);
        assert_eq!(faces[0].display_name(), "Alice");
        assert_eq!(faces[0].centroid, (53.0, 51.0));
    }

    #[test]
    fn apply_frame_recognizes_each_face_after_count_change() {
        let mut tracker = FrameTracker::new(10);
        apply_frame(&mut tracker, &[det(50.0, 50.0)], |_| identity("S001", "Alice"));

        // Bob walks in: both faces are re-recognized from scratch.
        let mut seen = Vec::new();
        let faces = apply_frame(
            &mut tracker,
            &[det(48.0, 50.0), det(200.0, 60.0)],
            |d| {
                seen.push(d.centroid());
                if d.centroid().0 < 100.0 {
                    identity("S001", "Alice")
                } else {
                    identity("S002", "Bob")
                }
            },
        );
        assert_eq!(seen.len(), 2);
        assert_eq!(faces[0].display_name(), "Alice");
        assert_eq!(faces[1].display_name(), "Bob");
    }

    #[test]
    fn marking_is_idempotent_across_frames() {
        let ledger = AttendanceLedger::open_in_memory().unwrap();
        ledger.add_student("S001", "Alice Johnson").unwrap();
        ledger.prepopulate(7, day()).unwrap();

        let mut marked = HashSet::new();
        let faces = vec![TrackedFace {
            identity: identity("S001", "Alice Johnson"),
            centroid: (50.0, 50.0),
            label_anchor: (35.0, 72.5),
        }];

        // The same face recognized on many consecutive frames.
        let mut newly = 0;
        for _ in 0..20 {
            newly += mark_recognized(&ledger, &mut marked, &faces, 7, day());
        }

        assert_eq!(newly, 1);
        assert!(ledger.is_present("S001", 7, day()).unwrap());
        assert_eq!(ledger.roster_row_count(7, day()).unwrap(), 1);
    }

    #[test]
    fn marking_skips_unknown_faces() {
        let ledger = AttendanceLedger::open_in_memory().unwrap();
        ledger.add_student("S001", "Alice Johnson").unwrap();
        ledger.prepopulate(7, day()).unwrap();

        let mut marked = HashSet::new();
        let faces = vec![TrackedFace {
            identity: None,
            centroid: (50.0, 50.0),
            label_anchor: (35.0, 72.5),
        }];

        assert_eq!(mark_recognized(&ledger, &mut marked, &faces, 7, day()), 0);
        assert_eq!(ledger.present_count(7, day()).unwrap(), 0);
    }

    #[test]
    fn marking_survives_a_face_without_a_student_record() {
        let ledger = AttendanceLedger::open_in_memory().unwrap();
        ledger.add_student("S001", "Alice Johnson").unwrap();
        ledger.prepopulate(7, day()).unwrap();

        let mut marked = HashSet::new();
        let faces = vec![
            TrackedFace {
                identity: identity("S404", "Ghost"),
                centroid: (10.0, 10.0),
                label_anchor: (0.0, 20.0),
            },
            TrackedFace {
                identity: identity("S001", "Alice Johnson"),
                centroid: (90.0, 10.0),
                label_anchor: (80.0, 20.0),
            },
        ];

        let newly = mark_recognized(&ledger, &mut marked, &faces, 7, day());
        assert_eq!(newly, 1);
        assert!(ledger.is_present("S001", 7, day()).unwrap());
        assert_eq!(ledger.present_count(7, day()).unwrap(), 1);
    }

    #[test]
    fn a_full_session_day_marks_alice_exactly_once() {
        // End to end over the pure seams: tracker, in-memory ledger, and
        // a scripted classifier standing in for the models.
        let ledger = AttendanceLedger::open_in_memory().unwrap();
        ledger.add_student("S001", "Alice Johnson").unwrap();
        ledger.add_student("S002", "Bob Okafor").unwrap();
        ledger.prepopulate(7, day()).unwrap();

        let mut tracker = FrameTracker::new(10);
        let mut marked = HashSet::new();
        let mut newly = 0;
        let mut classifications = 0;

        // Frame 1: Alice appears and is recognized.
        let faces = apply_frame(&mut tracker, &[det(100.0, 100.0)], |_| {
            classifications += 1;
            identity("S001", "Alice Johnson")
        });
        newly += mark_recognized(&ledger, &mut marked, &faces, 7, day());

        // Frames 2..=30: Alice drifts around, all carried frames.
        for i in 2..=30u32 {
            let wobble = (i % 5) as f32;
            let faces = apply_frame(&mut tracker, &[det(100.0 + wobble, 100.0)], |_| {
                classifications += 1;
                None
            });
            newly += mark_recognized(&ledger, &mut marked, &faces, 7, day());
        }

        assert_eq!(classifications, 1, "carried frames must not re-classify");
        assert_eq!(newly, 1);
        assert!(ledger.is_present("S001", 7, day()).unwrap());
        assert!(!ledger.is_present("S002", 7, day()).unwrap());
        assert_eq!(ledger.present_count(7, day()).unwrap(), 1);
        assert_eq!(ledger.roster_row_count(7, day()).unwrap(), 2);
    }
}
