use chrono::Utc;
use rollcall_core::similarity::{self, MotionAccumulator, SimilarityError, SimilarityPolicy};
use rollcall_core::{Accepted, AttendanceError, Classroom, Method, StoreError, TemplateStore};
use rollcall_hw::{CameraError, Frame, FrameError, FrameSource, OpenCamera};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

use crate::config::FALLBACK_ENROLL_HEIGHT;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Attendance(#[from] AttendanceError),
    #[error("camera unavailable: {0}")]
    CameraUnavailable(#[from] CameraError),
    #[error("no face template enrolled for {0}")]
    NoTemplateEnrolled(String),
    #[error("liveness check failed (motion score {score:.1})")]
    LivenessFailed { score: f64 },
    #[error("face mismatch (difference score {score:.1})")]
    FaceMismatch { score: f64 },
    #[error("a check-in is already running for {0}")]
    CheckInInProgress(String),
    #[error("check-in cancelled")]
    Cancelled,
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("similarity error: {0}")]
    Similarity(#[from] SimilarityError),
    #[error("template store error: {0}")]
    Store(#[from] StoreError),
    #[error("capture worker failed: {0}")]
    Worker(String),
}

/// Shared classroom state. Every mutation holds the lock to completion.
pub type SharedClassroom = Arc<Mutex<Classroom>>;

/// Clone-safe handle to the face check-in engine.
///
/// Enrollment and recognition each open the camera for their own
/// sequence and drop it when the sequence ends, however it ends.
#[derive(Clone)]
pub struct FaceEngine {
    inner: Arc<Inner>,
}

struct Inner {
    classroom: SharedClassroom,
    store: Arc<dyn TemplateStore>,
    camera: Arc<dyn OpenCamera>,
    policy: SimilarityPolicy,
    enroll_width: u32,
    /// Busy flags: the running sequence per student, tagged with a ticket.
    in_flight: StdMutex<HashMap<String, (u64, AbortHandle)>>,
    next_ticket: AtomicU64,
}

impl FaceEngine {
    pub fn new(
        classroom: SharedClassroom,
        store: Arc<dyn TemplateStore>,
        camera: Arc<dyn OpenCamera>,
        policy: SimilarityPolicy,
        enroll_width: u32,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                classroom,
                store,
                camera,
                policy,
                enroll_width,
                in_flight: StdMutex::new(HashMap::new()),
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    pub fn has_template(&self, student_id: &str) -> Result<bool, EngineError> {
        Ok(self.inner.store.load(student_id)?.is_some())
    }

    /// Capture one snapshot and store it as the student's template.
    pub async fn enroll(&self, student_id: &str) -> Result<(), EngineError> {
        self.inner
            .classroom
            .lock()
            .await
            .ensure_can_check_in(student_id)?;

        let source = open_camera(self.inner.camera.clone()).await?;
        let (_source, frame) = capture(source).await?;
        let snapshot = self.inner.snapshot(&frame)?;
        self.inner
            .store
            .save(student_id, &snapshot.to_data_url()?)?;

        tracing::info!(
            student = student_id,
            width = snapshot.width,
            height = snapshot.height,
            "face enrolled"
        );
        Ok(())
    }

    /// Run liveness and match for `student_id`, then record a face check-in.
    ///
    /// Only one sequence per student runs at a time; a second request
    /// while one is in flight fails with `CheckInInProgress`. The sequence
    /// can be aborted with [`cancel`](Self::cancel), which makes this
    /// return `Cancelled`.
    pub async fn recognize(&self, student_id: &str) -> Result<Accepted, EngineError> {
        let handle = {
            let mut in_flight = self.inner.lock_in_flight();
            if in_flight.contains_key(student_id) {
                return Err(EngineError::CheckInInProgress(student_id.to_string()));
            }
            let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
            let inner = self.inner.clone();
            let id = student_id.to_string();
            let handle = tokio::spawn(async move {
                let _guard = InFlightGuard {
                    inner: inner.clone(),
                    student_id: id.clone(),
                    ticket,
                };
                inner.run_recognition(&id).await
            });
            in_flight.insert(student_id.to_string(), (ticket, handle.abort_handle()));
            handle
        };

        match handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => {
                tracing::info!(student = student_id, "recognition cancelled");
                Err(EngineError::Cancelled)
            }
            Err(e) => Err(EngineError::Worker(e.to_string())),
        }
    }

    /// Abort the in-flight recognition for `student_id`, if any.
    pub fn cancel(&self, student_id: &str) -> bool {
        match self.inner.lock_in_flight().remove(student_id) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn is_busy(&self, student_id: &str) -> bool {
        self.inner.lock_in_flight().contains_key(student_id)
    }
}

impl Inner {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, (u64, AbortHandle)>> {
        self.in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn run_recognition(&self, student_id: &str) -> Result<Accepted, EngineError> {
        self.classroom
            .lock()
            .await
            .ensure_can_check_in(student_id)?;

        let blob = self
            .store
            .load(student_id)?
            .ok_or_else(|| EngineError::NoTemplateEnrolled(student_id.to_string()))?;
        let template = Frame::from_data_url(&blob)?;

        let source = open_camera(self.camera.clone()).await?;
        let source = self.check_liveness(source).await?;

        let (_source, frame) = capture(source).await?;
        let size = self.policy.match_size;
        let probe = self.snapshot(&frame)?.resize(size, size)?;
        let reference = template.resize(size, size)?;
        let matched = similarity::check_match(
            &probe.data,
            &reference.data,
            size,
            self.policy.match_threshold,
        )?;
        tracing::debug!(student = student_id, score = matched.score, "match scored");
        if !matched.matched {
            return Err(EngineError::FaceMismatch {
                score: matched.score,
            });
        }

        let accepted = self
            .classroom
            .lock()
            .await
            .check_in(student_id, Method::Face, Utc::now())?;
        Ok(accepted)
    }

    /// Sample frames at the configured cadence and score motion between them.
    async fn check_liveness(
        &self,
        mut source: Box<dyn FrameSource>,
    ) -> Result<Box<dyn FrameSource>, EngineError> {
        let interval = Duration::from_millis(self.policy.liveness_interval_ms);
        let mut acc: Option<MotionAccumulator> = None;
        let mut dims = (0, 0);

        for _ in 0..self.policy.liveness_samples {
            let (next, frame) = capture(source).await?;
            source = next;
            let acc = acc.get_or_insert_with(|| {
                let width = self.policy.liveness_width;
                dims = (width, self.policy.liveness_height(frame.width, frame.height));
                MotionAccumulator::new(dims.0, dims.1)
            });
            acc.push(frame.resize(dims.0, dims.1)?.data)?;
            tokio::time::sleep(interval).await;
        }

        let result = acc
            .map(|acc| acc.finish(self.policy.liveness_threshold))
            .ok_or(SimilarityError::Empty)?;
        tracing::debug!(
            score = result.motion_score,
            pairs = result.frame_pairs,
            live = result.is_live,
            "liveness scored"
        );
        if !result.is_live {
            return Err(EngineError::LivenessFailed {
                score: result.motion_score,
            });
        }
        Ok(source)
    }

    /// Downscale a captured frame to the stored snapshot size.
    fn snapshot(&self, frame: &Frame) -> Result<Frame, FrameError> {
        let width = self.enroll_width;
        let height = similarity::proportional_height(
            width,
            frame.width,
            frame.height,
            FALLBACK_ENROLL_HEIGHT,
        );
        frame.resize(width, height)
    }
}

/// Clears a student's busy flag when their sequence finishes or is aborted.
struct InFlightGuard {
    inner: Arc<Inner>,
    student_id: String,
    ticket: u64,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut in_flight = self.inner.lock_in_flight();
        // A cancelled sequence must not clear the flag of its successor.
        if matches!(in_flight.get(&self.student_id), Some((t, _)) if *t == self.ticket) {
            in_flight.remove(&self.student_id);
        }
    }
}

async fn open_camera(camera: Arc<dyn OpenCamera>) -> Result<Box<dyn FrameSource>, EngineError> {
    let source = tokio::task::spawn_blocking(move || camera.open())
        .await
        .map_err(|e| EngineError::Worker(e.to_string()))?
        .map_err(|e| {
            tracing::warn!(error = %e, "camera unavailable");
            e
        })?;
    Ok(source)
}

/// Capture one frame on a blocking thread, handing the source back.
async fn capture(
    mut source: Box<dyn FrameSource>,
) -> Result<(Box<dyn FrameSource>, Frame), EngineError> {
    let (source, frame) = tokio::task::spawn_blocking(move || {
        let frame = source.capture_frame();
        (source, frame)
    })
    .await
    .map_err(|e| EngineError::Worker(e.to_string()))?;
    let frame = frame?;
    tracing::trace!(sequence = frame.sequence, "frame captured");
    Ok((source, frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{default_roster, CheckInPolicy, MemoryTemplateStore, Status};
    use rollcall_hw::ScriptedSource;
    use std::sync::atomic::AtomicUsize;

    /// Hands out a fresh copy of a scripted source on every open.
    struct ScriptedCamera {
        frames: Vec<Frame>,
        opens: AtomicUsize,
    }

    impl OpenCamera for ScriptedCamera {
        fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(ScriptedSource::new(self.frames.clone())))
        }
    }

    /// Reports how many frames each opened source served once it is dropped.
    struct CountingCamera {
        frames: Vec<Frame>,
        opens: AtomicUsize,
        served: Arc<StdMutex<Vec<usize>>>,
    }

    struct CountingSource {
        inner: ScriptedSource,
        served: Arc<StdMutex<Vec<usize>>>,
    }

    impl OpenCamera for CountingCamera {
        fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
            self.opens.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingSource {
                inner: ScriptedSource::new(self.frames.clone()),
                served: self.served.clone(),
            }))
        }
    }

    impl FrameSource for CountingSource {
        fn capture_frame(&mut self) -> Result<Frame, CameraError> {
            self.inner.capture_frame()
        }
    }

    impl Drop for CountingSource {
        fn drop(&mut self) {
            self.served.lock().unwrap().push(self.inner.captured());
        }
    }

    struct MissingCamera;

    impl OpenCamera for MissingCamera {
        fn open(&self) -> Result<Box<dyn FrameSource>, CameraError> {
            Err(CameraError::PermissionDenied("/dev/video0".into()))
        }
    }

    fn solid(value: u8) -> Frame {
        Frame::from_rgb(vec![value; 64 * 48 * 3], 64, 48).unwrap()
    }

    fn policy(interval_ms: u64) -> SimilarityPolicy {
        SimilarityPolicy {
            liveness_interval_ms: interval_ms,
            ..SimilarityPolicy::default()
        }
    }

    async fn setup(
        camera: Arc<dyn OpenCamera>,
        interval_ms: u64,
    ) -> (FaceEngine, SharedClassroom, Arc<MemoryTemplateStore>) {
        let classroom = Arc::new(Mutex::new(Classroom::new(
            default_roster(),
            CheckInPolicy::default(),
        )));
        classroom.lock().await.start(Utc::now()).unwrap();
        let store = Arc::new(MemoryTemplateStore::new());
        let engine = FaceEngine::new(
            classroom.clone(),
            store.clone(),
            camera,
            policy(interval_ms),
            240,
        );
        (engine, classroom, store)
    }

    fn camera(frames: Vec<Frame>) -> Arc<ScriptedCamera> {
        Arc::new(ScriptedCamera {
            frames,
            opens: AtomicUsize::new(0),
        })
    }

    /// Alternates between two brightness levels so every pair shows motion.
    fn blinking() -> Vec<Frame> {
        vec![solid(100), solid(110)]
    }

    #[tokio::test]
    async fn test_enroll_stores_snapshot() {
        let cam = camera(vec![solid(90)]);
        let (engine, _room, store) = setup(cam.clone(), 0).await;
        engine.enroll("S001").await.unwrap();
        assert!(engine.has_template("S001").unwrap());
        let snapshot = Frame::from_data_url(&store.load("S001").unwrap().unwrap()).unwrap();
        assert_eq!((snapshot.width, snapshot.height), (240, 180));
        assert_eq!(cam.opens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_enroll_requires_active_session() {
        let (engine, room, _store) = setup(camera(vec![solid(90)]), 0).await;
        room.lock().await.stop();
        assert!(matches!(
            engine.enroll("S001").await,
            Err(EngineError::Attendance(AttendanceError::NoActiveSession))
        ));
    }

    #[tokio::test]
    async fn test_recognize_without_template() {
        let (engine, _room, _store) = setup(camera(blinking()), 0).await;
        assert!(matches!(
            engine.recognize("S001").await,
            Err(EngineError::NoTemplateEnrolled(id)) if id == "S001"
        ));
    }

    #[tokio::test]
    async fn test_recognize_checks_in_live_matching_face() {
        let (engine, room, _store) = setup(camera(blinking()), 0).await;
        engine.enroll("S002").await.unwrap();

        let accepted = engine.recognize("S002").await.unwrap();
        assert_eq!(accepted.status, Status::Present);
        assert!(!accepted.duplicate);

        let room = room.lock().await;
        let record = room.ledger().get("S002").unwrap();
        assert_eq!(record.method, Some(Method::Face));
        assert!(!engine.is_busy("S002"));
    }

    #[tokio::test]
    async fn test_recognize_captures_liveness_samples_then_one_match_frame() {
        let cam = Arc::new(CountingCamera {
            frames: blinking(),
            opens: AtomicUsize::new(0),
            served: Arc::new(StdMutex::new(Vec::new())),
        });
        let (engine, _room, _store) = setup(cam.clone(), 0).await;
        let samples = SimilarityPolicy::default().liveness_samples;
        assert_eq!(samples, 12);

        engine.enroll("S004").await.unwrap();
        assert_eq!(cam.opens.load(Ordering::SeqCst), 1);
        assert_eq!(*cam.served.lock().unwrap(), vec![1]);

        engine.recognize("S004").await.unwrap();
        assert_eq!(cam.opens.load(Ordering::SeqCst), 2);
        assert_eq!(*cam.served.lock().unwrap(), vec![1, samples + 1]);
    }

    #[tokio::test]
    async fn test_failed_liveness_skips_match_capture() {
        let cam = Arc::new(CountingCamera {
            frames: vec![solid(100)],
            opens: AtomicUsize::new(0),
            served: Arc::new(StdMutex::new(Vec::new())),
        });
        let (engine, _room, _store) = setup(cam.clone(), 0).await;
        engine.enroll("S004").await.unwrap();
        assert!(matches!(
            engine.recognize("S004").await,
            Err(EngineError::LivenessFailed { .. })
        ));
        assert_eq!(cam.opens.load(Ordering::SeqCst), 2);
        assert_eq!(*cam.served.lock().unwrap(), vec![1, 12]);
    }

    #[tokio::test]
    async fn test_static_image_fails_liveness() {
        let (engine, room, _store) = setup(camera(vec![solid(100)]), 0).await;
        engine.enroll("S001").await.unwrap();
        assert!(matches!(
            engine.recognize("S001").await,
            Err(EngineError::LivenessFailed { score }) if score == 0.0
        ));
        assert_eq!(room.lock().await.stats().present, 0);
    }

    #[tokio::test]
    async fn test_different_face_is_mismatch() {
        let store = Arc::new(MemoryTemplateStore::new());
        // Template far from anything the camera produces.
        store
            .save("S001", &solid(250).to_data_url().unwrap())
            .unwrap();
        let classroom = Arc::new(Mutex::new(Classroom::new(
            default_roster(),
            CheckInPolicy::default(),
        )));
        classroom.lock().await.start(Utc::now()).unwrap();
        let engine = FaceEngine::new(
            classroom.clone(),
            store,
            camera(blinking()),
            policy(0),
            240,
        );
        assert!(matches!(
            engine.recognize("S001").await,
            Err(EngineError::FaceMismatch { score }) if score > 80.0
        ));
        assert_eq!(classroom.lock().await.stats().present, 0);
    }

    #[tokio::test]
    async fn test_camera_unavailable_reported() {
        let (engine, _room, store) = setup(Arc::new(MissingCamera), 0).await;
        store.save("S001", &solid(1).to_data_url().unwrap()).unwrap();
        assert!(matches!(
            engine.recognize("S001").await,
            Err(EngineError::CameraUnavailable(CameraError::PermissionDenied(_)))
        ));
        assert!(matches!(
            engine.enroll("S001").await,
            Err(EngineError::CameraUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_student_rejected_before_camera() {
        let cam = camera(blinking());
        let (engine, _room, _store) = setup(cam.clone(), 0).await;
        assert!(matches!(
            engine.recognize("S999").await,
            Err(EngineError::Attendance(AttendanceError::UnknownStudent(_)))
        ));
        assert_eq!(cam.opens.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_second_request_refused_while_busy_then_cancel() {
        // A long interval keeps the first sequence in flight.
        let (engine, room, _store) = setup(camera(blinking()), 60_000).await;
        engine.enroll("S003").await.unwrap();

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.recognize("S003").await })
        };
        while !engine.is_busy("S003") {
            tokio::task::yield_now().await;
        }

        assert!(matches!(
            engine.recognize("S003").await,
            Err(EngineError::CheckInInProgress(id)) if id == "S003"
        ));

        assert!(engine.cancel("S003"));
        assert!(matches!(first.await.unwrap(), Err(EngineError::Cancelled)));
        assert!(!engine.is_busy("S003"));
        assert!(!engine.cancel("S003"));
        assert_eq!(room.lock().await.stats().present, 0);
    }

    #[tokio::test]
    async fn test_other_students_not_blocked() {
        let (engine, _room, _store) = setup(camera(blinking()), 60_000).await;
        engine.enroll("S001").await.unwrap();
        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.recognize("S001").await })
        };
        while !engine.is_busy("S001") {
            tokio::task::yield_now().await;
        }
        // A different student is not refused as busy.
        assert!(matches!(
            engine.recognize("S002").await,
            Err(EngineError::NoTemplateEnrolled(_))
        ));
        engine.cancel("S001");
        let _ = first.await;
    }
}
