//! The recognition loop: capture, detect, match, log, annotate, display.
//!
//! Single-threaded and blocking. Collaborators are owned by the session and
//! released when it is dropped, on every exit path.

use crate::annotate::{self, Annotation, FaceLabel, FrameAnnotation};
use crate::keys::{Key, KeySource};
use crate::sink::{self, FrameSink};
use facewatch_core::{
    EuclideanMatcher, EventLog, FaceEncoder, KnownFaceSet, LogRecord, MatchResult, Matcher,
    Observation,
};
use facewatch_hw::{scale_image, Camera, CameraError};
use image::RgbImage;
use std::path::PathBuf;
use std::time::Instant;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("frame source failed: {0}")]
    FrameSource(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Supplies raw frames. `Ok(None)` means the source is exhausted.
pub trait FrameSource {
    type Error: std::error::Error + Send + Sync + 'static;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, Self::Error>;
}

impl FrameSource for Camera {
    type Error = CameraError;

    fn next_frame(&mut self) -> Result<Option<RgbImage>, CameraError> {
        self.capture_frame().map(|f| Some(f.image))
    }
}

/// Fixed inputs of a session.
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub threshold: f32,
    pub scale: f32,
    pub log_detection_only: bool,
    pub snapshot_dir: PathBuf,
}

/// Why the loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    QuitKey,
    SourceExhausted,
}

/// Counters reported when the loop ends.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub frames: u64,
    pub faces: u64,
    pub matches: u64,
    pub logged: u64,
    pub stop: StopReason,
}

/// Exponentially smoothed frames-per-second.
#[derive(Debug)]
pub struct FpsMeter {
    fps: f32,
    last: Instant,
}

impl FpsMeter {
    pub fn new(now: Instant) -> Self {
        Self { fps: 0.0, last: now }
    }

    /// Fold in one iteration ending at `now`.
    pub fn tick(&mut self, now: Instant) -> f32 {
        let dt = now.duration_since(self.last).as_secs_f32().max(1e-6);
        self.fps = 0.9 * self.fps + 0.1 * (1.0 / dt);
        self.last = now;
        self.fps
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }
}

/// Owns every resource the loop touches.
pub struct Session<S, E, D, K> {
    source: S,
    encoder: E,
    sink: D,
    keys: K,
    known: KnownFaceSet,
    matcher: EuclideanMatcher,
    event_log: EventLog,
    settings: SessionSettings,
}

impl<S, E, D, K> Session<S, E, D, K>
where
    S: FrameSource,
    E: FaceEncoder,
    D: FrameSink,
    K: KeySource,
{
    pub fn new(
        source: S,
        encoder: E,
        sink: D,
        keys: K,
        known: KnownFaceSet,
        event_log: EventLog,
        settings: SessionSettings,
    ) -> Self {
        Self {
            source,
            encoder,
            sink,
            keys,
            known,
            matcher: EuclideanMatcher,
            event_log,
            settings,
        }
    }

    /// Recognition needs both an encoder and at least one known face.
    pub fn recognition_active(&self) -> bool {
        self.encoder.can_encode() && !self.known.is_empty()
    }

    /// Run until the quit key or the end of the frame source.
    ///
    /// Only a frame source failure is fatal; detector, log and display
    /// errors are reported and the loop moves on.
    pub fn run(&mut self) -> Result<SessionSummary, SessionError> {
        let mut summary = SessionSummary {
            frames: 0,
            faces: 0,
            matches: 0,
            logged: 0,
            stop: StopReason::SourceExhausted,
        };
        let mut fps = FpsMeter::new(Instant::now());

        if self.recognition_active() {
            tracing::info!(known = self.known.len(), threshold = self.settings.threshold, "recognition active");
        } else {
            tracing::warn!("detection only: no known faces or no recognition model");
        }
        tracing::info!("running; type 'q' + Enter to quit, 's' + Enter to save a snapshot");

        loop {
            let mut frame = match self.source.next_frame() {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    tracing::info!("frame source exhausted");
                    break;
                }
                Err(err) => return Err(SessionError::FrameSource(Box::new(err))),
            };
            summary.frames += 1;

            let faces = self.process_frame(&frame, &mut summary);
            annotate::draw(&mut frame, &faces);

            let rate = fps.tick(Instant::now());
            let annotation = FrameAnnotation {
                faces,
                overlay: annotate::overlay_text(chrono::Local::now(), rate),
            };

            if let Err(err) = self.sink.show(&frame, &annotation) {
                tracing::warn!(error = %err, "display failed");
            }

            match self.keys.poll() {
                Some(Key::Quit) => {
                    summary.stop = StopReason::QuitKey;
                    break;
                }
                Some(Key::Snapshot) => match sink::save_snapshot(&frame, &self.settings.snapshot_dir) {
                    Ok(path) => tracing::info!(path = %path.display(), "snapshot saved"),
                    Err(err) => tracing::warn!(error = %err, "snapshot failed"),
                },
                None => {}
            }
        }

        tracing::info!(
            frames = summary.frames,
            faces = summary.faces,
            matches = summary.matches,
            logged = summary.logged,
            fps = fps.fps(),
            "session ended"
        );
        Ok(summary)
    }

    /// Detect and classify every face in one frame.
    fn process_frame(&mut self, frame: &RgbImage, summary: &mut SessionSummary) -> Vec<Annotation> {
        let small = scale_image(frame, self.settings.scale);
        let observations = match self.encoder.observe(&small) {
            Ok(obs) => obs,
            Err(err) => {
                tracing::warn!(error = %err, "face analysis failed; skipping frame");
                return Vec::new();
            }
        };

        let recognizing = self.recognition_active();
        observations
            .into_iter()
            .map(|obs| {
                summary.faces += 1;
                let annotation = self.classify(obs, recognizing);
                if matches!(annotation.label, FaceLabel::Known(_)) {
                    summary.matches += 1;
                }
                if self.should_log(&annotation.label) {
                    let record = match &annotation.label {
                        FaceLabel::Known(r) | FaceLabel::Unknown(r) => LogRecord::from_match(r),
                        FaceLabel::Detected => LogRecord::from_match(&MatchResult::unknown(0.0)),
                    };
                    if self.event_log.log(&record) {
                        summary.logged += 1;
                    }
                }
                annotation
            })
            .collect()
    }

    fn classify(&self, obs: Observation, recognizing: bool) -> Annotation {
        let face = if self.settings.scale < 1.0 {
            obs.face.unscale(self.settings.scale)
        } else {
            obs.face
        };
        let loc = format!("({},{},{},{})", face.left, face.top, face.right, face.bottom);

        let label = match obs.embedding {
            Some(embedding) if recognizing => {
                let result = self.matcher.compare(&embedding, &self.known, self.settings.threshold);
                FaceLabel::from_match(result)
            }
            _ => FaceLabel::Detected,
        };

        match &label {
            FaceLabel::Known(r) | FaceLabel::Unknown(r) => tracing::info!(
                name = %r.name,
                distance = r.distance,
                loc = %loc,
                confidence = obs.confidence,
                "face"
            ),
            FaceLabel::Detected => tracing::info!(loc = %loc, confidence = obs.confidence, "face detected"),
        }
        Annotation { face, label }
    }

    fn should_log(&self, label: &FaceLabel) -> bool {
        match label {
            FaceLabel::Known(_) | FaceLabel::Unknown(_) => true,
            FaceLabel::Detected => self.settings.log_detection_only,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::SinkError;
    use facewatch_core::{Embedding, FaceBox, PipelineError};
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Debug, thiserror::Error)]
    #[error("camera unplugged")]
    struct Unplugged;

    /// Yields `frames` blank frames, then either ends or fails.
    struct FakeSource {
        frames: usize,
        fail_at_end: bool,
    }

    impl FrameSource for FakeSource {
        type Error = Unplugged;

        fn next_frame(&mut self) -> Result<Option<RgbImage>, Unplugged> {
            if self.frames == 0 {
                return if self.fail_at_end { Err(Unplugged) } else { Ok(None) };
            }
            self.frames -= 1;
            Ok(Some(RgbImage::new(200, 100)))
        }
    }

    /// Reports the same faces on every frame.
    struct FakeEncoder {
        faces: Vec<(FaceBox, Option<Vec<f32>>)>,
        can_encode: bool,
        seen_sizes: Vec<(u32, u32)>,
    }

    impl FaceEncoder for FakeEncoder {
        fn observe(&mut self, image: &RgbImage) -> Result<Vec<Observation>, PipelineError> {
            self.seen_sizes.push(image.dimensions());
            Ok(self
                .faces
                .iter()
                .map(|(face, values)| Observation {
                    face: *face,
                    confidence: 0.9,
                    embedding: values.clone().map(Embedding::new),
                })
                .collect())
        }

        fn can_encode(&self) -> bool {
            self.can_encode
        }

        fn model_version(&self) -> Option<&str> {
            None
        }
    }

    #[derive(Default)]
    struct CountingSink {
        shown: usize,
        last: Option<FrameAnnotation>,
    }

    impl FrameSink for CountingSink {
        fn show(&mut self, _frame: &RgbImage, annotation: &FrameAnnotation) -> Result<(), SinkError> {
            self.shown += 1;
            self.last = Some(annotation.clone());
            Ok(())
        }
    }

    /// Collects formatted `tracing` output for field assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

    impl CapturedLogs {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
        }
    }

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for CapturedLogs {
        type Writer = CapturedLogs;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    struct ScriptedKeys(VecDeque<Option<Key>>);

    impl KeySource for ScriptedKeys {
        fn poll(&mut self) -> Option<Key> {
            self.0.pop_front().flatten()
        }
    }

    fn no_keys() -> ScriptedKeys {
        ScriptedKeys(VecDeque::new())
    }

    fn known() -> KnownFaceSet {
        let mut set = KnownFaceSet::new();
        set.push("alice", Embedding::new(vec![0.0, 0.0]));
        set.push("bob", Embedding::new(vec![10.0, 10.0]));
        set
    }

    fn settings(dir: &std::path::Path) -> SessionSettings {
        SessionSettings {
            threshold: 5.0,
            scale: 0.5,
            log_detection_only: false,
            snapshot_dir: dir.to_path_buf(),
        }
    }

    fn two_faces() -> Vec<(FaceBox, Option<Vec<f32>>)> {
        vec![
            (FaceBox { left: 10, top: 10, right: 30, bottom: 30 }, Some(vec![1.0, 1.0])),
            (FaceBox { left: 50, top: 10, right: 70, bottom: 30 }, Some(vec![6.0, 6.0])),
        ]
    }

    fn encoder(faces: Vec<(FaceBox, Option<Vec<f32>>)>, can_encode: bool) -> FakeEncoder {
        FakeEncoder { faces, can_encode, seen_sizes: Vec::new() }
    }

    fn log_lines(log: &EventLog) -> Vec<String> {
        std::fs::read_to_string(log.path())
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn test_runs_until_source_exhausted_and_logs_each_face() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("log.csv"));
        let mut session = Session::new(
            FakeSource { frames: 3, fail_at_end: false },
            encoder(two_faces(), true),
            CountingSink::default(),
            no_keys(),
            known(),
            log.clone(),
            settings(dir.path()),
        );

        let summary = session.run().unwrap();
        assert_eq!(summary.stop, StopReason::SourceExhausted);
        assert_eq!((summary.frames, summary.faces, summary.matches, summary.logged), (3, 6, 3, 6));
        assert_eq!(session.sink.shown, 3);
        assert_eq!(session.encoder.seen_sizes, vec![(100, 50); 3]);

        let lines = log_lines(&log);
        assert_eq!(lines.len(), 7);
        assert_eq!(lines[0], "timestamp,name,distance");
        assert!(lines[1].ends_with(",alice,1.4142"), "{}", lines[1]);
        assert!(lines[2].ends_with(",unknown,5.6569"), "{}", lines[2]);
    }

    #[test]
    fn test_sink_receives_captions_and_overlay() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            FakeSource { frames: 2, fail_at_end: false },
            encoder(two_faces(), true),
            CountingSink::default(),
            no_keys(),
            known(),
            EventLog::new(dir.path().join("log.csv")),
            settings(dir.path()),
        );
        session.run().unwrap();

        let last = session.sink.last.clone().unwrap();
        let captions: Vec<_> = last.faces.iter().map(|a| a.label.text()).collect();
        assert_eq!(captions, vec!["alice 1.41", "unknown 5.66"]);

        let (clock, rate) = last.overlay.split_once("   FPS:").unwrap();
        assert!(chrono::NaiveDateTime::parse_from_str(clock, "%Y-%m-%d %H:%M:%S").is_ok());
        assert!(rate.parse::<f32>().unwrap() > 0.0);
    }

    #[test]
    fn test_face_events_carry_name_distance_and_location() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            FakeSource { frames: 1, fail_at_end: false },
            encoder(two_faces(), true),
            CountingSink::default(),
            no_keys(),
            known(),
            EventLog::new(dir.path().join("log.csv")),
            settings(dir.path()),
        );
        let logs = CapturedLogs::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(logs.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || session.run().unwrap());

        let text = logs.text();
        let alice = text
            .lines()
            .find(|l| l.contains("name=alice"))
            .unwrap_or_else(|| panic!("no alice event in:\n{text}"));
        assert!(alice.contains("distance=1.414"), "{alice}");
        assert!(alice.contains("loc=(20,20,60,60)"), "{alice}");
        assert!(text.lines().any(|l| l.contains("name=unknown") && l.contains("distance=5.65")));
    }

    #[test]
    fn test_quit_key_stops_after_current_iteration() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            FakeSource { frames: 100, fail_at_end: false },
            encoder(two_faces(), true),
            CountingSink::default(),
            ScriptedKeys(VecDeque::from([None, Some(Key::Quit)])),
            known(),
            EventLog::new(dir.path().join("log.csv")),
            settings(dir.path()),
        );

        let summary = session.run().unwrap();
        assert_eq!(summary.stop, StopReason::QuitKey);
        assert_eq!(summary.frames, 2);
        assert_eq!(session.sink.shown, 2);
    }

    #[test]
    fn test_source_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            FakeSource { frames: 1, fail_at_end: true },
            encoder(Vec::new(), true),
            CountingSink::default(),
            no_keys(),
            known(),
            EventLog::new(dir.path().join("log.csv")),
            settings(dir.path()),
        );

        let err = session.run().unwrap_err();
        assert!(err.to_string().contains("camera unplugged"));
    }

    #[test]
    fn test_detection_only_logs_nothing_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("log.csv"));
        let mut session = Session::new(
            FakeSource { frames: 2, fail_at_end: false },
            encoder(vec![(FaceBox { left: 0, top: 0, right: 10, bottom: 10 }, None)], false),
            CountingSink::default(),
            no_keys(),
            KnownFaceSet::new(),
            log.clone(),
            settings(dir.path()),
        );

        assert!(!session.recognition_active());
        let summary = session.run().unwrap();
        assert_eq!((summary.faces, summary.matches, summary.logged), (2, 0, 0));
        assert!(!log.path().exists());
    }

    #[test]
    fn test_detection_only_logs_unknown_when_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path().join("log.csv"));
        let mut s = settings(dir.path());
        s.log_detection_only = true;
        let mut session = Session::new(
            FakeSource { frames: 2, fail_at_end: false },
            encoder(vec![(FaceBox { left: 0, top: 0, right: 10, bottom: 10 }, Some(vec![0.0, 0.0]))], true),
            CountingSink::default(),
            no_keys(),
            KnownFaceSet::new(),
            log.clone(),
            s,
        );

        let summary = session.run().unwrap();
        assert_eq!(summary.logged, 2);
        let lines = log_lines(&log);
        assert_eq!(lines.len(), 3);
        assert!(lines[1].ends_with(",unknown,0.0000"));
    }

    #[test]
    fn test_boxes_mapped_to_original_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            FakeSource { frames: 0, fail_at_end: false },
            encoder(Vec::new(), true),
            CountingSink::default(),
            no_keys(),
            known(),
            EventLog::new(dir.path().join("log.csv")),
            settings(dir.path()),
        );
        let obs = Observation {
            face: FaceBox { left: 10, top: 20, right: 30, bottom: 40 },
            confidence: 1.0,
            embedding: Some(Embedding::new(vec![0.0, 0.5])),
        };
        let ann = session.classify(obs, true);
        assert_eq!(ann.face, FaceBox { left: 20, top: 40, right: 60, bottom: 80 });
        assert!(matches!(ann.label, FaceLabel::Known(ref r) if r.name == "alice"));
    }

    #[test]
    fn test_snapshot_key_saves_annotated_frame() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            FakeSource { frames: 1, fail_at_end: false },
            encoder(two_faces(), true),
            CountingSink::default(),
            ScriptedKeys(VecDeque::from([Some(Key::Snapshot)])),
            known(),
            EventLog::new(dir.path().join("log.csv")),
            settings(dir.path()),
        );
        session.run().unwrap();

        let snapshots = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with("snapshot_"))
            .count();
        assert_eq!(snapshots, 1);
    }

    #[test]
    fn test_log_failure_does_not_stop_loop() {
        let dir = tempfile::tempdir().unwrap();
        let mut session = Session::new(
            FakeSource { frames: 2, fail_at_end: false },
            encoder(two_faces(), true),
            CountingSink::default(),
            no_keys(),
            known(),
            EventLog::new(dir.path().join("no_such_dir").join("log.csv")),
            settings(dir.path()),
        );
        let summary = session.run().unwrap();
        assert_eq!((summary.frames, summary.faces, summary.logged), (2, 4, 0));
    }

    #[test]
    fn test_fps_meter_smoothing() {
        let start = Instant::now();
        let mut meter = FpsMeter::new(start);
        let fps = meter.tick(start + Duration::from_millis(100));
        assert!((fps - 1.0).abs() < 1e-3, "first tick: {fps}");
        let fps = meter.tick(start + Duration::from_millis(200));
        assert!((fps - 1.9).abs() < 1e-3, "second tick: {fps}");
    }
}
