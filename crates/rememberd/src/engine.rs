use std::time::{Duration, Instant};

use rememberme_core::{
    AnalyzerError, BoundingBox, DetectedFace, DistanceMatcher, Embedding, FaceAnalyzer, MatchResult,
    Matcher, Reference,
};
use rememberme_hw::{Camera, CameraError, Frame, FrameError};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error("face analysis failed: {0}")]
    Analyzer(#[from] AnalyzerError),
    #[error("photo could not be decoded: {0}")]
    Photo(#[from] image::ImageError),
    #[error("frame encoding failed: {0}")]
    Frame(#[from] FrameError),
    #[error("camera is not running")]
    CameraOff,
    #[error("no frame captured yet")]
    NoFrame,
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// What the camera currently sees, republished after every processed frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionState {
    pub camera_on: bool,
    pub face_detected: bool,
    /// Every detected face, most confident first.
    pub faces: Vec<BoundingBox>,
    /// The recognized person, only when the match cleared the threshold.
    pub matched: Option<MatchResult>,
    /// Similarity of the closest gallery entry, 0 when nothing was compared.
    pub similarity: f32,
    /// Capture diagnostics, e.g. `ready:true size:1280x720 fps:30 device:video0`.
    pub camera_info: String,
}

/// Capture parameters for the recognition loop.
#[derive(Debug, Clone, Copy)]
pub struct CaptureSettings {
    pub width: u32,
    pub height: u32,
    pub frame_interval: Duration,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    StartCamera {
        device: Option<String>,
        reply: oneshot::Sender<Result<String, EngineError>>,
    },
    StopCamera {
        reply: oneshot::Sender<()>,
    },
    EmbedPhoto {
        photo: Vec<u8>,
        reply: oneshot::Sender<Result<Option<Embedding>, EngineError>>,
    },
    SetGallery {
        gallery: Vec<Reference>,
        reply: oneshot::Sender<()>,
    },
    GallerySize {
        reply: oneshot::Sender<usize>,
    },
    Snapshot {
        reply: oneshot::Sender<Result<Vec<u8>, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    state: watch::Receiver<RecognitionState>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Open a camera (auto-selected when `device` is `None`) and start the
    /// recognition loop. Returns the opened device path.
    pub async fn start_camera(&self, device: Option<String>) -> Result<String, EngineError> {
        self.request(|reply| EngineRequest::StartCamera { device, reply })
            .await?
    }

    /// Release the camera and clear the recognition state.
    pub async fn stop_camera(&self) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::StopCamera { reply }).await
    }

    /// Reference embedding for an enrollment photo (any format `image` decodes).
    pub async fn embed_photo(&self, photo: Vec<u8>) -> Result<Option<Embedding>, EngineError> {
        self.request(|reply| EngineRequest::EmbedPhoto { photo, reply })
            .await?
    }

    /// Replace the gallery live frames are matched against.
    pub async fn set_gallery(&self, gallery: Vec<Reference>) -> Result<(), EngineError> {
        self.request(|reply| EngineRequest::SetGallery { gallery, reply })
            .await
    }

    /// Number of references live frames are currently matched against.
    pub async fn gallery_size(&self) -> Result<usize, EngineError> {
        self.request(|reply| EngineRequest::GallerySize { reply }).await
    }

    /// PNG of the most recent frame.
    pub async fn snapshot(&self) -> Result<Vec<u8>, EngineError> {
        self.request(|reply| EngineRequest::Snapshot { reply }).await?
    }

    pub fn state(&self) -> RecognitionState {
        self.state.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<RecognitionState> {
        self.state.clone()
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// The analyzer is loaded by the caller (fail-fast); the camera stays closed
/// until a `start_camera` request arrives.
pub fn spawn_engine<A>(
    analyzer: A,
    matcher: DistanceMatcher,
    capture: CaptureSettings,
) -> Result<EngineHandle, EngineError>
where
    A: FaceAnalyzer + Send + 'static,
{
    let (state_tx, state_rx) = watch::channel(RecognitionState::default());
    let (tx, rx) = mpsc::channel::<EngineRequest>(8);

    let engine = Engine::new(analyzer, matcher, capture, state_tx);
    std::thread::Builder::new()
        .name("rememberme-engine".into())
        .spawn(move || engine.run(rx))
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, state: state_rx })
}

/// Why the streaming loop returned control to the request loop.
enum StreamExit {
    /// A request that opens or closes the camera.
    Request(EngineRequest),
    /// Streaming stopped working; the camera is unusable.
    Failed,
    /// Every handle is gone.
    Closed,
}

/// Face and match information for one analyzed frame.
#[derive(Debug, Default, PartialEq)]
pub(crate) struct FrameOutcome {
    pub face_detected: bool,
    pub faces: Vec<BoundingBox>,
    pub matched: Option<MatchResult>,
    pub similarity: f32,
}

/// Match the most confident face against the gallery.
///
/// Comparison happens only when recognition is available, that face has an
/// embedding, and the gallery is non-empty; otherwise there is no match.
pub(crate) fn match_faces(
    faces: &[DetectedFace],
    recognition_available: bool,
    gallery: &[Reference],
    matcher: &impl Matcher,
) -> FrameOutcome {
    let Some(primary) = faces.first() else {
        return FrameOutcome::default();
    };

    let result = match &primary.embedding {
        Some(embedding) if recognition_available && !gallery.is_empty() => {
            Some(matcher.compare(embedding, gallery))
        }
        _ => None,
    };

    FrameOutcome {
        face_detected: true,
        faces: faces.iter().map(|f| f.bbox.clone()).collect(),
        similarity: result.as_ref().map_or(0.0, |r| r.similarity),
        matched: result.filter(|r| r.matched),
    }
}

struct Engine<A> {
    analyzer: A,
    matcher: DistanceMatcher,
    capture: CaptureSettings,
    gallery: Vec<Reference>,
    last_frame: Option<Frame>,
    state: watch::Sender<RecognitionState>,
}

impl<A: FaceAnalyzer> Engine<A> {
    fn new(
        analyzer: A,
        matcher: DistanceMatcher,
        capture: CaptureSettings,
        state: watch::Sender<RecognitionState>,
    ) -> Self {
        Self {
            analyzer,
            matcher,
            capture,
            gallery: Vec::new(),
            last_frame: None,
            state,
        }
    }

    fn run(mut self, mut rx: mpsc::Receiver<EngineRequest>) {
        tracing::info!("engine thread started");
        let mut camera: Option<Camera> = None;

        loop {
            let exit = match camera.as_ref() {
                None => rx.blocking_recv().map_or(StreamExit::Closed, StreamExit::Request),
                Some(cam) => self.stream(cam, &mut rx),
            };
            let request = match exit {
                StreamExit::Request(req) => req,
                StreamExit::Failed => {
                    self.release(&mut camera);
                    continue;
                }
                StreamExit::Closed => break,
            };

            if let Some(request) = self.handle(request) {
                self.handle_camera(request, &mut camera);
            }
        }

        tracing::info!("engine thread exiting");
    }

    /// Capture and analyze frames until a camera request arrives.
    fn stream(&mut self, camera: &Camera, rx: &mut mpsc::Receiver<EngineRequest>) -> StreamExit {
        let mut stream = match camera.stream() {
            Ok(s) => s,
            Err(e) => {
                tracing::error!(device = %camera.device_path, error = %e, hint = e.user_hint(), "failed to start streaming");
                return StreamExit::Failed;
            }
        };
        let fps = camera.fps();

        loop {
            let started = Instant::now();

            loop {
                match rx.try_recv() {
                    Ok(req) => {
                        if let Some(req) = self.handle(req) {
                            return StreamExit::Request(req);
                        }
                    }
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return StreamExit::Closed,
                }
            }

            match stream.next_frame() {
                Ok(frame) => {
                    let info = frame.diagnostics(fps, &camera.device_path);
                    self.observe(frame, info);
                }
                Err(e) => tracing::warn!(error = %e, "frame capture failed; retrying"),
            }

            if let Some(rest) = self.capture.frame_interval.checked_sub(started.elapsed()) {
                std::thread::sleep(rest);
            }
        }
    }

    /// Handle a request that does not touch the camera; camera requests are
    /// handed back.
    fn handle(&mut self, request: EngineRequest) -> Option<EngineRequest> {
        match request {
            EngineRequest::EmbedPhoto { photo, reply } => {
                let _ = reply.send(self.embed_photo(&photo));
            }
            EngineRequest::SetGallery { gallery, reply } => {
                tracing::debug!(entries = gallery.len(), "gallery updated");
                self.gallery = gallery;
                let _ = reply.send(());
            }
            EngineRequest::GallerySize { reply } => {
                let _ = reply.send(self.gallery.len());
            }
            EngineRequest::Snapshot { reply } => {
                let _ = reply.send(self.snapshot());
            }
            camera_request => return Some(camera_request),
        }
        None
    }

    fn handle_camera(&mut self, request: EngineRequest, camera: &mut Option<Camera>) {
        match request {
            EngineRequest::StartCamera { device, reply } => {
                if camera.is_some() {
                    tracing::info!("releasing current camera before switching");
                    self.release(camera);
                }
                let result = match self.open_camera(device.as_deref()) {
                    Ok((cam, first)) => {
                        let path = cam.device_path.clone();
                        let info = first.diagnostics(cam.fps(), &path);
                        self.state.send_replace(RecognitionState {
                            camera_on: true,
                            ..RecognitionState::default()
                        });
                        self.observe(first, info);
                        *camera = Some(cam);
                        Ok(path)
                    }
                    Err(e) => {
                        tracing::warn!(device = ?device, error = %e, hint = e.user_hint(), "camera start failed");
                        Err(e.into())
                    }
                };
                let _ = reply.send(result);
            }
            EngineRequest::StopCamera { reply } => {
                self.release(camera);
                let _ = reply.send(());
            }
            other => {
                let _ = self.handle(other);
            }
        }
    }

    /// Open a camera and capture one frame, so a device that opens but
    /// cannot stream is reported to the caller instead of failing later.
    fn open_camera(&self, device: Option<&str>) -> Result<(Camera, Frame), CameraError> {
        let cam = match device {
            Some(path) => Camera::open(path, self.capture.width, self.capture.height)?,
            None => Camera::open_preferred(self.capture.width, self.capture.height)?,
        };
        tracing::info!(
            device = %cam.device_path,
            width = cam.width,
            height = cam.height,
            fourcc = ?cam.fourcc,
            "camera opened"
        );
        let first = cam.capture_frame()?;
        Ok((cam, first))
    }

    fn release(&mut self, camera: &mut Option<Camera>) {
        if let Some(cam) = camera.take() {
            tracing::info!(device = %cam.device_path, "camera released");
        }
        self.last_frame = None;
        self.state.send_replace(RecognitionState::default());
    }

    /// Analyze one frame and publish the resulting state. Analysis errors are
    /// logged; the next frame is simply tried again.
    fn observe(&mut self, frame: Frame, camera_info: String) {
        let faces = match self.analyzer.analyze(&frame.image) {
            Ok(faces) => faces,
            Err(e) => {
                tracing::warn!(sequence = frame.sequence, error = %e, "frame analysis failed");
                self.last_frame = Some(frame);
                return;
            }
        };
        let outcome = match_faces(
            &faces,
            self.analyzer.recognition_available(),
            &self.gallery,
            &self.matcher,
        );
        self.last_frame = Some(frame);

        let next = RecognitionState {
            camera_on: true,
            face_detected: outcome.face_detected,
            faces: outcome.faces,
            matched: outcome.matched,
            similarity: outcome.similarity,
            camera_info,
        };
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }

    fn embed_photo(&mut self, photo: &[u8]) -> Result<Option<Embedding>, EngineError> {
        let image = image::load_from_memory(photo)?.to_rgb8();
        let embedding = self.analyzer.reference_embedding(&image)?;
        if embedding.is_none() {
            tracing::debug!(
                width = image.width(),
                height = image.height(),
                recognition = self.analyzer.recognition_available(),
                "no reference embedding for photo"
            );
        }
        Ok(embedding)
    }

    fn snapshot(&self) -> Result<Vec<u8>, EngineError> {
        if !self.state.borrow().camera_on {
            return Err(EngineError::CameraOff);
        }
        let frame = self.last_frame.as_ref().ok_or(EngineError::NoFrame)?;
        Ok(frame.to_png()?)
    }
}

/// Fakes shared by the engine and D-Bus interface tests.
#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use image::RgbImage;
    use rememberme_core::detector::DetectorError;

    /// Analyzer returning the same faces for every image.
    pub struct Scripted {
        pub faces: Vec<DetectedFace>,
        pub recognition: bool,
        pub fail: bool,
    }

    impl Scripted {
        /// One face with the given embedding in every image.
        pub fn seeing(values: &[f32]) -> Self {
            Self { faces: vec![face(0.9, Some(values.to_vec()))], recognition: true, fail: false }
        }

        pub fn blind() -> Self {
            Self { faces: vec![], recognition: true, fail: false }
        }
    }

    impl FaceAnalyzer for Scripted {
        fn analyze(&mut self, _image: &RgbImage) -> Result<Vec<DetectedFace>, AnalyzerError> {
            if self.fail {
                return Err(DetectorError::EmptyImage.into());
            }
            Ok(self.faces.clone())
        }

        fn recognition_available(&self) -> bool {
            self.recognition
        }

        fn model_version(&self) -> Option<&str> {
            self.recognition.then_some("test")
        }
    }

    pub fn face(confidence: f32, embedding: Option<Vec<f32>>) -> DetectedFace {
        DetectedFace {
            bbox: BoundingBox {
                x: 10.0, y: 10.0, width: 50.0, height: 60.0,
                confidence, landmarks: None,
            },
            embedding: embedding.map(|values| Embedding { values, model_version: Some("test".into()) }),
        }
    }

    pub fn reference(id: &str, values: &[f32]) -> Reference {
        Reference {
            person_id: id.into(),
            name: format!("name-{id}"),
            embedding: Embedding { values: values.to_vec(), model_version: Some("test".into()) },
        }
    }

    /// A small PNG the `image` crate decodes.
    pub fn png() -> Vec<u8> {
        png_of(4)
    }

    /// A blank `size`×`size` PNG; different sizes give different bytes.
    pub fn png_of(size: u32) -> Vec<u8> {
        let mut out = std::io::Cursor::new(Vec::new());
        RgbImage::new(size, size).write_to(&mut out, image::ImageFormat::Png).unwrap();
        out.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{face, png, reference, Scripted};
    use super::*;
    use image::RgbImage;

    fn frame() -> Frame {
        Frame { image: RgbImage::new(8, 8), timestamp: Instant::now(), sequence: 1 }
    }

    fn settings() -> CaptureSettings {
        CaptureSettings { width: 640, height: 480, frame_interval: Duration::from_millis(1) }
    }

    fn engine(analyzer: Scripted) -> (Engine<Scripted>, watch::Receiver<RecognitionState>) {
        let (tx, rx) = watch::channel(RecognitionState::default());
        (Engine::new(analyzer, DistanceMatcher::default(), settings(), tx), rx)
    }

    #[test]
    fn test_no_faces() {
        let outcome = match_faces(&[], true, &[reference("a", &[1.0])], &DistanceMatcher::default());
        assert_eq!(outcome, FrameOutcome::default());
    }

    #[test]
    fn test_matches_most_confident_face() {
        let faces = [face(0.9, Some(vec![1.0, 0.0])), face(0.8, Some(vec![0.0, 1.0]))];
        let gallery = [reference("a", &[0.0, 1.0]), reference("b", &[1.0, 0.0])];
        let outcome = match_faces(&faces, true, &gallery, &DistanceMatcher::default());

        assert!(outcome.face_detected);
        assert_eq!(outcome.faces.len(), 2);
        let matched = outcome.matched.unwrap();
        assert_eq!(matched.person_id.as_deref(), Some("b"));
        assert_eq!(outcome.similarity, 100.0);
    }

    #[test]
    fn test_no_match_below_threshold_keeps_similarity() {
        // Distance 1.2 → similarity ≈ 33.
        let faces = [face(0.9, Some(vec![1.2]))];
        let gallery = [reference("a", &[0.0])];
        let outcome = match_faces(&faces, true, &gallery, &DistanceMatcher::default());
        assert!(outcome.face_detected);
        assert!(outcome.matched.is_none());
        assert!(outcome.similarity > 0.0 && outcome.similarity < 60.0);
    }

    #[test]
    fn test_no_comparison_without_recognition() {
        let faces = [face(0.9, Some(vec![1.0]))];
        let outcome = match_faces(&faces, false, &[reference("a", &[1.0])], &DistanceMatcher::default());
        assert!(outcome.face_detected);
        assert!(outcome.matched.is_none());
        assert_eq!(outcome.similarity, 0.0);
    }

    #[test]
    fn test_no_comparison_with_empty_gallery() {
        let outcome = match_faces(&[face(0.9, Some(vec![1.0]))], true, &[], &DistanceMatcher::default());
        assert!(outcome.face_detected);
        assert!(outcome.matched.is_none());
    }

    #[test]
    fn test_no_comparison_without_embedding() {
        let outcome = match_faces(&[face(0.9, None)], true, &[reference("a", &[1.0])], &DistanceMatcher::default());
        assert!(outcome.face_detected);
        assert!(outcome.matched.is_none());
    }

    #[test]
    fn test_observe_publishes_match() {
        let (mut engine, rx) = engine(Scripted { faces: vec![face(0.9, Some(vec![1.0]))], recognition: true, fail: false });
        engine.gallery = vec![reference("a", &[1.0])];
        engine.observe(frame(), "ready:true".into());

        let state = rx.borrow().clone();
        assert!(state.camera_on);
        assert!(state.face_detected);
        assert_eq!(state.camera_info, "ready:true");
        assert_eq!(state.matched.and_then(|m| m.name).as_deref(), Some("name-a"));
    }

    #[test]
    fn test_observe_unchanged_state_does_not_notify() {
        let (mut engine, mut rx) = engine(Scripted { faces: vec![], recognition: true, fail: false });
        engine.observe(frame(), "info".into());
        assert!(rx.has_changed().unwrap());
        let _ = rx.borrow_and_update();

        engine.observe(frame(), "info".into());
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_observe_analysis_error_keeps_previous_state() {
        let (mut engine, rx) = engine(Scripted { faces: vec![], recognition: true, fail: true });
        engine.observe(frame(), "info".into());
        assert_eq!(*rx.borrow(), RecognitionState::default());
        assert!(engine.last_frame.is_some());
    }

    #[test]
    fn test_snapshot_requires_camera() {
        let (engine, _rx) = engine(Scripted { faces: vec![], recognition: true, fail: false });
        assert!(matches!(engine.snapshot(), Err(EngineError::CameraOff)));
    }

    #[test]
    fn test_snapshot_encodes_last_frame() {
        let (mut engine, _rx) = engine(Scripted { faces: vec![], recognition: true, fail: false });
        engine.observe(frame(), "info".into());
        let png = engine.snapshot().unwrap();
        assert_eq!(&png[..4], b"\x89PNG");
    }

    #[test]
    fn test_release_clears_state() {
        let (mut engine, rx) = engine(Scripted { faces: vec![face(0.9, None)], recognition: false, fail: false });
        engine.observe(frame(), "info".into());
        engine.release(&mut None);
        assert_eq!(*rx.borrow(), RecognitionState::default());
        assert!(engine.last_frame.is_none());
    }

    #[test]
    fn test_embed_photo() {
        let (mut engine, _rx) = engine(Scripted { faces: vec![face(0.9, Some(vec![0.5]))], recognition: true, fail: false });
        let embedding = engine.embed_photo(&png()).unwrap();
        assert_eq!(embedding.map(|e| e.values), Some(vec![0.5]));
    }

    #[test]
    fn test_embed_photo_rejects_garbage() {
        let (mut engine, _rx) = engine(Scripted { faces: vec![], recognition: true, fail: false });
        assert!(matches!(engine.embed_photo(b"not an image"), Err(EngineError::Photo(_))));
    }

    #[tokio::test]
    async fn test_handle_round_trip() {
        let analyzer = Scripted { faces: vec![face(0.9, Some(vec![0.25]))], recognition: true, fail: false };
        let handle = spawn_engine(analyzer, DistanceMatcher::default(), settings()).unwrap();

        handle.set_gallery(vec![reference("a", &[0.25])]).await.unwrap();
        let embedding = handle.embed_photo(png()).await.unwrap();
        assert_eq!(embedding.map(|e| e.values), Some(vec![0.25]));

        assert!(matches!(handle.snapshot().await, Err(EngineError::CameraOff)));
        handle.stop_camera().await.unwrap();
        assert!(!handle.state().camera_on);
    }

    #[tokio::test]
    async fn test_start_missing_camera_reports_error() {
        let handle = spawn_engine(Scripted::blind(), DistanceMatcher::default(), settings()).unwrap();
        let result = handle.start_camera(Some("/dev/video-does-not-exist".into())).await;
        assert!(matches!(result, Err(EngineError::Camera(CameraError::DeviceNotFound(_)))));
        assert!(!handle.state().camera_on);
    }

    #[tokio::test]
    async fn test_gallery_size() {
        let handle = spawn_engine(Scripted::blind(), DistanceMatcher::default(), settings()).unwrap();
        assert_eq!(handle.gallery_size().await.unwrap(), 0);
        handle
            .set_gallery(vec![reference("a", &[1.0]), reference("b", &[0.0])])
            .await
            .unwrap();
        assert_eq!(handle.gallery_size().await.unwrap(), 2);
    }
}
