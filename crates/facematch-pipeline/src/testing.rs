//! Test doubles shared by the pipeline's unit tests.

use crate::store::WorkDir;
use axum::extract::State;
use axum::http::{StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use facematch_core::{
    BoundingBox, DetectOptions, DetectedFace, EngineError, RecognitionEngine, Verification, VerifyOptions,
};
use image::{DynamicImage, GrayImage, ImageFormat, Luma, Rgb, RgbImage};
use std::collections::HashMap;
use std::io::Cursor;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

type VerifyFn = dyn Fn(&Path, &Path, &VerifyOptions) -> Result<Verification, EngineError> + Send + Sync;
type FacesFn = dyn Fn(&Path) -> Result<Vec<DetectedFace>, EngineError> + Send + Sync;

/// Scripted [`RecognitionEngine`].
pub(crate) struct FakeEngine {
    verify: Box<VerifyFn>,
    faces: Box<FacesFn>,
    delay: Option<Duration>,
    verify_calls: AtomicUsize,
    extract_calls: AtomicUsize,
}

impl FakeEngine {
    /// Verifies every pair at distance 0.1 against threshold 0.4 and finds no faces.
    pub fn new() -> Self {
        Self {
            verify: Box::new(|_, _, _| Ok(verification(0.1, 0.4))),
            faces: Box::new(|_| Ok(Vec::new())),
            delay: None,
            verify_calls: AtomicUsize::new(0),
            extract_calls: AtomicUsize::new(0),
        }
    }

    pub fn with_verify(
        mut self,
        f: impl Fn(&Path, &Path, &VerifyOptions) -> Result<Verification, EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.verify = Box::new(f);
        self
    }

    pub fn with_faces(
        mut self,
        f: impl Fn(&Path) -> Result<Vec<DetectedFace>, EngineError> + Send + Sync + 'static,
    ) -> Self {
        self.faces = Box::new(f);
        self
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Distance picked by the shade of the second image; unknown shades fail.
    pub fn by_candidate_shade(distances: &[(u8, f32)], threshold: f32) -> Self {
        let table: HashMap<u8, f32> = distances.iter().copied().collect();
        Self::new().with_verify(move |_, candidate, _| {
            let shade = shade_of(candidate);
            table
                .get(&shade)
                .map(|&distance| verification(distance, threshold))
                .ok_or_else(|| EngineError::NoFaceDetected(format!("shade {shade}")))
        })
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn extract_calls(&self) -> usize {
        self.extract_calls.load(Ordering::SeqCst)
    }

    fn pause(&self) {
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
    }
}

impl RecognitionEngine for FakeEngine {
    fn verify(&self, a: &Path, b: &Path, options: &VerifyOptions) -> Result<Verification, EngineError> {
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.pause();
        (self.verify)(a, b, options)
    }

    fn extract_faces(&self, image: &Path, _options: &DetectOptions) -> Result<Vec<DetectedFace>, EngineError> {
        self.extract_calls.fetch_add(1, Ordering::SeqCst);
        self.pause();
        (self.faces)(image)
    }
}

pub(crate) fn verification(distance: f32, threshold: f32) -> Verification {
    Verification {
        distance,
        verified: distance <= threshold,
        threshold: Some(threshold),
    }
}

/// A detected face with a 16×16 grey crop.
pub(crate) fn face(x: f32, y: f32, width: f32, height: f32, confidence: f32) -> DetectedFace {
    DetectedFace {
        bbox: BoundingBox {
            x,
            y,
            width,
            height,
            confidence,
            landmarks: None,
        },
        crop: RgbImage::from_pixel(16, 16, Rgb([128, 128, 128])),
    }
}

pub(crate) fn encode_png(image: &DynamicImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    bytes
}

pub(crate) fn rgb_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 90]));
    encode_png(&DynamicImage::ImageRgb8(image))
}

pub(crate) fn gray_png(width: u32, height: u32) -> Vec<u8> {
    let image = GrayImage::from_fn(width, height, |x, _| Luma([(x * 9) as u8]));
    encode_png(&DynamicImage::ImageLuma8(image))
}

/// Flat RGB image of one grey shade; shades should be multiples of 40.
pub(crate) fn shade_png(shade: u8) -> Vec<u8> {
    encode_png(&DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 32, Rgb([shade, shade, shade]))))
}

/// Recover the shade written by [`shade_png`], tolerant of JPEG re-encoding.
pub(crate) fn shade_of(path: &Path) -> u8 {
    let image = image::open(path).unwrap().to_rgb8();
    let centre = image.get_pixel(image.width() / 2, image.height() / 2).0[0];
    ((f32::from(centre) / 40.0).round() * 40.0) as u8
}

pub(crate) fn write_file(work_dir: &WorkDir, extension: &str, bytes: &[u8]) -> PathBuf {
    let path = work_dir.fresh_file(extension);
    std::fs::write(&path, bytes).unwrap();
    path
}

#[derive(Clone, Default)]
struct ServerState {
    routes: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

/// Local HTTP server serving registered byte blobs and counting requests per path.
pub(crate) struct ImageServer {
    addr: SocketAddr,
    state: ServerState,
}

impl ImageServer {
    pub async fn start() -> Self {
        let state = ServerState::default();
        let app = Router::new().fallback(serve).with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        Self { addr, state }
    }

    pub fn serve(&self, path: &str, bytes: Vec<u8>) {
        self.state.routes.lock().unwrap().insert(path.to_string(), bytes);
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub fn hits(&self, path: &str) -> usize {
        self.state.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }
}

async fn serve(State(state): State<ServerState>, uri: Uri) -> Response {
    let path = uri.path().to_string();
    *state.hits.lock().unwrap().entry(path.clone()).or_default() += 1;
    let body = state.routes.lock().unwrap().get(&path).cloned();
    match body {
        Some(bytes) => (StatusCode::OK, bytes).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}
