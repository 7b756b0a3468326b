//! Image Store: turn image references into validated local RGB files.
//!
//! Remote images are downloaded once per URL and cached by the SHA-256 of
//! the URL. An inline query is decoded to a fixed target path; other inline
//! payloads get a fresh file each. Every file the store writes lives in its
//! [`WorkDir`].

use crate::cache::{self, CacheEntry, FileCache};
use crate::config::PipelineConfig;
use crate::error::StoreError;
use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig};
use base64::engine::DecodePaddingMode;
use base64::Engine;
use image::{ColorType, DynamicImage, ImageFormat};
use reqwest::header::{self, HeaderMap, HeaderValue};
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const INLINE_TARGET_FILE: &str = "target_face.jpg";
const USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36";
const ACCEPT: &str = "image/webp,image/apng,image/*,*/*;q=0.8";
const ACCEPT_LANGUAGE: &str = "en-US,en;q=0.9";

/// Standard base64, tolerant of missing padding.
const INLINE_BASE64: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// Where an image comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageReference {
    Local(PathBuf),
    Url(String),
    /// Base64 payload, optionally prefixed with a `data:` URI header.
    Inline(String),
}

impl ImageReference {
    /// Classify a free-form reference: `http(s)://` is a URL, `data:` is inline, anything else a path.
    pub fn parse(reference: &str) -> Self {
        let trimmed = reference.trim();
        let lower = trimmed.get(..8).unwrap_or(trimmed).to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(trimmed.to_string())
        } else if lower.starts_with("data:") {
            Self::Inline(trimmed.to_string())
        } else {
            Self::Local(PathBuf::from(trimmed))
        }
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local(path) => write!(f, "{}", path.display()),
            Self::Url(url) => f.write_str(url),
            Self::Inline(payload) => write!(f, "<inline image, {} bytes>", payload.len()),
        }
    }
}

/// A validated RGB image on local disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedImage {
    pub path: PathBuf,
    /// SHA-256 of the file contents, lowercase hex.
    pub hash: String,
}

impl CacheEntry for ResolvedImage {
    fn owned_file(&self) -> Option<&Path> {
        Some(&self.path)
    }
}

/// Per-process scratch directory for downloaded and derived images.
#[derive(Debug)]
pub struct WorkDir {
    root: PathBuf,
}

impl WorkDir {
    /// Create a fresh `facematch-<uuid>` directory under `base`, or under the
    /// system temp dir when no base is given. `base` itself is never removed.
    pub fn create(base: Option<PathBuf>) -> std::io::Result<Self> {
        let base = base.unwrap_or_else(std::env::temp_dir);
        let root = base.join(format!("facematch-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    /// A new, unused file path inside the directory.
    pub fn fresh_file(&self, extension: &str) -> PathBuf {
        self.root.join(format!("{}.{extension}", uuid::Uuid::new_v4()))
    }

    /// Remove the directory and everything in it. Failures are logged, not returned.
    pub fn remove_all(&self) {
        match std::fs::remove_dir_all(&self.root) {
            Ok(()) => tracing::debug!(path = %self.root.display(), "removed work directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %self.root.display(), error = %e, "failed to remove work directory"),
        }
    }
}

pub struct ImageStore {
    work_dir: Arc<WorkDir>,
    client: reqwest::Client,
    downloads: FileCache<ResolvedImage>,
    inline_target: PathBuf,
}

impl ImageStore {
    pub fn new(config: &PipelineConfig, work_dir: Arc<WorkDir>) -> Result<Self, StoreError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static(ACCEPT));
        headers.insert(header::ACCEPT_LANGUAGE, HeaderValue::from_static(ACCEPT_LANGUAGE));

        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .timeout(config.download_timeout)
            .build()?;

        let inline_target = work_dir.path().join(INLINE_TARGET_FILE);

        Ok(Self {
            work_dir,
            client,
            downloads: FileCache::new("downloads", config.cache_capacity, config.cache_images),
            inline_target,
        })
    }

    pub fn work_dir(&self) -> &Arc<WorkDir> {
        &self.work_dir
    }

    pub async fn resolve(&self, reference: &ImageReference) -> Result<ResolvedImage, StoreError> {
        match reference {
            ImageReference::Local(path) => {
                let path = path.clone();
                blocking(move || resolve_local(&path)).await
            }
            ImageReference::Url(url) => self.resolve_url(url).await,
            ImageReference::Inline(payload) => {
                let target = self.work_dir.fresh_file("jpg");
                self.resolve_inline_to(payload, target).await
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but an inline query lands on the fixed
    /// `target_face.jpg` in the work directory.
    pub async fn resolve_query(&self, reference: &ImageReference) -> Result<ResolvedImage, StoreError> {
        match reference {
            ImageReference::Inline(payload) => {
                let target = self.inline_target.clone();
                self.resolve_inline_to(payload, target).await
            }
            other => self.resolve(other).await,
        }
    }

    /// Delete one resolved file. Best-effort.
    pub fn release(&self, image: &ResolvedImage) {
        cache::remove_file_quietly(&image.path);
    }

    /// Remove every file the store wrote.
    pub fn cleanup(&self) {
        self.downloads.purge_evicted();
        self.work_dir.remove_all();
    }

    async fn resolve_inline_to(&self, payload: &str, target: PathBuf) -> Result<ResolvedImage, StoreError> {
        let payload = payload.to_string();
        blocking(move || resolve_inline(&payload, &target)).await
    }

    async fn resolve_url(&self, url: &str) -> Result<ResolvedImage, StoreError> {
        let key = url_key(url);
        self.downloads
            .get_or_try_insert_with(
                &key,
                |cached| validate_image(&cached.path).is_ok(),
                || self.download(url),
            )
            .await
    }

    async fn download(&self, url: &str) -> Result<ResolvedImage, StoreError> {
        tracing::debug!(url, "downloading image");
        let failed = |e: reqwest::Error| StoreError::DownloadFailed {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(failed)?;
        let bytes = response.bytes().await.map_err(failed)?;

        let target = self.work_dir.fresh_file("jpg");
        blocking(move || {
            let image = image::load_from_memory(&bytes).map_err(|source| StoreError::InvalidImage {
                path: target.clone(),
                source,
            })?;
            write_rgb_jpeg(&image, &target)?;
            finish(target)
        })
        .await
    }
}

/// Stable cache key for a URL.
pub fn url_key(url: &str) -> String {
    format!("{:x}", Sha256::digest(url.as_bytes()))
}

/// SHA-256 of the given bytes, lowercase hex.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Check that `path` exists, decodes as an image, and is 8-bit RGB.
pub fn validate_image(path: &Path) -> Result<(), StoreError> {
    let image = open_image(path)?;
    if image.color() == ColorType::Rgb8 {
        Ok(())
    } else {
        Err(StoreError::NotRgb {
            path: path.to_path_buf(),
            color: format!("{:?}", image.color()),
        })
    }
}

fn open_image(path: &Path) -> Result<DynamicImage, StoreError> {
    if !path.exists() {
        return Err(StoreError::NotFound(path.to_path_buf()));
    }
    image::open(path).map_err(|source| StoreError::InvalidImage {
        path: path.to_path_buf(),
        source,
    })
}

fn resolve_local(path: &Path) -> Result<ResolvedImage, StoreError> {
    let image = open_image(path)?;
    if image.color() == ColorType::Rgb8 {
        return finish(path.to_path_buf());
    }

    let rgb_path = path.with_extension("jpg");
    tracing::debug!(
        from = %path.display(),
        to = %rgb_path.display(),
        color = ?image.color(),
        "converting local image to RGB"
    );
    write_rgb_jpeg(&image, &rgb_path)?;
    finish(rgb_path)
}

/// Decode a base64 payload (optionally a `data:` URI) into an image.
pub fn decode_inline(payload: &str) -> Result<DynamicImage, StoreError> {
    let encoded: String = strip_data_uri(payload).split_whitespace().collect();
    let bytes = INLINE_BASE64
        .decode(encoded.as_bytes())
        .map_err(|e| StoreError::DecodeFailed(e.to_string()))?;
    image::load_from_memory(&bytes).map_err(|e| StoreError::DecodeFailed(e.to_string()))
}

fn resolve_inline(payload: &str, target: &Path) -> Result<ResolvedImage, StoreError> {
    let image = decode_inline(payload)?;

    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent)?;
    }
    write_rgb_jpeg(&image, target)?;
    finish(target.to_path_buf())
}

/// Drop a `data:image/...;base64,` header if present.
fn strip_data_uri(payload: &str) -> &str {
    payload.split_once(',').map_or(payload, |(_, data)| data)
}

fn write_rgb_jpeg(image: &DynamicImage, path: &Path) -> Result<(), StoreError> {
    image
        .to_rgb8()
        .save_with_format(path, ImageFormat::Jpeg)
        .map_err(|source| StoreError::InvalidImage {
            path: path.to_path_buf(),
            source,
        })
}

fn finish(path: PathBuf) -> Result<ResolvedImage, StoreError> {
    validate_image(&path)?;
    let hash = content_hash(&std::fs::read(&path)?);
    Ok(ResolvedImage { path, hash })
}

async fn blocking<T, F>(f: F) -> Result<T, StoreError>
where
    F: FnOnce() -> Result<T, StoreError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| StoreError::Worker(e.to_string()))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{self, encode_png, gray_png, rgb_png, ImageServer};
    use base64::engine::general_purpose::STANDARD;

    fn store() -> ImageStore {
        let work_dir = Arc::new(WorkDir::create(None).unwrap());
        ImageStore::new(&PipelineConfig::default(), work_dir).unwrap()
    }

    fn assert_rgb_jpeg(path: &Path) {
        let format = image::ImageReader::open(path)
            .unwrap()
            .with_guessed_format()
            .unwrap()
            .format();
        assert_eq!(format, Some(ImageFormat::Jpeg));
        assert_eq!(image::open(path).unwrap().color(), ColorType::Rgb8);
    }

    #[test]
    fn test_parse_reference() {
        assert_eq!(
            ImageReference::parse("https://cdn.example/a.jpg"),
            ImageReference::Url("https://cdn.example/a.jpg".into())
        );
        assert_eq!(
            ImageReference::parse("HTTP://cdn.example/a.jpg"),
            ImageReference::Url("HTTP://cdn.example/a.jpg".into())
        );
        assert!(matches!(ImageReference::parse("data:image/png;base64,AAAA"), ImageReference::Inline(_)));
        assert_eq!(
            ImageReference::parse(" ./photos/a.png "),
            ImageReference::Local(PathBuf::from("./photos/a.png"))
        );
    }

    #[test]
    fn test_strip_data_uri() {
        assert_eq!(strip_data_uri("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_uri("QUJD"), "QUJD");
    }

    #[test]
    fn test_url_key_is_stable() {
        assert_eq!(url_key("https://a/b.jpg"), url_key("https://a/b.jpg"));
        assert_ne!(url_key("https://a/b.jpg"), url_key("https://a/c.jpg"));
        assert_eq!(url_key("x").len(), 64);
    }

    #[tokio::test]
    async fn test_local_rgb_image_resolves_in_place() {
        let store = store();
        let path = testing::write_file(store.work_dir(), "png", &rgb_png(32, 32));

        let resolved = store.resolve(&ImageReference::Local(path.clone())).await.unwrap();
        assert_eq!(resolved.path, path);
        assert_eq!(resolved.hash, content_hash(&std::fs::read(&path).unwrap()));
    }

    #[tokio::test]
    async fn test_local_grayscale_image_gets_rgb_sibling() {
        let store = store();
        let path = testing::write_file(store.work_dir(), "png", &gray_png(32, 32));

        let resolved = store.resolve(&ImageReference::Local(path.clone())).await.unwrap();
        assert_eq!(resolved.path, path.with_extension("jpg"));
        assert_rgb_jpeg(&resolved.path);
    }

    #[tokio::test]
    async fn test_local_failures() {
        let store = store();
        let missing = store.work_dir().path().join("missing.jpg");
        assert!(matches!(
            store.resolve(&ImageReference::Local(missing)).await,
            Err(StoreError::NotFound(_))
        ));

        let garbage = testing::write_file(store.work_dir(), "jpg", b"definitely not an image");
        assert!(matches!(
            store.resolve(&ImageReference::Local(garbage)).await,
            Err(StoreError::InvalidImage { .. })
        ));
    }

    #[tokio::test]
    async fn test_inline_non_rgb_becomes_rgb_jpeg() {
        let store = store();
        let payload = format!("data:image/png;base64,{}", STANDARD.encode(gray_png(24, 24)));

        let resolved = store.resolve_query(&ImageReference::Inline(payload)).await.unwrap();
        assert_eq!(resolved.path, store.work_dir().path().join(INLINE_TARGET_FILE));
        assert_rgb_jpeg(&resolved.path);
    }

    #[tokio::test]
    async fn test_inline_candidates_get_their_own_files() {
        let store = store();
        let dark = ImageReference::Inline(STANDARD.encode(testing::shade_png(40)));
        let light = ImageReference::Inline(STANDARD.encode(testing::shade_png(240)));

        let query = store.resolve_query(&light).await.unwrap();
        let first = store.resolve(&dark).await.unwrap();
        let second = store.resolve(&light).await.unwrap();

        assert_ne!(first.path, second.path);
        assert_ne!(first.path, query.path);
        assert_ne!(second.path, query.path);
        assert_eq!(testing::shade_of(&query.path), 240);
        assert_eq!(testing::shade_of(&first.path), 40);
        assert_eq!(second.hash, query.hash);
    }

    #[tokio::test]
    async fn test_inline_without_prefix_or_padding() {
        let store = store();
        let encoded = STANDARD.encode(rgb_png(8, 8));
        let unpadded = encoded.trim_end_matches('=').to_string();

        let resolved = store.resolve(&ImageReference::Inline(unpadded)).await.unwrap();
        assert_rgb_jpeg(&resolved.path);
    }

    #[tokio::test]
    async fn test_inline_malformed_payload() {
        let store = store();
        for payload in ["data:image/png;base64,@@not base64@@", "aGVsbG8gd29ybGQ="] {
            let result = store.resolve(&ImageReference::Inline(payload.to_string())).await;
            assert!(matches!(result, Err(StoreError::DecodeFailed(_))), "{payload}");
        }
    }

    #[tokio::test]
    async fn test_url_resolved_twice_downloads_once() {
        let server = ImageServer::start().await;
        server.serve("/ada.png", rgb_png(40, 40));
        let store = store();
        let reference = ImageReference::Url(server.url("/ada.png"));

        let first = store.resolve(&reference).await.unwrap();
        let second = store.resolve(&reference).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(server.hits("/ada.png"), 1);
        assert_rgb_jpeg(&first.path);
        assert!(first.path.starts_with(store.work_dir().path()));
    }

    #[tokio::test]
    async fn test_url_refetched_when_cached_file_disappears() {
        let server = ImageServer::start().await;
        server.serve("/bob.png", rgb_png(40, 40));
        let store = store();
        let reference = ImageReference::Url(server.url("/bob.png"));

        let first = store.resolve(&reference).await.unwrap();
        std::fs::remove_file(&first.path).unwrap();
        let second = store.resolve(&reference).await.unwrap();

        assert_ne!(first.path, second.path);
        assert!(second.path.exists());
        assert_eq!(server.hits("/bob.png"), 2);
    }

    #[tokio::test]
    async fn test_identical_bytes_hash_identically() {
        let server = ImageServer::start().await;
        let bytes = encode_png(&image::DynamicImage::ImageRgb8(image::RgbImage::from_pixel(
            16,
            16,
            image::Rgb([10, 200, 30]),
        )));
        server.serve("/one.png", bytes.clone());
        server.serve("/two.png", bytes);
        let store = store();

        let one = store.resolve(&ImageReference::Url(server.url("/one.png"))).await.unwrap();
        let two = store.resolve(&ImageReference::Url(server.url("/two.png"))).await.unwrap();

        assert_ne!(one.path, two.path);
        assert_eq!(one.hash, two.hash);
    }

    #[tokio::test]
    async fn test_url_failures_are_not_retried() {
        let server = ImageServer::start().await;
        server.serve("/broken.jpg", b"<html>not an image</html>".to_vec());
        let store = store();

        let missing = store.resolve(&ImageReference::Url(server.url("/missing.jpg"))).await;
        assert!(matches!(missing, Err(StoreError::DownloadFailed { .. })));
        assert_eq!(server.hits("/missing.jpg"), 1);

        let broken = store.resolve(&ImageReference::Url(server.url("/broken.jpg"))).await;
        assert!(matches!(broken, Err(StoreError::InvalidImage { .. })));
        assert_eq!(server.hits("/broken.jpg"), 1);
    }

    #[tokio::test]
    async fn test_cleanup_removes_work_dir() {
        let store = store();
        let path = testing::write_file(store.work_dir(), "png", &rgb_png(4, 4));
        store.cleanup();
        assert!(!path.exists());
        assert!(!store.work_dir().path().exists());
    }

    #[tokio::test]
    async fn test_cleanup_leaves_configured_base_alone() {
        let base = std::env::temp_dir().join(format!("facematch-base-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&base).unwrap();
        let keep = base.join("keep.txt");
        std::fs::write(&keep, b"user data").unwrap();

        let work_dir = Arc::new(WorkDir::create(Some(base.clone())).unwrap());
        assert!(work_dir.path().starts_with(&base));
        assert_ne!(work_dir.path(), base.as_path());
        let store = ImageStore::new(&PipelineConfig::default(), work_dir).unwrap();
        let payload = STANDARD.encode(rgb_png(8, 8));
        store.resolve_query(&ImageReference::Inline(payload)).await.unwrap();

        store.cleanup();
        assert!(keep.exists());
        assert!(base.exists());
        assert!(!store.work_dir().path().exists());
        std::fs::remove_dir_all(&base).unwrap();
    }
}
