use crate::compare::interface::{CompareError, HeatmapPublisher, ImageSource};
use crate::compare::service::{BaselineUpload, CompareService, ScreenshotUpload};
use crate::config::CompareConfig;
use crate::imaging::decode::test_support::encode_as;
use crate::imaging::{PixelImage, SourceFormat};
use crate::storage::ResultStore;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

// ── Image byte generators ────────────────────────────────────

pub const RED: [u8; 4] = [255, 0, 0, 255];
pub const BLUE: [u8; 4] = [0, 0, 255, 255];
pub const WHITE: [u8; 4] = [255, 255, 255, 255];

pub fn solid_png(w: u32, h: u32, rgba: [u8; 4]) -> Vec<u8> {
    let img = PixelImage::from_fn(w, h, |_, _| rgba).unwrap();
    encode_as(&img, SourceFormat::Png)
}

/// White page with a filled rectangle.
pub fn page_with_block(w: u32, h: u32, block: (u32, u32, u32, u32), rgba: [u8; 4]) -> Vec<u8> {
    let (bx, by, bw, bh) = block;
    let img = PixelImage::from_fn(w, h, |x, y| {
        if x >= bx && x < bx + bw && y >= by && y < by + bh {
            rgba
        } else {
            WHITE
        }
    })
    .unwrap();
    encode_as(&img, SourceFormat::Png)
}

// ── Collaborator doubles ────────────────────────────────────

/// Image source backed by a map of reference → bytes.
#[derive(Default)]
pub struct MapSource {
    images: Mutex<HashMap<String, Vec<u8>>>,
    pub fetches: AtomicUsize,
}

impl MapSource {
    pub fn insert(&self, reference: &str, bytes: Vec<u8>) {
        self.images.lock().unwrap().insert(reference.to_string(), bytes);
    }
}

#[async_trait]
impl ImageSource for MapSource {
    async fn fetch(&self, reference: &str) -> Result<Vec<u8>, CompareError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.images
            .lock()
            .unwrap()
            .get(reference)
            .cloned()
            .ok_or_else(|| CompareError::fetch(reference, "HTTP 404 Not Found"))
    }
}

/// Publisher that records what it was given, or always fails.
#[derive(Default)]
pub struct RecordingPublisher {
    pub fail: bool,
    pub published: Mutex<Vec<String>>,
}

impl RecordingPublisher {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl HeatmapPublisher for RecordingPublisher {
    fn id(&self) -> String {
        "recording".to_string()
    }

    async fn publish(&self, image_name: &str, png: &[u8]) -> Result<String, CompareError> {
        if self.fail {
            return Err(CompareError::Publish("storage offline".to_string()));
        }
        assert!(png.starts_with(b"\x89PNG"));
        self.published.lock().unwrap().push(image_name.to_string());
        Ok(format!("https://heatmaps.test/{}.png", image_name))
    }
}

// ── Service setup helpers ────────────────────────────────────

pub struct Harness {
    pub service: CompareService,
    pub source: Arc<MapSource>,
    pub publisher: Arc<RecordingPublisher>,
}

pub async fn harness() -> Harness {
    harness_with(RecordingPublisher::default(), CompareConfig::default()).await
}

pub async fn harness_with(publisher: RecordingPublisher, config: CompareConfig) -> Harness {
    let store = ResultStore::in_memory().await.unwrap();
    harness_on(store, publisher, config)
}

pub fn harness_on(store: ResultStore, publisher: RecordingPublisher, config: CompareConfig) -> Harness {
    let source = Arc::new(MapSource::default());
    let publisher = Arc::new(publisher);
    let service = CompareService::new(store, source.clone(), publisher.clone(), &config);
    Harness {
        service,
        source,
        publisher,
    }
}

impl Harness {
    /// Register a baseline image under `mem://baseline/{name}`.
    pub async fn baseline(&self, project: &str, name: &str, bytes: Vec<u8>) {
        let url = format!("mem://baseline/{}", name);
        self.source.insert(&url, bytes);
        self.service
            .register_baselines(
                project,
                None,
                vec![BaselineUpload {
                    screen_name: name.to_string(),
                    source: url,
                }],
            )
            .await
            .unwrap();
    }

    /// Make candidate bytes available and return the upload entry for them.
    pub fn candidate(&self, file_name: &str, bytes: Vec<u8>) -> ScreenshotUpload {
        let url = format!("mem://candidate/{}", file_name);
        self.source.insert(&url, bytes);
        ScreenshotUpload {
            image_name: file_name.to_string(),
            source: url,
        }
    }
}
