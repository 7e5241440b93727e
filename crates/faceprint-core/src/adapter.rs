//! Lazily initialized, serialized access to a face model.
//!
//! The adapter owns the process-wide model instances. They are built on
//! first use, exactly once even under concurrent first callers; a failed
//! build is not remembered, so the next call tries again. Extraction runs
//! on the in-memory pixel grid first and falls back once to a temporary
//! PNG file when the model rejects the in-memory input.

use crate::backend::{FaceModel, ModelError, ModelLoader, ModelOutput};
use crate::codec;
use crate::error::FaceError;
use crate::types::Embedding;
use image::{ImageFormat, RgbImage};
use once_cell::sync::OnceCell;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, TryLockError};
use std::time::Instant;

const TEMP_PREFIX: &str = "faceprint-";

/// Why the in-memory strategy produced no embedding.
enum InMemoryFailure {
    /// The model could not take the pixel grid; retry through a file.
    TryNextStrategy(ModelError),
    /// The model ran and the answer is final (no face, zero norm, ...).
    Final(FaceError),
}

/// Fixed set of independently loaded model instances.
struct ModelPool {
    slots: Vec<Mutex<Box<dyn FaceModel>>>,
    next: AtomicUsize,
}

impl ModelPool {
    /// Take the first idle instance, starting from the round-robin cursor.
    /// Blocks on the cursor's slot only when every instance is busy.
    fn checkout(&self) -> MutexGuard<'_, Box<dyn FaceModel>> {
        let start = self.next.fetch_add(1, Ordering::Relaxed);
        let len = self.slots.len();

        for offset in 0..len {
            let idx = (start + offset) % len;
            match self.slots[idx].try_lock() {
                Ok(guard) => return guard,
                Err(TryLockError::Poisoned(poisoned)) => return reclaim(idx, poisoned),
                Err(TryLockError::WouldBlock) => continue,
            }
        }

        let idx = start % len;
        self.slots[idx]
            .lock()
            .unwrap_or_else(|poisoned| reclaim(idx, poisoned))
    }
}

fn reclaim<G>(slot: usize, poisoned: PoisonError<G>) -> G {
    tracing::warn!(slot, "model lock poisoned by a panicked caller; reusing instance");
    poisoned.into_inner()
}

/// Backend adapter: `extract(image) -> Embedding`.
pub struct BackendAdapter {
    loader: Box<dyn ModelLoader>,
    pool_size: usize,
    pool: OnceCell<ModelPool>,
}

impl BackendAdapter {
    /// Create an adapter that will build one model instance on first use.
    pub fn new(loader: Box<dyn ModelLoader>) -> Self {
        Self {
            loader,
            pool_size: 1,
            pool: OnceCell::new(),
        }
    }

    /// Build `size` independent instances instead of one. Calls are spread
    /// across them round-robin; each instance still serves one call at a time.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size.max(1);
        self
    }

    pub fn backend_name(&self) -> &str {
        self.loader.name()
    }

    /// Whether the model has been constructed.
    pub fn is_loaded(&self) -> bool {
        self.pool.get().is_some()
    }

    /// Build the model now instead of on the first request.
    pub fn warm_up(&self) -> Result<(), FaceError> {
        self.pool().map(|_| ())
    }

    /// Extract the unit-norm embedding of the dominant face in `image`.
    pub fn extract(&self, image: &RgbImage) -> Result<Embedding, FaceError> {
        if image.width() == 0 || image.height() == 0 {
            return Err(FaceError::Input("image has no pixels".into()));
        }

        let pool = self.pool()?;
        let mut model = pool.checkout();

        match extract_in_memory(&mut **model, image) {
            Ok(embedding) => Ok(embedding),
            Err(InMemoryFailure::Final(err)) => Err(err),
            Err(InMemoryFailure::TryNextStrategy(cause)) => {
                tracing::warn!(
                    error = %cause,
                    width = image.width(),
                    height = image.height(),
                    "in-memory extraction failed; retrying through a temporary file"
                );
                extract_via_temp_file(&mut **model, image)
            }
        }
    }

    fn pool(&self) -> Result<&ModelPool, FaceError> {
        self.pool
            .get_or_try_init(|| -> Result<ModelPool, ModelError> {
                tracing::info!(
                    backend = self.loader.name(),
                    instances = self.pool_size,
                    "loading face model"
                );
                let started = Instant::now();

                let slots = (0..self.pool_size)
                    .map(|_| self.loader.load().map(Mutex::new))
                    .collect::<Result<Vec<_>, _>>()?;

                tracing::info!(
                    backend = self.loader.name(),
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "face model loaded"
                );
                Ok(ModelPool {
                    slots,
                    next: AtomicUsize::new(0),
                })
            })
            .map_err(|err| {
                tracing::error!(backend = self.loader.name(), error = %err, "face model initialization failed");
                FaceError::BackendUnavailable(err.to_string())
            })
    }
}

fn extract_in_memory(
    model: &mut dyn FaceModel,
    image: &RgbImage,
) -> Result<Embedding, InMemoryFailure> {
    match model.analyze(image) {
        Ok(output) => embedding_from_output(output).map_err(InMemoryFailure::Final),
        Err(err) if err.is_retryable() => Err(InMemoryFailure::TryNextStrategy(err)),
        Err(err) => Err(InMemoryFailure::Final(err.into())),
    }
}

/// Write the image to a uniquely named PNG and run the model on the file.
///
/// The file is removed when `file` drops, on every return path.
fn extract_via_temp_file(
    model: &mut dyn FaceModel,
    image: &RgbImage,
) -> Result<Embedding, FaceError> {
    let mut file = tempfile::Builder::new()
        .prefix(TEMP_PREFIX)
        .suffix(".png")
        .tempfile()
        .map_err(|e| FaceError::BackendUnavailable(format!("temporary file: {e}")))?;

    image
        .write_to(file.as_file_mut(), ImageFormat::Png)
        .map_err(|e| FaceError::BackendUnavailable(format!("temporary file: {e}")))?;
    file.as_file_mut()
        .flush()
        .map_err(|e| FaceError::BackendUnavailable(format!("temporary file: {e}")))?;

    tracing::debug!(path = %file.path().display(), "running model on temporary file");
    let output = model.analyze_file(file.path())?;
    embedding_from_output(output)
}

fn embedding_from_output(output: ModelOutput) -> Result<Embedding, FaceError> {
    let face = output.into_dominant().ok_or(FaceError::NoFaceDetected)?;
    tracing::debug!(
        confidence = face.confidence,
        bbox = ?face.bbox.as_ref().map(|b| [b.x, b.y, b.width, b.height]),
        "dominant face"
    );
    let raw = face.into_vector().ok_or(FaceError::NoFaceDetected)?;
    Ok(codec::normalize(&raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::FaceObservation;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, Barrier};
    use std::time::Duration;

    #[derive(Clone, Copy)]
    enum Behaviour {
        Succeed,
        RejectPixels,
        RejectEverything,
        NoFace,
        ZeroVector,
        MissingField,
    }

    struct ScriptedModel {
        behaviour: Behaviour,
        seen_files: Arc<Mutex<Vec<PathBuf>>>,
    }

    fn observation(values: Vec<f32>) -> ModelOutput {
        ModelOutput::Many(vec![FaceObservation {
            embedding: Some(values),
            confidence: 0.99,
            bbox: None,
        }])
    }

    impl FaceModel for ScriptedModel {
        fn analyze(&mut self, _image: &RgbImage) -> Result<ModelOutput, ModelError> {
            match self.behaviour {
                Behaviour::Succeed => Ok(observation(vec![3.0, 4.0])),
                Behaviour::RejectPixels | Behaviour::RejectEverything => {
                    Err(ModelError::UnsupportedInput("pixel grid".into()))
                }
                Behaviour::NoFace => Err(ModelError::NoFace),
                Behaviour::ZeroVector => Ok(observation(vec![0.0, 0.0])),
                Behaviour::MissingField => Ok(ModelOutput::Single(FaceObservation::default())),
            }
        }

        fn analyze_file(&mut self, path: &Path) -> Result<ModelOutput, ModelError> {
            assert!(path.exists(), "temporary file must exist during the call");
            self.seen_files.lock().unwrap().push(path.to_path_buf());
            match self.behaviour {
                Behaviour::RejectEverything => Err(ModelError::Inference("crashed".into())),
                _ => Ok(ModelOutput::Single(FaceObservation {
                    embedding: Some(vec![0.0, 2.0]),
                    confidence: 0.8,
                    bbox: None,
                })),
            }
        }
    }

    struct CountingLoader {
        behaviour: Behaviour,
        loads: Arc<AtomicUsize>,
        failures_left: AtomicUsize,
        delay: Duration,
        seen_files: Arc<Mutex<Vec<PathBuf>>>,
    }

    impl CountingLoader {
        fn new(behaviour: Behaviour) -> Self {
            Self {
                behaviour,
                loads: Arc::new(AtomicUsize::new(0)),
                failures_left: AtomicUsize::new(0),
                delay: Duration::ZERO,
                seen_files: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    impl ModelLoader for CountingLoader {
        fn name(&self) -> &str {
            "scripted"
        }

        fn load(&self) -> Result<Box<dyn FaceModel>, ModelError> {
            std::thread::sleep(self.delay);
            self.loads.fetch_add(1, Ordering::SeqCst);
            let failing = self
                .failures_left
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if failing {
                return Err(ModelError::Load("weights missing".into()));
            }
            Ok(Box::new(ScriptedModel {
                behaviour: self.behaviour,
                seen_files: self.seen_files.clone(),
            }))
        }
    }

    fn image() -> RgbImage {
        RgbImage::from_pixel(8, 8, image::Rgb([10, 20, 30]))
    }

    #[test]
    fn test_extract_normalizes() {
        let adapter = BackendAdapter::new(Box::new(CountingLoader::new(Behaviour::Succeed)));
        assert!(!adapter.is_loaded());

        let e = adapter.extract(&image()).unwrap();
        assert!(adapter.is_loaded());
        assert!((e.values()[0] - 0.6).abs() < 1e-6);
        assert!((e.values()[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn test_concurrent_first_calls_load_once() {
        let mut loader = CountingLoader::new(Behaviour::Succeed);
        loader.delay = Duration::from_millis(50);
        let loads = loader.loads.clone();
        let adapter = Arc::new(BackendAdapter::new(Box::new(loader)));

        let threads = 16;
        let barrier = Arc::new(Barrier::new(threads));
        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let adapter = adapter.clone();
                let barrier = barrier.clone();
                std::thread::spawn(move || {
                    barrier.wait();
                    adapter.extract(&image()).unwrap()
                })
            })
            .collect();

        for h in handles {
            let e = h.join().unwrap();
            assert_eq!(e.dim(), 2);
        }
        assert_eq!(loads.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_pool_loads_each_instance_once() {
        let loader = CountingLoader::new(Behaviour::Succeed);
        let loads = loader.loads.clone();
        let adapter = BackendAdapter::new(Box::new(loader)).with_pool_size(3);

        for _ in 0..10 {
            adapter.extract(&image()).unwrap();
        }
        assert_eq!(loads.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_checkout_skips_busy_instance() {
        let model = |behaviour| -> Mutex<Box<dyn FaceModel>> {
            Mutex::new(Box::new(ScriptedModel {
                behaviour,
                seen_files: Arc::new(Mutex::new(Vec::new())),
            }))
        };
        let pool = Arc::new(ModelPool {
            slots: vec![model(Behaviour::ZeroVector), model(Behaviour::Succeed)],
            next: AtomicUsize::new(0),
        });

        // Slot 0 is where the cursor points; keep it busy.
        let busy = pool.slots[0].lock().unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let worker = {
            let pool = pool.clone();
            std::thread::spawn(move || {
                let mut model = pool.checkout();
                let out = model.analyze(&image()).unwrap();
                tx.send(out.into_dominant().and_then(FaceObservation::into_vector)).unwrap();
            })
        };

        let vector = rx
            .recv_timeout(Duration::from_secs(5))
            .expect("checkout waited on a busy instance while another was idle");
        assert_eq!(vector, Some(vec![3.0, 4.0]));
        drop(busy);
        worker.join().unwrap();
    }

    #[test]
    fn test_failed_initialization_is_retried() {
        let loader = CountingLoader::new(Behaviour::Succeed);
        loader.failures_left.store(1, Ordering::SeqCst);
        let loads = loader.loads.clone();
        let adapter = BackendAdapter::new(Box::new(loader));

        assert!(matches!(
            adapter.extract(&image()),
            Err(FaceError::BackendUnavailable(_))
        ));
        assert!(!adapter.is_loaded());

        adapter.extract(&image()).unwrap();
        assert!(adapter.is_loaded());
        assert_eq!(loads.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_fallback_uses_and_removes_temp_file() {
        let loader = CountingLoader::new(Behaviour::RejectPixels);
        let seen = loader.seen_files.clone();
        let adapter = BackendAdapter::new(Box::new(loader));

        let e = adapter.extract(&image()).unwrap();
        assert!((e.values()[1] - 1.0).abs() < 1e-6);

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "fallback runs exactly once");
        assert!(seen[0]
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with(TEMP_PREFIX));
        assert!(!seen[0].exists());
    }

    #[test]
    fn test_failed_fallback_still_removes_temp_file() {
        let loader = CountingLoader::new(Behaviour::RejectEverything);
        let seen = loader.seen_files.clone();
        let adapter = BackendAdapter::new(Box::new(loader));

        assert!(matches!(
            adapter.extract(&image()),
            Err(FaceError::BackendUnavailable(_))
        ));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert!(!seen[0].exists());
    }

    #[test]
    fn test_no_face_is_not_retried() {
        let loader = CountingLoader::new(Behaviour::NoFace);
        let seen = loader.seen_files.clone();
        let adapter = BackendAdapter::new(Box::new(loader));

        assert!(matches!(adapter.extract(&image()), Err(FaceError::NoFaceDetected)));
        assert!(seen.lock().unwrap().is_empty());
    }

    #[test]
    fn test_missing_vector_is_no_face() {
        let adapter = BackendAdapter::new(Box::new(CountingLoader::new(Behaviour::MissingField)));
        assert!(matches!(adapter.extract(&image()), Err(FaceError::NoFaceDetected)));
    }

    #[test]
    fn test_zero_vector_fails_fast() {
        let adapter = BackendAdapter::new(Box::new(CountingLoader::new(Behaviour::ZeroVector)));
        assert!(matches!(adapter.extract(&image()), Err(FaceError::ZeroNorm)));
    }

    #[test]
    fn test_empty_image_rejected_before_load() {
        let loader = CountingLoader::new(Behaviour::Succeed);
        let loads = loader.loads.clone();
        let adapter = BackendAdapter::new(Box::new(loader));

        assert!(matches!(
            adapter.extract(&RgbImage::new(0, 0)),
            Err(FaceError::Input(_))
        ));
        assert_eq!(loads.load(Ordering::SeqCst), 0);
    }
}
