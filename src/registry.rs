//! Process-lifetime model handles
//!
//! Each model is loaded at most once, on first use or through
//! [`ModelRegistry::preload`]. Loading runs behind a one-time gate so
//! concurrent callers wait for a single load; a failed load leaves the gate
//! open and the next caller retries. Inference is serialized per model.

use crate::{
    cache::ModelCache,
    config::WorkerConfig,
    detection::{ObjectDetector, YoloDetector},
    error::{PhotoAiError, Result},
    inference::{BackendFactory, InferenceBackend, SessionOptions},
    models::ModelSpec,
    segmentation::{ModelSegmenter, Segmenter},
};
use once_cell::sync::OnceCell;
use std::sync::{Arc, Mutex, MutexGuard};

/// Boxed segmenter shared by the registry
pub type DynSegmenter = Box<dyn Segmenter + Send>;
/// Boxed detector shared by the registry
pub type DynDetector = Box<dyn ObjectDetector + Send>;

type Loader<T> = Box<dyn Fn() -> Result<T> + Send + Sync>;

/// Lazily loaded segmentation and detection models
pub struct ModelRegistry {
    segmenter: OnceCell<Mutex<DynSegmenter>>,
    detector: OnceCell<Mutex<DynDetector>>,
    load_segmenter: Loader<DynSegmenter>,
    load_detector: Loader<DynDetector>,
}

impl std::fmt::Debug for ModelRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelRegistry")
            .field("segmenter_loaded", &self.is_segmenter_loaded())
            .field("detector_loaded", &self.is_detector_loaded())
            .finish()
    }
}

impl ModelRegistry {
    /// Registry that builds each model with the given loader on first use
    pub fn new<S, D>(load_segmenter: S, load_detector: D) -> Self
    where
        S: Fn() -> Result<DynSegmenter> + Send + Sync + 'static,
        D: Fn() -> Result<DynDetector> + Send + Sync + 'static,
    {
        Self {
            segmenter: OnceCell::new(),
            detector: OnceCell::new(),
            load_segmenter: Box::new(load_segmenter),
            load_detector: Box::new(load_detector),
        }
    }

    /// Registry loading both models from configuration through `factory`
    #[must_use]
    pub fn from_config(
        config: &WorkerConfig,
        factory: Arc<dyn BackendFactory>,
        cache: ModelCache,
    ) -> Self {
        let segmentation = (config.clone(), Arc::clone(&factory), cache.clone());
        let detection = (config.clone(), factory, cache);

        Self::new(
            move || {
                let (config, factory, cache) = &segmentation;
                let backend =
                    load_backend(factory.as_ref(), config, cache, &config.segmentation, "segmentation")?;
                let segmenter =
                    ModelSegmenter::new(backend, config.segmentation.preprocessing.clone())?;
                Ok(Box::new(segmenter) as DynSegmenter)
            },
            move || {
                let (config, factory, cache) = &detection;
                let backend =
                    load_backend(factory.as_ref(), config, cache, &config.detection.model, "detection")?;
                let detector = YoloDetector::new(backend, config.detection.clone())?;
                Ok(Box::new(detector) as DynDetector)
            },
        )
    }

    /// Registry over already constructed models
    #[must_use]
    pub fn with_models(segmenter: DynSegmenter, detector: DynDetector) -> Self {
        Self {
            segmenter: OnceCell::with_value(Mutex::new(segmenter)),
            detector: OnceCell::with_value(Mutex::new(detector)),
            load_segmenter: Box::new(|| Err(PhotoAiError::internal("segmenter already provided"))),
            load_detector: Box::new(|| Err(PhotoAiError::internal("detector already provided"))),
        }
    }

    /// Exclusive access to the segmenter, loading it if needed
    ///
    /// # Errors
    /// - Model load failure
    /// - A previous holder panicked
    pub fn segmenter(&self) -> Result<MutexGuard<'_, DynSegmenter>> {
        let cell = self.segmenter.get_or_try_init(|| {
            log::info!("Loading segmentation model");
            (self.load_segmenter)().map(Mutex::new)
        })?;
        cell.lock()
            .map_err(|_| PhotoAiError::internal("segmentation model lock poisoned"))
    }

    /// Exclusive access to the detector, loading it if needed
    ///
    /// # Errors
    /// - Model load failure
    /// - A previous holder panicked
    pub fn detector(&self) -> Result<MutexGuard<'_, DynDetector>> {
        let cell = self.detector.get_or_try_init(|| {
            log::info!("Loading detection model");
            (self.load_detector)().map(Mutex::new)
        })?;
        cell.lock()
            .map_err(|_| PhotoAiError::internal("detection model lock poisoned"))
    }

    /// Load both models now instead of on the first job
    ///
    /// # Errors
    /// - Either model fails to load
    pub fn preload(&self) -> Result<()> {
        drop(self.segmenter()?);
        drop(self.detector()?);
        Ok(())
    }

    #[must_use]
    pub fn is_segmenter_loaded(&self) -> bool {
        self.segmenter.get().is_some()
    }

    #[must_use]
    pub fn is_detector_loaded(&self) -> bool {
        self.detector.get().is_some()
    }
}

fn load_backend(
    factory: &dyn BackendFactory,
    config: &WorkerConfig,
    cache: &ModelCache,
    spec: &ModelSpec,
    role: &str,
) -> Result<Box<dyn InferenceBackend + Send>> {
    let model_path = spec.source.resolve(cache)?;
    let options =
        SessionOptions::from_worker_config(model_path, spec.preprocessing.target_size, config);

    let mut backend = factory.create_backend(config.backend)?;
    if let Some(load_time) = backend.initialize(&options)? {
        log::info!(
            "Loaded {role} model {} on {} in {}ms",
            spec.source.display_name(),
            backend.name(),
            load_time.as_millis()
        );
    }
    Ok(backend)
}
