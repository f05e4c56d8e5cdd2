//! Background import of a PLY file into a [`PointCloud`].

use crate::error::PlyError;
use crate::parser::{PlyParser, PointChunk};
use crate::progress::{Clock, Progress, SystemClock, Throttle};
use pointstream_core::{Aabb, PointCloud, Settings};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info, instrument, warn};

#[derive(Error, Debug)]
pub enum ImportError {
    #[error(transparent)]
    Parse(#[from] PlyError),

    #[error("import job has already run")]
    AlreadyRun,
}

impl ImportError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Parse(err) if err.is_cancelled())
    }
}

/// Shared cancellation flag. Clones observe the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Multiplier applied to every imported position, e.g. to convert
/// millimetres to metres.
pub trait UnitScale: Send {
    fn scale(&self) -> f64;
}

impl<F: Fn() -> f64 + Send> UnitScale for F {
    fn scale(&self) -> f64 {
        self()
    }
}

/// Receiver of "the rendered view is stale" notifications.
pub trait ViewInvalidator: Send {
    fn invalidate(&mut self);
}

impl<F: FnMut() + Send> ViewInvalidator for F {
    fn invalidate(&mut self) {
        self()
    }
}

/// Forwards at most one invalidation per interval. Requests that arrive
/// inside the window are dropped, not queued.
pub struct InvalidationThrottle {
    sink: Box<dyn ViewInvalidator>,
    throttle: Throttle,
    forwarded: u64,
    dropped: u64,
}

impl InvalidationThrottle {
    pub fn new(sink: impl ViewInvalidator + 'static, interval: Duration) -> Self {
        Self {
            sink: Box::new(sink),
            throttle: Throttle::new(interval),
            forwarded: 0,
            dropped: 0,
        }
    }

    /// Returns whether the request was forwarded.
    pub fn request(&mut self, now: Instant) -> bool {
        if self.throttle.ready(now) {
            self.sink.invalidate();
            self.forwarded += 1;
            true
        } else {
            self.dropped += 1;
            false
        }
    }

    /// Forward unconditionally, used once the data is final.
    pub fn flush(&mut self) {
        self.sink.invalidate();
        self.forwarded += 1;
    }

    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImportStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImportDiagnostics {
    pub source: PathBuf,
    pub status: ImportStatus,
    pub processed: u64,
    pub total: u64,
    pub last_error: Option<String>,
    pub dropped_invalidations: u64,
}

/// Imports one PLY file into a new cloud.
///
/// The cloud is only handed back on success; a failed or cancelled import
/// discards whatever was appended so far.
pub struct ImportJob {
    source: PathBuf,
    name: String,
    settings: Settings,
    cancel: CancelToken,
    clock: Arc<dyn Clock>,
    unit_scale: Option<Box<dyn UnitScale>>,
    invalidator: Option<InvalidationThrottle>,
    on_progress: Option<Box<dyn FnMut(&Progress) + Send>>,
    status: ImportStatus,
    processed: u64,
    total: u64,
    last_error: Option<String>,
}

impl ImportJob {
    pub fn new(source: impl Into<PathBuf>, settings: &Settings) -> Self {
        let source = source.into();
        let name = source
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "point cloud".to_string());
        Self {
            source,
            name,
            settings: settings.clone(),
            cancel: CancelToken::new(),
            clock: Arc::new(SystemClock),
            unit_scale: None,
            invalidator: None,
            on_progress: None,
            status: ImportStatus::Pending,
            processed: 0,
            total: 0,
            last_error: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_unit_scale(mut self, unit_scale: impl UnitScale + 'static) -> Self {
        self.unit_scale = Some(Box::new(unit_scale));
        self
    }

    /// Notify `invalidator` as chunks land, at most once per
    /// `invalidation_interval_ms`.
    pub fn with_invalidator(mut self, invalidator: impl ViewInvalidator + 'static) -> Self {
        self.invalidator = Some(InvalidationThrottle::new(
            invalidator,
            self.settings.invalidation_interval(),
        ));
        self
    }

    pub fn with_progress(mut self, on_progress: impl FnMut(&Progress) + Send + 'static) -> Self {
        self.on_progress = Some(Box::new(on_progress));
        self
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    pub fn source(&self) -> &Path {
        &self.source
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn status(&self) -> ImportStatus {
        self.status
    }

    pub fn diagnostics(&self) -> ImportDiagnostics {
        ImportDiagnostics {
            source: self.source.clone(),
            status: self.status,
            processed: self.processed,
            total: self.total,
            last_error: self.last_error.clone(),
            dropped_invalidations: self.invalidator.as_ref().map_or(0, InvalidationThrottle::dropped),
        }
    }

    /// Parse the source file on the calling thread.
    #[instrument(skip(self), fields(source = %self.source.display()))]
    pub fn run(&mut self) -> Result<PointCloud, ImportError> {
        if self.status != ImportStatus::Pending {
            return Err(ImportError::AlreadyRun);
        }
        self.status = ImportStatus::Running;

        let requested = self.unit_scale.as_ref().map_or(1.0, |u| u.scale());
        let scale = if requested.is_finite() && requested != 0.0 {
            requested
        } else {
            warn!(scale = requested, "ignoring unusable unit scale");
            1.0
        };

        let mut cloud = PointCloud::new(self.name.clone(), &self.settings);
        cloud
            .metadata_mut()
            .insert("source".to_string(), self.source.display().to_string());

        let cancel = self.cancel.clone();
        let mut parser = PlyParser::new(&self.settings)
            .with_clock(Arc::clone(&self.clock))
            .with_cancellation(move || cancel.is_cancelled());
        if let Some(on_progress) = self.on_progress.as_mut() {
            parser = parser.with_progress(move |p: &Progress| on_progress(p));
        }

        let clock = Arc::clone(&self.clock);
        let invalidator = &mut self.invalidator;
        let processed = &mut self.processed;
        let result = parser.parse_file(&self.source, |chunk| {
            let chunk = apply_scale(chunk, scale);
            *processed = chunk.processed_total;
            cloud.append_points(chunk.into_batch())?;
            if let Some(invalidator) = invalidator.as_mut() {
                invalidator.request(clock.now());
            }
            Ok(())
        });
        self.total = parser.header().map_or(0, |h| h.vertex_count());
        drop(parser);

        match result {
            Ok(summary) => {
                cloud.finalize_bounds();
                if let Some(invalidator) = self.invalidator.as_mut() {
                    invalidator.flush();
                }
                self.status = ImportStatus::Completed;
                info!(
                    points = cloud.len(),
                    chunks = summary.chunks,
                    colors = summary.has_colors,
                    intensity = summary.has_intensity,
                    "import complete"
                );
                Ok(cloud)
            }
            Err(err) if err.is_cancelled() => {
                self.status = ImportStatus::Cancelled;
                info!(processed = self.processed, "import cancelled");
                Err(err.into())
            }
            Err(err) => {
                self.status = ImportStatus::Failed;
                self.last_error = Some(err.to_string());
                error!(error = %err, "import failed");
                Err(err.into())
            }
        }
    }

    /// Run on a worker thread.
    pub fn spawn(mut self) -> ImportHandle {
        let cancel = self.cancel_token();
        let handle = thread::spawn(move || {
            let result = self.run();
            (self, result)
        });
        ImportHandle { cancel, handle }
    }
}

fn apply_scale(mut chunk: PointChunk, scale: f64) -> PointChunk {
    if scale == 1.0 {
        return chunk;
    }
    for p in &mut chunk.positions {
        for v in p.iter_mut() {
            *v *= scale;
        }
    }
    if !chunk.bounds.is_empty() {
        let min = chunk.bounds.min.map(|v| v * scale);
        let max = chunk.bounds.max.map(|v| v * scale);
        chunk.bounds = Aabb::new(min, max);
    }
    chunk
}

pub struct ImportHandle {
    cancel: CancelToken,
    handle: JoinHandle<(ImportJob, Result<PointCloud, ImportError>)>,
}

impl ImportHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the worker. A panic on the worker is resumed here.
    pub fn join(self) -> (ImportJob, Result<PointCloud, ImportError>) {
        match self.handle.join() {
            Ok(outcome) => outcome,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}
