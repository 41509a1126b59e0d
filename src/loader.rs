use crate::compositor::{ColorRange, CompositionSpec};
use crate::Error;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A video resource to play. Replacing it rebuilds the whole player pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VideoSource {
    uri: url::Url,
    mime_type: String,
}

impl VideoSource {
    pub fn new(uri: url::Url, mime_type: impl Into<String>) -> Self {
        Self {
            uri,
            mime_type: mime_type.into(),
        }
    }

    pub fn parse(uri: &str, mime_type: impl Into<String>) -> Result<Self, Error> {
        let uri = url::Url::parse(uri).map_err(|_| Error::Uri)?;
        Ok(Self::new(uri, mime_type))
    }

    pub fn uri(&self) -> &url::Url {
        &self.uri
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn is_local(&self) -> bool {
        self.uri.scheme() == "file"
    }

    /// Filesystem path for local sources, the URI string for everything else.
    pub fn location(&self) -> Result<String, Error> {
        if self.is_local() {
            Ok(self
                .uri
                .to_file_path()
                .map_err(|_| Error::Uri)?
                .to_string_lossy()
                .into_owned())
        } else {
            Ok(self.uri.as_str().to_string())
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackKind {
    Video,
    Audio,
}

/// Metadata a resolver reports for a decodable asset.
#[derive(Debug, Clone, PartialEq)]
pub struct AssetInfo {
    /// Natural frame width of the stacked video.
    pub width: u32,
    /// Natural frame height of the stacked video (color and mask together).
    pub height: u32,
    pub framerate: f64,
    pub duration: Duration,
    pub tracks: Vec<TrackKind>,
    /// Sample range of YUV frames the backend will deliver, when known.
    pub color_range: Option<ColorRange>,
}

impl AssetInfo {
    pub fn new(width: u32, height: u32, framerate: f64, duration: Duration) -> Self {
        Self {
            width,
            height,
            framerate,
            duration,
            tracks: vec![TrackKind::Video],
            color_range: None,
        }
    }

    pub fn with_color_range(mut self, range: ColorRange) -> Self {
        self.color_range = Some(range);
        self
    }

    pub fn with_audio(mut self) -> Self {
        if !self.has_audio() {
            self.tracks.push(TrackKind::Audio);
        }
        self
    }

    pub fn has_audio(&self) -> bool {
        self.tracks.contains(&TrackKind::Audio)
    }

    pub fn composition_spec(&self) -> CompositionSpec {
        CompositionSpec::for_source_size(self.width, self.height)
    }

    fn validate(&self) -> Result<(), Error> {
        if !self.tracks.contains(&TrackKind::Video)
            || self.width == 0
            || self.height < 2
            || self.height % 2 != 0
        {
            return Err(Error::Caps);
        }
        if self.framerate.is_nan() || self.framerate.is_infinite() || self.framerate <= 0.0 {
            return Err(Error::Framerate(self.framerate));
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Asset {
    source: VideoSource,
    info: AssetInfo,
}

/// Resolved, decodable asset. Cheap to clone; released with its last clone.
#[derive(Debug, Clone)]
pub struct AssetHandle(Arc<Asset>);

impl AssetHandle {
    pub(crate) fn new(source: VideoSource, info: AssetInfo) -> Self {
        Self(Arc::new(Asset { source, info }))
    }

    pub fn source(&self) -> &VideoSource {
        &self.0.source
    }

    pub fn info(&self) -> &AssetInfo {
        &self.0.info
    }

    pub fn composition_spec(&self) -> CompositionSpec {
        self.0.info.composition_spec()
    }
}

/// Cooperative cancellation flag handed to resolvers.
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

/// Turns a [`VideoSource`] into asset metadata.
///
/// Called on a loader worker thread, never on the thread that owns the
/// player, so implementations are free to block on I/O. Long-running
/// resolvers should check `cancel` and bail out with [`Error::Cancelled`].
pub trait AssetResolver: Send + Sync {
    fn resolve(&self, source: &VideoSource, cancel: &CancelToken) -> Result<AssetInfo, Error>;
}

impl<F> AssetResolver for F
where
    F: Fn(&VideoSource, &CancelToken) -> Result<AssetInfo, Error> + Send + Sync,
{
    fn resolve(&self, source: &VideoSource, cancel: &CancelToken) -> Result<AssetInfo, Error> {
        self(source, cancel)
    }
}

#[derive(Debug)]
pub enum LoadOutcome {
    Loaded(AssetHandle),
    Failed(Error),
    Cancelled,
}

#[derive(Debug)]
pub(crate) struct Completion {
    generation: u64,
    source: VideoSource,
    result: Result<AssetInfo, Error>,
}

#[derive(Debug)]
struct InFlight {
    generation: u64,
    cancel: CancelToken,
}

/// Resolves one source at a time off the calling thread.
///
/// Completions are only applied by [`AssetLoader::poll`] or
/// [`AssetLoader::wait`] on the owning thread. Every resolution carries a
/// generation; starting a new one or cancelling bumps it, and anything
/// tagged with an older generation is dropped.
pub struct AssetLoader {
    resolver: Arc<dyn AssetResolver>,
    generation: Arc<AtomicU64>,
    completion_tx: Sender<Completion>,
    completion_rx: Receiver<Completion>,
    in_flight: Option<InFlight>,
}

impl std::fmt::Debug for AssetLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssetLoader")
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .field("in_flight", &self.in_flight)
            .finish_non_exhaustive()
    }
}

impl AssetLoader {
    pub fn new(resolver: Arc<dyn AssetResolver>) -> Self {
        let (completion_tx, completion_rx) = unbounded();
        Self {
            resolver,
            generation: Arc::new(AtomicU64::new(0)),
            completion_tx,
            completion_rx,
            in_flight: None,
        }
    }

    /// Starts resolving `source`, superseding any resolution in flight.
    /// Returns the generation the completion will carry.
    pub fn resolve(&mut self, source: VideoSource) -> Result<u64, Error> {
        self.cancel();

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let cancel = CancelToken::new();

        let resolver = Arc::clone(&self.resolver);
        let latest = Arc::clone(&self.generation);
        let completion_tx = self.completion_tx.clone();
        let token = cancel.clone();

        log::info!("Resolving {} (generation {})", source.uri(), generation);

        std::thread::Builder::new()
            .name(format!("asset-loader-{generation}"))
            .spawn(move || {
                let result = resolver.resolve(&source, &token);
                if token.is_cancelled() || latest.load(Ordering::Acquire) != generation {
                    log::debug!("Discarding superseded resolution of {}", source.uri());
                    return;
                }
                let _ = completion_tx.send(Completion {
                    generation,
                    source,
                    result,
                });
            })?;

        self.in_flight = Some(InFlight { generation, cancel });
        Ok(generation)
    }

    /// Cancels the resolution in flight, if any. Returns whether one was cancelled.
    pub fn cancel(&mut self) -> bool {
        match self.in_flight.take() {
            Some(in_flight) => {
                in_flight.cancel.cancel();
                self.generation.fetch_add(1, Ordering::SeqCst);
                log::debug!("Cancelled resolution (generation {})", in_flight.generation);
                true
            }
            None => false,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.in_flight.is_some()
    }

    pub fn pending_generation(&self) -> Option<u64> {
        self.in_flight.as_ref().map(|f| f.generation)
    }

    /// Non-blocking: applies a finished resolution for the current generation.
    pub fn poll(&mut self) -> Option<LoadOutcome> {
        while let Ok(completion) = self.completion_rx.try_recv() {
            if let Some(outcome) = self.accept(completion) {
                return Some(outcome);
            }
        }
        None
    }

    /// Blocks for at most `timeout` waiting on the current resolution.
    pub fn wait(&mut self, timeout: Duration) -> Option<LoadOutcome> {
        let deadline = Instant::now() + timeout;
        while self.in_flight.is_some() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.completion_rx.recv_timeout(remaining) {
                Ok(completion) => {
                    if let Some(outcome) = self.accept(completion) {
                        return Some(outcome);
                    }
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                    return None
                }
            }
        }
        None
    }

    pub(crate) fn accept(&mut self, completion: Completion) -> Option<LoadOutcome> {
        if self.pending_generation() != Some(completion.generation) {
            log::debug!(
                "Ignoring stale completion for {} (generation {})",
                completion.source.uri(),
                completion.generation
            );
            return None;
        }
        self.in_flight = None;

        let outcome = match completion.result.and_then(|info| info.validate().map(|_| info)) {
            Ok(info) => LoadOutcome::Loaded(AssetHandle::new(completion.source, info)),
            Err(Error::Cancelled) => LoadOutcome::Cancelled,
            Err(e) => LoadOutcome::Failed(e),
        };
        Some(outcome)
    }
}

impl Drop for AssetLoader {
    fn drop(&mut self) {
        self.cancel();
    }
}
