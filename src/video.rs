use crate::compositor::{AlphaCompositor, CompositionSpec, Frame};
use crate::lifecycle::{AppLifecycle, LifecycleHub, Subscription};
use crate::loader::{AssetHandle, AssetLoader, AssetResolver, LoadOutcome, TrackKind, VideoSource};
use crate::Error;
use image::RgbaImage;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Position in the media.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Position {
    Time(Duration),
    Frame(u64),
}

impl From<Duration> for Position {
    fn from(t: Duration) -> Self {
        Position::Time(t)
    }
}

impl From<u64> for Position {
    fn from(f: u64) -> Self {
        Position::Frame(f)
    }
}

/// When a set source starts resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadPolicy {
    /// Resolve as soon as a source is set.
    #[default]
    Eager,
    /// Hold the source until `autoplay` is also true, in whichever order they arrive.
    AwaitAutoplay,
}

#[derive(Debug, Clone)]
pub struct PlayerOptions {
    pub looping: Option<bool>,
    pub autoplay: Option<bool>,
    pub load_policy: Option<LoadPolicy>,
    pub compositor: Option<AlphaCompositor>,
}

impl Default for PlayerOptions {
    fn default() -> Self {
        Self {
            looping: Some(true),
            autoplay: Some(false),
            load_policy: Some(LoadPolicy::Eager),
            compositor: Some(AlphaCompositor::default()),
        }
    }
}

/// Live playback flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlaybackConfig {
    pub looping: bool,
    pub autoplay: bool,
}

/// A batch of property changes applied in one step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlaybackUpdate {
    pub source: Option<VideoSource>,
    pub looping: Option<bool>,
    pub autoplay: Option<bool>,
}

impl PlaybackUpdate {
    pub fn source(mut self, source: VideoSource) -> Self {
        self.source = Some(source);
        self
    }

    pub fn looping(mut self, looping: bool) -> Self {
        self.looping = Some(looping);
        self
    }

    pub fn autoplay(mut self, autoplay: bool) -> Self {
        self.autoplay = Some(autoplay);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.source.is_none() && self.looping.is_none() && self.autoplay.is_none()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PlayerState {
    Uninitialized,
    Loading,
    /// The item is built but the autoplay decision has not been applied.
    /// Transient: a finished load moves straight on to `Playing` or
    /// `Paused` in the same call, so hosts observe it as
    /// [`PlaybackEvent::Ready`] rather than through `state()`.
    Ready,
    Playing,
    Paused,
    Disposed,
}

/// Notifications for the host, drained with [`PlaybackController::drain_events`].
#[derive(Debug, Clone, PartialEq)]
pub enum PlaybackEvent {
    Loading { generation: u64 },
    Ready { width: u32, height: u32 },
    Started,
    Paused,
    Ended,
    Looped,
    LoadFailed { reason: String },
    FrameFailed { pts: i64, reason: String },
    Stalled { recovered: bool },
    Backgrounded,
    Foregrounded,
    Disposed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transport {
    Ready,
    Playing,
    Paused,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ItemTrack {
    pub kind: TrackKind,
    pub enabled: bool,
}

/// The single playable item built from a resolved asset, with the
/// compositor attached as its per-frame transform.
#[derive(Debug)]
pub struct PlayerItem {
    asset: AssetHandle,
    spec: CompositionSpec,
    compositor: AlphaCompositor,
    tracks: Vec<ItemTrack>,
    transport: Transport,
    position: Duration,
    rate: f64,
    at_end: bool,
    failed: bool,
    stall_recovery_attempted: bool,
    image: Option<RgbaImage>,
    frame_failures: u64,
}

impl PlayerItem {
    fn new(asset: AssetHandle, compositor: AlphaCompositor, visual_enabled: bool) -> Self {
        let tracks = asset
            .info()
            .tracks
            .iter()
            .map(|&kind| ItemTrack {
                kind,
                enabled: kind != TrackKind::Video || visual_enabled,
            })
            .collect();

        let compositor = asset
            .info()
            .color_range
            .map(AlphaCompositor::new)
            .unwrap_or(compositor);

        Self {
            spec: asset.composition_spec(),
            asset,
            compositor,
            tracks,
            transport: Transport::Ready,
            position: Duration::ZERO,
            rate: 0.0,
            at_end: false,
            failed: false,
            stall_recovery_attempted: false,
            image: None,
            frame_failures: 0,
        }
    }

    pub fn asset(&self) -> &AssetHandle {
        &self.asset
    }

    pub fn composition_spec(&self) -> CompositionSpec {
        self.spec
    }

    pub fn tracks(&self) -> &[ItemTrack] {
        &self.tracks
    }

    pub fn visual_tracks_enabled(&self) -> bool {
        self.tracks
            .iter()
            .filter(|t| t.kind == TrackKind::Video)
            .all(|t| t.enabled)
    }

    pub fn audio_tracks_enabled(&self) -> bool {
        self.tracks
            .iter()
            .filter(|t| t.kind == TrackKind::Audio)
            .all(|t| t.enabled)
    }

    pub fn position(&self) -> Duration {
        self.position
    }

    pub fn duration(&self) -> Duration {
        self.asset.info().duration
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    pub fn is_at_end(&self) -> bool {
        self.at_end
    }

    pub fn frame_failures(&self) -> u64 {
        self.frame_failures
    }

    pub fn current_image(&self) -> Option<&RgbaImage> {
        self.image.as_ref()
    }

    fn is_stalled(&self) -> bool {
        (self.at_end && self.rate == 0.0) || self.failed
    }

    fn set_visual_tracks_enabled(&mut self, enabled: bool) {
        for track in self.tracks.iter_mut().filter(|t| t.kind == TrackKind::Video) {
            track.enabled = enabled;
        }
    }

    fn start(&mut self) {
        self.transport = Transport::Playing;
        self.rate = 1.0;
        self.failed = false;
    }

    fn halt(&mut self) {
        self.transport = Transport::Paused;
        self.rate = 0.0;
    }

    fn seek(&mut self, position: Position) {
        let info = self.asset.info();
        let target_seconds = match position {
            Position::Time(duration) => duration.as_secs_f64(),
            Position::Frame(frame_num) => frame_num as f64 / info.framerate,
        };
        let target_seconds = target_seconds.max(0.0).min(info.duration.as_secs_f64());

        self.position = Duration::from_secs_f64(target_seconds);
        self.at_end = false;
    }

    fn compose(&mut self, frame: &Frame) -> Result<(), Error> {
        if frame.width() != self.spec.source_width || frame.height() != self.spec.source_height {
            return Err(Error::frame(format!(
                "frame is {}x{}, asset is {}x{}",
                frame.width(),
                frame.height(),
                self.spec.source_width,
                self.spec.source_height
            )));
        }
        self.image = Some(self.compositor.compose(frame)?);
        Ok(())
    }
}

enum Stage {
    Uninitialized { pending: Option<VideoSource> },
    Loading { source: VideoSource, generation: u64 },
    Active { source: VideoSource, item: PlayerItem },
    Disposed,
}

/// Owns the player: source resolution, the active item and its transport.
///
/// All methods must be called from one thread (the host's UI thread).
/// Asynchronous work comes back only through [`PlaybackController::poll`].
pub struct PlaybackController {
    loader: AssetLoader,
    config: PlaybackConfig,
    load_policy: LoadPolicy,
    compositor: AlphaCompositor,
    stage: Stage,
    lifecycle: Option<Subscription>,
    backgrounded: bool,
    events: VecDeque<PlaybackEvent>,
}

impl std::fmt::Debug for PlaybackController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackController")
            .field("state", &self.state())
            .field("config", &self.config)
            .field("backgrounded", &self.backgrounded)
            .finish_non_exhaustive()
    }
}

impl PlaybackController {
    pub fn new(resolver: Arc<dyn AssetResolver>) -> Self {
        Self::with_options(resolver, PlayerOptions::default())
    }

    pub fn with_options(resolver: Arc<dyn AssetResolver>, options: PlayerOptions) -> Self {
        Self {
            loader: AssetLoader::new(resolver),
            config: PlaybackConfig {
                looping: options.looping.unwrap_or(true),
                autoplay: options.autoplay.unwrap_or(false),
            },
            load_policy: options.load_policy.unwrap_or_default(),
            compositor: options.compositor.unwrap_or_default(),
            stage: Stage::Uninitialized { pending: None },
            lifecycle: None,
            backgrounded: false,
            events: VecDeque::new(),
        }
    }

    /// Subscribes to host lifecycle signals. Repeated calls keep the first subscription.
    pub fn attach(&mut self, hub: &LifecycleHub) -> Result<(), Error> {
        if matches!(self.stage, Stage::Disposed) {
            return Err(Error::Disposed);
        }
        if self.lifecycle.is_none() {
            self.lifecycle = Some(hub.subscribe());
        }
        Ok(())
    }

    pub fn detach(&mut self) {
        self.lifecycle = None;
    }

    pub fn is_attached(&self) -> bool {
        self.lifecycle.is_some()
    }

    pub fn state(&self) -> PlayerState {
        match &self.stage {
            Stage::Uninitialized { .. } => PlayerState::Uninitialized,
            Stage::Loading { .. } => PlayerState::Loading,
            Stage::Active { item, .. } => match item.transport {
                Transport::Ready => PlayerState::Ready,
                Transport::Playing => PlayerState::Playing,
                Transport::Paused => PlayerState::Paused,
            },
            Stage::Disposed => PlayerState::Disposed,
        }
    }

    pub fn config(&self) -> PlaybackConfig {
        self.config
    }

    pub fn is_backgrounded(&self) -> bool {
        self.backgrounded
    }

    pub fn source(&self) -> Option<&VideoSource> {
        match &self.stage {
            Stage::Uninitialized { pending } => pending.as_ref(),
            Stage::Loading { source, .. } | Stage::Active { source, .. } => Some(source),
            Stage::Disposed => None,
        }
    }

    pub fn item(&self) -> Option<&PlayerItem> {
        match &self.stage {
            Stage::Active { item, .. } => Some(item),
            _ => None,
        }
    }

    pub fn position(&self) -> Duration {
        self.item().map(PlayerItem::position).unwrap_or_default()
    }

    pub fn render_size(&self) -> Option<(u32, u32)> {
        self.item()
            .map(|item| (item.spec.render_width, item.spec.render_height))
    }

    pub fn current_image(&self) -> Option<&RgbaImage> {
        self.item().and_then(PlayerItem::current_image)
    }

    pub fn drain_events(&mut self) -> Vec<PlaybackEvent> {
        self.events.drain(..).collect()
    }

    /// Applies a batch of property changes. Flags are applied before the
    /// source so a load started here already sees them.
    pub fn update(&mut self, update: PlaybackUpdate) -> Result<(), Error> {
        if matches!(self.stage, Stage::Disposed) {
            return Err(Error::Disposed);
        }

        if let Some(autoplay) = update.autoplay {
            self.config.autoplay = autoplay;
        }
        if let Some(looping) = update.looping {
            self.apply_looping(looping);
        }
        if let Some(source) = update.source {
            self.replace_source(source);
        }
        self.begin_pending_load()
    }

    pub fn set_source(&mut self, source: VideoSource) -> Result<(), Error> {
        self.update(PlaybackUpdate::default().source(source))
    }

    pub fn set_looping(&mut self, looping: bool) -> Result<(), Error> {
        self.update(PlaybackUpdate::default().looping(looping))
    }

    pub fn set_autoplay(&mut self, autoplay: bool) -> Result<(), Error> {
        self.update(PlaybackUpdate::default().autoplay(autoplay))
    }

    fn replace_source(&mut self, source: VideoSource) {
        if self.loader.cancel() {
            log::info!("Superseding pending load with {}", source.uri());
        }
        if let Stage::Active { item, .. } = &mut self.stage {
            item.halt();
            log::info!("Releasing item for {}", item.asset.source().uri());
        }
        self.stage = Stage::Uninitialized {
            pending: Some(source),
        };
    }

    fn begin_pending_load(&mut self) -> Result<(), Error> {
        let gated = self.load_policy == LoadPolicy::AwaitAutoplay && !self.config.autoplay;
        let source = match &mut self.stage {
            Stage::Uninitialized { pending } if !gated => match pending.take() {
                Some(source) => source,
                None => return Ok(()),
            },
            _ => return Ok(()),
        };

        match self.loader.resolve(source.clone()) {
            Ok(generation) => {
                self.stage = Stage::Loading { source, generation };
                self.events.push_back(PlaybackEvent::Loading { generation });
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to start loading {}: {}", source.uri(), e);
                self.events.push_back(PlaybackEvent::LoadFailed {
                    reason: e.to_string(),
                });
                Err(e)
            }
        }
    }

    fn apply_looping(&mut self, looping: bool) {
        self.config.looping = looping;
        let Stage::Active { item, .. } = &mut self.stage else {
            return;
        };
        if looping && item.is_stalled() {
            log::info!("Loop enabled on a stalled player, restarting");
            item.seek(Position::Time(Duration::ZERO));
            item.start();
            self.events.push_back(PlaybackEvent::Started);
        }
    }

    /// Applies queued lifecycle signals and a finished load, if any.
    /// Returns how many were handled.
    pub fn poll(&mut self) -> usize {
        if matches!(self.stage, Stage::Disposed) {
            return 0;
        }

        let signals = self
            .lifecycle
            .as_ref()
            .map(Subscription::drain)
            .unwrap_or_default();
        let mut handled = signals.len();
        for signal in signals {
            self.handle_lifecycle(signal);
        }

        if let Some(outcome) = self.loader.poll() {
            self.complete_load(outcome);
            handled += 1;
        }
        handled
    }

    /// Blocks up to `timeout` for the pending load to finish and applies it.
    pub fn wait_for_load(&mut self, timeout: Duration) -> bool {
        if !matches!(self.stage, Stage::Loading { .. }) {
            return false;
        }
        match self.loader.wait(timeout) {
            Some(outcome) => {
                self.complete_load(outcome);
                true
            }
            None => false,
        }
    }

    fn complete_load(&mut self, outcome: LoadOutcome) {
        if !matches!(self.stage, Stage::Loading { .. }) {
            log::debug!("Dropping load outcome with no pending load");
            return;
        }
        let Stage::Loading { source, generation } = std::mem::replace(
            &mut self.stage,
            Stage::Uninitialized { pending: None },
        ) else {
            return;
        };

        match outcome {
            LoadOutcome::Loaded(asset) => {
                let mut item = PlayerItem::new(asset, self.compositor, !self.backgrounded);
                let spec = item.spec;
                log::info!(
                    "Ready: {} ({}x{} -> {}x{}, generation {})",
                    source.uri(),
                    spec.source_width,
                    spec.source_height,
                    spec.render_width,
                    spec.render_height,
                    generation
                );
                self.events.push_back(PlaybackEvent::Ready {
                    width: spec.render_width,
                    height: spec.render_height,
                });

                if self.config.autoplay {
                    item.start();
                    self.events.push_back(PlaybackEvent::Started);
                } else {
                    item.halt();
                    self.events.push_back(PlaybackEvent::Paused);
                }
                self.stage = Stage::Active { source, item };
            }
            LoadOutcome::Failed(e) => {
                log::error!("Something went wrong when loading {}: {}", source.uri(), e);
                self.events.push_back(PlaybackEvent::LoadFailed {
                    reason: e.to_string(),
                });
            }
            LoadOutcome::Cancelled => {
                log::debug!("Load of {} cancelled", source.uri());
            }
        }
    }

    pub fn handle_lifecycle(&mut self, signal: AppLifecycle) {
        let entering_background = signal == AppLifecycle::DidEnterBackground;
        if matches!(self.stage, Stage::Disposed) || self.backgrounded == entering_background {
            return;
        }
        self.backgrounded = entering_background;

        if let Stage::Active { item, .. } = &mut self.stage {
            item.set_visual_tracks_enabled(!entering_background);
        }

        if entering_background {
            log::info!("Entered background, disabling visual tracks");
            self.events.push_back(PlaybackEvent::Backgrounded);
        } else {
            log::info!("Entering foreground, enabling visual tracks");
            self.events.push_back(PlaybackEvent::Foregrounded);
        }
    }

    pub fn play(&mut self) -> Result<(), Error> {
        let item = match &mut self.stage {
            Stage::Disposed => return Err(Error::Disposed),
            Stage::Active { item, .. } => item,
            _ => {
                log::debug!("Play requested with no ready item");
                return Ok(());
            }
        };
        if item.transport == Transport::Playing {
            return Ok(());
        }
        if item.at_end {
            log::info!("Restarting from end of stream");
            item.seek(Position::Time(Duration::ZERO));
        }
        item.start();
        log::info!("Resuming playback");
        self.events.push_back(PlaybackEvent::Started);
        Ok(())
    }

    pub fn pause(&mut self) -> Result<(), Error> {
        let item = match &mut self.stage {
            Stage::Disposed => return Err(Error::Disposed),
            Stage::Active { item, .. } => item,
            _ => return Ok(()),
        };
        if item.transport == Transport::Paused {
            return Ok(());
        }
        item.halt();
        log::info!("Pausing playback");
        self.events.push_back(PlaybackEvent::Paused);
        Ok(())
    }

    pub fn seek(&mut self, position: impl Into<Position>) -> Result<(), Error> {
        match &mut self.stage {
            Stage::Disposed => Err(Error::Disposed),
            Stage::Active { item, .. } => {
                item.seek(position.into());
                log::info!("Seeking to {:.2}s", item.position.as_secs_f64());
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Advances the playback clock by `elapsed` wall time.
    ///
    /// A zero asset duration means the length is unknown: the clock keeps
    /// running and end of stream is left to [`Self::handle_end_of_stream`].
    pub fn advance(&mut self, elapsed: Duration) {
        let Stage::Active { item, .. } = &mut self.stage else {
            return;
        };
        if item.transport != Transport::Playing {
            return;
        }

        let step = Duration::try_from_secs_f64(elapsed.as_secs_f64() * item.rate)
            .unwrap_or(Duration::MAX);
        item.position = item.position.saturating_add(step);
        let duration = item.duration();
        if !duration.is_zero() && item.position >= duration {
            self.handle_end_of_stream();
        } else if !elapsed.is_zero() {
            item.stall_recovery_attempted = false;
        }
    }

    pub fn handle_end_of_stream(&mut self) {
        let Stage::Active { item, .. } = &mut self.stage else {
            return;
        };
        if item.transport != Transport::Playing {
            return;
        }
        self.events.push_back(PlaybackEvent::Ended);

        if self.config.looping {
            log::info!("Looping");
            item.seek(Position::Time(Duration::ZERO));
            self.events.push_back(PlaybackEvent::Looped);
        } else {
            item.position = item.duration();
            item.at_end = true;
            item.halt();
            log::info!("Reached end of stream");
            self.events.push_back(PlaybackEvent::Paused);
        }
    }

    /// Called when the backend stops making progress unexpectedly.
    /// With looping on, one restart is attempted per stall. A stall reported
    /// while not playing is only recorded; it never starts playback.
    pub fn handle_stall(&mut self) {
        let Stage::Active { item, .. } = &mut self.stage else {
            return;
        };

        if item.transport != Transport::Playing {
            log::debug!("Stall reported while not playing");
            self.events
                .push_back(PlaybackEvent::Stalled { recovered: false });
            return;
        }

        if self.config.looping && !item.stall_recovery_attempted {
            item.stall_recovery_attempted = true;
            item.start();
            log::warn!("Playback stalled, restarting");
            self.events
                .push_back(PlaybackEvent::Stalled { recovered: true });
        } else {
            item.failed = true;
            item.halt();
            log::warn!("Playback stalled");
            self.events
                .push_back(PlaybackEvent::Stalled { recovered: false });
            self.events.push_back(PlaybackEvent::Paused);
        }
    }

    /// Runs `frame` through the compositor and returns the image to display.
    ///
    /// A frame that fails to composite is counted and reported, and the
    /// previous image stays on screen. While visual tracks are disabled no
    /// composition happens at all.
    pub fn present(&mut self, frame: &Frame) -> Option<&RgbaImage> {
        let Stage::Active { item, .. } = &mut self.stage else {
            return None;
        };

        if item.visual_tracks_enabled() {
            if let Err(e) = item.compose(frame) {
                log::warn!("Video composition error at pts {}: {}", frame.pts(), e);
                item.frame_failures += 1;
                self.events.push_back(PlaybackEvent::FrameFailed {
                    pts: frame.pts(),
                    reason: e.to_string(),
                });
            }
        }
        item.image.as_ref()
    }

    /// Tears the player down. Safe to call any number of times.
    pub fn dispose(&mut self) {
        if matches!(self.stage, Stage::Disposed) {
            return;
        }

        let cancelled = self.loader.cancel();
        if let Stage::Active { item, .. } = &mut self.stage {
            item.halt();
        }
        self.stage = Stage::Disposed;
        self.lifecycle = None;
        self.events.push_back(PlaybackEvent::Disposed);
        log::info!("Disposed player (cancelled pending load: {})", cancelled);
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.dispose();
    }
}
