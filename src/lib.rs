//! Playback of stacked-alpha video: an opaque stream whose top half holds
//! the color picture and whose bottom half holds a grayscale alpha mask.
//!
//! Every decoded frame is recombined into a single RGBA image half the
//! source height, suitable for layering over other content.
//!
//! # Prerequisites
//!
//! The core is decoder-agnostic: any [`AssetResolver`] that can report an
//! asset's size, framerate and duration will do. The optional `ffmpeg`
//! feature adds [`FfmpegResolver`] and [`FfmpegFrameSource`], which need
//! the FFmpeg 4.0+ development libraries:
//! - **macOS**: `brew install ffmpeg`
//! - **Ubuntu/Debian**: `apt-get install libavcodec-dev libavformat-dev libavutil-dev libswscale-dev libavfilter-dev`
//! - **Arch Linux**: `pacman -S ffmpeg`
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use transparent_video::{
//!     AssetInfo, AssetResolver, CancelToken, Error, LifecycleHub, TransparentVideoView,
//!     VideoSource, ViewProps,
//! };
//!
//! let resolver: Arc<dyn AssetResolver> = Arc::new(
//!     |_: &VideoSource, _: &CancelToken| -> Result<AssetInfo, Error> {
//!         Ok(AssetInfo::new(640, 720, 30.0, Duration::from_secs(4)))
//!     },
//! );
//!
//! let hub = LifecycleHub::new();
//! let mut view = TransparentVideoView::new(resolver, &hub).unwrap();
//! let props: ViewProps = serde_json::from_str(
//!     r#"{ "source": { "uri": "/videos/intro.mp4" }, "autoplay": true }"#,
//! ).unwrap();
//! view.set_props(props).unwrap();
//!
//! // Once per display refresh:
//! view.tick(Duration::from_millis(16));
//! ```
//!
//! # Playback Control
//!
//! The [`PlaybackController`] behind the view owns the player:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use std::time::Duration;
//! # use transparent_video::*;
//! # let resolver: Arc<dyn AssetResolver> = Arc::new(
//! #     |_: &VideoSource, _: &CancelToken| -> Result<AssetInfo, Error> { Err(Error::Caps) });
//! let mut controller = PlaybackController::new(resolver);
//! controller.set_source(VideoSource::parse("file:///videos/intro.mp4", "video/mp4")?)?;
//! controller.wait_for_load(Duration::from_secs(1));
//! controller.play()?;
//! controller.seek(Duration::from_secs(2))?;
//! controller.set_looping(false)?;
//! # Ok::<(), Error>(())
//! ```

mod compositor;
mod element;
mod error;
#[cfg(feature = "ffmpeg")]
mod ffmpeg;
mod lifecycle;
mod loader;
mod video;

pub use compositor::{AlphaCompositor, ColorRange, CompositionSpec, Frame, PixelFormat};
pub use element::{
    normalize_uri, Bounds, SourceProp, TransparentVideoView, ViewProps, DEFAULT_AUTOPLAY,
    DEFAULT_LOOP,
};
pub use error::Error;
#[cfg(feature = "ffmpeg")]
pub use ffmpeg::{FfmpegFrameSource, FfmpegResolver};
pub use lifecycle::{AppLifecycle, LifecycleHub, Subscription};
pub use loader::{
    AssetHandle, AssetInfo, AssetLoader, AssetResolver, CancelToken, LoadOutcome, TrackKind,
    VideoSource,
};
pub use video::{
    ItemTrack, LoadPolicy, PlaybackConfig, PlaybackController, PlaybackEvent, PlaybackUpdate,
    PlayerItem, PlayerOptions, PlayerState, Position,
};

// Re-export commonly used types
pub use image::RgbaImage;
pub use url::Url;
