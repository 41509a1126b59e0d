use crate::compositor::Frame;
use crate::lifecycle::LifecycleHub;
use crate::loader::{AssetResolver, VideoSource};
use crate::video::{PlaybackConfig, PlaybackController, PlaybackUpdate, PlayerOptions};
use crate::Error;
use image::RgbaImage;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_LOOP: bool = true;
pub const DEFAULT_AUTOPLAY: bool = false;

/// `source` property as sent by the host.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceProp {
    #[serde(default)]
    pub uri: String,
    #[serde(default, alias = "type")]
    pub mime_type: Option<String>,
}

/// Full property set of the view. Unset flags fall back to
/// [`DEFAULT_LOOP`] and [`DEFAULT_AUTOPLAY`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct ViewProps {
    #[serde(default)]
    pub source: Option<SourceProp>,
    #[serde(default, rename = "loop")]
    pub looping: Option<bool>,
    #[serde(default)]
    pub autoplay: Option<bool>,
}

/// Rewrites absolute filesystem paths to `file://` URLs; parses everything else as-is.
pub fn normalize_uri(uri: &str) -> Result<url::Url, Error> {
    if uri.starts_with('/') {
        url::Url::from_file_path(uri).map_err(|_| Error::Uri)
    } else {
        url::Url::parse(uri).map_err(|_| Error::Uri)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Bounds {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl Bounds {
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width <= 0.0 || self.height <= 0.0
    }
}

/// Host-facing view: takes property updates, forwards them to the
/// controller, and keeps its rendering surface sized to its layout bounds.
#[derive(Debug)]
pub struct TransparentVideoView {
    controller: PlaybackController,
    applied_source: Option<VideoSource>,
    applied_config: PlaybackConfig,
    surface: Bounds,
}

impl TransparentVideoView {
    pub fn new(resolver: Arc<dyn AssetResolver>, hub: &LifecycleHub) -> Result<Self, Error> {
        Self::with_options(resolver, hub, PlayerOptions::default())
    }

    pub fn with_options(
        resolver: Arc<dyn AssetResolver>,
        hub: &LifecycleHub,
        options: PlayerOptions,
    ) -> Result<Self, Error> {
        let mut controller = PlaybackController::with_options(resolver, options);
        controller.attach(hub)?;
        let applied_config = controller.config();

        Ok(Self {
            controller,
            applied_source: None,
            applied_config,
            surface: Bounds::default(),
        })
    }

    /// Applies a full property set in one step, skipping values that did not change.
    pub fn set_props(&mut self, props: ViewProps) -> Result<(), Error> {
        let mut update = PlaybackUpdate::default();

        if let Some(prop) = props.source.filter(|s| !s.uri.is_empty()) {
            let uri = normalize_uri(&prop.uri).inspect_err(|_| {
                log::error!("Rejecting source with invalid URI {:?}", prop.uri);
            })?;
            let source = VideoSource::new(uri, prop.mime_type.unwrap_or_default());
            if self.applied_source.as_ref() != Some(&source) {
                update.source = Some(source);
            }
        }

        let looping = props.looping.unwrap_or(DEFAULT_LOOP);
        if looping != self.applied_config.looping {
            update.looping = Some(looping);
        }
        let autoplay = props.autoplay.unwrap_or(DEFAULT_AUTOPLAY);
        if autoplay != self.applied_config.autoplay {
            update.autoplay = Some(autoplay);
        }

        self.apply(update)
    }

    pub fn set_source(&mut self, uri: &str, mime_type: Option<&str>) -> Result<(), Error> {
        let source = VideoSource::new(normalize_uri(uri)?, mime_type.unwrap_or_default());
        if self.applied_source.as_ref() == Some(&source) {
            return Ok(());
        }
        self.apply(PlaybackUpdate::default().source(source))
    }

    pub fn set_loop(&mut self, looping: bool) -> Result<(), Error> {
        if looping == self.applied_config.looping {
            return Ok(());
        }
        self.apply(PlaybackUpdate::default().looping(looping))
    }

    pub fn set_autoplay(&mut self, autoplay: bool) -> Result<(), Error> {
        if autoplay == self.applied_config.autoplay {
            return Ok(());
        }
        self.apply(PlaybackUpdate::default().autoplay(autoplay))
    }

    fn apply(&mut self, update: PlaybackUpdate) -> Result<(), Error> {
        if update.is_empty() {
            return Ok(());
        }
        let source = update.source.clone();
        if let Err(e) = self.controller.update(update) {
            self.resync_applied();
            return Err(e);
        }

        if let Some(source) = source {
            self.applied_source = Some(source);
        }
        self.applied_config = self.controller.config();
        Ok(())
    }

    /// Takes the last applied values back from the controller after it
    /// may have applied only part of an update.
    fn resync_applied(&mut self) {
        self.applied_source = self.controller.source().cloned();
        self.applied_config = self.controller.config();
    }

    /// Sizes the rendering surface to exactly the bounds the host allotted.
    pub fn layout(&mut self, bounds: Bounds) {
        if self.surface != bounds {
            log::debug!(
                "Surface resized to {}x{} at ({}, {})",
                bounds.width,
                bounds.height,
                bounds.x,
                bounds.y
            );
        }
        self.surface = bounds;
    }

    pub fn surface_bounds(&self) -> Bounds {
        self.surface
    }

    /// Where the composited image lands inside the surface: aspect-fit and centered.
    pub fn content_rect(&self) -> Option<Bounds> {
        let (frame_w, frame_h) = self.controller.render_size()?;
        Some(fitted_bounds(self.surface, frame_w, frame_h))
    }

    /// Drains asynchronous work and advances the playback clock.
    pub fn tick(&mut self, elapsed: Duration) -> usize {
        let handled = self.controller.poll();
        self.controller.advance(elapsed);
        handled
    }

    pub fn present(&mut self, frame: &Frame) -> Option<&RgbaImage> {
        self.controller.present(frame)
    }

    pub fn controller(&self) -> &PlaybackController {
        &self.controller
    }

    pub fn controller_mut(&mut self) -> &mut PlaybackController {
        &mut self.controller
    }

    pub fn dispose(&mut self) {
        self.controller.dispose();
        self.resync_applied();
    }
}

fn fitted_bounds(bounds: Bounds, frame_width: u32, frame_height: u32) -> Bounds {
    let frame_w = frame_width as f32;
    let frame_h = frame_height as f32;

    let scale = if frame_w > 0.0 && frame_h > 0.0 {
        (bounds.width / frame_w).min(bounds.height / frame_h)
    } else {
        1.0
    };

    let dest_w = (frame_w * scale).max(0.0);
    let dest_h = (frame_h * scale).max(0.0);
    let offset_x = (bounds.width - dest_w) * 0.5;
    let offset_y = (bounds.height - dest_h) * 0.5;

    Bounds::new(bounds.x + offset_x, bounds.y + offset_y, dest_w, dest_h)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absolute_paths_become_file_urls() {
        let url = normalize_uri("/data/app/video.mp4").unwrap();
        assert_eq!(url.as_str(), "file:///data/app/video.mp4");
    }

    #[test]
    fn other_uris_pass_through() {
        for uri in [
            "file:///data/app/video.mp4",
            "https://cdn.example.com/v/1.mp4",
            "asset://bundle/1.mp4",
        ] {
            assert_eq!(normalize_uri(uri).unwrap().as_str(), uri);
        }
        assert!(matches!(normalize_uri("video.mp4"), Err(Error::Uri)));
    }

    #[test]
    fn fitted_bounds_letterboxes_wide_content() {
        let rect = fitted_bounds(Bounds::new(10.0, 20.0, 200.0, 200.0), 400, 200);
        assert_eq!(rect, Bounds::new(10.0, 70.0, 200.0, 100.0));
    }

    #[test]
    fn fitted_bounds_pillarboxes_tall_content() {
        let rect = fitted_bounds(Bounds::new(0.0, 0.0, 300.0, 100.0), 100, 200);
        assert_eq!(rect, Bounds::new(125.0, 0.0, 50.0, 100.0));
    }
}
