use std::sync::Arc;
use std::time::Duration;
use transparent_video::{
    AssetInfo, AssetResolver, Bounds, CancelToken, Error, LifecycleHub, LoadPolicy,
    PlaybackEvent, PlayerOptions, PlayerState, TransparentVideoView, VideoSource, ViewProps,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn resolver() -> Arc<dyn AssetResolver> {
    Arc::new(|_: &VideoSource, _: &CancelToken| -> Result<AssetInfo, Error> {
        Ok(AssetInfo::new(400, 400, 30.0, Duration::from_secs(3)))
    })
}

fn props(json: &str) -> ViewProps {
    serde_json::from_str(json).unwrap()
}

#[test]
fn props_deserialize_with_documented_defaults() {
    let parsed = props(r#"{ "source": { "uri": "/videos/a.mp4", "type": "video/mp4" } }"#);
    let source = parsed.source.as_ref().unwrap();
    assert_eq!(source.mime_type.as_deref(), Some("video/mp4"));
    assert_eq!(parsed.looping, None);
    assert_eq!(parsed.autoplay, None);

    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::new(resolver(), &hub).unwrap();
    view.set_props(parsed).unwrap();

    let controller = view.controller();
    assert_eq!(
        controller.source().unwrap().uri().as_str(),
        "file:///videos/a.mp4"
    );
    assert!(controller.config().looping);
    assert!(!controller.config().autoplay);
}

#[test]
fn source_and_autoplay_together_start_playing() {
    let _ = env_logger::builder().is_test(true).try_init();
    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::new(resolver(), &hub).unwrap();

    view.set_props(props(
        r#"{ "source": { "uri": "file:///videos/a.mp4" }, "autoplay": true, "loop": false }"#,
    ))
    .unwrap();
    assert!(view.controller_mut().wait_for_load(TIMEOUT));
    assert_eq!(view.controller().state(), PlayerState::Playing);
    assert!(!view.controller().config().looping);
}

#[test]
fn unchanged_props_do_not_reload() {
    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::new(resolver(), &hub).unwrap();
    let json = r#"{ "source": { "uri": "/videos/a.mp4" }, "autoplay": true }"#;

    view.set_props(props(json)).unwrap();
    assert!(view.controller_mut().wait_for_load(TIMEOUT));
    view.controller_mut().drain_events();

    view.set_props(props(json)).unwrap();
    assert_eq!(view.controller().state(), PlayerState::Playing);
    assert!(view.controller_mut().drain_events().is_empty());
}

#[test]
fn invalid_uri_rejects_the_whole_update() {
    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::new(resolver(), &hub).unwrap();

    let err = view
        .set_props(props(r#"{ "source": { "uri": "videos/a.mp4" }, "autoplay": true }"#))
        .unwrap_err();
    assert!(matches!(err, Error::Uri));
    assert!(!view.controller().config().autoplay);
    assert_eq!(view.controller().state(), PlayerState::Uninitialized);
}

#[test]
fn gated_loading_accepts_either_update_order() {
    let options = PlayerOptions {
        load_policy: Some(LoadPolicy::AwaitAutoplay),
        ..PlayerOptions::default()
    };

    // Source first, flag second.
    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::with_options(resolver(), &hub, options.clone()).unwrap();
    view.set_source("/videos/a.mp4", None).unwrap();
    assert_eq!(view.controller().state(), PlayerState::Uninitialized);
    view.set_autoplay(true).unwrap();
    assert!(view.controller_mut().wait_for_load(TIMEOUT));
    assert_eq!(view.controller().state(), PlayerState::Playing);

    // Flag first, source second.
    let mut view = TransparentVideoView::with_options(resolver(), &hub, options).unwrap();
    view.set_autoplay(true).unwrap();
    view.set_source("/videos/a.mp4", Some("video/mp4")).unwrap();
    assert!(view.controller_mut().wait_for_load(TIMEOUT));
    assert_eq!(view.controller().state(), PlayerState::Playing);
}

#[test]
fn surface_fills_layout_bounds_and_content_is_fitted() {
    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::new(resolver(), &hub).unwrap();
    let bounds = Bounds::new(0.0, 0.0, 300.0, 300.0);
    view.layout(bounds);
    assert_eq!(view.surface_bounds(), bounds);
    assert_eq!(view.content_rect(), None);

    view.set_source("/videos/a.mp4", None).unwrap();
    assert!(view.controller_mut().wait_for_load(TIMEOUT));
    // 400x400 stacked renders at 400x200.
    assert_eq!(view.content_rect(), Some(Bounds::new(0.0, 75.0, 300.0, 150.0)));

    let resized = Bounds::new(10.0, 10.0, 100.0, 50.0);
    view.layout(resized);
    assert_eq!(view.surface_bounds(), resized);
    assert_eq!(view.content_rect(), Some(resized));
}

#[test]
fn dispose_unsubscribes_from_lifecycle() {
    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::new(resolver(), &hub).unwrap();
    assert_eq!(hub.subscriber_count(), 1);

    view.dispose();
    view.dispose();
    assert_eq!(hub.subscriber_count(), 0);
    assert!(view
        .controller_mut()
        .drain_events()
        .contains(&PlaybackEvent::Disposed));
    assert!(matches!(view.set_loop(false), Err(Error::Disposed)));

    let other = TransparentVideoView::new(resolver(), &hub).unwrap();
    assert_eq!(hub.subscriber_count(), 1);
    drop(other);
    assert_eq!(hub.subscriber_count(), 0);
}

#[test]
fn disposed_view_does_not_swallow_repeated_props() {
    let hub = LifecycleHub::new();
    let mut view = TransparentVideoView::new(resolver(), &hub).unwrap();
    let json = r#"{ "source": { "uri": "/videos/a.mp4" }, "autoplay": true }"#;
    view.set_props(props(json)).unwrap();
    assert!(view.controller_mut().wait_for_load(TIMEOUT));

    view.dispose();
    assert!(matches!(view.set_props(props(json)), Err(Error::Disposed)));
    assert!(matches!(
        view.set_source("/videos/a.mp4", None),
        Err(Error::Disposed)
    ));
}
