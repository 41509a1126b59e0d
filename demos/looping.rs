use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use transparent_video::{
    FfmpegFrameSource, FfmpegResolver, LifecycleHub, PlaybackEvent, SourceProp,
    TransparentVideoView, VideoSource, ViewProps,
};

fn main() {
    env_logger::init();

    let path = std::env::args().nth(1).map(PathBuf::from).unwrap_or_else(|| {
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("./assets/stacked.mp4")
    });
    let path = std::fs::canonicalize(&path).expect("video file not found");

    let hub = LifecycleHub::new();
    let mut view =
        TransparentVideoView::new(Arc::new(FfmpegResolver), &hub).expect("failed to create view");
    view.set_props(ViewProps {
        source: Some(SourceProp {
            uri: path.to_string_lossy().into_owned(),
            mime_type: Some("video/mp4".into()),
        }),
        looping: Some(true),
        autoplay: Some(true),
    })
    .expect("failed to set props");

    if !view.controller_mut().wait_for_load(Duration::from_secs(10)) {
        eprintln!("timed out waiting for the asset");
        return;
    }
    let (width, height) = view.controller().render_size().expect("no item loaded");
    println!("Playing {}x{} composited output", width, height);

    let source: VideoSource = view.controller().source().cloned().expect("no source");
    let frames = FfmpegFrameSource::open(&source, 30).expect("failed to open decoder");

    let started = Instant::now();
    let mut last_tick = started;
    let mut presented = 0u64;
    let mut pending = None;
    while started.elapsed() < Duration::from_secs(10) {
        if pending.is_none() {
            pending = frames.next_timeout(Duration::from_millis(5));
        }
        // The playback clock alone decides when a frame is due and when the
        // stream ends; decoder EOS just means no more frames arrive.
        if let Some(frame) = pending.take() {
            if frame.timestamp() <= view.controller().position() {
                view.present(&frame);
                presented += 1;
            } else {
                pending = Some(frame);
                std::thread::sleep(Duration::from_millis(2));
            }
        }

        let now = Instant::now();
        view.tick(now - last_tick);
        last_tick = now;

        for event in view.controller_mut().drain_events() {
            log::info!("{:?}", event);
            if event == PlaybackEvent::Looped {
                pending = None;
                frames.seek(Duration::ZERO).expect("decoder thread is gone");
            }
        }
    }

    println!("Presented {} frames", presented);
    if let Some(image) = view.controller().current_image() {
        image.save("looping.png").expect("failed to save frame");
        println!("Saved last frame to looping.png");
    }
    view.dispose();
}
