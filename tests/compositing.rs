use image::{Rgba, RgbaImage};
use transparent_video::{AlphaCompositor, CompositionSpec, Error, Frame, PixelFormat};

fn color_half(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        Rgba([(x * 40) as u8, (y * 50) as u8, ((x + y) * 20) as u8, 255])
    })
}

fn mask_half(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x * 61 + y * 29) % 256) as u8;
        Rgba([v, v, v, 255])
    })
}

#[test]
fn every_pixel_takes_color_from_top_and_alpha_from_bottom() {
    let (width, height) = (6, 4);
    let color = color_half(width, height);
    let mask = mask_half(width, height);
    let frame = Frame::stacked(&color, &mask).unwrap();
    assert_eq!((frame.width(), frame.height()), (6, 8));

    let out = AlphaCompositor::default().compose(&frame).unwrap();
    let spec = CompositionSpec::for_source_size(frame.width(), frame.height());
    assert_eq!(out.dimensions(), (spec.render_width, spec.render_height));

    for (x, y, px) in out.enumerate_pixels() {
        let c = color.get_pixel(x, y);
        let m = mask.get_pixel(x, y);
        assert_eq!(px, &Rgba([c[0], c[1], c[2], m[0]]), "pixel ({x}, {y})");
    }
}

#[test]
fn colored_mask_uses_its_luminance() {
    let color = RgbaImage::from_pixel(1, 1, Rgba([9, 9, 9, 255]));
    let mask = RgbaImage::from_pixel(1, 1, Rgba([0, 0, 255, 255]));
    let out = AlphaCompositor::default()
        .compose(&Frame::stacked(&color, &mask).unwrap())
        .unwrap();
    // Blue carries the smallest weight in Rec. 709 luma.
    assert_eq!(out.get_pixel(0, 0)[3], 19);
}

#[test]
fn composition_is_independent_of_frame_order() {
    let compositor = AlphaCompositor::default();
    let a = Frame::stacked(&color_half(2, 2), &mask_half(2, 2)).unwrap();
    let b = Frame::stacked(
        &RgbaImage::from_pixel(2, 2, Rgba([255, 0, 0, 255])),
        &RgbaImage::from_pixel(2, 2, Rgba([0, 0, 0, 255])),
    )
    .unwrap();

    let a_first = compositor.compose(&a).unwrap();
    compositor.compose(&b).unwrap();
    let a_again = compositor.compose(&a).unwrap();
    assert_eq!(a_first, a_again);
}

#[test]
fn malformed_frames_are_rejected_without_poisoning_the_compositor() {
    let compositor = AlphaCompositor::default();

    let truncated = Frame::new(vec![0; 10], 4, 8, PixelFormat::Rgba8);
    let err = compositor.compose(&truncated).unwrap_err();
    assert!(err.is_frame_local(), "{err}");

    let empty = Frame::new(Vec::new(), 0, 0, PixelFormat::Nv12);
    assert!(matches!(compositor.compose(&empty), Err(Error::Frame(_))));

    let good = Frame::stacked(&color_half(4, 4), &mask_half(4, 4)).unwrap();
    assert!(compositor.compose(&good).is_ok());
}
