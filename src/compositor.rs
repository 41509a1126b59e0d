use crate::Error;
use image::{ImageBuffer, RgbaImage};
use std::time::Duration;
use yuv::{yuv_nv12_to_rgba, YuvBiPlanarImage, YuvConversionMode, YuvRange, YuvStandardMatrix};

/// Pixel layout of a decoded frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// Packed 8-bit RGBA.
    Rgba8,
    /// Packed 8-bit BGRA, as produced by most platform decoders.
    Bgra8,
    /// Bi-planar 4:2:0: a full-size Y plane followed by an interleaved UV plane.
    Nv12,
}

impl PixelFormat {
    /// Minimum number of bytes a tightly packed frame of this size occupies.
    pub fn buffer_len(self, width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        match self {
            PixelFormat::Rgba8 | PixelFormat::Bgra8 => w * h * 4,
            PixelFormat::Nv12 => w * h + w * h / 2,
        }
    }
}

/// A decoded video frame. For stacked-alpha video the top half of the
/// buffer carries color and the bottom half carries the alpha mask.
#[derive(Debug, Clone)]
pub struct Frame {
    data: Vec<u8>,
    width: u32,
    height: u32,
    format: PixelFormat,
    timestamp: Duration,
    pts: i64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            data,
            width,
            height,
            format,
            timestamp: Duration::ZERO,
            pts: 0,
        }
    }

    pub fn with_timestamp(mut self, timestamp: Duration, pts: i64) -> Self {
        self.timestamp = timestamp;
        self.pts = pts;
        self
    }

    pub fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, PixelFormat::Rgba8)
    }

    /// Builds a stacked frame with `color` on top and `mask` below.
    pub fn stacked(color: &RgbaImage, mask: &RgbaImage) -> Result<Self, Error> {
        if color.dimensions() != mask.dimensions() {
            return Err(Error::frame(format!(
                "color is {:?} but mask is {:?}",
                color.dimensions(),
                mask.dimensions()
            )));
        }
        let (width, height) = color.dimensions();
        let mut data = Vec::with_capacity(color.as_raw().len() * 2);
        data.extend_from_slice(color.as_raw());
        data.extend_from_slice(mask.as_raw());
        Ok(Self::new(data, width, height * 2, PixelFormat::Rgba8))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn timestamp(&self) -> Duration {
        self.timestamp
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }
}

/// Output geometry for a stacked-alpha asset: full width, half height.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CompositionSpec {
    pub source_width: u32,
    pub source_height: u32,
    pub render_width: u32,
    pub render_height: u32,
}

impl CompositionSpec {
    pub fn for_source_size(width: u32, height: u32) -> Self {
        Self {
            source_width: width,
            source_height: height,
            render_width: width,
            render_height: height / 2,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.render_width == 0 || self.render_height == 0 {
            return 1.0;
        }
        self.render_width as f32 / self.render_height as f32
    }
}

/// Range of the luma/chroma samples in YUV input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColorRange {
    #[default]
    Full,
    Limited,
}

/// Recombines the color and mask halves of a stacked frame into RGBA.
///
/// Holds no per-frame state, so frames may arrive in any order (seeking,
/// looping) and a single instance can be shared between threads.
#[derive(Debug, Clone, Copy, Default)]
pub struct AlphaCompositor {
    range: ColorRange,
}

impl AlphaCompositor {
    pub fn new(range: ColorRange) -> Self {
        Self { range }
    }

    pub fn range(&self) -> ColorRange {
        self.range
    }

    pub fn compose(&self, frame: &Frame) -> Result<RgbaImage, Error> {
        self.validate(frame)?;
        match frame.format {
            PixelFormat::Rgba8 => split_packed(frame, [0, 1, 2]),
            PixelFormat::Bgra8 => split_packed(frame, [2, 1, 0]),
            PixelFormat::Nv12 => self.split_nv12(frame),
        }
    }

    fn validate(&self, frame: &Frame) -> Result<(), Error> {
        if frame.width == 0 || frame.height == 0 {
            return Err(Error::frame("empty frame"));
        }
        if frame.height % 2 != 0 {
            return Err(Error::frame(format!(
                "height {} cannot be split into color and mask halves",
                frame.height
            )));
        }
        if frame.format == PixelFormat::Nv12 && frame.width % 2 != 0 {
            return Err(Error::frame(format!(
                "NV12 frame width {} is not a whole number of chroma samples",
                frame.width
            )));
        }

        let expected = frame.format.buffer_len(frame.width, frame.height);
        if frame.data.len() < expected {
            return Err(Error::frame(format!(
                "buffer holds {} bytes, expected {}",
                frame.data.len(),
                expected
            )));
        }
        Ok(())
    }

    fn split_nv12(&self, frame: &Frame) -> Result<RgbaImage, Error> {
        let width = frame.width as usize;
        let half = frame.height as usize / 2;

        let (y_plane, uv_plane) = frame.data.split_at(width * frame.height as usize);
        let color = YuvBiPlanarImage {
            y_plane: &y_plane[..width * half],
            y_stride: frame.width,
            uv_plane: &uv_plane[..width * half.div_ceil(2)],
            uv_stride: frame.width,
            width: frame.width,
            height: half as u32,
        };

        let range = match self.range {
            ColorRange::Full => YuvRange::Full,
            ColorRange::Limited => YuvRange::Limited,
        };

        let mut rgba = vec![0u8; width * half * 4];
        yuv_nv12_to_rgba(
            &color,
            &mut rgba,
            frame.width * 4,
            range,
            YuvStandardMatrix::Bt709,
            YuvConversionMode::Balanced,
        )
        .map_err(|e| Error::Convert(format!("{e:?}")))?;

        let mask = &y_plane[width * half..width * half * 2];
        for (px, y) in rgba.chunks_exact_mut(4).zip(mask) {
            px[3] = match self.range {
                ColorRange::Full => *y,
                ColorRange::Limited => expand_limited_luma(*y),
            };
        }

        ImageBuffer::from_raw(frame.width, half as u32, rgba)
            .ok_or_else(|| Error::Convert("output buffer size mismatch".into()))
    }
}

fn split_packed(frame: &Frame, order: [usize; 3]) -> Result<RgbaImage, Error> {
    let half = frame.height / 2;
    let region = frame.width as usize * half as usize * 4;
    let (color, mask) = frame.data[..region * 2].split_at(region);

    let mut rgba = Vec::with_capacity(region);
    for (c, m) in color.chunks_exact(4).zip(mask.chunks_exact(4)) {
        rgba.extend_from_slice(&[
            c[order[0]],
            c[order[1]],
            c[order[2]],
            luma(m[order[0]], m[order[1]], m[order[2]]),
        ]);
    }

    ImageBuffer::from_raw(frame.width, half, rgba)
        .ok_or_else(|| Error::Convert("output buffer size mismatch".into()))
}

/// Maps studio-swing luma (16..=235) onto 0..=255.
fn expand_limited_luma(y: u8) -> u8 {
    let scaled = (u32::from(y.saturating_sub(16)) * 255 + 109) / 219;
    scaled.min(255) as u8
}

/// Rec. 709 luma in 8.8 fixed point. The weights sum to 256 so gray maps to itself.
fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((54 * r as u32 + 183 * g as u32 + 19 * b as u32 + 128) >> 8) as u8
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gray_mask(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = ((x * 37 + y * 11) % 256) as u8;
            Rgba([v, v, v, 255])
        })
    }

    #[test]
    fn render_size_halves_height() {
        let spec = CompositionSpec::for_source_size(640, 960);
        assert_eq!((spec.render_width, spec.render_height), (640, 480));
        assert!((spec.aspect_ratio() - 4.0 / 3.0).abs() < 1e-6);
    }

    #[test]
    fn luma_of_gray_is_identity() {
        for v in 0..=255u8 {
            assert_eq!(luma(v, v, v), v);
        }
        assert_eq!(luma(255, 0, 0), 54);
        assert_eq!(luma(0, 255, 0), 183);
    }

    #[test]
    fn bgra_channels_are_reordered() {
        let color = RgbaImage::from_pixel(2, 1, Rgba([10, 20, 30, 255]));
        let mask = RgbaImage::from_pixel(2, 1, Rgba([200, 200, 200, 255]));
        let rgba = Frame::stacked(&color, &mask).unwrap();

        let bgra: Vec<u8> = rgba
            .data()
            .chunks_exact(4)
            .flat_map(|p| [p[2], p[1], p[0], p[3]])
            .collect();
        let frame = Frame::new(bgra, 2, 2, PixelFormat::Bgra8);

        let out = AlphaCompositor::default().compose(&frame).unwrap();
        assert_eq!(out.get_pixel(1, 0), &Rgba([10, 20, 30, 200]));
    }

    #[test]
    fn nv12_alpha_comes_from_mask_luma() {
        let (width, height) = (4u32, 8u32);
        let y_len = (width * height) as usize;
        let mut data = vec![128u8; y_len + y_len / 2];
        // Mask half of the Y plane.
        for (i, y) in data[y_len / 2..y_len].iter_mut().enumerate() {
            *y = (i * 13) as u8;
        }
        let frame = Frame::new(data, width, height, PixelFormat::Nv12);

        let out = AlphaCompositor::default().compose(&frame).unwrap();
        assert_eq!(out.dimensions(), (4, 4));
        for (i, px) in out.pixels().enumerate() {
            assert_eq!(px[3], (i * 13) as u8);
            for c in &px.0[..3] {
                assert!((*c as i32 - 128).abs() <= 3, "neutral chroma should stay gray");
            }
        }
    }

    #[test]
    fn rejects_odd_height_and_short_buffers() {
        let compositor = AlphaCompositor::default();

        let odd = Frame::new(vec![0; 4 * 3 * 4], 4, 3, PixelFormat::Rgba8);
        assert!(matches!(compositor.compose(&odd), Err(Error::Frame(_))));

        let short = Frame::new(vec![0; 10], 4, 4, PixelFormat::Rgba8);
        assert!(matches!(compositor.compose(&short), Err(Error::Frame(_))));

        let nv12 = Frame::new(vec![0; 5 * 4 * 3 / 2], 5, 4, PixelFormat::Nv12);
        assert!(matches!(compositor.compose(&nv12), Err(Error::Frame(_))));
    }

    fn nv12_with_mask(width: u32, height: u32, mask_y: u8) -> Frame {
        let y_len = (width * height) as usize;
        let mut data = vec![128u8; y_len + y_len / 2];
        data[y_len / 2..y_len].fill(mask_y);
        Frame::new(data, width, height, PixelFormat::Nv12)
    }

    #[test]
    fn limited_range_mask_spans_full_alpha() {
        let compositor = AlphaCompositor::new(ColorRange::Limited);
        for (mask_y, alpha) in [(16, 0), (235, 255), (126, 128), (0, 0), (255, 255)] {
            let out = compositor.compose(&nv12_with_mask(4, 8, mask_y)).unwrap();
            assert!(
                out.pixels().all(|px| px[3] == alpha),
                "mask luma {mask_y} should give alpha {alpha}"
            );
        }

        let full = AlphaCompositor::new(ColorRange::Full);
        let out = full.compose(&nv12_with_mask(4, 8, 16)).unwrap();
        assert_eq!(out.get_pixel(0, 0)[3], 16);
    }

    #[test]
    fn nv12_with_odd_half_height_composes() {
        let out = AlphaCompositor::default()
            .compose(&nv12_with_mask(4, 6, 77))
            .unwrap();
        assert_eq!(out.dimensions(), (4, 3));
        assert!(out.pixels().all(|px| px[3] == 77));
    }

    #[test]
    fn stacked_requires_matching_halves() {
        let color = RgbaImage::new(2, 2);
        let mask = gray_mask(2, 3);
        assert!(Frame::stacked(&color, &mask).is_err());
    }
}
