//! Picture → panel rasterization.
//!
//! Decoding is delegated to the `image` crate; this module turns decoded
//! RGBA frames into [`FrameBuffer`]s under the zoom, pan, contrast,
//! interpolation and addressing-scheme settings, and works out the replay
//! interval for animated GIFs.

use crate::PanelConfig;
use crate::error::{MatrixError, Result};
use crate::frame::{AnimatedSequence, FrameBuffer};
use image::codecs::gif::GifDecoder;
use image::imageops::{self, FilterType};
use image::{AnimationDecoder, ImageFormat, ImageReader, RgbaImage};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::time::Duration;

/// How image columns map onto LED coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Rotation {
    Planar,
    /// Sampling grid rotated 45° about the panel centre.
    Diagonal,
}

impl Rotation {
    pub fn from_setting(value: u8) -> Self {
        if value == 1 { Self::Diagonal } else { Self::Planar }
    }
}

/// Interpolation used when scaling the picture to the zoomed size.
///
/// Setting codes follow the host UI's interpolation list: 5 nearest,
/// 4 bicubic, 2 and 7 high quality; everything else is bilinear.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Quality {
    Nearest,
    Bilinear,
    Bicubic,
    High,
}

impl Quality {
    pub fn from_setting(value: u8) -> Self {
        match value {
            5 => Self::Nearest,
            4 => Self::Bicubic,
            2 | 7 => Self::High,
            _ => Self::Bilinear,
        }
    }

    fn filter(self) -> FilterType {
        match self {
            Self::Nearest => FilterType::Nearest,
            Self::Bilinear => FilterType::Triangle,
            Self::Bicubic => FilterType::CatmullRom,
            Self::High => FilterType::Lanczos3,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RasterParams {
    /// Percent; 100 fits the picture width to the panel width.
    pub zoom: u32,
    pub offset_x: i32,
    pub offset_y: i32,
    pub quality: Quality,
    /// Percent gain on the (r+g+b)/3 luminance.
    pub contrast: u32,
    pub rotation: Rotation,
}

impl Default for RasterParams {
    fn default() -> Self {
        Self {
            zoom: 100,
            offset_x: 0,
            offset_y: 0,
            quality: Quality::Bilinear,
            contrast: 100,
            rotation: Rotation::Planar,
        }
    }
}

impl RasterParams {
    pub fn from_settings(settings: &crate::config::Settings) -> Self {
        Self {
            zoom: settings.zoom,
            offset_x: settings.x,
            offset_y: settings.y,
            quality: settings.quality(),
            contrast: settings.contrast,
            rotation: settings.rotation(),
        }
    }
}

// ── Decoding ───────────────────────────────────────────────────────

/// A decoded picture: one or more full RGBA frames, plus the native
/// per-frame delay for animated sources.
pub struct DecodedImage {
    pub frames: Vec<RgbaImage>,
    /// `None` for stills, and for animations that declare no delay.
    pub frame_delay_ms: Option<u32>,
}

impl DecodedImage {
    pub fn still(image: RgbaImage) -> Self {
        Self {
            frames: vec![image],
            frame_delay_ms: None,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

/// Open and decode a picture. GIFs are decoded frame by frame (already
/// composited by the decoder); everything else as a single still.
pub fn decode(path: &Path) -> Result<DecodedImage> {
    let reader = ImageReader::open(path)
        .and_then(|r| r.with_guessed_format())
        .map_err(|e| MatrixError::decode(path, e))?;

    if reader.format() == Some(ImageFormat::Gif) {
        return decode_gif(path);
    }

    let image = reader.decode().map_err(|e| MatrixError::decode(path, e))?;
    Ok(DecodedImage::still(image.to_rgba8()))
}

fn decode_gif(path: &Path) -> Result<DecodedImage> {
    let file = File::open(path).map_err(|e| MatrixError::decode(path, e))?;
    let decoder = GifDecoder::new(BufReader::new(file)).map_err(|e| MatrixError::decode(path, e))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| MatrixError::decode(path, e))?;

    if frames.is_empty() {
        return Err(MatrixError::decode(path, "no frames"));
    }

    // One shared delay for the whole sequence, taken from the first frame.
    let frame_delay_ms = frames.first().and_then(|f| {
        let (num, den) = f.delay().numer_denom_ms();
        let ms = if den == 0 { 0 } else { num / den };
        (ms > 0).then_some(ms)
    });

    Ok(DecodedImage {
        frames: frames.into_iter().map(|f| f.into_buffer()).collect(),
        frame_delay_ms,
    })
}

// ── Rasterization ──────────────────────────────────────────────────

/// Scale a picture so its width is `cols * zoom / 100`, keeping aspect.
fn zoomed(image: &RgbaImage, panel: PanelConfig, params: &RasterParams) -> RgbaImage {
    let zoom = params.zoom.clamp(1, 1000) as u64;
    let (w, h) = image.dimensions();
    if w == 0 || h == 0 {
        return RgbaImage::new(0, 0);
    }
    let target_w = ((panel.cols as u64 * zoom) / 100).max(1);
    let target_h = ((h as u64 * target_w) / w as u64).max(1);
    imageops::resize(
        image,
        target_w as u32,
        target_h as u32,
        params.quality.filter(),
    )
}

fn intensity(pixel: &image::Rgba<u8>, contrast: u32) -> u8 {
    let [r, g, b, a] = pixel.0;
    let sum = (r as u64 + g as u64 + b as u64) * a as u64 / 255;
    (sum * contrast as u64 / 300).min(255) as u8
}

/// Picture coordinate sampled by LED `(x, y)`, before panning.
fn source_point(x: i32, y: i32, panel: PanelConfig, rotation: Rotation) -> (i64, i64) {
    match rotation {
        Rotation::Planar => (x as i64, y as i64),
        Rotation::Diagonal => {
            let cx = panel.cols as f64 / 2.0;
            let cy = panel.rows as f64 / 2.0;
            let dx = x as f64 - cx;
            let dy = y as f64 - cy;
            let s = std::f64::consts::FRAC_1_SQRT_2;
            let u = cx + (dx - dy) * s;
            let v = cy + (dx + dy) * s;
            (u.floor() as i64, v.floor() as i64)
        }
    }
}

/// Rasterize one picture frame into a panel frame.
pub fn rasterize(image: &RgbaImage, panel: PanelConfig, params: &RasterParams) -> FrameBuffer {
    let scaled = zoomed(image, panel, params);
    let (w, h) = (scaled.width() as i64, scaled.height() as i64);
    let mut frame = FrameBuffer::new(panel);

    for y in 0..panel.rows as i32 {
        for x in 0..panel.cols as i32 {
            let (u, v) = source_point(x, y, panel, params.rotation);
            let sx = u + params.offset_x as i64;
            let sy = v + params.offset_y as i64;
            if sx < 0 || sy < 0 || sx >= w || sy >= h {
                continue;
            }
            let value = intensity(scaled.get_pixel(sx as u32, sy as u32), params.contrast);
            frame.set(x, y, value);
        }
    }

    frame
}

/// Replay interval used when neither the speed setting nor the source
/// gives a usable one.
pub const FALLBACK_INTERVAL_MS: u32 = 50;

/// Replay interval for an animation: the slower of the configured
/// minimum speed and the source's own delay (absent or 0 → minimum).
/// Never zero.
pub fn animation_interval(min_speed_ms: u32, native_delay_ms: Option<u32>) -> Duration {
    let native = native_delay_ms.filter(|d| *d > 0).unwrap_or(min_speed_ms);
    let ms = match min_speed_ms.max(native) {
        0 => FALLBACK_INTERVAL_MS,
        ms => ms,
    };
    Duration::from_millis(ms as u64)
}

/// What a decoded picture becomes on the panel.
pub enum Rendered {
    Still(FrameBuffer),
    Animated(AnimatedSequence),
}

/// Rasterize every frame of a decoded picture. Multi-frame sources become
/// an [`AnimatedSequence`]; a single frame is a still.
pub fn render(
    decoded: &DecodedImage,
    panel: PanelConfig,
    params: &RasterParams,
    min_speed_ms: u32,
) -> Option<Rendered> {
    match decoded.frames.as_slice() {
        [] => None,
        [single] => Some(Rendered::Still(rasterize(single, panel, params))),
        many => {
            let frames = many.iter().map(|f| rasterize(f, panel, params)).collect();
            let interval = animation_interval(min_speed_ms, decoded.frame_delay_ms);
            AnimatedSequence::new(frames, interval).map(Rendered::Animated)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::codecs::gif::GifEncoder;
    use image::{Delay, Frame, Rgba};
    use pretty_assertions::assert_eq;
    use rstest::rstest;
    use tempfile::TempDir;

    fn solid(w: u32, h: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(w, h, Rgba([value, value, value, 255]))
    }

    fn nearest() -> RasterParams {
        RasterParams {
            quality: Quality::Nearest,
            ..RasterParams::default()
        }
    }

    #[rstest]
    #[case(0, None, 50)]
    #[case(0, Some(0), 50)]
    #[case(0, Some(20), 20)]
    #[case(50, None, 50)]
    #[case(50, Some(0), 50)]
    #[case(50, Some(30), 50)]
    #[case(50, Some(120), 120)]
    fn interval_is_slower_of_speed_and_delay(
        #[case] speed: u32,
        #[case] delay: Option<u32>,
        #[case] expected_ms: u64,
    ) {
        assert_eq!(animation_interval(speed, delay), Duration::from_millis(expected_ms));
    }

    #[rstest]
    #[case(5, Quality::Nearest)]
    #[case(4, Quality::Bicubic)]
    #[case(2, Quality::High)]
    #[case(7, Quality::High)]
    #[case(0, Quality::Bilinear)]
    #[case(3, Quality::Bilinear)]
    fn quality_codes(#[case] code: u8, #[case] expected: Quality) {
        assert_eq!(Quality::from_setting(code), expected);
    }

    #[test]
    fn full_white_fills_panel_at_full_intensity() {
        let panel = PanelConfig::new(8, 8);
        let frame = rasterize(&solid(16, 16, 255), panel, &nearest());
        assert!(frame.as_bytes().iter().all(|v| *v == 255));
    }

    #[rstest]
    #[case(100, 90)]
    #[case(50, 45)]
    #[case(400, 255)]
    fn contrast_scales_and_saturates(#[case] contrast: u32, #[case] expected: u8) {
        let panel = PanelConfig::new(4, 4);
        let params = RasterParams {
            contrast,
            ..nearest()
        };
        let frame = rasterize(&solid(4, 4, 90), panel, &params);
        assert_eq!(frame.get(0, 0), Some(expected));
    }

    #[test]
    fn transparent_pixels_stay_dark() {
        let panel = PanelConfig::new(4, 4);
        let image = RgbaImage::from_pixel(4, 4, Rgba([255, 255, 255, 0]));
        assert!(rasterize(&image, panel, &nearest()).is_blank());
    }

    #[test]
    fn half_zoom_covers_half_the_width() {
        let panel = PanelConfig::new(8, 8);
        let params = RasterParams {
            zoom: 50,
            ..nearest()
        };
        let frame = rasterize(&solid(8, 8, 255), panel, &params);
        assert_eq!(frame.get(3, 3), Some(255));
        assert_eq!(frame.get(4, 0), Some(0));
        assert_eq!(frame.get(0, 4), Some(0));
    }

    #[test]
    fn pan_shifts_picture() {
        let panel = PanelConfig::new(4, 4);
        let mut image = solid(4, 4, 0);
        image.put_pixel(2, 1, Rgba([255, 255, 255, 255]));
        let params = RasterParams {
            offset_x: 2,
            offset_y: 1,
            ..nearest()
        };
        let frame = rasterize(&image, panel, &params);
        assert_eq!(frame.lit().collect::<Vec<_>>(), vec![(0, 0, 255)]);
    }

    #[test]
    fn diagonal_differs_from_planar_and_stays_in_bounds() {
        let panel = PanelConfig::new(10, 10);
        let mut image = solid(10, 10, 0);
        for i in 0..10 {
            image.put_pixel(i, 2, Rgba([255, 255, 255, 255]));
        }
        let planar = rasterize(&image, panel, &nearest());
        let diagonal = rasterize(
            &image,
            panel,
            &RasterParams {
                rotation: Rotation::Diagonal,
                ..nearest()
            },
        );
        assert_ne!(planar, diagonal);
        assert_eq!(diagonal.as_bytes().len(), panel.pixel_count());
        assert!(!diagonal.is_blank());
    }

    #[test]
    fn empty_image_renders_blank() {
        let frame = rasterize(&RgbaImage::new(0, 0), PanelConfig::new(4, 4), &nearest());
        assert!(frame.is_blank());
    }

    #[test]
    fn n_frame_source_yields_n_frames() {
        let decoded = DecodedImage {
            frames: vec![solid(4, 4, 10), solid(4, 4, 20), solid(4, 4, 30)],
            frame_delay_ms: Some(100),
        };
        let panel = PanelConfig::new(4, 4);
        match render(&decoded, panel, &nearest(), 50) {
            Some(Rendered::Animated(seq)) => {
                assert_eq!(seq.len(), 3);
                assert_eq!(seq.interval(), Duration::from_millis(100));
                assert!(seq.frames().iter().all(|f| f.panel() == panel));
            }
            _ => panic!("expected an animated sequence"),
        }
    }

    #[test]
    fn single_frame_source_is_a_still() {
        let decoded = DecodedImage::still(solid(4, 4, 10));
        assert!(matches!(
            render(&decoded, PanelConfig::new(4, 4), &nearest(), 50),
            Some(Rendered::Still(_))
        ));
    }

    #[test]
    fn unreadable_file_is_a_decode_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("broken.png");
        std::fs::write(&path, b"definitely not a png").unwrap();
        assert!(matches!(decode(&path), Err(MatrixError::ImageDecode { .. })));
        assert!(matches!(
            decode(&tmp.path().join("missing.png")),
            Err(MatrixError::ImageDecode { .. })
        ));
    }

    #[test]
    fn decodes_png_still() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("still.png");
        solid(6, 3, 128).save(&path).unwrap();

        let decoded = decode(&path).unwrap();
        assert_eq!(decoded.frame_count(), 1);
        assert_eq!(decoded.frame_delay_ms, None);
        assert_eq!(decoded.frames[0].dimensions(), (6, 3));
    }

    #[test]
    fn decodes_gif_frames_and_delay() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("anim.gif");
        {
            let file = File::create(&path).unwrap();
            let mut encoder = GifEncoder::new(file);
            let frames = (0..3u8).map(|i| {
                Frame::from_parts(
                    solid(4, 4, 60 * (i + 1)),
                    0,
                    0,
                    Delay::from_numer_denom_ms(120, 1),
                )
            });
            encoder.encode_frames(frames).unwrap();
        }

        let decoded = decode(&path).unwrap();
        assert_eq!(decoded.frame_count(), 3);
        assert_eq!(decoded.frame_delay_ms, Some(120));
    }
}
