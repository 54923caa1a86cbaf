use std::io::Cursor;
use std::time::Instant;

use bytes::Bytes;
use image::codecs::jpeg::JpegEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};

use crate::admission::mime::is_document_mime;
use crate::admission::params::{Interpolation, TransformParams};
use crate::core::error::ProxyError;
use crate::observability::metrics as obs;
use crate::transform::TransformOutput;

// ---------------------------------------------------------------------------
// Image transform pipeline
// ---------------------------------------------------------------------------

/// Run the full transform pipeline over source bytes.
///
/// Pipeline: passthrough short-circuit → decode once → optional resize →
/// optional rescale → encode. `webp` requests always produce lossy WebP at
/// the given quality. Otherwise the artifact is re-encoded in the source
/// format when the geometry changed or the format honors the quality knob
/// (JPEG); formats without one pass the original bytes through unchanged.
pub fn transform_image(
    source: Bytes,
    media_type: &str,
    params: &TransformParams,
) -> Result<TransformOutput, ProxyError> {
    if params.is_passthrough() {
        return Ok(TransformOutput {
            body: source,
            content_type: media_type.to_string(),
        });
    }

    let start = Instant::now();
    let mut img = decode_source(&source, media_type)?;

    let mut reshaped = false;
    if params.width > 0 || params.height > 0 {
        img = resize_image(img, params.width, params.height, params.interpolation);
        reshaped = true;
    }
    if params.scale > 0.0 {
        img = rescale_image(img, params.scale);
        reshaped = true;
    }

    let output = if params.webp {
        TransformOutput {
            body: Bytes::from(encode_webp(&img, params.quality)),
            content_type: "image/webp".to_string(),
        }
    } else {
        encode_in_source_format(&img, source, media_type, params.quality, reshaped)?
    };

    obs::record_transform_duration(start.elapsed().as_secs_f64());
    Ok(output)
}

fn decode_source(bytes: &[u8], media_type: &str) -> Result<DynamicImage, ProxyError> {
    let format = match media_type {
        "image/jpeg" => ImageFormat::Jpeg,
        "image/png" => ImageFormat::Png,
        "image/gif" => ImageFormat::Gif,
        "image/bmp" => ImageFormat::Bmp,
        "image/tiff" => ImageFormat::Tiff,
        "image/webp" => ImageFormat::WebP,
        other if is_document_mime(other) => {
            #[cfg(feature = "documents")]
            {
                return crate::transform::document::rasterize_first_page(bytes, other);
            }
            #[cfg(not(feature = "documents"))]
            {
                return Err(ProxyError::AuthFailed(format!(
                    "content type '{}' is not allowed",
                    other
                )));
            }
        }
        other => {
            return Err(ProxyError::AuthFailed(format!(
                "content type '{}' is not allowed",
                other
            )));
        }
    };

    image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ProxyError::Internal(format!("failed to read image: {}", e)))
}

/// Resize. Both dimensions given → exact; one given → the other follows
/// the source aspect ratio.
pub fn resize_image(
    img: DynamicImage,
    width: u32,
    height: u32,
    interpolation: Interpolation,
) -> DynamicImage {
    let (src_w, src_h) = (img.width(), img.height());
    let (target_w, target_h) = match (width, height) {
        (0, 0) => return img,
        (w, 0) => {
            let h = (w as f64 * src_h as f64 / src_w as f64).round() as u32;
            (w, h.max(1))
        }
        (0, h) => {
            let w = (h as f64 * src_w as f64 / src_h as f64).round() as u32;
            (w.max(1), h)
        }
        (w, h) => (w, h),
    };
    img.resize_exact(target_w, target_h, filter_for(interpolation))
}

/// Uniform rescale by a factor in (0, 1], always Lanczos3.
pub fn rescale_image(img: DynamicImage, scale: f64) -> DynamicImage {
    let w = ((img.width() as f64 * scale).round() as u32).max(1);
    let h = ((img.height() as f64 * scale).round() as u32).max(1);
    img.resize_exact(w, h, FilterType::Lanczos3)
}

fn filter_for(interpolation: Interpolation) -> FilterType {
    // Mitchell and Lanczos2 have no direct kernel here; the nearest
    // heavier kernel stands in.
    match interpolation {
        Interpolation::Nearest => FilterType::Nearest,
        Interpolation::Bilinear => FilterType::Triangle,
        Interpolation::Bicubic => FilterType::CatmullRom,
        Interpolation::Mitchell => FilterType::Gaussian,
        Interpolation::Lanczos2 | Interpolation::Lanczos3 => FilterType::Lanczos3,
    }
}

/// Lossy WebP at the given quality.
pub fn encode_webp(img: &DynamicImage, quality: u8) -> Vec<u8> {
    let rgba = img.to_rgba8();
    let encoder = webp::Encoder::from_rgba(&rgba, rgba.width(), rgba.height());
    encoder.encode(quality as f32).to_vec()
}

/// JPEG at the given quality.
pub fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, ProxyError> {
    let rgb = img.to_rgb8();
    let mut out = Cursor::new(Vec::new());
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut out, quality))
        .map_err(|e| ProxyError::Internal(format!("failed to encode jpeg: {}", e)))?;
    Ok(out.into_inner())
}

pub fn encode_png(img: &DynamicImage) -> Result<Vec<u8>, ProxyError> {
    let mut out = Cursor::new(Vec::new());
    img.write_to(&mut out, ImageFormat::Png)
        .map_err(|e| ProxyError::Internal(format!("failed to encode png: {}", e)))?;
    Ok(out.into_inner())
}

fn encode_in_source_format(
    img: &DynamicImage,
    original: Bytes,
    media_type: &str,
    quality: u8,
    reshaped: bool,
) -> Result<TransformOutput, ProxyError> {
    match media_type {
        "image/jpeg" if reshaped || quality < 100 => Ok(TransformOutput {
            body: Bytes::from(encode_jpeg(img, quality)?),
            content_type: "image/jpeg".to_string(),
        }),
        "image/webp" if reshaped || quality < 100 => Ok(TransformOutput {
            body: Bytes::from(encode_webp(img, quality)),
            content_type: "image/webp".to_string(),
        }),
        "image/png" | "image/gif" | "image/bmp" | "image/tiff" if reshaped => {
            Ok(TransformOutput {
                body: Bytes::from(encode_png(img)?),
                content_type: "image/png".to_string(),
            })
        }
        other if is_document_mime(other) => Ok(TransformOutput {
            body: Bytes::from(encode_png(img)?),
            content_type: "image/png".to_string(),
        }),
        _ => Ok(TransformOutput {
            body: original,
            content_type: media_type.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_fixture(width: u32, height: u32) -> Bytes {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 40])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Png)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    fn jpeg_fixture(width: u32, height: u32) -> Bytes {
        let img = image::RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 40])
        });
        let mut out = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut out, ImageFormat::Jpeg)
            .unwrap();
        Bytes::from(out.into_inner())
    }

    fn params() -> TransformParams {
        TransformParams::default()
    }

    #[test]
    fn passthrough_returns_original_bytes() {
        let source = png_fixture(10, 10);
        let out = transform_image(source.clone(), "image/png", &params()).unwrap();
        assert_eq!(out.body, source);
        assert_eq!(out.content_type, "image/png");
    }

    #[test]
    fn webp_request_produces_webp() {
        let source = jpeg_fixture(100, 100);
        let mut p = params();
        p.webp = true;
        p.quality = 80;
        let out = transform_image(source, "image/jpeg", &p).unwrap();
        assert_eq!(out.content_type, "image/webp");
        assert_eq!(&out.body[0..4], b"RIFF");
        assert_eq!(&out.body[8..12], b"WEBP");
    }

    #[test]
    fn exact_resize_dimensions() {
        let source = jpeg_fixture(100, 100);
        let mut p = params();
        p.webp = true;
        p.width = 320;
        p.height = 240;
        let out = transform_image(source, "image/jpeg", &p).unwrap();
        let decoded = image::load_from_memory(&out.body).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (320, 240));
    }

    #[test]
    fn single_dimension_preserves_aspect() {
        let wide = DynamicImage::ImageRgb8(image::RgbImage::new(100, 50));
        let resized = resize_image(wide, 50, 0, Interpolation::Lanczos3);
        assert_eq!((resized.width(), resized.height()), (50, 25));

        let tall = DynamicImage::ImageRgb8(image::RgbImage::new(40, 80));
        let resized = resize_image(tall, 0, 40, Interpolation::Bilinear);
        assert_eq!((resized.width(), resized.height()), (20, 40));
    }

    #[test]
    fn rescale_halves_both_dimensions() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(100, 60));
        let out = rescale_image(img, 0.5);
        assert_eq!((out.width(), out.height()), (50, 30));
    }

    #[test]
    fn rescale_identity_at_one() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(33, 17));
        let out = rescale_image(img, 1.0);
        assert_eq!((out.width(), out.height()), (33, 17));
    }

    #[test]
    fn rescale_never_collapses_to_zero() {
        let img = DynamicImage::ImageRgb8(image::RgbImage::new(3, 3));
        let out = rescale_image(img, 0.01);
        assert_eq!((out.width(), out.height()), (1, 1));
    }

    #[test]
    fn jpeg_quality_reencodes_as_jpeg() {
        let source = jpeg_fixture(50, 50);
        let mut p = params();
        p.quality = 40;
        let out = transform_image(source, "image/jpeg", &p).unwrap();
        assert_eq!(out.content_type, "image/jpeg");
        let decoded = image::load_from_memory_with_format(&out.body, ImageFormat::Jpeg).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (50, 50));
    }

    #[test]
    fn png_quality_only_passes_through() {
        // PNG has no quality knob; without geometry changes the original
        // bytes survive untouched.
        let source = png_fixture(20, 20);
        let mut p = params();
        p.quality = 40;
        let out = transform_image(source.clone(), "image/png", &p).unwrap();
        assert_eq!(out.body, source);
        assert_eq!(out.content_type, "image/png");
    }

    #[test]
    fn resized_png_reencodes() {
        let source = png_fixture(40, 40);
        let mut p = params();
        p.width = 10;
        p.height = 10;
        let out = transform_image(source.clone(), "image/png", &p).unwrap();
        assert_ne!(out.body, source);
        assert_eq!(out.content_type, "image/png");
        let decoded = image::load_from_memory_with_format(&out.body, ImageFormat::Png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn unsupported_media_type_is_denied() {
        let mut p = params();
        p.quality = 50;
        let err = transform_image(Bytes::from_static(b"x"), "image/svg+xml", &p).unwrap_err();
        assert_eq!(err.kind(), "auth_failed");
    }

    #[test]
    fn corrupt_source_is_internal_error() {
        let mut p = params();
        p.webp = true;
        let err =
            transform_image(Bytes::from_static(b"not a jpeg"), "image/jpeg", &p).unwrap_err();
        assert_eq!(err.kind(), "internal");
    }
}
