// ============================================================================
// Rasterization pipeline — board → flat RGBA surface → PNG
// ============================================================================
//
// Renders straight from the element list: resolve each `src` to pixels,
// scale, rotate about the element center with bilinear sampling, and
// alpha-blend onto the board surface in z-order. Selection chrome is a GUI
// concern and never reaches this path.

use std::collections::HashMap;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose};
use image::codecs::png::PngEncoder;
use image::{ImageEncoder, Rgba, RgbaImage, imageops};
use rayon::prelude::*;

use crate::board::BoardElement;

/// Error type for board rasterization.
#[derive(Debug)]
pub enum RenderError {
    /// Image bytes were obtained but could not be decoded.
    Decode(String),
    /// A remote or local source could not be read at all.
    Fetch(String),
    /// The `src` string is not a shape we understand.
    UnsupportedSource(String),
    /// PNG encoding failed.
    Encode(String),
}

impl std::fmt::Display for RenderError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RenderError::Decode(e) => write!(f, "Image decode error: {}", e),
            RenderError::Fetch(e) => write!(f, "Image fetch error: {}", e),
            RenderError::UnsupportedSource(s) => write!(f, "Unsupported image source: {}", s),
            RenderError::Encode(e) => write!(f, "PNG encode error: {}", e),
        }
    }
}

// ----------------------------------------------------------------------------
// Source resolution + cache
// ----------------------------------------------------------------------------

/// Decoded-pixels cache keyed by the element `src` string. Rendering the same
/// board twice (preview, then export, then generation) decodes each source
/// once.
#[derive(Default)]
pub struct SourceCache {
    pixels: HashMap<String, Arc<RgbaImage>>,
}

impl SourceCache {
    /// Resolve `src` to RGBA pixels, consulting the cache first.
    ///
    /// Supported shapes: `data:image/...;base64,` URIs, `http(s)://` URLs,
    /// and local file paths.
    pub fn resolve(&mut self, src: &str) -> Result<Arc<RgbaImage>, RenderError> {
        if let Some(img) = self.pixels.get(src) {
            return Ok(Arc::clone(img));
        }
        let bytes = fetch_source_bytes(src)?;
        let img = image::load_from_memory(&bytes)
            .map_err(|e| RenderError::Decode(format!("{}: {}", source_label(src), e)))?
            .into_rgba8();
        let img = Arc::new(img);
        self.pixels.insert(src.to_string(), Arc::clone(&img));
        Ok(img)
    }

    /// Insert pre-decoded pixels (e.g. a file the GUI already read).
    pub fn put(&mut self, src: &str, img: Arc<RgbaImage>) {
        self.pixels.insert(src.to_string(), img);
    }

    /// Drop every cached entry whose `src` is no longer on the board.
    pub fn retain_sources(&mut self, live: &[BoardElement]) {
        self.pixels.retain(|src, _| live.iter().any(|e| &e.src == src));
    }
}

/// Raw encoded bytes for a source string.
fn fetch_source_bytes(src: &str) -> Result<Vec<u8>, RenderError> {
    if let Some(rest) = src.strip_prefix("data:") {
        let Some((_, payload)) = rest.split_once(";base64,") else {
            return Err(RenderError::UnsupportedSource(
                "data URI without base64 payload".into(),
            ));
        };
        return general_purpose::STANDARD
            .decode(payload.trim())
            .map_err(|e| RenderError::Decode(format!("data URI: {}", e)));
    }

    if src.starts_with("http://") || src.starts_with("https://") {
        let response = reqwest::blocking::get(src)
            .map_err(|e| RenderError::Fetch(format!("{}: {}", src, e)))?;
        if !response.status().is_success() {
            return Err(RenderError::Fetch(format!(
                "{}: HTTP {}",
                src,
                response.status()
            )));
        }
        return response
            .bytes()
            .map(|b| b.to_vec())
            .map_err(|e| RenderError::Fetch(format!("{}: {}", src, e)));
    }

    std::fs::read(src).map_err(|e| RenderError::Fetch(format!("{}: {}", src, e)))
}

/// Short label for error messages — a data URI is kilobytes long.
fn source_label(src: &str) -> &str {
    if src.starts_with("data:") {
        "data URI"
    } else {
        src
    }
}

// ----------------------------------------------------------------------------
// Composition
// ----------------------------------------------------------------------------

/// Flatten the board onto a `width × height` surface filled with
/// `background`.
///
/// Draw order is insertion order with the selected element last (it renders
/// on top in the GUI, and the export matches the screen). Any element whose
/// source cannot be resolved aborts the whole render — no silent partial
/// image.
pub fn compose(
    elements: &[BoardElement],
    cache: &mut SourceCache,
    width: u32,
    height: u32,
    background: Rgba<u8>,
) -> Result<RgbaImage, RenderError> {
    let mut surface = RgbaImage::from_pixel(width.max(1), height.max(1), background);

    let mut order: Vec<&BoardElement> = elements.iter().filter(|e| !e.selected).collect();
    order.extend(elements.iter().filter(|e| e.selected));

    for el in order {
        let pixels = cache.resolve(&el.src)?;
        blit_element(&mut surface, el, &pixels);
    }
    Ok(surface)
}

/// Scale + rotate + alpha-blend one element onto the surface.
///
/// Inverse mapping: for every destination pixel inside the rotated bounding
/// box, rotate back around the element center and bilinear-sample the scaled
/// source. Rows run in parallel.
fn blit_element(surface: &mut RgbaImage, el: &BoardElement, pixels: &RgbaImage) {
    let scaled_w = el.width.round().max(1.0) as u32;
    let scaled_h = el.height.round().max(1.0) as u32;
    let scaled = imageops::resize(pixels, scaled_w, scaled_h, imageops::FilterType::Triangle);

    let (sw, sh) = (surface.width(), surface.height());
    let (cx, cy) = el.center();
    let rad = el.display_rotation().to_radians();
    let (sin, cos) = rad.sin_cos();

    // Tight bounding box of the rotated rect, clamped to the surface.
    let hw = el.width / 2.0;
    let hh = el.height / 2.0;
    let ext_x = hw * cos.abs() + hh * sin.abs();
    let ext_y = hw * sin.abs() + hh * cos.abs();
    let col_start = ((cx - ext_x).floor().max(0.0)) as u32;
    let row_start = ((cy - ext_y).floor().max(0.0)) as u32;
    let col_end = ((cx + ext_x).ceil() as i64).clamp(0, sw as i64 - 1) as u32;
    let row_end = ((cy + ext_y).ceil() as i64).clamp(0, sh as i64 - 1) as u32;
    if col_start > col_end || row_start > row_end {
        return; // entirely off-surface
    }

    let origin_x = cx - scaled_w as f32 / 2.0;
    let origin_y = cy - scaled_h as f32 / 2.0;

    let rows: Vec<u32> = (row_start..=row_end).collect();
    let patches: Vec<(u32, u32, Rgba<u8>)> = rows
        .par_iter()
        .flat_map(|&dy| {
            let mut row = Vec::new();
            let ry = dy as f32 + 0.5 - cy;
            for dx in col_start..=col_end {
                let rx = dx as f32 + 0.5 - cx;
                // Rotate the destination pixel back into source space.
                let ux = rx * cos + ry * sin + cx;
                let uy = -rx * sin + ry * cos + cy;
                let local_x = ux - origin_x;
                let local_y = uy - origin_y;
                if local_x < -0.5
                    || local_y < -0.5
                    || local_x >= scaled_w as f32 + 0.5
                    || local_y >= scaled_h as f32 + 0.5
                {
                    continue;
                }
                let px = sample_bilinear(&scaled, local_x - 0.5, local_y - 0.5);
                if px[3] == 0 {
                    continue;
                }
                row.push((dx, dy, px));
            }
            row
        })
        .collect();

    for (dx, dy, px) in patches {
        let blended = alpha_blend(*surface.get_pixel(dx, dy), px);
        surface.put_pixel(dx, dy, blended);
    }
}

/// Bilinear sample at fractional coordinates, clamp-to-edge so borders don't
/// darken against transparent black.
#[inline]
fn sample_bilinear(img: &RgbaImage, x: f32, y: f32) -> Rgba<u8> {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let at = |sx: i32, sy: i32| -> [f32; 4] {
        let p = img
            .get_pixel(sx.clamp(0, w - 1) as u32, sy.clamp(0, h - 1) as u32)
            .0;
        [p[0] as f32, p[1] as f32, p[2] as f32, p[3] as f32]
    };

    let p00 = at(x0, y0);
    let p10 = at(x0 + 1, y0);
    let p01 = at(x0, y0 + 1);
    let p11 = at(x0 + 1, y0 + 1);

    let mut out = [0u8; 4];
    for c in 0..4 {
        let top = p00[c] * (1.0 - fx) + p10[c] * fx;
        let bottom = p01[c] * (1.0 - fx) + p11[c] * fx;
        out[c] = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgba(out)
}

/// src-over-dst alpha composite.
#[inline]
fn alpha_blend(dst: Rgba<u8>, src: Rgba<u8>) -> Rgba<u8> {
    if src[3] == 0 {
        return dst;
    }
    if src[3] == 255 || dst[3] == 0 {
        return src;
    }
    let sa = src[3] as f32 / 255.0;
    let da = dst[3] as f32 / 255.0;
    let out_a = sa + da * (1.0 - sa);
    let mut out = [0u8; 4];
    for c in 0..3 {
        let v = (src[c] as f32 * sa + dst[c] as f32 * da * (1.0 - sa)) / out_a;
        out[c] = v.round().clamp(0.0, 255.0) as u8;
    }
    out[3] = (out_a * 255.0).round() as u8;
    Rgba(out)
}

// ----------------------------------------------------------------------------
// PNG encoding
// ----------------------------------------------------------------------------

/// Encode a surface to PNG bytes.
pub fn encode_png(img: &RgbaImage) -> Result<Vec<u8>, RenderError> {
    let mut bytes = Vec::new();
    PngEncoder::new(&mut bytes)
        .write_image(
            img.as_raw(),
            img.width(),
            img.height(),
            image::ColorType::Rgba8,
        )
        .map_err(|e| RenderError::Encode(e.to_string()))?;
    Ok(bytes)
}

/// PNG bytes → base64 (no data-URI prefix — the inpaint API wants the bare
/// payload).
pub fn png_to_base64(png: &[u8]) -> String {
    general_purpose::STANDARD.encode(png)
}
