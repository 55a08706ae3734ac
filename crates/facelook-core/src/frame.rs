//! Raster helpers: decoding, luminance, area resize and CLAHE.

use image::RgbImage;

/// Single-channel luminance raster (width * height bytes, row-major).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LumaFrame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl LumaFrame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        debug_assert_eq!(data.len(), width as usize * height as usize);
        Self { data, width, height }
    }

    pub fn min_side(&self) -> u32 {
        self.width.min(self.height)
    }
}

/// Decode JPEG/PNG (or any format enabled in `image`) into an RGB raster.
pub fn decode_rgb(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Convert RGB to luminance with BT.601 weights in 14-bit fixed point.
pub fn rgb_to_luma(rgb: &RgbImage) -> LumaFrame {
    let (width, height) = rgb.dimensions();
    let data = rgb
        .as_raw()
        .chunks_exact(3)
        .map(|px| {
            let y = px[0] as u32 * 4899 + px[1] as u32 * 9617 + px[2] as u32 * 1868 + (1 << 13);
            (y >> 14) as u8
        })
        .collect();
    LumaFrame::new(data, width, height)
}

/// Per-axis coverage weights for area resampling: for each destination index,
/// the overlapped source indices and their share of the destination pixel.
fn area_weights(src_len: usize, dst_len: usize) -> Vec<Vec<(usize, f32)>> {
    let ratio = src_len as f64 / dst_len as f64;
    (0..dst_len)
        .map(|d| {
            let start = d as f64 * ratio;
            let end = ((d + 1) as f64 * ratio).min(src_len as f64);
            let first = start.floor() as usize;
            let last = (end.ceil() as usize).min(src_len);
            (first..last)
                .filter_map(|s| {
                    let overlap = end.min((s + 1) as f64) - start.max(s as f64);
                    (overlap > 0.0).then(|| (s, (overlap / ratio) as f32))
                })
                .collect()
        })
        .collect()
}

/// Resize an interleaved raster by area averaging.
///
/// Each destination pixel is the coverage-weighted mean of the source pixels
/// under its footprint, which suppresses aliasing when shrinking. Same-size
/// input is returned unchanged.
pub fn resize_area(
    src: &[u8],
    src_w: usize,
    src_h: usize,
    channels: usize,
    dst_w: usize,
    dst_h: usize,
) -> Vec<u8> {
    if src_w == dst_w && src_h == dst_h {
        return src.to_vec();
    }
    if src_w == 0 || src_h == 0 || dst_w == 0 || dst_h == 0 {
        return vec![0u8; dst_w * dst_h * channels];
    }

    let xw = area_weights(src_w, dst_w);
    let yw = area_weights(src_h, dst_h);

    // Horizontal pass: src_h rows of dst_w pixels.
    let mut horiz = vec![0f32; src_h * dst_w * channels];
    for y in 0..src_h {
        let row = &src[y * src_w * channels..(y + 1) * src_w * channels];
        for (dx, taps) in xw.iter().enumerate() {
            let out = &mut horiz[(y * dst_w + dx) * channels..(y * dst_w + dx + 1) * channels];
            for &(sx, w) in taps {
                for c in 0..channels {
                    out[c] += row[sx * channels + c] as f32 * w;
                }
            }
        }
    }

    // Vertical pass.
    let mut out = vec![0u8; dst_w * dst_h * channels];
    let mut acc = vec![0f32; channels];
    for (dy, taps) in yw.iter().enumerate() {
        for dx in 0..dst_w {
            acc.iter_mut().for_each(|a| *a = 0.0);
            for &(sy, w) in taps {
                let px = &horiz[(sy * dst_w + dx) * channels..(sy * dst_w + dx + 1) * channels];
                for c in 0..channels {
                    acc[c] += px[c] * w;
                }
            }
            let base = (dy * dst_w + dx) * channels;
            for c in 0..channels {
                out[base + c] = acc[c].round().clamp(0.0, 255.0) as u8;
            }
        }
    }

    out
}

/// Area-resize an RGB image.
pub fn resize_rgb_area(src: &RgbImage, dst_w: u32, dst_h: u32) -> RgbImage {
    let (w, h) = src.dimensions();
    let data = resize_area(src.as_raw(), w as usize, h as usize, 3, dst_w as usize, dst_h as usize);
    RgbImage::from_raw(dst_w, dst_h, data).unwrap_or_else(|| RgbImage::new(dst_w, dst_h))
}

/// Shrink a frame so its longer side is at most `max_side`.
///
/// Returns the working frame and the forward scale factor (1.0 when the frame
/// already fits). Working dimensions are truncated, never rounded up.
pub fn downscale_for_detection(frame: &LumaFrame, max_side: u32) -> (LumaFrame, f64) {
    let longer = frame.width.max(frame.height);
    if max_side == 0 || longer <= max_side {
        return (frame.clone(), 1.0);
    }

    let scale = max_side as f64 / longer as f64;
    let new_w = ((frame.width as f64 * scale) as u32).max(1);
    let new_h = ((frame.height as f64 * scale) as u32).max(1);
    let data = resize_area(
        &frame.data,
        frame.width as usize,
        frame.height as usize,
        1,
        new_w as usize,
        new_h as usize,
    );
    (LumaFrame::new(data, new_w, new_h), scale)
}

/// Clipped CDF lookup table for one tile, `round(cdf × 255 / tile_pixels)`.
///
/// `clip_limit` is expressed in multiples of the mean histogram bin height;
/// the clipped excess is spread evenly over all bins.
fn tile_cdf(gray: &[u8], stride: usize, x0: usize, y0: usize, tile_w: usize, tile_h: usize, clip_limit: f32) -> [f32; 256] {
    let mut hist = [0u32; 256];
    for y in y0..y0 + tile_h {
        for &p in &gray[y * stride + x0..y * stride + x0 + tile_w] {
            hist[p as usize] += 1;
        }
    }

    let tile_pixels = tile_w * tile_h;
    let clip = ((clip_limit * tile_pixels as f32 / 256.0) as u32).max(1);
    let mut excess = 0u32;
    for bin in hist.iter_mut() {
        if *bin > clip {
            excess += *bin - clip;
            *bin = clip;
        }
    }
    let redist = excess / 256;
    let leftover = (excess % 256) as usize;
    for (i, bin) in hist.iter_mut().enumerate() {
        *bin += redist + u32::from(i < leftover);
    }

    let lut_scale = 255.0 / tile_pixels as f32;
    let mut cdf = [0f32; 256];
    let mut running = 0u32;
    for (slot, &count) in cdf.iter_mut().zip(hist.iter()) {
        running += count;
        *slot = (running as f32 * lut_scale).round().min(255.0);
    }
    cdf
}

/// Apply Contrast-Limited Adaptive Histogram Equalization (CLAHE) in-place.
///
/// Splits the image into `tiles × tiles` regions, equalizes each with a
/// clipped histogram, and blends neighbouring tile mappings bilinearly.
/// Frames with fewer pixels than tiles on an axis are left untouched.
pub fn clahe_enhance(frame: &mut LumaFrame, tiles: u32, clip_limit: f32) {
    let w = frame.width as usize;
    let h = frame.height as usize;
    let t = tiles as usize;
    if t == 0 || w == 0 || h == 0 || frame.data.len() < w * h {
        return;
    }
    let tile_w = w / t;
    let tile_h = h / t;
    if tile_w == 0 || tile_h == 0 {
        return;
    }

    let gray = &mut frame.data;
    let mut cdfs: Vec<[f32; 256]> = Vec::with_capacity(t * t);
    for row in 0..t {
        for col in 0..t {
            cdfs.push(tile_cdf(gray, w, col * tile_w, row * tile_h, tile_w, tile_h, clip_limit));
        }
    }

    let max_tile = (t - 1) as f32;
    for y in 0..h {
        let fy = (y as f32 / tile_h as f32 - 0.5).clamp(0.0, max_tile);
        let r0 = fy as usize;
        let r1 = (r0 + 1).min(t - 1);
        let dy = fy - r0 as f32;

        for x in 0..w {
            let fx = (x as f32 / tile_w as f32 - 0.5).clamp(0.0, max_tile);
            let c0 = fx as usize;
            let c1 = (c0 + 1).min(t - 1);
            let dx = fx - c0 as f32;

            let pixel = gray[y * w + x] as usize;
            let top = cdfs[r0 * t + c0][pixel] * (1.0 - dx) + cdfs[r0 * t + c1][pixel] * dx;
            let bot = cdfs[r1 * t + c0][pixel] * (1.0 - dx) + cdfs[r1 * t + c1][pixel] * dx;
            gray[y * w + x] = (top * (1.0 - dy) + bot * dy).round().clamp(0.0, 255.0) as u8;
        }
    }
}
