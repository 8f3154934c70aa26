//! Tier-1 local OCR of the printed identity grid in the page header.
//! The header sits in the top quarter of the first page: three rows of
//! machine-printed cells (last name, first name, date of birth). The
//! pipeline is classical: threshold, deskew, strip the grid lines, segment
//! by ink projection, then match each glyph against rendered templates.

use image::RgbImage;

use crate::services::flatten::font;

/// Fraction of the page height holding the identity grid.
const HEADER_FRACTION: f64 = 0.25;
/// Glyph shapes are compared on this normalized grid.
const NORM_W: u32 = 10;
const NORM_H: u32 = 14;
/// Deskew search range, in degrees.
const SKEW_RANGE: f64 = 3.0;
const SKEW_STEP: f64 = 0.5;

const NAME_ALPHABET: &str = "ABCDEFGHIJKLMNOPQRSTUVWXYZ";
const DATE_ALPHABET: &str = "0123456789/";

#[derive(Debug, Clone)]
pub(crate) struct HeaderRead {
    pub(crate) last_name: String,
    pub(crate) first_name: String,
    pub(crate) dob_raw: String,
    /// Weakest per-character template score across all three fields.
    pub(crate) confidence: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct Bitmap {
    width: usize,
    height: usize,
    data: Vec<bool>,
}

impl Bitmap {
    fn new(width: usize, height: usize) -> Self {
        Self { width, height, data: vec![false; width * height] }
    }

    fn get(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }

    fn set(&mut self, x: usize, y: usize, value: bool) {
        self.data[y * self.width + x] = value;
    }

    fn ink_count(&self) -> usize {
        self.data.iter().filter(|&&ink| ink).count()
    }
}

/// Read the three header fields from a first-page raster. Returns `None`
/// when the header cannot be segmented into three rows.
pub(crate) fn read_header(page: &RgbImage) -> Option<HeaderRead> {
    let header = binarize_header(page);
    if header.ink_count() == 0 {
        return None;
    }

    let deskewed = deskew(&header);
    let stripped = remove_grid_lines(&deskewed);

    let rows = segment_rows(&stripped);
    if rows.len() < 3 {
        return None;
    }

    let mut fields = Vec::with_capacity(3);
    let mut confidence = f64::MAX;
    for (index, (top, bottom)) in rows.iter().take(3).enumerate() {
        let alphabet = if index == 2 { DATE_ALPHABET } else { NAME_ALPHABET };
        let (text, field_confidence) = read_row(&stripped, *top, *bottom, alphabet)?;
        confidence = confidence.min(field_confidence);
        fields.push(text);
    }

    let mut fields = fields.into_iter();
    Some(HeaderRead {
        last_name: fields.next()?,
        first_name: fields.next()?,
        dob_raw: fields.next()?,
        confidence,
    })
}

/// Adaptive mean threshold over the top quarter of the page, via an
/// integral image so the window stays cheap.
fn binarize_header(page: &RgbImage) -> Bitmap {
    let width = page.width() as usize;
    let height = ((page.height() as f64 * HEADER_FRACTION) as usize).max(1);
    let window = 15usize;

    let mut gray = vec![0u32; width * height];
    for y in 0..height {
        for x in 0..width {
            let pixel = page.get_pixel(x as u32, y as u32);
            gray[y * width + x] =
                (pixel[0] as u32 * 299 + pixel[1] as u32 * 587 + pixel[2] as u32 * 114) / 1000;
        }
    }

    // integral[y][x] = sum of gray over [0,y) x [0,x)
    let mut integral = vec![0u64; (width + 1) * (height + 1)];
    for y in 0..height {
        let mut row_sum = 0u64;
        for x in 0..width {
            row_sum += gray[y * width + x] as u64;
            integral[(y + 1) * (width + 1) + (x + 1)] =
                integral[y * (width + 1) + (x + 1)] + row_sum;
        }
    }

    let mut bitmap = Bitmap::new(width, height);
    let half = window / 2;
    for y in 0..height {
        for x in 0..width {
            let x0 = x.saturating_sub(half);
            let y0 = y.saturating_sub(half);
            let x1 = (x + half + 1).min(width);
            let y1 = (y + half + 1).min(height);
            let area = ((x1 - x0) * (y1 - y0)) as u64;
            let sum = integral[y1 * (width + 1) + x1] + integral[y0 * (width + 1) + x0]
                - integral[y0 * (width + 1) + x1]
                - integral[y1 * (width + 1) + x0];
            let mean = sum / area;
            // Ink is noticeably darker than its neighborhood.
            bitmap.set(x, y, (gray[y * width + x] as u64) * 100 < mean * 85);
        }
    }
    bitmap
}

/// Shear-based deskew: pick the angle whose row projection has the highest
/// variance, which peaks when text rows align horizontally.
fn deskew(bitmap: &Bitmap) -> Bitmap {
    let mut best_angle = 0.0f64;
    let mut best_variance = row_projection_variance(bitmap, 0.0);

    let steps = (2.0 * SKEW_RANGE / SKEW_STEP) as i32;
    for step in 0..=steps {
        let angle = -SKEW_RANGE + step as f64 * SKEW_STEP;
        if angle == 0.0 {
            continue;
        }
        let variance = row_projection_variance(bitmap, angle);
        if variance > best_variance {
            best_variance = variance;
            best_angle = angle;
        }
    }

    if best_angle == 0.0 {
        return bitmap.clone();
    }
    shear(bitmap, best_angle)
}

fn shear(bitmap: &Bitmap, angle_degrees: f64) -> Bitmap {
    let slope = angle_degrees.to_radians().tan();
    let mut out = Bitmap::new(bitmap.width, bitmap.height);
    for y in 0..bitmap.height {
        let shift = (y as f64 * slope).round() as isize;
        for x in 0..bitmap.width {
            if !bitmap.get(x, y) {
                continue;
            }
            let nx = x as isize + shift;
            if nx >= 0 && (nx as usize) < bitmap.width {
                out.set(nx as usize, y, true);
            }
        }
    }
    out
}

fn row_projection_variance(bitmap: &Bitmap, angle_degrees: f64) -> f64 {
    let slope = angle_degrees.to_radians().tan();
    let mut projection = vec![0usize; bitmap.height];
    for y in 0..bitmap.height {
        let shift = (y as f64 * slope).round() as isize;
        for x in 0..bitmap.width {
            if bitmap.get(x, y) {
                let nx = x as isize + shift;
                if nx >= 0 && (nx as usize) < bitmap.width {
                    projection[y] += 1;
                }
            }
        }
    }
    let mean = projection.iter().sum::<usize>() as f64 / projection.len() as f64;
    projection.iter().map(|&count| (count as f64 - mean).powi(2)).sum::<f64>()
        / projection.len() as f64
}

/// Morphological line removal: ink runs longer than a third of the image in
/// either axis are grid rules, not glyph strokes.
fn remove_grid_lines(bitmap: &Bitmap) -> Bitmap {
    let mut out = bitmap.clone();
    let min_h_run = bitmap.width / 3;
    let min_v_run = bitmap.height / 3;

    for y in 0..bitmap.height {
        let mut run_start = None;
        for x in 0..=bitmap.width {
            let ink = x < bitmap.width && bitmap.get(x, y);
            match (ink, run_start) {
                (true, None) => run_start = Some(x),
                (false, Some(start)) => {
                    if x - start >= min_h_run {
                        for clear_x in start..x {
                            out.set(clear_x, y, false);
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    for x in 0..bitmap.width {
        let mut run_start = None;
        for y in 0..=bitmap.height {
            let ink = y < bitmap.height && bitmap.get(x, y);
            match (ink, run_start) {
                (true, None) => run_start = Some(y),
                (false, Some(start)) => {
                    if y - start >= min_v_run {
                        for clear_y in start..y {
                            out.set(x, clear_y, false);
                        }
                    }
                    run_start = None;
                }
                _ => {}
            }
        }
    }

    out
}

/// Bands of consecutive rows carrying ink, `(top, bottom)` exclusive.
fn segment_rows(bitmap: &Bitmap) -> Vec<(usize, usize)> {
    let mut projection = vec![0usize; bitmap.height];
    for y in 0..bitmap.height {
        for x in 0..bitmap.width {
            if bitmap.get(x, y) {
                projection[y] += 1;
            }
        }
    }

    let mut bands = Vec::new();
    let mut start = None;
    for y in 0..=bitmap.height {
        let has_ink = y < bitmap.height && projection[y] > 0;
        match (has_ink, start) {
            (true, None) => start = Some(y),
            (false, Some(band_start)) => {
                bands.push((band_start, y));
                start = None;
            }
            _ => {}
        }
    }
    bands
}

/// Recognize one row of glyphs. A gap wider than twice the median glyph gap
/// becomes a space.
fn read_row(
    bitmap: &Bitmap,
    top: usize,
    bottom: usize,
    alphabet: &str,
) -> Option<(String, f64)> {
    let segments = segment_columns(bitmap, top, bottom);
    if segments.is_empty() {
        return None;
    }

    let mut gaps = Vec::new();
    for pair in segments.windows(2) {
        gaps.push(pair[1].0 - pair[0].1);
    }
    let mut sorted_gaps = gaps.clone();
    sorted_gaps.sort_unstable();
    let median_gap = sorted_gaps.get(sorted_gaps.len() / 2).copied().unwrap_or(0);

    let mut text = String::new();
    let mut confidence = f64::MAX;
    for (index, &(left, right)) in segments.iter().enumerate() {
        if index > 0 && median_gap > 0 {
            let gap = left - segments[index - 1].1;
            if gap > 2 * median_gap {
                text.push(' ');
            }
        }
        let shape = normalize_region(bitmap, left, right, top, bottom)?;
        let (c, score) = best_match(&shape, alphabet);
        confidence = confidence.min(score);
        text.push(c);
    }

    Some((text, confidence))
}

/// Column spans of consecutive ink within a row band, `(left, right)`
/// exclusive.
fn segment_columns(bitmap: &Bitmap, top: usize, bottom: usize) -> Vec<(usize, usize)> {
    let mut projection = vec![0usize; bitmap.width];
    for x in 0..bitmap.width {
        for y in top..bottom {
            if bitmap.get(x, y) {
                projection[x] += 1;
            }
        }
    }

    let mut segments = Vec::new();
    let mut start = None;
    for x in 0..=bitmap.width {
        let has_ink = x < bitmap.width && projection[x] > 0;
        match (has_ink, start) {
            (true, None) => start = Some(x),
            (false, Some(segment_start)) => {
                segments.push((segment_start, x));
                start = None;
            }
            _ => {}
        }
    }
    segments
}

/// Crop the region to its ink bounding box and resample to the comparison
/// grid by nearest neighbor.
fn normalize_region(
    bitmap: &Bitmap,
    left: usize,
    right: usize,
    top: usize,
    bottom: usize,
) -> Option<Bitmap> {
    let mut min_x = right;
    let mut max_x = left;
    let mut min_y = bottom;
    let mut max_y = top;
    for y in top..bottom {
        for x in left..right {
            if bitmap.get(x, y) {
                min_x = min_x.min(x);
                max_x = max_x.max(x);
                min_y = min_y.min(y);
                max_y = max_y.max(y);
            }
        }
    }
    if min_x > max_x || min_y > max_y {
        return None;
    }

    let src_w = max_x - min_x + 1;
    let src_h = max_y - min_y + 1;
    let mut out = Bitmap::new(NORM_W as usize, NORM_H as usize);
    for y in 0..NORM_H as usize {
        for x in 0..NORM_W as usize {
            let sx = min_x + x * src_w / NORM_W as usize;
            let sy = min_y + y * src_h / NORM_H as usize;
            out.set(x, y, bitmap.get(sx, sy));
        }
    }
    Some(out)
}

fn best_match(shape: &Bitmap, alphabet: &str) -> (char, f64) {
    let mut best = ('?', 0.0f64);
    for c in alphabet.chars() {
        let template = template_shape(c);
        let score = shape_similarity(shape, &template);
        if score > best.1 {
            best = (c, score);
        }
    }
    best
}

fn template_shape(c: char) -> Bitmap {
    let glyph = font::glyph(c);
    let mut raw = Bitmap::new(font::GLYPH_WIDTH as usize, font::GLYPH_HEIGHT as usize);
    for (y, &bits) in glyph.iter().enumerate() {
        for x in 0..font::GLYPH_WIDTH as usize {
            raw.set(x, y, bits & (1u8 << (font::GLYPH_WIDTH as usize - 1 - x)) != 0);
        }
    }
    normalize_region(&raw, 0, raw.width, 0, raw.height)
        .unwrap_or_else(|| Bitmap::new(NORM_W as usize, NORM_H as usize))
}

fn shape_similarity(a: &Bitmap, b: &Bitmap) -> f64 {
    let total = a.data.len();
    let matching = a.data.iter().zip(&b.data).filter(|(x, y)| x == y).count();
    matching as f64 / total as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    const SCALE: u32 = 4;

    fn draw_text(page: &mut RgbImage, text: &str, x0: u32, y0: u32) {
        let mut cursor = x0;
        for c in text.chars() {
            let glyph = font::glyph(c);
            for (row, &bits) in glyph.iter().enumerate() {
                for col in 0..font::GLYPH_WIDTH {
                    if bits & (1u8 << (font::GLYPH_WIDTH - 1 - col)) == 0 {
                        continue;
                    }
                    for dy in 0..SCALE {
                        for dx in 0..SCALE {
                            page.put_pixel(
                                cursor + col * SCALE + dx,
                                y0 + row as u32 * SCALE + dy,
                                Rgb([0, 0, 0]),
                            );
                        }
                    }
                }
            }
            cursor += font::GLYPH_ADVANCE * SCALE;
        }
    }

    fn header_page(last: &str, first: &str, dob: &str) -> RgbImage {
        let mut page = RgbImage::from_pixel(800, 1000, Rgb([255, 255, 255]));
        // Grid rules around the three rows.
        for x in 20..700 {
            for &y in &[30u32, 80, 130, 180] {
                page.put_pixel(x, y, Rgb([0, 0, 0]));
            }
        }
        draw_text(&mut page, last, 40, 45);
        draw_text(&mut page, first, 40, 95);
        draw_text(&mut page, dob, 40, 145);
        page
    }

    #[test]
    fn reads_a_clean_printed_header() {
        let page = header_page("DUPONT", "MARIE", "15/03/2008");
        let read = read_header(&page).expect("header read");
        assert_eq!(read.last_name, "DUPONT");
        assert_eq!(read.first_name, "MARIE");
        assert_eq!(read.dob_raw, "15/03/2008");
        assert!(read.confidence > 0.9, "confidence {}", read.confidence);
    }

    #[test]
    fn grid_lines_do_not_leak_into_fields() {
        let page = header_page("MARTIN", "PAUL", "01/09/2007");
        let read = read_header(&page).expect("header read");
        assert_eq!(read.last_name, "MARTIN");
        assert_eq!(read.dob_raw, "01/09/2007");
    }

    #[test]
    fn blank_page_yields_nothing() {
        let page = RgbImage::from_pixel(400, 600, Rgb([255, 255, 255]));
        assert!(read_header(&page).is_none());
    }

    #[test]
    fn two_rows_only_is_not_enough() {
        let mut page = RgbImage::from_pixel(800, 1000, Rgb([255, 255, 255]));
        draw_text(&mut page, "DUPONT", 40, 45);
        draw_text(&mut page, "MARIE", 40, 95);
        assert!(read_header(&page).is_none());
    }
}
