//! Bakes annotations onto page rasters and reassembles the pages into a
//! single PDF. Pure with respect to the database: callers pass everything in.

pub(crate) mod font;

use image::{Rgb, RgbImage};
use lopdf::dictionary;
use thiserror::Error;

use crate::db::models::Annotation;
use crate::db::types::AnnotationKind;

const COMMENT_COLOR: Rgb<u8> = Rgb([21, 101, 192]);
const HIGHLIGHT_COLOR: Rgb<u8> = Rgb([255, 235, 59]);
const ERROR_COLOR: Rgb<u8> = Rgb([211, 47, 47]);
const BONUS_COLOR: Rgb<u8> = Rgb([46, 125, 50]);

const HIGHLIGHT_ALPHA: f32 = 0.35;
const BORDER_THICKNESS: u32 = 3;
const TEXT_SCALE: u32 = 2;
const TEXT_PADDING: u32 = 6;

#[derive(Debug, Error)]
pub(crate) enum FlattenError {
    #[error("copy has no page images")]
    NoPages,
    #[error("page {page} could not be decoded: {detail}")]
    Decode { page: usize, detail: String },
    #[error("PDF assembly failed: {0}")]
    Assemble(String),
}

/// Compose every page raster with its annotations and return the finished
/// PDF. One output page per input raster, identical pixel dimensions.
pub(crate) fn flatten_pages(
    pages_png: &[Vec<u8>],
    annotations: &[Annotation],
) -> Result<Vec<u8>, FlattenError> {
    if pages_png.is_empty() {
        return Err(FlattenError::NoPages);
    }

    let mut composed = Vec::with_capacity(pages_png.len());
    for (page, png) in pages_png.iter().enumerate() {
        let mut image = image::load_from_memory(png)
            .map_err(|err| FlattenError::Decode { page, detail: err.to_string() })?
            .to_rgb8();

        for annotation in annotations {
            if annotation.page_index as usize == page {
                draw_annotation(&mut image, annotation);
            }
        }

        composed.push(image);
    }

    assemble_pdf(&composed)
}

fn draw_annotation(image: &mut RgbImage, annotation: &Annotation) {
    let (width, height) = (image.width(), image.height());
    let x0 = (annotation.x * width as f64) as u32;
    let y0 = (annotation.y * height as f64) as u32;
    let w = ((annotation.w * width as f64) as u32).max(1);
    let h = ((annotation.h * height as f64) as u32).max(1);

    match annotation.kind {
        AnnotationKind::Surlignage => {
            fill_blend(image, x0, y0, w, h, HIGHLIGHT_COLOR, HIGHLIGHT_ALPHA);
        }
        AnnotationKind::Commentaire => {
            stroke_rect(image, x0, y0, w, h, COMMENT_COLOR);
            draw_text_clipped(image, &annotation.content, x0, y0, w, h, COMMENT_COLOR);
        }
        AnnotationKind::Erreur => {
            stroke_rect(image, x0, y0, w, h, ERROR_COLOR);
            let text = if annotation.content.is_empty() {
                "X".to_string()
            } else {
                annotation.content.clone()
            };
            draw_text_clipped(image, &text, x0, y0, w, h, ERROR_COLOR);
        }
        AnnotationKind::Bonus => {
            stroke_rect(image, x0, y0, w, h, BONUS_COLOR);
            let mut text = match annotation.score_delta {
                Some(delta) if delta >= 0 => format!("+{delta}"),
                Some(delta) => delta.to_string(),
                None => String::new(),
            };
            if !annotation.content.is_empty() {
                if !text.is_empty() {
                    text.push(' ');
                }
                text.push_str(&annotation.content);
            }
            draw_text_clipped(image, &text, x0, y0, w, h, BONUS_COLOR);
        }
    }
}

fn fill_blend(image: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>, alpha: f32) {
    let x1 = (x0 + w).min(image.width());
    let y1 = (y0 + h).min(image.height());
    for y in y0..y1 {
        for x in x0..x1 {
            let pixel = image.get_pixel_mut(x, y);
            for channel in 0..3 {
                let base = pixel[channel] as f32;
                let overlay = color[channel] as f32;
                pixel[channel] = (base * (1.0 - alpha) + overlay * alpha) as u8;
            }
        }
    }
}

fn stroke_rect(image: &mut RgbImage, x0: u32, y0: u32, w: u32, h: u32, color: Rgb<u8>) {
    let x1 = (x0 + w).min(image.width());
    let y1 = (y0 + h).min(image.height());
    for y in y0..y1 {
        for x in x0..x1 {
            let on_border = x < x0 + BORDER_THICKNESS
                || x + BORDER_THICKNESS >= x1
                || y < y0 + BORDER_THICKNESS
                || y + BORDER_THICKNESS >= y1;
            if on_border {
                image.put_pixel(x, y, color);
            }
        }
    }
}

/// Word-wrapped text inside the rectangle; anything past the bottom edge is
/// clipped.
fn draw_text_clipped(
    image: &mut RgbImage,
    text: &str,
    x0: u32,
    y0: u32,
    w: u32,
    h: u32,
    color: Rgb<u8>,
) {
    if text.is_empty() {
        return;
    }

    let inner_w = w.saturating_sub(2 * TEXT_PADDING);
    let inner_h = h.saturating_sub(2 * TEXT_PADDING);
    let advance = font::GLYPH_ADVANCE * TEXT_SCALE;
    let line_height = (font::GLYPH_HEIGHT + 2) * TEXT_SCALE;
    let cols = (inner_w / advance.max(1)) as usize;
    let rows = (inner_h / line_height.max(1)) as usize;
    if cols == 0 || rows == 0 {
        return;
    }

    for (row, line) in wrap_text(text, cols).into_iter().take(rows).enumerate() {
        let mut cursor_x = x0 + TEXT_PADDING;
        let cursor_y = y0 + TEXT_PADDING + row as u32 * line_height;
        for c in line.chars() {
            draw_glyph(image, c, cursor_x, cursor_y, color);
            cursor_x += advance;
        }
    }
}

fn draw_glyph(image: &mut RgbImage, c: char, x0: u32, y0: u32, color: Rgb<u8>) {
    let bitmap = font::glyph(c);
    for (row, &bits) in bitmap.iter().enumerate() {
        for col in 0..font::GLYPH_WIDTH {
            if bits & (1u8 << (font::GLYPH_WIDTH - 1 - col)) == 0 {
                continue;
            }
            for dy in 0..TEXT_SCALE {
                for dx in 0..TEXT_SCALE {
                    let x = x0 + col * TEXT_SCALE + dx;
                    let y = y0 + row as u32 * TEXT_SCALE + dy;
                    if x < image.width() && y < image.height() {
                        image.put_pixel(x, y, color);
                    }
                }
            }
        }
    }
}

fn wrap_text(text: &str, cols: usize) -> Vec<String> {
    let mut lines = Vec::new();
    let mut current = String::new();
    let mut current_len = 0usize;

    for word in text.split_whitespace() {
        let word_len = word.chars().count();

        if current_len > 0 && current_len + 1 + word_len > cols {
            lines.push(std::mem::take(&mut current));
            current_len = 0;
        }

        if word_len > cols {
            // Hard-break words wider than the box.
            for c in word.chars() {
                if current_len == cols {
                    lines.push(std::mem::take(&mut current));
                    current_len = 0;
                }
                current.push(c);
                current_len += 1;
            }
            continue;
        }

        if current_len > 0 {
            current.push(' ');
            current_len += 1;
        }
        current.push_str(word);
        current_len += word_len;
    }

    if !current.is_empty() {
        lines.push(current);
    }
    lines
}

fn assemble_pdf(pages: &[RgbImage]) -> Result<Vec<u8>, FlattenError> {
    let mut document = lopdf::Document::with_version("1.5");
    let pages_id = document.new_object_id();
    let mut kids: Vec<lopdf::Object> = Vec::with_capacity(pages.len());

    for image in pages {
        let (width, height) = (image.width(), image.height());

        let mut jpeg = Vec::new();
        let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut jpeg, 85);
        image
            .write_with_encoder(encoder)
            .map_err(|err| FlattenError::Assemble(err.to_string()))?;

        let image_id = document.add_object(lopdf::Stream::new(
            lopdf::dictionary! {
                "Type" => "XObject",
                "Subtype" => "Image",
                "Width" => width as i64,
                "Height" => height as i64,
                "ColorSpace" => "DeviceRGB",
                "BitsPerComponent" => 8,
                "Filter" => "DCTDecode",
            },
            jpeg,
        ));

        let content = format!("q\n{width} 0 0 {height} 0 0 cm\n/Im0 Do\nQ");
        let content_id = document
            .add_object(lopdf::Stream::new(lopdf::dictionary! {}, content.into_bytes()));

        let page_id = document.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), (width as i64).into(), (height as i64).into()],
            "Resources" => lopdf::dictionary! {
                "XObject" => lopdf::dictionary! { "Im0" => image_id },
            },
        });
        kids.push(page_id.into());
    }

    let count = kids.len() as i64;
    document.objects.insert(
        pages_id,
        lopdf::Object::Dictionary(lopdf::dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = document.add_object(lopdf::dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    // No Info dictionary: output metadata stays empty.
    document.trailer.set("Root", catalog_id);

    let mut bytes = Vec::new();
    document.save_to(&mut bytes).map_err(|err| FlattenError::Assemble(err.to_string()))?;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn white_page_png(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([255, 255, 255]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image.write_to(&mut bytes, image::ImageFormat::Png).expect("encode png");
        bytes.into_inner()
    }

    fn annotation(page_index: i32, kind: AnnotationKind) -> Annotation {
        let now = primitive_now_utc();
        Annotation {
            id: "ann-1".to_string(),
            copy_id: "copy-1".to_string(),
            page_index,
            x: 0.1,
            y: 0.1,
            w: 0.3,
            h: 0.2,
            kind,
            content: "Très bien".to_string(),
            score_delta: Some(2),
            created_by: "user-1".to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn flatten_produces_one_pdf_page_per_raster() {
        let pages = vec![white_page_png(200, 300), white_page_png(200, 300)];
        let annotations = vec![
            annotation(0, AnnotationKind::Bonus),
            annotation(1, AnnotationKind::Surlignage),
        ];

        let pdf = flatten_pages(&pages, &annotations).expect("flatten");
        let document = lopdf::Document::load_mem(&pdf).expect("parse output");
        assert_eq!(document.get_pages().len(), 2);
    }

    #[test]
    fn flatten_rejects_empty_input() {
        assert!(matches!(flatten_pages(&[], &[]), Err(FlattenError::NoPages)));
    }

    #[test]
    fn flatten_rejects_undecodable_page() {
        let pages = vec![b"not a png".to_vec()];
        assert!(matches!(
            flatten_pages(&pages, &[]),
            Err(FlattenError::Decode { page: 0, .. })
        ));
    }

    #[test]
    fn highlight_tints_pixels_inside_rect() {
        let mut image = RgbImage::from_pixel(100, 100, Rgb([255, 255, 255]));
        let before = *image.get_pixel(20, 20);
        draw_annotation(&mut image, &annotation(0, AnnotationKind::Surlignage));
        let after = *image.get_pixel(20, 20);
        assert_ne!(before, after);
        // Outside the rectangle nothing changes.
        assert_eq!(*image.get_pixel(90, 90), Rgb([255, 255, 255]));
    }

    #[test]
    fn wrap_breaks_on_word_boundaries() {
        let lines = wrap_text("note de bas de page", 7);
        assert_eq!(lines, vec!["note de", "bas de", "page"]);
    }

    #[test]
    fn wrap_hard_breaks_oversized_words() {
        let lines = wrap_text("extraordinaire", 5);
        assert_eq!(lines[0].chars().count(), 5);
        assert!(lines.concat().starts_with("extra"));
    }
}
