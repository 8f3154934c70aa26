use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;
use tokio::process::Command;
use uuid::Uuid;

use crate::core::config::Settings;

#[derive(Debug, Error)]
pub(crate) enum RasterError {
    #[error("PDF has no pages")]
    EmptyPdf,
    #[error("not a valid PDF: {0}")]
    InvalidPdf(String),
    #[error("page {page} failed to render: {detail}")]
    Rasterization { page: usize, detail: String },
    #[error("page {page} exceeded the render budget")]
    PageTimeout { page: usize },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Parse the upload and count its pages without rendering anything.
pub(crate) fn page_count(pdf_bytes: &[u8]) -> Result<usize, RasterError> {
    let document =
        lopdf::Document::load_mem(pdf_bytes).map_err(|err| RasterError::InvalidPdf(err.to_string()))?;
    let pages = document.get_pages().len();
    if pages == 0 {
        return Err(RasterError::EmptyPdf);
    }
    Ok(pages)
}

/// Render every page of the PDF to a PNG at the configured DPI. Pages render
/// one at a time so a cancellation or timeout lands on a page boundary.
pub(crate) async fn rasterize(
    settings: &Settings,
    pdf_bytes: &[u8],
) -> Result<Vec<Vec<u8>>, RasterError> {
    let pages = page_count(pdf_bytes)?;

    let workdir = std::env::temp_dir().join(format!("korrigo-raster-{}", Uuid::new_v4()));
    tokio::fs::create_dir_all(&workdir).await?;

    let result = rasterize_in(settings, pdf_bytes, pages, &workdir).await;
    if let Err(err) = tokio::fs::remove_dir_all(&workdir).await {
        tracing::warn!(error = %err, "failed to clean up raster workdir");
    }
    result
}

async fn rasterize_in(
    settings: &Settings,
    pdf_bytes: &[u8],
    pages: usize,
    workdir: &Path,
) -> Result<Vec<Vec<u8>>, RasterError> {
    let pdf_path = workdir.join("source.pdf");
    tokio::fs::write(&pdf_path, pdf_bytes).await?;

    let budget = Duration::from_secs(settings.raster().page_budget_seconds);
    let mut images = Vec::with_capacity(pages);

    for page in 1..=pages {
        let png = tokio::time::timeout(budget, render_page(settings, &pdf_path, workdir, page))
            .await
            .map_err(|_| RasterError::PageTimeout { page })??;
        images.push(png);
    }

    Ok(images)
}

async fn render_page(
    settings: &Settings,
    pdf_path: &Path,
    workdir: &Path,
    page: usize,
) -> Result<Vec<u8>, RasterError> {
    let prefix = workdir.join(format!("page-{page}"));

    let output = Command::new(&settings.raster().pdftoppm_path)
        .arg("-png")
        .arg("-r")
        .arg(settings.raster().dpi.to_string())
        .arg("-f")
        .arg(page.to_string())
        .arg("-l")
        .arg(page.to_string())
        .arg(pdf_path)
        .arg(&prefix)
        .output()
        .await?;

    if !output.status.success() {
        return Err(RasterError::Rasterization {
            page,
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let path = find_rendered_png(workdir, &format!("page-{page}-")).await?.ok_or_else(|| {
        RasterError::Rasterization { page, detail: "renderer produced no output".to_string() }
    })?;

    let bytes = tokio::fs::read(&path).await?;
    tokio::fs::remove_file(&path).await?;
    Ok(bytes)
}

// pdftoppm pads the page number in its output name by the document's total
// page count, so the exact filename is not predictable up front.
async fn find_rendered_png(
    workdir: &Path,
    prefix: &str,
) -> Result<Option<PathBuf>, std::io::Error> {
    let mut entries = tokio::fs::read_dir(workdir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with(prefix) && name.ends_with(".png") {
            return Ok(Some(entry.path()));
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use lopdf::dictionary;

    use super::*;

    // Minimal single-page PDF, enough for lopdf to parse.
    pub(crate) fn one_page_pdf() -> Vec<u8> {
        let mut document = lopdf::Document::with_version("1.5");
        let pages_id = document.new_object_id();
        let content_id = document.add_object(lopdf::Stream::new(
            lopdf::dictionary! {},
            b"BT ET".to_vec(),
        ));
        let page_id = document.add_object(lopdf::dictionary! {
            "Type" => "Page",
            "Parent" => pages_id,
            "Contents" => content_id,
            "MediaBox" => vec![0.into(), 0.into(), 612.into(), 792.into()],
        });
        let pages = lopdf::dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        };
        document.objects.insert(pages_id, lopdf::Object::Dictionary(pages));
        let catalog_id = document.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        document.save_to(&mut bytes).expect("save pdf");
        bytes
    }

    #[test]
    fn page_count_accepts_valid_pdf() {
        assert_eq!(page_count(&one_page_pdf()).unwrap(), 1);
    }

    #[test]
    fn page_count_rejects_garbage() {
        let err = page_count(b"not a pdf at all").unwrap_err();
        assert!(matches!(err, RasterError::InvalidPdf(_)));
    }

    #[test]
    fn page_count_rejects_empty_document() {
        let mut document = lopdf::Document::with_version("1.5");
        let pages_id = document.add_object(lopdf::dictionary! {
            "Type" => "Pages",
            "Kids" => Vec::<lopdf::Object>::new(),
            "Count" => 0,
        });
        let catalog_id = document.add_object(lopdf::dictionary! {
            "Type" => "Catalog",
            "Pages" => pages_id,
        });
        document.trailer.set("Root", catalog_id);

        let mut bytes = Vec::new();
        document.save_to(&mut bytes).expect("save pdf");

        let err = page_count(&bytes).unwrap_err();
        assert!(matches!(err, RasterError::EmptyPdf));
    }
}
