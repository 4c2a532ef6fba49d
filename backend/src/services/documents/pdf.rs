//! PDF rendering with printpdf.
//!
//! Every image becomes one page of exactly its intrinsic size: pixels divided
//! by the resolution stored in the PNG `pHYs` chunk when that resolution is
//! high, by [`FALLBACK_DPI`] otherwise. The image covers the whole page.

use chrono::{DateTime, Utc};
use common::model::document::{DocumentMetadata, ImageRecord};
use image::{DynamicImage, GenericImageView};
use printpdf::{
    ColorBits, ColorSpace, Image as PdfImage, ImageXObject, Mm, PdfDocument, PdfLayerReference, Px,
};
use std::fs::{self, File};
use std::io::{BufWriter, Cursor};

use super::{BuildError, DocumentBuilder, RenderRequest, SourceImage};
use crate::logging::ActivityLog;

pub const FALLBACK_DPI: f64 = 96.0;
/// Embedded resolutions at or below this are ignored in favour of the fallback.
const HIGH_RES_DPI: f64 = 150.0;
const MM_PER_INCH: f64 = 25.4;
const INCH_PER_METER: f64 = 0.0254;
const LAYER_NAME: &str = "Image";

pub struct PdfRenderer {
    log: ActivityLog,
}

/// An image decoded and flattened for embedding.
struct PreparedPage {
    record: ImageRecord,
    dpi: f64,
    width_mm: f64,
    height_mm: f64,
    /// 8-bit RGB samples, row by row.
    pixels: Vec<u8>,
}

impl PreparedPage {
    /// Draws the image over the whole of `layer`'s page, anchored bottom-left.
    fn place_on(self, layer: PdfLayerReference) -> ImageRecord {
        let PreparedPage {
            record, dpi, pixels, ..
        } = self;
        let image = PdfImage::from(ImageXObject {
            width: Px(record.width as usize),
            height: Px(record.height as usize),
            color_space: ColorSpace::Rgb,
            bits_per_component: ColorBits::Bit8,
            interpolate: true,
            image_data: pixels,
            image_filter: None,
            clipping_bbox: None,
        });
        image.add_to_layer(layer, Some(Mm(0.0)), Some(Mm(0.0)), None, None, None, Some(dpi));
        record
    }
}

impl PdfRenderer {
    pub fn new(log: ActivityLog) -> Self {
        Self { log }
    }
}

impl DocumentBuilder for PdfRenderer {
    fn render(&self, request: &RenderRequest<'_>) -> Result<DocumentMetadata, BuildError> {
        if request.images.is_empty() {
            return Err(BuildError::NoImages);
        }

        let mut pages = Vec::with_capacity(request.images.len());
        for image in request.images {
            let page = prepare_page(image)?;
            self.log.file_op(format!(
                "Added to document: {} ({}, {:.0} dpi, {:.1}x{:.1} mm)",
                page.record.filename,
                page.record.dimensions(),
                page.dpi,
                page.width_mm,
                page.height_mm
            ));
            pages.push(page);
        }

        let page_count = pages.len();
        let mut pages = pages.into_iter();
        let first = pages.next().ok_or(BuildError::NoImages)?;
        let (doc, page_index, layer_index) = PdfDocument::new(
            request.document_name,
            Mm(first.width_mm),
            Mm(first.height_mm),
            LAYER_NAME,
        );
        let mut records = Vec::with_capacity(page_count);
        records.push(first.place_on(doc.get_page(page_index).get_layer(layer_index)));
        for page in pages {
            let (page_index, layer_index) =
                doc.add_page(Mm(page.width_mm), Mm(page.height_mm), LAYER_NAME);
            records.push(page.place_on(doc.get_page(page_index).get_layer(layer_index)));
        }

        let out = File::create(request.destination).map_err(|source| BuildError::Io {
            path: request.destination.to_path_buf(),
            source,
        })?;
        doc.save(&mut BufWriter::new(out))?;

        let size = fs::metadata(request.destination).map(|m| m.len()).unwrap_or(0);
        self.log.file_op(format!(
            "Document created: {} (Size: {:.2} MB, Pages: {page_count})",
            request.destination.display(),
            size as f64 / 1024.0 / 1024.0,
        ));

        Ok(DocumentMetadata {
            document_name: request.document_name.to_string(),
            source_folder: request.source_folder.to_string(),
            created_at: Utc::now(),
            images: records,
        })
    }
}

fn prepare_page(image: &SourceImage) -> Result<PreparedPage, BuildError> {
    let io_err = |source| BuildError::Io {
        path: image.path.clone(),
        source,
    };
    let bytes = fs::read(&image.path).map_err(io_err)?;
    let file_meta = fs::metadata(&image.path).map_err(io_err)?;
    let created_at: DateTime<Utc> = file_meta
        .created()
        .or_else(|_| file_meta.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    let decoded = image::load_from_memory(&bytes).map_err(|source| BuildError::Decode {
        path: image.path.clone(),
        source,
    })?;
    let (width, height) = decoded.dimensions();
    let dpi = effective_dpi(embedded_dpi(&bytes));
    let (width_mm, height_mm) = page_size_mm(width, height, dpi);

    Ok(PreparedPage {
        record: ImageRecord {
            filename: image.file_name(),
            created_at,
            width,
            height,
            size_bytes: file_meta.len(),
            origin: image.origin,
        },
        dpi,
        width_mm,
        height_mm,
        pixels: flatten_to_rgb(&decoded),
    })
}

/// Transparency is flattened onto white; the page carries plain RGB samples.
fn flatten_to_rgb(img: &DynamicImage) -> Vec<u8> {
    let rgba = img.to_rgba8();
    let (w, h) = rgba.dimensions();
    let mut background = image::RgbaImage::from_pixel(w, h, image::Rgba([255, 255, 255, 255]));
    image::imageops::overlay(&mut background, &rgba, 0, 0);
    DynamicImage::ImageRgba8(background).to_rgb8().into_raw()
}

/// Resolution recorded in a PNG's `pHYs` chunk, in dots per inch. `None` for
/// non-PNG data or when the chunk is absent or unit-less.
pub fn embedded_dpi(bytes: &[u8]) -> Option<f64> {
    let reader = png::Decoder::new(Cursor::new(bytes)).read_info().ok()?;
    let dims = reader.info().pixel_dims?;
    if !matches!(dims.unit, png::Unit::Meter) {
        return None;
    }
    Some(f64::from(dims.xppu.max(dims.yppu)) * INCH_PER_METER)
}

pub fn effective_dpi(embedded: Option<f64>) -> f64 {
    match embedded {
        Some(dpi) if dpi > HIGH_RES_DPI => dpi,
        _ => FALLBACK_DPI,
    }
}

pub fn page_size_mm(width_px: u32, height_px: u32, dpi: f64) -> (f64, f64) {
    (
        f64::from(width_px) / dpi * MM_PER_INCH,
        f64::from(height_px) / dpi * MM_PER_INCH,
    )
}
