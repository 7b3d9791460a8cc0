//! Embedded-image extraction via lopdf.
//!
//! pdfium rasterises pages but does not expose the identity of the image
//! objects behind them, so extraction walks the PDF object graph directly:
//! page dictionary → `Resources` → `XObject` entries with
//! `Subtype /Image`. Each image is written once per page under a name
//! derived from its cross-reference object number,
//! `image_xref<id>.<ext>`, so a logo repeated on the page yields one file
//! and one expected path. Files are never deleted; a later page reusing
//! the same object simply rewrites identical bytes.
//!
//! JPEG (`DCTDecode`) and JPEG 2000 (`JPXDecode`) payloads are written
//! verbatim. Anything else is decompressed and re-encoded as PNG when the
//! sample layout is one we can interpret (8 bits per component, DeviceRGB
//! or DeviceGray); otherwise the image is skipped with a warning rather
//! than failing the page.

use crate::error::Pdf2MdError;
use lopdf::{Dictionary, Document, Object, ObjectId, Stream};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

/// Open a PDF with lopdf, for page counting and image extraction.
pub fn load_document(path: &Path) -> Result<Document, Pdf2MdError> {
    Document::load(path).map_err(|e| Pdf2MdError::CorruptPdf {
        path: path.to_path_buf(),
        detail: e.to_string(),
    })
}

/// Number of pages in the document.
pub fn page_count(doc: &Document) -> usize {
    doc.get_pages().len()
}

/// Extract the embedded images of one page (1-based number) into
/// `output_folder`, returning the written paths in XObject order.
pub async fn extract_page_images(
    doc: Arc<Document>,
    page_number: u32,
    output_folder: &Path,
) -> Result<Vec<String>, Pdf2MdError> {
    let folder = output_folder.to_path_buf();
    tokio::task::spawn_blocking(move || extract_page_images_blocking(&doc, page_number, &folder))
        .await
        .map_err(|e| Pdf2MdError::Internal(format!("extraction task panicked: {e}")))?
}

/// Blocking implementation of [`extract_page_images`].
pub fn extract_page_images_blocking(
    doc: &Document,
    page_number: u32,
    output_folder: &Path,
) -> Result<Vec<String>, Pdf2MdError> {
    let pages = doc.get_pages();
    let &page_id = pages
        .get(&page_number)
        .ok_or_else(|| Pdf2MdError::ImageExtractionFailed {
            page: page_number as usize,
            detail: format!("page {page_number} not found in document"),
        })?;

    let mut extracted = Vec::new();
    let mut seen: HashSet<ObjectId> = HashSet::new();

    let Some(xobjects) = page_xobjects(doc, page_id) else {
        return Ok(extracted);
    };

    for (_name, entry) in xobjects.iter() {
        let Ok(id) = entry.as_reference() else {
            continue;
        };
        // The same object referenced under several names is one image.
        if !seen.insert(id) {
            continue;
        }
        let Some(stream) = doc.get_object(id).ok().and_then(|o| o.as_stream().ok()) else {
            continue;
        };
        if !is_image(stream) {
            continue;
        }

        match write_image(doc, id, stream, output_folder) {
            Ok(Some(path)) => {
                debug!(page = page_number, path = %path.display(), "extracted image");
                extracted.push(path.display().to_string());
            }
            Ok(None) => {}
            Err(e) => {
                warn!(page = page_number, xref = id.0, error = %e, "skipping embedded image");
            }
        }
    }

    Ok(extracted)
}

/// The page's XObject dictionary, following `Resources` inheritance up the
/// page tree.
fn page_xobjects<'a>(doc: &'a Document, page_id: ObjectId) -> Option<&'a Dictionary> {
    let mut dict = doc.get_dictionary(page_id).ok()?;
    let resources = loop {
        if let Ok(res) = dict.get(b"Resources") {
            break resolve(doc, res).as_dict().ok()?;
        }
        let parent = dict.get(b"Parent").ok()?.as_reference().ok()?;
        dict = doc.get_dictionary(parent).ok()?;
    };
    resolve(doc, resources.get(b"XObject").ok()?).as_dict().ok()
}

/// Follow a reference one hop; non-references pass through.
fn resolve<'a>(doc: &'a Document, object: &'a Object) -> &'a Object {
    match object.as_reference() {
        Ok(id) => doc.get_object(id).unwrap_or(object),
        Err(_) => object,
    }
}

fn is_image(stream: &Stream) -> bool {
    stream
        .dict
        .get(b"Subtype")
        .ok()
        .and_then(|o| o.as_name().ok())
        == Some(b"Image".as_slice())
}

/// Write one image stream to disk; Ok(None) means the sample layout is not
/// one we can interpret.
fn write_image(
    doc: &Document,
    id: ObjectId,
    stream: &Stream,
    output_folder: &Path,
) -> Result<Option<PathBuf>, String> {
    let filters = filter_names(doc, stream);

    if filters.iter().any(|f| f == b"DCTDecode") {
        return write_raw(id, &stream.content, "jpg", output_folder).map(Some);
    }
    if filters.iter().any(|f| f == b"JPXDecode") {
        return write_raw(id, &stream.content, "jp2", output_folder).map(Some);
    }

    // Raw (possibly flate-compressed) samples: rebuild a PNG when the
    // layout is 8-bit DeviceRGB or DeviceGray.
    let width = dict_i64(stream, b"Width").ok_or("image has no Width")?;
    let height = dict_i64(stream, b"Height").ok_or("image has no Height")?;
    let bpc = dict_i64(stream, b"BitsPerComponent").unwrap_or(8);
    if bpc != 8 {
        return Ok(None);
    }
    let Some(channels) = colour_channels(doc, stream) else {
        return Ok(None);
    };

    let data = stream
        .decompressed_content()
        .unwrap_or_else(|_| stream.content.clone());
    let expected = (width * height * channels) as usize;
    if data.len() < expected {
        return Err(format!(
            "sample data too short: {} < {expected}",
            data.len()
        ));
    }

    let path = output_folder.join(format!("image_xref{}.png", id.0));
    let (w, h) = (width as u32, height as u32);
    let saved = match channels {
        3 => image::RgbImage::from_raw(w, h, data[..expected].to_vec())
            .ok_or("RGB buffer construction failed")?
            .save(&path),
        _ => image::GrayImage::from_raw(w, h, data[..expected].to_vec())
            .ok_or("grayscale buffer construction failed")?
            .save(&path),
    };
    saved.map_err(|e| format!("PNG encode failed: {e}"))?;
    Ok(Some(path))
}

fn write_raw(
    id: ObjectId,
    content: &[u8],
    ext: &str,
    output_folder: &Path,
) -> Result<PathBuf, String> {
    let path = output_folder.join(format!("image_xref{}.{ext}", id.0));
    std::fs::write(&path, content).map_err(|e| format!("write failed: {e}"))?;
    Ok(path)
}

fn dict_i64(stream: &Stream, key: &[u8]) -> Option<i64> {
    stream.dict.get(key).ok().and_then(|o| o.as_i64().ok())
}

fn filter_names(doc: &Document, stream: &Stream) -> Vec<Vec<u8>> {
    match stream.dict.get(b"Filter") {
        Ok(filter) => match resolve(doc, filter) {
            Object::Name(name) => vec![name.clone()],
            Object::Array(names) => names
                .iter()
                .filter_map(|o| o.as_name().ok().map(<[u8]>::to_vec))
                .collect(),
            _ => Vec::new(),
        },
        Err(_) => Vec::new(),
    }
}

fn colour_channels(doc: &Document, stream: &Stream) -> Option<i64> {
    let cs = resolve(doc, stream.dict.get(b"ColorSpace").ok()?);
    match cs.as_name().ok()? {
        b"DeviceRGB" => Some(3),
        b"DeviceGray" => Some(1),
        _ => None,
    }
}
