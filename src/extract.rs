//! Turning files on disk into text segments and image payloads.
//!
//! Extraction is format-specific; everything downstream only sees
//! [`ExtractedContent`]. Parse failures, including panics inside the PDF
//! parsers, are reported per file as [`Error::Extraction`].

use std::{
    io::{Cursor, Read},
    panic::{AssertUnwindSafe, catch_unwind},
    path::{Path, PathBuf},
};

use flate2::read::ZlibDecoder;
use lopdf::xobject::PdfImage;
use quick_xml::events::Event;
use tracing::debug;

use crate::{
    error::{Error, Result},
    segment::{DEFAULT_MAX_SEGMENT_CHARS, segment_text},
};

/// Maximum decompressed bytes read from one ZIP entry.
const MAX_ZIP_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

const DOCX_BODY: &str = "word/document.xml";
const DOCX_MEDIA_PREFIX: &str = "word/media/";

/// Raw bytes of an embedded or standalone image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    pub bytes: Vec<u8>,
    /// Where the image came from: a file path, or `file#entry` for images
    /// embedded in a container.
    pub source: String,
}

impl ImageData {
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound {
                    kind: "image",
                    name: path.display().to_string(),
                }
            } else {
                Error::Io(e)
            }
        })?;
        Ok(Self {
            bytes,
            source: path.display().to_string(),
        })
    }
}

/// Everything embeddable that was pulled out of one document.
#[derive(Debug, Clone, Default)]
pub struct ExtractedContent {
    pub segments: Vec<String>,
    pub images: Vec<ImageData>,
}

impl ExtractedContent {
    pub fn is_empty(&self) -> bool {
        self.segments.is_empty() && self.images.is_empty()
    }
}

pub trait ContentExtractor: Send + Sync {
    /// Whether files with this lowercase extension can be extracted.
    fn supports(&self, extension: &str) -> bool;

    fn extract(&self, path: &Path) -> Result<ExtractedContent>;
}

/// Document formats understood by [`FileExtractor`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentKind {
    PlainText,
    Image,
    Docx,
    Pdf,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_ascii_lowercase().as_str() {
            "txt" | "md" | "markdown" => Some(Self::PlainText),
            "png" | "jpg" | "jpeg" | "gif" | "webp" | "bmp" => Some(Self::Image),
            "docx" => Some(Self::Docx),
            "pdf" => Some(Self::Pdf),
            _ => None,
        }
    }
}

/// The built-in extractor for plain text, images, DOCX and PDF.
///
/// DOCX files contribute their paragraphs and every image stored under
/// `word/media/`. PDFs contribute their text and the page images that can
/// be handed to an image embedder (JPEG streams as-is, 8-bit RGB or gray
/// Flate streams re-encoded as PNG).
#[derive(Debug, Clone)]
pub struct FileExtractor {
    max_segment_chars: usize,
}

impl Default for FileExtractor {
    fn default() -> Self {
        Self {
            max_segment_chars: DEFAULT_MAX_SEGMENT_CHARS,
        }
    }
}

impl FileExtractor {
    fn text_content(&self, text: &str) -> ExtractedContent {
        ExtractedContent {
            segments: segment_text(text, self.max_segment_chars),
            images: Vec::new(),
        }
    }
}

impl ContentExtractor for FileExtractor {
    fn supports(&self, extension: &str) -> bool {
        DocumentKind::from_extension(extension).is_some()
    }

    fn extract(&self, path: &Path) -> Result<ExtractedContent> {
        let extension = path
            .extension()
            .map(|e| e.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        let kind = DocumentKind::from_extension(&extension).ok_or_else(|| {
            Error::InvalidDocument {
                path: path.to_path_buf(),
                extension: extension.clone(),
            }
        })?;

        match kind {
            DocumentKind::PlainText => {
                let bytes = std::fs::read(path)?;
                Ok(self.text_content(&String::from_utf8_lossy(&bytes)))
            }
            DocumentKind::Image => Ok(ExtractedContent {
                segments: Vec::new(),
                images: vec![ImageData {
                    bytes: std::fs::read(path)?,
                    source: path.display().to_string(),
                }],
            }),
            DocumentKind::Docx => {
                let bytes = std::fs::read(path)?;
                let (text, images) = extract_docx(path, &bytes)?;
                let mut content = self.text_content(&text);
                content.images = images;
                Ok(content)
            }
            DocumentKind::Pdf => {
                let bytes = std::fs::read(path)?;
                let text = guard_parser(path, || {
                    pdf_extract::extract_text_from_mem(&bytes)
                        .map_err(|e| e.to_string())
                })?;
                let mut content = self.text_content(&text);
                content.images = guard_parser(path, || Ok(pdf_images(path, &bytes)))?;
                Ok(content)
            }
        }
    }
}

fn extraction_error(path: &Path, reason: impl std::fmt::Display) -> Error {
    Error::Extraction {
        path: PathBuf::from(path),
        reason: reason.to_string(),
    }
}

/// Run a third-party parser, turning both its errors and its panics into
/// an extraction error for `path`.
fn guard_parser<T>(
    path: &Path,
    parse: impl FnOnce() -> std::result::Result<T, String>,
) -> Result<T> {
    match catch_unwind(AssertUnwindSafe(parse)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(reason)) => Err(extraction_error(path, reason)),
        Err(_) => Err(extraction_error(path, "parser panicked")),
    }
}

/// Page images of a PDF, in page order.
///
/// Images in encodings an embedder cannot read are skipped; a document
/// lopdf cannot load simply has no images.
fn pdf_images(path: &Path, bytes: &[u8]) -> Vec<ImageData> {
    let doc = match lopdf::Document::load_mem(bytes) {
        Ok(doc) => doc,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "no PDF images");
            return Vec::new();
        }
    };

    let mut images = Vec::new();
    for (page, page_id) in doc.get_pages() {
        let Ok(page_images) = doc.get_page_images(page_id) else {
            continue;
        };
        for (n, image) in page_images.iter().enumerate() {
            match decode_pdf_image(image) {
                Some(bytes) => images.push(ImageData {
                    bytes,
                    source: format!("{}#page{page}/{n}", path.display()),
                }),
                None => debug!(
                    path = %path.display(),
                    page,
                    filters = ?image.filters,
                    "skipping undecodable PDF image"
                ),
            }
        }
    }
    images
}

fn decode_pdf_image(image: &PdfImage) -> Option<Vec<u8>> {
    let filters = image.filters.as_deref().unwrap_or_default();
    match filters {
        [only] if only == "DCTDecode" => Some(image.content.to_vec()),
        [only] if only == "FlateDecode" => flate_to_png(image),
        _ => None,
    }
}

fn flate_to_png(pdf_image: &PdfImage) -> Option<Vec<u8>> {
    if pdf_image.bits_per_component != Some(8) {
        return None;
    }
    let width = u32::try_from(pdf_image.width).ok()?;
    let height = u32::try_from(pdf_image.height).ok()?;
    let gray = match pdf_image.color_space.as_deref() {
        Some("DeviceRGB") => false,
        Some("DeviceGray") => true,
        _ => return None,
    };
    let channels = if gray { 1 } else { 3 };
    let expected = u64::from(width) * u64::from(height) * channels;

    let mut raw = Vec::new();
    ZlibDecoder::new(pdf_image.content)
        .take(expected)
        .read_to_end(&mut raw)
        .ok()?;

    let decoded = if gray {
        image::GrayImage::from_raw(width, height, raw)
            .map(image::DynamicImage::ImageLuma8)
    } else {
        image::RgbImage::from_raw(width, height, raw)
            .map(image::DynamicImage::ImageRgb8)
    }?;

    let mut png = Vec::new();
    decoded
        .write_to(&mut Cursor::new(&mut png), image::ImageFormat::Png)
        .ok()?;
    Some(png)
}

fn read_zip_entry(
    path: &Path,
    archive: &mut zip::ZipArchive<Cursor<&[u8]>>,
    name: &str,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| extraction_error(path, format!("{name}: {e}")))?;
    let mut out = Vec::new();
    entry
        .take(MAX_ZIP_ENTRY_BYTES)
        .read_to_end(&mut out)
        .map_err(|e| extraction_error(path, format!("{name}: {e}")))?;
    if out.len() as u64 >= MAX_ZIP_ENTRY_BYTES {
        return Err(extraction_error(
            path,
            format!("{name} exceeds {MAX_ZIP_ENTRY_BYTES} bytes"),
        ));
    }
    Ok(out)
}

fn extract_docx(path: &Path, bytes: &[u8]) -> Result<(String, Vec<ImageData>)> {
    let mut archive = zip::ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| extraction_error(path, e))?;

    let body = read_zip_entry(path, &mut archive, DOCX_BODY)?;
    let text = docx_paragraphs(&body).map_err(|e| extraction_error(path, e))?;

    let mut media: Vec<String> = archive
        .file_names()
        .filter(|n| n.starts_with(DOCX_MEDIA_PREFIX) && !n.ends_with('/'))
        .map(str::to_string)
        .collect();
    media.sort();

    let mut images = Vec::with_capacity(media.len());
    for name in media {
        let bytes = read_zip_entry(path, &mut archive, &name)?;
        images.push(ImageData {
            bytes,
            source: format!("{}#{name}", path.display()),
        });
    }

    Ok((text, images))
}

/// Collect `w:t` runs, one line per `w:p` paragraph.
fn docx_paragraphs(xml: &[u8]) -> std::result::Result<String, quick_xml::Error> {
    let mut out = String::new();
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();
    let mut in_text = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) if e.local_name().as_ref() == b"t" => in_text = true,
            Event::Text(te) if in_text => {
                out.push_str(&te.unescape()?);
            }
            Event::End(e) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => out.push('\n'),
                _ => {}
            },
            Event::Empty(e) if e.local_name().as_ref() == b"br" => out.push('\n'),
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(out)
}
