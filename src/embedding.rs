use std::{fmt, str::FromStr};

use unicode_segmentation::UnicodeSegmentation;

use crate::{
    doc_id::Modality,
    error::{Error, Result},
    extract::{ExtractedContent, ImageData},
};

/// Default output dimension of [`HashingEmbedder`].
pub const DEFAULT_HASH_DIMENSION: usize = 512;

/// Maps text and images into one shared vector space.
///
/// Implementations return one vector per input, in input order. Vectors do
/// not need to be normalized; [`embed_content`] and [`embed_query`] take
/// care of that.
pub trait Embedder: Send + Sync {
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    fn embed_images(&self, images: &[ImageData]) -> Result<Vec<Vec<f32>>>;
}

/// A search query in either modality.
#[derive(Debug, Clone)]
pub enum Query {
    Text(String),
    Image(ImageData),
}

impl Query {
    pub fn modality(&self) -> Modality {
        match self {
            Query::Text(_) => Modality::Text,
            Query::Image(_) => Modality::Image,
        }
    }
}

/// Which embedder to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EmbedderKind {
    /// Deterministic feature hashing; needs no model download.
    #[default]
    Hash,
    /// CLIP ViT-B/32 text and vision encoders.
    Clip,
}

impl FromStr for EmbedderKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "hash" => Ok(Self::Hash),
            "clip" => Ok(Self::Clip),
            other => Err(Error::Config(format!(
                "unknown embedder '{other}' (expected 'hash' or 'clip')"
            ))),
        }
    }
}

impl fmt::Display for EmbedderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Hash => "hash",
            Self::Clip => "clip",
        })
    }
}

/// Build the configured embedder.
pub fn build_embedder(
    kind: EmbedderKind,
    dimension: usize,
) -> Result<Box<dyn Embedder>> {
    match kind {
        EmbedderKind::Hash => Ok(Box::new(HashingEmbedder::new(dimension)?)),
        #[cfg(feature = "clip")]
        EmbedderKind::Clip => {
            Ok(Box::new(crate::model_manager::ClipEmbedder::new()))
        }
        #[cfg(not(feature = "clip"))]
        EmbedderKind::Clip => Err(Error::Config(
            "the clip embedder requires building with --features clip".into(),
        )),
    }
}

/// Scale `vector` to unit length in place.
pub fn normalize(vector: &mut [f32]) -> Result<()> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if !norm.is_finite() || norm == 0.0 {
        return Err(Error::Embedding(
            "embedding has zero or non-finite norm".into(),
        ));
    }
    for x in vector.iter_mut() {
        *x /= norm;
    }
    Ok(())
}

fn check_batch(
    embedder: &dyn Embedder,
    vectors: &mut [Vec<f32>],
    expected: usize,
) -> Result<()> {
    if vectors.len() != expected {
        return Err(Error::Embedding(format!(
            "{} returned {} vectors for {expected} inputs",
            embedder.name(),
            vectors.len()
        )));
    }
    for vector in vectors.iter_mut() {
        if vector.len() != embedder.dimension() {
            return Err(Error::DimensionMismatch {
                expected: embedder.dimension(),
                actual: vector.len(),
            });
        }
        normalize(vector)?;
    }
    Ok(())
}

/// Embedded form of one document: normalized text and image vectors.
#[derive(Debug, Default)]
pub struct EmbeddedContent {
    pub text: Vec<Vec<f32>>,
    pub images: Vec<Vec<f32>>,
}

/// Embed every segment and image of a document.
pub fn embed_content(
    embedder: &dyn Embedder,
    content: &ExtractedContent,
) -> Result<EmbeddedContent> {
    let mut text = if content.segments.is_empty() {
        Vec::new()
    } else {
        embedder.embed_texts(&content.segments)?
    };
    check_batch(embedder, &mut text, content.segments.len())?;

    let mut images = if content.images.is_empty() {
        Vec::new()
    } else {
        embedder.embed_images(&content.images)?
    };
    check_batch(embedder, &mut images, content.images.len())?;

    Ok(EmbeddedContent { text, images })
}

/// Embed a query into a normalized vector.
pub fn embed_query(embedder: &dyn Embedder, query: &Query) -> Result<Vec<f32>> {
    let mut vectors = match query {
        Query::Text(text) => {
            if text.trim().is_empty() {
                return Err(Error::Config("query text is empty".into()));
            }
            embedder.embed_texts(std::slice::from_ref(text))?
        }
        Query::Image(image) => {
            embedder.embed_images(std::slice::from_ref(image))?
        }
    };
    check_batch(embedder, &mut vectors, 1)?;
    vectors
        .pop()
        .ok_or_else(|| Error::Embedding("no query vector returned".into()))
}

/// Feature-hashing embedder backed by blake3.
///
/// Text is tokenized into lowercase Unicode words, each hashed to a signed
/// bucket, so texts sharing words score higher. Images are hashed as a
/// whole: identical bytes give identical vectors and nothing else is
/// implied. Useful offline and in tests.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dimension: usize,
}

impl HashingEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(Error::Config(
                "embedding dimension must be positive".into(),
            ));
        }
        Ok(Self { dimension })
    }

    fn add_feature(&self, vector: &mut [f32], feature: &str) {
        let hash = blake3::hash(feature.as_bytes());
        let bytes = hash.as_bytes();
        let mut head = [0u8; 8];
        head.copy_from_slice(&bytes[..8]);
        let bucket = (u64::from_le_bytes(head) % self.dimension as u64) as usize;
        let sign = if bytes[8] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }

    fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vector = vec![0.0; self.dimension];
        let mut any = false;
        for word in text.unicode_words() {
            self.add_feature(&mut vector, &word.to_lowercase());
            any = true;
        }
        if !any {
            self.add_feature(&mut vector, text.trim());
        }
        vector
    }

    fn embed_image(&self, image: &ImageData) -> Vec<f32> {
        let mut reader = blake3::Hasher::new()
            .update(b"image:")
            .update(&image.bytes)
            .finalize_xof();
        let mut raw = vec![0u8; self.dimension * 4];
        reader.fill(&mut raw);
        raw.chunks_exact(4)
            .map(|c| {
                let v = u32::from_le_bytes([c[0], c[1], c[2], c[3]]);
                (v as f64 / u32::MAX as f64 * 2.0 - 1.0) as f32
            })
            .collect()
    }
}

impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hash"
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| self.embed_text(t)).collect())
    }

    fn embed_images(&self, images: &[ImageData]) -> Result<Vec<Vec<f32>>> {
        Ok(images.iter().map(|i| self.embed_image(i)).collect())
    }
}
