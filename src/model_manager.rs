use std::sync::Mutex;

use fastembed::{
    EmbeddingModel,
    ImageEmbedding,
    ImageEmbeddingModel,
    ImageInitOptions,
    InitOptions,
    TextEmbedding,
};

use crate::{
    embedding::Embedder,
    error::{Error, Result},
    extract::ImageData,
};

/// Output dimension of CLIP ViT-B/32.
pub const CLIP_DIMENSION: usize = 512;

/// CLIP text and vision encoders, loaded on first use.
///
/// Both halves project into the same 512-dimensional space, so a text query
/// can be scored directly against image embeddings and vice versa. Models
/// are downloaded from the Hugging Face Hub into fastembed's cache the first
/// time they are needed.
#[derive(Default)]
pub struct ClipEmbedder {
    text: Mutex<Option<TextEmbedding>>,
    vision: Mutex<Option<ImageEmbedding>>,
}

impl ClipEmbedder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the text encoder has already been loaded.
    pub fn is_text_loaded(&self) -> bool {
        self.text.lock().is_ok_and(|guard| guard.is_some())
    }
}

fn poisoned() -> Error {
    Error::Embedding("model lock poisoned".into())
}

impl Embedder for ClipEmbedder {
    fn name(&self) -> &str {
        "clip"
    }

    fn dimension(&self) -> usize {
        CLIP_DIMENSION
    }

    fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut guard = self.text.lock().map_err(|_| poisoned())?;
        if guard.is_none() {
            tracing::info!("loading CLIP text encoder");
            let model = TextEmbedding::try_new(InitOptions::new(
                EmbeddingModel::ClipVitB32,
            ))
            .map_err(|e| Error::Embedding(e.to_string()))?;
            *guard = Some(model);
        }
        let model = guard.as_mut().ok_or_else(poisoned)?;
        model
            .embed(texts.to_vec(), None)
            .map_err(|e| Error::Embedding(e.to_string()))
    }

    fn embed_images(&self, images: &[ImageData]) -> Result<Vec<Vec<f32>>> {
        let mut guard = self.vision.lock().map_err(|_| poisoned())?;
        if guard.is_none() {
            tracing::info!("loading CLIP vision encoder");
            let model = ImageEmbedding::try_new(ImageInitOptions::new(
                ImageEmbeddingModel::ClipVitB32,
            ))
            .map_err(|e| Error::Embedding(e.to_string()))?;
            *guard = Some(model);
        }
        let model = guard.as_mut().ok_or_else(poisoned)?;
        let bytes: Vec<&[u8]> =
            images.iter().map(|i| i.bytes.as_slice()).collect();
        model
            .embed_bytes(&bytes, None)
            .map_err(|e| Error::Embedding(e.to_string()))
    }
}
