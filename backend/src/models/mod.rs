//! Capability interfaces over the pretrained models, plus the startup-time
//! device probe. Every model is loaded once in `main` and shared read-only
//! across requests; handlers only ever see the traits defined here.

pub mod audio;
pub mod vision;

use crate::config::AppConfig;
use image::RgbImage;
use log::info;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use tch::{Device, Tensor};
use thiserror::Error;

/// Language code handed to the speech capabilities. Transcription and
/// synthesis are both pinned to English; no language detection happens.
pub const ENGLISH: &str = "en";

#[derive(Debug, Error)]
pub enum CapabilityError {
    #[error("model inference failed: {0}")]
    Model(#[from] tch::TchError),
    #[error("model emitted an unexpected output shape: {0}")]
    OutputShape(String),
    #[error("could not load model artifact: {0}")]
    Artifact(String),
    #[error("speech synthesis request failed: {0}")]
    Synthesis(#[from] reqwest::Error),
    #[error("synthesis backend returned no audio")]
    EmptyAudio,
}

/// One prediction from the object-detection model.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    pub label: String,
    pub score: f32,
    /// `[x_min, y_min, x_max, y_max]` in input-image pixel coordinates.
    pub bounding_box: [f32; 4],
}

pub trait Captioner: Send + Sync {
    fn caption(&self, image: &RgbImage) -> Result<String, CapabilityError>;
}

pub trait Detector: Send + Sync {
    /// Returns every prediction scoring at or above `threshold`.
    fn detect(&self, image: &RgbImage, threshold: f32) -> Result<Vec<Detection>, CapabilityError>;
}

pub trait VisualQa: Send + Sync {
    fn answer(&self, image: &RgbImage, question: &str) -> Result<String, CapabilityError>;
}

pub trait Transcriber: Send + Sync {
    /// `audio` is the raw uploaded container bytes; the capability decodes
    /// them itself. `language` selects the transcript language.
    fn transcribe(&self, audio: &[u8], language: &str) -> Result<String, CapabilityError>;
}

#[async_trait::async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        slow: bool,
    ) -> Result<Vec<u8>, CapabilityError>;
}

/// Every model capability the service exposes, built once at startup and
/// injected into the handlers via `web::Data`. Never mutated afterwards.
#[derive(Clone)]
pub struct Capabilities {
    pub captioner: Arc<dyn Captioner>,
    pub detector: Arc<dyn Detector>,
    pub vqa: Arc<dyn VisualQa>,
    pub transcriber: Arc<dyn Transcriber>,
    pub synthesizer: Arc<dyn SpeechSynthesizer>,
}

impl fmt::Debug for Capabilities {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Capabilities").finish()
    }
}

impl Capabilities {
    pub fn load(config: &AppConfig, device: Device) -> Result<Self, CapabilityError> {
        Ok(Self {
            captioner: Arc::new(vision::TorchCaptioner::load(
                &config.caption_model,
                &config.caption_vocab,
                device,
            )?),
            detector: Arc::new(vision::TorchDetector::load(
                &config.detection_model,
                &config.detection_labels,
                device,
            )?),
            vqa: Arc::new(vision::TorchVisualQa::load(
                &config.vqa_model,
                &config.vqa_vocab,
                device,
            )?),
            transcriber: Arc::new(audio::TorchTranscriber::load(
                &config.asr_model,
                &config.asr_vocab,
                device,
            )?),
            synthesizer: Arc::new(audio::TranslateTts::new(config.tts_endpoint.clone())),
        })
    }
}

/// Resolve the compute device once at startup: CUDA if available, then
/// Apple's Metal backend, then CPU. The handle is passed into every
/// capability constructor; nothing re-probes at request time.
pub fn probe_device() -> Device {
    let device = if tch::Cuda::is_available() {
        Device::Cuda(0)
    } else if tch::utils::has_mps() {
        Device::Mps
    } else {
        Device::Cpu
    };
    info!("resolved compute device: {:?}", device);
    device
}

/// Loads a JSON array of strings (token vocab or class-label map).
pub(crate) fn load_json_strings(path: &Path) -> Result<Vec<String>, CapabilityError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| CapabilityError::Artifact(format!("{}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| CapabilityError::Artifact(format!("{}: {}", path.display(), e)))
}

/// Decodes a 1-D token-id tensor against a vocab, skipping bracketed
/// special tokens such as `[CLS]` and `[SEP]`.
pub(crate) fn decode_tokens(ids: &Tensor, vocab: &[String]) -> Result<String, CapabilityError> {
    let ids = Vec::<i64>::try_from(&ids.view([-1]))?;
    let mut words = Vec::with_capacity(ids.len());
    for id in ids {
        let token = vocab.get(id as usize).ok_or_else(|| {
            CapabilityError::OutputShape(format!(
                "token id {} out of vocab range ({} entries)",
                id,
                vocab.len()
            ))
        })?;
        if token.starts_with('[') && token.ends_with(']') {
            continue;
        }
        words.push(token.as_str());
    }
    Ok(words.join(" "))
}
