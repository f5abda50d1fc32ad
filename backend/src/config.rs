//! Process configuration, read from the environment once at startup.

use std::env;
use std::path::PathBuf;

const DEFAULT_TTS_ENDPOINT: &str = "https://translate.google.com/translate_tts";

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub bind_address: String,
    /// Directory for transient synthesized-speech files, created on demand.
    pub audio_dir: PathBuf,
    pub caption_model: PathBuf,
    pub caption_vocab: PathBuf,
    pub detection_model: PathBuf,
    pub detection_labels: PathBuf,
    pub vqa_model: PathBuf,
    pub vqa_vocab: PathBuf,
    pub asr_model: PathBuf,
    pub asr_vocab: PathBuf,
    pub tts_endpoint: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let port = env::var("PORT").unwrap_or_else(|_| "8081".to_string());
        let models_dir =
            PathBuf::from(env::var("MODELS_DIR").unwrap_or_else(|_| "models".to_string()));
        Self {
            bind_address: format!("0.0.0.0:{}", port),
            audio_dir: env::var("AUDIO_DIR")
                .unwrap_or_else(|_| "audio".to_string())
                .into(),
            caption_model: models_dir.join("caption.pt"),
            caption_vocab: models_dir.join("caption_vocab.json"),
            detection_model: models_dir.join("detection.pt"),
            detection_labels: models_dir.join("detection_labels.json"),
            vqa_model: models_dir.join("vqa.pt"),
            vqa_vocab: models_dir.join("vqa_vocab.json"),
            asr_model: models_dir.join("asr.pt"),
            asr_vocab: models_dir.join("asr_vocab.json"),
            tts_endpoint: env::var("TTS_ENDPOINT")
                .unwrap_or_else(|_| DEFAULT_TTS_ENDPOINT.to_string()),
        }
    }
}
