//! Audio capabilities: a TorchScript speech-to-text pipeline and a
//! translate-TTS speech synthesizer reached over HTTP.

use super::{decode_tokens, load_json_strings, CapabilityError, SpeechSynthesizer, Transcriber};
use std::path::Path;
use tch::{no_grad, CModule, Device, IValue, Tensor};

/// Speech-to-text over a scripted pipeline that takes the raw uploaded
/// container bytes (as a `u8` tensor) plus a language code and handles
/// audio decoding internally, emitting transcript token ids.
pub struct TorchTranscriber {
    module: CModule,
    vocab: Vec<String>,
    device: Device,
}

impl TorchTranscriber {
    pub fn load(model: &Path, vocab: &Path, device: Device) -> Result<Self, CapabilityError> {
        Ok(Self {
            module: CModule::load_on_device(model, device)?,
            vocab: load_json_strings(vocab)?,
            device,
        })
    }
}

impl Transcriber for TorchTranscriber {
    fn transcribe(&self, audio: &[u8], language: &str) -> Result<String, CapabilityError> {
        let bytes = Tensor::from_slice(audio).to_device(self.device);
        let output = no_grad(|| {
            self.module
                .forward_is(&[IValue::Tensor(bytes), IValue::String(language.to_owned())])
        })?;
        let ids = match output {
            IValue::Tensor(t) => t,
            other => {
                return Err(CapabilityError::OutputShape(format!(
                    "expected transcript token ids, got {:?}",
                    other
                )))
            }
        };
        decode_tokens(&ids, &self.vocab)
    }
}

/// Speech synthesis via a translate-TTS HTTP endpoint. One GET per request;
/// the response body is the finished MPEG audio.
pub struct TranslateTts {
    client: reqwest::Client,
    endpoint: String,
}

impl TranslateTts {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait::async_trait]
impl SpeechSynthesizer for TranslateTts {
    async fn synthesize(
        &self,
        text: &str,
        language: &str,
        slow: bool,
    ) -> Result<Vec<u8>, CapabilityError> {
        let speed = if slow { "0.3" } else { "1" };
        let response = self
            .client
            .get(&self.endpoint)
            .query(&[
                ("ie", "UTF-8"),
                ("client", "tw-ob"),
                ("tl", language),
                ("ttsspeed", speed),
                ("total", "1"),
                ("idx", "0"),
                ("q", text),
            ])
            .send()
            .await?
            .error_for_status()?;
        let audio = response.bytes().await?.to_vec();
        if audio.is_empty() {
            return Err(CapabilityError::EmptyAudio);
        }
        Ok(audio)
    }
}
