//! One handler per route, each a thin adapter: decode the upload, invoke a
//! single model capability, shape the response.

use crate::audio_file::TempAudioFile;
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::models::{Capabilities, ENGLISH};
use actix_multipart::Multipart;
use actix_web::http::header::{ContentDisposition, DispositionParam, DispositionType};
use actix_web::{web, HttpResponse};
use futures::StreamExt;
use image::RgbImage;
use log::info;
use serde::Deserialize;
use shared::{CaptionResponse, DetectionResponse, TranscriptionResponse, VqaResponse};
use std::collections::{BTreeSet, HashMap};

/// Confidence floor for /detect. The detection capability is invoked with
/// this same value; surviving predictions are filtered against it once more
/// here in case the capability's internal default ever drifts.
const DETECTION_CONFIDENCE_THRESHOLD: f32 = 0.8;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::resource("/caption").route(web::post().to(caption)))
        .service(web::resource("/detect").route(web::post().to(detect)))
        .service(web::resource("/vqa").route(web::post().to(vqa)))
        .service(web::resource("/transcribe").route(web::post().to(transcribe)))
        .service(web::resource("/speak").route(web::post().to(speak)));
}

/// Collected parts of a multipart upload: the `file` binary part plus any
/// text parts, keyed by field name.
struct UploadForm {
    file: Option<Vec<u8>>,
    text_fields: HashMap<String, String>,
}

async fn read_multipart(mut payload: Multipart) -> Result<UploadForm, ApiError> {
    let mut form = UploadForm {
        file: None,
        text_fields: HashMap::new(),
    };
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| ApiError::Multipart(e.to_string()))?;
        let name = field.name().map(str::to_owned);

        let mut data = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| ApiError::Multipart(e.to_string()))?;
            data.extend_from_slice(&chunk);
        }

        match name.as_deref() {
            Some("file") => form.file = Some(data),
            Some(other) => {
                let value = String::from_utf8_lossy(&data).into_owned();
                form.text_fields.insert(other.to_owned(), value);
            }
            None => {}
        }
    }
    Ok(form)
}

fn decode_image(form: &UploadForm) -> Result<RgbImage, ApiError> {
    let bytes = form.file.as_ref().ok_or(ApiError::MissingField("file"))?;
    let image = image::load_from_memory(bytes)?;
    Ok(image.to_rgb8())
}

async fn caption(
    caps: web::Data<Capabilities>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_multipart(payload).await?;
    let image = decode_image(&form)?;
    let caption = caps.captioner.caption(&image)?;
    Ok(HttpResponse::Ok().json(CaptionResponse { caption }))
}

async fn detect(
    caps: web::Data<Capabilities>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_multipart(payload).await?;
    let image = decode_image(&form)?;
    let predictions = caps
        .detector
        .detect(&image, DETECTION_CONFIDENCE_THRESHOLD)?;

    // Re-filter, deduplicate, and sort; the BTreeSet gives both at once.
    let labels: Vec<String> = predictions
        .into_iter()
        .filter(|p| p.score >= DETECTION_CONFIDENCE_THRESHOLD)
        .map(|p| p.label)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    Ok(HttpResponse::Ok().json(DetectionResponse { labels }))
}

async fn vqa(caps: web::Data<Capabilities>, payload: Multipart) -> Result<HttpResponse, ApiError> {
    let form = read_multipart(payload).await?;
    let image = decode_image(&form)?;
    let question = form
        .text_fields
        .get("question")
        .map(String::as_str)
        .unwrap_or("");
    let answer = caps.vqa.answer(&image, question)?;
    Ok(HttpResponse::Ok().json(VqaResponse { answer }))
}

async fn transcribe(
    caps: web::Data<Capabilities>,
    payload: Multipart,
) -> Result<HttpResponse, ApiError> {
    let form = read_multipart(payload).await?;
    let audio = form.file.ok_or(ApiError::MissingField("file"))?;
    // Raw bytes go straight through; the transcript is always requested in
    // English, whatever language was spoken.
    let text = caps.transcriber.transcribe(&audio, ENGLISH)?;
    Ok(HttpResponse::Ok().json(TranscriptionResponse { text }))
}

#[derive(Deserialize)]
struct SpeakForm {
    text: String,
}

async fn speak(
    caps: web::Data<Capabilities>,
    config: web::Data<AppConfig>,
    form: web::Form<SpeakForm>,
) -> Result<HttpResponse, ApiError> {
    let audio = caps
        .synthesizer
        .synthesize(&form.text, ENGLISH, false)
        .await?;
    let file = TempAudioFile::create(&config.audio_dir, &audio)?;
    info!("synthesized {} bytes into {}", file.len(), file.file_name());

    let file_name = file.file_name().to_owned();
    let stream = file.into_stream()?;
    Ok(HttpResponse::Ok()
        .content_type("audio/mpeg")
        .insert_header(ContentDisposition {
            disposition: DispositionType::Attachment,
            parameters: vec![DispositionParam::Filename(file_name)],
        })
        .streaming(stream))
}
