//! HTTP error taxonomy. Client-side faults (undecodable uploads, missing
//! fields) become 400s with an `error` body; everything else is a 500 with
//! a `detail` body carrying the failure's own message.

use crate::models::CapabilityError;
use actix_web::http::header::ContentType;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use log::error;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("could not decode uploaded image: {0}")]
    ImageDecode(#[from] image::ImageError),
    #[error("missing required field `{0}`")]
    MissingField(&'static str),
    #[error("malformed multipart payload: {0}")]
    Multipart(String),
    #[error(transparent)]
    Capability(#[from] CapabilityError),
    #[error("Failed to generate audio file")]
    SynthesisVerification,
    #[error("audio file error: {0}")]
    Io(#[from] std::io::Error),
}

impl ResponseError for ApiError {
    fn status_code(&self) -> StatusCode {
        match self {
            ApiError::ImageDecode(_) | ApiError::MissingField(_) | ApiError::Multipart(_) => {
                StatusCode::BAD_REQUEST
            }
            ApiError::Capability(_) | ApiError::SynthesisVerification | ApiError::Io(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        let body = if status.is_client_error() {
            json!({ "error": self.to_string() })
        } else {
            error!("request failed: {}", self);
            json!({ "detail": self.to_string() })
        };
        HttpResponse::build(status)
            .insert_header(ContentType::json())
            .json(body)
    }
}
