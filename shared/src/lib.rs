use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct CaptionResponse {
    pub caption: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct DetectionResponse {
    /// Labels that cleared the confidence threshold, sorted and deduplicated.
    pub labels: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct VqaResponse {
    pub answer: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct TranscriptionResponse {
    pub text: String,
}

/// Body of a 4xx response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorResponse {
    pub error: String,
}

/// Body of a 5xx response.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorDetail {
    pub detail: String,
}
