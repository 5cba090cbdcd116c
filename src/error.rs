// Error handling for the audio API
//
// This module defines the error type returned by the HTTP handlers and maps the
// errors of the lower layers (transcoder, engines, engine cache) onto it.

use std::io;
use thiserror::Error;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};

use crate::engine_cache::CacheError;
use crate::engines::EngineError;
use crate::models::ErrorResponse;
use crate::transcoder::TranscodeError;

/// Errors that can occur in the audio API handlers
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Error when processing multipart form data
    #[error("Form error: {0}")]
    FormError(String),

    /// Error when no audio file (or an empty one) was provided
    #[error("No audio file provided in the request")]
    NoAudioFile,

    /// Error when the transcription request is not multipart
    #[error("Invalid content type: expected multipart/form-data, got '{0}'")]
    InvalidContentType(String),

    /// Error when the speech request body is not valid JSON
    #[error("Invalid JSON body: {0}")]
    InvalidJson(String),

    /// Error when a file is too large
    #[error("File too large: {0} bytes exceeds limit of {1} bytes")]
    FileTooLarge(usize, usize),

    /// Error when neither the requested nor the default model configuration exists
    #[error("Model configuration not found: {0}")]
    ModelConfigNotFound(String),

    /// Error when the model configuration document is invalid
    #[error("Invalid model configuration: {0}")]
    ModelConfigInvalid(String),

    /// Error when the upload cannot be converted to canonical PCM
    #[error("Transcoding failed: {0}")]
    Transcode(#[from] TranscodeError),

    /// Error raised by the transcription engine
    #[error("Transcription failed: {0}")]
    Transcription(String),

    /// Error when a synthesis engine cannot be built
    #[error("Engine construction failed: {0}")]
    EngineConstruction(String),

    /// Error raised while generating speech
    #[error("Speech generation failed: {0}")]
    Generation(String),

    /// Error when writing the generated audio
    #[error("Failed to save audio: {0}")]
    Save(#[from] hound::Error),

    /// Error when reading or writing temporary files
    #[error("File error: {0}")]
    FileError(#[from] io::Error),
}

impl HandlerError {
    /// Create a new FormError
    pub fn form_error<S: Into<String>>(msg: S) -> Self {
        Self::FormError(msg.into())
    }
}

impl ResponseError for HandlerError {
    fn status_code(&self) -> StatusCode {
        match self {
            HandlerError::FormError(_)
            | HandlerError::NoAudioFile
            | HandlerError::InvalidContentType(_)
            | HandlerError::InvalidJson(_)
            | HandlerError::ModelConfigInvalid(_) => StatusCode::BAD_REQUEST,
            HandlerError::FileTooLarge(_, _) => StatusCode::PAYLOAD_TOO_LARGE,
            HandlerError::ModelConfigNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let error_response = ErrorResponse {
            error: self.to_string(),
            status: None,
        };
        HttpResponse::build(self.status_code()).json(error_response)
    }
}

/// Engine errors on the transcription path
impl From<EngineError> for HandlerError {
    fn from(err: EngineError) -> Self {
        HandlerError::Transcription(err.to_string())
    }
}

/// Convert CacheError to HandlerError
impl From<CacheError> for HandlerError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::ConfigNotFound(key) => HandlerError::ModelConfigNotFound(key),
            CacheError::ConfigMalformed { .. } => HandlerError::ModelConfigInvalid(err.to_string()),
            CacheError::ConfigIo { .. } | CacheError::Construction { .. } => {
                HandlerError::EngineConstruction(err.to_string())
            }
            CacheError::Generation(_) | CacheError::Evicted(_) | CacheError::TaskFailed(_) => {
                HandlerError::Generation(err.to_string())
            }
        }
    }
}
