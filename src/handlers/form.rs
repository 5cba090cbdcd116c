// Form data processing for the transcription endpoint
//
// Parses the multipart upload: the `file` field (required) and the optional
// `response_format` field. Other fields are drained and ignored.

use actix_multipart::{Field, Multipart};
use futures::{StreamExt, TryStreamExt};
use log::{debug, info};

use crate::error::HandlerError;

/// An uploaded audio file, fully buffered
#[derive(Debug, Default)]
pub struct AudioUpload {
    /// Client-side file name, empty when the client sent none
    pub file_name: String,
    pub data: Vec<u8>,
    /// Value of the `response_format` field, if any
    pub response_format: Option<String>,
}

impl AudioUpload {
    /// Whether the client asked for a bare text body
    pub fn wants_text(&self) -> bool {
        self.response_format
            .as_deref()
            .is_some_and(|format| format.eq_ignore_ascii_case("text"))
    }
}

/// Check the request content type before reading any multipart data
pub fn ensure_multipart(content_type: Option<&str>) -> Result<(), HandlerError> {
    match content_type {
        Some(value) if value.trim_start().to_ascii_lowercase().starts_with("multipart/form-data") => {
            Ok(())
        }
        other => Err(HandlerError::InvalidContentType(
            other.unwrap_or_default().to_string(),
        )),
    }
}

/// Upper bound for short text fields such as `response_format`
pub const MAX_TEXT_FIELD_SIZE: usize = 1024;

async fn read_text_field(field: &mut Field, field_name: &str) -> Result<String, HandlerError> {
    let mut value = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| {
            HandlerError::form_error(format!("Error reading field {}: {}", field_name, e))
        })?;
        if value.len() + chunk.len() > MAX_TEXT_FIELD_SIZE {
            return Err(HandlerError::form_error(format!(
                "Field {} exceeds {} bytes",
                field_name, MAX_TEXT_FIELD_SIZE
            )));
        }
        value.extend_from_slice(&chunk);
    }
    Ok(String::from_utf8_lossy(&value).trim().to_string())
}

/// Extract the audio upload from a multipart form
///
/// Fails with `FileTooLarge` as soon as the file, or the fields skipped
/// alongside it, exceed `max_file_size`, and with `NoAudioFile` when the
/// `file` field is missing or empty.
pub async fn extract_audio_upload(
    mut form: Multipart,
    max_file_size: usize,
) -> Result<AudioUpload, HandlerError> {
    let mut upload = AudioUpload::default();
    let mut file_seen = false;
    let mut skipped = 0usize;

    while let Some(mut field) = form
        .try_next()
        .await
        .map_err(|e| HandlerError::form_error(format!("Malformed multipart body: {}", e)))?
    {
        let content_disposition = field.content_disposition();
        let field_name = content_disposition
            .and_then(|cd| cd.get_name().map(|name| name.to_string()))
            .unwrap_or_default();

        match field_name.as_str() {
            "file" => {
                upload.file_name = content_disposition
                    .and_then(|cd| cd.get_filename().map(|name| name.to_string()))
                    .unwrap_or_default();

                let mut data = Vec::new();
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| {
                        HandlerError::form_error(format!("Error processing file upload: {}", e))
                    })?;
                    if data.len() + chunk.len() > max_file_size {
                        return Err(HandlerError::FileTooLarge(
                            data.len() + chunk.len(),
                            max_file_size,
                        ));
                    }
                    data.extend_from_slice(&chunk);
                }
                upload.data = data;
                file_seen = true;
            }
            "response_format" => {
                let value = read_text_field(&mut field, &field_name).await?;
                if !value.is_empty() {
                    upload.response_format = Some(value);
                }
            }
            _ => {
                debug!("Skipping form field '{}'", field_name);
                while let Some(chunk) = field.next().await {
                    let chunk = chunk.map_err(|e| {
                        HandlerError::form_error(format!("Error reading field {}: {}", field_name, e))
                    })?;
                    skipped += chunk.len();
                    if skipped > max_file_size {
                        return Err(HandlerError::FileTooLarge(skipped, max_file_size));
                    }
                }
            }
        }
    }

    if !file_seen || upload.data.is_empty() {
        return Err(HandlerError::NoAudioFile);
    }

    info!(
        "Received audio file '{}' ({} bytes)",
        upload.file_name,
        upload.data.len()
    );
    Ok(upload)
}
