use crate::error::{GatewayError, Result};
use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::http::{header::CONTENT_TYPE, HeaderMap};
use bytes::Bytes;
use tracing::debug;

pub const IMAGE_PART: &str = "image";
pub const ACCEPTED_EXTENSIONS: &[&str] = &[".png", ".jpeg", ".jpg"];
pub const ACCEPTED_CONTENT_TYPES: &[&str] = &["image/png", "image/jpeg"];

const MULTIPART_FORM_DATA: &str = "multipart/form-data";

/// A validated image upload
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Bytes,
}

/// The request body must be `multipart/form-data`
pub fn validate_content_type(headers: &HeaderMap) -> Result<()> {
    let is_multipart = headers
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|value| value.starts_with(MULTIPART_FORM_DATA));

    if is_multipart {
        Ok(())
    } else {
        Err(GatewayError::InvalidUpload(
            "Request is not of proper content type".to_string(),
        ))
    }
}

/// Check a single image part's name, type and size
pub fn validate_image(
    file_name: Option<&str>,
    content_type: Option<&str>,
    bytes: &[u8],
) -> Result<()> {
    if bytes.is_empty() {
        return Err(GatewayError::InvalidUpload(
            "Image is null or empty".to_string(),
        ));
    }

    let has_extension = file_name.is_some_and(|name| {
        ACCEPTED_EXTENSIONS
            .iter()
            .any(|extension| name.ends_with(extension))
    });
    if !has_extension {
        return Err(GatewayError::UnsupportedMedia(
            "Image is not an image with proper extension".to_string(),
        ));
    }

    if !content_type.is_some_and(|ct| ACCEPTED_CONTENT_TYPES.contains(&ct)) {
        return Err(GatewayError::UnsupportedMedia(
            "Image is not an image with proper content type".to_string(),
        ));
    }

    Ok(())
}

/// Pull the `image` part out of a multipart body and validate it
pub async fn read_image(
    headers: &HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<ImageUpload> {
    validate_content_type(headers)?;
    let mut multipart = multipart.map_err(|e| GatewayError::InvalidUpload(e.body_text()))?;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| GatewayError::InvalidUpload(e.body_text()))?
    {
        if field.name() != Some(IMAGE_PART) {
            continue;
        }

        let file_name = field.file_name().map(str::to_string);
        let content_type = field.content_type().map(str::to_string);
        let bytes = field
            .bytes()
            .await
            .map_err(|e| GatewayError::InvalidUpload(e.body_text()))?;

        validate_image(file_name.as_deref(), content_type.as_deref(), &bytes)?;
        debug!(
            file_name = ?file_name,
            size = bytes.len(),
            "Accepted image upload"
        );

        return Ok(ImageUpload {
            file_name: file_name.unwrap_or_default(),
            content_type: content_type.unwrap_or_default(),
            bytes,
        });
    }

    Err(GatewayError::InvalidUpload(
        "Image is null or empty".to_string(),
    ))
}
