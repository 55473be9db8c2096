//! Text extraction from uploaded images.
//!
//! The OCR engine itself runs out of process; [`HttpTextExtractor`] posts the
//! image to it as multipart form data and returns the recognized text.

pub mod handler;
pub mod upload;

pub use handler::{ocr_handler, OcrState};
pub use upload::ImageUpload;

use crate::config::OcrConfig;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, error};

/// The protected image-to-text operation
#[async_trait]
pub trait TextExtractor: Send + Sync {
    async fn extract_text(&self, image: ImageUpload) -> Result<String>;
}

/// OCR engine reached over HTTP
#[derive(Clone)]
pub struct HttpTextExtractor {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTextExtractor {
    pub fn new(config: &OcrConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
        })
    }
}

#[async_trait]
impl TextExtractor for HttpTextExtractor {
    async fn extract_text(&self, image: ImageUpload) -> Result<String> {
        let size = image.bytes.len();
        let part = Part::bytes(image.bytes.to_vec())
            .file_name(image.file_name)
            .mime_str(&image.content_type)
            .map_err(|e| GatewayError::InvalidUpload(format!("Invalid content type: {}", e)))?;
        let form = Form::new().part(upload::IMAGE_PART, part);

        let response = self
            .client
            .post(&self.endpoint)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::Ocr(format!("OCR engine timed out: {}", e))
                } else {
                    GatewayError::Ocr(format!("OCR request failed: {}", e))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            error!(status = %status, "OCR engine rejected image");
            return Err(GatewayError::Ocr(format!(
                "OCR engine answered with status {}",
                status
            )));
        }

        let text = response
            .text()
            .await
            .map_err(|e| GatewayError::Ocr(format!("Failed to read OCR response: {}", e)))?;

        debug!(size, chars = text.len(), "Extracted text from image");
        Ok(text)
    }
}
