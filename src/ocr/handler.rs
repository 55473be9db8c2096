use super::upload::read_image;
use super::TextExtractor;
use crate::error::Result;
use axum::{
    extract::{
        multipart::{Multipart, MultipartRejection},
        State,
    },
    http::{header::CONTENT_TYPE, HeaderMap, StatusCode},
    response::IntoResponse,
};
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub struct OcrState {
    pub extractor: Arc<dyn TextExtractor>,
}

/// `POST /getOCR`: validate the `image` part and return the extracted text
pub async fn ocr_handler(
    State(state): State<OcrState>,
    headers: HeaderMap,
    multipart: std::result::Result<Multipart, MultipartRejection>,
) -> Result<impl IntoResponse> {
    let image = read_image(&headers, multipart).await?;
    info!(file_name = %image.file_name, "Processing image from request");

    let text = state.extractor.extract_text(image).await?;

    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/plain; charset=utf-8")],
        text,
    ))
}
