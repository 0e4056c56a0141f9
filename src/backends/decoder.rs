use crate::error::{MirrorError, Result};
use crate::traits::ImageDecoder;
use crate::types::DecodedImage;
use async_trait::async_trait;
use image::ImageReader;
use std::io::Cursor;

/// Reads only the image header to learn format and dimensions.
pub struct HeaderDecoder;

#[async_trait]
impl ImageDecoder for HeaderDecoder {
    async fn decode(&self, bytes: Vec<u8>) -> Result<DecodedImage> {
        tokio::task::spawn_blocking(move || read_header(&bytes))
            .await
            .map_err(|e| MirrorError::FetchFailed(format!("decoder task failed: {e}")))?
    }
}

pub fn read_header(bytes: &[u8]) -> Result<DecodedImage> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    let format = reader
        .format()
        .and_then(|f| f.extensions_str().first())
        .map(|ext| ext.to_string());
    let (width, height) = reader.into_dimensions()?;

    Ok(DecodedImage {
        width,
        height,
        format,
    })
}
