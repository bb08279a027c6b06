//! Image encoding: `DynamicImage` → base64 PNG wrapped in `ImageData`.
//!
//! PNG keeps small newspaper type crisp; JPEG artefacts around glyphs make
//! vision models misread figures in the Key Evidence field.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// How much of the image the provider should look at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detail {
    /// Detection thumbnails: only headings need to be read.
    Low,
    /// Full pages for briefs: the body text must be legible.
    High,
}

impl Detail {
    fn as_str(self) -> &'static str {
        match self {
            Detail::Low => "low",
            Detail::High => "high",
        }
    }
}

/// Encode a rasterised page as a base64 PNG ready for the VLM API.
pub fn encode_page(img: &DynamicImage, detail: Detail) -> Result<ImageData, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;

    let b64 = STANDARD.encode(&buf);
    debug!("Encoded image → {} bytes base64 ({})", b64.len(), detail.as_str());

    Ok(ImageData::new(b64, "image/png").with_detail(detail.as_str()))
}
