//! Scanvault - OCR Boundary
//!
//! Text recognition is an external engine; the core only consumes this
//! request/response surface and never depends on recognition accuracy.

use crate::error::VaultResult;

/// Recognized text with the engine's confidence score (0.0 - 1.0)
#[derive(Debug, Clone)]
pub struct OcrText {
    pub text: String,
    pub confidence: f32,
}

/// External recognition engine
pub trait OcrEngine: Send + Sync {
    fn extract(&self, image: &[u8]) -> VaultResult<OcrText>;
}

/// Engine used when recognition is disabled or unavailable.
pub struct DisabledOcr;

impl OcrEngine for DisabledOcr {
    fn extract(&self, _image: &[u8]) -> VaultResult<OcrText> {
        Ok(OcrText {
            text: String::new(),
            confidence: 0.0,
        })
    }
}
