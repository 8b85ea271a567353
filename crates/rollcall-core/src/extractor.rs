//! Feature extraction seam.
//!
//! Turning camera frames into descriptors is the job of an external
//! collaborator (an ONNX embedding model, a vendor SDK). The engine
//! depends on this trait only; nothing in rollcall ever touches pixels.

use thiserror::Error;

use crate::types::Descriptor;

#[derive(Debug, Clone, Error)]
pub enum ExtractError {
    #[error("no face found in input")]
    NoFace,
    #[error("extractor backend failure: {0}")]
    Backend(String),
}

/// Capability interface for biometric feature extraction.
pub trait FeatureExtractor: Send + Sync {
    /// Extract a single probe descriptor from an encoded image.
    fn extract(&self, image: &[u8]) -> Result<Descriptor, ExtractError>;
}
