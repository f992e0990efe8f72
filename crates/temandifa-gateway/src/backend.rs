//! Downstream inference backend contract.
//!
//! The backend is opaque to the gateway: it takes raw input bytes plus the
//! per-kind options and returns an encoded result. Transport (gRPC, HTTP,
//! in-process) is the implementor's business.

use async_trait::async_trait;

use temandifa_core::OperationKind;

/// One inference call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InferenceRequest {
    pub kind: OperationKind,
    /// Image or audio bytes.
    pub input: Vec<u8>,
    /// OCR language hint.
    pub language: Option<String>,
    /// VQA question text.
    pub question: Option<String>,
}

impl InferenceRequest {
    #[must_use]
    pub fn detect(image: Vec<u8>) -> Self {
        Self::new(OperationKind::Detect, image)
    }

    #[must_use]
    pub fn ocr(image: Vec<u8>, language: impl Into<String>) -> Self {
        Self {
            language: Some(language.into()),
            ..Self::new(OperationKind::Ocr, image)
        }
    }

    #[must_use]
    pub fn transcribe(audio: Vec<u8>) -> Self {
        Self::new(OperationKind::Transcribe, audio)
    }

    #[must_use]
    pub fn vqa(image: Vec<u8>, question: impl Into<String>) -> Self {
        Self {
            question: Some(question.into()),
            ..Self::new(OperationKind::Vqa, image)
        }
    }

    fn new(kind: OperationKind, input: Vec<u8>) -> Self {
        Self {
            kind,
            input,
            language: None,
            question: None,
        }
    }

    /// Everything that influences the result, in a fixed order. OCR results
    /// depend on the language and VQA answers on the question, so those are
    /// part of the cache identity.
    pub fn fingerprint_parts(&self) -> Vec<&[u8]> {
        let mut parts = vec![self.input.as_slice()];
        match self.kind {
            OperationKind::Ocr => parts.push(self.language.as_deref().unwrap_or("").as_bytes()),
            OperationKind::Vqa => parts.push(self.question.as_deref().unwrap_or("").as_bytes()),
            OperationKind::Detect | OperationKind::Transcribe => {}
        }
        parts
    }
}

/// Errors reported by an inference backend.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The backend could not be reached.
    #[error("Inference backend unavailable: {message}")]
    Unavailable { message: String },

    /// The backend refused or failed the request.
    #[error("Inference failed: {message}")]
    Failed { message: String },
}

impl BackendError {
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }
}

/// The slow, fallible downstream service.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one inference and return the encoded result.
    async fn infer(&self, request: &InferenceRequest) -> Result<Vec<u8>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_parts_include_options() {
        assert_eq!(InferenceRequest::detect(b"img".to_vec()).fingerprint_parts().len(), 1);

        let ocr = InferenceRequest::ocr(b"img".to_vec(), "ind");
        assert_eq!(ocr.fingerprint_parts(), vec![&b"img"[..], &b"ind"[..]]);

        let vqa = InferenceRequest::vqa(b"img".to_vec(), "what color?");
        assert_eq!(vqa.fingerprint_parts()[1], b"what color?");
    }
}
