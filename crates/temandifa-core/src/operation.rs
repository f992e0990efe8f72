//! Downstream inference operation kinds.
//!
//! Every kind gets its own cache prefix, cache TTL, circuit breaker and call
//! timeout. Failures of one kind never affect another.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// An inference capability exposed by the downstream service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    /// Object detection on an image.
    Detect,
    /// Text recognition on an image, parameterised by language.
    Ocr,
    /// Speech-to-text on an audio clip.
    Transcribe,
    /// Visual question answering on an image plus free-text question.
    Vqa,
}

impl OperationKind {
    /// All kinds, in a stable order.
    pub const ALL: [OperationKind; 4] = [Self::Detect, Self::Ocr, Self::Transcribe, Self::Vqa];

    /// Cache key prefix for results of this kind.
    #[must_use]
    pub fn cache_prefix(self) -> &'static str {
        match self {
            Self::Detect => "detect",
            Self::Ocr => "ocr",
            Self::Transcribe => "transcribe",
            Self::Vqa => "vqa",
        }
    }

    /// Circuit breaker name, used in logs and metric labels.
    #[must_use]
    pub fn breaker_name(self) -> &'static str {
        match self {
            Self::Detect => "ai-detect",
            Self::Ocr => "ai-ocr",
            Self::Transcribe => "ai-transcribe",
            Self::Vqa => "ai-vqa",
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.cache_prefix()
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OperationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "detect" => Ok(Self::Detect),
            "ocr" => Ok(Self::Ocr),
            "transcribe" => Ok(Self::Transcribe),
            "vqa" => Ok(Self::Vqa),
            other => Err(format!("unknown operation kind: {other}")),
        }
    }
}
