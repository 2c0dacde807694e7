//! Job wire types
//!
//! Requests arrive as `{"id": ..., "input": {...}}` envelopes; results go back
//! as `{"id": ..., "output": {...}}`.

use crate::error::{PhotoAiError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Operation run when a job names none
pub const DEFAULT_OPERATION: &str = "enhance";

/// One job as delivered by the host
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobEnvelope {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub input: JobRequest,
}

/// Job input fields
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobRequest {
    /// Base64 image, optionally a data URI
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Operation names in execution order
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operations: Option<Vec<String>>,
    /// `[r, g, b]` for `remove_background`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<Vec<i64>>,
    /// Base64 background for `remove_background`; wins over the color
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_image: Option<String>,
    /// Kernel size for `blur_plates`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blur_strength: Option<i64>,
}

impl JobRequest {
    /// Requested image payload, if present and non-blank
    #[must_use]
    pub fn image_payload(&self) -> Option<&str> {
        self.image.as_deref().filter(|s| !s.trim().is_empty())
    }

    /// Operation names, `["enhance"]` when absent or empty
    #[must_use]
    pub fn operation_names(&self) -> Vec<&str> {
        match &self.operations {
            Some(ops) if !ops.is_empty() => ops.iter().map(String::as_str).collect(),
            _ => vec![DEFAULT_OPERATION],
        }
    }

    /// Validated background color
    ///
    /// # Errors
    /// - Not exactly three components
    /// - Component outside 0-255
    pub fn background_color(&self) -> Result<Option<[u8; 3]>> {
        let Some(components) = &self.background_color else {
            return Ok(None);
        };
        let invalid = || {
            PhotoAiError::config(format!(
                "background_color must be three integers in 0-255, got {components:?}"
            ))
        };
        let [r, g, b] = components.as_slice() else {
            return Err(invalid());
        };
        let channel = |v: i64| u8::try_from(v).map_err(|_| invalid());
        Ok(Some([channel(*r)?, channel(*g)?, channel(*b)?]))
    }
}

/// Operations the worker knows how to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    RemoveBackground,
    BlurPlates,
    Enhance,
}

impl Operation {
    pub const ALL: [Self; 3] = [Self::RemoveBackground, Self::BlurPlates, Self::Enhance];

    /// Look up an operation by its wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.name() == name)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::RemoveBackground => "remove_background",
            Self::BlurPlates => "blur_plates",
            Self::Enhance => "enhance",
        }
    }

    /// Key of this operation's image in the result
    #[must_use]
    pub fn output_key(self) -> &'static str {
        match self {
            Self::RemoveBackground => "background_removed",
            Self::BlurPlates => "plates_blurred",
            Self::Enhance => "enhanced",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub images: Option<BTreeMap<String, String>>,
    #[serde(rename = "final", default, skip_serializing_if = "Option::is_none")]
    pub final_image: Option<String>,
}

impl JobResult {
    #[must_use]
    pub fn success(images: BTreeMap<String, String>, final_image: String) -> Self {
        Self {
            success: true,
            error: None,
            error_kind: None,
            images: Some(images),
            final_image: Some(final_image),
        }
    }

    #[must_use]
    pub fn failure(error: &PhotoAiError) -> Self {
        Self {
            success: false,
            error: Some(error.to_string()),
            error_kind: Some(error.kind().to_string()),
            images: None,
            final_image: None,
        }
    }
}

/// Result line written back to the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobResponse {
    pub id: String,
    pub output: JobResult,
}
