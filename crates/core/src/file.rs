//! File row lifecycle.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Maximum length of a persisted `error_message`, in Unicode scalar values.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

const ELLIPSIS: &str = "...";

/// Upload status of a file row.
///
/// `pending → uploading → completed | failed`. Rows created by the chunked
/// protocol start directly in `completed`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// Bytes are staged locally and queued for the backend.
    Pending,
    /// A worker is moving the bytes into the backend.
    Uploading,
    /// The object is durable in the backend.
    Completed,
    /// The backend write did not happen; the row waits to be dismissed.
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Uploading => "uploading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> crate::Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "uploading" => Ok(Self::Uploading),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(crate::Error::InvalidStatus(format!(
                "unknown file status: {other}"
            ))),
        }
    }

    /// Whether the worker pool is done with this row.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for FileStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clamp an error message to [`MAX_ERROR_MESSAGE_CHARS`] code points, ending in an
/// ellipsis when anything was cut. Never splits a multi-byte character.
pub fn truncate_error_message(message: &str) -> String {
    if message.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return message.to_string();
    }
    let keep = MAX_ERROR_MESSAGE_CHARS - ELLIPSIS.len();
    let mut out: String = message.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}
