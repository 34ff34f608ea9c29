use std::path::PathBuf;

use thiserror::Error;

use crate::source::SourceFormat;

/// Failure of a conversion run.
#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("results file not found: {}", .path.display())]
    SourceNotFound { path: PathBuf },

    #[error("failed to read results file {}: {source}", .path.display())]
    SourceRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to decode {format} results file {}: {message}", .path.display())]
    Decode {
        path: PathBuf,
        format: SourceFormat,
        message: String,
    },

    #[error("malformed record #{index}{}: {reason}", frame_label(.frame_id))]
    MalformedRecord {
        index: usize,
        frame_id: Option<String>,
        reason: String,
    },

    #[error("failed to write {}: {source}", .path.display())]
    OutputWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConvertError {
    /// Stable short code for the failure class.
    pub fn code(&self) -> &'static str {
        match self {
            ConvertError::SourceNotFound { .. } => "SOURCE_NOT_FOUND",
            ConvertError::SourceRead { .. } => "SOURCE_READ",
            ConvertError::Decode { .. } => "DECODE",
            ConvertError::MalformedRecord { .. } => "MALFORMED_RECORD",
            ConvertError::OutputWrite { .. } => "OUTPUT_WRITE",
        }
    }
}

fn frame_label(frame_id: &Option<String>) -> String {
    match frame_id {
        Some(id) => format!(" (frame {id})"),
        None => String::new(),
    }
}
