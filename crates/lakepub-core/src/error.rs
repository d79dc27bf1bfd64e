//! Error taxonomy for an export run

use crate::http::HttpError;

/// Failure that aborts an export run.
///
/// `Transport` and `Decode` come from fetching records, `Io` from writing
/// the artifact or its manifest. Failed flag updates are not errors; they are
/// reported in the run summary.
#[derive(Debug)]
pub enum ExportError {
    Transport(HttpError),
    Decode(String),
    Io(std::io::Error),
}

impl std::fmt::Display for ExportError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transport(e) => write!(f, "transport: {e}"),
            Self::Decode(msg) => write!(f, "decode: {msg}"),
            Self::Io(e) => write!(f, "IO: {e}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Decode(_) => None,
            Self::Io(e) => Some(e),
        }
    }
}

impl From<HttpError> for ExportError {
    fn from(e: HttpError) -> Self {
        Self::Transport(e)
    }
}

impl From<std::io::Error> for ExportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl ExportError {
    /// Short label for summaries and logs
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Transport(_) => "transport",
            Self::Decode(_) => "decode",
            Self::Io(_) => "io",
        }
    }
}
