use std::{fmt, time::Duration};

/// Failure modes of a repository poll.
///
/// `MirrorCorrupted` is recovered inside the mirror layer (delete and
/// re-initialize) and only surfaces in logs. Everything else is reported at
/// repository granularity by the caller.
#[derive(Debug)]
pub enum Error {
    Io(std::io::Error),
    MirrorCorrupted(String),
    MirrorInit(String),
    Fetch(String),
    Diff(String),
    Publish(String),
    Timeout(Duration),
    PollInProgress,
    Aborted(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Flatten an `anyhow` chain from a collaborator into a single message.
    pub(crate) fn chain(err: &anyhow::Error) -> String {
        format!("{:#}", err)
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {}", e),
            Error::MirrorCorrupted(msg) => write!(f, "Mirror corrupted: {}", msg),
            Error::MirrorInit(msg) => write!(f, "Mirror initialization failed: {}", msg),
            Error::Fetch(msg) => write!(f, "Fetch failed: {}", msg),
            Error::Diff(msg) => write!(f, "Diff failed: {}", msg),
            Error::Publish(msg) => write!(f, "Publish failed: {}", msg),
            Error::Timeout(after) => write!(f, "Poll timed out after {:?}", after),
            Error::PollInProgress => write!(f, "Previous poll still in progress"),
            Error::Aborted(msg) => write!(f, "Poll aborted: {}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e)
    }
}
