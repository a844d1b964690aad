use thiserror::Error;

// Payloads are plain data so errors can be cloned into the event stream
// as well as returned to callers.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("redirect loop detected at {0}")]
    RedirectLoop(String),
    #[error("redirect status {0} without a location header")]
    MissingLocation(u16),
    #[error("unexpected status {status} from {url}")]
    BadStatus { url: String, status: u16 },
    #[error("content-length {actual} disagrees with expected {expected} for chunk #{chunk}")]
    LengthMismatch {
        chunk: u32,
        expected: u64,
        actual: u64,
    },
    #[error("range request for chunk #{chunk} answered with status {status}")]
    RangeNotHonored { chunk: u32, status: u16 },
    #[error("invalid destination: {0}")]
    InvalidDestination(String),
    #[error("filesystem error: {0}")]
    Filesystem(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("failed to download chunk #{chunk} [{lo}-{hi}]")]
    Exhausted { chunk: u32, lo: u64, hi: u64 },
    #[error("chunk file {0} is larger than its planned range")]
    OnDiskInconsistency(String),
    #[error("download destroyed")]
    Destroyed,
}

pub type DownloadResult<T> = Result<T, DownloadError>;
