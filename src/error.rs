//! Error types for fulfilment-sync.
//!
//! One enum per concern, composed into [`Error`] for callers that only need
//! to surface a message. Row-not-found is not an error anywhere in this crate:
//! row scans return `Option` and a miss is a silent skip.

use thiserror::Error;

use crate::inventory::WorkflowState;

/// Result type alias using [`Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Invalid spreadsheet column reference.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ColumnError {
    #[error("empty column reference")]
    Empty,

    #[error("invalid column letter '{letter}' in '{reference}'")]
    InvalidLetter { reference: String, letter: char },

    #[error("column reference '{0}' is too long")]
    TooLong(String),
}

/// Malformed `Automation` layout sheet. Fatal to opening that spreadsheet.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("layout sheet has no '{block}' block (expected column {index})")]
    MissingBlock { block: &'static str, index: usize },

    #[error("'{block}' header {header:?} does not contain a start and end row")]
    MissingRowRange { block: &'static str, header: String },

    #[error("'{block}' row range [{start}, {end}) is empty or starts before row 1")]
    InvalidRowRange {
        block: &'static str,
        start: u32,
        end: u32,
    },

    #[error("'{block}' maps {key:?} to an invalid column: {source}")]
    InvalidColumn {
        block: &'static str,
        key: String,
        #[source]
        source: ColumnError,
    },

    #[error("layout sheet does not map any product to a column")]
    NoCategoryColumns,
}

/// Request throttling failures that could not be absorbed by queueing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RateLimitError {
    #[error("rate limiter queue is full ({depth} requests waiting)")]
    QueueFull { depth: usize },
}

/// Remote HTTP API failure (inventory or spreadsheet service).
///
/// Cloneable so concurrent callers sharing one in-flight request can each
/// receive the same outcome.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("Cannot reach {service} at {url}")]
    Connect { service: &'static str, url: String },

    #[error("Connection to {service} at {url} timed out")]
    Timeout { service: &'static str, url: String },

    #[error("{message} (HTTP {status})")]
    Status {
        service: &'static str,
        status: u16,
        message: String,
    },

    #[error("{service} kept rejecting requests with HTTP 429 after {attempts} attempts")]
    RateLimited {
        service: &'static str,
        attempts: u32,
    },

    #[error(transparent)]
    Throttle(#[from] RateLimitError),

    #[error("Invalid response from {service}: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    #[error("Network error communicating with {service}: {message}")]
    Request {
        service: &'static str,
        message: String,
    },

    #[error("Missing credential: {0}")]
    MissingCredential(&'static str),
}

/// Local sale cache failures.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("cache payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("cache connection lock poisoned")]
    Lock,

    #[error("sale {0} is not cached")]
    NotFound(String),

    #[error("sale {sale_id} has an unreadable authorization time {value:?}")]
    InvalidTimestamp { sale_id: String, value: String },

    #[error("{0}")]
    Io(String),
}

/// Rejected workflow state change.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WorkflowError {
    #[error("sale {sale_id} cannot move from {from} to {to}")]
    InvalidTransition {
        sale_id: String,
        from: WorkflowState,
        to: WorkflowState,
    },
}

/// One failed spreadsheet write inside a composite add/remove.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{range}: {error}")]
pub struct WriteFailure {
    pub range: String,
    pub error: ApiError,
}

/// Spreadsheet add/remove failures.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("no entry column configured for '{0}'")]
    UnknownWeekday(String),

    #[error("reading spreadsheet failed: {0}")]
    Read(#[from] ApiError),

    #[error("{} of {attempted} spreadsheet writes failed: {}", .failures.len(), join_failures(.failures))]
    PartialWrite {
        attempted: usize,
        failures: Vec<WriteFailure>,
    },

    #[error("{original}; cleaning up the partial entry also failed ({compensation}), the spreadsheet needs manual review")]
    CompensationFailed {
        original: Box<SyncError>,
        compensation: Box<SyncError>,
    },

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

fn join_failures(failures: &[WriteFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Cache reconciliation failures.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error("loading awaiting-fulfilment sales failed: {0}")]
    Inventory(#[from] ApiError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Workflow(#[from] WorkflowError),
}

/// Inventory fulfilment (pick/pack/ship) failures.
#[derive(Debug, Error)]
pub enum FulfilmentError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("sale {sale_id} has unexpected fulfilment status {status:?}")]
    UnexpectedStatus { sale_id: String, status: String },

    #[error("sale {0} has no pick to pack")]
    MissingPick(String),
}

/// Top-level error for session-level operations.
#[derive(Debug, Error)]
pub enum Error {
    #[error("No automation config found, please go back and try again. ({0})")]
    Layout(#[from] LayoutError),

    #[error(transparent)]
    Api(#[from] ApiError),

    #[error(transparent)]
    Cache(#[from] CacheError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),

    #[error(transparent)]
    Fulfilment(#[from] FulfilmentError),

    #[error("invalid setting {key}: {message}")]
    Config { key: String, message: String },

    #[error("credential store: {0}")]
    Credentials(String),
}
