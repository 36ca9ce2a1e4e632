use thiserror::Error;

/// The error taxonomy the pipeline can raise. Every external-facing surface
/// (HTTP responses, the batch row's diagnostic field) goes through
/// `Display`/`to_string()` on this type rather than leaking a driver or
/// parser error's raw text.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("upload exceeds the configured size cap")]
    InputTooLarge,

    #[error("unsupported input extension, expected xml or zip")]
    UnsupportedInput,

    #[error("archive is malformed or contains an unsafe entry: {0}")]
    ArchiveMalformed(String),

    #[error("input is truncated: missing root closing tag")]
    InputTruncated,

    #[error("fatal parse error: {0}")]
    ParseFatal(String),

    #[error("database write failed: {0}")]
    WriteFatal(String),

    #[error("ingestion was cancelled by an external request")]
    CancelledByUser,

    #[error("batch not found")]
    BatchNotFound,

    #[error("batch is not in a state that allows this operation")]
    InvalidBatchState,

    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type IngestResult<T> = Result<T, IngestError>;
