use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error("Job table I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Job table is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("Job not found: {0}")]
    NotFound(Uuid),

    #[error("Invalid repeat schedule '{expr}': {message}")]
    InvalidRepeat { expr: String, message: String },
}
