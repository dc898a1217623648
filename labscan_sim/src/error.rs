use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("instrument timeout")]
    Timeout,
    #[error("instrument connection closed")]
    Closed,
    #[error("{what} out of instrument range: {value}")]
    OutOfRange { what: &'static str, value: f64 },
    #[error("instrument busy")]
    Busy,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SimError>;
