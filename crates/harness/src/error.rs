//! Harness error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Engine error: {0}")]
    Engine(#[from] tilegrid_core::EngineError),

    #[error("Verification failed: {message}")]
    VerificationFailed { message: String },
}

pub type Result<T> = std::result::Result<T, HarnessError>;
