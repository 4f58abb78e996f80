use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrailmarkError {
    #[error("Storage error: {0}")]
    Store(String),
}
