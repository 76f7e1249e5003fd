use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("image id must not be empty")]
    MissingId,
    #[error("page numbers start at 1")]
    PageZero,
    #[error("page size must be between 1 and {max}, got {value}")]
    PageSize { value: u32, max: u32 },
}
