use thiserror::Error;

use crate::revision::RevisionDescriptor;

/// Errors from building a revision out of bundle content.
#[derive(Debug, Error)]
pub enum DeploymentError {
    /// Nothing can be deployed from this location.
    #[error("no bundle content at {0}")]
    NotFound(String),

    /// The content was found but its metadata is unusable.
    #[error("invalid bundle metadata: {0}")]
    InvalidMetadata(String),

    /// Reading the content failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds revisions from bundle content.
pub trait DeploymentProvider: Send + Sync {
    /// Create a revision for the bundle at `location`.
    ///
    /// `input` is the new content on update; `None` re-reads `location`.
    ///
    /// # Errors
    ///
    /// Returns an error if the content cannot be read or its metadata is
    /// invalid.
    fn create_revision(
        &self,
        location: &str,
        input: Option<&[u8]>,
    ) -> Result<RevisionDescriptor, DeploymentError>;
}
