//! Error taxonomy shared by the catalog core.
//!
//! Only a few of these ever reach a caller. A malformed video reference or an
//! unknown descriptor type is downgraded to a safe rendering state inside the
//! resolver, and a corrupt history document is read back as an empty ledger.
//! The variants still exist so those downgrades can be logged with a name.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    /// The stored reference looked structured but could not be parsed.
    #[error("malformed video reference: {0}")]
    MalformedVideoRef(String),

    /// A descriptor parsed fine but declared a `type` we cannot render.
    #[error("unresolved descriptor type: {0}")]
    UnresolvedDescriptorType(String),

    /// The requested title is not in the catalog. Callers abort or redirect.
    #[error("title {0} not found in catalog")]
    MissingTitle(String),

    #[error("watch history document is corrupt: {0}")]
    LedgerCorrupt(String),

    #[error("catalog document is corrupt: {0}")]
    CatalogCorrupt(String),

    #[error("storage failure: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type CoreResult<T> = Result<T, CoreError>;
