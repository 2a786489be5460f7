use thiserror::Error;

use crate::store::StoreError;
use crate::vcs::VcsError;
use crate::version::VersionError;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Unknown package: {0}")]
    UnknownPackage(String),

    #[error("Unknown release {version} of {package}")]
    UnknownRelease { package: String, version: String },

    #[error("Package already registered: {0}")]
    AlreadyRegistered(String),

    #[error("Missing VCS credential for {0}")]
    MissingCredential(String),

    #[error("Timed out after {waited_secs}s waiting for sync gate {name}")]
    LockTimeout { name: String, waited_secs: u64 },

    #[error("Persistence failure: {0}")]
    Store(#[from] StoreError),

    #[error("VCS error: {0}")]
    Vcs(#[from] VcsError),

    #[error("Version error: {0}")]
    Version(#[from] VersionError),
}
