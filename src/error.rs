//! Error taxonomy for an install attempt.
//!
//! Every variant is terminal for the attempt. Nothing here is retried; a
//! caller that wants a retry starts a fresh attempt.

use crate::artifacts::ArtifactKind;

pub type Result<T, E = InstallError> = std::result::Result<T, E>;

#[derive(Debug, thiserror::Error)]
pub enum InstallError {
    /// A required build artifact is absent. Raised before anything is allocated.
    #[error("build {build} must have a `{artifact}` artifact")]
    MissingArtifact { build: String, artifact: ArtifactKind },

    /// The request asks for something this installer does not do.
    #[error("unsupported configuration: {0}")]
    UnsupportedConfiguration(String),

    /// Preparing files in the scratch directory failed.
    #[error("{step}")]
    Staging {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// The content server could not be started.
    #[error("starting content server")]
    NetworkSetup(#[source] std::io::Error),

    /// `coreos-installer iso embed` exited non-zero (or could not be fed).
    #[error("running coreos-installer iso embed: {diagnostics}")]
    Embed { diagnostics: String },

    /// Generating the network boot loader chain failed.
    #[error("{step}")]
    BootChain {
        step: String,
        #[source]
        source: anyhow::Error,
    },

    /// QEMU could not be started.
    #[error("launching qemu")]
    Launch(#[source] anyhow::Error),
}

impl InstallError {
    pub(crate) fn staging(step: impl Into<String>) -> impl FnOnce(anyhow::Error) -> Self {
        let step = step.into();
        move |source| InstallError::Staging { step, source }
    }

    pub(crate) fn boot_chain(step: impl Into<String>) -> impl FnOnce(anyhow::Error) -> Self {
        let step = step.into();
        move |source| InstallError::BootChain { step, source }
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        InstallError::UnsupportedConfiguration(msg.into())
    }
}
