//! Unified error types for key resolution and the envelope pipeline.

use core::fmt;

use thiserror::Error;

use crate::handle::KeyKind;

pub type Result<T, E = Error> = core::result::Result<T, E>;

/// Pipeline stage that produced an [`Error::EnvelopeConstructionFailed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStep {
    Claims,
    Sign,
    Encrypt,
    Serialize,
}

impl fmt::Display for PipelineStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Claims => "claims",
            Self::Sign => "sign",
            Self::Encrypt => "encrypt",
            Self::Serialize => "serialize",
        };
        f.write_str(name)
    }
}

/// One rejected decoder in the key format fallback chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeAttempt {
    pub decoder: &'static str,
    pub reason: String,
}

impl fmt::Display for DecodeAttempt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.decoder, self.reason)
    }
}

fn trail(attempts: &[DecodeAttempt]) -> String {
    attempts
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("unrecognized key format [{}]", trail(.attempts))]
    UnrecognizedKeyFormat { attempts: Vec<DecodeAttempt> },

    #[error("a {wanted} key was requested but the key material only provides a {found} key")]
    KeyKindMismatch { wanted: KeyKind, found: KeyKind },

    #[error("unable to decrypt key material: {0}")]
    KeyDecryptionFailed(String),

    #[error("password input aborted: {0}")]
    PasswordInputAborted(String),

    #[error("key [{0}] not found")]
    KeyNotFound(String),

    #[error("key set is empty")]
    EmptyKeySet,

    #[error("key set holds {} keys [{}], a key id is required", .kids.len(), .kids.join(", "))]
    AmbiguousKeySet { kids: Vec<String> },

    #[error("malformed envelope: {0}")]
    EnvelopeParse(String),

    #[error("unable to decrypt envelope: {0}")]
    DecryptionFailed(String),

    #[error("envelope construction failed at {step} step: {reason}")]
    EnvelopeConstructionFailed { step: PipelineStep, reason: String },
}

impl Error {
    pub(crate) fn construction(step: PipelineStep, reason: impl fmt::Display) -> Self {
        Self::EnvelopeConstructionFailed {
            step,
            reason: reason.to_string(),
        }
    }
}

/// Non-fatal verification outcome: the token could not be authenticated.
///
/// Returned alongside already-decrypted content rather than as an [`Error`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("token authenticity not established: {reason}")]
pub struct AuthenticityWarning {
    pub reason: String,
}

impl AuthenticityWarning {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}
