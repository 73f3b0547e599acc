use thiserror::Error;

use diag_backend::BackendError;
use diag_common::{DevId, DevPort, SessHdl};
use diag_wire::{IdError, PatternError};

use crate::db::DbError;

/// The failure bucket an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Malformed port, session handle, packet size or mode. Nothing was changed.
    InvalidArgument,
    /// The object is already present or already running. The existing instance is untouched.
    AlreadyExists,
    /// No free session handle, packet generator slot or buffer space.
    NoResources,
    /// The forwarding backend rejected a call.
    Backend,
    /// The operation is not allowed in the current state.
    InvalidState,
}

#[derive(Debug, Error)]
pub enum DiagError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("device {0} is not attached")]
    DeviceNotAttached(DevId),
    #[error("device {0} is already attached")]
    DeviceAttached(DevId),
    #[error("session {0} not found")]
    SessionNotFound(SessHdl),
    #[error("packet size {size} out of range {min}..={max}")]
    PacketSize { size: usize, min: usize, max: usize },
    #[error("port {port} is already used by session {session}")]
    Overlap { port: DevPort, session: SessHdl },
    #[error("session {0} is already running")]
    AlreadyRunning(SessHdl),
    #[error("session {0} is not running")]
    NotRunning(SessHdl),
    #[error("no resources: {0}")]
    NoResources(&'static str),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),
    #[error("packet database error: {0}")]
    Db(#[from] DbError),
    #[error("packet identifier error: {0}")]
    Id(#[from] IdError),
    #[error("packet pattern error: {0}")]
    Pattern(#[from] PatternError),
}

impl DiagError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Returns the taxonomy bucket of this error.
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_)
            | Self::DeviceNotAttached(_)
            | Self::SessionNotFound(_)
            | Self::PacketSize { .. }
            | Self::Overlap { .. }
            | Self::Id(_)
            | Self::Pattern(_) => ErrorKind::InvalidArgument,
            Self::DeviceAttached(_) | Self::AlreadyRunning(_) => ErrorKind::AlreadyExists,
            Self::Db(DbError::Exists(_)) => ErrorKind::AlreadyExists,
            Self::Db(_) => ErrorKind::InvalidArgument,
            Self::NoResources(_) => ErrorKind::NoResources,
            Self::Backend(_) => ErrorKind::Backend,
            Self::NotRunning(_) | Self::InvalidState(_) => ErrorKind::InvalidState,
        }
    }
}

pub type Result<T> = std::result::Result<T, DiagError>;
