use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ErrorKind {
    #[error("io error: {0}")]
    IoError(#[from] io::Error),
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("failed to signal process {pid}: {reason}")]
    Signal { pid: u32, reason: String },
    #[error("failed to find processes {name}: {reason}")]
    Search { name: String, reason: String },
    #[error("some processes could not be killed: {}", .0.join("; "))]
    Sweep(Vec<String>),
    #[error("invalid executable name: {0:?}")]
    InvalidName(String),
    #[error("an error occured: {0}")]
    ErrorMsg(String),
    #[error("an error occured: {0}")]
    ErrorStr(&'static str),
}

#[derive(Error, Debug)]
#[error(transparent)]
pub struct Error(ErrorKind);

impl Error {
    fn from_kind(kind: ErrorKind) -> Self {
        Self(kind)
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.0
    }
}

impl<E> From<E> for Error
where
    E: Into<ErrorKind>,
{
    fn from(err: E) -> Self {
        Self::from_kind(err.into())
    }
}

impl From<&'static str> for Error {
    fn from(err: &'static str) -> Self {
        Self::from_kind(ErrorKind::ErrorStr(err))
    }
}

impl From<String> for Error {
    fn from(err: String) -> Self {
        Self::from_kind(ErrorKind::ErrorMsg(err))
    }
}
