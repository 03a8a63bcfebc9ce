use std::{borrow::Cow, io, path::PathBuf};

use thiserror::Error;

use crate::mux::Role;

pub mod action;
pub mod config;
pub mod dirs;
pub mod engine;
pub mod mux;
pub mod offer;
pub mod protocol;
pub mod send;
pub mod source;
pub mod transfer;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("an I/O error occurred")]
    Io {
        error: io::Error,
        context: Cow<'static, str>,
    },
    #[error("a handle is already registered for {role:?}")]
    DuplicateRegistration { role: Role },
    #[error("invalid config file")]
    Config {
        error: toml::de::Error,
        file: PathBuf,
    },
}

pub trait IoErr<Out> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, f: impl FnOnce() -> I) -> Out;
}

impl<T> IoErr<Result<T>> for std::result::Result<T, io::Error> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, context: impl FnOnce() -> I) -> Result<T> {
        self.map_err(|error| Error::Io {
            error,
            context: context().into(),
        })
    }
}

impl<T> IoErr<Result<T>> for rustix::io::Result<T> {
    fn map_io_err<I: Into<Cow<'static, str>>>(self, context: impl FnOnce() -> I) -> Result<T> {
        self.map_err(io::Error::from).map_io_err(context)
    }
}

#[cfg(feature = "error-stack")]
mod error_stack_compat {
    use error_stack::Report;

    use crate::Error;

    impl Error {
        pub fn into_report<W: core::error::Error + Send + Sync + 'static>(
            self,
            wrapper: W,
        ) -> Report<W> {
            match self {
                Self::Io { error, context } => Report::new(error)
                    .attach_printable(context)
                    .change_context(wrapper),
                Self::DuplicateRegistration { role } => Report::new(wrapper)
                    .attach_printable(format!("Interest already registered for {role:?}")),
                Self::Config { error, file } => Report::new(error)
                    .attach_printable(format!("Config file: {file:?}"))
                    .change_context(wrapper),
            }
        }
    }
}
