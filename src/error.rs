use std::io;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("missing environment variable {0}")]
    MissingEnv(&'static str),

    #[error("invalid value {value:?} for {key}")]
    InvalidEnv { key: &'static str, value: String },

    #[error("failed to launch {program}: {source}")]
    Spawn { program: String, source: io::Error },

    #[error("{0} did not expose its stdout")]
    MissingStdout(String),

    #[error("resolver returned no stream URL")]
    NoStreamUrl,

    #[error("resolver did not finish within {0:?}")]
    ResolverTimeout(Duration),

    #[error("voice connection failed: {0}")]
    Join(String),

    #[error("not connected to voice in guild {0}")]
    NotConnected(u64),

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Error {
    pub fn spawn(program: impl Into<String>, source: io::Error) -> Self {
        Self::Spawn {
            program: program.into(),
            source,
        }
    }
}
