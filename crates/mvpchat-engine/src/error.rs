use std::io;
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("transport error: {0}")]
    Transport(String),
    #[error("provider error: {0}")]
    Provider(String),
    #[error("failed reading attachment {}", path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("display failed")]
    Sink(#[from] io::Error),
}

impl ChatError {
    pub(crate) fn transport(context: impl AsRef<str>, err: impl std::fmt::Display) -> Self {
        Self::Transport(format!("{}: {err}", context.as_ref()))
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_))
    }
}
