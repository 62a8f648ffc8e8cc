use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("malformed request: {0}")]
    Decode(#[from] oriel_abi::DecodeError),

    #[error("failed to initialize the engine: {0}")]
    EngineInit(&'static str),

    #[error("failed to read {}: {source}", path.display())]
    SourceLoad {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to evaluate guest code: {cause}")]
    Compile {
        cause: String,
        stack: Option<String>,
    },

    #[error("session is broken: {0}")]
    SessionBroken(String),

    #[error("no function named `{0}` in the guest program")]
    NoSuchFunction(String),

    #[error("guest code failed: {cause}")]
    Execution {
        cause: String,
        stack: Option<String>,
    },

    #[error("response is malformed: {0}")]
    MalformedResponse(&'static str),

    #[error("handler returned a promise that can never settle")]
    StalledPromise,

    #[error("handler did not settle before the deadline")]
    Timeout,

    #[error("unexpected error: {0}")]
    Unexpected(&'static str),
}

pub type Result<T> = core::result::Result<T, Error>;

impl Error {
    /// Turns the pending engine exception into an [`Error::Execution`],
    /// clearing it in the process.
    pub fn from_js_catch(ctx: &rquickjs::Ctx<'_>) -> Self {
        let caught = ctx.catch();
        caught.as_exception().map_or_else(
            || Self::Execution {
                cause: format!("{caught:?}"),
                stack: None,
            },
            |exc| Self::Execution {
                cause: exc.message().unwrap_or_default(),
                stack: exc.stack(),
            },
        )
    }

    /// Reclassifies an evaluation failure as a compile-phase error.
    pub(crate) fn into_compile(self) -> Self {
        match self {
            Self::Execution { cause, stack } => Self::Compile { cause, stack },
            other => other,
        }
    }

    /// Whether the error leaves the guest program unusable for every later
    /// request, as opposed to failing this one call.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::EngineInit(_)
                | Self::SourceLoad { .. }
                | Self::Compile { .. }
                | Self::NoSuchFunction(_)
        )
    }

    #[must_use]
    pub fn stack(&self) -> Option<&str> {
        match self {
            Self::Compile { stack, .. } | Self::Execution { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}
