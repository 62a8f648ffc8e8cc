//! Session lifecycle around [`Scope`]: lazy source loading, session reuse,
//! and the policy for what happens when a call fails.

use std::{
    cell::{OnceCell, RefCell},
    path::PathBuf,
    time::Duration,
};

use oriel_abi::{Request, Response};

use crate::{
    diagnostics,
    error::{Error, Result},
    scope::Scope,
};

/// Whether a session outlives the call it served.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    /// Every call gets a freshly compiled session.
    PerInvocation,
    /// One session serves call after call; guest globals persist.
    Cached,
}

/// What to do when an error leaves the guest program unusable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Answer this and every later call with a bare 500.
    Respond,
    /// Report and exit the process.
    Exit,
}

#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub source_path: PathBuf,
    pub entrypoint: String,
    pub session_mode: SessionMode,
    pub fatal_policy: FatalPolicy,
    /// Upper bound on driving and draining one call's jobs. `None` trusts
    /// the guest to terminate.
    pub drain_deadline: Option<Duration>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            source_path: PathBuf::from("index.js"),
            entrypoint: "handler".to_owned(),
            session_mode: SessionMode::PerInvocation,
            fatal_policy: FatalPolicy::Respond,
            drain_deadline: None,
        }
    }
}

enum Slot {
    Cold,
    Warm(Scope),
    Broken(String),
}

struct Failure {
    error: Error,
    rejections: Vec<String>,
}

impl Failure {
    const fn bare(error: Error) -> Self {
        Self {
            error,
            rejections: Vec::new(),
        }
    }
}

/// The single entry point hosts drive. Owns at most one live session.
pub struct RuntimeHandle {
    config: RuntimeConfig,
    source: OnceCell<String>,
    slot: RefCell<Slot>,
}

impl RuntimeHandle {
    #[must_use]
    pub const fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            source: OnceCell::new(),
            slot: RefCell::new(Slot::Cold),
        }
    }

    /// Builds a warm session ahead of the first call. Used by pre-init
    /// snapshotting so instances start with the guest already compiled.
    pub fn preload(&self) -> Result<()> {
        let scope = self.take_session()?;
        *self.slot.borrow_mut() = Slot::Warm(scope);
        Ok(())
    }

    /// Serves one request. Never fails: any error is reported to stderr
    /// and answered with a bare 500.
    pub fn handle(&self, request: &Request) -> Response {
        match self.run(request) {
            Ok(response) => response,
            Err(failure) => {
                diagnostics::report("handling request", &failure.error);
                diagnostics::report_rejections(&failure.rejections);
                if failure.error.is_fatal() {
                    *self.slot.borrow_mut() = Slot::Broken(failure.error.to_string());
                    if self.config.fatal_policy == FatalPolicy::Exit {
                        std::process::exit(1);
                    }
                }
                Response {
                    status: 500,
                    headers: None,
                    body: None,
                }
            }
        }
    }

    /// Like [`Self::handle`] but surfaces the error instead of mapping it
    /// to a response. Does not mark the session broken.
    pub fn try_handle(&self, request: &Request) -> Result<Response> {
        self.run(request).map_err(|failure| failure.error)
    }

    pub fn broken_cause(&self) -> Option<String> {
        match &*self.slot.borrow() {
            Slot::Broken(cause) => Some(cause.clone()),
            _ => None,
        }
    }

    fn run(&self, request: &Request) -> core::result::Result<Response, Failure> {
        if let Slot::Broken(cause) = &*self.slot.borrow() {
            return Err(Failure::bare(Error::SessionBroken(cause.clone())));
        }

        let scope = self.take_session().map_err(Failure::bare)?;
        match scope.invoke(&self.config.entrypoint, request) {
            Ok(response) => {
                if self.config.session_mode == SessionMode::Cached {
                    *self.slot.borrow_mut() = Slot::Warm(scope);
                }
                Ok(response)
            }
            Err(error) => {
                let rejections = scope.unhandled_rejections();
                // A stalled or timed-out session may still hold queued
                // jobs; it is torn down rather than reused.
                let keep = self.config.session_mode == SessionMode::Cached
                    && !error.is_fatal()
                    && !matches!(error, Error::StalledPromise | Error::Timeout);
                if keep {
                    *self.slot.borrow_mut() = Slot::Warm(scope);
                }
                Err(Failure { error, rejections })
            }
        }
    }

    /// Takes the warm session if one exists, otherwise compiles a new one.
    fn take_session(&self) -> Result<Scope> {
        if let Slot::Warm(scope) = self.slot.replace(Slot::Cold) {
            return Ok(scope);
        }
        let scope = Scope::new(self.config.drain_deadline)?;
        scope.compile(self.source()?)?;
        Ok(scope)
    }

    fn source(&self) -> Result<&str> {
        if self.source.get().is_none() {
            let code =
                std::fs::read_to_string(&self.config.source_path).map_err(|source| {
                    Error::SourceLoad {
                        path: self.config.source_path.clone(),
                        source,
                    }
                })?;
            let _ = self.source.set(code);
        }
        Ok(self.source.get().map(String::as_str).unwrap_or_default())
    }
}
