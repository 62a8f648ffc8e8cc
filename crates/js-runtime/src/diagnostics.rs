//! Failure reporting. Everything goes to stderr and is flushed eagerly;
//! when the guest traps or the host tears the instance down there is no
//! later chance to write.

use std::io::Write;

use crate::error::Error;

pub fn report(context: &str, error: &Error) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "Exception while {context}: {error}");
    if let Some(stack) = error.stack() {
        let _ = writeln!(stderr, "{stack}");
    }
    let _ = stderr.flush();
}

/// Flushes the rejection registry alongside a failure report.
pub fn report_rejections(reasons: &[String]) {
    if reasons.is_empty() {
        return;
    }
    let mut stderr = std::io::stderr().lock();
    for reason in reasons {
        let _ = writeln!(stderr, "Promise rejected but never handled: {reason}");
    }
    let _ = stderr.flush();
}

pub fn report_job_failure(error: &Error) {
    let mut stderr = std::io::stderr().lock();
    let _ = writeln!(stderr, "Exception while running a queued job: {error}");
    if let Some(stack) = error.stack() {
        let _ = writeln!(stderr, "{stack}");
    }
    let _ = stderr.flush();
}
