use std::time::{Duration, Instant};

use oriel_abi::{Request, Response};
use rquickjs::{Context, Persistent, Runtime, Value, promise::PromiseState};

use crate::{
    bridge, builtins, diagnostics,
    error::{Error, Result},
};

/// One engine instance with guest code loaded into it.
///
/// A scope is single-threaded and serves one call at a time. Whether it
/// lives for one invocation or many is the driver's decision.
pub struct Scope {
    runtime: Runtime,
    context: Context,
    drain_deadline: Option<Duration>,
}

impl Scope {
    pub fn new(drain_deadline: Option<Duration>) -> Result<Self> {
        let runtime = Runtime::new().map_err(|_| Error::EngineInit("failed to create runtime"))?;
        runtime.set_max_stack_size(2 * 1024 * 1024); // 2MB stack

        let context =
            Context::full(&runtime).map_err(|_| Error::EngineInit("failed to create context"))?;
        context.with(|ctx| builtins::install(&ctx))?;

        Ok(Self {
            runtime,
            context,
            drain_deadline,
        })
    }

    /// Evaluates guest source and runs its top-level jobs to quiescence.
    pub fn compile(&self, source: &str) -> Result<()> {
        self.context.with(|ctx| {
            ctx.eval::<(), _>(source)
                .map_err(|_| Error::from_js_catch(&ctx).into_compile())
        })?;
        self.drain(Instant::now()).map_err(Error::into_compile)
    }

    /// Calls the named global function with the request and extracts its
    /// response. A returned promise is driven to settlement first; the job
    /// queue is drained only after the handler succeeds.
    pub fn invoke(&self, name: &str, request: &Request) -> Result<Response> {
        let start = Instant::now();

        // The result crosses `context.with` boundaries because jobs are
        // executed through the runtime, which cannot be re-entered while a
        // context is held.
        let (stashed, is_promise) = self.context.with(|ctx| {
            let target: Value<'_> = ctx
                .globals()
                .get(name)
                .map_err(|_| Error::from_js_catch(&ctx))?;
            if target.is_undefined() || target.is_null() {
                return Err(Error::NoSuchFunction(name.to_owned()));
            }
            let func = target
                .as_function()
                .ok_or_else(|| Error::NoSuchFunction(name.to_owned()))?;

            let js_request = bridge::request_to_js(&ctx, request)?;
            let result: Value<'_> = func
                .call((js_request,))
                .map_err(|_| Error::from_js_catch(&ctx))?;

            let is_promise = result.is_promise();
            if is_promise {
                bridge::observe(&ctx, &result)?;
            }
            Ok((Persistent::save(&ctx, result), is_promise))
        })?;

        if is_promise {
            self.drive_promise(&stashed, start)?;
        }
        self.drain(start)?;

        self.context.with(|ctx| {
            let result = stashed
                .restore(&ctx)
                .map_err(|_| Error::Unexpected("result belongs to another runtime"))?;
            let settled = if let Some(promise) = result.as_promise() {
                match promise.result::<Value<'_>>() {
                    Some(Ok(value)) => value,
                    Some(Err(_)) => return Err(Error::from_js_catch(&ctx)),
                    None => return Err(Error::Unexpected("promise still pending after drive")),
                }
            } else {
                result
            };
            bridge::response_from_js(&ctx, &settled)
        })
    }

    /// Reasons of rejections nothing ever handled, cleared on read.
    pub fn unhandled_rejections(&self) -> Vec<String> {
        self.context.with(|ctx| {
            ctx.eval::<Vec<String>, _>("globalThis.__oriel_sys.drainRejections()")
                .unwrap_or_else(|_| {
                    let _ = ctx.catch();
                    Vec::new()
                })
        })
    }

    fn expired(&self, start: Instant) -> bool {
        self.drain_deadline
            .is_some_and(|limit| start.elapsed() >= limit)
    }

    /// Runs one queued job. `Ok(false)` means the queue is empty; a job
    /// that throws is reported with its exception and does not stop
    /// execution of the jobs behind it.
    fn run_one_job(&self) -> bool {
        match self.runtime.execute_pending_job() {
            Ok(ran) => ran,
            Err(exception) => {
                let error = exception.0.with(|ctx| Error::from_js_catch(&ctx));
                diagnostics::report_job_failure(&error);
                true
            }
        }
    }

    fn drive_promise(&self, stashed: &Persistent<Value<'static>>, start: Instant) -> Result<()> {
        loop {
            let state = self.context.with(|ctx| {
                let value = stashed
                    .clone()
                    .restore(&ctx)
                    .map_err(|_| Error::Unexpected("result belongs to another runtime"))?;
                let promise = value
                    .as_promise()
                    .ok_or(Error::Unexpected("expected promise"))?;
                if promise.state() == PromiseState::Rejected {
                    // Moves the rejection value into the pending exception.
                    let _ = promise.result::<Value<'_>>();
                    return Err(Error::from_js_catch(&ctx));
                }
                Ok(promise.state())
            })?;

            if state == PromiseState::Resolved {
                return Ok(());
            }

            if self.expired(start) {
                return Err(Error::Timeout);
            }

            if !self.run_one_job() {
                // Queue empty and the promise still pending: nothing left
                // that could ever settle it.
                return Err(Error::StalledPromise);
            }
        }
    }

    /// Runs queued jobs until none remain, best-effort.
    fn drain(&self, start: Instant) -> Result<()> {
        loop {
            if self.expired(start) {
                return Err(Error::Timeout);
            }
            if !self.run_one_job() {
                return Ok(());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use oriel_abi::{Method, Request};

    use super::*;

    fn get(uri: &str) -> Request {
        Request {
            method: Method::Get,
            uri: uri.to_owned(),
            headers: Vec::new(),
            params: None,
            body: None,
        }
    }

    fn scope_with(source: &str) -> Scope {
        let scope = Scope::new(None).unwrap();
        scope.compile(source).unwrap();
        scope
    }

    #[test]
    fn plain_object_response() {
        let scope = scope_with(
            r#"function handler(request) {
                return { status: 200, headers: null, body: "ok: " + request.uri };
            }"#,
        );
        let response = scope.invoke("handler", &get("/ping")).unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.headers, None);
        assert_eq!(response.body.as_deref(), Some(b"ok: /ping".as_slice()));
    }

    #[test]
    fn promise_response_is_driven() {
        let scope = scope_with(
            r#"function handler() {
                return Promise.resolve().then(() => ({ status: 204 }));
            }"#,
        );
        let response = scope.invoke("handler", &get("/")).unwrap();
        assert_eq!(response.status, 204);
        assert_eq!(response.body, None);
    }

    #[test]
    fn rejection_becomes_execution_error() {
        let scope = scope_with(
            r#"function handler() {
                return new Promise((resolve, reject) => reject(new Error("nope")));
            }"#,
        );
        let err = scope.invoke("handler", &get("/")).unwrap_err();
        assert!(matches!(err, Error::Execution { .. }));
        // The driven promise was observed, so it does not linger in the
        // rejection registry.
        assert!(scope.unhandled_rejections().is_empty());
    }

    #[test]
    fn stalled_promise_is_detected() {
        let scope = scope_with(
            r#"function handler() {
                return new Promise(() => {});
            }"#,
        );
        let err = scope.invoke("handler", &get("/")).unwrap_err();
        assert!(matches!(err, Error::StalledPromise));
    }

    #[test]
    fn missing_handler_is_reported_by_name() {
        let scope = scope_with("var unrelated = 1;");
        let err = scope.invoke("handler", &get("/")).unwrap_err();
        assert!(matches!(err, Error::NoSuchFunction(name) if name == "handler"));
    }

    #[test]
    fn syntax_error_is_a_compile_error() {
        let scope = Scope::new(None).unwrap();
        let err = scope.compile("function handler( {").unwrap_err();
        assert!(matches!(err, Error::Compile { .. }));
    }

    #[test]
    fn queue_is_drained_after_the_handler_settles() {
        let scope = scope_with(
            r#"globalThis.done = 0;
            function handler() {
                Promise.resolve()
                    .then(() => { globalThis.done += 1; })
                    .then(() => { globalThis.done += 1; })
                    .then(() => { globalThis.done += 1; });
                return { status: 200 };
            }
            function doneCount() {
                return { status: globalThis.done };
            }"#,
        );
        scope.invoke("handler", &get("/")).unwrap();
        let after = scope.invoke("doneCount", &get("/")).unwrap();
        assert_eq!(after.status, 3);
    }

    #[test]
    fn failing_job_does_not_stop_the_jobs_behind_it() {
        let scope = scope_with(
            r#"globalThis.laterRan = false;
            function handler() {
                Promise.resolve().then(() => { throw new Error("lost in a job"); });
                Promise.resolve().then(() => { globalThis.laterRan = true; });
                return { status: 200 };
            }
            function checkLater() {
                return { status: globalThis.laterRan ? 201 : 501 };
            }"#,
        );
        // The throwing job fails its own promise, not the call.
        let response = scope.invoke("handler", &get("/")).unwrap();
        assert_eq!(response.status, 200);

        // The failure is preserved with its message, not swallowed.
        let reasons = scope.unhandled_rejections();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("lost in a job"));

        let after = scope.invoke("checkLater", &get("/")).unwrap();
        assert_eq!(after.status, 201);
    }

    #[test]
    fn deadline_interrupts_a_job_storm() {
        let scope = Scope::new(Some(Duration::from_millis(100))).unwrap();
        scope
            .compile(
                r#"function spin() { Promise.resolve().then(spin); }
                function handler() {
                    spin();
                    return { status: 200 };
                }"#,
            )
            .unwrap();
        let err = scope.invoke("handler", &get("/")).unwrap_err();
        assert!(matches!(err, Error::Timeout));
    }

    #[test]
    fn unhandled_rejection_is_recorded_once() {
        let scope = scope_with(
            r#"function handler() {
                new Promise((resolve, reject) => reject(new Error("lost")));
                return { status: 200 };
            }"#,
        );
        scope.invoke("handler", &get("/")).unwrap();
        let reasons = scope.unhandled_rejections();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("lost"));
        // Drained on read.
        assert!(scope.unhandled_rejections().is_empty());
    }

    #[test]
    fn handled_rejection_is_not_recorded() {
        let scope = scope_with(
            r#"function handler() {
                new Promise((resolve, reject) => reject(new Error("caught")))
                    .catch(() => {});
                return { status: 200 };
            }"#,
        );
        scope.invoke("handler", &get("/")).unwrap();
        assert!(scope.unhandled_rejections().is_empty());
    }
}
