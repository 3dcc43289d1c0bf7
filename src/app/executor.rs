use crate::app::assert::validate;
use crate::app::capture::extract;
use crate::app::context::{Context, Level, Variables};
use crate::app::error::{Error, Result};
use crate::app::hooks::{run_setup, run_teardown, Lifecycle};
use crate::app::job::{render_deferred, render_partial, request_template, HttpJob};
use crate::app::registry::FunctionRegistry;
use crate::app::report::{CaseRecord, Status, StepRecord};
use crate::app::resolver::{stringify, Resolver, Session};
use crate::app::RunOptions;
use crate::configuration::manifest::{CaseSpec, StepSpec, SuiteConfig};
use crate::connection::{HttpResult, Outgoing, SendMessage};
use crate::database::DatabaseManager;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepState {
    Pending,
    Setup,
    Request,
    Teardown,
    Validated,
    Passed,
    Failed,
    Error,
    Skipped,
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl From<Status> for StepState {
    fn from(status: Status) -> Self {
        match status {
            Status::Passed => StepState::Passed,
            Status::Failed => StepState::Failed,
            Status::Error => StepState::Error,
            Status::Skipped => StepState::Skipped,
        }
    }
}

/// What went wrong so far in a step or case.
#[derive(Debug, Default)]
struct Outcome {
    failures: Vec<String>,
    errors: Vec<String>,
}

impl Outcome {
    fn absorb(&mut self, err: Error) {
        if err.is_failure() {
            warn!("{}", err);
            self.failures.push(err.to_string());
        } else {
            error!("{}", err);
            self.errors.push(err.to_string());
        }
    }

    fn status(&self) -> Option<Status> {
        if !self.errors.is_empty() {
            Some(Status::Error)
        } else if !self.failures.is_empty() {
            Some(Status::Failed)
        } else {
            None
        }
    }
}

/// Smallest of the configured request timeout and what is left of the case budget.
fn cap(timeout: Duration, budget: Option<Duration>) -> Duration {
    match budget {
        Some(left) if left < timeout => left,
        _ => timeout,
    }
}

pub struct StepExecutor<'a, T>
where
    T: SendMessage<Outgoing, HttpResult>,
{
    resolver: &'a Resolver<'a>,
    job: HttpJob<'a, T>,
    base_url: Option<&'a str>,
    request_timeout: Duration,
}

impl<'a, T> StepExecutor<'a, T>
where
    T: SendMessage<Outgoing, HttpResult>,
{
    pub fn new(
        resolver: &'a Resolver<'a>,
        sender: &'a T,
        base_url: Option<&'a str>,
        request_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            job: HttpJob::new(sender),
            base_url,
            request_timeout,
        }
    }

    /// Runs one step in its own scope layer.
    ///
    /// Returns the step record and the extracted variables meant for the case.
    pub fn execute(
        &self,
        context: &mut Context,
        step: &StepSpec,
        budget: Option<Duration>,
    ) -> (StepRecord, Variables) {
        let started_at = now!() as u64;
        let started = Instant::now();
        let mut state = StepState::Pending;
        let mut outcome = Outcome::default();
        let mut exports = Variables::new();
        let mut responded = false;

        context.push(Level::Step);
        let mut session = Session::new(context);

        self.transition(&mut state, StepState::Setup, step);
        match self.setup(&mut session, step) {
            Ok(()) => {
                self.transition(&mut state, StepState::Request, step);
                match self.dispatch(&mut session, step, budget) {
                    Ok(()) => {
                        responded = true;
                        match extract(self.resolver, &mut session, &step.extract) {
                            Ok(extracted) => exports = extracted,
                            Err(err) => outcome.absorb(err),
                        }
                    }
                    Err(err) => outcome.absorb(err),
                }
            }
            Err(err) => outcome.absorb(err),
        }

        self.transition(&mut state, StepState::Teardown, step);
        let teardown = run_teardown(self.resolver, &mut session, step.teardown_hooks());
        let teardown_errors: Vec<String> = teardown.iter().map(ToString::to_string).collect();
        let mut status = outcome.status();
        if status.is_none() && !teardown.is_empty() {
            status = Some(if teardown.iter().all(Error::is_failure) {
                Status::Failed
            } else {
                Status::Error
            });
        }

        if responded {
            self.transition(&mut state, StepState::Validated, step);
            let verdict = validate(self.resolver, &mut session, &step.validate);
            let passed = verdict.passed();
            outcome.failures.extend(verdict.failures);
            outcome
                .errors
                .extend(verdict.errors.iter().map(ToString::to_string));
            if !passed {
                status = Some(Status::aggregate(status.into_iter().chain(outcome.status())));
            }
        }

        let status = status.unwrap_or(Status::Passed);
        self.transition(&mut state, status.into(), step);
        drop(session);
        context.pop();

        let duration_ms = started.elapsed().as_millis() as u64;
        info!("Step '{}' {} in {} ms", step.name, status, duration_ms);
        let record = StepRecord {
            started: started_at,
            duration_ms,
            failures: outcome.failures,
            errors: outcome.errors,
            teardown_errors,
            ..StepRecord::new(step.name.as_str(), status)
        };
        (record, exports)
    }

    fn transition(&self, state: &mut StepState, next: StepState, step: &StepSpec) {
        trace!("Step '{}': {} -> {}", step.name, state, next);
        *state = next;
    }

    /// Step variables, request rendering and setup hooks.
    fn setup(&self, session: &mut Session, step: &StepSpec) -> Result<()> {
        for (name, raw) in &step.variables {
            let value = self.resolver.resolve(session, raw)?;
            session.context.set(name.clone(), value);
        }
        let raw = request_template(&step.request, self.base_url)?;
        let (rendered, deferred) = render_partial(self.resolver, session, &raw)?;
        session.request = Some(rendered);
        run_setup(self.resolver, session, step.setup_hooks())?;
        render_deferred(self.resolver, session, &deferred)
    }

    fn dispatch(&self, session: &mut Session, step: &StepSpec, budget: Option<Duration>) -> Result<()> {
        let request = session
            .request
            .as_ref()
            .ok_or_else(|| Error::Unexpected("request was not prepared".to_owned()))?;
        let timeout = cap(step.request.timeout.unwrap_or(self.request_timeout), budget);
        let response = self.job.execute(request, Some(timeout))?;
        debug!(
            "Step '{}' answered {} after {} ms",
            step.name,
            response.status(),
            response.execution_time().as_millis()
        );
        session.response = Some(response.into_variables());
        Ok(())
    }
}

/// Runs the cases of a suite on top of the frozen suite layer.
pub struct CaseExecutor<'a, T>
where
    T: SendMessage<Outgoing, HttpResult>,
{
    registry: &'a FunctionRegistry,
    env: &'a Variables,
    databases: &'a DatabaseManager,
    sender: &'a T,
    suite: &'a SuiteConfig,
    suite_layer: Arc<Variables>,
    options: &'a RunOptions,
}

impl<'a, T> CaseExecutor<'a, T>
where
    T: SendMessage<Outgoing, HttpResult>,
{
    pub fn new(
        registry: &'a FunctionRegistry,
        env: &'a Variables,
        databases: &'a DatabaseManager,
        sender: &'a T,
        suite: &'a SuiteConfig,
        suite_layer: Arc<Variables>,
        options: &'a RunOptions,
    ) -> Self {
        Self {
            registry,
            env,
            databases,
            sender,
            suite,
            suite_layer,
            options,
        }
    }

    pub fn execute(&self, case: &CaseSpec) -> CaseRecord {
        let name = &case.config.name;
        info!("Starting case '{}' with {} step(s)", name, case.steps.len());
        let mut record = CaseRecord::new(name.as_str());
        let scope = self.databases.scope(format!("case '{}'", name));
        let resolver = Resolver::new(self.registry, self.env, &scope);
        let mut context = Context::new(self.suite_layer.clone());
        context.push(Level::Case);

        let budget = case
            .config
            .timeout
            .or(self.suite.timeout)
            .or(self.options.case_timeout);
        let continue_on_failure = case
            .config
            .continue_on_failure
            .unwrap_or(self.suite.continue_on_failure);
        let started = Instant::now();

        let prepared = self.prepare(&resolver, &mut Session::new(&mut context), case);
        match prepared {
            Ok(base_url) => {
                let steps = StepExecutor::new(
                    &resolver,
                    self.sender,
                    base_url.as_deref(),
                    self.options.request_timeout,
                );
                let mut stopped = false;
                for step in &case.steps {
                    if stopped {
                        record.push(StepRecord::skipped(step.name.as_str()));
                        continue;
                    }
                    let remaining = match budget {
                        Some(budget) => match budget.checked_sub(started.elapsed()) {
                            Some(left) if left > Duration::from_millis(0) => Some(left),
                            _ => {
                                self.timed_out(&mut record, budget);
                                stopped = true;
                                record.push(StepRecord::skipped(step.name.as_str()));
                                continue;
                            }
                        },
                        None => None,
                    };
                    let (step_record, exports) = steps.execute(&mut context, step, remaining);
                    context.merge(exports);
                    let bad = step_record.status.is_bad();
                    record.push(step_record);
                    if let Some(budget) = budget {
                        if started.elapsed() >= budget {
                            self.timed_out(&mut record, budget);
                            stopped = true;
                            continue;
                        }
                    }
                    if bad && !continue_on_failure {
                        debug!("Case '{}' stops after failed step '{}'", name, step.name);
                        stopped = true;
                    }
                }
            }
            Err(err) => {
                let mut outcome = Outcome::default();
                outcome.absorb(err);
                record.failures = outcome.failures;
                record.error = outcome.errors.into_iter().next();
                for step in &case.steps {
                    record.push(StepRecord::skipped(step.name.as_str()));
                }
            }
        }

        let mut session = Session::new(&mut context);
        for err in run_teardown(&resolver, &mut session, case.config.teardown_hooks()) {
            if err.is_failure() {
                record.failures.push(err.to_string());
            } else {
                record.hook_errors.push(err.to_string());
            }
        }
        record.close();
        info!(
            "Case '{}' {} in {} ms",
            name, record.status, record.duration_ms
        );
        record
    }

    /// Case variables, base url and setup hooks.
    fn prepare(
        &self,
        resolver: &Resolver,
        session: &mut Session,
        case: &CaseSpec,
    ) -> Result<Option<String>> {
        for (name, raw) in &case.config.variables {
            let value = resolver.resolve(session, raw)?;
            session.context.set(name.clone(), value);
        }
        let base_url = match case.config.base_url.as_ref().or(self.suite.base_url.as_ref()) {
            Some(raw) => Some(stringify(&resolver.resolve_str(session, raw)?)),
            None => None,
        };
        run_setup(resolver, session, case.config.setup_hooks())?;
        Ok(base_url)
    }

    fn timed_out(&self, record: &mut CaseRecord, budget: Duration) {
        if record.error.is_none() {
            let err = Error::CaseTimeout(budget);
            error!("Case '{}': {}", record.name, err);
            record.error = Some(err.to_string());
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app::error::HookError;
    use crate::app::registry::{Function, Param};
    use crate::configuration::manifest::Manifest;
    use bytes::Bytes;
    use http::Response as HttpResponse;
    use serde_json::{json, Value};
    use std::sync::Mutex;

    /// Answers with a canned response per path and records what was sent.
    struct Stub {
        sent: Mutex<Vec<(String, Option<String>)>>,
        delay: Duration,
    }

    impl Stub {
        fn new() -> Self {
            Self {
                sent: Mutex::new(vec![]),
                delay: Duration::from_millis(0),
            }
        }

        fn sent(&self) -> Vec<(String, Option<String>)> {
            self.sent.lock().unwrap().clone()
        }
    }

    impl SendMessage<Outgoing, HttpResult> for Stub {
        fn send(&self, data: Outgoing) -> HttpResult {
            std::thread::sleep(self.delay);
            let request = data.request;
            let path = request.uri().path().to_owned();
            let auth = request
                .headers()
                .get("authorization")
                .and_then(|value| value.to_str().ok())
                .map(str::to_owned);
            self.sent.lock().unwrap().push((path.clone(), auth));
            let (status, body) = match path.as_str() {
                "/login" => (200, json!({"token": "t-1"})),
                "/orders" => (201, json!({"data": {"id": 42, "tags": ["new"]}})),
                "/down" => return Err(Error::Connection("refused".to_owned())),
                _ => (404, json!({"error": "not found"})),
            };
            Ok(HttpResponse::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Bytes::from(serde_json::to_vec(&body).unwrap()))
                .unwrap())
        }
    }

    fn registry() -> FunctionRegistry {
        let mut registry = FunctionRegistry::new();
        registry.register(Function::new(
            "set_token",
            vec![Param::required("request")],
            |mut call| {
                let request = call.request()?;
                if let Some(Value::Object(headers)) = request.get_mut("headers") {
                    headers.insert("Authorization".to_owned(), json!("Bearer hooked"));
                }
                Ok(json!({"hooked": true}))
            },
        ));
        registry.register(Function::new("deny", vec![], |_| {
            Err(HookError::assertion("denied"))
        }));
        registry.register(Function::new("explode", vec![], |_| {
            Err(HookError::other("boom"))
        }));
        registry.register(Function::new("make_header", vec![], |_| {
            Ok(json!({"auth": "Bearer late"}))
        }));
        registry
    }

    fn options() -> RunOptions {
        RunOptions {
            workers: 1,
            request_timeout: Duration::from_secs(1),
            case_timeout: None,
            cases: vec![],
        }
    }

    fn run_case(yaml: &str, stub: &Stub) -> CaseRecord {
        let manifest = Manifest::from_yaml(yaml).unwrap();
        let registry = registry();
        let env = Variables::new();
        let databases = DatabaseManager::disabled();
        let options = options();
        let mut suite_layer = Variables::new();
        suite_layer.insert("user".to_owned(), json!("alice"));
        let executor = CaseExecutor::new(
            &registry,
            &env,
            &databases,
            stub,
            &manifest.config,
            Arc::new(suite_layer),
            &options,
        );
        executor.execute(&manifest.cases[0])
    }

    #[test]
    fn test_extracted_values_flow_into_later_steps() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s, base_url: "http://api" }
cases:
  - config: { name: c }
    steps:
      - name: login
        request: { method: POST, path: /login }
        extract: { token: $.token }
        validate:
          - eq: [status_code, 200]
      - name: order
        request:
          method: POST
          path: /orders
          headers: { Authorization: Bearer $token }
        validate:
          - eq: [status_code, 201]
          - contains: [$.data.tags, new]
"#,
            &stub,
        );
        assert_eq!(record.status, Status::Passed);
        assert_eq!(record.steps.len(), 2);
        assert_eq!(stub.sent()[1], ("/orders".to_owned(), Some("Bearer t-1".to_owned())));
    }

    #[test]
    fn test_setup_hook_edits_pending_request_and_defers_rendering() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: hooked
        setup_hooks: ["${set_token($request)}"]
        request: { url: "http://api/orders", headers: {} }
        validate:
          - eq: [$hooked, true]
      - name: late
        setup_hooks: ["${make_header()}"]
        request: { url: "http://api/orders", headers: { Authorization: $auth } }
"#,
            &stub,
        );
        assert_eq!(record.status, Status::Passed);
        let sent = stub.sent();
        assert_eq!(sent[0].1, Some("Bearer hooked".to_owned()));
        assert_eq!(sent[1].1, Some("Bearer late".to_owned()));
    }

    #[test]
    fn test_failed_step_stops_case_and_skips_rest() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: wrong status
        request: { url: "http://api/orders" }
        validate:
          - eq: [status_code, 200]
          - eq: [$.data.id, 41]
      - name: never
        request: { url: "http://api/orders" }
"#,
            &stub,
        );
        assert_eq!(record.status, Status::Failed);
        assert_eq!(record.steps[0].status, Status::Failed);
        assert_eq!(record.steps[0].failures.len(), 2);
        assert_eq!(record.steps[1].status, Status::Skipped);
        assert_eq!(stub.sent().len(), 1);
    }

    #[test]
    fn test_continue_on_failure() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s, continue_on_failure: true }
cases:
  - config: { name: c }
    steps:
      - name: denied
        setup_hooks: ["${deny()}"]
        request: { url: "http://api/orders" }
      - name: runs anyway
        request: { url: "http://api/orders" }
"#,
            &stub,
        );
        assert_eq!(record.steps[0].status, Status::Failed);
        assert_eq!(record.steps[1].status, Status::Passed);
        assert_eq!(stub.sent().len(), 1);
    }

    #[test]
    fn test_connection_error_is_error_and_teardown_still_runs() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c, teardown_hooks: ["${explode()}"] }
    steps:
      - name: down
        request: { url: "http://api/down" }
        teardown_hooks: ["${deny()}"]
        validate:
          - eq: [status_code, 200]
"#,
            &stub,
        );
        let step = &record.steps[0];
        assert_eq!(step.status, Status::Error);
        assert!(step.errors[0].contains("refused"));
        assert_eq!(step.teardown_errors.len(), 1);
        assert!(step.failures.is_empty());
        assert_eq!(record.hook_errors.len(), 1);
        assert_eq!(record.status, Status::Error);
    }

    #[test]
    fn test_teardown_assertion_fails_passing_step() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: ok request
        request: { url: "http://api/orders" }
        teardown_hooks: ["${deny()}"]
"#,
            &stub,
        );
        assert_eq!(record.steps[0].status, Status::Failed);
        assert_eq!(record.steps[0].teardown_errors.len(), 1);
    }

    #[test]
    fn test_case_setup_error_skips_steps() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c, setup_hooks: ["${explode()}"] }
    steps:
      - name: a
        request: { url: "http://api/orders" }
"#,
            &stub,
        );
        assert_eq!(record.status, Status::Error);
        assert_eq!(record.steps[0].status, Status::Skipped);
        assert!(stub.sent().is_empty());
    }

    #[test]
    fn test_case_timeout() {
        let stub = Stub {
            sent: Mutex::new(vec![]),
            delay: Duration::from_millis(60),
        };
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c, timeout: 50ms }
    steps:
      - name: slow
        request: { url: "http://api/orders" }
      - name: skipped
        request: { url: "http://api/orders" }
"#,
            &stub,
        );
        assert_eq!(record.status, Status::Error);
        assert!(record.error.as_ref().unwrap().contains("time budget"));
        assert_eq!(record.steps[1].status, Status::Skipped);
        assert_eq!(stub.sent().len(), 1);
    }

    #[test]
    fn test_undefined_variable_in_validation_is_error() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: a
        request: { url: "http://api/orders" }
        validate:
          - eq: [status_code, $nowhere]
"#,
            &stub,
        );
        assert_eq!(record.steps[0].status, Status::Error);
    }

    #[test]
    fn test_every_step_error_is_recorded() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: a
        request: { url: "http://api/orders" }
        extract: { gone: $.data.missing }
        validate:
          - eq: [status_code, $first_missing]
          - eq: [status_code, $second_missing]
"#,
            &stub,
        );
        let step = &record.steps[0];
        assert_eq!(step.status, Status::Error);
        assert_eq!(step.errors.len(), 3);
        assert!(step.errors[1].contains("first_missing"));
        assert!(step.errors[2].contains("second_missing"));

        let serialized = serde_json::to_value(step).unwrap();
        assert_eq!(serialized["errors"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_setup_assertion_fails_step_without_dispatch() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: denied
        setup_hooks: ["${deny()}"]
        request: { url: "http://api/orders" }
        teardown_hooks: ["${explode()}"]
"#,
            &stub,
        );
        let step = &record.steps[0];
        assert_eq!(step.status, Status::Failed);
        assert_eq!(step.failures.len(), 1);
        assert!(step.errors.is_empty());
        assert_eq!(step.teardown_errors.len(), 1);
        assert!(step.teardown_errors[0].contains("boom"));
        assert!(stub.sent().is_empty());
    }

    #[test]
    fn test_unknown_function_in_step_hook_is_error() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: unknown
        setup_hooks: ["${nope()}"]
        request: { url: "http://api/orders" }
"#,
            &stub,
        );
        let step = &record.steps[0];
        assert_eq!(step.status, Status::Error);
        assert!(step.errors[0].contains("Unknown function 'nope'"));
        assert!(stub.sent().is_empty());
    }

    #[test]
    fn test_hook_variables_stay_in_their_step() {
        let stub = Stub::new();
        let record = run_case(
            r#"
config: { name: s }
cases:
  - config: { name: c }
    steps:
      - name: owner
        setup_hooks: ["${make_header()}"]
        request: { url: "http://api/orders" }
        validate:
          - eq: [$auth, "Bearer late"]
      - name: sibling
        request: { url: "http://api/orders" }
        validate:
          - eq: [$auth, "Bearer late"]
"#,
            &stub,
        );
        assert_eq!(record.steps[0].status, Status::Passed);
        assert_eq!(record.steps[1].status, Status::Error);
        assert!(record.steps[1].errors[0].contains("Undefined variable 'auth'"));
    }

    #[test]
    fn test_request_timeout_is_capped_by_budget() {
        assert_eq!(
            cap(Duration::from_secs(10), Some(Duration::from_secs(3))),
            Duration::from_secs(3)
        );
        assert_eq!(cap(Duration::from_secs(1), None), Duration::from_secs(1));
    }
}
