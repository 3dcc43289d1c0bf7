pub mod assert;
pub mod capture;
pub mod context;
pub mod error;
pub mod executor;
pub mod expression;
pub mod hooks;
pub mod job;
pub mod registry;
pub mod report;
pub mod resolver;

use crate::app::context::{Context, Variables};
use crate::app::error::Result;
use crate::app::executor::CaseExecutor;
use crate::app::hooks::{run_setup, run_teardown, Lifecycle};
use crate::app::registry::FunctionRegistry;
use crate::app::report::{Aggregator, CaseRecord, SuiteReport};
use crate::app::resolver::{Resolver, Session};
use crate::configuration::constants::common::MAX_WORKERS;
use crate::configuration::manifest::Manifest;
use crate::connection::{HttpResult, Outgoing, SendMessage};
use crate::database::DatabaseManager;
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Cases executed in parallel.
    pub workers: usize,
    pub request_timeout: Duration,
    pub case_timeout: Option<Duration>,
    /// Names of the cases to run; empty runs all of them.
    pub cases: Vec<String>,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            workers: 1,
            request_timeout: Duration::from_secs(10),
            case_timeout: None,
            cases: vec![],
        }
    }
}

pub struct App<T>
where
    T: SendMessage<Outgoing, HttpResult> + Sync,
{
    manifest: Manifest,
    registry: Arc<FunctionRegistry>,
    sender: T,
    databases: DatabaseManager,
    options: RunOptions,
}

impl<T> App<T>
where
    T: SendMessage<Outgoing, HttpResult> + Sync,
{
    pub fn new(
        manifest: Manifest,
        registry: FunctionRegistry,
        sender: T,
        databases: DatabaseManager,
        options: RunOptions,
    ) -> Self {
        App {
            manifest,
            registry: Arc::new(registry),
            sender,
            databases,
            options,
        }
    }

    pub fn run(&self) -> SuiteReport {
        let config = &self.manifest.config;
        info!("Starting suite '{}'", config.name);
        info!("Registered {} functions", self.registry.len());
        let env = environment(&config.env);
        let selected = self.manifest.select(&self.options.cases);
        if selected.len() < self.manifest.cases.len() {
            info!(
                "Running {} of {} case(s)",
                selected.len(),
                self.manifest.cases.len()
            );
        }
        let mut aggregator = Aggregator::new(config.name.as_str(), selected.len());

        let mut context = Context::root();
        let setup = {
            let scope = self.databases.scope("suite setup");
            let resolver = Resolver::new(&self.registry, &env, &scope);
            let mut session = Session::new(&mut context);
            self.setup(&resolver, &mut session)
        };
        let suite_layer = context.freeze();

        match setup {
            Ok(()) => {
                let workers = self
                    .options
                    .workers
                    .max(1)
                    .min(MAX_WORKERS)
                    .min(selected.len().max(1));
                info!("Running {} case(s) on {} worker(s)", selected.len(), workers);
                let executor = CaseExecutor::new(
                    &self.registry,
                    &env,
                    &self.databases,
                    &self.sender,
                    config,
                    suite_layer.clone(),
                    &self.options,
                );
                let next = AtomicUsize::new(0);
                thread::scope(|s| {
                    for worker in 0..workers {
                        let (executor, aggregator, next, selected) =
                            (&executor, &aggregator, &next, &selected);
                        s.spawn(move || loop {
                            let index = next.fetch_add(1, Ordering::SeqCst);
                            match selected.get(index) {
                                Some(case) => {
                                    trace!("Worker {} picked case #{}", worker, index);
                                    aggregator.record(index, executor.execute(case));
                                }
                                None => break,
                            }
                        });
                    }
                });
            }
            Err(err) => {
                error!("Suite setup failed, skipping all cases: {}", err);
                aggregator.fail_setup(err.to_string());
                for (index, case) in selected.iter().enumerate() {
                    aggregator.record(index, CaseRecord::skipped(case.config.name.as_str()));
                }
            }
        }

        let scope = self.databases.scope("suite teardown");
        let resolver = Resolver::new(&self.registry, &env, &scope);
        let mut context = Context::new(suite_layer);
        let mut session = Session::new(&mut context);
        for err in run_teardown(&resolver, &mut session, config.teardown_hooks()) {
            aggregator.teardown_error(err.to_string());
        }

        let report = aggregator.finish();
        let cases = report.cases();
        info!(
            "Suite '{}' {}: {} passed, {} failed, {} error, {} skipped in {} ms",
            report.name,
            report.status,
            cases.passed,
            cases.failed,
            cases.error,
            cases.skipped,
            report.duration_ms
        );
        report
    }

    /// Suite variables and setup hooks, written into the suite layer.
    fn setup(&self, resolver: &Resolver, session: &mut Session) -> Result<()> {
        let config = &self.manifest.config;
        for (name, raw) in &config.variables {
            let value = resolver.resolve(session, raw)?;
            session.context.set(name.clone(), value);
        }
        run_setup(resolver, session, config.setup_hooks())
    }
}

/// Process environment overlaid with the suite's `config.env`.
fn environment(overrides: &Variables) -> Variables {
    let mut env: Variables = std::env::vars()
        .map(|(name, value)| (name, Value::String(value)))
        .collect();
    for (name, value) in overrides {
        env.insert(name.clone(), value.clone());
    }
    env
}
