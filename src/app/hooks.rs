use crate::app::error::{Error, Result};
use crate::app::resolver::{Resolver, Session};
use crate::configuration::manifest::{CaseConfig, StepSpec, SuiteConfig};
use serde_json::Value;

/// Anything carrying setup and teardown hook expressions.
pub(crate) trait Lifecycle {
    fn setup_hooks(&self) -> &[String];
    fn teardown_hooks(&self) -> &[String];
}

impl Lifecycle for SuiteConfig {
    fn setup_hooks(&self) -> &[String] {
        &self.setup_hooks
    }

    fn teardown_hooks(&self) -> &[String] {
        &self.teardown_hooks
    }
}

impl Lifecycle for CaseConfig {
    fn setup_hooks(&self) -> &[String] {
        &self.setup_hooks
    }

    fn teardown_hooks(&self) -> &[String] {
        &self.teardown_hooks
    }
}

impl Lifecycle for StepSpec {
    fn setup_hooks(&self) -> &[String] {
        &self.setup_hooks
    }

    fn teardown_hooks(&self) -> &[String] {
        &self.teardown_hooks
    }
}

/// Evaluates one hook; a returned mapping is merged into the current layer.
pub fn run_hook(resolver: &Resolver, session: &mut Session, hook: &str) -> Result<()> {
    debug!("Running hook {}", hook);
    match resolver.resolve_str(session, hook)? {
        Value::Object(returned) => {
            trace!("Hook {} exported {} variable(s)", hook, returned.len());
            session.context.merge(returned);
        }
        Value::Null => {}
        other => trace!("Hook {} returned {}, nothing to merge", hook, other),
    }
    Ok(())
}

/// Runs hooks in order, stopping at the first error.
pub fn run_setup(resolver: &Resolver, session: &mut Session, hooks: &[String]) -> Result<()> {
    for hook in hooks {
        run_hook(resolver, session, hook)?;
    }
    Ok(())
}

/// Runs every hook whatever happens to the previous ones.
pub fn run_teardown(resolver: &Resolver, session: &mut Session, hooks: &[String]) -> Vec<Error> {
    let mut errors = vec![];
    for hook in hooks {
        if let Err(err) = run_hook(resolver, session, hook) {
            warn!("Teardown hook {} failed: {}", hook, err);
            errors.push(err);
        }
    }
    errors
}
