//! Database access for hooks.
//!
//! The engine itself never builds SQL. Hook functions ask their
//! [`DatabaseScope`] for a proxy by database name and role; the scope opens
//! the connection on first use and releases everything it opened when it is
//! dropped, whichever way the owning suite phase or case ended.

pub mod sqlite;

use crate::app::context::Variables;
use crate::app::error::{Error, Result};
use derivative::*;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub type Row = Variables;

pub trait DatabaseProxy {
    fn query(&self, sql: &str) -> Result<Vec<Row>>;
    fn execute(&self, sql: &str) -> Result<usize>;
}

pub trait DatabaseConnector: Send + Sync {
    fn connect(&self, name: &str, role: Option<&str>) -> Result<Box<dyn DatabaseProxy>>;
}

#[derive(Derivative, Default)]
#[derivative(Debug)]
pub struct DatabaseManager {
    #[derivative(Debug = "ignore")]
    connector: Option<Box<dyn DatabaseConnector>>,
}

impl DatabaseManager {
    pub fn new<C: DatabaseConnector + 'static>(connector: C) -> Self {
        Self {
            connector: Some(Box::new(connector)),
        }
    }

    /// Manager without any configured database; every acquisition fails.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn scope<S: Into<String>>(&self, label: S) -> DatabaseScope<'_> {
        DatabaseScope {
            manager: self,
            label: label.into(),
            leases: RefCell::new(HashMap::new()),
        }
    }

    fn connect(&self, name: &str, role: Option<&str>) -> Result<Box<dyn DatabaseProxy>> {
        match &self.connector {
            Some(connector) => connector.connect(name, role),
            None => Err(Error::Database(format!(
                "no database connector configured for '{}'",
                name
            ))),
        }
    }
}

type LeaseKey = (String, Option<String>);

/// Connections acquired during one suite phase or one case.
pub struct DatabaseScope<'m> {
    manager: &'m DatabaseManager,
    label: String,
    leases: RefCell<HashMap<LeaseKey, Rc<dyn DatabaseProxy>>>,
}

impl<'m> DatabaseScope<'m> {
    pub fn get(&self, name: &str, role: Option<&str>) -> Result<Rc<dyn DatabaseProxy>> {
        let key = (name.to_owned(), role.map(str::to_owned));
        if let Some(proxy) = self.leases.borrow().get(&key) {
            return Ok(proxy.clone());
        }
        let proxy: Rc<dyn DatabaseProxy> = Rc::from(self.manager.connect(name, role)?);
        debug!(
            "Acquired database '{}' (role {:?}) for {}",
            name, role, self.label
        );
        self.leases.borrow_mut().insert(key, proxy.clone());
        Ok(proxy)
    }

    pub fn acquired(&self) -> usize {
        self.leases.borrow().len()
    }
}

impl<'m> Drop for DatabaseScope<'m> {
    fn drop(&mut self) {
        let released = self.leases.get_mut().drain().count();
        if released > 0 {
            debug!(
                "Released {} database connection(s) for {}",
                released, self.label
            );
        }
    }
}
