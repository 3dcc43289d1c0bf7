use crate::app::error::{Error, Result};
use crate::configuration::settings::DatabaseConfig;
use crate::database::{DatabaseConnector, DatabaseProxy, Row};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;

/// Opens SQLite files configured per database name and role.
#[derive(Debug, Default)]
pub struct SqliteConnector {
    databases: HashMap<String, DatabaseConfig>,
}

impl SqliteConnector {
    pub fn new(databases: HashMap<String, DatabaseConfig>) -> Self {
        Self { databases }
    }
}

impl DatabaseConnector for SqliteConnector {
    fn connect(&self, name: &str, role: Option<&str>) -> Result<Box<dyn DatabaseProxy>> {
        let config = self
            .databases
            .get(name)
            .ok_or_else(|| Error::Database(format!("database '{}' is not configured", name)))?;
        let path = match role.and_then(|r| config.roles.get(r)) {
            Some(path) => path,
            None => {
                if let Some(role) = role {
                    debug!(
                        "Role '{}' not configured for database '{}', using default path",
                        role, name
                    );
                }
                &config.path
            }
        };
        Ok(Box::new(SqliteProxy::open(path, config.read_only)?))
    }
}

pub struct SqliteProxy {
    connection: Connection,
}

impl SqliteProxy {
    /// Opens an existing database file; a missing file is an error.
    pub fn open(path: &Path, read_only: bool) -> Result<Self> {
        let access = if read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        let flags = access | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let connection = Connection::open_with_flags(path, flags).map_err(|err| {
            Error::Database(format!("Failed to open SQLite '{}': {}", path.display(), err))
        })?;
        Ok(Self { connection })
    }

    pub fn from_connection(connection: Connection) -> Self {
        Self { connection }
    }
}

impl DatabaseProxy for SqliteProxy {
    fn query(&self, sql: &str) -> Result<Vec<Row>> {
        trace!("SQL query: {}", sql);
        let mut statement = self.connection.prepare(sql)?;
        let columns: Vec<String> = statement
            .column_names()
            .into_iter()
            .map(str::to_owned)
            .collect();
        let rows = statement.query_map([], |row| {
            let mut mapped = Row::new();
            for (index, column) in columns.iter().enumerate() {
                mapped.insert(column.clone(), convert(row.get_ref(index)?));
            }
            Ok(mapped)
        })?;
        rows.collect::<std::result::Result<Vec<_>, _>>()
            .map_err(Error::from)
    }

    fn execute(&self, sql: &str) -> Result<usize> {
        trace!("SQL execute: {}", sql);
        Ok(self.connection.execute(sql, [])?)
    }
}

fn convert(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(int) => Value::from(int),
        ValueRef::Real(real) => Value::from(real),
        ValueRef::Text(text) => Value::String(String::from_utf8_lossy(text).into_owned()),
        ValueRef::Blob(blob) => Value::String(base64::encode(blob)),
    }
}
