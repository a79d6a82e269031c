//! SQLite lookup database
//!
//! Holds the route table (route number to transit route id) and the stop
//! table (id, name, coordinates). Table and column names come from config,
//! so they are validated before being placed in SQL text.

use anyhow::{Context, Result};
use rusqlite::{Connection, OpenFlags, OptionalExtension};
use std::path::Path;
use thiserror::Error;
use tracing::{debug, info};

/// Rejected table or column name
#[derive(Debug, Error, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("identifier is empty")]
    Empty,
    #[error("identifier {0:?} may only contain ASCII letters, digits and '_'")]
    InvalidCharacter(String),
    #[error("identifier {0:?} must not start with a digit")]
    LeadingDigit(String),
}

/// Check that a name is safe to interpolate as a SQL identifier
pub fn validate_identifier(name: &str) -> Result<&str, IdentifierError> {
    let Some(first) = name.chars().next() else {
        return Err(IdentifierError::Empty);
    };
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return Err(IdentifierError::InvalidCharacter(name.to_string()));
    }
    if first.is_ascii_digit() {
        return Err(IdentifierError::LeadingDigit(name.to_string()));
    }
    Ok(name)
}

/// Database connection wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open an existing database read-only
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("Failed to open database {:?}", path))?;

        info!("Opened lookup database {:?}", path);
        Ok(Self { conn })
    }

    /// Wrap an already open connection
    pub fn from_connection(conn: Connection) -> Self {
        Self { conn }
    }

    /// First value of `return_column` in rows where `filter_column = value`
    ///
    /// Values are returned as text whatever their storage class.
    pub fn query(
        &self,
        table: &str,
        return_column: &str,
        filter_column: &str,
        value: &str,
    ) -> Result<Option<String>> {
        let sql = format!(
            "SELECT CAST({} AS TEXT) FROM {} WHERE {} = ?1 LIMIT 1",
            validate_identifier(return_column)?,
            validate_identifier(table)?,
            validate_identifier(filter_column)?,
        );
        debug!("{} [{}]", sql, value);

        let result = self
            .conn
            .query_row(&sql, [value], |row| row.get::<_, Option<String>>(0))
            .optional()
            .with_context(|| format!("Lookup in {} failed", table))?;

        Ok(result.flatten())
    }

    /// Every value of a column, in row order
    ///
    /// NULLs become empty strings so parallel columns stay aligned.
    pub fn query_all_column(&self, table: &str, column: &str) -> Result<Vec<String>> {
        let sql = format!(
            "SELECT CAST({} AS TEXT) FROM {} ORDER BY rowid",
            validate_identifier(column)?,
            validate_identifier(table)?,
        );
        debug!("{}", sql);

        let mut stmt = self
            .conn
            .prepare(&sql)
            .with_context(|| format!("Failed to prepare column read on {}", table))?;
        let values = stmt
            .query_map([], |row| row.get::<_, Option<String>>(0))?
            .map(|value| value.map(Option::unwrap_or_default))
            .collect::<rusqlite::Result<Vec<String>>>()
            .with_context(|| format!("Failed to read {}.{}", table, column))?;

        Ok(values)
    }
}
