//! The record backend: a handful of named tables of string cells with no
//! transactions, no indexes, and rate-limited access.
//!
//! Stores never talk to a [`Backend`] directly; they go through [`Tables`],
//! which wraps every call in the configured [`RetryPolicy`] and decodes rows
//! into typed records at the boundary.

use std::sync::Arc;

use log::warn;
use thiserror::Error;

use crate::error::{Error, Result};
use crate::retry::RetryPolicy;

mod memory;
mod row;
mod sheets;
pub mod table;
mod unconfigured;

pub use memory::MemoryBackend;
pub use row::{same_column, Row};
pub use sheets::{ServiceAccountKey, SheetsBackend};
pub use table::{SheetRecord, Table};
pub use unconfigured::UnconfiguredBackend;

/// Raw failures reported by a backend implementation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend is throttling us; safe to retry after a pause.
    #[error("rate limited: {0}")]
    RateLimited(String),
    /// Network failure or server error; a write may or may not have landed.
    #[error("transient failure: {0}")]
    Transient(String),
    /// Credentials, spreadsheet ID, or permissions are wrong.
    #[error("misconfigured: {0}")]
    Configuration(String),
    /// The backend understood the request and refused it.
    #[error("rejected: {0}")]
    Rejected(String),
}

pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// A table-oriented record backend.
///
/// Row indices are absolute and zero-based, so row 0 is the header row.
#[rocket::async_trait]
pub trait Backend: Send + Sync {
    /// Read every row of the table, header included. A missing or empty table
    /// reads as no rows.
    async fn read_rows(&self, table: Table) -> BackendResult<Vec<Vec<String>>>;

    /// Append rows after the last non-empty row, as a single request.
    async fn append_rows(&self, table: Table, rows: Vec<Vec<String>>) -> BackendResult<()>;

    /// Overwrite one cell.
    async fn update_cell(
        &self,
        table: Table,
        row: usize,
        column: usize,
        value: String,
    ) -> BackendResult<()>;

    /// Delete one row, shifting everything below it up by one.
    async fn delete_row(&self, table: Table, row: usize) -> BackendResult<()>;

    /// Create the table if it does not exist, and write `headers` as its first
    /// row if it is empty. Idempotent.
    async fn ensure_table(&self, table: Table, headers: Vec<String>) -> BackendResult<()>;

    /// Write-request ceiling the backend enforces per minute.
    fn requests_per_minute(&self) -> u32;
}

/// A record decoded from the backend, together with the absolute row it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Indexed<T> {
    pub row: usize,
    pub record: T,
}

/// Retrying, decoding handle on the backend shared by every store.
#[derive(Clone)]
pub struct Tables {
    backend: Arc<dyn Backend>,
    retry: RetryPolicy,
}

impl Tables {
    pub fn new(backend: Arc<dyn Backend>, retry: RetryPolicy) -> Self {
        Self { backend, retry }
    }

    pub fn requests_per_minute(&self) -> u32 {
        self.backend.requests_per_minute()
    }

    /// Read the raw rows of a table, header first.
    pub async fn read_raw(&self, table: Table) -> Result<Vec<Vec<String>>> {
        self.retry
            .run(table.name(), || self.backend.read_rows(table))
            .await
            .map_err(Error::into_read_error)
    }

    /// Read and decode every record of a table. Rows that cannot be decoded are
    /// skipped with a warning rather than failing the whole scan.
    pub async fn records<T: SheetRecord>(&self) -> Result<Vec<Indexed<T>>> {
        let (_, records) = self.records_with_header().await?;
        Ok(records)
    }

    /// Like [`Tables::records`], also returning the header row so that
    /// callers can locate columns for cell updates.
    pub async fn records_with_header<T: SheetRecord>(
        &self,
    ) -> Result<(Vec<String>, Vec<Indexed<T>>)> {
        let rows = self.read_raw(T::TABLE).await?;
        let records = decode_rows(T::TABLE, &rows);
        let header = rows.into_iter().next().unwrap_or_default();
        Ok((header, records))
    }

    pub async fn append<T: SheetRecord>(&self, records: &[T]) -> Result<()> {
        let rows: Vec<_> = records.iter().map(SheetRecord::to_row).collect();
        self.append_raw(T::TABLE, rows).await
    }

    pub async fn append_raw(&self, table: Table, rows: Vec<Vec<String>>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }
        self.retry
            .run(table.name(), || self.backend.append_rows(table, rows.clone()))
            .await
    }

    pub async fn update_cell(
        &self,
        table: Table,
        row: usize,
        column: usize,
        value: &str,
    ) -> Result<()> {
        self.retry
            .run(table.name(), || {
                self.backend
                    .update_cell(table, row, column, value.to_string())
            })
            .await
    }

    pub async fn delete_row(&self, table: Table, row: usize) -> Result<()> {
        self.retry
            .run(table.name(), || self.backend.delete_row(table, row))
            .await
    }

    pub async fn ensure_table(&self, table: Table, headers: &[String]) -> Result<()> {
        self.retry
            .run(table.name(), || {
                self.backend.ensure_table(table, headers.to_vec())
            })
            .await
    }

    /// Create every table with a fixed header row.
    pub async fn ensure_fixed_tables(&self) -> Result<()> {
        for table in Table::FIXED {
            let headers = table
                .default_headers()
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>();
            self.ensure_table(table, &headers).await?;
        }
        Ok(())
    }
}

/// Decode the data rows of a table against its header row.
fn decode_rows<T: SheetRecord>(table: Table, rows: &[Vec<String>]) -> Vec<Indexed<T>> {
    let Some((header, data)) = rows.split_first() else {
        return Vec::new();
    };
    data.iter()
        .enumerate()
        .filter(|(_, cells)| cells.iter().any(|c| !c.trim().is_empty()))
        .filter_map(|(i, cells)| {
            let row = i + 1;
            match T::from_row(&Row::new(header, cells)) {
                Some(record) => Some(Indexed { row, record }),
                None => {
                    warn!("Skipping undecodable row {row} of {}", table.name());
                    None
                }
            }
        })
        .collect()
}
