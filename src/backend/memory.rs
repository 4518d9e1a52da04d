use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::{Backend, BackendError, BackendResult, Table};

#[derive(Default)]
struct State {
    tables: HashMap<Table, Vec<Vec<String>>>,
    /// Number of upcoming calls that will be refused as rate limited.
    rate_limited_calls: u32,
    /// Failure to return from the next append, after which it is cleared.
    failing_append: Option<BackendError>,
    /// Whether the failing append should still land its rows.
    failing_append_lands: bool,
    calls: usize,
}

/// An in-process backend with the same semantics as the spreadsheet:
/// no transactions, no indexes, appends go after the last row.
///
/// Cloning gives another handle on the same tables. Faults can be injected to
/// exercise the retry and partial-failure paths.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<State>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // A poisoned lock only means another test thread panicked mid-call.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a table with raw rows, header included, replacing its contents.
    pub fn seed(&self, table: Table, rows: Vec<Vec<&str>>) {
        let rows = rows
            .into_iter()
            .map(|row| row.into_iter().map(ToString::to_string).collect())
            .collect();
        self.lock().tables.insert(table, rows);
    }

    /// Snapshot of a table's raw rows, header included.
    pub fn rows(&self, table: Table) -> Vec<Vec<String>> {
        self.lock().tables.get(&table).cloned().unwrap_or_default()
    }

    /// Refuse the next `calls` backend calls as rate limited.
    pub fn rate_limit_next(&self, calls: u32) {
        self.lock().rate_limited_calls = calls;
    }

    /// Fail the next append with `error`. If `lands` is true the rows are written
    /// anyway, as happens when a response is lost after the server committed.
    pub fn fail_next_append(&self, error: BackendError, lands: bool) {
        let mut state = self.lock();
        state.failing_append = Some(error);
        state.failing_append_lands = lands;
    }

    /// Total number of calls received, including refused ones.
    pub fn calls(&self) -> usize {
        self.lock().calls
    }

    fn admit(&self) -> BackendResult<MutexGuard<'_, State>> {
        let mut state = self.lock();
        state.calls += 1;
        if state.rate_limited_calls > 0 {
            state.rate_limited_calls -= 1;
            return Err(BackendError::RateLimited(
                "quota exceeded for write requests per minute".to_string(),
            ));
        }
        Ok(state)
    }
}

fn row_out_of_range(table: Table, row: usize) -> BackendError {
    BackendError::Rejected(format!("row {row} is outside {table}"))
}

#[rocket::async_trait]
impl Backend for MemoryBackend {
    async fn read_rows(&self, table: Table) -> BackendResult<Vec<Vec<String>>> {
        let state = self.admit()?;
        Ok(state.tables.get(&table).cloned().unwrap_or_default())
    }

    async fn append_rows(&self, table: Table, rows: Vec<Vec<String>>) -> BackendResult<()> {
        let mut state = self.admit()?;
        let failure = state.failing_append.take();
        let lands = state.failing_append_lands;
        if failure.is_none() || lands {
            state.tables.entry(table).or_default().extend(rows);
        }
        match failure {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn update_cell(
        &self,
        table: Table,
        row: usize,
        column: usize,
        value: String,
    ) -> BackendResult<()> {
        let mut state = self.admit()?;
        let cells = state
            .tables
            .get_mut(&table)
            .and_then(|rows| rows.get_mut(row))
            .ok_or_else(|| row_out_of_range(table, row))?;
        if cells.len() <= column {
            cells.resize(column + 1, String::new());
        }
        cells[column] = value;
        Ok(())
    }

    async fn delete_row(&self, table: Table, row: usize) -> BackendResult<()> {
        let mut state = self.admit()?;
        let rows = state.tables.entry(table).or_default();
        if row >= rows.len() {
            return Err(row_out_of_range(table, row));
        }
        rows.remove(row);
        Ok(())
    }

    async fn ensure_table(&self, table: Table, headers: Vec<String>) -> BackendResult<()> {
        let mut state = self.admit()?;
        let rows = state.tables.entry(table).or_default();
        if rows.is_empty() {
            rows.push(headers);
        }
        Ok(())
    }

    fn requests_per_minute(&self) -> u32 {
        // Effectively unthrottled.
        60_000
    }
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use super::*;

    impl MemoryBackend {
        /// Two active posts with two candidates each.
        pub fn seed_example(&self) {
            self.seed(
                Table::Posts,
                vec![
                    vec!["PostName", "Active"],
                    vec!["Head Boy", "YES"],
                    vec!["Head Girl", "YES"],
                ],
            );
            self.seed(
                Table::Candidates,
                vec![
                    vec!["Post", "CandidateID", "Name", "ImageURL", "Motto", "Active"],
                    vec!["Head Boy", "ARJUN001", "Arjun", "", "Lead by example", "10"],
                    vec!["Head Boy", "KABIR002", "Kabir", "", "", "9"],
                    vec!["Head Girl", "MEERA003", "Meera", "", "", ""],
                    vec!["Head Girl", "SANA0004", "Sana", "", "Every voice counts", ""],
                ],
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[rocket::async_test]
    async fn appends_after_header_and_updates_cells() {
        let backend = MemoryBackend::new();
        backend
            .ensure_table(Table::Posts, vec!["PostName".into(), "Active".into()])
            .await
            .unwrap();
        backend
            .append_rows(Table::Posts, vec![vec!["Head Boy".into()]])
            .await
            .unwrap();
        backend
            .update_cell(Table::Posts, 1, 1, "NO".into())
            .await
            .unwrap();

        let rows = backend.read_rows(Table::Posts).await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1], vec!["Head Boy".to_string(), "NO".to_string()]);
    }

    #[rocket::async_test]
    async fn ensure_table_keeps_existing_rows() {
        let backend = MemoryBackend::new();
        backend.seed(Table::Posts, vec![vec!["PostName", "Active"], vec!["X", "YES"]]);
        backend
            .ensure_table(Table::Posts, vec!["Other".into()])
            .await
            .unwrap();
        assert_eq!(backend.rows(Table::Posts).len(), 2);
        assert_eq!(backend.rows(Table::Posts)[0][0], "PostName");
    }

    #[rocket::async_test]
    async fn injected_rate_limit_is_consumed() {
        let backend = MemoryBackend::new();
        backend.rate_limit_next(1);
        assert!(matches!(
            backend.read_rows(Table::Voters).await,
            Err(BackendError::RateLimited(_))
        ));
        assert!(backend.read_rows(Table::Voters).await.is_ok());
        assert_eq!(backend.calls(), 2);
    }

    #[rocket::async_test]
    async fn out_of_range_delete_is_rejected() {
        let backend = MemoryBackend::new();
        assert!(matches!(
            backend.delete_row(Table::Candidates, 3).await,
            Err(BackendError::Rejected(_))
        ));
    }
}
