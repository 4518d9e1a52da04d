use super::{Backend, BackendError, BackendResult, Table};

/// Stand-in installed when the real backend cannot be configured at launch.
/// Every call fails with [`BackendError::Configuration`], so callers get a
/// typed failure instead of the server refusing to start.
#[derive(Debug, Clone)]
pub struct UnconfiguredBackend {
    reason: String,
}

impl UnconfiguredBackend {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> BackendResult<T> {
        Err(BackendError::Configuration(self.reason.clone()))
    }
}

#[rocket::async_trait]
impl Backend for UnconfiguredBackend {
    async fn read_rows(&self, _table: Table) -> BackendResult<Vec<Vec<String>>> {
        self.fail()
    }

    async fn append_rows(&self, _table: Table, _rows: Vec<Vec<String>>) -> BackendResult<()> {
        self.fail()
    }

    async fn update_cell(
        &self,
        _table: Table,
        _row: usize,
        _column: usize,
        _value: String,
    ) -> BackendResult<()> {
        self.fail()
    }

    async fn delete_row(&self, _table: Table, _row: usize) -> BackendResult<()> {
        self.fail()
    }

    async fn ensure_table(&self, _table: Table, _headers: Vec<String>) -> BackendResult<()> {
        self.fail()
    }

    fn requests_per_minute(&self) -> u32 {
        60
    }
}
