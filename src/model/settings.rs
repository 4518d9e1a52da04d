use crate::backend::table::{KEY, VALUE};
use crate::backend::{Row, SheetRecord, Table};

/// Key of the election-paused flag in `SETTINGS`.
pub const PAUSED: &str = "ElectionPaused";

/// A row of the `SETTINGS` table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setting {
    pub key: String,
    pub value: String,
}

impl Setting {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

impl SheetRecord for Setting {
    const TABLE: Table = Table::Settings;

    fn from_row(row: &Row<'_>) -> Option<Self> {
        Some(Self::new(row.required(KEY)?, row.get(VALUE)))
    }

    fn to_row(&self) -> Vec<String> {
        vec![self.key.clone(), self.value.clone()]
    }
}
