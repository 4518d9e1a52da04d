/// Header names compare trimmed and case-insensitively.
pub fn same_column(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

/// One data row viewed through its table's header.
///
/// The backend drops trailing empty cells, so a short row reads as empty
/// strings past its end.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    header: &'a [String],
    cells: &'a [String],
}

impl<'a> Row<'a> {
    pub fn new(header: &'a [String], cells: &'a [String]) -> Self {
        Self { header, cells }
    }

    /// The trimmed value in the named column, or `""` if the column is absent.
    pub fn get(&self, column: &str) -> &'a str {
        self.header
            .iter()
            .position(|h| same_column(h, column))
            .and_then(|i| self.cells.get(i))
            .map(|c| c.trim())
            .unwrap_or("")
    }

    /// Like [`Row::get`], but `None` for an empty value.
    pub fn required(&self, column: &str) -> Option<&'a str> {
        Some(self.get(column)).filter(|v| !v.is_empty())
    }

    pub fn header(&self) -> &'a [String] {
        self.header
    }

    pub fn cells(&self) -> &'a [String] {
        self.cells
    }
}
