use std::fmt::{Display, Formatter};

use super::Row;

/// The named tables of the backend. Column order is authoritative.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Table {
    Voters,
    Votes,
    Candidates,
    Posts,
    Settings,
}

pub const VOTING_ID: &str = "VotingID";
pub const CLASS: &str = "Class";
pub const SECTION: &str = "Section";
pub const ROLL_NO: &str = "RollNo";
pub const USED: &str = "Used";
pub const VERIFICATION_CODE: &str = "VerificationCode";
pub const TIMESTAMP: &str = "Timestamp";
pub const POST: &str = "Post";
pub const CANDIDATE_ID: &str = "CandidateID";
pub const NAME: &str = "Name";
pub const IMAGE_URL: &str = "ImageURL";
pub const MOTTO: &str = "Motto";
pub const ACTIVE: &str = "Active";
pub const POST_NAME: &str = "PostName";
pub const KEY: &str = "Key";
pub const VALUE: &str = "Value";

impl Table {
    /// Tables whose header row does not depend on the catalog.
    pub const FIXED: [Table; 4] = [Table::Voters, Table::Candidates, Table::Posts, Table::Settings];

    pub fn name(&self) -> &'static str {
        match self {
            Self::Voters => "VOTERS",
            Self::Votes => "VOTES",
            Self::Candidates => "CANDIDATES",
            Self::Posts => "POSTS",
            Self::Settings => "SETTINGS",
        }
    }

    /// The header row a freshly created table receives. `VOTES` has one
    /// column per post, so only its fixed columns are listed here.
    pub fn default_headers(&self) -> &'static [&'static str] {
        match self {
            Self::Voters => &[VOTING_ID, CLASS, SECTION, ROLL_NO, USED],
            Self::Votes => &[VOTING_ID, VERIFICATION_CODE, TIMESTAMP],
            Self::Candidates => &[POST, CANDIDATE_ID, NAME, IMAGE_URL, MOTTO, ACTIVE],
            Self::Posts => &[POST_NAME, ACTIVE],
            Self::Settings => &[KEY, VALUE],
        }
    }

    /// Zero-based position of a fixed column.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.default_headers()
            .iter()
            .position(|h| h.eq_ignore_ascii_case(name))
    }
}

impl Display for Table {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A typed record that lives in one backend table.
pub trait SheetRecord: Sized {
    /// The table holding this record type.
    const TABLE: Table;

    /// Decode a data row. `None` means the row is unusable.
    fn from_row(row: &Row<'_>) -> Option<Self>;

    /// Encode as cells in the table's column order.
    fn to_row(&self) -> Vec<String>;
}
