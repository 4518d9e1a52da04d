use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rand::Rng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backend::table::{CLASS, ROLL_NO, SECTION, USED, VOTING_ID};
use crate::backend::{Row, SheetRecord, Table};

/// Number of digits in a voting ID.
pub const ID_DIGITS: usize = 4;

/// Size of the voting ID space.
pub const ID_SPACE: u32 = 10_000;

/// A single-use voting credential: a 4-digit numeric string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VotingId(String);

#[derive(Debug, Error, PartialEq, Eq)]
#[error("Expected a 4-digit voting ID, got {0:?}")]
pub struct VotingIdError(String);

impl VotingId {
    /// A uniformly random ID. Uniqueness is the caller's problem.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        Self::from_index(rng.gen_range(0..ID_SPACE))
    }

    /// The ID at position `index` in the ID space, e.g. 42 is `"0042"`.
    pub fn from_index(index: u32) -> Self {
        Self(format!("{:0width$}", index % ID_SPACE, width = ID_DIGITS))
    }

    /// Decode a stored value. Spreadsheets tend to eat leading zeros, so short
    /// numeric values are padded back out; anything else is kept verbatim so
    /// that it still takes part in uniqueness checks.
    pub fn from_stored(value: &str) -> Option<Self> {
        let value = value.trim();
        if value.is_empty() {
            return None;
        }
        if value.len() < ID_DIGITS && value.chars().all(|c| c.is_ascii_digit()) {
            return Some(Self(format!("{:0>width$}", value, width = ID_DIGITS)));
        }
        Some(Self(value.to_string()))
    }

    /// Position in the ID space, if this is a well-formed ID.
    pub fn index(&self) -> Option<u32> {
        if self.0.len() == ID_DIGITS {
            self.0.parse().ok()
        } else {
            None
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for VotingId {
    type Err = VotingIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.len() == ID_DIGITS && s.chars().all(|c| c.is_ascii_digit()) {
            Ok(Self(s.to_string()))
        } else {
            Err(VotingIdError(s.to_string()))
        }
    }
}

impl TryFrom<String> for VotingId {
    type Error = VotingIdError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<VotingId> for String {
    fn from(id: VotingId) -> Self {
        id.0
    }
}

impl Display for VotingId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A roster slot: who a credential is issued to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVoter {
    pub class: String,
    pub section: String,
    pub roll_no: String,
}

impl NewVoter {
    pub fn new(class: impl Into<String>, section: impl Into<String>, roll_no: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            section: section.into(),
            roll_no: roll_no.into(),
        }
    }

    /// Number of slots [`NewVoter::roster`] would produce, without building them.
    pub fn roster_size(classes: &[String], sections: &[String], roll_limit: u32) -> u64 {
        (classes.len() as u64)
            .saturating_mul(sections.len() as u64)
            .saturating_mul(u64::from(roll_limit))
    }

    /// Every slot of a roster: each class, each section, rolls `1..=roll_limit`.
    pub fn roster(classes: &[String], sections: &[String], roll_limit: u32) -> Vec<Self> {
        let mut slots = Vec::new();
        for class in classes {
            for section in sections {
                for roll in 1..=roll_limit {
                    slots.push(Self::new(class.trim(), section.trim(), roll.to_string()));
                }
            }
        }
        slots
    }

    /// Whether this slot is the one described by `class`, `section` and `roll_no`.
    ///
    /// Sections match case-insensitively. Classes and roll numbers match
    /// numerically when both sides are numbers, so `"08"` is class `"8"`.
    pub fn is_slot(&self, class: &str, section: &str, roll_no: &str) -> bool {
        same_number(&self.class, class)
            && self.section.trim().eq_ignore_ascii_case(section.trim())
            && same_number(&self.roll_no, roll_no)
    }
}

fn same_number(a: &str, b: &str) -> bool {
    let (a, b) = (a.trim(), b.trim());
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a.eq_ignore_ascii_case(b),
    }
}

/// A row of the `VOTERS` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VoterRecord {
    pub voting_id: VotingId,
    #[serde(flatten)]
    pub slot: NewVoter,
    /// Monotonic: once set it is never cleared.
    #[serde(default)]
    pub used: bool,
}

impl VoterRecord {
    pub fn new(voting_id: VotingId, slot: NewVoter) -> Self {
        Self {
            voting_id,
            slot,
            used: false,
        }
    }
}

impl SheetRecord for VoterRecord {
    const TABLE: Table = Table::Voters;

    fn from_row(row: &Row<'_>) -> Option<Self> {
        Some(Self {
            voting_id: VotingId::from_stored(row.get(VOTING_ID))?,
            slot: NewVoter::new(row.get(CLASS), row.get(SECTION), row.get(ROLL_NO)),
            used: row.get(USED).eq_ignore_ascii_case("YES"),
        })
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.voting_id.to_string(),
            self.slot.class.clone(),
            self.slot.section.clone(),
            self.slot.roll_no.clone(),
            yes_no(self.used).to_string(),
        ]
    }
}

pub(crate) fn yes_no(flag: bool) -> &'static str {
    if flag {
        "YES"
    } else {
        "NO"
    }
}

/// Result of checking a credential before a ballot is shown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Validation {
    Eligible,
    NotFound,
    AlreadyUsed,
}

/// Result of the NO→YES transition on a credential.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MarkOutcome {
    Marked,
    NotFound,
    AlreadyUsed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AddOutcome {
    Added,
    AlreadyPresent,
}

/// Result of issuing a credential to a roster slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "outcome", content = "voter")]
pub enum Issuance {
    Issued(VoterRecord),
    /// The slot already held a credential; no second one was issued.
    AlreadyRegistered(VoterRecord),
}

impl Issuance {
    pub fn voter(&self) -> &VoterRecord {
        match self {
            Self::Issued(voter) | Self::AlreadyRegistered(voter) => voter,
        }
    }
}

/// What self-service recovery reveals about a roster slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub voting_id: VotingId,
    pub used: bool,
}

/// Outcome of a chunked batch insert. Every input ID lands in exactly one list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    /// Confirmed written.
    pub inserted: Vec<VotingId>,
    /// Already present (or repeated within the batch), not written.
    pub skipped: Vec<VotingId>,
    /// In a chunk the backend refused: not written.
    pub failed: Vec<VotingId>,
    /// In a chunk whose write outcome is unknown: may or may not have been written.
    pub unconfirmed: Vec<VotingId>,
    /// Never sent because an earlier chunk failed.
    pub not_attempted: Vec<VotingId>,
    /// Why the batch stopped early, if it did.
    pub error: Option<String>,
}

impl BatchReport {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Credentials drawn for the empty slots of a roster, not yet written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterPlan {
    /// Roster slots considered.
    pub slots: usize,
    /// Slots that already held a credential.
    pub already_registered: usize,
    pub voters: Vec<VoterRecord>,
}

/// Outcome of populating a roster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterReport {
    /// Roster slots considered.
    pub slots: usize,
    /// Slots that already held a credential.
    pub already_registered: usize,
    #[serde(flatten)]
    pub batch: BatchReport,
}


#[cfg(test)]
mod tests {
    use rand::rngs::mock::StepRng;

    use super::*;

    #[test]
    fn ids_are_four_digits() {
        assert_eq!(VotingId::from_index(42).as_str(), "0042");
        assert_eq!(VotingId::from_index(9999).as_str(), "9999");

        let mut rng = StepRng::new(0, 1);
        assert_eq!(VotingId::random(&mut rng).as_str().len(), ID_DIGITS);

        assert!("4821".parse::<VotingId>().is_ok());
        assert!("482".parse::<VotingId>().is_err());
        assert!("48a1".parse::<VotingId>().is_err());
        assert!("48210".parse::<VotingId>().is_err());
    }

    #[test]
    fn stored_ids_recover_lost_zeros() {
        assert_eq!(VotingId::from_stored(" 42 ").unwrap().as_str(), "0042");
        assert_eq!(VotingId::from_stored("4821").unwrap().index(), Some(4821));
        assert_eq!(VotingId::from_stored("legacy-7").unwrap().index(), None);
        assert_eq!(VotingId::from_stored("  "), None);
    }

    #[test]
    fn slots_match_loosely() {
        let slot = NewVoter::example();
        assert!(slot.is_slot("08", "a", " 12"));
        assert!(!slot.is_slot("8", "B", "12"));
        assert!(!slot.is_slot("8", "A", "13"));
    }

    #[test]
    fn roster_covers_every_slot() {
        let slots = NewVoter::roster(&["8".into(), "9".into()], &["A".into(), "B".into()], 3);
        assert_eq!(slots.len(), 12);
        assert_eq!(slots[0], NewVoter::new("8", "A", "1"));
        assert_eq!(slots[11], NewVoter::new("9", "B", "3"));
    }

    #[test]
    fn rows_decode_and_encode() {
        let header: Vec<String> = Table::Voters
            .default_headers()
            .iter()
            .map(ToString::to_string)
            .collect();
        let cells: Vec<String> = ["4821", "8", "A", "12", "yes"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let voter = VoterRecord::from_row(&Row::new(&header, &cells)).unwrap();
        assert!(voter.used);
        assert_eq!(voter.slot, NewVoter::example());
        assert_eq!(voter.to_row()[4], "YES");
        assert_eq!(VoterRecord::example().to_row()[4], "NO");
    }
}
