use chrono::{DateTime, SecondsFormat, Utc};
use data_encoding::BASE32_NOPAD;
use hmac::{Hmac, Mac};
use log::warn;
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::backend::table::{TIMESTAMP, VERIFICATION_CODE, VOTING_ID};
use crate::backend::{same_column, Row, SheetRecord, Table};
use crate::model::voter::VotingId;

pub type HmacSha256 = Hmac<Sha256>;

/// "None of the above": the selection recorded for a post the voter skipped.
pub const NOTA: &str = "NOTA";

/// Length of a verification code shown to the voter.
pub const CODE_LENGTH: usize = 8;

fn mac(secret: &[u8]) -> HmacSha256 {
    HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size")
}

/// A voter's choice for one post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    pub post: String,
    pub choice: String,
}

impl Selection {
    pub fn new(post: impl Into<String>, choice: impl Into<String>) -> Self {
        Self {
            post: post.into(),
            choice: choice.into(),
        }
    }
}

/// The post order in effect when a voter opened their ballot.
///
/// The layout travels with the ballot and decides which posts it covers,
/// so that catalog edits made while the voter is choosing cannot change
/// what they are voting on. It is sealed with the server's HMAC key so a client cannot submit
/// a layout it was never given.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotLayout {
    pub posts: Vec<String>,
    pub captured_at: DateTime<Utc>,
    pub seal: String,
}

impl BallotLayout {
    pub fn capture(posts: Vec<String>, captured_at: DateTime<Utc>, secret: &[u8]) -> Self {
        let seal = BASE32_NOPAD.encode(&Self::digest(&posts, &captured_at, secret).finalize().into_bytes());
        Self {
            posts,
            captured_at,
            seal,
        }
    }

    fn digest(posts: &[String], captured_at: &DateTime<Utc>, secret: &[u8]) -> HmacSha256 {
        let mut hmac = mac(secret);
        hmac.update(captured_at.to_rfc3339_opts(SecondsFormat::Micros, true).as_bytes());
        for post in posts {
            hmac.update(b"\n");
            hmac.update(post.as_bytes());
        }
        hmac
    }

    /// Whether this layout was issued by a server holding `secret`.
    pub fn verify(&self, secret: &[u8]) -> bool {
        match BASE32_NOPAD.decode(self.seal.as_bytes()) {
            Ok(seal) => Self::digest(&self.posts, &self.captured_at, secret)
                .verify_slice(&seal)
                .is_ok(),
            Err(_) => false,
        }
    }

    /// The `VOTES` header a table created for this layout starts with.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::with_capacity(self.posts.len() + 3);
        headers.push(VOTING_ID.to_string());
        headers.extend(self.posts.iter().cloned());
        headers.push(VERIFICATION_CODE.to_string());
        headers.push(TIMESTAMP.to_string());
        headers
    }

    /// Put `selections` in layout order, filling skipped posts with [`NOTA`].
    /// Selections for posts outside the layout are returned separately.
    pub fn arrange(&self, selections: &[Selection]) -> (Vec<Selection>, Vec<Selection>) {
        let arranged = self
            .posts
            .iter()
            .map(|post| {
                let choice = selections
                    .iter()
                    .find(|s| same_column(&s.post, post))
                    .map(|s| s.choice.trim())
                    .filter(|choice| !choice.is_empty())
                    .unwrap_or(NOTA);
                Selection::new(post.clone(), choice)
            })
            .collect();
        let unmatched = selections
            .iter()
            .filter(|s| !self.posts.iter().any(|post| same_column(&s.post, post)))
            .cloned()
            .collect();
        (arranged, unmatched)
    }
}

/// The code a voter can later use to check their ballot was recorded.
pub fn verification_code(
    secret: &[u8],
    voting_id: &VotingId,
    timestamp: &DateTime<Utc>,
    selections: &[Selection],
) -> String {
    let mut hmac = mac(secret);
    hmac.update(voting_id.as_str().as_bytes());
    hmac.update(b"\n");
    hmac.update(timestamp.to_rfc3339_opts(SecondsFormat::Secs, true).as_bytes());
    for selection in selections {
        hmac.update(b"\n");
        hmac.update(selection.post.as_bytes());
        hmac.update(b"=");
        hmac.update(selection.choice.as_bytes());
    }
    let mut code = BASE32_NOPAD.encode(&hmac.finalize().into_bytes());
    code.truncate(CODE_LENGTH);
    code
}

/// A row of the `VOTES` table. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotRecord {
    pub voting_id: VotingId,
    /// One entry per post the ballot was offered, in column order.
    pub selections: Vec<Selection>,
    pub verification_code: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl BallotRecord {
    /// The choice recorded for `post`, if the ballot has a column for it.
    pub fn choice_for(&self, post: &str) -> Option<&str> {
        self.selections
            .iter()
            .find(|s| same_column(&s.post, post))
            .map(|s| s.choice.as_str())
    }

    /// The header a fresh `VOTES` table would get for this ballot.
    pub fn headers(&self) -> Vec<String> {
        let mut headers = Vec::with_capacity(self.selections.len() + 3);
        headers.push(VOTING_ID.to_string());
        headers.extend(self.selections.iter().map(|s| s.post.clone()));
        headers.push(VERIFICATION_CODE.to_string());
        headers.push(TIMESTAMP.to_string());
        headers
    }

    /// Encode under an existing `VOTES` header. Each post column gets the
    /// choice for that post, or stays blank if the ballot did not offer it.
    pub fn to_row_under(&self, header: &[String]) -> Vec<String> {
        header
            .iter()
            .map(|column| {
                if same_column(column, VOTING_ID) {
                    self.voting_id.to_string()
                } else if same_column(column, VERIFICATION_CODE) {
                    self.verification_code.clone()
                } else if same_column(column, TIMESTAMP) {
                    self.timestamp
                        .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Secs, true))
                        .unwrap_or_default()
                } else {
                    self.choice_for(column).unwrap_or_default().to_string()
                }
            })
            .collect()
    }
}

/// Whether a `VOTES` header cell names a post rather than a fixed column.
fn is_post_column(column: &str) -> bool {
    !column.trim().is_empty()
        && ![VOTING_ID, VERIFICATION_CODE, TIMESTAMP]
            .iter()
            .any(|fixed| same_column(column, fixed))
}

impl SheetRecord for BallotRecord {
    const TABLE: Table = Table::Votes;

    /// Every header column other than the fixed ones is a post, wherever it
    /// sits. A blank cell means the ballot was not offered that post.
    fn from_row(row: &Row<'_>) -> Option<Self> {
        let header = row.header();
        let cells = row.cells();
        let voting_id = VotingId::from_stored(row.get(VOTING_ID))?;

        let selections = header
            .iter()
            .enumerate()
            .filter(|(_, column)| is_post_column(column))
            .filter_map(|(i, post)| {
                let choice = cells.get(i).map(|c| c.trim()).unwrap_or("");
                (!choice.is_empty()).then(|| Selection::new(post.trim(), choice))
            })
            .collect();

        if cells.len() > header.len() {
            warn!(
                "integrity: ballot {voting_id} has {} cells under a {}-column header",
                cells.len(),
                header.len()
            );
        }

        let timestamp = match row.get(TIMESTAMP) {
            "" => None,
            raw => match DateTime::parse_from_rfc3339(raw) {
                Ok(ts) => Some(ts.with_timezone(&Utc)),
                Err(_) => {
                    warn!("integrity: ballot {voting_id} has unreadable timestamp {raw:?}");
                    None
                }
            },
        };

        Some(Self {
            voting_id,
            selections,
            verification_code: row.get(VERIFICATION_CODE).to_string(),
            timestamp,
        })
    }

    fn to_row(&self) -> Vec<String> {
        self.to_row_under(&self.headers())
    }
}

/// What a voter gets back after a successful submission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub voting_id: VotingId,
    pub verification_code: String,
    pub timestamp: DateTime<Utc>,
}

/// Example data for tests.
#[cfg(test)]
mod examples {
    use chrono::TimeZone;

    use super::*;

    impl BallotLayout {
        pub fn example(secret: &[u8]) -> Self {
            Self::capture(
                vec!["Head Boy".into(), "Head Girl".into()],
                Utc.with_ymd_and_hms(2023, 4, 1, 9, 30, 0).unwrap(),
                secret,
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    const SECRET: &[u8] = b"test-secret";

    #[test]
    fn layouts_are_sealed() {
        let layout = BallotLayout::example(SECRET);
        assert!(layout.verify(SECRET));
        assert!(!layout.verify(b"other-secret"));

        let mut tampered = layout.clone();
        tampered.posts.reverse();
        assert!(!tampered.verify(SECRET));

        let mut garbled = layout;
        garbled.seal = "not base32!".into();
        assert!(!garbled.verify(SECRET));
    }

    #[test]
    fn arrange_follows_layout_order() {
        let layout = BallotLayout::example(SECRET);
        let (arranged, unmatched) = layout.arrange(&[
            Selection::new("head girl", "Meera"),
            Selection::new("Treasurer", "Dev"),
        ]);
        assert_eq!(
            arranged,
            vec![Selection::new("Head Boy", NOTA), Selection::new("Head Girl", "Meera")]
        );
        assert_eq!(unmatched, vec![Selection::new("Treasurer", "Dev")]);
    }

    #[test]
    fn verification_codes_depend_on_content() {
        let id: VotingId = "4821".parse().unwrap();
        let ts = Utc.with_ymd_and_hms(2023, 4, 1, 10, 0, 0).unwrap();
        let selections = vec![Selection::new("Head Boy", "Arjun")];

        let code = verification_code(SECRET, &id, &ts, &selections);
        assert_eq!(code.len(), CODE_LENGTH);
        assert_eq!(code, verification_code(SECRET, &id, &ts, &selections));
        assert_ne!(
            code,
            verification_code(SECRET, &id, &ts, &[Selection::new("Head Boy", "Kabir")])
        );
    }

    #[test]
    fn rows_follow_the_header() {
        let layout = BallotLayout::example(SECRET);
        let header = layout.headers();
        let (selections, _) = layout.arrange(&[Selection::new("Head Boy", "Arjun")]);
        let ballot = BallotRecord {
            voting_id: "4821".parse().unwrap(),
            selections,
            verification_code: "ABCDEFGH".into(),
            timestamp: Some(Utc.with_ymd_and_hms(2023, 4, 1, 10, 0, 0).unwrap()),
        };
        let cells = ballot.to_row();
        assert_eq!(cells, vec!["4821", "Arjun", NOTA, "ABCDEFGH", "2023-04-01T10:00:00Z"]);

        let decoded = BallotRecord::from_row(&Row::new(&header, &cells)).unwrap();
        assert_eq!(decoded, ballot);
        assert_eq!(decoded.choice_for("HEAD BOY"), Some("Arjun"));
    }

    #[test]
    fn legacy_rows_without_codes() {
        let header: Vec<String> = ["VotingID", "Head Boy", "Timestamp"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let cells: Vec<String> = ["0042", "Arjun", "2023-04-01T10:00:00+05:30"]
            .iter()
            .map(ToString::to_string)
            .collect();
        let ballot = BallotRecord::from_row(&Row::new(&header, &cells)).unwrap();
        assert_eq!(ballot.selections, vec![Selection::new("Head Boy", "Arjun")]);
        assert_eq!(ballot.verification_code, "");
        assert_eq!(
            ballot.timestamp,
            Some(Utc.with_ymd_and_hms(2023, 4, 1, 4, 30, 0).unwrap())
        );
    }

    #[test]
    fn rows_follow_an_existing_header() {
        // The header was fixed by an earlier layout and later grew a column.
        let header: Vec<String> = [
            "VotingID",
            "Head Boy",
            "Head Girl",
            "VerificationCode",
            "Timestamp",
            "Treasurer",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();
        let ballot = BallotRecord {
            voting_id: "2222".parse().unwrap(),
            selections: vec![Selection::new("treasurer", "Dev"), Selection::new("Head Girl", NOTA)],
            verification_code: "ABCDEFGH".into(),
            timestamp: Some(Utc.with_ymd_and_hms(2023, 4, 1, 10, 0, 0).unwrap()),
        };
        let cells = ballot.to_row_under(&header);
        assert_eq!(
            cells,
            vec!["2222", "", NOTA, "ABCDEFGH", "2023-04-01T10:00:00Z", "Dev"]
        );

        let decoded = BallotRecord::from_row(&Row::new(&header, &cells)).unwrap();
        assert_eq!(decoded.choice_for("Head Boy"), None);
        assert_eq!(decoded.choice_for("Head Girl"), Some(NOTA));
        assert_eq!(decoded.choice_for("Treasurer"), Some("Dev"));
        assert_eq!(decoded.verification_code, "ABCDEFGH");
        assert_eq!(decoded.timestamp, ballot.timestamp);
    }
}
