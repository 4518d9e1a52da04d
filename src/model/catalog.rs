use data_encoding::BASE32_NOPAD;
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::backend::table::{ACTIVE, CANDIDATE_ID, IMAGE_URL, MOTTO, NAME, POST, POST_NAME};
use crate::backend::{same_column, Row, SheetRecord, Table};
use crate::model::voter::yes_no;

/// Posts shown when the `POSTS` table is empty or unreachable. Changing this
/// list changes ballots, so bump [`DEFAULT_POSTS_VERSION`] with it.
pub const DEFAULT_POSTS: [&str; 4] = ["Head Boy", "Head Girl", "Sports Captain", "Cultural Secretary"];

pub const DEFAULT_POSTS_VERSION: u32 = 1;

/// An electable office.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub name: String,
    pub active: bool,
}

impl Post {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            active: true,
        }
    }

    pub fn defaults() -> Vec<Self> {
        DEFAULT_POSTS.iter().map(|name| Self::new(*name)).collect()
    }

    /// Post names compare case-insensitively.
    pub fn is_named(&self, name: &str) -> bool {
        same_column(&self.name, name)
    }
}

impl SheetRecord for Post {
    const TABLE: Table = Table::Posts;

    fn from_row(row: &Row<'_>) -> Option<Self> {
        let active = row.get(ACTIVE);
        Some(Self {
            name: row.required(POST_NAME)?.to_string(),
            // Blank means active; only an explicit value other than YES disables.
            active: active.is_empty() || active.eq_ignore_ascii_case("YES"),
        })
    }

    fn to_row(&self) -> Vec<String> {
        vec![self.name.clone(), yes_no(self.active).to_string()]
    }
}

/// How prominently a candidate is listed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Tier {
    Main,
    Deputy,
    #[default]
    None,
}

impl Tier {
    const MAIN_MARKER: &'static str = "10";
    const DEPUTY_MARKER: &'static str = "9";

    /// Decode the `Active` cell of a candidate row. Only the two numeric
    /// markers carry a tier; every other value, including a stray URL, is `None`.
    pub fn from_marker(marker: &str) -> Self {
        match marker.trim() {
            Self::MAIN_MARKER => Self::Main,
            Self::DEPUTY_MARKER => Self::Deputy,
            _ => Self::None,
        }
    }

    pub fn marker(&self) -> &'static str {
        match self {
            Self::Main => Self::MAIN_MARKER,
            Self::Deputy => Self::DEPUTY_MARKER,
            Self::None => "YES",
        }
    }
}

/// A candidate standing for a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub post: String,
    pub id: String,
    pub name: String,
    pub image_url: String,
    pub motto: String,
    pub tier: Tier,
}

impl Candidate {
    /// A fresh candidate ID: 40 random bits in base32.
    pub fn random_id<R: Rng + ?Sized>(rng: &mut R) -> String {
        let bytes: [u8; 5] = rng.gen();
        BASE32_NOPAD.encode(&bytes)
    }
}

impl SheetRecord for Candidate {
    const TABLE: Table = Table::Candidates;

    fn from_row(row: &Row<'_>) -> Option<Self> {
        Some(Self {
            post: row.required(POST)?.to_string(),
            id: row.get(CANDIDATE_ID).to_string(),
            name: row.required(NAME)?.to_string(),
            image_url: row.get(IMAGE_URL).to_string(),
            motto: row.get(MOTTO).to_string(),
            tier: Tier::from_marker(row.get(ACTIVE)),
        })
    }

    fn to_row(&self) -> Vec<String> {
        vec![
            self.post.clone(),
            self.id.clone(),
            self.name.clone(),
            self.image_url.clone(),
            self.motto.clone(),
            self.tier.marker().to_string(),
        ]
    }
}

/// A candidate as submitted by an administrator, before an ID is assigned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewCandidate {
    pub post: String,
    pub name: String,
    #[serde(default)]
    pub image_url: String,
    #[serde(default)]
    pub motto: String,
    #[serde(default)]
    pub tier: Tier,
}

impl NewCandidate {
    pub fn into_candidate(self, id: String) -> Candidate {
        Candidate {
            post: self.post.trim().to_string(),
            id,
            name: self.name.trim().to_string(),
            image_url: self.image_url.trim().to_string(),
            motto: self.motto.trim().to_string(),
            tier: self.tier,
        }
    }
}

/// The candidates of one post, in table order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostCandidates {
    pub post: String,
    pub candidates: Vec<Candidate>,
}

impl PostCandidates {
    /// Group candidates under the given posts, matching post names
    /// case-insensitively. Candidates of unknown posts are dropped.
    pub fn group(posts: &[Post], candidates: &[Candidate]) -> Vec<Self> {
        posts
            .iter()
            .map(|post| Self {
                post: post.name.clone(),
                candidates: candidates
                    .iter()
                    .filter(|c| post.is_named(&c.post))
                    .cloned()
                    .collect(),
            })
            .collect()
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(ToString::to_string).collect()
    }

    #[test]
    fn tier_markers() {
        assert_eq!(Tier::from_marker("10"), Tier::Main);
        assert_eq!(Tier::from_marker(" 9 "), Tier::Deputy);
        assert_eq!(Tier::from_marker("YES"), Tier::None);
        assert_eq!(Tier::from_marker(""), Tier::None);
        assert_eq!(Tier::from_marker("https://example.com/9.png"), Tier::None);
        assert_eq!(Tier::from_marker(Tier::Deputy.marker()), Tier::Deputy);
    }

    #[test]
    fn post_activity() {
        let header = strings(&["PostName", "Active"]);
        let decode = |cells: &[&str]| Post::from_row(&Row::new(&header, &strings(cells)));

        assert!(decode(&["Head Boy"]).unwrap().active);
        assert!(decode(&["Head Boy", "yes"]).unwrap().active);
        assert!(!decode(&["Head Boy", "NO"]).unwrap().active);
        assert!(!decode(&["Head Boy", "maybe"]).unwrap().active);
        assert_eq!(decode(&["", "YES"]), None);
    }

    #[test]
    fn candidates_keep_image_and_tier_apart() {
        let header = strings(Table::Candidates.default_headers());
        let cells = strings(&["Head Girl", "ABCD", "Meera", "https://img/10", "Lead", "9"]);
        let candidate = Candidate::from_row(&Row::new(&header, &cells)).unwrap();
        assert_eq!(candidate.image_url, "https://img/10");
        assert_eq!(candidate.tier, Tier::Deputy);
        assert_eq!(candidate.to_row(), cells);
    }

    #[test]
    fn grouping_is_case_insensitive() {
        let posts = vec![Post::new("Head Boy"), Post::new("Head Girl")];
        let mut arjun = NewCandidate::example().into_candidate("A".into());
        arjun.post = "HEAD BOY".into();
        let mut stray = NewCandidate::example2().into_candidate("B".into());
        stray.post = "Treasurer".into();

        let grouped = PostCandidates::group(&posts, &[arjun.clone(), stray]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped[0].candidates, vec![arjun]);
        assert!(grouped[1].candidates.is_empty());
    }

    #[test]
    fn candidate_ids_are_base32() {
        let id = Candidate::random_id(&mut rand::thread_rng());
        assert_eq!(id.len(), 8);
        assert!(BASE32_NOPAD.decode(id.as_bytes()).is_ok());
    }
}
