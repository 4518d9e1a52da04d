use serde::{Deserialize, Serialize};

use crate::model::voter::VotingId;

/// Votes for one selection string of a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CandidateCount {
    pub candidate: String,
    pub votes: u64,
}

/// The tally of one active post, most votes first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostTally {
    pub post: String,
    pub counts: Vec<CandidateCount>,
}

impl PostTally {
    /// Votes recorded for `candidate`, matched exactly.
    pub fn votes_for(&self, candidate: &str) -> Option<u64> {
        self.counts
            .iter()
            .find(|c| c.candidate == candidate)
            .map(|c| c.votes)
    }

    /// Ballots that had a column for this post.
    pub fn total(&self) -> u64 {
        self.counts.iter().map(|c| c.votes).sum()
    }
}

/// Turnout figures. `remaining` is signed on purpose: more ballots than
/// credentials is an integrity problem that must stay visible.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub issued: usize,
    pub cast: usize,
    pub remaining: i64,
    pub warning: Option<String>,
}

impl Summary {
    pub fn new(issued: usize, cast: usize) -> Self {
        let remaining = issued as i64 - cast as i64;
        let warning = (remaining < 0).then(|| {
            format!("{cast} ballots recorded against {issued} issued credentials")
        });
        Self {
            issued,
            cast,
            remaining,
            warning,
        }
    }
}

/// Places where the credential and ballot tables disagree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IntegrityReport {
    /// Credentials marked used with no ballot: consumed without a confirmed vote.
    pub used_without_ballot: Vec<VotingId>,
    /// Ballots whose credential is still unused.
    pub ballot_without_used: Vec<VotingId>,
    /// Credentials with more than one ballot.
    pub duplicate_ballots: Vec<VotingId>,
    /// Ballots for credentials that were never issued.
    pub unknown_ballots: Vec<VotingId>,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        self.used_without_ballot.is_empty()
            && self.ballot_without_used.is_empty()
            && self.duplicate_ballots.is_empty()
            && self.unknown_ballots.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_remaining_is_kept_and_flagged() {
        let summary = Summary::new(2, 3);
        assert_eq!(summary.remaining, -1);
        assert!(summary.warning.is_some());

        let summary = Summary::new(5, 3);
        assert_eq!(summary.remaining, 2);
        assert_eq!(summary.warning, None);
    }
}
