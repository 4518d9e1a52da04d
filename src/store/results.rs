use std::collections::{BTreeMap, HashMap};

use log::warn;

use crate::backend::same_column;
use crate::error::Result;
use crate::model::{CandidateCount, IntegrityReport, PostTally, Summary, VotingId};

use super::{BallotStore, CredentialStore, PostCatalog};

/// Read-only views across the credential, catalog and ballot stores.
#[derive(Clone)]
pub struct ResultsAggregator {
    credentials: CredentialStore,
    catalog: PostCatalog,
    ballots: BallotStore,
}

impl ResultsAggregator {
    pub fn new(credentials: CredentialStore, catalog: PostCatalog, ballots: BallotStore) -> Self {
        Self {
            credentials,
            catalog,
            ballots,
        }
    }

    /// Per active post, the votes for every selection string seen on a ballot,
    /// plus every known candidate of that post at zero if nobody picked them.
    pub async fn tally(&self) -> Result<Vec<PostTally>> {
        let posts = self.catalog.list_posts().await;
        let candidates = self.catalog.candidates().await?;
        let ballots = self.ballots.all().await?;

        let tallies = posts
            .iter()
            .map(|post| {
                let mut counts: BTreeMap<&str, u64> = BTreeMap::new();
                for choice in ballots.iter().filter_map(|b| b.choice_for(&post.name)) {
                    *counts.entry(choice).or_default() += 1;
                }
                for candidate in candidates.iter().filter(|c| post.is_named(&c.post)) {
                    if !counts.keys().any(|seen| same_column(seen, &candidate.name)) {
                        counts.insert(candidate.name.as_str(), 0);
                    }
                }

                let mut counts: Vec<CandidateCount> = counts
                    .into_iter()
                    .map(|(candidate, votes)| CandidateCount {
                        candidate: candidate.to_string(),
                        votes,
                    })
                    .collect();
                counts.sort_by(|a, b| b.votes.cmp(&a.votes));
                PostTally {
                    post: post.name.clone(),
                    counts,
                }
            })
            .collect();
        Ok(tallies)
    }

    /// Issued credentials against cast ballots. A negative `remaining` is
    /// reported as is, with a warning.
    pub async fn summary(&self) -> Result<Summary> {
        let issued = self.credentials.count().await?;
        let cast = self.ballots.count().await?;
        let summary = Summary::new(issued, cast);
        if let Some(warning) = &summary.warning {
            warn!("integrity: {warning}");
        }
        Ok(summary)
    }

    /// Cross-check credentials against ballots for operators to reconcile.
    pub async fn integrity_report(&self) -> Result<IntegrityReport> {
        let voters = self.credentials.all().await?;
        let ballots = self.ballots.all().await?;

        let mut ballot_counts: BTreeMap<&VotingId, usize> = BTreeMap::new();
        for ballot in &ballots {
            *ballot_counts.entry(&ballot.voting_id).or_default() += 1;
        }
        let used: HashMap<&VotingId, bool> = voters.iter().map(|v| (&v.voting_id, v.used)).collect();

        let mut report = IntegrityReport::default();
        for voter in &voters {
            if voter.used && !ballot_counts.contains_key(&voter.voting_id) {
                report.used_without_ballot.push(voter.voting_id.clone());
            }
        }
        for (&id, &count) in &ballot_counts {
            match used.get(id).copied() {
                None => report.unknown_ballots.push(id.clone()),
                Some(false) => report.ballot_without_used.push(id.clone()),
                Some(true) => {}
            }
            if count > 1 {
                report.duplicate_ballots.push(id.clone());
            }
        }
        report.used_without_ballot.sort();

        if !report.is_clean() {
            warn!(
                "integrity: {} used without ballot, {} ballots on unused IDs, {} duplicated, {} unknown",
                report.used_without_ballot.len(),
                report.ballot_without_used.len(),
                report.duplicate_ballots.len(),
                report.unknown_ballots.len()
            );
        }
        Ok(report)
    }
}
