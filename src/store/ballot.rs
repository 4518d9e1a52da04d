use chrono::{DateTime, Utc};
use log::{debug, warn};

use crate::backend::{same_column, Table, Tables};
use crate::error::{Error, Result};
use crate::model::{BallotLayout, BallotRecord, Selection, VotingId};

/// Reads of the `VOTES` header before giving up on it settling.
const HEADER_ATTEMPTS: usize = 3;

/// The append-only vote log.
///
/// Duplicate prevention is not done here; it is the credential store's job.
#[derive(Clone)]
pub struct BallotStore {
    tables: Tables,
}

impl BallotStore {
    pub fn new(tables: Tables) -> Self {
        Self { tables }
    }

    async fn header(&self) -> Result<Vec<String>> {
        Ok(self
            .tables
            .read_raw(Table::Votes)
            .await?
            .into_iter()
            .next()
            .unwrap_or_default())
    }

    /// Make sure `VOTES` has a column for every post on `layout` and return its
    /// header. The table is created with the layout's header if missing; posts
    /// the header lacks are added as new columns at its end.
    async fn prepare(&self, layout: &BallotLayout) -> Result<Vec<String>> {
        for _ in 0..HEADER_ATTEMPTS {
            let header = self.header().await?;
            if header.is_empty() {
                self.tables.ensure_table(Table::Votes, &layout.headers()).await?;
                continue;
            }
            let missing: Vec<&String> = layout
                .posts
                .iter()
                .filter(|post| !header.iter().any(|h| same_column(h, post)))
                .collect();
            if missing.is_empty() {
                return Ok(header);
            }
            for (offset, post) in missing.into_iter().enumerate() {
                warn!("integrity: adding column {post:?} to {}", Table::Votes);
                self.tables
                    .update_cell(Table::Votes, 0, header.len() + offset, post)
                    .await?;
            }
        }
        // Another writer kept changing the header underneath us.
        Err(Error::Store(format!(
            "{} header does not cover ballot layout {:?}",
            Table::Votes,
            layout.posts
        )))
    }

    /// Append one ballot. It covers the posts of `layout`, the posts in effect
    /// when the voter opened the ballot, with skipped posts recorded as NOTA.
    /// Cells are placed by header column name, so the table's own column order
    /// never shifts a choice onto another post.
    ///
    /// Only an `Ok` means the ballot was written. A `TransientWrite` error means
    /// the outcome is unknown.
    pub async fn record(
        &self,
        voting_id: &VotingId,
        layout: &BallotLayout,
        selections: &[Selection],
        verification_code: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<BallotRecord> {
        let (selections, unmatched) = layout.arrange(selections);
        for selection in &unmatched {
            warn!(
                "integrity: ballot {voting_id} selects {:?} for post {:?}, which is not on its layout",
                selection.choice, selection.post
            );
        }

        let header = self.prepare(layout).await?;
        let ballot = BallotRecord {
            voting_id: voting_id.clone(),
            selections,
            verification_code: verification_code.to_string(),
            timestamp: Some(timestamp),
        };
        self.tables
            .append_raw(Table::Votes, vec![ballot.to_row_under(&header)])
            .await?;
        debug!("Recorded ballot for {voting_id}");
        Ok(ballot)
    }

    /// Every recorded ballot, in the order written.
    pub async fn all(&self) -> Result<Vec<BallotRecord>> {
        Ok(self
            .tables
            .records::<BallotRecord>()
            .await?
            .into_iter()
            .map(|indexed| indexed.record)
            .collect())
    }

    pub async fn count(&self) -> Result<usize> {
        Ok(self.tables.records::<BallotRecord>().await?.len())
    }

    /// The ballots recorded under `voting_id`; more than one is an integrity problem.
    pub async fn find(&self, voting_id: &VotingId) -> Result<Vec<BallotRecord>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .filter(|b| &b.voting_id == voting_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use crate::backend::MemoryBackend;
    use crate::model::NOTA;
    use crate::store::Stores;
    use crate::Config;

    use super::*;

    fn timestamp() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 4, 1, 10, 0, 0).unwrap()
    }

    #[backend_test]
    async fn first_ballot_creates_the_table(stores: Stores, backend: MemoryBackend) {
        let layout = BallotLayout::example(Config::example().hmac_secret());
        let id: VotingId = "4821".parse().unwrap();
        stores
            .ballots
            .record(&id, &layout, &[Selection::new("Head Girl", "Meera")], "CODE", timestamp())
            .await
            .unwrap();

        let rows = backend.rows(Table::Votes);
        assert_eq!(
            rows[0],
            vec!["VotingID", "Head Boy", "Head Girl", "VerificationCode", "Timestamp"]
        );
        assert_eq!(rows[1], vec!["4821", NOTA, "Meera", "CODE", "2023-04-01T10:00:00Z"]);

        let ballots = stores.ballots.all().await.unwrap();
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].choice_for("head girl"), Some("Meera"));
        assert_eq!(stores.ballots.find(&id).await.unwrap().len(), 1);
    }

    #[backend_test]
    async fn reordered_catalog_keeps_columns(stores: Stores, backend: MemoryBackend) {
        let secret = Config::example().hmac_secret().to_vec();
        let layout = BallotLayout::example(&secret);
        let id: VotingId = "0001".parse().unwrap();
        stores
            .ballots
            .record(&id, &layout, &[], "A", timestamp())
            .await
            .unwrap();

        // An admin reorders the posts mid-election; a voter still holding the
        // old layout writes in the old order.
        stores.catalog.add_post("Head Girl").await.unwrap();
        stores.catalog.add_post("Head Boy").await.unwrap();
        let id: VotingId = "0002".parse().unwrap();
        stores
            .ballots
            .record(
                &id,
                &layout,
                &[Selection::new("Head Boy", "Arjun"), Selection::new("Head Girl", "Meera")],
                "B",
                timestamp(),
            )
            .await
            .unwrap();
        assert_eq!(backend.rows(Table::Votes)[2][1], "Arjun");
        assert_eq!(stores.ballots.count().await.unwrap(), 2);
    }

    #[backend_test]
    async fn transient_failures_surface(stores: Stores, backend: MemoryBackend) {
        let layout = BallotLayout::example(Config::example().hmac_secret());
        backend.fail_next_append(
            crate::backend::BackendError::Transient("timed out".into()),
            true,
        );
        let id: VotingId = "4821".parse().unwrap();
        let result = stores
            .ballots
            .record(&id, &layout, &[], "CODE", timestamp())
            .await;
        assert!(matches!(result, Err(crate::error::Error::TransientWrite(_))));
        // The write landed even though no confirmation arrived.
        assert_eq!(stores.ballots.count().await.unwrap(), 1);
    }

    #[backend_test(seeded)]
    async fn changed_post_set_keeps_columns_aligned(stores: Stores, backend: MemoryBackend) {
        for id in ["1111", "2222", "3333"] {
            stores
                .credentials
                .add_record(crate::model::VoterRecord::new(
                    id.parse().unwrap(),
                    crate::model::NewVoter::new("8", "A", id),
                ))
                .await
                .unwrap();
        }
        let vote = |id: &'static str, selections: Vec<Selection>| {
            let stores = stores.clone();
            async move {
                let layout = stores.catalog.ballot_layout().await;
                stores
                    .ballot_box
                    .submit(&id.parse().unwrap(), &layout, &selections)
                    .await
                    .unwrap()
            }
        };

        vote(
            "1111",
            vec![Selection::new("Head Boy", "Arjun"), Selection::new("Head Girl", "Meera")],
        )
        .await;
        stores.catalog.set_post_active("Head Boy", false).await.unwrap();
        let second = vote("2222", vec![Selection::new("Head Girl", "Meera")]).await;
        stores.catalog.add_post("Treasurer").await.unwrap();
        vote("3333", vec![Selection::new("Treasurer", "Dev")]).await;

        let rows = backend.rows(Table::Votes);
        assert_eq!(
            rows[0],
            vec!["VotingID", "Head Boy", "Head Girl", "VerificationCode", "Timestamp", "Treasurer"]
        );

        let ballots = stores.ballots.find(&"2222".parse().unwrap()).await.unwrap();
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].choice_for("Head Boy"), None);
        assert_eq!(ballots[0].choice_for("Head Girl"), Some("Meera"));
        assert_eq!(ballots[0].verification_code, second.verification_code);
        assert_eq!(ballots[0].timestamp, Some(second.timestamp));

        let tally = stores.results.tally().await.unwrap();
        let head_girl = tally.iter().find(|t| t.post == "Head Girl").unwrap();
        assert_eq!(head_girl.votes_for("Meera"), Some(2));
        assert_eq!(head_girl.votes_for(&second.verification_code), None);
        // Every ballot offered Head Girl; the last chose NOTA.
        assert_eq!(head_girl.counts.iter().map(|c| c.votes).sum::<u64>(), 3);
        let treasurer = tally.iter().find(|t| t.post == "Treasurer").unwrap();
        assert_eq!(treasurer.votes_for("Dev"), Some(1));
        assert_eq!(treasurer.counts.iter().map(|c| c.votes).sum::<u64>(), 1);
    }
}
