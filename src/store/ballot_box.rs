use std::sync::Arc;

use chrono::{SubsecRound, Utc};
use log::{error, info, warn};

use crate::error::{Error, Result};
use crate::model::{
    verification_code, BallotLayout, MarkOutcome, Receipt, Selection, Validation, VotingId,
};

use super::{BallotStore, CredentialStore, ElectionControl};

/// Ballot submission: the ordering of credential and ballot writes that keeps
/// double votes rare and detectable.
///
/// The credential is marked used straight after validation, before anything
/// else happens, so that a concurrent submission with the same ID most likely
/// sees it used. Whichever submission loses the race to mark it is refused and
/// flagged for reconciliation. Recording the ballot comes last; if that fails
/// the credential stays used without a confirmed ballot, which
/// [`ResultsAggregator::integrity_report`](super::ResultsAggregator::integrity_report)
/// lists for follow-up.
#[derive(Clone)]
pub struct BallotBox {
    credentials: CredentialStore,
    ballots: BallotStore,
    election: ElectionControl,
    secret: Arc<[u8]>,
}

impl BallotBox {
    pub fn new(
        credentials: CredentialStore,
        ballots: BallotStore,
        election: ElectionControl,
        secret: Arc<[u8]>,
    ) -> Self {
        Self {
            credentials,
            ballots,
            election,
            secret,
        }
    }

    pub async fn submit(
        &self,
        voting_id: &VotingId,
        layout: &BallotLayout,
        selections: &[Selection],
    ) -> Result<Receipt> {
        if self.election.is_paused().await? {
            return Err(Error::ElectionPaused);
        }
        if !layout.verify(&self.secret) {
            return Err(Error::BadRequest(
                "Ballot layout was not issued by this server".to_string(),
            ));
        }

        match self.credentials.validate(voting_id).await? {
            Validation::Eligible => {}
            Validation::NotFound => return Err(Error::not_found(format!("Voting ID {voting_id}"))),
            Validation::AlreadyUsed => return Err(Error::AlreadyUsed(voting_id.to_string())),
        }

        match self.credentials.mark_used(voting_id).await? {
            MarkOutcome::Marked => {}
            MarkOutcome::AlreadyUsed => {
                warn!(
                    "integrity: reconciliation needed for {voting_id}: used by a concurrent submission after validating"
                );
                return Err(Error::Conflict(format!(
                    "Voting ID {voting_id} was used by another submission"
                )));
            }
            MarkOutcome::NotFound => {
                warn!("integrity: voting ID {voting_id} vanished between validate and mark");
                return Err(Error::not_found(format!("Voting ID {voting_id}")));
            }
        }

        let timestamp = Utc::now().trunc_subsecs(0);
        let (arranged, _) = layout.arrange(selections);
        let code = verification_code(&self.secret, voting_id, &timestamp, &arranged);

        match self.record(voting_id, layout, selections, &code, timestamp).await {
            Ok(()) => {
                info!("Ballot recorded for {voting_id}");
                Ok(Receipt {
                    voting_id: voting_id.clone(),
                    verification_code: code,
                    timestamp,
                })
            }
            Err(e) => {
                error!("integrity: credential {voting_id} consumed without confirmed ballot: {e}");
                Err(e)
            }
        }
    }

    /// Record the ballot, retrying once if the first write's outcome is unknown
    /// and it did not in fact land.
    async fn record(
        &self,
        voting_id: &VotingId,
        layout: &BallotLayout,
        selections: &[Selection],
        code: &str,
        timestamp: chrono::DateTime<Utc>,
    ) -> Result<()> {
        let first = self
            .ballots
            .record(voting_id, layout, selections, code, timestamp)
            .await;
        match first {
            Ok(_) => Ok(()),
            Err(Error::TransientWrite(msg)) => {
                warn!("Ballot write for {voting_id} unconfirmed ({msg}), checking before retrying");
                let landed = self
                    .ballots
                    .find(voting_id)
                    .await?
                    .iter()
                    .any(|b| b.verification_code == code);
                if landed {
                    return Ok(());
                }
                self.ballots
                    .record(voting_id, layout, selections, code, timestamp)
                    .await
                    .map(|_| ())
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::backend::{BackendError, MemoryBackend, Table};
    use crate::model::{NewVoter, VoterRecord};
    use crate::store::Stores;

    use super::*;

    fn id(s: &str) -> VotingId {
        s.parse().unwrap()
    }

    async fn with_voter(stores: &Stores) -> VotingId {
        stores
            .credentials
            .add_record(VoterRecord::example())
            .await
            .unwrap();
        VoterRecord::example().voting_id
    }

    #[backend_test(seeded)]
    async fn end_to_end(stores: Stores) {
        // Issue 4821 to class 8, section A, roll 12.
        let voting_id = id("4821");
        stores
            .credentials
            .add_record(VoterRecord::new(voting_id.clone(), NewVoter::new("8", "A", "12")))
            .await
            .unwrap();
        assert_eq!(
            stores.credentials.validate(&voting_id).await.unwrap(),
            Validation::Eligible
        );

        let before = stores.results.tally().await.unwrap();
        let layout = stores.catalog.ballot_layout().await;
        let receipt = stores
            .ballot_box
            .submit(&voting_id, &layout, &[Selection::new("Head Boy", "Kabir")])
            .await
            .unwrap();
        assert_eq!(receipt.voting_id, voting_id);
        assert_eq!(receipt.verification_code.len(), 8);

        assert_eq!(
            stores.credentials.validate(&voting_id).await.unwrap(),
            Validation::AlreadyUsed
        );
        assert_eq!(
            stores.credentials.mark_used(&voting_id).await.unwrap(),
            MarkOutcome::AlreadyUsed
        );

        let after = stores.results.tally().await.unwrap();
        let head_boy_before = &before[0];
        let head_boy_after = &after[0];
        assert_eq!(head_boy_after.post, "Head Boy");
        assert_eq!(
            head_boy_after.votes_for("Kabir"),
            head_boy_before.votes_for("Kabir").map(|v| v + 1)
        );
        assert_eq!(head_boy_after.votes_for("Arjun"), head_boy_before.votes_for("Arjun"));

        let ballots = stores.ballots.find(&voting_id).await.unwrap();
        assert_eq!(ballots.len(), 1);
        assert_eq!(ballots[0].verification_code, receipt.verification_code);
        assert!(stores.results.integrity_report().await.unwrap().is_clean());
    }

    #[backend_test(seeded)]
    async fn second_submission_is_refused(stores: Stores) {
        let voting_id = with_voter(&stores).await;
        let layout = stores.catalog.ballot_layout().await;
        stores
            .ballot_box
            .submit(&voting_id, &layout, &[])
            .await
            .unwrap();
        assert!(matches!(
            stores.ballot_box.submit(&voting_id, &layout, &[]).await,
            Err(Error::AlreadyUsed(_))
        ));
        assert!(matches!(
            stores.ballot_box.submit(&id("0000"), &layout, &[]).await,
            Err(Error::NotFound(_))
        ));
        assert_eq!(stores.ballots.count().await.unwrap(), 1);
    }

    #[backend_test(seeded)]
    async fn concurrent_submissions_record_at_most_one(stores: Stores) {
        let voting_id = with_voter(&stores).await;
        let layout = stores.catalog.ballot_layout().await;
        let (first, second) = rocket::tokio::join!(
            stores.ballot_box.submit(&voting_id, &layout, &[]),
            stores.ballot_box.submit(&voting_id, &layout, &[]),
        );
        let accepted = [&first, &second].iter().filter(|r| r.is_ok()).count();
        assert!(accepted >= 1);
        assert_eq!(stores.ballots.find(&voting_id).await.unwrap().len(), accepted);
        for refused in [first, second].into_iter().filter_map(|r| r.err()) {
            assert!(matches!(refused, Error::AlreadyUsed(_) | Error::Conflict(_)));
        }
    }

    #[backend_test(seeded)]
    async fn paused_elections_refuse_ballots(stores: Stores) {
        let voting_id = with_voter(&stores).await;
        let layout = stores.catalog.ballot_layout().await;
        stores.election.set_paused(true).await.unwrap();
        assert!(matches!(
            stores.ballot_box.submit(&voting_id, &layout, &[]).await,
            Err(Error::ElectionPaused)
        ));
        // Nothing was consumed.
        assert_eq!(
            stores.credentials.validate(&voting_id).await.unwrap(),
            Validation::Eligible
        );
    }

    #[backend_test(seeded)]
    async fn forged_layouts_are_refused(stores: Stores) {
        let voting_id = with_voter(&stores).await;
        let mut layout = stores.catalog.ballot_layout().await;
        layout.posts.push("Treasurer".to_string());
        assert!(matches!(
            stores.ballot_box.submit(&voting_id, &layout, &[]).await,
            Err(Error::BadRequest(_))
        ));
        let forged = BallotLayout::capture(layout.posts, layout.captured_at, b"guess");
        assert!(matches!(
            stores.ballot_box.submit(&voting_id, &forged, &[]).await,
            Err(Error::BadRequest(_))
        ));
    }

    #[backend_test(seeded)]
    async fn lost_confirmation_is_not_retried_twice(stores: Stores, backend: MemoryBackend) {
        let voting_id = with_voter(&stores).await;
        let layout = stores.catalog.ballot_layout().await;
        backend.fail_next_append(BackendError::Transient("timed out".into()), true);
        stores
            .ballot_box
            .submit(&voting_id, &layout, &[])
            .await
            .unwrap();
        assert_eq!(stores.ballots.find(&voting_id).await.unwrap().len(), 1);
    }

    #[backend_test(seeded)]
    async fn lost_write_is_retried_once(stores: Stores, backend: MemoryBackend) {
        let voting_id = with_voter(&stores).await;
        let layout = stores.catalog.ballot_layout().await;

        backend.fail_next_append(BackendError::Transient("connection reset".into()), false);
        stores
            .ballot_box
            .submit(&voting_id, &layout, &[])
            .await
            .unwrap();
        assert_eq!(stores.ballots.find(&voting_id).await.unwrap().len(), 1);
    }

    #[backend_test(seeded)]
    async fn failed_record_leaves_a_flag(stores: Stores, backend: MemoryBackend) {
        let voting_id = with_voter(&stores).await;
        let layout = stores.catalog.ballot_layout().await;

        backend.fail_next_append(BackendError::Rejected("protected range".into()), false);
        assert!(matches!(
            stores.ballot_box.submit(&voting_id, &layout, &[]).await,
            Err(Error::Store(_))
        ));
        let report = stores.results.integrity_report().await.unwrap();
        assert_eq!(report.used_without_ballot, vec![voting_id]);
        assert!(backend.rows(Table::Votes).len() <= 1);
    }
}
