use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, warn};
use rand::seq::SliceRandom;
use rand::Rng;
use rocket::tokio::time::sleep;

use crate::backend::table::USED;
use crate::backend::{Indexed, Table, Tables};
use crate::error::{Error, Result};
use crate::model::voter::ID_SPACE;
use crate::model::{
    AddOutcome, BatchReport, Issuance, MarkOutcome, NewVoter, RosterEntry, RosterPlan,
    RosterReport, Validation, VoterRecord, VotingId,
};

use super::column;

/// Random draws attempted before falling back to picking from the free IDs.
const RANDOM_DRAWS: usize = 64;

/// Times `issue` redraws after its pre-insert re-check finds the ID taken.
const ISSUE_ATTEMPTS: usize = 3;

/// Draw an ID that is not in `taken`.
///
/// Random draws keep IDs unguessable while the space is sparse. Once they keep
/// colliding, the free IDs are enumerated so that a nearly full space still
/// terminates.
fn draw_id<R: Rng + ?Sized>(taken: &HashSet<VotingId>, rng: &mut R) -> Result<VotingId> {
    for _ in 0..RANDOM_DRAWS {
        let id = VotingId::random(rng);
        if !taken.contains(&id) {
            return Ok(id);
        }
    }
    let free: Vec<u32> = (0..ID_SPACE)
        .filter(|i| !taken.contains(&VotingId::from_index(*i)))
        .collect();
    free.choose(rng)
        .map(|i| VotingId::from_index(*i))
        .ok_or(Error::IdSpaceExhausted)
}

/// Voter credentials: issuance, validation and single-use marking.
#[derive(Clone)]
pub struct CredentialStore {
    tables: Tables,
    chunk_size: usize,
}

impl CredentialStore {
    pub fn new(tables: Tables, chunk_size: usize) -> Self {
        Self {
            tables,
            chunk_size: chunk_size.max(1),
        }
    }

    /// Every voter record. There is no index, so this is the only way in.
    pub async fn all(&self) -> Result<Vec<VoterRecord>> {
        Ok(self
            .tables
            .records::<VoterRecord>()
            .await?
            .into_iter()
            .map(|indexed| indexed.record)
            .collect())
    }

    /// Number of issued credentials.
    pub async fn count(&self) -> Result<usize> {
        Ok(self.tables.records::<VoterRecord>().await?.len())
    }

    async fn taken_ids(&self) -> Result<HashSet<VotingId>> {
        Ok(self.all().await?.into_iter().map(|v| v.voting_id).collect())
    }

    /// A voting ID not currently present in the store.
    ///
    /// Nothing is reserved: another caller can draw the same ID before either
    /// writes it. [`CredentialStore::issue`] re-checks right before inserting.
    pub async fn generate_id(&self) -> Result<VotingId> {
        let taken = self.taken_ids().await?;
        draw_id(&taken, &mut rand::thread_rng())
    }

    /// Insert `record` unless its voting ID is already present. Never overwrites.
    pub async fn add_record(&self, record: VoterRecord) -> Result<AddOutcome> {
        if self.taken_ids().await?.contains(&record.voting_id) {
            debug!("Voting ID {} already present, not adding", record.voting_id);
            return Ok(AddOutcome::AlreadyPresent);
        }
        self.tables.append(&[record]).await?;
        Ok(AddOutcome::Added)
    }

    /// Issue a credential to a roster slot, unless the slot already has one.
    pub async fn issue(&self, slot: NewVoter) -> Result<Issuance> {
        let existing = self.all().await?;
        if let Some(voter) = existing
            .iter()
            .find(|v| v.slot.is_slot(&slot.class, &slot.section, &slot.roll_no))
        {
            return Ok(Issuance::AlreadyRegistered(voter.clone()));
        }

        let mut taken: HashSet<VotingId> = existing.into_iter().map(|v| v.voting_id).collect();
        for _ in 0..ISSUE_ATTEMPTS {
            let id = draw_id(&taken, &mut rand::thread_rng())?;
            // Shrink the window in which a concurrent issuer could take the same ID.
            taken = self.taken_ids().await?;
            if taken.contains(&id) {
                warn!("Voting ID {id} was taken between draw and insert, redrawing");
                continue;
            }
            let voter = VoterRecord::new(id, slot);
            self.tables.append(&[voter.clone()]).await?;
            info!("Issued voting ID {}", voter.voting_id);
            return Ok(Issuance::Issued(voter));
        }
        Err(Error::Conflict(
            "voting IDs kept being taken concurrently, try again".to_string(),
        ))
    }

    /// Insert many records in backend-sized chunks, pausing between chunks to
    /// stay under the backend's request ceiling.
    ///
    /// IDs already present, or repeated within `records`, are skipped. The
    /// first failing chunk stops the batch; the report says which records were
    /// written, which were refused, which have an unknown outcome, and which
    /// were never sent.
    pub async fn add_batch(&self, records: Vec<VoterRecord>) -> Result<BatchReport> {
        let mut seen = self.taken_ids().await?;
        let mut report = BatchReport::default();
        let mut pending = Vec::new();
        for record in records {
            if seen.insert(record.voting_id.clone()) {
                pending.push(record);
            } else {
                report.skipped.push(record.voting_id);
            }
        }

        let pause = Duration::from_secs(60) / self.tables.requests_per_minute().max(1);
        let mut chunks = pending.chunks(self.chunk_size).enumerate();
        for (i, chunk) in chunks.by_ref() {
            if i > 0 {
                sleep(pause).await;
            }
            let ids = chunk.iter().map(|v| v.voting_id.clone());
            match self.tables.append(chunk).await {
                Ok(()) => report.inserted.extend(ids),
                Err(e) => {
                    warn!("Batch insert stopped at chunk {}: {e}", i + 1);
                    if matches!(e, Error::TransientWrite(_)) {
                        report.unconfirmed.extend(ids);
                    } else {
                        report.failed.extend(ids);
                    }
                    report.error = Some(e.to_string());
                    break;
                }
            }
        }
        for (_, chunk) in chunks {
            report
                .not_attempted
                .extend(chunk.iter().map(|v| v.voting_id.clone()));
        }

        info!(
            "Batch insert: {} inserted, {} skipped, {} failed, {} unconfirmed, {} not attempted",
            report.inserted.len(),
            report.skipped.len(),
            report.failed.len(),
            report.unconfirmed.len(),
            report.not_attempted.len()
        );
        Ok(report)
    }

    async fn find(&self, id: &VotingId) -> Result<(Vec<String>, Option<Indexed<VoterRecord>>)> {
        let (header, voters) = self.tables.records_with_header::<VoterRecord>().await?;
        let mut matches = voters.into_iter().filter(|v| &v.record.voting_id == id);
        let found = matches.next();
        if matches.next().is_some() {
            warn!("integrity: voting ID {id} appears more than once in {}", Table::Voters);
        }
        Ok((header, found))
    }

    /// Whether `id` may vote.
    pub async fn validate(&self, id: &VotingId) -> Result<Validation> {
        Ok(match self.find(id).await?.1 {
            None => Validation::NotFound,
            Some(voter) if voter.record.used => Validation::AlreadyUsed,
            Some(_) => Validation::Eligible,
        })
    }

    /// Flip `id` from unused to used. A second call reports `AlreadyUsed`.
    pub async fn mark_used(&self, id: &VotingId) -> Result<MarkOutcome> {
        let (header, found) = self.find(id).await?;
        let Some(voter) = found else {
            return Ok(MarkOutcome::NotFound);
        };
        if voter.record.used {
            return Ok(MarkOutcome::AlreadyUsed);
        }
        let used = column(Table::Voters, &header, USED)?;
        self.tables
            .update_cell(Table::Voters, voter.row, used, "YES")
            .await?;
        debug!("Marked voting ID {id} used");
        Ok(MarkOutcome::Marked)
    }

    /// Find the credential of a roster slot, for self-service recovery.
    pub async fn lookup_by_roster(
        &self,
        class: &str,
        section: &str,
        roll_no: &str,
    ) -> Result<Option<RosterEntry>> {
        Ok(self
            .all()
            .await?
            .into_iter()
            .find(|v| v.slot.is_slot(class, section, roll_no))
            .map(|v| RosterEntry {
                voting_id: v.voting_id,
                used: v.used,
            }))
    }

    /// Draw credentials for every roster slot that does not have one yet.
    /// IDs are distinct from existing ones and from each other.
    ///
    /// Every slot ends up holding its own ID, so a roster larger than the ID
    /// space is refused before any slot is built.
    pub async fn plan_roster(
        &self,
        classes: &[String],
        sections: &[String],
        roll_limit: u32,
    ) -> Result<RosterPlan> {
        let size = NewVoter::roster_size(classes, sections, roll_limit);
        if size > u64::from(ID_SPACE) {
            return Err(Error::BadRequest(format!(
                "A roster of {size} slots cannot fit in {ID_SPACE} voting IDs"
            )));
        }
        let existing = self.all().await?;
        let slots = NewVoter::roster(classes, sections, roll_limit);
        let mut taken: HashSet<VotingId> = existing.iter().map(|v| v.voting_id.clone()).collect();
        let mut plan = RosterPlan {
            slots: slots.len(),
            ..RosterPlan::default()
        };

        let mut rng = rand::thread_rng();
        for slot in slots {
            if existing
                .iter()
                .any(|v| v.slot.is_slot(&slot.class, &slot.section, &slot.roll_no))
            {
                plan.already_registered += 1;
                continue;
            }
            let id = draw_id(&taken, &mut rng)?;
            taken.insert(id.clone());
            plan.voters.push(VoterRecord::new(id, slot));
        }
        Ok(plan)
    }

    /// [`CredentialStore::plan_roster`], then write the plan with
    /// [`CredentialStore::add_batch`].
    pub async fn populate_roster(
        &self,
        classes: &[String],
        sections: &[String],
        roll_limit: u32,
    ) -> Result<RosterReport> {
        let plan = self.plan_roster(classes, sections, roll_limit).await?;
        info!(
            "Populating roster: {} slots, {} already registered, {} to issue",
            plan.slots,
            plan.already_registered,
            plan.voters.len()
        );
        let batch = self.add_batch(plan.voters).await?;
        Ok(RosterReport {
            slots: plan.slots,
            already_registered: plan.already_registered,
            batch,
        })
    }
}
