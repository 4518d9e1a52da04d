//! Typed records and results.
//!
//! Rows are decoded into these structures at the store boundary, so nothing
//! past the stores handles raw cell strings.

pub mod ballot;
pub mod catalog;
pub mod results;
pub mod settings;
pub mod voter;

pub use ballot::{verification_code, BallotLayout, BallotRecord, Receipt, Selection, NOTA};
pub use catalog::{Candidate, NewCandidate, Post, PostCandidates, Tier, DEFAULT_POSTS};
pub use results::{CandidateCount, IntegrityReport, PostTally, Summary};
pub use settings::Setting;
pub use voter::{
    AddOutcome, BatchReport, Issuance, MarkOutcome, NewVoter, RosterEntry, RosterPlan,
    RosterReport, Validation, VoterRecord, VotingId,
};
