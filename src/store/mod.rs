//! The consistency layer: stores over the record backend that approximate
//! "one credential, one ballot" without transactions or unique indexes.
//!
//! Every guarantee here is advisory. Checks are linear scans followed by
//! separate writes, so two callers can interleave between a check and its
//! write. The stores narrow those windows and report what they cannot close
//! (see [`ResultsAggregator::integrity_report`]).

use std::sync::Arc;

use log::info;

use crate::backend::{same_column, Table, Tables};
use crate::cache::ConsistencyCache;
use crate::error::{Error, Result};
use crate::Config;

mod ballot;
mod ballot_box;
mod catalog;
mod credential;
mod election;
mod results;

pub use ballot::BallotStore;
pub use ballot_box::BallotBox;
pub use catalog::{CatalogEntry, PostCatalog};
pub use credential::CredentialStore;
pub use election::ElectionControl;
pub use results::ResultsAggregator;

/// Every store, sharing one backend handle and one catalog cache.
///
/// This is the per-instance shared state of the server: built once at ignite,
/// [`Stores::init`]ialised before the first request and
/// [`Stores::teardown`] when it is dropped from service. Cloning is cheap and
/// gives handles on the same state.
#[derive(Clone)]
pub struct Stores {
    pub credentials: CredentialStore,
    pub catalog: PostCatalog,
    pub ballots: BallotStore,
    pub results: ResultsAggregator,
    pub election: ElectionControl,
    pub ballot_box: BallotBox,
    tables: Tables,
}

impl Stores {
    pub fn new(tables: Tables, config: &Config) -> Self {
        let secret: Arc<[u8]> = Arc::from(config.hmac_secret());
        let cache = Arc::new(ConsistencyCache::new(config.catalog_ttl()));

        let credentials = CredentialStore::new(tables.clone(), config.batch_chunk_size());
        let catalog = PostCatalog::new(tables.clone(), cache, secret.clone());
        let ballots = BallotStore::new(tables.clone());
        let election = ElectionControl::new(tables.clone());
        let results = ResultsAggregator::new(credentials.clone(), catalog.clone(), ballots.clone());
        let ballot_box = BallotBox::new(
            credentials.clone(),
            ballots.clone(),
            election.clone(),
            secret,
        );

        Self {
            credentials,
            catalog,
            ballots,
            results,
            election,
            ballot_box,
            tables,
        }
    }

    /// Create any missing table with its header row. `VOTES` is left to the
    /// first ballot, whose layout decides its columns.
    pub async fn init(&self) -> Result<()> {
        self.tables.ensure_fixed_tables().await?;
        info!("Backend tables ready");
        Ok(())
    }

    /// Drop process-local state.
    pub fn teardown(&self) {
        self.catalog.clear_cache();
    }
}

/// Position of `name` in a table's header row.
pub(crate) fn column(table: Table, header: &[String], name: &str) -> Result<usize> {
    header
        .iter()
        .position(|h| same_column(h, name))
        .ok_or_else(|| Error::Store(format!("{table} has no {name} column")))
}

#[cfg(test)]
mod tests {
    use crate::backend::{MemoryBackend, Table};

    use super::*;

    #[backend_test]
    async fn init_creates_fixed_tables(backend: MemoryBackend) {
        for table in Table::FIXED {
            let rows = backend.rows(table);
            assert_eq!(rows.len(), 1, "{table} should hold just its header");
            assert_eq!(rows[0].len(), table.default_headers().len());
        }
        assert!(backend.rows(Table::Votes).is_empty());
    }

    #[test]
    fn columns_match_loosely() {
        let header = vec!["VotingID".to_string(), " used ".to_string()];
        assert_eq!(column(Table::Voters, &header, "Used").unwrap(), 1);
        assert!(matches!(
            column(Table::Voters, &header, "Class"),
            Err(Error::Store(_))
        ));
    }
}
