use std::sync::Arc;

use chrono::Utc;
use log::{debug, info, warn};

use crate::backend::table::ACTIVE;
use crate::backend::{Table, Tables};
use crate::cache::ConsistencyCache;
use crate::error::{Error, Result};
use crate::model::catalog::DEFAULT_POSTS_VERSION;
use crate::model::voter::yes_no;
use crate::model::{AddOutcome, BallotLayout, Candidate, NewCandidate, Post, PostCandidates};

use super::column;

const POSTS_KEY: &str = "posts";
const CANDIDATES_KEY: &str = "candidates";

/// Catalog tables as held by the cache.
#[derive(Debug, Clone)]
pub enum CatalogEntry {
    Posts(Vec<Post>),
    Candidates(Vec<Candidate>),
}

/// Posts and candidates, read through a [`ConsistencyCache`].
///
/// Every mutation invalidates both cache keys before returning, so reads on
/// this instance see it at once. Other instances catch up when their own
/// entries expire.
#[derive(Clone)]
pub struct PostCatalog {
    tables: Tables,
    cache: Arc<ConsistencyCache<CatalogEntry>>,
    secret: Arc<[u8]>,
}

impl PostCatalog {
    pub fn new(tables: Tables, cache: Arc<ConsistencyCache<CatalogEntry>>, secret: Arc<[u8]>) -> Self {
        Self {
            tables,
            cache,
            secret,
        }
    }

    /// Every post in the table, inactive ones included.
    pub async fn all_posts(&self) -> Result<Vec<Post>> {
        if let Some(CatalogEntry::Posts(posts)) = self.cache.get(POSTS_KEY) {
            return Ok(posts);
        }
        let generation = self.cache.generation();
        let posts: Vec<Post> = self
            .tables
            .records::<Post>()
            .await?
            .into_iter()
            .map(|indexed| indexed.record)
            .collect();
        self.cache
            .put(POSTS_KEY, CatalogEntry::Posts(posts.clone()), generation);
        Ok(posts)
    }

    /// The active posts, in table order.
    ///
    /// An empty or unreachable table yields the default posts. The fallback is
    /// not cached when the table was unreachable, so the next call tries again.
    pub async fn list_posts(&self) -> Vec<Post> {
        match self.all_posts().await {
            Ok(posts) if posts.is_empty() => {
                debug!("No posts configured, using default posts v{DEFAULT_POSTS_VERSION}");
                Post::defaults()
            }
            Ok(posts) => {
                let active: Vec<Post> = posts.into_iter().filter(|p| p.active).collect();
                if active.is_empty() {
                    warn!("integrity: every post is inactive, ballots will be empty");
                }
                active
            }
            Err(e) => {
                warn!("Could not read posts, using default posts v{DEFAULT_POSTS_VERSION}: {e}");
                Post::defaults()
            }
        }
    }

    /// Every candidate, in table order.
    pub async fn candidates(&self) -> Result<Vec<Candidate>> {
        if let Some(CatalogEntry::Candidates(candidates)) = self.cache.get(CANDIDATES_KEY) {
            return Ok(candidates);
        }
        let generation = self.cache.generation();
        let candidates: Vec<Candidate> = self
            .tables
            .records::<Candidate>()
            .await?
            .into_iter()
            .map(|indexed| indexed.record)
            .collect();
        self.cache
            .put(CANDIDATES_KEY, CatalogEntry::Candidates(candidates.clone()), generation);
        Ok(candidates)
    }

    /// Candidates grouped under the active posts.
    pub async fn list_candidates(&self) -> Result<Vec<PostCandidates>> {
        let posts = self.list_posts().await;
        let candidates = self.candidates().await?;
        Ok(PostCandidates::group(&posts, &candidates))
    }

    /// Capture the active post order for a voter about to fill in a ballot.
    pub async fn ballot_layout(&self) -> BallotLayout {
        let posts = self.list_posts().await.into_iter().map(|p| p.name).collect();
        BallotLayout::capture(posts, Utc::now(), &self.secret)
    }

    fn invalidate(&self) {
        self.cache.invalidate(POSTS_KEY);
        self.cache.invalidate(CANDIDATES_KEY);
    }

    /// Add a post, or reactivate it if it exists but is inactive.
    pub async fn add_post(&self, name: &str) -> Result<AddOutcome> {
        let name = name.trim();
        if name.is_empty() {
            return Err(Error::BadRequest("Post name must not be empty".to_string()));
        }
        let (header, posts) = self.tables.records_with_header::<Post>().await?;
        let outcome = match posts.iter().find(|p| p.record.is_named(name)) {
            Some(post) if post.record.active => AddOutcome::AlreadyPresent,
            Some(post) => {
                let active = column(Table::Posts, &header, ACTIVE)?;
                self.tables
                    .update_cell(Table::Posts, post.row, active, yes_no(true))
                    .await?;
                info!("Reactivated post {name}");
                AddOutcome::Added
            }
            None => {
                self.tables.append(&[Post::new(name)]).await?;
                info!("Added post {name}");
                AddOutcome::Added
            }
        };
        self.invalidate();
        Ok(outcome)
    }

    /// Activate or deactivate an existing post.
    pub async fn set_post_active(&self, name: &str, active: bool) -> Result<()> {
        let (header, posts) = self.tables.records_with_header::<Post>().await?;
        let post = posts
            .iter()
            .find(|p| p.record.is_named(name))
            .ok_or_else(|| Error::not_found(format!("Post '{name}'")))?;
        let active_column = column(Table::Posts, &header, ACTIVE)?;
        self.tables
            .update_cell(Table::Posts, post.row, active_column, yes_no(active))
            .await?;
        info!("Set post {name} active={active}");
        self.invalidate();
        Ok(())
    }

    /// Add a candidate under a fresh candidate ID.
    pub async fn add_candidate(&self, candidate: NewCandidate) -> Result<Candidate> {
        if candidate.post.trim().is_empty() || candidate.name.trim().is_empty() {
            return Err(Error::BadRequest(
                "Candidates need a post and a name".to_string(),
            ));
        }
        if !self
            .list_posts()
            .await
            .iter()
            .any(|p| p.is_named(&candidate.post))
        {
            warn!(
                "Adding candidate {} to post '{}', which is not active",
                candidate.name, candidate.post
            );
        }

        let existing = self.tables.records::<Candidate>().await?;
        let id = {
            let mut rng = rand::thread_rng();
            loop {
                let id = Candidate::random_id(&mut rng);
                if !existing.iter().any(|c| c.record.id == id) {
                    break id;
                }
            }
        };
        let candidate = candidate.into_candidate(id);
        self.tables.append(&[candidate.clone()]).await?;
        info!("Added candidate {} ({}) for {}", candidate.name, candidate.id, candidate.post);
        self.invalidate();
        Ok(candidate)
    }

    /// Delete the candidate with the given ID.
    pub async fn delete_candidate(&self, id: &str) -> Result<()> {
        let candidates = self.tables.records::<Candidate>().await?;
        let candidate = candidates
            .iter()
            .find(|c| !c.record.id.is_empty() && c.record.id == id.trim())
            .ok_or_else(|| Error::not_found(format!("Candidate '{id}'")))?;
        self.tables
            .delete_row(Table::Candidates, candidate.row)
            .await?;
        info!("Deleted candidate {} ({id})", candidate.record.name);
        self.invalidate();
        Ok(())
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
    }
}
