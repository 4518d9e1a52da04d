use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::model::{Post, PostCandidates};
use crate::store::Stores;

pub fn routes() -> Vec<Route> {
    routes![posts, candidates, election_status]
}

/// Active posts, or the built-in defaults if none are configured.
#[get("/posts")]
async fn posts(stores: &State<Stores>) -> Json<Vec<Post>> {
    Json(stores.catalog.list_posts().await)
}

#[get("/candidates")]
async fn candidates(stores: &State<Stores>) -> Result<Json<Vec<PostCandidates>>> {
    Ok(Json(stores.catalog.list_candidates().await?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ElectionStatus {
    pub paused: bool,
}

#[get("/election/status")]
async fn election_status(stores: &State<Stores>) -> Result<Json<ElectionStatus>> {
    Ok(Json(ElectionStatus {
        paused: stores.election.is_paused().await?,
    }))
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::Status,
        local::asynchronous::Client,
        serde::json::serde_json,
    };

    use crate::backend::{MemoryBackend, Table};
    use crate::model::DEFAULT_POSTS;

    use super::*;

    #[backend_test]
    async fn defaults_when_no_posts_configured(client: Client) {
        let response = client.get(uri!(posts)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let posts: Vec<Post> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        let names: Vec<_> = posts.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, DEFAULT_POSTS);
    }

    #[backend_test(seeded)]
    async fn candidates_grouped_by_post(client: Client, backend: MemoryBackend) {
        backend.seed(
            Table::Posts,
            vec![
                vec!["PostName", "Active"],
                vec!["Head Boy", "YES"],
                vec!["Head Girl", "NO"],
            ],
        );
        let response = client.get(uri!(candidates)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        let grouped: Vec<PostCandidates> =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(grouped.len(), 1);
        assert_eq!(grouped[0].post, "Head Boy");
        let names: Vec<_> = grouped[0].candidates.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Arjun", "Kabir"]);
    }

    #[backend_test]
    async fn status_reflects_pause(client: Client, stores: Stores) {
        let status = |body: String| serde_json::from_str::<ElectionStatus>(&body).unwrap();

        let response = client.get(uri!(election_status)).dispatch().await;
        assert!(!status(response.into_string().await.unwrap()).paused);

        stores.election.set_paused(true).await.unwrap();
        let response = client.get(uri!(election_status)).dispatch().await;
        assert!(status(response.into_string().await.unwrap()).paused);
    }
}
