use rocket::{serde::json::Json, Route, State};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    BallotLayout, NewVoter, Post, PostCandidates, Receipt, RosterEntry, Selection, Validation,
    VotingId,
};
use crate::store::Stores;

pub fn routes() -> Vec<Route> {
    routes![validate, ballot, submit_ballot, recover]
}

/// A voting ID as typed by the voter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VotingIdRequest {
    pub voting_id: String,
}

#[post("/voter/validate", data = "<request>", format = "json")]
async fn validate(request: Json<VotingIdRequest>, stores: &State<Stores>) -> Result<Json<Validation>> {
    // A malformed ID cannot exist in the store, so it is simply not found.
    let Ok(voting_id) = request.voting_id.parse::<VotingId>() else {
        return Ok(Json(Validation::NotFound));
    };
    let validation = stores.credentials.validate(&voting_id).await?;
    Ok(Json(validation))
}

/// Everything a voter needs to fill in a ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotForm {
    /// Must be sent back unchanged with the ballot.
    pub layout: BallotLayout,
    pub candidates: Vec<PostCandidates>,
}

#[get("/ballot")]
async fn ballot(stores: &State<Stores>) -> Result<Json<BallotForm>> {
    let layout = stores.catalog.ballot_layout().await;
    let posts: Vec<Post> = layout.posts.iter().map(Post::new).collect();
    let candidates = stores.catalog.candidates().await?;
    Ok(Json(BallotForm {
        candidates: PostCandidates::group(&posts, &candidates),
        layout,
    }))
}

/// A completed ballot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BallotSubmission {
    pub voting_id: VotingId,
    pub layout: BallotLayout,
    #[serde(default)]
    pub selections: Vec<Selection>,
}

#[post("/voter/ballot", data = "<submission>", format = "json")]
async fn submit_ballot(
    submission: Json<BallotSubmission>,
    stores: &State<Stores>,
) -> Result<Json<Receipt>> {
    let receipt = stores
        .ballot_box
        .submit(&submission.voting_id, &submission.layout, &submission.selections)
        .await?;
    Ok(Json(receipt))
}

#[post("/voter/recover", data = "<slot>", format = "json")]
async fn recover(slot: Json<NewVoter>, stores: &State<Stores>) -> Result<Json<RosterEntry>> {
    stores
        .credentials
        .lookup_by_roster(&slot.class, &slot.section, &slot.roll_no)
        .await?
        .map(Json)
        .ok_or_else(|| {
            Error::not_found(format!(
                "Voter in class {} section {} roll {}",
                slot.class, slot.section, slot.roll_no
            ))
        })
}

#[cfg(test)]
mod tests {
    use rocket::{
        http::{ContentType, Status},
        local::asynchronous::Client,
        serde::json::{json, serde_json},
    };

    use crate::backend::MemoryBackend;
    use crate::model::VoterRecord;
    use crate::store::Stores;

    use super::*;

    async fn validate_id(client: &Client, voting_id: &str) -> Validation {
        let response = client
            .post(uri!(validate))
            .header(ContentType::JSON)
            .body(json!({ "votingId": voting_id }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    async fn get_ballot(client: &Client) -> BallotForm {
        let response = client.get(uri!(ballot)).dispatch().await;
        assert_eq!(Status::Ok, response.status());
        serde_json::from_str(&response.into_string().await.unwrap()).unwrap()
    }

    #[backend_test(seeded)]
    async fn vote_through_the_api(client: Client, stores: Stores) {
        stores
            .credentials
            .add_record(VoterRecord::example())
            .await
            .unwrap();
        assert_eq!(validate_id(&client, "4821").await, Validation::Eligible);
        assert_eq!(validate_id(&client, "1234").await, Validation::NotFound);
        assert_eq!(validate_id(&client, "not-an-id").await, Validation::NotFound);

        let form = get_ballot(&client).await;
        assert_eq!(form.layout.posts, vec!["Head Boy", "Head Girl"]);
        assert_eq!(form.candidates[0].candidates.len(), 2);

        let submission = BallotSubmission {
            voting_id: "4821".parse().unwrap(),
            layout: form.layout.clone(),
            selections: vec![Selection::new("Head Girl", "Meera")],
        };
        let response = client
            .post(uri!(submit_ballot))
            .header(ContentType::JSON)
            .body(json!(submission).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let receipt: Receipt =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(receipt.voting_id.as_str(), "4821");

        assert_eq!(validate_id(&client, "4821").await, Validation::AlreadyUsed);
        let response = client
            .post(uri!(submit_ballot))
            .header(ContentType::JSON)
            .body(json!(submission).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Conflict, response.status());
    }

    #[backend_test(seeded)]
    async fn tampered_layouts_are_rejected(client: Client, stores: Stores) {
        stores
            .credentials
            .add_record(VoterRecord::example())
            .await
            .unwrap();
        let mut form = get_ballot(&client).await;
        form.layout.posts.reverse();
        let response = client
            .post(uri!(submit_ballot))
            .header(ContentType::JSON)
            .body(
                json!(BallotSubmission {
                    voting_id: "4821".parse().unwrap(),
                    layout: form.layout,
                    selections: Vec::new(),
                })
                .to_string(),
            )
            .dispatch()
            .await;
        assert_eq!(Status::BadRequest, response.status());
        assert_eq!(
            stores
                .credentials
                .validate(&"4821".parse().unwrap())
                .await
                .unwrap(),
            Validation::Eligible
        );
    }

    #[backend_test]
    async fn recover_by_roster(client: Client, stores: Stores) {
        stores
            .credentials
            .add_record(VoterRecord::example())
            .await
            .unwrap();

        let response = client
            .post(uri!(recover))
            .header(ContentType::JSON)
            .body(json!(NewVoter::new("8", "a", "12")).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::Ok, response.status());
        let entry: RosterEntry =
            serde_json::from_str(&response.into_string().await.unwrap()).unwrap();
        assert_eq!(entry.voting_id.as_str(), "4821");
        assert!(!entry.used);

        let response = client
            .post(uri!(recover))
            .header(ContentType::JSON)
            .body(json!(NewVoter::new("9", "A", "12")).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::NotFound, response.status());
    }

    #[backend_test]
    async fn persistent_throttling_reports_unavailable(backend: MemoryBackend, client: Client) {
        // Ten refusals outlast the retry ceiling.
        backend.rate_limit_next(10);
        let response = client
            .post(uri!(validate))
            .header(ContentType::JSON)
            .body(json!({ "votingId": "4821" }).to_string())
            .dispatch()
            .await;
        assert_eq!(Status::ServiceUnavailable, response.status());
    }
}
