use rocket::{
    http::Status,
    outcome::{try_outcome, IntoOutcome},
    request::{self, FromRequest},
    serde::json::Json,
    Request, Route, State,
};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::{
    AddOutcome, BatchReport, Candidate, IntegrityReport, Issuance, NewCandidate, NewVoter, Post,
    PostTally, RosterPlan, RosterReport, Summary, VoterRecord,
};
use crate::store::Stores;
use crate::Config;

use super::public::ElectionStatus;

/// Header carrying the shared admin secret.
pub const ADMIN_KEY_HEADER: &str = "X-Admin-Key";

pub fn routes() -> Vec<Route> {
    routes![
        voters,
        issue_voter,
        add_voters,
        plan_roster,
        populate_roster,
        all_posts,
        add_post,
        set_post_active,
        add_candidate,
        delete_candidate,
        pause,
        resume,
        tally,
        summary,
        integrity,
    ]
}

/// Proof that the request carried the configured admin key.
#[derive(Debug, Clone, Copy)]
pub struct AdminKey;

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AdminKey {
    type Error = Error;

    async fn from_request(req: &'r Request<'_>) -> request::Outcome<Self, Self::Error> {
        let config = try_outcome!(req.rocket().state::<Config>().into_outcome((
            Status::InternalServerError,
            Error::Configuration("application config not loaded".to_string()),
        )));
        let key = try_outcome!(req.headers().get_one(ADMIN_KEY_HEADER).into_outcome((
            Status::Unauthorized,
            Error::Unauthorized(format!("missing {ADMIN_KEY_HEADER} header")),
        )));

        // An empty configured key would admit anyone who sends an empty header.
        if config.admin_key().is_empty() || key != config.admin_key() {
            return request::Outcome::Failure((
                Status::Unauthorized,
                Error::Unauthorized("wrong admin key".to_string()),
            ));
        }
        request::Outcome::Success(AdminKey)
    }
}

#[get("/admin/voters")]
async fn voters(_key: AdminKey, stores: &State<Stores>) -> Result<Json<Vec<VoterRecord>>> {
    Ok(Json(stores.credentials.all().await?))
}

#[post("/admin/voters", data = "<slot>", format = "json")]
async fn issue_voter(
    _key: AdminKey,
    slot: Json<NewVoter>,
    stores: &State<Stores>,
) -> Result<Json<Issuance>> {
    Ok(Json(stores.credentials.issue(slot.into_inner()).await?))
}

#[post("/admin/voters/batch", data = "<records>", format = "json")]
async fn add_voters(
    _key: AdminKey,
    records: Json<Vec<VoterRecord>>,
    stores: &State<Stores>,
) -> Result<Json<BatchReport>> {
    Ok(Json(stores.credentials.add_batch(records.into_inner()).await?))
}

/// The roster: every roll number up to `roll_limit` in every class and section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterRequest {
    pub classes: Vec<String>,
    pub sections: Vec<String>,
    pub roll_limit: u32,
}

#[post("/admin/roster/plan", data = "<roster>", format = "json")]
async fn plan_roster(
    _key: AdminKey,
    roster: Json<RosterRequest>,
    stores: &State<Stores>,
) -> Result<Json<RosterPlan>> {
    let plan = stores
        .credentials
        .plan_roster(&roster.classes, &roster.sections, roster.roll_limit)
        .await?;
    Ok(Json(plan))
}

#[post("/admin/roster", data = "<roster>", format = "json")]
async fn populate_roster(
    _key: AdminKey,
    roster: Json<RosterRequest>,
    stores: &State<Stores>,
) -> Result<Json<RosterReport>> {
    let report = stores
        .credentials
        .populate_roster(&roster.classes, &roster.sections, roster.roll_limit)
        .await?;
    Ok(Json(report))
}

#[get("/admin/posts")]
async fn all_posts(_key: AdminKey, stores: &State<Stores>) -> Result<Json<Vec<Post>>> {
    Ok(Json(stores.catalog.all_posts().await?))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostRequest {
    pub name: String,
}

#[post("/admin/posts", data = "<post>", format = "json")]
async fn add_post(
    _key: AdminKey,
    post: Json<PostRequest>,
    stores: &State<Stores>,
) -> Result<Json<AddOutcome>> {
    Ok(Json(stores.catalog.add_post(&post.name).await?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Activation {
    pub active: bool,
}

#[put("/admin/posts/<name>/active", data = "<activation>", format = "json")]
async fn set_post_active(
    _key: AdminKey,
    name: &str,
    activation: Json<Activation>,
    stores: &State<Stores>,
) -> Result<()> {
    stores.catalog.set_post_active(name, activation.active).await
}

#[post("/admin/candidates", data = "<candidate>", format = "json")]
async fn add_candidate(
    _key: AdminKey,
    candidate: Json<NewCandidate>,
    stores: &State<Stores>,
) -> Result<Json<Candidate>> {
    Ok(Json(stores.catalog.add_candidate(candidate.into_inner()).await?))
}

#[delete("/admin/candidates/<id>")]
async fn delete_candidate(_key: AdminKey, id: &str, stores: &State<Stores>) -> Result<()> {
    stores.catalog.delete_candidate(id).await
}

#[post("/admin/election/pause")]
async fn pause(_key: AdminKey, stores: &State<Stores>) -> Result<Json<ElectionStatus>> {
    stores.election.set_paused(true).await?;
    Ok(Json(ElectionStatus { paused: true }))
}

#[post("/admin/election/resume")]
async fn resume(_key: AdminKey, stores: &State<Stores>) -> Result<Json<ElectionStatus>> {
    stores.election.set_paused(false).await?;
    Ok(Json(ElectionStatus { paused: false }))
}

#[get("/admin/results/tally")]
async fn tally(_key: AdminKey, stores: &State<Stores>) -> Result<Json<Vec<PostTally>>> {
    Ok(Json(stores.results.tally().await?))
}

#[get("/admin/results/summary")]
async fn summary(_key: AdminKey, stores: &State<Stores>) -> Result<Json<Summary>> {
    Ok(Json(stores.results.summary().await?))
}

#[get("/admin/results/integrity")]
async fn integrity(_key: AdminKey, stores: &State<Stores>) -> Result<Json<IntegrityReport>> {
    Ok(Json(stores.results.integrity_report().await?))
}
