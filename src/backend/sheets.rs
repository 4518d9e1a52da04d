//! Google Sheets backend: one worksheet per [`Table`], accessed through the
//! Sheets v4 REST API with a service account.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use log::{debug, info};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use rocket::serde::json::serde_json::{self, json, Value};
use rocket::tokio::sync::Mutex;
use serde::{Deserialize, Serialize};

use super::{Backend, BackendError, BackendResult, Table};

const SHEETS_API: &str = "https://sheets.googleapis.com/v4/spreadsheets";
const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
const DEFAULT_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const ASSERTION_TTL_SECONDS: i64 = 3600;
/// Refresh the access token this long before Google says it expires.
const TOKEN_REFRESH_MARGIN_SECONDS: i64 = 60;
const REQUEST_TIMEOUT_SECONDS: u64 = 15;
/// Error text Sheets returns when a range names a worksheet that does not exist.
const MISSING_SHEET: &str = "Unable to parse range";

/// The fields we need from a service-account JSON key file.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
    #[serde(default = "default_token_uri")]
    pub token_uri: String,
}

fn default_token_uri() -> String {
    DEFAULT_TOKEN_URI.to_string()
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> BackendResult<Self> {
        serde_json::from_str(json).map_err(|e| {
            BackendError::Configuration(format!("invalid service account credentials: {e}"))
        })
    }
}

#[derive(Serialize)]
struct AssertionClaims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: i64,
}

struct AccessToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ValueRange {
    #[serde(default)]
    values: Vec<Vec<String>>,
}

#[derive(Deserialize)]
struct Spreadsheet {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetProperties,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetProperties {
    sheet_id: i64,
    title: String,
}

pub struct SheetsBackend {
    http: Client,
    spreadsheet_id: String,
    key: ServiceAccountKey,
    encoding_key: EncodingKey,
    requests_per_minute: u32,
    token: Mutex<Option<AccessToken>>,
    /// Worksheet titles to numeric sheet IDs, needed for structural edits.
    sheet_ids: Mutex<HashMap<String, i64>>,
}

impl SheetsBackend {
    pub fn new(
        spreadsheet_id: impl Into<String>,
        key: ServiceAccountKey,
        requests_per_minute: u32,
    ) -> BackendResult<Self> {
        let encoding_key = EncodingKey::from_rsa_pem(key.private_key.as_bytes())
            .map_err(|e| BackendError::Configuration(format!("invalid private key: {e}")))?;
        let http = Client::builder()
            .timeout(StdDuration::from_secs(REQUEST_TIMEOUT_SECONDS))
            .build()
            .map_err(|e| BackendError::Configuration(format!("HTTP client: {e}")))?;
        Ok(Self {
            http,
            spreadsheet_id: spreadsheet_id.into(),
            key,
            encoding_key,
            requests_per_minute,
            token: Mutex::new(None),
            sheet_ids: Mutex::new(HashMap::new()),
        })
    }

    /// Get a bearer token, exchanging a freshly signed assertion if the cached
    /// one is missing or about to expire.
    async fn access_token(&self) -> BackendResult<String> {
        let mut cached = self.token.lock().await;
        let refresh_after = Utc::now() + Duration::seconds(TOKEN_REFRESH_MARGIN_SECONDS);
        if let Some(token) = cached.as_ref().filter(|t| t.expires_at > refresh_after) {
            return Ok(token.token.clone());
        }

        let now = Utc::now().timestamp();
        let claims = AssertionClaims {
            iss: &self.key.client_email,
            scope: SCOPE,
            aud: &self.key.token_uri,
            iat: now,
            exp: now + ASSERTION_TTL_SECONDS,
        };
        let assertion =
            jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.encoding_key)
                .map_err(|e| BackendError::Configuration(format!("signing assertion: {e}")))?;
        let request = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())]);
        let response = check_status(request.send().await.map_err(transport_error)?).await?;
        let fresh: TokenResponse = response.json().await.map_err(transport_error)?;
        debug!("Refreshed Sheets access token");

        let token = fresh.access_token.clone();
        *cached = Some(AccessToken {
            token: fresh.access_token,
            expires_at: Utc::now() + Duration::seconds(fresh.expires_in),
        });
        Ok(token)
    }

    async fn send(&self, request: RequestBuilder) -> BackendResult<Response> {
        let token = self.access_token().await?;
        let response = request
            .bearer_auth(token)
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response).await
    }

    fn spreadsheet_url(&self) -> String {
        format!("{SHEETS_API}/{}", self.spreadsheet_id)
    }

    fn values_url(&self, range: &str) -> String {
        format!("{}/values/{range}", self.spreadsheet_url())
    }

    async fn batch_update(&self, requests: Value) -> BackendResult<()> {
        let url = format!("{}:batchUpdate", self.spreadsheet_url());
        self.send(self.http.post(url).json(&json!({ "requests": requests })))
            .await?;
        Ok(())
    }

    /// Numeric ID of a table's worksheet, or `None` if it does not exist.
    async fn sheet_id(&self, table: Table) -> BackendResult<Option<i64>> {
        let mut ids = self.sheet_ids.lock().await;
        if let Some(id) = ids.get(table.name()) {
            return Ok(Some(*id));
        }
        let request = self
            .http
            .get(self.spreadsheet_url())
            .query(&[("fields", "sheets.properties(sheetId,title)")]);
        let spreadsheet: Spreadsheet = self
            .send(request)
            .await?
            .json()
            .await
            .map_err(transport_error)?;
        ids.clear();
        ids.extend(
            spreadsheet
                .sheets
                .into_iter()
                .map(|s| (s.properties.title, s.properties.sheet_id)),
        );
        Ok(ids.get(table.name()).copied())
    }
}

#[rocket::async_trait]
impl Backend for SheetsBackend {
    async fn read_rows(&self, table: Table) -> BackendResult<Vec<Vec<String>>> {
        let request = self
            .http
            .get(self.values_url(table.name()))
            .query(&[("majorDimension", "ROWS")]);
        let response = match self.send(request).await {
            Ok(response) => response,
            Err(BackendError::Rejected(msg)) if msg.contains(MISSING_SHEET) => {
                return Ok(Vec::new())
            }
            Err(e) => return Err(e),
        };
        let range: ValueRange = response.json().await.map_err(transport_error)?;
        Ok(range.values)
    }

    async fn append_rows(&self, table: Table, rows: Vec<Vec<String>>) -> BackendResult<()> {
        let url = self.values_url(&format!("{}!A1:append", table.name()));
        let request = self
            .http
            .post(url)
            .query(&[("valueInputOption", "RAW"), ("insertDataOption", "INSERT_ROWS")])
            .json(&json!({ "values": rows }));
        self.send(request).await?;
        Ok(())
    }

    async fn update_cell(
        &self,
        table: Table,
        row: usize,
        column: usize,
        value: String,
    ) -> BackendResult<()> {
        let range = format!("{}!{}", table.name(), a1_cell(row, column));
        let request = self
            .http
            .put(self.values_url(&range))
            .query(&[("valueInputOption", "RAW")])
            .json(&json!({ "values": [[value]] }));
        self.send(request).await?;
        Ok(())
    }

    async fn delete_row(&self, table: Table, row: usize) -> BackendResult<()> {
        let sheet_id = self.sheet_id(table).await?.ok_or_else(|| {
            BackendError::Rejected(format!("worksheet {table} does not exist"))
        })?;
        self.batch_update(json!([{
            "deleteDimension": {
                "range": {
                    "sheetId": sheet_id,
                    "dimension": "ROWS",
                    "startIndex": row,
                    "endIndex": row + 1,
                }
            }
        }]))
        .await
    }

    async fn ensure_table(&self, table: Table, headers: Vec<String>) -> BackendResult<()> {
        if self.sheet_id(table).await?.is_none() {
            info!("Creating worksheet {table}");
            self.batch_update(json!([{ "addSheet": { "properties": { "title": table.name() } } }]))
                .await?;
            self.sheet_ids.lock().await.clear();
        }
        if self.read_rows(table).await?.is_empty() {
            self.append_rows(table, vec![headers]).await?;
        }
        Ok(())
    }

    fn requests_per_minute(&self) -> u32 {
        self.requests_per_minute
    }
}

fn transport_error(err: reqwest::Error) -> BackendError {
    BackendError::Transient(err.to_string())
}

async fn check_status(response: Response) -> BackendResult<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    let msg = format!("{status}: {body}");
    Err(match status {
        StatusCode::TOO_MANY_REQUESTS => BackendError::RateLimited(msg),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND => {
            BackendError::Configuration(msg)
        }
        s if s.is_server_error() => BackendError::Transient(msg),
        _ => BackendError::Rejected(msg),
    })
}

/// A1 notation for a zero-based cell position.
fn a1_cell(row: usize, column: usize) -> String {
    format!("{}{}", column_letters(column), row + 1)
}

fn column_letters(column: usize) -> String {
    let mut letters = Vec::new();
    let mut n = column + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a1_notation() {
        assert_eq!(a1_cell(0, 0), "A1");
        assert_eq!(a1_cell(3, 4), "E4");
        assert_eq!(column_letters(25), "Z");
        assert_eq!(column_letters(26), "AA");
        assert_eq!(column_letters(27), "AB");
        assert_eq!(column_letters(701), "ZZ");
        assert_eq!(column_letters(702), "AAA");
    }

    #[test]
    fn credentials_default_token_uri() {
        let key = ServiceAccountKey::from_json(
            r#"{"client_email": "svc@example.iam.gserviceaccount.com", "private_key": "pem"}"#,
        )
        .unwrap();
        assert_eq!(key.token_uri, DEFAULT_TOKEN_URI);
    }

    #[test]
    fn malformed_credentials_are_configuration_errors() {
        assert!(matches!(
            ServiceAccountKey::from_json("not json"),
            Err(BackendError::Configuration(_))
        ));
    }

    #[test]
    fn bad_private_key_is_rejected_up_front() {
        let key = ServiceAccountKey {
            client_email: "svc@example.iam.gserviceaccount.com".to_string(),
            private_key: "not a pem".to_string(),
            token_uri: DEFAULT_TOKEN_URI.to_string(),
        };
        assert!(matches!(
            SheetsBackend::new("sheet", key, 60),
            Err(BackendError::Configuration(_))
        ));
    }
}
