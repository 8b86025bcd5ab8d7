//! PostgREST-style HTTP backend.

use async_trait::async_trait;
use parking_lot::RwLock;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};

use super::backend::{RemoteBackend, RemoteQuery, RemoteResult, RemoteRow};
use crate::error::{Error, RemoteError, Result};
use crate::models::AccountKey;
use crate::util::{excerpt, is_http_url};

const ACCOUNTS_TABLE: &str = "accounts";

/// HTTP backend speaking the PostgREST dialect (`/rest/v1/{table}`).
pub struct RestBackend {
    rest_url: String,
    api_key: String,
    access_token: RwLock<Option<String>>,
    client: Client,
}

impl RestBackend {
    pub fn new(url: impl AsRef<str>, api_key: impl Into<String>) -> Result<Self> {
        let rest_url = normalize_rest_url(url.as_ref())?;
        let api_key = api_key.into().trim().to_string();
        if api_key.is_empty() {
            return Err(Error::InvalidInput(
                "Remote API key must not be empty".to_string(),
            ));
        }

        Ok(Self {
            rest_url,
            api_key,
            access_token: RwLock::new(None),
            client: Client::builder()
                .build()
                .map_err(|error| Error::InvalidInput(error.to_string()))?,
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/{table}", self.rest_url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token
            .read()
            .clone()
            .unwrap_or_else(|| self.api_key.clone());
        request
            .header("apikey", &self.api_key)
            .header("Authorization", format!("Bearer {bearer}"))
            .header("Accept", "application/json")
    }

    async fn send(&self, table: &str, request: RequestBuilder) -> RemoteResult<Response> {
        let response = self
            .authorized(request)
            .send()
            .await
            .map_err(|error| transport_error(table, &error))?;
        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        Err(classify_response(table, status, &body))
    }

    async fn rows(&self, table: &str, response: Response) -> RemoteResult<Vec<RemoteRow>> {
        let body = response
            .text()
            .await
            .map_err(|error| transport_error(table, &error))?;
        if body.trim().is_empty() {
            return Ok(Vec::new());
        }
        let rows: Vec<Value> = serde_json::from_str(&body).map_err(|error| {
            RemoteError::schema(format!("{table}: unexpected response body ({error}): {}", excerpt(&body)))
        })?;
        Ok(rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(row) => Some(row),
                _ => None,
            })
            .collect())
    }

    fn account_key(table: &str, rows: &[RemoteRow]) -> RemoteResult<Option<AccountKey>> {
        match rows.first() {
            None => Ok(None),
            Some(row) => row
                .get("id")
                .and_then(Value::as_i64)
                .map(|key| Some(AccountKey(key)))
                .ok_or_else(|| RemoteError::schema(format!("{table}: account row without numeric id"))),
        }
    }
}

#[async_trait]
impl RemoteBackend for RestBackend {
    async fn upsert(&self, table: &str, row: RemoteRow) -> RemoteResult<()> {
        let request = self
            .client
            .post(self.table_url(table))
            .query(&[("on_conflict", "id")])
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .json(&[Value::Object(row)]);
        self.send(table, request).await?;
        Ok(())
    }

    async fn update(
        &self,
        table: &str,
        id: &str,
        account_key: AccountKey,
        row: RemoteRow,
    ) -> RemoteResult<u64> {
        let request = self
            .client
            .patch(self.table_url(table))
            .query(&[
                ("id", format!("eq.{id}")),
                ("user_id", format!("eq.{account_key}")),
                ("select", "id".to_string()),
            ])
            .header("Prefer", "return=representation")
            .json(&Value::Object(row));
        let response = self.send(table, request).await?;
        Ok(self.rows(table, response).await?.len() as u64)
    }

    async fn delete(&self, table: &str, id: &str, account_key: AccountKey) -> RemoteResult<u64> {
        let request = self
            .client
            .delete(self.table_url(table))
            .query(&[
                ("id", format!("eq.{id}")),
                ("user_id", format!("eq.{account_key}")),
                ("select", "id".to_string()),
            ])
            .header("Prefer", "return=representation");
        let response = self.send(table, request).await?;
        Ok(self.rows(table, response).await?.len() as u64)
    }

    async fn select(&self, table: &str, query: RemoteQuery) -> RemoteResult<Vec<RemoteRow>> {
        let mut params = vec![
            ("select", "*".to_string()),
            ("order", "created_at.desc".to_string()),
            ("limit", query.limit.to_string()),
            ("offset", query.offset.to_string()),
        ];
        if let Some(account_key) = query.account_key {
            params.push(("user_id", format!("eq.{account_key}")));
        }
        let request = self.client.get(self.table_url(table)).query(&params);
        let response = self.send(table, request).await?;
        self.rows(table, response).await
    }

    async fn find_account(&self, external_id: &str) -> RemoteResult<Option<AccountKey>> {
        let request = self.client.get(self.table_url(ACCOUNTS_TABLE)).query(&[
            ("select", "id".to_string()),
            ("external_id", format!("eq.{external_id}")),
            ("limit", "1".to_string()),
        ]);
        let response = self.send(ACCOUNTS_TABLE, request).await?;
        let rows = self.rows(ACCOUNTS_TABLE, response).await?;
        Self::account_key(ACCOUNTS_TABLE, &rows)
    }

    async fn create_account(&self, external_id: &str) -> RemoteResult<AccountKey> {
        let request = self
            .client
            .post(self.table_url(ACCOUNTS_TABLE))
            .query(&[("select", "id")])
            .header("Prefer", "return=representation")
            .json(&json!([{ "external_id": external_id }]));
        let response = self.send(ACCOUNTS_TABLE, request).await?;
        let rows = self.rows(ACCOUNTS_TABLE, response).await?;
        Self::account_key(ACCOUNTS_TABLE, &rows)?
            .ok_or_else(|| RemoteError::schema("accounts: create returned no row"))
    }

    fn set_access_token(&self, access_token: Option<String>) {
        *self.access_token.write() = access_token;
    }
}

/// Append `/rest/v1` to a project URL unless it is already present.
pub fn normalize_rest_url(url: &str) -> Result<String> {
    let trimmed = url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidInput("Remote URL must not be empty".to_string()));
    }
    if !is_http_url(trimmed) {
        return Err(Error::InvalidInput(
            "Remote URL must include http:// or https://".to_string(),
        ));
    }
    if trimmed.ends_with("/rest/v1") {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("{trimmed}/rest/v1"))
    }
}

#[derive(Debug, Default, Deserialize)]
struct PostgrestErrorResponse {
    code: Option<String>,
    message: Option<String>,
    details: Option<String>,
    hint: Option<String>,
}

fn transport_error(table: &str, error: &reqwest::Error) -> RemoteError {
    if error.is_decode() {
        RemoteError::schema(format!("{table}: {error}"))
    } else {
        RemoteError::transient(format!("{table}: {error}"))
    }
}

/// Map an error response onto the remote error taxonomy.
///
/// The message keeps the table, the backend code and the body so
/// column-name mismatches can be diagnosed from logs.
pub fn classify_response(table: &str, status: StatusCode, body: &str) -> RemoteError {
    let payload = serde_json::from_str::<PostgrestErrorResponse>(body).unwrap_or_default();
    let code = payload.code.as_deref().unwrap_or_default();

    let mut message = match payload.message.as_deref() {
        Some(text) => format!("{table}: {} ({})", text.trim(), status.as_u16()),
        None if body.trim().is_empty() => format!("{table}: HTTP {}", status.as_u16()),
        None => format!("{table}: {} ({})", excerpt(body), status.as_u16()),
    };
    if !code.is_empty() {
        message.push_str(&format!(" [{code}]"));
    }
    if let Some(detail) = payload.details.or(payload.hint) {
        message.push_str(&format!(": {}", excerpt(&detail)));
    }

    match code {
        "PGRST205" | "PGRST204" | "42P01" | "42703" => return RemoteError::schema(message),
        "23505" => return RemoteError::conflict(message),
        "42501" => return RemoteError::permission(message),
        _ => {}
    }

    match status {
        StatusCode::UNAUTHORIZED => RemoteError::auth(message),
        StatusCode::FORBIDDEN => RemoteError::permission(message),
        StatusCode::NOT_FOUND | StatusCode::BAD_REQUEST => RemoteError::schema(message),
        StatusCode::CONFLICT => RemoteError::conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => RemoteError::transient(message),
        status if status.is_server_error() => RemoteError::transient(message),
        _ => RemoteError::permission(message),
    }
}
