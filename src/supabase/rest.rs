//! PostgREST client for the `todos` table.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use uuid::Uuid;

use super::{SupabaseError, TodoBackend};
use crate::todo::{CategoryFilter, Todo, TodoInsert, TodoPatch};

const TODOS_TABLE: &str = "todos";

/// Supabase client for row operations.
pub struct SupabaseClient {
    client: Client,
    url: String,
    anon_key: String,
}

impl SupabaseClient {
    /// Create a new Supabase client.
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self::with_client(Client::new(), url, anon_key)
    }

    /// Create a client sharing an existing connection pool.
    pub fn with_client(client: Client, url: &str, anon_key: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    /// Get the PostgREST URL.
    fn rest_url(&self) -> String {
        format!("{}/rest/v1", self.url)
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.rest_url(), TODOS_TABLE)
    }

    /// URL for the ordered, optionally filtered select.
    fn select_url(&self, filter: CategoryFilter) -> String {
        let mut url = format!("{}?select=*&order=created_at.desc", self.table_url());
        if let Some(category) = filter.category() {
            url.push_str(&format!(
                "&category=eq.{}",
                urlencoding::encode(category.as_str())
            ));
        }
        url
    }

    fn row_url(&self, id: Uuid) -> String {
        format!("{}?id=eq.{}", self.table_url(), id)
    }

    /// Attach the project key and the caller's identity.
    fn authed(&self, req: RequestBuilder, access_token: &str) -> RequestBuilder {
        req.header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
    }

    /// Send a write request and discard the (minimal) response body.
    async fn send_write(&self, req: RequestBuilder, what: &str) -> Result<(), SupabaseError> {
        let resp = req
            .header("Content-Type", "application/json")
            .header("Prefer", "return=minimal")
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            tracing::warn!(%status, "Failed to {}: {}", what, text);
            return Err(SupabaseError::from_response(status, &text));
        }

        Ok(())
    }
}

#[async_trait]
impl TodoBackend for SupabaseClient {
    async fn select(
        &self,
        access_token: &str,
        filter: CategoryFilter,
    ) -> Result<Vec<Todo>, SupabaseError> {
        let resp = self
            .authed(self.client.get(self.select_url(filter)), access_token)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            tracing::warn!(%status, "Failed to list todos: {}", text);
            return Err(SupabaseError::from_response(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| SupabaseError::Decode(e.to_string()))
    }

    async fn get(&self, access_token: &str, id: Uuid) -> Result<Todo, SupabaseError> {
        let resp = self
            .authed(
                self.client.get(format!("{}&select=*", self.row_url(id))),
                access_token,
            )
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(SupabaseError::from_response(status, &text));
        }

        let rows: Vec<Todo> =
            serde_json::from_str(&text).map_err(|e| SupabaseError::Decode(e.to_string()))?;
        rows.into_iter().next().ok_or(SupabaseError::NotFound(id))
    }

    async fn insert(&self, access_token: &str, row: &TodoInsert<'_>) -> Result<(), SupabaseError> {
        // PostgREST takes an array for bulk insert; we always send one row.
        let req = self
            .authed(self.client.post(self.table_url()), access_token)
            .json(&[row]);
        self.send_write(req, "insert todo").await
    }

    async fn update(
        &self,
        access_token: &str,
        id: Uuid,
        patch: &TodoPatch,
    ) -> Result<(), SupabaseError> {
        let req = self
            .authed(self.client.patch(self.row_url(id)), access_token)
            .json(patch);
        self.send_write(req, "update todo").await
    }

    async fn delete(&self, access_token: &str, id: Uuid) -> Result<(), SupabaseError> {
        let req = self.authed(self.client.delete(self.row_url(id)), access_token);
        self.send_write(req, "delete todo").await
    }
}
