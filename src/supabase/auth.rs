//! GoTrue (Supabase Auth) client.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use serde::de::DeserializeOwned;

use super::types::{Session, SignUpOutcome, TokenResponse, User};
use super::{AuthProvider, SupabaseError};

/// Client for the `/auth/v1` endpoints.
pub struct GoTrueClient {
    client: Client,
    url: String,
    anon_key: String,
}

impl GoTrueClient {
    pub fn new(url: &str, anon_key: &str) -> Self {
        Self::with_client(Client::new(), url, anon_key)
    }

    pub fn with_client(client: Client, url: &str, anon_key: &str) -> Self {
        Self {
            client,
            url: url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
        }
    }

    fn auth_url(&self) -> String {
        format!("{}/auth/v1", self.url)
    }

    /// POST a JSON body and decode the JSON response.
    async fn post_json<T: DeserializeOwned>(
        &self,
        url: String,
        body: serde_json::Value,
    ) -> Result<T, SupabaseError> {
        let resp = self
            .client
            .post(url)
            .header("apikey", &self.anon_key)
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await?;

        let status = resp.status();
        let text = resp.text().await?;

        if !status.is_success() {
            return Err(SupabaseError::from_response(status, &text));
        }

        serde_json::from_str(&text).map_err(|e| SupabaseError::Decode(e.to_string()))
    }
}

/// Interpret a `/signup` response. With autoconfirm on it is a token grant;
/// otherwise it is the bare user awaiting email confirmation.
fn parse_sign_up(value: serde_json::Value) -> Result<SignUpOutcome, SupabaseError> {
    if value.get("access_token").is_some() {
        let token: TokenResponse =
            serde_json::from_value(value).map_err(|e| SupabaseError::Decode(e.to_string()))?;
        let session = token.into_session(Utc::now());
        return Ok(SignUpOutcome {
            user: session.user.clone(),
            session: Some(session),
        });
    }

    let user_value = value.get("user").cloned().unwrap_or(value);
    let user: User =
        serde_json::from_value(user_value).map_err(|e| SupabaseError::Decode(e.to_string()))?;
    Ok(SignUpOutcome {
        user,
        session: None,
    })
}

#[async_trait]
impl AuthProvider for GoTrueClient {
    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, SupabaseError> {
        let value: serde_json::Value = self
            .post_json(
                format!("{}/signup", self.auth_url()),
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        parse_sign_up(value)
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, SupabaseError> {
        let token: TokenResponse = self
            .post_json(
                format!("{}/token?grant_type=password", self.auth_url()),
                serde_json::json!({ "email": email, "password": password }),
            )
            .await?;
        Ok(token.into_session(Utc::now()))
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, SupabaseError> {
        let token: TokenResponse = self
            .post_json(
                format!("{}/token?grant_type=refresh_token", self.auth_url()),
                serde_json::json!({ "refresh_token": refresh_token }),
            )
            .await?;
        Ok(token.into_session(Utc::now()))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), SupabaseError> {
        let resp = self
            .client
            .post(format!("{}/logout", self.auth_url()))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", access_token))
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(SupabaseError::from_response(status, &text));
        }
        Ok(())
    }
}
