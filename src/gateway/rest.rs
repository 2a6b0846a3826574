//! Production gateway over a hosted PostgREST/GoTrue-style API.
//!
//! Auth endpoints live under `/auth/v1`, table reads and procedure calls
//! under `/rest/v1`. Row-level security is enforced server-side; a 401/403
//! on a read is surfaced as the permission-denied shape the classifier
//! retries on.

use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::errors::AuthError;

use super::{
    AuthEvent, Cond, DataGateway, Filter, GatewayError, Principal, Row, Session, SignUpOutcome,
};

#[derive(Debug, Clone)]
pub struct RestGatewayConfig {
    /// Base URL of the hosted backend, without a trailing slash.
    pub base_url: String,
    /// Public (anon) API key sent with every request.
    pub api_key: String,
}

impl RestGatewayConfig {
    pub fn from_env() -> Result<Self, AuthError> {
        let base_url = std::env::var("GATEWAY_URL")
            .map_err(|_| AuthError::configuration("GATEWAY_URL not set"))?;
        let api_key = std::env::var("GATEWAY_ANON_KEY")
            .map_err(|_| AuthError::configuration("GATEWAY_ANON_KEY not set"))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        })
    }
}

pub struct RestGateway {
    http: reqwest::Client,
    config: RestGatewayConfig,
    session: Mutex<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl RestGateway {
    pub fn new(config: RestGatewayConfig) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            http: reqwest::Client::new(),
            config,
            session: Mutex::new(None),
            events,
        }
    }

    fn auth_url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.config.base_url, path)
    }

    fn rest_url(&self, table: &str, query: &str) -> String {
        if query.is_empty() {
            format!("{}/rest/v1/{}", self.config.base_url, table)
        } else {
            format!("{}/rest/v1/{}?{}", self.config.base_url, table, query)
        }
    }

    fn bearer(&self) -> String {
        let session = self.session.lock().unwrap();
        match session.as_ref() {
            Some(session) => session.access_token.clone(),
            // PostgREST accepts the anon key as the bearer for public reads.
            None => self.config.api_key.clone(),
        }
    }

    fn commit_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap() = session;
    }

    async fn read_rows(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Row>, GatewayError> {
        let mut query = filter_query(filter);
        if let Some(order) = order {
            push_pair(&mut query, "order", order);
        }
        if let Some(limit) = limit {
            push_pair(&mut query, "limit", &limit.to_string());
        }
        push_pair(&mut query, "select", "*");

        let response = self
            .http
            .get(self.rest_url(table, &query))
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        let response = check_status(response, table).await?;
        response
            .json::<Vec<Row>>()
            .await
            .map_err(|err| GatewayError::protocol(err.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct UserPayload {
    id: String,
    #[serde(default)]
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenPayload {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    user: UserPayload,
}

#[derive(Debug, Deserialize)]
struct SignUpPayload {
    #[serde(default)]
    user: Option<UserPayload>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
}

fn principal_from(user: UserPayload) -> Principal {
    Principal {
        email: user.email.unwrap_or_default(),
        id: user.id,
    }
}

fn session_from(access_token: String, expires_in: Option<i64>, principal: Principal) -> Session {
    Session {
        principal,
        access_token,
        expires_at: expires_in.map(|secs| Utc::now() + Duration::seconds(secs)),
    }
}

/// Renders a filter as a PostgREST query string, e.g.
/// `user_id=eq.u1&role=neq.super_admin`.
fn filter_query(filter: &Filter) -> String {
    let mut query = String::new();
    for (column, cond) in filter.clauses() {
        let (op, value) = match cond {
            Cond::Eq(value) => ("eq", value),
            Cond::Neq(value) => ("neq", value),
        };
        push_pair(&mut query, column, &format!("{op}.{}", value_literal(value)));
    }
    query
}

fn push_pair(query: &mut String, key: &str, value: &str) {
    if !query.is_empty() {
        query.push('&');
    }
    query.push_str(key);
    query.push('=');
    query.push_str(value);
}

fn value_literal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

async fn check_status(
    response: reqwest::Response,
    context: &str,
) -> Result<reqwest::Response, GatewayError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    match status.as_u16() {
        401 | 403 => Err(GatewayError::permission_denied(format!("{context}: {body}"))),
        404 => Err(GatewayError::not_found(context.to_string())),
        _ => Err(GatewayError::unavailable(format!("{context}: {status} {body}"))),
    }
}

#[async_trait]
impl DataGateway for RestGateway {
    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        let session = self.session.lock().unwrap().clone();
        // An expired token is as good as no session.
        match session {
            Some(s) if s.expires_at.is_some_and(|at| at <= Utc::now()) => Ok(None),
            other => Ok(other),
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, GatewayError> {
        let response = self
            .http
            .post(self.auth_url("token?grant_type=password"))
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({"email": email, "password": password}))
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        if response.status().as_u16() == 400 {
            return Err(GatewayError::InvalidCredentials);
        }
        let response = check_status(response, "sign_in").await?;
        let payload: TokenPayload = response
            .json()
            .await
            .map_err(|err| GatewayError::protocol(err.to_string()))?;

        let session = session_from(
            payload.access_token,
            payload.expires_in,
            principal_from(payload.user),
        );
        self.commit_session(Some(session.clone()));
        let _ = self.events.send(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, GatewayError> {
        let response = self
            .http
            .post(self.auth_url("signup"))
            .header("apikey", &self.config.api_key)
            .json(&serde_json::json!({"email": email, "password": password}))
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        let response = check_status(response, "sign_up").await?;
        let payload: SignUpPayload = response
            .json()
            .await
            .map_err(|err| GatewayError::protocol(err.to_string()))?;

        let principal = payload.user.map(principal_from);
        let session = match (&principal, payload.access_token) {
            (Some(principal), Some(token)) => {
                Some(session_from(token, payload.expires_in, principal.clone()))
            }
            _ => None,
        };
        if let Some(session) = &session {
            self.commit_session(Some(session.clone()));
        }
        Ok(SignUpOutcome { principal, session })
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        let response = self
            .http
            .post(self.auth_url("logout"))
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.bearer())
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        check_status(response, "sign_out").await?;
        self.commit_session(None);
        let _ = self.events.send(AuthEvent::SignedOut);
        Ok(())
    }

    async fn query_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>, GatewayError> {
        let rows = self.read_rows(table, filter, None, Some(1)).await?;
        Ok(rows.into_iter().next())
    }

    async fn query_many(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Row>, GatewayError> {
        self.read_rows(table, filter, order, limit).await
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        conflict_keys: &[&str],
    ) -> Result<(), GatewayError> {
        let mut query = String::new();
        if !conflict_keys.is_empty() {
            push_pair(&mut query, "on_conflict", &conflict_keys.join(","));
        }
        let response = self
            .http
            .post(self.rest_url(table, &query))
            .header("apikey", &self.config.api_key)
            .header("Prefer", "resolution=merge-duplicates")
            .bearer_auth(self.bearer())
            .json(&Value::Object(row))
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        check_status(response, table).await?;
        Ok(())
    }

    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, GatewayError> {
        let response = self
            .http
            .post(format!("{}/rest/v1/rpc/{}", self.config.base_url, name))
            .header("apikey", &self.config.api_key)
            .bearer_auth(self.bearer())
            .json(&args)
            .send()
            .await
            .map_err(|err| GatewayError::unavailable(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Procedure {
                name: name.to_string(),
                message: format!("{status} {body}"),
            });
        }
        response
            .json::<Value>()
            .await
            .or_else(|_| Ok(Value::Null))
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_renders_postgrest_operators() {
        let filter = Filter::new()
            .eq("user_id", "u1")
            .eq("is_active", true)
            .neq("role", "super_admin");

        assert_eq!(
            filter_query(&filter),
            "user_id=eq.u1&is_active=eq.true&role=neq.super_admin"
        );
    }

    #[test]
    fn value_literal_keeps_strings_unquoted() {
        assert_eq!(value_literal(&json!("c1")), "c1");
        assert_eq!(value_literal(&json!(true)), "true");
        assert_eq!(value_literal(&json!(42)), "42");
    }
}
