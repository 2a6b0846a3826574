//! Remote Data Gateway port.
//!
//! The only I/O boundary of the crate: session retrieval, credential
//! sign-in/sign-up/sign-out, predicate-based row reads, upserts, and named
//! procedure calls against the hosted backend. The backend enforces
//! row-level authorization server-side and is eventually consistent
//! shortly after writes, which is why callers of this trait retry.

mod memory;
mod rest;

pub use memory::MemoryGateway;
pub use rest::{RestGateway, RestGatewayConfig};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::broadcast;

/// One backend row, untyped. Business tables differ per tenant feature;
/// the authorization core only ever picks a handful of columns out.
pub type Row = serde_json::Map<String, Value>;

/// Tables the authorization core reads.
pub mod tables {
    /// Membership rows linking a principal to a company with a role label.
    pub const COMPANY_USERS: &str = "company_users";
    pub const EMPLOYEES: &str = "employees";
    /// Platform-level super-admin registry.
    pub const SUPER_ADMINS: &str = "super_admins";
    pub const ONBOARDING_PROGRESS: &str = "company_onboarding_progress";
}

/// Named procedures the core invokes.
pub mod procedures {
    /// Atomically creates a company plus the owner membership row.
    pub const ONBOARD_COMPANY: &str = "onboard_company";
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Principal {
    pub id: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub principal: Principal,
    pub access_token: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Outcome of account creation. Some backends return no user object when
/// e-mail confirmation is pending; the sign-up flow falls back to an
/// explicit sign-in in that case.
#[derive(Debug, Clone)]
pub struct SignUpOutcome {
    pub principal: Option<Principal>,
    pub session: Option<Session>,
}

/// Session transitions pushed by the gateway, including token refresh.
#[derive(Debug, Clone)]
pub enum AuthEvent {
    SignedIn(Session),
    SignedOut,
    TokenRefreshed(Session),
}

#[derive(thiserror::Error, Debug, Clone)]
pub enum GatewayError {
    #[error("invalid credentials")]
    InvalidCredentials,
    /// Row-level security rejected the read. Distinct from "no rows":
    /// this shape is what triggers classifier retries.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("procedure {name} failed: {message}")]
    Procedure { name: String, message: String },
    #[error("gateway unavailable: {0}")]
    Unavailable(String),
    #[error("unexpected gateway response: {0}")]
    Protocol(String),
}

impl GatewayError {
    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::PermissionDenied(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self::Protocol(message.into())
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied(_))
    }
}

/// Column predicate for row reads, kept small on purpose: equality and
/// inequality cover everything the classifier asks for.
#[derive(Debug, Clone, PartialEq)]
pub enum Cond {
    Eq(Value),
    Neq(Value),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Cond)>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((column.to_string(), Cond::Eq(value.into())));
        self
    }

    pub fn neq(mut self, column: &str, value: impl Into<Value>) -> Self {
        self.clauses.push((column.to_string(), Cond::Neq(value.into())));
        self
    }

    pub fn clauses(&self) -> &[(String, Cond)] {
        &self.clauses
    }

    /// Whether a row satisfies every clause. Missing columns never match.
    pub fn matches(&self, row: &Row) -> bool {
        self.clauses.iter().all(|(column, cond)| match cond {
            Cond::Eq(expected) => row.get(column) == Some(expected),
            Cond::Neq(expected) => row.get(column).is_some_and(|v| v != expected),
        })
    }
}

#[async_trait]
pub trait DataGateway: Send + Sync {
    async fn get_session(&self) -> Result<Option<Session>, GatewayError>;

    async fn sign_in_with_password(&self, email: &str, password: &str)
        -> Result<Session, GatewayError>;

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, GatewayError>;

    async fn sign_out(&self) -> Result<(), GatewayError>;

    async fn query_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>, GatewayError>;

    async fn query_many(
        &self,
        table: &str,
        filter: &Filter,
        order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Row>, GatewayError>;

    async fn upsert(&self, table: &str, row: Row, conflict_keys: &[&str])
        -> Result<(), GatewayError>;

    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, GatewayError>;

    /// Push channel for session transitions. Every subscriber sees every
    /// event emitted after it subscribes.
    fn auth_events(&self) -> broadcast::Receiver<AuthEvent>;
}
