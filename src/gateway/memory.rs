//! Deterministic in-memory gateway used by the test suite and the CLI's
//! offline mode. Supports seeded tables, per-table fault-injection queues,
//! per-table read counters, and programmable procedure handlers.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::{AuthEvent, DataGateway, Filter, GatewayError, Principal, Row, Session, SignUpOutcome};

/// Procedure handler: inspects the call arguments and returns rows to
/// insert on success, simulating the server-side transactional effect.
type ProcedureHandler = Box<dyn Fn(&Value) -> Result<Vec<(String, Row)>, GatewayError> + Send + Sync>;

#[derive(Default)]
struct Inner {
    tables: HashMap<String, Vec<Row>>,
    /// email -> (password, principal)
    accounts: HashMap<String, (String, Principal)>,
    session: Option<Session>,
    read_errors: HashMap<String, VecDeque<GatewayError>>,
    read_counts: HashMap<String, u32>,
    /// When set, sign_up returns neither a user nor a session, emulating
    /// a backend that holds the account until e-mail confirmation.
    confirmation_required: bool,
}

pub struct MemoryGateway {
    inner: Mutex<Inner>,
    procedures: Mutex<HashMap<String, ProcedureHandler>>,
    events: broadcast::Sender<AuthEvent>,
}

impl Default for MemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGateway {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            inner: Mutex::new(Inner::default()),
            procedures: Mutex::new(HashMap::new()),
            events,
        }
    }

    pub fn seed_row(&self, table: &str, row: Value) {
        let row = row
            .as_object()
            .cloned()
            .expect("seeded row must be a JSON object");
        let mut inner = self.inner.lock().unwrap();
        inner.tables.entry(table.to_string()).or_default().push(row);
    }

    pub fn clear_table(&self, table: &str) {
        self.inner.lock().unwrap().tables.remove(table);
    }

    pub fn seed_account(&self, email: &str, password: &str) -> Principal {
        let principal = Principal {
            id: Uuid::new_v4().to_string(),
            email: email.to_string(),
        };
        let mut inner = self.inner.lock().unwrap();
        inner
            .accounts
            .insert(email.to_string(), (password.to_string(), principal.clone()));
        principal
    }

    /// Install a session directly, as if the user signed in earlier.
    pub fn set_session(&self, session: Session) {
        self.inner.lock().unwrap().session = Some(session);
    }

    pub fn clear_session(&self) {
        self.inner.lock().unwrap().session = None;
    }

    /// Queue a read error for the next query against `table`; errors are
    /// consumed first-in first-out, one per read.
    pub fn push_read_error(&self, table: &str, error: GatewayError) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .read_errors
            .entry(table.to_string())
            .or_default()
            .push_back(error);
    }

    /// Number of reads issued against `table` so far.
    pub fn read_count(&self, table: &str) -> u32 {
        self.inner
            .lock()
            .unwrap()
            .read_counts
            .get(table)
            .copied()
            .unwrap_or(0)
    }

    pub fn require_confirmation(&self, required: bool) {
        self.inner.lock().unwrap().confirmation_required = required;
    }

    pub fn set_procedure(
        &self,
        name: &str,
        handler: impl Fn(&Value) -> Result<Vec<(String, Row)>, GatewayError> + Send + Sync + 'static,
    ) {
        self.procedures
            .lock()
            .unwrap()
            .insert(name.to_string(), Box::new(handler));
    }

    pub fn fail_procedure(&self, name: &str, message: &str) {
        let name_owned = name.to_string();
        let message = message.to_string();
        self.set_procedure(name, move |_| {
            Err(GatewayError::Procedure {
                name: name_owned.clone(),
                message: message.clone(),
            })
        });
    }

    pub fn emit(&self, event: AuthEvent) {
        let _ = self.events.send(event);
    }

    fn session_for(&self, principal: Principal) -> Session {
        Session {
            principal,
            access_token: Uuid::new_v4().to_string(),
            expires_at: None,
        }
    }

    fn record_read(inner: &mut Inner, table: &str) -> Result<(), GatewayError> {
        *inner.read_counts.entry(table.to_string()).or_insert(0) += 1;
        if let Some(queue) = inner.read_errors.get_mut(table) {
            if let Some(error) = queue.pop_front() {
                return Err(error);
            }
        }
        Ok(())
    }
}

#[async_trait]
impl DataGateway for MemoryGateway {
    async fn get_session(&self) -> Result<Option<Session>, GatewayError> {
        Ok(self.inner.lock().unwrap().session.clone())
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, GatewayError> {
        let session = {
            let mut inner = self.inner.lock().unwrap();
            let principal = match inner.accounts.get(email) {
                Some((stored, principal)) if stored == password => principal.clone(),
                _ => return Err(GatewayError::InvalidCredentials),
            };
            let session = self.session_for(principal);
            inner.session = Some(session.clone());
            session
        };
        self.emit(AuthEvent::SignedIn(session.clone()));
        Ok(session)
    }

    async fn sign_up(&self, email: &str, password: &str) -> Result<SignUpOutcome, GatewayError> {
        let principal = self.seed_account(email, password);
        let mut inner = self.inner.lock().unwrap();
        if inner.confirmation_required {
            return Ok(SignUpOutcome {
                principal: None,
                session: None,
            });
        }
        let session = self.session_for(principal.clone());
        inner.session = Some(session.clone());
        Ok(SignUpOutcome {
            principal: Some(principal),
            session: Some(session),
        })
    }

    async fn sign_out(&self) -> Result<(), GatewayError> {
        self.inner.lock().unwrap().session = None;
        self.emit(AuthEvent::SignedOut);
        Ok(())
    }

    async fn query_one(&self, table: &str, filter: &Filter) -> Result<Option<Row>, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        Self::record_read(&mut inner, table)?;
        let rows = inner.tables.get(table);
        Ok(rows.and_then(|rows| rows.iter().find(|row| filter.matches(row)).cloned()))
    }

    async fn query_many(
        &self,
        table: &str,
        filter: &Filter,
        _order: Option<&str>,
        limit: Option<u32>,
    ) -> Result<Vec<Row>, GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        Self::record_read(&mut inner, table)?;
        let mut matched: Vec<Row> = inner
            .tables
            .get(table)
            .map(|rows| rows.iter().filter(|row| filter.matches(row)).cloned().collect())
            .unwrap_or_default();
        if let Some(limit) = limit {
            matched.truncate(limit as usize);
        }
        Ok(matched)
    }

    async fn upsert(
        &self,
        table: &str,
        row: Row,
        conflict_keys: &[&str],
    ) -> Result<(), GatewayError> {
        let mut inner = self.inner.lock().unwrap();
        let rows = inner.tables.entry(table.to_string()).or_default();
        let existing = rows.iter_mut().find(|candidate| {
            conflict_keys
                .iter()
                .all(|key| candidate.get(*key) == row.get(*key))
        });
        match existing {
            Some(slot) => *slot = row,
            None => rows.push(row),
        }
        Ok(())
    }

    async fn call_procedure(&self, name: &str, args: Value) -> Result<Value, GatewayError> {
        let inserts = {
            let procedures = self.procedures.lock().unwrap();
            match procedures.get(name) {
                Some(handler) => handler(&args)?,
                None => Vec::new(),
            }
        };
        let mut inner = self.inner.lock().unwrap();
        for (table, row) in inserts {
            inner.tables.entry(table).or_default().push(row);
        }
        Ok(Value::Null)
    }

    fn auth_events(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }
}
