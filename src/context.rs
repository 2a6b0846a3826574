//! Session/auth context.
//!
//! Single source of truth for authentication and authorization state:
//! current principal and session, classified role, active-company override,
//! and the onboarding snapshot. All mutation flows through [`AuthContext`];
//! guards and pages only ever see cloned snapshots. Consumers observe
//! transitions through a watch channel updated synchronously with every
//! commit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::classifier::RoleClassifier;
use crate::config::AuthConfig;
use crate::errors::{AuthError, AuthResult};
use crate::gateway::{procedures, tables, AuthEvent, DataGateway, Filter, Principal, Session};
use crate::models::role::labels;
use crate::models::{ActiveCompany, ClassifiedRole, OnboardingProgress, UserType};
use crate::store::{PreferenceStore, ACTIVE_COMPANY_KEY};

/// Read-only view of the context state at one commit point.
#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    pub principal: Option<Principal>,
    pub session: Option<Session>,
    pub role: Option<ClassifiedRole>,
    pub loading: bool,
    pub onboarding: Option<OnboardingProgress>,
    pub onboarding_loaded: bool,
    pub active_company: ActiveCompany,
}

/// The role dimension of the state machine, derived per snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPhase {
    Unauthenticated,
    Loading,
    SuperAdmin,
    CompanyAdmin,
    Employee,
    Unknown,
}

impl AuthSnapshot {
    pub fn phase(&self) -> AuthPhase {
        if self.loading {
            return AuthPhase::Loading;
        }
        if self.principal.is_none() {
            return AuthPhase::Unauthenticated;
        }
        match self.role.as_ref().map(|role| role.user_type) {
            Some(UserType::SuperAdmin) => AuthPhase::SuperAdmin,
            Some(UserType::CompanyAdmin) => AuthPhase::CompanyAdmin,
            Some(UserType::Employee) => AuthPhase::Employee,
            Some(UserType::Unknown) | None => AuthPhase::Unknown,
        }
    }
}

#[derive(Debug, Clone)]
pub struct SignUpInput {
    pub email: String,
    pub password: String,
    pub company_name_en: String,
    pub company_name_ar: Option<String>,
    pub phone: Option<String>,
}

struct ContextInner {
    gateway: Arc<dyn DataGateway>,
    prefs: Arc<dyn PreferenceStore>,
    classifier: RoleClassifier,
    config: AuthConfig,
    state: Mutex<AuthSnapshot>,
    watch_tx: watch::Sender<AuthSnapshot>,
    /// Spans the whole sign-up pipeline so a concurrently fired gateway
    /// auth-change notification does not re-enter classification with
    /// half-provisioned state.
    signup_in_progress: AtomicBool,
    listener: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for ContextInner {
    fn drop(&mut self) {
        if let Some(handle) = self.listener.lock().unwrap().take() {
            handle.abort();
        }
    }
}

/// Cheap-clone handle; one logical context per running application.
#[derive(Clone)]
pub struct AuthContext {
    inner: Arc<ContextInner>,
}

impl AuthContext {
    pub fn new(
        gateway: Arc<dyn DataGateway>,
        prefs: Arc<dyn PreferenceStore>,
        config: AuthConfig,
    ) -> Self {
        let (watch_tx, _) = watch::channel(AuthSnapshot::default());
        Self {
            inner: Arc::new(ContextInner {
                classifier: RoleClassifier::new(gateway.clone(), config.clone()),
                gateway,
                prefs,
                config,
                state: Mutex::new(AuthSnapshot::default()),
                watch_tx,
                signup_in_progress: AtomicBool::new(false),
                listener: Mutex::new(None),
            }),
        }
    }

    /// Resume any existing session and start reacting to gateway-pushed
    /// auth-state changes. Call once per context instance.
    pub async fn init(&self) -> AuthResult<()> {
        self.spawn_listener();

        let session = match self.inner.gateway.get_session().await {
            Ok(session) => session,
            Err(err) => {
                tracing::warn!(error = %err, "session restore failed");
                None
            }
        };

        match session {
            Some(session) => {
                self.begin_session(session.clone());
                self.classify_and_commit(&session.principal.id, self.inner.config.max_retries)
                    .await;
            }
            None => self.commit(|state| *state = AuthSnapshot::default()),
        }
        Ok(())
    }

    /// Stop the auth-event listener. In-flight classifications resolve
    /// last-write-wins, which the design tolerates.
    pub fn dispose(&self) {
        if let Some(handle) = self.inner.listener.lock().unwrap().take() {
            handle.abort();
        }
    }

    fn spawn_listener(&self) {
        let mut events = self.inner.gateway.auth_events();
        // The task must not keep the context alive: a weak handle lets the
        // last real owner drop the context and stop the loop.
        let weak = Arc::downgrade(&self.inner);
        let handle = tokio::spawn(async move {
            while let Ok(event) = events.recv().await {
                let Some(inner) = weak.upgrade() else { break };
                let context = AuthContext { inner };
                if context.inner.signup_in_progress.load(Ordering::SeqCst) {
                    tracing::debug!("auth event ignored during sign-up");
                    continue;
                }
                match event {
                    AuthEvent::SignedIn(session) | AuthEvent::TokenRefreshed(session) => {
                        let principal_id = session.principal.id.clone();
                        context.begin_session(session);
                        context
                            .classify_and_commit(&principal_id, context.inner.config.max_retries)
                            .await;
                    }
                    AuthEvent::SignedOut => context.apply_signed_out(),
                }
            }
        });
        *self.inner.listener.lock().unwrap() = Some(handle);
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        self.inner.state.lock().unwrap().clone()
    }

    /// Observe every committed state transition.
    pub fn subscribe(&self) -> watch::Receiver<AuthSnapshot> {
        self.inner.watch_tx.subscribe()
    }

    fn commit(&self, mutate: impl FnOnce(&mut AuthSnapshot)) {
        let snapshot = {
            let mut state = self.inner.state.lock().unwrap();
            mutate(&mut state);
            state.clone()
        };
        let _ = self.inner.watch_tx.send(snapshot);
    }

    fn begin_session(&self, session: Session) {
        self.commit(|state| {
            state.principal = Some(session.principal.clone());
            state.session = Some(session);
            state.loading = true;
        });
    }

    // ---------------------------------------------------------------------
    // Credential operations
    // ---------------------------------------------------------------------

    /// Gateway errors (invalid credentials included) propagate unchanged;
    /// the login form decides wording. No retries wrap this call.
    pub async fn sign_in(&self, email: &str, password: &str) -> AuthResult<()> {
        let session = self
            .inner
            .gateway
            .sign_in_with_password(email, password)
            .await?;
        tracing::info!(user_id = %session.principal.id, "signed in");
        let principal_id = session.principal.id.clone();
        self.begin_session(session);
        self.classify_and_commit(&principal_id, self.inner.config.max_retries)
            .await;
        Ok(())
    }

    /// Multi-step provisioning: create the account, guarantee a session,
    /// invoke the company-onboarding procedure, wait out the consistency
    /// window, then classify with an elevated retry budget.
    pub async fn sign_up(&self, input: SignUpInput) -> AuthResult<()> {
        self.inner.signup_in_progress.store(true, Ordering::SeqCst);
        let result = self.sign_up_inner(&input).await;
        self.inner.signup_in_progress.store(false, Ordering::SeqCst);
        if result.is_err() {
            self.commit(|state| state.loading = false);
        }
        result
    }

    async fn sign_up_inner(&self, input: &SignUpInput) -> AuthResult<()> {
        let gateway = &self.inner.gateway;
        let outcome = gateway.sign_up(&input.email, &input.password).await?;

        let principal = match outcome.principal {
            Some(principal) => principal,
            // Some backends hold the account until e-mail confirmation.
            None => match gateway
                .sign_in_with_password(&input.email, &input.password)
                .await
            {
                Ok(session) => session.principal,
                Err(_) => {
                    return Err(AuthError::sign_up(
                        "account created; verify your email, then sign in",
                    ))
                }
            },
        };

        // Subsequent writes are authorization-checked against the session
        // identity, so one must exist before provisioning starts.
        let has_session = gateway.get_session().await.ok().flatten().is_some();
        if !has_session {
            gateway
                .sign_in_with_password(&input.email, &input.password)
                .await
                .map_err(|_| AuthError::sign_up("try signing in manually"))?;
        }
        if let Ok(Some(session)) = gateway.get_session().await {
            self.begin_session(session);
        }

        gateway
            .call_procedure(
                procedures::ONBOARD_COMPANY,
                json!({
                    "owner_id": principal.id,
                    "email": input.email,
                    "company_name_en": input.company_name_en,
                    "company_name_ar": input.company_name_ar,
                    "phone": input.phone,
                }),
            )
            .await?;

        // Consistency workaround, not a correctness guarantee: give the
        // membership write a moment to become visible to RLS-checked reads.
        tokio::time::sleep(self.inner.config.settle_delay).await;

        if gateway.get_session().await.ok().flatten().is_none() {
            return Err(AuthError::SessionLost);
        }

        tracing::info!(user_id = %principal.id, "company provisioned, classifying");
        self.classify_and_commit(&principal.id, self.inner.config.signup_retries)
            .await;
        Ok(())
    }

    /// On success, synchronously clears role, onboarding state, the
    /// active-company override, and the persisted impersonation entry.
    pub async fn sign_out(&self) -> AuthResult<()> {
        self.inner.gateway.sign_out().await?;
        self.apply_signed_out();
        tracing::info!("signed out");
        Ok(())
    }

    fn apply_signed_out(&self) {
        self.inner.prefs.delete(ACTIVE_COMPANY_KEY);
        self.commit(|state| *state = AuthSnapshot::default());
    }

    // ---------------------------------------------------------------------
    // Classification
    // ---------------------------------------------------------------------

    async fn classify_and_commit(&self, principal_id: &str, retries: u32) {
        self.commit(|state| state.loading = true);

        match self.inner.classifier.classify(principal_id, retries).await {
            Ok(role) => self.apply_role(role).await,
            Err(err) if err.is_timeout() => {
                // Prior role preserved; onboarding marked loaded so guards
                // do not hang on a backend that never answered.
                self.commit(|state| {
                    state.onboarding_loaded = true;
                    state.loading = false;
                });
            }
            Err(err) => {
                tracing::warn!(user_id = %principal_id, error = %err, "classification failed");
                self.commit(|state| {
                    state.role = None;
                    state.onboarding = None;
                    state.onboarding_loaded = true;
                    state.active_company.clear();
                    state.loading = false;
                });
            }
        }
    }

    // The override is rebuilt wholesale on every successful
    // classification, which also covers the required reset whenever the
    // resolved user_type changes.
    async fn apply_role(&self, role: Option<ClassifiedRole>) {
        let (active_company, onboarding) = match role.as_ref() {
            Some(resolved) => match resolved.company_id.as_deref() {
                // Company-scoped roles are always pinned to their own
                // company; no impersonation.
                Some(company_id) => (
                    ActiveCompany::new(company_id, None),
                    self.fetch_onboarding(company_id).await,
                ),
                // True super-admin: restore the persisted impersonation
                // target, if any.
                None => (self.restore_active_company(), None),
            },
            None => (ActiveCompany::default(), None),
        };

        self.commit(|state| {
            state.active_company = active_company;
            state.onboarding = onboarding;
            state.onboarding_loaded = true;
            state.role = role;
            state.loading = false;
        });
    }

    async fn fetch_onboarding(&self, company_id: &str) -> Option<OnboardingProgress> {
        let filter = Filter::new().eq("company_id", company_id);
        match self
            .inner
            .gateway
            .query_one(tables::ONBOARDING_PROGRESS, &filter)
            .await
        {
            Ok(row) => row.as_ref().and_then(OnboardingProgress::from_row),
            Err(err) => {
                // Missing progress counts as complete, so a failed read
                // degrades to "complete" instead of blocking guards.
                tracing::warn!(company_id, error = %err, "onboarding read failed");
                None
            }
        }
    }

    fn restore_active_company(&self) -> ActiveCompany {
        self.inner
            .prefs
            .get(ACTIVE_COMPANY_KEY)
            .and_then(|raw| serde_json::from_str(&raw).ok())
            .unwrap_or_default()
    }

    // ---------------------------------------------------------------------
    // Capability checks and scoping
    // ---------------------------------------------------------------------

    pub fn is_super_admin(&self) -> bool {
        self.snapshot()
            .role
            .is_some_and(|role| role.user_type == UserType::SuperAdmin)
    }

    pub fn is_employee(&self) -> bool {
        self.snapshot()
            .role
            .is_some_and(|role| role.user_type == UserType::Employee)
    }

    /// True for a classified company admin, and also for a platform
    /// super-admin with an active-company override set: impersonation
    /// satisfies company-admin checks on purpose.
    pub fn is_company_admin(&self, company_id: Option<&str>) -> bool {
        let snapshot = self.snapshot();
        let Some(role) = snapshot.role.as_ref() else {
            return false;
        };

        if role.role == labels::SUPER_ADMIN {
            if let Some(active) = snapshot.active_company.id.as_deref() {
                if company_id.map_or(true, |wanted| wanted == active) {
                    return true;
                }
            }
        }

        role.user_type == UserType::CompanyAdmin
            && company_id.map_or(true, |wanted| role.company_id.as_deref() == Some(wanted))
    }

    pub fn has_permission(&self, gate: &str) -> bool {
        self.snapshot().role.is_some_and(|role| role.allows(gate))
    }

    /// The single authoritative scoping function: every company-scoped
    /// query must use this id. A raw super-admin label scopes to the
    /// impersonation target (possibly none); anyone else to their own
    /// company.
    pub fn get_current_company_id(&self) -> Option<String> {
        let snapshot = self.snapshot();
        match snapshot.role.as_ref() {
            Some(role) if role.role == labels::SUPER_ADMIN => snapshot.active_company.id,
            Some(role) => role.company_id.clone(),
            None => None,
        }
    }

    // ---------------------------------------------------------------------
    // Impersonation
    // ---------------------------------------------------------------------

    /// Persists only under a raw super-admin label; company admins are
    /// re-pinned to their own company on the next classification anyway.
    pub fn set_active_company(&self, id: &str, name: Option<&str>) {
        let active = ActiveCompany::new(id, name.map(str::to_string));
        let persist = self
            .snapshot()
            .role
            .is_some_and(|role| role.role == labels::SUPER_ADMIN);
        if persist {
            match serde_json::to_string(&active) {
                Ok(raw) => self.inner.prefs.set(ACTIVE_COMPANY_KEY, &raw),
                Err(err) => tracing::warn!(error = %err, "failed to encode active company"),
            }
        }
        tracing::debug!(company_id = %id, persisted = persist, "active company set");
        self.commit(|state| state.active_company = active);
    }

    pub fn clear_active_company(&self) {
        self.inner.prefs.delete(ACTIVE_COMPANY_KEY);
        self.commit(|state| state.active_company.clear());
    }

    // ---------------------------------------------------------------------
    // Onboarding
    // ---------------------------------------------------------------------

    pub async fn refresh_onboarding_progress(&self) {
        let onboarding = match self.get_current_company_id() {
            Some(company_id) => self.fetch_onboarding(&company_id).await,
            None => None,
        };
        self.commit(|state| {
            state.onboarding = onboarding;
            state.onboarding_loaded = true;
        });
    }

    /// Complete when no progress row exists or all five milestones are hit.
    pub fn is_onboarding_complete(&self) -> bool {
        OnboardingProgress::complete(self.snapshot().onboarding.as_ref())
    }
}
