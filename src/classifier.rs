//! Role classifier.
//!
//! Derives a principal's identity class from membership, employee, and
//! registry data in a fixed precedence order:
//!
//! 1. any membership row, active or not, any label -> company admin
//! 2. an employee row -> employee
//! 3. neither found -> linear backoff, re-run from 1 (eventual consistency
//!    right after account creation)
//! 4. after the retry budget: filtered active-membership short-circuit
//! 5. membership safety net (label defaulted when absent)
//! 6. registry lookup, re-verifying zero company association before
//!    granting super-admin
//!
//! The whole chain races a hard wall-clock timeout. A permission-denied
//! read on the membership check retries like "not found": right after
//! sign-up, row-level security may briefly reject reads the session is
//! actually entitled to.

use std::sync::Arc;

use crate::config::AuthConfig;
use crate::errors::{AuthError, AuthResult};
use crate::gateway::{tables, DataGateway, Filter, Principal, Session};
use crate::models::role::labels;
use crate::models::ClassifiedRole;

pub struct RoleClassifier {
    gateway: Arc<dyn DataGateway>,
    config: AuthConfig,
}

impl RoleClassifier {
    pub fn new(gateway: Arc<dyn DataGateway>, config: AuthConfig) -> Self {
        Self { gateway, config }
    }

    /// Classify the principal, returning `None` when no source table knows
    /// them (the caller records `user_type = unknown`).
    ///
    /// Fails with [`AuthError::ClassificationTimeout`] when the chain
    /// exceeds the configured budget and [`AuthError::Classification`] for
    /// any non-retryable lookup failure.
    pub async fn classify(
        &self,
        principal_id: &str,
        max_retries: u32,
    ) -> AuthResult<Option<ClassifiedRole>> {
        match tokio::time::timeout(
            self.config.classify_timeout,
            self.resolve(principal_id, max_retries),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!(user_id = %principal_id, "classification timed out");
                Err(AuthError::ClassificationTimeout)
            }
        }
    }

    async fn resolve(
        &self,
        principal_id: &str,
        max_retries: u32,
    ) -> AuthResult<Option<ClassifiedRole>> {
        let session = self.await_session().await?;
        let principal = Principal {
            id: principal_id.to_string(),
            email: session.principal.email,
        };

        let by_user = Filter::new().eq("user_id", principal_id);

        // Steps 1-3: membership, then employee, with linear backoff in
        // between attempts.
        for attempt in 0..=max_retries {
            match self
                .gateway
                .query_many(tables::COMPANY_USERS, &by_user, None, None)
                .await
            {
                Ok(rows) => {
                    if let Some(row) = rows.first() {
                        tracing::debug!(user_id = %principal.id, attempt, "membership match");
                        return Ok(Some(ClassifiedRole::from_membership(&principal, row)));
                    }
                }
                Err(err) if err.is_permission_denied() => {
                    tracing::debug!(
                        user_id = %principal.id,
                        attempt,
                        error = %err,
                        "membership read rejected, will retry"
                    );
                }
                Err(err) => return Err(AuthError::classification(err.to_string())),
            }

            match self
                .gateway
                .query_one(tables::EMPLOYEES, &by_user)
                .await
                .map_err(|err| AuthError::classification(err.to_string()))?
            {
                Some(row) => {
                    tracing::debug!(user_id = %principal.id, attempt, "employee match");
                    return Ok(Some(ClassifiedRole::from_employee(&principal, &row)));
                }
                None => {}
            }

            if attempt < max_retries {
                tokio::time::sleep(self.config.backoff_for(attempt)).await;
            }
        }

        // Step 4: cheap filtered read for an active, non-super_admin
        // membership row before walking the heavier registry path.
        let active_member = Filter::new()
            .eq("user_id", principal_id)
            .eq("is_active", true)
            .neq("role", labels::SUPER_ADMIN);
        if let Some(row) = self
            .gateway
            .query_one(tables::COMPANY_USERS, &active_member)
            .await
            .map_err(|err| AuthError::classification(err.to_string()))?
        {
            tracing::debug!(user_id = %principal.id, "active membership match");
            return Ok(Some(ClassifiedRole::from_membership(&principal, &row)));
        }

        // Step 5: membership safety net. Rows appearing this late mean a
        // write landed mid-chain; membership still outranks the registry.
        let late_rows = self
            .gateway
            .query_many(tables::COMPANY_USERS, &by_user, None, None)
            .await
            .map_err(|err| AuthError::classification(err.to_string()))?;
        if let Some(row) = late_rows.first() {
            tracing::debug!(user_id = %principal.id, "late membership match");
            return Ok(Some(ClassifiedRole::from_membership(&principal, row)));
        }

        // Step 6: the registry grants super-admin only with zero company
        // association, re-checked once more against in-flight writes.
        if self
            .gateway
            .query_one(tables::SUPER_ADMINS, &by_user)
            .await
            .map_err(|err| AuthError::classification(err.to_string()))?
            .is_none()
        {
            tracing::debug!(user_id = %principal.id, "no classification source matched");
            return Ok(None);
        }

        let confirm_rows = self
            .gateway
            .query_many(tables::COMPANY_USERS, &by_user, None, None)
            .await
            .map_err(|err| AuthError::classification(err.to_string()))?;
        if let Some(row) = confirm_rows.first() {
            return Ok(Some(ClassifiedRole::from_membership(&principal, row)));
        }
        if let Some(row) = self
            .gateway
            .query_one(tables::EMPLOYEES, &by_user)
            .await
            .map_err(|err| AuthError::classification(err.to_string()))?
        {
            return Ok(Some(ClassifiedRole::from_employee(&principal, &row)));
        }

        tracing::info!(user_id = %principal.id, "classified as platform super-admin");
        Ok(Some(ClassifiedRole::platform_super_admin(&principal)))
    }

    /// Reads can only be authorized against a live session. Right after
    /// sign-in the session may not be observable yet; retry briefly.
    async fn await_session(&self) -> AuthResult<Session> {
        for attempt in 0..=self.config.session_retries {
            match self.gateway.get_session().await {
                Ok(Some(session)) => return Ok(session),
                Ok(None) => {}
                Err(err) => return Err(AuthError::classification(err.to_string())),
            }
            if attempt < self.config.session_retries {
                tokio::time::sleep(self.config.backoff_for(attempt)).await;
            }
        }
        Err(AuthError::classification("no session"))
    }
}
