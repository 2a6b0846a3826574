use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use ltip_auth::context::{AuthContext, AuthPhase};
use ltip_auth::gateway::{tables, AuthEvent, GatewayError, MemoryGateway, Principal, Session};
use ltip_auth::models::UserType;
use ltip_auth::store::{MemoryStore, PreferenceStore, ACTIVE_COMPANY_KEY};
use ltip_auth::{AuthConfig, AuthError};

fn fast_config() -> AuthConfig {
    AuthConfig {
        classify_timeout: Duration::from_millis(2_000),
        retry_backoff: Duration::from_millis(5),
        settle_delay: Duration::from_millis(5),
        ..AuthConfig::default()
    }
}

fn context_over(gateway: &Arc<MemoryGateway>, store: &Arc<MemoryStore>) -> AuthContext {
    AuthContext::new(gateway.clone(), store.clone(), fast_config())
}

/// Wait for a background classification to commit.
async fn settled(context: &AuthContext) {
    for _ in 0..200 {
        let snapshot = context.snapshot();
        if !snapshot.loading && snapshot.onboarding_loaded {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("context never settled");
}

#[tokio::test]
async fn sign_in_classifies_and_pins_company_scope() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    let store = Arc::new(MemoryStore::new());
    let principal = gateway.seed_account("admin@c1.example", "password123");
    gateway.seed_row(
        tables::COMPANY_USERS,
        json!({
            "user_id": principal.id,
            "company_id": "c1",
            "role": "hr_admin",
            "is_active": true,
            "permissions": {"employees": true}
        }),
    );

    let context = context_over(&gateway, &store);
    context.sign_in("admin@c1.example", "password123").await?;

    let snapshot = context.snapshot();
    assert_eq!(snapshot.phase(), AuthPhase::CompanyAdmin);
    assert_eq!(context.get_current_company_id().as_deref(), Some("c1"));
    assert!(context.is_company_admin(None));
    assert!(context.is_company_admin(Some("c1")));
    assert!(!context.is_company_admin(Some("c2")));
    assert!(context.has_permission("employees"));
    assert!(context.has_permission("dashboard"));
    assert!(!context.has_permission("cap_table"));

    // A previously set override never redirects a company admin's scope.
    context.set_active_company("c9", None);
    assert_eq!(context.get_current_company_id().as_deref(), Some("c1"));
    Ok(())
}

#[tokio::test]
async fn invalid_credentials_propagate_unchanged() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    let store = Arc::new(MemoryStore::new());
    gateway.seed_account("admin@c1.example", "password123");

    let context = context_over(&gateway, &store);
    let err = context
        .sign_in("admin@c1.example", "wrong")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        AuthError::Gateway(GatewayError::InvalidCredentials)
    ));
    assert_eq!(context.snapshot().phase(), AuthPhase::Unauthenticated);
    Ok(())
}

#[tokio::test]
async fn unknown_principal_resolves_to_unknown_phase() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    let store = Arc::new(MemoryStore::new());
    gateway.seed_account("ghost@example.com", "password123");

    let context = context_over(&gateway, &store);
    context.sign_in("ghost@example.com", "password123").await?;

    let snapshot = context.snapshot();
    assert_eq!(snapshot.phase(), AuthPhase::Unknown);
    assert!(snapshot.role.is_none());
    assert!(!context.is_company_admin(None));
    assert!(!context.is_super_admin());
    assert!(!context.has_permission("dashboard"));
    assert_eq!(context.get_current_company_id(), None);
    Ok(())
}

#[tokio::test]
async fn super_admin_capabilities_and_impersonation_checks() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    let store = Arc::new(MemoryStore::new());
    let principal = gateway.seed_account("ops@platform.example", "password123");
    gateway.seed_row(tables::SUPER_ADMINS, json!({"user_id": principal.id}));

    let context = context_over(&gateway, &store);
    context.sign_in("ops@platform.example", "password123").await?;

    assert!(context.is_super_admin());
    assert!(context.has_permission("anything"));
    assert_eq!(context.get_current_company_id(), None);
    // Without an override, a super-admin is not a company admin.
    assert!(!context.is_company_admin(None));

    context.set_active_company("c2", Some("Acme"));
    assert!(context.is_company_admin(None));
    assert!(context.is_company_admin(Some("c2")));
    assert!(!context.is_company_admin(Some("c3")));
    assert_eq!(context.get_current_company_id().as_deref(), Some("c2"));
    Ok(())
}

#[tokio::test]
async fn sign_out_clears_all_state_and_the_persisted_entry() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    let store = Arc::new(MemoryStore::new());
    let principal = gateway.seed_account("ops@platform.example", "password123");
    gateway.seed_row(tables::SUPER_ADMINS, json!({"user_id": principal.id}));

    let context = context_over(&gateway, &store);
    context.sign_in("ops@platform.example", "password123").await?;
    context.set_active_company("c2", Some("Acme"));
    assert!(store.get(ACTIVE_COMPANY_KEY).is_some());

    context.sign_out().await?;

    let snapshot = context.snapshot();
    assert_eq!(snapshot.phase(), AuthPhase::Unauthenticated);
    assert!(snapshot.role.is_none());
    assert!(snapshot.onboarding.is_none());
    assert!(!snapshot.onboarding_loaded);
    assert!(!snapshot.active_company.is_set());
    assert_eq!(store.get(ACTIVE_COMPANY_KEY), None);
    Ok(())
}

#[tokio::test]
async fn gateway_auth_events_drive_reclassification() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    let store = Arc::new(MemoryStore::new());
    gateway.seed_row(
        tables::EMPLOYEES,
        json!({"user_id": "e1", "company_id": "c1"}),
    );

    let context = context_over(&gateway, &store);
    context.init().await?;
    assert_eq!(context.snapshot().phase(), AuthPhase::Unauthenticated);

    let session = Session {
        principal: Principal {
            id: "e1".to_string(),
            email: "e1@example.com".to_string(),
        },
        access_token: "token".to_string(),
        expires_at: None,
    };
    gateway.set_session(session.clone());
    gateway.emit(AuthEvent::SignedIn(session));

    settled(&context).await;
    assert_eq!(context.snapshot().phase(), AuthPhase::Employee);
    assert!(context.is_employee());
    Ok(())
}

#[tokio::test]
async fn classification_timeout_preserves_the_previous_role() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    let store = Arc::new(MemoryStore::new());
    gateway.seed_row(
        tables::COMPANY_USERS,
        json!({"user_id": "u1", "company_id": "c1", "role": "hr_admin", "is_active": true}),
    );

    // Budget comfortably covers the row-is-present fast path, but not the
    // backoff sleeps taken once the row disappears.
    let config = AuthConfig {
        classify_timeout: Duration::from_millis(80),
        retry_backoff: Duration::from_millis(60),
        max_retries: 2,
        ..fast_config()
    };
    let context = AuthContext::new(gateway.clone(), store.clone(), config);

    let session = Session {
        principal: Principal {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
        },
        access_token: "token".to_string(),
        expires_at: None,
    };
    gateway.set_session(session.clone());
    context.init().await?;
    settled(&context).await;

    let before = context.snapshot().role.expect("first classification succeeds");
    assert_eq!(before.user_type, UserType::CompanyAdmin);

    // The membership row vanishes; the re-classification now sleeps its
    // way past the budget and must not regress the committed role.
    gateway.clear_table(tables::COMPANY_USERS);
    gateway.emit(AuthEvent::TokenRefreshed(session));

    tokio::time::sleep(Duration::from_millis(200)).await;
    settled(&context).await;

    let after = context.snapshot().role.expect("role must survive the timeout");
    assert_eq!(before, after);
    Ok(())
}
