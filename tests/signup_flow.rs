use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use serde_json::json;

use ltip_auth::classifier::RoleClassifier;
use ltip_auth::context::{AuthContext, AuthPhase, SignUpInput};
use ltip_auth::gateway::{tables, DataGateway, GatewayError, MemoryGateway};
use ltip_auth::models::UserType;
use ltip_auth::store::MemoryStore;
use ltip_auth::{AuthConfig, AuthError};

fn fast_config() -> AuthConfig {
    AuthConfig {
        classify_timeout: Duration::from_millis(2_000),
        retry_backoff: Duration::from_millis(5),
        settle_delay: Duration::from_millis(5),
        ..AuthConfig::default()
    }
}

fn context_over(gateway: &Arc<MemoryGateway>) -> AuthContext {
    AuthContext::new(gateway.clone(), Arc::new(MemoryStore::new()), fast_config())
}

fn input() -> SignUpInput {
    SignUpInput {
        email: "founder@acme.example".to_string(),
        password: "password123".to_string(),
        company_name_en: "Acme Holdings".to_string(),
        company_name_ar: Some("أكمي".to_string()),
        phone: None,
    }
}

/// Server-side provisioning: the procedure atomically creates the company
/// and the owner membership row.
fn install_onboarding(gateway: &MemoryGateway) {
    gateway.set_procedure("onboard_company", |args| {
        let owner = args
            .get("owner_id")
            .and_then(|value| value.as_str())
            .ok_or_else(|| GatewayError::protocol("owner_id missing"))?
            .to_string();
        let row = json!({
            "user_id": owner,
            "company_id": "acme",
            "role": "company_admin",
            "is_active": true,
            "permissions": {"dashboard": true, "employees": true}
        })
        .as_object()
        .cloned()
        .unwrap();
        Ok(vec![(tables::COMPANY_USERS.to_string(), row)])
    });
}

#[tokio::test]
async fn sign_up_provisions_and_classifies_the_owner() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    install_onboarding(&gateway);

    let context = context_over(&gateway);
    context.sign_up(input()).await?;

    let snapshot = context.snapshot();
    assert_eq!(snapshot.phase(), AuthPhase::CompanyAdmin);
    let role = snapshot.role.expect("owner must classify");
    assert_eq!(role.user_type, UserType::CompanyAdmin);
    assert_eq!(role.company_id.as_deref(), Some("acme"));
    assert_eq!(context.get_current_company_id().as_deref(), Some("acme"));
    Ok(())
}

#[tokio::test]
async fn sign_up_falls_back_to_sign_in_when_confirmation_withholds_the_user() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.require_confirmation(true);
    install_onboarding(&gateway);

    let context = context_over(&gateway);
    context.sign_up(input()).await?;

    assert_eq!(context.snapshot().phase(), AuthPhase::CompanyAdmin);
    Ok(())
}

#[tokio::test]
async fn failed_provisioning_rejects_and_never_grants_a_role() -> Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.fail_procedure("onboard_company", "company name already taken");

    let context = context_over(&gateway);
    let err = context.sign_up(input()).await.unwrap_err();

    match err {
        AuthError::Gateway(GatewayError::Procedure { name, message }) => {
            assert_eq!(name, "onboard_company");
            assert!(message.contains("already taken"));
        }
        other => panic!("expected the procedure error, got {other:?}"),
    }

    let snapshot = context.snapshot();
    assert!(snapshot.role.is_none());
    assert!(!snapshot.loading);

    // A later classification for the same principal finds no membership
    // row and walks through to the registry check.
    let session = gateway.get_session().await?.expect("account session exists");
    let classifier = RoleClassifier::new(gateway.clone(), fast_config());
    let role = classifier.classify(&session.principal.id, 1).await?;
    assert_eq!(role, None);
    assert_eq!(gateway.read_count(tables::SUPER_ADMINS), 1);
    Ok(())
}
