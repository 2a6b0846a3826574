use std::sync::Arc;

use clap::{Parser, Subcommand};
use serde_json::json;

use ltip_auth::context::{AuthContext, SignUpInput};
use ltip_auth::gateway::{tables, MemoryGateway, RestGateway, RestGatewayConfig};
use ltip_auth::guards::RouteGuard;
use ltip_auth::store::{FileStore, MemoryStore};
use ltip_auth::AuthConfig;

#[derive(Parser)]
#[command(name = "ltip-auth", about = "Role-resolution tooling for the LTIP platform")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Sign in against the configured gateway and print the resolved role.
    Whoami {
        #[arg(long)]
        email: String,
        #[arg(long)]
        password: String,
    },
    /// Run the classification flow against a seeded in-memory backend.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    match cli.command {
        Command::Whoami { email, password } => whoami(&email, &password).await,
        Command::Demo => demo().await,
    }
}

async fn whoami(email: &str, password: &str) -> anyhow::Result<()> {
    let gateway = Arc::new(RestGateway::new(RestGatewayConfig::from_env()?));
    let prefs_path =
        std::env::var("AUTH_PREFS_PATH").unwrap_or_else(|_| "ltip-auth-prefs.json".to_string());
    let prefs = Arc::new(FileStore::open(prefs_path));
    let context = AuthContext::new(gateway, prefs, AuthConfig::from_env()?);
    context.init().await?;

    context.sign_in(email, password).await?;
    report(&context);
    Ok(())
}

async fn demo() -> anyhow::Result<()> {
    let gateway = Arc::new(MemoryGateway::new());
    gateway.seed_account("admin@acme.example", "password123");
    gateway.set_procedure("onboard_company", |args| {
        let owner = args
            .get("owner_id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();
        let row = json!({
            "user_id": owner,
            "company_id": "acme",
            "role": "company_admin",
            "is_active": true,
            "permissions": {"dashboard": true, "employees": true, "grants": true}
        })
        .as_object()
        .cloned()
        .unwrap();
        Ok(vec![(tables::COMPANY_USERS.to_string(), row)])
    });

    let context = AuthContext::new(
        gateway,
        Arc::new(MemoryStore::new()),
        AuthConfig {
            settle_delay: std::time::Duration::from_millis(10),
            ..AuthConfig::default()
        },
    );
    context.init().await?;

    context
        .sign_up(SignUpInput {
            email: "admin@demo.example".to_string(),
            password: "password123".to_string(),
            company_name_en: "Demo Holdings".to_string(),
            company_name_ar: None,
            phone: None,
        })
        .await?;
    report(&context);
    Ok(())
}

fn report(context: &AuthContext) {
    let snapshot = context.snapshot();
    match snapshot.role.as_ref() {
        Some(role) => println!(
            "{} -> {:?} (raw role {:?}, company {:?}, active {:?})",
            role.email, role.user_type, role.role, role.company_id, role.is_active
        ),
        None => println!("no classification source matched"),
    }
    println!("current company scope: {:?}", context.get_current_company_id());
    println!("onboarding complete: {}", context.is_onboarding_complete());
    for guard in [
        RouteGuard::Company,
        RouteGuard::PlatformAdmin,
        RouteGuard::Employee,
        RouteGuard::Authenticated,
    ] {
        println!("{:?} guard -> {:?}", guard, guard.evaluate(&snapshot));
    }
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
