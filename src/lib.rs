pub mod classifier;
pub mod config;
pub mod context;
pub mod errors;
pub mod gateway;
pub mod guards;
pub mod models;
pub mod store;

// Re-export the items consumers and tests reach for most.
pub use config::AuthConfig;
pub use context::{AuthContext, AuthPhase, AuthSnapshot, SignUpInput};
pub use errors::{AuthError, AuthResult};
pub use guards::{GuardDecision, RouteGuard};
