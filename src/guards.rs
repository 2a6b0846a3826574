//! Route guards.
//!
//! Four polymorphic variants consuming an [`AuthSnapshot`]: each resolves
//! to allow, a redirect target, or a loading placeholder. Guards never
//! fail; missing state always maps to a redirect or a spinner, so a
//! backend outage surfaces as loading rather than a false access-denied.

use crate::context::AuthSnapshot;
use crate::models::role::labels;
use crate::models::UserType;

pub mod paths {
    pub const LOGIN: &str = "/login";
    pub const DASHBOARD: &str = "/dashboard";
    pub const EMPLOYEE_LOGIN: &str = "/employee/login";
    pub const EMPLOYEE_DASHBOARD: &str = "/employee/dashboard";
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GuardDecision {
    Allow,
    Redirect(&'static str),
    Loading,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteGuard {
    /// Company-scoped pages: admins in, employees bounced to their own
    /// dashboard. Also waits for the onboarding snapshot, which its pages
    /// read immediately.
    Company,
    /// Platform operator pages.
    PlatformAdmin,
    /// Employee self-service pages.
    Employee,
    /// Any authenticated principal.
    Authenticated,
}

impl RouteGuard {
    pub fn evaluate(&self, snapshot: &AuthSnapshot) -> GuardDecision {
        match self {
            RouteGuard::Company => company(snapshot),
            RouteGuard::PlatformAdmin => platform_admin(snapshot),
            RouteGuard::Employee => employee(snapshot),
            RouteGuard::Authenticated => authenticated(snapshot),
        }
    }
}

fn user_type(snapshot: &AuthSnapshot) -> Option<UserType> {
    snapshot.role.as_ref().map(|role| role.user_type)
}

fn company(snapshot: &AuthSnapshot) -> GuardDecision {
    let kind = user_type(snapshot);
    let waiting_for_onboarding = !snapshot.onboarding_loaded
        && kind.is_some()
        && kind != Some(UserType::Employee);
    if snapshot.loading || waiting_for_onboarding {
        return GuardDecision::Loading;
    }
    if snapshot.principal.is_none() {
        return GuardDecision::Redirect(paths::LOGIN);
    }
    match kind {
        Some(UserType::Employee) => GuardDecision::Redirect(paths::EMPLOYEE_DASHBOARD),
        Some(_) => GuardDecision::Allow,
        None => GuardDecision::Redirect(paths::LOGIN),
    }
}

fn platform_admin(snapshot: &AuthSnapshot) -> GuardDecision {
    if snapshot.loading {
        return GuardDecision::Loading;
    }
    if snapshot.principal.is_none() {
        return GuardDecision::Redirect(paths::LOGIN);
    }
    // The raw label also passes: a company-scoped "super_admin" may reach
    // operator pages its user_type alone would not grant.
    let allowed = snapshot.role.as_ref().is_some_and(|role| {
        role.user_type == UserType::SuperAdmin || role.role == labels::SUPER_ADMIN
    });
    if allowed {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect(paths::DASHBOARD)
    }
}

fn employee(snapshot: &AuthSnapshot) -> GuardDecision {
    if snapshot.loading {
        return GuardDecision::Loading;
    }
    let allowed =
        snapshot.principal.is_some() && user_type(snapshot) == Some(UserType::Employee);
    if allowed {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect(paths::EMPLOYEE_LOGIN)
    }
}

fn authenticated(snapshot: &AuthSnapshot) -> GuardDecision {
    if snapshot.loading {
        return GuardDecision::Loading;
    }
    if snapshot.principal.is_some() {
        GuardDecision::Allow
    } else {
        GuardDecision::Redirect(paths::LOGIN)
    }
}
