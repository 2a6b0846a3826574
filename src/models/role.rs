use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::gateway::{Principal, Row};

/// Raw role labels as stored in backend rows. These are free-form data;
/// only [`UserType`] is authoritative for authorization decisions.
pub mod labels {
    pub const SUPER_ADMIN: &str = "super_admin";
    pub const COMPANY_ADMIN: &str = "company_admin";
    pub const EMPLOYEE: &str = "employee";
}

/// Per-route permission gate keys carried on company-admin membership rows.
pub mod gates {
    pub const DASHBOARD: &str = "dashboard";
    pub const USERS: &str = "users";
    pub const EMPLOYEES: &str = "employees";
    pub const LTIP_POOLS: &str = "ltip_pools";
    pub const PLANS: &str = "plans";
    pub const VESTING_SCHEDULES: &str = "vesting_schedules";
    pub const VESTING_EVENTS: &str = "vesting_events";
    pub const TRANSFERS: &str = "transfers";
    pub const PERFORMANCE_METRICS: &str = "performance_metrics";
    pub const GRANTS: &str = "grants";
    pub const DOCUMENTS: &str = "documents";
    pub const CAP_TABLE: &str = "cap_table";
    pub const PORTFOLIO: &str = "portfolio";
    pub const SETTINGS: &str = "settings";
}

/// The authoritative identity class of a principal.
///
/// A principal with any membership row is always a company admin, even when
/// the row's raw label says "super_admin": platform super-admins are exactly
/// the principals with zero company association plus a registry row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UserType {
    SuperAdmin,
    CompanyAdmin,
    Employee,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedRole {
    pub user_id: String,
    pub email: String,
    /// Null only for a true platform super-admin.
    pub company_id: Option<String>,
    /// Raw label from whichever source row matched. May disagree with
    /// `user_type`.
    pub role: String,
    pub user_type: UserType,
    pub is_active: bool,
    /// Gate-key map, populated only for the company-admin class.
    pub permissions: Option<HashMap<String, bool>>,
}

impl ClassifiedRole {
    /// Company-admin classification from a membership row. The raw label
    /// defaults to "company_admin" when the row carries none.
    pub fn from_membership(principal: &Principal, row: &Row) -> Self {
        Self {
            user_id: principal.id.clone(),
            email: principal.email.clone(),
            company_id: row_string(row, "company_id"),
            role: row_string(row, "role").unwrap_or_else(|| labels::COMPANY_ADMIN.to_string()),
            user_type: UserType::CompanyAdmin,
            is_active: row_bool(row, "is_active"),
            permissions: row_permissions(row),
        }
    }

    pub fn from_employee(principal: &Principal, row: &Row) -> Self {
        Self {
            user_id: principal.id.clone(),
            email: principal.email.clone(),
            company_id: row_string(row, "company_id"),
            role: labels::EMPLOYEE.to_string(),
            user_type: UserType::Employee,
            is_active: true,
            permissions: None,
        }
    }

    pub fn platform_super_admin(principal: &Principal) -> Self {
        Self {
            user_id: principal.id.clone(),
            email: principal.email.clone(),
            company_id: None,
            role: labels::SUPER_ADMIN.to_string(),
            user_type: UserType::SuperAdmin,
            is_active: true,
            permissions: None,
        }
    }

    /// Capability check for one gate key. Super-admins pass everything and
    /// the dashboard gate is always open regardless of the stored map.
    pub fn allows(&self, gate: &str) -> bool {
        if self.user_type == UserType::SuperAdmin || gate == gates::DASHBOARD {
            return true;
        }
        self.permissions
            .as_ref()
            .and_then(|map| map.get(gate).copied())
            .unwrap_or(false)
    }
}

fn row_string(row: &Row, column: &str) -> Option<String> {
    row.get(column).and_then(Value::as_str).map(str::to_string)
}

fn row_bool(row: &Row, column: &str) -> bool {
    row.get(column).and_then(Value::as_bool).unwrap_or(false)
}

fn row_permissions(row: &Row) -> Option<HashMap<String, bool>> {
    let object = row.get("permissions")?.as_object()?;
    Some(
        object
            .iter()
            .map(|(key, value)| (key.clone(), value.as_bool().unwrap_or(false)))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn principal() -> Principal {
        Principal {
            id: "u1".to_string(),
            email: "u1@example.com".to_string(),
        }
    }

    fn row(value: serde_json::Value) -> Row {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn membership_keeps_raw_label_but_classifies_company_admin() {
        let role = ClassifiedRole::from_membership(
            &principal(),
            &row(json!({
                "company_id": "c1",
                "role": "super_admin",
                "is_active": false
            })),
        );

        assert_eq!(role.user_type, UserType::CompanyAdmin);
        assert_eq!(role.role, "super_admin");
        assert_eq!(role.company_id.as_deref(), Some("c1"));
        assert!(!role.is_active);
    }

    #[test]
    fn membership_defaults_missing_label() {
        let role =
            ClassifiedRole::from_membership(&principal(), &row(json!({"company_id": "c1"})));
        assert_eq!(role.role, "company_admin");
    }

    #[test]
    fn dashboard_gate_is_always_open() {
        let role = ClassifiedRole::from_membership(
            &principal(),
            &row(json!({
                "company_id": "c1",
                "role": "hr_admin",
                "is_active": true,
                "permissions": {"dashboard": false, "grants": true}
            })),
        );

        assert!(role.allows(gates::DASHBOARD));
        assert!(role.allows(gates::GRANTS));
        assert!(!role.allows(gates::CAP_TABLE));
    }

    #[test]
    fn super_admin_passes_every_gate() {
        let role = ClassifiedRole::platform_super_admin(&principal());
        assert!(role.allows(gates::SETTINGS));
        assert!(role.allows("anything_else"));
    }

    #[test]
    fn non_boolean_permission_values_read_as_denied() {
        let role = ClassifiedRole::from_membership(
            &principal(),
            &row(json!({
                "company_id": "c1",
                "role": "hr_admin",
                "permissions": {"grants": "yes"}
            })),
        );
        assert!(!role.allows(gates::GRANTS));
    }
}
