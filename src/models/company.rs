use serde::{Deserialize, Serialize};

/// The active-company override.
///
/// For a platform super-admin this is a user-chosen impersonation target,
/// persisted across reloads. For a company admin it is forced to their own
/// company on every classification. For employee/unknown it stays empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveCompany {
    pub id: Option<String>,
    pub name: Option<String>,
}

impl ActiveCompany {
    pub fn new(id: impl Into<String>, name: Option<String>) -> Self {
        Self {
            id: Some(id.into()),
            name,
        }
    }

    pub fn is_set(&self) -> bool {
        self.id.is_some()
    }

    pub fn clear(&mut self) {
        self.id = None;
        self.name = None;
    }
}
