//! Family group memberships (owned by the family-management module)

use serde::{Deserialize, Serialize};

/// Role of a member inside a family group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FamilyRole {
    Admin,
    Caregiver,
    #[default]
    Member,
}

/// What a member is allowed to do for the group
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Permissions {
    pub receive_alerts: bool,
    pub view_health_data: bool,
    pub manage_devices: bool,
    pub emergency_contact: bool,
}

/// One user's membership in one family group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FamilyMembership {
    pub group_id: String,
    pub user_ref: String,
    pub role: FamilyRole,
    pub permissions: Permissions,
    pub is_active: bool,
}

impl FamilyMembership {
    /// Whether this member should be notified of alerts
    pub fn receives_alerts(&self) -> bool {
        self.is_active && self.permissions.receive_alerts
    }
}
