use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Access level of a profile within its company.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "controller")]
    Controller,
    #[serde(rename = "admin")]
    Admin,
    #[serde(rename = "super-admin")]
    SuperAdmin,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::User, Role::Controller, Role::Admin, Role::SuperAdmin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Controller => "controller",
            Role::Admin => "admin",
            Role::SuperAdmin => "super-admin",
        }
    }

    /// May approve, reject or request info on expenses and create assignments.
    pub fn is_reviewer(&self) -> bool {
        matches!(self, Role::Admin | Role::Controller | Role::SuperAdmin)
    }

    /// May invite users, change roles and edit company settings.
    pub fn is_manager(&self) -> bool {
        matches!(self, Role::Admin | Role::SuperAdmin)
    }

    /// Company-equality checks are waived for super-admins.
    pub fn spans_companies(&self) -> bool {
        matches!(self, Role::SuperAdmin)
    }

    pub fn can_grant(&self, other: Role) -> bool {
        self.is_manager() && other <= *self
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == normalized)
            .ok_or_else(|| {
                format!(
                    "invalid role '{value}'. Allowed roles: {}",
                    Role::ALL.map(|role| role.as_str()).join(", ")
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::Role;

    #[test]
    fn parses_known_roles() {
        assert_eq!("super-admin".parse::<Role>(), Ok(Role::SuperAdmin));
        assert_eq!(" Controller ".parse::<Role>(), Ok(Role::Controller));
        assert!("owner".parse::<Role>().is_err());
    }

    #[test]
    fn reviewer_and_manager_sets() {
        assert!(!Role::User.is_reviewer());
        assert!(Role::Controller.is_reviewer());
        assert!(!Role::Controller.is_manager());
        assert!(Role::Admin.is_manager());
    }

    #[test]
    fn managers_cannot_grant_above_themselves() {
        assert!(Role::Admin.can_grant(Role::Controller));
        assert!(Role::Admin.can_grant(Role::Admin));
        assert!(!Role::Admin.can_grant(Role::SuperAdmin));
        assert!(Role::SuperAdmin.can_grant(Role::SuperAdmin));
        assert!(!Role::Controller.can_grant(Role::User));
    }
}
