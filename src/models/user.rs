//! User accounts and the authenticated principal

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quota::QuotaLimits;

/// Account role; drives quota defaults, rate limits, and file expiry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Free,
    Premium,
    Admin,
}

impl Role {
    /// Lowercase wire representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Free => "free",
            Role::Premium => "premium",
            Role::Admin => "admin",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "free" => Ok(Role::Free),
            "premium" => Ok(Role::Premium),
            "admin" => Ok(Role::Admin),
            other => Err(format!("invalid role: {}", other)),
        }
    }
}

/// Account standing; restricted accounts are read-only, blocked accounts are
/// denied all authenticated actions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountStatus {
    Active,
    Restricted,
    Blocked,
}

/// Persisted user account
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub email: String,
    pub username: String,
    /// Opaque hash; issuance and verification live outside the core
    pub password_hash: String,
    pub role: Role,
    pub status: AccountStatus,
    /// None on a premium user means lifetime premium
    pub premium_expires_at: Option<DateTime<Utc>>,
    pub failed_logins: u32,
    pub lockout_until: Option<DateTime<Utc>>,
    /// Admin-set limits that survive role changes
    pub quota_override: Option<QuotaLimits>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl User {
    /// New active account with the given role
    pub fn new(email: impl Into<String>, username: impl Into<String>, role: Role) -> Self {
        Self {
            id: super::new_id(),
            email: email.into(),
            username: username.into(),
            password_hash: String::new(),
            role,
            status: AccountStatus::Active,
            premium_expires_at: None,
            failed_logins: 0,
            lockout_until: None,
            quota_override: None,
            is_active: true,
            created_at: Utc::now(),
        }
    }

    /// Role the user holds right now, accounting for premium expiry.
    /// Admins are never downgraded.
    pub fn effective_role(&self, now: DateTime<Utc>) -> Role {
        match (self.role, self.premium_expires_at) {
            (Role::Premium, Some(expires)) if expires <= now => Role::Free,
            (role, _) => role,
        }
    }

    /// Whether lifecycle logic has a pending downgrade to apply
    pub fn premium_lapsed(&self, now: DateTime<Utc>) -> bool {
        self.role == Role::Premium && matches!(self.premium_expires_at, Some(t) if t <= now)
    }
}

/// Authenticated caller identity handed to every service operation.
/// Token issuance and refresh are external; the core only consumes this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub role: Role,
    pub status: AccountStatus,
}

impl Principal {
    pub fn new(user_id: impl Into<String>, role: Role, status: AccountStatus) -> Self {
        Self { user_id: user_id.into(), role, status }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn lapsed_premium_is_effectively_free() {
        let mut user = User::new("a@b.c", "a", Role::Premium);
        user.premium_expires_at = Some(Utc::now() - Duration::seconds(1));
        assert_eq!(user.effective_role(Utc::now()), Role::Free);
        assert!(user.premium_lapsed(Utc::now()));
    }

    #[test]
    fn lifetime_premium_never_lapses() {
        let user = User::new("a@b.c", "a", Role::Premium);
        assert_eq!(user.effective_role(Utc::now()), Role::Premium);
        assert!(!user.premium_lapsed(Utc::now()));
    }

    #[test]
    fn admin_ignores_premium_expiry() {
        let mut user = User::new("root@b.c", "root", Role::Admin);
        user.premium_expires_at = Some(Utc::now() - Duration::days(1));
        assert_eq!(user.effective_role(Utc::now()), Role::Admin);
    }
}
