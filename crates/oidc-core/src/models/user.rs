// ABOUTME: Resource owner records and the claim-bearing subject profile
// ABOUTME: Users authenticate at the login and password-grant paths

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Stored resource owner
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    /// Stable subject identifier (`sub`)
    pub subject_id: String,
    /// Login name, unique
    pub username: String,
    /// Argon2 PHC hash
    pub password_hash: String,
    /// Email address
    pub email: Option<String>,
    /// Whether the email was verified
    pub email_verified: bool,
    /// Display name
    pub name: Option<String>,
    /// Given name
    pub given_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Role names
    pub roles: Vec<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// Authenticated subject and the claims it can release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subject {
    /// Stable subject identifier (`sub`)
    pub subject_id: String,
    /// Login name
    pub username: String,
    /// Email address
    pub email: Option<String>,
    /// Whether the email was verified
    pub email_verified: bool,
    /// Display name
    pub name: Option<String>,
    /// Given name
    pub given_name: Option<String>,
    /// Family name
    pub family_name: Option<String>,
    /// Role names
    pub roles: Vec<String>,
}

impl From<UserRecord> for Subject {
    fn from(user: UserRecord) -> Self {
        Self {
            subject_id: user.subject_id,
            username: user.username,
            email: user.email,
            email_verified: user.email_verified,
            name: user.name,
            given_name: user.given_name,
            family_name: user.family_name,
            roles: user.roles,
        }
    }
}
