//! User records

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};

/// Unique identifier for a user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct UserId(pub Uuid);

impl UserId {
    /// Create a new random UserId
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for UserId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

/// A stored user
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct User {
    #[serde(rename = "_id")]
    pub id: UserId,
    pub username: String,
    /// Unique across all users
    pub email: String,
}

/// Body of a create-user request
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct NewUser {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

impl NewUser {
    /// Turn the request into a user, rejecting blank fields
    pub fn into_user(self) -> StoreResult<User> {
        match (non_blank(self.username), non_blank(self.email)) {
            (Some(username), Some(email)) => Ok(User {
                id: UserId::new(),
                username,
                email,
            }),
            _ => Err(StoreError::Invalid(
                "Username and email are required.".to_string(),
            )),
        }
    }
}

/// Body of an update-user request; absent fields are left unchanged
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct UserUpdate {
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_user_requires_both_fields() {
        let missing_email = NewUser {
            username: Some("ada".into()),
            email: None,
        };
        assert!(matches!(
            missing_email.into_user(),
            Err(StoreError::Invalid(_))
        ));

        let blank_name = NewUser {
            username: Some("  ".into()),
            email: Some("ada@example.com".into()),
        };
        assert!(blank_name.into_user().is_err());

        let user = NewUser {
            username: Some("ada".into()),
            email: Some("ada@example.com".into()),
        }
        .into_user()
        .unwrap();
        assert_eq!(user.username, "ada");
    }

    #[test]
    fn test_user_id_parse() {
        let id = UserId::new();
        assert_eq!(id.to_string().parse::<UserId>().unwrap(), id);
        assert!("nope".parse::<UserId>().is_err());
    }
}
