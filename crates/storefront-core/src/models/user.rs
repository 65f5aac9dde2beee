use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Vendor,
    Admin,
    #[default]
    #[serde(other)]
    Customer,
}

/// The account a session belongs to, as returned by login and refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserIdentity {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Role,
}

impl UserIdentity {
    pub fn display_name(&self) -> &str {
        self.name.as_deref().filter(|n| !n.is_empty()).unwrap_or(&self.email)
    }

    pub fn is_vendor(&self) -> bool {
        matches!(self.role, Role::Vendor | Role::Admin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_role_falls_back_to_customer() {
        let json = r#"{"id":"u1","email":"a@b.c","role":"superuser"}"#;
        let user: UserIdentity = serde_json::from_str(json).unwrap();
        assert_eq!(user.role, Role::Customer);
        assert!(!user.is_vendor());
    }

    #[test]
    fn test_display_name() {
        let mut user = UserIdentity {
            id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            name: None,
            role: Role::Vendor,
        };
        assert_eq!(user.display_name(), "ada@example.com");
        user.name = Some("Ada".to_string());
        assert_eq!(user.display_name(), "Ada");
        assert!(user.is_vendor());
    }
}
