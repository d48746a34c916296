//! Reusable target-system configuration.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Base URL, auth, default headers and timeout shared by every step of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connection {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub base_url: String,
    #[serde(default)]
    pub auth_type: AuthType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_token: Option<String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Request timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,
    #[serde(default)]
    pub environment: Environment,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Connection {
    /// The token, if one is configured and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.auth_token.as_deref().filter(|t| !t.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    None,
    Bearer,
    Basic,
    ApiKey,
    Oauth,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Dev,
    Staging,
    Prod,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_auth_type_wire_names() {
        let c: Connection = serde_json::from_value(json!({
            "id": "c1",
            "baseUrl": "https://api.example.com",
            "authType": "api_key",
            "authToken": "k",
        }))
        .unwrap();
        assert_eq!(c.auth_type, AuthType::ApiKey);
        assert_eq!(c.token(), Some("k"));
        assert_eq!(c.environment, Environment::Dev);
    }

    #[test]
    fn test_empty_token_is_ignored() {
        let c: Connection = serde_json::from_value(json!({
            "id": "c1",
            "baseUrl": "",
            "authType": "bearer",
            "authToken": "",
        }))
        .unwrap();
        assert_eq!(c.token(), None);
    }
}
