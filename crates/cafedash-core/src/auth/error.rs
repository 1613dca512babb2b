use std::collections::BTreeMap;

use serde::Serialize;
use thiserror::Error;

use super::store::StoreError;
use crate::api::TransportError;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Session expired - please log in again")]
    SessionExpired,

    #[error("Network error: {0}")]
    Network(#[from] TransportError),

    #[error("{}", .0.message)]
    Validation(ValidationErrors),

    #[error("Invalid identifier: {0}")]
    InvalidIdentifier(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Field-level errors for form display, passed through from the server
/// (or produced locally before a request is sent, with `status` 0).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ValidationErrors {
    pub status: u16,
    pub message: String,
    pub fields: BTreeMap<String, Vec<String>>,
}

impl ValidationErrors {
    pub fn local(message: impl Into<String>, fields: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            status: 0,
            message: message.into(),
            fields,
        }
    }

    /// Interpret a DRF-style error body.
    ///
    /// `non_field_errors` carries a form-wide message and no field map.
    /// Otherwise `message`/`detail` give the message and every other key is
    /// a field entry (string or list of strings).
    pub fn from_body(status: u16, body: &serde_json::Value, fallback: &str) -> Self {
        let Some(object) = body.as_object() else {
            return Self {
                status,
                message: fallback.to_string(),
                fields: BTreeMap::new(),
            };
        };

        if let Some(non_field) = object.get("non_field_errors").and_then(|v| v.as_array()) {
            let message = non_field
                .first()
                .and_then(|v| v.as_str())
                .unwrap_or(fallback)
                .to_string();
            return Self {
                status,
                message,
                fields: BTreeMap::new(),
            };
        }

        let message = ["message", "detail"]
            .iter()
            .find_map(|key| object.get(*key).and_then(|v| v.as_str()))
            .unwrap_or(fallback)
            .to_string();

        let fields = object
            .iter()
            .filter(|(key, _)| !matches!(key.as_str(), "message" | "detail"))
            .filter_map(|(key, value)| {
                let messages: Vec<String> = match value {
                    serde_json::Value::String(s) => vec![s.clone()],
                    serde_json::Value::Array(items) => items
                        .iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                    _ => Vec::new(),
                };
                (!messages.is_empty()).then(|| (key.clone(), messages))
            })
            .collect();

        Self {
            status,
            message,
            fields,
        }
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(|m| m.first()).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_non_field_errors_give_message_only() {
        let body = json!({ "non_field_errors": ["Please check the credentials"] });
        let errors = ValidationErrors::from_body(400, &body, "Login failed");
        assert_eq!(errors.status, 400);
        assert_eq!(errors.message, "Please check the credentials");
        assert!(errors.fields.is_empty());
    }

    #[test]
    fn test_field_errors_are_collected() {
        let body = json!({
            "phone_number": ["A user with this phone number already exists."],
            "password": "Too short",
            "code": 12,
        });
        let errors = ValidationErrors::from_body(400, &body, "Registration failed");
        assert_eq!(errors.message, "Registration failed");
        assert_eq!(
            errors.field("phone_number"),
            Some("A user with this phone number already exists.")
        );
        assert_eq!(errors.field("password"), Some("Too short"));
        assert!(errors.field("code").is_none());
    }

    #[test]
    fn test_detail_is_message() {
        let body = json!({ "detail": "Token is invalid or expired" });
        let errors = ValidationErrors::from_body(401, &body, "failed");
        assert_eq!(errors.message, "Token is invalid or expired");
        assert!(errors.fields.is_empty());
    }

    #[test]
    fn test_non_object_body_uses_fallback() {
        let errors = ValidationErrors::from_body(400, &json!("oops"), "Login failed");
        assert_eq!(errors.message, "Login failed");
        assert_eq!(AuthError::Validation(errors).to_string(), "Login failed");
    }
}
