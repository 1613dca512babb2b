//! Client-side checks run before credentials are sent.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::error::{AuthError, ValidationErrors};
use crate::api::session::{Credentials, RegistrationRequest};

/// Minimum password length accepted at registration.
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\S+@\S+\.\S+").expect("email pattern is valid"));

static PHONE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\+?[\d\s\-\(\)]+$").expect("phone pattern is valid"));

/// How the server should look up the identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LoginType {
    Email,
    Phone,
}

pub fn is_valid_email(value: &str) -> bool {
    EMAIL_RE.is_match(value)
}

pub fn is_valid_phone(value: &str) -> bool {
    PHONE_RE.is_match(value)
}

/// Email wins over phone when both patterns match.
pub fn determine_login_type(identifier: &str) -> Result<LoginType, AuthError> {
    if is_valid_email(identifier) {
        Ok(LoginType::Email)
    } else if is_valid_phone(identifier) {
        Ok(LoginType::Phone)
    } else {
        Err(AuthError::InvalidIdentifier(
            "Please enter a valid email or phone number".to_string(),
        ))
    }
}

#[derive(Default)]
struct FieldErrors(BTreeMap<String, Vec<String>>);

impl FieldErrors {
    fn add(&mut self, field: &str, message: &str) {
        self.0
            .entry(field.to_string())
            .or_default()
            .push(message.to_string());
    }

    fn finish(self, message: &str) -> Result<(), AuthError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(AuthError::Validation(ValidationErrors::local(message, self.0)))
        }
    }
}

pub fn validate_login(credentials: &Credentials) -> Result<(), AuthError> {
    let mut errors = FieldErrors::default();

    let identifier = credentials.identifier.trim();
    if identifier.is_empty() {
        errors.add("identifier", "Email or phone number is required");
    } else if determine_login_type(identifier).is_err() {
        errors.add("identifier", "Please enter a valid email or phone number");
    }
    if credentials.password.is_empty() {
        errors.add("password", "Password is required");
    }

    errors.finish("Please correct the highlighted fields")
}

pub fn validate_registration(request: &RegistrationRequest) -> Result<(), AuthError> {
    let mut errors = FieldErrors::default();

    if request.username.trim().is_empty() {
        errors.add("username", "Username is required");
    }

    let phone = request.phone_number.trim();
    if phone.is_empty() {
        errors.add("phone_number", "Phone number is required");
    } else if !is_valid_phone(phone) {
        errors.add("phone_number", "Please enter a valid phone number");
    }

    if request.password.is_empty() {
        errors.add("password", "Password is required");
    } else if request.password.chars().count() < MIN_PASSWORD_LEN {
        errors.add("password", "Password must be at least 8 characters");
    }

    if request.password_confirm.is_empty() {
        errors.add("password_confirm", "Please confirm your password");
    } else if request.password != request.password_confirm {
        errors.add("password_confirm", "Passwords do not match");
    }

    if let Some(email) = request.email.as_deref().map(str::trim) {
        if !email.is_empty() && !is_valid_email(email) {
            errors.add("email", "Please enter a valid email address");
        }
    }

    errors.finish("Please correct the highlighted fields")
}
