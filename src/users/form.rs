//! Validation and hash normalization of create/edit submissions.
//!
//! A submission is checked as a whole: every failing field is reported, and
//! nothing reaches storage unless all of them pass. The password is only
//! looked at when the intent makes it visible, and it leaves this module as an
//! Argon2 hash.

use std::collections::BTreeSet;
use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::FieldErrors;
use crate::users::password::{hash_password, PasswordRules};

const MAX_TEXT_LEN: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "intent", rename_all = "snake_case")]
pub enum Intent {
    Create,
    Edit { reset_password: bool },
}

impl Intent {
    /// Whether the password field is shown, required and persisted.
    pub fn password_visible(self) -> bool {
        match self {
            Intent::Create => true,
            Intent::Edit { reset_password } => reset_password,
        }
    }
}

/// Raw field values as submitted by the operator.
#[derive(Clone, Default, Deserialize)]
pub struct UserForm {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub telp: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub role_ids: Vec<Uuid>,
    /// Submitted role references that are not ids at all.
    #[serde(skip)]
    pub unparsed_role_ids: Vec<String>,
}

impl fmt::Debug for UserForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserForm")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("telp", &self.telp)
            .field("address", &self.address)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("role_ids", &self.role_ids)
            .field("unparsed_role_ids", &self.unparsed_role_ids)
            .finish()
    }
}

/// A submission that passed every field rule; the password is still plaintext.
pub struct ValidatedForm {
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub role_ids: BTreeSet<Uuid>,
    password: Option<String>,
}

impl fmt::Debug for ValidatedForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ValidatedForm")
            .field("name", &self.name)
            .field("email", &self.email)
            .field("role_ids", &self.role_ids)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordChange {
    Keep,
    Set(String),
}

impl PasswordChange {
    pub fn into_hash(self) -> Option<String> {
        match self {
            PasswordChange::Keep => None,
            PasswordChange::Set(hash) => Some(hash),
        }
    }
}

/// Payload ready for the persistence layer.
#[derive(Debug, Clone)]
pub struct PreparedUser {
    pub name: String,
    pub email: String,
    pub telp: Option<String>,
    pub address: Option<String>,
    pub role_ids: BTreeSet<Uuid>,
    pub password: PasswordChange,
}

impl ValidatedForm {
    /// Hashes the password (when one was accepted) and drops the plaintext.
    pub fn into_prepared(self) -> anyhow::Result<PreparedUser> {
        let password = match self.password {
            Some(plain) => PasswordChange::Set(hash_password(&plain)?),
            None => PasswordChange::Keep,
        };
        Ok(PreparedUser {
            name: self.name,
            email: self.email,
            telp: self.telp,
            address: self.address,
            role_ids: self.role_ids,
            password,
        })
    }
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Trims, and turns blank input into `None`.
fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn check_length(errors: &mut FieldErrors, field: &str, value: &str) {
    if value.chars().count() > MAX_TEXT_LEN {
        errors.add(
            field,
            format!(
                "The {} may not be greater than {} characters.",
                field, MAX_TEXT_LEN
            ),
        );
    }
}

pub fn validate(
    intent: Intent,
    form: UserForm,
    rules: &PasswordRules,
) -> Result<ValidatedForm, FieldErrors> {
    let mut errors = FieldErrors::new();

    let name = form.name.trim().to_string();
    if name.is_empty() {
        errors.add("name", "The name field is required.");
    }
    check_length(&mut errors, "name", &name);

    let email = form.email.trim().to_lowercase();
    if email.is_empty() {
        errors.add("email", "The email field is required.");
    } else if !is_valid_email(&email) {
        errors.add("email", "The email must be a valid email address.");
    }
    check_length(&mut errors, "email", &email);

    let telp = optional_text(form.telp);
    if let Some(telp) = &telp {
        check_length(&mut errors, "telp", telp);
    }
    let address = optional_text(form.address);

    // a hidden password field is never dehydrated, whatever the client sent
    let password = if intent.password_visible() {
        match form.password.filter(|p| !p.is_empty()) {
            Some(plain) => {
                for message in rules.violations(&plain) {
                    errors.add("password", message);
                }
                Some(plain)
            }
            None => {
                errors.add("password", "The password field is required.");
                None
            }
        }
    } else {
        None
    };

    if !form.unparsed_role_ids.is_empty() {
        errors.add("role_ids", "The selected roles are invalid.");
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(ValidatedForm {
        name,
        email,
        telp,
        address,
        role_ids: form.role_ids.into_iter().collect(),
        password,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann() -> UserForm {
        UserForm {
            name: "Ann".into(),
            email: "ann@x.com".into(),
            telp: Some("555".into()),
            address: Some("Rd 1".into()),
            password: Some("secret123".into()),
            role_ids: vec![],
            unparsed_role_ids: vec![],
        }
    }

    #[test]
    fn password_visibility_follows_intent() {
        assert!(Intent::Create.password_visible());
        assert!(Intent::Edit { reset_password: true }.password_visible());
        assert!(!Intent::Edit { reset_password: false }.password_visible());
    }

    #[test]
    fn intent_deserializes_from_tag() {
        let intent: Intent =
            serde_json::from_str(r#"{"intent":"edit","reset_password":true}"#).unwrap();
        assert_eq!(intent, Intent::Edit { reset_password: true });
        let intent: Intent = serde_json::from_str(r#"{"intent":"create"}"#).unwrap();
        assert_eq!(intent, Intent::Create);
    }

    #[test]
    fn create_hashes_password() {
        let prepared = validate(Intent::Create, ann(), &PasswordRules::default())
            .unwrap()
            .into_prepared()
            .unwrap();
        match prepared.password {
            PasswordChange::Set(hash) => {
                assert_ne!(hash, "secret123");
                assert!(crate::users::password::verify_password("secret123", &hash).unwrap());
            }
            PasswordChange::Keep => panic!("create must set a password"),
        }
        assert!(prepared.role_ids.is_empty());
    }

    #[test]
    fn create_requires_password() {
        let form = UserForm {
            password: None,
            ..ann()
        };
        let errors = validate(Intent::Create, form, &PasswordRules::default()).unwrap_err();
        assert_eq!(
            errors.get("password").unwrap(),
            ["The password field is required.".to_string()]
        );

        let form = UserForm {
            password: Some(String::new()),
            ..ann()
        };
        let errors = validate(Intent::Create, form, &PasswordRules::default()).unwrap_err();
        assert!(errors.has("password"));
    }

    #[test]
    fn edit_without_reset_ignores_password() {
        let form = UserForm {
            password: Some("x".repeat(100)),
            ..ann()
        };
        let prepared = validate(
            Intent::Edit {
                reset_password: false,
            },
            form,
            &PasswordRules::default(),
        )
        .unwrap()
        .into_prepared()
        .unwrap();
        assert_eq!(prepared.password, PasswordChange::Keep);
    }

    #[test]
    fn edit_with_reset_requires_password() {
        let form = UserForm {
            password: None,
            ..ann()
        };
        let errors = validate(
            Intent::Edit {
                reset_password: true,
            },
            form,
            &PasswordRules::default(),
        )
        .unwrap_err();
        assert!(errors.has("password"));
    }

    #[test]
    fn password_over_configured_max_is_rejected() {
        let form = UserForm {
            password: Some("p".repeat(26)),
            ..ann()
        };
        let errors = validate(Intent::Create, form, &PasswordRules::default()).unwrap_err();
        assert_eq!(
            errors.get("password").unwrap(),
            ["The password may not be greater than 25 characters.".to_string()]
        );

        let relaxed = PasswordRules {
            max_len: 64,
            min_len: None,
        };
        let form = UserForm {
            password: Some("p".repeat(26)),
            ..ann()
        };
        assert!(validate(Intent::Create, form, &relaxed).is_ok());
    }

    #[test]
    fn reports_every_failing_field() {
        let form = UserForm {
            name: "   ".into(),
            email: "not-an-email".into(),
            password: None,
            ..ann()
        };
        let errors = validate(Intent::Create, form, &PasswordRules::default()).unwrap_err();
        assert!(errors.has("name"));
        assert!(errors.has("email"));
        assert!(errors.has("password"));
        assert!(!errors.has("telp"));
    }

    #[test]
    fn normalizes_text_fields() {
        let form = UserForm {
            email: "  Ann@X.com ".into(),
            telp: Some("  ".into()),
            address: Some("Rd 1\nUnit 2 ".into()),
            ..ann()
        };
        let validated = validate(Intent::Create, form, &PasswordRules::default()).unwrap();
        assert_eq!(validated.email, "ann@x.com");
        assert_eq!(validated.telp, None);
        assert_eq!(validated.address.as_deref(), Some("Rd 1\nUnit 2"));
    }

    #[test]
    fn duplicate_roles_collapse() {
        let role = Uuid::new_v4();
        let other = Uuid::new_v4();
        let form = UserForm {
            role_ids: vec![role, other, role],
            ..ann()
        };
        let validated = validate(Intent::Create, form, &PasswordRules::default()).unwrap();
        assert_eq!(validated.role_ids.len(), 2);
    }

    #[test]
    fn malformed_role_reference_joins_other_errors() {
        let form = UserForm {
            email: "not-an-email".into(),
            password: None,
            unparsed_role_ids: vec!["zzz".into()],
            ..ann()
        };
        let errors = validate(Intent::Create, form, &PasswordRules::default()).unwrap_err();
        assert!(errors.has("role_ids"));
        assert!(errors.has("email"));
        assert!(errors.has("password"));
    }

    #[test]
    fn debug_output_redacts_password() {
        let rendered = format!("{:?}", ann());
        assert!(!rendered.contains("secret123"));
        let validated = validate(Intent::Create, ann(), &PasswordRules::default()).unwrap();
        assert!(!format!("{:?}", validated).contains("secret123"));
    }
}
