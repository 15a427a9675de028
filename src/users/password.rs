use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use tracing::error;

/// Constraints a submitted password has to satisfy before it is hashed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PasswordRules {
    pub max_len: usize,
    pub min_len: Option<usize>,
}

impl Default for PasswordRules {
    fn default() -> Self {
        Self {
            max_len: 25,
            min_len: None,
        }
    }
}

impl PasswordRules {
    /// Messages for every rule `plain` breaks. Lengths are counted in characters.
    pub fn violations(&self, plain: &str) -> Vec<String> {
        let len = plain.chars().count();
        let mut out = Vec::new();
        if let Some(min) = self.min_len {
            if len < min {
                out.push(format!("The password must be at least {} characters.", min));
            }
        }
        if len > self.max_len {
            out.push(format!(
                "The password may not be greater than {} characters.",
                self.max_len
            ));
        }
        out
    }
}

pub fn hash_password(plain: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let argon2 = Argon2::default();
    let hash = argon2
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            anyhow::anyhow!(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

pub fn verify_password(plain: &str, hash: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        anyhow::anyhow!(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_and_verify_roundtrip() {
        let password = "Secur3P@ssw0rd!";
        let hash = hash_password(password).expect("hashing should succeed");
        assert_ne!(hash, password);
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(password, &hash).expect("verify should succeed"));
    }

    #[test]
    fn verify_rejects_wrong_password() {
        let hash = hash_password("correct-horse-battery").expect("hashing should succeed");
        assert!(!verify_password("wrong-password", &hash).expect("verify should not error"));
    }

    #[test]
    fn verify_errors_on_malformed_hash() {
        let err = verify_password("anything", "not-a-valid-hash").unwrap_err();
        assert!(!err.to_string().is_empty());
    }

    #[test]
    fn same_password_gets_fresh_salt() {
        let a = hash_password("secret123").unwrap();
        let b = hash_password("secret123").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn default_rules_cap_length_at_25() {
        let rules = PasswordRules::default();
        assert!(rules.violations(&"a".repeat(25)).is_empty());
        assert_eq!(rules.violations(&"a".repeat(26)).len(), 1);
        // multibyte characters count once
        assert!(rules.violations(&"é".repeat(25)).is_empty());
    }

    #[test]
    fn min_len_is_optional() {
        let rules = PasswordRules {
            max_len: 25,
            min_len: Some(8),
        };
        assert_eq!(
            rules.violations("short"),
            vec!["The password must be at least 8 characters.".to_string()]
        );
        assert!(rules.violations("long enough").is_empty());
    }
}
