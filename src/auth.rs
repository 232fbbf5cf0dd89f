use crate::error::{CoreError, CoreResult};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use std::collections::HashMap;

/// Argon2id PHC string (`$argon2id$v=19$...`) with a fresh salt.
pub fn hash_password(password: &str) -> CoreResult<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| CoreError::Hash(e.to_string()))
}

/// A stored value that is not a PHC string never verifies.
pub fn verify_password(password: &str, stored: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Debug, Clone)]
struct ResetEntry {
    code_hash: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct IssuedCode {
    pub code: String,
    pub expires_at: DateTime<Utc>,
}

/// Short-lived password reset codes keyed by user id. One live code per user;
/// issuing again replaces the previous one. Codes are single-use.
#[derive(Debug, Default)]
pub struct ResetCodeStore {
    entries: HashMap<String, ResetEntry>,
}

impl ResetCodeStore {
    pub fn issue(
        &mut self,
        user_id: &str,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> CoreResult<IssuedCode> {
        self.purge_expired(now);
        let code = rand::thread_rng().gen_range(100_000..1_000_000u32).to_string();
        let expires_at = now + ttl;
        self.entries.insert(
            user_id.to_string(),
            ResetEntry {
                code_hash: hash_password(&code)?,
                expires_at,
            },
        );
        Ok(IssuedCode { code, expires_at })
    }

    /// Returns true and forgets the code when it matches and has not expired.
    pub fn consume(&mut self, user_id: &str, code: &str, now: DateTime<Utc>) -> bool {
        self.purge_expired(now);
        let Some(entry) = self.entries.get(user_id) else {
            return false;
        };
        if !verify_password(code.trim(), &entry.code_hash) {
            return false;
        }
        self.entries.remove(user_id);
        true
    }

    pub fn purge_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, e| e.expires_at > now);
        before - self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_hash_verifies_and_rejects() {
        let stored = hash_password("correct horse").expect("hash");
        assert!(stored.starts_with("$argon2id$"));
        assert!(verify_password("correct horse", &stored));
        assert!(!verify_password("Correct horse", &stored));
        assert!(!verify_password("correct horse", "plaintext"));
    }

    #[test]
    fn same_password_gets_distinct_salts() {
        assert_ne!(
            hash_password("pw123456").expect("hash"),
            hash_password("pw123456").expect("hash")
        );
    }

    #[test]
    fn reset_code_is_single_use() {
        let mut store = ResetCodeStore::default();
        let now = Utc::now();
        let issued = store.issue("u1", Duration::minutes(5), now).expect("issue");
        assert_eq!(issued.code.len(), 6);
        assert!(issued.code.bytes().all(|b| b.is_ascii_digit()));
        assert!(!store.consume("u1", "not-it", now));
        assert!(store.consume("u1", &issued.code, now));
        assert!(!store.consume("u1", &issued.code, now));
    }

    #[test]
    fn expired_codes_are_evicted() {
        let mut store = ResetCodeStore::default();
        let now = Utc::now();
        let issued = store.issue("u1", Duration::minutes(5), now).expect("issue");
        store.issue("u2", Duration::minutes(30), now).expect("issue");
        let later = now + Duration::minutes(6);
        assert_eq!(store.purge_expired(later), 1);
        assert_eq!(store.len(), 1);
        assert!(!store.consume("u1", &issued.code, later));
    }
}
