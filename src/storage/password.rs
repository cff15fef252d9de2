//! Argon2id для значений секретных ключей KV.

use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use indrajala_error::AuthError;
use rand::rngs::OsRng;

/// Память в KiB и число проходов. Параметры пишутся в PHC-строку, так что
/// старые хеши проверяются и после их смены.
const MEMORY_KIB: u32 = 15_000;
const PASSES: u32 = 2;

fn argon2id() -> Result<Argon2<'static>, AuthError> {
    Params::new(MEMORY_KIB, PASSES, 1, None)
        .map(|params| Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
        .map_err(|e| AuthError::PasswordHashFailed {
            reason: e.to_string(),
        })
}

/// PHC-строка `$argon2id$v=19$m=...` со случайной солью.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let phc = argon2id()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::PasswordHashFailed {
            reason: e.to_string(),
        })?;
    Ok(phc.to_string())
}

/// Несовпадение пароля это `Ok(false)`. Ошибка означает, что в базе лежит
/// не PHC-строка.
pub fn verify_password(
    stored: &str,
    password: &str,
) -> Result<bool, AuthError> {
    let phc = PasswordHash::new(stored).map_err(|_| AuthError::PasswordVerifyFailed)?;
    Ok(argon2id()?.verify_password(password.as_bytes(), &phc).is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Тест проверяет, что хеш из базы принимает только исходный пароль.
    #[test]
    fn test_roundtrip_through_stored_value() {
        let stored = hash_password("admin").unwrap();
        assert!(stored.starts_with("$argon2id$v=19$m=15000,t=2,p=1$"));
        assert!(verify_password(&stored, "admin").unwrap());
        assert!(!verify_password(&stored, "Admin").unwrap());
        assert!(!verify_password(&stored, "").unwrap());
    }

    #[test]
    fn test_salt_differs_per_write() {
        assert_ne!(hash_password("admin").unwrap(), hash_password("admin").unwrap());
    }

    /// Тест проверяет, что открытый текст в базе это ошибка, а не отказ.
    #[test]
    fn test_plaintext_in_store_is_error() {
        assert!(matches!(
            verify_password("admin", "admin"),
            Err(AuthError::PasswordVerifyFailed)
        ));
    }
}
