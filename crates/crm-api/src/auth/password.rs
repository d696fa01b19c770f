/// Password hashing and verification
///
/// Two salted one-way algorithms are supported:
/// - bcrypt (`$2a$`, `$2b$`, `$2y$`), cost factor 12 by default
/// - Argon2id (PHC string `$argon2id$...`), 64 MB / 3 iterations / 4 lanes
///
/// New hashes use the configured algorithm. Verification picks the algorithm
/// from the stored hash, so records created under either setting keep working.
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2, Params,
};
use crm_core::{AuthConfig, HashAlgorithm};
use thiserror::Error;

/// Password hashing errors
///
/// Only hashing can fail. Verification reports every problem as a mismatch.
#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("Failed to hash password: {0}")]
    HashingFailed(String),

    #[error("Invalid hashing parameters: {0}")]
    InvalidParams(String),
}

/// Password hashing configuration
#[derive(Debug, Clone)]
pub struct PasswordConfig {
    /// Algorithm for new hashes
    pub algorithm: HashAlgorithm,
    /// bcrypt cost factor (4..=31)
    pub bcrypt_cost: u32,
    /// Argon2 memory cost in KB (default: 65536 = 64 MB)
    pub memory_cost: u32,
    /// Argon2 time cost (iterations, default: 3)
    pub time_cost: u32,
    /// Argon2 parallelism (default: 4)
    pub parallelism: u32,
}

impl Default for PasswordConfig {
    fn default() -> Self {
        Self {
            algorithm: HashAlgorithm::Bcrypt,
            bcrypt_cost: 12,
            memory_cost: 65536, // 64 MB
            time_cost: 3,
            parallelism: 4,
        }
    }
}

impl From<&AuthConfig> for PasswordConfig {
    fn from(config: &AuthConfig) -> Self {
        Self {
            algorithm: config.hash_algorithm,
            bcrypt_cost: config.bcrypt_cost,
            ..Default::default()
        }
    }
}

impl PasswordConfig {
    fn argon2_params(&self) -> Result<Params, PasswordError> {
        Params::new(self.memory_cost, self.time_cost, self.parallelism, Some(32))
            .map_err(|e| PasswordError::InvalidParams(e.to_string()))
    }
}

/// Hash a plaintext password with the configured algorithm
///
/// # Returns
///
/// * `Ok(String)` - Self-describing hash string (algorithm, cost, salt, digest)
/// * `Err(PasswordError)` - If hashing fails; callers treat this as fatal
///
/// # Example
///
/// ```no_run
/// use crm_api::auth::password::{hash_password, verify_password, PasswordConfig};
///
/// let hash = hash_password("s3cret-pass", &PasswordConfig::default()).unwrap();
/// assert!(verify_password("s3cret-pass", &hash));
/// ```
pub fn hash_password(password: &str, config: &PasswordConfig) -> Result<String, PasswordError> {
    match config.algorithm {
        HashAlgorithm::Bcrypt => bcrypt::hash(password, config.bcrypt_cost)
            .map_err(|e| PasswordError::HashingFailed(e.to_string())),
        HashAlgorithm::Argon2id => {
            let salt = SaltString::generate(&mut OsRng);
            let argon2 = Argon2::new(
                argon2::Algorithm::Argon2id,
                argon2::Version::V0x13,
                config.argon2_params()?,
            );

            argon2
                .hash_password(password.as_bytes(), &salt)
                .map(|hash| hash.to_string())
                .map_err(|e| PasswordError::HashingFailed(e.to_string()))
        }
    }
}

/// Verify a plaintext password against a stored hash
///
/// Returns `false` for a wrong password, a malformed hash, or any algorithm
/// error. The comparison inside both algorithms is constant-time.
pub fn verify_password(password: &str, hash: &str) -> bool {
    if is_bcrypt_hash(hash) {
        return match bcrypt::verify(password, hash) {
            Ok(valid) => valid,
            Err(e) => {
                tracing::debug!(error = %e, "bcrypt verification error");
                false
            }
        };
    }

    let parsed_hash = match PasswordHash::new(hash) {
        Ok(parsed) => parsed,
        Err(e) => {
            tracing::debug!(error = %e, "unrecognised password hash format");
            return false;
        }
    };

    match Argon2::default().verify_password(password.as_bytes(), &parsed_hash) {
        Ok(()) => true,
        Err(argon2::password_hash::Error::Password) => false,
        Err(e) => {
            tracing::debug!(error = %e, "argon2 verification error");
            false
        }
    }
}

fn is_bcrypt_hash(hash: &str) -> bool {
    ["$2a$", "$2b$", "$2y$", "$2x$"]
        .iter()
        .any(|prefix| hash.starts_with(prefix))
}

/// Validate password strength
///
/// Checks the minimum requirements for a new password:
/// - At least 8 characters
/// - At least 1 letter
/// - At least 1 digit
pub fn validate_password_strength(password: &str) -> Result<(), String> {
    if password.chars().count() < 8 {
        return Err("Password must be at least 8 characters long".to_string());
    }

    if !password.chars().any(|c| c.is_alphabetic()) {
        return Err("Password must contain at least one letter".to_string());
    }

    if !password.chars().any(|c| c.is_ascii_digit()) {
        return Err("Password must contain at least one digit".to_string());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast_bcrypt() -> PasswordConfig {
        PasswordConfig {
            bcrypt_cost: 4,
            ..Default::default()
        }
    }

    fn light_argon2() -> PasswordConfig {
        PasswordConfig {
            algorithm: HashAlgorithm::Argon2id,
            memory_cost: 8192,
            time_cost: 1,
            parallelism: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_bcrypt_hash_and_verify() {
        let hash = hash_password("Password123", &fast_bcrypt()).unwrap();

        assert!(hash.starts_with("$2b$04$"));
        assert!(verify_password("Password123", &hash));
        assert!(!verify_password("Password124", &hash));
    }

    #[test]
    fn test_default_uses_cost_twelve() {
        let hash = hash_password("Password123", &PasswordConfig::default()).unwrap();
        assert!(hash.starts_with("$2b$12$"));
        assert!(verify_password("Password123", &hash));
    }

    #[test]
    fn test_argon2_hash_and_verify() {
        let hash = hash_password("Password123", &light_argon2()).unwrap();

        assert!(hash.starts_with("$argon2id$"));
        assert!(hash.contains("m=8192"));
        assert!(verify_password("Password123", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn test_same_password_produces_different_hashes() {
        let config = fast_bcrypt();
        let hash1 = hash_password("SamePassword1", &config).unwrap();
        let hash2 = hash_password("SamePassword1", &config).unwrap();

        assert_ne!(hash1, hash2);
        assert!(verify_password("SamePassword1", &hash1));
        assert!(verify_password("SamePassword1", &hash2));
    }

    #[test]
    fn test_malformed_hash_is_a_mismatch() {
        assert!(!verify_password("password", "invalid-hash-format"));
        assert!(!verify_password("password", ""));
        assert!(!verify_password("password", "$2b$12$truncated"));
        assert!(!verify_password("password", "$argon2id$v=19$garbage"));
    }

    #[test]
    fn test_password_strength_validation() {
        assert!(validate_password_strength("Password123").is_ok());
        assert!(validate_password_strength("abcdefg1").is_ok());

        assert!(validate_password_strength("Abc123").is_err());
        assert!(validate_password_strength("12345678").is_err());
        assert!(validate_password_strength("abcdefgh").is_err());
    }
}
