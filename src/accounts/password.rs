use argon2::{
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use rand::rngs::SysRng;
use rand::TryRng;

use crate::error::{GoalListError, Result};

fn argon() -> Result<Argon2<'static>> {
    // Argon2id, ~19 MiB, two passes.
    let params =
        Params::new(19_456, 2, 1, None).map_err(|e| GoalListError::Runtime(e.to_string()))?;
    Ok(Argon2::new(Algorithm::Argon2id, Version::V0x13, params))
}

fn generated_salt() -> Result<SaltString> {
    let mut bytes = [0u8; 16];
    let mut rng = SysRng;
    rng.try_fill_bytes(&mut bytes)
        .map_err(|e| GoalListError::Runtime(e.to_string()))?;
    SaltString::encode_b64(&bytes).map_err(|e| GoalListError::Runtime(e.to_string()))
}

/// Hashes `password` into a PHC string.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = generated_salt()?;
    Ok(argon()?
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| GoalListError::Runtime(e.to_string()))?
        .to_string())
}

pub fn verify_password(phc: &str, password: &str) -> Result<bool> {
    let parsed = PasswordHash::new(phc).map_err(|e| GoalListError::Runtime(e.to_string()))?;
    Ok(argon()?
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
