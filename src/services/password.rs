//! Bcrypt hashing for link passwords.
//!
//! Hashing is deliberately slow, so both directions run on the blocking
//! thread pool instead of stalling the async workers.

use super::error::{FileError, FileResult};
use tokio::task;

#[derive(Clone, Copy, Debug)]
pub struct PasswordHasher {
    cost: u32,
}

impl PasswordHasher {
    pub fn new(cost: u32) -> Self {
        Self { cost }
    }

    pub async fn hash(&self, password: String) -> FileResult<String> {
        let cost = self.cost;
        task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| FileError::Hashing(e.to_string()))?
            .map_err(|e| FileError::Hashing(e.to_string()))
    }

    pub async fn verify(&self, password: String, hash: String) -> FileResult<bool> {
        task::spawn_blocking(move || bcrypt::verify(password, &hash))
            .await
            .map_err(|e| FileError::Hashing(e.to_string()))?
            .map_err(|e| FileError::Hashing(e.to_string()))
    }
}
