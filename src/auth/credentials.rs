use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Algorithm, Argon2, Params, Version,
};
use tracing::{debug, info};

use super::AuthError;
use crate::config::AuthConfig;
use crate::db::{DbPool, User, UserRole};

/// Outcome of a successful credential check
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedUser {
    pub user_id: i64,
    pub username: String,
    pub role: UserRole,
}

/// Owns the `users` table and every password hash in it.
///
/// Hashes are Argon2id PHC strings; the parameters used at creation time are
/// embedded in each hash, so changing the configured cost only affects new
/// accounts.
pub struct CredentialStore {
    db: DbPool,
    argon2: Argon2<'static>,
    /// Verified against when the username is unknown, so a miss costs as much
    /// as a wrong password
    dummy_hash: String,
}

impl CredentialStore {
    pub fn new(db: DbPool, config: &AuthConfig) -> Result<Self, AuthError> {
        Self::with_cost(db, config.hash_memory_kib, config.hash_iterations)
    }

    pub fn with_cost(db: DbPool, memory_kib: u32, iterations: u32) -> Result<Self, AuthError> {
        let params = Params::new(memory_kib, iterations, Params::DEFAULT_P_COST, None)
            .map_err(|e| AuthError::Hashing(e.to_string()))?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let dummy_hash = hash_with(&argon2, "garaged-dummy-password")?;

        Ok(Self {
            db,
            argon2,
            dummy_hash,
        })
    }

    /// Hash a password with a fresh random salt, off the async runtime
    pub async fn hash_password(&self, password: &str) -> Result<String, AuthError> {
        let argon2 = self.argon2.clone();
        let password = password.to_string();
        tokio::task::spawn_blocking(move || hash_with(&argon2, &password))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))?
    }

    /// Verify a password against a stored hash, off the async runtime
    pub async fn verify_password(&self, password: &str, hash: &str) -> Result<bool, AuthError> {
        let argon2 = self.argon2.clone();
        let password = password.to_string();
        let hash = hash.to_string();
        tokio::task::spawn_blocking(move || verify_with(&argon2, &password, &hash))
            .await
            .map_err(|e| AuthError::Hashing(e.to_string()))
    }

    /// Check a username/password pair.
    ///
    /// Unknown users and wrong passwords both come back as
    /// `InvalidCredentials`.
    pub async fn verify(&self, username: &str, password: &str) -> Result<VerifiedUser, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingInput);
        }

        let user = self.find_user(username).await?;

        let (hash, user) = match user {
            Some(user) => (user.password_hash.clone(), Some(user)),
            None => (self.dummy_hash.clone(), None),
        };

        let valid = self.verify_password(password, &hash).await?;
        match user {
            Some(user) if valid => Ok(VerifiedUser {
                user_id: user.id,
                role: user.role(),
                username: user.username,
            }),
            _ => {
                debug!(username = %username, "Credential check failed");
                Err(AuthError::InvalidCredentials)
            }
        }
    }

    pub async fn find_user(&self, username: &str) -> Result<Option<User>, AuthError> {
        let user = sqlx::query_as::<_, User>("SELECT * FROM users WHERE username = ?")
            .bind(username)
            .fetch_optional(&self.db)
            .await?;
        Ok(user)
    }

    /// Create a read-only account. Admins are only ever created through
    /// [`CredentialStore::ensure_admin`].
    pub async fn add_user(&self, username: &str, password: &str) -> Result<i64, AuthError> {
        self.insert_user(username, password, UserRole::Read).await
    }

    /// Create the admin account if no user with that name exists.
    /// Returns true when a new account was created.
    pub async fn ensure_admin(&self, username: &str, password: &str) -> Result<bool, AuthError> {
        if self.find_user(username).await?.is_some() {
            return Ok(false);
        }
        self.insert_user(username, password, UserRole::Admin).await?;
        info!(username = %username, "Created admin user");
        Ok(true)
    }

    async fn insert_user(&self, username: &str, password: &str, role: UserRole) -> Result<i64, AuthError> {
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::MissingInput);
        }

        let password_hash = self.hash_password(password).await?;

        let result = sqlx::query("INSERT INTO users (username, role, password) VALUES (?, ?, ?)")
            .bind(username)
            .bind(role.as_str())
            .bind(&password_hash)
            .execute(&self.db)
            .await
            .map_err(|e| match &e {
                sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                    AuthError::AlreadyExists
                }
                _ => AuthError::Storage(e),
            })?;

        Ok(result.last_insert_rowid())
    }

    /// Remove a non-admin account
    pub async fn remove_user(&self, username: &str) -> Result<(), AuthError> {
        let result = sqlx::query("DELETE FROM users WHERE username = ? AND LOWER(role) <> 'admin'")
            .bind(username)
            .execute(&self.db)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AuthError::NotFound);
        }
        info!(username = %username, "Removed user");
        Ok(())
    }

    /// Usernames of all non-admin accounts, alphabetically
    pub async fn list_users(&self) -> Result<Vec<String>, AuthError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT username FROM users WHERE LOWER(role) <> 'admin' ORDER BY username ASC",
        )
        .fetch_all(&self.db)
        .await?;
        Ok(rows.into_iter().map(|(u,)| u).collect())
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Hashing(e.to_string()))?;
    Ok(hash.to_string())
}

fn verify_with(argon2: &Argon2<'_>, password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => argon2.verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
pub(crate) fn test_store(db: DbPool) -> CredentialStore {
    CredentialStore::with_cost(db, 64, 1).expect("credential store")
}
