//! Users, passwords and sessions
//!
//! Passwords are hashed with Argon2. Login issues an HS256 JWT and stores it
//! as the user's single active session; a token is valid only while it is
//! that session's token and the session TTL has not elapsed. Logout drops
//! the session, so the token stops validating before its `exp`.

use std::sync::atomic::{AtomicI64, Ordering};

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::error::AuthError;

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_USERNAME_LEN: usize = 64;

/// JWT Claims structure
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub sub: String, // user_id as string
    pub username: String,
    pub exp: usize,
    pub iat: usize,
}

/// Caller identity resolved from a valid token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub user_id: i64,
    pub username: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub user_id: i64,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

struct UserRecord {
    user_id: i64,
    password_hash: String,
}

struct Session {
    token: String,
    expires_at: DateTime<Utc>,
}

pub struct AuthService {
    users: DashMap<String, UserRecord>,
    sessions: DashMap<String, Session>,
    next_user_id: AtomicI64,
    jwt_secret: String,
    session_ttl: Duration,
}

impl AuthService {
    pub fn new(jwt_secret: impl Into<String>, session_ttl: std::time::Duration) -> Self {
        Self {
            users: DashMap::new(),
            sessions: DashMap::new(),
            next_user_id: AtomicI64::new(1),
            jwt_secret: jwt_secret.into(),
            session_ttl: Duration::from_std(session_ttl).unwrap_or(Duration::hours(1)),
        }
    }

    /// Register a new user, returning its id
    pub fn register(&self, username: &str, password: &str) -> Result<i64, AuthError> {
        let username = username.trim();
        if username.is_empty() || username.len() > MAX_USERNAME_LEN {
            return Err(AuthError::InvalidInput(format!(
                "username must be 1-{} characters",
                MAX_USERNAME_LEN
            )));
        }
        if password.len() < MIN_PASSWORD_LEN {
            return Err(AuthError::InvalidInput(format!(
                "password must be at least {} characters",
                MIN_PASSWORD_LEN
            )));
        }

        // Hash before taking the entry lock
        let salt = SaltString::generate(&mut OsRng);
        let password_hash = Argon2::default()
            .hash_password(password.as_bytes(), &salt)
            .map_err(|e| AuthError::Internal(format!("Hashing failed: {}", e)))?
            .to_string();

        match self.users.entry(username.to_string()) {
            Entry::Occupied(_) => {
                warn!(username = %username, "Registration attempt for existing user");
                Err(AuthError::UserExists)
            }
            Entry::Vacant(slot) => {
                let user_id = self.next_user_id.fetch_add(1, Ordering::SeqCst);
                slot.insert(UserRecord {
                    user_id,
                    password_hash,
                });
                info!(user_id, username = %username, "User registered");
                Ok(user_id)
            }
        }
    }

    /// Verify the password and open a session, replacing any previous one
    pub fn login(&self, username: &str, password: &str) -> Result<LoginResponse, AuthError> {
        let username = username.trim();
        let (user_id, password_hash) = self
            .users
            .get(username)
            .map(|u| (u.user_id, u.password_hash.clone()))
            .ok_or(AuthError::InvalidCredentials)?;

        let parsed_hash = PasswordHash::new(&password_hash)
            .map_err(|e| AuthError::Internal(format!("Invalid hash format: {}", e)))?;
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let now = Utc::now();
        let expires_at = now
            .checked_add_signed(self.session_ttl)
            .ok_or_else(|| AuthError::Internal("session expiry out of range".into()))?;
        let claims = Claims {
            sub: user_id.to_string(),
            username: username.to_string(),
            exp: expires_at.timestamp() as usize,
            iat: now.timestamp() as usize,
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::Internal(format!("Failed to generate token: {}", e)))?;

        self.sessions.insert(
            username.to_string(),
            Session {
                token: token.clone(),
                expires_at,
            },
        );
        info!(user_id, username = %username, "User logged in");

        Ok(LoginResponse {
            token,
            user_id,
            username: username.to_string(),
            expires_at,
        })
    }

    /// Drop the user's session. Returns false if there was none.
    pub fn logout(&self, username: &str) -> bool {
        let removed = self.sessions.remove(username.trim()).is_some();
        debug!(username = %username, removed, "Logout");
        removed
    }

    /// `ValidateToken(username, token)`: the token is the user's live session
    pub fn validate_token(&self, username: &str, token: &str) -> bool {
        match self.authenticate(token) {
            Ok(user) => user.username == username.trim(),
            Err(_) => false,
        }
    }

    /// Resolve a bearer token to its user
    pub fn authenticate(&self, token: &str) -> Result<AuthenticatedUser, AuthError> {
        let claims = self.verify_jwt(token)?;
        let user_id: i64 = claims.sub.parse().map_err(|_| AuthError::InvalidToken)?;

        let session = self
            .sessions
            .get(&claims.username)
            .ok_or(AuthError::InvalidToken)?;
        if session.token != token || session.expires_at <= Utc::now() {
            return Err(AuthError::InvalidToken);
        }

        Ok(AuthenticatedUser {
            user_id,
            username: claims.username,
        })
    }

    /// Drop expired sessions; returns how many were removed
    pub fn purge_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let before = self.sessions.len();
        self.sessions.retain(|_, s| s.expires_at > now);
        before - self.sessions.len()
    }

    fn verify_jwt(&self, token: &str) -> Result<Claims, AuthError> {
        let decoding_key = DecodingKey::from_secret(self.jwt_secret.as_bytes());
        let validation = Validation::new(Algorithm::HS256);
        decode::<Claims>(token, &decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|_| AuthError::InvalidToken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> AuthService {
        AuthService::new("test-secret", std::time::Duration::from_secs(3600))
    }

    #[test]
    fn test_register_and_login() {
        let auth = service();
        let user_id = auth.register("alice", "password123").unwrap();

        let login = auth.login("alice", "password123").unwrap();
        assert_eq!(login.user_id, user_id);
        assert!(auth.validate_token("alice", &login.token));

        let user = auth.authenticate(&login.token).unwrap();
        assert_eq!(user.user_id, user_id);
        assert_eq!(user.username, "alice");
    }

    #[test]
    fn test_duplicate_registration() {
        let auth = service();
        auth.register("alice", "password123").unwrap();
        assert_eq!(
            auth.register("alice", "otherpassword"),
            Err(AuthError::UserExists)
        );
    }

    #[test]
    fn test_register_validation() {
        let auth = service();
        assert!(matches!(
            auth.register("", "password123"),
            Err(AuthError::InvalidInput(_))
        ));
        assert!(matches!(
            auth.register("bob", "short"),
            Err(AuthError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_wrong_password() {
        let auth = service();
        auth.register("alice", "password123").unwrap();
        assert!(matches!(
            auth.login("alice", "wrongpassword"),
            Err(AuthError::InvalidCredentials)
        ));
        assert!(matches!(
            auth.login("nobody", "password123"),
            Err(AuthError::InvalidCredentials)
        ));
    }

    #[test]
    fn test_token_bound_to_username() {
        let auth = service();
        auth.register("alice", "password123").unwrap();
        auth.register("bob", "password123").unwrap();
        let login = auth.login("alice", "password123").unwrap();

        assert!(!auth.validate_token("bob", &login.token));
        assert!(!auth.validate_token("alice", "garbage"));
    }

    #[test]
    fn test_relogin_replaces_session() {
        let auth = service();
        auth.register("alice", "password123").unwrap();
        let first = auth.login("alice", "password123").unwrap();
        // iat has second resolution; make the second token differ anyway
        std::thread::sleep(std::time::Duration::from_millis(1100));
        let second = auth.login("alice", "password123").unwrap();

        assert!(!auth.validate_token("alice", &first.token));
        assert!(auth.validate_token("alice", &second.token));
    }

    #[test]
    fn test_logout_invalidates_token() {
        let auth = service();
        auth.register("alice", "password123").unwrap();
        let login = auth.login("alice", "password123").unwrap();

        assert!(auth.logout("alice"));
        assert!(!auth.validate_token("alice", &login.token));
        assert!(!auth.logout("alice"));
    }

    #[test]
    fn test_session_expires() {
        let auth = AuthService::new("test-secret", std::time::Duration::ZERO);
        auth.register("alice", "password123").unwrap();
        let login = auth.login("alice", "password123").unwrap();

        assert!(!auth.validate_token("alice", &login.token));
        assert_eq!(auth.purge_expired_sessions(), 1);
    }
}
