//! Authentication boundary
//!
//! `Register`, `Login`, `ValidateToken` and `Logout` over an in-memory user
//! and session store. The gateway resolves bearer tokens through
//! [`AuthService::authenticate`].

pub mod error;
pub mod service;

pub use error::AuthError;
pub use service::{AuthService, AuthenticatedUser, Claims, LoginResponse};
