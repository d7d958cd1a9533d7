//! HTTP handlers, one submodule per resource

mod auth;
mod cache;
mod cards;
mod health;
mod transactions;

pub use auth::{login, logout, register, validate_token};
pub use cache::{cache_stats, get_cached_card};
pub use cards::{check_availability, create_card, get_card, list_cards, set_availability};
pub use health::health_check;
pub use transactions::{create_transaction, get_transaction};
