use std::sync::Arc;

use crate::auth::AuthService;
use crate::db::Database;
use crate::directory::CardDirectory;
use crate::transfer::TransferIngestion;

/// Gateway shared state
#[derive(Clone)]
pub struct AppState {
    pub auth: Arc<AuthService>,
    /// Card directory (cache replica reachable through it)
    pub directory: Arc<CardDirectory>,
    /// Ingestion front of the transfer pipeline
    pub ingestion: Arc<TransferIngestion>,
    /// PostgreSQL, when configured; pinged by the health check
    pub pg_db: Option<Arc<Database>>,
}

impl AppState {
    pub fn new(
        auth: Arc<AuthService>,
        directory: Arc<CardDirectory>,
        ingestion: Arc<TransferIngestion>,
    ) -> Self {
        Self {
            auth,
            directory,
            ingestion,
            pg_db: None,
        }
    }

    pub fn with_database(mut self, db: Arc<Database>) -> Self {
        self.pg_db = Some(db);
        self
    }
}
