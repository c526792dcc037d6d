pub mod db;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use foliolink_core::{BalanceSnapshot, BalanceStore, ConnectionStore, LinkedAccount, StoreError};
use std::collections::HashMap;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Postgres stores
// ---------------------------------------------------------------------------

/// A PostgreSQL-backed balance snapshot store.
pub struct PostgresBalanceStore {
    pub pool: sqlx::PgPool,
}

impl PostgresBalanceStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BalanceStore for PostgresBalanceStore {
    async fn select_row(&self, account_id: &str) -> Result<Option<BalanceSnapshot>, StoreError> {
        db::select_balance_row(&self.pool, account_id)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn select_fresh(
        &self,
        account_id: &str,
        threshold: DateTime<Utc>,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        db::select_fresh_balance_row(&self.pool, account_id, threshold)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn upsert(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError> {
        db::upsert_balance_row(&self.pool, snapshot)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn delete(&self, account_id: &str) -> Result<(), StoreError> {
        db::delete_balance_row(&self.pool, account_id)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// A PostgreSQL-backed linked-account registry.
pub struct PostgresConnectionStore {
    pub pool: sqlx::PgPool,
}

impl PostgresConnectionStore {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ConnectionStore for PostgresConnectionStore {
    async fn get(&self, account_id: &str) -> Result<Option<LinkedAccount>, StoreError> {
        db::select_linked_account(&self.pool, account_id)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn record_link(&self, account: &LinkedAccount) -> Result<(), StoreError> {
        db::upsert_linked_account(&self.pool, account)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<LinkedAccount>, StoreError> {
        db::list_linked_accounts(&self.pool)
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// In-memory stores
// ---------------------------------------------------------------------------

/// In-memory balance store for tests and demo runs.
#[derive(Default)]
pub struct MemoryBalanceStore {
    rows: RwLock<HashMap<String, BalanceSnapshot>>,
}

impl MemoryBalanceStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BalanceStore for MemoryBalanceStore {
    async fn select_row(&self, account_id: &str) -> Result<Option<BalanceSnapshot>, StoreError> {
        Ok(self.rows.read().await.get(account_id).cloned())
    }

    async fn select_fresh(
        &self,
        account_id: &str,
        threshold: DateTime<Utc>,
    ) -> Result<Option<BalanceSnapshot>, StoreError> {
        Ok(self
            .rows
            .read()
            .await
            .get(account_id)
            .filter(|s| s.last_updated >= threshold)
            .cloned())
    }

    async fn upsert(&self, snapshot: &BalanceSnapshot) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let mut snapshot = snapshot.clone();
        // last_updated never moves backwards, matching the SQL upsert.
        if let Some(existing) = rows.get(&snapshot.account_id) {
            if existing.last_updated > snapshot.last_updated {
                snapshot.last_updated = existing.last_updated;
            }
        }
        rows.insert(snapshot.account_id.clone(), snapshot);
        Ok(())
    }

    async fn delete(&self, account_id: &str) -> Result<(), StoreError> {
        self.rows.write().await.remove(account_id);
        Ok(())
    }
}

/// In-memory linked-account registry for tests and demo runs.
#[derive(Default)]
pub struct MemoryConnectionStore {
    accounts: RwLock<HashMap<String, LinkedAccount>>,
}

impl MemoryConnectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConnectionStore for MemoryConnectionStore {
    async fn get(&self, account_id: &str) -> Result<Option<LinkedAccount>, StoreError> {
        Ok(self.accounts.read().await.get(account_id).cloned())
    }

    async fn record_link(&self, account: &LinkedAccount) -> Result<(), StoreError> {
        self.accounts
            .write()
            .await
            .insert(account.account_id.clone(), account.clone());
        Ok(())
    }

    async fn list(&self) -> Result<Vec<LinkedAccount>, StoreError> {
        let mut all: Vec<LinkedAccount> = self.accounts.read().await.values().cloned().collect();
        all.sort_by(|a, b| a.account_id.cmp(&b.account_id));
        Ok(all)
    }
}
