use chrono::{DateTime, Utc};
use foliolink_core::{AssetCapability, BalanceSnapshot, GatewayCredentials, LinkedAccount};
use sqlx::{PgPool, Row};

/// Run embedded migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Balance snapshots
// ---------------------------------------------------------------------------

fn row_to_snapshot(r: &sqlx::postgres::PgRow) -> BalanceSnapshot {
    BalanceSnapshot {
        account_id: r.get("account_id"),
        cash: r.get("cash"),
        total_equity: r.get("total_equity"),
        buying_power: r.get("buying_power"),
        currency: r.get("currency"),
        last_updated: r.get("last_updated"),
    }
}

/// Read the snapshot row for an account regardless of age.
pub async fn select_balance_row(
    pool: &PgPool,
    account_id: &str,
) -> Result<Option<BalanceSnapshot>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT account_id, cash, total_equity, buying_power, currency, last_updated
         FROM balance_snapshots
         WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_snapshot))
}

/// Read the snapshot row only if `last_updated` is at or after the threshold.
pub async fn select_fresh_balance_row(
    pool: &PgPool,
    account_id: &str,
    threshold: DateTime<Utc>,
) -> Result<Option<BalanceSnapshot>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT account_id, cash, total_equity, buying_power, currency, last_updated
         FROM balance_snapshots
         WHERE account_id = $1 AND last_updated >= $2",
    )
    .bind(account_id)
    .bind(threshold)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_snapshot))
}

/// Insert or overwrite the snapshot row. `last_updated` never moves backwards.
pub async fn upsert_balance_row(
    pool: &PgPool,
    snapshot: &BalanceSnapshot,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO balance_snapshots (account_id, cash, total_equity, buying_power, currency, last_updated)
         VALUES ($1, $2, $3, $4, $5, $6)
         ON CONFLICT (account_id) DO UPDATE
         SET cash = EXCLUDED.cash,
             total_equity = EXCLUDED.total_equity,
             buying_power = EXCLUDED.buying_power,
             currency = EXCLUDED.currency,
             last_updated = GREATEST(balance_snapshots.last_updated, EXCLUDED.last_updated)",
    )
    .bind(&snapshot.account_id)
    .bind(snapshot.cash)
    .bind(snapshot.total_equity)
    .bind(snapshot.buying_power)
    .bind(&snapshot.currency)
    .bind(snapshot.last_updated)
    .execute(pool)
    .await?;

    Ok(())
}

/// Delete the snapshot row so the next read bypasses the TTL.
pub async fn delete_balance_row(pool: &PgPool, account_id: &str) -> Result<(), sqlx::Error> {
    sqlx::query("DELETE FROM balance_snapshots WHERE account_id = $1")
        .bind(account_id)
        .execute(pool)
        .await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Linked accounts
// ---------------------------------------------------------------------------

fn row_to_linked_account(r: &sqlx::postgres::PgRow) -> LinkedAccount {
    let capability = match r.get::<String, _>("capability").as_str() {
        "crypto" => AssetCapability::Crypto,
        _ => AssetCapability::Equities,
    };
    LinkedAccount {
        account_id: r.get("account_id"),
        institution: r.get("institution"),
        capability,
        currency: r.get("currency"),
        credentials: GatewayCredentials {
            credential_id: r.get("credential_id"),
            user_id: r.get("user_id"),
            user_secret: r.get("user_secret"),
        },
        linked_at: r.get("linked_at"),
    }
}

fn capability_str(capability: AssetCapability) -> &'static str {
    match capability {
        AssetCapability::Equities => "equities",
        AssetCapability::Crypto => "crypto",
    }
}

/// Look up a linked account by id.
pub async fn select_linked_account(
    pool: &PgPool,
    account_id: &str,
) -> Result<Option<LinkedAccount>, sqlx::Error> {
    let row = sqlx::query(
        "SELECT account_id, institution, capability, currency, credential_id, user_id, user_secret, linked_at
         FROM linked_accounts
         WHERE account_id = $1",
    )
    .bind(account_id)
    .fetch_optional(pool)
    .await?;

    Ok(row.as_ref().map(row_to_linked_account))
}

/// Record a new linked account (or refresh an existing link's credentials).
pub async fn upsert_linked_account(
    pool: &PgPool,
    account: &LinkedAccount,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO linked_accounts (account_id, institution, capability, currency, credential_id, user_id, user_secret, linked_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
         ON CONFLICT (account_id) DO UPDATE
         SET institution = EXCLUDED.institution,
             capability = EXCLUDED.capability,
             currency = EXCLUDED.currency,
             credential_id = EXCLUDED.credential_id,
             user_id = EXCLUDED.user_id,
             user_secret = EXCLUDED.user_secret",
    )
    .bind(&account.account_id)
    .bind(&account.institution)
    .bind(capability_str(account.capability))
    .bind(&account.currency)
    .bind(account.credentials.credential_id)
    .bind(&account.credentials.user_id)
    .bind(&account.credentials.user_secret)
    .bind(account.linked_at)
    .execute(pool)
    .await?;

    Ok(())
}

/// List all linked accounts.
pub async fn list_linked_accounts(pool: &PgPool) -> Result<Vec<LinkedAccount>, sqlx::Error> {
    let rows = sqlx::query(
        "SELECT account_id, institution, capability, currency, credential_id, user_id, user_secret, linked_at
         FROM linked_accounts
         ORDER BY account_id",
    )
    .fetch_all(pool)
    .await?;

    Ok(rows.iter().map(row_to_linked_account).collect())
}
