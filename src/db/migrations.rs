//! Declarative schema migrations.
//!
//! Each entry is a numbered list of statements. Installation is idempotent:
//! applied versions are recorded in `schema_version`, and additive changes
//! to pre-existing tables tolerate "duplicate column" failures so a store
//! written by an older build upgrades in place.

use sqlx::SqlitePool;
use tracing::{info, warn};

struct Migration {
    version: i64,
    statements: &'static [&'static str],
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        statements: &[
            r#"
            CREATE TABLE IF NOT EXISTS merchants (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL UNIQUE,
                phone TEXT,
                status TEXT NOT NULL DEFAULT 'unverified',
                production_webhook_url TEXT,
                production_webhook_enabled INTEGER NOT NULL DEFAULT 0,
                sandbox_webhook_url TEXT,
                sandbox_webhook_enabled INTEGER NOT NULL DEFAULT 0,
                ip_whitelist_enabled INTEGER NOT NULL DEFAULT 0,
                ip_whitelist TEXT,
                created_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS merchant_credentials (
                merchant_id TEXT PRIMARY KEY
                    REFERENCES merchants(id) ON DELETE CASCADE,
                production_api_key_hash TEXT,
                production_api_key_prefix TEXT,
                production_api_secret TEXT,
                production_webhook_secret TEXT,
                production_created_at INTEGER,
                production_rotated_at INTEGER,
                sandbox_api_key_hash TEXT,
                sandbox_api_key_prefix TEXT,
                sandbox_api_secret TEXT,
                sandbox_webhook_secret TEXT,
                sandbox_created_at INTEGER,
                sandbox_rotated_at INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS invoices (
                id TEXT PRIMARY KEY,
                merchant_id TEXT NOT NULL
                    REFERENCES merchants(id) ON DELETE CASCADE,
                env TEXT NOT NULL,
                principal TEXT NOT NULL,
                reference_id TEXT,
                base_amount INTEGER NOT NULL,
                unique_suffix INTEGER NOT NULL,
                final_amount INTEGER NOT NULL,
                status TEXT NOT NULL,
                qris_string TEXT NOT NULL,
                metadata TEXT,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL,
                paid_at INTEGER
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_invoices_merchant ON invoices(merchant_id, env, created_at)",
            "CREATE INDEX IF NOT EXISTS idx_invoices_expiry ON invoices(status, expires_at)",
            r#"
            CREATE TABLE IF NOT EXISTS pending_transactions (
                invoice_id TEXT PRIMARY KEY
                    REFERENCES invoices(id) ON DELETE CASCADE,
                merchant_id TEXT NOT NULL,
                principal TEXT NOT NULL,
                unique_suffix INTEGER NOT NULL,
                final_amount INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_pending_principal_suffix ON pending_transactions(principal, unique_suffix)",
            r#"
            CREATE TABLE IF NOT EXISTS paid_transactions (
                invoice_id TEXT PRIMARY KEY,
                paid_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS invoice_events (
                id TEXT PRIMARY KEY,
                invoice_id TEXT NOT NULL
                    REFERENCES invoices(id) ON DELETE CASCADE,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                created_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_events_invoice ON invoice_events(invoice_id, created_at)",
            r#"
            CREATE TABLE IF NOT EXISTS used_nonces (
                merchant_id TEXT NOT NULL,
                nonce TEXT NOT NULL,
                expires_at INTEGER NOT NULL,
                PRIMARY KEY (merchant_id, nonce)
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS webhook_deliveries (
                id TEXT PRIMARY KEY,
                merchant_id TEXT NOT NULL
                    REFERENCES merchants(id) ON DELETE CASCADE,
                env TEXT NOT NULL,
                invoice_id TEXT,
                event_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'queued',
                attempt_count INTEGER NOT NULL DEFAULT 0,
                next_retry_at INTEGER NOT NULL,
                last_status INTEGER,
                last_error TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_deliveries_due ON webhook_deliveries(status, next_retry_at)",
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                merchant_id TEXT,
                alert_type TEXT NOT NULL,
                message TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                resolved_at INTEGER
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS refunds (
                id TEXT PRIMARY KEY,
                invoice_id TEXT NOT NULL
                    REFERENCES invoices(id) ON DELETE CASCADE,
                amount INTEGER NOT NULL,
                reason TEXT,
                status TEXT NOT NULL DEFAULT 'requested',
                created_at INTEGER NOT NULL,
                processed_at INTEGER
            )
            "#,
        ],
    },
    Migration {
        version: 2,
        statements: &[
            "ALTER TABLE merchants ADD COLUMN fee_bps INTEGER NOT NULL DEFAULT 0",
            "ALTER TABLE merchants ADD COLUMN fee_fixed INTEGER NOT NULL DEFAULT 0",
        ],
    },
    Migration {
        version: 3,
        statements: &["ALTER TABLE webhook_deliveries ADD COLUMN response_snippet TEXT"],
    },
];

/// Install or upgrade the schema. Safe to call on every startup.
pub async fn run(pool: &SqlitePool) -> anyhow::Result<()> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
        )",
    )
    .execute(pool)
    .await?;

    let current: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await?;
    let current = current.unwrap_or(0);

    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        for statement in migration.statements {
            if let Err(err) = sqlx::query(statement).execute(pool).await {
                if is_already_applied(&err) {
                    warn!(
                        version = migration.version,
                        "skipping already-applied schema change: {}", err
                    );
                    continue;
                }
                return Err(err.into());
            }
        }
        sqlx::query("INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2)")
            .bind(migration.version)
            .bind(chrono::Utc::now().timestamp())
            .execute(pool)
            .await?;
        info!(version = migration.version, "applied schema migration");
    }

    Ok(())
}

/// Additive changes against a table that already carries the column. SQLite
/// reports these as plain textual errors, so the match is on the message.
fn is_already_applied(err: &sqlx::Error) -> bool {
    let text = err.to_string();
    text.contains("duplicate column name") || text.contains("already exists")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let pool = crate::db::create_memory_pool().await.unwrap();
        run(&pool).await.unwrap();
        run(&pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }

    #[tokio::test]
    async fn schema_supports_core_tables() {
        let pool = crate::db::create_memory_pool().await.unwrap();
        run(&pool).await.unwrap();

        for table in [
            "merchants",
            "merchant_credentials",
            "invoices",
            "pending_transactions",
            "paid_transactions",
            "invoice_events",
            "used_nonces",
            "webhook_deliveries",
            "alerts",
            "refunds",
        ] {
            let count: i64 = sqlx::query_scalar(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
            )
            .bind(table)
            .fetch_one(&pool)
            .await
            .unwrap();
            assert_eq!(count, 1, "missing table {}", table);
        }
    }

    #[tokio::test]
    async fn additive_drift_is_tolerated() {
        let pool = crate::db::create_memory_pool().await.unwrap();
        run(&pool).await.unwrap();

        // Simulate a store where a later additive change was hand-applied:
        // wind the version back and re-run.
        sqlx::query("DELETE FROM schema_version WHERE version > 1")
            .execute(&pool)
            .await
            .unwrap();
        run(&pool).await.unwrap();

        let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(version, MIGRATIONS.last().unwrap().version);
    }
}
