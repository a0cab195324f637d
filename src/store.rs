//! MySQL-backed registry and notification store
//!
//! Three tables: eth_keys (locally-managed addresses and their private
//! keys), notifications (pending deliveries for consumers), and settings
//! (the last_block checkpoint). All address columns hold the canonical
//! lowercase hex form.

use anyhow::{Context, Result};
use serde::Serialize;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions};
use sqlx::Row;
use tracing::{info, warn};

use crate::config::Config;

/// How many notifications a consumer drains per request.
const DRAIN_BATCH: i64 = 100;

const SCHEMA: &[&str] = &[
    "CREATE TABLE eth_keys(
        id INT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        address VARCHAR(40),
        private VARCHAR(64)
    )",
    "CREATE INDEX eth_keys_address_idx ON eth_keys(address)",
    "CREATE TABLE notifications(
        id INT UNSIGNED NOT NULL AUTO_INCREMENT PRIMARY KEY,
        address_from     VARCHAR(40),
        address_to       VARCHAR(40),
        address_contract VARCHAR(40),
        amount           VARCHAR(80),
        is_pending       BOOLEAN NOT NULL DEFAULT false,
        tx_hash          VARCHAR(64),
        created_at       DATETIME DEFAULT NOW()
    )",
    "CREATE TABLE settings(
        id INT UNSIGNED AUTO_INCREMENT PRIMARY KEY,
        name VARCHAR(32) UNIQUE,
        value VARCHAR(64)
    )",
];

/// A persisted notification, as returned to consumers.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub id: u64,
    pub address_from: String,
    pub address_to: String,
    pub address_contract: String,
    pub amount: String,
    pub is_pending: bool,
    pub tx_hash: String,
    pub created_at: String,
}

/// Shared handle to the MySQL store. Cheap to clone; the underlying pool
/// serializes writes.
#[derive(Clone)]
pub struct Store {
    pool: MySqlPool,
}

impl Store {
    /// Connect to the database described by the configuration.
    pub async fn open(config: &Config) -> Result<Self> {
        let options = connect_options(config)?;
        info!(
            "Connecting to DB {} on {} ({})",
            config.db_name, config.db_host, config.db_protocol
        );

        let pool = MySqlPoolOptions::new()
            .max_connections(16)
            .connect_with(options)
            .await
            .context("Could not connect to database")?;

        info!("Connected to DB");
        Ok(Self { pool })
    }

    /// Create the schema. One-shot administrative action.
    pub async fn init_tables(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("Schema statement failed: {}", statement))?;
        }
        Ok(())
    }

    /// Persist a managed key pair.
    pub async fn insert_key(&self, address: &str, private: &str) -> Result<()> {
        sqlx::query("INSERT INTO eth_keys(address, private) VALUES(?, ?)")
            .bind(address)
            .bind(private)
            .execute(&self.pool)
            .await
            .context("Could not insert key")?;
        Ok(())
    }

    /// Check whether an address is locally managed.
    pub async fn is_address_known(&self, address: &str) -> Result<bool> {
        let row = sqlx::query("SELECT id FROM eth_keys WHERE address = LOWER(?)")
            .bind(address)
            .fetch_optional(&self.pool)
            .await
            .context("Known-address lookup failed")?;
        Ok(row.is_some())
    }

    /// Read a setting value.
    pub async fn get_setting(&self, name: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM settings WHERE name = LOWER(?)")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .context("Setting lookup failed")?;
        Ok(match row {
            Some(row) => Some(row.try_get("value").context("Setting value column")?),
            None => None,
        })
    }

    /// Write a setting value (upsert).
    pub async fn set_setting(&self, name: &str, value: &str) -> Result<()> {
        sqlx::query("INSERT INTO settings(name, value) VALUES (?, ?) ON DUPLICATE KEY UPDATE value = ?")
            .bind(name)
            .bind(value)
            .bind(value)
            .execute(&self.pool)
            .await
            .context("Could not write setting")?;
        Ok(())
    }

    /// Read the last processed block number.
    ///
    /// A missing or unparseable checkpoint yields 0, which starts the
    /// listener live with no replay.
    pub async fn last_block(&self) -> u64 {
        match self.get_setting("last_block").await {
            Ok(Some(value)) => parse_last_block(&value),
            Ok(None) => {
                warn!("Could not get last block id parsed from database: No recovery.");
                0
            }
            Err(e) => {
                warn!("Could not read last block checkpoint: {:#}. No recovery.", e);
                0
            }
        }
    }

    /// Persist one notification.
    pub async fn insert_notification(
        &self,
        address_from: &str,
        address_to: &str,
        address_contract: &str,
        amount: &str,
        is_pending: bool,
        tx_hash: &str,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO notifications(address_from, address_to, address_contract, amount, is_pending, tx_hash)
             VALUES(?, ?, ?, ?, ?, ?)",
        )
        .bind(address_from)
        .bind(address_to)
        .bind(address_contract)
        .bind(amount)
        .bind(is_pending)
        .bind(tx_hash)
        .execute(&self.pool)
        .await
        .context("Could not insert notification")?;
        Ok(())
    }

    /// Read the next batch of notifications in ascending id order.
    ///
    /// With `remove`, the returned rows are deleted in the same transaction,
    /// so a concurrent insert between read and delete cannot be lost.
    pub async fn get_notifications(&self, remove: bool) -> Result<Vec<Notification>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Could not begin transaction")?;

        let rows = sqlx::query(
            "SELECT id, address_from, address_to, address_contract, amount, is_pending, tx_hash,
                    CAST(created_at AS CHAR) AS created_at
             FROM notifications ORDER BY id ASC LIMIT ?",
        )
        .bind(DRAIN_BATCH)
        .fetch_all(&mut *tx)
        .await
        .context("Could not read notifications")?;

        let mut notifications = Vec::with_capacity(rows.len());
        let mut max_id: u32 = 0;
        for row in rows {
            let id: u32 = row.try_get("id").context("id column")?;
            max_id = max_id.max(id);
            notifications.push(Notification {
                id: id as u64,
                address_from: row.try_get("address_from").context("address_from column")?,
                address_to: row.try_get("address_to").context("address_to column")?,
                address_contract: row
                    .try_get("address_contract")
                    .context("address_contract column")?,
                amount: row.try_get("amount").context("amount column")?,
                is_pending: row.try_get("is_pending").context("is_pending column")?,
                tx_hash: row.try_get("tx_hash").context("tx_hash column")?,
                created_at: row.try_get("created_at").context("created_at column")?,
            });
        }

        if remove && !notifications.is_empty() {
            sqlx::query("DELETE FROM notifications WHERE id <= ?")
                .bind(max_id)
                .execute(&mut *tx)
                .await
                .context("Could not remove notifications")?;
        }

        tx.commit().await.context("Could not commit drain")?;
        Ok(notifications)
    }
}

/// Build connection options from the configuration. The `unix` protocol
/// treats the host as a socket path; anything else connects over TCP.
fn connect_options(config: &Config) -> Result<MySqlConnectOptions> {
    let options = MySqlConnectOptions::new()
        .username(&config.db_user)
        .password(&config.db_pass)
        .database(&config.db_name);

    if config.db_protocol == "unix" {
        return Ok(options.socket(&config.db_host));
    }

    let (host, port) = split_host_port(&config.db_host)?;
    Ok(options.host(host).port(port))
}

/// Split "host" or "host:port" into parts; the port defaults to 3306.
fn split_host_port(host: &str) -> Result<(&str, u16)> {
    match host.split_once(':') {
        Some((host, port)) => {
            let port = port
                .parse()
                .with_context(|| format!("Invalid port in db host: {}", host))?;
            Ok((host, port))
        }
        None => Ok((host, 3306)),
    }
}

/// Parse a persisted checkpoint value, warning on garbage like the rest of
/// the settings plumbing.
fn parse_last_block(value: &str) -> u64 {
    match value.parse() {
        Ok(block) => block,
        Err(_) => {
            warn!("Could not convert {} as integer", value);
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_last_block() {
        assert_eq!(parse_last_block("0"), 0);
        assert_eq!(parse_last_block("1234567"), 1234567);
        assert_eq!(parse_last_block("not-a-number"), 0);
        assert_eq!(parse_last_block(""), 0);
        assert_eq!(parse_last_block("-5"), 0);
    }

    #[test]
    fn test_split_host_port() {
        assert_eq!(split_host_port("db.local").unwrap(), ("db.local", 3306));
        assert_eq!(split_host_port("db.local:3307").unwrap(), ("db.local", 3307));
        assert!(split_host_port("db.local:xyz").is_err());
    }
}
