//! Persistence layer.
//!
//! SQLite via sqlx. Three tables: `catalog` (seeded reference data),
//! `market_snapshots` (append-only quote history) and `deals` (escrow
//! state). Prices are stored as TEXT and parsed back into `Decimal` so
//! no precision is lost in the database round trip.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use tracing::{debug, info};
use uuid::Uuid;

use crate::types::{
    AssetKind, CatalogItem, Deal, DealStatus, PriceQuote, QuoteAttributes, RequiredAsset,
};

#[derive(Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Open (creating if needed) the database and run migrations.
    pub async fn connect(database_url: &str) -> Result<Self, sqlx::Error> {
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;
        let storage = Self { pool };
        storage.migrate().await?;
        info!(database_url, "Storage ready");
        Ok(storage)
    }

    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog (
                slug         TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                image_url    TEXT,
                total_supply INTEGER
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_snapshots (
                id         INTEGER PRIMARY KEY AUTOINCREMENT,
                slug       TEXT NOT NULL,
                source     TEXT NOT NULL,
                price      TEXT NOT NULL,
                currency   TEXT NOT NULL,
                scanned_at TEXT NOT NULL,
                pass_at    TEXT NOT NULL,
                attributes TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_snapshots_slug ON market_snapshots (slug, scanned_at)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS deals (
                id                      TEXT PRIMARY KEY,
                status                  TEXT NOT NULL,
                initiator_id            INTEGER NOT NULL,
                offer_slug              TEXT NOT NULL,
                required_kind           TEXT NOT NULL,
                required_slug           TEXT,
                required_contract       TEXT,
                required_amount         TEXT,
                memo_code               TEXT NOT NULL UNIQUE,
                initiator_deposited     INTEGER NOT NULL DEFAULT 0,
                counterparty_deposited  INTEGER NOT NULL DEFAULT 0,
                created_at              TEXT NOT NULL,
                updated_at              TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Catalog
    // -----------------------------------------------------------------------

    /// Upsert the configured catalog. Existing rows are refreshed so a
    /// config change takes effect on restart.
    pub async fn seed_catalog(&self, items: &[CatalogItem]) -> Result<(), sqlx::Error> {
        for item in items {
            sqlx::query(
                r#"
                INSERT INTO catalog (slug, name, image_url, total_supply)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT (slug) DO UPDATE SET
                    name = excluded.name,
                    image_url = excluded.image_url,
                    total_supply = excluded.total_supply
                "#,
            )
            .bind(&item.slug)
            .bind(&item.name)
            .bind(&item.image_url)
            .bind(item.total_supply)
            .execute(&self.pool)
            .await?;
        }
        debug!(count = items.len(), "Catalog seeded");
        Ok(())
    }

    pub async fn list_catalog(&self) -> Result<Vec<CatalogItem>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT slug, name, image_url, total_supply FROM catalog ORDER BY slug",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(catalog_from_row).collect()
    }

    pub async fn get_catalog_item(&self, slug: &str) -> Result<Option<CatalogItem>, sqlx::Error> {
        let row = sqlx::query(
            "SELECT slug, name, image_url, total_supply FROM catalog WHERE slug = ?1",
        )
        .bind(slug)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(catalog_from_row).transpose()
    }

    // -----------------------------------------------------------------------
    // Snapshots
    // -----------------------------------------------------------------------

    /// Append one pass worth of quotes. `pass_at` groups snapshots that
    /// belong to the same scan for history queries.
    pub async fn insert_quotes(
        &self,
        quotes: &[PriceQuote],
        pass_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        for q in quotes {
            let attributes = q
                .attributes
                .as_ref()
                .map(serde_json::to_string)
                .transpose()
                .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
            sqlx::query(
                r#"
                INSERT INTO market_snapshots
                    (slug, source, price, currency, scanned_at, pass_at, attributes)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
            )
            .bind(&q.slug)
            .bind(&q.source)
            .bind(q.price.to_string())
            .bind(&q.currency)
            .bind(q.scanned_at)
            .bind(pass_at)
            .bind(attributes)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    /// Freshest snapshot per source for one item.
    pub async fn latest_quotes(&self, slug: &str) -> Result<Vec<PriceQuote>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT s.slug, s.source, s.price, s.currency, s.scanned_at, s.attributes
            FROM market_snapshots s
            JOIN (
                SELECT source, MAX(scanned_at) AS max_at
                FROM market_snapshots
                WHERE slug = ?1
                GROUP BY source
            ) t ON s.source = t.source AND s.scanned_at = t.max_at
            WHERE s.slug = ?1
            ORDER BY s.source
            "#,
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(quote_from_row).collect()
    }

    /// Freshest snapshot per (slug, source) across the whole catalog.
    pub async fn latest_quotes_all(&self) -> Result<Vec<PriceQuote>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT s.slug, s.source, s.price, s.currency, s.scanned_at, s.attributes
            FROM market_snapshots s
            JOIN (
                SELECT slug, source, MAX(scanned_at) AS max_at
                FROM market_snapshots
                GROUP BY slug, source
            ) t ON s.slug = t.slug AND s.source = t.source AND s.scanned_at = t.max_at
            ORDER BY s.slug, s.source
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(quote_from_row).collect()
    }

    /// Per-pass floor for one item over the most recent passes, ordered
    /// oldest to newest.
    pub async fn floor_history(
        &self,
        slug: &str,
        passes: usize,
    ) -> Result<Vec<(DateTime<Utc>, Decimal)>, sqlx::Error> {
        let rows = sqlx::query(
            r#"
            SELECT pass_at, price
            FROM market_snapshots
            WHERE slug = ?1
            ORDER BY pass_at DESC
            "#,
        )
        .bind(slug)
        .fetch_all(&self.pool)
        .await?;

        // Group by pass and take the minimum price in Rust; the prices
        // are TEXT so SQL MIN would compare lexicographically.
        let mut history: Vec<(DateTime<Utc>, Decimal)> = Vec::new();
        for row in &rows {
            let pass_at: DateTime<Utc> = row.try_get("pass_at")?;
            let price = parse_decimal(row.try_get("price")?)?;
            match history.last_mut() {
                Some((at, floor)) if *at == pass_at => *floor = (*floor).min(price),
                _ => {
                    if history.len() >= passes {
                        break;
                    }
                    history.push((pass_at, price));
                }
            }
        }
        history.reverse();
        Ok(history)
    }

    // -----------------------------------------------------------------------
    // Deals
    // -----------------------------------------------------------------------

    pub async fn insert_deal(&self, deal: &Deal) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO deals
                (id, status, initiator_id, offer_slug, required_kind, required_slug,
                 required_contract, required_amount, memo_code,
                 initiator_deposited, counterparty_deposited, created_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
            "#,
        )
        .bind(deal.id.to_string())
        .bind(deal.status.as_str())
        .bind(deal.initiator_id)
        .bind(&deal.offer_slug)
        .bind(deal.required.kind.as_str())
        .bind(&deal.required.slug)
        .bind(&deal.required.token_contract)
        .bind(deal.required.amount.map(|a| a.to_string()))
        .bind(&deal.memo_code)
        .bind(deal.initiator_deposited)
        .bind(deal.counterparty_deposited)
        .bind(deal.created_at)
        .bind(deal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_deal(&self, id: Uuid) -> Result<Option<Deal>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM deals WHERE id = ?1")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deal_from_row).transpose()
    }

    pub async fn get_deal_by_memo(&self, memo_code: &str) -> Result<Option<Deal>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM deals WHERE memo_code = ?1")
            .bind(memo_code)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(deal_from_row).transpose()
    }

    /// Persist status, deposit flags and the update timestamp.
    pub async fn update_deal(&self, deal: &Deal) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            UPDATE deals SET
                status = ?2,
                initiator_deposited = ?3,
                counterparty_deposited = ?4,
                updated_at = ?5
            WHERE id = ?1
            "#,
        )
        .bind(deal.id.to_string())
        .bind(deal.status.as_str())
        .bind(deal.initiator_deposited)
        .bind(deal.counterparty_deposited)
        .bind(deal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn deals_with_status(&self, status: DealStatus) -> Result<Vec<Deal>, sqlx::Error> {
        let rows = sqlx::query("SELECT * FROM deals WHERE status = ?1 ORDER BY created_at")
            .bind(status.as_str())
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(deal_from_row).collect()
    }
}

// ---------------------------------------------------------------------------
// Row mapping
// ---------------------------------------------------------------------------

fn parse_decimal(raw: &str) -> Result<Decimal, sqlx::Error> {
    raw.parse::<Decimal>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn catalog_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<CatalogItem, sqlx::Error> {
    Ok(CatalogItem {
        slug: row.try_get("slug")?,
        name: row.try_get("name")?,
        image_url: row.try_get("image_url")?,
        total_supply: row.try_get("total_supply")?,
    })
}

fn quote_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<PriceQuote, sqlx::Error> {
    let attributes: Option<String> = row.try_get("attributes")?;
    let attributes: Option<QuoteAttributes> = attributes
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(PriceQuote {
        slug: row.try_get("slug")?,
        source: row.try_get("source")?,
        price: parse_decimal(row.try_get("price")?)?,
        currency: row.try_get("currency")?,
        scanned_at: row.try_get("scanned_at")?,
        attributes,
    })
}

fn deal_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Deal, sqlx::Error> {
    let id: String = row.try_get("id")?;
    let id = Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let status: String = row.try_get("status")?;
    let status: DealStatus = status
        .parse()
        .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?;
    let kind: String = row.try_get("required_kind")?;
    let kind: AssetKind = kind
        .parse()
        .map_err(|e: anyhow::Error| sqlx::Error::Decode(e.into()))?;
    let amount: Option<String> = row.try_get("required_amount")?;
    let amount = amount.as_deref().map(parse_decimal).transpose()?;

    Ok(Deal {
        id,
        status,
        initiator_id: row.try_get("initiator_id")?,
        offer_slug: row.try_get("offer_slug")?,
        required: RequiredAsset {
            kind,
            slug: row.try_get("required_slug")?,
            token_contract: row.try_get("required_contract")?,
            amount,
        },
        memo_code: row.try_get("memo_code")?,
        initiator_deposited: row.try_get("initiator_deposited")?,
        counterparty_deposited: row.try_get("counterparty_deposited")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
