//! # Cart Repository
//!
//! Working-cart lines, persisted so an interrupted cart survives restart.
//! Cleared by RAZ.

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::error::DbResult;
use till_core::CartItem;

/// Repository for working-cart items.
#[derive(Debug, Clone)]
pub struct CartRepository {
    pool: SqlitePool,
}

fn item_from_row(row: &SqliteRow) -> DbResult<CartItem> {
    Ok(CartItem {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        name: row.try_get("name")?,
        unit_price_cents: row.try_get("unit_price_cents")?,
        quantity: row.try_get("quantity")?,
        category: row.try_get("category")?,
        added_at: row.try_get("added_at")?,
    })
}

impl CartRepository {
    /// Creates a new CartRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CartRepository { pool }
    }

    /// Bulk-inserts cart items in one transaction.
    pub async fn insert_many(&self, items: &[CartItem]) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query(
                "INSERT INTO cart_items (
                    id, product_id, name, unit_price_cents, quantity, category, added_at
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )
            .bind(&item.id)
            .bind(&item.product_id)
            .bind(&item.name)
            .bind(item.unit_price_cents)
            .bind(item.quantity)
            .bind(&item.category)
            .bind(item.added_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// All cart items, oldest first.
    pub async fn list(&self) -> DbResult<Vec<CartItem>> {
        let rows = sqlx::query(
            "SELECT id, product_id, name, unit_price_cents, quantity, category, added_at
             FROM cart_items ORDER BY added_at, id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Range scan over the (category, added_at) index.
    pub async fn list_by_category(&self, category: &str) -> DbResult<Vec<CartItem>> {
        let rows = sqlx::query(
            "SELECT id, product_id, name, unit_price_cents, quantity, category, added_at
             FROM cart_items WHERE category = ?1 ORDER BY added_at, id",
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(item_from_row).collect()
    }

    /// Removes one cart item.
    pub async fn remove(&self, id: &str) -> DbResult<()> {
        sqlx::query("DELETE FROM cart_items WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Number of cart items.
    pub async fn count(&self) -> DbResult<i64> {
        let n: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM cart_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(n)
    }
}
