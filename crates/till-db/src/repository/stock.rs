//! # Stock Repository
//!
//! Stock positions and the append-only movement log.
//!
//! ## The Clamp Rule
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                  apply_movement (ONE transaction)                       │
//! │                                                                         │
//! │  1. INSERT INTO stock_movements (..., quantity = -5)   ← unclamped     │
//! │  2. physical_stock = max(0, physical_stock + (-5))     ← clamped       │
//! │                                                                         │
//! │  The log keeps the raw delta for audit; the derived level never goes   │
//! │  negative. A clamped application is reported to the caller AND kept    │
//! │  out of band of the sale that caused it (the sale proceeds).           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::error::DbResult;
use till_core::{Stock, StockMovement};

/// Outcome of applying one movement to a stock row.
#[derive(Debug, Clone)]
pub struct StockApplication {
    pub product_id: String,
    pub previous_physical: i64,
    pub new_physical: i64,
    /// True when the raw delta would have driven the level negative.
    pub clamped: bool,
}

/// Repository for stock and stock movement operations.
#[derive(Debug, Clone)]
pub struct StockRepository {
    pool: SqlitePool,
}

fn stock_from_row(row: &SqliteRow) -> DbResult<Stock> {
    Ok(Stock {
        product_id: row.try_get("product_id")?,
        category: row.try_get("category")?,
        product_name: row.try_get("product_name")?,
        general_stock: row.try_get("general_stock")?,
        physical_stock: row.try_get("physical_stock")?,
        min_stock: row.try_get("min_stock")?,
        last_update: row.try_get("last_update")?,
    })
}

fn movement_from_row(row: &SqliteRow) -> DbResult<StockMovement> {
    Ok(StockMovement {
        id: row.try_get("id")?,
        product_id: row.try_get("product_id")?,
        movement_type: row.try_get("movement_type")?,
        quantity: row.try_get("quantity")?,
        vendor_id: row.try_get("vendor_id")?,
        sale_id: row.try_get("sale_id")?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

impl StockRepository {
    /// Creates a new StockRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StockRepository { pool }
    }

    /// Inserts or fully replaces a stock row.
    pub async fn upsert(&self, stock: &Stock) -> DbResult<()> {
        debug!(product = %stock.product_id, physical = stock.physical_stock, "Upserting stock");

        sqlx::query(
            "INSERT INTO stock (
                product_id, category, product_name, general_stock,
                physical_stock, min_stock, last_update
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(product_id) DO UPDATE SET
                category = excluded.category,
                product_name = excluded.product_name,
                general_stock = excluded.general_stock,
                physical_stock = excluded.physical_stock,
                min_stock = excluded.min_stock,
                last_update = excluded.last_update",
        )
        .bind(&stock.product_id)
        .bind(&stock.category)
        .bind(&stock.product_name)
        .bind(stock.general_stock)
        .bind(stock.physical_stock)
        .bind(stock.min_stock)
        .bind(stock.last_update)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Gets a stock row by product ID.
    pub async fn get(&self, product_id: &str) -> DbResult<Option<Stock>> {
        let row = sqlx::query(
            "SELECT product_id, category, product_name, general_stock,
                    physical_stock, min_stock, last_update
             FROM stock WHERE product_id = ?1",
        )
        .bind(product_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(stock_from_row).transpose()
    }

    /// Products whose physical stock fell below their minimum.
    pub async fn list_below_min(&self) -> DbResult<Vec<Stock>> {
        let rows = sqlx::query(
            "SELECT product_id, category, product_name, general_stock,
                    physical_stock, min_stock, last_update
             FROM stock WHERE physical_stock < min_stock ORDER BY product_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(stock_from_row).collect()
    }

    /// Appends a movement and applies its delta to the stock row, in one
    /// transaction.
    ///
    /// ## Semantics
    /// - The movement row stores the raw signed quantity, always.
    /// - For clamping types (sale, invoice) the resulting level floors at 0.
    /// - A missing stock row is created from the movement (zero baseline),
    ///   so externally ingested products are tracked from first sight.
    pub async fn apply_movement(&self, movement: &StockMovement) -> DbResult<StockApplication> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO stock_movements (
                id, product_id, movement_type, quantity, vendor_id, sale_id,
                reason, created_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(&movement.id)
        .bind(&movement.product_id)
        .bind(movement.movement_type)
        .bind(movement.quantity)
        .bind(&movement.vendor_id)
        .bind(&movement.sale_id)
        .bind(&movement.reason)
        .bind(movement.created_at)
        .execute(&mut *tx)
        .await?;

        let row = sqlx::query("SELECT physical_stock FROM stock WHERE product_id = ?1")
            .bind(&movement.product_id)
            .fetch_optional(&mut *tx)
            .await?;

        let previous: i64 = match row {
            Some(ref r) => r.try_get("physical_stock")?,
            None => {
                sqlx::query(
                    "INSERT INTO stock (
                        product_id, category, product_name, general_stock,
                        physical_stock, min_stock, last_update
                    ) VALUES (?1, NULL, ?2, 0, 0, 0, ?3)",
                )
                .bind(&movement.product_id)
                .bind(&movement.product_id)
                .bind(movement.created_at)
                .execute(&mut *tx)
                .await?;
                0
            }
        };

        let raw = previous + movement.quantity;
        let clamped = movement.movement_type.clamps_at_zero() && raw < 0;
        let new_physical = if clamped { 0 } else { raw };

        sqlx::query("UPDATE stock SET physical_stock = ?2, last_update = ?3 WHERE product_id = ?1")
            .bind(&movement.product_id)
            .bind(new_physical)
            .bind(movement.created_at)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        debug!(
            product = %movement.product_id,
            delta = movement.quantity,
            previous,
            new_physical,
            clamped,
            "Stock movement applied"
        );

        Ok(StockApplication {
            product_id: movement.product_id.clone(),
            previous_physical: previous,
            new_physical,
            clamped,
        })
    }

    /// Movement log for one product, oldest first.
    pub async fn movements_for_product(&self, product_id: &str) -> DbResult<Vec<StockMovement>> {
        let rows = sqlx::query(
            "SELECT id, product_id, movement_type, quantity, vendor_id, sale_id,
                    reason, created_at
             FROM stock_movements WHERE product_id = ?1 ORDER BY created_at, id",
        )
        .bind(product_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(movement_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use chrono::Utc;
    use till_core::MovementType;

    fn movement(id: &str, product: &str, kind: MovementType, qty: i64) -> StockMovement {
        StockMovement {
            id: id.to_string(),
            product_id: product.to_string(),
            movement_type: kind,
            quantity: qty,
            vendor_id: None,
            sale_id: None,
            reason: None,
            created_at: Utc::now(),
        }
    }

    async fn seed(db: &Database, product: &str, physical: i64) {
        db.stock()
            .upsert(&Stock {
                product_id: product.to_string(),
                category: Some("ceramics".into()),
                product_name: "Bowl".into(),
                general_stock: 10,
                physical_stock: physical,
                min_stock: 2,
                last_update: Utc::now(),
            })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sale_movement_clamps_log_does_not() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "p1", 3).await;

        let outcome = db
            .stock()
            .apply_movement(&movement("m1", "p1", MovementType::Sale, -5))
            .await
            .unwrap();

        assert!(outcome.clamped);
        assert_eq!(outcome.previous_physical, 3);
        assert_eq!(outcome.new_physical, 0);

        // Level floored at zero, log keeps the raw -5
        let stock = db.stock().get("p1").await.unwrap().unwrap();
        assert_eq!(stock.physical_stock, 0);
        let log = db.stock().movements_for_product("p1").await.unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].quantity, -5);
    }

    #[tokio::test]
    async fn test_restock_applies_without_clamp() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "p1", 1).await;

        let outcome = db
            .stock()
            .apply_movement(&movement("m1", "p1", MovementType::Restock, 7))
            .await
            .unwrap();
        assert!(!outcome.clamped);
        assert_eq!(outcome.new_physical, 8);
    }

    #[tokio::test]
    async fn test_unknown_product_gets_zero_baseline() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let outcome = db
            .stock()
            .apply_movement(&movement("m1", "new-sku", MovementType::Invoice, -2))
            .await
            .unwrap();
        assert!(outcome.clamped);
        assert_eq!(outcome.new_physical, 0);
        assert!(db.stock().get("new-sku").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_any_sequence_keeps_stock_non_negative() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "p1", 2).await;

        let deltas = [
            (MovementType::Sale, -1),
            (MovementType::Sale, -10),
            (MovementType::Restock, 4),
            (MovementType::Invoice, -3),
            (MovementType::Invoice, -99),
            (MovementType::Adjustment, 1),
        ];
        for (i, (kind, qty)) in deltas.into_iter().enumerate() {
            db.stock()
                .apply_movement(&movement(&format!("m{i}"), "p1", kind, qty))
                .await
                .unwrap();
            let level = db.stock().get("p1").await.unwrap().unwrap().physical_stock;
            assert!(level >= 0, "physical stock went negative: {level}");
        }

        assert_eq!(db.stock().movements_for_product("p1").await.unwrap().len(), 6);
    }

    #[tokio::test]
    async fn test_below_min_listing() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        seed(&db, "p1", 1).await; // min_stock = 2
        seed(&db, "p2", 5).await;

        let low = db.stock().list_below_min().await.unwrap();
        assert_eq!(low.len(), 1);
        assert_eq!(low[0].product_id, "p1");
    }
}
