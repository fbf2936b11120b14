//! Sqlite-backed reference implementation of the repository traits. Uses
//! the same `DATABASE_URL`-env, create-if-missing connection pattern as the
//! rest of this crate's storage layer, extended to the full repository
//! surface the core needs.

use async_trait::async_trait;
use chrono::NaiveDate;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool};
use sqlx::Row;
use std::str::FromStr;
use tracing::info;

use crate::domain::{Load, LoadId, Order, OrderLine, RateEntry, RouteCacheEntry};
use crate::error::{FreightplanError, Result};

use super::{LoadRepository, OrderRepository, RouteCacheRepository, SettingsRepository, SkuSpec};

pub struct SqlitePoolRepository {
    pool: SqlitePool,
}

impl SqlitePoolRepository {
    /// Connect, creating the database file if missing, and ensure the
    /// schema this crate reads/writes exists. Migrations beyond this core
    /// surface are out of scope.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)
            .map_err(|e| FreightplanError::Storage(e.to_string()))?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        info!("connected to sqlite database at {database_url}");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS order_lines (
                id TEXT PRIMARY KEY,
                so_num TEXT NOT NULL,
                plant TEXT NOT NULL,
                item TEXT NOT NULL,
                sku TEXT NOT NULL,
                qty INTEGER NOT NULL,
                unit_length_ft REAL NOT NULL,
                max_stack_height INTEGER NOT NULL,
                city TEXT NOT NULL,
                state TEXT NOT NULL,
                zip TEXT NOT NULL,
                due_date TEXT NOT NULL,
                cust_name TEXT NOT NULL,
                category TEXT,
                is_excluded INTEGER NOT NULL DEFAULT 0
            );

            CREATE TABLE IF NOT EXISTS rate_matrix (
                origin_plant TEXT NOT NULL,
                destination_state TEXT NOT NULL,
                effective_year INTEGER NOT NULL,
                rate_per_mile REAL NOT NULL,
                PRIMARY KEY (origin_plant, destination_state, effective_year)
            );

            CREATE TABLE IF NOT EXISTS sku_specs (
                sku TEXT PRIMARY KEY,
                category TEXT,
                length_with_tongue_ft REAL NOT NULL,
                max_stack_step_deck INTEGER NOT NULL,
                max_stack_flat_bed INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS plants (
                code TEXT PRIMARY KEY,
                lat REAL NOT NULL,
                lng REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS zip_coordinates (
                zip TEXT PRIMARY KEY,
                lat REAL NOT NULL,
                lng REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS planning_settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS loads (
                id INTEGER PRIMARY KEY,
                origin_plant TEXT NOT NULL,
                destination_state TEXT NOT NULL,
                trailer_type TEXT NOT NULL,
                status TEXT NOT NULL,
                build_source TEXT NOT NULL,
                load_number TEXT,
                planning_session_id TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS load_lines (
                load_id INTEGER NOT NULL,
                order_line_id TEXT NOT NULL,
                feet REAL NOT NULL
            );

            CREATE TABLE IF NOT EXISTS load_sequences (
                origin_plant TEXT NOT NULL,
                year INTEGER NOT NULL,
                next_seq INTEGER NOT NULL DEFAULT 1,
                PRIMARY KEY (origin_plant, year)
            );

            CREATE TABLE IF NOT EXISTS route_cache (
                key TEXT PRIMARY KEY,
                ordered_signatures TEXT NOT NULL,
                leg_miles TEXT NOT NULL,
                total_miles REAL NOT NULL,
                geometry TEXT,
                provider TEXT NOT NULL,
                profile TEXT NOT NULL,
                ttl_days INTEGER NOT NULL,
                inserted_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            "#,
        )
        .execute(&pool)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl OrderRepository for SqlitePoolRepository {
    async fn list_order_lines_for_optimization(
        &self,
        plant: &str,
        min_due_date: Option<NaiveDate>,
    ) -> Result<Vec<OrderLine>> {
        let rows = sqlx::query(
            "SELECT id, so_num, plant, item, sku, qty, unit_length_ft, max_stack_height, \
             city, state, zip, due_date, cust_name, category, is_excluded \
             FROM order_lines WHERE plant = ?1 AND is_excluded = 0 \
             AND (?2 IS NULL OR due_date >= ?2)",
        )
        .bind(plant)
        .bind(min_due_date.map(|d| d.format("%Y-%m-%d").to_string()))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;

        rows.into_iter()
            .map(|row| {
                let due_date: String = row.try_get("due_date").map_err(|e| FreightplanError::Storage(e.to_string()))?;
                Ok(OrderLine {
                    id: row.try_get("id").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    so_num: row.try_get("so_num").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    plant: row.try_get("plant").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    item: row.try_get("item").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    sku: row.try_get("sku").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    qty: row.try_get::<i64, _>("qty").map_err(|e| FreightplanError::Storage(e.to_string()))? as u32,
                    unit_length_ft: row
                        .try_get("unit_length_ft")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    max_stack_height: row
                        .try_get::<i64, _>("max_stack_height")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))? as u32,
                    city: row.try_get("city").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    state: row.try_get("state").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    zip: row.try_get("zip").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    due_date: NaiveDate::parse_from_str(&due_date, "%Y-%m-%d")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    cust_name: row.try_get("cust_name").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    category: row.try_get("category").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    is_excluded: row
                        .try_get::<i64, _>("is_excluded")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))?
                        != 0,
                })
            })
            .collect()
    }

    async fn list_orders_for_optimization(&self, plant: &str) -> Result<Vec<Order>> {
        let lines = self.list_order_lines_for_optimization(plant, None).await?;
        let mut by_so: std::collections::HashMap<String, Vec<&OrderLine>> = std::collections::HashMap::new();
        for line in &lines {
            by_so.entry(line.so_num.clone()).or_default().push(line);
        }
        let mut orders: Vec<Order> = by_so
            .into_iter()
            .map(|(so_num, group)| {
                let total_length_ft: f64 = group.iter().map(|l| l.total_length_ft()).sum();
                Order {
                    so_num,
                    plant: plant.to_string(),
                    cust_name: group[0].cust_name.clone(),
                    state: group[0].state.clone(),
                    zip: group[0].zip.clone(),
                    due_date: group.iter().map(|l| l.due_date).min().unwrap(),
                    total_length_ft,
                    utilization_pct: 0.0,
                    line_count: group.len(),
                    is_excluded: group.iter().all(|l| l.is_excluded),
                }
            })
            .collect();
        orders.sort_by(|a, b| a.so_num.cmp(&b.so_num));
        Ok(orders)
    }
}

#[async_trait]
impl SettingsRepository for SqlitePoolRepository {
    async fn list_sku_specs(&self) -> Result<Vec<SkuSpec>> {
        let rows = sqlx::query(
            "SELECT sku, category, length_with_tongue_ft, max_stack_step_deck, max_stack_flat_bed FROM sku_specs",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(SkuSpec {
                    sku: row.try_get("sku").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    category: row.try_get("category").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    length_with_tongue_ft: row
                        .try_get("length_with_tongue_ft")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    max_stack_step_deck: row
                        .try_get::<i64, _>("max_stack_step_deck")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))? as u32,
                    max_stack_flat_bed: row
                        .try_get::<i64, _>("max_stack_flat_bed")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))? as u32,
                })
            })
            .collect()
    }

    async fn list_rate_matrix(&self) -> Result<Vec<RateEntry>> {
        let rows = sqlx::query("SELECT origin_plant, destination_state, effective_year, rate_per_mile FROM rate_matrix")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                Ok(RateEntry {
                    origin_plant: row.try_get("origin_plant").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    destination_state: row
                        .try_get("destination_state")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))?,
                    effective_year: row
                        .try_get::<i64, _>("effective_year")
                        .map_err(|e| FreightplanError::Storage(e.to_string()))? as i32,
                    rate_per_mile: row.try_get("rate_per_mile").map_err(|e| FreightplanError::Storage(e.to_string()))?,
                })
            })
            .collect()
    }

    async fn list_plants(&self) -> Result<Vec<(String, (f64, f64))>> {
        let rows = sqlx::query("SELECT code, lat, lng FROM plants")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let code: String = row.try_get("code").map_err(|e| FreightplanError::Storage(e.to_string()))?;
                let lat: f64 = row.try_get("lat").map_err(|e| FreightplanError::Storage(e.to_string()))?;
                let lng: f64 = row.try_get("lng").map_err(|e| FreightplanError::Storage(e.to_string()))?;
                Ok((code, (lat, lng)))
            })
            .collect()
    }

    async fn list_zip_coordinates(&self) -> Result<Vec<(String, (f64, f64))>> {
        let rows = sqlx::query("SELECT zip, lat, lng FROM zip_coordinates")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        rows.into_iter()
            .map(|row| {
                let zip: String = row.try_get("zip").map_err(|e| FreightplanError::Storage(e.to_string()))?;
                let lat: f64 = row.try_get("lat").map_err(|e| FreightplanError::Storage(e.to_string()))?;
                let lng: f64 = row.try_get("lng").map_err(|e| FreightplanError::Storage(e.to_string()))?;
                Ok((zip, (lat, lng)))
            })
            .collect()
    }

    async fn get_planning_setting(&self, key: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT value FROM planning_settings WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        row.map(|r| r.try_get::<String, _>("value").map_err(|e| FreightplanError::Storage(e.to_string())))
            .transpose()
    }
}

#[async_trait]
impl LoadRepository for SqlitePoolRepository {
    async fn create_load(&self, load: &Load) -> Result<()> {
        sqlx::query(
            "INSERT INTO loads (id, origin_plant, destination_state, trailer_type, status, build_source, load_number, planning_session_id) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        )
        .bind(load.id.as_u64() as i64)
        .bind(&load.origin_plant)
        .bind(&load.destination_state)
        .bind(format!("{:?}", load.trailer_type))
        .bind(format!("{:?}", load.status))
        .bind(format!("{:?}", load.build_source))
        .bind(&load.load_number)
        .bind(&load.planning_session_id)
        .execute(&self.pool)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        Ok(())
    }

    async fn create_load_line(&self, load_id: LoadId, order_line_id: &str, feet: f64) -> Result<()> {
        sqlx::query("INSERT INTO load_lines (load_id, order_line_id, feet) VALUES (?1, ?2, ?3)")
            .bind(load_id.as_u64() as i64)
            .bind(order_line_id)
            .bind(feet)
            .execute(&self.pool)
            .await
            .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Delete-then-insert happens inside one transaction; this call performs
    /// only the delete half — the caller wraps the subsequent
    /// `create_load`/`create_load_line` calls in the same transaction via a
    /// connection borrowed from this pool.
    async fn clear_draft_loads(&self, plant: &str, session_id: &str) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(|e| FreightplanError::Storage(e.to_string()))?;
        sqlx::query(
            "DELETE FROM load_lines WHERE load_id IN (SELECT id FROM loads WHERE origin_plant = ?1 \
             AND planning_session_id = ?2 AND status IN ('Proposed', 'Draft'))",
        )
        .bind(plant)
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        sqlx::query(
            "DELETE FROM loads WHERE origin_plant = ?1 AND planning_session_id = ?2 AND status IN ('Proposed', 'Draft')",
        )
        .bind(plant)
        .bind(session_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        tx.commit().await.map_err(|e| FreightplanError::Storage(e.to_string()))?;
        Ok(())
    }

    /// Monotonic per `(plant, year)`: upsert-and-increment inside one
    /// transaction so concurrent callers never observe the same sequence.
    async fn next_load_sequence(&self, plant: &str, year: i32) -> Result<u32> {
        let mut tx = self.pool.begin().await.map_err(|e| FreightplanError::Storage(e.to_string()))?;
        sqlx::query(
            "INSERT INTO load_sequences (origin_plant, year, next_seq) VALUES (?1, ?2, 2) \
             ON CONFLICT(origin_plant, year) DO UPDATE SET next_seq = next_seq + 1",
        )
        .bind(plant)
        .bind(year)
        .execute(&mut *tx)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        let row = sqlx::query("SELECT next_seq FROM load_sequences WHERE origin_plant = ?1 AND year = ?2")
            .bind(plant)
            .bind(year)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        let next_seq: i64 = row.try_get("next_seq").map_err(|e| FreightplanError::Storage(e.to_string()))?;
        tx.commit().await.map_err(|e| FreightplanError::Storage(e.to_string()))?;
        Ok((next_seq - 1) as u32)
    }
}

#[async_trait]
impl RouteCacheRepository for SqlitePoolRepository {
    async fn get_route_cache(&self, key: &str) -> Result<Option<RouteCacheEntry>> {
        let row = sqlx::query(
            "SELECT key, ordered_signatures, leg_miles, total_miles, geometry, provider, profile, ttl_days \
             FROM route_cache WHERE key = ?1 \
             AND julianday('now') - julianday(inserted_at) <= ttl_days",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;

        let Some(row) = row else { return Ok(None) };
        let ordered_signatures: String = row.try_get("ordered_signatures").map_err(|e| FreightplanError::Storage(e.to_string()))?;
        let leg_miles: String = row.try_get("leg_miles").map_err(|e| FreightplanError::Storage(e.to_string()))?;
        Ok(Some(RouteCacheEntry {
            key: row.try_get("key").map_err(|e| FreightplanError::Storage(e.to_string()))?,
            ordered_signatures: ordered_signatures.split(';').map(String::from).filter(|s| !s.is_empty()).collect(),
            leg_miles: leg_miles
                .split(',')
                .filter(|s| !s.is_empty())
                .filter_map(|s| s.parse().ok())
                .collect(),
            total_miles: row.try_get("total_miles").map_err(|e| FreightplanError::Storage(e.to_string()))?,
            geometry: row.try_get("geometry").map_err(|e| FreightplanError::Storage(e.to_string()))?,
            provider: row.try_get("provider").map_err(|e| FreightplanError::Storage(e.to_string()))?,
            profile: row.try_get("profile").map_err(|e| FreightplanError::Storage(e.to_string()))?,
            ttl_days: row.try_get::<i64, _>("ttl_days").map_err(|e| FreightplanError::Storage(e.to_string()))? as u32,
        }))
    }

    async fn upsert_route_cache(&self, entry: &RouteCacheEntry) -> Result<()> {
        sqlx::query(
            "INSERT INTO route_cache (key, ordered_signatures, leg_miles, total_miles, geometry, provider, profile, ttl_days, inserted_at) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, datetime('now')) \
             ON CONFLICT(key) DO UPDATE SET ordered_signatures = excluded.ordered_signatures, \
             leg_miles = excluded.leg_miles, total_miles = excluded.total_miles, geometry = excluded.geometry, \
             provider = excluded.provider, profile = excluded.profile, ttl_days = excluded.ttl_days, \
             inserted_at = excluded.inserted_at",
        )
        .bind(&entry.key)
        .bind(entry.ordered_signatures.join(";"))
        .bind(entry.leg_miles.iter().map(|m| m.to_string()).collect::<Vec<_>>().join(","))
        .bind(entry.total_miles)
        .bind(&entry.geometry)
        .bind(&entry.provider)
        .bind(&entry.profile)
        .bind(entry.ttl_days as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| FreightplanError::Storage(e.to_string()))?;
        Ok(())
    }
}
