//! Repository abstractions the core consumes. Concrete backends (sqlite
//! here) implement these traits; the optimizer and routing service never
//! talk to a database directly. Web plumbing, CSV import, and schema
//! migrations that populate these tables are out of scope — only the core
//! read/write operations the optimizer needs are modeled.

pub mod sqlite;

use async_trait::async_trait;

use crate::domain::{Order, OrderLine, RateEntry, RouteCacheEntry};
use crate::error::Result;

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn list_order_lines_for_optimization(
        &self,
        plant: &str,
        min_due_date: Option<chrono::NaiveDate>,
    ) -> Result<Vec<OrderLine>>;

    async fn list_orders_for_optimization(&self, plant: &str) -> Result<Vec<Order>>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SkuSpec {
    pub sku: String,
    pub category: Option<String>,
    pub length_with_tongue_ft: f64,
    pub max_stack_step_deck: u32,
    pub max_stack_flat_bed: u32,
}

#[async_trait]
pub trait SettingsRepository: Send + Sync {
    async fn list_sku_specs(&self) -> Result<Vec<SkuSpec>>;
    async fn list_rate_matrix(&self) -> Result<Vec<RateEntry>>;
    async fn list_plants(&self) -> Result<Vec<(String, (f64, f64))>>;
    async fn list_zip_coordinates(&self) -> Result<Vec<(String, (f64, f64))>>;
    async fn get_planning_setting(&self, key: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait LoadRepository: Send + Sync {
    async fn create_load(&self, load: &crate::domain::Load) -> Result<()>;
    async fn create_load_line(&self, load_id: crate::domain::LoadId, order_line_id: &str, feet: f64) -> Result<()>;
    async fn clear_draft_loads(&self, plant: &str, session_id: &str) -> Result<()>;
    /// Next monotonic sequence for `{PLANT}{YY}-{SEQ:04d}`, per `(plant, year)`.
    async fn next_load_sequence(&self, plant: &str, year: i32) -> Result<u32>;
}

#[async_trait]
pub trait RouteCacheRepository: Send + Sync {
    async fn get_route_cache(&self, key: &str) -> Result<Option<RouteCacheEntry>>;
    async fn upsert_route_cache(&self, entry: &RouteCacheEntry) -> Result<()>;
}
