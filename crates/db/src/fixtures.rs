use sqlx::Executor;

use crate::connection::DbPool;

/// Tables created by the automotive seed, in insert order.
const SEED_TABLES: &[&str] = &[
    "vehicles",
    "dealerships",
    "customers",
    "sales_transactions",
    "marketing_campaigns",
    "competitor_sales",
];

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SeedResult {
    pub tables: Vec<TableCount>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableCount {
    pub table: &'static str,
    pub rows: i64,
}

/// Deterministic automotive dataset used by the CLI `seed` command and
/// the integration tests.
pub struct AutomotiveSeedDataset;

impl AutomotiveSeedDataset {
    pub const SQL: &str = include_str!("../../../config/fixtures/automotive_seed.sql");

    /// Creates the six automotive tables and loads the fixture rows,
    /// replacing any prior seed content.
    pub async fn load(pool: &DbPool) -> Result<SeedResult, sqlx::Error> {
        let mut tx = pool.begin().await?;
        tx.execute(Self::SQL).await?;
        tx.commit().await?;

        Self::counts(pool).await
    }

    /// Per-table row counts, used by `seed` output and `doctor` checks.
    pub async fn counts(pool: &DbPool) -> Result<SeedResult, sqlx::Error> {
        let mut tables = Vec::with_capacity(SEED_TABLES.len());
        for table in SEED_TABLES {
            let (rows,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(pool)
                .await?;
            tables.push(TableCount { table, rows });
        }
        Ok(SeedResult { tables })
    }
}
