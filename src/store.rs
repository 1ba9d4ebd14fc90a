//! Access to the persisted visit counter.

use crate::model::NewVisitorCounter;
use crate::model::VisitorCounter;
use crate::pool::DbPool;
use crate::schema::visitors::dsl;
use crate::DbConnection;
use anyhow::Context;
use async_bb8_diesel::AsyncRunQueryDsl;
use async_bb8_diesel::AsyncSimpleConnection;
use async_trait::async_trait;
use chrono::DateTime;
use chrono::Utc;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::QueryFragment;
use diesel::query_dsl::LoadQuery;

/// Value the counter starts from before its first increment.
pub const DEFAULT_SEED: i64 = 50;

#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Adds one visit and returns the counter as stored afterwards,
    /// creating it from the seed if it does not exist yet.
    async fn increment(&self) -> anyhow::Result<VisitorCounter>;
}

pub struct PgCounterStore {
    pool: DbPool,
    seed: i64,
}

impl PgCounterStore {
    pub fn new(pool: DbPool, seed: i64) -> PgCounterStore {
        PgCounterStore { pool, seed }
    }

    /// Creates the counter table if it is missing.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        self.pool
            .batch_execute_async(
                r#"
                CREATE TABLE IF NOT EXISTS visitors (
                    id TEXT PRIMARY KEY,
                    visits INT8 NOT NULL,
                    created_at TIMESTAMPTZ NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL
                );
                "#,
            )
            .await
            .context("creating visitors table")
    }
}

/// One statement that either creates the counter at `seed + 1` or bumps the
/// existing row, so concurrent visits never read-modify-write in the client.
fn increment_query(
    seed: i64,
    now: DateTime<Utc>,
) -> anyhow::Result<
    impl RunQueryDsl<DbConnection>
        + LoadQuery<'static, DbConnection, VisitorCounter>
        + QueryFragment<Pg>
        + Send
        + 'static,
> {
    Ok(diesel::insert_into(dsl::visitors)
        .values(NewVisitorCounter::first_visit(seed, now)?)
        .on_conflict(dsl::id)
        .do_update()
        .set((dsl::visits.eq(dsl::visits + 1), dsl::updated_at.eq(now)))
        .returning(VisitorCounter::as_returning()))
}

#[async_trait]
impl CounterStore for PgCounterStore {
    async fn increment(&self) -> anyhow::Result<VisitorCounter> {
        increment_query(self.seed, Utc::now())?
            .get_result_async(&self.pool)
            .await
            .context("incrementing visit counter")
    }
}


#[cfg(test)]
mod tests {
    use super::testing::MemoryCounterStore;
    use super::*;
    use crate::model::COUNTER_ID;
    use std::sync::Arc;

    fn rendered_increment(seed: i64) -> String {
        let query = increment_query(seed, Utc::now()).unwrap();
        diesel::debug_query::<Pg, _>(&query).to_string()
    }

    #[test]
    fn increment_is_a_single_upsert() {
        let sql = rendered_increment(DEFAULT_SEED);
        assert!(sql.starts_with(r#"INSERT INTO "visitors""#), "{}", sql);
        assert!(
            sql.contains(r#"ON CONFLICT ("id") DO UPDATE SET "visits" = "#),
            "{}",
            sql
        );
        assert!(sql.contains(r#""visitors"."visits" + $"#), "{}", sql);

        let (_, update) = sql.split_once("DO UPDATE SET").unwrap();
        let (set_clause, returning) = update.split_once("RETURNING").unwrap();
        assert!(set_clause.contains(r#""updated_at" = $"#), "{}", sql);
        assert!(!set_clause.contains("created_at"), "{}", sql);
        assert!(returning.contains(r#""visitors"."visits""#), "{}", sql);
        assert!(returning.contains(r#""visitors"."created_at""#), "{}", sql);
    }

    #[test]
    fn increment_inserts_seed_plus_one() {
        let sql = rendered_increment(DEFAULT_SEED);
        let (_, binds) = sql.split_once("-- binds: ").unwrap();
        assert!(binds.starts_with(r#"["global", 51, "#), "{}", sql);
    }

    #[test]
    fn increment_rejects_overflowing_seed() {
        assert!(increment_query(i64::MAX, Utc::now()).is_err());
    }

    #[tokio::test]
    async fn first_increment_starts_from_seed() {
        let store = MemoryCounterStore::new(DEFAULT_SEED);
        assert_eq!(store.visits(), None);

        let counter = store.increment().await.unwrap();
        assert_eq!(counter.id, COUNTER_ID);
        assert_eq!(counter.visits, 51);
        assert_eq!(counter.created_at, counter.updated_at);

        let counter = store.increment().await.unwrap();
        assert_eq!(counter.visits, 52);
        assert_eq!(store.visits(), Some(52));
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let store = Arc::new(MemoryCounterStore::new(DEFAULT_SEED));
        let tasks: Vec<_> = (0..64)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.increment().await })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(store.visits(), Some(DEFAULT_SEED + 64));
    }

    /// Runs against a real database when VISIT_COUNTER_TEST_DATABASE_URL
    /// is set. The counter row in that database is deleted first.
    #[tokio::test]
    async fn concurrent_first_visits_against_postgres() {
        let db_url = match std::env::var("VISIT_COUNTER_TEST_DATABASE_URL") {
            Ok(url) => url,
            Err(_) => return,
        };
        let log = slog::Logger::root(slog::Discard, slog::o!());
        let pool = crate::pool::create_pool(log, &db_url, 8).await.unwrap();
        let store = Arc::new(PgCounterStore::new(pool.clone(), DEFAULT_SEED));
        store.ensure_schema().await.unwrap();
        pool.batch_execute_async("DELETE FROM visitors WHERE id = 'global';")
            .await
            .unwrap();

        let tasks: Vec<_> = (0..32)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.increment().await })
            })
            .collect();
        let mut seen = Vec::new();
        for task in tasks {
            let counter = task.await.unwrap().unwrap();
            assert_eq!(counter.id, COUNTER_ID);
            assert!(counter.created_at <= counter.updated_at);
            seen.push(counter.visits);
        }
        seen.sort_unstable();
        let expected: Vec<i64> =
            (DEFAULT_SEED + 1..=DEFAULT_SEED + 32).collect();
        assert_eq!(seen, expected);
    }
}
