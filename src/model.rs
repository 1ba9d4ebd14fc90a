use anyhow::anyhow;
use chrono::DateTime;
use chrono::Utc;
use diesel::prelude::*;
use serde::Serialize;

/// Identifier of the one counter row this service maintains.
pub const COUNTER_ID: &str = "global";

#[derive(Clone, Debug, PartialEq, Queryable, Selectable, Serialize)]
#[diesel(table_name = crate::schema::visitors)]
#[serde(rename_all = "camelCase")]
pub struct VisitorCounter {
    pub id: String,
    pub visits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row written when the counter does not exist yet.
#[derive(Insertable)]
#[diesel(table_name = crate::schema::visitors)]
pub struct NewVisitorCounter {
    pub id: String,
    pub visits: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl NewVisitorCounter {
    /// The first increment lands on top of the seed.
    pub fn first_visit(
        seed: i64,
        now: DateTime<Utc>,
    ) -> anyhow::Result<NewVisitorCounter> {
        let visits = seed
            .checked_add(1)
            .ok_or_else(|| anyhow!("visit seed {} is too large", seed))?;
        Ok(NewVisitorCounter {
            id: COUNTER_ID.to_string(),
            visits,
            created_at: now,
            updated_at: now,
        })
    }
}
