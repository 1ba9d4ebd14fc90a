use crate::DbConnection;
use anyhow::Context;
use slog::error;

pub type DbPool = bb8::Pool<async_bb8_diesel::ConnectionManager<DbConnection>>;

/// Builds the pool and waits for its first connection, so an unreachable
/// database fails startup instead of the first request.
pub async fn create_pool(
    log: slog::Logger,
    db_url: &str,
    max_size: u32,
) -> anyhow::Result<DbPool> {
    let error_sink = LoggingErrorSink::new(log.clone());
    let manager = async_bb8_diesel::ConnectionManager::new(db_url);
    let pool = bb8::Builder::new()
        .error_sink(Box::new(error_sink))
        .max_size(max_size)
        .build(manager)
        .await
        .context("building pool")?;
    drop(pool.get().await.context("connecting to database")?);
    Ok(pool)
}

/// Sends connection errors that happen outside of a request to the log.
#[derive(Clone, Debug)]
struct LoggingErrorSink {
    log: slog::Logger,
}

impl LoggingErrorSink {
    fn new(log: slog::Logger) -> LoggingErrorSink {
        LoggingErrorSink { log }
    }
}

impl bb8::ErrorSink<async_bb8_diesel::ConnectionError> for LoggingErrorSink {
    fn sink(&self, error: async_bb8_diesel::ConnectionError) {
        error!(
            &self.log,
            "visitor store connection error";
            "error_message" => #%error
        );
    }

    fn boxed_clone(
        &self,
    ) -> Box<dyn bb8::ErrorSink<async_bb8_diesel::ConnectionError>> {
        Box::new(self.clone())
    }
}
