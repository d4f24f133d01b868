//! PostgreSQL storage backend.
//!
//! Writes go through plpgsql functions that lock the stream row, apply the
//! admission rules and notify `new_messages`. Reads are plain selects built
//! with sea-query and bound through sea-query-binder.

pub mod schema;

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sea_query::{Alias, Expr, Order, PostgresQueryBuilder, Query, SelectStatement};
use sea_query_binder::SqlxBinder;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};
use tracing::{debug, info};
use uuid::Uuid;

use self::schema::{
    quote_schema, Message, Stream, DUPLICATE_MESSAGE_STATE, SETUP_SQL, TEARDOWN_SQL,
    UNIQUE_VIOLATION_STATE, WRONG_EXPECTED_VERSION_STATE,
};
use super::{
    AppendOutcome, EncodedMessage, ListedStream, RetentionPolicy, StorageBackend, StoredMessage,
    StreamInfo, StreamPage,
};
use crate::config::PostgresConfig;
use crate::error::{Result, StoreError};
use crate::message::{ExpectedVersion, Position, ReadDirection, StreamVersion};
use crate::notifier::{Notifier, PgNotifier};
use crate::utils::bootstrap::connect_with_retry;
use crate::utils::ids::metadata_stream_id;

/// PostgreSQL implementation of [`StorageBackend`].
pub struct PostgresBackend {
    pool: PgPool,
    schema: String,
}

impl PostgresBackend {
    /// Wrap an existing pool whose connections already use `schema`.
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Build a pool from configuration, retrying until the server answers.
    pub async fn connect(config: &PostgresConfig) -> Result<Self> {
        if quote_schema(&config.schema).is_none() {
            return Err(StoreError::InvalidParameter(format!(
                "invalid schema name: {}",
                config.schema
            )));
        }

        let options = PgConnectOptions::from_str(&config.uri)?
            .options([("search_path", config.schema.as_str())]);
        let pool_options = PgPoolOptions::new()
            .min_connections(config.min_connections)
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_millis(config.connect_timeout_ms));

        let pool = connect_with_retry("postgres", config.connect_retries, || {
            pool_options.clone().connect_with(options.clone())
        })
        .await?;

        Ok(Self::new(pool, config.schema.clone()))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Install the schema, tables and functions. Idempotent.
    pub async fn init(&self) -> Result<()> {
        let schema = self.quoted_schema()?;
        sqlx::raw_sql(&format!("CREATE SCHEMA IF NOT EXISTS {};", schema))
            .execute(&self.pool)
            .await?;
        sqlx::raw_sql(SETUP_SQL).execute(&self.pool).await?;

        info!(schema = %self.schema, "Stream store schema initialized (PostgreSQL)");
        Ok(())
    }

    /// True once `init` has run against this schema.
    pub async fn is_schema_ready(&self) -> Result<bool> {
        let row = sqlx::query(
            "SELECT to_regclass('message') IS NOT NULL \
             AND to_regproc('append_to_stream') IS NOT NULL AS ready",
        )
        .fetch_one(&self.pool)
        .await?;
        Ok(row.try_get("ready")?)
    }

    /// Drop every object `init` created.
    pub async fn drop_schema(&self) -> Result<()> {
        sqlx::raw_sql(TEARDOWN_SQL).execute(&self.pool).await?;
        info!(schema = %self.schema, "Stream store schema dropped (PostgreSQL)");
        Ok(())
    }

    fn quoted_schema(&self) -> Result<String> {
        quote_schema(&self.schema)
            .ok_or_else(|| StoreError::InvalidParameter(format!("invalid schema name: {}", self.schema)))
    }

    fn message_columns(query: &mut SelectStatement) -> &mut SelectStatement {
        query
            .column((Message::Table, Message::MessageId))
            .column((Message::Table, Message::StreamVersion))
            .column((Message::Table, Message::Position))
            .column((Message::Table, Message::CreatedAt))
            .column((Message::Table, Message::Type))
            .expr_as(Expr::cust("message.data::text"), Alias::new("data"))
            .expr_as(Expr::cust("message.meta::text"), Alias::new("meta"))
    }
}

fn map_write_error(err: sqlx::Error, stream_id: &str, expected: ExpectedVersion) -> StoreError {
    if let sqlx::Error::Database(db) = &err {
        match db.code().as_deref() {
            Some(WRONG_EXPECTED_VERSION_STATE) | Some(UNIQUE_VIOLATION_STATE) => {
                return StoreError::wrong_expected_version(stream_id, expected.as_i64());
            }
            Some(DUPLICATE_MESSAGE_STATE) => {
                if let Ok(message_id) = Uuid::parse_str(db.message()) {
                    return StoreError::DuplicateMessage {
                        stream_id: stream_id.to_string(),
                        message_id,
                    };
                }
            }
            _ => {}
        }
    }
    StoreError::Database(err)
}

fn stored_message(row: &PgRow, stream_id: String) -> Result<StoredMessage> {
    Ok(StoredMessage {
        stream_id,
        message_id: row.try_get("message_id")?,
        message_type: row.try_get("type")?,
        stream_version: row.try_get("stream_version")?,
        position: row.try_get("position")?,
        created_at: row.try_get("created_at")?,
        data: row.try_get("data")?,
        meta: row.try_get("meta")?,
    })
}

fn retention(row: &PgRow, prefix: &str) -> Result<RetentionPolicy> {
    Ok(RetentionPolicy {
        max_age: row.try_get(format!("{}max_age", prefix).as_str())?,
        max_count: row.try_get(format!("{}max_count", prefix).as_str())?,
        truncate_before: row.try_get(format!("{}truncate_before", prefix).as_str())?,
    })
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    fn name(&self) -> &'static str {
        "postgres"
    }

    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        messages: Vec<EncodedMessage>,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome> {
        let mut ids = Vec::with_capacity(messages.len());
        let mut types = Vec::with_capacity(messages.len());
        let mut data = Vec::with_capacity(messages.len());
        let mut meta = Vec::with_capacity(messages.len());
        for message in messages {
            ids.push(message.message_id);
            types.push(message.message_type);
            data.push(message.data);
            meta.push(message.meta);
        }

        let row = sqlx::query("SELECT * FROM append_to_stream($1, $2, $3, $4, $5, $6, $7)")
            .bind(stream_id)
            .bind(expected.as_i64())
            .bind(created_at)
            .bind(ids)
            .bind(types)
            .bind(data)
            .bind(meta)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, stream_id, expected))?;

        Ok(AppendOutcome {
            stream_version: row.try_get("current_version")?,
            stream_position: row.try_get("current_position")?,
            retention: retention(&row, "current_")?,
        })
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: StreamVersion,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Option<StreamPage>> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ READ ONLY")
            .execute(&mut *tx)
            .await?;

        let (sql, values) = Query::select()
            .columns([
                Stream::IdInternal,
                Stream::Version,
                Stream::Position,
                Stream::MaxAge,
                Stream::MaxCount,
                Stream::TruncateBefore,
            ])
            .from(Stream::Table)
            .and_where(Expr::col(Stream::Id).eq(stream_id))
            .build_sqlx(PostgresQueryBuilder);
        let Some(row) = sqlx::query_with(&sql, values).fetch_optional(&mut *tx).await? else {
            return Ok(None);
        };
        let internal_id: i64 = row.try_get("id_internal")?;
        let info = StreamInfo {
            stream_id: stream_id.to_string(),
            stream_version: row.try_get("version")?,
            stream_position: row.try_get("position")?,
            retention: retention(&row, "")?,
        };

        let mut query = Query::select();
        Self::message_columns(&mut query)
            .from(Message::Table)
            .and_where(Expr::col((Message::Table, Message::StreamIdInternal)).eq(internal_id))
            .limit(limit as u64);
        match direction {
            ReadDirection::Forward => query
                .and_where(Expr::col((Message::Table, Message::StreamVersion)).gte(from_version))
                .order_by((Message::Table, Message::StreamVersion), Order::Asc),
            ReadDirection::Backward => query
                .and_where(Expr::col((Message::Table, Message::StreamVersion)).lte(from_version))
                .order_by((Message::Table, Message::StreamVersion), Order::Desc),
        };
        let (sql, values) = query.build_sqlx(PostgresQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&mut *tx).await?;
        tx.commit().await?;

        let messages = rows
            .iter()
            .map(|row| stored_message(row, stream_id.to_string()))
            .collect::<Result<Vec<_>>>()?;
        Ok(Some(StreamPage { info, messages }))
    }

    async fn read_all(
        &self,
        from_position: Position,
        limit: usize,
        direction: ReadDirection,
    ) -> Result<Vec<StoredMessage>> {
        let mut query = Query::select();
        Self::message_columns(&mut query)
            .expr_as(Expr::col((Stream::Table, Stream::Id)), Alias::new("stream_id"))
            .from(Message::Table)
            .inner_join(
                Stream::Table,
                Expr::col((Stream::Table, Stream::IdInternal))
                    .equals((Message::Table, Message::StreamIdInternal)),
            )
            .limit(limit as u64);
        match direction {
            ReadDirection::Forward => query
                .and_where(Expr::col((Message::Table, Message::Position)).gte(from_position))
                .order_by((Message::Table, Message::Position), Order::Asc),
            ReadDirection::Backward => query
                .and_where(Expr::col((Message::Table, Message::Position)).lte(from_position))
                .order_by((Message::Table, Message::Position), Order::Desc),
        };

        let (sql, values) = query.build_sqlx(PostgresQueryBuilder);
        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| stored_message(row, row.try_get("stream_id")?))
            .collect()
    }

    async fn read_head_position(&self) -> Result<Position> {
        let row = sqlx::query("SELECT coalesce(max(position), -1) AS head FROM message")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.try_get("head")?)
    }

    async fn list_streams(&self, max_count: usize, after_internal_id: i64) -> Result<Vec<ListedStream>> {
        let (sql, values) = Query::select()
            .columns([Stream::Id, Stream::IdInternal])
            .from(Stream::Table)
            .and_where(Expr::col(Stream::IdInternal).gt(after_internal_id))
            .order_by(Stream::IdInternal, Order::Asc)
            .limit(max_count as u64)
            .build_sqlx(PostgresQueryBuilder);

        let rows = sqlx::query_with(&sql, values).fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| -> Result<ListedStream> {
                Ok(ListedStream {
                    stream_id: row.try_get("id")?,
                    internal_id: row.try_get("id_internal")?,
                })
            })
            .collect()
    }

    async fn set_stream_metadata(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        message: EncodedMessage,
        retention: RetentionPolicy,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<AppendOutcome> {
        let row = sqlx::query(
            "SELECT * FROM set_stream_metadata($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(stream_id)
        .bind(expected.as_i64())
        .bind(created_at)
        .bind(message.message_id)
        .bind(message.message_type)
        .bind(message.data)
        .bind(message.meta)
        .bind(retention.max_age)
        .bind(retention.max_count)
        .bind(retention.truncate_before)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| map_write_error(e, &metadata_stream_id(stream_id), expected))?;

        Ok(AppendOutcome {
            stream_version: row.try_get("current_version")?,
            stream_position: row.try_get("current_position")?,
            retention,
        })
    }

    async fn delete_messages(&self, stream_id: &str, message_ids: &[Uuid]) -> Result<()> {
        let result = sqlx::query(
            "DELETE FROM message USING stream \
             WHERE message.stream_id_internal = stream.id_internal \
             AND stream.id = $1 AND message.message_id = ANY($2)",
        )
        .bind(stream_id)
        .bind(message_ids)
        .execute(&self.pool)
        .await?;

        debug!(stream_id, deleted = result.rows_affected(), "Deleted messages");
        Ok(())
    }

    async fn delete_stream(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        tombstone: EncodedMessage,
        created_at: Option<DateTime<Utc>>,
    ) -> Result<bool> {
        let row = sqlx::query("SELECT delete_stream($1, $2, $3, $4, $5, $6) AS deleted")
            .bind(stream_id)
            .bind(expected.as_i64())
            .bind(created_at)
            .bind(tombstone.message_id)
            .bind(tombstone.message_type)
            .bind(tombstone.data)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| map_write_error(e, stream_id, expected))?;
        Ok(row.try_get("deleted")?)
    }

    async fn scavengable_message_ids(
        &self,
        stream_id: &str,
        retention: &RetentionPolicy,
        now: Option<DateTime<Utc>>,
    ) -> Result<Vec<Uuid>> {
        let rows = sqlx::query("SELECT message_id FROM scavengable_message_ids($1, $2, $3, $4, $5)")
            .bind(stream_id)
            .bind(retention.max_age)
            .bind(retention.max_count)
            .bind(retention.truncate_before)
            .bind(now)
            .fetch_all(&self.pool)
            .await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("message_id").map_err(StoreError::from))
            .collect()
    }

    fn create_push_notifier(&self, keep_alive: Option<Duration>) -> Arc<dyn Notifier> {
        Arc::new(PgNotifier::new(self.pool.clone(), keep_alive))
    }

    fn has_transient_position_gaps(&self) -> bool {
        true
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}
