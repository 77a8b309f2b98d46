use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use scylla::client::session::Session;
use scylla::response::query_result::QueryResult;
use scylla::response::{PagingState, PagingStateResponse};
use scylla::statement::batch::Batch;
use scylla::statement::unprepared::Statement;
use scylla::statement::Consistency;
use scylla::value::{CqlValue, Row};
use std::sync::Arc;

use crate::event_sourcing::core::{attr, AttributeValue, BackendError, Item};
use crate::event_sourcing::store::backend::{
    ConditionalPut, Continuation, PutCondition, QueryPage, RangeQuery, RecordKey, ScanDirection,
    StorageBackend,
};
use crate::utils::{retry_on_transient, IsTransient, RetryConfig, RetryResult};

// ============================================================================
// ScyllaDB Backend
// ============================================================================
//
// One table holds both events and the global counter record:
//
//   PRIMARY KEY ((aggregate_id), version)
//
// - Conditional batch: every event of a save lives in the same partition,
//   so the `IF NOT EXISTS` inserts form a single-partition LWT batch that is
//   applied entirely or not at all.
// - Atomic increment: compare-and-set loop on the counter row
//   (`GlobalVersionCounter`, 0), retried with backoff under contention.
// - Range query: clustering order on `version`, paged with the driver's
//   paging state as the continuation token.
//
// ============================================================================

/// Column name for each record attribute, in SELECT order.
const COLUMNS: [(&str, &str); 8] = [
    ("aggregate_id", attr::AGGREGATE_ID),
    ("version", attr::VERSION),
    ("aggregate_type", attr::AGGREGATE_TYPE),
    ("global_version", attr::GLOBAL_VERSION),
    ("data", attr::DATA),
    ("reason", attr::REASON),
    ("occurred_at", attr::TIMESTAMP),
    ("metadata", attr::METADATA),
];

pub struct ScyllaBackend {
    session: Arc<Session>,
    table: String,
    cas_retry: RetryConfig,
}

impl ScyllaBackend {
    pub fn new(session: Arc<Session>, table: impl Into<String>) -> Self {
        Self {
            session,
            table: table.into(),
            cas_retry: RetryConfig::default(),
        }
    }

    pub fn with_cas_retry(mut self, cas_retry: RetryConfig) -> Self {
        self.cas_retry = cas_retry;
        self
    }

    /// Create the event table in the session's current keyspace.
    pub async fn create_schema(&self) -> anyhow::Result<()> {
        self.session
            .query_unpaged(
                format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        aggregate_id text,
                        version bigint,
                        aggregate_type text,
                        global_version bigint,
                        data blob,
                        reason text,
                        occurred_at text,
                        metadata blob,
                        PRIMARY KEY ((aggregate_id), version)
                    ) WITH CLUSTERING ORDER BY (version ASC)",
                    self.table
                ),
                &[],
            )
            .await
            .with_context(|| format!("creating table {}", self.table))?;

        tracing::info!(table = %self.table, "Event table ready");
        Ok(())
    }

    async fn read_counter(&self, key: &RecordKey, column: &str) -> anyhow::Result<CounterRow> {
        let mut statement = Statement::new(format!(
            "SELECT {column} FROM {} WHERE aggregate_id = ? AND version = ?",
            self.table
        ));
        statement.set_consistency(Consistency::Serial);

        let result = self
            .session
            .query_unpaged(statement, (key.aggregate_id.as_str(), to_bigint(key.version)?))
            .await?;
        let rows = result.into_rows_result()?;

        Ok(match rows.maybe_first_row::<(Option<i64>,)>()? {
            None => CounterRow::Absent,
            Some((value,)) => CounterRow::Present(value),
        })
    }

    async fn increment_once(&self, key: &RecordKey, column: &str) -> Result<i64, CasError> {
        let current = self.read_counter(key, column).await.map_err(CasError::Fault)?;
        let version = to_bigint(key.version).map_err(CasError::Fault)?;

        let next = match current {
            CounterRow::Absent => 1,
            CounterRow::Present(value) => value
                .unwrap_or(0)
                .checked_add(1)
                .ok_or_else(|| CasError::Fault(anyhow!("counter {column} overflowed")))?,
        };

        let result = match current {
            CounterRow::Absent => {
                self.session
                    .query_unpaged(
                        format!(
                            "INSERT INTO {} (aggregate_id, version, {column}) VALUES (?, ?, ?) IF NOT EXISTS",
                            self.table
                        ),
                        (key.aggregate_id.as_str(), version, next),
                    )
                    .await
            }
            CounterRow::Present(value) => {
                self.session
                    .query_unpaged(
                        format!(
                            "UPDATE {} SET {column} = ? WHERE aggregate_id = ? AND version = ? IF {column} = ?",
                            self.table
                        ),
                        (next, key.aggregate_id.as_str(), version, value),
                    )
                    .await
            }
        }
        .map_err(|e| CasError::Fault(e.into()))?;

        if was_applied(result).map_err(CasError::Fault)? {
            Ok(next)
        } else {
            Err(CasError::Contention)
        }
    }

    async fn commit(&self, puts: &[ConditionalPut]) -> anyhow::Result<bool> {
        let column_list = COLUMNS.map(|(column, _)| column).join(", ");
        let placeholders = vec!["?"; COLUMNS.len()].join(", ");
        let insert = format!(
            "INSERT INTO {} ({column_list}) VALUES ({placeholders}) IF NOT EXISTS",
            self.table
        );

        let mut batch = Batch::default();
        let mut values = Vec::with_capacity(puts.len());
        for put in puts {
            match put.condition {
                PutCondition::NotExists => batch.append_statement(insert.as_str()),
            }
            values.push(row_values(&put.key, &put.item)?);
        }

        let result = self.session.batch(&batch, values).await?;
        was_applied(result)
    }

    async fn fetch_page(&self, query: &RangeQuery) -> anyhow::Result<QueryPage> {
        let column_list = COLUMNS.map(|(column, _)| column).join(", ");
        let mut cql = format!(
            "SELECT {column_list} FROM {} WHERE aggregate_id = ?",
            self.table
        );
        let mut values = vec![CqlValue::Text(query.aggregate_id.clone())];

        if let Some(after) = query.after_version {
            cql.push_str(" AND version > ?");
            values.push(CqlValue::BigInt(to_bigint(after)?));
        }
        cql.push_str(match query.direction {
            ScanDirection::Forward => " ORDER BY version ASC",
            ScanDirection::Backward => " ORDER BY version DESC",
        });
        if let Some(limit) = query.limit {
            cql.push_str(&format!(" LIMIT {limit}"));
        }

        let mut statement = Statement::new(cql);
        if let Some(page_size) = query.page_size {
            statement.set_page_size(i32::try_from(page_size.max(1)).unwrap_or(i32::MAX));
        }

        let paging_state = match &query.continuation {
            Some(token) => PagingState::new_from_raw_bytes(token.0.clone()),
            None => PagingState::start(),
        };

        let (result, paging) = self
            .session
            .query_single_page(statement, values, paging_state)
            .await?;
        let rows = result.into_rows_result()?;

        let mut items = Vec::new();
        for row in rows.rows::<Row>()? {
            items.push(row_to_item(row?)?);
        }

        let continuation = match paging {
            PagingStateResponse::HasMorePages { state } => state
                .as_bytes_slice()
                .map(|bytes| Continuation(bytes.to_vec())),
            PagingStateResponse::NoMorePages => None,
        };

        tracing::debug!(
            aggregate_id = %query.aggregate_id,
            record_count = items.len(),
            has_more = continuation.is_some(),
            "Fetched page"
        );

        Ok(QueryPage {
            items,
            continuation,
        })
    }
}

#[async_trait]
impl StorageBackend for ScyllaBackend {
    async fn increment(&self, key: &RecordKey, attribute: &str) -> Result<Item, BackendError> {
        let column = column_for(attribute)?;

        let next = match retry_on_transient(&self.cas_retry, "counter_cas", |_| {
            self.increment_once(key, column)
        })
        .await
        {
            RetryResult::Success(next) => next,
            RetryResult::Exhausted(_) => {
                return Err(anyhow!(
                    "counter {attribute} still contended after {} attempts",
                    self.cas_retry.max_attempts
                )
                .into())
            }
            RetryResult::PermanentFailure(CasError::Fault(error)) => return Err(error.into()),
            RetryResult::PermanentFailure(CasError::Contention) => {
                return Err(anyhow!("counter {attribute} contended").into())
            }
        };

        let mut item = Item::new();
        item.insert(attribute.to_string(), AttributeValue::Number(next));
        Ok(item)
    }

    async fn transact_write(&self, puts: Vec<ConditionalPut>) -> Result<(), BackendError> {
        if puts.is_empty() {
            return Ok(());
        }
        if self.commit(&puts).await? {
            Ok(())
        } else {
            Err(BackendError::ConditionFailed)
        }
    }

    async fn query(&self, query: &RangeQuery) -> Result<QueryPage, BackendError> {
        Ok(self.fetch_page(query).await?)
    }
}

#[derive(Debug, Clone, Copy)]
enum CounterRow {
    Absent,
    Present(Option<i64>),
}

#[derive(Debug)]
enum CasError {
    Contention,
    Fault(anyhow::Error),
}

impl std::fmt::Display for CasError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CasError::Contention => write!(f, "compare-and-set lost to a concurrent writer"),
            CasError::Fault(e) => write!(f, "{e:#}"),
        }
    }
}

impl IsTransient for CasError {
    fn is_transient(&self) -> bool {
        matches!(self, CasError::Contention)
    }
}

fn column_for(attribute: &str) -> anyhow::Result<&'static str> {
    COLUMNS
        .iter()
        .find(|(_, name)| *name == attribute)
        .map(|(column, _)| *column)
        .ok_or_else(|| anyhow!("no column mapped for attribute {attribute}"))
}

fn to_bigint(version: u64) -> anyhow::Result<i64> {
    i64::try_from(version).with_context(|| format!("version {version} exceeds bigint range"))
}

fn to_cql(value: &AttributeValue) -> CqlValue {
    match value {
        AttributeValue::Text(s) => CqlValue::Text(s.clone()),
        AttributeValue::Number(n) => CqlValue::BigInt(*n),
        AttributeValue::Binary(b) => CqlValue::Blob(b.clone()),
    }
}

fn from_cql(column: &str, value: CqlValue) -> anyhow::Result<AttributeValue> {
    Ok(match value {
        CqlValue::Text(s) | CqlValue::Ascii(s) => AttributeValue::Text(s),
        CqlValue::BigInt(n) => AttributeValue::Number(n),
        CqlValue::Int(n) => AttributeValue::Number(i64::from(n)),
        CqlValue::Blob(b) => AttributeValue::Binary(b),
        other => bail!("column {column} holds unsupported value {other:?}"),
    })
}

/// Bound values for the INSERT, keyed columns taken from `key`.
fn row_values(key: &RecordKey, item: &Item) -> anyhow::Result<Vec<Option<CqlValue>>> {
    let mut values = Vec::with_capacity(COLUMNS.len());
    values.push(Some(CqlValue::Text(key.aggregate_id.clone())));
    values.push(Some(CqlValue::BigInt(to_bigint(key.version)?)));
    values.extend(COLUMNS[2..].iter().map(|(_, name)| item.get(*name).map(to_cql)));
    Ok(values)
}

/// Null columns are left out of the item.
fn row_to_item(row: Row) -> anyhow::Result<Item> {
    let mut item = Item::new();
    for ((column, name), value) in COLUMNS.iter().zip(row.columns) {
        if let Some(value) = value {
            item.insert(name.to_string(), from_cql(column, value)?);
        }
    }
    Ok(item)
}

/// Read the `[applied]` flag of a lightweight transaction result.
fn was_applied(result: QueryResult) -> anyhow::Result<bool> {
    let rows = result.into_rows_result()?;
    let first = rows
        .maybe_first_row::<Row>()?
        .and_then(|row| row.columns.into_iter().next().flatten());

    match first {
        Some(CqlValue::Boolean(applied)) => Ok(applied),
        other => bail!("lightweight transaction returned no [applied] flag: {other:?}"),
    }
}
