use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;

use crate::event_sourcing::core::{
    attr, codec, AttributeValue, BackendError, Item, GLOBAL_COUNTER_ID,
};
use crate::event_sourcing::store::backend::{
    ConditionalPut, Continuation, PutCondition, QueryPage, RangeQuery, RecordKey, ScanDirection,
    StorageBackend,
};

// ============================================================================
// In-Memory Backend
// ============================================================================
//
// Honors the full backend contract within one process: a single lock makes
// increments atomic and batches all-or-nothing. Intended for tests and for
// embedding the store without a database.
//
// Test hooks: injected commit failures, artificial latency, and direct
// attribute overwrites for corruption scenarios.
//
// ============================================================================

#[derive(Default)]
struct State {
    records: BTreeMap<RecordKey, Item>,
    fail_next_commit: Option<String>,
}

#[derive(Default)]
pub struct InMemoryBackend {
    state: Mutex<State>,
    latency: Option<Duration>,
}

impl InMemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every request by `latency`.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Make the next `transact_write` fail with a non-condition fault.
    pub async fn fail_next_commit(&self, reason: impl Into<String>) {
        self.state.lock().await.fail_next_commit = Some(reason.into());
    }

    /// Replace one attribute of an existing record.
    pub async fn overwrite_attribute(&self, key: &RecordKey, attribute: &str, value: AttributeValue) {
        if let Some(item) = self.state.lock().await.records.get_mut(key) {
            item.insert(attribute.to_string(), value);
        }
    }

    /// Number of event records, excluding the global counter.
    pub async fn record_count(&self) -> usize {
        self.state
            .lock()
            .await
            .records
            .keys()
            .filter(|key| key.aggregate_id != GLOBAL_COUNTER_ID)
            .count()
    }

    async fn simulate_latency(&self) {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
    }
}

/// Token layout: last returned version, then records returned so far.
fn encode_token(last_version: u64, returned: usize) -> Continuation {
    let mut bytes = last_version.to_be_bytes().to_vec();
    bytes.extend_from_slice(&(returned as u64).to_be_bytes());
    Continuation(bytes)
}

fn decode_token(token: &Continuation) -> Result<(u64, usize), BackendError> {
    let bytes: [u8; 16] = token
        .0
        .as_slice()
        .try_into()
        .map_err(|_| anyhow::anyhow!("malformed continuation token"))?;
    let (last, returned) = bytes.split_at(8);
    let last = u64::from_be_bytes(last.try_into().map_err(anyhow::Error::from)?);
    let returned = u64::from_be_bytes(returned.try_into().map_err(anyhow::Error::from)?);
    Ok((last, returned as usize))
}

#[async_trait]
impl StorageBackend for InMemoryBackend {
    async fn increment(&self, key: &RecordKey, attribute: &str) -> Result<Item, BackendError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;

        let version = codec::number(attr::VERSION, key.version).map_err(anyhow::Error::from)?;
        let record = state.records.entry(key.clone()).or_insert_with(|| {
            let mut item = Item::new();
            item.insert(
                attr::AGGREGATE_ID.to_string(),
                AttributeValue::Text(key.aggregate_id.clone()),
            );
            item.insert(attr::VERSION.to_string(), version);
            item
        });

        let current = match record.get(attribute) {
            None => 0,
            Some(AttributeValue::Number(n)) => *n,
            Some(other) => {
                return Err(anyhow::anyhow!(
                    "cannot increment {attribute}: stored value is {}",
                    other.type_name()
                )
                .into())
            }
        };
        let next = current
            .checked_add(1)
            .ok_or_else(|| anyhow::anyhow!("counter {attribute} overflowed"))?;
        record.insert(attribute.to_string(), AttributeValue::Number(next));

        let mut updated = Item::new();
        updated.insert(attribute.to_string(), AttributeValue::Number(next));
        Ok(updated)
    }

    async fn transact_write(&self, puts: Vec<ConditionalPut>) -> Result<(), BackendError> {
        self.simulate_latency().await;
        let mut state = self.state.lock().await;

        if let Some(reason) = state.fail_next_commit.take() {
            return Err(anyhow::Error::msg(reason).into());
        }

        let mut batch_keys = HashSet::new();
        for put in &puts {
            let fresh = batch_keys.insert(&put.key);
            match put.condition {
                PutCondition::NotExists => {
                    if !fresh || state.records.contains_key(&put.key) {
                        return Err(BackendError::ConditionFailed);
                    }
                }
            }
        }

        for put in puts {
            state.records.insert(put.key, put.item);
        }
        Ok(())
    }

    async fn query(&self, query: &RangeQuery) -> Result<QueryPage, BackendError> {
        self.simulate_latency().await;
        let state = self.state.lock().await;

        let resume = query.continuation.as_ref().map(decode_token).transpose()?;
        let resume_after = resume.map(|(version, _)| version);
        let returned = resume.map_or(0, |(_, returned)| returned);

        let direction = query.direction;
        let lower = RecordKey::new(query.aggregate_id.clone(), 0);
        let upper = RecordKey::new(query.aggregate_id.clone(), u64::MAX);

        let matching = state
            .records
            .range(lower..=upper)
            .filter(|(key, _)| query.after_version.map_or(true, |after| key.version > after))
            .filter(|(key, _)| match (direction, resume_after) {
                (_, None) => true,
                (ScanDirection::Forward, Some(last)) => key.version > last,
                (ScanDirection::Backward, Some(last)) => key.version < last,
            });
        let ordered: Box<dyn Iterator<Item = (&RecordKey, &Item)> + Send> = match direction {
            ScanDirection::Forward => Box::new(matching),
            ScanDirection::Backward => Box::new(matching.rev()),
        };

        let remaining = query.limit.map(|limit| (limit as usize).saturating_sub(returned));
        let page_cap = query
            .page_size
            .map_or(usize::MAX, |size| size.max(1) as usize)
            .min(remaining.unwrap_or(usize::MAX));

        let mut items = Vec::new();
        let mut last_version = None;
        let mut more = false;
        for (key, item) in ordered {
            if items.len() == page_cap {
                more = true;
                break;
            }
            last_version = Some(key.version);
            items.push(item.clone());
        }

        let limit_reached = remaining.is_some_and(|r| items.len() >= r);
        let continuation = match last_version {
            Some(last) if more && !limit_reached => Some(encode_token(last, returned + items.len())),
            _ => None,
        };

        Ok(QueryPage {
            items,
            continuation,
        })
    }
}
