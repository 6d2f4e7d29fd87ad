//! Batch coordination: chunking, bounded parallel dispatch, and retry of
//! unprocessed remainders under the jittered backoff schedule.

use crate::dispatch::{full_jitter, Dispatcher};
use crate::store::{
    BatchGetInput, BatchWriteInput, WriteRequest, BATCH_GET_LIMIT, BATCH_WRITE_LIMIT,
};
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use theorydb_codec::{item_key, key_item};
use theorydb_core::{
    ErrorKind, Item, Key, ModelDescriptor, TheoryError, TheoryResult, UnprocessedWrite,
};
use tokio_util::sync::CancellationToken;

/// Invoked after every completed chunk with `(retrieved, total)`; `total`
/// is the input key count.
pub type ProgressFn = Box<dyn Fn(usize, usize) + Send + Sync>;

pub(crate) struct BatchGetOperation<'a> {
    pub dispatcher: &'a Dispatcher,
    pub descriptor: Arc<ModelDescriptor>,
    pub keys: Vec<Key>,
    pub consistent_read: Option<bool>,
    pub progress: Option<ProgressFn>,
    pub token: CancellationToken,
}

impl BatchGetOperation<'_> {
    /// Fetch every key, returning found items in input key order with
    /// decrypted attributes; missing keys simply do not appear.
    pub async fn run(self) -> TheoryResult<Vec<Item>> {
        let descriptor = &self.descriptor;
        self.dispatcher.encryption_gate(descriptor)?;
        let config = &self.dispatcher.config.batch;
        let total = self.keys.len();

        // Deduplicate while preserving first-occurrence order.
        let mut unique: Vec<(String, Item)> = Vec::with_capacity(total);
        for key in &self.keys {
            let canonical = key.canonical();
            if !unique.iter().any(|(c, _)| *c == canonical) {
                unique.push((canonical, key_item(descriptor, key)?));
            }
        }

        let chunk_size = config
            .chunk_size
            .unwrap_or(BATCH_GET_LIMIT)
            .clamp(1, BATCH_GET_LIMIT);
        let consistent_read = self
            .consistent_read
            .unwrap_or(self.dispatcher.config.consistent_read);

        let mut found: HashMap<String, Item> = HashMap::with_capacity(unique.len());
        let mut pending: Vec<Item> = unique.iter().map(|(_, item)| item.clone()).collect();

        for attempt in 0..config.max_attempts {
            let chunks: Vec<Vec<Item>> = pending.chunks(chunk_size).map(|c| c.to_vec()).collect();
            let mut stream = stream::iter(chunks.into_iter().map(|keys| {
                let store = Arc::clone(&self.dispatcher.store);
                let dispatcher = self.dispatcher;
                let token = self.token.clone();
                let input = BatchGetInput {
                    table: descriptor.table_name.clone(),
                    keys,
                    consistent_read,
                };
                async move {
                    let result = tokio::select! {
                        _ = token.cancelled() => Err(dispatcher.canceled()),
                        out = store.batch_get(input.clone()) => out,
                    };
                    (input.keys, result)
                }
            }))
            .buffer_unordered(config.max_concurrency.max(1));

            let mut next_pending: Vec<Item> = Vec::new();
            while let Some((keys, result)) = stream.next().await {
                match result {
                    Ok(out) => {
                        for item in out.items {
                            let key = item_key(descriptor, &item)?;
                            found.insert(key.canonical(), item);
                        }
                        next_pending.extend(out.unprocessed_keys);
                        if let Some(progress) = &self.progress {
                            progress(found.len(), total);
                        }
                    }
                    // A throttled chunk is wholly unprocessed; the shared
                    // backoff below owns the retry.
                    Err(err) if err.kind() == ErrorKind::Throttled => {
                        tracing::debug!(error = %err, "batch chunk throttled");
                        next_pending.extend(keys);
                    }
                    Err(err) => return Err(err),
                }
            }
            drop(stream);
            pending = next_pending;

            if pending.is_empty() {
                break;
            }
            if attempt + 1 == config.max_attempts {
                let mut unprocessed_keys = Vec::with_capacity(pending.len());
                for item in &pending {
                    unprocessed_keys.push(item_key(descriptor, item)?);
                }
                return Err(TheoryError::ThroughputExceeded {
                    table: descriptor.table_name.clone(),
                    attempts: config.max_attempts,
                    unprocessed_count: unprocessed_keys.len(),
                    unprocessed_keys,
                    unprocessed_writes: Vec::new(),
                });
            }
            self.backoff(attempt).await?;
        }

        let mut items = Vec::with_capacity(found.len());
        for (canonical, _) in &unique {
            if let Some(mut item) = found.remove(canonical) {
                self.dispatcher.decrypt_item(descriptor, &mut item).await?;
                items.push(item);
            }
        }
        Ok(items)
    }

    async fn backoff(&self, attempt: u32) -> TheoryResult<()> {
        let ceiling = self.dispatcher.config.batch.backoff_ceiling(attempt);
        let delay = full_jitter(self.dispatcher.random.as_ref(), ceiling);
        tracing::debug!(attempt, ?delay, "retrying unprocessed batch keys");
        tokio::select! {
            _ = self.token.cancelled() => Err(self.dispatcher.canceled()),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }
}

pub(crate) struct BatchWriteOperation<'a> {
    pub dispatcher: &'a Dispatcher,
    /// Descriptor per table, to surface typed unprocessed remainders.
    pub descriptors: HashMap<String, Arc<ModelDescriptor>>,
    pub writes: Vec<(String, WriteRequest)>,
    pub token: CancellationToken,
}

impl BatchWriteOperation<'_> {
    pub async fn run(self) -> TheoryResult<()> {
        let config = &self.dispatcher.config.batch;
        let chunk_size = config
            .chunk_size
            .unwrap_or(BATCH_WRITE_LIMIT)
            .clamp(1, BATCH_WRITE_LIMIT);

        let mut pending = self.writes.clone();
        for attempt in 0..config.max_attempts {
            let chunks: Vec<Vec<(String, WriteRequest)>> =
                pending.chunks(chunk_size).map(|c| c.to_vec()).collect();
            let mut stream = stream::iter(chunks.into_iter().map(|writes| {
                let store = Arc::clone(&self.dispatcher.store);
                let dispatcher = self.dispatcher;
                let token = self.token.clone();
                async move {
                    let result = tokio::select! {
                        _ = token.cancelled() => Err(dispatcher.canceled()),
                        out = store.batch_write(BatchWriteInput { writes: writes.clone() }) => out,
                    };
                    (writes, result)
                }
            }))
            .buffer_unordered(config.max_concurrency.max(1));

            let mut next_pending: Vec<(String, WriteRequest)> = Vec::new();
            while let Some((writes, result)) = stream.next().await {
                match result {
                    Ok(out) => next_pending.extend(out.unprocessed),
                    Err(err) if err.kind() == ErrorKind::Throttled => {
                        tracing::debug!(error = %err, "batch write chunk throttled");
                        next_pending.extend(writes);
                    }
                    Err(err) => return Err(err),
                }
            }
            drop(stream);
            pending = next_pending;

            if pending.is_empty() {
                return Ok(());
            }
            if attempt + 1 == config.max_attempts {
                break;
            }
            let ceiling = config.backoff_ceiling(attempt);
            let delay = full_jitter(self.dispatcher.random.as_ref(), ceiling);
            tracing::debug!(attempt, ?delay, "retrying unprocessed batch writes");
            tokio::select! {
                _ = self.token.cancelled() => return Err(self.dispatcher.canceled()),
                _ = tokio::time::sleep(delay) => {}
            }
        }

        // Exhausted: surface what never landed, typed.
        let mut unprocessed_writes = Vec::with_capacity(pending.len());
        let mut table = String::new();
        for (table_name, write) in pending {
            table = table_name.clone();
            let unprocessed = match &write {
                WriteRequest::Put { item } => UnprocessedWrite {
                    table: table_name,
                    put: Some(item.clone()),
                    delete: None,
                },
                WriteRequest::Delete { key } => {
                    let descriptor = self.descriptors.get(&table_name).ok_or_else(|| {
                        TheoryError::InternalStoreError {
                            code: None,
                            message: format!("no descriptor tracked for table {table_name}"),
                        }
                    })?;
                    UnprocessedWrite {
                        table: table_name,
                        put: None,
                        delete: Some(item_key(descriptor, key)?),
                    }
                }
            };
            unprocessed_writes.push(unprocessed);
        }
        tracing::warn!(
            count = unprocessed_writes.len(),
            "batch write gave up with unprocessed items"
        );
        Err(TheoryError::ThroughputExceeded {
            table,
            attempts: self.dispatcher.config.batch.max_attempts,
            unprocessed_count: unprocessed_writes.len(),
            unprocessed_keys: Vec::new(),
            unprocessed_writes,
        })
    }
}
