//! Request dispatch: one store call per operation, composed from the
//! schema, codec, compiler, lifecycle, and crypto layers.

use crate::lifecycle::{coerce_update_ttl, stamp_create, stamp_update, Clock};
use crate::store::{
    DeleteInput, GetInput, PutInput, QueryInput, QueryOutput, ScanInput, StoreClient, UpdateInput,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use theorydb_codec::{decode, encode, key_item, Cursor};
use theorydb_core::{
    AttributeValue, ErrorKind, Filter, GsiConsistentRead, IndexType, Item, Key, ModelDescriptor,
    SortDirection, SortKeyCond, TheoryConfig, TheoryError, TheoryResult,
};
use theorydb_crypto::{EnvelopeCryptographer, RandomSource};
use theorydb_expr::{
    compile_condition, compile_filter, compile_key_condition, compile_projection,
    compile_scan_filter, compile_update, create_guard, select_index, version_guard, ExprBuffer,
    ExprTarget, SetValue, Update,
};
use tokio_util::sync::CancellationToken;

/// A fully prepared put: sealed item, optional create guard, and the value
/// as it will read back.
pub(crate) struct PreparedPut<T> {
    pub item: Item,
    pub condition: Option<String>,
    pub expr: crate::store::ExprParts,
    pub stored: T,
}

/// A fully prepared update expression with its conditions.
pub(crate) struct PreparedUpdate {
    pub update: String,
    pub condition: Option<String>,
    pub expr: crate::store::ExprParts,
}

/// A decoded page of raw items plus the cursor to resume after it.
#[derive(Debug, Clone, Default)]
pub(crate) struct RawPage {
    pub items: Vec<Item>,
    pub count: usize,
    pub cursor: Option<Cursor>,
}

/// Query parameters collected by the public builder.
#[derive(Debug, Clone)]
pub(crate) struct QuerySpec {
    pub partition: (String, AttributeValue),
    pub sort: Option<(String, SortKeyCond)>,
    pub filter: Option<Filter>,
    pub projection: Vec<String>,
    pub index: Option<String>,
    pub limit: Option<u32>,
    pub direction: Option<SortDirection>,
    pub consistent_read: Option<bool>,
    pub start: Option<Cursor>,
    pub count_only: bool,
}

/// Scan parameters collected by the public builder.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScanSpec {
    pub filter: Option<Filter>,
    pub projection: Vec<String>,
    pub limit: Option<u32>,
    pub consistent_read: Option<bool>,
    pub start: Option<Cursor>,
    pub segment: Option<(u32, u32)>,
}

/// Owns the session collaborators and executes single-item operations.
pub(crate) struct Dispatcher {
    pub store: Arc<dyn StoreClient>,
    pub crypto: Option<Arc<EnvelopeCryptographer>>,
    pub clock: Arc<dyn Clock>,
    pub random: Arc<dyn RandomSource>,
    pub config: TheoryConfig,
    /// Deadline installed by lambda mode; colors cancellation errors.
    pub deadline: Option<tokio::time::Instant>,
}

impl Dispatcher {
    /// The cancellation error for this session, marking whether a deadline
    /// (rather than the caller) pulled the plug.
    pub(crate) fn canceled(&self) -> TheoryError {
        TheoryError::Canceled {
            deadline_elapsed: self
                .deadline
                .map(|at| tokio::time::Instant::now() >= at)
                .unwrap_or(false),
        }
    }

    /// Fail closed: a model with encrypted attributes is unusable without a
    /// configured key reference, before any store call.
    pub fn encryption_gate(
        &self,
        descriptor: &ModelDescriptor,
    ) -> TheoryResult<Option<Arc<EnvelopeCryptographer>>> {
        if !descriptor.has_encrypted() {
            return Ok(None);
        }
        match &self.crypto {
            Some(crypto) => Ok(Some(Arc::clone(crypto))),
            None => Err(TheoryError::EncryptionNotConfigured {
                model: descriptor.name.clone(),
            }),
        }
    }

    pub(crate) async fn encrypt_item(
        &self,
        descriptor: &ModelDescriptor,
        item: &mut Item,
    ) -> TheoryResult<()> {
        let crypto = match self.encryption_gate(descriptor)? {
            Some(crypto) => crypto,
            None => return Ok(()),
        };
        for attr in &descriptor.attributes {
            if !attr.modifiers.encrypted {
                continue;
            }
            if let Some(plaintext) = item.get(&attr.attribute) {
                if matches!(plaintext, AttributeValue::Null) {
                    continue;
                }
                let sealed = crypto
                    .encrypt_attribute(&descriptor.name, &attr.attribute, plaintext)
                    .await?;
                item.insert(attr.attribute.clone(), sealed);
            }
        }
        Ok(())
    }

    pub(crate) async fn decrypt_item(
        &self,
        descriptor: &ModelDescriptor,
        item: &mut Item,
    ) -> TheoryResult<()> {
        let crypto = match self.encryption_gate(descriptor)? {
            Some(crypto) => crypto,
            None => return Ok(()),
        };
        for attr in &descriptor.attributes {
            if !attr.modifiers.encrypted {
                continue;
            }
            if let Some(stored) = item.get(&attr.attribute) {
                if matches!(stored, AttributeValue::Null) {
                    continue;
                }
                let opened = crypto.decrypt_attribute(&attr.attribute, stored).await?;
                item.insert(attr.attribute.clone(), opened);
            }
        }
        Ok(())
    }

    /// Encode, stamp, and seal one value for a put; shared by the direct
    /// path and the transaction builder.
    pub(crate) async fn prepare_put<T: Serialize + DeserializeOwned>(
        &self,
        descriptor: &ModelDescriptor,
        value: &T,
        idempotent: bool,
    ) -> TheoryResult<PreparedPut<T>> {
        self.encryption_gate(descriptor)?;
        let mut encoded = encode(descriptor, value)?;
        stamp_create(descriptor, &mut encoded.item, self.clock.now());
        // Key attributes must exist before the write goes anywhere.
        theorydb_codec::item_key(descriptor, &encoded.item)?;

        let stored: T = decode(descriptor, &encoded.item)?;
        self.encrypt_item(descriptor, &mut encoded.item).await?;

        let mut buf = ExprBuffer::new();
        let condition = idempotent.then(|| create_guard(&mut buf, descriptor));
        let (names, values) = buf.into_parts();
        Ok(PreparedPut {
            item: encoded.item,
            condition,
            expr: crate::store::ExprParts { names, values },
            stored,
        })
    }

    /// Put one value. `idempotent` guards the write with
    /// `attribute_not_exists(pk)`. Returns the value as stored (lifecycle
    /// attributes filled, plaintext form).
    pub async fn put<T: Serialize + DeserializeOwned>(
        &self,
        descriptor: &ModelDescriptor,
        value: &T,
        idempotent: bool,
        token: &CancellationToken,
    ) -> TheoryResult<T> {
        let prepared = self.prepare_put(descriptor, value, idempotent).await?;
        let input = PutInput {
            table: descriptor.table_name.clone(),
            item: prepared.item,
            condition: prepared.condition,
            expr: prepared.expr,
        };
        self.run_store(&descriptor.table_name, token, || {
            let store = Arc::clone(&self.store);
            let input = input.clone();
            async move { store.put(input).await }
        })
        .await?;
        Ok(prepared.stored)
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        descriptor: &ModelDescriptor,
        key: &Key,
        consistent_read: Option<bool>,
        token: &CancellationToken,
    ) -> TheoryResult<T> {
        self.encryption_gate(descriptor)?;
        let input = GetInput {
            table: descriptor.table_name.clone(),
            key: key_item(descriptor, key)?,
            consistent_read: consistent_read.unwrap_or(self.config.consistent_read),
            projection: None,
            expr: Default::default(),
        };
        let found = self
            .run_store(&descriptor.table_name, token, || {
                let store = Arc::clone(&self.store);
                let input = input.clone();
                async move { store.get(input).await }
            })
            .await?;
        let mut item = found.ok_or_else(|| TheoryError::ItemNotFound {
            table: descriptor.table_name.clone(),
        })?;
        self.decrypt_item(descriptor, &mut item).await?;
        decode(descriptor, &item)
    }

    /// Stamp, coerce, seal, and compile one update; shared by the direct
    /// path and the transaction builder.
    pub(crate) async fn prepare_update(
        &self,
        descriptor: &ModelDescriptor,
        update: Update,
        provided_version: Option<i64>,
        extra_condition: Option<&Filter>,
    ) -> TheoryResult<PreparedUpdate> {
        self.encryption_gate(descriptor)?;

        let versioned = descriptor
            .attribute_by_role(&theorydb_core::AttributeRole::Version)
            .is_some();
        let guard_version = match (versioned, provided_version) {
            (true, Some(version)) => Some(version),
            (true, None) => {
                return Err(TheoryError::InvalidModel {
                    model: descriptor.name.clone(),
                    reason: "optimistic update requires the observed version".into(),
                })
            }
            (false, _) => None,
        };

        // An empty value written to an omit_empty attribute leaves the
        // stored value alone instead of clearing it.
        let mut update = update;
        update.sets.retain(|(path, value)| {
            !matches!(
                (descriptor.attribute(path), value),
                (Some(attr), SetValue::Value(v)) if attr.modifiers.omit_empty && v.is_empty()
            )
        });

        let mut update = stamp_update(descriptor, update, self.clock.now());
        coerce_update_ttl(descriptor, &mut update)?;
        self.encrypt_update_sets(descriptor, &mut update).await?;

        let target = ExprTarget::table(descriptor);
        let mut buf = ExprBuffer::new();
        let update_expr = compile_update(&mut buf, &target, &update)?;

        let mut conditions = Vec::new();
        if let Some(version) = guard_version {
            conditions.push(version_guard(&mut buf, descriptor, version)?);
        }
        if let Some(filter) = extra_condition {
            conditions.push(format!(
                "({})",
                compile_condition(&mut buf, &target, filter)?
            ));
        }
        let condition = (!conditions.is_empty()).then(|| conditions.join(" AND "));

        let (names, values) = buf.into_parts();
        Ok(PreparedUpdate {
            update: update_expr,
            condition,
            expr: crate::store::ExprParts { names, values },
        })
    }

    /// Apply an update under the lifecycle contract. `provided_version` is
    /// mandatory for versioned models; the stored counter advances by one
    /// under a `version = provided` condition.
    pub async fn update<T: DeserializeOwned>(
        &self,
        descriptor: &ModelDescriptor,
        key: &Key,
        update: Update,
        provided_version: Option<i64>,
        extra_condition: Option<&Filter>,
        token: &CancellationToken,
    ) -> TheoryResult<T> {
        let prepared = self
            .prepare_update(descriptor, update, provided_version, extra_condition)
            .await?;
        let input = UpdateInput {
            table: descriptor.table_name.clone(),
            key: key_item(descriptor, key)?,
            update: prepared.update,
            condition: prepared.condition,
            expr: prepared.expr,
        };
        let out = self
            .run_store(&descriptor.table_name, token, || {
                let store = Arc::clone(&self.store);
                let input = input.clone();
                async move { store.update(input).await }
            })
            .await?;
        let mut item = out.item.ok_or_else(|| TheoryError::InternalStoreError {
            code: None,
            message: "update returned no item".into(),
        })?;
        self.decrypt_item(descriptor, &mut item).await?;
        decode(descriptor, &item)
    }

    async fn encrypt_update_sets(
        &self,
        descriptor: &ModelDescriptor,
        update: &mut Update,
    ) -> TheoryResult<()> {
        let crypto = match self.encryption_gate(descriptor)? {
            Some(crypto) => crypto,
            None => return Ok(()),
        };
        for (path, value) in update.sets.iter_mut() {
            if !descriptor.is_encrypted_attribute(path) {
                continue;
            }
            if let SetValue::Value(plaintext) = value {
                if matches!(plaintext, AttributeValue::Null) {
                    continue;
                }
                let sealed = crypto
                    .encrypt_attribute(&descriptor.name, path, plaintext)
                    .await?;
                *value = SetValue::Value(sealed);
            }
        }
        Ok(())
    }

    pub async fn delete(
        &self,
        descriptor: &ModelDescriptor,
        key: &Key,
        condition: Option<&Filter>,
        token: &CancellationToken,
    ) -> TheoryResult<()> {
        self.encryption_gate(descriptor)?;
        let mut buf = ExprBuffer::new();
        let target = ExprTarget::table(descriptor);
        let condition = match condition {
            Some(filter) => Some(compile_condition(&mut buf, &target, filter)?),
            None => None,
        };
        let (names, values) = buf.into_parts();
        let input = DeleteInput {
            table: descriptor.table_name.clone(),
            key: key_item(descriptor, key)?,
            condition,
            expr: crate::store::ExprParts { names, values },
        };
        self.run_store(&descriptor.table_name, token, || {
            let store = Arc::clone(&self.store);
            let input = input.clone();
            async move { store.delete(input).await }
        })
        .await
    }

    pub async fn query(
        &self,
        descriptor: &ModelDescriptor,
        spec: &QuerySpec,
        token: &CancellationToken,
    ) -> TheoryResult<RawPage> {
        self.encryption_gate(descriptor)?;

        // A cursor pins the shape it was produced under; explicit settings
        // take precedence over it.
        let explicit_index = spec
            .index
            .as_deref()
            .or(spec.start.as_ref().and_then(|c| c.index.as_deref()));
        let direction = spec
            .direction
            .or(spec.start.as_ref().and_then(|c| c.sort))
            .unwrap_or_default();

        let selection = select_index(
            descriptor,
            &spec.partition.0,
            spec.sort.as_ref().map(|(attr, _)| attr.as_str()),
            explicit_index,
        )?;
        let index = match selection.index.as_deref() {
            Some(name) => Some(descriptor.index(name).ok_or_else(|| {
                TheoryError::InvalidModel {
                    model: descriptor.name.clone(),
                    reason: format!("index {name:?} is not declared"),
                }
            })?),
            None => None,
        };
        let target = match index {
            Some(ix) => ExprTarget::index(descriptor, ix),
            None => ExprTarget::table(descriptor),
        };

        let consistent_read =
            self.police_consistent_read(spec.consistent_read, index.map(|ix| ix.index_type))?;

        let mut buf = ExprBuffer::new();
        let key_condition = compile_key_condition(
            &mut buf,
            &target,
            &spec.partition.1,
            spec.sort.as_ref().map(|(_, cond)| cond),
        )?;
        let filter = match &spec.filter {
            Some(filter) => Some(compile_filter(&mut buf, &target, filter)?),
            None => None,
        };
        let projection = if spec.projection.is_empty() {
            None
        } else {
            Some(compile_projection(&mut buf, &target, &spec.projection)?)
        };
        let (names, values) = buf.into_parts();

        let input = QueryInput {
            table: descriptor.table_name.clone(),
            index: selection.index.clone(),
            key_condition,
            filter,
            projection,
            expr: crate::store::ExprParts { names, values },
            limit: spec.limit,
            scan_forward: direction == SortDirection::Asc,
            consistent_read,
            exclusive_start_key: spec.start.as_ref().map(|c| c.last_key.clone()),
            count_only: spec.count_only,
        };
        let out = self
            .run_store(&descriptor.table_name, token, || {
                let store = Arc::clone(&self.store);
                let input = input.clone();
                async move { store.query(input).await }
            })
            .await?;
        self.finish_page(descriptor, out, selection.index, Some(direction))
            .await
    }

    pub async fn scan(
        &self,
        descriptor: &ModelDescriptor,
        spec: &ScanSpec,
        token: &CancellationToken,
    ) -> TheoryResult<RawPage> {
        self.encryption_gate(descriptor)?;
        let target = ExprTarget::table(descriptor);
        let consistent_read = self.police_consistent_read(spec.consistent_read, None)?;

        let mut buf = ExprBuffer::new();
        let filter = match &spec.filter {
            Some(filter) => Some(compile_scan_filter(&mut buf, &target, filter)?),
            None => None,
        };
        let projection = if spec.projection.is_empty() {
            None
        } else {
            Some(compile_projection(&mut buf, &target, &spec.projection)?)
        };
        let (names, values) = buf.into_parts();

        let input = ScanInput {
            table: descriptor.table_name.clone(),
            index: None,
            filter,
            projection,
            expr: crate::store::ExprParts { names, values },
            limit: spec.limit,
            consistent_read,
            exclusive_start_key: spec.start.as_ref().map(|c| c.last_key.clone()),
            segment: spec.segment,
        };
        let out = self
            .run_store(&descriptor.table_name, token, || {
                let store = Arc::clone(&self.store);
                let input = input.clone();
                async move { store.scan(input).await }
            })
            .await?;
        self.finish_page(descriptor, out, None, None).await
    }

    async fn finish_page(
        &self,
        descriptor: &ModelDescriptor,
        out: QueryOutput,
        index: Option<String>,
        direction: Option<SortDirection>,
    ) -> TheoryResult<RawPage> {
        let mut items = out.items;
        for item in items.iter_mut() {
            self.decrypt_item(descriptor, item).await?;
        }
        let cursor = out.last_evaluated_key.map(|last_key| Cursor {
            last_key,
            index,
            sort: direction,
        });
        Ok(RawPage {
            items,
            count: out.count,
            cursor,
        })
    }

    fn police_consistent_read(
        &self,
        requested: Option<bool>,
        index_type: Option<IndexType>,
    ) -> TheoryResult<bool> {
        let effective = requested.unwrap_or(self.config.consistent_read);
        if !effective || index_type != Some(IndexType::Gsi) {
            return Ok(effective);
        }
        match self.config.gsi_consistent_read {
            GsiConsistentRead::Drop => {
                tracing::warn!("consistent read is not served by global indexes; dropping flag");
                Ok(false)
            }
            GsiConsistentRead::Reject => Err(TheoryError::InvalidOperator {
                operator: "query".into(),
                path: String::new(),
                reason: "consistent reads are not served by global secondary indexes".into(),
            }),
        }
    }

    /// Run one store call under cancellation, retrying throttled faults on
    /// the bounded jitter schedule.
    pub(crate) async fn run_store<T, F, Fut>(
        &self,
        table: &str,
        token: &CancellationToken,
        mut op: F,
    ) -> TheoryResult<T>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = TheoryResult<T>>,
    {
        let mut attempt: u32 = 0;
        loop {
            if token.is_cancelled() {
                return Err(self.canceled());
            }
            let result = tokio::select! {
                _ = token.cancelled() => Err(self.canceled()),
                result = op() => result,
            };
            match result {
                Err(err)
                    if err.kind() == ErrorKind::Throttled
                        && attempt + 1 < self.config.batch.max_attempts =>
                {
                    let ceiling = self.config.batch.backoff_ceiling(attempt);
                    let delay = full_jitter(self.random.as_ref(), ceiling);
                    attempt += 1;
                    tracing::debug!(table, attempt, ?delay, "store throttled; backing off");
                    tokio::select! {
                        _ = token.cancelled() => return Err(self.canceled()),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) if err.kind() == ErrorKind::Throttled => {
                    return Err(TheoryError::ThroughputExceeded {
                        table: table.to_string(),
                        attempts: attempt + 1,
                        unprocessed_count: 0,
                        unprocessed_keys: Vec::new(),
                        unprocessed_writes: Vec::new(),
                    })
                }
                other => return other,
            }
        }
    }
}

/// Full jitter: a uniform draw in `[0, ceiling]`.
pub(crate) fn full_jitter(random: &dyn RandomSource, ceiling: Duration) -> Duration {
    let nanos = ceiling.as_nanos() as u64;
    if nanos == 0 {
        return Duration::ZERO;
    }
    let mut bytes = [0u8; 8];
    random.fill(&mut bytes);
    Duration::from_nanos(u64::from_le_bytes(bytes) % (nanos + 1))
}
