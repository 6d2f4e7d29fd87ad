//! TheoryDB Client - Session, Dispatcher, and Coordinators
//!
//! The public entry point: a [`TheoryDb`] session binds a store client,
//! clock, randomness, and (optionally) a key service, registers models,
//! and hands out typed [`ModelHandle`]s plus batch and transaction
//! builders. All store access in the workspace funnels through the
//! [`StoreClient`] trait; the AWS adapter and the in-memory mock both
//! implement it.

mod aws;
mod batch;
mod dispatch;
mod handle;
mod lifecycle;
mod mock;
mod store;
mod stream;

pub use aws::AwsStore;
pub use batch::ProgressFn;
pub use handle::{BatchGetBuilder, ModelHandle, Page, QueryBuilder, ScanBuilder, UpdateBuilder};
pub use lifecycle::{rfc3339_nano, Clock, SystemClock};
pub use mock::MockStore;
pub use store::{
    BatchGetInput, BatchGetOutput, BatchWriteInput, BatchWriteOutput, DeleteInput, ExprParts,
    GetInput, IndexSpec, PutInput, QueryInput, QueryOutput, ScanInput, StoreClient,
    TableDescription, TableSpec, TransactItem, TransactWriteInput, UpdateInput, UpdateOutput,
    WriteRequest, BATCH_GET_LIMIT, BATCH_WRITE_LIMIT, TRANSACT_LIMIT,
};
pub use stream::StreamRecord;

// The public vocabulary, re-exported so user code depends on one crate.
pub use theorydb_codec::Cursor;
pub use theorydb_core::{
    AttributeType, AttributeValue, CancellationReason, ErrorKind, Filter, Item, Key,
    ModelDescriptor, SortDirection, SortKeyCond, TheoryConfig, TheoryError, TheoryResult,
    UnprocessedWrite,
};
pub use theorydb_crypto::{
    EnvelopeCryptographer, KeyService, KmsKeyService, OsRandom, RandomSource,
};
pub use theorydb_expr::{ListOperand, SetValue, Update};
pub use theorydb_schema::{Attribute, DescriptorBuilder, Model, SchemaRegistry};

use crate::batch::BatchWriteOperation;
use crate::dispatch::Dispatcher;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;
use theorydb_expr::{compile_condition, ExprBuffer, ExprTarget};
use tokio_util::sync::CancellationToken;

pub(crate) struct Session {
    pub dispatcher: Dispatcher,
    pub registry: SchemaRegistry,
    pub root_token: CancellationToken,
}

/// The session-bound entry point.
///
/// Cheap to clone; every clone shares the same store connections, frozen
/// registry, and cancellation root.
#[derive(Clone)]
pub struct TheoryDb {
    session: Arc<Session>,
}

impl TheoryDb {
    pub fn builder() -> TheoryDbBuilder {
        TheoryDbBuilder::default()
    }

    /// Register a model's descriptor. Idempotent for identical
    /// re-registrations; conflicting ones fail with `InvalidModel`.
    pub fn register_model<T: Model>(&self) -> TheoryResult<()> {
        self.session.registry.register_model::<T>().map(|_| ())
    }

    /// A typed handle for one model, registering it on first use.
    pub fn model<T: Model>(&self) -> TheoryResult<ModelHandle<T>> {
        let descriptor = self.session.registry.register_model::<T>()?;
        Ok(ModelHandle {
            session: Arc::clone(&self.session),
            descriptor,
            _marker: PhantomData,
        })
    }

    /// Start a mixed put/delete batch across models.
    pub fn batch_write(&self) -> BatchWriteBuilder {
        BatchWriteBuilder {
            session: Arc::clone(&self.session),
            descriptors: HashMap::new(),
            pending: Vec::new(),
            token: None,
        }
    }

    /// Start an all-or-nothing transaction across models.
    pub fn transact_write(&self) -> TransactWriteBuilder {
        TransactWriteBuilder {
            session: Arc::clone(&self.session),
            items: Vec::new(),
            token: None,
        }
    }

    /// Decode a change-feed record into typed images.
    pub async fn decode_stream_record<T: Model>(
        &self,
        record: &StreamRecord,
    ) -> TheoryResult<(Option<T>, Option<T>)> {
        let descriptor = self.session.registry.register_model::<T>()?;
        stream::decode_record(&self.session.dispatcher, &descriptor, record).await
    }

    /// Create the model's table with the key and index layout its
    /// descriptor declares.
    pub async fn create_table<T: Model>(&self) -> TheoryResult<()> {
        let descriptor = self.session.registry.register_model::<T>()?;
        let spec = TableSpec::from_descriptor(&descriptor)?;
        self.session.dispatcher.store.create_table(spec).await
    }

    pub async fn delete_table<T: Model>(&self) -> TheoryResult<()> {
        let descriptor = self.session.registry.register_model::<T>()?;
        self.session
            .dispatcher
            .store
            .delete_table(&descriptor.table_name)
            .await
    }

    pub async fn describe_table<T: Model>(&self) -> TheoryResult<TableDescription> {
        let descriptor = self.session.registry.register_model::<T>()?;
        self.session
            .dispatcher
            .store
            .describe_table(&descriptor.table_name)
            .await
    }

    /// A child token canceling with the session; hand it to long calls to
    /// cancel them individually.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.session.root_token.child_token()
    }

    /// Cancel every in-flight and future operation of this session.
    /// Idempotent.
    pub fn close(&self) {
        self.session.root_token.cancel();
    }
}

/// Builder wiring a session's collaborators.
pub struct TheoryDbBuilder {
    config: TheoryConfig,
    store: Option<Arc<dyn StoreClient>>,
    key_service: Option<Arc<dyn KeyService>>,
    clock: Arc<dyn Clock>,
    random: Arc<dyn RandomSource>,
    deadline: Option<tokio::time::Instant>,
}

impl Default for TheoryDbBuilder {
    fn default() -> Self {
        Self {
            config: TheoryConfig::default(),
            store: None,
            key_service: None,
            clock: Arc::new(SystemClock),
            random: Arc::new(OsRandom),
            deadline: None,
        }
    }
}

impl TheoryDbBuilder {
    pub fn config(mut self, config: TheoryConfig) -> Self {
        self.config = config;
        self
    }

    /// Inject a store client (tests, alternative backends).
    pub fn store(mut self, store: Arc<dyn StoreClient>) -> Self {
        self.store = Some(store);
        self
    }

    /// Inject a key service for envelope encryption.
    pub fn key_service(mut self, key_service: Arc<dyn KeyService>) -> Self {
        self.key_service = Some(key_service);
        self
    }

    /// Inject the lifecycle clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Inject the randomness source (nonces, backoff jitter).
    pub fn random(mut self, random: Arc<dyn RandomSource>) -> Self {
        self.random = random;
        self
    }

    /// The execution deadline lambda mode derives cancellation from.
    pub fn deadline(mut self, deadline: tokio::time::Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Build with the injected store client.
    pub fn build(self) -> TheoryResult<TheoryDb> {
        let store = self.store.ok_or_else(|| TheoryError::InvalidModel {
            model: "session".into(),
            reason: "no store client configured; inject one or use connect()".into(),
        })?;
        Self::assemble(
            store,
            self.key_service,
            self.clock,
            self.random,
            self.config,
            self.deadline,
        )
    }

    /// Build against AWS: DynamoDB for the store and, when a key reference
    /// is configured, KMS for the key service.
    pub async fn connect(self) -> TheoryResult<TheoryDb> {
        let sdk_config = aws::load_sdk_config(&self.config).await;
        let store: Arc<dyn StoreClient> = match self.store {
            Some(store) => store,
            None => Arc::new(AwsStore::new(aws_sdk_dynamodb::Client::new(&sdk_config))),
        };
        let key_service: Option<Arc<dyn KeyService>> = match self.key_service {
            Some(key_service) => Some(key_service),
            None if self.config.kms_key_arn.is_some() => Some(Arc::new(KmsKeyService::new(
                aws_sdk_kms::Client::new(&sdk_config),
            ))),
            None => None,
        };
        Self::assemble(
            store,
            key_service,
            self.clock,
            self.random,
            self.config,
            self.deadline,
        )
    }

    fn assemble(
        store: Arc<dyn StoreClient>,
        key_service: Option<Arc<dyn KeyService>>,
        clock: Arc<dyn Clock>,
        random: Arc<dyn RandomSource>,
        config: TheoryConfig,
        deadline: Option<tokio::time::Instant>,
    ) -> TheoryResult<TheoryDb> {
        let crypto = match (&config.kms_key_arn, key_service) {
            (Some(arn), Some(keys)) => Some(Arc::new(EnvelopeCryptographer::new(
                keys,
                arn.clone(),
                Arc::clone(&random),
            ))),
            (Some(_), None) => {
                return Err(TheoryError::InvalidModel {
                    model: "session".into(),
                    reason: "kms_key_arn is set but no key service is configured".into(),
                })
            }
            (None, _) => None,
        };

        let root_token = CancellationToken::new();
        let effective_deadline = if config.lambda_mode {
            deadline.map(|at| at - config.lambda_safety_buffer)
        } else {
            None
        };
        if let Some(at) = effective_deadline {
            let token = root_token.clone();
            tokio::spawn(async move {
                tokio::time::sleep_until(at).await;
                token.cancel();
            });
        }

        let session = Session {
            dispatcher: Dispatcher {
                store,
                crypto,
                clock,
                random,
                config,
                deadline: effective_deadline,
            },
            registry: SchemaRegistry::new(),
            root_token,
        };
        Ok(TheoryDb {
            session: Arc::new(session),
        })
    }
}

enum PendingWrite {
    Put {
        descriptor: Arc<ModelDescriptor>,
        item: theorydb_core::Item,
    },
    Delete {
        descriptor: Arc<ModelDescriptor>,
        key: Key,
    },
}

/// Accumulates puts and deletes for one `BatchWrite` call chain.
pub struct BatchWriteBuilder {
    session: Arc<Session>,
    descriptors: HashMap<String, Arc<ModelDescriptor>>,
    pending: Vec<PendingWrite>,
    token: Option<CancellationToken>,
}

impl BatchWriteBuilder {
    /// Queue a put; the value is encoded and lifecycle-stamped now.
    pub fn put<T: Model>(mut self, value: &T) -> TheoryResult<Self> {
        let descriptor = self.session.registry.register_model::<T>()?;
        self.session.dispatcher.encryption_gate(&descriptor)?;
        let mut encoded = theorydb_codec::encode(&descriptor, value)?;
        crate::lifecycle::stamp_create(
            &descriptor,
            &mut encoded.item,
            self.session.dispatcher.clock.now(),
        );
        theorydb_codec::item_key(&descriptor, &encoded.item)?;
        self.descriptors
            .insert(descriptor.table_name.clone(), Arc::clone(&descriptor));
        self.pending.push(PendingWrite::Put {
            descriptor,
            item: encoded.item,
        });
        Ok(self)
    }

    /// Queue a key delete.
    pub fn delete<T: Model>(mut self, key: Key) -> TheoryResult<Self> {
        let descriptor = self.session.registry.register_model::<T>()?;
        self.descriptors
            .insert(descriptor.table_name.clone(), Arc::clone(&descriptor));
        self.pending.push(PendingWrite::Delete { descriptor, key });
        Ok(self)
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Dispatch all queued writes; unprocessed remainders are retried on
    /// the backoff schedule and surfaced typed when attempts run out.
    pub async fn exec(self) -> TheoryResult<()> {
        let dispatcher = &self.session.dispatcher;
        let mut writes = Vec::with_capacity(self.pending.len());
        for write in &self.pending {
            match write {
                PendingWrite::Put { descriptor, item } => {
                    let mut item = item.clone();
                    dispatcher.encrypt_item(descriptor, &mut item).await?;
                    writes.push((
                        descriptor.table_name.clone(),
                        WriteRequest::Put { item },
                    ));
                }
                PendingWrite::Delete { descriptor, key } => {
                    dispatcher.encryption_gate(descriptor)?;
                    writes.push((
                        descriptor.table_name.clone(),
                        WriteRequest::Delete {
                            key: theorydb_codec::key_item(descriptor, key)?,
                        },
                    ));
                }
            }
        }
        let token = self
            .token
            .unwrap_or_else(|| self.session.root_token.clone());
        BatchWriteOperation {
            dispatcher,
            descriptors: self.descriptors,
            writes,
            token,
        }
        .run()
        .await
    }
}

/// Accumulates operations for one `TransactWrite` call.
pub struct TransactWriteBuilder {
    session: Arc<Session>,
    items: Vec<TransactItem>,
    token: Option<CancellationToken>,
}

impl TransactWriteBuilder {
    /// Unconditional put.
    pub async fn put<T: Model>(mut self, value: &T) -> TheoryResult<Self> {
        let descriptor = self.session.registry.register_model::<T>()?;
        let prepared = self
            .session
            .dispatcher
            .prepare_put(&descriptor, value, false)
            .await?;
        self.items.push(TransactItem::Put {
            table: descriptor.table_name.clone(),
            item: prepared.item,
            condition: prepared.condition,
            expr: prepared.expr,
        });
        Ok(self)
    }

    /// Idempotent create, guarded by `attribute_not_exists(pk)`.
    pub async fn create<T: Model>(mut self, value: &T) -> TheoryResult<Self> {
        let descriptor = self.session.registry.register_model::<T>()?;
        let prepared = self
            .session
            .dispatcher
            .prepare_put(&descriptor, value, true)
            .await?;
        self.items.push(TransactItem::Put {
            table: descriptor.table_name.clone(),
            item: prepared.item,
            condition: prepared.condition,
            expr: prepared.expr,
        });
        Ok(self)
    }

    /// Optimistically locked update; `observed_version` is mandatory for
    /// versioned models.
    pub async fn update<T: Model>(
        mut self,
        key: Key,
        update: Update,
        observed_version: Option<i64>,
    ) -> TheoryResult<Self> {
        let descriptor = self.session.registry.register_model::<T>()?;
        let prepared = self
            .session
            .dispatcher
            .prepare_update(&descriptor, update, observed_version, None)
            .await?;
        self.items.push(TransactItem::Update {
            table: descriptor.table_name.clone(),
            key: theorydb_codec::key_item(&descriptor, &key)?,
            update: prepared.update,
            condition: prepared.condition,
            expr: prepared.expr,
        });
        Ok(self)
    }

    /// Delete, optionally guarded.
    pub async fn delete<T: Model>(
        mut self,
        key: Key,
        condition: Option<Filter>,
    ) -> TheoryResult<Self> {
        let descriptor = self.session.registry.register_model::<T>()?;
        self.session.dispatcher.encryption_gate(&descriptor)?;
        let mut buf = ExprBuffer::new();
        let target = ExprTarget::table(&descriptor);
        let condition = match &condition {
            Some(filter) => Some(compile_condition(&mut buf, &target, filter)?),
            None => None,
        };
        let (names, values) = buf.into_parts();
        self.items.push(TransactItem::Delete {
            table: descriptor.table_name.clone(),
            key: theorydb_codec::key_item(&descriptor, &key)?,
            condition,
            expr: ExprParts { names, values },
        });
        Ok(self)
    }

    /// Assert a condition on an item the transaction does not write.
    pub async fn condition_check<T: Model>(
        mut self,
        key: Key,
        condition: Filter,
    ) -> TheoryResult<Self> {
        let descriptor = self.session.registry.register_model::<T>()?;
        self.session.dispatcher.encryption_gate(&descriptor)?;
        let mut buf = ExprBuffer::new();
        let target = ExprTarget::table(&descriptor);
        let condition = compile_condition(&mut buf, &target, &condition)?;
        let (names, values) = buf.into_parts();
        self.items.push(TransactItem::ConditionCheck {
            table: descriptor.table_name.clone(),
            key: theorydb_codec::key_item(&descriptor, &key)?,
            condition,
            expr: ExprParts { names, values },
        });
        Ok(self)
    }

    /// Execute all-or-nothing. On cancellation the error carries one
    /// reason per operation, in input order.
    pub async fn exec(self) -> TheoryResult<()> {
        if self.items.len() > TRANSACT_LIMIT {
            return Err(TheoryError::InvalidOperator {
                operator: "transact_write".into(),
                path: String::new(),
                reason: format!(
                    "{} operations exceed the per-transaction limit of {TRANSACT_LIMIT}",
                    self.items.len()
                ),
            });
        }
        let token = self
            .token
            .unwrap_or_else(|| self.session.root_token.clone());
        let dispatcher = &self.session.dispatcher;
        let input = TransactWriteInput { items: self.items };
        dispatcher
            .run_store("transaction", &token, || {
                let store = Arc::clone(&dispatcher.store);
                let input = input.clone();
                async move { store.transact_write(input).await }
            })
            .await
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }
}
