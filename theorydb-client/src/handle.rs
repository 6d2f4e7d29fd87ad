//! Typed per-model operations.

use crate::batch::{BatchGetOperation, ProgressFn};
use crate::dispatch::{QuerySpec, ScanSpec};
use crate::Session;
use std::marker::PhantomData;
use std::sync::Arc;
use theorydb_codec::{decode, Cursor};
use theorydb_core::{
    AttributeValue, Filter, Key, ModelDescriptor, SortDirection, SortKeyCond, TheoryError,
    TheoryResult,
};
use theorydb_expr::Update;
use theorydb_schema::Model;
use tokio_util::sync::CancellationToken;

/// One page of a query or scan, plus the cursor resuming after it.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque token for the next page; `None` when the result is complete.
    pub cursor: Option<String>,
}

/// Typed entry point for one registered model.
pub struct ModelHandle<T: Model> {
    pub(crate) session: Arc<Session>,
    pub(crate) descriptor: Arc<ModelDescriptor>,
    pub(crate) _marker: PhantomData<fn() -> T>,
}

impl<T: Model> ModelHandle<T> {
    /// The frozen descriptor backing this handle.
    pub fn descriptor(&self) -> &ModelDescriptor {
        &self.descriptor
    }

    fn token(&self) -> CancellationToken {
        self.session.root_token.clone()
    }

    /// Idempotent create: fails with `ConditionFailed` when the key already
    /// exists. Lifecycle attributes are stamped; the stored value is
    /// returned.
    pub async fn create(&self, value: &T) -> TheoryResult<T> {
        self.session
            .dispatcher
            .put(&self.descriptor, value, true, &self.token())
            .await
    }

    /// Unconditional put (upsert).
    pub async fn put(&self, value: &T) -> TheoryResult<T> {
        self.session
            .dispatcher
            .put(&self.descriptor, value, false, &self.token())
            .await
    }

    /// Fetch one item by key; `ItemNotFound` when absent.
    pub async fn get(&self, key: Key) -> TheoryResult<T> {
        self.session
            .dispatcher
            .get(&self.descriptor, &key, None, &self.token())
            .await
    }

    /// Fetch with an explicit consistency choice for this call.
    pub async fn get_consistent(&self, key: Key, consistent_read: bool) -> TheoryResult<T> {
        self.session
            .dispatcher
            .get(&self.descriptor, &key, Some(consistent_read), &self.token())
            .await
    }

    /// Start an update of one item.
    pub fn update(&self, key: Key, update: Update) -> UpdateBuilder<T> {
        UpdateBuilder {
            session: Arc::clone(&self.session),
            descriptor: Arc::clone(&self.descriptor),
            key,
            update,
            version: None,
            condition: None,
            token: None,
            _marker: PhantomData,
        }
    }

    /// Delete one item.
    pub async fn delete(&self, key: Key) -> TheoryResult<()> {
        self.session
            .dispatcher
            .delete(&self.descriptor, &key, None, &self.token())
            .await
    }

    /// Delete one item, guarded by a condition.
    pub async fn delete_if(&self, key: Key, condition: Filter) -> TheoryResult<()> {
        self.session
            .dispatcher
            .delete(&self.descriptor, &key, Some(&condition), &self.token())
            .await
    }

    /// Start a query with a partition-key equality on the named attribute.
    /// The table or index to use is resolved from the predicate unless
    /// [`QueryBuilder::index`] names one.
    pub fn query(&self, partition_attr: impl Into<String>, value: AttributeValue) -> QueryBuilder<T> {
        QueryBuilder {
            session: Arc::clone(&self.session),
            descriptor: Arc::clone(&self.descriptor),
            spec: QuerySpec {
                partition: (partition_attr.into(), value),
                sort: None,
                filter: None,
                projection: Vec::new(),
                index: None,
                limit: None,
                direction: None,
                consistent_read: None,
                start: None,
                count_only: false,
            },
            start_token: None,
            token: None,
            _marker: PhantomData,
        }
    }

    /// Start a scan of the whole table.
    pub fn scan(&self) -> ScanBuilder<T> {
        ScanBuilder {
            session: Arc::clone(&self.session),
            descriptor: Arc::clone(&self.descriptor),
            spec: ScanSpec::default(),
            start_token: None,
            token: None,
            _marker: PhantomData,
        }
    }

    /// Start a batch get of many keys.
    pub fn batch_get(&self, keys: Vec<Key>) -> BatchGetBuilder<T> {
        BatchGetBuilder {
            session: Arc::clone(&self.session),
            descriptor: Arc::clone(&self.descriptor),
            keys,
            consistent_read: None,
            progress: None,
            token: None,
            _marker: PhantomData,
        }
    }
}

/// Builder for a conditional, optimistically locked update.
pub struct UpdateBuilder<T> {
    session: Arc<Session>,
    descriptor: Arc<ModelDescriptor>,
    key: Key,
    update: Update,
    version: Option<i64>,
    condition: Option<Filter>,
    token: Option<CancellationToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> UpdateBuilder<T> {
    /// The version this caller observed; mandatory for versioned models.
    pub fn version(mut self, observed: i64) -> Self {
        self.version = Some(observed);
        self
    }

    /// An additional condition the write must satisfy.
    pub fn condition(mut self, condition: Filter) -> Self {
        self.condition = Some(condition);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Execute and return the item as stored after the update.
    pub async fn exec(self) -> TheoryResult<T> {
        let token = self
            .token
            .unwrap_or_else(|| self.session.root_token.clone());
        self.session
            .dispatcher
            .update(
                &self.descriptor,
                &self.key,
                self.update,
                self.version,
                self.condition.as_ref(),
                &token,
            )
            .await
    }
}

/// Builder for a query.
pub struct QueryBuilder<T> {
    session: Arc<Session>,
    descriptor: Arc<ModelDescriptor>,
    spec: QuerySpec,
    start_token: Option<String>,
    token: Option<CancellationToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> QueryBuilder<T> {
    /// Predicate on the named sort-key attribute.
    pub fn sort_key(mut self, attr: impl Into<String>, cond: SortKeyCond) -> Self {
        self.spec.sort = Some((attr.into(), cond));
        self
    }

    /// Filter applied server-side after key matching.
    pub fn filter(mut self, filter: Filter) -> Self {
        self.spec.filter = Some(filter);
        self
    }

    /// Project only the named attribute paths.
    pub fn project<I: IntoIterator<Item = S>, S: Into<String>>(mut self, paths: I) -> Self {
        self.spec.projection = paths.into_iter().map(Into::into).collect();
        self
    }

    /// Name the index to query, overriding predicate-based selection.
    pub fn index(mut self, name: impl Into<String>) -> Self {
        self.spec.index = Some(name.into());
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn direction(mut self, direction: SortDirection) -> Self {
        self.spec.direction = Some(direction);
        self
    }

    /// Descending sort-key order.
    pub fn desc(self) -> Self {
        self.direction(SortDirection::Desc)
    }

    pub fn consistent_read(mut self, consistent_read: bool) -> Self {
        self.spec.consistent_read = Some(consistent_read);
        self
    }

    /// Resume after a previously returned cursor.
    pub fn start(mut self, cursor: impl Into<String>) -> Self {
        self.start_token = Some(cursor.into());
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    fn prepared(mut self) -> TheoryResult<(Arc<Session>, Arc<ModelDescriptor>, QuerySpec, CancellationToken)> {
        if let Some(token) = &self.start_token {
            self.spec.start = Some(Cursor::decode(token)?);
        }
        let cancel = self
            .token
            .unwrap_or_else(|| self.session.root_token.clone());
        Ok((self.session, self.descriptor, self.spec, cancel))
    }

    /// Fetch one page.
    pub async fn page(self) -> TheoryResult<Page<T>> {
        let (session, descriptor, spec, cancel) = self.prepared()?;
        let page = session.dispatcher.query(&descriptor, &spec, &cancel).await?;
        let mut items = Vec::with_capacity(page.items.len());
        for item in &page.items {
            items.push(decode(&descriptor, item)?);
        }
        Ok(Page {
            items,
            cursor: page.cursor.as_ref().map(Cursor::encode),
        })
    }

    /// Fetch every page and concatenate.
    pub async fn all(self) -> TheoryResult<Vec<T>> {
        let (session, descriptor, mut spec, cancel) = self.prepared()?;
        let mut items = Vec::new();
        loop {
            let page = session.dispatcher.query(&descriptor, &spec, &cancel).await?;
            for item in &page.items {
                items.push(decode(&descriptor, item)?);
            }
            match page.cursor {
                Some(cursor) => spec.start = Some(cursor),
                None => return Ok(items),
            }
        }
    }

    /// Fetch the first matching item; `ItemNotFound` when the page is
    /// empty.
    pub async fn first(mut self) -> TheoryResult<T> {
        self.spec.limit = Some(1);
        let table = self.descriptor.table_name.clone();
        let page = self.page().await?;
        page.items
            .into_iter()
            .next()
            .ok_or(TheoryError::ItemNotFound { table })
    }

    /// Count matching items using key conditions (and any filter) without
    /// materializing them.
    pub async fn count(mut self) -> TheoryResult<usize> {
        self.spec.count_only = true;
        let (session, descriptor, mut spec, cancel) = self.prepared()?;
        let mut total = 0;
        loop {
            let page = session.dispatcher.query(&descriptor, &spec, &cancel).await?;
            total += page.count;
            match page.cursor {
                Some(cursor) => spec.start = Some(cursor),
                None => return Ok(total),
            }
        }
    }
}

/// Builder for a scan.
pub struct ScanBuilder<T> {
    session: Arc<Session>,
    descriptor: Arc<ModelDescriptor>,
    spec: ScanSpec,
    start_token: Option<String>,
    token: Option<CancellationToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> ScanBuilder<T> {
    pub fn filter(mut self, filter: Filter) -> Self {
        self.spec.filter = Some(filter);
        self
    }

    pub fn project<I: IntoIterator<Item = S>, S: Into<String>>(mut self, paths: I) -> Self {
        self.spec.projection = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn limit(mut self, limit: u32) -> Self {
        self.spec.limit = Some(limit);
        self
    }

    pub fn consistent_read(mut self, consistent_read: bool) -> Self {
        self.spec.consistent_read = Some(consistent_read);
        self
    }

    /// Scan one slice of a parallel scan.
    pub fn segment(mut self, segment: u32, total_segments: u32) -> Self {
        self.spec.segment = Some((segment, total_segments));
        self
    }

    pub fn start(mut self, cursor: impl Into<String>) -> Self {
        self.start_token = Some(cursor.into());
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Fetch one page.
    pub async fn page(mut self) -> TheoryResult<Page<T>> {
        if let Some(token) = &self.start_token {
            self.spec.start = Some(Cursor::decode(token)?);
        }
        let cancel = self
            .token
            .unwrap_or_else(|| self.session.root_token.clone());
        let page = self
            .session
            .dispatcher
            .scan(&self.descriptor, &self.spec, &cancel)
            .await?;
        let mut items = Vec::with_capacity(page.items.len());
        for item in &page.items {
            items.push(decode(&self.descriptor, item)?);
        }
        Ok(Page {
            items,
            cursor: page.cursor.as_ref().map(Cursor::encode),
        })
    }

    /// Fetch every page and concatenate.
    pub async fn all(mut self) -> TheoryResult<Vec<T>> {
        if let Some(token) = &self.start_token {
            self.spec.start = Some(Cursor::decode(token)?);
        }
        let cancel = self
            .token
            .unwrap_or_else(|| self.session.root_token.clone());
        let mut items = Vec::new();
        loop {
            let page = self
                .session
                .dispatcher
                .scan(&self.descriptor, &self.spec, &cancel)
                .await?;
            for item in &page.items {
                items.push(decode(&self.descriptor, item)?);
            }
            match page.cursor {
                Some(cursor) => self.spec.start = Some(cursor),
                None => return Ok(items),
            }
        }
    }
}

/// Builder for a batch get.
pub struct BatchGetBuilder<T> {
    session: Arc<Session>,
    descriptor: Arc<ModelDescriptor>,
    keys: Vec<Key>,
    consistent_read: Option<bool>,
    progress: Option<ProgressFn>,
    token: Option<CancellationToken>,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Model> BatchGetBuilder<T> {
    pub fn consistent_read(mut self, consistent_read: bool) -> Self {
        self.consistent_read = Some(consistent_read);
        self
    }

    /// Observe progress after each completed chunk as `(retrieved, total)`.
    pub fn on_progress<F: Fn(usize, usize) + Send + Sync + 'static>(mut self, callback: F) -> Self {
        self.progress = Some(Box::new(callback));
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Fetch all keys; results come back in input key order and missing
    /// keys are absent from the output.
    pub async fn exec(self) -> TheoryResult<Vec<T>> {
        let token = self
            .token
            .unwrap_or_else(|| self.session.root_token.clone());
        let operation = BatchGetOperation {
            dispatcher: &self.session.dispatcher,
            descriptor: Arc::clone(&self.descriptor),
            keys: self.keys,
            consistent_read: self.consistent_read,
            progress: self.progress,
            token,
        };
        let items = operation.run().await?;
        let mut out = Vec::with_capacity(items.len());
        for item in &items {
            out.push(decode(&self.descriptor, item)?);
        }
        Ok(out)
    }
}
