//! The store boundary: typed requests and responses.
//!
//! Everything above this trait speaks in compiled expression strings plus
//! placeholder maps, exactly what goes on the wire. The AWS adapter maps
//! these to DynamoDB calls; the in-memory [`MockStore`](crate::MockStore)
//! interprets the same inputs for tests.

use async_trait::async_trait;
use std::collections::HashMap;
use theorydb_core::{AttributeType, AttributeValue, Item, TheoryResult};

/// Store limit: keys per `BatchGetItem` request.
pub const BATCH_GET_LIMIT: usize = 100;
/// Store limit: writes per `BatchWriteItem` request.
pub const BATCH_WRITE_LIMIT: usize = 25;
/// Store limit: operations per `TransactWriteItems` request.
pub const TRANSACT_LIMIT: usize = 100;

/// Expression placeholder maps shared by every expression of one request.
#[derive(Debug, Clone, Default)]
pub struct ExprParts {
    pub names: HashMap<String, String>,
    pub values: HashMap<String, AttributeValue>,
}

impl ExprParts {
    pub fn is_empty(&self) -> bool {
        self.names.is_empty() && self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct PutInput {
    pub table: String,
    pub item: Item,
    pub condition: Option<String>,
    pub expr: ExprParts,
}

#[derive(Debug, Clone)]
pub struct GetInput {
    pub table: String,
    pub key: Item,
    pub consistent_read: bool,
    pub projection: Option<String>,
    pub expr: ExprParts,
}

#[derive(Debug, Clone)]
pub struct UpdateInput {
    pub table: String,
    pub key: Item,
    pub update: String,
    pub condition: Option<String>,
    pub expr: ExprParts,
}

#[derive(Debug, Clone)]
pub struct UpdateOutput {
    /// The item after the update (`ALL_NEW`).
    pub item: Option<Item>,
}

#[derive(Debug, Clone)]
pub struct DeleteInput {
    pub table: String,
    pub key: Item,
    pub condition: Option<String>,
    pub expr: ExprParts,
}

#[derive(Debug, Clone)]
pub struct QueryInput {
    pub table: String,
    pub index: Option<String>,
    pub key_condition: String,
    pub filter: Option<String>,
    pub projection: Option<String>,
    pub expr: ExprParts,
    pub limit: Option<u32>,
    /// `true` = ascending sort-key order.
    pub scan_forward: bool,
    pub consistent_read: bool,
    pub exclusive_start_key: Option<Item>,
    /// `Select COUNT`: return no items, only the matched count.
    pub count_only: bool,
}

#[derive(Debug, Clone, Default)]
pub struct QueryOutput {
    pub items: Vec<Item>,
    pub count: usize,
    pub last_evaluated_key: Option<Item>,
}

#[derive(Debug, Clone)]
pub struct ScanInput {
    pub table: String,
    pub index: Option<String>,
    pub filter: Option<String>,
    pub projection: Option<String>,
    pub expr: ExprParts,
    pub limit: Option<u32>,
    pub consistent_read: bool,
    pub exclusive_start_key: Option<Item>,
    /// Parallel scan slice: `(segment, total_segments)`.
    pub segment: Option<(u32, u32)>,
}

#[derive(Debug, Clone)]
pub struct BatchGetInput {
    pub table: String,
    pub keys: Vec<Item>,
    pub consistent_read: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BatchGetOutput {
    pub items: Vec<Item>,
    pub unprocessed_keys: Vec<Item>,
}

/// One request of a `BatchWriteItem` call.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteRequest {
    Put { item: Item },
    Delete { key: Item },
}

#[derive(Debug, Clone)]
pub struct BatchWriteInput {
    /// `(table, request)` pairs; the adapter groups by table.
    pub writes: Vec<(String, WriteRequest)>,
}

#[derive(Debug, Clone, Default)]
pub struct BatchWriteOutput {
    pub unprocessed: Vec<(String, WriteRequest)>,
}

/// One operation of a `TransactWriteItems` call.
#[derive(Debug, Clone)]
pub enum TransactItem {
    Put {
        table: String,
        item: Item,
        condition: Option<String>,
        expr: ExprParts,
    },
    Update {
        table: String,
        key: Item,
        update: String,
        condition: Option<String>,
        expr: ExprParts,
    },
    Delete {
        table: String,
        key: Item,
        condition: Option<String>,
        expr: ExprParts,
    },
    ConditionCheck {
        table: String,
        key: Item,
        condition: String,
        expr: ExprParts,
    },
}

#[derive(Debug, Clone)]
pub struct TransactWriteInput {
    pub items: Vec<TransactItem>,
}

/// Key and index layout needed to create a table, derived from a frozen
/// descriptor.
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub table: String,
    pub partition: (String, AttributeType),
    pub sort: Option<(String, AttributeType)>,
    pub global_indexes: Vec<IndexSpec>,
    pub local_indexes: Vec<IndexSpec>,
}

impl TableSpec {
    /// Derive the table layout from a frozen descriptor.
    pub fn from_descriptor(descriptor: &theorydb_core::ModelDescriptor) -> TheoryResult<Self> {
        use theorydb_core::{IndexType, Projection, TheoryError};

        let attr_type = |name: &str| -> TheoryResult<(String, AttributeType)> {
            descriptor
                .attribute(name)
                .map(|a| (a.attribute.clone(), a.attr_type))
                .ok_or_else(|| TheoryError::InvalidModel {
                    model: descriptor.name.clone(),
                    reason: format!("key attribute {name:?} is not declared"),
                })
        };

        let mut global_indexes = Vec::new();
        let mut local_indexes = Vec::new();
        for index in &descriptor.indexes {
            let (projection_all, projection_include) = match &index.projection {
                Projection::All => (true, Vec::new()),
                Projection::KeysOnly => (false, Vec::new()),
                Projection::Include(paths) => (false, paths.clone()),
            };
            let spec = IndexSpec {
                name: index.name.clone(),
                partition: attr_type(&index.partition)?,
                sort: match &index.sort {
                    Some(sort) => Some(attr_type(sort)?),
                    None => None,
                },
                projection_all,
                projection_include,
            };
            match index.index_type {
                IndexType::Gsi => global_indexes.push(spec),
                IndexType::Lsi => local_indexes.push(spec),
            }
        }

        Ok(Self {
            table: descriptor.table_name.clone(),
            partition: attr_type(&descriptor.keys.partition)?,
            sort: match &descriptor.keys.sort {
                Some(sort) => Some(attr_type(sort)?),
                None => None,
            },
            global_indexes,
            local_indexes,
        })
    }
}

#[derive(Debug, Clone)]
pub struct IndexSpec {
    pub name: String,
    pub partition: (String, AttributeType),
    pub sort: Option<(String, AttributeType)>,
    /// `true` projects all attributes, `false` keys only; include lists are
    /// carried separately.
    pub projection_all: bool,
    pub projection_include: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct TableDescription {
    pub table: String,
    pub status: String,
    pub item_count: i64,
}

/// The request/response surface of the document store.
///
/// Implementations classify their faults into the crate error kinds;
/// throttling is reported as `Throttled` and retried by the callers that
/// own retry policy, never inside an implementation.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn put(&self, input: PutInput) -> TheoryResult<()>;
    async fn get(&self, input: GetInput) -> TheoryResult<Option<Item>>;
    async fn update(&self, input: UpdateInput) -> TheoryResult<UpdateOutput>;
    async fn delete(&self, input: DeleteInput) -> TheoryResult<()>;
    async fn query(&self, input: QueryInput) -> TheoryResult<QueryOutput>;
    async fn scan(&self, input: ScanInput) -> TheoryResult<QueryOutput>;
    async fn batch_get(&self, input: BatchGetInput) -> TheoryResult<BatchGetOutput>;
    async fn batch_write(&self, input: BatchWriteInput) -> TheoryResult<BatchWriteOutput>;
    async fn transact_write(&self, input: TransactWriteInput) -> TheoryResult<()>;
    async fn create_table(&self, spec: TableSpec) -> TheoryResult<()>;
    async fn delete_table(&self, table: &str) -> TheoryResult<()>;
    async fn describe_table(&self, table: &str) -> TheoryResult<TableDescription>;
}
