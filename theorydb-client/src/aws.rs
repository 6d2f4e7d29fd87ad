//! AWS DynamoDB store adapter.

use crate::store::{
    BatchGetInput, BatchGetOutput, BatchWriteInput, BatchWriteOutput, DeleteInput, ExprParts,
    GetInput, IndexSpec, PutInput, QueryInput, QueryOutput, ScanInput, StoreClient,
    TableDescription, TableSpec, TransactItem, TransactWriteInput, UpdateInput, UpdateOutput,
    WriteRequest,
};
use async_trait::async_trait;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::primitives::Blob;
use aws_sdk_dynamodb::types::{
    AttributeDefinition, AttributeValue as AwsAttributeValue, BillingMode, ConditionCheck, Delete,
    DeleteRequest, GlobalSecondaryIndex, KeySchemaElement, KeyType, KeysAndAttributes,
    LocalSecondaryIndex, Projection as AwsProjection, ProjectionType, Put, PutRequest,
    ReturnValue, ScalarAttributeType, Select, TransactWriteItem, Update as AwsUpdate,
    WriteRequest as AwsWriteRequest,
};
use aws_sdk_dynamodb::Client;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use theorydb_core::{
    AttributeType, AttributeValue, CancellationReason, Item, TheoryConfig, TheoryError,
    TheoryResult,
};

/// [`StoreClient`] over the AWS DynamoDB SDK.
#[derive(Debug, Clone)]
pub struct AwsStore {
    client: Client,
}

impl AwsStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

/// Load the SDK configuration honoring the session's region, endpoint, and
/// transport timeouts.
pub(crate) async fn load_sdk_config(config: &TheoryConfig) -> aws_config::SdkConfig {
    let timeouts = aws_config::timeout::TimeoutConfig::builder()
        .operation_timeout(config.http.timeout)
        .connect_timeout(config.http.connection_timeout)
        .build();
    let mut loader =
        aws_config::defaults(aws_config::BehaviorVersion::latest()).timeout_config(timeouts);
    if let Some(region) = &config.region {
        loader = loader.region(aws_config::Region::new(region.clone()));
    }
    if let Some(endpoint) = &config.endpoint {
        loader = loader.endpoint_url(endpoint.clone());
    }
    if let Some(profile) = &config.credentials_profile {
        loader = loader.profile_name(profile.clone());
    }
    loader.load().await
}

// ============================================================================
// VALUE CONVERSION
// ============================================================================

fn to_aws(value: &AttributeValue) -> AwsAttributeValue {
    match value {
        AttributeValue::S(s) => AwsAttributeValue::S(s.clone()),
        AttributeValue::N(n) => AwsAttributeValue::N(n.clone()),
        AttributeValue::B(b) => AwsAttributeValue::B(Blob::new(b.to_vec())),
        AttributeValue::Bool(b) => AwsAttributeValue::Bool(*b),
        AttributeValue::Null => AwsAttributeValue::Null(true),
        AttributeValue::M(m) => AwsAttributeValue::M(
            m.iter().map(|(k, v)| (k.clone(), to_aws(v))).collect(),
        ),
        AttributeValue::L(l) => AwsAttributeValue::L(l.iter().map(to_aws).collect()),
        AttributeValue::Ss(s) => AwsAttributeValue::Ss(s.clone()),
        AttributeValue::Ns(s) => AwsAttributeValue::Ns(s.clone()),
        AttributeValue::Bs(s) => {
            AwsAttributeValue::Bs(s.iter().map(|b| Blob::new(b.to_vec())).collect())
        }
    }
}

fn from_aws(value: &AwsAttributeValue) -> TheoryResult<AttributeValue> {
    let unsupported = || TheoryError::InternalStoreError {
        code: None,
        message: "store returned an attribute value of an unknown type".into(),
    };
    Ok(match value {
        AwsAttributeValue::S(s) => AttributeValue::S(s.clone()),
        AwsAttributeValue::N(n) => AttributeValue::N(n.clone()),
        AwsAttributeValue::B(b) => AttributeValue::B(Bytes::from(b.clone().into_inner())),
        AwsAttributeValue::Bool(b) => AttributeValue::Bool(*b),
        AwsAttributeValue::Null(_) => AttributeValue::Null,
        AwsAttributeValue::M(m) => {
            let mut out = BTreeMap::new();
            for (k, v) in m {
                out.insert(k.clone(), from_aws(v)?);
            }
            AttributeValue::M(out)
        }
        AwsAttributeValue::L(l) => {
            AttributeValue::L(l.iter().map(from_aws).collect::<TheoryResult<_>>()?)
        }
        AwsAttributeValue::Ss(s) => AttributeValue::Ss(s.clone()),
        AwsAttributeValue::Ns(s) => AttributeValue::Ns(s.clone()),
        AwsAttributeValue::Bs(s) => AttributeValue::Bs(
            s.iter()
                .map(|b| Bytes::from(b.clone().into_inner()))
                .collect(),
        ),
        _ => return Err(unsupported()),
    })
}

fn item_to_aws(item: &Item) -> HashMap<String, AwsAttributeValue> {
    item.iter().map(|(k, v)| (k.clone(), to_aws(v))).collect()
}

fn item_from_aws(item: &HashMap<String, AwsAttributeValue>) -> TheoryResult<Item> {
    let mut out = Item::new();
    for (k, v) in item {
        out.insert(k.clone(), from_aws(v)?);
    }
    Ok(out)
}

fn expr_names(expr: &ExprParts) -> Option<HashMap<String, String>> {
    (!expr.names.is_empty()).then(|| expr.names.clone())
}

fn expr_values(expr: &ExprParts) -> Option<HashMap<String, AwsAttributeValue>> {
    (!expr.values.is_empty())
        .then(|| expr.values.iter().map(|(k, v)| (k.clone(), to_aws(v))).collect())
}

// ============================================================================
// ERROR CLASSIFICATION
// ============================================================================

fn classify<E: ProvideErrorMetadata>(
    table: &str,
    operation: &str,
    err: &E,
) -> TheoryError {
    match err.code() {
        Some("ConditionalCheckFailedException") => TheoryError::ConditionFailed {
            table: table.to_string(),
            operation: operation.to_string(),
        },
        Some("ProvisionedThroughputExceededException")
        | Some("ThrottlingException")
        | Some("RequestLimitExceeded") => TheoryError::Throttled {
            table: table.to_string(),
        },
        Some("ResourceNotFoundException") => TheoryError::ResourceNotFound {
            resource: table.to_string(),
        },
        code => TheoryError::InternalStoreError {
            code: code.map(str::to_string),
            message: err
                .message()
                .unwrap_or("store request failed")
                .to_string(),
        },
    }
}

fn build_error(operation: &str, message: impl std::fmt::Display) -> TheoryError {
    TheoryError::InternalStoreError {
        code: None,
        message: format!("{operation}: {message}"),
    }
}

// ============================================================================
// STORE CLIENT IMPLEMENTATION
// ============================================================================

#[async_trait]
impl StoreClient for AwsStore {
    async fn put(&self, input: PutInput) -> TheoryResult<()> {
        self.client
            .put_item()
            .table_name(&input.table)
            .set_item(Some(item_to_aws(&input.item)))
            .set_condition_expression(input.condition.clone())
            .set_expression_attribute_names(expr_names(&input.expr))
            .set_expression_attribute_values(expr_values(&input.expr))
            .send()
            .await
            .map_err(|e| classify(&input.table, "put", &e))?;
        Ok(())
    }

    async fn get(&self, input: GetInput) -> TheoryResult<Option<Item>> {
        let out = self
            .client
            .get_item()
            .table_name(&input.table)
            .set_key(Some(item_to_aws(&input.key)))
            .consistent_read(input.consistent_read)
            .set_projection_expression(input.projection.clone())
            .set_expression_attribute_names(expr_names(&input.expr))
            .send()
            .await
            .map_err(|e| classify(&input.table, "get", &e))?;
        out.item().map(item_from_aws).transpose()
    }

    async fn update(&self, input: UpdateInput) -> TheoryResult<UpdateOutput> {
        let out = self
            .client
            .update_item()
            .table_name(&input.table)
            .set_key(Some(item_to_aws(&input.key)))
            .update_expression(&input.update)
            .set_condition_expression(input.condition.clone())
            .set_expression_attribute_names(expr_names(&input.expr))
            .set_expression_attribute_values(expr_values(&input.expr))
            .return_values(ReturnValue::AllNew)
            .send()
            .await
            .map_err(|e| classify(&input.table, "update", &e))?;
        Ok(UpdateOutput {
            item: out.attributes().map(item_from_aws).transpose()?,
        })
    }

    async fn delete(&self, input: DeleteInput) -> TheoryResult<()> {
        self.client
            .delete_item()
            .table_name(&input.table)
            .set_key(Some(item_to_aws(&input.key)))
            .set_condition_expression(input.condition.clone())
            .set_expression_attribute_names(expr_names(&input.expr))
            .set_expression_attribute_values(expr_values(&input.expr))
            .send()
            .await
            .map_err(|e| classify(&input.table, "delete", &e))?;
        Ok(())
    }

    async fn query(&self, input: QueryInput) -> TheoryResult<QueryOutput> {
        let mut request = self
            .client
            .query()
            .table_name(&input.table)
            .set_index_name(input.index.clone())
            .key_condition_expression(&input.key_condition)
            .set_filter_expression(input.filter.clone())
            .set_projection_expression(input.projection.clone())
            .set_expression_attribute_names(expr_names(&input.expr))
            .set_expression_attribute_values(expr_values(&input.expr))
            .scan_index_forward(input.scan_forward)
            .consistent_read(input.consistent_read)
            .set_limit(input.limit.map(|l| l as i32))
            .set_exclusive_start_key(input.exclusive_start_key.as_ref().map(item_to_aws));
        if input.count_only {
            request = request.select(Select::Count);
        }
        let out = request
            .send()
            .await
            .map_err(|e| classify(&input.table, "query", &e))?;

        let mut items = Vec::with_capacity(out.items().len());
        for item in out.items() {
            items.push(item_from_aws(item)?);
        }
        Ok(QueryOutput {
            items,
            count: out.count() as usize,
            last_evaluated_key: out.last_evaluated_key().map(item_from_aws).transpose()?,
        })
    }

    async fn scan(&self, input: ScanInput) -> TheoryResult<QueryOutput> {
        let request = self
            .client
            .scan()
            .table_name(&input.table)
            .set_index_name(input.index.clone())
            .set_filter_expression(input.filter.clone())
            .set_projection_expression(input.projection.clone())
            .set_expression_attribute_names(expr_names(&input.expr))
            .set_expression_attribute_values(expr_values(&input.expr))
            .consistent_read(input.consistent_read)
            .set_limit(input.limit.map(|l| l as i32))
            .set_exclusive_start_key(input.exclusive_start_key.as_ref().map(item_to_aws))
            .set_segment(input.segment.map(|(segment, _)| segment as i32))
            .set_total_segments(input.segment.map(|(_, total)| total as i32));
        let out = request
            .send()
            .await
            .map_err(|e| classify(&input.table, "scan", &e))?;

        let mut items = Vec::with_capacity(out.items().len());
        for item in out.items() {
            items.push(item_from_aws(item)?);
        }
        Ok(QueryOutput {
            items,
            count: out.count() as usize,
            last_evaluated_key: out.last_evaluated_key().map(item_from_aws).transpose()?,
        })
    }

    async fn batch_get(&self, input: BatchGetInput) -> TheoryResult<BatchGetOutput> {
        let keys = input.keys.iter().map(item_to_aws).collect();
        let requests = KeysAndAttributes::builder()
            .set_keys(Some(keys))
            .consistent_read(input.consistent_read)
            .build()
            .map_err(|e| build_error("batch_get", e))?;
        let out = self
            .client
            .batch_get_item()
            .request_items(&input.table, requests)
            .send()
            .await
            .map_err(|e| classify(&input.table, "batch_get", &e))?;

        let mut items = Vec::new();
        if let Some(responses) = out.responses() {
            if let Some(found) = responses.get(&input.table) {
                for item in found {
                    items.push(item_from_aws(item)?);
                }
            }
        }
        let mut unprocessed_keys = Vec::new();
        if let Some(unprocessed) = out.unprocessed_keys() {
            if let Some(keys) = unprocessed.get(&input.table) {
                for key in keys.keys() {
                    unprocessed_keys.push(item_from_aws(key)?);
                }
            }
        }
        Ok(BatchGetOutput {
            items,
            unprocessed_keys,
        })
    }

    async fn batch_write(&self, input: BatchWriteInput) -> TheoryResult<BatchWriteOutput> {
        let mut by_table: HashMap<String, Vec<AwsWriteRequest>> = HashMap::new();
        let mut first_table = String::new();
        for (table, write) in &input.writes {
            if first_table.is_empty() {
                first_table = table.clone();
            }
            let request = match write {
                WriteRequest::Put { item } => AwsWriteRequest::builder()
                    .put_request(
                        PutRequest::builder()
                            .set_item(Some(item_to_aws(item)))
                            .build()
                            .map_err(|e| build_error("batch_write", e))?,
                    )
                    .build(),
                WriteRequest::Delete { key } => AwsWriteRequest::builder()
                    .delete_request(
                        DeleteRequest::builder()
                            .set_key(Some(item_to_aws(key)))
                            .build()
                            .map_err(|e| build_error("batch_write", e))?,
                    )
                    .build(),
            };
            by_table.entry(table.clone()).or_default().push(request);
        }

        let out = self
            .client
            .batch_write_item()
            .set_request_items(Some(by_table))
            .send()
            .await
            .map_err(|e| classify(&first_table, "batch_write", &e))?;

        let mut unprocessed = Vec::new();
        if let Some(remaining) = out.unprocessed_items() {
            for (table, requests) in remaining {
                for request in requests {
                    if let Some(put) = request.put_request() {
                        unprocessed.push((
                            table.clone(),
                            WriteRequest::Put {
                                item: item_from_aws(put.item())?,
                            },
                        ));
                    } else if let Some(delete) = request.delete_request() {
                        unprocessed.push((
                            table.clone(),
                            WriteRequest::Delete {
                                key: item_from_aws(delete.key())?,
                            },
                        ));
                    }
                }
            }
        }
        Ok(BatchWriteOutput { unprocessed })
    }

    async fn transact_write(&self, input: TransactWriteInput) -> TheoryResult<()> {
        let mut items = Vec::with_capacity(input.items.len());
        for item in &input.items {
            items.push(to_transact_item(item)?);
        }
        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;
        let err = match result {
            Ok(_) => return Ok(()),
            Err(err) => err,
        };

        // Pull per-operation reasons out of a canceled transaction before
        // generic classification.
        let service_err = err.into_service_error();
        if let TransactWriteItemsError::TransactionCanceledException(canceled) = &service_err {
            let reasons = canceled
                .cancellation_reasons()
                .iter()
                .map(|reason| CancellationReason {
                    code: reason.code().unwrap_or("None").to_string(),
                    message: reason.message().map(str::to_string),
                })
                .collect();
            return Err(TheoryError::TransactCanceled { reasons });
        }
        Err(classify("transaction", "transact_write", &service_err))
    }

    async fn create_table(&self, spec: TableSpec) -> TheoryResult<()> {
        let mut definitions = vec![attribute_definition(&spec.partition)?];
        let mut key_schema = vec![key_schema_element(&spec.partition.0, KeyType::Hash)?];
        if let Some(sort) = &spec.sort {
            definitions.push(attribute_definition(sort)?);
            key_schema.push(key_schema_element(&sort.0, KeyType::Range)?);
        }

        let mut global = Vec::new();
        for index in &spec.global_indexes {
            push_definition(&mut definitions, index)?;
            global.push(
                GlobalSecondaryIndex::builder()
                    .index_name(&index.name)
                    .set_key_schema(Some(index_key_schema(index)?))
                    .projection(index_projection(index))
                    .build()
                    .map_err(|e| build_error("create_table", e))?,
            );
        }
        let mut local = Vec::new();
        for index in &spec.local_indexes {
            push_definition(&mut definitions, index)?;
            local.push(
                LocalSecondaryIndex::builder()
                    .index_name(&index.name)
                    .set_key_schema(Some(index_key_schema(index)?))
                    .projection(index_projection(index))
                    .build()
                    .map_err(|e| build_error("create_table", e))?,
            );
        }

        self.client
            .create_table()
            .table_name(&spec.table)
            .set_attribute_definitions(Some(definitions))
            .set_key_schema(Some(key_schema))
            .set_global_secondary_indexes((!global.is_empty()).then_some(global))
            .set_local_secondary_indexes((!local.is_empty()).then_some(local))
            .billing_mode(BillingMode::PayPerRequest)
            .send()
            .await
            .map_err(|e| classify(&spec.table, "create_table", &e))?;
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> TheoryResult<()> {
        self.client
            .delete_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| classify(table, "delete_table", &e))?;
        Ok(())
    }

    async fn describe_table(&self, table: &str) -> TheoryResult<TableDescription> {
        let out = self
            .client
            .describe_table()
            .table_name(table)
            .send()
            .await
            .map_err(|e| classify(table, "describe_table", &e))?;
        let description = out.table().ok_or_else(|| TheoryError::ResourceNotFound {
            resource: table.to_string(),
        })?;
        Ok(TableDescription {
            table: table.to_string(),
            status: description
                .table_status()
                .map(|s| s.as_str().to_string())
                .unwrap_or_default(),
            item_count: description.item_count().unwrap_or_default(),
        })
    }
}

fn to_transact_item(item: &TransactItem) -> TheoryResult<TransactWriteItem> {
    let built = match item {
        TransactItem::Put {
            table,
            item,
            condition,
            expr,
        } => TransactWriteItem::builder()
            .put(
                Put::builder()
                    .table_name(table)
                    .set_item(Some(item_to_aws(item)))
                    .set_condition_expression(condition.clone())
                    .set_expression_attribute_names(expr_names(expr))
                    .set_expression_attribute_values(expr_values(expr))
                    .build()
                    .map_err(|e| build_error("transact_write", e))?,
            )
            .build(),
        TransactItem::Update {
            table,
            key,
            update,
            condition,
            expr,
        } => TransactWriteItem::builder()
            .update(
                AwsUpdate::builder()
                    .table_name(table)
                    .set_key(Some(item_to_aws(key)))
                    .update_expression(update)
                    .set_condition_expression(condition.clone())
                    .set_expression_attribute_names(expr_names(expr))
                    .set_expression_attribute_values(expr_values(expr))
                    .build()
                    .map_err(|e| build_error("transact_write", e))?,
            )
            .build(),
        TransactItem::Delete {
            table,
            key,
            condition,
            expr,
        } => TransactWriteItem::builder()
            .delete(
                Delete::builder()
                    .table_name(table)
                    .set_key(Some(item_to_aws(key)))
                    .set_condition_expression(condition.clone())
                    .set_expression_attribute_names(expr_names(expr))
                    .set_expression_attribute_values(expr_values(expr))
                    .build()
                    .map_err(|e| build_error("transact_write", e))?,
            )
            .build(),
        TransactItem::ConditionCheck {
            table,
            key,
            condition,
            expr,
        } => TransactWriteItem::builder()
            .condition_check(
                ConditionCheck::builder()
                    .table_name(table)
                    .set_key(Some(item_to_aws(key)))
                    .condition_expression(condition)
                    .set_expression_attribute_names(expr_names(expr))
                    .set_expression_attribute_values(expr_values(expr))
                    .build()
                    .map_err(|e| build_error("transact_write", e))?,
            )
            .build(),
    };
    Ok(built)
}

fn scalar_type(attr_type: AttributeType) -> TheoryResult<ScalarAttributeType> {
    match attr_type {
        AttributeType::S => Ok(ScalarAttributeType::S),
        AttributeType::N => Ok(ScalarAttributeType::N),
        AttributeType::B => Ok(ScalarAttributeType::B),
        other => Err(TheoryError::InvalidModel {
            model: String::new(),
            reason: format!("key attributes must be scalar, got {}", other.code()),
        }),
    }
}

fn attribute_definition(key: &(String, AttributeType)) -> TheoryResult<AttributeDefinition> {
    AttributeDefinition::builder()
        .attribute_name(&key.0)
        .attribute_type(scalar_type(key.1)?)
        .build()
        .map_err(|e| build_error("create_table", e))
}

fn key_schema_element(name: &str, key_type: KeyType) -> TheoryResult<KeySchemaElement> {
    KeySchemaElement::builder()
        .attribute_name(name)
        .key_type(key_type)
        .build()
        .map_err(|e| build_error("create_table", e))
}

fn push_definition(
    definitions: &mut Vec<AttributeDefinition>,
    index: &IndexSpec,
) -> TheoryResult<()> {
    for key in std::iter::once(&index.partition).chain(index.sort.iter()) {
        let definition = attribute_definition(key)?;
        if !definitions
            .iter()
            .any(|d| d.attribute_name() == definition.attribute_name())
        {
            definitions.push(definition);
        }
    }
    Ok(())
}

fn index_key_schema(index: &IndexSpec) -> TheoryResult<Vec<KeySchemaElement>> {
    let mut schema = vec![key_schema_element(&index.partition.0, KeyType::Hash)?];
    if let Some(sort) = &index.sort {
        schema.push(key_schema_element(&sort.0, KeyType::Range)?);
    }
    Ok(schema)
}

fn index_projection(index: &IndexSpec) -> AwsProjection {
    let builder = if index.projection_all {
        AwsProjection::builder().projection_type(ProjectionType::All)
    } else if index.projection_include.is_empty() {
        AwsProjection::builder().projection_type(ProjectionType::KeysOnly)
    } else {
        AwsProjection::builder()
            .projection_type(ProjectionType::Include)
            .set_non_key_attributes(Some(index.projection_include.clone()))
    };
    builder.build()
}
