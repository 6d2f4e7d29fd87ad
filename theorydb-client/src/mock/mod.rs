//! In-memory store implementation.
//!
//! Backs every test suite in the workspace. Honors the same inputs the AWS
//! adapter sends: rendered expression strings with placeholder maps are
//! interpreted (see [`eval`]), conditional writes fail with
//! `ConditionFailed`, queries respect sort order, limits, and start keys,
//! and batch endpoints can be told to throttle or leave items unprocessed
//! to exercise the retry paths.

mod eval;

use crate::store::{
    BatchGetInput, BatchGetOutput, BatchWriteInput, BatchWriteOutput, DeleteInput, ExprParts,
    GetInput, IndexSpec, PutInput, QueryInput, QueryOutput, ScanInput, StoreClient,
    TableDescription, TableSpec, TransactItem, TransactWriteInput, UpdateInput, UpdateOutput,
    WriteRequest,
};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Mutex, RwLock};
use theorydb_core::{
    AttributeValue, CancellationReason, Item, TheoryError, TheoryResult,
};

#[derive(Debug, Clone)]
struct MockTable {
    spec: TableSpec,
    items: Vec<Item>,
}

/// In-memory [`StoreClient`] with failure injection and a call log.
#[derive(Default)]
pub struct MockStore {
    tables: RwLock<HashMap<String, MockTable>>,
    calls: Mutex<Vec<String>>,
    throttle_plan: AtomicU32,
    unprocessed_plan: Mutex<VecDeque<usize>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every store operation recorded so far, in call order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// How many times the named operation ran.
    pub fn call_count(&self, operation: &str) -> usize {
        self.calls()
            .iter()
            .filter(|call| *call == operation)
            .count()
    }

    /// Throttle the next `n` store calls (any operation).
    pub fn throttle_next(&self, n: u32) {
        self.throttle_plan.store(n, AtomicOrdering::SeqCst);
    }

    /// For each upcoming batch call, leave that many of its inputs
    /// unprocessed (consumed front to back).
    pub fn leave_unprocessed(&self, counts: Vec<usize>) {
        let mut plan = self
            .unprocessed_plan
            .lock()
            .unwrap_or_else(|e| e.into_inner());
        plan.clear();
        plan.extend(counts);
    }

    /// Read a stored item verbatim (no decoding, no decryption).
    pub fn raw_item(&self, table: &str, key: &Item) -> Option<Item> {
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables.get(table)?;
        let index = find_item(table, key)?;
        Some(table.items[index].clone())
    }

    /// Overwrite a stored item verbatim (test seeding and tampering).
    pub fn put_raw_item(&self, table: &str, item: Item) -> TheoryResult<()> {
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables.get_mut(table).ok_or_else(|| {
            TheoryError::ResourceNotFound {
                resource: table.to_string(),
            }
        })?;
        let key = key_only(&table.spec, &item);
        match find_item(table, &key) {
            Some(index) => table.items[index] = item,
            None => table.items.push(item),
        }
        Ok(())
    }

    fn record(&self, operation: &str) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(operation.to_string());
    }

    fn maybe_throttle(&self, table: &str) -> TheoryResult<()> {
        let remaining = self.throttle_plan.load(AtomicOrdering::SeqCst);
        if remaining > 0
            && self
                .throttle_plan
                .compare_exchange(
                    remaining,
                    remaining - 1,
                    AtomicOrdering::SeqCst,
                    AtomicOrdering::SeqCst,
                )
                .is_ok()
        {
            return Err(TheoryError::Throttled {
                table: table.to_string(),
            });
        }
        Ok(())
    }

    fn take_unprocessed(&self) -> usize {
        self.unprocessed_plan
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front()
            .unwrap_or(0)
    }
}

fn key_only(spec: &TableSpec, item: &Item) -> Item {
    let mut key = Item::new();
    if let Some(value) = item.get(&spec.partition.0) {
        key.insert(spec.partition.0.clone(), value.clone());
    }
    if let Some((sort, _)) = &spec.sort {
        if let Some(value) = item.get(sort) {
            key.insert(sort.clone(), value.clone());
        }
    }
    key
}

fn find_item(table: &MockTable, key: &Item) -> Option<usize> {
    table
        .items
        .iter()
        .position(|item| key.iter().all(|(attr, value)| item.get(attr) == Some(value)))
}

fn scope_keys<'a>(
    table: &'a MockTable,
    index: Option<&str>,
) -> TheoryResult<(&'a str, Option<&'a str>)> {
    match index {
        None => Ok((
            table.spec.partition.0.as_str(),
            table.spec.sort.as_ref().map(|(name, _)| name.as_str()),
        )),
        Some(name) => {
            let found: Option<&IndexSpec> = table
                .spec
                .global_indexes
                .iter()
                .chain(table.spec.local_indexes.iter())
                .find(|ix| ix.name == name);
            let spec = found.ok_or_else(|| TheoryError::ResourceNotFound {
                resource: name.to_string(),
            })?;
            Ok((
                spec.partition.0.as_str(),
                spec.sort.as_ref().map(|(n, _)| n.as_str()),
            ))
        }
    }
}

fn sort_items(items: &mut [Item], sort_attr: Option<&str>, forward: bool) {
    if let Some(attr) = sort_attr {
        items.sort_by(|a, b| match (a.get(attr), b.get(attr)) {
            (Some(a), Some(b)) => compare_values(a, b),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
    }
    if !forward {
        items.reverse();
    }
}

fn compare_values(a: &AttributeValue, b: &AttributeValue) -> Ordering {
    match (a, b) {
        (AttributeValue::N(a), AttributeValue::N(b)) => {
            match (a.parse::<f64>(), b.parse::<f64>()) {
                (Ok(a), Ok(b)) => a.partial_cmp(&b).unwrap_or(Ordering::Equal),
                _ => a.cmp(b),
            }
        }
        (AttributeValue::S(a), AttributeValue::S(b)) => a.cmp(b),
        (AttributeValue::B(a), AttributeValue::B(b)) => a.cmp(b),
        _ => Ordering::Equal,
    }
}

/// Cut a sorted item list at the exclusive start key and apply the limit.
/// Returns the page plus the last evaluated key when more items remain.
fn paginate(
    items: Vec<Item>,
    start: Option<&Item>,
    limit: Option<u32>,
    key_attrs: &[&str],
) -> (Vec<Item>, Option<Item>) {
    let mut remaining: Vec<Item> = match start {
        Some(start_key) => {
            let position = items.iter().position(|item| {
                start_key
                    .iter()
                    .all(|(attr, value)| item.get(attr) == Some(value))
            });
            match position {
                Some(index) => items.into_iter().skip(index + 1).collect(),
                None => items,
            }
        }
        None => items,
    };

    let limit = limit.map(|l| l as usize).unwrap_or(usize::MAX);
    if remaining.len() > limit {
        let page: Vec<Item> = remaining.drain(..limit).collect();
        let last = page.last().map(|item| {
            let mut key = Item::new();
            for attr in key_attrs {
                if let Some(value) = item.get(*attr) {
                    key.insert((*attr).to_string(), value.clone());
                }
            }
            key
        });
        (page, last)
    } else {
        (remaining, None)
    }
}

fn project(items: &mut [Item], projection: Option<&str>, expr: &ExprParts) {
    let projection = match projection {
        Some(projection) => projection,
        None => return,
    };
    let mut roots = Vec::new();
    for part in projection.split(", ") {
        let root = part
            .split(['.', '['])
            .next()
            .unwrap_or(part);
        if let Some(actual) = expr.names.get(root) {
            roots.push(actual.clone());
        }
    }
    for item in items.iter_mut() {
        item.retain(|attr, _| roots.iter().any(|root| root == attr));
    }
}

fn eval_opt_condition(
    condition: Option<&str>,
    expr: &ExprParts,
    existing: Option<&Item>,
) -> TheoryResult<bool> {
    match condition {
        Some(condition) => eval::eval_condition(condition, &expr.names, &expr.values, existing),
        None => Ok(true),
    }
}

#[async_trait]
impl StoreClient for MockStore {
    async fn put(&self, input: PutInput) -> TheoryResult<()> {
        self.record("put");
        self.maybe_throttle(&input.table)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get_mut(&input.table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: input.table.clone(),
            })?;
        let key = key_only(&table.spec, &input.item);
        let position = find_item(table, &key);
        let existing = position.map(|index| &table.items[index]);
        if !eval_opt_condition(input.condition.as_deref(), &input.expr, existing)? {
            return Err(TheoryError::ConditionFailed {
                table: input.table.clone(),
                operation: "put".into(),
            });
        }
        match position {
            Some(index) => table.items[index] = input.item,
            None => table.items.push(input.item),
        }
        Ok(())
    }

    async fn get(&self, input: GetInput) -> TheoryResult<Option<Item>> {
        self.record("get");
        self.maybe_throttle(&input.table)?;
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get(&input.table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: input.table.clone(),
            })?;
        Ok(find_item(table, &input.key).map(|index| {
            let mut items = vec![table.items[index].clone()];
            project(&mut items, input.projection.as_deref(), &input.expr);
            items.remove(0)
        }))
    }

    async fn update(&self, input: UpdateInput) -> TheoryResult<UpdateOutput> {
        self.record("update");
        self.maybe_throttle(&input.table)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get_mut(&input.table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: input.table.clone(),
            })?;
        let position = find_item(table, &input.key);
        let existing = position.map(|index| &table.items[index]);
        if !eval_opt_condition(input.condition.as_deref(), &input.expr, existing)? {
            return Err(TheoryError::ConditionFailed {
                table: input.table.clone(),
                operation: "update".into(),
            });
        }
        // Updates upsert: a missing item starts from its key attributes.
        let mut item = match position {
            Some(index) => table.items[index].clone(),
            None => input.key.clone(),
        };
        eval::apply_update(&input.update, &input.expr.names, &input.expr.values, &mut item)?;
        match position {
            Some(index) => table.items[index] = item.clone(),
            None => table.items.push(item.clone()),
        }
        Ok(UpdateOutput { item: Some(item) })
    }

    async fn delete(&self, input: DeleteInput) -> TheoryResult<()> {
        self.record("delete");
        self.maybe_throttle(&input.table)?;
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get_mut(&input.table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: input.table.clone(),
            })?;
        let position = find_item(table, &input.key);
        let existing = position.map(|index| &table.items[index]);
        if !eval_opt_condition(input.condition.as_deref(), &input.expr, existing)? {
            return Err(TheoryError::ConditionFailed {
                table: input.table.clone(),
                operation: "delete".into(),
            });
        }
        if let Some(index) = position {
            table.items.remove(index);
        }
        Ok(())
    }

    async fn query(&self, input: QueryInput) -> TheoryResult<QueryOutput> {
        self.record("query");
        self.maybe_throttle(&input.table)?;
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get(&input.table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: input.table.clone(),
            })?;
        let (partition_attr, sort_attr) = scope_keys(table, input.index.as_deref())?;

        let mut matched: Vec<Item> = Vec::new();
        for item in &table.items {
            if eval::eval_condition(
                &input.key_condition,
                &input.expr.names,
                &input.expr.values,
                Some(item),
            )? {
                matched.push(item.clone());
            }
        }
        sort_items(&mut matched, sort_attr, input.scan_forward);

        // The last-evaluated key carries the scope keys plus the table keys.
        let mut key_attrs = vec![partition_attr];
        key_attrs.extend(sort_attr);
        let table_partition = table.spec.partition.0.as_str();
        if !key_attrs.contains(&table_partition) {
            key_attrs.push(table_partition);
        }
        if let Some((table_sort, _)) = &table.spec.sort {
            if !key_attrs.contains(&table_sort.as_str()) {
                key_attrs.push(table_sort.as_str());
            }
        }

        let (mut page, last_evaluated_key) = paginate(
            matched,
            input.exclusive_start_key.as_ref(),
            input.limit,
            &key_attrs,
        );

        if let Some(filter) = &input.filter {
            let mut kept = Vec::with_capacity(page.len());
            for item in page {
                if eval::eval_condition(filter, &input.expr.names, &input.expr.values, Some(&item))?
                {
                    kept.push(item);
                }
            }
            page = kept;
        }
        let count = page.len();
        if input.count_only {
            page.clear();
        } else {
            project(&mut page, input.projection.as_deref(), &input.expr);
        }
        Ok(QueryOutput {
            items: page,
            count,
            last_evaluated_key,
        })
    }

    async fn scan(&self, input: ScanInput) -> TheoryResult<QueryOutput> {
        self.record("scan");
        self.maybe_throttle(&input.table)?;
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get(&input.table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: input.table.clone(),
            })?;
        let (partition_attr, sort_attr) = scope_keys(table, input.index.as_deref())?;

        let mut matched: Vec<Item> = table.items.clone();
        // Deterministic scan order: partition then sort.
        matched.sort_by(|a, b| {
            let by_partition = match (a.get(partition_attr), b.get(partition_attr)) {
                (Some(a), Some(b)) => compare_values(a, b),
                _ => Ordering::Equal,
            };
            by_partition.then_with(|| match sort_attr {
                Some(attr) => match (a.get(attr), b.get(attr)) {
                    (Some(a), Some(b)) => compare_values(a, b),
                    _ => Ordering::Equal,
                },
                None => Ordering::Equal,
            })
        });
        if let Some((segment, total)) = input.segment {
            let total = total.max(1);
            matched = matched
                .into_iter()
                .enumerate()
                .filter(|(index, _)| (*index as u32) % total == segment)
                .map(|(_, item)| item)
                .collect();
        }

        let mut key_attrs = vec![partition_attr];
        key_attrs.extend(sort_attr);
        let (mut page, last_evaluated_key) = paginate(
            matched,
            input.exclusive_start_key.as_ref(),
            input.limit,
            &key_attrs,
        );

        if let Some(filter) = &input.filter {
            let mut kept = Vec::with_capacity(page.len());
            for item in page {
                if eval::eval_condition(filter, &input.expr.names, &input.expr.values, Some(&item))?
                {
                    kept.push(item);
                }
            }
            page = kept;
        }
        let count = page.len();
        project(&mut page, input.projection.as_deref(), &input.expr);
        Ok(QueryOutput {
            items: page,
            count,
            last_evaluated_key,
        })
    }

    async fn batch_get(&self, input: BatchGetInput) -> TheoryResult<BatchGetOutput> {
        self.record("batch_get");
        self.maybe_throttle(&input.table)?;
        let leave = self.take_unprocessed().min(input.keys.len());
        let processed = input.keys.len() - leave;

        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let table = tables
            .get(&input.table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: input.table.clone(),
            })?;
        let mut items = Vec::new();
        for key in &input.keys[..processed] {
            if let Some(index) = find_item(table, key) {
                items.push(table.items[index].clone());
            }
        }
        Ok(BatchGetOutput {
            items,
            unprocessed_keys: input.keys[processed..].to_vec(),
        })
    }

    async fn batch_write(&self, input: BatchWriteInput) -> TheoryResult<BatchWriteOutput> {
        self.record("batch_write");
        if let Some((table, _)) = input.writes.first() {
            self.maybe_throttle(table)?;
        }
        let leave = self.take_unprocessed().min(input.writes.len());
        let processed = input.writes.len() - leave;

        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        for (table_name, write) in &input.writes[..processed] {
            let table = tables
                .get_mut(table_name)
                .ok_or_else(|| TheoryError::ResourceNotFound {
                    resource: table_name.clone(),
                })?;
            match write {
                WriteRequest::Put { item } => {
                    let key = key_only(&table.spec, item);
                    match find_item(table, &key) {
                        Some(index) => table.items[index] = item.clone(),
                        None => table.items.push(item.clone()),
                    }
                }
                WriteRequest::Delete { key } => {
                    if let Some(index) = find_item(table, key) {
                        table.items.remove(index);
                    }
                }
            }
        }
        Ok(BatchWriteOutput {
            unprocessed: input.writes[processed..].to_vec(),
        })
    }

    async fn transact_write(&self, input: TransactWriteInput) -> TheoryResult<()> {
        self.record("transact_write");
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());

        // First pass: evaluate every condition against current state.
        let mut reasons = Vec::with_capacity(input.items.len());
        let mut any_failed = false;
        for op in &input.items {
            let (table_name, key, condition, expr) = transact_parts(&tables, op)?;
            let table = tables
                .get(&table_name)
                .ok_or_else(|| TheoryError::ResourceNotFound {
                    resource: table_name.clone(),
                })?;
            let existing = find_item(table, &key).map(|index| &table.items[index]);
            let passed = eval_opt_condition(condition.as_deref(), &expr, existing)?;
            if passed {
                reasons.push(CancellationReason {
                    code: "None".into(),
                    message: None,
                });
            } else {
                any_failed = true;
                reasons.push(CancellationReason {
                    code: "ConditionalCheckFailed".into(),
                    message: Some("The conditional request failed".into()),
                });
            }
        }
        if any_failed {
            return Err(TheoryError::TransactCanceled { reasons });
        }

        // Second pass: apply atomically.
        for op in &input.items {
            match op {
                TransactItem::Put { table, item, .. } => {
                    let mock = tables.get_mut(table).ok_or_else(|| {
                        TheoryError::ResourceNotFound {
                            resource: table.clone(),
                        }
                    })?;
                    let key = key_only(&mock.spec, item);
                    match find_item(mock, &key) {
                        Some(index) => mock.items[index] = item.clone(),
                        None => mock.items.push(item.clone()),
                    }
                }
                TransactItem::Update {
                    table,
                    key,
                    update,
                    expr,
                    ..
                } => {
                    let mock = tables.get_mut(table).ok_or_else(|| {
                        TheoryError::ResourceNotFound {
                            resource: table.clone(),
                        }
                    })?;
                    let position = find_item(mock, key);
                    let mut item = match position {
                        Some(index) => mock.items[index].clone(),
                        None => key.clone(),
                    };
                    eval::apply_update(update, &expr.names, &expr.values, &mut item)?;
                    match position {
                        Some(index) => mock.items[index] = item,
                        None => mock.items.push(item),
                    }
                }
                TransactItem::Delete { table, key, .. } => {
                    let mock = tables.get_mut(table).ok_or_else(|| {
                        TheoryError::ResourceNotFound {
                            resource: table.clone(),
                        }
                    })?;
                    if let Some(index) = find_item(mock, key) {
                        mock.items.remove(index);
                    }
                }
                TransactItem::ConditionCheck { .. } => {}
            }
        }
        Ok(())
    }

    async fn create_table(&self, spec: TableSpec) -> TheoryResult<()> {
        self.record("create_table");
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables.insert(
            spec.table.clone(),
            MockTable {
                spec,
                items: Vec::new(),
            },
        );
        Ok(())
    }

    async fn delete_table(&self, table: &str) -> TheoryResult<()> {
        self.record("delete_table");
        let mut tables = self.tables.write().unwrap_or_else(|e| e.into_inner());
        tables
            .remove(table)
            .map(|_| ())
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: table.to_string(),
            })
    }

    async fn describe_table(&self, table: &str) -> TheoryResult<TableDescription> {
        self.record("describe_table");
        let tables = self.tables.read().unwrap_or_else(|e| e.into_inner());
        let mock = tables
            .get(table)
            .ok_or_else(|| TheoryError::ResourceNotFound {
                resource: table.to_string(),
            })?;
        Ok(TableDescription {
            table: table.to_string(),
            status: "ACTIVE".into(),
            item_count: mock.items.len() as i64,
        })
    }
}

/// The `(table, key, condition, expr)` of one transaction operation; put
/// keys are extracted from the item via the table's key layout.
fn transact_parts(
    tables: &HashMap<String, MockTable>,
    op: &TransactItem,
) -> TheoryResult<(String, Item, Option<String>, ExprParts)> {
    Ok(match op {
        TransactItem::Put {
            table,
            item,
            condition,
            expr,
        } => {
            let mock = tables.get(table).ok_or_else(|| TheoryError::ResourceNotFound {
                resource: table.clone(),
            })?;
            (
                table.clone(),
                key_only(&mock.spec, item),
                condition.clone(),
                expr.clone(),
            )
        }
        TransactItem::Update {
            table,
            key,
            condition,
            expr,
            ..
        } => (table.clone(), key.clone(), condition.clone(), expr.clone()),
        TransactItem::Delete {
            table,
            key,
            condition,
            expr,
        } => (table.clone(), key.clone(), condition.clone(), expr.clone()),
        TransactItem::ConditionCheck {
            table,
            key,
            condition,
            expr,
        } => (
            table.clone(),
            key.clone(),
            Some(condition.clone()),
            expr.clone(),
        ),
    })
}
