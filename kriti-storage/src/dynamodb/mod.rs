//! Amazon DynamoDB backend
//!
//! `DynamoDbTable` implements [`TableStore`] over one table with the
//! single-table layout (`PK`/`SK`, `GSI1`..`GSI6`, `LSI1`). Compiled
//! descriptors already carry the rendered expressions and placeholder maps,
//! so this module only moves them onto requests and converts items.

pub mod convert;

use async_trait::async_trait;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::operation::transact_write_items::TransactWriteItemsError;
use aws_sdk_dynamodb::types::{
    ConditionCheck, Delete, DeleteRequest, KeysAndAttributes, Put, PutRequest,
    TransactWriteItem, WriteRequest as AwsWriteRequest,
};
use aws_sdk_dynamodb::Client;
use kriti_core::item::{ATTR_PK, ATTR_SK};
use kriti_core::{Item, ItemKey, KritiError, KritiResult, StorageError, StoreConfig};
use std::collections::{HashMap, HashSet};

use crate::expression::{render_condition, CompiledQuery, CompiledScan, ExpressionAttributes};
use crate::store::{Condition, QueryOutput, TableStore, TransactWriteOp, WriteRequest};
use convert::{
    from_attribute_map, to_attribute_map, to_expression_names, to_expression_values, AttributeMap,
};

/// Resubmissions of unprocessed batch-get keys before giving up.
const BATCH_GET_ROUNDS: usize = 4;

const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

/// A rendered write condition ready for a request.
struct RenderedCondition {
    expression: String,
    names: Option<HashMap<String, String>>,
    values: Option<AttributeMap>,
}

impl RenderedCondition {
    fn new(condition: &Condition) -> Self {
        let mut attrs = ExpressionAttributes::new();
        let expression = render_condition(condition, &mut attrs);
        Self {
            expression,
            names: to_expression_names(&attrs.names),
            values: to_expression_values(&attrs.values),
        }
    }

    fn split(
        condition: Option<&Condition>,
    ) -> (Option<String>, Option<HashMap<String, String>>, Option<AttributeMap>) {
        match condition.map(Self::new) {
            Some(r) => (Some(r.expression), r.names, r.values),
            None => (None, None, None),
        }
    }
}

/// DynamoDB-backed table.
#[derive(Clone)]
pub struct DynamoDbTable {
    client: Client,
    table_name: String,
}

impl std::fmt::Debug for DynamoDbTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DynamoDbTable")
            .field("table_name", &self.table_name)
            .finish()
    }
}

impl DynamoDbTable {
    /// Build a client for the configured region, honouring the endpoint
    /// override (DynamoDB Local).
    pub async fn from_config(config: &StoreConfig) -> KritiResult<Self> {
        config.validate()?;
        let sdk_config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut builder = aws_sdk_dynamodb::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        tracing::info!(
            table = %config.table_name,
            region = %config.region,
            endpoint = ?config.endpoint,
            "DynamoDB table client configured"
        );
        Ok(Self::from_client(
            Client::from_conf(builder.build()),
            config.table_name.clone(),
        ))
    }

    /// Create from a pre-built client.
    pub fn from_client(client: Client, table_name: impl Into<String>) -> Self {
        Self {
            client,
            table_name: table_name.into(),
        }
    }

    pub fn table_name(&self) -> &str {
        &self.table_name
    }

    fn key_map(key: &ItemKey) -> AttributeMap {
        to_attribute_map(&key.to_item())
    }

    fn output(items: &[AttributeMap], last_key: Option<&AttributeMap>) -> KritiResult<QueryOutput> {
        let items = items
            .iter()
            .map(from_attribute_map)
            .collect::<KritiResult<Vec<Item>>>()?;
        let last_evaluated_key = match last_key {
            Some(key) if !key.is_empty() => Some(from_attribute_map(key)?),
            _ => None,
        };
        Ok(QueryOutput::new(items, last_evaluated_key))
    }

    fn to_write_request(request: &WriteRequest) -> KritiResult<AwsWriteRequest> {
        let built = match request {
            WriteRequest::Put(item) => PutRequest::builder()
                .set_item(Some(to_attribute_map(item)))
                .build()
                .map(|put| AwsWriteRequest::builder().put_request(put).build()),
            WriteRequest::Delete(key) => DeleteRequest::builder()
                .set_key(Some(Self::key_map(key)))
                .build()
                .map(|delete| AwsWriteRequest::builder().delete_request(delete).build()),
        };
        built.map_err(|e| KritiError::write("batch_write", e))
    }

    fn unprocessed_key(request: &AwsWriteRequest) -> Option<ItemKey> {
        let map = request
            .put_request()
            .map(|p| p.item())
            .or_else(|| request.delete_request().map(|d| d.key()))?;
        let pk = map.get(ATTR_PK)?.as_s().ok()?;
        let sk = map.get(ATTR_SK)?.as_s().ok()?;
        Some(ItemKey::new(pk.clone(), sk.clone()))
    }

    fn to_transact_item(&self, op: &TransactWriteOp) -> KritiResult<TransactWriteItem> {
        let item = match op {
            TransactWriteOp::Put { item, condition } => {
                let (expression, names, values) = RenderedCondition::split(condition.as_ref());
                let put = Put::builder()
                    .table_name(&self.table_name)
                    .set_item(Some(to_attribute_map(item)))
                    .set_condition_expression(expression)
                    .set_expression_attribute_names(names)
                    .set_expression_attribute_values(values)
                    .build()
                    .map_err(|e| KritiError::write("transact_write", e))?;
                TransactWriteItem::builder().put(put).build()
            }
            TransactWriteOp::Delete { key, condition } => {
                let (expression, names, values) = RenderedCondition::split(condition.as_ref());
                let delete = Delete::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(Self::key_map(key)))
                    .set_condition_expression(expression)
                    .set_expression_attribute_names(names)
                    .set_expression_attribute_values(values)
                    .build()
                    .map_err(|e| KritiError::write("transact_write", e))?;
                TransactWriteItem::builder().delete(delete).build()
            }
            TransactWriteOp::ConditionCheck { key, condition } => {
                let rendered = RenderedCondition::new(condition);
                let check = ConditionCheck::builder()
                    .table_name(&self.table_name)
                    .set_key(Some(Self::key_map(key)))
                    .condition_expression(rendered.expression)
                    .set_expression_attribute_names(rendered.names)
                    .set_expression_attribute_values(rendered.values)
                    .build()
                    .map_err(|e| KritiError::write("transact_write", e))?;
                TransactWriteItem::builder().condition_check(check).build()
            }
        };
        Ok(item)
    }
}

/// Whether a cancelled transaction failed on a condition.
fn is_transaction_condition_failure(err: &TransactWriteItemsError) -> bool {
    match err {
        TransactWriteItemsError::TransactionCanceledException(cancelled) => cancelled
            .cancellation_reasons()
            .iter()
            .any(|reason| reason.code() == Some(CONDITIONAL_CHECK_FAILED)),
        _ => false,
    }
}

#[async_trait]
impl TableStore for DynamoDbTable {
    async fn get_item(&self, key: &ItemKey) -> KritiResult<Option<Item>> {
        tracing::debug!(table = %self.table_name, key = %key, "GetItem");
        let output = self
            .client
            .get_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_map(key)))
            .send()
            .await
            .map_err(|e| KritiError::query("get_item", DisplayErrorContext(&e)))?;
        output.item().map(from_attribute_map).transpose()
    }

    async fn put_item(&self, item: Item, condition: Option<Condition>) -> KritiResult<()> {
        let (expression, names, values) = RenderedCondition::split(condition.as_ref());
        let result = self
            .client
            .put_item()
            .table_name(&self.table_name)
            .set_item(Some(to_attribute_map(&item)))
            .set_condition_expression(expression)
            .set_expression_attribute_names(names)
            .set_expression_attribute_values(values)
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e
                    .as_service_error()
                    .map(|se| se.is_conditional_check_failed_exception())
                    .unwrap_or(false) =>
            {
                Err(StorageError::ConditionFailed {
                    reason: format!("put_item condition not met: {}", DisplayErrorContext(&e)),
                }
                .into())
            }
            Err(e) => Err(KritiError::write("put_item", DisplayErrorContext(&e))),
        }
    }

    async fn delete_item(&self, key: &ItemKey) -> KritiResult<()> {
        self.client
            .delete_item()
            .table_name(&self.table_name)
            .set_key(Some(Self::key_map(key)))
            .send()
            .await
            .map_err(|e| KritiError::delete(key.to_string(), DisplayErrorContext(&e)))?;
        Ok(())
    }

    async fn query(&self, query: &CompiledQuery) -> KritiResult<QueryOutput> {
        tracing::debug!(
            table = %self.table_name,
            index = ?query.index,
            key_condition = %query.key_condition_expression,
            filter = ?query.filter_expression,
            "Query"
        );
        let output = self
            .client
            .query()
            .table_name(&self.table_name)
            .set_index_name(query.index.clone())
            .key_condition_expression(&query.key_condition_expression)
            .set_filter_expression(query.filter_expression.clone())
            .set_projection_expression(query.projection_expression.clone())
            .set_expression_attribute_names(to_expression_names(&query.attributes.names))
            .set_expression_attribute_values(to_expression_values(&query.attributes.values))
            .set_limit(query.limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
            .scan_index_forward(query.scan_forward)
            .set_exclusive_start_key(query.exclusive_start_key.as_ref().map(to_attribute_map))
            .send()
            .await
            .map_err(|e| KritiError::query("query", DisplayErrorContext(&e)))?;

        Self::output(output.items(), output.last_evaluated_key())
    }

    async fn scan(&self, scan: &CompiledScan) -> KritiResult<QueryOutput> {
        tracing::debug!(
            table = %self.table_name,
            index = ?scan.index,
            filter = ?scan.filter_expression,
            "Scan"
        );
        let output = self
            .client
            .scan()
            .table_name(&self.table_name)
            .set_index_name(scan.index.clone())
            .set_filter_expression(scan.filter_expression.clone())
            .set_projection_expression(scan.projection_expression.clone())
            .set_expression_attribute_names(to_expression_names(&scan.attributes.names))
            .set_expression_attribute_values(to_expression_values(&scan.attributes.values))
            .set_limit(scan.limit.map(|l| i32::try_from(l).unwrap_or(i32::MAX)))
            .set_exclusive_start_key(scan.exclusive_start_key.as_ref().map(to_attribute_map))
            .send()
            .await
            .map_err(|e| KritiError::query("scan", DisplayErrorContext(&e)))?;

        Self::output(output.items(), output.last_evaluated_key())
    }

    async fn batch_get(&self, keys: &[ItemKey]) -> KritiResult<Vec<Item>> {
        let mut pending: Vec<AttributeMap> = keys.iter().map(Self::key_map).collect();
        let mut items = Vec::with_capacity(keys.len());
        let mut rounds = 0usize;

        while !pending.is_empty() {
            if rounds == BATCH_GET_ROUNDS {
                return Err(KritiError::query(
                    "batch_get",
                    format!("{} keys still unprocessed after {} rounds", pending.len(), rounds),
                ));
            }
            let request = KeysAndAttributes::builder()
                .set_keys(Some(pending))
                .build()
                .map_err(|e| KritiError::query("batch_get", e))?;
            let output = self
                .client
                .batch_get_item()
                .request_items(&self.table_name, request)
                .send()
                .await
                .map_err(|e| KritiError::query("batch_get", DisplayErrorContext(&e)))?;

            if let Some(found) = output.responses().and_then(|r| r.get(&self.table_name)) {
                for map in found {
                    items.push(from_attribute_map(map)?);
                }
            }
            pending = output
                .unprocessed_keys()
                .and_then(|u| u.get(&self.table_name))
                .map(|k| k.keys().to_vec())
                .unwrap_or_default();
            rounds += 1;
        }
        Ok(items)
    }

    async fn batch_write(&self, requests: Vec<WriteRequest>) -> KritiResult<Vec<WriteRequest>> {
        let aws_requests = requests
            .iter()
            .map(Self::to_write_request)
            .collect::<KritiResult<Vec<_>>>()?;

        let output = self
            .client
            .batch_write_item()
            .request_items(&self.table_name, aws_requests)
            .send()
            .await
            .map_err(|e| KritiError::write("batch_write", DisplayErrorContext(&e)))?;

        let unprocessed: HashSet<ItemKey> = output
            .unprocessed_items()
            .and_then(|u| u.get(&self.table_name))
            .map(|pending| pending.iter().filter_map(Self::unprocessed_key).collect())
            .unwrap_or_default();

        if unprocessed.is_empty() {
            return Ok(Vec::new());
        }
        Ok(requests
            .into_iter()
            .filter(|r| r.key().is_some_and(|k| unprocessed.contains(&k)))
            .collect())
    }

    async fn transact_write(&self, ops: Vec<TransactWriteOp>) -> KritiResult<()> {
        let items = ops
            .iter()
            .map(|op| self.to_transact_item(op))
            .collect::<KritiResult<Vec<_>>>()?;

        tracing::debug!(table = %self.table_name, ops = items.len(), "TransactWriteItems");
        let result = self
            .client
            .transact_write_items()
            .set_transact_items(Some(items))
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e)
                if e
                    .as_service_error()
                    .map(is_transaction_condition_failure)
                    .unwrap_or(false) =>
            {
                Err(StorageError::ConditionFailed {
                    reason: format!("transaction cancelled: {}", DisplayErrorContext(&e)),
                }
                .into())
            }
            Err(e) => Err(KritiError::write("transact_write", DisplayErrorContext(&e))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rendered_condition_maps() {
        let rendered = RenderedCondition::new(&Condition::AttributeEquals(
            "version".to_string(),
            json!("v2"),
        ));
        assert_eq!(rendered.expression, "#n0 = :v0");
        assert_eq!(
            rendered.names.unwrap().get("#n0").map(String::as_str),
            Some("version")
        );
        assert!(rendered.values.unwrap().contains_key(":v0"));

        let (expression, names, values) = RenderedCondition::split(None);
        assert!(expression.is_none() && names.is_none() && values.is_none());
    }

    #[test]
    fn test_unprocessed_key_from_put() {
        let item = json!({ "PK": "RAGA#r1", "SK": "#METADATA", "name": "Todi" })
            .as_object()
            .cloned()
            .unwrap();
        let request = DynamoDbTable::to_write_request(&WriteRequest::Put(item)).unwrap();
        assert_eq!(
            DynamoDbTable::unprocessed_key(&request),
            Some(ItemKey::new("RAGA#r1", "#METADATA"))
        );

        let request =
            DynamoDbTable::to_write_request(&WriteRequest::Delete(ItemKey::new("RAGA#r2", "#METADATA")))
                .unwrap();
        assert_eq!(
            DynamoDbTable::unprocessed_key(&request),
            Some(ItemKey::new("RAGA#r2", "#METADATA"))
        );
    }
}
