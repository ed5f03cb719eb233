//! DynamoDB backend for the TTL store.
//!
//! Each item is written with one `UpdateItem` keyed on `item` (partition)
//! and `date_or_time` (sort) that SETs every attribute. Expiry is the
//! table's own TTL on the `expires` attribute; nothing here deletes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use aws_config::profile::profile_file::{ProfileFileKind, ProfileFiles};
use aws_config::BehaviorVersion;
use aws_sdk_dynamodb::config::Region;
use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::types::AttributeValue as DynamoValue;
use aws_sdk_dynamodb::Client;

use loralogger_core::config::TtlStoreConfig;

use super::ttl_store::{AttributeValue, TtlItem, TtlStore};
use super::SinkError;

/// Partition key attribute name.
pub const PARTITION_KEY: &str = "item";
/// Sort key attribute name.
pub const SORT_KEY: &str = "date_or_time";

#[derive(Clone)]
pub struct DynamoDbTtlStore {
    client: Client,
    table: Arc<str>,
}

impl DynamoDbTtlStore {
    /// Build a client for the configured region and credentials.
    ///
    /// `credentials_path` replaces the shared credentials file and
    /// `credentials_profile` picks the profile in it. Credentials are
    /// resolved lazily, on the first request.
    pub async fn connect(config: &TtlStoreConfig) -> Self {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));

        if let Some(path) = &config.credentials_path {
            loader = loader.profile_files(
                ProfileFiles::builder()
                    .include_default_config_file(true)
                    .with_file(ProfileFileKind::Credentials, path)
                    .build(),
            );
        }
        if let Some(profile) = &config.credentials_profile {
            loader = loader.profile_name(profile);
        }
        if let Some(url) = &config.endpoint_url {
            loader = loader.endpoint_url(url);
        }

        let sdk_config = loader.load().await;
        Self::with_client(Client::new(&sdk_config), &config.table)
    }

    pub fn with_client(client: Client, table: &str) -> Self {
        Self {
            client,
            table: Arc::from(table),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }
}

#[async_trait]
impl TtlStore for DynamoDbTtlStore {
    async fn upsert(&self, item: TtlItem) -> Result<(), SinkError> {
        let update = UpdateClause::for_item(&item);

        let mut request = self
            .client
            .update_item()
            .table_name(self.table.as_ref())
            .key(PARTITION_KEY, DynamoValue::S(item.partition_key))
            .key(SORT_KEY, DynamoValue::S(item.sort_key));
        if let Some(update) = update {
            request = request
                .update_expression(update.expression)
                .set_expression_attribute_names(Some(update.names))
                .set_expression_attribute_values(Some(update.values));
        }

        request
            .send()
            .await
            .map_err(|e| SinkError::Remote(DisplayErrorContext(&e).to_string()))?;
        Ok(())
    }
}

/// `SET` expression plus placeholder maps for an item's attributes.
///
/// Names go through `#` placeholders so reserved words are safe as
/// attribute names.
#[derive(Debug, PartialEq)]
struct UpdateClause {
    expression: String,
    names: HashMap<String, String>,
    values: HashMap<String, DynamoValue>,
}

impl UpdateClause {
    /// `None` for an item with no attributes; DynamoDB rejects an empty SET.
    fn for_item(item: &TtlItem) -> Option<Self> {
        if item.attributes.is_empty() {
            return None;
        }

        let mut assignments = Vec::with_capacity(item.attributes.len());
        let mut names = HashMap::new();
        let mut values = HashMap::new();
        for (i, (name, value)) in item.attributes.iter().enumerate() {
            let name_ref = format!("#a{i}");
            let value_ref = format!(":a{i}");
            assignments.push(format!("{name_ref} = {value_ref}"));
            names.insert(name_ref, name.clone());
            values.insert(value_ref, to_dynamo(value));
        }

        Some(Self {
            expression: format!("SET {}", assignments.join(", ")),
            names,
            values,
        })
    }
}

fn to_dynamo(value: &AttributeValue) -> DynamoValue {
    match value {
        AttributeValue::S(s) => DynamoValue::S(s.clone()),
        AttributeValue::N(n) => DynamoValue::N(n.to_string()),
    }
}
