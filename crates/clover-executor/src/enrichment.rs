//! Schema enrichment: catalog structure overlaid with human descriptions.
//!
//! The catalog is the structural baseline. Descriptions come from an ordered
//! list of [`DescriptionProvider`]s; the first provider that describes a
//! table supplies that table's description and column metadata:
//!
//! 1. descriptions saved in the description store
//! 2. the legacy column file (keyed by column name only)
//!
//! If the description store cannot be read the schema is served from the
//! catalog alone.

use crate::error::ExecutionError;
use clover_audit::{AccessLogEntry, AccessLogger, AccessType};
use clover_core::{ColumnDescription, ObjectType, SchemaConfig, TableDescription, UserId};
use clover_store::{CatalogIntrospector, CatalogTable, DescriptionStore};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// A column in the enriched schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    /// Native type reported by the catalog.
    pub datatype: String,
    pub nullable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

/// A table or view in the enriched schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub schema_name: String,
    pub object_type: ObjectType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub columns: Vec<ColumnSchema>,
    /// Provider the descriptions came from, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_source: Option<String>,
}

/// Enriched schema keyed by table name.
pub type SchemaMap = BTreeMap<String, TableSchema>;

/// A source of human-authored table and column descriptions.
pub trait DescriptionProvider: Send + Sync {
    /// Short name used in logs and in [`TableSchema::description_source`].
    fn source(&self) -> &'static str;

    /// Whether this provider has anything to say about `table`.
    fn describes(&self, table: &str) -> bool;

    fn table_description(&self, table: &str) -> Option<String>;

    fn lookup(&self, table: &str, column: &str) -> Option<ColumnDescription>;
}

/// Descriptions loaded from the description store for one database.
#[derive(Debug, Clone, Default)]
pub struct StoredDescriptions {
    tables: HashMap<String, TableDescription>,
}

impl StoredDescriptions {
    pub fn new(descriptions: Vec<TableDescription>) -> Self {
        Self {
            tables: descriptions
                .into_iter()
                .map(|d| (d.table_name.clone(), d))
                .collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

impl DescriptionProvider for StoredDescriptions {
    fn source(&self) -> &'static str {
        "description_store"
    }

    fn describes(&self, table: &str) -> bool {
        self.tables.contains_key(table)
    }

    fn table_description(&self, table: &str) -> Option<String> {
        self.tables
            .get(table)
            .map(|d| d.description.clone())
            .filter(|d| !d.trim().is_empty())
    }

    fn lookup(&self, table: &str, column: &str) -> Option<ColumnDescription> {
        self.tables.get(table)?.columns.get(column).cloned()
    }
}

/// The legacy column description file: a JSON object mapping column names to
/// descriptions, shared by every table.
#[derive(Debug, Clone, Default)]
pub struct LegacyColumnFile {
    columns: BTreeMap<String, ColumnDescription>,
}

impl LegacyColumnFile {
    pub fn from_columns(columns: BTreeMap<String, ColumnDescription>) -> Self {
        Self { columns }
    }

    pub fn from_json(content: &str) -> Result<Self, serde_json::Error> {
        Ok(Self::from_columns(serde_json::from_str(content)?))
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ExecutionError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ExecutionError::Internal(format!("cannot read {}: {}", path.display(), e))
        })?;
        let file = Self::from_json(&content).map_err(|e| {
            ExecutionError::Internal(format!("invalid JSON in {}: {}", path.display(), e))
        })?;
        tracing::info!(path = %path.display(), columns = file.columns.len(), "Legacy column descriptions loaded");
        Ok(file)
    }
}

impl DescriptionProvider for LegacyColumnFile {
    fn source(&self) -> &'static str {
        "legacy_file"
    }

    fn describes(&self, _table: &str) -> bool {
        !self.columns.is_empty()
    }

    fn table_description(&self, _table: &str) -> Option<String> {
        None
    }

    fn lookup(&self, _table: &str, column: &str) -> Option<ColumnDescription> {
        self.columns.get(column).cloned()
    }
}

/// Merge catalog tables with provider descriptions.
///
/// Tables are keyed by name; when a name appears in several schemas the
/// earliest schema in `schema_order` wins.
pub fn merge_schema(
    catalog: Vec<CatalogTable>,
    providers: &[&dyn DescriptionProvider],
    schema_order: &[String],
) -> SchemaMap {
    let rank = |schema: &str| {
        schema_order
            .iter()
            .position(|s| s == schema)
            .unwrap_or(usize::MAX)
    };
    let mut catalog = catalog;
    catalog.sort_by_key(|t| rank(&t.schema));

    let mut schema = SchemaMap::new();
    for table in catalog {
        if schema.contains_key(&table.name) {
            continue;
        }
        let provider = providers.iter().find(|p| p.describes(&table.name));
        let columns = table
            .columns
            .iter()
            .map(|c| {
                let described = provider.and_then(|p| p.lookup(&table.name, &c.name));
                let mut column = ColumnSchema {
                    name: c.name.clone(),
                    datatype: c.data_type.clone(),
                    nullable: c.nullable,
                    description: None,
                    placeholder: None,
                    tags: Vec::new(),
                };
                if let Some(d) = described {
                    column.description = Some(d.description).filter(|s| !s.trim().is_empty());
                    column.placeholder = d.placeholder;
                    column.tags = d.tags;
                }
                column
            })
            .collect();

        schema.insert(
            table.name.clone(),
            TableSchema {
                schema_name: table.schema,
                object_type: table.object_type,
                description: provider.and_then(|p| p.table_description(&table.name)),
                columns,
                description_source: provider.map(|p| p.source().to_string()),
            },
        );
    }
    schema
}

/// Serves the enriched schema of the data database.
#[derive(Clone)]
pub struct SchemaService {
    catalog: Arc<dyn CatalogIntrospector>,
    descriptions: Arc<dyn DescriptionStore>,
    legacy: Option<Arc<LegacyColumnFile>>,
    database_name: String,
    config: SchemaConfig,
    access_log: AccessLogger,
}

impl SchemaService {
    pub fn new(
        catalog: Arc<dyn CatalogIntrospector>,
        descriptions: Arc<dyn DescriptionStore>,
        database_name: impl Into<String>,
        config: SchemaConfig,
        access_log: AccessLogger,
    ) -> Self {
        Self {
            catalog,
            descriptions,
            legacy: None,
            database_name: database_name.into(),
            config,
            access_log,
        }
    }

    pub fn with_legacy(mut self, legacy: LegacyColumnFile) -> Self {
        self.legacy = Some(Arc::new(legacy));
        self
    }

    /// Every catalog-visible table with its columns, plus whatever
    /// descriptions are available.
    pub async fn get_database_schema(&self) -> Result<SchemaMap, ExecutionError> {
        let catalog = self
            .catalog
            .tables(&self.config.catalog_schemas, self.config.include_views)
            .await?;

        let schema = match self.descriptions.list_descriptions(&self.database_name).await {
            Ok(saved) => {
                let stored = StoredDescriptions::new(saved);
                let mut providers: Vec<&dyn DescriptionProvider> = vec![&stored];
                if let Some(legacy) = &self.legacy {
                    providers.push(legacy.as_ref());
                }
                tracing::debug!(
                    database = %self.database_name,
                    stored = stored.len(),
                    legacy = self.legacy.is_some(),
                    "Merging descriptions"
                );
                merge_schema(catalog, &providers, &self.config.catalog_schemas)
            }
            Err(e) => {
                tracing::warn!(
                    database = %self.database_name,
                    error = %e,
                    "Description store unavailable, serving catalog-only schema"
                );
                merge_schema(catalog, &[], &self.config.catalog_schemas)
            }
        };

        tracing::info!(database = %self.database_name, tables = schema.len(), "Schema fetched");
        Ok(schema)
    }

    /// [`get_database_schema`](Self::get_database_schema) on behalf of a
    /// user, recording a read access per table.
    pub async fn get_database_schema_for(
        &self,
        user_id: &UserId,
    ) -> Result<SchemaMap, ExecutionError> {
        let result = self.get_database_schema().await;
        match &result {
            Ok(schema) => {
                for (table, entry) in schema {
                    self.access_log.log_access(
                        user_id.as_str(),
                        &entry.schema_name,
                        table,
                        AccessType::Read,
                        true,
                    );
                }
            }
            Err(e) => {
                for schema_name in &self.config.catalog_schemas {
                    self.access_log.log(
                        AccessLogEntry::builder(
                            user_id.as_str(),
                            schema_name,
                            clover_audit::UNKNOWN_TABLE,
                            AccessType::Read,
                        )
                        .failed(e.kind())
                        .build(),
                    );
                }
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clover_audit::{AccessFilter, MemoryStorage};
    use clover_store::{CatalogColumn, InMemoryDescriptionStore, StaticCatalog};
    use pretty_assertions::assert_eq;

    fn column(name: &str, data_type: &str) -> CatalogColumn {
        CatalogColumn {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable: true,
        }
    }

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            CatalogTable {
                schema: "public".to_string(),
                name: "sales".to_string(),
                object_type: ObjectType::Table,
                columns: vec![column("id", "integer"), column("total", "numeric")],
            },
            CatalogTable {
                schema: "public".to_string(),
                name: "products".to_string(),
                object_type: ObjectType::Table,
                columns: vec![column("id", "integer"), column("name", "text")],
            },
            CatalogTable {
                schema: "public".to_string(),
                name: "sales_by_month".to_string(),
                object_type: ObjectType::View,
                columns: vec![column("month", "date"), column("total", "numeric")],
            },
            CatalogTable {
                schema: "archive".to_string(),
                name: "sales".to_string(),
                object_type: ObjectType::Table,
                columns: vec![column("id", "bigint")],
            },
        ])
    }

    fn described(text: &str) -> ColumnDescription {
        ColumnDescription {
            description: text.to_string(),
            ..Default::default()
        }
    }

    fn legacy() -> LegacyColumnFile {
        LegacyColumnFile::from_json(
            r#"{
                "id": {"описание": "Идентификатор", "теги": "id, key"},
                "name": {"description": "Product name", "placeholder": "Milk"},
                "total": {"description": "Legacy total"}
            }"#,
        )
        .unwrap()
    }

    async fn service(store: InMemoryDescriptionStore, schemas: &[&str]) -> SchemaService {
        let logger = AccessLogger::with_storage(Arc::new(MemoryStorage::new()), 64).unwrap();
        SchemaService::new(
            Arc::new(catalog()),
            Arc::new(store),
            "cloverdash",
            SchemaConfig {
                catalog_schemas: schemas.iter().map(|s| s.to_string()).collect(),
                include_views: true,
                legacy_descriptions_file: None,
            },
            logger,
        )
        .with_legacy(legacy())
    }

    async fn saved_sales() -> InMemoryDescriptionStore {
        let store = InMemoryDescriptionStore::new();
        store
            .save_description(
                &TableDescription::new("cloverdash", "sales")
                    .with_description("Sales receipts")
                    .with_column("total", described("Receipt total")),
            )
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_stored_description_wins_over_legacy() {
        let service = service(saved_sales().await, &["public"]).await;
        let schema = service.get_database_schema().await.unwrap();

        let sales = &schema["sales"];
        assert_eq!(sales.description.as_deref(), Some("Sales receipts"));
        assert_eq!(sales.description_source.as_deref(), Some("description_store"));
        assert_eq!(sales.columns[1].description.as_deref(), Some("Receipt total"));
        // legacy is not mixed into a table that has a stored description
        assert_eq!(sales.columns[0].description, None);
        assert_eq!(sales.columns[1].datatype, "numeric");
    }

    #[tokio::test]
    async fn test_legacy_fills_tables_without_stored_description() {
        let service = service(saved_sales().await, &["public"]).await;
        let schema = service.get_database_schema().await.unwrap();

        let products = &schema["products"];
        assert_eq!(products.description_source.as_deref(), Some("legacy_file"));
        assert_eq!(products.description, None);
        assert_eq!(products.columns[0].description.as_deref(), Some("Идентификатор"));
        assert_eq!(products.columns[0].tags, vec!["id", "key"]);
        assert_eq!(products.columns[1].placeholder.as_deref(), Some("Milk"));
    }

    #[tokio::test]
    async fn test_catalog_only_when_store_unavailable() {
        let store = saved_sales().await;
        store.set_unavailable(true);
        let service = service(store, &["public"]).await;
        let schema = service.get_database_schema().await.unwrap();

        assert_eq!(schema.len(), 3);
        for table in schema.values() {
            assert!(table.description.is_none());
            assert!(table.description_source.is_none());
            for column in &table.columns {
                assert!(!column.datatype.is_empty());
                assert!(column.description.is_none());
            }
        }
        assert_eq!(
            schema["sales_by_month"]
                .columns
                .iter()
                .map(|c| c.name.as_str())
                .collect::<Vec<_>>(),
            vec!["month", "total"]
        );
    }

    #[tokio::test]
    async fn test_first_configured_schema_wins() {
        let service = service(InMemoryDescriptionStore::new(), &["archive", "public"]).await;
        let schema = service.get_database_schema().await.unwrap();
        assert_eq!(schema["sales"].schema_name, "archive");
        assert_eq!(schema["sales"].columns[0].datatype, "bigint");
        assert_eq!(schema["products"].schema_name, "public");
    }

    #[tokio::test]
    async fn test_views_included_and_typed() {
        let service = service(InMemoryDescriptionStore::new(), &["public"]).await;
        let schema = service.get_database_schema().await.unwrap();
        assert_eq!(schema["sales_by_month"].object_type, ObjectType::View);
    }

    #[tokio::test]
    async fn test_schema_fetch_for_user_logs_reads() {
        let logger = AccessLogger::with_storage(Arc::new(MemoryStorage::new()), 64).unwrap();
        let service = SchemaService::new(
            Arc::new(catalog()),
            Arc::new(InMemoryDescriptionStore::new()),
            "cloverdash",
            SchemaConfig::default(),
            logger.clone(),
        );
        service
            .get_database_schema_for(&UserId::new("u1"))
            .await
            .unwrap();
        logger.flush().await;

        let entries = logger.query(AccessFilter::default()).await.unwrap();
        assert_eq!(entries.len(), 3);
        assert!(entries.iter().all(|e| e.access_type == AccessType::Read && e.success));
    }

    struct Fixed(&'static str, &'static str);

    impl DescriptionProvider for Fixed {
        fn source(&self) -> &'static str {
            self.0
        }
        fn describes(&self, table: &str) -> bool {
            table == "sales"
        }
        fn table_description(&self, _table: &str) -> Option<String> {
            Some(self.1.to_string())
        }
        fn lookup(&self, _table: &str, _column: &str) -> Option<ColumnDescription> {
            Some(described(self.1))
        }
    }

    #[test]
    fn test_providers_consulted_in_priority_order() {
        let tables = vec![CatalogTable {
            schema: "public".to_string(),
            name: "sales".to_string(),
            object_type: ObjectType::Table,
            columns: vec![column("id", "integer")],
        }];
        let first = Fixed("first", "from first");
        let second = Fixed("second", "from second");
        let schema = merge_schema(tables, &[&first, &second], &["public".to_string()]);
        assert_eq!(schema["sales"].description.as_deref(), Some("from first"));
        assert_eq!(
            schema["sales"].columns[0].description.as_deref(),
            Some("from first")
        );
    }
}
