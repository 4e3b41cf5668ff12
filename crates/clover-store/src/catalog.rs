//! Catalog introspection of the data database.
//!
//! Only objects visible to the connecting role are reported
//! (`information_schema` filters by privilege).

use crate::error::StoreError;
use async_trait::async_trait;
use clover_core::ObjectType;
use serde::{Deserialize, Serialize};
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, BTreeSet};

/// A column as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogColumn {
    pub name: String,
    pub data_type: String,
    pub nullable: bool,
}

/// A table or view as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogTable {
    pub schema: String,
    pub name: String,
    pub object_type: ObjectType,
    /// Columns in ordinal order.
    pub columns: Vec<CatalogColumn>,
}

/// A table or view some role may `SELECT` from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadableTable {
    pub schema: String,
    pub name: String,
    pub object_type: ObjectType,
}

/// Source of structural schema information.
#[async_trait]
pub trait CatalogIntrospector: Send + Sync {
    /// Tables (and optionally views) in the given schemas, ordered by schema
    /// then table name.
    async fn tables(
        &self,
        schemas: &[String],
        include_views: bool,
    ) -> Result<Vec<CatalogTable>, StoreError>;

    /// Tables and views in `schemas` that `role` may read, ordered by schema
    /// then name. `None` when the role does not exist.
    async fn readable_tables(
        &self,
        role: &str,
        schemas: &[String],
    ) -> Result<Option<Vec<ReadableTable>>, StoreError>;
}

/// Introspects a Postgres database through `information_schema`.
#[derive(Debug, Clone)]
pub struct PgCatalog {
    pool: PgPool,
}

impl PgCatalog {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CatalogIntrospector for PgCatalog {
    async fn tables(
        &self,
        schemas: &[String],
        include_views: bool,
    ) -> Result<Vec<CatalogTable>, StoreError> {
        let table_types: Vec<&str> = if include_views {
            vec!["BASE TABLE", "VIEW"]
        } else {
            vec!["BASE TABLE"]
        };

        let rows = sqlx::query(
            r#"
            select t.table_schema::text as table_schema,
                   t.table_name::text as table_name,
                   t.table_type::text as table_type,
                   c.column_name::text as column_name,
                   c.data_type::text as data_type,
                   c.is_nullable::text as is_nullable
            from information_schema.tables t
            left join information_schema.columns c
              on c.table_schema = t.table_schema
             and c.table_name = t.table_name
            where t.table_schema::text = any($1::text[])
              and t.table_type::text = any($2::text[])
            order by t.table_schema, t.table_name, c.ordinal_position
            "#,
        )
        .bind(schemas)
        .bind(&table_types)
        .fetch_all(&self.pool)
        .await?;

        let mut tables: Vec<CatalogTable> = Vec::new();
        for row in rows {
            let table_schema: String = row.try_get("table_schema")?;
            let table_name: String = row.try_get("table_name")?;
            let table_type: String = row.try_get("table_type")?;
            let column_name: Option<String> = row.try_get("column_name")?;

            let is_same_table = tables
                .last()
                .is_some_and(|t| t.schema == table_schema && t.name == table_name);
            if !is_same_table {
                tables.push(CatalogTable {
                    schema: table_schema,
                    name: table_name,
                    object_type: ObjectType::from_table_type(&table_type),
                    columns: Vec::new(),
                });
            }

            if let Some(column_name) = column_name
                && let Some(table) = tables.last_mut()
            {
                let data_type: Option<String> = row.try_get("data_type")?;
                let is_nullable: Option<String> = row.try_get("is_nullable")?;
                table.columns.push(CatalogColumn {
                    name: column_name,
                    data_type: data_type.unwrap_or_else(|| "unknown".to_string()),
                    nullable: is_nullable.as_deref() == Some("YES"),
                });
            }
        }

        tracing::debug!(schemas = ?schemas, tables = tables.len(), "Catalog introspected");
        Ok(tables)
    }

    async fn readable_tables(
        &self,
        role: &str,
        schemas: &[String],
    ) -> Result<Option<Vec<ReadableTable>>, StoreError> {
        let exists: bool =
            sqlx::query_scalar("select exists(select 1 from pg_roles where rolname = $1)")
                .bind(role)
                .fetch_one(&self.pool)
                .await?;
        if !exists {
            return Ok(None);
        }

        // pg_class rather than information_schema: the latter only reports
        // what the connecting role can see.
        let rows = sqlx::query(
            r#"
            select n.nspname::text as table_schema,
                   c.relname::text as table_name,
                   c.relkind::text as relkind
            from pg_class c
            join pg_namespace n on n.oid = c.relnamespace
            where n.nspname::text = any($2::text[])
              and c.relkind in ('r', 'p', 'v', 'm', 'f')
              and has_schema_privilege($1, n.oid, 'USAGE')
              and has_table_privilege($1, c.oid, 'SELECT')
            order by n.nspname, c.relname
            "#,
        )
        .bind(role)
        .bind(schemas)
        .fetch_all(&self.pool)
        .await?;

        let mut tables = Vec::with_capacity(rows.len());
        for row in rows {
            let relkind: String = row.try_get("relkind")?;
            tables.push(ReadableTable {
                schema: row.try_get("table_schema")?,
                name: row.try_get("table_name")?,
                object_type: if matches!(relkind.as_str(), "v" | "m") {
                    ObjectType::View
                } else {
                    ObjectType::Table
                },
            });
        }
        tracing::debug!(role = %role, tables = tables.len(), "Readable tables introspected");
        Ok(Some(tables))
    }
}

/// Fixed catalog, for tests and offline tooling.
///
/// Roles exist only once granted something through
/// [`with_grant`](Self::with_grant).
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    tables: Vec<CatalogTable>,
    grants: BTreeMap<String, BTreeSet<(String, String)>>,
}

impl StaticCatalog {
    pub fn new(tables: Vec<CatalogTable>) -> Self {
        Self {
            tables,
            grants: BTreeMap::new(),
        }
    }

    /// Let `role` read `schema.table`.
    pub fn with_grant(mut self, role: &str, schema: &str, table: &str) -> Self {
        self.grants
            .entry(role.to_string())
            .or_default()
            .insert((schema.to_string(), table.to_string()));
        self
    }

    /// Register `role` without any grants.
    pub fn with_role(mut self, role: &str) -> Self {
        self.grants.entry(role.to_string()).or_default();
        self
    }
}

#[async_trait]
impl CatalogIntrospector for StaticCatalog {
    async fn tables(
        &self,
        schemas: &[String],
        include_views: bool,
    ) -> Result<Vec<CatalogTable>, StoreError> {
        let mut tables: Vec<CatalogTable> = self
            .tables
            .iter()
            .filter(|t| schemas.contains(&t.schema))
            .filter(|t| include_views || t.object_type == ObjectType::Table)
            .cloned()
            .collect();
        tables.sort_by(|a, b| a.schema.cmp(&b.schema).then_with(|| a.name.cmp(&b.name)));
        Ok(tables)
    }

    async fn readable_tables(
        &self,
        role: &str,
        schemas: &[String],
    ) -> Result<Option<Vec<ReadableTable>>, StoreError> {
        let Some(granted) = self.grants.get(role) else {
            return Ok(None);
        };
        let mut tables: Vec<ReadableTable> = self
            .tables
            .iter()
            .filter(|t| schemas.contains(&t.schema))
            .filter(|t| granted.contains(&(t.schema.clone(), t.name.clone())))
            .map(|t| ReadableTable {
                schema: t.schema.clone(),
                name: t.name.clone(),
                object_type: t.object_type,
            })
            .collect();
        tables.sort_by(|a, b| a.schema.cmp(&b.schema).then_with(|| a.name.cmp(&b.name)));
        Ok(Some(tables))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(schema: &str, name: &str, object_type: ObjectType) -> CatalogTable {
        CatalogTable {
            schema: schema.to_string(),
            name: name.to_string(),
            object_type,
            columns: vec![CatalogColumn {
                name: "id".to_string(),
                data_type: "integer".to_string(),
                nullable: false,
            }],
        }
    }

    #[tokio::test]
    async fn test_static_catalog_filters() {
        let catalog = StaticCatalog::new(vec![
            table("public", "sales", ObjectType::Table),
            table("public", "sales_by_month", ObjectType::View),
            table("demo1", "sales", ObjectType::Table),
        ]);

        let public = catalog.tables(&["public".to_string()], true).await.unwrap();
        assert_eq!(public.len(), 2);

        let no_views = catalog.tables(&["public".to_string()], false).await.unwrap();
        assert_eq!(no_views.len(), 1);
        assert_eq!(no_views[0].name, "sales");
    }

    #[tokio::test]
    async fn test_static_catalog_readable_tables() {
        let catalog = StaticCatalog::new(vec![
            table("demo1", "sales", ObjectType::Table),
            table("demo1", "returns", ObjectType::Table),
            table("demo2", "sales", ObjectType::Table),
        ])
        .with_grant("role_u1", "demo1", "sales")
        .with_grant("role_u1", "demo2", "sales")
        .with_role("role_empty");

        let readable = catalog
            .readable_tables("role_u1", &["demo1".to_string()])
            .await
            .unwrap()
            .unwrap();
        assert_eq!(readable.len(), 1);
        assert_eq!(readable[0].name, "sales");

        let none = catalog
            .readable_tables("role_empty", &["demo1".to_string()])
            .await
            .unwrap();
        assert_eq!(none, Some(Vec::new()));

        assert!(
            catalog
                .readable_tables("missing", &["demo1".to_string()])
                .await
                .unwrap()
                .is_none()
        );
    }
}
