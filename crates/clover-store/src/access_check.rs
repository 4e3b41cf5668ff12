//! Per-user schema access report.
//!
//! Resolves a user's role mappings, asks the catalog what each mapped role can
//! actually read and reports where the two disagree.

use crate::catalog::{CatalogIntrospector, ReadableTable};
use crate::error::StoreError;
use crate::mapping::RoleMappingStore;
use chrono::{DateTime, Utc};
use clover_core::{UserId, UserIdType, UserRoleMapping};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// What one schema exposes to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaAccessDetail {
    pub tables_count: usize,
    pub tables: Vec<String>,
    /// Object type → count.
    pub object_types: BTreeMap<String, usize>,
}

/// Access report for one user in one database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaAccessReport {
    pub user_id: String,
    pub database_name: String,
    pub roles: Vec<String>,
    pub accessible_tables_count: usize,
    pub accessible_schemas: Vec<String>,
    pub schema_details: BTreeMap<String, SchemaAccessDetail>,
    /// Known schemas the user cannot read anything in.
    pub restricted_schemas: Vec<String>,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
    pub generated_at: DateTime<Utc>,
}

impl SchemaAccessReport {
    /// Whether no issue was found.
    pub fn is_healthy(&self) -> bool {
        self.issues.is_empty()
    }

    /// Build the report from already-fetched inputs.
    ///
    /// `readable` pairs each mapping with what its role can read, `None` when
    /// the role is missing from the database. `known_schemas` is every schema
    /// the report should account for.
    pub fn analyze(
        user_id: &str,
        database_name: &str,
        readable: &[(UserRoleMapping, Option<Vec<ReadableTable>>)],
        known_schemas: &[String],
        default_schema: &str,
    ) -> Self {
        let mut issues = Vec::new();
        let mut recommendations = Vec::new();
        let mut roles = BTreeSet::new();
        let mut seen = BTreeSet::new();
        let mut schema_details: BTreeMap<String, SchemaAccessDetail> = BTreeMap::new();

        if readable.is_empty() {
            issues.push(format!(
                "User {} has no role mapping in database {}",
                user_id, database_name
            ));
            recommendations.push("Grant the user access with `clover grant`".to_string());
        }

        for (mapping, tables) in readable {
            roles.insert(mapping.role_name.clone());
            let Some(tables) = tables else {
                issues.push(format!(
                    "Role {} mapped for schema {} does not exist",
                    mapping.role_name, mapping.schema_name
                ));
                recommendations.push(format!(
                    "Re-grant schema {} to recreate role {}",
                    mapping.schema_name, mapping.role_name
                ));
                continue;
            };

            if !tables.iter().any(|t| t.schema == mapping.schema_name) {
                issues.push(format!(
                    "Role {} cannot read any table in its mapped schema {}",
                    mapping.role_name, mapping.schema_name
                ));
            }

            for table in tables {
                if !seen.insert((table.schema.clone(), table.name.clone())) {
                    continue;
                }
                let detail = schema_details.entry(table.schema.clone()).or_default();
                detail.tables.push(table.name.clone());
                detail.tables_count += 1;
                *detail
                    .object_types
                    .entry(table.object_type.as_str().to_string())
                    .or_default() += 1;
            }
        }

        for detail in schema_details.values_mut() {
            detail.tables.sort();
        }

        let accessible_schemas: Vec<String> = schema_details.keys().cloned().collect();
        let restricted_schemas: Vec<String> = known_schemas
            .iter()
            .filter(|s| !schema_details.contains_key(*s))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();

        if !readable.is_empty() && accessible_schemas.is_empty() {
            issues.push("User cannot read any table".to_string());
        } else if accessible_schemas.len() == 1 && accessible_schemas[0] == default_schema {
            recommendations.push(format!(
                "User only reads the {} schema; grant a tenant schema if one is expected",
                default_schema
            ));
        }

        Self {
            user_id: user_id.to_string(),
            database_name: database_name.to_string(),
            roles: roles.into_iter().collect(),
            accessible_tables_count: seen.len(),
            accessible_schemas,
            schema_details,
            restricted_schemas,
            issues,
            recommendations,
            generated_at: Utc::now(),
        }
    }
}

/// Check what `user` can read in `database_name` across `schemas`.
///
/// Each mapping is checked against its own schema plus `default_schema`,
/// matching the search path the executor sets.
pub async fn validate_schema_access(
    mappings: &dyn RoleMappingStore,
    catalog: &dyn CatalogIntrospector,
    user: &UserId,
    user_id_type: UserIdType,
    database_name: &str,
    schemas: &[String],
    default_schema: &str,
) -> Result<SchemaAccessReport, StoreError> {
    let key = user
        .coerce(user_id_type)
        .ok_or_else(|| StoreError::InvalidUserId(user.to_string()))?;
    let user_mappings = mappings.find_mappings(&key, database_name).await?;

    let mut readable = Vec::with_capacity(user_mappings.len());
    for mapping in user_mappings {
        let mut scope: Vec<String> = vec![mapping.schema_name.clone()];
        if mapping.schema_name != default_schema {
            scope.push(default_schema.to_string());
        }
        let tables = catalog.readable_tables(&mapping.role_name, &scope).await?;
        readable.push((mapping, tables));
    }

    let mut known: Vec<String> = schemas.to_vec();
    known.extend(readable.iter().map(|(m, _)| m.schema_name.clone()));

    let report = SchemaAccessReport::analyze(
        user.as_str(),
        database_name,
        &readable,
        &known,
        default_schema,
    );
    if report.is_healthy() {
        tracing::info!(
            user_id = %user,
            database = %database_name,
            schemas = ?report.accessible_schemas,
            tables = report.accessible_tables_count,
            "Schema access validated"
        );
    } else {
        tracing::warn!(
            user_id = %user,
            database = %database_name,
            issues = ?report.issues,
            "Schema access issues found"
        );
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{CatalogColumn, CatalogTable, StaticCatalog};
    use crate::mapping::InMemoryRoleMappingStore;
    use clover_core::ObjectType;
    use pretty_assertions::assert_eq;

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

    fn catalog() -> StaticCatalog {
        StaticCatalog::new(vec![
            table("demo1", "sales", ObjectType::Table),
            table("demo1", "sales_by_month", ObjectType::View),
            table("demo2", "sales", ObjectType::Table),
            table("public", "currencies", ObjectType::Table),
        ])
        .with_grant("role_u1", "demo1", "sales")
        .with_grant("role_u1", "demo1", "sales_by_month")
        .with_grant("role_u1", "public", "currencies")
        .with_role("role_u2")
    }

    fn schemas() -> Vec<String> {
        vec!["demo1".to_string(), "demo2".to_string(), "public".to_string()]
    }

    #[tokio::test]
    async fn test_report_for_granted_user() {
        let store = InMemoryRoleMappingStore::new();
        store
            .upsert_mapping(&UserRoleMapping::new("u1", "cloverdash", "demo1", "role_u1"))
            .await
            .unwrap();

        let report = validate_schema_access(
            &store,
            &catalog(),
            &UserId::new("u1"),
            UserIdType::Text,
            "cloverdash",
            &schemas(),
            "public",
        )
        .await
        .unwrap();

        assert!(report.is_healthy(), "{:?}", report.issues);
        assert_eq!(report.roles, vec!["role_u1".to_string()]);
        assert_eq!(report.accessible_schemas, vec!["demo1", "public"]);
        assert_eq!(report.restricted_schemas, vec!["demo2".to_string()]);
        assert_eq!(report.accessible_tables_count, 3);

        let demo1 = &report.schema_details["demo1"];
        assert_eq!(demo1.tables, vec!["sales", "sales_by_month"]);
        assert_eq!(demo1.object_types.get("view"), Some(&1));
        assert_eq!(demo1.object_types.get("table"), Some(&1));
    }

    #[tokio::test]
    async fn test_report_flags_unmapped_user() {
        let store = InMemoryRoleMappingStore::new();
        let report = validate_schema_access(
            &store,
            &catalog(),
            &UserId::new("ghost"),
            UserIdType::Text,
            "cloverdash",
            &schemas(),
            "public",
        )
        .await
        .unwrap();

        assert!(!report.is_healthy());
        assert!(report.issues[0].contains("no role mapping"));
        assert_eq!(report.restricted_schemas, schemas());
    }

    #[tokio::test]
    async fn test_report_flags_role_without_grants_and_missing_role() {
        let store = InMemoryRoleMappingStore::new();
        store
            .upsert_mapping(&UserRoleMapping::new("u2", "cloverdash", "demo2", "role_u2"))
            .await
            .unwrap();
        store
            .upsert_mapping(&UserRoleMapping::new("u2", "cloverdash", "demo1", "role_gone"))
            .await
            .unwrap();

        let report = validate_schema_access(
            &store,
            &catalog(),
            &UserId::new("u2"),
            UserIdType::Text,
            "cloverdash",
            &schemas(),
            "public",
        )
        .await
        .unwrap();

        assert!(report.issues.iter().any(|i| i.contains("role_gone does not exist")));
        assert!(
            report
                .issues
                .iter()
                .any(|i| i.contains("cannot read any table in its mapped schema demo2"))
        );
        assert!(report.issues.iter().any(|i| i == "User cannot read any table"));
        assert!(report.accessible_schemas.is_empty());
    }

    #[tokio::test]
    async fn test_report_rejects_uncoercible_user_id() {
        let store = InMemoryRoleMappingStore::new();
        let err = validate_schema_access(
            &store,
            &catalog(),
            &UserId::new("alice"),
            UserIdType::Bigint,
            "cloverdash",
            &schemas(),
            "public",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, StoreError::InvalidUserId(_)));
    }

    #[test]
    fn test_public_only_access_is_recommended_upon() {
        let mapping = UserRoleMapping::new("u3", "cloverdash", "public", "role_u3");
        let readable = vec![(
            mapping,
            Some(vec![ReadableTable {
                schema: "public".to_string(),
                name: "currencies".to_string(),
                object_type: ObjectType::Table,
            }]),
        )];
        let report =
            SchemaAccessReport::analyze("u3", "cloverdash", &readable, &schemas(), "public");
        assert!(report.is_healthy());
        assert_eq!(report.recommendations.len(), 1);
        assert!(report.recommendations[0].contains("only reads the public schema"));
    }
}
