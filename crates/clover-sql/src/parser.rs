//! SQL parsing and table extraction.

use crate::error::SqlError;
use sqlparser::ast::{
    ObjectName, ObjectNamePart, Query, SetExpr, Statement, TableFactor, TableWithJoins,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use std::collections::HashSet;

/// Analyzes SQL statements to find the tables they read.
pub struct SqlAnalyzer {
    dialect: PostgreSqlDialect,
}

impl Clone for SqlAnalyzer {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl Default for SqlAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for SqlAnalyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlAnalyzer").finish()
    }
}

impl SqlAnalyzer {
    /// Create a new SQL analyzer.
    pub fn new() -> Self {
        Self {
            dialect: PostgreSqlDialect {},
        }
    }

    /// Parse a SQL string into statements.
    pub fn parse(&self, sql: &str) -> Result<Vec<Statement>, SqlError> {
        Parser::parse_sql(&self.dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))
    }

    /// Tables referenced by a statement, in order of first appearance,
    /// without duplicates. CTE names are not reported as tables.
    pub fn extract_tables(&self, stmt: &Statement) -> Vec<TableReference> {
        let mut visitor = TableVisitor::default();
        if let Statement::Query(query) = stmt {
            visitor.visit_query(query);
        }
        visitor.tables
    }

    /// Parse `sql` and return its tables; empty when the statement cannot be
    /// parsed.
    pub fn tables_in(&self, sql: &str) -> Vec<TableReference> {
        match self.parse(sql) {
            Ok(stmts) => {
                let mut tables: Vec<TableReference> = Vec::new();
                for stmt in &stmts {
                    for table in self.extract_tables(stmt) {
                        if !tables.contains(&table) {
                            tables.push(table);
                        }
                    }
                }
                tables
            }
            Err(e) => {
                tracing::debug!(error = %e, "Could not parse statement for table extraction");
                Vec::new()
            }
        }
    }
}

#[derive(Default)]
struct TableVisitor {
    tables: Vec<TableReference>,
    cte_names: HashSet<String>,
}

impl TableVisitor {
    fn visit_query(&mut self, query: &Query) {
        if let Some(with) = &query.with {
            for cte in &with.cte_tables {
                self.cte_names.insert(cte.alias.name.value.to_lowercase());
                self.visit_query(&cte.query);
            }
        }
        self.visit_set_expr(&query.body);
    }

    fn visit_set_expr(&mut self, expr: &SetExpr) {
        match expr {
            SetExpr::Select(select) => {
                for table_with_joins in &select.from {
                    self.visit_table_with_joins(table_with_joins);
                }
            }
            SetExpr::Query(query) => self.visit_query(query),
            SetExpr::SetOperation { left, right, .. } => {
                self.visit_set_expr(left);
                self.visit_set_expr(right);
            }
            _ => {}
        }
    }

    fn visit_table_with_joins(&mut self, table_with_joins: &TableWithJoins) {
        self.visit_table_factor(&table_with_joins.relation);
        for join in &table_with_joins.joins {
            self.visit_table_factor(&join.relation);
        }
    }

    fn visit_table_factor(&mut self, factor: &TableFactor) {
        match factor {
            TableFactor::Table { name, alias, .. } => {
                let Some(mut table) = TableReference::from_object_name(name) else {
                    return;
                };
                if table.schema.is_none() && self.cte_names.contains(&table.name.to_lowercase()) {
                    return;
                }
                table.alias = alias.as_ref().map(|a| a.name.value.clone());
                if !self
                    .tables
                    .iter()
                    .any(|t| t.schema == table.schema && t.name == table.name)
                {
                    self.tables.push(table);
                }
            }
            TableFactor::Derived { subquery, .. } => self.visit_query(subquery),
            TableFactor::NestedJoin {
                table_with_joins, ..
            } => self.visit_table_with_joins(table_with_joins),
            _ => {}
        }
    }
}

/// A reference to a table in a SQL statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableReference {
    /// Schema qualifier, if written.
    pub schema: Option<String>,
    /// The table name.
    pub name: String,
    /// Optional alias.
    pub alias: Option<String>,
}

impl TableReference {
    fn from_object_name(name: &ObjectName) -> Option<Self> {
        let parts: Vec<&str> = name
            .0
            .iter()
            .filter_map(|part| match part {
                ObjectNamePart::Identifier(ident) => Some(ident.value.as_str()),
                _ => None,
            })
            .collect();
        let (table, rest) = parts.split_last()?;
        Some(Self {
            schema: rest.last().map(|s| s.to_string()),
            name: table.to_string(),
            alias: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(sql: &str) -> Vec<String> {
        SqlAnalyzer::new()
            .tables_in(sql)
            .into_iter()
            .map(|t| match t.schema {
                Some(schema) => format!("{}.{}", schema, t.name),
                None => t.name,
            })
            .collect()
    }

    #[test]
    fn test_parse_simple_select() {
        let analyzer = SqlAnalyzer::new();
        let stmts = analyzer.parse("SELECT * FROM users").unwrap();
        assert_eq!(stmts.len(), 1);

        let tables = analyzer.extract_tables(&stmts[0]);
        assert_eq!(tables.len(), 1);
        assert_eq!(tables[0].name, "users");
        assert_eq!(tables[0].schema, None);
    }

    #[test]
    fn test_parse_join() {
        let analyzer = SqlAnalyzer::new();
        let stmts = analyzer
            .parse("SELECT * FROM orders o JOIN users u ON o.user_id = u.id")
            .unwrap();

        let tables = analyzer.extract_tables(&stmts[0]);
        assert_eq!(tables.len(), 2);
        assert_eq!(tables[0].name, "orders");
        assert_eq!(tables[0].alias, Some("o".to_string()));
        assert_eq!(tables[1].name, "users");
        assert_eq!(tables[1].alias, Some("u".to_string()));
    }

    #[test]
    fn test_schema_qualified_table() {
        assert_eq!(names("SELECT COUNT(*) FROM demo1.sales"), vec!["demo1.sales"]);
    }

    #[test]
    fn test_subqueries_unions_and_ctes() {
        assert_eq!(
            names(
                "WITH recent AS (SELECT * FROM sales WHERE sold_at > now() - interval '1 day') \
                 SELECT r.id FROM recent r JOIN (SELECT id FROM products) p ON p.id = r.product_id \
                 UNION SELECT id FROM returns"
            ),
            vec!["sales", "products", "returns"]
        );
    }

    #[test]
    fn test_duplicates_collapsed() {
        assert_eq!(
            names("SELECT * FROM sales a JOIN sales b ON a.id = b.parent_id"),
            vec!["sales"]
        );
    }

    #[test]
    fn test_unparseable_yields_no_tables() {
        assert!(names("SELEKT nothing").is_empty());
        assert!(names("SELECT 1").is_empty());
    }
}
