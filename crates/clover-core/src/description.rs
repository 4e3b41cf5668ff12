//! Human-authored table and column metadata.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Kind of catalog object a description refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObjectType {
    #[default]
    Table,
    View,
}

impl ObjectType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::View => "view",
        }
    }

    /// Map an `information_schema.tables.table_type` value.
    pub fn from_table_type(table_type: &str) -> Self {
        if table_type.eq_ignore_ascii_case("VIEW") {
            Self::View
        } else {
            Self::Table
        }
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ObjectType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "view" => Ok(Self::View),
            other => Err(format!("unknown object type: {}", other)),
        }
    }
}

/// Metadata for one column.
///
/// Field names also accept the historical keys used by older description
/// files (`тип`, `описание`, `теги`, `заполнитель`).
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ColumnDescription {
    #[serde(default, alias = "тип", skip_serializing_if = "Option::is_none")]
    pub datatype: Option<String>,

    /// Example value shown to the query generator.
    #[serde(
        default,
        alias = "example",
        alias = "заполнитель",
        skip_serializing_if = "Option::is_none"
    )]
    pub placeholder: Option<String>,

    #[serde(
        default,
        alias = "теги",
        deserialize_with = "deserialize_tags",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub tags: Vec<String>,

    #[serde(default, alias = "описание")]
    pub description: String,
}

impl ColumnDescription {
    /// Whether nothing beyond the column name is known.
    pub fn is_empty(&self) -> bool {
        self.datatype.is_none()
            && self.placeholder.is_none()
            && self.tags.is_empty()
            && self.description.is_empty()
    }
}

/// Tags are stored either as a list or as one comma-separated string.
fn deserialize_tags<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Tags {
        List(Vec<String>),
        Joined(String),
        Missing(()),
    }

    let tags = match Tags::deserialize(deserializer)? {
        Tags::List(list) => list,
        Tags::Joined(joined) => joined.split(',').map(str::to_string).collect(),
        Tags::Missing(()) => Vec::new(),
    };
    Ok(tags
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect())
}

/// Persisted description of one table or view, unique on
/// `(database_name, table_name)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableDescription {
    pub database_name: String,

    pub table_name: String,

    #[serde(default)]
    pub object_type: ObjectType,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub columns: BTreeMap<String, ColumnDescription>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_from: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub import_date: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TableDescription {
    pub fn new(database_name: impl Into<String>, table_name: impl Into<String>) -> Self {
        Self {
            database_name: database_name.into(),
            table_name: table_name.into(),
            object_type: ObjectType::Table,
            description: String::new(),
            columns: BTreeMap::new(),
            imported_from: None,
            import_date: None,
            note: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_column(mut self, name: impl Into<String>, column: ColumnDescription) -> Self {
        self.columns.insert(name.into(), column);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_accepts_legacy_keys() {
        let json = r#"{"тип": "integer", "описание": "Номер чека", "теги": "чек, номер"}"#;
        let column: ColumnDescription = serde_json::from_str(json).unwrap();
        assert_eq!(column.datatype.as_deref(), Some("integer"));
        assert_eq!(column.description, "Номер чека");
        assert_eq!(column.tags, vec!["чек", "номер"]);
    }

    #[test]
    fn test_column_tags_as_list() {
        let json = r#"{"description": "Amount", "tags": ["money", " total "]}"#;
        let column: ColumnDescription = serde_json::from_str(json).unwrap();
        assert_eq!(column.tags, vec!["money", "total"]);
        assert!(column.placeholder.is_none());
    }

    #[test]
    fn test_column_null_tags() {
        let column: ColumnDescription = serde_json::from_str(r#"{"tags": null}"#).unwrap();
        assert!(column.tags.is_empty());
        assert!(column.is_empty());
    }

    #[test]
    fn test_table_description_defaults() {
        let json = r#"{"database_name": "cloverdash", "table_name": "sales"}"#;
        let table: TableDescription = serde_json::from_str(json).unwrap();
        assert_eq!(table.object_type, ObjectType::Table);
        assert!(table.columns.is_empty());
    }

    #[test]
    fn test_object_type_from_catalog() {
        assert_eq!(ObjectType::from_table_type("VIEW"), ObjectType::View);
        assert_eq!(ObjectType::from_table_type("BASE TABLE"), ObjectType::Table);
        assert_eq!("view".parse::<ObjectType>().unwrap(), ObjectType::View);
        assert!("index".parse::<ObjectType>().is_err());
    }
}
