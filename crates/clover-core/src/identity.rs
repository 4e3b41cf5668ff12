//! User identity, role mappings and search paths.

use crate::config::UserIdType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque, stable identifier of an end user (as supplied by the API layer).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Coerce the identifier to the primitive type used by the mapping store.
    ///
    /// Returns `None` when the value cannot be represented (e.g. `"alice"` for
    /// a `bigint` column); callers treat that as "no mapping".
    pub fn coerce(&self, ty: UserIdType) -> Option<UserKey> {
        let raw = self.0.trim();
        match ty {
            UserIdType::Text => Some(UserKey::Text(self.0.clone())),
            UserIdType::Bigint => raw.parse::<i64>().ok().map(UserKey::Bigint),
            UserIdType::Uuid => Uuid::parse_str(raw).ok().map(UserKey::Uuid),
        }
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for UserId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A user id in the primitive type of the mapping store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UserKey {
    Text(String),
    Bigint(i64),
    Uuid(Uuid),
}

impl fmt::Display for UserKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => f.write_str(s),
            Self::Bigint(n) => write!(f, "{}", n),
            Self::Uuid(u) => write!(f, "{}", u),
        }
    }
}

/// Mapping from a user to the database role they query under.
///
/// At most one row exists per (user_id, database_name, schema_name), and
/// `role_name` is unique across all rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleMapping {
    pub user_id: String,
    pub database_name: String,
    pub schema_name: String,
    pub role_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl UserRoleMapping {
    pub fn new(
        user_id: impl Into<String>,
        database_name: impl Into<String>,
        schema_name: impl Into<String>,
        role_name: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            user_id: user_id.into(),
            database_name: database_name.into(),
            schema_name: schema_name.into(),
            role_name: role_name.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Ordered list of schemas consulted when resolving unqualified names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchPath {
    schemas: Vec<String>,
}

impl SearchPath {
    /// Search path for a resolved schema: `<schema>, <default>` for a
    /// non-default schema, `<default>` alone otherwise.
    pub fn for_schema(schema: Option<&str>, default_schema: &str) -> Self {
        let mut schemas = Vec::with_capacity(2);
        if let Some(schema) = schema.map(str::trim).filter(|s| !s.is_empty())
            && schema != default_schema
        {
            schemas.push(schema.to_string());
        }
        schemas.push(default_schema.to_string());
        Self { schemas }
    }

    /// The `public`-only search path.
    pub fn public() -> Self {
        Self::for_schema(None, "public")
    }

    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    /// The first schema consulted.
    pub fn primary(&self) -> &str {
        self.schemas.first().map(String::as_str).unwrap_or("public")
    }

    /// Quoted list suitable for `SET search_path TO ...`.
    pub fn to_sql(&self) -> String {
        self.schemas
            .iter()
            .map(|s| quote_ident(s))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for SearchPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.schemas.join(", "))
    }
}

/// Quote a Postgres identifier (role, schema, table) for interpolation.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}
