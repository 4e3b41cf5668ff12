//! Aggregates over access log entries.

use crate::event::AccessLogEntry;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

/// Number of schemas listed in a daily report.
pub const TOP_SCHEMAS: usize = 5;

/// Access counters for one schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchemaAccessStats {
    pub access_count: u64,
    pub failed_count: u64,
    pub tables: BTreeSet<String>,
    pub last_access: Option<DateTime<Utc>>,
}

/// Access statistics for one user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccessStats {
    pub user_id: String,
    pub total_accesses: u64,
    pub failed_accesses: u64,
    pub schemas: BTreeMap<String, SchemaAccessStats>,
    pub last_access: Option<DateTime<Utc>>,
}

impl UserAccessStats {
    /// Fold the given entries; entries for other users are ignored.
    pub fn from_entries<'a>(
        user_id: &str,
        entries: impl IntoIterator<Item = &'a AccessLogEntry>,
    ) -> Self {
        let mut stats = Self {
            user_id: user_id.to_string(),
            total_accesses: 0,
            failed_accesses: 0,
            schemas: BTreeMap::new(),
            last_access: None,
        };

        for entry in entries.into_iter().filter(|e| e.user_id == user_id) {
            stats.total_accesses += 1;
            let schema = stats.schemas.entry(entry.schema_name.clone()).or_default();
            schema.access_count += 1;
            schema.tables.insert(entry.table_name.clone());
            schema.last_access = schema.last_access.max(Some(entry.occurred_at));
            if !entry.success {
                stats.failed_accesses += 1;
                schema.failed_count += 1;
            }
            stats.last_access = stats.last_access.max(Some(entry.occurred_at));
        }
        stats
    }

    /// Number of distinct schemas the user touched.
    pub fn distinct_schemas(&self) -> usize {
        self.schemas.len()
    }
}

/// Summary of one UTC day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub unique_users: usize,
    pub total_accesses: u64,
    pub total_failures: u64,
    /// Percentage of successful accesses (0 when there were none).
    pub success_rate: f64,
    /// Most used schemas with their access counts, busiest first.
    pub top_schemas: Vec<(String, u64)>,
}

impl DailyReport {
    /// Summarise entries that occurred on `date` (UTC).
    pub fn from_entries<'a>(
        date: NaiveDate,
        entries: impl IntoIterator<Item = &'a AccessLogEntry>,
    ) -> Self {
        let mut users = HashSet::new();
        let mut schema_counts: HashMap<&str, u64> = HashMap::new();
        let mut total = 0u64;
        let mut failures = 0u64;

        for entry in entries
            .into_iter()
            .filter(|e| e.occurred_at.date_naive() == date)
        {
            total += 1;
            if !entry.success {
                failures += 1;
            }
            users.insert(entry.user_id.as_str());
            *schema_counts.entry(entry.schema_name.as_str()).or_default() += 1;
        }

        let mut top_schemas: Vec<(String, u64)> = schema_counts
            .into_iter()
            .map(|(schema, count)| (schema.to_string(), count))
            .collect();
        top_schemas.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        top_schemas.truncate(TOP_SCHEMAS);

        let success_rate = if total == 0 {
            0.0
        } else {
            (total - failures) as f64 / total as f64 * 100.0
        };

        Self {
            date,
            unique_users: users.len(),
            total_accesses: total,
            total_failures: failures,
            success_rate,
            top_schemas,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AccessType;
    use chrono::TimeZone;

    fn entry(user: &str, schema: &str, table: &str, success: bool, hour: u32) -> AccessLogEntry {
        AccessLogEntry::builder(user, schema, table, AccessType::Query)
            .success(success)
            .occurred_at(Utc.with_ymd_and_hms(2026, 3, 14, hour, 0, 0).unwrap())
            .build()
    }

    #[test]
    fn test_user_stats_breakdown() {
        let entries = vec![
            entry("u1", "demo1", "sales", true, 9),
            entry("u1", "demo1", "products", false, 10),
            entry("u1", "public", "sales", true, 11),
            entry("u2", "demo2", "sales", true, 12),
        ];
        let stats = UserAccessStats::from_entries("u1", &entries);

        assert_eq!(stats.total_accesses, 3);
        assert_eq!(stats.failed_accesses, 1);
        assert_eq!(stats.distinct_schemas(), 2);
        let demo1 = &stats.schemas["demo1"];
        assert_eq!(demo1.access_count, 2);
        assert_eq!(demo1.failed_count, 1);
        assert_eq!(demo1.tables.len(), 2);
        assert_eq!(stats.last_access, Some(entries[2].occurred_at));
    }

    #[test]
    fn test_user_stats_unknown_user() {
        let stats = UserAccessStats::from_entries("nobody", &[]);
        assert_eq!(stats.total_accesses, 0);
        assert_eq!(stats.last_access, None);
    }

    #[test]
    fn test_daily_report() {
        let mut entries = vec![
            entry("u1", "demo1", "sales", true, 9),
            entry("u1", "demo1", "sales", true, 10),
            entry("u2", "demo1", "sales", false, 10),
            entry("u3", "public", "products", true, 11),
        ];
        for (i, schema) in ["s1", "s2", "s3", "s4", "s5"].iter().enumerate() {
            entries.push(entry("u4", schema, "t", true, 12 + i as u32));
        }
        let mut other_day = entry("u9", "demo1", "sales", true, 9);
        other_day.occurred_at += chrono::Duration::days(1);
        entries.push(other_day);

        let date = NaiveDate::from_ymd_opt(2026, 3, 14).unwrap();
        let report = DailyReport::from_entries(date, &entries);

        assert_eq!(report.unique_users, 4);
        assert_eq!(report.total_accesses, 9);
        assert_eq!(report.total_failures, 1);
        assert!((report.success_rate - 800.0 / 9.0).abs() < 1e-9);
        assert_eq!(report.top_schemas.len(), TOP_SCHEMAS);
        assert_eq!(report.top_schemas[0], ("demo1".to_string(), 3));
        assert_eq!(report.top_schemas[1], ("public".to_string(), 1));
    }

    #[test]
    fn test_empty_daily_report() {
        let date = NaiveDate::from_ymd_opt(2026, 1, 1).unwrap();
        let report = DailyReport::from_entries(date, &[]);
        assert_eq!(report.success_rate, 0.0);
        assert!(report.top_schemas.is_empty());
    }
}
