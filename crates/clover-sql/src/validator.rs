//! Read-only statement policy.
//!
//! The validator works on the token stream rather than the parsed AST so that
//! any statement Postgres accepts is judged on its lexical content, and so
//! string literals, quoted identifiers and comments are never mistaken for
//! keywords or separators.
//!
//! Rules are checked in order and the first violation wins:
//!
//! 1. exactly one statement (a trailing `;` is allowed)
//! 2. the statement starts with an allowed keyword (`SELECT` by default)
//! 3. no denied keyword appears outside quoting
//! 4. the statement is not longer than the configured maximum
//! 5. no denied function is called

use clover_core::ValidatorConfig;
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};
use std::collections::HashSet;
use std::fmt;
use thiserror::Error;

/// Which rule a statement violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RuleViolation {
    /// The text could not be tokenized (e.g. unterminated literal).
    Unparseable,
    MultipleStatements,
    LeadingKeyword,
    DeniedKeyword,
    TooLong,
    DeniedFunction,
}

impl RuleViolation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unparseable => "unparseable",
            Self::MultipleStatements => "multiple_statements",
            Self::LeadingKeyword => "leading_keyword",
            Self::DeniedKeyword => "denied_keyword",
            Self::TooLong => "too_long",
            Self::DeniedFunction => "denied_function",
        }
    }
}

impl fmt::Display for RuleViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A refused statement.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("query rejected ({rule}): {reason}")]
pub struct Rejection {
    pub rule: RuleViolation,
    /// Human-readable reason, suitable for logs.
    pub reason: String,
}

impl Rejection {
    fn new(rule: RuleViolation, reason: impl Into<String>) -> Self {
        Self {
            rule,
            reason: reason.into(),
        }
    }
}

/// A statement that passed every rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedQuery {
    /// The statement text without surrounding whitespace or trailing `;`.
    pub sql: String,
    /// Upper-cased leading keyword.
    pub leading_keyword: String,
}

/// Enforces the read-only, single-statement policy.
#[derive(Debug, Clone)]
pub struct SqlValidator {
    max_length: usize,
    allowed_leading: HashSet<String>,
    denied_keywords: HashSet<String>,
    denied_functions: HashSet<String>,
}

impl Default for SqlValidator {
    fn default() -> Self {
        Self::new(&ValidatorConfig::default())
    }
}

impl SqlValidator {
    /// Build a validator from configuration. Keyword lists are matched
    /// case-insensitively.
    pub fn new(config: &ValidatorConfig) -> Self {
        Self {
            max_length: config.max_length,
            allowed_leading: config
                .allowed_leading_keywords
                .iter()
                .map(|k| k.trim().to_ascii_uppercase())
                .collect(),
            denied_keywords: config
                .denied_keywords
                .iter()
                .map(|k| k.trim().to_ascii_uppercase())
                .collect(),
            denied_functions: config
                .denied_functions
                .iter()
                .map(|f| f.trim().to_ascii_lowercase())
                .collect(),
        }
    }

    /// Check a candidate statement.
    pub fn validate(&self, sql: &str) -> Result<ValidatedQuery, Rejection> {
        let dialect = PostgreSqlDialect {};
        let tokens = Tokenizer::new(&dialect, sql)
            .tokenize_with_location()
            .map_err(|e| {
                Rejection::new(
                    RuleViolation::Unparseable,
                    format!("statement could not be tokenized: {}", e),
                )
            })?;

        let significant: Vec<&TokenWithSpan> = tokens
            .iter()
            .filter(|t| !matches!(t.token, Token::Whitespace(_) | Token::EOF))
            .collect();

        // Rule 1: everything after the first `;` must be further `;`.
        let terminator = significant
            .iter()
            .position(|t| matches!(t.token, Token::SemiColon));
        let body: &[&TokenWithSpan] = match terminator {
            Some(pos) => {
                if significant[pos..]
                    .iter()
                    .any(|t| !matches!(t.token, Token::SemiColon))
                {
                    return Err(Rejection::new(
                        RuleViolation::MultipleStatements,
                        "only a single statement is allowed",
                    ));
                }
                &significant[..pos]
            }
            None => &significant[..],
        };

        // Rule 2
        let leading_keyword = match body.first().map(|t| &t.token) {
            Some(Token::Word(word)) if word.quote_style.is_none() => {
                word.value.to_ascii_uppercase()
            }
            Some(other) => {
                return Err(Rejection::new(
                    RuleViolation::LeadingKeyword,
                    format!("statement must begin with {} (found `{}`)", self.allowed_list(), other),
                ));
            }
            None => {
                return Err(Rejection::new(
                    RuleViolation::LeadingKeyword,
                    "statement is empty",
                ));
            }
        };
        if !self.allowed_leading.contains(&leading_keyword) {
            return Err(Rejection::new(
                RuleViolation::LeadingKeyword,
                format!(
                    "statement must begin with {} (found {})",
                    self.allowed_list(),
                    leading_keyword
                ),
            ));
        }

        // Rule 3
        for token in body {
            if let Token::Word(word) = &token.token
                && word.quote_style.is_none()
            {
                let upper = word.value.to_ascii_uppercase();
                if self.denied_keywords.contains(&upper) {
                    return Err(Rejection::new(
                        RuleViolation::DeniedKeyword,
                        format!("keyword {} is not allowed", upper),
                    ));
                }
            }
        }

        // Rule 4
        if sql.len() > self.max_length {
            return Err(Rejection::new(
                RuleViolation::TooLong,
                format!(
                    "statement length {} exceeds the maximum of {}",
                    sql.len(),
                    self.max_length
                ),
            ));
        }

        // Rule 5: a (possibly quoted, possibly schema-qualified) name followed by `(`.
        for pair in body.windows(2) {
            if let (Token::Word(word), Token::LParen) = (&pair[0].token, &pair[1].token) {
                let name = word.value.to_ascii_lowercase();
                if self.denied_functions.contains(&name) {
                    return Err(Rejection::new(
                        RuleViolation::DeniedFunction,
                        format!("function {} is not allowed", name),
                    ));
                }
            }
        }

        let statement = match (body.first(), body.last()) {
            (Some(first), Some(last)) => slice_between(sql, first.span.start, last.span.end),
            _ => sql.trim(),
        };

        Ok(ValidatedQuery {
            sql: statement.to_string(),
            leading_keyword,
        })
    }

    /// Shorthand for `validate(sql).is_ok()`.
    pub fn is_allowed(&self, sql: &str) -> bool {
        self.validate(sql).is_ok()
    }

    fn allowed_list(&self) -> String {
        let mut allowed: Vec<&str> = self.allowed_leading.iter().map(String::as_str).collect();
        allowed.sort_unstable();
        allowed.join("/")
    }
}

/// Byte offset of a 1-based line/column location (columns count characters).
fn byte_offset(sql: &str, location: Location) -> Option<usize> {
    let (mut line, mut column) = (1u64, 1u64);
    for (offset, ch) in sql.char_indices() {
        if line == location.line && column == location.column {
            return Some(offset);
        }
        if ch == '\n' {
            line += 1;
            column = 1;
        } else {
            column += 1;
        }
    }
    (line == location.line && column == location.column).then_some(sql.len())
}

/// Source text from `start` (inclusive) to `end` (exclusive), falling back to
/// the trimmed input when the locations cannot be mapped.
fn slice_between(sql: &str, start: Location, end: Location) -> &str {
    match (byte_offset(sql, start), byte_offset(sql, end)) {
        (Some(from), Some(to)) if from < to => sql[from..to].trim(),
        _ => sql.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn validator() -> SqlValidator {
        SqlValidator::default()
    }

    fn rule(sql: &str) -> RuleViolation {
        validator().validate(sql).unwrap_err().rule
    }

    #[test]
    fn test_simple_select_allowed() {
        let ok = validator().validate("SELECT COUNT(*) FROM sales").unwrap();
        assert_eq!(ok.sql, "SELECT COUNT(*) FROM sales");
        assert_eq!(ok.leading_keyword, "SELECT");
    }

    #[test]
    fn test_stacked_statement_rejected() {
        assert_eq!(
            rule("SELECT * FROM sales; DROP TABLE sales;"),
            RuleViolation::MultipleStatements
        );
        assert_eq!(rule("SELECT 1; SELECT 2"), RuleViolation::MultipleStatements);
    }

    #[test]
    fn test_trailing_semicolon_stripped() {
        let ok = validator()
            .validate("  select id from sales;  -- done\n")
            .unwrap();
        assert_eq!(ok.sql, "select id from sales");

        let ok = validator().validate("SELECT 1;;").unwrap();
        assert_eq!(ok.sql, "SELECT 1");
    }

    #[test]
    fn test_semicolon_inside_literal_is_not_a_separator() {
        let ok = validator()
            .validate("SELECT * FROM notes WHERE body = 'a; DROP TABLE notes'")
            .unwrap();
        assert_eq!(
            ok.sql,
            "SELECT * FROM notes WHERE body = 'a; DROP TABLE notes'"
        );
    }

    #[test]
    fn test_leading_keyword_required() {
        assert_eq!(rule("DELETE FROM sales"), RuleViolation::LeadingKeyword);
        assert_eq!(rule("WITH x AS (SELECT 1) SELECT * FROM x"), RuleViolation::LeadingKeyword);
        assert_eq!(rule(""), RuleViolation::LeadingKeyword);
        assert_eq!(rule("  -- only a comment"), RuleViolation::LeadingKeyword);
        assert_eq!(rule("(SELECT 1)"), RuleViolation::LeadingKeyword);
    }

    #[test]
    fn test_leading_comments_and_case_ignored() {
        let ok = validator()
            .validate("/* generated */ -- q1\n  sElEcT name FROM products")
            .unwrap();
        assert_eq!(ok.leading_keyword, "SELECT");
        assert_eq!(ok.sql, "sElEcT name FROM products");
    }

    #[test]
    fn test_denied_keywords_outside_quotes() {
        for sql in [
            "SELECT * FROM sales WHERE id IN (DELETE FROM sales RETURNING id)",
            "SELECT 1 UNION SELECT 2 FROM t WHERE EXISTS (SELECT 1) AND drop",
            "select * into backup from sales where 1=0 or update",
            "SELECT copy FROM t",
            "SELECT * FROM t WHERE x = 1 OR Truncate",
        ] {
            assert_eq!(rule(sql), RuleViolation::DeniedKeyword, "{}", sql);
        }
    }

    #[test]
    fn test_keywords_inside_quotes_allowed() {
        validator()
            .validate("SELECT 'DROP TABLE sales' AS label, \"update\" FROM audit_rows")
            .unwrap();
        validator()
            .validate("SELECT $$ DELETE FROM x $$ AS body")
            .unwrap();
        validator()
            .validate("SELECT created_at, updated_by FROM orders -- INSERT later")
            .unwrap();
    }

    #[test]
    fn test_select_into_rejected() {
        let err = validator()
            .validate("SELECT * INTO backup FROM sales")
            .unwrap_err();
        assert_eq!(err.rule, RuleViolation::DeniedKeyword);
        assert_eq!(err.reason, "keyword INTO is not allowed");
        assert_eq!(
            rule("SELECT id INTO TEMP scratch FROM sales"),
            RuleViolation::DeniedKeyword
        );

        validator()
            .validate("SELECT 'insert into' AS note, \"into\" FROM routing")
            .unwrap();
    }

    #[test]
    fn test_too_long_rejected() {
        let config = ValidatorConfig {
            max_length: 20,
            ..Default::default()
        };
        let err = SqlValidator::new(&config)
            .validate("SELECT id, name, price FROM products")
            .unwrap_err();
        assert_eq!(err.rule, RuleViolation::TooLong);
        assert!(err.reason.contains("20"));
    }

    #[test]
    fn test_denied_functions() {
        assert_eq!(rule("SELECT pg_sleep(10)"), RuleViolation::DeniedFunction);
        assert_eq!(
            rule("SELECT pg_catalog.PG_READ_FILE('/etc/passwd')"),
            RuleViolation::DeniedFunction
        );
        assert_eq!(
            rule("SELECT \"pg_sleep\" (1)"),
            RuleViolation::DeniedFunction
        );
        assert_eq!(
            rule("SELECT nextval('orders_id_seq')"),
            RuleViolation::DeniedFunction
        );
        assert_eq!(
            rule("SELECT setval('orders_id_seq', 1)"),
            RuleViolation::DeniedFunction
        );
        // A column that happens to share the name is not a call.
        validator().validate("SELECT pg_sleep FROM timings").unwrap();
    }

    #[test]
    fn test_first_violation_wins() {
        let config = ValidatorConfig {
            max_length: 10,
            ..Default::default()
        };
        let err = SqlValidator::new(&config)
            .validate("SELECT 1; DROP TABLE sales")
            .unwrap_err();
        assert_eq!(err.rule, RuleViolation::MultipleStatements);
    }

    #[test]
    fn test_unterminated_literal_rejected() {
        assert_eq!(rule("SELECT 'oops"), RuleViolation::Unparseable);
    }

    #[test]
    fn test_legitimate_selects_accepted() {
        for sql in [
            "SELECT COUNT(*) FROM sales",
            "SELECT s.id, p.name FROM sales s JOIN products p ON p.id = s.product_id WHERE s.total > 100 ORDER BY s.id LIMIT 10",
            "SELECT date_trunc('month', sold_at) AS m, SUM(total) FROM sales GROUP BY 1 HAVING SUM(total) > 0",
            "SELECT * FROM (SELECT id FROM sales) sub",
            "SELECT name FROM products WHERE name ILIKE '%кофе%'",
            "SELECT id FROM a UNION ALL SELECT id FROM b",
            "SELECT CASE WHEN total > 0 THEN 'paid' ELSE 'free' END FROM sales",
        ] {
            assert!(validator().is_allowed(sql), "{}", sql);
        }
    }

    #[test]
    fn test_configured_leading_keywords() {
        let config = ValidatorConfig {
            allowed_leading_keywords: vec!["select".into(), "with".into()],
            ..Default::default()
        };
        let validator = SqlValidator::new(&config);
        assert!(validator.is_allowed("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(!validator.is_allowed("WITH x AS (DELETE FROM t RETURNING *) SELECT * FROM x"));
    }

    #[test]
    fn test_rejection_display() {
        let err = validator().validate("DROP TABLE sales").unwrap_err();
        assert_eq!(
            err.to_string(),
            "query rejected (leading_keyword): statement must begin with SELECT (found DROP)"
        );
    }
}
