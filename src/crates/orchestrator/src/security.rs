//! The SQL safety validator — a deterministic rule ladder plus an optional,
//! strictly-bounded LLM override. Rule-based checks are cheap; the LLM check, when enabled,
//! may override only the keyword rules (5-6), never the structural ones (2-4). This asymmetry
//! is intentional: an LLM may legitimately whitelist a false-positive keyword match but must
//! never waive the read-only/single-statement guarantees.

use regex::Regex;

use crate::state::{SqlSafety, UnsafeReason};

const FORBIDDEN_KEYWORDS: &[&str] =
    &["DROP", "DELETE", "INSERT", "UPDATE", "TRUNCATE", "ALTER", "EXEC", "EXECUTE"];

const INJECTION_PATTERNS: &[&str] = &[
    "UNION SELECT",
    "INFORMATION_SCHEMA",
    "PG_",
    "SQLITE_",
    "XP_",
    "SP_",
    "WAITFOR DELAY",
    "BENCHMARK(",
    "SLEEP(",
    "EVAL(",
];

fn create_ddl_regex() -> Regex {
    Regex::new(r"(?i)\bCREATE\s+(TABLE|DATABASE|INDEX|VIEW|PROCEDURE|FUNCTION|TRIGGER)\b").unwrap()
}

fn keyword_regex(keyword: &str) -> Regex {
    Regex::new(&format!(r"(?i)\b{}\b", regex::escape(keyword))).unwrap()
}

/// Lets a caller plug in the LLM-based safety confirmation (rule 7 of the rule ladder) without the
/// validator depending on `llm::LlmClient` directly — keeps this module pure/sync/testable.
#[async_trait::async_trait]
pub trait LlmSqlCheck: Send + Sync {
    async fn is_safe_read(&self, query: &str, schema_hint: &str) -> bool;
}

pub struct SecurityValidator;

impl SecurityValidator {
    /// Rules 1-6 and 8: fully deterministic, no I/O. Rule 7 (the LLM override) is
    /// applied separately by [`Self::validate_with_llm_check`] since it needs an async call.
    pub fn validate_rules(query: &str, disable_sql_blocking: bool) -> SqlSafety {
        if disable_sql_blocking {
            return SqlSafety::Safe;
        }

        let trimmed = query.trim();
        if trimmed.is_empty() {
            return SqlSafety::Unsafe(UnsafeReason::NotReadOnly);
        }
        let upper_start = trimmed.to_uppercase();
        if !(upper_start.starts_with("SELECT") || upper_start.starts_with("WITH")) {
            return SqlSafety::Unsafe(UnsafeReason::NotReadOnly);
        }

        if count_statement_separators(trimmed) > 1 {
            return SqlSafety::Unsafe(UnsafeReason::MultiStatement);
        }

        if trimmed.contains("/*") || trimmed.contains("--") || trimmed.contains('#') {
            return SqlSafety::Unsafe(UnsafeReason::Comments);
        }

        for keyword in FORBIDDEN_KEYWORDS {
            if keyword_regex(keyword).is_match(trimmed) {
                return SqlSafety::Unsafe(UnsafeReason::ForbiddenKeyword((*keyword).to_string()));
            }
        }
        if create_ddl_regex().is_match(trimmed) {
            return SqlSafety::Unsafe(UnsafeReason::ForbiddenKeyword("CREATE".to_string()));
        }

        let upper = trimmed.to_uppercase();
        for pattern in INJECTION_PATTERNS {
            if upper.contains(pattern) {
                return SqlSafety::Unsafe(UnsafeReason::InjectionPattern((*pattern).to_string()));
            }
        }

        SqlSafety::Safe
    }

    /// Full decision procedure including the optional LLM check (rule 7). An LLM
    /// rejection is binding; LLM approval overrides only `ForbiddenKeyword`/`InjectionPattern`
    /// verdicts, never `NotReadOnly`/`MultiStatement`/`Comments`.
    pub async fn validate_with_llm_check(
        query: &str,
        disable_sql_blocking: bool,
        use_llm_check: bool,
        schema_hint: &str,
        llm_check: Option<&dyn LlmSqlCheck>,
    ) -> SqlSafety {
        let verdict = Self::validate_rules(query, disable_sql_blocking);
        if !use_llm_check {
            return verdict;
        }
        let Some(checker) = llm_check else { return verdict };

        match verdict {
            SqlSafety::Safe => SqlSafety::Safe,
            SqlSafety::Unsafe(reason @ (UnsafeReason::NotReadOnly | UnsafeReason::MultiStatement | UnsafeReason::Comments)) => {
                SqlSafety::Unsafe(reason)
            }
            SqlSafety::Unsafe(reason) => {
                if checker.is_safe_read(query, schema_hint).await {
                    SqlSafety::Safe
                } else {
                    SqlSafety::Unsafe(UnsafeReason::LlmRejected(format!("{reason:?}")))
                }
            }
        }
    }
}

/// Counts `;` not enclosed in single/double-quoted string literals.
fn count_statement_separators(query: &str) -> usize {
    let mut count = 0;
    let mut in_single = false;
    let mut in_double = false;
    for ch in query.chars() {
        match ch {
            '\'' if !in_double => in_single = !in_single,
            '"' if !in_single => in_double = !in_double,
            ';' if !in_single && !in_double => count += 1,
            _ => {}
        }
    }
    // A single trailing semicolon is conventional and not itself multi-statement.
    let trimmed_end = query.trim_end();
    if trimmed_end.ends_with(';') && count > 0 {
        count - 1
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_sql_blocking_always_returns_safe() {
        assert_eq!(SecurityValidator::validate_rules("DROP TABLE users", true), SqlSafety::Safe);
    }

    #[test]
    fn non_select_queries_are_rejected() {
        assert_eq!(
            SecurityValidator::validate_rules("UPDATE users SET x = 1", false),
            SqlSafety::Unsafe(UnsafeReason::NotReadOnly)
        );
    }

    #[test]
    fn multiple_statements_are_rejected() {
        assert_eq!(
            SecurityValidator::validate_rules("SELECT 1; SELECT 2;", false),
            SqlSafety::Unsafe(UnsafeReason::MultiStatement)
        );
    }

    #[test]
    fn single_trailing_semicolon_is_not_multi_statement() {
        assert_eq!(
            SecurityValidator::validate_rules("SELECT created_at FROM users WHERE id = 1;", false),
            SqlSafety::Safe
        );
    }

    #[test]
    fn comment_markers_are_rejected() {
        assert_eq!(
            SecurityValidator::validate_rules("SELECT 1 -- comment", false),
            SqlSafety::Unsafe(UnsafeReason::Comments)
        );
    }

    #[test]
    fn word_boundary_matching_avoids_false_positive_on_created_at() {
        let result = SecurityValidator::validate_rules(
            "SELECT created_at FROM users WHERE id = 1",
            false,
        );
        assert_eq!(result, SqlSafety::Safe);
    }

    #[test]
    fn create_table_is_rejected_but_bare_create_identifier_is_not() {
        assert!(matches!(
            SecurityValidator::validate_rules("SELECT 1 FROM x; CREATE TABLE y (id int)", false),
            SqlSafety::Unsafe(_)
        ));
        assert_eq!(
            SecurityValidator::validate_rules("SELECT created_by FROM audit_log", false),
            SqlSafety::Safe
        );
    }

    #[test]
    fn injection_patterns_are_rejected() {
        assert!(matches!(
            SecurityValidator::validate_rules("SELECT * FROM a UNION SELECT * FROM information_schema.tables", false),
            SqlSafety::Unsafe(UnsafeReason::InjectionPattern(_))
        ));
    }

    #[tokio::test]
    async fn llm_override_applies_only_to_keyword_rules() {
        struct AlwaysApprove;
        #[async_trait::async_trait]
        impl LlmSqlCheck for AlwaysApprove {
            async fn is_safe_read(&self, _query: &str, _schema_hint: &str) -> bool {
                true
            }
        }

        // Keyword rule rejection gets overridden.
        let result = SecurityValidator::validate_with_llm_check(
            "SELECT * FROM delete_log",
            false,
            true,
            "",
            Some(&AlwaysApprove),
        )
        .await;
        assert_eq!(result, SqlSafety::Safe);

        // Structural rejection is never overridden, even with LLM approval.
        let result = SecurityValidator::validate_with_llm_check(
            "UPDATE users SET x = 1",
            false,
            true,
            "",
            Some(&AlwaysApprove),
        )
        .await;
        assert!(matches!(result, SqlSafety::Unsafe(UnsafeReason::NotReadOnly)));
    }

    #[test]
    fn validation_is_stateless_and_idempotent() {
        let query = "SELECT id FROM users";
        let first = SecurityValidator::validate_rules(query, false);
        let second = SecurityValidator::validate_rules(query, false);
        assert_eq!(first, second);
    }
}
