// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Query access control.
//!
//! Ad-hoc queries must start with `select` and must not contain any
//! blacklisted keyword as a standalone token. Matching is case-insensitive.

use regex::Regex;
use thiserror::Error;

/// Query filter errors.
#[derive(Debug, Error)]
pub enum QueryFilterError {
    #[error("Invalid blacklist pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Outcome of classifying a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Query may be forwarded to the store.
    Allowed,
    /// Query must not be executed.
    Denied,
}

impl Classification {
    /// True when the query may be executed.
    pub fn is_allowed(self) -> bool {
        self == Classification::Allowed
    }
}

const WHITELIST: &str = r"^select\s+";

/// Compiled blacklist and whitelist matchers.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    blacklist: Option<Regex>,
    whitelist: Regex,
}

impl QueryValidator {
    /// Compile blacklist terms into a single matcher.
    ///
    /// Blank terms are skipped. With no terms left, nothing is denied by
    /// the blacklist.
    pub fn compile<I, S>(terms: I) -> Result<Self, QueryFilterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let patterns: Vec<String> = terms
            .into_iter()
            .map(|t| t.as_ref().trim().to_lowercase())
            .filter(|t| !t.is_empty())
            .map(|t| term_pattern(&regex::escape(&t)))
            .collect();

        let blacklist = if patterns.is_empty() {
            None
        } else {
            Some(Regex::new(&format!("({})", patterns.join("|")))?)
        };

        Ok(Self {
            blacklist,
            whitelist: Regex::new(WHITELIST)?,
        })
    }

    /// Classify a query string.
    pub fn classify(&self, query: &str) -> Classification {
        let query = query.to_lowercase();

        let blacklisted = self
            .blacklist
            .as_ref()
            .is_some_and(|re| re.is_match(&query));

        if !blacklisted && self.whitelist.is_match(&query) {
            Classification::Allowed
        } else {
            Classification::Denied
        }
    }

    /// Whether any blacklist term is configured.
    pub fn has_blacklist(&self) -> bool {
        self.blacklist.is_some()
    }
}

/// Whole-token match for one term: at statement start, between whitespace,
/// at statement end, alone, or right after a `;`.
fn term_pattern(t: &str) -> String {
    format!(
        r"^({t}\s+.*)|(.*\s+{t}\s+.*)|(.*\s+{t}$)|^({t}$)|(.*;{t}\s+.*)|(.*;{t}$)",
        t = t
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator(terms: &[&str]) -> QueryValidator {
        QueryValidator::compile(terms.iter().copied()).unwrap()
    }

    #[test]
    fn test_select_allowed() {
        let v = validator(&["drop", "delete"]);
        assert_eq!(v.classify("select * from x"), Classification::Allowed);
        assert_eq!(v.classify("SELECT value FROM cpu"), Classification::Allowed);
    }

    #[test]
    fn test_blacklisted_term_denied() {
        let v = validator(&["drop", "delete"]);
        assert_eq!(
            v.classify("SELECT * FROM x; DROP TABLE x"),
            Classification::Denied
        );
        assert_eq!(v.classify("select * from x;drop"), Classification::Denied);
        assert_eq!(v.classify("select * from x;delete y"), Classification::Denied);
        assert_eq!(v.classify("select * from x delete"), Classification::Denied);
        assert_eq!(v.classify("drop"), Classification::Denied);
    }

    #[test]
    fn test_term_inside_identifier_allowed() {
        let v = validator(&["drop"]);
        assert_eq!(
            v.classify("select dropped_frames from camera"),
            Classification::Allowed
        );
        assert_eq!(v.classify("select * from backdrop"), Classification::Allowed);
    }

    #[test]
    fn test_non_select_denied() {
        let v = validator(&[]);
        assert!(!v.has_blacklist());
        assert_eq!(v.classify("show databases"), Classification::Denied);
        assert_eq!(v.classify("selectx from y"), Classification::Denied);
        assert_eq!(v.classify(""), Classification::Denied);
        assert_eq!(v.classify("  select * from x"), Classification::Denied);
    }

    #[test]
    fn test_empty_blacklist_allows_any_select() {
        let v = validator(&["", "   "]);
        assert!(!v.has_blacklist());
        assert_eq!(
            v.classify("select * from x; drop measurement x"),
            Classification::Allowed
        );
    }

    #[test]
    fn test_terms_case_insensitive_and_escaped() {
        let v = validator(&["DROP", "into.x"]);
        assert_eq!(v.classify("select * from t; drop t"), Classification::Denied);
        assert_eq!(v.classify("select a into.x from b"), Classification::Denied);
        // "." is literal, not a wildcard
        assert_eq!(v.classify("select a intoax from b"), Classification::Allowed);
    }

    #[test]
    fn test_classification_property() {
        let v = validator(&["drop", "delete", "grant"]);
        let cases = [
            ("select * from a", true),
            ("select * from a where b = 'drop'", true),
            ("select * from a where b = drop", false),
            ("select grant from a", false),
            ("delete from a", false),
            ("insert a b=1", false),
        ];
        for (query, allowed) in cases {
            assert_eq!(v.classify(query).is_allowed(), allowed, "query: {}", query);
        }
    }
}
