//! Per-feed filter rules.
//!
//! A feed carries an ordered list of [`FilterRule`]s.  Before any matching
//! the list is compiled once into an immutable [`FilterSet`]; matching then
//! never mutates anything, so a set can be shared freely.
//!
//! A rule matches an [`Entry`] when both hold:
//!
//! * at least one rule category is among the entry's categories (feed-level
//!   or payload-level), and
//! * at least one search pattern matches the title or the description.
//!
//! The category gate is mandatory: a rule with no categories never matches.

use std::collections::HashSet;

use regex::Regex;
use tracing::warn;

use crate::entry::Entry;
use crate::error::{Error, Result};

/// A filter rule as configured, patterns still uncompiled.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterRule {
    pub name: String,
    pub categories: Vec<String>,
    /// Regular expressions tried against the title and the description.
    pub search: Vec<String>,
    /// Overrides the feed's auto-download flag for entries this rule matches.
    pub auto_download: Option<bool>,
}

/// A rule after its patterns have been compiled.
#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub name: String,
    categories: HashSet<String>,
    patterns: Vec<Regex>,
    pub auto_download: Option<bool>,
}

impl CompiledRule {
    /// Compile `rule`.  A pattern that fails to compile is dropped with a
    /// warning; the remaining patterns stay active.
    fn compile(rule: &FilterRule) -> Self {
        let patterns = rule
            .search
            .iter()
            .filter_map(|pattern| match Regex::new(pattern) {
                Ok(re) => Some(re),
                Err(e) => {
                    warn!(rule = %rule.name, %pattern, error = %e, "skipping invalid search pattern");
                    None
                }
            })
            .collect();

        Self {
            name: rule.name.clone(),
            categories: rule.categories.iter().cloned().collect(),
            patterns,
            auto_download: rule.auto_download,
        }
    }

    pub fn has_category(&self, category: &str) -> bool {
        self.categories.contains(category)
    }

    /// Number of patterns that compiled.
    pub fn active_patterns(&self) -> usize {
        self.patterns.len()
    }

    fn matches(&self, entry: &Entry) -> bool {
        if !entry.all_categories().any(|c| self.has_category(c)) {
            return false;
        }
        self.patterns
            .iter()
            .any(|re| re.is_match(&entry.title) || re.is_match(&entry.description))
    }
}

/// An immutable, compiled set of rules evaluated in configuration order.
#[derive(Debug, Clone, Default)]
pub struct FilterSet {
    rules: Vec<CompiledRule>,
}

impl FilterSet {
    pub fn compile(rules: &[FilterRule]) -> Self {
        let rules: Vec<CompiledRule> = rules.iter().map(CompiledRule::compile).collect();
        for rule in rules.iter().filter(|r| r.active_patterns() == 0) {
            warn!(rule = %rule.name, "no usable search pattern, rule never matches");
        }
        Self { rules }
    }

    /// First rule matching `entry`, or `None`.
    pub fn matches(&self, entry: &Entry) -> Option<&CompiledRule> {
        self.rules.iter().find(|rule| rule.matches(entry))
    }

    /// Restrict the set to the named rules, keeping configuration order.
    ///
    /// # Errors
    ///
    /// Any name that is not a rule of this set.
    pub fn select(&self, names: &[String]) -> Result<Self> {
        if let Some(unknown) = names
            .iter()
            .find(|n| !self.rules.iter().any(|r| &r.name == *n))
        {
            return Err(Error::Config(format!("Unknown filter: {unknown}")));
        }
        Ok(Self {
            rules: self
                .rules
                .iter()
                .filter(|r| names.contains(&r.name))
                .cloned()
                .collect(),
        })
    }

    pub fn rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::tests::make_entry;

    fn rule(name: &str, categories: &[&str], search: &[&str]) -> FilterRule {
        FilterRule {
            name: name.to_string(),
            categories: categories.iter().map(|c| c.to_string()).collect(),
            search: search.iter().map(|s| s.to_string()).collect(),
            auto_download: None,
        }
    }

    #[test]
    fn matches_when_category_and_pattern_agree() {
        let set = FilterSet::compile(&[rule("episodes", &["x264"], &[r"S\d+E\d+"])]);
        let entry = make_entry("Show.S02E05", &["x264", "720p"]);

        let hit = set.matches(&entry).expect("should match");
        assert_eq!(hit.name, "episodes");
    }

    #[test]
    fn category_gate_is_mandatory() {
        let set = FilterSet::compile(&[rule("episodes", &["x264"], &[r"S\d+E\d+"])]);
        let entry = make_entry("Show.S02E05", &["720p"]);

        assert!(set.matches(&entry).is_none());
    }

    #[test]
    fn rule_without_categories_never_matches() {
        let set = FilterSet::compile(&[rule("any", &[], &[".*"])]);
        assert!(set.matches(&make_entry("Foo", &["x264"])).is_none());
    }

    #[test]
    fn payload_categories_pass_the_gate() {
        let set = FilterSet::compile(&[rule("hd", &["HD"], &["Foo"])]);
        let mut entry = make_entry("Foo", &[]);
        entry.payload_categories = vec!["TV".into(), "HD".into()];

        assert!(set.matches(&entry).is_some());
    }

    #[test]
    fn pattern_can_match_description() {
        let set = FilterSet::compile(&[rule("desc", &["x264"], &["remastered"])]);
        let mut entry = make_entry("Foo", &["x264"]);
        assert!(set.matches(&entry).is_none());

        entry.description = "a remastered classic".into();
        assert!(set.matches(&entry).is_some());
    }

    #[test]
    fn invalid_pattern_disables_only_itself() {
        let set = FilterSet::compile(&[rule("mixed", &["x264"], &["(unclosed", "Foo"])]);
        assert_eq!(set.rules()[0].active_patterns(), 1);
        assert!(set.matches(&make_entry("Foo", &["x264"])).is_some());
    }

    #[test]
    fn first_matching_rule_wins() {
        let set = FilterSet::compile(&[
            rule("first", &["x264"], &["Foo"]),
            rule("second", &["x264"], &["F"]),
        ]);
        assert_eq!(set.matches(&make_entry("Foo", &["x264"])).unwrap().name, "first");
        assert_eq!(set.matches(&make_entry("Fab", &["x264"])).unwrap().name, "second");
    }

    #[test]
    fn matching_is_case_sensitive_by_default() {
        let set = FilterSet::compile(&[rule("r", &["x264"], &["foo"])]);
        assert!(set.matches(&make_entry("Foo", &["x264"])).is_none());

        let set = FilterSet::compile(&[rule("r", &["x264"], &["(?i)foo"])]);
        assert!(set.matches(&make_entry("Foo", &["x264"])).is_some());
    }

    #[test]
    fn has_category_is_set_membership() {
        let set = FilterSet::compile(&[rule("r", &["x264", "720p"], &["x"])]);
        let compiled = &set.rules()[0];
        assert!(compiled.has_category("720p"));
        assert!(!compiled.has_category("1080p"));
    }

    #[test]
    fn select_keeps_named_rules_in_order() {
        let set = FilterSet::compile(&[
            rule("a", &["x"], &["a"]),
            rule("b", &["x"], &["b"]),
            rule("c", &["x"], &["c"]),
        ]);
        let picked = set.select(&["c".to_string(), "a".to_string()]).unwrap();
        let names: Vec<_> = picked.rules().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["a", "c"]);
    }

    #[test]
    fn select_rejects_unknown_names() {
        let set = FilterSet::compile(&[rule("a", &["x"], &["a"])]);
        assert!(set.select(&["nope".to_string()]).is_err());
    }
}
