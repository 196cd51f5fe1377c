//! Include/exclude matching of workloads
//!
//! A [`Matcher`] is a list of [`Selector`]s. A selector matches a workload
//! when its namespace filter, its label filter and its annotation filter all
//! pass; an empty filter always passes. A matcher matches when any of its
//! selectors does.

use crate::workload::Workload;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Anything that can be matched by a selector
pub trait Selectable {
    fn namespace(&self) -> &str;
    fn labels(&self) -> &BTreeMap<String, String>;
    fn annotations(&self) -> &BTreeMap<String, String>;
}

impl Selectable for Workload {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    fn labels(&self) -> &BTreeMap<String, String> {
        &self.labels
    }

    fn annotations(&self) -> &BTreeMap<String, String> {
        &self.annotations
    }
}

/// One namespace + label rule
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Selector {
    /// Namespace the workload must live in; empty means any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Labels that must all be present with identical values
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub match_labels: BTreeMap<String, String>,

    /// Annotation keys that must all be present, whatever their value
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub match_annotations: Vec<String>,
}

impl Selector {
    pub fn namespace(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            ..Self::default()
        }
    }

    pub fn annotation(key: impl Into<String>) -> Self {
        Self {
            match_annotations: vec![key.into()],
            ..Self::default()
        }
    }

    pub fn matches<S: Selectable + ?Sized>(&self, s: &S) -> bool {
        if !self.namespace.is_empty() && self.namespace != s.namespace() {
            return false;
        }

        let labels = s.labels();
        let labels_match = self
            .match_labels
            .iter()
            .all(|(key, value)| labels.get(key) == Some(value));
        if !labels_match {
            return false;
        }

        let annotations = s.annotations();
        self.match_annotations
            .iter()
            .all(|key| annotations.contains_key(key))
    }
}

/// A set of selectors that can be switched off as a whole
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Matcher {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub selectors: Vec<Selector>,
}

impl Matcher {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(selectors: Vec<Selector>) -> Self {
        Self {
            enabled: true,
            selectors,
        }
    }
}

/// Evaluate `matcher` against `s`.
///
/// A disabled matcher has no opinion and yields `default_value`. Otherwise
/// the result is true on the first matching selector and false if none
/// match.
pub fn should_select<S: Selectable + ?Sized>(
    s: &S,
    matcher: &Matcher,
    default_value: bool,
) -> bool {
    if !matcher.enabled {
        return default_value;
    }
    matcher.selectors.iter().any(|selector| selector.matches(s))
}

/// Why a workload was left out of a cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exclusion {
    /// Matched by the exclude matcher
    Excluded,
    /// Not matched by an enabled include matcher
    NotIncluded,
}

impl Exclusion {
    pub fn as_str(&self) -> &'static str {
        match self {
            Exclusion::Excluded => "matched exclude selector",
            Exclusion::NotIncluded => "not matched by include selectors",
        }
    }
}

/// Combine the include and exclude matchers. Exclude wins over include.
pub fn exclusion<S: Selectable + ?Sized>(
    s: &S,
    include: &Matcher,
    exclude: &Matcher,
) -> Option<Exclusion> {
    if should_select(s, exclude, false) {
        Some(Exclusion::Excluded)
    } else if !should_select(s, include, true) {
        Some(Exclusion::NotIncluded)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::fixtures::{deployment, with_labels};

    fn labels(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_disabled_matcher_returns_default() {
        let matcher = Matcher {
            enabled: false,
            selectors: vec![Selector::namespace("other")],
        };
        let workload = deployment("default", "web");

        assert!(should_select(&workload, &matcher, true));
        assert!(!should_select(&workload, &matcher, false));
    }

    #[test]
    fn test_namespace_match() {
        let matcher = Matcher::new(vec![Selector::namespace("ns-a")]);

        assert!(should_select(&deployment("ns-a", "web"), &matcher, false));
        assert!(!should_select(&deployment("ns-b", "web"), &matcher, true));
    }

    #[test]
    fn test_labels_subset_match() {
        let matcher = Matcher::new(vec![Selector {
            match_labels: labels(&[("team", "x")]),
            ..Selector::default()
        }]);

        let matching = with_labels(deployment("default", "a"), &[("team", "x"), ("env", "prod")]);
        let other_value = with_labels(deployment("default", "b"), &[("team", "y")]);
        let missing = deployment("default", "c");

        assert!(should_select(&matching, &matcher, false));
        assert!(!should_select(&other_value, &matcher, true));
        assert!(!should_select(&missing, &matcher, true));
    }

    #[test]
    fn test_namespace_and_labels_must_both_match() {
        let matcher = Matcher::new(vec![Selector {
            namespace: "ns-a".to_string(),
            match_labels: labels(&[("team", "x")]),
            ..Selector::default()
        }]);

        let right_ns = with_labels(deployment("ns-a", "a"), &[("team", "x")]);
        let wrong_ns = with_labels(deployment("ns-b", "a"), &[("team", "x")]);

        assert!(should_select(&right_ns, &matcher, false));
        assert!(!should_select(&wrong_ns, &matcher, false));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let matcher = Matcher::new(vec![Selector::default()]);
        assert!(should_select(&deployment("anything", "web"), &matcher, false));
    }

    #[test]
    fn test_enabled_matcher_without_selectors_matches_nothing() {
        let matcher = Matcher::new(vec![]);
        assert!(!should_select(&deployment("default", "web"), &matcher, true));
    }

    #[test]
    fn test_any_selector_is_enough() {
        let matcher = Matcher::new(vec![Selector::namespace("ns-a"), Selector::namespace("ns-b")]);

        assert!(should_select(&deployment("ns-b", "web"), &matcher, false));
        assert!(!should_select(&deployment("ns-c", "web"), &matcher, false));
    }

    #[test]
    fn test_annotation_presence() {
        let matcher = Matcher::new(vec![Selector::annotation("restarter/enabled")]);
        let mut workload = deployment("default", "web");

        assert!(!should_select(&workload, &matcher, false));

        workload
            .annotations
            .insert("restarter/enabled".to_string(), String::new());
        assert!(should_select(&workload, &matcher, false));
    }

    #[test]
    fn test_exclude_takes_precedence_over_include() {
        let include = Matcher::new(vec![Selector::default()]);
        let exclude = Matcher::new(vec![Selector::namespace("kube-system")]);

        assert_eq!(
            exclusion(&deployment("kube-system", "dns"), &include, &exclude),
            Some(Exclusion::Excluded)
        );
        assert_eq!(exclusion(&deployment("default", "web"), &include, &exclude), None);
    }

    #[test]
    fn test_not_included() {
        let include = Matcher::new(vec![Selector::namespace("apps")]);
        let exclude = Matcher::disabled();

        assert_eq!(
            exclusion(&deployment("default", "web"), &include, &exclude),
            Some(Exclusion::NotIncluded)
        );
        assert_eq!(exclusion(&deployment("apps", "web"), &include, &exclude), None);
    }

    #[test]
    fn test_both_disabled_includes_everything() {
        let workload = deployment("kube-system", "dns");
        assert_eq!(
            exclusion(&workload, &Matcher::disabled(), &Matcher::disabled()),
            None
        );
    }
}
