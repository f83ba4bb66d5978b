use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::TaxonomyId;

/// Labels lineages that contain `taxon`, unless one of `exclude` is also present.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonomicGroupRule {
    pub taxon: TaxonomyId,
    pub label: String,
    pub exclude: Vec<TaxonomyId>,
}

impl TaxonomicGroupRule {
    pub fn new(taxon: TaxonomyId, label: &str) -> Self {
        Self {
            taxon,
            label: label.to_string(),
            exclude: Vec::new(),
        }
    }

    pub fn excluding(mut self, exclude: impl IntoIterator<Item = TaxonomyId>) -> Self {
        self.exclude.extend(exclude);
        self
    }

    fn matches(&self, lineage: &HashSet<TaxonomyId>) -> bool {
        lineage.contains(&self.taxon) && self.exclude.iter().all(|id| !lineage.contains(id))
    }
}

/// One output field (e.g. `taxonomicGroup`, `tolId`) and the rules feeding it.
#[derive(Debug, Clone, Default)]
pub struct GroupSet {
    rules: HashMap<TaxonomyId, TaxonomicGroupRule>,
}

impl GroupSet {
    pub fn new(rules: impl IntoIterator<Item = TaxonomicGroupRule>) -> Self {
        Self {
            rules: rules.into_iter().map(|rule| (rule.taxon, rule)).collect(),
        }
    }

    /// Matching labels in lineage order (root first).
    pub fn classify(&self, lineage: &[TaxonomyId]) -> Vec<String> {
        let present = lineage.iter().copied().collect::<HashSet<_>>();
        lineage
            .iter()
            .filter_map(|id| self.rules.get(id))
            .filter(|rule| rule.matches(&present))
            .map(|rule| rule.label.clone())
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct GroupSets {
    sets: BTreeMap<String, GroupSet>,
}

impl GroupSets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, field: &str, set: GroupSet) {
        self.sets.insert(field.to_string(), set);
    }

    pub fn fields(&self) -> Vec<String> {
        self.sets.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty()
    }

    /// One comma-joined label string per field; fields with no match map to "".
    pub fn classify(&self, lineage: &[TaxonomyId]) -> BTreeMap<String, String> {
        self.sets
            .iter()
            .map(|(field, set)| (field.clone(), set.classify(lineage).join(",")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> Vec<TaxonomyId> {
        values.iter().copied().map(TaxonomyId::new).collect()
    }

    #[test]
    fn labels_follow_lineage_order() {
        let set = GroupSet::new([
            TaxonomicGroupRule::new(TaxonomyId::new(7742), "Vertebrata"),
            TaxonomicGroupRule::new(TaxonomyId::new(2759), "Eukaryota"),
        ]);
        let labels = set.classify(&ids(&[1, 2759, 7711, 7742, 9606]));
        assert_eq!(labels, vec!["Eukaryota", "Vertebrata"]);
    }

    #[test]
    fn empty_field_when_nothing_matches() {
        let mut sets = GroupSets::new();
        sets.insert(
            "taxonomicGroup",
            GroupSet::new([TaxonomicGroupRule::new(TaxonomyId::new(2), "Bacteria")]),
        );
        let fields = sets.classify(&ids(&[1, 10239]));
        assert_eq!(fields.get("taxonomicGroup").map(String::as_str), Some(""));
    }
}
