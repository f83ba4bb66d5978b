//! Species tree taken from NCBI's `filtered_subtree` edges instead of grouping
//! rows on their classification. Node counts come from row lineages.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

use crate::batch::send_with_rate_limit;
use crate::catalog::CatalogRow;
use crate::domain::{Rank, TaxonomyId};
use crate::error::CatalogError;
use crate::ncbi::{NcbiClient, TAXONOMY_FILTERED_SUBTREE};
use crate::taxonomy::TaxonCache;
use crate::tree::{ROOT_NAME, SpeciesTreeNode};

#[derive(Debug, Deserialize)]
struct SubtreeResponse {
    #[serde(default)]
    edges: BTreeMap<TaxonomyId, SubtreeEdge>,
}

#[derive(Debug, Deserialize)]
struct SubtreeEdge {
    #[serde(default)]
    visible_children: Vec<TaxonomyId>,
}

/// Parent to children adjacency, children unique and ascending.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubtreeEdges {
    children: BTreeMap<TaxonomyId, BTreeSet<TaxonomyId>>,
}

impl SubtreeEdges {
    pub fn from_json(body: &str) -> Result<Self, CatalogError> {
        let response: SubtreeResponse = serde_json::from_str(body)
            .map_err(|err| CatalogError::UnexpectedResponse(format!("filtered subtree: {err}")))?;
        Ok(Self {
            children: response
                .edges
                .into_iter()
                .map(|(parent, edge)| (parent, edge.visible_children.into_iter().collect()))
                .collect(),
        })
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    /// Every id named as a parent or a child, ascending.
    pub fn node_ids(&self) -> Vec<TaxonomyId> {
        let mut ids = self.children.keys().copied().collect::<BTreeSet<_>>();
        ids.extend(self.children.values().flatten().copied());
        ids.into_iter().collect()
    }

    /// Parents that are nobody's child. The API may return several.
    pub fn roots(&self) -> Vec<TaxonomyId> {
        let children = self.children.values().flatten().collect::<HashSet<_>>();
        self.children
            .keys()
            .filter(|id| !children.contains(id))
            .copied()
            .collect()
    }

    fn children_of(&self, id: TaxonomyId) -> impl Iterator<Item = TaxonomyId> + '_ {
        self.children.get(&id).into_iter().flatten().copied()
    }
}

/// One unbatched request: the whole subtree comes back in a single document.
pub fn fetch_filtered_subtree<C: NcbiClient + ?Sized>(
    client: &C,
    taxonomy_ids: &[TaxonomyId],
    levels: &[Rank],
) -> Result<SubtreeEdges, CatalogError> {
    let mut ids = taxonomy_ids.to_vec();
    ids.sort();
    ids.dedup();
    let body = json!({
        "taxons": ids.iter().map(|id| id.to_string()).collect::<Vec<_>>(),
        "rank_limits": levels
            .iter()
            .map(|level| level.as_str().to_uppercase())
            .collect::<Vec<_>>(),
    });
    let response = send_with_rate_limit(client, TAXONOMY_FILTERED_SUBTREE, &body)?;
    let edges = SubtreeEdges::from_json(&response.body)?;
    info!(
        requested = ids.len(),
        nodes = edges.node_ids().len(),
        "fetched filtered subtree"
    );
    Ok(edges)
}

/// Nests `edges` under the taxonomy root. Extra roots are attached to it and
/// branches that never reach a row's taxon are pruned. Names and ranks come
/// from `cache`; unknown taxa keep their id as name. `None` when there are
/// no edges.
pub fn build_subtree_tree(
    edges: &SubtreeEdges,
    rows: &[CatalogRow],
    cache: &TaxonCache,
) -> Option<SpeciesTreeNode> {
    let roots = edges.roots();
    if roots.is_empty() {
        warn!("filtered subtree has no root");
        return None;
    }

    let requested = rows
        .iter()
        .map(|row| row.assembly.taxonomy_id)
        .collect::<HashSet<_>>();
    let mut counts: HashMap<TaxonomyId, usize> = HashMap::new();
    for taxon in rows.iter().filter_map(|row| row.taxon.as_ref()) {
        for id in taxon.lineage.iter().collect::<HashSet<_>>() {
            *counts.entry(*id).or_default() += 1;
        }
    }

    let nester = Nester {
        edges,
        requested: &requested,
        counts: &counts,
        cache,
    };
    let top = edges
        .children_of(TaxonomyId::ROOT)
        .chain(roots.into_iter().filter(|id| !id.is_root()))
        .collect::<BTreeSet<_>>();
    let mut path = vec![TaxonomyId::ROOT];
    Some(SpeciesTreeNode {
        assembly_count: rows.len(),
        children: top
            .into_iter()
            .filter_map(|id| nester.node(id, &mut path))
            .collect(),
        name: ROOT_NAME.to_string(),
        ncbi_tax_id: TaxonomyId::ROOT,
        rank: None,
    })
}

struct Nester<'a> {
    edges: &'a SubtreeEdges,
    requested: &'a HashSet<TaxonomyId>,
    counts: &'a HashMap<TaxonomyId, usize>,
    cache: &'a TaxonCache,
}

impl Nester<'_> {
    fn node(&self, id: TaxonomyId, path: &mut Vec<TaxonomyId>) -> Option<SpeciesTreeNode> {
        // `path` guards against cycles in a malformed response.
        let child_ids = self
            .edges
            .children_of(id)
            .filter(|child| !path.contains(child))
            .collect::<Vec<_>>();
        path.push(id);
        let children = child_ids
            .into_iter()
            .filter_map(|child| self.node(child, path))
            .collect::<Vec<_>>();
        path.pop();
        if children.is_empty() && !self.requested.contains(&id) {
            return None;
        }
        Some(SpeciesTreeNode {
            assembly_count: self.counts.get(&id).copied().unwrap_or(0),
            children,
            name: self
                .cache
                .name(id)
                .map_or_else(|| id.to_string(), str::to_string),
            ncbi_tax_id: id,
            rank: self.cache.rank(id).cloned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_string_keys_and_finds_roots() {
        let edges = SubtreeEdges::from_json(
            r#"{"edges": {
                "1": {"visible_children": [2, 2759]},
                "2": {"visible_children": ["562", 562]},
                "10239": {"visible_children": [2697049]}
            }}"#,
        )
        .unwrap();
        assert_eq!(edges.roots(), vec![TaxonomyId::new(1), TaxonomyId::new(10239)]);
        assert_eq!(edges.node_ids().len(), 6);
        assert_eq!(edges.children_of(TaxonomyId::new(2)).count(), 1);
    }

    #[test]
    fn empty_document_has_no_edges() {
        let edges = SubtreeEdges::from_json("{}").unwrap();
        assert!(edges.is_empty());
        assert!(build_subtree_tree(&edges, &[], &TaxonCache::new()).is_none());
    }
}
