use std::collections::BTreeMap;

use serde::{Serialize, Serializer};

use crate::catalog::CatalogRow;
use crate::domain::{Rank, TaxonRef, TaxonomyId};

pub const ROOT_NAME: &str = "root";
const NO_RANK: &str = "NA";

/// Fields are declared in key order so the serialized objects are sorted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpeciesTreeNode {
    pub assembly_count: usize,
    pub children: Vec<SpeciesTreeNode>,
    pub name: String,
    pub ncbi_tax_id: TaxonomyId,
    #[serde(serialize_with = "serialize_rank")]
    pub rank: Option<Rank>,
}

impl SpeciesTreeNode {
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    pub fn is_species(&self) -> bool {
        self.rank.as_ref().is_some_and(Rank::is_species)
    }

    /// Depth-first, parents before children.
    pub fn walk<'a>(&'a self, visit: &mut impl FnMut(&'a SpeciesTreeNode)) {
        visit(self);
        for child in &self.children {
            child.walk(visit);
        }
    }
}

fn serialize_rank<S: Serializer>(rank: &Option<Rank>, serializer: S) -> Result<S::Ok, S::Error> {
    match rank {
        Some(rank) => serializer.serialize_str(rank.as_str()),
        None => serializer.serialize_str(NO_RANK),
    }
}

/// Groups rows by each rank in `levels` (highest first) under a synthetic root.
///
/// Rows without a taxon at some rank do not get a node there: their subtrees
/// attach to the nearest named ancestor instead.
pub fn build_species_tree(rows: &[CatalogRow], levels: &[Rank]) -> SpeciesTreeNode {
    let scope = rows.iter().collect::<Vec<_>>();
    SpeciesTreeNode {
        assembly_count: scope.len(),
        children: build_children(&scope, levels),
        name: ROOT_NAME.to_string(),
        ncbi_tax_id: TaxonomyId::ROOT,
        rank: None,
    }
}

fn build_children(rows: &[&CatalogRow], levels: &[Rank]) -> Vec<SpeciesTreeNode> {
    let Some((rank, remaining)) = levels.split_first() else {
        return Vec::new();
    };

    let mut groups: BTreeMap<Option<&TaxonRef>, Vec<&CatalogRow>> = BTreeMap::new();
    for row in rows {
        groups.entry(row.taxon_at(rank)).or_default().push(row);
    }

    let mut children = Vec::new();
    for (taxon, group) in groups {
        match taxon {
            Some(taxon) => children.push(SpeciesTreeNode {
                assembly_count: group.len(),
                children: build_children(&group, remaining),
                name: taxon.name.clone(),
                ncbi_tax_id: taxon.id,
                rank: Some(rank.clone()),
            }),
            None => children.extend(build_children(&group, remaining)),
        }
    }
    children.sort_by_key(|node| node.ncbi_tax_id);
    children
}
