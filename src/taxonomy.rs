use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::batch::{BatchPolicy, BatchRequest, post_batched};
use crate::domain::{Rank, TaxonRef, TaxonomyId};
use crate::error::CatalogError;
use crate::groups::GroupSets;
use crate::ncbi::{NcbiClient, TAXONOMY_DATASET_REPORT, TAXONOMY_NAME_REPORT};

/// Ranks that never appear in the classification map and must be recovered
/// from ancestor lookups.
pub const ANCESTOR_LOOKUP_RANKS: [&str; 2] = ["serotype", "isolate"];

#[derive(Debug, Clone, Deserialize)]
pub struct TaxonReport {
    pub taxonomy: TaxonomyNode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TaxonomyNode {
    pub tax_id: TaxonomyId,
    #[serde(default)]
    pub rank: Option<String>,
    pub current_scientific_name: ScientificName,
    #[serde(default)]
    pub parents: Vec<TaxonomyId>,
    #[serde(default)]
    pub classification: BTreeMap<String, ClassificationEntry>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScientificName {
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClassificationEntry {
    pub name: String,
    pub id: TaxonomyId,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameReport {
    pub taxonomy: NameTaxonomy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NameTaxonomy {
    pub tax_id: TaxonomyId,
    #[serde(default)]
    pub other_common_names: Vec<String>,
}

/// Taxon classification derived once per run from the taxonomy reports.
#[derive(Debug, Clone, PartialEq)]
pub struct TaxonRecord {
    pub taxonomy_id: TaxonomyId,
    pub name: String,
    pub rank: Option<Rank>,
    /// Root first, ending with `taxonomy_id`.
    pub lineage: Vec<TaxonomyId>,
    pub species: Option<TaxonRef>,
    /// Only the requested ranks that resolved to a taxon.
    pub classification: BTreeMap<Rank, TaxonRef>,
    pub common_name: Option<String>,
    pub groups: BTreeMap<String, String>,
    pub other_taxa: Option<Vec<String>>,
}

impl TaxonRecord {
    pub fn taxon_at(&self, rank: &Rank) -> Option<&TaxonRef> {
        self.classification.get(rank)
    }

    pub fn lineage_string(&self) -> String {
        self.lineage
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Name and rank lookups for taxa outside the directly requested set
/// (ancestors, outbreak taxa). Owned by the pipeline and passed by `&mut`
/// so there is exactly one writer.
#[derive(Debug, Clone, Default)]
pub struct TaxonCache {
    names: HashMap<TaxonomyId, String>,
    ranks: HashMap<TaxonomyId, Rank>,
}

impl TaxonCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn contains(&self, id: TaxonomyId) -> bool {
        self.names.contains_key(&id)
    }

    pub fn name(&self, id: TaxonomyId) -> Option<&str> {
        self.names.get(&id).map(String::as_str)
    }

    pub fn rank(&self, id: TaxonomyId) -> Option<&Rank> {
        self.ranks.get(&id)
    }

    pub fn record(&mut self, report: &TaxonReport) {
        let node = &report.taxonomy;
        self.names
            .insert(node.tax_id, node.current_scientific_name.name.clone());
        match node.rank.as_deref().and_then(|rank| rank.parse::<Rank>().ok()) {
            Some(rank) => {
                self.ranks.insert(node.tax_id, rank);
            }
            None => debug!(tax_id = %node.tax_id, "rank not found for taxon"),
        }
    }

    /// Looks up every id not yet cached (the root is never fetched).
    pub fn fill<C: NcbiClient + ?Sized>(
        &mut self,
        client: &C,
        ids: impl IntoIterator<Item = TaxonomyId>,
        policy: BatchPolicy,
    ) -> Result<(), CatalogError> {
        let mut seen = HashSet::new();
        let missing = ids
            .into_iter()
            .filter(|id| !id.is_root() && !self.contains(*id) && seen.insert(*id))
            .collect::<Vec<_>>();
        if missing.is_empty() {
            return Ok(());
        }
        info!(count = missing.len(), "fetching taxa for lookup cache");
        for report in fetch_taxonomy(client, &missing, policy)? {
            self.record(&report);
        }
        Ok(())
    }
}

pub fn fetch_taxonomy<C: NcbiClient + ?Sized>(
    client: &C,
    ids: &[TaxonomyId],
    policy: BatchPolicy,
) -> Result<Vec<TaxonReport>, CatalogError> {
    let request = BatchRequest::new(TAXONOMY_DATASET_REPORT, "taxons");
    let reports = post_batched(client, &request, &unique_id_strings(ids), policy)?;
    parse_reports(reports)
}

pub fn fetch_taxonomy_names<C: NcbiClient + ?Sized>(
    client: &C,
    ids: &[TaxonomyId],
    policy: BatchPolicy,
) -> Result<Vec<NameReport>, CatalogError> {
    let request = BatchRequest::new(TAXONOMY_NAME_REPORT, "taxons");
    let reports = post_batched(client, &request, &unique_id_strings(ids), policy)?;
    parse_reports(reports)
}

fn unique_id_strings(ids: &[TaxonomyId]) -> Vec<String> {
    let mut unique = ids.to_vec();
    unique.sort();
    unique.dedup();
    unique.into_iter().map(|id| id.to_string()).collect()
}

fn parse_reports<T: for<'de> Deserialize<'de>>(reports: Vec<Value>) -> Result<Vec<T>, CatalogError> {
    reports
        .into_iter()
        .map(|report| {
            serde_json::from_value(report)
                .map_err(|err| CatalogError::UnexpectedResponse(err.to_string()))
        })
        .collect()
}

/// Ancestor ids to pre-load into the cache when any requested rank can only
/// be recovered from ancestors.
pub fn ancestor_ids_for_lookup(reports: &[TaxonReport], levels: &[Rank]) -> Vec<TaxonomyId> {
    if !needs_ancestor_lookup(levels) {
        return Vec::new();
    }
    let mut ids = reports
        .iter()
        .flat_map(|report| report.taxonomy.parents.iter().copied())
        .collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    ids
}

fn needs_ancestor_lookup(levels: &[Rank]) -> bool {
    levels
        .iter()
        .any(|level| ANCESTOR_LOOKUP_RANKS.contains(&level.as_str()))
}

/// Builds the per-taxon classification row.
///
/// For each requested rank the `(name, id)` pair comes from the report's
/// classification map, then from cached ancestors (only when `serotype` or
/// `isolate` is requested), and finally, when the taxon's own rank is
/// requested but absent (leaf ranks such as species or strain), from the
/// taxon itself.
pub fn derive_taxon_record(
    report: &TaxonReport,
    name_report: Option<&NameReport>,
    levels: &[Rank],
    groups: &GroupSets,
    cache: &TaxonCache,
) -> TaxonRecord {
    let node = &report.taxonomy;
    let mut classification = node
        .classification
        .iter()
        .filter_map(|(rank, entry)| {
            let rank = rank.parse::<Rank>().ok()?;
            Some((
                rank,
                TaxonRef {
                    name: entry.name.clone(),
                    id: entry.id,
                },
            ))
        })
        .collect::<BTreeMap<_, _>>();

    let ancestors: &[TaxonomyId] = if needs_ancestor_lookup(levels) {
        node.parents.as_slice()
    } else {
        &[]
    };
    for ancestor in ancestors {
        let (Some(rank), Some(name)) = (cache.rank(*ancestor), cache.name(*ancestor)) else {
            continue;
        };
        if levels.contains(rank) && !classification.contains_key(rank) {
            classification.insert(
                rank.clone(),
                TaxonRef {
                    name: name.to_string(),
                    id: *ancestor,
                },
            );
        }
    }

    let own_rank = node.rank.as_deref().and_then(|rank| rank.parse::<Rank>().ok());
    if let Some(rank) = &own_rank {
        if levels.contains(rank) && !classification.contains_key(rank) {
            classification.insert(
                rank.clone(),
                TaxonRef {
                    name: node.current_scientific_name.name.clone(),
                    id: node.tax_id,
                },
            );
        }
    }

    let species = classification
        .iter()
        .find(|(rank, _)| rank.is_species())
        .map(|(_, taxon)| taxon.clone());
    if species.is_none() {
        warn!(tax_id = %node.tax_id, "taxon has no species in its classification");
    }

    let lineage = build_lineage(&node.parents, node.tax_id);
    let common_name = name_report.and_then(|names| names.taxonomy.other_common_names.first().cloned());

    TaxonRecord {
        taxonomy_id: node.tax_id,
        name: node.current_scientific_name.name.clone(),
        rank: own_rank,
        groups: groups.classify(&lineage),
        lineage,
        species,
        classification: classification
            .into_iter()
            .filter(|(rank, _)| levels.contains(rank))
            .collect(),
        common_name,
        other_taxa: None,
    }
}

/// Root-to-self chain with the taxon itself appended once and no repeats.
pub fn build_lineage(parents: &[TaxonomyId], own: TaxonomyId) -> Vec<TaxonomyId> {
    let mut seen = HashSet::new();
    let mut lineage = parents
        .iter()
        .copied()
        .filter(|id| *id != own && seen.insert(*id))
        .collect::<Vec<_>>();
    lineage.push(own);
    lineage
}

/// Names of highlighted taxa in the lineage whose rank is not already a tree
/// rank; `None` when there are none.
pub fn other_taxa(
    lineage: &[TaxonomyId],
    highlighted: &HashSet<TaxonomyId>,
    levels: &[Rank],
    cache: &TaxonCache,
) -> Option<Vec<String>> {
    let names = lineage
        .iter()
        .filter(|id| highlighted.contains(id))
        .filter(|id| cache.rank(**id).is_none_or(|rank| !levels.contains(rank)))
        .filter_map(|id| cache.name(*id).map(str::to_string))
        .collect::<Vec<_>>();
    (!names.is_empty()).then_some(names)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn levels(names: &[&str]) -> Vec<Rank> {
        names.iter().map(|name| name.parse().unwrap()).collect()
    }

    fn strain_report() -> TaxonReport {
        serde_json::from_value(json!({
            "taxonomy": {
                "tax_id": 511145,
                "rank": "STRAIN",
                "current_scientific_name": {"name": "Escherichia coli str. K-12 substr. MG1655"},
                "parents": [1, 131567, 2, 561, 562, 83333],
                "classification": {
                    "domain": {"name": "Bacteria", "id": 2},
                    "genus": {"name": "Escherichia", "id": 561},
                    "species": {"name": "Escherichia coli", "id": 562}
                }
            }
        }))
        .unwrap()
    }

    #[test]
    fn synthesizes_own_leaf_rank() {
        let record = derive_taxon_record(
            &strain_report(),
            None,
            &levels(&["domain", "genus", "species", "strain"]),
            &GroupSets::new(),
            &TaxonCache::new(),
        );
        let strain = record.taxon_at(&"strain".parse().unwrap()).unwrap();
        assert_eq!(strain.id, TaxonomyId::new(511145));
        assert_eq!(strain.name, "Escherichia coli str. K-12 substr. MG1655");
        assert_eq!(record.species.as_ref().unwrap().id, TaxonomyId::new(562));
        assert_eq!(record.lineage.last(), Some(&TaxonomyId::new(511145)));
    }

    #[test]
    fn ancestor_ranks_come_from_cache() {
        let mut cache = TaxonCache::new();
        cache.record(
            &serde_json::from_value(json!({
                "taxonomy": {
                    "tax_id": 83333,
                    "rank": "SEROTYPE",
                    "current_scientific_name": {"name": "Escherichia coli K-12"}
                }
            }))
            .unwrap(),
        );
        let record = derive_taxon_record(
            &strain_report(),
            None,
            &levels(&["species", "serotype", "strain"]),
            &GroupSets::new(),
            &cache,
        );
        let serotype = record.taxon_at(&"serotype".parse().unwrap()).unwrap();
        assert_eq!(serotype.id, TaxonomyId::new(83333));
        assert!(record.taxon_at(&"genus".parse().unwrap()).is_none());
    }

    #[test]
    fn lineage_never_repeats_self() {
        let lineage = build_lineage(
            &[TaxonomyId::new(1), TaxonomyId::new(2), TaxonomyId::new(2)],
            TaxonomyId::new(2),
        );
        assert_eq!(lineage, vec![TaxonomyId::new(1), TaxonomyId::new(2)]);
    }
}
