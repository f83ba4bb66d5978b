use std::collections::{BTreeMap, HashSet};

use tracing::{info, warn};

use crate::assembly::GenomeAssembly;
use crate::domain::{GenomeAccession, Rank, TaxonRef, TaxonomyId};
use crate::taxonomy::TaxonRecord;
use crate::xref::{BrowserMatch, GeneModelIndex, UcscIndex};

/// One assembly after the left join with its taxon.
#[derive(Debug, Clone, PartialEq)]
pub struct CatalogRow {
    pub assembly: GenomeAssembly,
    pub taxon: Option<TaxonRecord>,
}

impl CatalogRow {
    pub fn accession(&self) -> &GenomeAccession {
        &self.assembly.accession
    }

    pub fn species(&self) -> Option<&TaxonRef> {
        self.taxon.as_ref().and_then(|taxon| taxon.species.as_ref())
    }

    pub fn taxon_at(&self, rank: &Rank) -> Option<&TaxonRef> {
        self.taxon.as_ref().and_then(|taxon| taxon.taxon_at(rank))
    }
}

/// Left join: every assembly is kept; unresolved taxa leave `taxon` empty.
pub fn join_taxa(
    assemblies: Vec<GenomeAssembly>,
    records: &BTreeMap<TaxonomyId, TaxonRecord>,
) -> Vec<CatalogRow> {
    let rows = assemblies
        .into_iter()
        .map(|assembly| CatalogRow {
            taxon: records.get(&assembly.taxonomy_id).cloned(),
            assembly,
        })
        .collect::<Vec<_>>();
    let unresolved = rows.iter().filter(|row| row.taxon.is_none()).count();
    if unresolved > 0 {
        warn!(unresolved, "assemblies without taxonomy records");
    }
    rows
}

/// Taxonomy ids of assemblies that did not resolve to a record, ascending.
pub fn unresolved_taxonomy_ids(rows: &[CatalogRow]) -> Vec<TaxonomyId> {
    let mut ids = rows
        .iter()
        .filter(|row| row.taxon.is_none())
        .map(|row| row.assembly.taxonomy_id)
        .collect::<Vec<_>>();
    ids.sort();
    ids.dedup();
    ids
}

/// Fills `ucsc_browser` and, when an index is given, `gene_model_url`.
/// Returns accessions with conflicting browser ids, which stay unassigned.
pub fn apply_cross_references(
    rows: &mut [CatalogRow],
    ucsc: &UcscIndex,
    gene_models: Option<&GeneModelIndex>,
) -> Vec<(GenomeAccession, Vec<String>)> {
    let mut ambiguous = Vec::new();
    for row in rows.iter_mut() {
        match ucsc.browser_for(&row.assembly.accession) {
            BrowserMatch::Unique(browser) => row.assembly.ucsc_browser = Some(browser),
            BrowserMatch::Ambiguous(browsers) => {
                ambiguous.push((row.assembly.accession.clone(), browsers));
            }
            BrowserMatch::Unmatched => {}
        }
        if let Some(index) = gene_models {
            row.assembly.gene_model_url = index
                .url_for(&row.assembly.accession)
                .map(str::to_string);
        }
    }
    if !ambiguous.is_empty() {
        warn!(count = ambiguous.len(), "accessions with ambiguous UCSC browser ids");
    }
    ambiguous
}

/// The finished table: one row per accession, sorted by accession.
#[derive(Debug, Clone, PartialEq)]
pub struct Catalog {
    pub levels: Vec<Rank>,
    pub group_fields: Vec<String>,
    pub rows: Vec<CatalogRow>,
}

impl Catalog {
    pub fn new(levels: Vec<Rank>, group_fields: Vec<String>, rows: Vec<CatalogRow>) -> Self {
        let before = rows.len();
        let mut seen = HashSet::new();
        let mut rows = rows
            .into_iter()
            .filter(|row| seen.insert(row.assembly.accession.clone()))
            .collect::<Vec<_>>();
        if rows.len() != before {
            info!(dropped = before - rows.len(), "dropped duplicate accessions");
        }
        rows.sort_by(|a, b| a.assembly.accession.cmp(&b.assembly.accession));
        Self {
            levels,
            group_fields,
            rows,
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
