//! Data-quality checks over the merged table and tree. Nothing here fails the
//! build; every finding ends up as a line item in the Markdown report.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt::Display;

use crate::catalog::CatalogRow;
use crate::domain::{GenomeAccession, Rank, TaxonomyId};
use crate::tree::SpeciesTreeNode;

pub const REPORT_TITLE: &str = "# Catalog Data QC report";

/// Values from `all` that were not found, plus the found ones for the
/// inverted rendering when most are missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingValues<T> {
    pub values_name: String,
    pub predicate: String,
    pub total: usize,
    pub missing: Vec<T>,
    pub found: Vec<T>,
}

impl<T: Clone> MissingValues<T> {
    pub fn from_presence(
        values_name: &str,
        predicate: &str,
        all: &[T],
        mut is_present: impl FnMut(&T) -> bool,
    ) -> Self {
        let (found, missing): (Vec<T>, Vec<T>) =
            all.iter().cloned().partition(|value| is_present(value));
        Self {
            values_name: values_name.to_string(),
            predicate: predicate.to_string(),
            total: all.len(),
            missing,
            found,
        }
    }
}

impl<T> MissingValues<T> {
    pub fn is_mostly_missing(&self) -> bool {
        self.missing.len() * 2 > self.total
    }
}

impl<T: Display> MissingValues<T> {
    fn section(&self, title: &str) -> Vec<String> {
        if self.missing.is_empty() {
            return list_section(title, &[]);
        }
        if self.is_mostly_missing() {
            let mut lines = vec![title.to_string(), String::new()];
            lines.push(format!(
                "**Warning:** only {} of {} {} {}; {} are missing. Found:",
                self.found.len(),
                self.total,
                self.values_name,
                self.predicate,
                self.missing.len()
            ));
            lines.push(String::new());
            if self.found.is_empty() {
                lines.push("None".to_string());
            } else {
                lines.extend(self.found.iter().map(|value| format!("- {value}")));
            }
            lines.push(String::new());
            return lines;
        }
        let items = self.missing.iter().map(|value| value.to_string()).collect::<Vec<_>>();
        list_section(title, &items)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TreeChecks {
    /// `(combined, expected)` when the terminal-node total disagrees with the row count.
    pub count_mismatch: Option<(usize, usize)>,
    pub leaves_missing_species: Vec<TaxonomyId>,
    pub zero_count_taxa: Vec<TaxonomyId>,
    pub missing_ranks: Vec<Rank>,
}

impl TreeChecks {
    pub fn is_clean(&self) -> bool {
        self.count_mismatch.is_none()
            && self.leaves_missing_species.is_empty()
            && self.zero_count_taxa.is_empty()
            && self.missing_ranks.is_empty()
    }

    fn render(&self) -> String {
        let mismatch = match self.count_mismatch {
            None => "None".to_string(),
            Some((combined, expected)) => format!(
                "Found combined assembly count of {combined} among nodes of species rank, expected {expected}"
            ),
        };
        [
            format!("Assembly count mismatch: {mismatch}"),
            format!(
                "List of leaves without species in lineage: {}",
                join_or_none(&self.leaves_missing_species)
            ),
            format!(
                "List of taxa with assembly count 0: {}",
                join_or_none(&self.zero_count_taxa)
            ),
            format!(
                "List of taxonomic levels specified in parameters but absent in tree: {}",
                join_or_none(&self.missing_ranks)
            ),
        ]
        .join("\n\n")
    }
}

/// Sums counts over terminal nodes (species nodes, or leaves with no species
/// above them) and compares with `expected_rows`.
pub fn check_tree(tree: &SpeciesTreeNode, levels: &[Rank], expected_rows: usize) -> TreeChecks {
    let mut checks = TreeChecks::default();
    let mut present = HashSet::new();
    let combined = check_node(tree, false, &mut checks, &mut present);
    if combined != expected_rows {
        checks.count_mismatch = Some((combined, expected_rows));
    }
    checks.missing_ranks = levels
        .iter()
        .filter(|rank| !present.contains(*rank))
        .cloned()
        .collect();
    checks
}

fn check_node<'a>(
    node: &'a SpeciesTreeNode,
    mut has_species: bool,
    checks: &mut TreeChecks,
    present: &mut HashSet<&'a Rank>,
) -> usize {
    if let Some(rank) = &node.rank {
        present.insert(rank);
    }
    if node.assembly_count == 0 {
        checks.zero_count_taxa.push(node.ncbi_tax_id);
    }
    has_species |= node.is_species();

    if node.is_leaf() {
        if !has_species {
            checks.leaves_missing_species.push(node.ncbi_tax_id);
        }
        return node.assembly_count;
    }
    let below = node
        .children
        .iter()
        .map(|child| check_node(child, has_species, checks, present))
        .sum::<usize>();
    if node.is_species() { node.assembly_count } else { below }
}

/// `(label, ids)` for every `(species, strain)` pair spanning several taxonomy ids.
pub fn inconsistent_taxonomy_ids(rows: &[CatalogRow]) -> Vec<(String, Vec<TaxonomyId>)> {
    let mut groups: BTreeMap<(String, String), BTreeSet<TaxonomyId>> = BTreeMap::new();
    for row in rows {
        let Some(species) = row.species() else {
            continue;
        };
        let strain = row.assembly.strain.clone().unwrap_or_default();
        groups
            .entry((species.name.clone(), strain))
            .or_default()
            .insert(row.assembly.taxonomy_id);
    }
    groups
        .into_iter()
        .filter(|(_, ids)| ids.len() > 1)
        .map(|((species, strain), ids)| {
            let label = if strain.is_empty() {
                species
            } else {
                format!("{species} strain {strain}")
            };
            (label, ids.into_iter().collect())
        })
        .collect()
}

/// Assemblies whose species (or own taxon, when unresolved) has no ploidy entry.
pub fn missing_ploidy(
    rows: &[CatalogRow],
    ploidy: &HashMap<TaxonomyId, Vec<String>>,
) -> Vec<(GenomeAccession, TaxonomyId)> {
    rows.iter()
        .map(|row| {
            let key = row
                .species()
                .map(|species| species.id)
                .unwrap_or(row.assembly.taxonomy_id);
            (row.assembly.accession.clone(), key)
        })
        .filter(|(_, key)| !ploidy.contains_key(key))
        .collect()
}

pub fn missing_outbreak_descendants(
    descendants: &[TaxonomyId],
    rows: &[CatalogRow],
) -> Vec<TaxonomyId> {
    let species = rows
        .iter()
        .filter_map(|row| row.species().map(|species| species.id))
        .collect::<HashSet<_>>();
    descendants
        .iter()
        .filter(|id| !species.contains(id))
        .copied()
        .collect()
}

pub fn outdated_accessions(rows: &[CatalogRow]) -> Vec<(GenomeAccession, GenomeAccession)> {
    rows.iter()
        .filter(|row| row.assembly.is_outdated())
        .map(|row| {
            (
                row.assembly.accession.clone(),
                row.assembly.current_accession.clone(),
            )
        })
        .collect()
}

pub fn suppressed_genomes(rows: &[CatalogRow]) -> Vec<(GenomeAccession, String)> {
    rows.iter()
        .filter(|row| row.assembly.is_suppressed())
        .map(|row| {
            (
                row.assembly.accession.clone(),
                row.assembly.assembly_status.clone(),
            )
        })
        .collect()
}

pub fn genbank_with_paired_refseq(rows: &[CatalogRow]) -> Vec<(GenomeAccession, GenomeAccession)> {
    rows.iter()
        .filter_map(|row| {
            row.assembly
                .paired_refseq()
                .map(|paired| (row.assembly.accession.clone(), paired.clone()))
        })
        .collect()
}

/// Findings of one build. `None` marks a check that was not run and renders
/// as "N/A" (or "No checks done" for the tree).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QcReport {
    pub missing_ncbi_assemblies: MissingValues<GenomeAccession>,
    pub missing_ucsc_assemblies: MissingValues<GenomeAccession>,
    pub ambiguous_ucsc_browsers: Vec<(GenomeAccession, Vec<String>)>,
    pub missing_gene_model_urls: Option<MissingValues<GenomeAccession>>,
    pub inconsistent_taxonomy_ids: Vec<(String, Vec<TaxonomyId>)>,
    pub unresolved_taxonomy_ids: Vec<TaxonomyId>,
    pub missing_ploidy: Option<Vec<(GenomeAccession, TaxonomyId)>>,
    pub missing_outbreak_descendants: Vec<TaxonomyId>,
    pub outdated_accessions: Vec<(GenomeAccession, GenomeAccession)>,
    pub suppressed_genomes: Vec<(GenomeAccession, String)>,
    pub paired_accessions: Vec<(GenomeAccession, GenomeAccession)>,
    pub tree_checks: Option<TreeChecks>,
}

impl QcReport {
    /// Number of line items across every section.
    pub fn finding_count(&self) -> usize {
        self.missing_ncbi_assemblies.missing.len()
            + self.missing_ucsc_assemblies.missing.len()
            + self.ambiguous_ucsc_browsers.len()
            + self
                .missing_gene_model_urls
                .as_ref()
                .map_or(0, |missing| missing.missing.len())
            + self.inconsistent_taxonomy_ids.len()
            + self.unresolved_taxonomy_ids.len()
            + self.missing_ploidy.as_ref().map_or(0, Vec::len)
            + self.missing_outbreak_descendants.len()
            + self.outdated_accessions.len()
            + self.suppressed_genomes.len()
            + self.paired_accessions.len()
            + self.tree_checks.as_ref().map_or(0, |checks| usize::from(!checks.is_clean()))
    }

    pub fn to_markdown(&self) -> String {
        let mut lines = vec![REPORT_TITLE.to_string(), String::new()];
        lines.extend(self.missing_ncbi_assemblies.section("## Assemblies not found on NCBI"));
        lines.extend(
            self.missing_ucsc_assemblies
                .section("## Assemblies not found in UCSC list"),
        );
        lines.extend(list_section(
            "## Assemblies with ambiguous UCSC browser IDs",
            &self
                .ambiguous_ucsc_browsers
                .iter()
                .map(|(accession, browsers)| format!("{accession} ({})", browsers.join(", ")))
                .collect::<Vec<_>>(),
        ));
        let gene_models_title = "## Assemblies with gene model URLs not found";
        match &self.missing_gene_model_urls {
            Some(missing) => lines.extend(missing.section(gene_models_title)),
            None => lines.extend(raw_section(gene_models_title, "N/A")),
        }
        lines.extend(list_section(
            "## Species and strain combinations with multiple taxonomy IDs",
            &self
                .inconsistent_taxonomy_ids
                .iter()
                .map(|(taxon, ids)| format!("{taxon}: {}", join(ids)))
                .collect::<Vec<_>>(),
        ));
        lines.extend(list_section(
            "## Taxonomy IDs not found on NCBI",
            &to_strings(&self.unresolved_taxonomy_ids),
        ));
        let ploidy_title = "## Assemblies without ploidy information";
        match &self.missing_ploidy {
            Some(missing) => lines.extend(list_section(
                ploidy_title,
                &missing
                    .iter()
                    .map(|(accession, tax_id)| {
                        format!("{accession} (speciesTaxonomyId: {tax_id})")
                    })
                    .collect::<Vec<_>>(),
            )),
            None => lines.extend(raw_section(ploidy_title, "N/A")),
        }
        lines.extend(list_section(
            "## Outbreak descendant taxonomy IDs not found in genomes data",
            &to_strings(&self.missing_outbreak_descendants),
        ));
        lines.extend(list_section(
            "## Outdated assembly accessions",
            &self
                .outdated_accessions
                .iter()
                .map(|(accession, current)| format!("{accession} (current: {current})"))
                .collect::<Vec<_>>(),
        ));
        lines.extend(list_section(
            "## Suppressed or retired genomes",
            &self
                .suppressed_genomes
                .iter()
                .map(|(accession, status)| format!("{accession} (status: {status})"))
                .collect::<Vec<_>>(),
        ));
        lines.extend(list_section(
            "## GenBank assemblies with paired RefSeq accessions",
            &self
                .paired_accessions
                .iter()
                .map(|(genbank, refseq)| format!("{genbank} (paired RefSeq: {refseq})"))
                .collect::<Vec<_>>(),
        ));
        let tree_text = self
            .tree_checks
            .as_ref()
            .map_or_else(|| "No checks done".to_string(), TreeChecks::render);
        lines.extend(raw_section("## Taxonomy tree", &tree_text));
        lines.join("\n")
    }
}

fn list_section(title: &str, items: &[String]) -> Vec<String> {
    let mut lines = vec![title.to_string(), String::new()];
    if items.is_empty() {
        lines.push("None".to_string());
    } else {
        lines.extend(items.iter().map(|item| format!("- {item}")));
    }
    lines.push(String::new());
    lines
}

fn raw_section(title: &str, body: &str) -> Vec<String> {
    vec![title.to_string(), String::new(), body.to_string(), String::new()]
}

fn to_strings<T: Display>(values: &[T]) -> Vec<String> {
    values.iter().map(|value| value.to_string()).collect()
}

fn join<T: Display>(values: &[T]) -> String {
    to_strings(values).join(", ")
}

fn join_or_none<T: Display>(values: &[T]) -> String {
    if values.is_empty() {
        "None".to_string()
    } else {
        join(values)
    }
}
