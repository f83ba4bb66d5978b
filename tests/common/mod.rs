#![allow(dead_code)]

use std::collections::BTreeMap;

use kira_taxa_catalog::assembly::GenomeAssembly;
use kira_taxa_catalog::catalog::CatalogRow;
use kira_taxa_catalog::domain::{Rank, TaxonRef, TaxonomyId};
use kira_taxa_catalog::taxonomy::TaxonRecord;

pub fn levels(names: &[&str]) -> Vec<Rank> {
    names.iter().map(|name| name.parse().unwrap()).collect()
}

pub fn assembly(accession: &str, tax_id: u64) -> GenomeAssembly {
    GenomeAssembly {
        accession: accession.parse().unwrap(),
        current_accession: accession.parse().unwrap(),
        taxonomy_id: TaxonomyId::new(tax_id),
        strain: None,
        is_ref: false,
        level: "Contig".to_string(),
        assembly_status: "current".to_string(),
        chromosome_count: None,
        length: 1_000,
        scaffold_count: None,
        scaffold_n50: None,
        scaffold_l50: None,
        coverage: None,
        gc_percent: None,
        annotation_status: None,
        paired_accession: None,
        ucsc_browser: None,
        gene_model_url: None,
        biosample: None,
    }
}

/// A row whose taxon is classified at exactly the given `(rank, name, id)` triples.
pub fn row(accession: &str, tax_id: u64, ranks: &[(&str, &str, u64)]) -> CatalogRow {
    let classification = ranks
        .iter()
        .map(|(rank, name, id)| {
            (
                rank.parse::<Rank>().unwrap(),
                TaxonRef {
                    name: name.to_string(),
                    id: TaxonomyId::new(*id),
                },
            )
        })
        .collect::<BTreeMap<_, _>>();
    let species = classification
        .iter()
        .find(|(rank, _)| rank.is_species())
        .map(|(_, taxon)| taxon.clone());
    let mut lineage = vec![TaxonomyId::ROOT];
    lineage.extend(ranks.iter().map(|(_, _, id)| TaxonomyId::new(*id)));
    lineage.push(TaxonomyId::new(tax_id));
    CatalogRow {
        assembly: assembly(accession, tax_id),
        taxon: Some(TaxonRecord {
            taxonomy_id: TaxonomyId::new(tax_id),
            name: format!("taxon {tax_id}"),
            rank: None,
            lineage,
            species,
            classification,
            common_name: None,
            groups: BTreeMap::new(),
            other_taxa: None,
        }),
    }
}
