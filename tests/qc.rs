mod common;

use std::collections::HashMap;

use kira_taxa_catalog::catalog::CatalogRow;
use kira_taxa_catalog::domain::{GenomeAccession, Rank, TaxonomyId};
use kira_taxa_catalog::qc::{self, MissingValues, QcReport, TreeChecks, check_tree};
use kira_taxa_catalog::tree::build_species_tree;

use common::{assembly, levels, row};

fn acc(value: &str) -> GenomeAccession {
    value.parse().unwrap()
}

fn clean_report(accessions: &[GenomeAccession]) -> QcReport {
    QcReport {
        missing_ncbi_assemblies: MissingValues::from_presence(
            "accessions",
            "found on NCBI",
            accessions,
            |_| true,
        ),
        missing_ucsc_assemblies: MissingValues::from_presence(
            "accessions",
            "matched in assembly list",
            accessions,
            |_| true,
        ),
        ambiguous_ucsc_browsers: Vec::new(),
        missing_gene_model_urls: None,
        inconsistent_taxonomy_ids: Vec::new(),
        unresolved_taxonomy_ids: Vec::new(),
        missing_ploidy: None,
        missing_outbreak_descendants: Vec::new(),
        outdated_accessions: Vec::new(),
        suppressed_genomes: Vec::new(),
        paired_accessions: Vec::new(),
        tree_checks: None,
    }
}

#[test]
fn tree_count_mismatch_is_reported_with_both_numbers() {
    let rows = vec![
        row("GCF_000000001.1", 562, &[("species", "Escherichia coli", 562)]),
        CatalogRow {
            assembly: assembly("GCF_000000002.1", 999_999),
            taxon: None,
        },
    ];
    let ranks = levels(&["species"]);
    let tree = build_species_tree(&rows, &ranks);

    let checks = check_tree(&tree, &ranks, rows.len());

    assert_eq!(checks.count_mismatch, Some((1, 2)));
    assert!(checks.leaves_missing_species.is_empty());
    assert!(!checks.is_clean());
}

#[test]
fn leaves_without_species_and_absent_ranks_are_listed() {
    let rows = vec![
        row("GCF_000000001.1", 561, &[("genus", "Escherichia", 561)]),
        row(
            "GCF_000000002.1",
            562,
            &[("genus", "Escherichia", 561), ("species", "Escherichia coli", 562)],
        ),
    ];
    let ranks = levels(&["genus", "species", "strain"]);
    let tree = build_species_tree(&rows, &ranks);

    let checks = check_tree(&tree, &ranks, rows.len());

    // The genus-only row hangs off a non-species inner node, so it is not counted.
    assert_eq!(checks.count_mismatch, Some((1, 2)));
    assert!(checks.zero_count_taxa.is_empty());
    assert_eq!(checks.missing_ranks, vec!["strain".parse::<Rank>().unwrap()]);
    assert!(checks.leaves_missing_species.is_empty());

    let genus_only = vec![row("GCF_000000003.1", 561, &[("genus", "Escherichia", 561)])];
    let tree = build_species_tree(&genus_only, &ranks);
    let checks = check_tree(&tree, &ranks, genus_only.len());
    assert_eq!(checks.leaves_missing_species, vec![TaxonomyId::new(561)]);
    assert_eq!(checks.count_mismatch, None);
}

#[test]
fn same_species_and_strain_with_several_ids() {
    let mut first = row("GCF_000000001.1", 83333, &[("species", "Escherichia coli", 562)]);
    first.assembly.strain = Some("K-12".to_string());
    let mut second = row("GCF_000000002.1", 511145, &[("species", "Escherichia coli", 562)]);
    second.assembly.strain = Some("K-12".to_string());
    let third = row("GCF_000000003.1", 562, &[("species", "Escherichia coli", 562)]);

    let findings = qc::inconsistent_taxonomy_ids(&[first, second, third]);

    assert_eq!(
        findings,
        vec![(
            "Escherichia coli strain K-12".to_string(),
            vec![TaxonomyId::new(83333), TaxonomyId::new(511145)]
        )]
    );
}

#[test]
fn ploidy_is_keyed_by_species() {
    let rows = vec![
        row("GCF_000000001.1", 511145, &[("species", "Escherichia coli", 562)]),
        row("GCF_000000002.1", 9606, &[("species", "Homo sapiens", 9606)]),
        CatalogRow {
            assembly: assembly("GCF_000000003.1", 4932),
            taxon: None,
        },
    ];
    let mut ploidy = HashMap::new();
    ploidy.insert(TaxonomyId::new(562), vec!["haploid".to_string()]);
    ploidy.insert(TaxonomyId::new(4932), vec!["diploid".to_string()]);

    let missing = qc::missing_ploidy(&rows, &ploidy);

    assert_eq!(missing, vec![(acc("GCF_000000002.1"), TaxonomyId::new(9606))]);
}

#[test]
fn assembly_status_checks() {
    let mut outdated = row("GCA_000000001.1", 562, &[("species", "Escherichia coli", 562)]);
    outdated.assembly.current_accession = acc("GCA_000000001.2");
    outdated.assembly.paired_accession = Some(acc("GCF_000000001.2"));
    let mut suppressed = row("GCF_000000002.1", 562, &[("species", "Escherichia coli", 562)]);
    suppressed.assembly.assembly_status = "suppressed".to_string();
    suppressed.assembly.paired_accession = Some(acc("GCA_000000002.1"));
    let rows = vec![outdated, suppressed];

    assert_eq!(
        qc::outdated_accessions(&rows),
        vec![(acc("GCA_000000001.1"), acc("GCA_000000001.2"))]
    );
    assert_eq!(
        qc::suppressed_genomes(&rows),
        vec![(acc("GCF_000000002.1"), "suppressed".to_string())]
    );
    assert_eq!(
        qc::genbank_with_paired_refseq(&rows),
        vec![(acc("GCA_000000001.1"), acc("GCF_000000001.2"))]
    );
}

#[test]
fn outbreak_descendants_compare_against_species() {
    let rows = vec![row("GCF_000000001.1", 2697049, &[("species", "SARS-CoV-2", 2697049)])];

    let missing = qc::missing_outbreak_descendants(
        &[TaxonomyId::new(2697049), TaxonomyId::new(694009)],
        &rows,
    );

    assert_eq!(missing, vec![TaxonomyId::new(694009)]);
}

#[test]
fn clean_report_renders_every_section() {
    let report = clean_report(&[acc("GCF_000000001.1")]);

    let markdown = report.to_markdown();

    assert_eq!(report.finding_count(), 0);
    assert!(markdown.starts_with("# Catalog Data QC report\n\n## Assemblies not found on NCBI\n\nNone\n"));
    assert!(markdown.contains("## Assemblies with gene model URLs not found\n\nN/A\n"));
    assert!(markdown.contains("## Assemblies without ploidy information\n\nN/A\n"));
    assert!(markdown.contains("## Suppressed or retired genomes\n\nNone\n"));
    assert!(markdown.ends_with("## Taxonomy tree\n\nNo checks done\n"));
}

#[test]
fn findings_render_as_list_items() {
    let accessions = [acc("GCF_000000001.1"), acc("GCF_000000002.1"), acc("GCF_000000003.1")];
    let mut report = clean_report(&accessions);
    report.missing_ucsc_assemblies = MissingValues::from_presence(
        "accessions",
        "matched in assembly list",
        &accessions,
        |accession| accession.as_str() == "GCF_000000001.1",
    );
    report.ambiguous_ucsc_browsers = vec![(
        acc("GCF_000000002.1"),
        vec!["browserA".to_string(), "browserB".to_string()],
    )];
    report.unresolved_taxonomy_ids = vec![TaxonomyId::new(999_999)];
    report.tree_checks = Some(TreeChecks {
        count_mismatch: Some((3, 4)),
        ..TreeChecks::default()
    });

    let markdown = report.to_markdown();

    assert!(markdown.contains(
        "**Warning:** only 1 of 3 accessions matched in assembly list; 2 are missing. Found:\n\n- GCF_000000001.1\n"
    ));
    assert!(markdown.contains("- GCF_000000002.1 (browserA, browserB)\n"));
    assert!(markdown.contains("## Taxonomy IDs not found on NCBI\n\n- 999999\n"));
    assert!(markdown.contains(
        "Assembly count mismatch: Found combined assembly count of 3 among nodes of species rank, expected 4"
    ));
    assert!(markdown.contains("List of taxa with assembly count 0: None"));
    assert_eq!(report.finding_count(), 2 + 1 + 1 + 1);
}
