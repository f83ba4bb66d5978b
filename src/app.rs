use std::collections::{BTreeMap, HashSet};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use serde::Serialize;
use tracing::info;

use crate::assembly::fetch_assemblies;
use crate::catalog::{Catalog, apply_cross_references, join_taxa, unresolved_taxonomy_ids};
use crate::config::{ResolvedConfig, TreeSource};
use crate::domain::GenomeAccession;
use crate::error::CatalogError;
use crate::ncbi::NcbiClient;
use crate::output::{
    TaxonMapping, render_genomes_tsv, render_primary_data, render_taxonomy_mapping, render_tree_json,
    write_atomic,
};
use crate::qc::{self, MissingValues, QcReport};
use crate::taxonomy::{
    TaxonCache, ancestor_ids_for_lookup, derive_taxon_record, fetch_taxonomy,
    fetch_taxonomy_names, other_taxa,
};
use crate::subtree::{build_subtree_tree, fetch_filtered_subtree};
use crate::tree::{SpeciesTreeNode, build_species_tree};
use crate::ucsc::UcscClient;
use crate::xref::{GeneModelIndex, UcscIndex};

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Everything derived in one run, held in memory until written.
#[derive(Debug, Clone)]
pub struct CatalogBuild {
    pub catalog: Catalog,
    pub tree: Option<SpeciesTreeNode>,
    pub qc: QcReport,
    pub outbreak_mapping: Vec<TaxonMapping>,
}

/// Serialized outputs paired with their destinations.
#[derive(Debug, Clone, Default)]
pub struct BuildArtifacts {
    pub files: Vec<(Utf8PathBuf, Vec<u8>)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BuildSummary {
    pub rows: usize,
    pub missing_accessions: usize,
    pub qc_findings: usize,
    pub written: Vec<String>,
}

#[derive(Clone)]
pub struct CatalogBuilder<N: NcbiClient, U: UcscClient> {
    ncbi: N,
    ucsc: U,
}

impl<N: NcbiClient, U: UcscClient> CatalogBuilder<N, U> {
    pub fn new(ncbi: N, ucsc: U) -> Self {
        Self { ncbi, ucsc }
    }

    /// Builds, renders and writes every configured output. Nothing is written
    /// unless all remote calls succeed.
    pub fn run(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<BuildSummary, CatalogError> {
        let build = self.build(config, sink)?;
        let artifacts = build.render(config)?;
        let start = Instant::now();
        let mut written = Vec::new();
        for (path, bytes) in &artifacts.files {
            write_atomic(path, bytes)?;
            written.push(path.to_string());
        }
        sink.event(ProgressEvent {
            message: format!("phase=Write; wrote {} files", written.len()),
            elapsed: Some(start.elapsed()),
        });
        Ok(BuildSummary {
            rows: build.catalog.len(),
            missing_accessions: build.qc.missing_ncbi_assemblies.missing.len(),
            qc_findings: build.qc.finding_count(),
            written,
        })
    }

    pub fn build(
        &self,
        config: &ResolvedConfig,
        sink: &dyn ProgressSink,
    ) -> Result<CatalogBuild, CatalogError> {
        let policy = config.batch_policy;

        let start = Instant::now();
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} genome reports", config.accessions.len()),
            elapsed: None,
        });
        let assemblies = fetch_assemblies(&self.ncbi, &config.accessions, policy)?;
        let returned = assemblies
            .iter()
            .map(|assembly| assembly.accession.clone())
            .collect::<HashSet<_>>();
        let missing_ncbi_assemblies = MissingValues::from_presence(
            "accessions",
            "found on NCBI",
            &config.accessions,
            |accession| returned.contains(accession),
        );
        sink.event(ProgressEvent {
            message: format!("phase=Fetch; {} genome reports received", assemblies.len()),
            elapsed: Some(start.elapsed()),
        });

        let start = Instant::now();
        let mut taxonomy_ids = assemblies
            .iter()
            .map(|assembly| assembly.taxonomy_id)
            .collect::<Vec<_>>();
        taxonomy_ids.sort();
        taxonomy_ids.dedup();
        sink.event(ProgressEvent {
            message: format!("phase=Taxonomy; {} taxa", taxonomy_ids.len()),
            elapsed: None,
        });
        let reports = fetch_taxonomy(&self.ncbi, &taxonomy_ids, policy)?;
        let names = fetch_taxonomy_names(&self.ncbi, &taxonomy_ids, policy)?;
        let names = names
            .iter()
            .map(|report| (report.taxonomy.tax_id, report))
            .collect::<BTreeMap<_, _>>();

        let mut cache = TaxonCache::new();
        for report in &reports {
            cache.record(report);
        }
        cache.fill(
            &self.ncbi,
            ancestor_ids_for_lookup(&reports, &config.levels),
            policy,
        )?;
        let outbreak_ids = config.outbreak_taxonomy_ids();
        cache.fill(&self.ncbi, outbreak_ids.iter().copied(), policy)?;
        let highlighted = outbreak_ids.iter().copied().collect::<HashSet<_>>();

        let mut records = BTreeMap::new();
        for report in &reports {
            let mut record = derive_taxon_record(
                report,
                names.get(&report.taxonomy.tax_id).copied(),
                &config.levels,
                &config.groups,
                &cache,
            );
            if !highlighted.is_empty() {
                record.other_taxa = other_taxa(&record.lineage, &highlighted, &config.levels, &cache);
            }
            records.insert(record.taxonomy_id, record);
        }
        sink.event(ProgressEvent {
            message: format!(
                "phase=Taxonomy; {} taxon records, {} cached lookups",
                records.len(),
                cache.len()
            ),
            elapsed: Some(start.elapsed()),
        });

        let mut rows = join_taxa(assemblies, &records);

        let start = Instant::now();
        sink.event(ProgressEvent {
            message: "phase=CrossReference; UCSC assembly list".to_string(),
            elapsed: None,
        });
        let ucsc_index = UcscIndex::build(&self.ucsc.fetch_assembly_list()?);
        let gene_models = if config.gene_models {
            let listing = self.ucsc.fetch_gene_model_index()?;
            let index = GeneModelIndex::parse(&listing, gene_model_base(&config.gene_model_index_url))?;
            info!(assemblies = index.len(), "parsed gene model index");
            Some(index)
        } else {
            None
        };
        let ambiguous_ucsc_browsers = apply_cross_references(&mut rows, &ucsc_index, gene_models.as_ref());
        sink.event(ProgressEvent {
            message: "phase=CrossReference; merged UCSC data".to_string(),
            elapsed: Some(start.elapsed()),
        });

        let row_accessions = rows
            .iter()
            .map(|row| row.assembly.accession.clone())
            .collect::<Vec<GenomeAccession>>();
        let missing_ucsc_assemblies = MissingValues::from_presence(
            "accessions",
            "matched in assembly list",
            &row_accessions,
            |accession| ucsc_index.is_listed(accession),
        );
        let missing_gene_model_urls = gene_models.as_ref().map(|_| {
            let with_url = rows
                .iter()
                .filter(|row| row.assembly.gene_model_url.is_some())
                .map(|row| row.assembly.accession.clone())
                .collect::<HashSet<_>>();
            MissingValues::from_presence(
                "accessions",
                "matched with gene model URLs",
                &row_accessions,
                |accession| with_url.contains(accession),
            )
        });
        let inconsistent_taxonomy_ids = qc::inconsistent_taxonomy_ids(&rows);
        let unresolved = unresolved_taxonomy_ids(&rows);

        let catalog = Catalog::new(config.levels.clone(), config.groups.fields(), rows);

        let tree = if config.levels.is_empty() {
            None
        } else {
            match config.tree_source {
                TreeSource::Ranks => Some(build_species_tree(&catalog.rows, &config.levels)),
                TreeSource::NcbiSubtree => {
                    let start = Instant::now();
                    sink.event(ProgressEvent {
                        message: format!("phase=Tree; filtered subtree for {} taxa", taxonomy_ids.len()),
                        elapsed: None,
                    });
                    let edges = fetch_filtered_subtree(&self.ncbi, &taxonomy_ids, &config.levels)?;
                    cache.fill(&self.ncbi, edges.node_ids(), policy)?;
                    let tree = build_subtree_tree(&edges, &catalog.rows, &cache);
                    sink.event(ProgressEvent {
                        message: format!("phase=Tree; {} subtree nodes", edges.node_ids().len()),
                        elapsed: Some(start.elapsed()),
                    });
                    tree
                }
            }
        };
        let tree_checks = tree
            .as_ref()
            .map(|tree| qc::check_tree(tree, &config.levels, catalog.len()));

        let qc = QcReport {
            missing_ncbi_assemblies,
            missing_ucsc_assemblies,
            ambiguous_ucsc_browsers,
            missing_gene_model_urls,
            inconsistent_taxonomy_ids,
            unresolved_taxonomy_ids: unresolved,
            missing_ploidy: config
                .ploidy
                .as_ref()
                .map(|ploidy| qc::missing_ploidy(&catalog.rows, ploidy)),
            missing_outbreak_descendants: qc::missing_outbreak_descendants(
                &config.outbreak_descendant_ids(),
                &catalog.rows,
            ),
            outdated_accessions: qc::outdated_accessions(&catalog.rows),
            suppressed_genomes: qc::suppressed_genomes(&catalog.rows),
            paired_accessions: qc::genbank_with_paired_refseq(&catalog.rows),
            tree_checks,
        };
        info!(
            rows = catalog.len(),
            missing_accessions = qc.missing_ncbi_assemblies.missing.len(),
            findings = qc.finding_count(),
            "qc checks complete"
        );

        let outbreak_mapping = outbreak_ids
            .iter()
            .filter_map(|id| {
                cache.name(*id).map(|name| TaxonMapping {
                    taxonomy_id: *id,
                    name: name.to_string(),
                    rank: cache.rank(*id).cloned(),
                })
            })
            .collect();

        Ok(CatalogBuild {
            catalog,
            tree,
            qc,
            outbreak_mapping,
        })
    }
}

impl CatalogBuild {
    /// Serializes every output the config asks for.
    pub fn render(&self, config: &ResolvedConfig) -> Result<BuildArtifacts, CatalogError> {
        let outputs = &config.outputs;
        let mut files = vec![(outputs.genomes.clone(), render_genomes_tsv(&self.catalog)?)];
        if let Some(path) = &outputs.primary_data {
            files.push((path.clone(), render_primary_data(&self.catalog)?));
        }
        if let (Some(path), Some(tree)) = (&outputs.tree, &self.tree) {
            files.push((path.clone(), render_tree_json(tree)?));
        }
        if let Some(path) = &outputs.qc_report {
            files.push((path.clone(), self.qc.to_markdown().into_bytes()));
        }
        if let Some(path) = &outputs.outbreak_taxonomy_mapping {
            if !self.outbreak_mapping.is_empty() {
                files.push((path.clone(), render_taxonomy_mapping(&self.outbreak_mapping)?));
            }
        }
        Ok(BuildArtifacts { files })
    }
}

/// Download root for the hub-relative paths in the genArk listing: the
/// directory holding the listing itself.
pub fn gene_model_base(index_url: &str) -> &str {
    index_url
        .rsplit_once('/')
        .map(|(base, _)| base)
        .unwrap_or(index_url)
}
