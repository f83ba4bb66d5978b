use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;

use camino::{Utf8Path, Utf8PathBuf};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::batch::{BatchPolicy, DEFAULT_INITIAL_BATCH_SIZE, DEFAULT_MIN_BATCH_SIZE};
use crate::domain::{GenomeAccession, Rank, TaxonomyId};
use crate::error::CatalogError;
use crate::groups::{GroupSet, GroupSets, TaxonomicGroupRule};
use crate::ncbi::DEFAULT_NCBI_BASE_URL;
use crate::ucsc::{DEFAULT_GENE_MODEL_INDEX_URL, DEFAULT_UCSC_ASSEMBLIES_URL};

pub const DEFAULT_CONFIG_FILE: &str = "catalog.yml";

#[derive(Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub schema_version: Option<u32>,
    pub assemblies: Utf8PathBuf,
    #[serde(default)]
    pub organisms: Option<Utf8PathBuf>,
    #[serde(default)]
    pub outbreaks: Option<Utf8PathBuf>,
    #[serde(default)]
    pub ncbi_base_url: Option<String>,
    #[serde(default)]
    pub ucsc_assemblies_url: Option<String>,
    #[serde(default)]
    pub gene_model_index_url: Option<String>,
    #[serde(default)]
    pub gene_models: Option<bool>,
    #[serde(default)]
    pub taxonomic_levels: Vec<String>,
    #[serde(default)]
    pub taxonomic_group_sets: BTreeMap<String, BTreeMap<TaxonomyId, GroupEntry>>,
    #[serde(default)]
    pub tree_source: Option<TreeSource>,
    #[serde(default)]
    pub batching: Option<BatchingConfig>,
    pub outputs: OutputsConfig,
}

/// Where the species tree's shape comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TreeSource {
    /// Group rows on their classification at the configured levels.
    #[default]
    Ranks,
    /// Ask NCBI for the subtree spanning the catalog's taxa.
    NcbiSubtree,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum GroupEntry {
    Shorthand(String),
    Detailed(GroupEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GroupEntryObject {
    pub value: String,
    #[serde(default)]
    pub exclude: Option<ExcludeEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum ExcludeEntry {
    One(TaxonomyId),
    Many(Vec<TaxonomyId>),
}

#[derive(Debug, Default, Deserialize, Serialize)]
pub struct BatchingConfig {
    #[serde(default)]
    pub initial_batch_size: Option<usize>,
    #[serde(default)]
    pub min_batch_size: Option<usize>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OutputsConfig {
    pub genomes: Utf8PathBuf,
    #[serde(default)]
    pub tree: Option<Utf8PathBuf>,
    #[serde(default)]
    pub qc_report: Option<Utf8PathBuf>,
    #[serde(default)]
    pub outbreak_taxonomy_mapping: Option<Utf8PathBuf>,
    #[serde(default)]
    pub primary_data: Option<Utf8PathBuf>,
}

#[derive(Debug, Deserialize)]
struct AssembliesFile {
    #[serde(default)]
    assemblies: Vec<AssemblyEntry>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
pub enum AssemblyEntry {
    Shorthand(String),
    Detailed(AssemblyEntryObject),
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AssemblyEntryObject {
    pub accession: String,
}

#[derive(Debug, Deserialize)]
struct OrganismsFile {
    #[serde(default)]
    organisms: Vec<OrganismEntry>,
}

#[derive(Debug, Deserialize)]
struct OrganismEntry {
    taxonomy_id: TaxonomyId,
    #[serde(default)]
    ploidy: Option<Ploidy>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Ploidy {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Default, Deserialize)]
struct OutbreaksFile {
    #[serde(default)]
    outbreaks: Vec<OutbreakEntry>,
}

#[derive(Debug, Deserialize)]
struct OutbreakEntry {
    taxonomy_id: TaxonomyId,
    #[serde(default)]
    highlight_descendant_taxonomy_ids: Vec<TaxonomyId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbreak {
    pub taxonomy_id: TaxonomyId,
    pub highlight_descendant_taxonomy_ids: Vec<TaxonomyId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedOutputs {
    pub genomes: Utf8PathBuf,
    pub tree: Option<Utf8PathBuf>,
    pub qc_report: Option<Utf8PathBuf>,
    pub outbreak_taxonomy_mapping: Option<Utf8PathBuf>,
    pub primary_data: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub schema_version: u32,
    pub accessions: Vec<GenomeAccession>,
    /// `None` when no organisms file is configured; the ploidy check is then skipped.
    pub ploidy: Option<HashMap<TaxonomyId, Vec<String>>>,
    pub outbreaks: Vec<Outbreak>,
    pub ncbi_base_url: String,
    pub ucsc_assemblies_url: String,
    pub gene_model_index_url: String,
    pub gene_models: bool,
    pub levels: Vec<Rank>,
    pub groups: GroupSets,
    pub tree_source: TreeSource,
    pub batch_policy: BatchPolicy,
    pub outputs: ResolvedOutputs,
}

impl ResolvedConfig {
    /// Primary outbreak taxa, unique and ascending.
    pub fn outbreak_taxonomy_ids(&self) -> Vec<TaxonomyId> {
        let mut ids = self
            .outbreaks
            .iter()
            .map(|outbreak| outbreak.taxonomy_id)
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        ids
    }

    pub fn outbreak_descendant_ids(&self) -> Vec<TaxonomyId> {
        let mut ids = self
            .outbreaks
            .iter()
            .flat_map(|outbreak| outbreak.highlight_descendant_taxonomy_ids.iter().copied())
            .collect::<Vec<_>>();
        ids.sort();
        ids.dedup();
        ids
    }
}

pub struct ConfigLoader;

impl ConfigLoader {
    pub fn resolve(path: Option<&Utf8Path>) -> Result<ResolvedConfig, CatalogError> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Utf8PathBuf::from(DEFAULT_CONFIG_FILE),
        };

        if path.is_none() && !config_path.exists() {
            return Err(CatalogError::MissingConfig);
        }

        let config: Config = read_yaml(&config_path)?;
        let base_dir = config_path
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default();
        Self::resolve_config(config, &base_dir)
    }

    /// Validates `config` and loads the input lists it names. Relative paths
    /// are taken from `base_dir`.
    pub fn resolve_config(config: Config, base_dir: &Utf8Path) -> Result<ResolvedConfig, CatalogError> {
        let schema_version = config.schema_version.unwrap_or(1);
        if schema_version != 1 {
            return Err(CatalogError::ConfigInvalid(format!(
                "unsupported schema_version {schema_version}"
            )));
        }

        let assemblies: AssembliesFile = read_yaml(&base_dir.join(&config.assemblies))?;
        let accessions = assemblies
            .assemblies
            .into_iter()
            .map(|entry| match entry {
                AssemblyEntry::Shorthand(value) => value.parse(),
                AssemblyEntry::Detailed(obj) => obj.accession.parse(),
            })
            .collect::<Result<Vec<GenomeAccession>, CatalogError>>()?;
        if accessions.is_empty() {
            return Err(CatalogError::ConfigInvalid(
                "assemblies list is empty".to_string(),
            ));
        }

        let ploidy = match &config.organisms {
            Some(path) => {
                let organisms: OrganismsFile = read_yaml(&base_dir.join(path))?;
                Some(
                    organisms
                        .organisms
                        .into_iter()
                        .filter_map(|organism| {
                            let ploidy = match organism.ploidy? {
                                Ploidy::One(value) => vec![value],
                                Ploidy::Many(values) => values,
                            };
                            Some((organism.taxonomy_id, ploidy))
                        })
                        .collect(),
                )
            }
            None => None,
        };

        let outbreaks = match &config.outbreaks {
            Some(path) => read_outbreaks(&base_dir.join(path))?,
            None => Vec::new(),
        };

        let levels = config
            .taxonomic_levels
            .iter()
            .map(|level| level.parse::<Rank>())
            .collect::<Result<Vec<_>, _>>()?;
        let mut seen = HashSet::new();
        if let Some(duplicate) = levels.iter().find(|level| !seen.insert(*level)) {
            return Err(CatalogError::ConfigInvalid(format!(
                "taxonomic level {duplicate} listed twice"
            )));
        }
        if config.outputs.tree.is_some() && levels.is_empty() {
            return Err(CatalogError::ConfigInvalid(
                "a tree output needs at least one taxonomic level".to_string(),
            ));
        }

        let groups = resolve_group_sets(config.taxonomic_group_sets);

        let batching = config.batching.unwrap_or_default();
        let batch_policy = BatchPolicy {
            initial_batch_size: batching
                .initial_batch_size
                .unwrap_or(DEFAULT_INITIAL_BATCH_SIZE),
            min_batch_size: batching.min_batch_size.unwrap_or(DEFAULT_MIN_BATCH_SIZE),
            ..BatchPolicy::default()
        };
        batch_policy.validate()?;

        let outputs = ResolvedOutputs {
            genomes: base_dir.join(config.outputs.genomes),
            tree: config.outputs.tree.map(|path| base_dir.join(path)),
            qc_report: config.outputs.qc_report.map(|path| base_dir.join(path)),
            outbreak_taxonomy_mapping: config
                .outputs
                .outbreak_taxonomy_mapping
                .map(|path| base_dir.join(path)),
            primary_data: config.outputs.primary_data.map(|path| base_dir.join(path)),
        };

        Ok(ResolvedConfig {
            schema_version,
            accessions,
            ploidy,
            outbreaks,
            ncbi_base_url: config
                .ncbi_base_url
                .unwrap_or_else(|| DEFAULT_NCBI_BASE_URL.to_string()),
            ucsc_assemblies_url: config
                .ucsc_assemblies_url
                .unwrap_or_else(|| DEFAULT_UCSC_ASSEMBLIES_URL.to_string()),
            gene_model_index_url: config
                .gene_model_index_url
                .unwrap_or_else(|| DEFAULT_GENE_MODEL_INDEX_URL.to_string()),
            gene_models: config.gene_models.unwrap_or(true),
            levels,
            groups,
            tree_source: config.tree_source.unwrap_or_default(),
            batch_policy,
            outputs,
        })
    }
}

fn resolve_group_sets(sets: BTreeMap<String, BTreeMap<TaxonomyId, GroupEntry>>) -> GroupSets {
    let mut groups = GroupSets::new();
    for (field, entries) in sets {
        let rules = entries.into_iter().map(|(taxon, entry)| match entry {
            GroupEntry::Shorthand(label) => TaxonomicGroupRule::new(taxon, &label),
            GroupEntry::Detailed(obj) => {
                let exclude = match obj.exclude {
                    None => Vec::new(),
                    Some(ExcludeEntry::One(id)) => vec![id],
                    Some(ExcludeEntry::Many(ids)) => ids,
                };
                TaxonomicGroupRule::new(taxon, &obj.value).excluding(exclude)
            }
        });
        groups.insert(&field, GroupSet::new(rules));
    }
    groups
}

/// An empty outbreaks document means no outbreaks.
fn read_outbreaks(path: &Utf8Path) -> Result<Vec<Outbreak>, CatalogError> {
    let content = read_text(path)?;
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    let file: Option<OutbreaksFile> = parse_yaml(path, &content)?;
    Ok(file
        .unwrap_or_default()
        .outbreaks
        .into_iter()
        .map(|entry| Outbreak {
            taxonomy_id: entry.taxonomy_id,
            highlight_descendant_taxonomy_ids: entry.highlight_descendant_taxonomy_ids,
        })
        .collect())
}

fn read_yaml<T: DeserializeOwned>(path: &Utf8Path) -> Result<T, CatalogError> {
    let content = read_text(path)?;
    parse_yaml(path, &content)
}

fn read_text(path: &Utf8Path) -> Result<String, CatalogError> {
    fs::read_to_string(path).map_err(|_| CatalogError::ConfigRead(path.to_path_buf()))
}

fn parse_yaml<T: DeserializeOwned>(path: &Utf8Path, content: &str) -> Result<T, CatalogError> {
    serde_yaml::from_str(content).map_err(|err| CatalogError::ConfigParse {
        path: path.to_path_buf(),
        message: err.to_string(),
    })
}
