use serde_json::{Value, json};
use tracing::{info, warn};

use crate::batch::{BatchPolicy, BatchRequest, post_batched};
use crate::domain::{GenomeAccession, TaxonomyId};
use crate::error::CatalogError;
use crate::ncbi::{GENOME_DATASET_REPORT, NcbiClient};

pub const GENOME_PAGE_SIZE: usize = 500;
pub const UNKNOWN_ASSEMBLY_STATUS: &str = "ASSEMBLY_STATUS_UNKNOWN";
const REFERENCE_GENOME: &str = "reference genome";

#[derive(Debug, Clone, PartialEq)]
pub struct GenomeAssembly {
    pub accession: GenomeAccession,
    pub current_accession: GenomeAccession,
    pub taxonomy_id: TaxonomyId,
    pub strain: Option<String>,
    pub is_ref: bool,
    pub level: String,
    pub assembly_status: String,
    pub chromosome_count: Option<u64>,
    pub length: u64,
    pub scaffold_count: Option<u64>,
    pub scaffold_n50: Option<u64>,
    pub scaffold_l50: Option<u64>,
    pub coverage: Option<String>,
    pub gc_percent: Option<f64>,
    pub annotation_status: Option<String>,
    pub paired_accession: Option<GenomeAccession>,
    pub ucsc_browser: Option<String>,
    pub gene_model_url: Option<String>,
    pub biosample: Option<Biosample>,
}

/// The BioSample behind an assembly with its external sample ids as `db:value`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Biosample {
    pub accession: String,
    pub sample_ids: Vec<String>,
}

impl Biosample {
    /// SRA sample accessions with the `SRA:` prefix removed.
    pub fn sra_samples(&self) -> impl Iterator<Item = &str> {
        self.sample_ids
            .iter()
            .filter_map(|id| id.strip_prefix("SRA:"))
            .filter(|id| !id.is_empty())
    }
}

impl GenomeAssembly {
    pub fn is_outdated(&self) -> bool {
        self.accession != self.current_accession
    }

    pub fn is_suppressed(&self) -> bool {
        matches!(self.assembly_status.as_str(), "suppressed" | "retired")
    }

    /// GenBank accession whose RefSeq counterpart is available.
    pub fn paired_refseq(&self) -> Option<&GenomeAccession> {
        if !self.accession.is_genbank() {
            return None;
        }
        self.paired_accession.as_ref().filter(|paired| paired.is_refseq())
    }
}

pub fn fetch_assemblies<C: NcbiClient + ?Sized>(
    client: &C,
    accessions: &[GenomeAccession],
    policy: BatchPolicy,
) -> Result<Vec<GenomeAssembly>, CatalogError> {
    let request = BatchRequest::new(GENOME_DATASET_REPORT, "accessions")
        .with_field("filters", json!({"assembly_version": "all_assemblies"}));
    let ids = accessions
        .iter()
        .map(|accession| accession.as_str().to_string())
        .collect::<Vec<_>>();
    let reports = post_batched(client, &request, &ids, policy.with_page_size(GENOME_PAGE_SIZE))?;
    let assemblies = reports
        .iter()
        .map(extract_assembly)
        .collect::<Result<Vec<_>, _>>()?;
    info!(
        requested = accessions.len(),
        returned = assemblies.len(),
        "fetched genome reports"
    );
    Ok(assemblies)
}

pub fn extract_assembly(raw: &Value) -> Result<GenomeAssembly, CatalogError> {
    let accession: GenomeAccession = required_str(raw, "accession")?.parse()?;
    let current_accession = raw
        .get("current_accession")
        .and_then(|v| v.as_str())
        .and_then(|current| lenient_accession(&accession, "current_accession", current))
        .unwrap_or_else(|| accession.clone());
    let organism = raw
        .get("organism")
        .ok_or_else(|| missing_field(&accession, "organism"))?;
    let taxonomy_id = organism
        .get("tax_id")
        .and_then(as_u64)
        .map(TaxonomyId::new)
        .ok_or_else(|| missing_field(&accession, "organism.tax_id"))?;
    let strain = organism
        .get("infraspecific_names")
        .and_then(|v| v.get("strain"))
        .and_then(|v| v.as_str())
        .filter(|strain| !strain.is_empty())
        .map(|strain| strain.to_string());

    let info = raw
        .get("assembly_info")
        .ok_or_else(|| missing_field(&accession, "assembly_info"))?;
    let level = info
        .get("assembly_level")
        .and_then(|v| v.as_str())
        .ok_or_else(|| missing_field(&accession, "assembly_info.assembly_level"))?
        .to_string();
    let assembly_status = info
        .get("assembly_status")
        .and_then(|v| v.as_str())
        .unwrap_or(UNKNOWN_ASSEMBLY_STATUS)
        .to_string();
    let is_ref = info.get("refseq_category").and_then(|v| v.as_str()) == Some(REFERENCE_GENOME);

    let stats = raw.get("assembly_stats").unwrap_or(&Value::Null);
    let length = stats
        .get("total_sequence_length")
        .and_then(as_u64)
        .ok_or_else(|| missing_field(&accession, "assembly_stats.total_sequence_length"))?;

    let paired_accession = raw
        .get("paired_accession")
        .and_then(|v| v.as_str())
        .and_then(|paired| lenient_accession(&accession, "paired_accession", paired));
    let biosample = info.get("biosample").and_then(extract_biosample);

    Ok(GenomeAssembly {
        current_accession,
        taxonomy_id,
        strain,
        is_ref,
        level,
        assembly_status,
        chromosome_count: stats.get("total_number_of_chromosomes").and_then(as_u64),
        length,
        scaffold_count: stats.get("number_of_scaffolds").and_then(as_u64),
        scaffold_n50: stats.get("scaffold_n50").and_then(as_u64),
        scaffold_l50: stats.get("scaffold_l50").and_then(as_u64),
        coverage: stats
            .get("genome_coverage")
            .and_then(|v| v.as_str())
            .map(|v| v.to_string()),
        gc_percent: stats.get("gc_percent").and_then(|v| {
            v.as_f64()
                .or_else(|| v.as_str().and_then(|text| text.parse().ok()))
        }),
        annotation_status: raw
            .get("annotation_info")
            .and_then(|v| v.get("status"))
            .and_then(|v| v.as_str())
            .map(|v| v.to_string()),
        paired_accession,
        ucsc_browser: None,
        gene_model_url: None,
        biosample,
        accession,
    })
}

fn extract_biosample(raw: &Value) -> Option<Biosample> {
    let accession = raw.get("accession").and_then(|v| v.as_str())?.to_string();
    let sample_ids = raw
        .get("sample_ids")
        .and_then(|v| v.as_array())
        .into_iter()
        .flatten()
        .filter_map(|sample| {
            let db = sample.get("db").and_then(|v| v.as_str())?;
            let value = sample.get("value").and_then(|v| v.as_str()).unwrap_or_default();
            Some(format!("{db}:{value}"))
        })
        .collect();
    Some(Biosample {
        accession,
        sample_ids,
    })
}

/// A secondary accession that does not parse is dropped, not fatal.
fn lenient_accession(owner: &GenomeAccession, field: &str, value: &str) -> Option<GenomeAccession> {
    match value.parse() {
        Ok(accession) => Some(accession),
        Err(_) => {
            warn!(accession = %owner, field, value, "ignoring malformed accession in genome report");
            None
        }
    }
}

/// Datasets reports carry large counts as strings.
fn as_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_str().and_then(|text| text.trim().parse().ok()))
}

fn required_str<'a>(raw: &'a Value, key: &str) -> Result<&'a str, CatalogError> {
    raw.get(key).and_then(|v| v.as_str()).ok_or_else(|| {
        CatalogError::UnexpectedResponse(format!("genome report without {key}"))
    })
}

fn missing_field(accession: &GenomeAccession, field: &str) -> CatalogError {
    CatalogError::UnexpectedResponse(format!("genome report for {accession} lacks {field}"))
}
