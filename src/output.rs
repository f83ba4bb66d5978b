use std::fs;
use std::io::{self, Write};

use camino::Utf8Path;
use serde::Serialize;
use serde_json::ser::PrettyFormatter;

use crate::app::{BuildSummary, ProgressEvent, ProgressSink};
use crate::catalog::{Catalog, CatalogRow};
use crate::domain::{Rank, TaxonomyId};
use crate::error::CatalogError;
use crate::tree::SpeciesTreeNode;

const LEADING_COLUMNS: [&str; 19] = [
    "strain",
    "taxonomyId",
    "accession",
    "currentAccession",
    "isRef",
    "level",
    "assemblyStatus",
    "chromosomeCount",
    "length",
    "scaffoldCount",
    "scaffoldN50",
    "scaffoldL50",
    "coverage",
    "gcPercent",
    "annotationStatus",
    "pairedAccession",
    "species",
    "speciesTaxonomyId",
    "lineageTaxonomyIds",
];

const TRAILING_COLUMNS: [&str; 4] = ["commonName", "otherTaxa", "ucscBrowser", "geneModelUrl"];

pub fn genome_columns(catalog: &Catalog) -> Vec<String> {
    let mut columns = LEADING_COLUMNS.iter().map(|c| c.to_string()).collect::<Vec<_>>();
    columns.extend(catalog.group_fields.iter().cloned());
    columns.extend(catalog.levels.iter().map(Rank::column_key));
    columns.extend(catalog.levels.iter().map(Rank::id_column_key));
    columns.extend(TRAILING_COLUMNS.iter().map(|c| c.to_string()));
    columns
}

/// Tab-separated table, one line per row in catalog order.
pub fn render_genomes_tsv(catalog: &Catalog) -> Result<Vec<u8>, CatalogError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer
        .write_record(genome_columns(catalog))
        .map_err(|err| CatalogError::Serialization(err.to_string()))?;
    for row in &catalog.rows {
        writer
            .write_record(genome_record(catalog, row))
            .map_err(|err| CatalogError::Serialization(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| CatalogError::Serialization(err.to_string()))
}

fn genome_record(catalog: &Catalog, row: &CatalogRow) -> Vec<String> {
    let assembly = &row.assembly;
    let taxon = row.taxon.as_ref();
    let mut record = vec![
        assembly.strain.clone().unwrap_or_default(),
        assembly.taxonomy_id.to_string(),
        assembly.accession.to_string(),
        assembly.current_accession.to_string(),
        capitalized_bool(assembly.is_ref),
        assembly.level.clone(),
        assembly.assembly_status.clone(),
        optional(assembly.chromosome_count),
        assembly.length.to_string(),
        optional(assembly.scaffold_count),
        optional(assembly.scaffold_n50),
        optional(assembly.scaffold_l50),
        assembly.coverage.clone().unwrap_or_default(),
        assembly.gc_percent.map(format_float).unwrap_or_default(),
        assembly.annotation_status.clone().unwrap_or_default(),
        optional(assembly.paired_accession.as_ref()),
        optional(row.species().map(|species| &species.name)),
        optional(row.species().map(|species| species.id)),
        taxon.map(|taxon| taxon.lineage_string()).unwrap_or_default(),
    ];
    for field in &catalog.group_fields {
        record.push(optional(taxon.and_then(|taxon| taxon.groups.get(field))));
    }
    for level in &catalog.levels {
        record.push(optional(row.taxon_at(level).map(|t| &t.name)));
    }
    for level in &catalog.levels {
        record.push(optional(row.taxon_at(level).map(|t| t.id)));
    }
    record.push(optional(taxon.and_then(|taxon| taxon.common_name.as_ref())));
    record.push(
        taxon
            .and_then(|taxon| taxon.other_taxa.as_ref())
            .map(|names| names.join(","))
            .unwrap_or_default(),
    );
    record.push(optional(assembly.ucsc_browser.as_ref()));
    record.push(optional(assembly.gene_model_url.as_ref()));
    record
}

fn capitalized_bool(value: bool) -> String {
    let text = if value { "True" } else { "False" };
    text.to_string()
}

fn optional<T: ToString>(value: Option<T>) -> String {
    value.map(|value| value.to_string()).unwrap_or_default()
}

/// Whole numbers keep one decimal place (`51.0`).
fn format_float(value: f64) -> String {
    if value.fract() == 0.0 {
        format!("{value:.1}")
    } else {
        value.to_string()
    }
}

/// Sorted keys, four-space indentation, trailing newline.
pub fn render_tree_json(tree: &SpeciesTreeNode) -> Result<Vec<u8>, CatalogError> {
    let mut buffer = Vec::new();
    let formatter = PrettyFormatter::with_indent(b"    ");
    let mut serializer = serde_json::Serializer::with_formatter(&mut buffer, formatter);
    tree.serialize(&mut serializer)
        .map_err(|err| CatalogError::Serialization(err.to_string()))?;
    buffer.push(b'\n');
    Ok(buffer)
}

/// One outbreak taxon per line: `taxonomy_id`, `name`, `rank`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaxonMapping {
    pub taxonomy_id: TaxonomyId,
    pub name: String,
    pub rank: Option<Rank>,
}

pub fn render_taxonomy_mapping(entries: &[TaxonMapping]) -> Result<Vec<u8>, CatalogError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer
        .write_record(["taxonomy_id", "name", "rank"])
        .map_err(|err| CatalogError::Serialization(err.to_string()))?;
    for entry in entries {
        writer
            .write_record([
                entry.taxonomy_id.to_string(),
                entry.name.clone(),
                optional(entry.rank.as_ref()),
            ])
            .map_err(|err| CatalogError::Serialization(err.to_string()))?;
    }
    writer
        .into_inner()
        .map_err(|err| CatalogError::Serialization(err.to_string()))
}

/// One line per SRA sample of each assembly's BioSample; assemblies without
/// SRA samples are left out.
pub fn render_primary_data(catalog: &Catalog) -> Result<Vec<u8>, CatalogError> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(Vec::new());
    writer
        .write_record(["accession", "biosample", "sample_ids", "sra_sample_acc"])
        .map_err(|err| CatalogError::Serialization(err.to_string()))?;
    for row in &catalog.rows {
        let Some(biosample) = &row.assembly.biosample else {
            continue;
        };
        let sample_ids = biosample.sample_ids.join(",");
        for sra in biosample.sra_samples() {
            writer
                .write_record([
                    row.assembly.accession.as_str(),
                    biosample.accession.as_str(),
                    sample_ids.as_str(),
                    sra,
                ])
                .map_err(|err| CatalogError::Serialization(err.to_string()))?;
        }
    }
    writer
        .into_inner()
        .map_err(|err| CatalogError::Serialization(err.to_string()))
}

/// Replaces `dest` through a temporary file in the same directory.
pub fn write_atomic(dest: &Utf8Path, bytes: &[u8]) -> Result<(), CatalogError> {
    let parent = dest
        .parent()
        .filter(|parent| !parent.as_str().is_empty())
        .unwrap_or(Utf8Path::new("."));
    fs::create_dir_all(parent.as_std_path())
        .map_err(|err| CatalogError::Filesystem(format!("create {parent}: {err}")))?;
    let mut temp = tempfile::Builder::new()
        .prefix(".kira-catalog")
        .tempfile_in(parent.as_std_path())
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    temp.write_all(bytes)
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    temp.as_file()
        .sync_all()
        .map_err(|err| CatalogError::Filesystem(err.to_string()))?;
    temp.persist(dest.as_std_path())
        .map_err(|err| CatalogError::Filesystem(format!("write {dest}: {err}")))?;
    Ok(())
}

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Interactive,
    NonInteractive,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_summary(summary: &BuildSummary) -> io::Result<()> {
        Self::print_json(summary)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floats_keep_a_decimal() {
        assert_eq!(format_float(51.0), "51.0");
        assert_eq!(format_float(50.5), "50.5");
    }

    #[test]
    fn mapping_has_header() {
        let bytes = render_taxonomy_mapping(&[TaxonMapping {
            taxonomy_id: TaxonomyId::new(1773),
            name: "Mycobacterium tuberculosis".to_string(),
            rank: Some("species".parse().unwrap()),
        }])
        .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            "taxonomy_id\tname\trank\n1773\tMycobacterium tuberculosis\tspecies\n"
        );
    }

    #[test]
    fn atomic_write_replaces_file() {
        let temp = tempfile::tempdir().unwrap();
        let dest = camino::Utf8PathBuf::from_path_buf(temp.path().join("out/genomes.tsv")).unwrap();
        write_atomic(&dest, b"first").unwrap();
        write_atomic(&dest, b"second").unwrap();
        assert_eq!(fs::read_to_string(&dest).unwrap(), "second");
    }
}
