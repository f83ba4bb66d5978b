//! UCSC cross-references: browser ids from the hub assembly list and
//! gene-model (GTF) URLs from the genArk file index.

use std::collections::{BTreeMap, BTreeSet, HashSet};

use regex::Regex;

use crate::domain::GenomeAccession;
use crate::error::CatalogError;
use crate::ucsc::UcscAssembly;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserMatch {
    Unique(String),
    /// More than one browser id claims the accession; none is assigned.
    Ambiguous(Vec<String>),
    Unmatched,
}

#[derive(Debug, Clone, Default)]
pub struct UcscIndex {
    browsers: BTreeMap<String, BTreeSet<String>>,
    listed: HashSet<String>,
}

impl UcscIndex {
    /// Unions the GenBank and RefSeq columns into one accession map.
    pub fn build(assemblies: &[UcscAssembly]) -> Self {
        let mut index = Self::default();
        for entry in assemblies {
            for accession in [&entry.genbank, &entry.refseq].into_iter().flatten() {
                if accession.is_empty() {
                    continue;
                }
                index.listed.insert(accession.clone());
                if let Some(browser) = entry.ucsc_browser.as_ref().filter(|b| !b.is_empty()) {
                    index
                        .browsers
                        .entry(accession.clone())
                        .or_default()
                        .insert(browser.clone());
                }
            }
        }
        index
    }

    pub fn is_listed(&self, accession: &GenomeAccession) -> bool {
        self.listed.contains(accession.as_str())
    }

    pub fn browser_for(&self, accession: &GenomeAccession) -> BrowserMatch {
        match self.browsers.get(accession.as_str()) {
            None => BrowserMatch::Unmatched,
            Some(ids) if ids.len() == 1 => ids
                .iter()
                .next()
                .map(|id| BrowserMatch::Unique(id.clone()))
                .unwrap_or(BrowserMatch::Unmatched),
            Some(ids) => BrowserMatch::Ambiguous(ids.iter().cloned().collect()),
        }
    }
}

/// Best GTF URL per assembly id.
#[derive(Debug, Clone, Default)]
pub struct GeneModelIndex {
    urls: BTreeMap<String, String>,
}

impl GeneModelIndex {
    /// Parses hub-relative paths shaped like
    /// `GCF/001/559/675/GCF_001559675.1/genes/GCF_001559675.1.ncbiGene.gtf.gz`.
    pub fn parse(listing: &str, base_url: &str) -> Result<Self, CatalogError> {
        let pattern = Regex::new(r"^[^/]+/[^/]+/[^/]+/[^/]+/([^/]+)/genes/.+\.gtf\.gz$")
            .map_err(|err| CatalogError::UcscHttp(err.to_string()))?;
        let base = base_url.trim_end_matches('/');
        let mut scored: BTreeMap<String, (u8, String)> = BTreeMap::new();
        for line in listing.lines().map(str::trim) {
            let Some(captures) = pattern.captures(line) else {
                continue;
            };
            let asm_id = captures[1].to_string();
            let url = format!("{base}/{line}");
            let score = source_priority(&url);
            match scored.get(&asm_id) {
                Some((current, _)) if *current >= score => {}
                _ => {
                    scored.insert(asm_id, (score, url));
                }
            }
        }
        Ok(Self {
            urls: scored.into_iter().map(|(id, (_, url))| (id, url)).collect(),
        })
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn url_for(&self, accession: &GenomeAccession) -> Option<&str> {
        self.urls.get(accession.as_str()).map(String::as_str)
    }
}

fn source_priority(url: &str) -> u8 {
    if url.contains("ncbiRefSeq") {
        3
    } else if url.contains("ncbiGene") {
        2
    } else if url.contains("augustus") {
        1
    } else {
        0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn acc(value: &str) -> GenomeAccession {
        value.parse().unwrap()
    }

    fn entry(browser: &str, genbank: Option<&str>, refseq: Option<&str>) -> UcscAssembly {
        UcscAssembly {
            ucsc_browser: Some(browser.to_string()),
            genbank: genbank.map(str::to_string),
            refseq: refseq.map(str::to_string),
        }
    }

    #[test]
    fn matches_either_column() {
        let index = UcscIndex::build(&[entry(
            "GCF_000005845.2",
            Some("GCA_000005845.2"),
            Some("GCF_000005845.2"),
        )]);
        assert_eq!(
            index.browser_for(&acc("GCA_000005845.2")),
            BrowserMatch::Unique("GCF_000005845.2".to_string())
        );
        assert!(index.is_listed(&acc("GCF_000005845.2")));
        assert_eq!(index.browser_for(&acc("GCA_000001405.29")), BrowserMatch::Unmatched);
    }

    #[test]
    fn conflicting_browsers_are_ambiguous() {
        let index = UcscIndex::build(&[
            entry("a", Some("GCA_000001405.29"), None),
            entry("b", None, Some("GCA_000001405.29")),
        ]);
        assert_eq!(
            index.browser_for(&acc("GCA_000001405.29")),
            BrowserMatch::Ambiguous(vec!["a".to_string(), "b".to_string()])
        );
    }

    #[test]
    fn gene_model_priority() {
        let listing = "\
GCF/001/559/675/GCF_001559675.1/genes/GCF_001559675.1.augustus.gtf.gz
GCF/001/559/675/GCF_001559675.1/genes/GCF_001559675.1.ncbiRefSeq.gtf.gz
GCF/001/559/675/GCF_001559675.1/genes/GCF_001559675.1.ncbiGene.gtf.gz
GCF/001/559/675/GCF_001559675.1/bbi/GCF_001559675.1.gc5Base.bw
GCA/000/001/405/GCA_000001405.29/genes/GCA_000001405.29.other.gtf.gz
";
        let index = GeneModelIndex::parse(listing, "https://example.org/hubs/").unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.url_for(&acc("GCF_001559675.1")),
            Some(
                "https://example.org/hubs/GCF/001/559/675/GCF_001559675.1/genes/GCF_001559675.1.ncbiRefSeq.gtf.gz"
            )
        );
        assert!(index.url_for(&acc("GCA_000001405.29")).is_some());
    }
}
