use std::io::Read;
use std::time::Duration;

use flate2::read::GzDecoder;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use tracing::debug;

use crate::error::CatalogError;

pub const DEFAULT_UCSC_ASSEMBLIES_URL: &str =
    "https://hgdownload.soe.ucsc.edu/hubs/BRC/assemblyList.json";
pub const DEFAULT_GENE_MODEL_INDEX_URL: &str =
    "https://hgdownload.soe.ucsc.edu/hubs/genArkFileList.txt.gz";
pub const GENE_MODEL_DOWNLOAD_BASE: &str = "https://hgdownload.soe.ucsc.edu/hubs";

/// One entry of the UCSC hub assembly list.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UcscAssembly {
    #[serde(rename = "ucscBrowser")]
    pub ucsc_browser: Option<String>,
    #[serde(rename = "genBank")]
    pub genbank: Option<String>,
    #[serde(rename = "refSeq")]
    pub refseq: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AssemblyList {
    data: Vec<UcscAssembly>,
}

pub trait UcscClient: Send + Sync {
    fn fetch_assembly_list(&self) -> Result<Vec<UcscAssembly>, CatalogError>;
    /// Plain-text genArk file listing, one hub-relative path per line.
    fn fetch_gene_model_index(&self) -> Result<String, CatalogError>;
}

#[derive(Clone)]
pub struct UcscHttpClient {
    client: Client,
    assemblies_url: String,
    gene_model_index_url: String,
}

impl UcscHttpClient {
    pub fn new(assemblies_url: &str, gene_model_index_url: &str) -> Result<Self, CatalogError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("kira-catalog/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| CatalogError::UcscHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| CatalogError::UcscHttp(err.to_string()))?;
        Ok(Self {
            client,
            assemblies_url: assemblies_url.to_string(),
            gene_model_index_url: gene_model_index_url.to_string(),
        })
    }

    fn get_bytes(&self, url: &str) -> Result<Vec<u8>, CatalogError> {
        debug!(%url, "ucsc.request");
        let response = self
            .client
            .get(url)
            .send()
            .map_err(|err| CatalogError::UcscHttp(err.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let message = response.text().unwrap_or_default();
            return Err(CatalogError::UcscStatus {
                status: status.as_u16(),
                message,
            });
        }
        let bytes = response
            .bytes()
            .map_err(|err| CatalogError::UcscHttp(err.to_string()))?;
        Ok(bytes.to_vec())
    }
}

impl UcscClient for UcscHttpClient {
    fn fetch_assembly_list(&self) -> Result<Vec<UcscAssembly>, CatalogError> {
        let bytes = self.get_bytes(&self.assemblies_url)?;
        parse_assembly_list(&bytes)
    }

    fn fetch_gene_model_index(&self) -> Result<String, CatalogError> {
        let bytes = self.get_bytes(&self.gene_model_index_url)?;
        gunzip_text(&bytes)
    }
}

pub fn parse_assembly_list(bytes: &[u8]) -> Result<Vec<UcscAssembly>, CatalogError> {
    let list: AssemblyList = serde_json::from_slice(bytes)
        .map_err(|err| CatalogError::UcscHttp(format!("invalid assembly list: {err}")))?;
    Ok(list.data)
}

pub fn gunzip_text(bytes: &[u8]) -> Result<String, CatalogError> {
    let mut text = String::new();
    GzDecoder::new(bytes)
        .read_to_string(&mut text)
        .map_err(|err| CatalogError::UcscHttp(format!("invalid gene model index: {err}")))?;
    Ok(text)
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;

    use super::*;

    #[test]
    fn parses_assembly_list_with_nulls() {
        let list = parse_assembly_list(
            br#"{"data": [{"ucscBrowser": "hg38", "genBank": "GCA_000001405.29", "refSeq": null, "extra": 1}]}"#,
        )
        .unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].ucsc_browser.as_deref(), Some("hg38"));
        assert_eq!(list[0].refseq, None);
    }

    #[test]
    fn gunzips_index() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(b"GCF/000/005/845/GCF_000005845.2/genes/x.gtf.gz\n").unwrap();
        let bytes = encoder.finish().unwrap();
        assert!(gunzip_text(&bytes).unwrap().starts_with("GCF/000"));
    }
}
