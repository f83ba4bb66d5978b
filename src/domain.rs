use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::CatalogError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct GenomeAccession(String);

impl GenomeAccession {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_genbank(&self) -> bool {
        self.0.starts_with("GCA_")
    }

    pub fn is_refseq(&self) -> bool {
        self.0.starts_with("GCF_")
    }
}

impl fmt::Display for GenomeAccession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for GenomeAccession {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_string();
        let is_valid = normalized.starts_with("GCF_") || normalized.starts_with("GCA_");
        let parts = normalized.split('.').collect::<Vec<_>>();
        let has_numeric = parts
            .first()
            .map(|prefix| prefix.trim_start_matches("GCF_").trim_start_matches("GCA_"))
            .map(|rest| rest.chars().all(|ch| ch.is_ascii_digit()) && !rest.is_empty())
            .unwrap_or(false);
        if !is_valid || !has_numeric {
            return Err(CatalogError::InvalidGenomeAccession(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for GenomeAccession {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<GenomeAccession> for String {
    fn from(value: GenomeAccession) -> Self {
        value.0
    }
}

/// NCBI taxonomy identifier. The Datasets API emits these as numbers in some
/// reports and as strings in others, so both forms deserialize; output always
/// uses the string form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaxonomyId(u64);

impl TaxonomyId {
    pub const ROOT: TaxonomyId = TaxonomyId(1);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub fn get(self) -> u64 {
        self.0
    }

    pub fn is_root(self) -> bool {
        self == Self::ROOT
    }
}

impl fmt::Display for TaxonomyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaxonomyId {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        value
            .trim()
            .parse::<u64>()
            .map(Self)
            .map_err(|_| CatalogError::InvalidTaxonomyId(value.to_string()))
    }
}

impl From<u64> for TaxonomyId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl Serialize for TaxonomyId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TaxonomyId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => Ok(Self(value)),
            Raw::Text(value) => value.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Lowercase NCBI rank label such as `genus`, `species` or `strain`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rank(String);

impl Rank {
    pub const SPECIES: &'static str = "species";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_species(&self) -> bool {
        self.0 == Self::SPECIES
    }

    /// Column stem used in the flat table, e.g. `taxonomicLevelGenus`.
    pub fn column_key(&self) -> String {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(first) => format!(
                "taxonomicLevel{}{}",
                first.to_ascii_uppercase(),
                chars.as_str()
            ),
            None => "taxonomicLevel".to_string(),
        }
    }

    pub fn id_column_key(&self) -> String {
        format!("{}Id", self.column_key())
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Rank {
    type Err = CatalogError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_lowercase();
        let is_valid = !normalized.is_empty()
            && normalized
                .chars()
                .all(|ch| ch.is_ascii_alphabetic() || ch == '_' || ch == ' ');
        if !is_valid {
            return Err(CatalogError::InvalidRank(value.to_string()));
        }
        Ok(Self(normalized))
    }
}

impl TryFrom<String> for Rank {
    type Error = CatalogError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rank> for String {
    fn from(value: Rank) -> Self {
        value.0
    }
}

/// A `(name, id)` pair naming a taxon at some rank.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TaxonRef {
    pub name: String,
    pub id: TaxonomyId,
}
