//! Site data model: stubs from the listing phase and fully located sites

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Source-stable site identifier. The only identity key used for dedup and merge.
///
/// Ordering is natural: all-digit ids compare by numeric value and sort
/// before any other id, so "2" < "30" < "100" < "a1".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SiteId(pub String);

impl SiteId {
    /// Digits with leading zeros stripped, when the id is purely numeric
    fn numeric_digits(&self) -> Option<&str> {
        let digits = self.0.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        Some(digits.trim_start_matches('0'))
    }
}

impl Ord for SiteId {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.numeric_digits(), other.numeric_digits()) {
            (Some(a), Some(b)) => a
                .len()
                .cmp(&b.len())
                .then_with(|| a.cmp(b))
                .then_with(|| self.0.cmp(&other.0)),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => self.0.cmp(&other.0),
        }
    }
}

impl PartialOrd for SiteId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for SiteId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SiteId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Site discovered by a listing query, not yet located
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteStub {
    pub id: SiteId,
    pub name: String,
}

/// Attributes resolved by a detail query
#[derive(Debug, Clone, PartialEq)]
pub struct SiteDetail {
    pub description: String,
    pub latitude: Decimal,
    pub longitude: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddressComponent {
    pub long_name: String,
    pub short_name: String,
    #[serde(default)]
    pub types: Vec<String>,
}

/// One reverse-geocoding result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Address {
    pub formatted_address: String,
    #[serde(default)]
    pub components: Vec<AddressComponent>,
}

/// Fields attached by the enrichment pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enrichment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_components: Option<Vec<Address>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub places: Option<BTreeSet<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nearest_site: Option<SiteId>,
}

/// Persisted site record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Site {
    pub id: SiteId,
    pub display_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latitude: Option<Decimal>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub longitude: Option<Decimal>,
    #[serde(flatten)]
    pub enrichment: Enrichment,
}

impl Site {
    /// Promote a stub once its detail query succeeded
    pub fn located(stub: SiteStub, detail: SiteDetail) -> Self {
        Self {
            id: stub.id,
            display_name: stub.name,
            description: Some(detail.description),
            latitude: Some(detail.latitude),
            longitude: Some(detail.longitude),
            enrichment: Enrichment::default(),
        }
    }

    /// Coordinates as floats, when both are known
    pub fn position(&self) -> Option<(f64, f64)> {
        let lat = self.latitude?.to_f64()?;
        let long = self.longitude?.to_f64()?;
        Some((lat, long))
    }
}

/// Site set keyed and ordered by id
pub type Dataset = BTreeMap<SiteId, Site>;

/// Collect sites into a dataset; a later record replaces an earlier one with the same id
pub fn dataset_from<I: IntoIterator<Item = Site>>(sites: I) -> Dataset {
    sites.into_iter().map(|site| (site.id.clone(), site)).collect()
}
