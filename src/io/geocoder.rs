//! Reverse geocoding and nearby-place lookups for the enrichment pass

use crate::domain::site::{Address, AddressComponent};
use crate::infra::config::Config;
use anyhow::{bail, Context};
use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Place types too generic to say anything about a site's surroundings
const GENERIC_PLACE_TYPES: &[&str] = &[
    "establishment",
    "point_of_interest",
    "political",
    "geocode",
    "route",
    "street_address",
    "premise",
    "locality",
    "sublocality",
    "neighborhood",
];

#[async_trait]
pub trait Geocoder: Send + Sync {
    async fn reverse_geocode(&self, lat: f64, long: f64) -> anyhow::Result<Vec<Address>>;

    /// Names of notable places within `radius_m` meters
    async fn nearby_places(&self, lat: f64, long: f64, radius_m: u32) -> anyhow::Result<Vec<String>>;
}

/// Google Maps Geocoding + Places web services
pub struct GoogleGeocoder {
    client: reqwest::Client,
    api_key: String,
    geocode_url: String,
    places_url: String,
}

#[derive(Debug, Deserialize)]
struct ApiResponse<T> {
    status: String,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default = "Vec::new")]
    results: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    formatted_address: String,
    #[serde(default)]
    address_components: Vec<GeocodeComponent>,
}

#[derive(Debug, Deserialize)]
struct GeocodeComponent {
    long_name: String,
    short_name: String,
    #[serde(default)]
    types: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct PlaceResult {
    name: String,
    #[serde(default)]
    types: Vec<String>,
}

impl GoogleGeocoder {
    /// `None` when no API key is configured
    pub fn from_config(config: &Config) -> anyhow::Result<Option<Self>> {
        let Some(api_key) = config.google_api_key().filter(|k| !k.is_empty()) else {
            return Ok(None);
        };
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout().unwrap_or(Duration::from_secs(30)))
            .build()
            .context("Failed to build geocoding client")?;

        Ok(Some(Self {
            client,
            api_key: api_key.to_string(),
            geocode_url: config.geocode_url().to_string(),
            places_url: config.places_url().to_string(),
        }))
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> anyhow::Result<Vec<T>> {
        let response = self
            .client
            .get(url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .with_context(|| format!("Request to {url} failed"))?;
        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            bail!("{url} answered HTTP {status}");
        }
        parse_api_response(&body)
    }
}

fn parse_api_response<T: for<'de> Deserialize<'de>>(body: &str) -> anyhow::Result<Vec<T>> {
    let parsed: ApiResponse<T> = serde_json::from_str(body).context("Malformed API response")?;
    match parsed.status.as_str() {
        "OK" => Ok(parsed.results),
        "ZERO_RESULTS" => Ok(Vec::new()),
        other => bail!(
            "API status {}: {}",
            other,
            parsed.error_message.unwrap_or_default()
        ),
    }
}

fn is_notable(types: &[String]) -> bool {
    types.iter().any(|t| !GENERIC_PLACE_TYPES.contains(&t.as_str()))
}

#[async_trait]
impl Geocoder for GoogleGeocoder {
    async fn reverse_geocode(&self, lat: f64, long: f64) -> anyhow::Result<Vec<Address>> {
        let results: Vec<GeocodeResult> =
            self.get(&self.geocode_url, &[("latlng", format!("{lat},{long}"))]).await?;
        debug!(lat = lat, long = long, results = results.len(), "reverse_geocoded");

        Ok(results
            .into_iter()
            .map(|r| Address {
                formatted_address: r.formatted_address,
                components: r
                    .address_components
                    .into_iter()
                    .map(|c| AddressComponent {
                        long_name: c.long_name,
                        short_name: c.short_name,
                        types: c.types,
                    })
                    .collect(),
            })
            .collect())
    }

    async fn nearby_places(&self, lat: f64, long: f64, radius_m: u32) -> anyhow::Result<Vec<String>> {
        let query = [("location", format!("{lat},{long}")), ("radius", radius_m.to_string())];
        let results: Vec<PlaceResult> = self.get(&self.places_url, &query).await?;
        debug!(lat = lat, long = long, radius_m = radius_m, results = results.len(), "nearby_places");

        Ok(results.into_iter().filter(|p| is_notable(&p.types)).map(|p| p.name).collect())
    }
}
