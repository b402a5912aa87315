//! Client for the structured nearby-search endpoint.
//!
//! Only ids, names and locations are requested, which keeps each call in
//! the cheapest billing tier. Results are paginated with a continuation
//! token until the service stops returning one.

use crate::error::{CrawlError, Result};
use crate::geo::Point;
use crate::models::Listing;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

pub const SEARCH_NEARBY_URL: &str = "https://places.googleapis.com/v1/places:searchNearby";
pub const SEARCH_TEXT_URL: &str = "https://places.googleapis.com/v1/places:searchText";
pub const NEARBY_FIELD_MASK: &str = "places.id,places.displayName,places.location";

/// Estimated price in USD of one nearby-search request
pub const COST_PER_REQUEST: f64 = 0.017;
const MAX_RESULT_COUNT: u32 = 20;

/// Common plural search keywords and the place type they stand for
const KEYWORD_TYPES: &[(&str, &str)] = &[
    ("restaurants", "restaurant"),
    ("cafes", "cafe"),
    ("bars", "bar"),
    ("hotels", "hotel"),
    ("hospitals", "hospital"),
    ("pharmacies", "pharmacy"),
    ("banks", "bank"),
    ("atms", "atm"),
    ("gyms", "gym"),
    ("parks", "park"),
    ("schools", "school"),
    ("churches", "church"),
    ("mosques", "mosque"),
    ("temples", "hindu_temple"),
    ("supermarkets", "supermarket"),
    ("gas stations", "gas_station"),
    ("parking lots", "parking"),
    ("shopping malls", "shopping_mall"),
    ("movie theaters", "movie_theater"),
    ("bakeries", "bakery"),
    ("dentists", "dentist"),
    ("doctors", "doctor"),
    ("lawyers", "lawyer"),
    ("salons", "beauty_salon"),
    ("spas", "spa"),
    ("museums", "museum"),
    ("libraries", "library"),
    ("airports", "airport"),
    ("train stations", "train_station"),
    ("bus stations", "bus_station"),
    ("car rentals", "car_rental"),
    ("car washes", "car_wash"),
    ("laundries", "laundry"),
    ("pet stores", "pet_store"),
    ("electronics stores", "electronics_store"),
    ("clothing stores", "clothing_store"),
    ("book stores", "book_store"),
    ("florists", "florist"),
    ("furniture stores", "furniture_store"),
    ("hardware stores", "hardware_store"),
    ("jewelry stores", "jewelry_store"),
    ("liquor stores", "liquor_store"),
    ("shoe stores", "shoe_store"),
    ("convenience stores", "convenience_store"),
];

/// Map a free-text keyword onto a place type. Underscored spellings
/// ("gas_stations") match too; unknown keywords pass through lowercased.
pub fn normalize_keyword(keyword: &str) -> String {
    let keyword = keyword.trim().to_lowercase();
    let spaced = keyword.replace('_', " ");

    KEYWORD_TYPES
        .iter()
        .find(|(k, _)| *k == spaced)
        .map(|(_, t)| t.to_string())
        .unwrap_or(keyword)
}

pub fn place_id_to_url(place_id: &str) -> String {
    format!("https://www.google.com/maps/place/?q=place_id:{place_id}")
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NearbyRequest<'a> {
    location_restriction: LocationRestriction,
    #[serde(skip_serializing_if = "Option::is_none")]
    included_types: Option<&'a [String]>,
    max_result_count: u32,
    rank_preference: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    page_token: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct LocationRestriction {
    circle: Circle,
}

#[derive(Debug, Serialize)]
struct Circle {
    center: LatLng,
    radius: f64,
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq)]
pub struct LatLng {
    pub latitude: f64,
    pub longitude: f64,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct DisplayName {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PlaceResult {
    pub id: String,
    #[serde(default)]
    pub display_name: DisplayName,
    #[serde(default)]
    pub location: LatLng,
}

impl PlaceResult {
    /// Minimal listing carrying identity and coordinates
    pub fn into_listing(self, category: &str) -> Listing {
        Listing {
            link: place_id_to_url(&self.id),
            title: self.display_name.text,
            category: category.to_string(),
            categories: vec![category.to_string()],
            latitude: self.location.latitude,
            longitude: self.location.longitude,
            place_id_url: place_id_to_url(&self.id),
            place_id: self.id,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NearbyResponse {
    #[serde(default)]
    places: Vec<PlaceResult>,
    #[serde(default)]
    next_page_token: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct TextSearchResponse {
    #[serde(default)]
    places: Vec<PlaceResult>,
}

/// All pages of one nearby search plus what they cost
#[derive(Debug, Clone, Default)]
pub struct NearbySearch {
    pub places: Vec<PlaceResult>,
    pub requests: u32,
}

impl NearbySearch {
    pub fn estimated_cost(&self) -> f64 {
        f64::from(self.requests) * COST_PER_REQUEST
    }
}

pub struct PlacesClient {
    client: Client,
    api_key: String,
    nearby_url: String,
    text_url: String,
}

impl PlacesClient {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            api_key: api_key.into(),
            nearby_url: SEARCH_NEARBY_URL.to_string(),
            text_url: SEARCH_TEXT_URL.to_string(),
        })
    }

    /// Point both endpoints at another host
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.nearby_url = format!("{base}/v1/places:searchNearby");
        self.text_url = format!("{base}/v1/places:searchText");
        self
    }

    /// Nearby search around `center`, following continuation tokens
    pub async fn search_nearby(&self, center: Point, radius: f64, categories: &[String]) -> Result<NearbySearch> {
        let types: Vec<String> = categories.iter().map(|c| normalize_keyword(c)).collect();
        let mut result = NearbySearch::default();
        let mut token: Option<String> = None;

        loop {
            let body = nearby_request_body(center, radius, &types, token.as_deref());
            let response = self
                .client
                .post(&self.nearby_url)
                .header("X-Goog-Api-Key", &self.api_key)
                .header("X-Goog-FieldMask", NEARBY_FIELD_MASK)
                .json(&body)
                .send()
                .await?;
            result.requests += 1;

            let page: NearbyResponse = read_json(response).await?;
            debug!(places = page.places.len(), request = result.requests, "nearby search page");
            result.places.extend(page.places);

            match page.next_page_token.filter(|t| !t.is_empty()) {
                Some(next) => token = Some(next),
                None => break,
            }
        }

        info!(
            places = result.places.len(),
            requests = result.requests,
            "nearby search finished (estimated cost ${:.3})",
            result.estimated_cost()
        );
        Ok(result)
    }

    /// First place id matching a free-text query
    pub async fn find_place_id(&self, query: &str) -> Result<Option<String>> {
        if query.trim().is_empty() {
            return Ok(None);
        }

        let response = self
            .client
            .post(&self.text_url)
            .header("X-Goog-Api-Key", &self.api_key)
            .header("X-Goog-FieldMask", "places.id")
            .json(&serde_json::json!({ "textQuery": query }))
            .send()
            .await?;

        let found: TextSearchResponse = read_json(response).await?;
        Ok(found.places.into_iter().map(|p| p.id).find(|id| !id.is_empty()))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(CrawlError::Api {
            status: status.as_u16(),
            body,
        });
    }
    serde_json::from_str(&body).map_err(|e| CrawlError::Api {
        status: status.as_u16(),
        body: format!("unexpected response body: {e}"),
    })
}

fn nearby_request_body(center: Point, radius: f64, types: &[String], token: Option<&str>) -> serde_json::Value {
    let request = NearbyRequest {
        location_restriction: LocationRestriction {
            circle: Circle {
                center: LatLng {
                    latitude: center.lat,
                    longitude: center.lon,
                },
                radius,
            },
        },
        included_types: (!types.is_empty()).then_some(types),
        max_result_count: MAX_RESULT_COUNT,
        rank_preference: "DISTANCE",
        page_token: token,
    };
    serde_json::to_value(request).unwrap_or_default()
}
