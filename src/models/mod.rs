use crate::geo::Point;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Photo attached to a listing
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Image {
    pub title: String,
    pub image: String,
}

/// A link together with the provider that serves it (reservations, ordering, menu)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct LinkSource {
    pub link: String,
    pub source: String,
}

/// Owner of a listing as exposed by the mapping service
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Owner {
    pub id: String,
    pub name: String,
    pub link: String,
}

/// Structured postal address
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Address {
    pub borough: String,
    pub street: String,
    pub city: String,
    pub postal_code: String,
    pub state: String,
    pub country: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AboutOption {
    pub name: String,
    pub enabled: bool,
}

/// Named group of boolean attributes ("Accessibility", "Amenities", ...)
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct About {
    pub id: String,
    pub name: String,
    pub options: Vec<AboutOption>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Review {
    pub name: String,
    pub profile_picture: String,
    pub rating: i64,
    pub description: String,
    pub images: Vec<String>,
    pub when: String,
}

/// One business record extracted from the mapping service.
///
/// Built once by the parser; afterwards only `user_reviews_extended` and
/// `emails` grow as later jobs enrich it.
///
/// JSON keys follow the export format, `longtitude` spelling included.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Listing {
    #[serde(rename = "input_id")]
    pub id: String,
    pub link: String,
    pub cid: String,
    pub title: String,
    pub categories: Vec<String>,
    pub category: String,
    pub address: String,
    pub open_hours: BTreeMap<String, Vec<String>>,
    /// Day name -> hour of day -> relative traffic
    pub popular_times: BTreeMap<String, BTreeMap<u32, i64>>,
    #[serde(rename = "web_site")]
    pub website: String,
    pub phone: String,
    pub plus_code: String,
    pub review_count: i64,
    pub review_rating: f64,
    /// Star bucket (1..=5) -> number of reviews
    pub reviews_per_rating: BTreeMap<u8, i64>,
    pub latitude: f64,
    #[serde(rename = "longtitude", alias = "longitude")]
    pub longitude: f64,
    pub status: String,
    pub description: String,
    pub reviews_link: String,
    pub thumbnail: String,
    pub timezone: String,
    pub price_range: String,
    pub data_id: String,
    pub images: Vec<Image>,
    pub reservations: Vec<LinkSource>,
    pub order_online: Vec<LinkSource>,
    pub menu: LinkSource,
    pub owner: Owner,
    pub complete_address: Address,
    pub about: Vec<About>,
    pub user_reviews: Vec<Review>,
    pub user_reviews_extended: Vec<Review>,
    pub emails: Vec<String>,
    pub place_id: String,
    pub place_id_url: String,
}

const SOCIAL_HOSTS: [&str; 3] = ["facebook", "instagram", "twitter"];

impl Listing {
    /// Column order for flat (CSV-like) serialization. Downstream importers
    /// depend on this order.
    pub const COLUMNS: [&'static str; 35] = [
        "id",
        "link",
        "title",
        "category",
        "address",
        "open_hours",
        "popular_times",
        "website",
        "phone",
        "plus_code",
        "review_count",
        "review_rating",
        "reviews_per_rating",
        "latitude",
        "longitude",
        "cid",
        "status",
        "description",
        "reviews_link",
        "thumbnail",
        "timezone",
        "price_range",
        "data_id",
        "images",
        "reservations",
        "order_online",
        "menu",
        "owner",
        "complete_address",
        "about",
        "user_reviews",
        "user_reviews_extended",
        "emails",
        "place_id",
        "place_id_url",
    ];

    /// A listing is only usable once it has both a title and a category
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.title.is_empty() {
            return Err("title is empty");
        }
        if self.category.is_empty() {
            return Err("category is empty");
        }
        Ok(())
    }

    pub fn coordinates(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }

    pub fn has_coordinates(&self) -> bool {
        self.latitude != 0.0 || self.longitude != 0.0
    }

    /// Whether the website is worth visiting for email addresses
    pub fn is_website_valid_for_email(&self) -> bool {
        if self.website.is_empty() {
            return false;
        }
        !SOCIAL_HOSTS.iter().any(|host| self.website.contains(host))
    }

    /// Identity used for at-most-once processing across jobs and phases
    pub fn dedup_key(&self) -> Option<&str> {
        if !self.place_id.is_empty() {
            Some(&self.place_id)
        } else if !self.link.is_empty() {
            Some(&self.link)
        } else {
            None
        }
    }

    /// Flatten into strings following [`Listing::COLUMNS`]
    pub fn to_row(&self) -> Vec<String> {
        vec![
            self.id.clone(),
            self.link.clone(),
            self.title.clone(),
            self.category.clone(),
            self.address.clone(),
            to_json(&self.open_hours),
            to_json(&self.popular_times),
            self.website.clone(),
            self.phone.clone(),
            self.plus_code.clone(),
            self.review_count.to_string(),
            format!("{:.6}", self.review_rating),
            to_json(&self.reviews_per_rating),
            format!("{:.6}", self.latitude),
            format!("{:.6}", self.longitude),
            self.cid.clone(),
            self.status.clone(),
            self.description.clone(),
            self.reviews_link.clone(),
            self.thumbnail.clone(),
            self.timezone.clone(),
            self.price_range.clone(),
            self.data_id.clone(),
            to_json(&self.images),
            to_json(&self.reservations),
            to_json(&self.order_online),
            to_json(&self.menu),
            to_json(&self.owner),
            to_json(&self.complete_address),
            to_json(&self.about),
            to_json(&self.user_reviews),
            to_json(&self.user_reviews_extended),
            self.emails.join(", "),
            self.place_id.clone(),
            self.place_id_url.clone(),
        ]
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_default()
}

/// A discovered listing paired with the query or category that found it.
/// Seeds bootstrap the nested proximity phase.
#[derive(Debug, Clone, PartialEq)]
pub struct Seed {
    pub query: String,
    pub listing: Listing,
}

impl Seed {
    pub fn new(query: impl Into<String>, listing: Listing) -> Self {
        Self {
            query: query.into(),
            listing,
        }
    }

    /// Category to search around this seed: originating query, then the
    /// listing's own category, then a generic label.
    pub fn search_category(&self) -> &str {
        let query = self.query.trim();
        if !query.is_empty() {
            return query;
        }
        let category = self.listing.category.trim();
        if !category.is_empty() {
            return category;
        }
        "business"
    }

    /// Identity of the seed location; falls back to rounded coordinates
    pub fn key(&self) -> String {
        match self.listing.dedup_key() {
            Some(key) => key.to_string(),
            None => format!("{:.6},{:.6}", self.listing.latitude, self.listing.longitude),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_columns_match_row_width() {
        let listing = Listing::default();
        assert_eq!(listing.to_row().len(), Listing::COLUMNS.len());
        assert_eq!(Listing::COLUMNS[0], "id");
        assert_eq!(Listing::COLUMNS[13], "latitude");
        assert_eq!(Listing::COLUMNS[34], "place_id_url");
    }

    #[test]
    fn test_row_formats_values() {
        let listing = Listing {
            title: "Cafe".to_string(),
            latitude: 37.5,
            review_count: 12,
            emails: vec!["a@b.com".to_string(), "c@d.com".to_string()],
            ..Default::default()
        };
        let row = listing.to_row();
        assert_eq!(row[2], "Cafe");
        assert_eq!(row[10], "12");
        assert_eq!(row[13], "37.500000");
        assert_eq!(row[32], "a@b.com, c@d.com");
        assert_eq!(row[23], "[]");
    }

    #[test]
    fn test_json_keys_follow_export_format() {
        let listing = Listing {
            id: "search-0-0".to_string(),
            website: "https://shop.example".to_string(),
            longitude: 13.4,
            ..Default::default()
        };
        let value = serde_json::to_value(&listing).unwrap();
        assert_eq!(value["input_id"], "search-0-0");
        assert_eq!(value["web_site"], "https://shop.example");
        assert_eq!(value["longtitude"], 13.4);
        assert!(value.get("id").is_none());
        assert!(value.get("website").is_none());

        let back: Listing = serde_json::from_value(value).unwrap();
        assert_eq!(back, listing);

        let corrected = serde_json::json!({ "longitude": 2.5 });
        let mut full = serde_json::to_value(Listing::default()).unwrap();
        full.as_object_mut().unwrap().remove("longtitude");
        full.as_object_mut().unwrap().extend(corrected.as_object().unwrap().clone());
        let parsed: Listing = serde_json::from_value(full).unwrap();
        assert_eq!(parsed.longitude, 2.5);
    }

    #[test]
    fn test_validate() {
        let mut listing = Listing::default();
        assert_eq!(listing.validate(), Err("title is empty"));
        listing.title = "Bakery".to_string();
        assert_eq!(listing.validate(), Err("category is empty"));
        listing.category = "Bakery".to_string();
        assert!(listing.validate().is_ok());
    }

    #[test]
    fn test_website_valid_for_email() {
        let mut listing = Listing::default();
        assert!(!listing.is_website_valid_for_email());
        listing.website = "https://facebook.com/shop".to_string();
        assert!(!listing.is_website_valid_for_email());
        listing.website = "https://shop.example".to_string();
        assert!(listing.is_website_valid_for_email());
    }

    #[test]
    fn test_seed_category_fallback() {
        let mut listing = Listing::default();
        assert_eq!(Seed::new("", listing.clone()).search_category(), "business");
        listing.category = "Bakery".to_string();
        assert_eq!(Seed::new("  ", listing.clone()).search_category(), "Bakery");
        assert_eq!(Seed::new("cafes", listing).search_category(), "cafes");
    }
}
