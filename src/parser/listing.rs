use super::hours::{extract_hours, extract_popular_times};
use super::node::{array_at, get};
use super::reviews::parse_reviews;
use super::text::{clean_website_url, normalize_time_string};
use super::{guarded, strip_security_prefix};
use crate::error::ParseError;
use crate::models::{About, AboutOption, Address, Image, LinkSource, Listing, Owner};
use serde_json::Value;
use std::collections::BTreeMap;

/// The envelope must reach at least the listing payload slot
const MIN_ARITY: usize = 7;
const PAYLOAD_INDEX: usize = 6;

const OWNER_PROFILE_URL: &str = "https://www.google.com/maps/contrib/";

/// Decode a full listing from a place payload
pub fn parse_listing(raw: &[u8]) -> Result<Listing, ParseError> {
    guarded(|| {
        let document = decode_envelope(raw)?;
        let payload = listing_payload(&document)?;
        Ok(listing_from_payload(&document, payload))
    })
}

/// Fast path for callers that only need the review count
pub fn parse_review_count(raw: &[u8]) -> Result<i64, ParseError> {
    guarded(|| {
        let document = decode_envelope(raw)?;
        let payload = listing_payload(&document)?;
        Ok(get::<i64>(payload, &[4, 8]))
    })
}

fn decode_envelope(raw: &[u8]) -> Result<Value, ParseError> {
    let document: Value = serde_json::from_slice(strip_security_prefix(raw))?;

    let len = document.as_array().map(Vec::len).unwrap_or(0);
    if len < MIN_ARITY {
        return Err(ParseError::TooShort { len, min: MIN_ARITY });
    }

    Ok(document)
}

fn listing_payload(document: &Value) -> Result<&Value, ParseError> {
    document
        .get(PAYLOAD_INDEX)
        .filter(|v| v.is_array())
        .ok_or(ParseError::MissingPayload(PAYLOAD_INDEX))
}

fn listing_from_payload(document: &Value, p: &Value) -> Listing {
    let title = get::<String>(p, &[11]);

    let categories: Vec<String> = array_at(p, &[13])
        .iter()
        .map(|c| c.as_str().unwrap_or_default().to_string())
        .collect();
    let category = categories.first().cloned().unwrap_or_default();

    let raw_address = get::<String>(p, &[18]);
    let address = raw_address
        .strip_prefix(&format!("{title},"))
        .unwrap_or(&raw_address)
        .trim()
        .to_string();

    let owner_id = get::<String>(p, &[57, 2]);
    let owner = Owner {
        link: if owner_id.is_empty() {
            String::new()
        } else {
            format!("{OWNER_PROFILE_URL}{owner_id}")
        },
        name: get::<String>(p, &[57, 1]),
        id: owner_id,
    };

    Listing {
        link: get::<String>(p, &[27]),
        cid: get::<String>(document, &[25, 3, 0, 13, 0, 0, 1]),
        title,
        categories,
        category,
        address,
        open_hours: extract_hours(p, document),
        popular_times: extract_popular_times(p),
        website: clean_website_url(&get::<String>(p, &[7, 0])),
        phone: get::<String>(p, &[178, 0, 0]),
        plus_code: get::<String>(p, &[183, 2, 2, 0]),
        review_count: get::<i64>(p, &[4, 8]),
        review_rating: get::<f64>(p, &[4, 7]),
        reviews_per_rating: reviews_per_rating(p),
        latitude: get::<f64>(p, &[9, 2]),
        longitude: get::<f64>(p, &[9, 3]),
        status: get::<String>(p, &[34, 4, 4]),
        description: get::<String>(p, &[32, 1, 1]),
        reviews_link: get::<String>(p, &[4, 3, 0]),
        thumbnail: get::<String>(p, &[72, 0, 1, 6, 0]),
        timezone: get::<String>(p, &[30]),
        price_range: normalize_time_string(&get::<String>(p, &[4, 2])),
        data_id: get::<String>(p, &[10]),
        images: link_sources(array_at(p, &[171, 0]), &[3, 0, 6, 0], &[2])
            .into_iter()
            .map(|ls| Image {
                title: ls.source,
                image: ls.link,
            })
            .collect(),
        reservations: link_sources(array_at(p, &[46]), &[0], &[1]),
        order_online: order_online(p),
        menu: LinkSource {
            link: get::<String>(p, &[38, 0]),
            source: get::<String>(p, &[38, 1]),
        },
        owner,
        complete_address: Address {
            borough: get::<String>(p, &[183, 1, 0]),
            street: get::<String>(p, &[183, 1, 1]),
            city: get::<String>(p, &[183, 1, 3]),
            postal_code: get::<String>(p, &[183, 1, 4]),
            state: get::<String>(p, &[183, 1, 5]),
            country: get::<String>(p, &[183, 1, 6]),
        },
        about: about_groups(p),
        user_reviews: parse_reviews(array_at(p, &[175, 9, 0, 0])),
        ..Default::default()
    }
}

/// Pairs of (link, source) read from each element; incomplete pairs are dropped
fn link_sources(items: &[Value], link: &[usize], source: &[usize]) -> Vec<LinkSource> {
    items
        .iter()
        .map(|item| LinkSource {
            link: get::<String>(item, link),
            source: get::<String>(item, source),
        })
        .filter(|ls| !ls.link.is_empty() && !ls.source.is_empty())
        .collect()
}

fn order_online(p: &Value) -> Vec<LinkSource> {
    let mut items = array_at(p, &[75, 0, 1, 2]);
    if items.is_empty() {
        items = array_at(p, &[75, 0, 0, 2]);
    }
    link_sources(items, &[1, 2, 0], &[0, 0])
}

fn reviews_per_rating(p: &Value) -> BTreeMap<u8, i64> {
    (1u8..=5)
        .map(|stars| (stars, get::<i64>(p, &[175, 3, usize::from(stars) - 1])))
        .collect()
}

fn about_groups(p: &Value) -> Vec<About> {
    array_at(p, &[100, 1])
        .iter()
        .map(|group| About {
            id: get::<String>(group, &[0]),
            name: get::<String>(group, &[1]),
            options: array_at(group, &[2])
                .iter()
                .map(|opt| AboutOption {
                    name: get::<String>(opt, &[1]),
                    enabled: get::<f64>(opt, &[2, 1, 0, 0]) == 1.0,
                })
                .filter(|opt| !opt.name.is_empty())
                .collect(),
        })
        .collect()
}
