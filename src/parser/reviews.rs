use super::node::{array_at, get};
use super::text::unescape_token;
use super::{guarded, strip_security_prefix};
use crate::error::ParseError;
use crate::models::{Listing, Review};
use serde_json::Value;
use tracing::warn;

/// Decode one review-pagination payload. Reviews live at index 2.
pub fn parse_extra_reviews(data: &[u8]) -> Result<Vec<Review>, ParseError> {
    guarded(|| {
        let document: Value = serde_json::from_slice(strip_security_prefix(data))?;
        Ok(parse_reviews(array_at(&document, &[2])))
    })
}

/// Reviews without an author name are dropped
pub fn parse_reviews(items: &[Value]) -> Vec<Review> {
    items
        .iter()
        .filter_map(|item| {
            let el = item.as_array().and_then(|a| a.first())?;

            let name = get::<String>(el, &[1, 4, 5, 0]);
            if name.is_empty() {
                return None;
            }

            let images = array_at(el, &[2, 2, 0, 1, 21, 7])
                .iter()
                .filter_map(Value::as_str)
                .filter(|s| !s.is_empty())
                .map(|s| s.get(2..).unwrap_or_default().to_string())
                .collect();

            Some(Review {
                name,
                profile_picture: unescape_token(&get::<String>(el, &[1, 4, 5, 1])),
                rating: get::<i64>(el, &[2, 0, 0]),
                description: get::<String>(el, &[2, 15, 0, 0]),
                images,
                when: review_date(array_at(el, &[2, 2, 0, 1, 21, 6, 8])),
            })
        })
        .collect()
}

/// `year-month-day` from three positional tokens
fn review_date(parts: &[Value]) -> String {
    if parts.len() < 3 {
        return String::new();
    }
    format!(
        "{}-{}-{}",
        token_text(&parts[0]),
        token_text(&parts[1]),
        token_text(&parts[2])
    )
}

fn token_text(value: &Value) -> String {
    match value {
        Value::Number(n) => match n.as_i64() {
            Some(i) => i.to_string(),
            None => n.to_string(),
        },
        Value::String(s) => s.clone(),
        _ => String::new(),
    }
}

impl Listing {
    /// Append reviews decoded from later pagination payloads. Pages that
    /// fail to decode are skipped.
    pub fn add_extra_reviews(&mut self, pages: &[Vec<u8>]) {
        for page in pages {
            match parse_extra_reviews(page) {
                Ok(reviews) => self.user_reviews_extended.extend(reviews),
                Err(e) => warn!("Skipping undecodable review page: {}", e),
            }
        }
    }
}
