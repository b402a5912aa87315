//! Opening hours and popular times.
//!
//! Hours move around the payload between upstream releases, so extraction
//! tries three strategies in order and takes the first hit:
//!
//! 1. known index paths whose children look like `["Monday", ...]` rows
//! 2. a bounded recursive search for any array with that weekday shape
//! 3. a bounded recursive search for `[[day, [[start, end], ...]], ...]`
//!    with numeric days and minute/second offsets

use super::node::{array_at, get};
use super::text::normalize_time_string;
use serde_json::Value;
use std::collections::BTreeMap;

/// Index paths (relative to the listing payload) where hours have been seen,
/// newest layout first. Best-effort: the upstream format is undocumented and
/// these constants need revisiting whenever it shifts.
pub const KNOWN_HOURS_PATHS: [[usize; 2]; 9] = [
    [203, 0],
    [34, 1],
    [30, 1],
    [35, 1],
    [33, 1],
    [34, 0],
    [31, 1],
    [100, 3],
    [84, 3],
];

const MIN_WEEKDAYS: usize = 3;
const NAME_SEARCH_DEPTH: usize = 10;
const NUMERIC_SEARCH_DEPTH: usize = 12;
const MINUTES_PER_DAY: i64 = 1440;

pub type Hours = BTreeMap<String, Vec<String>>;

/// Canonical day name for a full or abbreviated weekday, case-insensitive
fn canonical_day(name: &str) -> Option<&'static str> {
    match name.to_lowercase().as_str() {
        "mon" | "monday" => Some("Monday"),
        "tue" | "tues" | "tuesday" => Some("Tuesday"),
        "wed" | "wednesday" => Some("Wednesday"),
        "thu" | "thur" | "thurs" | "thursday" => Some("Thursday"),
        "fri" | "friday" => Some("Friday"),
        "sat" | "saturday" => Some("Saturday"),
        "sun" | "sunday" => Some("Sunday"),
        _ => None,
    }
}

fn day_from_number(n: i64) -> Option<&'static str> {
    match n {
        1 => Some("Monday"),
        2 => Some("Tuesday"),
        3 => Some("Wednesday"),
        4 => Some("Thursday"),
        5 => Some("Friday"),
        6 => Some("Saturday"),
        7 => Some("Sunday"),
        _ => None,
    }
}

fn weekday_rows(items: &[Value]) -> usize {
    items
        .iter()
        .filter_map(Value::as_array)
        .filter(|row| row.len() >= 2)
        .filter_map(|row| row[0].as_str())
        .filter(|name| canonical_day(name).is_some())
        .count()
}

/// At least three children shaped like `[weekday, ...]`
pub fn looks_like_hours(items: &[Value]) -> bool {
    items.len() >= MIN_WEEKDAYS && weekday_rows(items) >= MIN_WEEKDAYS
}

/// Run the three-tier fallback. `payload` is the listing sub-array and
/// `document` the whole decoded envelope.
pub fn extract_hours(payload: &Value, document: &Value) -> Hours {
    for path in KNOWN_HOURS_PATHS {
        let items = array_at(payload, &path);
        if looks_like_hours(items) {
            return hours_from_day_rows(items);
        }
    }

    if let Some(items) = find_weekday_rows(document, 0) {
        return hours_from_day_rows(items);
    }

    find_numeric_hours(document, 0).unwrap_or_default()
}

fn find_weekday_rows(node: &Value, depth: usize) -> Option<&[Value]> {
    if depth > NAME_SEARCH_DEPTH {
        return None;
    }
    let items = node.as_array()?;
    if items.is_empty() {
        return None;
    }

    if items.len() >= 2 && weekday_rows(items) >= MIN_WEEKDAYS {
        return Some(items);
    }

    items
        .iter()
        .filter(|item| item.is_array())
        .find_map(|item| find_weekday_rows(item, depth + 1))
}

/// Convert `[["Monday", ["9 AM-5 PM"]], ...]` rows. Times may also be a
/// single string at index 1 or slot arrays `[[text, ...], ...]` at index 3.
fn hours_from_day_rows(items: &[Value]) -> Hours {
    let mut hours = Hours::new();

    for row in items.iter().filter_map(Value::as_array) {
        if row.len() < 2 {
            continue;
        }
        let Some(raw_day) = row[0].as_str() else {
            continue;
        };
        let day = canonical_day(raw_day).unwrap_or(raw_day).to_string();

        let times: Vec<String> = match &row[1] {
            Value::Array(list) if !list.is_empty() => list
                .iter()
                .filter_map(Value::as_str)
                .filter(|t| !t.is_empty())
                .map(normalize_time_string)
                .collect(),
            Value::String(t) if !t.is_empty() => vec![normalize_time_string(t)],
            _ => row
                .get(3)
                .and_then(Value::as_array)
                .map(|slots| {
                    slots
                        .iter()
                        .map(|slot| get::<String>(slot, &[0]))
                        .filter(|t| !t.is_empty())
                        .map(|t| normalize_time_string(&t))
                        .collect()
                })
                .unwrap_or_default(),
        };

        if !times.is_empty() {
            hours.insert(day, times);
        }
    }

    hours
}

fn find_numeric_hours(node: &Value, depth: usize) -> Option<Hours> {
    if depth > NUMERIC_SEARCH_DEPTH {
        return None;
    }
    let items = node.as_array()?;
    if items.is_empty() {
        return None;
    }

    if items.len() >= MIN_WEEKDAYS {
        let mut found: BTreeMap<&'static str, Vec<(i64, i64)>> = BTreeMap::new();

        for pair in items.iter().filter_map(Value::as_array) {
            if pair.len() < 2 {
                continue;
            }
            let Some(day) = pair[0].as_f64().and_then(|d| day_from_number(d as i64)) else {
                continue;
            };
            let Some(raw_intervals) = pair[1].as_array() else {
                continue;
            };

            let intervals: Vec<(i64, i64)> = raw_intervals
                .iter()
                .filter_map(Value::as_array)
                .filter(|iv| iv.len() >= 2)
                .filter_map(|iv| Some((iv[0].as_f64()? as i64, iv[1].as_f64()? as i64)))
                .collect();

            if !intervals.is_empty() {
                found.insert(day, intervals);
            }
        }

        if found.len() >= MIN_WEEKDAYS {
            return Some(
                found
                    .into_iter()
                    .map(|(day, ivs)| {
                        let times = ivs.into_iter().map(|(a, b)| format_interval(a, b)).collect();
                        (day.to_string(), times)
                    })
                    .collect(),
            );
        }
    }

    items
        .iter()
        .filter(|item| item.is_array())
        .find_map(|item| find_numeric_hours(item, depth + 1))
}

/// Render an offset pair as `HH:MM-HH:MM`. Offsets above a day's worth of
/// minutes are taken as seconds.
pub fn format_interval(start: i64, end: i64) -> String {
    let (start, end) = if start > MINUTES_PER_DAY || end > MINUTES_PER_DAY {
        (start / 60, end / 60)
    } else {
        (start, end)
    };

    format!(
        "{:02}:{:02}-{:02}:{:02}",
        start / 60,
        start % 60,
        end / 60,
        end % 60
    )
}

/// Popular times live at `[84, 0]` as `[[day, [[hour, traffic, ...], ...]], ...]`.
/// Any malformed element discards the whole table.
pub fn extract_popular_times(payload: &Value) -> BTreeMap<String, BTreeMap<u32, i64>> {
    popular_times(array_at(payload, &[84, 0])).unwrap_or_default()
}

fn popular_times(items: &[Value]) -> Option<BTreeMap<String, BTreeMap<u32, i64>>> {
    let mut table = BTreeMap::new();

    for item in items {
        let item = item.as_array()?;
        let day = item.first().and_then(Value::as_f64).unwrap_or_default() as i64;

        let mut times = BTreeMap::new();
        for slot in item.get(1).and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]) {
            let slot = slot.as_array()?;
            let hour = slot.first()?.as_f64()?;
            let traffic = slot.get(1)?.as_f64()?;
            times.insert(hour as u32, traffic as i64);
        }

        if let Some(name) = day_from_number(day) {
            table.insert(name.to_string(), times);
        }
    }

    Some(table)
}
