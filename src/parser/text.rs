use url::Url;

const SPACES: [char; 11] = [
    '\u{202F}', '\u{00A0}', '\u{2009}', '\u{200A}', '\u{2005}', '\u{2006}', '\u{2007}', '\u{2008}',
    '\u{2002}', '\u{2003}', '\u{2004}',
];
const ZERO_WIDTH: [char; 2] = ['\u{FEFF}', '\u{200B}'];
const DASHES: [char; 3] = ['\u{2013}', '\u{2014}', '\u{2212}'];

/// Replace exotic Unicode spaces and dashes with ASCII and collapse runs of
/// spaces, so hours like "9\u{202F}AM\u{2013}5\u{202F}PM" read "9 AM-5 PM".
pub fn normalize_time_string(s: &str) -> String {
    let mapped: String = s
        .chars()
        .filter(|c| !ZERO_WIDTH.contains(c))
        .map(|c| {
            if SPACES.contains(&c) {
                ' '
            } else if DASHES.contains(&c) {
                '-'
            } else {
                c
            }
        })
        .collect();

    let mut out = String::with_capacity(mapped.len());
    for c in mapped.trim().chars() {
        if c == ' ' && out.ends_with(' ') {
            continue;
        }
        out.push(c);
    }
    out
}

/// Unwrap redirect links of the form `/url?q=https://example.com/&...`
pub fn clean_website_url(raw: &str) -> String {
    if !raw.starts_with("/url?") {
        return raw.to_string();
    }

    let Ok(base) = Url::parse("https://www.google.com") else {
        return raw.to_string();
    };

    match base.join(raw) {
        Ok(parsed) => parsed
            .query_pairs()
            .find(|(k, v)| k == "q" && !v.is_empty())
            .map(|(_, v)| v.into_owned())
            .unwrap_or_else(|| raw.to_string()),
        Err(_) => raw.to_string(),
    }
}

/// Resolve backslash escapes (`\u003d`, `\/`, ...) left in raw string tokens.
/// Returns an empty string when the token is not a valid escaped string.
pub fn unescape_token(raw: &str) -> String {
    let quoted = format!("\"{}\"", raw.replace('"', "\\\""));
    serde_json::from_str::<String>(&quoted).unwrap_or_default()
}
