//! Run configuration.
//!
//! Loaded from a TOML file (path in `SCOUT_CONFIG`, default `scout.toml`),
//! then overridden field by field from environment variables. A missing
//! file means defaults.

use crate::geo::Point;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_CONFIG_PATH: &str = "scout.toml";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScoutConfig {
    /// Search queries, also used as categories for proximity and API phases
    pub queries: Vec<String>,
    pub latitude: f64,
    pub longitude: f64,
    pub zoom: u8,
    pub radius_meters: f64,
    pub lang: String,
    /// Scroll iterations per search
    pub max_depth: u32,
    pub concurrency: usize,
    pub extract_email: bool,
    pub extra_reviews: bool,
    /// Enables the structured-search phase and place id lookups
    pub api_key: Option<String>,
    pub exit_on_inactivity_secs: Option<u64>,
    pub max_runtime_secs: Option<u64>,
    pub headless: bool,
    pub output: PathBuf,
}

impl Default for ScoutConfig {
    fn default() -> Self {
        Self {
            queries: Vec::new(),
            latitude: 0.0,
            longitude: 0.0,
            zoom: 15,
            radius_meters: 10_000.0,
            lang: "en".to_string(),
            max_depth: 10,
            concurrency: 2,
            extract_email: false,
            extra_reviews: false,
            api_key: None,
            exit_on_inactivity_secs: None,
            max_runtime_secs: None,
            headless: true,
            output: PathBuf::from("listings.json"),
        }
    }
}

impl ScoutConfig {
    /// Read `path`; defaults when it does not exist
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config = toml::from_str(&contents)
            .with_context(|| format!("invalid config file {}", path.display()))?;
        debug!("loaded config from {}", path.display());
        Ok(config)
    }

    /// File from `SCOUT_CONFIG` plus environment overrides, validated
    pub fn load() -> Result<Self> {
        let path = std::env::var("SCOUT_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut config = Self::from_file(Path::new(&path))?;
        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Override fields from `lookup`. Unparseable values are errors rather
    /// than silently ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("SCOUT_QUERIES") {
            self.queries = val
                .split(',')
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(val) = lookup("SCOUT_GEO") {
            let (lat, lon) = val
                .split_once(',')
                .with_context(|| format!("SCOUT_GEO must be 'lat,lon', got '{val}'"))?;
            self.latitude = parse_var("SCOUT_GEO", lat.trim())?;
            self.longitude = parse_var("SCOUT_GEO", lon.trim())?;
        }

        if let Some(val) = lookup("SCOUT_ZOOM") {
            self.zoom = parse_var("SCOUT_ZOOM", &val)?;
        }
        if let Some(val) = lookup("SCOUT_RADIUS") {
            self.radius_meters = parse_var("SCOUT_RADIUS", &val)?;
        }
        if let Some(val) = lookup("SCOUT_LANG") {
            self.lang = val;
        }
        if let Some(val) = lookup("SCOUT_DEPTH") {
            self.max_depth = parse_var("SCOUT_DEPTH", &val)?;
        }
        if let Some(val) = lookup("SCOUT_CONCURRENCY") {
            self.concurrency = parse_var("SCOUT_CONCURRENCY", &val)?;
        }
        if let Some(val) = lookup("SCOUT_EMAIL") {
            self.extract_email = parse_var("SCOUT_EMAIL", &val)?;
        }
        if let Some(val) = lookup("SCOUT_EXTRA_REVIEWS") {
            self.extra_reviews = parse_var("SCOUT_EXTRA_REVIEWS", &val)?;
        }
        if let Some(val) = lookup("GOOGLE_MAPS_API_KEY").filter(|v| !v.trim().is_empty()) {
            self.api_key = Some(val.trim().to_string());
        }
        if let Some(val) = lookup("SCOUT_EXIT_ON_INACTIVITY") {
            self.exit_on_inactivity_secs = Some(parse_var("SCOUT_EXIT_ON_INACTIVITY", &val)?);
        }
        if let Some(val) = lookup("SCOUT_MAX_RUNTIME") {
            self.max_runtime_secs = Some(parse_var("SCOUT_MAX_RUNTIME", &val)?);
        }
        if let Some(val) = lookup("SCOUT_HEADLESS") {
            self.headless = parse_var("SCOUT_HEADLESS", &val)?;
        }
        if let Some(val) = lookup("SCOUT_OUTPUT") {
            self.output = PathBuf::from(val);
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.queries.is_empty() {
            bail!("at least one query is required");
        }
        if !(1..=21).contains(&self.zoom) {
            bail!("zoom must be between 1 and 21, got {}", self.zoom);
        }
        if self.radius_meters < 0.0 {
            bail!("radius must not be negative, got {}", self.radius_meters);
        }
        if !(-90.0..=90.0).contains(&self.latitude) {
            bail!("latitude must be within ±90, got {}", self.latitude);
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            bail!("longitude must be within ±180, got {}", self.longitude);
        }
        if self.max_depth == 0 {
            bail!("max_depth must be at least 1");
        }
        if self.concurrency == 0 {
            bail!("concurrency must be at least 1");
        }
        Ok(())
    }

    pub fn center(&self) -> Point {
        Point::new(self.latitude, self.longitude)
    }

    pub fn inactivity(&self) -> Option<Duration> {
        self.exit_on_inactivity_secs.map(Duration::from_secs)
    }

    pub fn max_runtime(&self) -> Option<Duration> {
        self.max_runtime_secs.map(Duration::from_secs)
    }
}

fn parse_var<T>(name: &str, value: &str) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .trim()
        .parse()
        .with_context(|| format!("invalid value for {name}: '{value}'"))
}
