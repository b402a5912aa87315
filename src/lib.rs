pub mod config;
pub mod error;
pub mod geo;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod scrapers;

pub use config::ScoutConfig;
pub use error::{CrawlError, ParseError};
pub use models::{Listing, Seed};
