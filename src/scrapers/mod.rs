pub mod browser;
pub mod email;
pub mod place;
pub mod places_api;
pub mod reviews;
pub mod scroll;
pub mod search;
pub mod traits;

pub use browser::{ChromePage, ChromePageFactory};
pub use email::EmailJob;
pub use place::PlaceJob;
pub use places_api::PlacesClient;
pub use reviews::BrowserReviewPager;
pub use scroll::{scroll_feed, ScrollPacing, ScrollSummary};
pub use search::{Landing, SearchJob, SearchMode};
pub use traits::{
    CrawlContext, Deduper, ExitMonitor, Job, JobOptions, JobOutput, NavigateResponse, PageAutomation, PageFactory,
    ResultSink, ReviewPager,
};
