pub mod dedup;
pub mod exiter;
pub mod orchestrator;
pub mod scheduler;
pub mod sink;

pub use dedup::MemoryDeduper;
pub use exiter::{CountingExitMonitor, ProgressSnapshot};
pub use orchestrator::{Orchestrator, RunReport};
pub use scheduler::{effective_inactivity, RunStats, Scheduler};
pub use sink::{MemorySink, SeedCollector};
