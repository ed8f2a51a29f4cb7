//! Barrier-trigger engine: ingestion, matching and execution
pub mod coordinator;
pub mod engine;
pub mod ingestor;
pub mod matcher;

pub use coordinator::{ExecutionCoordinator, ExecutionReport};
pub use engine::{Engine, EngineSettings, EngineStatus, TickContext, TickSummary};
pub use ingestor::{IngestBatch, InstrumentIngestor, ListingBatch, PriceIngestor};
pub use matcher::{find_crossing, ScanResult, TriggerMatcher};
