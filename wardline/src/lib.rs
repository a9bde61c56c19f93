//! # Wardline
//!
//! Ward operations backend: a natural-language query endpoint answered through
//! cache-aside reads, and a realtime alert stream fanned out to connected
//! staff.
//!
//! - [`router::QueryRouter`] classifies a query and dispatches it to the
//!   [`repository::CacheAsideRepository`]
//! - [`gateway::RealtimeGateway`] delivers bus events to client rooms
//! - [`context::AppContext`] owns the shared state built at startup
//!
//! ```no_run
//! use wardline::{AppConfig, AppContext, QueryContext};
//!
//! #[tokio::main]
//! async fn main() -> wardline::Result<()> {
//!     let ctx = AppContext::bootstrap(AppConfig::default()).await?;
//!     let outcome = ctx
//!         .router
//!         .route("Find diabetic patients in ICU", &QueryContext::for_subject("1"))
//!         .await?;
//!     println!("{} (cached: {})", outcome.agent.as_str(), outcome.cached);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod classifier;
pub mod config;
pub mod context;
pub mod error;
pub mod gateway;
pub mod model;
pub mod records;
pub mod repository;
pub mod router;

pub use api::ApiServer;
pub use classifier::{Action, Classifier, FallbackClassifier, KeywordClassifier, QueryIntentResult};
pub use config::AppConfig;
pub use context::AppContext;
pub use error::{Result, WardlineError};
pub use gateway::{ClientFrame, RealtimeGateway, ServerFrame};
pub use model::{AlertEvent, Notification, Severity};
pub use records::{Directory, InMemoryRecords, RecordSource, RecordsError};
pub use repository::CacheAsideRepository;
pub use router::{Agent, InteractionSink, MemorySink, QueryContext, QueryRouter, RouteOutcome};
