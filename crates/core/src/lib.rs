//! Core engine for torznest, a media-streaming gateway that aggregates
//! torznab indexers behind a single streaming-catalog interface.
//!
//! The crate has three load-bearing pieces:
//!
//! - [`searcher`] — the indexer fan-out engine: normalize a stream id,
//!   derive per-indexer query plans, execute them concurrently, complete
//!   partial results, post-filter by parsed title, and merge.
//! - [`worker`] — the periodic worker framework (heartbeat liveness,
//!   advisory locking, exclusive-run guards, dependency waits) and the
//!   torznab sync pipeline built on it.
//! - [`filter`] — the stream filter expression engine, with rank-based
//!   ordering for semantic fields ([`rank`]).
//!
//! Transport, UI, authentication, the torznab wire codec, and metadata
//! datasets are external collaborators consumed through traits; mocks for
//! all of them live in [`testing`].

pub mod cache;
pub mod config;
pub mod filter;
pub mod indexer;
pub mod metadata;
pub mod rank;
pub mod searcher;
pub mod store;
pub mod stream_id;
pub mod testing;
pub mod title;
pub mod torznab;
pub mod worker;

pub use config::{load_config_from_str, validate_config, Config, ConfigError, SanitizedConfig};
pub use filter::{compile as compile_filter, FilterError, FilterProgram, FilterRecord};
pub use searcher::{SearchError, SearchOutcome, SortSpec, StreamSearcher, WrappedStream};
pub use stream_id::{NormalizedStreamId, StreamIdError, StreamIdNormalizer};
pub use worker::{init_workers, SyncWorkerDeps, TorznabSyncer, WorkerQueue};
