//! Graphrest core: serve a graph API from a plain REST backend
//!
//! Request batching, per-path memoization, and pagination translation:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                         GRAPHREST CORE                               │
//! ├──────────────────────────────────────────────────────────────────────┤
//! │                                                                      │
//! │   caller (path, args)                                                │
//! │        │                                                             │
//! │        ▼                                                             │
//! │  ┌────────────┐    ┌──────────────┐    ┌──────────────┐              │
//! │  │   Path     │───►│ Single-Key   │───►│              │              │
//! │  │  Builder   │    │   Loader     │    │  Transport   │──► REST      │
//! │  └────────────┘    └──────────────┘    │  (one call)  │              │
//! │                    ┌──────────────┐    │              │              │
//! │   keys ──────────► │ Keyed Bulk   │───►│              │              │
//! │                    │   Loader     │    └──────────────┘              │
//! │                    └──────────────┘                                  │
//! │        │                                                             │
//! │        ▼                                                             │
//! │  ┌────────────────────┐                                              │
//! │  │    Pagination      │──► Connection { edges, pageInfo, meta }      │
//! │  │    Translator      │                                              │
//! │  └────────────────────┘                                              │
//! │                                                                      │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Key Properties
//!
//! - **Canonical paths**: argument order never changes the cache key
//! - **Batch windows**: loads issued before the next yield share one flush
//! - **Failure isolation**: a failed key or chunk only fails its own callers
//! - **Forward-only**: connections page with `first`/`after`
//!
//! Loaders are explicit values scoped to one request; there is no global state.

pub mod bulk;
pub mod loader;
pub mod pagination;
pub mod path;
pub mod query;
pub mod resource;
pub mod transport;
pub mod window;

pub use bulk::{chunk_keys, BulkConfig, BulkLoader, BulkResult, ConfigError, DEFAULT_CHUNK_SIZE};
pub use loader::{LoadError, LoadResult, Loader, LoaderConfig, LoaderStats};
pub use pagination::{
    connection_from_array, connection_from_page, split_pagination_args, Connection, Edge,
    PageInfo, PageResult, PaginationArgs, PaginationError,
};
pub use path::{build_path, CanonicalPath};
pub use resource::{Resource, ResourceConfig, ResourceError};
pub use transport::{Method, MockTransport, RecordedCall, Transport, TransportError};
pub use window::{BatchSchedule, BatchWindow};
