//! # Quill MCP Session
//!
//! Session primitives for the tool-invocation transport:
//! - The [`ToolServer`] contract: one protocol-speaking server object,
//!   bound to a session or created fresh per request.
//! - The [`ServerFactory`] collaborator contract producing fresh boxed
//!   instances (the surrounding application owns the actual research
//!   tools behind it).
//! - [`InMemorySessionStore`]: the concurrency-safe session map with
//!   lifecycle tracking (`Open -> Idle -> Closed`) and maintenance sweeps.
//!
//! Persistence beyond in-memory state is out of scope; the store is an
//! explicit object constructed once at process start and injected where
//! needed, never an ambient singleton.

pub mod instance;
pub mod store;

pub use instance::{BoxError, ServerFactory, ToolServer};
pub use store::{
    InMemorySessionStore, SessionConfig, SessionError, SessionLookup, SessionRecord, SessionState,
};
