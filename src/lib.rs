//! Chat backend for Qala Non-Governmental Institute.
//!
//! Questions the built-in knowledge base can answer are streamed back from
//! it directly; everything else goes through the throttled, pooled
//! upstream client. Either way the answer reaches the browser as SSE
//! `data:` frames ending in `[DONE]`.

pub mod app;
pub mod cli;
pub mod client;
pub mod config;
pub mod delivery;
pub mod error;
pub mod knowledge;
pub mod parser;
pub mod pool;
pub mod providers;
pub mod store;
pub mod throttle;
pub mod web;

pub use app::AppState;
pub use client::{ChatOptions, ChatStream, CohereClient, StreamEvent};
pub use config::Config;
pub use error::{ChatError, Result};
pub use knowledge::{KnowledgeBase, KnowledgeEntry, RefreshMode};
pub use parser::{try_parse, ParsedLine};
pub use pool::ConnectionPool;
pub use throttle::{RequestClass, Throttler, TokenBucket};
