//! Obtaining the datafile: HTTP fetch, durable cache and the loader that ties
//! them together.

pub mod fetch;
pub mod loader;
pub mod store;

pub use fetch::{parse_response, DatafileFetcher, DatafileSource, FetchResponse, HttpFetcher};
pub use loader::{fetch_and_cache, FetchDatafileLoader, RefreshSink};
pub use store::{Clock, DatafileCache, FileStore, KeyValueStore, MemoryStore, SystemClock};
