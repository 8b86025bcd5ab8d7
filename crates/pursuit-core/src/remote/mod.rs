//! Remote backend access: contract, mapping, retry and the sync client.

mod backend;
mod client;
mod connectivity;
mod mapper;
mod memory;
mod rest;
mod retry;

pub use backend::{RemoteBackend, RemoteQuery, RemoteResult, RemoteRow};
pub use client::{PullOptions, PushOutcome, RemoteSyncClient, DEFAULT_PAGE_SIZE, PULL_ALL_MAX_ROWS};
pub use connectivity::Connectivity;
pub use mapper::{RemoteRecord, RowMapper};
pub use memory::{BackendOp, MemoryBackend};
pub use rest::{classify_response, normalize_rest_url, RestBackend};
pub use retry::RetryPolicy;
