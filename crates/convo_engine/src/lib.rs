//! Conversation sync engine: wire shapes, page fetching and the runtime that
//! executes core effects against the remote job service.
mod client;
mod fetch;
mod transport;
mod types;
pub mod wire;

pub use client::{PreviewReleaser, RemovePreviewFiles, Subscription, SyncClient};
pub use fetch::{normalize_message, normalize_page, LocalIdentity, PageFetcher};
pub use transport::{ReqwestTransport, Transport, TransportSettings};
pub use types::{SessionError, TransportError, TransportFailureKind};
