pub mod channel;
pub mod command;
pub mod config;
pub mod fallback;
pub mod logging;
pub mod server;
pub mod sync;

pub use channel::{ChannelError, ChannelKind, ChannelSet, DispatchEnvelope, TransportChannel};
pub use fallback::{FallbackError, FallbackStore, SqliteFallback};
pub use logging::{LogLevel, SyncLogger};
pub use sync::{ChannelOutcome, ProcessOutcome, ProcessResult, SyncService};
