mod flow;
mod progress;
mod streams;

pub use flow::IbdFlow;
pub use streams::{HeadersChunk, HeadersChunkStream, PruningPointUtxosetChunkStream, TrustedEntryStream};

use kestrel_p2p_lib::DEFAULT_ROUTE_CAPACITY;

/// The number of items a peer sends before waiting for a request of the next batch. Kept below the route
/// capacity so that a full batch never blocks the receive loop of the router
pub const IBD_BATCH_SIZE: usize = 495;

const _: () = assert!(IBD_BATCH_SIZE < DEFAULT_ROUTE_CAPACITY);
