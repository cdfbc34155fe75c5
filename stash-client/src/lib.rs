//! Client library for the stashd transfer scheduler.
//! Host-driven: no I/O of its own; the host owns the bus connection and
//! feeds upcall frames in, the library issues calls through the ServiceBus
//! seam.

pub mod cache;
pub mod client;
pub mod error;
pub mod protocol;
pub mod proxy;
pub mod upcall;
pub mod wire;

#[cfg(test)]
mod test_support;

pub use cache::{ObjectNode, StreamNode};
pub use client::StashClient;
pub use error::Error;
pub use protocol::{
    freshness, indicator, status, Candidate, DeletionPolicy, DeletionResponse, FileReport,
    ManagerRegistration, ObjectRegistration, ObjectStatusReport, ObjectUseReport, ObjectVersion,
    StreamRegistration, StreamStatusReport, UpcallMessage, UpcallReply, QUALITY_BEST,
    QUALITY_LOWEST,
};
pub use proxy::{BusAddress, EntityKind, ServiceBus};
pub use upcall::UpcallTable;
pub use wire::{decode_frame, encode_frame, FrameDecodeError, FrameEncodeError};
