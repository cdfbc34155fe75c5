//! Records and constants shared with the stashd service: registration
//! attributes, status reports, and upcall frames. Encoding is bincode;
//! framing is length-prefix (see wire module).

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One entity descriptor returned by a lookup-by-cookie call: the UUID the
/// service minted for it plus its display name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub uuid: Uuid,
    pub human_readable_name: String,
}

/// Freshness hints for stream registration, in seconds. `NONE` leaves the
/// update schedule entirely to the service; `NEVER` means the stream is
/// never updated.
pub mod freshness {
    pub const NONE: u32 = 0;
    pub const HOURLY: u32 = 60 * 60;
    pub const EVERY_FEW_HOURS: u32 = 6 * 60 * 60;
    pub const DAILY: u32 = 24 * 60 * 60;
    pub const WEEKLY: u32 = 7 * 24 * 60 * 60;
    pub const MONTHLY: u32 = 30 * 24 * 60 * 60;
    pub const NEVER: u32 = u32::MAX;
}

/// Bits for the indicator mask of status reports: how the user was told
/// about an update.
pub mod indicator {
    pub const AUDIO: u32 = 0x1;
    pub const APPLICATION_VISUAL: u32 = 0x2;
    pub const DESKTOP_SMALL_VISUAL: u32 = 0x4;
    pub const DESKTOP_LARGE_VISUAL: u32 = 0x8;
    pub const EXTERNAL_VISUAL: u32 = 0x10;
    pub const VIBRATE: u32 = 0x20;
    pub const OBJECT_SPECIFIC: u32 = 0x40;
    pub const STREAM_WIDE: u32 = 0x80;
    pub const MANAGER_WIDE: u32 = 0x100;
    pub const UNKNOWN: u32 = 0x8000_0000;
}

/// Status codes for update and transfer reports. Values at or above
/// `FAILURE_TRANSIENT` are failures; the transient class may be retried.
pub mod status {
    pub const SUCCESS: u32 = 0;
    pub const FAILURE_TRANSIENT: u32 = 0x100;
    pub const TRANSIENT_NETWORK: u32 = 0x101;
    pub const TRANSIENT_INTERRUPTED: u32 = 0x102;
    pub const FAILURE: u32 = 0x200;
    pub const FAILURE_GONE: u32 = 0x201;
}

/// Quality levels a transfer upcall can request.
pub const QUALITY_LOWEST: u32 = 1;
pub const QUALITY_BEST: u32 = 5;

/// What the service may do with a file backing an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionPolicy {
    /// Never delete without asking.
    Precious,
    DeleteWithoutConsultation,
    DeleteWithConsultation,
}

/// The application's answer to a deletion request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeletionResponse {
    /// The files were deleted; argument is 0.
    Deleted,
    /// Not deleted; argument is the number of seconds to wait before asking
    /// again.
    Refused,
    /// Compressed instead; argument is the new size in bytes.
    Compressed,
}

/// Attributes sent when registering the manager itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManagerRegistration {
    pub human_readable_name: String,
    /// The manager's cookie is its bus service name.
    pub cookie: String,
    pub service_name: String,
}

/// Attributes sent when registering a stream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamRegistration {
    pub human_readable_name: String,
    pub cookie: String,
    /// Desired update interval in seconds (see the freshness constants).
    pub freshness: u32,
}

/// One transferable version of an object. The fields are hints the service
/// schedules around; this layer does not interpret them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectVersion {
    pub url: String,
    /// Expected size in bytes; -1 if unknown.
    pub expected_size: i64,
    pub expected_transfer_up: u64,
    pub expected_transfer_down: u64,
    pub utility: u32,
    pub use_simple_transferer: bool,
}

/// Attributes sent when registering an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRegistration {
    pub human_readable_name: String,
    pub cookie: String,
    /// Whether the service may wake the application to transfer this object.
    pub wakeup: bool,
    /// How often the object should be refreshed, in seconds; 0 for an
    /// immutable object that is transferred at most once.
    pub transfer_frequency: u32,
    pub versions: Vec<ObjectVersion>,
}

/// Outcome of a stream update, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamStatusReport {
    /// `status::SUCCESS`, or the failure code.
    pub status: u32,
    pub indicator_mask: u32,
    pub transferred_up: u64,
    pub transferred_down: u64,
    /// When the update started, in seconds since the epoch.
    pub start: u64,
    /// How long the update took, in seconds.
    pub duration: u32,
    pub new_objects: u32,
    pub updated_objects: u32,
    /// Objects delivered inline with the update itself; at most
    /// `new_objects + updated_objects`.
    pub objects_inline: u32,
}

/// One file written while transferring an object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub filename: String,
    /// Whether the file is used only by this object.
    pub dedicated: bool,
    pub deletion_policy: DeletionPolicy,
}

/// Outcome of an object transfer, successful or not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectStatusReport {
    pub status: u32,
    pub indicator_mask: u32,
    pub transferred_up: u64,
    pub transferred_down: u64,
    /// When the transfer started, in seconds since the epoch.
    pub transfer_time: u64,
    pub duration: u32,
    pub object_size: u64,
    pub files: Vec<FileReport>,
}

/// A use of an object by the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectUseReport {
    pub start: u64,
    pub end: u64,
    /// Bit N set means the Nth 1/64th of the object was used.
    pub use_mask: u64,
}

/// Remote-initiated requests as framed on the bus. Upcalls address nodes
/// the application already knows, so they carry cookies, not UUIDs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpcallMessage {
    /// Refresh a stream's contents.
    StreamUpdate {
        manager_cookie: String,
        stream_cookie: String,
    },
    /// Fetch one object at the requested quality (1..=5, 5 best).
    ObjectTransfer {
        manager_cookie: String,
        stream_cookie: String,
        object_cookie: String,
        target_quality: u32,
    },
    /// Delete or compress the files backing an object. Acknowledged through
    /// a separate deletion report, not through the frame reply.
    ObjectDeleteFiles {
        manager_cookie: String,
        stream_cookie: String,
        object_cookie: String,
        filenames: Vec<String>,
    },
}

/// Reply to an upcall frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum UpcallReply {
    /// The upcall was accepted; `retry_in` > 0 asks the service to ask
    /// again after that many seconds.
    Ack { retry_in: u32 },
    /// The upcall could not be handled.
    Failed { message: String },
}
