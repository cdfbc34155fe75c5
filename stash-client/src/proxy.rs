//! Remote proxy seam: bus addresses derived from service-assigned UUIDs,
//! and the request/reply surface the stashd service exposes.

use uuid::Uuid;

use crate::error::Error;
use crate::protocol::{
    Candidate, DeletionResponse, ManagerRegistration, ObjectRegistration, ObjectStatusReport,
    ObjectUseReport, StreamRegistration, StreamStatusReport,
};

/// Which kind of remote entity an address points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Manager,
    Stream,
    Object,
}

impl EntityKind {
    fn segment(self) -> &'static str {
        match self {
            EntityKind::Manager => "manager",
            EntityKind::Stream => "stream",
            EntityKind::Object => "object",
        }
    }
}

/// Address of one remote entity: its kind plus the UUID the service minted
/// for it. The bus object path is derived, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BusAddress {
    kind: EntityKind,
    uuid: Uuid,
}

impl BusAddress {
    pub fn manager(uuid: Uuid) -> Self {
        Self {
            kind: EntityKind::Manager,
            uuid,
        }
    }

    pub fn stream(uuid: Uuid) -> Self {
        Self {
            kind: EntityKind::Stream,
            uuid,
        }
    }

    pub fn object(uuid: Uuid) -> Self {
        Self {
            kind: EntityKind::Object,
            uuid,
        }
    }

    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn uuid(&self) -> Uuid {
        self.uuid
    }

    /// Bus object path, e.g. "/net/stash/stream/<uuid>".
    pub fn path(&self) -> String {
        format!("/net/stash/{}/{}", self.kind.segment(), self.uuid)
    }
}

/// Blocking request/reply surface of the stashd service. Implementations own
/// the transport; every call returns the structured reply or a failure. The
/// library issues at most one call at a time.
pub trait ServiceBus {
    /// Managers registered under a bus service name.
    fn lookup_manager(&self, service_name: &str) -> Result<Vec<Candidate>, Error>;

    /// Register this application's manager; returns the minted UUID.
    fn create_manager(&self, registration: &ManagerRegistration) -> Result<Uuid, Error>;

    /// Entities directly under `scope` (streams of a manager, objects of a
    /// stream) carrying the given cookie.
    fn lookup_by_cookie(&self, scope: BusAddress, cookie: &str) -> Result<Vec<Candidate>, Error>;

    fn create_stream(
        &self,
        manager: BusAddress,
        registration: &StreamRegistration,
    ) -> Result<Uuid, Error>;

    fn create_object(
        &self,
        stream: BusAddress,
        registration: &ObjectRegistration,
    ) -> Result<Uuid, Error>;

    /// Remove the entity from the service. For streams this also removes
    /// its objects on the remote side.
    fn unregister(&self, target: BusAddress) -> Result<(), Error>;

    fn report_stream_status(
        &self,
        stream: BusAddress,
        report: &StreamStatusReport,
    ) -> Result<(), Error>;

    fn report_object_status(
        &self,
        object: BusAddress,
        report: &ObjectStatusReport,
    ) -> Result<(), Error>;

    fn report_object_used(&self, object: BusAddress, report: &ObjectUseReport)
        -> Result<(), Error>;

    /// Answer an earlier deletion request. `arg` is 0 for `Deleted`, the
    /// retry delay for `Refused`, and the new size for `Compressed`.
    fn acknowledge_deletion(
        &self,
        object: BusAddress,
        response: DeletionResponse,
        arg: u64,
    ) -> Result<(), Error>;
}
