//! In-memory ServiceBus double for the unit tests: records every call and
//! serves lookups from injected state, including deliberately corrupt state
//! such as duplicate cookies.

use std::cell::RefCell;
use std::collections::HashMap;

use uuid::Uuid;

use crate::error::Error;
use crate::protocol::{
    Candidate, DeletionResponse, ManagerRegistration, ObjectRegistration, ObjectStatusReport,
    ObjectUseReport, StreamRegistration, StreamStatusReport,
};
use crate::proxy::{BusAddress, ServiceBus};

/// One recorded call to the mock.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    LookupManager(String),
    CreateManager(String),
    Lookup(BusAddress, String),
    CreateStream(String),
    CreateObject(String),
    Unregister(BusAddress),
    StreamStatus(Uuid, StreamStatusReport),
    ObjectStatus(Uuid, ObjectStatusReport),
    ObjectUsed(Uuid, ObjectUseReport),
    AckDeletion(Uuid, DeletionResponse, u64),
}

#[derive(Default)]
struct State {
    managers: Vec<(String, Candidate)>,
    streams: HashMap<Uuid, Vec<(String, Candidate)>>,
    objects: HashMap<Uuid, Vec<(String, Candidate)>>,
    calls: Vec<Call>,
    fail_unregister: bool,
}

/// A ServiceBus backed by plain maps. Interior mutability keeps the trait's
/// `&self` receivers while tests also hold the client.
#[derive(Default)]
pub struct MockService {
    state: RefCell<State>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inject a pre-existing manager. Calling twice with the same service
    /// name models a corrupt service with duplicate registrations.
    pub fn add_manager(&self, service_name: &str, human_readable_name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.state.borrow_mut().managers.push((
            service_name.to_owned(),
            Candidate {
                uuid,
                human_readable_name: human_readable_name.to_owned(),
            },
        ));
        uuid
    }

    /// Inject a stream under a manager, bypassing the client.
    pub fn add_stream(&self, manager: Uuid, cookie: &str, human_readable_name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.state
            .borrow_mut()
            .streams
            .entry(manager)
            .or_default()
            .push((
                cookie.to_owned(),
                Candidate {
                    uuid,
                    human_readable_name: human_readable_name.to_owned(),
                },
            ));
        uuid
    }

    /// Inject an object under a stream, bypassing the client.
    pub fn add_object(&self, stream: Uuid, cookie: &str, human_readable_name: &str) -> Uuid {
        let uuid = Uuid::new_v4();
        self.state
            .borrow_mut()
            .objects
            .entry(stream)
            .or_default()
            .push((
                cookie.to_owned(),
                Candidate {
                    uuid,
                    human_readable_name: human_readable_name.to_owned(),
                },
            ));
        uuid
    }

    pub fn set_fail_unregister(&self, fail: bool) {
        self.state.borrow_mut().fail_unregister = fail;
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    /// Number of lookup-by-cookie calls issued so far.
    pub fn lookup_calls(&self) -> usize {
        self.state
            .borrow()
            .calls
            .iter()
            .filter(|call| matches!(call, Call::Lookup(..)))
            .count()
    }
}

impl ServiceBus for MockService {
    fn lookup_manager(&self, service_name: &str) -> Result<Vec<Candidate>, Error> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::LookupManager(service_name.to_owned()));
        Ok(state
            .managers
            .iter()
            .filter(|(name, _)| name == service_name)
            .map(|(_, c)| c.clone())
            .collect())
    }

    fn create_manager(&self, registration: &ManagerRegistration) -> Result<Uuid, Error> {
        let uuid = Uuid::new_v4();
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(Call::CreateManager(registration.service_name.clone()));
        state.managers.push((
            registration.service_name.clone(),
            Candidate {
                uuid,
                human_readable_name: registration.human_readable_name.clone(),
            },
        ));
        Ok(uuid)
    }

    fn lookup_by_cookie(&self, scope: BusAddress, cookie: &str) -> Result<Vec<Candidate>, Error> {
        let mut state = self.state.borrow_mut();
        state.calls.push(Call::Lookup(scope, cookie.to_owned()));
        let children = match scope.kind() {
            crate::proxy::EntityKind::Manager => state.streams.get(&scope.uuid()),
            crate::proxy::EntityKind::Stream => state.objects.get(&scope.uuid()),
            crate::proxy::EntityKind::Object => None,
        };
        Ok(children
            .into_iter()
            .flatten()
            .filter(|(c, _)| c == cookie)
            .map(|(_, candidate)| candidate.clone())
            .collect())
    }

    fn create_stream(
        &self,
        manager: BusAddress,
        registration: &StreamRegistration,
    ) -> Result<Uuid, Error> {
        let uuid = Uuid::new_v4();
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(Call::CreateStream(registration.cookie.clone()));
        state.streams.entry(manager.uuid()).or_default().push((
            registration.cookie.clone(),
            Candidate {
                uuid,
                human_readable_name: registration.human_readable_name.clone(),
            },
        ));
        Ok(uuid)
    }

    fn create_object(
        &self,
        stream: BusAddress,
        registration: &ObjectRegistration,
    ) -> Result<Uuid, Error> {
        let uuid = Uuid::new_v4();
        let mut state = self.state.borrow_mut();
        state
            .calls
            .push(Call::CreateObject(registration.cookie.clone()));
        state.objects.entry(stream.uuid()).or_default().push((
            registration.cookie.clone(),
            Candidate {
                uuid,
                human_readable_name: registration.human_readable_name.clone(),
            },
        ));
        Ok(uuid)
    }

    fn unregister(&self, target: BusAddress) -> Result<(), Error> {
        let mut state = self.state.borrow_mut();
        // Recorded before the failure check so tests can assert the remote
        // call was issued even when it fails.
        state.calls.push(Call::Unregister(target));
        if state.fail_unregister {
            return Err(Error::Remote("unregister refused".into()));
        }
        let uuid = target.uuid();
        state.managers.retain(|(_, c)| c.uuid != uuid);
        for children in state.streams.values_mut() {
            children.retain(|(_, c)| c.uuid != uuid);
        }
        for children in state.objects.values_mut() {
            children.retain(|(_, c)| c.uuid != uuid);
        }
        state.streams.remove(&uuid);
        state.objects.remove(&uuid);
        Ok(())
    }

    fn report_stream_status(
        &self,
        stream: BusAddress,
        report: &StreamStatusReport,
    ) -> Result<(), Error> {
        self.state
            .borrow_mut()
            .calls
            .push(Call::StreamStatus(stream.uuid(), report.clone()));
        Ok(())
    }

    fn report_object_status(
        &self,
        object: BusAddress,
        report: &ObjectStatusReport,
    ) -> Result<(), Error> {
        self.state
            .borrow_mut()
            .calls
            .push(Call::ObjectStatus(object.uuid(), report.clone()));
        Ok(())
    }

    fn report_object_used(
        &self,
        object: BusAddress,
        report: &ObjectUseReport,
    ) -> Result<(), Error> {
        self.state
            .borrow_mut()
            .calls
            .push(Call::ObjectUsed(object.uuid(), report.clone()));
        Ok(())
    }

    fn acknowledge_deletion(
        &self,
        object: BusAddress,
        response: DeletionResponse,
        arg: u64,
    ) -> Result<(), Error> {
        self.state
            .borrow_mut()
            .calls
            .push(Call::AckDeletion(object.uuid(), response, arg));
        Ok(())
    }
}
