//! StashClient: the manager session. Registration and teardown of streams
//! and objects, and the outbound status reports.

use std::collections::HashMap;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::cache::{self, ObjectNode, StreamNode};
use crate::error::Error;
use crate::protocol::{
    status, Candidate, DeletionPolicy, DeletionResponse, FileReport, ManagerRegistration,
    ObjectRegistration, ObjectStatusReport, ObjectUseReport, ObjectVersion, StreamRegistration,
    StreamStatusReport,
};
use crate::proxy::{BusAddress, ServiceBus};
use crate::upcall::UpcallTable;

/// Client session with the stashd service, acting as one manager. Holds the
/// manager's remote handle and the cookie caches; every operation takes
/// `&mut self`, so a host using OS threads must serialize access itself.
pub struct StashClient<B: ServiceBus> {
    bus: B,
    service_name: String,
    manager: BusAddress,
    pub(crate) streams: HashMap<String, StreamNode>,
    pub(crate) table: UpcallTable,
}

impl<B: ServiceBus> std::fmt::Debug for StashClient<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StashClient")
            .field("service_name", &self.service_name)
            .field("manager", &self.manager)
            .field("streams", &self.streams)
            .finish_non_exhaustive()
    }
}

/// Seconds since the epoch; used when a short-form report has to synthesize
/// a start time.
fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl<B: ServiceBus> StashClient<B> {
    /// Connect as the manager bound to `service_name`. If the service
    /// already knows a manager under that binding with the same display
    /// name, its handle is reused; a display-name mismatch or a duplicate
    /// binding is a conflict and aborts. Otherwise a new manager is
    /// registered.
    pub fn new(
        bus: B,
        human_readable_name: &str,
        service_name: &str,
        table: UpcallTable,
    ) -> Result<Self, Error> {
        let candidates = bus
            .lookup_manager(service_name)
            .map_err(|e| e.in_op("manager lookup"))?;

        let uuid = match candidates.as_slice() {
            [] => {
                let registration = ManagerRegistration {
                    human_readable_name: human_readable_name.to_owned(),
                    cookie: service_name.to_owned(),
                    service_name: service_name.to_owned(),
                };
                let uuid = bus
                    .create_manager(&registration)
                    .map_err(|e| e.in_op("manager register"))?;
                tracing::debug!(%uuid, service_name, "registered manager");
                uuid
            }
            [one] => {
                if one.human_readable_name != human_readable_name {
                    let err = Error::AlreadyExists(format!(
                        "a manager bound to '{service_name}' exists with a different name \
                         ('{}'); aborting to avoid corruption",
                        one.human_readable_name
                    ));
                    tracing::error!(error = %err, "manager reconciliation failed");
                    return Err(err);
                }
                one.uuid
            }
            many => {
                let err = cache::duplicate_error("manager", service_name, many);
                tracing::error!(error = %err, "manager reconciliation failed");
                return Err(err);
            }
        };

        Ok(Self {
            bus,
            service_name: service_name.to_owned(),
            manager: BusAddress::manager(uuid),
            streams: HashMap::new(),
            table,
        })
    }

    pub fn manager_address(&self) -> BusAddress {
        self.manager
    }

    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    /// The underlying bus, for hosts that also drive it directly.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// The stream cached under `cookie`, if it has been resolved.
    pub fn cached_stream(&self, cookie: &str) -> Option<&StreamNode> {
        self.streams.get(cookie)
    }

    pub fn cached_stream_count(&self) -> usize {
        self.streams.len()
    }

    fn resolve_stream<'a>(
        bus: &B,
        manager: BusAddress,
        streams: &'a mut HashMap<String, StreamNode>,
        cookie: &str,
    ) -> Result<Option<&'a mut StreamNode>, Error> {
        cache::resolve(
            streams,
            "stream",
            cookie,
            |c| {
                bus.lookup_by_cookie(manager, c)
                    .map_err(|e| e.in_op("stream lookup"))
            },
            |found: &Candidate| StreamNode::new(found.uuid, cookie, &found.human_readable_name),
        )
    }

    fn resolve_object<'a>(
        bus: &B,
        stream: BusAddress,
        objects: &'a mut HashMap<String, ObjectNode>,
        cookie: &str,
    ) -> Result<Option<&'a mut ObjectNode>, Error> {
        cache::resolve(
            objects,
            "object",
            cookie,
            |c| {
                bus.lookup_by_cookie(stream, c)
                    .map_err(|e| e.in_op("object lookup"))
            },
            |found: &Candidate| ObjectNode::new(found.uuid, cookie, &found.human_readable_name),
        )
    }

    /// Resolve a stream for a report; NotFound is a caller bug here.
    fn stream_address(&mut self, cookie: &str) -> Result<BusAddress, Error> {
        let Self {
            bus,
            manager,
            streams,
            ..
        } = self;
        Self::resolve_stream(bus, *manager, streams, cookie)?
            .map(|s| s.address())
            .ok_or_else(|| Error::NoSuchObject(format!("stream '{cookie}' is not registered")))
    }

    /// Resolve an object for a report; NotFound is a caller bug here.
    fn object_address(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
    ) -> Result<BusAddress, Error> {
        let Self {
            bus,
            manager,
            streams,
            ..
        } = self;
        let stream = Self::resolve_stream(bus, *manager, streams, stream_cookie)?.ok_or_else(
            || Error::NoSuchObject(format!("stream '{stream_cookie}' is not registered")),
        )?;
        let stream_addr = stream.address();
        Self::resolve_object(bus, stream_addr, &mut stream.objects, object_cookie)?
            .map(|o| o.address())
            .ok_or_else(|| {
                Error::NoSuchObject(format!(
                    "object '{object_cookie}' is not registered in stream '{stream_cookie}'"
                ))
            })
    }

    /// Register a new stream. The cookie must be unique within this
    /// manager: if the service already knows a stream under it, the
    /// registration fails and neither the cache nor the service changes.
    pub fn stream_register(
        &mut self,
        cookie: &str,
        human_readable_name: &str,
        freshness: u32,
    ) -> Result<(), Error> {
        let Self {
            bus,
            manager,
            streams,
            ..
        } = self;

        let existing = Self::resolve_stream(bus, *manager, streams, cookie)
            .map_err(|e| e.in_op("stream_register"))?
            .map(|s| s.human_readable_name().to_owned());
        if let Some(existing_name) = existing {
            return Err(Error::AlreadyExists(format!(
                "stream_register '{human_readable_name}': a stream ('{existing_name}') with \
                 cookie '{cookie}' already exists"
            )));
        }

        let registration = StreamRegistration {
            human_readable_name: human_readable_name.to_owned(),
            cookie: cookie.to_owned(),
            freshness,
        };
        let uuid = bus
            .create_stream(*manager, &registration)
            .map_err(|e| e.in_op("stream_register"))?;
        tracing::debug!(%uuid, cookie, "registered stream");
        streams.insert(
            cookie.to_owned(),
            StreamNode::new(uuid, cookie, human_readable_name),
        );
        Ok(())
    }

    /// Remove a stream from the service, then from the local cache. If the
    /// remote call fails the cache entry is kept, so the library never holds
    /// a cookie the service no longer knows the other way around.
    pub fn stream_unregister(&mut self, cookie: &str) -> Result<(), Error> {
        let address = self
            .stream_address(cookie)
            .map_err(|e| e.in_op("stream_unregister"))?;
        self.bus
            .unregister(address)
            .map_err(|e| e.in_op("stream_unregister"))?;
        self.streams.remove(cookie);
        Ok(())
    }

    /// Register a new object within a registered stream. The object cookie
    /// must be unique within that stream.
    pub fn object_register(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
        human_readable_name: &str,
        expected_size: i64,
        expected_transfer_up: u64,
        expected_transfer_down: u64,
        transfer_frequency: u32,
    ) -> Result<(), Error> {
        let Self {
            bus,
            manager,
            streams,
            ..
        } = self;

        let stream = Self::resolve_stream(bus, *manager, streams, stream_cookie)
            .map_err(|e| e.in_op("object_register"))?
            .ok_or_else(|| {
                Error::NoSuchObject(format!(
                    "object_register: stream '{stream_cookie}' is not registered"
                ))
            })?;
        let stream_addr = stream.address();

        let existing = Self::resolve_object(bus, stream_addr, &mut stream.objects, object_cookie)
            .map_err(|e| e.in_op("object_register"))?
            .map(|o| o.human_readable_name().to_owned());
        if let Some(existing_name) = existing {
            return Err(Error::AlreadyExists(format!(
                "object_register '{human_readable_name}': an object ('{existing_name}') with \
                 cookie '{object_cookie}' already exists in stream '{stream_cookie}'"
            )));
        }

        let registration = ObjectRegistration {
            human_readable_name: human_readable_name.to_owned(),
            cookie: object_cookie.to_owned(),
            wakeup: true,
            transfer_frequency,
            versions: vec![ObjectVersion {
                url: String::new(),
                expected_size,
                expected_transfer_up,
                expected_transfer_down,
                utility: 1,
                use_simple_transferer: false,
            }],
        };
        let uuid = bus
            .create_object(stream_addr, &registration)
            .map_err(|e| e.in_op("object_register"))?;
        tracing::debug!(%uuid, stream = stream_cookie, cookie = object_cookie, "registered object");
        stream.objects.insert(
            object_cookie.to_owned(),
            ObjectNode::new(uuid, object_cookie, human_readable_name),
        );
        Ok(())
    }

    /// Remove an object from the service, then from its stream's cache.
    /// Remote deregistration always happens first.
    pub fn object_unregister(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
    ) -> Result<(), Error> {
        let Self {
            bus,
            manager,
            streams,
            ..
        } = self;

        let stream = Self::resolve_stream(bus, *manager, streams, stream_cookie)
            .map_err(|e| e.in_op("object_unregister"))?
            .ok_or_else(|| {
                Error::NoSuchObject(format!(
                    "object_unregister: stream '{stream_cookie}' is not registered"
                ))
            })?;
        let stream_addr = stream.address();

        let address = Self::resolve_object(bus, stream_addr, &mut stream.objects, object_cookie)
            .map_err(|e| e.in_op("object_unregister"))?
            .map(|o| o.address())
            .ok_or_else(|| {
                Error::NoSuchObject(format!(
                    "object_unregister: object '{object_cookie}' is not registered in stream \
                     '{stream_cookie}'"
                ))
            })?;
        bus.unregister(address)
            .map_err(|e| e.in_op("object_unregister"))?;
        stream.objects.remove(object_cookie);
        Ok(())
    }

    /// Report a completed stream update, full form.
    #[allow(clippy::too_many_arguments)]
    pub fn stream_updated_full(
        &mut self,
        cookie: &str,
        indicator_mask: u32,
        transferred_up: u64,
        transferred_down: u64,
        start: u64,
        duration: u32,
        new_objects: u32,
        updated_objects: u32,
        objects_inline: u32,
    ) -> Result<(), Error> {
        let address = self
            .stream_address(cookie)
            .map_err(|e| e.in_op("stream_updated"))?;
        let report = StreamStatusReport {
            status: status::SUCCESS,
            indicator_mask,
            transferred_up,
            transferred_down,
            start,
            duration,
            new_objects,
            updated_objects,
            objects_inline,
        };
        self.bus
            .report_stream_status(address, &report)
            .map_err(|e| e.in_op("stream_updated"))
    }

    /// Report a completed stream update, short form: no indicators, all
    /// traffic counted as download, start derived from now minus duration.
    pub fn stream_updated(
        &mut self,
        cookie: &str,
        transferred: u64,
        duration: u32,
        new_objects: u32,
        updated_objects: u32,
        objects_inline: u32,
    ) -> Result<(), Error> {
        let start = unix_now().saturating_sub(u64::from(duration));
        self.stream_updated_full(
            cookie,
            0,
            0,
            transferred,
            start,
            duration,
            new_objects,
            updated_objects,
            objects_inline,
        )
    }

    /// Report a failed stream update. `reason` is one of the failure codes
    /// in `protocol::status`.
    pub fn stream_update_failed(
        &mut self,
        cookie: &str,
        reason: u32,
        transferred: u64,
    ) -> Result<(), Error> {
        let address = self
            .stream_address(cookie)
            .map_err(|e| e.in_op("stream_update_failed"))?;
        let report = StreamStatusReport {
            status: reason,
            indicator_mask: 0,
            transferred_up: 0,
            transferred_down: transferred,
            start: unix_now(),
            duration: 0,
            new_objects: 0,
            updated_objects: 0,
            objects_inline: 0,
        };
        self.bus
            .report_stream_status(address, &report)
            .map_err(|e| e.in_op("stream_update_failed"))
    }

    /// Report a completed object transfer, full form.
    #[allow(clippy::too_many_arguments)]
    pub fn object_transferred_full(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
        indicator_mask: u32,
        transferred_up: u64,
        transferred_down: u64,
        transfer_time: u64,
        duration: u32,
        object_size: u64,
        files: Vec<FileReport>,
    ) -> Result<(), Error> {
        let address = self
            .object_address(stream_cookie, object_cookie)
            .map_err(|e| e.in_op("object_transferred"))?;
        let report = ObjectStatusReport {
            status: status::SUCCESS,
            indicator_mask,
            transferred_up,
            transferred_down,
            transfer_time,
            duration,
            object_size,
            files,
        };
        self.bus
            .report_object_status(address, &report)
            .map_err(|e| e.in_op("object_transferred"))
    }

    /// Report a completed object transfer, short form: a single dedicated
    /// file, download volume equal to the object size, start derived from
    /// now minus duration.
    #[allow(clippy::too_many_arguments)]
    pub fn object_transferred(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
        indicator_mask: u32,
        object_size: u64,
        duration: u32,
        filename: &str,
        deletion_policy: DeletionPolicy,
    ) -> Result<(), Error> {
        let transfer_time = unix_now().saturating_sub(u64::from(duration));
        self.object_transferred_full(
            stream_cookie,
            object_cookie,
            indicator_mask,
            0,
            object_size,
            transfer_time,
            duration,
            object_size,
            vec![FileReport {
                filename: filename.to_owned(),
                dedicated: true,
                deletion_policy,
            }],
        )
    }

    /// Report a failed object transfer. `reason` is one of the failure
    /// codes in `protocol::status`.
    pub fn object_transfer_failed(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
        reason: u32,
        transferred: u64,
    ) -> Result<(), Error> {
        let address = self
            .object_address(stream_cookie, object_cookie)
            .map_err(|e| e.in_op("object_transfer_failed"))?;
        let report = ObjectStatusReport {
            status: reason,
            indicator_mask: 0,
            transferred_up: 0,
            transferred_down: transferred,
            transfer_time: unix_now(),
            duration: 0,
            object_size: 0,
            files: Vec::new(),
        };
        self.bus
            .report_object_status(address, &report)
            .map_err(|e| e.in_op("object_transfer_failed"))
    }

    /// Report that the user used an object, full form.
    pub fn object_used_full(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
        start: u64,
        end: u64,
        use_mask: u64,
    ) -> Result<(), Error> {
        let address = self
            .object_address(stream_cookie, object_cookie)
            .map_err(|e| e.in_op("object_used"))?;
        let report = ObjectUseReport {
            start,
            end,
            use_mask,
        };
        self.bus
            .report_object_used(address, &report)
            .map_err(|e| e.in_op("object_used"))
    }

    /// Report that the user just used all of an object.
    pub fn object_used(&mut self, stream_cookie: &str, object_cookie: &str) -> Result<(), Error> {
        let now = unix_now();
        self.object_used_full(stream_cookie, object_cookie, now, now, u64::MAX)
    }

    /// Answer an earlier deletion request for an object's files. Used both
    /// by the dispatcher (immediately after the delete handler returns) and
    /// by applications that deferred the decision.
    pub fn object_files_deleted(
        &mut self,
        stream_cookie: &str,
        object_cookie: &str,
        response: DeletionResponse,
        arg: u64,
    ) -> Result<(), Error> {
        let address = self
            .object_address(stream_cookie, object_cookie)
            .map_err(|e| e.in_op("object_files_deleted"))?;
        self.bus
            .acknowledge_deletion(address, response, arg)
            .map_err(|e| e.in_op("object_files_deleted"))
    }
}
