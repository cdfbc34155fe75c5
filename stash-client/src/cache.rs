//! Cookie-to-node caches and the reconciliation algorithm: map an
//! application-chosen cookie to a remote entity, consulting the local cache
//! before asking the service.

use std::collections::HashMap;

use uuid::Uuid;

use crate::error::Error;
use crate::protocol::Candidate;
use crate::proxy::BusAddress;

/// A registered stream: its remote handle plus the cache of its objects.
#[derive(Debug)]
pub struct StreamNode {
    cookie: String,
    human_readable_name: String,
    address: BusAddress,
    pub(crate) objects: HashMap<String, ObjectNode>,
}

impl StreamNode {
    pub(crate) fn new(uuid: Uuid, cookie: &str, human_readable_name: &str) -> Self {
        Self {
            cookie: cookie.to_owned(),
            human_readable_name: human_readable_name.to_owned(),
            address: BusAddress::stream(uuid),
            objects: HashMap::new(),
        }
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn human_readable_name(&self) -> &str {
        &self.human_readable_name
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    /// The object cached under `cookie`, if it has been resolved.
    pub fn cached_object(&self, cookie: &str) -> Option<&ObjectNode> {
        self.objects.get(cookie)
    }

    pub fn cached_object_count(&self) -> usize {
        self.objects.len()
    }
}

/// A registered object within a stream. Objects never own a child cache;
/// the stream/object distinction is carried by the type, not a nilable
/// field.
#[derive(Debug)]
pub struct ObjectNode {
    cookie: String,
    human_readable_name: String,
    address: BusAddress,
}

impl ObjectNode {
    pub(crate) fn new(uuid: Uuid, cookie: &str, human_readable_name: &str) -> Self {
        Self {
            cookie: cookie.to_owned(),
            human_readable_name: human_readable_name.to_owned(),
            address: BusAddress::object(uuid),
        }
    }

    pub fn cookie(&self) -> &str {
        &self.cookie
    }

    pub fn human_readable_name(&self) -> &str {
        &self.human_readable_name
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }
}

/// Resolve `cookie` in `cache`: return the cached node, or reconcile the
/// service's lookup results. Exactly one candidate populates the cache and
/// is returned; zero candidates is NotFound (`Ok(None)`); two or more mean
/// the service holds ambiguous state for a cookie this design requires to
/// be unique, and the resolve fails without inserting anything.
pub(crate) fn resolve<'c, N>(
    cache: &'c mut HashMap<String, N>,
    what: &'static str,
    cookie: &str,
    lookup: impl FnOnce(&str) -> Result<Vec<Candidate>, Error>,
    build: impl FnOnce(&Candidate) -> N,
) -> Result<Option<&'c mut N>, Error> {
    if cache.contains_key(cookie) {
        return Ok(cache.get_mut(cookie));
    }

    let candidates = lookup(cookie)?;
    match candidates.as_slice() {
        [] => Ok(None),
        [one] => {
            tracing::debug!(what, cookie, uuid = %one.uuid, "cached remote entity");
            let node = build(one);
            Ok(Some(cache.entry(cookie.to_owned()).or_insert(node)))
        }
        many => Err(duplicate_error(what, cookie, many)),
    }
}

/// Several remote entities share one cookie. Do not guess which is ours:
/// abort, naming every candidate so an operator can remove the duplicates.
pub(crate) fn duplicate_error(what: &str, cookie: &str, candidates: &[Candidate]) -> Error {
    let names: Vec<String> = candidates
        .iter()
        .map(|c| format!("'{}'", c.human_readable_name))
        .collect();
    Error::AlreadyExists(format!(
        "multiple {what}s with cookie '{cookie}' exist ({}); aborting to avoid corruption",
        names.join(", ")
    ))
}
