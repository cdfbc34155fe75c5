//! Upcall dispatch: route service-initiated requests to the application's
//! handlers and translate their return values into replies.

use crate::client::StashClient;
use crate::error::Error;
use crate::protocol::{
    DeletionResponse, UpcallMessage, UpcallReply, QUALITY_BEST, QUALITY_LOWEST,
};
use crate::proxy::ServiceBus;
use crate::wire::{decode_frame, encode_frame};

/// Handler for a stream update request. Returns the retry delay in seconds
/// (0 for none).
pub type StreamUpdateFn = Box<dyn FnMut(&str) -> u32>;

/// Handler for an object transfer request: stream cookie, object cookie,
/// target quality. Returns the retry delay in seconds (0 for none).
pub type ObjectTransferFn = Box<dyn FnMut(&str, &str, u32) -> u32>;

/// Handler for a files-deletion request: stream cookie, object cookie,
/// filenames. The return value encodes the verdict: 0 means the files were
/// deleted, a positive value asks to be consulted again after that many
/// seconds, and a negative value means the files were compressed to that
/// many bytes.
pub type ObjectDeleteFn = Box<dyn FnMut(&str, &str, &[String]) -> i64>;

/// The application's upcall handlers. Any handler may be absent; an upcall
/// for an absent handler is answered with a failure reply, never with a
/// fabricated success.
#[derive(Default)]
pub struct UpcallTable {
    pub(crate) stream_update: Option<StreamUpdateFn>,
    pub(crate) object_transfer: Option<ObjectTransferFn>,
    pub(crate) object_delete: Option<ObjectDeleteFn>,
}

impl UpcallTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on_stream_update(mut self, f: impl FnMut(&str) -> u32 + 'static) -> Self {
        self.stream_update = Some(Box::new(f));
        self
    }

    pub fn on_object_transfer(mut self, f: impl FnMut(&str, &str, u32) -> u32 + 'static) -> Self {
        self.object_transfer = Some(Box::new(f));
        self
    }

    pub fn on_object_delete(mut self, f: impl FnMut(&str, &str, &[String]) -> i64 + 'static) -> Self {
        self.object_delete = Some(Box::new(f));
        self
    }
}

impl std::fmt::Debug for UpcallTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpcallTable")
            .field("stream_update", &self.stream_update.is_some())
            .field("object_transfer", &self.object_transfer.is_some())
            .field("object_delete", &self.object_delete.is_some())
            .finish()
    }
}

impl<B: ServiceBus> StashClient<B> {
    /// Dispatch one decoded upcall to the matching handler. Cookies are
    /// validated against this client's caches before any handler runs, so a
    /// misrouted or stale upcall fails instead of reaching the application.
    /// Returns the handler's retry delay in seconds.
    ///
    /// A deletion upcall additionally sends exactly one deletion
    /// acknowledgement, derived from the handler's verdict, before
    /// returning.
    pub fn dispatch(&mut self, upcall: UpcallMessage) -> Result<u32, Error> {
        match upcall {
            UpcallMessage::StreamUpdate {
                manager_cookie,
                stream_cookie,
            } => {
                self.check_manager(&manager_cookie)?;
                self.check_stream(&stream_cookie)?;
                let handler = self
                    .table
                    .stream_update
                    .as_mut()
                    .ok_or_else(|| not_implemented("stream update"))?;
                Ok(handler(&stream_cookie))
            }
            UpcallMessage::ObjectTransfer {
                manager_cookie,
                stream_cookie,
                object_cookie,
                target_quality,
            } => {
                self.check_manager(&manager_cookie)?;
                self.check_object(&stream_cookie, &object_cookie)?;
                if !(QUALITY_LOWEST..=QUALITY_BEST).contains(&target_quality) {
                    return Err(Error::InvalidArgs(format!(
                        "target quality {target_quality} outside \
                         {QUALITY_LOWEST}..={QUALITY_BEST}"
                    )));
                }
                let handler = self
                    .table
                    .object_transfer
                    .as_mut()
                    .ok_or_else(|| not_implemented("object transfer"))?;
                Ok(handler(&stream_cookie, &object_cookie, target_quality))
            }
            UpcallMessage::ObjectDeleteFiles {
                manager_cookie,
                stream_cookie,
                object_cookie,
                filenames,
            } => {
                self.check_manager(&manager_cookie)?;
                self.check_object(&stream_cookie, &object_cookie)?;
                let handler = self
                    .table
                    .object_delete
                    .as_mut()
                    .ok_or_else(|| not_implemented("object files deletion"))?;
                let verdict = handler(&stream_cookie, &object_cookie, &filenames);
                let (response, arg) = match verdict {
                    0 => (DeletionResponse::Deleted, 0),
                    n if n > 0 => (DeletionResponse::Refused, n as u64),
                    n => (DeletionResponse::Compressed, n.unsigned_abs()),
                };
                self.object_files_deleted(&stream_cookie, &object_cookie, response, arg)?;
                Ok(0)
            }
        }
    }

    /// Decode one upcall frame, dispatch it, and encode the reply. Returns
    /// the reply frame and the number of input bytes consumed. `bytes` must
    /// hold at least one complete frame. Handler failures become a `Failed`
    /// reply, not an error; only decode and encode problems error out.
    pub fn handle_frame(&mut self, bytes: &[u8]) -> Result<(Vec<u8>, usize), Error> {
        let (upcall, consumed): (UpcallMessage, usize) = decode_frame(bytes)
            .map_err(|e| Error::InvalidArgs(format!("bad upcall frame: {e}")))?;
        let reply = match self.dispatch(upcall) {
            Ok(retry_in) => UpcallReply::Ack { retry_in },
            Err(e) => {
                tracing::error!(error = %e, "upcall failed");
                UpcallReply::Failed {
                    message: e.to_string(),
                }
            }
        };
        let frame = encode_frame(&reply)
            .map_err(|e| Error::Internal(format!("cannot encode reply: {e}")))?;
        Ok((frame, consumed))
    }

    fn check_manager(&self, manager_cookie: &str) -> Result<(), Error> {
        if manager_cookie != self.service_name() {
            return Err(Error::NoSuchObject(format!(
                "upcall for manager '{manager_cookie}', but this client is '{}'",
                self.service_name()
            )));
        }
        Ok(())
    }

    fn check_stream(&self, stream_cookie: &str) -> Result<(), Error> {
        if self.cached_stream(stream_cookie).is_none() {
            return Err(Error::NoSuchObject(format!(
                "upcall for unknown stream '{stream_cookie}'"
            )));
        }
        Ok(())
    }

    fn check_object(&self, stream_cookie: &str, object_cookie: &str) -> Result<(), Error> {
        let stream = self.cached_stream(stream_cookie).ok_or_else(|| {
            Error::NoSuchObject(format!("upcall for unknown stream '{stream_cookie}'"))
        })?;
        if stream.cached_object(object_cookie).is_none() {
            return Err(Error::NoSuchObject(format!(
                "upcall for unknown object '{object_cookie}' in stream '{stream_cookie}'"
            )));
        }
        Ok(())
    }
}

fn not_implemented(what: &str) -> Error {
    Error::NotImplemented(format!("no {what} handler registered"))
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;
    use crate::protocol::DeletionResponse;
    use crate::test_support::{Call, MockService};

    const SERVICE: &str = "org.example.reader";

    fn client_with(table: UpcallTable) -> StashClient<MockService> {
        let mut c = StashClient::new(MockService::new(), "Example Reader", SERVICE, table)
            .expect("fresh service accepts the manager");
        c.stream_register("feed-1", "Feed 1", 0).unwrap();
        c.object_register("feed-1", "item-1", "Item 1", -1, 0, 0, 0)
            .unwrap();
        c
    }

    fn delete_upcall() -> UpcallMessage {
        UpcallMessage::ObjectDeleteFiles {
            manager_cookie: SERVICE.into(),
            stream_cookie: "feed-1".into(),
            object_cookie: "item-1".into(),
            filenames: vec!["/tmp/item-1".into()],
        }
    }

    fn ack_calls(c: &StashClient<MockService>) -> Vec<(DeletionResponse, u64)> {
        c.bus()
            .calls()
            .iter()
            .filter_map(|call| match call {
                Call::AckDeletion(_, response, arg) => Some((*response, *arg)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn deletion_verdicts_map_to_acknowledgements() {
        let verdict = Rc::new(Cell::new(0i64));
        let v = verdict.clone();
        let table = UpcallTable::new().on_object_delete(move |_, _, _| v.get());
        let mut c = client_with(table);

        for (ret, expected) in [
            (0i64, (DeletionResponse::Deleted, 0u64)),
            (5, (DeletionResponse::Refused, 5)),
            (-200, (DeletionResponse::Compressed, 200)),
        ] {
            verdict.set(ret);
            let before = ack_calls(&c).len();
            let retry = c.dispatch(delete_upcall()).unwrap();
            assert_eq!(retry, 0);
            let acks = ack_calls(&c);
            assert_eq!(acks.len(), before + 1, "exactly one acknowledgement");
            assert_eq!(acks[before], expected);
        }
    }

    #[test]
    fn missing_handler_fails_without_acknowledgement() {
        let mut c = client_with(UpcallTable::new());
        let err = c.dispatch(delete_upcall()).unwrap_err();
        assert!(matches!(err, Error::NotImplemented(_)));
        assert!(ack_calls(&c).is_empty());
    }

    #[test]
    fn unknown_stream_is_rejected_before_the_handler() {
        let table = UpcallTable::new().on_stream_update(|_| panic!("must not run"));
        let mut c = client_with(table);
        let err = c
            .dispatch(UpcallMessage::StreamUpdate {
                manager_cookie: SERVICE.into(),
                stream_cookie: "other-feed".into(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchObject(_)));
    }

    #[test]
    fn foreign_manager_cookie_is_rejected() {
        let table = UpcallTable::new().on_stream_update(|_| panic!("must not run"));
        let mut c = client_with(table);
        let err = c
            .dispatch(UpcallMessage::StreamUpdate {
                manager_cookie: "org.example.other".into(),
                stream_cookie: "feed-1".into(),
            })
            .unwrap_err();
        assert!(matches!(err, Error::NoSuchObject(_)));
    }

    #[test]
    fn retry_delay_passes_through() {
        let table = UpcallTable::new().on_stream_update(|cookie| {
            assert_eq!(cookie, "feed-1");
            300
        });
        let mut c = client_with(table);
        let retry = c
            .dispatch(UpcallMessage::StreamUpdate {
                manager_cookie: SERVICE.into(),
                stream_cookie: "feed-1".into(),
            })
            .unwrap();
        assert_eq!(retry, 300);
    }

    #[test]
    fn quality_out_of_range_is_invalid() {
        let table = UpcallTable::new().on_object_transfer(|_, _, _| panic!("must not run"));
        let mut c = client_with(table);
        let err = c
            .dispatch(UpcallMessage::ObjectTransfer {
                manager_cookie: SERVICE.into(),
                stream_cookie: "feed-1".into(),
                object_cookie: "item-1".into(),
                target_quality: 9,
            })
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
    }

    #[test]
    fn handle_frame_roundtrip() {
        let table = UpcallTable::new().on_object_transfer(|stream, object, quality| {
            assert_eq!(stream, "feed-1");
            assert_eq!(object, "item-1");
            assert_eq!(quality, 3);
            0
        });
        let mut c = client_with(table);
        let frame = encode_frame(&UpcallMessage::ObjectTransfer {
            manager_cookie: SERVICE.into(),
            stream_cookie: "feed-1".into(),
            object_cookie: "item-1".into(),
            target_quality: 3,
        })
        .unwrap();
        let (reply_frame, consumed) = c.handle_frame(&frame).unwrap();
        assert_eq!(consumed, frame.len());
        let (reply, _): (UpcallReply, usize) = decode_frame(&reply_frame).unwrap();
        assert_eq!(reply, UpcallReply::Ack { retry_in: 0 });
    }

    #[test]
    fn handle_frame_turns_dispatch_errors_into_failed_replies() {
        let mut c = client_with(UpcallTable::new());
        let frame = encode_frame(&UpcallMessage::StreamUpdate {
            manager_cookie: SERVICE.into(),
            stream_cookie: "feed-1".into(),
        })
        .unwrap();
        let (reply_frame, _) = c.handle_frame(&frame).unwrap();
        let (reply, _): (UpcallReply, usize) = decode_frame(&reply_frame).unwrap();
        match reply {
            UpcallReply::Failed { message } => {
                assert!(message.contains("no stream update handler"), "{message}")
            }
            other => panic!("expected Failed, got {other:?}"),
        }
    }

    #[test]
    fn handle_frame_rejects_garbage() {
        let mut c = client_with(UpcallTable::new());
        let err = c.handle_frame(&[1, 2]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgs(_)));
    }
}
