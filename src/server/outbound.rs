use std::fmt;
use std::io::{self, Write};
use std::mem;
use std::sync::{Arc, Mutex};

use mio::{Registry, Waker};

use super::registry::{
    Channel, ChannelHandle, ChannelRegistry, ConnectionId, InterestMode, PendingWrite,
};
use super::ConnectionFault;

#[derive(Debug)]
pub enum OutboundError {
    ChannelClosed { connection_id: ConnectionId },
    Wake(io::Error),
}

impl fmt::Display for OutboundError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ChannelClosed { connection_id } => {
                write!(f, "connection {connection_id} closed before its response was queued")
            }
            Self::Wake(source) => write!(f, "failed to wake the reactor: {source}"),
        }
    }
}

impl std::error::Error for OutboundError {}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DrainOutcome {
    Drained,
    Saturated,
}

/// The single place where outbound queues and poll interest change.
///
/// Workers call [`submit`](Self::submit) from any thread. The reactor calls
/// [`apply_pending`](Self::apply_pending), [`drain`](Self::drain) and
/// [`close`](Self::close). Lock order is outbox first, then the pending list.
pub struct OutboundQueueManager {
    waker: Arc<Waker>,
    pending: Mutex<Vec<ConnectionId>>,
}

impl OutboundQueueManager {
    pub fn new(waker: Arc<Waker>) -> Self {
        Self {
            waker,
            pending: Mutex::new(Vec::new()),
        }
    }

    pub fn submit(&self, channel: &ChannelHandle, bytes: Vec<u8>) -> Result<(), OutboundError> {
        {
            let mut state = channel.lock();
            if state.closed {
                return Err(OutboundError::ChannelClosed {
                    connection_id: channel.id(),
                });
            }
            state.buffers.push_back(PendingWrite { bytes, cursor: 0 });
            state.interest = InterestMode::ReadWrite;
            if !state.change_pending {
                state.change_pending = true;
                self.pending
                    .lock()
                    .expect("pending interest changes lock poisoned")
                    .push(channel.id());
            }
        }
        self.waker.wake().map_err(OutboundError::Wake)
    }

    pub fn pending_changes(&self) -> usize {
        self.pending
            .lock()
            .expect("pending interest changes lock poisoned")
            .len()
    }

    pub fn apply_pending(
        &self,
        registry: &Registry,
        channels: &mut ChannelRegistry,
    ) -> Vec<(ConnectionId, ConnectionFault)> {
        let pending = mem::take(
            &mut *self
                .pending
                .lock()
                .expect("pending interest changes lock poisoned"),
        );

        let mut faults = Vec::new();
        for id in pending {
            let Some(channel) = channels.get_mut(id) else {
                continue;
            };
            let token = channel.token();
            let mut state = channel.outbox.lock();
            state.change_pending = false;
            let wanted = state.interest;
            if channel.registered == wanted {
                continue;
            }
            match registry.reregister(&mut channel.stream, token, wanted.interest()) {
                Ok(()) => channel.registered = wanted,
                Err(source) => faults.push((id, ConnectionFault::Registration(source))),
            }
        }
        faults
    }

    pub fn drain(
        &self,
        registry: &Registry,
        channel: &mut Channel,
    ) -> Result<DrainOutcome, ConnectionFault> {
        let token = channel.token();
        let mut state = channel.outbox.lock();

        while let Some(head) = state.buffers.front_mut() {
            if head.is_complete() {
                state.buffers.pop_front();
                continue;
            }
            match channel.stream.write(head.remaining()) {
                Ok(0) => {
                    return Err(ConnectionFault::Write(io::Error::from(
                        io::ErrorKind::WriteZero,
                    )))
                }
                Ok(written) => head.cursor += written,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(DrainOutcome::Saturated)
                }
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => return Err(ConnectionFault::Write(error)),
            }
        }

        state.interest = InterestMode::ReadOnly;
        if channel.registered != InterestMode::ReadOnly {
            registry
                .reregister(&mut channel.stream, token, InterestMode::ReadOnly.interest())
                .map_err(ConnectionFault::Registration)?;
            channel.registered = InterestMode::ReadOnly;
        }
        Ok(DrainOutcome::Drained)
    }

    pub fn close(&self, registry: &Registry, mut channel: Channel) -> usize {
        let discarded = {
            let mut state = channel.outbox.lock();
            state.closed = true;
            state.interest = InterestMode::ReadOnly;
            let discarded = state.buffers.len();
            state.buffers.clear();
            discarded
        };
        let _ = registry.deregister(&mut channel.stream);
        discarded
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use mio::{Interest, Poll, Token, Waker};

    use crate::server::registry::tests::socket_pair;
    use crate::server::registry::{ChannelRegistry, InterestMode, WAKER_TOKEN};
    use crate::wire::frame::FramingMode;

    use super::{DrainOutcome, OutboundError, OutboundQueueManager};

    struct Harness {
        poll: Poll,
        manager: Arc<OutboundQueueManager>,
        channels: ChannelRegistry,
    }

    fn harness() -> Harness {
        let poll = Poll::new().expect("poll should be created");
        let waker =
            Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).expect("waker should be created"));
        Harness {
            poll,
            manager: Arc::new(OutboundQueueManager::new(waker)),
            channels: ChannelRegistry::new(FramingMode::SingleRead, 1024),
        }
    }

    fn register_pair(harness: &mut Harness) -> (usize, std::net::TcpStream) {
        let (mut stream, peer_addr, client) = socket_pair();
        let id = harness.channels.next_id();
        harness
            .poll
            .registry()
            .register(&mut stream, Token(id), Interest::READABLE)
            .expect("stream should register");
        (harness.channels.insert(stream, peer_addr), client)
    }

    #[test]
    fn submit_flips_interest_and_dedups_pending_changes() {
        let mut harness = harness();
        let (id, _client) = register_pair(&mut harness);
        let handle = harness.channels.get_mut(id).expect("channel").handle();

        harness
            .manager
            .submit(&handle, b"one".to_vec())
            .expect("submit should pass");
        harness
            .manager
            .submit(&handle, b"two".to_vec())
            .expect("submit should pass");

        assert_eq!(handle.interest(), InterestMode::ReadWrite);
        assert_eq!(handle.queued_buffers(), 2);
        assert_eq!(harness.manager.pending_changes(), 1);

        let faults = harness
            .manager
            .apply_pending(harness.poll.registry(), &mut harness.channels);
        assert!(faults.is_empty());
        assert_eq!(harness.manager.pending_changes(), 0);
        let channel = harness.channels.get_mut(id).expect("channel");
        assert_eq!(channel.registered, InterestMode::ReadWrite);
    }

    #[test]
    fn drain_writes_in_submission_order_and_reverts_to_read_only() {
        let mut harness = harness();
        let (id, mut client) = register_pair(&mut harness);
        let handle = harness.channels.get_mut(id).expect("channel").handle();

        for chunk in [&b"alpha-"[..], b"beta-", b"gamma"] {
            harness
                .manager
                .submit(&handle, chunk.to_vec())
                .expect("submit should pass");
        }
        harness
            .manager
            .apply_pending(harness.poll.registry(), &mut harness.channels);

        let channel = harness.channels.get_mut(id).expect("channel");
        let outcome = harness
            .manager
            .drain(harness.poll.registry(), channel)
            .expect("drain should pass");
        assert_eq!(outcome, DrainOutcome::Drained);
        assert_eq!(handle.queued_buffers(), 0);
        assert_eq!(handle.interest(), InterestMode::ReadOnly);
        assert_eq!(channel.registered, InterestMode::ReadOnly);

        let mut received = vec![0_u8; 16];
        client
            .read_exact(&mut received)
            .expect("client should read all bytes");
        assert_eq!(&received, b"alpha-beta-gamma");
    }

    #[test]
    fn saturated_socket_keeps_partial_head_buffer() {
        let mut harness = harness();
        let (id, mut client) = register_pair(&mut harness);
        let handle = harness.channels.get_mut(id).expect("channel").handle();

        let payload: Vec<u8> = (0..16 * 1024 * 1024).map(|i| (i % 251) as u8).collect();
        harness
            .manager
            .submit(&handle, payload.clone())
            .expect("submit should pass");
        harness
            .manager
            .apply_pending(harness.poll.registry(), &mut harness.channels);

        let channel = harness.channels.get_mut(id).expect("channel");
        let outcome = harness
            .manager
            .drain(harness.poll.registry(), channel)
            .expect("drain should pass");
        assert_eq!(outcome, DrainOutcome::Saturated);
        assert_eq!(handle.queued_buffers(), 1);
        assert_eq!(handle.interest(), InterestMode::ReadWrite);
        {
            let state = handle.lock();
            let head = state.buffers.front().expect("head buffer should remain");
            assert!(head.cursor > 0 && head.cursor < payload.len());
        }

        let expected_len = payload.len();
        let reader = thread::spawn(move || {
            let mut received = vec![0_u8; expected_len];
            client
                .read_exact(&mut received)
                .expect("client should read everything");
            received
        });

        let mut drained = false;
        for _ in 0..2_000 {
            let channel = harness.channels.get_mut(id).expect("channel");
            if harness
                .manager
                .drain(harness.poll.registry(), channel)
                .expect("drain should pass")
                == DrainOutcome::Drained
            {
                drained = true;
                break;
            }
            thread::sleep(Duration::from_millis(2));
        }
        assert!(drained);
        assert_eq!(reader.join().expect("reader should finish"), payload);
        assert_eq!(handle.interest(), InterestMode::ReadOnly);
    }

    #[test]
    fn submit_after_close_is_rejected() {
        let mut harness = harness();
        let (id, _client) = register_pair(&mut harness);
        let handle = harness.channels.get_mut(id).expect("channel").handle();
        harness
            .manager
            .submit(&handle, b"late".to_vec())
            .expect("submit should pass");

        let channel = harness.channels.remove(id).expect("channel");
        assert_eq!(harness.manager.close(harness.poll.registry(), channel), 1);
        assert!(handle.is_closed());
        assert!(matches!(
            harness.manager.submit(&handle, b"later".to_vec()),
            Err(OutboundError::ChannelClosed { connection_id }) if connection_id == id
        ));

        // The stale pending entry refers to a channel that no longer exists.
        let faults = harness
            .manager
            .apply_pending(harness.poll.registry(), &mut harness.channels);
        assert!(faults.is_empty());
    }

    #[test]
    fn queue_and_interest_never_disagree_under_concurrent_submits() {
        let mut harness = harness();
        let (id, mut client) = register_pair(&mut harness);
        let handle = harness.channels.get_mut(id).expect("channel").handle();

        const SUBMITTERS: usize = 4;
        const PER_SUBMITTER: usize = 500;
        const CHUNK: &[u8] = b"0123456789abcdef";
        let expected_bytes = SUBMITTERS * PER_SUBMITTER * CHUNK.len();

        let reader = thread::spawn(move || {
            let mut received = vec![0_u8; expected_bytes];
            client
                .read_exact(&mut received)
                .expect("client should read everything");
            received.len()
        });

        let stop = Arc::new(AtomicBool::new(false));
        let checker = {
            let handle = handle.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                let mut observations = 0_u64;
                while !stop.load(Ordering::SeqCst) {
                    let state = handle.lock();
                    assert_eq!(
                        state.buffers.is_empty(),
                        state.interest == InterestMode::ReadOnly
                    );
                    observations += 1;
                }
                observations
            })
        };

        let submitters: Vec<_> = (0..SUBMITTERS)
            .map(|_| {
                let manager = harness.manager.clone();
                let handle = handle.clone();
                thread::spawn(move || {
                    for _ in 0..PER_SUBMITTER {
                        manager
                            .submit(&handle, CHUNK.to_vec())
                            .expect("submit should pass");
                    }
                })
            })
            .collect();

        let mut submitters_done = false;
        for _ in 0..20_000 {
            harness
                .manager
                .apply_pending(harness.poll.registry(), &mut harness.channels);
            let channel = harness.channels.get_mut(id).expect("channel");
            let outcome = harness
                .manager
                .drain(harness.poll.registry(), channel)
                .expect("drain should pass");
            if !submitters_done && submitters.iter().all(|submitter| submitter.is_finished()) {
                submitters_done = true;
                continue;
            }
            if submitters_done && outcome == DrainOutcome::Drained && handle.queued_buffers() == 0 {
                break;
            }
            thread::sleep(Duration::from_micros(200));
        }

        for submitter in submitters {
            submitter.join().expect("submitter should finish");
        }
        assert_eq!(reader.join().expect("reader should finish"), expected_bytes);
        stop.store(true, Ordering::SeqCst);
        assert!(checker.join().expect("checker should finish") > 0);
        assert_eq!(handle.interest(), InterestMode::ReadOnly);
    }
}
