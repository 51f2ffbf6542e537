use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use mio::net::TcpStream;
use mio::{Interest, Token};

use crate::wire::frame::{FrameAssembler, FramingMode};

pub type ConnectionId = usize;

pub const LISTENER_TOKEN: Token = Token(0);
pub const WAKER_TOKEN: Token = Token(1);
pub const FIRST_CONNECTION_ID: ConnectionId = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InterestMode {
    ReadOnly,
    ReadWrite,
}

impl InterestMode {
    pub fn interest(self) -> Interest {
        match self {
            Self::ReadOnly => Interest::READABLE,
            Self::ReadWrite => Interest::READABLE | Interest::WRITABLE,
        }
    }
}

#[derive(Debug)]
pub(crate) struct PendingWrite {
    pub(crate) bytes: Vec<u8>,
    pub(crate) cursor: usize,
}

impl PendingWrite {
    pub(crate) fn remaining(&self) -> &[u8] {
        &self.bytes[self.cursor..]
    }

    pub(crate) fn is_complete(&self) -> bool {
        self.cursor >= self.bytes.len()
    }
}

/// Queue and interest mode live under one lock so they can never disagree.
#[derive(Debug)]
pub(crate) struct OutboundState {
    pub(crate) buffers: VecDeque<PendingWrite>,
    pub(crate) interest: InterestMode,
    pub(crate) change_pending: bool,
    pub(crate) closed: bool,
}

/// Cross-thread half of a channel. Workers hold it through a [`ChannelHandle`];
/// only [`super::OutboundQueueManager`] mutates it.
#[derive(Debug)]
pub struct Outbox {
    id: ConnectionId,
    state: Mutex<OutboundState>,
}

impl Outbox {
    fn new(id: ConnectionId) -> Self {
        Self {
            id,
            state: Mutex::new(OutboundState {
                buffers: VecDeque::new(),
                interest: InterestMode::ReadOnly,
                change_pending: false,
                closed: false,
            }),
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, OutboundState> {
        self.state.lock().expect("outbox state lock poisoned")
    }

    pub fn interest(&self) -> InterestMode {
        self.lock().interest
    }

    pub fn queued_buffers(&self) -> usize {
        self.lock().buffers.len()
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }
}

pub type ChannelHandle = Arc<Outbox>;

pub struct Channel {
    pub(crate) id: ConnectionId,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) stream: TcpStream,
    pub(crate) outbox: Arc<Outbox>,
    /// Interest mode currently registered with poll; lags `outbox` until the
    /// reactor applies pending changes.
    pub(crate) registered: InterestMode,
    pub(crate) inbound: Option<FrameAssembler>,
    pub(crate) connected_at: Instant,
}

impl Channel {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn token(&self) -> Token {
        Token(self.id)
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn handle(&self) -> ChannelHandle {
        Arc::clone(&self.outbox)
    }
}

pub struct ChannelRegistry {
    channels: HashMap<ConnectionId, Channel>,
    next_id: ConnectionId,
    framing: FramingMode,
    max_frame_size: usize,
}

impl ChannelRegistry {
    pub fn new(framing: FramingMode, max_frame_size: usize) -> Self {
        Self {
            channels: HashMap::new(),
            next_id: FIRST_CONNECTION_ID,
            framing,
            max_frame_size,
        }
    }

    pub fn next_id(&self) -> ConnectionId {
        self.next_id
    }

    pub fn insert(&mut self, stream: TcpStream, peer_addr: SocketAddr) -> ConnectionId {
        let id = self.next_id;
        self.next_id += 1;

        let inbound = match self.framing {
            FramingMode::SingleRead => None,
            FramingMode::LengthPrefixed => Some(FrameAssembler::new(self.max_frame_size)),
        };
        self.channels.insert(
            id,
            Channel {
                id,
                peer_addr,
                stream,
                outbox: Arc::new(Outbox::new(id)),
                registered: InterestMode::ReadOnly,
                inbound,
                connected_at: Instant::now(),
            },
        );
        id
    }

    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Channel> {
        self.channels.get_mut(&id)
    }

    pub fn remove(&mut self, id: ConnectionId) -> Option<Channel> {
        self.channels.remove(&id)
    }

    pub fn ids(&self) -> Vec<ConnectionId> {
        self.channels.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::net::{SocketAddr, TcpListener as StdTcpListener, TcpStream as StdTcpStream};

    use mio::net::TcpStream;

    use crate::wire::frame::FramingMode;

    use super::{ChannelRegistry, InterestMode, FIRST_CONNECTION_ID};

    pub(crate) fn socket_pair() -> (TcpStream, SocketAddr, StdTcpStream) {
        let listener = StdTcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("local addr should exist");
        let client = StdTcpStream::connect(addr).expect("client should connect");
        let (accepted, peer_addr) = listener.accept().expect("accept should succeed");
        accepted
            .set_nonblocking(true)
            .expect("stream should become non-blocking");
        (TcpStream::from_std(accepted), peer_addr, client)
    }

    #[test]
    fn ids_start_after_reserved_tokens_and_are_not_reused() {
        let mut registry = ChannelRegistry::new(FramingMode::SingleRead, 1024);
        assert_eq!(registry.next_id(), FIRST_CONNECTION_ID);

        let (stream, peer_addr, _client) = socket_pair();
        let first = registry.insert(stream, peer_addr);
        assert_eq!(first, FIRST_CONNECTION_ID);
        assert!(registry.remove(first).is_some());

        let (stream, peer_addr, _client2) = socket_pair();
        let second = registry.insert(stream, peer_addr);
        assert_eq!(second, first + 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.get_mut(first).is_none());
    }

    #[test]
    fn new_channels_start_read_only_with_framing_state() {
        let mut registry = ChannelRegistry::new(FramingMode::LengthPrefixed, 1024);
        let (stream, peer_addr, _client) = socket_pair();
        let id = registry.insert(stream, peer_addr);

        let channel = registry.get_mut(id).expect("channel should be present");
        assert_eq!(channel.registered, InterestMode::ReadOnly);
        assert_eq!(channel.handle().interest(), InterestMode::ReadOnly);
        assert_eq!(channel.handle().queued_buffers(), 0);
        assert!(channel.inbound.is_some());
        assert_eq!(channel.token().0, id);
    }
}
