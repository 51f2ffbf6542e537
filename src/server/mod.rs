pub mod outbound;
pub mod reactor;
pub mod registry;

use std::fmt;
use std::io;

use crate::wire::frame::FrameError;

pub use outbound::{DrainOutcome, OutboundError, OutboundQueueManager};
pub use reactor::{Reactor, ReactorHandle, ReactorSettings};
pub use registry::{Channel, ChannelHandle, ChannelRegistry, ConnectionId, InterestMode};

#[derive(Debug)]
pub enum ServerError {
    Bind {
        address: String,
        source: io::Error,
    },
    InvalidAddress {
        address: String,
    },
    InvalidFraming {
        framing: String,
    },
    CreatePoll {
        source: io::Error,
    },
    CreateWaker {
        source: io::Error,
    },
    RegisterListener {
        source: io::Error,
    },
    Poll {
        source: io::Error,
    },
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bind { address, source } => {
                write!(f, "failed to bind TCP listener on {address}: {source}")
            }
            Self::InvalidAddress { address } => {
                write!(f, "'{address}' does not resolve to a socket address")
            }
            Self::InvalidFraming { framing } => write!(
                f,
                "invalid wire.framing '{framing}'; allowed values: single_read, length_prefixed"
            ),
            Self::CreatePoll { source } => write!(f, "failed to create poll instance: {source}"),
            Self::CreateWaker { source } => write!(f, "failed to create reactor waker: {source}"),
            Self::RegisterListener { source } => {
                write!(f, "failed to register listener with poll: {source}")
            }
            Self::Poll { source } => write!(f, "poll wait failed: {source}"),
        }
    }
}

impl std::error::Error for ServerError {}

#[derive(Debug)]
pub enum ConnectionFault {
    PeerClosed,
    Read(io::Error),
    Write(io::Error),
    Framing(FrameError),
    Registration(io::Error),
}

impl fmt::Display for ConnectionFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::Read(source) => write!(f, "read failed: {source}"),
            Self::Write(source) => write!(f, "write failed: {source}"),
            Self::Framing(source) => write!(f, "framing violated: {source}"),
            Self::Registration(source) => write!(f, "poll registration failed: {source}"),
        }
    }
}

impl std::error::Error for ConnectionFault {}

impl ConnectionFault {
    pub fn is_orderly(&self) -> bool {
        match self {
            Self::PeerClosed => true,
            Self::Read(source) | Self::Write(source) => matches!(
                source.kind(),
                io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::BrokenPipe
            ),
            _ => false,
        }
    }
}
