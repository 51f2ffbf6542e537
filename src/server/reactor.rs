use std::io::{self, Read};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::event::Event;
use mio::net::TcpListener;
use mio::{Events, Interest, Poll, Token, Waker};
use serde_json::json;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::wire::frame::FramingMode;
use crate::workers::{DispatchError, Dispatcher, ReadTask};

use super::registry::{
    Channel, ChannelHandle, ChannelRegistry, ConnectionId, LISTENER_TOKEN, WAKER_TOKEN,
};
use super::{ConnectionFault, OutboundQueueManager, ServerError};

const EVENTS_CAPACITY: usize = 1024;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReactorSettings {
    pub host: String,
    pub port: u16,
    pub read_buffer_size: usize,
    pub framing: FramingMode,
    pub max_frame_size: usize,
}

impl ReactorSettings {
    pub fn from_app_config(app_config: &AppConfig) -> Result<Self, ServerError> {
        let framing = FramingMode::parse(&app_config.wire.framing).ok_or_else(|| {
            ServerError::InvalidFraming {
                framing: app_config.wire.framing.clone(),
            }
        })?;
        Ok(Self {
            host: app_config.server.host.clone(),
            port: app_config.server.port,
            read_buffer_size: app_config.server.read_buffer_size,
            framing,
            max_frame_size: app_config.wire.max_frame_size_bytes,
        })
    }

    fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

#[derive(Clone)]
pub struct ReactorHandle {
    shutdown: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl ReactorHandle {
    pub fn shutdown(&self) -> io::Result<()> {
        self.shutdown.store(true, Ordering::SeqCst);
        self.waker.wake()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }
}

/// Single-threaded event loop owning the listener, the poll instance and
/// every channel. It moves bytes only; decoding and store calls happen on
/// the worker pool.
pub struct Reactor {
    poll: Poll,
    listener: TcpListener,
    local_addr: SocketAddr,
    channels: ChannelRegistry,
    outbound: Arc<OutboundQueueManager>,
    waker: Arc<Waker>,
    shutdown: Arc<AtomicBool>,
    read_buffer: Vec<u8>,
    framing: FramingMode,
    logger: Arc<Logger>,
}

impl Reactor {
    pub fn bind(settings: &ReactorSettings, logger: Arc<Logger>) -> Result<Self, ServerError> {
        let address = settings.address();
        let socket_addr = address
            .to_socket_addrs()
            .map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?
            .next()
            .ok_or_else(|| ServerError::InvalidAddress {
                address: address.clone(),
            })?;

        let mut listener =
            TcpListener::bind(socket_addr).map_err(|source| ServerError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { address, source })?;

        let poll = Poll::new().map_err(|source| ServerError::CreatePoll { source })?;
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
            .map_err(|source| ServerError::RegisterListener { source })?;
        let waker = Arc::new(
            Waker::new(poll.registry(), WAKER_TOKEN)
                .map_err(|source| ServerError::CreateWaker { source })?,
        );

        Ok(Self {
            poll,
            listener,
            local_addr,
            channels: ChannelRegistry::new(settings.framing, settings.max_frame_size),
            outbound: Arc::new(OutboundQueueManager::new(Arc::clone(&waker))),
            waker,
            shutdown: Arc::new(AtomicBool::new(false)),
            read_buffer: vec![0_u8; settings.read_buffer_size.max(1)],
            framing: settings.framing,
            logger,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn handle(&self) -> ReactorHandle {
        ReactorHandle {
            shutdown: Arc::clone(&self.shutdown),
            waker: Arc::clone(&self.waker),
        }
    }

    pub fn outbound(&self) -> Arc<OutboundQueueManager> {
        Arc::clone(&self.outbound)
    }

    pub fn run(&mut self, dispatcher: Dispatcher) -> Result<(), ServerError> {
        let mut events = Events::with_capacity(EVENTS_CAPACITY);
        self.logger.log(
            LogLevel::Info,
            Some("server::reactor"),
            "Reactor accepting connections",
            Some(json!({
                "bind_address": self.local_addr.to_string(),
                "framing": self.framing.as_str(),
                "read_buffer_size": self.read_buffer.len(),
            })),
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            self.apply_pending_changes();

            if let Err(source) = self.poll.poll(&mut events, None) {
                if source.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                self.close_all();
                return Err(ServerError::Poll { source });
            }

            for event in events.iter() {
                match event.token() {
                    LISTENER_TOKEN => self.accept_ready(),
                    // Pending changes are applied at the top of the next turn.
                    WAKER_TOKEN => {}
                    Token(id) => self.channel_ready(id, event, &dispatcher),
                }
            }
        }

        self.close_all();
        self.logger
            .info(Some("server::reactor"), "Reactor stopped");
        Ok(())
    }

    fn apply_pending_changes(&mut self) {
        let faults = self
            .outbound
            .apply_pending(self.poll.registry(), &mut self.channels);
        for (id, fault) in faults {
            self.close_channel(id, fault);
        }
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((mut stream, peer_addr)) => {
                    if let Err(error) = stream.set_nodelay(true) {
                        self.logger.debug(
                            Some("server::accept"),
                            &format!("TCP_NODELAY not applied for {peer_addr}: {error}"),
                        );
                    }
                    let id = self.channels.next_id();
                    if let Err(error) =
                        self.poll
                            .registry()
                            .register(&mut stream, Token(id), Interest::READABLE)
                    {
                        self.logger.warn(
                            Some("server::accept"),
                            &format!("dropping connection from {peer_addr}: {error}"),
                        );
                        continue;
                    }
                    self.channels.insert(stream, peer_addr);
                    self.logger.log(
                        LogLevel::Info,
                        Some("server::accept"),
                        "Connection accepted",
                        Some(json!({
                            "connection_id": id,
                            "peer_addr": peer_addr.to_string(),
                            "open_connections": self.channels.len(),
                        })),
                    );
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
                Err(error) => {
                    self.logger
                        .warn(Some("server::accept"), &format!("accept failed: {error}"));
                    break;
                }
            }
        }
    }

    fn channel_ready(&mut self, id: ConnectionId, event: &Event, dispatcher: &Dispatcher) {
        let Some(channel) = self.channels.get_mut(id) else {
            return;
        };

        if event.is_readable() || event.is_read_closed() || event.is_error() {
            if let Err(fault) = read_ready(channel, &mut self.read_buffer, dispatcher, &self.logger)
            {
                self.close_channel(id, fault);
                return;
            }
        }

        if event.is_writable() {
            if let Err(fault) = self.outbound.drain(self.poll.registry(), channel) {
                self.close_channel(id, fault);
            }
        }
    }

    fn close_channel(&mut self, id: ConnectionId, fault: ConnectionFault) {
        let Some(channel) = self.channels.remove(id) else {
            return;
        };
        let peer_addr = channel.peer_addr();
        let open_for_ms = channel.connected_at.elapsed().as_millis() as u64;
        let discarded = self.outbound.close(self.poll.registry(), channel);

        let level = if fault.is_orderly() {
            LogLevel::Info
        } else {
            LogLevel::Warn
        };
        self.logger.log(
            level,
            Some("server::close"),
            "Connection closed",
            Some(json!({
                "connection_id": id,
                "peer_addr": peer_addr.to_string(),
                "reason": fault.to_string(),
                "open_for_ms": open_for_ms,
                "discarded_responses": discarded,
            })),
        );
    }

    fn close_all(&mut self) {
        let ids = self.channels.ids();
        let count = ids.len();
        for id in ids {
            if let Some(channel) = self.channels.remove(id) {
                self.outbound.close(self.poll.registry(), channel);
            }
        }
        if count > 0 {
            self.logger.info(
                Some("server::reactor"),
                &format!("closed {count} open connection(s)"),
            );
        }
    }
}

fn read_ready(
    channel: &mut Channel,
    buffer: &mut [u8],
    dispatcher: &Dispatcher,
    logger: &Logger,
) -> Result<(), ConnectionFault> {
    loop {
        match channel.stream.read(buffer) {
            Ok(0) => return Err(ConnectionFault::PeerClosed),
            Ok(read) => dispatch_bytes(channel, &buffer[..read], dispatcher, logger)?,
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => return Ok(()),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(ConnectionFault::Read(error)),
        }
    }
}

fn dispatch_bytes(
    channel: &mut Channel,
    bytes: &[u8],
    dispatcher: &Dispatcher,
    logger: &Logger,
) -> Result<(), ConnectionFault> {
    let Some(assembler) = channel.inbound.as_mut() else {
        let handle = Arc::clone(&channel.outbox);
        dispatch_frame(channel.id, handle, bytes.to_vec(), dispatcher, logger);
        return Ok(());
    };

    assembler.push(bytes);
    while let Some(frame) = assembler.next_frame().map_err(ConnectionFault::Framing)? {
        let handle = Arc::clone(&channel.outbox);
        dispatch_frame(channel.id, handle, frame, dispatcher, logger);
    }
    Ok(())
}

fn dispatch_frame(
    id: ConnectionId,
    channel: ChannelHandle,
    payload: Vec<u8>,
    dispatcher: &Dispatcher,
    logger: &Logger,
) {
    let frame_len = payload.len();
    match dispatcher.try_dispatch(ReadTask::new(channel, payload)) {
        Ok(()) if logger.enabled(LogLevel::Verbose) => logger.log(
            LogLevel::Verbose,
            Some("server::dispatch"),
            "Frame handed to worker pool",
            Some(json!({
                "connection_id": id,
                "frame_len": frame_len,
                "queued_tasks": dispatcher.queued(),
            })),
        ),
        Ok(()) => {}
        Err(error @ DispatchError::Saturated { .. }) => logger.log(
            LogLevel::Warn,
            Some("server::dispatch"),
            "Dropping frame",
            Some(json!({
                "connection_id": id,
                "frame_len": frame_len,
                "reason": error.to_string(),
            })),
        ),
        Err(error @ DispatchError::Stopped) => {
            logger.error(Some("server::dispatch"), &error.to_string());
        }
    }
}
