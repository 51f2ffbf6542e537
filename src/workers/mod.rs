use std::fmt;
use std::io;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam_channel::{bounded, unbounded, Receiver, Sender, TrySendError};
use serde_json::json;

use crate::config::AppConfig;
use crate::logging::{LogLevel, Logger};
use crate::server::{ChannelHandle, OutboundError, OutboundQueueManager};
use crate::storage::Store;
use crate::utils::timing::RequestTimings;
use crate::wire::codec::{decode_request, encode_response};
use crate::wire::frame::FramingMode;
use crate::wire::message::{ErrorKind, Response};

pub struct ReadTask {
    pub channel: ChannelHandle,
    pub payload: Vec<u8>,
    pub received_at: Instant,
}

impl ReadTask {
    pub fn new(channel: ChannelHandle, payload: Vec<u8>) -> Self {
        Self {
            channel,
            payload,
            received_at: Instant::now(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WorkerPoolConfig {
    pub pool_size: usize,
    /// Zero means unbounded.
    pub task_queue_capacity: usize,
    pub framing: FramingMode,
    pub max_frame_size: usize,
}

impl WorkerPoolConfig {
    pub fn from_app_config(app_config: &AppConfig) -> Result<Self, WorkerPoolError> {
        let framing = FramingMode::parse(&app_config.wire.framing).ok_or_else(|| {
            WorkerPoolError::InvalidFraming {
                framing: app_config.wire.framing.clone(),
            }
        })?;
        Ok(Self {
            pool_size: app_config.workers.pool_size,
            task_queue_capacity: app_config.workers.task_queue_capacity,
            framing,
            max_frame_size: app_config.wire.max_frame_size_bytes,
        })
    }
}

#[derive(Debug)]
pub enum WorkerPoolError {
    EmptyPool,
    InvalidFraming { framing: String },
    Spawn { index: usize, source: io::Error },
}

impl fmt::Display for WorkerPoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPool => write!(f, "worker pool needs at least one thread"),
            Self::InvalidFraming { framing } => write!(
                f,
                "invalid wire.framing '{framing}'; allowed values: single_read, length_prefixed"
            ),
            Self::Spawn { index, source } => {
                write!(f, "failed to spawn worker thread {index}: {source}")
            }
        }
    }
}

impl std::error::Error for WorkerPoolError {}

#[derive(Debug, PartialEq, Eq)]
pub enum DispatchError {
    Saturated { capacity: usize },
    Stopped,
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Saturated { capacity } => {
                write!(f, "task queue is full ({capacity} tasks waiting)")
            }
            Self::Stopped => write!(f, "worker pool has stopped"),
        }
    }
}

impl std::error::Error for DispatchError {}

#[derive(Clone)]
pub struct Dispatcher {
    sender: Sender<ReadTask>,
}

impl Dispatcher {
    pub fn try_dispatch(&self, task: ReadTask) -> Result<(), DispatchError> {
        self.sender.try_send(task).map_err(|error| match error {
            TrySendError::Full(_) => DispatchError::Saturated {
                capacity: self.sender.capacity().unwrap_or_default(),
            },
            TrySendError::Disconnected(_) => DispatchError::Stopped,
        })
    }

    pub fn queued(&self) -> usize {
        self.sender.len()
    }
}

pub struct WorkerPool {
    dispatcher: Dispatcher,
    workers: Vec<JoinHandle<()>>,
    logger: Arc<Logger>,
}

impl WorkerPool {
    pub fn start(
        config: WorkerPoolConfig,
        store: Arc<dyn Store>,
        outbound: Arc<OutboundQueueManager>,
        logger: Arc<Logger>,
    ) -> Result<Self, WorkerPoolError> {
        if config.pool_size == 0 {
            return Err(WorkerPoolError::EmptyPool);
        }

        let (sender, receiver) = if config.task_queue_capacity == 0 {
            unbounded()
        } else {
            bounded(config.task_queue_capacity)
        };

        let mut workers = Vec::with_capacity(config.pool_size);
        for index in 0..config.pool_size {
            let worker = Worker {
                tasks: receiver.clone(),
                store: Arc::clone(&store),
                outbound: Arc::clone(&outbound),
                logger: Arc::clone(&logger),
                framing: config.framing,
                max_frame_size: config.max_frame_size,
            };
            let handle = thread::Builder::new()
                .name(format!("msgmux-worker-{index}"))
                .spawn(move || worker.run())
                .map_err(|source| WorkerPoolError::Spawn { index, source })?;
            workers.push(handle);
        }

        logger.log(
            LogLevel::Info,
            Some("workers::pool"),
            "Worker pool started",
            Some(json!({
                "pool_size": config.pool_size,
                "task_queue_capacity": config.task_queue_capacity,
                "framing": config.framing.as_str(),
            })),
        );

        Ok(Self {
            dispatcher: Dispatcher { sender },
            workers,
            logger,
        })
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher.clone()
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn shutdown(self) {
        let Self {
            dispatcher,
            workers,
            logger,
        } = self;
        drop(dispatcher);

        let panicked = workers
            .into_iter()
            .map(JoinHandle::join)
            .filter(Result::is_err)
            .count();
        if panicked > 0 {
            logger.error(
                Some("workers::pool"),
                &format!("{panicked} worker thread(s) panicked before shutdown"),
            );
        }
        logger.info(Some("workers::pool"), "Worker pool stopped");
    }
}

struct Worker {
    tasks: Receiver<ReadTask>,
    store: Arc<dyn Store>,
    outbound: Arc<OutboundQueueManager>,
    logger: Arc<Logger>,
    framing: FramingMode,
    max_frame_size: usize,
}

impl Worker {
    fn run(self) {
        while let Ok(task) = self.tasks.recv() {
            self.process(task);
        }
    }

    fn process(&self, task: ReadTask) {
        let picked_up_at = Instant::now();
        let connection_id = task.channel.id();

        let request = match decode_request(&task.payload) {
            Ok(request) => request,
            Err(error) => {
                self.logger.log(
                    LogLevel::Warn,
                    Some("workers::decode"),
                    "Dropping undecodable frame",
                    Some(json!({
                        "connection_id": connection_id,
                        "frame_len": task.payload.len(),
                        "error": error.to_string(),
                    })),
                );
                return;
            }
        };

        let outcome = self.store.execute(&request);
        if let Some(failure) = &outcome.failure {
            self.logger.log(
                LogLevel::Warn,
                Some("workers::store"),
                "Store operation failed",
                Some(json!({
                    "connection_id": connection_id,
                    "request_id": request.request_id,
                    "request_type": request.request_type.as_str(),
                    "error_kind": outcome.error_kind.as_str(),
                    "error": failure,
                })),
            );
        }

        let response = Response {
            error_kind: outcome.error_kind,
            request_id: request.request_id,
            request_type: request.request_type,
            message_id: outcome.message_id,
            retrieved_message: outcome.retrieved_message,
            store_execution_time_millis: outcome.execution_time_millis,
        };
        let frame = match self.to_wire(&response) {
            Ok(frame) => frame,
            Err(error) => {
                self.logger.log(
                    LogLevel::Error,
                    Some("workers::encode"),
                    "Response cannot be sent as is; answering with an execution error",
                    Some(json!({
                        "connection_id": connection_id,
                        "request_id": request.request_id,
                        "error": error,
                    })),
                );
                match self.to_wire(&Response::for_request(&request, ErrorKind::ExecutionError)) {
                    Ok(frame) => frame,
                    Err(error) => {
                        self.logger.error(Some("workers::encode"), &error);
                        return;
                    }
                }
            }
        };

        match self.outbound.submit(&task.channel, frame) {
            Ok(()) => {}
            Err(error @ OutboundError::ChannelClosed { .. }) => {
                self.logger.debug(Some("workers::submit"), &error.to_string());
            }
            Err(error) => {
                self.logger.error(Some("workers::submit"), &error.to_string());
            }
        }

        if self.logger.enabled(LogLevel::Debug) {
            let timings = RequestTimings::measure(
                task.received_at,
                picked_up_at,
                response.store_execution_time_millis,
            );
            self.logger.log(
                LogLevel::Debug,
                Some("workers::request"),
                "Request processed",
                Some(json!({
                    "connection_id": connection_id,
                    "client_id": request.sender_id,
                    "request_id": request.request_id,
                    "request_type": request.request_type.as_str(),
                    "error_kind": response.error_kind.as_str(),
                    "timings": timings.to_payload(),
                })),
            );
        }
    }

    fn to_wire(&self, response: &Response) -> Result<Vec<u8>, String> {
        let encoded = encode_response(response).map_err(|error| error.to_string())?;
        self.framing
            .wrap(encoded, self.max_frame_size)
            .map_err(|error| error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
    use mio::{Interest, Poll, Token, Waker};

    use crate::logging::tests::memory_logger;
    use crate::logging::LogLevel;
    use crate::server::registry::tests::socket_pair;
    use crate::server::registry::WAKER_TOKEN;
    use crate::server::{ChannelHandle, ChannelRegistry, OutboundQueueManager};
    use crate::storage::{Store, StoreOutcome};
    use crate::wire::codec::{decode_response, encode_request};
    use crate::wire::frame::{FramingMode, DEFAULT_MAX_FRAME_SIZE_BYTES, FRAME_HEADER_SIZE_BYTES};
    use crate::wire::message::{ErrorKind, Request, RequestType, NO_MESSAGE_ID};

    use super::{DispatchError, Dispatcher, ReadTask, WorkerPool, WorkerPoolConfig};

    #[derive(Default)]
    struct RecordingStore {
        seen: Mutex<Vec<Request>>,
    }

    impl Store for RecordingStore {
        fn execute(&self, request: &Request) -> StoreOutcome {
            self.seen
                .lock()
                .expect("recording store mutex poisoned")
                .push(request.clone());
            StoreOutcome::found(41, format!("echo:{}", request.message_body()))
        }
    }

    struct OversizedStore;

    impl Store for OversizedStore {
        fn execute(&self, _request: &Request) -> StoreOutcome {
            StoreOutcome::found(5, "x".repeat(70_000))
        }
    }

    struct GatedStore {
        entered: Sender<()>,
        release: Receiver<()>,
    }

    impl Store for GatedStore {
        fn execute(&self, _request: &Request) -> StoreOutcome {
            let _ = self.entered.send(());
            let _ = self.release.recv();
            StoreOutcome::with_kind(ErrorKind::NoError)
        }
    }

    struct Fixture {
        _poll: Poll,
        _channels: ChannelRegistry,
        outbound: Arc<OutboundQueueManager>,
        handle: ChannelHandle,
        _client: std::net::TcpStream,
    }

    fn fixture() -> Fixture {
        let poll = Poll::new().expect("poll should be created");
        let waker =
            Arc::new(Waker::new(poll.registry(), WAKER_TOKEN).expect("waker should be created"));
        let mut channels = ChannelRegistry::new(FramingMode::SingleRead, 1024);
        let (mut stream, peer_addr, client) = socket_pair();
        poll.registry()
            .register(&mut stream, Token(channels.next_id()), Interest::READABLE)
            .expect("stream should register");
        let id = channels.insert(stream, peer_addr);
        let handle = channels.get_mut(id).expect("channel").handle();
        Fixture {
            _poll: poll,
            _channels: channels,
            outbound: Arc::new(OutboundQueueManager::new(waker)),
            handle,
            _client: client,
        }
    }

    fn config(framing: FramingMode, pool_size: usize, capacity: usize) -> WorkerPoolConfig {
        WorkerPoolConfig {
            pool_size,
            task_queue_capacity: capacity,
            framing,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE_BYTES,
        }
    }

    fn wait_for_buffers(handle: &ChannelHandle, expected: usize) {
        for _ in 0..500 {
            if handle.queued_buffers() >= expected {
                return;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        panic!("expected {expected} queued buffers");
    }

    fn queued_frames(handle: &ChannelHandle) -> Vec<Vec<u8>> {
        handle
            .lock()
            .buffers
            .iter()
            .map(|pending| pending.bytes.clone())
            .collect()
    }

    #[test]
    fn decodes_executes_and_queues_the_response() {
        let fixture = fixture();
        let store = Arc::new(RecordingStore::default());
        let (logger, _sink) = memory_logger(LogLevel::Error);
        let pool = WorkerPool::start(
            config(FramingMode::SingleRead, 2, 0),
            store.clone(),
            fixture.outbound.clone(),
            logger,
        )
        .expect("pool should start");
        assert_eq!(pool.size(), 2);

        let request = Request::send_message(17, 3, None, 5, "hi");
        let dispatcher = pool.dispatcher();
        dispatcher
            .try_dispatch(ReadTask::new(
                fixture.handle.clone(),
                encode_request(&request).expect("request should encode"),
            ))
            .expect("dispatch should pass");

        wait_for_buffers(&fixture.handle, 1);
        drop(dispatcher);
        pool.shutdown();

        let frames = queued_frames(&fixture.handle);
        let response = decode_response(&frames[0]).expect("response should decode");
        assert_eq!(response.request_id, 17);
        assert_eq!(response.request_type, RequestType::SendMessage);
        assert_eq!(response.message_id, 41);
        assert_eq!(response.retrieved_message, "echo:hi");
        assert_eq!(
            store.seen.lock().expect("recording store mutex poisoned")[0],
            request
        );
    }

    #[test]
    fn malformed_frames_are_dropped_without_response() {
        let fixture = fixture();
        let store = Arc::new(RecordingStore::default());
        let (logger, sink) = memory_logger(LogLevel::Warn);
        let pool = WorkerPool::start(
            config(FramingMode::SingleRead, 1, 0),
            store.clone(),
            fixture.outbound.clone(),
            logger,
        )
        .expect("pool should start");

        let mut reserved = encode_request(&Request::create_queue(1, 1, 1)).expect("encode");
        reserved[4..8].copy_from_slice(&2_i32.to_be_bytes());
        let dispatcher = pool.dispatcher();
        dispatcher
            .try_dispatch(ReadTask::new(fixture.handle.clone(), vec![0, 0, 1]))
            .expect("dispatch should pass");
        dispatcher
            .try_dispatch(ReadTask::new(fixture.handle.clone(), reserved))
            .expect("dispatch should pass");
        drop(dispatcher);
        pool.shutdown();

        assert_eq!(fixture.handle.queued_buffers(), 0);
        assert!(store
            .seen
            .lock()
            .expect("recording store mutex poisoned")
            .is_empty());
        let lines = sink.snapshot();
        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|line| line.contains("Dropping undecodable frame")));
    }

    #[test]
    fn length_prefixed_responses_carry_a_header() {
        let fixture = fixture();
        let (logger, _sink) = memory_logger(LogLevel::Error);
        let pool = WorkerPool::start(
            config(FramingMode::LengthPrefixed, 1, 0),
            Arc::new(RecordingStore::default()),
            fixture.outbound.clone(),
            logger,
        )
        .expect("pool should start");

        let dispatcher = pool.dispatcher();
        dispatcher
            .try_dispatch(ReadTask::new(
                fixture.handle.clone(),
                encode_request(&Request::create_queue(9, 1, 1)).expect("encode"),
            ))
            .expect("dispatch should pass");
        wait_for_buffers(&fixture.handle, 1);
        drop(dispatcher);
        pool.shutdown();

        let frame = &queued_frames(&fixture.handle)[0];
        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert_eq!(declared, frame.len() - FRAME_HEADER_SIZE_BYTES);
        let response =
            decode_response(&frame[FRAME_HEADER_SIZE_BYTES..]).expect("response should decode");
        assert_eq!(response.request_id, 9);
    }

    fn single_response(store: Arc<dyn Store>, config: WorkerPoolConfig, request: &Request) -> Vec<u8> {
        let fixture = fixture();
        let (logger, _sink) = memory_logger(LogLevel::Error);
        let pool = WorkerPool::start(config, store, fixture.outbound.clone(), logger)
            .expect("pool should start");

        let dispatcher = pool.dispatcher();
        dispatcher
            .try_dispatch(ReadTask::new(
                fixture.handle.clone(),
                encode_request(request).expect("request should encode"),
            ))
            .expect("dispatch should pass");
        wait_for_buffers(&fixture.handle, 1);
        drop(dispatcher);
        pool.shutdown();

        queued_frames(&fixture.handle).remove(0)
    }

    #[test]
    fn unencodable_response_becomes_execution_error() {
        let request = Request::read_from_queue(23, 4, 6, true);
        let frame = single_response(
            Arc::new(OversizedStore),
            config(FramingMode::SingleRead, 1, 0),
            &request,
        );

        let response = decode_response(&frame).expect("fallback should decode");
        assert_eq!(response.request_id, 23);
        assert_eq!(response.request_type, RequestType::ReadFromQueueWithDelete);
        assert_eq!(response.error_kind, ErrorKind::ExecutionError);
        assert_eq!(response.message_id, NO_MESSAGE_ID);
        assert!(response.retrieved_message.is_empty());
    }

    #[test]
    fn response_over_frame_limit_becomes_execution_error() {
        let mut config = config(FramingMode::LengthPrefixed, 1, 0);
        config.max_frame_size = 30;
        let request = Request::send_message(31, 4, None, 6, "twenty characters...");
        let frame = single_response(Arc::new(RecordingStore::default()), config, &request);

        let declared = u32::from_be_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
        assert!(declared <= 30);
        let response =
            decode_response(&frame[FRAME_HEADER_SIZE_BYTES..]).expect("fallback should decode");
        assert_eq!(response.request_id, 31);
        assert_eq!(response.error_kind, ErrorKind::ExecutionError);
    }

    #[test]
    fn bounded_queue_reports_saturation() {
        let fixture = fixture();
        let (entered_tx, entered_rx) = unbounded();
        let (release_tx, release_rx) = unbounded();
        let (logger, _sink) = memory_logger(LogLevel::Error);
        let pool = WorkerPool::start(
            config(FramingMode::SingleRead, 1, 1),
            Arc::new(GatedStore {
                entered: entered_tx,
                release: release_rx,
            }),
            fixture.outbound.clone(),
            logger,
        )
        .expect("pool should start");

        let frame = encode_request(&Request::create_queue(1, 1, 1)).expect("encode");
        let dispatcher = pool.dispatcher();
        dispatcher
            .try_dispatch(ReadTask::new(fixture.handle.clone(), frame.clone()))
            .expect("first dispatch should pass");
        entered_rx
            .recv_timeout(Duration::from_secs(5))
            .expect("worker should pick up the first task");

        dispatcher
            .try_dispatch(ReadTask::new(fixture.handle.clone(), frame.clone()))
            .expect("second dispatch should queue");
        assert_eq!(dispatcher.queued(), 1);
        assert_eq!(
            dispatcher
                .try_dispatch(ReadTask::new(fixture.handle.clone(), frame))
                .expect_err("third dispatch should be rejected"),
            DispatchError::Saturated { capacity: 1 }
        );

        release_tx.send(()).expect("release first");
        release_tx.send(()).expect("release second");
        drop(dispatcher);
        pool.shutdown();
        assert_eq!(fixture.handle.queued_buffers(), 2);
    }

    #[test]
    fn dispatch_without_workers_reports_stopped() {
        let fixture = fixture();
        let (sender, receiver) = bounded::<super::ReadTask>(4);
        drop(receiver);
        let dispatcher = Dispatcher { sender };
        assert_eq!(
            dispatcher
                .try_dispatch(ReadTask::new(fixture.handle.clone(), vec![1]))
                .expect_err("dispatch should fail"),
            DispatchError::Stopped
        );
    }

    #[test]
    fn rejects_empty_pool() {
        let fixture = fixture();
        let (logger, _sink) = memory_logger(LogLevel::Error);
        assert!(WorkerPool::start(
            config(FramingMode::SingleRead, 0, 0),
            Arc::new(RecordingStore::default()),
            fixture.outbound.clone(),
            logger,
        )
        .is_err());
    }
}
