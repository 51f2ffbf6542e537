use std::fmt;
use std::io::{self, Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use crate::wire::codec::{
    decode_response, encode_request, response_frame_len, CodecError, RESPONSE_HEADER_SIZE_BYTES,
    STRING_LENGTH_SIZE_BYTES,
};
use crate::wire::frame::{
    FrameError, FramingMode, DEFAULT_MAX_FRAME_SIZE_BYTES, FRAME_HEADER_SIZE_BYTES,
};
use crate::wire::message::{Request, Response};

#[derive(Debug)]
pub enum ClientError {
    Connect { address: String, source: io::Error },
    Io(io::Error),
    ConnectionClosed,
    Codec(CodecError),
    Frame(FrameError),
    CorrelationMismatch { expected: i32, received: i32 },
}

impl fmt::Display for ClientError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect { address, source } => {
                write!(f, "failed to connect to {address}: {source}")
            }
            Self::Io(source) => write!(f, "socket error: {source}"),
            Self::ConnectionClosed => write!(f, "server closed the connection"),
            Self::Codec(source) => write!(f, "{source}"),
            Self::Frame(source) => write!(f, "{source}"),
            Self::CorrelationMismatch { expected, received } => write!(
                f,
                "response for request {received} arrived while waiting for request {expected}"
            ),
        }
    }
}

impl std::error::Error for ClientError {}

impl From<io::Error> for ClientError {
    fn from(source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::UnexpectedEof {
            return Self::ConnectionClosed;
        }
        Self::Io(source)
    }
}

impl From<CodecError> for ClientError {
    fn from(source: CodecError) -> Self {
        Self::Codec(source)
    }
}

impl From<FrameError> for ClientError {
    fn from(source: FrameError) -> Self {
        Self::Frame(source)
    }
}

/// Blocking request/response client. One request is in flight at a time,
/// so every response must echo the id of the request just sent.
pub struct Client {
    stream: TcpStream,
    client_id: i32,
    next_request_id: i32,
    framing: FramingMode,
    max_frame_size: usize,
}

impl Client {
    pub fn connect(
        addr: impl ToSocketAddrs,
        client_id: i32,
        framing: FramingMode,
    ) -> Result<Self, ClientError> {
        let addrs: Vec<SocketAddr> = addr.to_socket_addrs()?.collect();
        let address = addrs
            .iter()
            .map(SocketAddr::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let stream = TcpStream::connect(addrs.as_slice())
            .map_err(|source| ClientError::Connect { address, source })?;
        stream.set_nodelay(true)?;

        Ok(Self {
            stream,
            client_id,
            next_request_id: 0,
            framing,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE_BYTES,
        })
    }

    pub fn client_id(&self) -> i32 {
        self.client_id
    }

    pub fn set_read_timeout(&self, timeout: Option<Duration>) -> Result<(), ClientError> {
        self.stream.set_read_timeout(timeout)?;
        Ok(())
    }

    pub fn send_message(
        &mut self,
        receiver_id: Option<i32>,
        queue_id: i32,
        message: &str,
    ) -> Result<Response, ClientError> {
        let request_id = self.allocate_request_id();
        self.execute(Request::send_message(
            request_id,
            self.client_id,
            receiver_id,
            queue_id,
            message,
        ))
    }

    pub fn receive_from_receiver(&mut self, receiver_id: i32) -> Result<Response, ClientError> {
        let request_id = self.allocate_request_id();
        self.execute(Request::receive_from_receiver(
            request_id,
            self.client_id,
            receiver_id,
        ))
    }

    pub fn read_from_queue(&mut self, queue_id: i32) -> Result<Response, ClientError> {
        let request_id = self.allocate_request_id();
        self.execute(Request::read_from_queue(
            request_id,
            self.client_id,
            queue_id,
            false,
        ))
    }

    pub fn read_from_queue_with_delete(&mut self, queue_id: i32) -> Result<Response, ClientError> {
        let request_id = self.allocate_request_id();
        self.execute(Request::read_from_queue(
            request_id,
            self.client_id,
            queue_id,
            true,
        ))
    }

    pub fn query_queue_for_receiver(&mut self, receiver_id: i32) -> Result<Response, ClientError> {
        let request_id = self.allocate_request_id();
        self.execute(Request::query_queue_for_receiver(
            request_id,
            self.client_id,
            receiver_id,
        ))
    }

    pub fn create_queue(&mut self, queue_id: i32) -> Result<Response, ClientError> {
        let request_id = self.allocate_request_id();
        self.execute(Request::create_queue(request_id, self.client_id, queue_id))
    }

    pub fn delete_queue(&mut self, queue_id: i32) -> Result<Response, ClientError> {
        let request_id = self.allocate_request_id();
        self.execute(Request::delete_queue(request_id, self.client_id, queue_id))
    }

    pub fn execute(&mut self, request: Request) -> Result<Response, ClientError> {
        let frame = self
            .framing
            .wrap(encode_request(&request)?, self.max_frame_size)?;
        self.stream.write_all(&frame)?;

        let response = decode_response(&self.read_response_frame()?)?;
        if response.request_id != request.request_id {
            return Err(ClientError::CorrelationMismatch {
                expected: request.request_id,
                received: response.request_id,
            });
        }
        Ok(response)
    }

    fn allocate_request_id(&mut self) -> i32 {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1);
        request_id
    }

    fn read_response_frame(&mut self) -> Result<Vec<u8>, ClientError> {
        match self.framing {
            FramingMode::SingleRead => {
                let mut frame = vec![0_u8; RESPONSE_HEADER_SIZE_BYTES + STRING_LENGTH_SIZE_BYTES];
                self.stream.read_exact(&mut frame)?;
                let header_len = frame.len();
                let total = response_frame_len(&frame).unwrap_or(header_len);
                frame.resize(total, 0);
                self.stream.read_exact(&mut frame[header_len..])?;
                Ok(frame)
            }
            FramingMode::LengthPrefixed => {
                let mut header = [0_u8; FRAME_HEADER_SIZE_BYTES];
                self.stream.read_exact(&mut header)?;
                let declared = u32::from_be_bytes(header) as usize;
                if declared == 0 {
                    return Err(FrameError::ZeroLength.into());
                }
                if declared > self.max_frame_size {
                    return Err(FrameError::TooLarge {
                        length: declared,
                        limit: self.max_frame_size,
                    }
                    .into());
                }
                let mut payload = vec![0_u8; declared];
                self.stream.read_exact(&mut payload)?;
                Ok(payload)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{Read, Write};
    use std::net::TcpListener;
    use std::thread;

    use crate::wire::codec::{decode_request, encode_response, REQUEST_HEADER_SIZE_BYTES};
    use crate::wire::frame::FramingMode;
    use crate::wire::message::{ErrorKind, RequestType, Response};

    use super::{Client, ClientError};

    fn scripted_server(count: usize, id_offset: i32) -> (std::net::SocketAddr, thread::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("listener should bind");
        let addr = listener.local_addr().expect("local addr");
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().expect("accept should pass");
            for _ in 0..count {
                let mut frame = vec![0_u8; REQUEST_HEADER_SIZE_BYTES];
                stream.read_exact(&mut frame).expect("request header");
                let request = decode_request(&frame).expect("request should decode");
                let mut response = Response::for_request(&request, ErrorKind::NoError);
                response.request_id += id_offset;
                response.retrieved_message = format!("queue {}", request.queue_id);
                stream
                    .write_all(&encode_response(&response).expect("encode"))
                    .expect("response write");
            }
        });
        (addr, handle)
    }

    #[test]
    fn request_ids_increase_and_sender_is_client_id() {
        let (addr, server) = scripted_server(2, 0);
        let mut client = Client::connect(addr, 42, FramingMode::SingleRead).expect("connect");
        assert_eq!(client.client_id(), 42);

        let first = client.create_queue(3).expect("first response");
        let second = client.read_from_queue(4).expect("second response");
        assert_eq!(first.request_id, 0);
        assert_eq!(first.request_type, RequestType::CreateQueue);
        assert_eq!(second.request_id, 1);
        assert_eq!(second.retrieved_message, "queue 4");

        server.join().expect("server should finish");
    }

    #[test]
    fn mismatched_response_id_is_reported() {
        let (addr, server) = scripted_server(1, 5);
        let mut client = Client::connect(addr, 1, FramingMode::SingleRead).expect("connect");

        let error = client.delete_queue(9).expect_err("mismatch should fail");
        assert!(matches!(
            error,
            ClientError::CorrelationMismatch {
                expected: 0,
                received: 5
            }
        ));

        server.join().expect("server should finish");
    }

    #[test]
    fn closed_connection_is_reported() {
        let (addr, server) = scripted_server(0, 0);
        let mut client = Client::connect(addr, 1, FramingMode::SingleRead).expect("connect");
        server.join().expect("server should finish");

        let error = client.create_queue(1).expect_err("closed socket should fail");
        assert!(matches!(
            error,
            ClientError::ConnectionClosed | ClientError::Io(_)
        ));
    }
}
