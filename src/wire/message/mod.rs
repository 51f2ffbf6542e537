use std::fmt;

/// Receiver id meaning "no specific receiver".
pub const NO_RECEIVER: i32 = -1;
/// Message id reported when an operation has no message to point at.
pub const NO_MESSAGE_ID: i32 = -1;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RequestType {
    SendMessage,
    ReceiveFromReceiver,
    ReadFromQueue,
    ReadFromQueueWithDelete,
    QueryQueueForReceiver,
    CreateQueue,
    DeleteQueue,
}

impl RequestType {
    pub const ALL: [RequestType; 7] = [
        Self::SendMessage,
        Self::ReceiveFromReceiver,
        Self::ReadFromQueue,
        Self::ReadFromQueueWithDelete,
        Self::QueryQueueForReceiver,
        Self::CreateQueue,
        Self::DeleteQueue,
    ];

    // Code 2 is reserved on the wire and intentionally has no variant.
    pub const fn code(self) -> i32 {
        match self {
            Self::SendMessage => 0,
            Self::ReceiveFromReceiver => 1,
            Self::ReadFromQueue => 3,
            Self::ReadFromQueueWithDelete => 4,
            Self::QueryQueueForReceiver => 5,
            Self::CreateQueue => 6,
            Self::DeleteQueue => 7,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "send_message",
            Self::ReceiveFromReceiver => "receive_from_receiver",
            Self::ReadFromQueue => "read_from_queue",
            Self::ReadFromQueueWithDelete => "read_from_queue_with_delete",
            Self::QueryQueueForReceiver => "query_queue_for_receiver",
            Self::CreateQueue => "create_queue",
            Self::DeleteQueue => "delete_queue",
        }
    }

    pub fn carries_message(self) -> bool {
        matches!(self, Self::SendMessage)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NoError,
    ExecutionError,
    NotFound,
    ConstraintViolation,
}

impl ErrorKind {
    pub const fn code(self) -> i32 {
        match self {
            Self::NoError => 0,
            Self::ExecutionError => 1,
            Self::NotFound => 2,
            Self::ConstraintViolation => 3,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::NoError),
            1 => Some(Self::ExecutionError),
            2 => Some(Self::NotFound),
            3 => Some(Self::ConstraintViolation),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::NoError => "no_error",
            Self::ExecutionError => "execution_error",
            Self::NotFound => "not_found",
            Self::ConstraintViolation => "constraint_violation",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    pub request_id: i32,
    pub request_type: RequestType,
    pub sender_id: i32,
    pub receiver_id: i32,
    pub queue_id: i32,
    pub message: Option<String>,
}

impl Request {
    fn bare(request_id: i32, request_type: RequestType, sender_id: i32) -> Self {
        Self {
            request_id,
            request_type,
            sender_id,
            receiver_id: NO_RECEIVER,
            queue_id: 0,
            message: None,
        }
    }

    pub fn send_message(
        request_id: i32,
        sender_id: i32,
        receiver_id: Option<i32>,
        queue_id: i32,
        message: impl Into<String>,
    ) -> Self {
        Self {
            receiver_id: receiver_id.unwrap_or(NO_RECEIVER),
            queue_id,
            message: Some(message.into()),
            ..Self::bare(request_id, RequestType::SendMessage, sender_id)
        }
    }

    pub fn receive_from_receiver(request_id: i32, sender_id: i32, receiver_id: i32) -> Self {
        Self {
            receiver_id,
            ..Self::bare(request_id, RequestType::ReceiveFromReceiver, sender_id)
        }
    }

    pub fn read_from_queue(request_id: i32, sender_id: i32, queue_id: i32, delete: bool) -> Self {
        let request_type = if delete {
            RequestType::ReadFromQueueWithDelete
        } else {
            RequestType::ReadFromQueue
        };
        Self {
            queue_id,
            ..Self::bare(request_id, request_type, sender_id)
        }
    }

    pub fn query_queue_for_receiver(request_id: i32, sender_id: i32, receiver_id: i32) -> Self {
        Self {
            receiver_id,
            ..Self::bare(request_id, RequestType::QueryQueueForReceiver, sender_id)
        }
    }

    pub fn create_queue(request_id: i32, sender_id: i32, queue_id: i32) -> Self {
        Self {
            queue_id,
            ..Self::bare(request_id, RequestType::CreateQueue, sender_id)
        }
    }

    pub fn delete_queue(request_id: i32, sender_id: i32, queue_id: i32) -> Self {
        Self {
            queue_id,
            ..Self::bare(request_id, RequestType::DeleteQueue, sender_id)
        }
    }

    pub fn receiver(&self) -> Option<i32> {
        (self.receiver_id != NO_RECEIVER).then_some(self.receiver_id)
    }

    pub fn message_body(&self) -> &str {
        self.message.as_deref().unwrap_or_default()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Response {
    pub error_kind: ErrorKind,
    pub request_id: i32,
    pub request_type: RequestType,
    pub message_id: i32,
    pub retrieved_message: String,
    pub store_execution_time_millis: f64,
}

impl Response {
    pub fn for_request(request: &Request, error_kind: ErrorKind) -> Self {
        Self {
            error_kind,
            request_id: request.request_id,
            request_type: request.request_type,
            message_id: NO_MESSAGE_ID,
            retrieved_message: String::new(),
            store_execution_time_millis: 0.0,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error_kind == ErrorKind::NoError
    }
}
