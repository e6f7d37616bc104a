#![allow(dead_code)]

//! Shared helpers for the pipeline integration tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use conveyor::server::{Channel, ChannelError, ResponseHead};

/// Configure the coroutine runtime and logging once per test process.
pub fn setup() {
    may::config().set_stack_size(0x10000);
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

/// Everything the pipeline wrote to the transport, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteEvent {
    Full {
        status: u16,
        headers: Vec<(String, String)>,
        body: Vec<u8>,
    },
    Begin {
        status: u16,
        headers: Vec<(String, String)>,
    },
    Chunk(Vec<u8>),
    End,
    Close,
}

/// Channel implementation that records writes for assertions. Can be told
/// to fail writes to exercise the transport-failure policy.
pub struct RecordingChannel {
    events: Mutex<Vec<WriteEvent>>,
    writable: AtomicBool,
    fail_with_io: AtomicBool,
    fail_with_closed: AtomicBool,
}

impl RecordingChannel {
    pub fn new() -> Self {
        RecordingChannel {
            events: Mutex::new(Vec::new()),
            writable: AtomicBool::new(true),
            fail_with_io: AtomicBool::new(false),
            fail_with_closed: AtomicBool::new(false),
        }
    }

    pub fn events(&self) -> Vec<WriteEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn closed(&self) -> bool {
        self.events().contains(&WriteEvent::Close)
    }

    /// Make subsequent writes fail with an I/O error; `writable` controls
    /// what the writer sees when it probes the channel afterwards.
    pub fn fail_writes(&self, writable_after: bool) {
        self.fail_with_io.store(true, Ordering::SeqCst);
        self.writable.store(writable_after, Ordering::SeqCst);
    }

    /// Make subsequent writes report a closed peer.
    pub fn disconnect_peer(&self) {
        self.fail_with_closed.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ChannelError> {
        if self.fail_with_closed.load(Ordering::SeqCst) {
            return Err(ChannelError::Closed);
        }
        if self.fail_with_io.load(Ordering::SeqCst) {
            return Err(ChannelError::Io("injected write failure".to_string()));
        }
        Ok(())
    }

    fn record(&self, event: WriteEvent) {
        self.events.lock().unwrap().push(event);
    }

    fn header_pairs(head: &ResponseHead) -> Vec<(String, String)> {
        head.headers
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }
}

impl Default for RecordingChannel {
    fn default() -> Self {
        Self::new()
    }
}

impl Channel for RecordingChannel {
    fn write_full(&self, head: ResponseHead, body: Vec<u8>) -> Result<(), ChannelError> {
        self.check()?;
        self.record(WriteEvent::Full {
            status: head.status.as_u16(),
            headers: Self::header_pairs(&head),
            body,
        });
        Ok(())
    }

    fn begin_chunked(&self, head: ResponseHead) -> Result<(), ChannelError> {
        self.check()?;
        self.record(WriteEvent::Begin {
            status: head.status.as_u16(),
            headers: Self::header_pairs(&head),
        });
        Ok(())
    }

    fn write_chunk(&self, data: Vec<u8>) -> Result<(), ChannelError> {
        self.check()?;
        self.record(WriteEvent::Chunk(data));
        Ok(())
    }

    fn end_chunked(&self) -> Result<(), ChannelError> {
        self.check()?;
        self.record(WriteEvent::End);
        Ok(())
    }

    fn is_writable(&self) -> bool {
        self.writable.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.record(WriteEvent::Close);
    }
}

/// Convenience accessors over recorded events.
pub fn full_responses(events: &[WriteEvent]) -> Vec<(u16, Vec<(String, String)>, Vec<u8>)> {
    events
        .iter()
        .filter_map(|e| match e {
            WriteEvent::Full {
                status,
                headers,
                body,
            } => Some((*status, headers.clone(), body.clone())),
            _ => None,
        })
        .collect()
}

pub fn header<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}
