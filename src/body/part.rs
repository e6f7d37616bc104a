use std::fmt;
use std::sync::{Arc, Mutex};

use crate::stream::{credit_channel, CreditReceiver, CreditSender, Disconnected};

/// One multipart form field exposed to a handler as its own backpressured
/// sub-stream.
///
/// The body processor feeds a part chunk by chunk as the field's slices
/// arrive; the handler pulls at its own pace, and that demand is what
/// advances the underlying body stream. A part lives only while its
/// enclosing request body is being consumed and is completed when the
/// upload finishes or the body stream terminates.
pub struct Part {
    name: Arc<str>,
    rx: Mutex<CreditReceiver<Vec<u8>>>,
}

impl Part {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Pull the next slice of the upload. `None` once the field is
    /// complete.
    pub fn pull(&self) -> Option<Vec<u8>> {
        self.rx.lock().unwrap().pull()
    }

    /// Drain the remaining slices into one buffer.
    pub fn collect(&self) -> Vec<u8> {
        let mut out = Vec::new();
        while let Some(chunk) = self.pull() {
            out.extend_from_slice(&chunk);
        }
        out
    }
}

impl fmt::Debug for Part {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Part").field("name", &self.name).finish()
    }
}

/// Feeding side of a part, held by the body processor. Dropping it
/// completes the part.
pub struct PartSender {
    name: Arc<str>,
    tx: CreditSender<Vec<u8>>,
}

impl PartSender {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Deliver one slice, blocking until the part's consumer asks for it.
    /// Fails once the consumer has let go of the part.
    pub fn send(&self, data: Vec<u8>) -> Result<(), Disconnected> {
        self.tx.send(data)
    }

    /// Enqueue a slice without waiting for demand. Used for slices that
    /// arrive before the route has become executable, while no handler is
    /// pulling yet.
    pub fn prime(&self, data: Vec<u8>) -> Result<(), Disconnected> {
        self.tx.push(data)
    }
}

/// Create the sub-stream for one named field.
pub fn channel(name: &str) -> (PartSender, Part) {
    let name: Arc<str> = Arc::from(name);
    let (tx, rx) = credit_channel();
    (
        PartSender {
            name: Arc::clone(&name),
            tx,
        },
        Part {
            name,
            rx: Mutex::new(rx),
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_part_collects_slices_until_sender_drops() {
        let (tx, part) = channel("avatar");
        let handle = may::go!(move || {
            tx.send(b"ab".to_vec()).unwrap();
            tx.send(b"cd".to_vec()).unwrap();
        });
        assert_eq!(part.collect(), b"abcd");
        handle.join().unwrap();
    }

    #[test]
    fn test_send_fails_after_consumer_drops_part() {
        let (tx, part) = channel("avatar");
        drop(part);
        assert!(tx.send(b"x".to_vec()).is_err());
    }
}
