//! The client side of one request/reply exchange.

use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use log::debug;

use crate::error::FsError;
use crate::transport::Transport;

use super::record::{OpCode, WireRecord};

/// How long to wait for a reply and how often to retransmit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Wait per attempt.
    /// Default: 3 s
    pub timeout: Duration,
    /// Attempts before giving up, `None` to retry forever.
    /// Default: 5
    pub max_attempts: Option<u32>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(3),
            max_attempts: Some(5),
        }
    }
}

impl RetryPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// At least one attempt is always made.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = Some(max_attempts.max(1));
        self
    }

    pub fn retry_forever(mut self) -> Self {
        self.max_attempts = None;
        self
    }
}

/// Sends `request` to `server` until a reply arrives or the policy runs out of attempts.
///
/// Retransmissions are byte-identical and carry no sequence number, so the server may apply a
/// request more than once.
pub fn round_trip<T: Transport>(
    transport: &T,
    server: &T::Addr,
    request: &[u8],
    policy: &RetryPolicy,
) -> Result<WireRecord> {
    let mut attempt: u32 = 0;

    loop {
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            debug!("no reply from {server:?} after {attempt} attempts");
            bail!(FsError::TransportFailure);
        }
        attempt += 1;
        if attempt > 1 {
            debug!("retransmitting to {server:?} (attempt {attempt})");
        }

        transport.send(server, request)?;
        if let Some(reply) = wait_for_reply(transport, server, policy.timeout)? {
            return Ok(reply);
        }
    }
}

/// Waits out one attempt, skipping anything that is not a reply from `server`.
fn wait_for_reply<T: Transport>(
    transport: &T,
    server: &T::Addr,
    timeout: Duration,
) -> Result<Option<WireRecord>> {
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Ok(None);
        }

        let Some((bytes, from)) = transport.recv(Some(remaining))? else {
            return Ok(None);
        };
        if from != *server {
            debug!("ignoring datagram from {from:?}");
            continue;
        }

        match WireRecord::decode(&bytes) {
            Ok(record) if record.op() == Ok(OpCode::Feedback) => return Ok(Some(record)),
            Ok(record) => debug!("ignoring non-reply record {:?}", record.header),
            Err(err) => debug!("ignoring malformed reply: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, collections::VecDeque};

    use super::*;

    const SERVER: u8 = 1;

    /// Plays back a fixed sequence of receive results. `None` entries, and the end of the
    /// script, time out.
    struct Scripted {
        script: RefCell<VecDeque<Option<(Vec<u8>, u8)>>>,
        sent: RefCell<Vec<Vec<u8>>>,
    }

    impl Scripted {
        fn new(script: impl IntoIterator<Item = Option<(Vec<u8>, u8)>>) -> Self {
            Self {
                script: RefCell::new(script.into_iter().collect()),
                sent: RefCell::new(vec![]),
            }
        }

        fn sent(&self) -> usize {
            self.sent.borrow().len()
        }
    }

    impl Transport for Scripted {
        type Addr = u8;

        fn send(&self, to: &u8, bytes: &[u8]) -> Result<()> {
            assert_eq!(*to, SERVER);
            self.sent.borrow_mut().push(bytes.to_vec());
            Ok(())
        }

        fn recv(&self, _timeout: Option<Duration>) -> Result<Option<(Vec<u8>, u8)>> {
            Ok(self.script.borrow_mut().pop_front().flatten())
        }
    }

    fn reply(node_num: i32) -> Vec<u8> {
        let mut record = WireRecord::new(OpCode::Feedback);
        record.header.node_num = node_num;
        record.encode().unwrap()
    }

    fn policy() -> RetryPolicy {
        RetryPolicy::new().with_timeout(Duration::from_secs(1))
    }

    #[test]
    fn test_first_attempt() {
        let transport = Scripted::new([Some((reply(4), SERVER))]);
        let record = round_trip(&transport, &SERVER, b"req", &policy()).unwrap();

        assert_eq!(record.header.node_num, 4);
        assert_eq!(transport.sent(), 1);
    }

    #[test]
    fn test_retransmits_identical_request() {
        let transport = Scripted::new([None, None, Some((reply(0), SERVER))]);
        round_trip(&transport, &SERVER, b"req", &policy()).unwrap();

        assert_eq!(transport.sent(), 3);
        assert!(transport.sent.borrow().iter().all(|sent| sent == b"req"));
    }

    #[test]
    fn test_gives_up() {
        let transport = Scripted::new([]);
        let err = round_trip(&transport, &SERVER, b"req", &policy().with_max_attempts(4))
            .unwrap_err();

        assert_eq!(FsError::of(&err), Some(FsError::TransportFailure));
        assert_eq!(transport.sent(), 4);
    }

    #[test]
    fn test_retry_forever() {
        let mut script = vec![None; 20];
        script.push(Some((reply(0), SERVER)));
        let transport = Scripted::new(script);

        round_trip(&transport, &SERVER, b"req", &policy().retry_forever()).unwrap();
        assert_eq!(transport.sent(), 21);
    }

    #[test]
    fn test_ignores_strays() {
        let request = WireRecord::new(OpCode::Lookup).encode().unwrap();
        let transport = Scripted::new([
            Some((reply(7), 9)),
            Some((vec![0; 12], SERVER)),
            Some((request, SERVER)),
            Some((reply(2), SERVER)),
        ]);

        let record = round_trip(&transport, &SERVER, b"req", &policy()).unwrap();
        assert_eq!(record.header.node_num, 2);
        assert_eq!(transport.sent(), 1);
    }
}
