//! Best-effort datagram delivery.

use std::{
    fmt::Debug,
    io::ErrorKind,
    net::{SocketAddr, ToSocketAddrs, UdpSocket},
    time::Duration,
};

use anyhow::{ensure, Context, Result};

/// Larger than any datagram the protocol sends, so oversized ones are seen whole and rejected.
const RECV_BUFFER_SIZE: usize = 65536;

/// Sends and receives whole datagrams. Delivery may drop, duplicate or reorder them.
pub trait Transport {
    type Addr: Clone + PartialEq + Debug;

    fn send(&self, to: &Self::Addr, bytes: &[u8]) -> Result<()>;

    /// Waits up to `timeout` (forever if `None`) for one datagram. `Ok(None)` means the wait
    /// timed out.
    fn recv(&self, timeout: Option<Duration>) -> Result<Option<(Vec<u8>, Self::Addr)>>;
}

pub struct UdpTransport(UdpSocket);

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        let socket = UdpSocket::bind(addr).context("unable to bind UDP socket")?;
        Ok(Self(socket))
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.0.local_addr()?)
    }
}

impl Transport for UdpTransport {
    type Addr = SocketAddr;

    fn send(&self, to: &SocketAddr, bytes: &[u8]) -> Result<()> {
        let sent = self
            .0
            .send_to(bytes, to)
            .with_context(|| format!("sending to {to}"))?;
        ensure!(sent == bytes.len(), "short send to {to}: {sent} of {} bytes", bytes.len());

        Ok(())
    }

    fn recv(&self, timeout: Option<Duration>) -> Result<Option<(Vec<u8>, SocketAddr)>> {
        // a zero timeout is rejected by the socket
        let timeout = timeout.map(|timeout| timeout.max(Duration::from_millis(1)));
        self.0.set_read_timeout(timeout)?;

        let mut buf = vec![0; RECV_BUFFER_SIZE];
        match self.0.recv_from(&mut buf) {
            Ok((len, from)) => {
                buf.truncate(len);
                Ok(Some((buf, from)))
            }
            Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Ok(None)
            }
            Err(err) => Err(err).context("receiving datagram"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback() {
        let a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let b = UdpTransport::bind("127.0.0.1:0").unwrap();

        a.send(&b.local_addr().unwrap(), b"hello").unwrap();
        let (bytes, from) = b.recv(Some(Duration::from_secs(5))).unwrap().unwrap();

        assert_eq!(bytes, b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[test]
    fn test_timeout() {
        let a = UdpTransport::bind("127.0.0.1:0").unwrap();
        assert!(a.recv(Some(Duration::from_millis(20))).unwrap().is_none());
    }
}
