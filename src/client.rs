//! Blocking access to a remote image.

use std::{
    fmt,
    net::{Ipv4Addr, Ipv6Addr, SocketAddr, ToSocketAddrs},
};

use anyhow::{Context, Result};
use log::debug;

use crate::disk_format::inode::InodeType;
use crate::mfs::{InodeNumber, Stat};
use crate::protocol::{round_trip, Request, Response, RetryPolicy};
use crate::transport::{Transport, UdpTransport};

/// Returned by every client operation that did not succeed, whatever the cause.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RequestFailed;

impl fmt::Display for RequestFailed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "request failed")
    }
}

impl std::error::Error for RequestFailed {}

pub struct Client<T: Transport = UdpTransport> {
    transport: T,
    server: T::Addr,
    policy: RetryPolicy,
}

impl Client<UdpTransport> {
    /// Resolves the server, preferring an IPv4 address, and binds an ephemeral local port of
    /// the same address family.
    pub fn connect(host: &str, port: u16) -> Result<Self> {
        let addrs: Vec<SocketAddr> = (host, port)
            .to_socket_addrs()
            .with_context(|| format!("unable to resolve {host}"))?
            .collect();
        let server = addrs
            .iter()
            .find(|addr| addr.is_ipv4())
            .or_else(|| addrs.first())
            .copied()
            .with_context(|| format!("{host} has no addresses"))?;

        let local: SocketAddr = if server.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        Ok(Self::new(
            UdpTransport::bind(local)?,
            server,
            RetryPolicy::default(),
        ))
    }
}

impl<T: Transport> Client<T> {
    pub fn new(transport: T, server: T::Addr, policy: RetryPolicy) -> Self {
        Self {
            transport,
            server,
            policy,
        }
    }

    #[must_use]
    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn lookup(&self, parent: InodeNumber, name: &str) -> Result<InodeNumber, RequestFailed> {
        match self.call(Request::Lookup {
            parent,
            name: name.to_owned(),
        })? {
            Response::Inode(inum) => Ok(inum),
            other => unexpected(other),
        }
    }

    pub fn stat(&self, inum: InodeNumber) -> Result<Stat, RequestFailed> {
        match self.call(Request::Stat { inum })? {
            Response::Stat(stat) => Ok(stat),
            other => unexpected(other),
        }
    }

    pub fn write(&self, inum: InodeNumber, offset: usize, data: &[u8]) -> Result<(), RequestFailed> {
        self.call(Request::Write {
            inum,
            offset,
            data: data.to_vec(),
        })
        .map(drop)
    }

    pub fn read(&self, inum: InodeNumber, offset: usize, len: usize) -> Result<Vec<u8>, RequestFailed> {
        match self.call(Request::Read { inum, offset, len })? {
            Response::Data(data) => Ok(data),
            other => unexpected(other),
        }
    }

    /// Succeeds without creating anything if `name` already exists. Use
    /// [`lookup`](Self::lookup) to find the inode number.
    pub fn create(
        &self,
        parent: InodeNumber,
        type_: InodeType,
        name: &str,
    ) -> Result<(), RequestFailed> {
        self.call(Request::Create {
            parent,
            type_,
            name: name.to_owned(),
        })
        .map(drop)
    }

    pub fn unlink(&self, parent: InodeNumber, name: &str) -> Result<(), RequestFailed> {
        self.call(Request::Unlink {
            parent,
            name: name.to_owned(),
        })
        .map(drop)
    }

    /// Asks the server to flush the image and exit.
    pub fn shutdown(&self) -> Result<(), RequestFailed> {
        self.call(Request::Shutdown).map(drop)
    }

    /// Checks that the server answers.
    pub fn ping(&self) -> Result<(), RequestFailed> {
        self.call(Request::Ping).map(drop)
    }

    fn call(&self, request: Request) -> Result<Response, RequestFailed> {
        match self.exchange(&request) {
            Ok(Response::Failed) => {
                debug!("{:?} failed on the server", request.op());
                Err(RequestFailed)
            }
            Ok(response) => Ok(response),
            Err(err) => {
                debug!("{:?} failed: {err:#}", request.op());
                Err(RequestFailed)
            }
        }
    }

    fn exchange(&self, request: &Request) -> Result<Response> {
        let bytes = request.to_record()?.encode()?;
        let reply = round_trip(&self.transport, &self.server, &bytes, &self.policy)?;
        request.parse_response(&reply)
    }
}

fn unexpected<R>(response: Response) -> Result<R, RequestFailed> {
    debug!("unexpected reply {response:?}");
    Err(RequestFailed)
}
