use anyhow::{Context, Result};
use log::{debug, info, warn};

use crate::mfs::{Created, Mfs};
use crate::protocol::{DecodeError, Request, Response, WireRecord};
use crate::storage::MfsStorage;
use crate::transport::Transport;

/// Serves one image to any number of clients, one request at a time.
pub struct Server<S: MfsStorage, T: Transport> {
    mfs: Mfs<S>,
    transport: T,
}

impl<S: MfsStorage, T: Transport> Server<S, T> {
    pub fn new(mfs: Mfs<S>, transport: T) -> Self {
        Self { mfs, transport }
    }

    /// Answers requests until a shutdown request arrives. Returns an error for a request with
    /// an unknown operation code.
    pub fn run(&mut self) -> Result<()> {
        info!("waiting for requests");

        loop {
            let Some((bytes, from)) = self.transport.recv(None)? else {
                continue;
            };

            let record = match WireRecord::decode(&bytes) {
                Ok(record) => record,
                Err(err) => {
                    warn!("dropping datagram from {from:?}: {err}");
                    continue;
                }
            };

            let request = match Request::try_from(&record) {
                Ok(request) => Some(request),
                Err(err) if err.downcast_ref::<DecodeError>().is_some() => {
                    return Err(err).with_context(|| format!("request from {from:?}"));
                }
                Err(err) => {
                    debug!("rejecting request from {from:?}: {err:#}");
                    None
                }
            };

            let response = match &request {
                Some(request) => {
                    info!("{:?} from {from:?}", request.op());
                    self.handle(request)
                }
                None => Response::Failed,
            };

            let reply = response.into_record()?.encode()?;
            if let Err(err) = self.transport.send(&from, &reply) {
                warn!("unable to reply to {from:?}: {err:#}");
            }

            if request == Some(Request::Shutdown) {
                self.mfs.sync()?;
                info!("shutting down");
                return Ok(());
            }
        }
    }

    /// Applies one request. Every failure becomes [`Response::Failed`].
    pub fn handle(&mut self, request: &Request) -> Response {
        match self.apply(request) {
            Ok(response) => response,
            Err(err) => {
                debug!("{:?} failed: {err:#}", request.op());
                Response::Failed
            }
        }
    }

    pub fn into_inner(self) -> Mfs<S> {
        self.mfs
    }

    fn apply(&mut self, request: &Request) -> Result<Response> {
        let mfs = &mut self.mfs;

        let response = match request {
            Request::Lookup { parent, name } => Response::Inode(mfs.lookup(*parent, name)?),
            Request::Stat { inum } => Response::Stat(mfs.stat(*inum)?),
            Request::Write { inum, offset, data } => {
                mfs.write_file(*inum, *offset, data)?;
                Response::Ack
            }
            Request::Read { inum, offset, len } => {
                Response::Data(mfs.read_file(*inum, *offset, *len)?)
            }
            Request::Create {
                parent,
                type_,
                name,
            } => {
                // the reply does not say whether the name already existed
                if let Created::Existing(inum) = mfs.create(*parent, *type_, name)? {
                    debug!("{name:?} already exists as inode #{inum}");
                }
                Response::Ack
            }
            Request::Unlink { parent, name } => {
                mfs.unlink(*parent, name)?;
                Response::Ack
            }
            Request::Shutdown | Request::Ping => Response::Ack,
        };

        Ok(response)
    }
}
