//! Node-side end of the transport

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::wire::{self, Request, Value};
use crate::client::PacketRequest;
use crate::node::NodeService;
use crate::types::{Channel, LeaseId, TypeMask};
use crate::{MooringError, RemoteError, Result};

/// TCP server exposing a [`NodeService`].
///
/// Each accepted connection is served on its own task, one request at a
/// time, until the peer hangs up or the server is shut down.
pub struct NodeServer {
    local_addr: SocketAddr,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl NodeServer {
    /// Start accepting connections on `listener`.
    pub fn spawn<N>(listener: TcpListener, service: Arc<N>) -> Result<Self>
    where
        N: NodeService,
    {
        let local_addr = listener.local_addr().map_err(|e| {
            MooringError::connection_failed_with_source(
                "listener has no local address",
                Box::new(e),
            )
        })?;
        let cancel = CancellationToken::new();
        let cancel_accept = cancel.clone();

        let task = tokio::spawn(async move {
            Self::accept_loop(listener, service, cancel_accept).await;
        });

        info!("Node server listening on {}", local_addr);
        Ok(Self { local_addr, cancel, task: Some(task) })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Token that stops the server and all of its connections.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Stop accepting and wait for the accept loop to finish.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        info!("Node server on {} stopped", self.local_addr);
    }

    async fn accept_loop<N>(listener: TcpListener, service: Arc<N>, cancel: CancellationToken)
    where
        N: NodeService,
    {
        loop {
            let accepted = tokio::select! {
                _ = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((socket, peer)) => {
                    debug!("Accepted connection from {}", peer);
                    let service = service.clone();
                    let cancel_conn = cancel.child_token();
                    tokio::spawn(async move {
                        Self::serve_connection(socket, peer, service, cancel_conn).await;
                    });
                }
                Err(e) => {
                    warn!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            }
        }
    }

    async fn serve_connection<N>(
        socket: TcpStream,
        peer: SocketAddr,
        service: Arc<N>,
        cancel: CancellationToken,
    ) where
        N: NodeService,
    {
        let mut framed = Framed::new(socket, LengthDelimitedCodec::new());
        let mut served = 0u64;

        loop {
            let frame = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = framed.next() => frame,
            };
            let frame = match frame {
                Some(Ok(frame)) => frame,
                Some(Err(e)) => {
                    warn!("Read from {} failed: {}", peer, e);
                    break;
                }
                None => break,
            };

            let response = match wire::decode_request(frame.freeze()) {
                Ok(request) => {
                    trace!("{} -> {}", peer, request.command);
                    dispatch(service.as_ref(), request).await
                }
                Err(e) => {
                    warn!("Malformed request from {}: {}", peer, e);
                    Err(RemoteError::failure(e.to_string()))
                }
            };

            let encoded = match wire::encode_response(&response) {
                Ok(encoded) => encoded,
                Err(e) => {
                    error!("Cannot encode response for {}: {}", peer, e);
                    break;
                }
            };
            if let Err(e) = framed.send(encoded.freeze()).await {
                warn!("Write to {} failed: {}", peer, e);
                break;
            }
            served += 1;
        }

        debug!("Connection from {} closed after {} requests", peer, served);
    }
}

impl Drop for NodeServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Positional argument reader for one request.
struct Args<'a> {
    command: &'a str,
    values: std::vec::IntoIter<Value>,
    position: usize,
}

impl<'a> Args<'a> {
    fn new(command: &'a str, values: Vec<Value>) -> Self {
        Self { command, values: values.into_iter(), position: 0 }
    }

    fn next(&mut self, expected: &str) -> Result<Value, RemoteError> {
        self.position += 1;
        self.values.next().ok_or_else(|| {
            RemoteError::failure(format!(
                "'{}' expects a {} at argument {}",
                self.command, expected, self.position
            ))
        })
    }

    fn mismatch(&self, expected: &str, found: &Value) -> RemoteError {
        RemoteError::failure(format!(
            "'{}' expects a {} at argument {}, got {}",
            self.command,
            expected,
            self.position,
            found.kind_name()
        ))
    }

    fn long(&mut self) -> Result<i64, RemoteError> {
        match self.next("long")? {
            Value::Long(v) => Ok(v),
            other => Err(self.mismatch("long", &other)),
        }
    }

    fn int(&mut self) -> Result<i32, RemoteError> {
        match self.next("int")? {
            Value::Int(v) => Ok(v),
            other => Err(self.mismatch("int", &other)),
        }
    }

    fn bool(&mut self) -> Result<bool, RemoteError> {
        match self.next("bool")? {
            Value::Bool(v) => Ok(v),
            other => Err(self.mismatch("bool", &other)),
        }
    }

    fn bytes(&mut self) -> Result<Vec<u8>, RemoteError> {
        match self.next("bytes")? {
            Value::Bytes(v) => Ok(v),
            other => Err(self.mismatch("bytes", &other)),
        }
    }

    fn duration(&mut self) -> Result<Duration, RemoteError> {
        let millis = self.long()?;
        u64::try_from(millis).map(Duration::from_millis).map_err(|_| {
            RemoteError::failure(format!("'{}': negative duration {}ms", self.command, millis))
        })
    }

    fn finish(self) -> Result<(), RemoteError> {
        let extra = self.values.len();
        if extra > 0 {
            Err(RemoteError::failure(format!(
                "'{}' received {} unexpected arguments",
                self.command, extra
            )))
        } else {
            Ok(())
        }
    }
}

/// Route one request to the service.
pub async fn dispatch<N>(service: &N, request: Request) -> Result<Value, RemoteError>
where
    N: NodeService + ?Sized,
{
    let Request { command, args } = request;
    let mut args = Args::new(&command, args);

    match command.as_str() {
        wire::GET_DEVICE_PACKETS => {
            let request = PacketRequest {
                source_id: args.long()?,
                start: args.long()?,
                end: args.long()?,
                max_bytes: args.int()?,
                type_mask: TypeMask(args.int()?),
                timeout_millis: args.int()?,
                exclude_stale: args.bool()?,
            };
            args.finish()?;
            service.get_device_packets(request).await.map(Value::PacketSet)
        }
        wire::ESTABLISH_LEASE => {
            let duration = args.duration()?;
            let note = String::from_utf8_lossy(&args.bytes()?).into_owned();
            let channel = Channel::from_primary_flag(args.bool()?);
            args.finish()?;
            service.establish_lease(duration, note, channel).await.map(|id| Value::Int(id.0))
        }
        wire::RENEW_LEASE => {
            let id = LeaseId(args.int()?);
            let duration = args.duration()?;
            let channel = Channel::from_primary_flag(args.bool()?);
            args.finish()?;
            service.renew_lease(id, duration, channel).await.map(|()| Value::Unit)
        }
        wire::TERMINATE_LEASE => {
            let id = LeaseId(args.int()?);
            let channel = Channel::from_primary_flag(args.bool()?);
            args.finish()?;
            service.terminate_lease(id, channel).await.map(|()| Value::Unit)
        }
        wire::GET_PORTS => {
            args.finish()?;
            service.get_ports().await.map(Value::Ports)
        }
        wire::GET_NAME => {
            args.finish()?;
            service.get_name().await.map(|name| Value::Bytes(name.into_bytes()))
        }
        wire::GET_ID => {
            args.finish()?;
            service.get_id().await.map(Value::Long)
        }
        other => Err(RemoteError::failure(format!("unknown command '{}'", other))),
    }
}
