//! UDP request/response transport towards the mesh nodes.
//!
//! Requests are plain text (`GET nodeinfo`, ...) sent to the link-local
//! multicast group of a mesh interface, or unicast to single nodes. Nodes
//! answer to the source port; every answer is handed to the pipeline as one
//! [`Datagram`].

use crate::pipeline::{Datagram, PipelineSender};
use meshwatch_common::config::ReceiverConfig;
use std::io;
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use thiserror::Error;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Link-local group the node responders listen on.
pub const MULTICAST_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x2, 0x1001);

/// Largest response accepted.
pub const MAX_DATAGRAM_SIZE: usize = 8192;

pub const GET_NODEINFO: &str = "GET nodeinfo";
pub const GET_STATISTICS: &str = "GET statistics";
pub const GET_NEIGHBOURS: &str = "GET neighbours";

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("unknown interface {name}: {source}")]
    Interface { name: String, source: nix::Error },

    #[error("socket error: {0}")]
    Io(#[from] io::Error),

    #[error("short write: {written} of {expected} bytes")]
    ShortWrite { written: usize, expected: usize },

    #[error("cannot reach {0} from this socket")]
    Unreachable(IpAddr),
}

/// Outbound half of the transport as seen by the pollers.
pub trait Transport: Send + Sync {
    /// Send `request` to every node on the mesh.
    fn query(&self, request: &str) -> Result<(), TransportError>;

    /// Send `request` to a single node.
    fn query_unicast(&self, address: IpAddr, request: &str) -> Result<(), TransportError>;
}

fn is_unicast_link_local(address: &Ipv6Addr) -> bool {
    (address.segments()[0] & 0xffc0) == 0xfe80
}

/// One socket bound to one mesh interface.
pub struct UdpRequester {
    name: String,
    socket: Arc<UdpSocket>,
    multicast_target: SocketAddr,
    node_port: u16,
    scope_id: u32,
    compressed: bool,
    stop_tx: watch::Sender<bool>,
}

impl UdpRequester {
    /// Bind the receiver described by `config` and join the multicast group
    /// on its interface. Nodes are expected to listen on `node_port`.
    pub async fn open(config: &ReceiverConfig, node_port: u16) -> Result<Self, TransportError> {
        let scope_id = nix::net::if_::if_nametoindex(config.interface.as_str()).map_err(|source| {
            TransportError::Interface {
                name: config.interface.clone(),
                source,
            }
        })?;

        let local = SocketAddr::V6(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, config.port, 0, 0));
        let target = SocketAddr::V6(SocketAddrV6::new(MULTICAST_GROUP, node_port, 0, scope_id));
        let requester = Self::bind(&config.interface, local, target, scope_id, config.deflate).await?;
        requester.socket.join_multicast_v6(&MULTICAST_GROUP, scope_id)?;

        info!(
            interface = %config.interface,
            port = config.port,
            "Receiver listening"
        );
        Ok(requester)
    }

    /// Bind `local` and direct mesh-wide queries to `multicast_target`.
    pub async fn bind(
        name: &str,
        local: SocketAddr,
        multicast_target: SocketAddr,
        scope_id: u32,
        compressed: bool,
    ) -> Result<Self, TransportError> {
        let socket = UdpSocket::bind(local).await?;
        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            name: name.to_string(),
            socket: Arc::new(socket),
            multicast_target,
            node_port: multicast_target.port(),
            scope_id,
            compressed,
            stop_tx,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn send(&self, request: &str, target: SocketAddr) -> Result<(), TransportError> {
        let written = self.socket.try_send_to(request.as_bytes(), target)?;
        if written != request.len() {
            return Err(TransportError::ShortWrite {
                written,
                expected: request.len(),
            });
        }
        debug!(interface = %self.name, %target, request, "Sent request");
        Ok(())
    }

    /// Socket address for a unicast query to `address`, honouring the
    /// address family of the socket.
    fn unicast_target(&self, address: IpAddr) -> Result<SocketAddr, TransportError> {
        let local_is_v6 = self.local_addr()?.is_ipv6();
        match (address, local_is_v6) {
            (IpAddr::V6(v6), true) => {
                let scope_id = if is_unicast_link_local(&v6) {
                    self.scope_id
                } else {
                    0
                };
                Ok(SocketAddr::V6(SocketAddrV6::new(v6, self.node_port, 0, scope_id)))
            }
            (IpAddr::V4(v4), true) => Ok(SocketAddr::V6(SocketAddrV6::new(
                v4.to_ipv6_mapped(),
                self.node_port,
                0,
                0,
            ))),
            (IpAddr::V4(v4), false) => Ok(SocketAddr::new(IpAddr::V4(v4), self.node_port)),
            (IpAddr::V6(_), false) => Err(TransportError::Unreachable(address)),
        }
    }

    /// Forward every received datagram into `sink` until [`close`] is
    /// called or the pipeline shuts down.
    ///
    /// [`close`]: UdpRequester::close
    pub fn start_receiving(&self, sink: PipelineSender) -> JoinHandle<()> {
        let socket = Arc::clone(&self.socket);
        let name = self.name.clone();
        let compressed = self.compressed;
        let mut stop_rx = self.stop_tx.subscribe();

        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];
            loop {
                if *stop_rx.borrow() {
                    break;
                }
                let received = tokio::select! {
                    biased;
                    _ = stop_rx.changed() => break,
                    received = socket.recv_from(&mut buf) => received,
                };
                match received {
                    Ok((len, source)) => {
                        let datagram = Datagram::new(source, buf[..len].to_vec(), compressed);
                        if !sink.enqueue(datagram).await {
                            debug!(interface = %name, "Pipeline closed, receiver stopping");
                            break;
                        }
                    }
                    Err(e) => warn!(interface = %name, "Receive failed: {}", e),
                }
            }
            debug!(interface = %name, "Receiver stopped");
        })
    }

    /// Stop the receive loop.
    pub fn close(&self) {
        self.stop_tx.send_replace(true);
    }
}

impl Transport for UdpRequester {
    fn query(&self, request: &str) -> Result<(), TransportError> {
        self.send(request, self.multicast_target)
    }

    fn query_unicast(&self, address: IpAddr, request: &str) -> Result<(), TransportError> {
        let target = self.unicast_target(address)?;
        self.send(request, target)
    }
}

/// All configured receivers behind one [`Transport`].
pub struct MultiTransport {
    requesters: Vec<Arc<UdpRequester>>,
}

impl MultiTransport {
    pub fn new(requesters: Vec<Arc<UdpRequester>>) -> Self {
        Self { requesters }
    }

    pub fn requesters(&self) -> &[Arc<UdpRequester>] {
        &self.requesters
    }

    pub fn close(&self) {
        for requester in &self.requesters {
            requester.close();
        }
    }

    /// Run `send` on every requester; fails only if all of them fail.
    fn each<F>(&self, send: F) -> Result<(), TransportError>
    where
        F: Fn(&UdpRequester) -> Result<(), TransportError>,
    {
        let mut last_error = None;
        let mut delivered = false;
        for requester in &self.requesters {
            match send(requester) {
                Ok(()) => delivered = true,
                Err(e) => {
                    warn!(interface = %requester.name(), "Query failed: {}", e);
                    last_error = Some(e);
                }
            }
        }
        match last_error {
            Some(e) if !delivered => Err(e),
            _ => Ok(()),
        }
    }
}

impl Transport for MultiTransport {
    fn query(&self, request: &str) -> Result<(), TransportError> {
        self.each(|requester| requester.query(request))
    }

    fn query_unicast(&self, address: IpAddr, request: &str) -> Result<(), TransportError> {
        self.each(|requester| requester.query_unicast(address, request))
    }
}
