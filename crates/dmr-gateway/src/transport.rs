//! Datagram transports for links and control sockets
//!
//! The dispatcher never awaits I/O. A [`UdpTransport`] spawns one receive
//! task per open socket that pushes datagrams into a bounded channel, and the
//! dispatcher drains it with [`Transport::try_recv`] once per tick. Sends use
//! the socket's non-blocking `try_send_to`, and remote host names are looked
//! up by a background task so opening never waits on DNS.
//!
//! [`VirtualTransport`] is an in-memory stand-in used to script a network
//! core or repeater without sockets.

use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::LinkError;

/// Datagrams buffered between the receive task and the dispatcher
const RECEIVE_QUEUE: usize = 256;

/// Largest datagram the protocol produces, with headroom
const MAX_DATAGRAM: usize = 1024;

/// A non-blocking datagram endpoint
pub trait Transport: Send {
    /// Open the endpoint; calling it on an open transport reopens it
    fn open(&mut self) -> Result<(), LinkError>;

    /// Close the endpoint and stop any receiver; safe to call twice
    fn close(&mut self);

    /// Send one datagram to the remote end
    fn send(&mut self, data: &[u8]) -> Result<(), LinkError>;

    /// Take the next received datagram, if any
    fn try_recv(&mut self) -> Option<Vec<u8>>;

    fn is_open(&self) -> bool;
}

/// Resolve `host:port` to the first address it names
///
/// Blocks on the system resolver, so only for use before the dispatcher runs.
pub fn resolve(host: &str, port: u16) -> Result<SocketAddr, LinkError> {
    (host, port)
        .to_socket_addrs()
        .map_err(|_| LinkError::Resolve(format!("{host}:{port}")))?
        .next()
        .ok_or_else(|| LinkError::Resolve(format!("{host}:{port}")))
}

/// Remote address as last resolved, shared with background lookups
type SharedAddr = Arc<ArcSwapOption<SocketAddr>>;

/// UDP endpoint with either a fixed remote or a peer learned from traffic
pub struct UdpTransport {
    local: SocketAddr,
    remote: Option<(String, u16)>,
    resolved: SharedAddr,
    peer: Option<SocketAddr>,
    socket: Option<Arc<UdpSocket>>,
    released: Weak<UdpSocket>,
    rx: Option<mpsc::Receiver<(Vec<u8>, SocketAddr)>>,
    cancel: Option<CancellationToken>,
}

impl UdpTransport {
    /// Endpoint that talks to one remote host
    ///
    /// A host name is looked up again in the background on every open.
    /// Until the first lookup finishes sends fail with [`LinkError::NoPeer`].
    pub fn connect(local: SocketAddr, host: &str, port: u16) -> Self {
        let resolved = Arc::new(ArcSwapOption::empty());
        if let Ok(ip) = host.parse::<IpAddr>() {
            resolved.store(Some(Arc::new(SocketAddr::new(ip, port))));
        }
        Self {
            local,
            remote: Some((host.to_string(), port)),
            resolved,
            peer: None,
            socket: None,
            released: Weak::new(),
            rx: None,
            cancel: None,
        }
    }

    /// Endpoint that replies to whoever sent the last datagram
    pub fn listen(local: SocketAddr) -> Self {
        Self {
            local,
            remote: None,
            resolved: Arc::new(ArcSwapOption::empty()),
            peer: None,
            socket: None,
            released: Weak::new(),
            rx: None,
            cancel: None,
        }
    }

    /// Start from an address resolved ahead of time
    pub fn with_address(self, address: SocketAddr) -> Self {
        self.resolved.store(Some(Arc::new(address)));
        self
    }

    /// Address replies currently go to
    pub fn peer(&self) -> Option<SocketAddr> {
        match self.remote {
            Some(_) => self.resolved.load_full().map(|address| *address),
            None => self.peer,
        }
    }

    /// Bound local address, once open
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref().and_then(|s| s.local_addr().ok())
    }

    fn bind(&self) -> Result<std::net::UdpSocket, LinkError> {
        match std::net::UdpSocket::bind(self.local) {
            Ok(socket) => Ok(socket),
            // Our previous receive task has not dropped its socket yet
            Err(e) if e.kind() == io::ErrorKind::AddrInUse && self.released.strong_count() > 0 => {
                Err(LinkError::Releasing(self.local))
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Transport for UdpTransport {
    fn open(&mut self) -> Result<(), LinkError> {
        self.close();

        let std_socket = self.bind()?;
        std_socket.set_nonblocking(true)?;
        let socket = Arc::new(UdpSocket::from_std(std_socket)?);

        let (tx, rx) = mpsc::channel(RECEIVE_QUEUE);
        let cancel = CancellationToken::new();
        if let Some((host, port)) = &self.remote {
            if host.parse::<IpAddr>().is_err() {
                tokio::spawn(lookup(host.clone(), *port, self.resolved.clone(), cancel.clone()));
            }
        }
        let expected = self.remote.as_ref().map(|_| self.resolved.clone());
        tokio::spawn(receive_loop(socket.clone(), tx, cancel.clone(), expected));

        debug!("Opened UDP socket on {}", self.local);
        self.socket = Some(socket);
        self.rx = Some(rx);
        self.cancel = Some(cancel);
        Ok(())
    }

    fn close(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(socket) = self.socket.take() {
            self.released = Arc::downgrade(&socket);
        }
        self.rx = None;
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        let socket = self.socket.as_ref().ok_or(LinkError::NotOpen)?;
        let dest = self.peer().ok_or(LinkError::NoPeer)?;
        socket.try_send_to(data, dest)?;
        Ok(())
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        let (data, from) = self.rx.as_mut()?.try_recv().ok()?;
        if self.remote.is_none() {
            self.peer = Some(from);
        }
        Some(data)
    }

    fn is_open(&self) -> bool {
        self.socket.is_some()
    }
}

impl Drop for UdpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

/// Look a remote host up off the dispatcher and publish the first address
async fn lookup(host: String, port: u16, resolved: SharedAddr, cancel: CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::net::lookup_host((host.as_str(), port)) => {
            match result.map(|mut addresses| addresses.next()) {
                Ok(Some(address)) => {
                    if resolved.load_full().map(|current| *current) != Some(address) {
                        debug!("{} resolved to {}", host, address);
                    }
                    resolved.store(Some(Arc::new(address)));
                }
                Ok(None) => warn!("{} has no addresses", host),
                Err(e) => warn!("Cannot resolve {}: {}", host, e),
            }
        }
    }
}

/// Receive task: runs until cancelled or the dispatcher drops its receiver
///
/// With `expected` set, only datagrams from that address are passed on.
async fn receive_loop(
    socket: Arc<UdpSocket>,
    tx: mpsc::Sender<(Vec<u8>, SocketAddr)>,
    cancel: CancellationToken,
    expected: Option<SharedAddr>,
) {
    let mut buffer = vec![0u8; MAX_DATAGRAM];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buffer) => {
                match result {
                    Ok((n, from)) => {
                        let allowed = expected
                            .as_ref()
                            .map_or(true, |e| e.load_full().is_some_and(|addr| *addr == from));
                        if !allowed {
                            debug!("Ignoring datagram from unexpected host {}", from);
                            continue;
                        }
                        match tx.try_send((buffer[..n].to_vec(), from)) {
                            Ok(()) => {}
                            Err(mpsc::error::TrySendError::Full(_)) => {
                                warn!("Receive queue full, dropping datagram from {}", from);
                            }
                            Err(mpsc::error::TrySendError::Closed(_)) => break,
                        }
                    }
                    // ICMP port-unreachable surfaces here on some platforms
                    Err(e) => debug!("UDP receive error: {}", e),
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct VirtualState {
    open: AtomicBool,
    opens: AtomicUsize,
    refuse_open: AtomicBool,
    releasing: AtomicBool,
}

/// In-memory transport; the matching [`VirtualPeer`] plays the far end
pub struct VirtualTransport {
    state: Arc<VirtualState>,
    inbound: mpsc::UnboundedReceiver<Vec<u8>>,
    outbound: mpsc::UnboundedSender<Vec<u8>>,
}

/// Test-side handle of a [`VirtualTransport`]
pub struct VirtualPeer {
    state: Arc<VirtualState>,
    to_transport: mpsc::UnboundedSender<Vec<u8>>,
    from_transport: mpsc::UnboundedReceiver<Vec<u8>>,
}

impl VirtualTransport {
    /// Create a connected transport/peer pair
    pub fn pair() -> (VirtualTransport, VirtualPeer) {
        let state = Arc::new(VirtualState::default());
        let (to_transport, inbound) = mpsc::unbounded_channel();
        let (outbound, from_transport) = mpsc::unbounded_channel();
        (
            VirtualTransport {
                state: state.clone(),
                inbound,
                outbound,
            },
            VirtualPeer {
                state,
                to_transport,
                from_transport,
            },
        )
    }

    fn discard_pending(&mut self) {
        while self.inbound.try_recv().is_ok() {}
    }
}

impl Transport for VirtualTransport {
    fn open(&mut self) -> Result<(), LinkError> {
        if self.state.refuse_open.load(Ordering::SeqCst) {
            return Err(LinkError::Io(io::Error::new(
                io::ErrorKind::AddrInUse,
                "virtual transport refused to open",
            )));
        }
        if self.state.releasing.swap(false, Ordering::SeqCst) {
            return Err(LinkError::Releasing(SocketAddr::from(([127, 0, 0, 1], 0))));
        }
        self.discard_pending();
        self.state.open.store(true, Ordering::SeqCst);
        self.state.opens.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn close(&mut self) {
        self.state.open.store(false, Ordering::SeqCst);
        self.discard_pending();
    }

    fn send(&mut self, data: &[u8]) -> Result<(), LinkError> {
        if !self.is_open() {
            return Err(LinkError::NotOpen);
        }
        self.outbound
            .send(data.to_vec())
            .map_err(|_| LinkError::ChannelClosed)
    }

    fn try_recv(&mut self) -> Option<Vec<u8>> {
        if !self.is_open() {
            self.discard_pending();
            return None;
        }
        self.inbound.try_recv().ok()
    }

    fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }
}

impl VirtualPeer {
    /// Deliver a datagram to the transport
    pub fn send(&self, data: &[u8]) {
        let _ = self.to_transport.send(data.to_vec());
    }

    /// Next datagram the transport sent
    pub fn recv(&mut self) -> Option<Vec<u8>> {
        self.from_transport.try_recv().ok()
    }

    /// Everything the transport has sent so far
    pub fn drain(&mut self) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        while let Some(data) = self.recv() {
            out.push(data);
        }
        out
    }

    pub fn is_open(&self) -> bool {
        self.state.open.load(Ordering::SeqCst)
    }

    /// How many times the transport has been opened
    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// Make subsequent opens fail, as a bind or resolve failure would
    pub fn refuse_open(&self, refuse: bool) {
        self.state.refuse_open.store(refuse, Ordering::SeqCst);
    }

    /// Make the next open fail as if the previous socket were still held
    pub fn hold_address_once(&self) {
        self.state.releasing.store(true, Ordering::SeqCst);
    }
}

/// Creates transports for sessions whose remote changes at runtime
pub trait Connector: Send {
    fn connect(&mut self, host: &str, port: u16) -> Box<dyn Transport>;
}

impl<F> Connector for F
where
    F: FnMut(&str, u16) -> Box<dyn Transport> + Send,
{
    fn connect(&mut self, host: &str, port: u16) -> Box<dyn Transport> {
        self(host, port)
    }
}

/// Connector producing UDP transports bound to one local address
pub struct UdpConnector {
    local: SocketAddr,
}

impl UdpConnector {
    pub fn new(local: SocketAddr) -> Self {
        Self { local }
    }
}

impl Connector for UdpConnector {
    fn connect(&mut self, host: &str, port: u16) -> Box<dyn Transport> {
        Box::new(UdpTransport::connect(self.local, host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_virtual_pair() {
        let (mut transport, mut peer) = VirtualTransport::pair();
        assert!(transport.send(b"early").is_err());

        transport.open().unwrap();
        assert!(peer.is_open());
        assert_eq!(peer.open_count(), 1);

        transport.send(b"hello").unwrap();
        assert_eq!(peer.recv(), Some(b"hello".to_vec()));

        peer.send(b"world");
        assert_eq!(transport.try_recv(), Some(b"world".to_vec()));
        assert_eq!(transport.try_recv(), None);
    }

    #[test]
    fn test_virtual_discards_while_closed() {
        let (mut transport, peer) = VirtualTransport::pair();
        peer.send(b"lost");
        assert_eq!(transport.try_recv(), None);
        transport.open().unwrap();
        assert_eq!(transport.try_recv(), None);

        peer.refuse_open(true);
        transport.close();
        assert!(transport.open().is_err());
        assert_eq!(peer.open_count(), 1);
    }

    #[test]
    fn test_closure_connector() {
        let mut made = Vec::new();
        let mut connector = |host: &str, port: u16| -> Box<dyn Transport> {
            made.push(format!("{host}:{port}"));
            let (transport, _peer) = VirtualTransport::pair();
            Box::new(transport)
        };
        let transport = connector.connect("xlx.example", 62030);
        assert!(!transport.is_open());
        drop(connector);
        assert_eq!(made, vec!["xlx.example:62030".to_string()]);
    }

    #[tokio::test]
    async fn test_udp_learns_peer() {
        let mut server = UdpTransport::listen("127.0.0.1:0".parse().unwrap());
        server.open().unwrap();
        let server_addr = server.local_addr().unwrap();

        let mut client = UdpTransport::connect(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1",
            server_addr.port(),
        );
        client.open().unwrap();
        assert!(server.send(b"nobody").is_err());

        client.send(b"RPTL").unwrap();
        let mut got = None;
        for _ in 0..100 {
            if let Some(data) = server.try_recv() {
                got = Some(data);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(got, Some(b"RPTL".to_vec()));
        assert_eq!(server.peer(), client.local_addr());

        server.send(b"RPTACK").unwrap();
        let mut reply = None;
        for _ in 0..100 {
            if let Some(data) = client.try_recv() {
                reply = Some(data);
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(reply, Some(b"RPTACK".to_vec()));

        client.close();
        server.close();
        assert!(!server.is_open());
    }

    #[tokio::test]
    async fn test_literal_remote_is_known_at_once() {
        let mut client = UdpTransport::connect("127.0.0.1:0".parse().unwrap(), "127.0.0.1", 62031);
        assert_eq!(client.peer(), Some("127.0.0.1:62031".parse().unwrap()));
        client.open().unwrap();
        assert!(client.send(b"RPTL").is_ok());
    }

    #[tokio::test]
    async fn test_host_name_resolves_in_background() {
        let mut client = UdpTransport::connect("127.0.0.1:0".parse().unwrap(), "localhost", 62031);
        assert_eq!(client.peer(), None);
        client.open().unwrap();

        for _ in 0..200 {
            if client.peer().is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        let peer = client.peer().unwrap();
        assert!(peer.ip().is_loopback());
        assert_eq!(peer.port(), 62031);
    }

    #[tokio::test]
    async fn test_seeded_address_used_before_lookup() {
        let seeded: SocketAddr = "127.0.0.2:62031".parse().unwrap();
        let client = UdpTransport::connect("127.0.0.1:0".parse().unwrap(), "gateway.invalid", 62031)
            .with_address(seeded);
        assert_eq!(client.peer(), Some(seeded));
    }

    #[tokio::test]
    async fn test_reopen_on_fixed_port() {
        let port = std::net::UdpSocket::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let local: SocketAddr = format!("127.0.0.1:{port}").parse().unwrap();
        let mut server = UdpTransport::listen(local);
        server.open().unwrap();

        // The receive task still holds the old socket until it next runs
        server.close();
        let err = server.open().unwrap_err();
        assert!(matches!(err, LinkError::Releasing(addr) if addr == local));
        assert!(err.is_transient());

        let mut reopened = false;
        for _ in 0..100 {
            tokio::time::sleep(Duration::from_millis(5)).await;
            if server.open().is_ok() {
                reopened = true;
                break;
            }
        }
        assert!(reopened);
        assert_eq!(server.local_addr(), Some(local));
    }
}
