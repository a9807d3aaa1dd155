//! Datagram transports the network interface can drive.
//!
//! Every transport is non-blocking: `recv_from` returns
//! `io::ErrorKind::WouldBlock` once no datagram is waiting.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::rc::Rc;

pub trait Transport {
    fn local_addr(&self) -> SocketAddr;

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize>;

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)>;
}

#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    local_addr: SocketAddr,
}

impl UdpTransport {
    pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr)?;
        socket.set_nonblocking(true)?;

        let local_addr = socket.local_addr()?;

        Ok(Self { socket, local_addr })
    }
}

impl Transport for UdpTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr)
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        self.socket.recv_from(buf)
    }
}

#[derive(Debug, Default)]
struct Hub {
    mailboxes: HashMap<SocketAddr, VecDeque<(Vec<u8>, SocketAddr)>>,
    blackholed: HashSet<SocketAddr>,
}

/// An in-process datagram network. Cloning yields another handle to the
/// same network.
#[derive(Debug, Clone, Default)]
pub struct MemoryNetwork {
    hub: Rc<RefCell<Hub>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bind(&self, addr: SocketAddr) -> io::Result<MemoryTransport> {
        let mut hub = self.hub.borrow_mut();
        if hub.mailboxes.contains_key(&addr) {
            return Err(io::Error::new(
                io::ErrorKind::AddrInUse,
                format!("{} is already bound", addr),
            ));
        }
        hub.mailboxes.insert(addr, VecDeque::new());

        Ok(MemoryTransport {
            hub: Rc::clone(&self.hub),
            local_addr: addr,
            sent: Vec::new(),
        })
    }

    /// Silently discards every datagram addressed to `addr` while set.
    pub fn set_blackhole(&self, addr: SocketAddr, enabled: bool) {
        let mut hub = self.hub.borrow_mut();
        if enabled {
            hub.blackholed.insert(addr);
        } else {
            hub.blackholed.remove(&addr);
        }
    }

    /// Datagrams waiting to be received at `addr`.
    pub fn pending(&self, addr: SocketAddr) -> usize {
        self.hub
            .borrow()
            .mailboxes
            .get(&addr)
            .map_or(0, VecDeque::len)
    }

    /// Delivers raw bytes to `to` as if sent from `from`.
    pub fn inject(&self, from: SocketAddr, to: SocketAddr, data: &[u8]) -> bool {
        let mut hub = self.hub.borrow_mut();
        match hub.mailboxes.get_mut(&to) {
            Some(mailbox) => {
                mailbox.push_back((data.to_vec(), from));
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
pub struct MemoryTransport {
    hub: Rc<RefCell<Hub>>,
    local_addr: SocketAddr,
    sent: Vec<(Vec<u8>, SocketAddr)>,
}

impl MemoryTransport {
    /// Every datagram handed to `send_to`, in order, delivered or not.
    pub fn sent(&self) -> &[(Vec<u8>, SocketAddr)] {
        &self.sent
    }

    pub fn clear_sent(&mut self) {
        self.sent.clear();
    }
}

impl Transport for MemoryTransport {
    fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn send_to(&mut self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.sent.push((data.to_vec(), addr));

        let mut hub = self.hub.borrow_mut();
        if hub.blackholed.contains(&addr) {
            return Ok(data.len());
        }
        // Unbound destinations lose the datagram, as UDP would.
        if let Some(mailbox) = hub.mailboxes.get_mut(&addr) {
            mailbox.push_back((data.to_vec(), self.local_addr));
        }
        Ok(data.len())
    }

    fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
        let mut hub = self.hub.borrow_mut();
        let next = hub
            .mailboxes
            .get_mut(&self.local_addr)
            .and_then(VecDeque::pop_front);

        match next {
            Some((data, from)) => {
                // Oversized datagrams are truncated like a short recv buffer.
                let len = data.len().min(buf.len());
                buf[..len].copy_from_slice(&data[..len]);
                Ok((len, from))
            }
            None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
        }
    }
}

impl Drop for MemoryTransport {
    fn drop(&mut self) {
        self.hub.borrow_mut().mailboxes.remove(&self.local_addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([10, 0, 0, 1], port))
    }

    #[test]
    fn test_memory_delivery() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr(1)).unwrap();
        let mut b = network.bind(addr(2)).unwrap();

        a.send_to(b"hello", addr(2)).unwrap();
        assert_eq!(network.pending(addr(2)), 1);

        let mut buf = [0u8; 16];
        let (len, from) = b.recv_from(&mut buf).unwrap();
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(from, addr(1));
        assert_eq!(
            b.recv_from(&mut buf).unwrap_err().kind(),
            io::ErrorKind::WouldBlock
        );
        assert_eq!(a.sent().len(), 1);
    }

    #[test]
    fn test_memory_bind_conflict() {
        let network = MemoryNetwork::new();
        let first = network.bind(addr(1)).unwrap();
        assert_eq!(
            network.bind(addr(1)).unwrap_err().kind(),
            io::ErrorKind::AddrInUse
        );

        drop(first);
        assert!(network.bind(addr(1)).is_ok());
    }

    #[test]
    fn test_blackhole_records_but_discards() {
        let network = MemoryNetwork::new();
        let mut a = network.bind(addr(1)).unwrap();
        let _b = network.bind(addr(2)).unwrap();

        network.set_blackhole(addr(2), true);
        a.send_to(b"lost", addr(2)).unwrap();
        assert_eq!(network.pending(addr(2)), 0);
        assert_eq!(a.sent().len(), 1);

        network.set_blackhole(addr(2), false);
        a.send_to(b"kept", addr(2)).unwrap();
        assert_eq!(network.pending(addr(2)), 1);
    }

    #[test]
    fn test_udp_loopback() {
        let mut a = UdpTransport::bind("127.0.0.1:0").unwrap();
        let mut b = UdpTransport::bind("127.0.0.1:0").unwrap();

        a.send_to(b"ping", b.local_addr()).unwrap();

        let mut buf = [0u8; 16];
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(2);
        loop {
            match b.recv_from(&mut buf) {
                Ok((len, from)) => {
                    assert_eq!(&buf[..len], b"ping");
                    assert_eq!(from, a.local_addr());
                    break;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    assert!(std::time::Instant::now() < deadline, "datagram never arrived");
                    std::thread::sleep(std::time::Duration::from_millis(1));
                }
                Err(e) => panic!("recv failed: {}", e),
            }
        }
    }
}
