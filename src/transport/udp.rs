//! Datagram transport over a non-blocking [`UdpSocket`].

use std::io;
use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};

use super::Transport;

/// Largest payload a UDP datagram can carry.
const MAX_DATAGRAM: usize = 65_507;

/// Non-blocking UDP adapter. `bytes_available` peeks at the next datagram;
/// each read consumes exactly one datagram, which carries whole frames.
pub struct UdpTransport {
	sock: UdpSocket,
	peer: Option<SocketAddr>,
	probe: Box<[u8]>,
}

impl UdpTransport {
	/// Bind a socket and switch it to non-blocking mode.
	pub fn bind(addr: impl ToSocketAddrs) -> io::Result<UdpTransport> {
		let sock = UdpSocket::bind(addr)?;
		UdpTransport::from_socket(sock)
	}

	/// Wrap an existing socket, switching it to non-blocking mode.
	pub fn from_socket(sock: UdpSocket) -> io::Result<UdpTransport> {
		sock.set_nonblocking(true)?;
		Ok(UdpTransport {
			sock,
			peer: None,
			probe: vec![0; MAX_DATAGRAM].into_boxed_slice(),
		})
	}

	/// Set the default destination used by plain `write`.
	pub fn with_peer(mut self, peer: SocketAddr) -> UdpTransport {
		self.peer = Some(peer);
		self
	}

	pub fn peer(&self) -> Option<SocketAddr> {
		self.peer
	}

	pub fn socket(&self) -> &UdpSocket {
		&self.sock
	}
}

impl Transport for UdpTransport {
	fn bytes_available(&mut self) -> usize {
		match self.sock.peek(&mut self.probe) {
			Ok(0) => {
				// a zero-length datagram would otherwise sit at the head
				// of the queue forever
				let _ = self.sock.recv(&mut self.probe);
				0
			}
			Ok(n) => n,
			Err(_) => 0,
		}
	}

	fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
		self.sock.recv(buf).map(|_| ())
	}

	fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
		match self.peer {
			Some(addr) => self.write_to(addr, bytes),
			None => Err(io::Error::new(
				io::ErrorKind::NotConnected,
				"udp transport has no peer address",
			)),
		}
	}

	fn write_to(&mut self, addr: SocketAddr, bytes: &[u8]) -> io::Result<()> {
		self.sock.send_to(bytes, addr).map(|_| ())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn datagram_sizes_are_reported() -> io::Result<()> {
		let mut a = UdpTransport::bind("127.0.0.1:0")?;
		let mut b = UdpTransport::bind("127.0.0.1:0")?;
		let b_addr = b.socket().local_addr()?;

		assert_eq!(b.bytes_available(), 0);
		a.write_to(b_addr, &[1, 2, 3, 4, 5])?;

		// datagram delivery on loopback is fast but not instant
		let mut n = 0;
		for _ in 0..100 {
			n = b.bytes_available();
			if n > 0 {
				break;
			}
			std::thread::sleep(std::time::Duration::from_millis(1));
		}
		assert_eq!(n, 5);

		let mut buf = vec![0; n];
		b.read_into(&mut buf)?;
		assert_eq!(buf, &[1, 2, 3, 4, 5]);
		assert_eq!(b.bytes_available(), 0);
		Ok(())
	}

	#[test]
	fn write_without_peer_fails() {
		let mut t = UdpTransport::bind("127.0.0.1:0").unwrap();
		assert!(t.write(&[1]).is_err());
	}
}
