//! Stream transport over a non-blocking [`TcpStream`].

use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use super::Transport;

/// Non-blocking TCP adapter. `bytes_available` peeks at the kernel buffer,
/// so reads of what it reported never block.
pub struct TcpTransport {
	stream: TcpStream,
	probe: Box<[u8]>,
}

impl TcpTransport {
	pub fn connect(addr: impl ToSocketAddrs) -> io::Result<TcpTransport> {
		TcpTransport::from_stream(TcpStream::connect(addr)?)
	}

	/// Wrap an accepted or connected stream, switching it to non-blocking
	/// mode and disabling Nagle (frames are small and latency-sensitive).
	pub fn from_stream(stream: TcpStream) -> io::Result<TcpTransport> {
		stream.set_nonblocking(true)?;
		stream.set_nodelay(true)?;
		Ok(TcpTransport {
			stream,
			probe: vec![0; 4096].into_boxed_slice(),
		})
	}

	pub fn stream(&self) -> &TcpStream {
		&self.stream
	}
}

impl Transport for TcpTransport {
	fn bytes_available(&mut self) -> usize {
		match self.stream.peek(&mut self.probe) {
			Ok(n) => n,
			Err(_) => 0,
		}
	}

	fn read_into(&mut self, buf: &mut [u8]) -> io::Result<()> {
		self.stream.read_exact(buf)
	}

	fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
		let mut rest = bytes;
		while !rest.is_empty() {
			match self.stream.write(rest) {
				Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
				Ok(n) => rest = &rest[n..],
				// the socket buffer is full; completing the write is this
				// transport's contract, so spin until it drains
				Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
				Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::net::TcpListener;

	#[test]
	fn loopback_stream_round_trip() -> io::Result<()> {
		let listener = TcpListener::bind("127.0.0.1:0")?;
		let addr = listener.local_addr()?;

		let mut client = TcpTransport::connect(addr)?;
		let (server_stream, _) = listener.accept()?;
		let mut server = TcpTransport::from_stream(server_stream)?;

		client.write(&[9, 8, 7])?;

		let mut n = 0;
		for _ in 0..100 {
			n = server.bytes_available();
			if n == 3 {
				break;
			}
			std::thread::sleep(std::time::Duration::from_millis(1));
		}
		assert_eq!(n, 3);

		let mut buf = vec![0; n];
		server.read_into(&mut buf)?;
		assert_eq!(buf, &[9, 8, 7]);
		Ok(())
	}
}
