//! TCP byte stream for links
//!
//! The link protocol needs an ordered byte pipe; [`StreamSocket`] provides
//! one over TCP with Nagle disabled, and implements `Transport` so it can be
//! handed straight to an engine. Reading happens on a separate clone of the
//! socket through [`StreamSocket::read_loop`].

use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr};
use std::time::Duration;
use thiserror::Error;
use ulink_protocol::Transport;

/// Size of the buffer used by the reader loop
pub const READ_BUFFER_SIZE: usize = 1024;

/// Socket errors
#[derive(Error, Debug)]
pub enum SocketError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Invalid socket address")]
    InvalidAddress,
}

fn domain_for(addr: &SocketAddr) -> Domain {
    if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    }
}

/// Connected TCP stream
#[derive(Debug)]
pub struct StreamSocket {
    inner: Socket,
}

impl StreamSocket {
    /// Connect to `addr`, giving up after `timeout`
    pub fn connect(addr: SocketAddr, timeout: Duration) -> Result<Self, SocketError> {
        let socket = Socket::new(domain_for(&addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.connect_timeout(&SockAddr::from(addr), timeout)?;
        Self::from_socket(socket)
    }

    fn from_socket(socket: Socket) -> Result<Self, SocketError> {
        socket.set_nodelay(true)?;
        Ok(StreamSocket { inner: socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    pub fn peer_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .peer_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// A second handle on the same connection, typically for the reader
    pub fn try_clone(&self) -> Result<Self, SocketError> {
        Ok(StreamSocket {
            inner: self.inner.try_clone()?,
        })
    }

    /// Write all of `bytes`
    pub fn write_all(&self, bytes: &[u8]) -> Result<(), SocketError> {
        (&self.inner).write_all(bytes)?;
        Ok(())
    }

    /// Read whatever is available; `Ok(0)` means the peer closed
    pub fn read(&self, buf: &mut [u8]) -> Result<usize, SocketError> {
        loop {
            match (&self.inner).read(buf) {
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                res => return Ok(res?),
            }
        }
    }

    /// Feed every received run of bytes to `on_bytes` until the peer closes
    pub fn read_loop<F>(&self, mut on_bytes: F) -> Result<(), SocketError>
    where
        F: FnMut(&[u8]),
    {
        let mut buf = [0u8; READ_BUFFER_SIZE];
        loop {
            let n = self.read(&mut buf)?;
            if n == 0 {
                tracing::debug!("Peer closed the stream");
                return Ok(());
            }
            tracing::trace!("Read {} bytes", n);
            on_bytes(&buf[..n]);
        }
    }

    /// Close both directions
    pub fn shutdown(&self) -> Result<(), SocketError> {
        self.inner.shutdown(Shutdown::Both)?;
        Ok(())
    }
}

impl Transport for StreamSocket {
    fn transmit(&mut self, bytes: &[u8]) {
        if let Err(e) = StreamSocket::write_all(self, bytes) {
            tracing::warn!("Transmit of {} bytes failed: {}", bytes.len(), e);
        }
    }
}

/// Listening TCP socket
#[derive(Debug)]
pub struct StreamListener {
    inner: Socket,
}

impl StreamListener {
    /// Bind and listen on `addr`
    pub fn bind(addr: SocketAddr) -> Result<Self, SocketError> {
        let socket = Socket::new(domain_for(&addr), Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&addr.into())?;
        socket.listen(16)?;
        Ok(StreamListener { inner: socket })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, SocketError> {
        self.inner
            .local_addr()?
            .as_socket()
            .ok_or(SocketError::InvalidAddress)
    }

    /// Wait for the next connection
    pub fn accept(&self) -> Result<(StreamSocket, SocketAddr), SocketError> {
        let (socket, addr) = self.inner.accept()?;
        let addr = addr.as_socket().ok_or(SocketError::InvalidAddress)?;
        Ok((StreamSocket::from_socket(socket)?, addr))
    }
}
