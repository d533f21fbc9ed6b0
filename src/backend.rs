//! Types that can exchange (read/write) bytes with a connected device.
//!
//! The [`Backend`] trait represents all such types and the [`Connect`] trait
//! represents anything that can (re)open one.

use std::io;
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

#[cfg(any(test, feature = "mock"))]
mod mock;
#[cfg(any(test, feature = "mock"))]
#[cfg_attr(all(doc, feature = "doc_cfg"), doc(cfg(feature = "mock")))]
pub use mock::{Mock, MockConnector};

/// The placeholder name for a backend that doesn't have a name.
pub(crate) const UNKNOWN_BACKEND_NAME: &str = "<unknown backend>";

/// The default telnet port of a NAD receiver.
pub const DEFAULT_PORT: u16 = 23;

/// Types that allow reading and writing bytes with a connected device.
pub trait Backend: io::Read + io::Write + private::Sealed {
    /// Set the read timeout.
    ///
    /// If timeout is `None`, reads will block indefinitely.
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error>;

    /// Get the read timeout.
    ///
    /// If timeout is `None`, reads will block indefinitely.
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error>;

    /// Get the "name" of the backend.
    ///
    /// This can be in any format, but should uniquely identify the backend
    /// instance.
    fn name(&self) -> Option<String>;

    /// Close the connection.
    ///
    /// Closing an already closed backend is not an error.
    fn close(&mut self) -> Result<(), io::Error>;
}

impl<C: Backend + ?Sized> Backend for Box<C> {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        (**self).set_read_timeout(timeout)
    }
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        (**self).read_timeout()
    }
    fn name(&self) -> Option<String> {
        (**self).name()
    }
    fn close(&mut self) -> Result<(), io::Error> {
        (**self).close()
    }
}

impl<C: Backend + ?Sized> Backend for &mut C {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        (**self).set_read_timeout(timeout)
    }
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        (**self).read_timeout()
    }
    fn name(&self) -> Option<String> {
        (**self).name()
    }
    fn close(&mut self) -> Result<(), io::Error> {
        (**self).close()
    }
}

impl Backend for TcpStream {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        TcpStream::set_read_timeout(self, timeout)
    }
    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        TcpStream::read_timeout(self)
    }
    fn name(&self) -> Option<String> {
        self.peer_addr().map(|addr| format!("{addr}")).ok()
    }
    fn close(&mut self) -> Result<(), io::Error> {
        match self.shutdown(std::net::Shutdown::Both) {
            Err(e) if e.kind() != io::ErrorKind::NotConnected => Err(e),
            _ => Ok(()),
        }
    }
}

/// A boxed backend that can be moved to the thread that owns it.
pub type DynBackend = Box<dyn Backend + Send>;

/// Types that can open a fresh [`Backend`] to a device.
///
/// A [`Client`](crate::Client) holds on to its connector so that it can
/// recreate the connection after it has been lost.
pub trait Connect: Send + 'static {
    /// Open a new connection.
    fn connect(&mut self) -> io::Result<DynBackend>;

    /// A human readable name for the device being connected to, used in logs.
    fn name(&self) -> String;
}

/// Opens TCP connections to a device's telnet port.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    timeout: Duration,
}

impl TcpConnector {
    /// Create a connector for `host:port`.
    ///
    /// `timeout` bounds the TCP handshake and is the initial read timeout of
    /// the resulting stream.
    pub fn new<H: Into<String>>(host: H, port: u16, timeout: Duration) -> Self {
        TcpConnector {
            host: host.into(),
            port,
            timeout,
        }
    }

    /// The host name or address.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The TCP port.
    pub fn port(&self) -> u16 {
        self.port
    }

    fn open_tcp_stream(&self) -> io::Result<TcpStream> {
        let mut last_error = None;
        for address in (self.host.as_str(), self.port).to_socket_addrs()? {
            match TcpStream::connect_timeout(&address, self.timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.timeout))?;
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", self.host),
            )
        }))
    }
}

impl Connect for TcpConnector {
    fn connect(&mut self) -> io::Result<DynBackend> {
        Ok(Box::new(self.open_tcp_stream()?))
    }

    fn name(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

mod private {
    pub trait Sealed {}

    impl Sealed for std::net::TcpStream {}
    #[cfg(any(test, feature = "mock"))]
    impl Sealed for super::Mock {}
    impl<C: super::Backend + ?Sized> Sealed for Box<C> {}
    impl<C: super::Backend + ?Sized> Sealed for &mut C {}
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{BufRead as _, BufReader, Write as _};
    use std::net::TcpListener;

    #[test]
    fn tcp_connector_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let device = std::thread::spawn(move || {
            let (stream, _) = listener.accept().unwrap();
            let mut reader = BufReader::new(stream.try_clone().unwrap());
            let mut line = String::new();
            reader.read_line(&mut line).unwrap();
            assert_eq!(line, "Main.Power?\r\n");
            let mut stream = stream;
            stream.write_all(b"Main.Power=On\r\n").unwrap();
        });

        let mut connector = TcpConnector::new("127.0.0.1", port, Duration::from_secs(2));
        assert_eq!(connector.name(), format!("127.0.0.1:{port}"));
        let mut backend = connector.connect().unwrap();
        assert_eq!(
            backend.read_timeout().unwrap(),
            Some(Duration::from_secs(2))
        );
        backend.write_all(b"Main.Power?\r\n").unwrap();
        let mut buf = [0u8; 15];
        io::Read::read_exact(&mut backend, &mut buf).unwrap();
        assert_eq!(&buf, b"Main.Power=On\r\n");
        device.join().unwrap();

        backend.close().unwrap();
        // Closing twice is harmless.
        backend.close().unwrap();
    }

    #[test]
    fn tcp_connector_refused() {
        // Bind and immediately drop a listener to find a port nobody listens on.
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let mut connector = TcpConnector::new("127.0.0.1", port, Duration::from_millis(500));
        assert!(connector.connect().is_err());
    }
}
