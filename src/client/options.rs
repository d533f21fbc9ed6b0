//! Options for configuring a [`Client`].

use super::Client;
use crate::{
    backend::{Connect, TcpConnector, DEFAULT_PORT},
    error::Error,
    port::{DEFAULT_COMMAND_TIMEOUT, DEFAULT_READ_INTERVAL},
};
use std::time::Duration;

/// Options for configuring and opening a [`Client`].
///
/// ```rust
/// # use nadproto::ClientOptions;
/// # use std::time::Duration;
/// # fn wrapper() -> Result<(), nadproto::Error> {
/// let client = ClientOptions::new()
///     .port(2323)
///     .command_timeout(Duration::from_secs(2))
///     .open("192.168.1.50")?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// The TCP port
    pub(super) port: u16,
    /// The name used in logs, if not the address
    pub(super) name: Option<String>,
    /// How long to wait for a command's response
    pub(super) command_timeout: Duration,
    /// The longest single read while waiting for a response
    pub(super) read_interval: Duration,
    /// The longest single read of the power monitor
    pub(super) monitor_read_timeout: Duration,
    /// The pause between reconnection attempts of the power monitor
    pub(super) reconnect_interval: Duration,
    /// Consecutive monitor read errors before the connection is recreated
    pub(super) max_consecutive_errors: u32,
    /// The pause after a monitor read error
    pub(super) error_delay: Duration,
}

impl ClientOptions {
    /// The default time between reconnection attempts: 10 seconds.
    pub const DEFAULT_RECONNECT_INTERVAL: Duration = Duration::from_secs(10);
    /// The default monitor read timeout: 1 second.
    pub const DEFAULT_MONITOR_READ_TIMEOUT: Duration = Duration::from_secs(1);
    /// The default number of consecutive monitor read errors tolerated: 5.
    pub const DEFAULT_MAX_CONSECUTIVE_ERRORS: u32 = 5;
    /// The default pause after a monitor read error: 1 second.
    pub const DEFAULT_ERROR_DELAY: Duration = Duration::from_secs(1);

    /// Create a blank set of options ready for configuration.
    ///
    /// The defaults are port 23 and a 5 second command timeout.
    ///
    /// Equivalent to [`default`](ClientOptions::default).
    pub fn new() -> Self {
        ClientOptions {
            port: DEFAULT_PORT,
            name: None,
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
            read_interval: DEFAULT_READ_INTERVAL,
            monitor_read_timeout: Self::DEFAULT_MONITOR_READ_TIMEOUT,
            reconnect_interval: Self::DEFAULT_RECONNECT_INTERVAL,
            max_consecutive_errors: Self::DEFAULT_MAX_CONSECUTIVE_ERRORS,
            error_delay: Self::DEFAULT_ERROR_DELAY,
        }
    }

    /// Set the TCP port.
    ///
    /// The default is 23.
    pub fn port(&mut self, port: u16) -> &mut Self {
        self.port = port;
        self
    }

    /// Set the name that identifies the client in logs.
    ///
    /// The default is the device's `host:port`.
    pub fn name<S: Into<String>>(&mut self, name: S) -> &mut Self {
        self.name = Some(name.into());
        self
    }

    /// Set how long a command waits for its response.
    ///
    /// This also bounds the time spent establishing a connection. The default
    /// is 5 seconds.
    pub fn command_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the longest single read while waiting for a response.
    ///
    /// The default is 500 milliseconds.
    pub fn read_interval(&mut self, interval: Duration) -> &mut Self {
        self.read_interval = interval;
        self
    }

    /// Set how long the power monitor waits for a line before checking for
    /// requests again.
    ///
    /// This bounds how long a command waits while monitoring is active. The
    /// default is 1 second.
    pub fn monitor_read_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.monitor_read_timeout = timeout;
        self
    }

    /// Set the pause between the power monitor's reconnection attempts.
    ///
    /// The default is 10 seconds.
    pub fn reconnect_interval(&mut self, interval: Duration) -> &mut Self {
        self.reconnect_interval = interval;
        self
    }

    /// Set how many consecutive read errors the power monitor tolerates before
    /// closing and reopening the connection.
    ///
    /// The default is 5. Values below 1 are treated as 1.
    pub fn max_consecutive_errors(&mut self, count: u32) -> &mut Self {
        self.max_consecutive_errors = count.max(1);
        self
    }

    /// Set the power monitor's pause after a read error.
    ///
    /// The default is 1 second.
    pub fn error_delay(&mut self, delay: Duration) -> &mut Self {
        self.error_delay = delay;
        self
    }

    /// Create a client for the device at `host`, without connecting.
    pub fn build(&self, host: &str) -> Result<Client, Error> {
        self.build_with(TcpConnector::new(host, self.port, self.command_timeout))
    }

    /// Create a client that uses a custom connector, without connecting.
    ///
    /// The port option is ignored.
    pub fn build_with<C: Connect>(&self, connector: C) -> Result<Client, Error> {
        Client::spawn(Box::new(connector), self.clone())
    }

    /// Create a client for the device at `host` and connect to it.
    pub fn open(&self, host: &str) -> Result<Client, Error> {
        let client = self.build(host)?;
        client.connect()?;
        Ok(client)
    }
}

impl Default for ClientOptions {
    fn default() -> Self {
        ClientOptions::new()
    }
}
