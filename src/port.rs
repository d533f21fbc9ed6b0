//! Sending commands and correlating them with their responses.
//!
//! A device pushes unsolicited status lines (temperatures, power changes made
//! with the front panel or remote, ...) on the same connection that carries
//! command responses. A [`Port`] drains the connection after every command
//! until the line that answers it arrives, skipping everything else.

#[cfg(test)]
mod test;

use crate::{
	backend::{Backend, UNKNOWN_BACKEND_NAME},
	codec::{self, Line, LineKind, LINE_FEED},
	command::Command,
	error::{Error, TimeoutError},
	timeout_guard::TimeoutGuard,
};
use std::{
	io,
	time::{Duration, Instant},
};

/// How long [`Port::command_reply`] waits for a response by default.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(5);

/// The longest single read while waiting for a response, by default.
pub const DEFAULT_READ_INTERVAL: Duration = Duration::from_millis(500);

/// The longest partial line kept while waiting for its terminator.
const MAX_PENDING_BYTES: usize = 4096;

/// The size of the chunks read from the backend.
const READ_CHUNK_SIZE: usize = 256;

/// The response to a command.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reply {
	line: Line,
	skipped: usize,
}

impl Reply {
	/// The line that answered the command.
	pub fn line(&self) -> &Line {
		&self.line
	}

	/// The trimmed text of the response.
	pub fn text(&self) -> &str {
		self.line.text()
	}

	/// The value of the response: everything after the first `=`.
	pub fn value(&self) -> Option<&str> {
		self.line.value()
	}

	/// How many unrelated lines were drained before the response arrived.
	pub fn skipped(&self) -> usize {
		self.skipped
	}

	/// Consume the reply and return its line.
	pub fn into_line(self) -> Line {
		self.line
	}
}

/// A port for communicating with a device over its line protocol.
///
/// The port owns one [`Backend`] and is not shared: only one command can be
/// awaiting a response at any time.
///
/// ## Example
///
/// ```
/// # use nadproto::{backend::Backend, port::Port};
/// # fn wrapper<B: Backend>(mut port: Port<B>) -> Result<(), nadproto::Error> {
/// let reply = port.command_reply("Main.Model?")?;
/// println!("model: {:?}", reply.value());
/// # Ok(())
/// # }
/// ```
pub struct Port<B> {
	/// The underlying backend
	backend: B,
	/// The name used when logging
	name: String,
	/// Received bytes that do not yet form a complete line.
	pending: Vec<u8>,
	/// If populated, the error that has "poisoned" the port. This error MUST be
	/// reported before the port is used for communication again.
	///
	/// A port becomes "poisoned" when a [`TimeoutGuard`] cannot restore the
	/// original timeout in its Drop implementation.
	poison: Option<io::Error>,
	/// How long to wait for a response to a command.
	command_timeout: Duration,
	/// The longest single read while waiting for a response.
	read_interval: Duration,
}

impl<B: Backend> std::fmt::Debug for Port<B> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Port")
			.field("name", &self.name)
			.field("command_timeout", &self.command_timeout)
			.field("read_interval", &self.read_interval)
			.finish_non_exhaustive()
	}
}

impl<B: Backend> Port<B> {
	/// Create a port from a connected backend, using the default timeouts.
	pub fn from_backend(backend: B) -> Self {
		let name = backend
			.name()
			.unwrap_or_else(|| UNKNOWN_BACKEND_NAME.to_string());
		Port {
			backend,
			name,
			pending: Vec::new(),
			poison: None,
			command_timeout: DEFAULT_COMMAND_TIMEOUT,
			read_interval: DEFAULT_READ_INTERVAL,
		}
	}

	/// Check if the port is poisoned and report the error if it exists.
	fn check_poisoned(&mut self) -> Result<(), io::Error> {
		if let Some(poison) = self.poison.take() {
			Err(poison)
		} else {
			Ok(())
		}
	}

	/// Poison the port. The error is reported by the next operation.
	pub(crate) fn poison(&mut self, e: io::Error) {
		self.poison = Some(e);
	}

	/// The name of the port, as it appears in logs.
	pub fn name(&self) -> &str {
		&self.name
	}

	/// Set how long [`command_reply`](Self::command_reply) waits for a response.
	///
	/// The previous value is returned.
	pub fn set_command_timeout(&mut self, timeout: Duration) -> Duration {
		std::mem::replace(&mut self.command_timeout, timeout)
	}

	/// How long [`command_reply`](Self::command_reply) waits for a response.
	pub fn command_timeout(&self) -> Duration {
		self.command_timeout
	}

	/// Set the longest single read while waiting for a response.
	///
	/// The previous value is returned.
	pub fn set_read_interval(&mut self, interval: Duration) -> Duration {
		std::mem::replace(&mut self.read_interval, interval)
	}

	/// The longest single read while waiting for a response.
	pub fn read_interval(&self) -> Duration {
		self.read_interval
	}

	/// Get a reference to the underlying backend.
	pub fn backend(&self) -> &B {
		&self.backend
	}

	/// Get a mutable reference to the underlying backend.
	pub fn backend_mut(&mut self) -> &mut B {
		&mut self.backend
	}

	/// Consume the port and return the underlying backend.
	pub fn into_backend(self) -> B {
		self.backend
	}

	/// Close the underlying connection.
	///
	/// Any partially received line is discarded.
	pub fn close(&mut self) -> Result<(), io::Error> {
		self.pending.clear();
		log::debug!("{} closing", self.name);
		self.backend.close()
	}

	/// Transmit a command without waiting for a response.
	///
	/// ## Example
	///
	/// ```
	/// # use nadproto::{backend::Backend, port::Port};
	/// # fn wrapper<B: Backend>(mut port: Port<B>) -> Result<(), nadproto::Error> {
	/// port.command("Main.Power=On")?;
	/// # Ok(())
	/// # }
	/// ```
	pub fn command<C: Into<Command>>(&mut self, cmd: C) -> Result<(), Error> {
		self.internal_command(&cmd.into())
	}

	fn internal_command(&mut self, cmd: &Command) -> Result<(), Error> {
		self.check_poisoned()?;
		let frame = codec::encode(cmd.text())?;
		log::debug!("{} TX:   {}", self.name, cmd.text());
		self.backend.write_all(&frame)?;
		self.backend.flush()?;
		Ok(())
	}

	/// Read one line, waiting at most `timeout` for it to complete.
	///
	/// Returns `Ok(None)` if no complete line arrived in time. Bytes of an
	/// incomplete line stay buffered for the next read. A connection closed by
	/// the device is reported as [`io::ErrorKind::UnexpectedEof`].
	pub fn read_line(&mut self, timeout: Duration) -> Result<Option<Line>, io::Error> {
		self.check_poisoned()?;
		if let Some(line) = self.take_buffered_line() {
			return Ok(Some(line));
		}
		if timeout.is_zero() {
			return Ok(None);
		}

		let deadline = Instant::now() + timeout;
		let mut port = self.timeout_guard(Some(timeout))?;
		let mut chunk = [0u8; READ_CHUNK_SIZE];
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				return Ok(None);
			}
			port.backend.set_read_timeout(Some(remaining))?;
			match port.backend.read(&mut chunk) {
				Ok(0) => {
					return Err(io::Error::new(
						io::ErrorKind::UnexpectedEof,
						"the device closed the connection",
					))
				}
				Ok(n) => {
					port.pending.extend_from_slice(&chunk[..n]);
					if let Some(line) = port.take_buffered_line() {
						return Ok(Some(line));
					}
					port.limit_pending();
				}
				Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
				Err(e)
					if matches!(
						e.kind(),
						io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
					) =>
				{
					return Ok(None)
				}
				Err(e) => return Err(e),
			}
		}
	}

	/// Split the first complete line off the pending bytes, if there is one.
	fn take_buffered_line(&mut self) -> Option<Line> {
		let end = self.pending.iter().position(|&b| b == LINE_FEED)?;
		let raw: Vec<u8> = self.pending.drain(..=end).collect();
		let line = Line::decode(raw);
		log::debug!("{} RECV: {}", self.name, line);
		Some(line)
	}

	/// Drop the pending bytes if they have grown too long to be a line.
	fn limit_pending(&mut self) {
		if self.pending.len() > MAX_PENDING_BYTES {
			log::warn!(
				"{} discarding {} bytes without a line terminator",
				self.name,
				self.pending.len()
			);
			self.pending.clear();
		}
	}

	/// Transmit a command and wait for its response.
	///
	/// Lines that do not answer the command are skipped. The command fails with
	/// a [`TimeoutError`] if no response arrives within the
	/// [`command_timeout`](Self::command_timeout).
	///
	/// ## Example
	///
	/// ```
	/// # use nadproto::{backend::Backend, port::Port};
	/// # fn wrapper<B: Backend>(mut port: Port<B>) -> Result<(), nadproto::Error> {
	/// let reply = port.command_reply("Main.Power?")?;
	/// assert_eq!(reply.line().path(), "Main.Power");
	/// # Ok(())
	/// # }
	/// ```
	pub fn command_reply<C: Into<Command>>(&mut self, cmd: C) -> Result<Reply, Error> {
		self.internal_command_reply(&cmd.into(), &mut |_| {})
	}

	/// Transmit a command and wait for its response, passing every unrelated
	/// line that is skipped along the way to `handler`.
	///
	/// ## Example
	///
	/// ```
	/// # use nadproto::{backend::Backend, port::Port};
	/// # fn wrapper<B: Backend>(mut port: Port<B>) -> Result<(), nadproto::Error> {
	/// let mut pushed = Vec::new();
	/// let reply = port.command_reply_with_handler("Main.Volume?", |line| pushed.push(line))?;
	/// assert_eq!(pushed.len(), reply.skipped());
	/// # Ok(())
	/// # }
	/// ```
	pub fn command_reply_with_handler<C, F>(&mut self, cmd: C, mut handler: F) -> Result<Reply, Error>
	where
		C: Into<Command>,
		F: FnMut(Line),
	{
		self.internal_command_reply(&cmd.into(), &mut handler)
	}

	fn internal_command_reply(
		&mut self,
		cmd: &Command,
		handler: &mut dyn FnMut(Line),
	) -> Result<Reply, Error> {
		self.internal_command(cmd)?;
		let expected = cmd.expected_prefix();
		let deadline = Instant::now() + self.command_timeout;
		let mut skipped = 0;
		loop {
			let remaining = deadline.saturating_duration_since(Instant::now());
			if remaining.is_zero() {
				break;
			}
			let interval = remaining.min(self.read_interval);
			match self.read_line(interval) {
				Ok(Some(line)) => match line.classify(expected.as_deref()) {
					LineKind::Empty => {}
					LineKind::Unrelated if expected.is_some() => {
						skipped += 1;
						log::debug!(
							"{} skipping `{}` while waiting for a response to `{}`",
							self.name,
							line,
							cmd
						);
						handler(line);
					}
					LineKind::Match | LineKind::Unrelated => {
						return Ok(Reply { line, skipped });
					}
				},
				Ok(None) => {}
				Err(e) => {
					log::debug!(
						"{} read failed while waiting for a response to `{}`: {}",
						self.name,
						cmd,
						e
					);
					// Errors can repeat without blocking, so wait out the interval.
					std::thread::sleep(interval.min(deadline.saturating_duration_since(Instant::now())));
				}
			}
		}
		log::warn!(
			"{} no response to `{}` after {} ms ({} unrelated lines skipped)",
			self.name,
			cmd,
			self.command_timeout.as_millis(),
			skipped
		);
		Err(TimeoutError::new(cmd.text(), skipped).into())
	}

	/// Set the read timeout and return a scope guard that will reset it when
	/// it goes out of scope.
	///
	/// ## Example
	///
	/// ```
	/// # use nadproto::{backend::Backend, port::Port};
	/// # use std::time::Duration;
	/// # fn wrapper<B: Backend>(mut port: Port<B>) -> Result<(), std::io::Error> {
	/// {
	///     let guard = port.timeout_guard(Some(Duration::from_secs(10)))?;
	///     // Reads on the backend now time out after 10 seconds.
	/// } // The guard is dropped and the timeout is reset.
	/// # Ok(())
	/// # }
	/// ```
	pub fn timeout_guard(
		&mut self,
		timeout: Option<Duration>,
	) -> Result<TimeoutGuard<'_, B>, io::Error> {
		self.check_poisoned()?;

		TimeoutGuard::new(self, timeout)
	}
}
