//! A scripted backend for testing.

use super::{Backend, Connect, DynBackend};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

/// The longest a read on an empty mock will wait before timing out.
const MAX_WAIT: Duration = Duration::from_secs(1);

/// A mock backend for use in testing.
///
/// It has the following features:
///   * It records every frame written to it.
///   * It can be filled with data for reading, from any thread, even while
///     another thread owns the backend.
///   * It can automatically answer specific commands.
///   * Specific errors can be inserted for calls to `read` and `write`.
///
/// Cloning a `Mock` produces another handle to the same simulated device.
///
/// When no data is available, a read waits for up to the configured read
/// timeout (capped at one second) for data to arrive and then fails with
/// [`io::ErrorKind::TimedOut`], which is how a quiet TCP connection behaves.
#[derive(Debug, Clone, Default)]
pub struct Mock {
    shared: Arc<Shared>,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<State>,
    data_ready: Condvar,
}

#[derive(Debug, Default)]
struct State {
    /// The buffer data is read from
    buffer: VecDeque<u8>,
    /// Errors to surface on subsequent reads, in order. Each is surfaced once.
    read_errors: VecDeque<io::Error>,
    /// The error to surface on the next write, if any. It is only surfaced once.
    write_error: Option<io::Error>,
    /// Commands that are automatically answered, and their answers.
    replies: Vec<(String, Vec<u8>)>,
    /// Every frame written, without its terminator.
    written: Vec<String>,
    read_timeout: Option<Duration>,
    closed: bool,
}

impl Mock {
    /// Create a new Mock backend.
    pub fn new() -> Self {
        Mock::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.shared
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Append data to the read buffer.
    ///
    /// The data is not validated in any way.
    pub fn append_data<T: AsRef<[u8]>>(&self, bytes: T) {
        self.state().buffer.extend(bytes.as_ref());
        self.shared.data_ready.notify_all();
    }

    /// Append a line, followed by the line terminator, to the read buffer.
    pub fn push_line(&self, line: &str) {
        self.append_data(format!("{line}\r\n"));
    }

    /// Clear the read buffer.
    pub fn clear_buffer(&self) {
        self.state().buffer.clear();
    }

    /// Whether the mock has any data available or not
    pub fn is_empty(&self) -> bool {
        self.state().buffer.is_empty()
    }

    /// Answer every future write of `command` with `lines`.
    pub fn reply_to(&self, command: &str, lines: &[&str]) {
        let mut answer = Vec::new();
        for line in lines {
            answer.extend_from_slice(line.as_bytes());
            answer.extend_from_slice(b"\r\n");
        }
        self.state().replies.push((command.to_string(), answer));
    }

    /// Queue an error to be returned by a future `read`.
    pub fn queue_read_error(&self, err: io::Error) {
        self.state().read_errors.push_back(err);
        self.shared.data_ready.notify_all();
    }

    /// Set the error for the next `write`, if any.
    pub fn write_error(&self, err: Option<io::Error>) {
        self.state().write_error = err;
    }

    /// All frames written so far, without their terminators.
    pub fn written(&self) -> Vec<String> {
        self.state().written.clone()
    }

    /// Whether the backend has been closed.
    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn reopen(&self) {
        self.state().closed = false;
    }
}

impl Backend for Mock {
    fn set_read_timeout(&mut self, timeout: Option<Duration>) -> Result<(), io::Error> {
        self.state().read_timeout = timeout;
        Ok(())
    }

    fn read_timeout(&self) -> Result<Option<Duration>, io::Error> {
        Ok(self.state().read_timeout)
    }

    fn name(&self) -> Option<String> {
        Some(format!("<mock 0x{:x}>", Arc::as_ptr(&self.shared) as usize))
    }

    fn close(&mut self) -> Result<(), io::Error> {
        self.state().closed = true;
        self.shared.data_ready.notify_all();
        Ok(())
    }
}

impl io::Read for Mock {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.buffer.is_empty() && state.read_errors.is_empty() && !state.closed {
            let wait = state.read_timeout.unwrap_or(MAX_WAIT).min(MAX_WAIT);
            state = self
                .shared
                .data_ready
                .wait_timeout_while(state, wait, |state| {
                    state.buffer.is_empty() && state.read_errors.is_empty() && !state.closed
                })
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        if let Some(err) = state.read_errors.pop_front() {
            Err(err)
        } else if state.closed {
            Err(io::Error::new(
                io::ErrorKind::NotConnected,
                "mock backend is closed",
            ))
        } else if state.buffer.is_empty() {
            Err(io::Error::new(
                io::ErrorKind::TimedOut,
                "Simulated timeout error",
            ))
        } else {
            let n = buf.len().min(state.buffer.len());
            for (dst, src) in buf.iter_mut().zip(state.buffer.drain(..n)) {
                *dst = src;
            }
            Ok(n)
        }
    }
}

impl io::Write for Mock {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if let Some(err) = state.write_error.take() {
            return Err(err);
        }
        if state.closed {
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "mock backend is closed",
            ));
        }
        let frame = String::from_utf8_lossy(buf).trim_end().to_string();
        let answer = state
            .replies
            .iter()
            .find(|(command, _)| *command == frame)
            .map(|(_, answer)| answer.clone());
        state.written.push(frame);
        if let Some(answer) = answer {
            state.buffer.extend(answer);
            drop(state);
            self.shared.data_ready.notify_all();
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A [`Connect`] implementation that hands out a shared [`Mock`].
///
/// Every successful connection reopens the same simulated device. Failures
/// can be scheduled to exercise reconnection logic.
#[derive(Debug, Clone, Default)]
pub struct MockConnector {
    mock: Mock,
    state: Arc<Mutex<ConnectorState>>,
}

#[derive(Debug, Default)]
struct ConnectorState {
    failures: usize,
    attempts: usize,
}

impl MockConnector {
    /// Create a connector that opens `mock`.
    pub fn new(mock: Mock) -> Self {
        MockConnector {
            mock,
            state: Arc::default(),
        }
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next(&self, n: usize) {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .failures = n;
    }

    /// The number of connection attempts made so far, successful or not.
    pub fn attempts(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .attempts
    }

    /// The simulated device.
    pub fn mock(&self) -> &Mock {
        &self.mock
    }
}

impl Connect for MockConnector {
    fn connect(&mut self) -> io::Result<DynBackend> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.attempts += 1;
        if state.failures > 0 {
            state.failures -= 1;
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "simulated connection failure",
            ));
        }
        self.mock.reopen();
        Ok(Box::new(self.mock.clone()))
    }

    fn name(&self) -> String {
        "<mock device>".to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Read as _, Write as _};
    use std::time::Instant;

    #[test]
    fn auto_reply() {
        let mut mock = Mock::new();
        mock.reply_to("Main.Power?", &["Main.Temp.1=40", "Main.Power=On"]);
        mock.write_all(b"Main.Power?\r\n").unwrap();
        let mut buf = [0u8; 64];
        let n = mock.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Main.Temp.1=40\r\nMain.Power=On\r\n");
        assert_eq!(mock.written(), ["Main.Power?"]);
    }

    #[test]
    fn empty_read_waits_for_timeout() {
        let mut mock = Mock::new();
        mock.set_read_timeout(Some(Duration::from_millis(30)))
            .unwrap();
        let start = Instant::now();
        let err = mock.read(&mut [0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn data_from_other_thread_wakes_reader() {
        let mut mock = Mock::new();
        mock.set_read_timeout(Some(Duration::from_secs(1)))
            .unwrap();
        let feeder = mock.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            feeder.push_line("Main.Power=Off");
        });
        let mut buf = [0u8; 32];
        let n = mock.read(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"Main.Power=Off\r\n");
        handle.join().unwrap();
    }

    #[test]
    fn connector_failures() {
        let mut connector = MockConnector::new(Mock::new());
        connector.fail_next(2);
        assert!(connector.connect().is_err());
        assert!(connector.connect().is_err());
        let mut backend = connector.connect().unwrap();
        assert_eq!(connector.attempts(), 3);
        backend.close().unwrap();
        assert!(connector.mock().is_closed());
        let _backend = connector.connect().unwrap();
        assert!(!connector.mock().is_closed());
    }
}
