//! The power monitor's connection supervisor.
//!
//! The supervisor only decides what happens next. The worker performs the I/O
//! and reports the outcome back.

use super::ClientOptions;
use std::time::Duration;

/// The states of the power monitor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum MonitorState {
    /// There is no connection. The next step opens one.
    Disconnected,
    /// Connected and waiting for unsolicited lines.
    Listening,
    /// Opening a connection failed. The next step waits before trying again.
    Backoff,
    /// Monitoring was stopped.
    Stopped,
}

/// The next thing the worker should do for the monitor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum Step {
    /// Open a connection.
    Connect,
    /// Read one line with the monitor read timeout.
    Listen,
    /// Wait, then report [`Supervisor::backoff_elapsed`].
    Backoff(Duration),
    /// Nothing to do.
    Idle,
}

/// What the worker should do after a failed read.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub(crate) enum ReadFailure {
    /// Keep the connection and wait for the given delay.
    Retry(Duration),
    /// Close the connection, then wait for the given delay.
    Reconnect(Duration),
}

#[derive(Debug, Clone)]
pub(crate) struct Supervisor {
    state: MonitorState,
    consecutive_errors: u32,
    max_consecutive_errors: u32,
    error_delay: Duration,
    reconnect_interval: Duration,
}

impl Supervisor {
    /// Create a supervisor for a connection that is currently open, or not.
    pub fn new(options: &ClientOptions, connected: bool) -> Self {
        Supervisor {
            state: if connected {
                MonitorState::Listening
            } else {
                MonitorState::Disconnected
            },
            consecutive_errors: 0,
            max_consecutive_errors: options.max_consecutive_errors,
            error_delay: options.error_delay,
            reconnect_interval: options.reconnect_interval,
        }
    }

    pub fn state(&self) -> MonitorState {
        self.state
    }

    pub fn consecutive_errors(&self) -> u32 {
        self.consecutive_errors
    }

    pub fn next_step(&self) -> Step {
        match self.state {
            MonitorState::Disconnected => Step::Connect,
            MonitorState::Listening => Step::Listen,
            MonitorState::Backoff => Step::Backoff(self.reconnect_interval),
            MonitorState::Stopped => Step::Idle,
        }
    }

    /// A connection was opened, by the monitor or by a caller.
    pub fn connected(&mut self) {
        if self.state != MonitorState::Stopped {
            self.state = MonitorState::Listening;
            self.consecutive_errors = 0;
        }
    }

    pub fn connect_failed(&mut self) {
        if self.state == MonitorState::Disconnected {
            self.state = MonitorState::Backoff;
        }
    }

    pub fn backoff_elapsed(&mut self) {
        if self.state == MonitorState::Backoff {
            self.state = MonitorState::Disconnected;
        }
    }

    /// The connection was closed by someone other than the monitor.
    pub fn disconnected(&mut self) {
        if self.state == MonitorState::Listening {
            self.state = MonitorState::Disconnected;
        }
    }

    /// A read timed out without data.
    pub fn quiet(&mut self) {
        self.consecutive_errors = 0;
    }

    /// A power line was received.
    pub fn power_received(&mut self) {
        self.consecutive_errors = 0;
    }

    pub fn read_failed(&mut self) -> ReadFailure {
        self.consecutive_errors += 1;
        if self.consecutive_errors >= self.max_consecutive_errors {
            self.consecutive_errors = 0;
            self.state = MonitorState::Disconnected;
            ReadFailure::Reconnect(self.error_delay)
        } else {
            ReadFailure::Retry(self.error_delay)
        }
    }

    pub fn stop(&mut self) {
        self.state = MonitorState::Stopped;
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn supervisor(connected: bool) -> Supervisor {
        Supervisor::new(&ClientOptions::new(), connected)
    }

    #[test]
    fn initial_state_follows_connection() {
        assert_eq!(supervisor(true).next_step(), Step::Listen);
        assert_eq!(supervisor(false).next_step(), Step::Connect);
    }

    #[test]
    fn connect_failure_backs_off() {
        let mut s = supervisor(false);
        s.connect_failed();
        assert_eq!(s.state(), MonitorState::Backoff);
        assert_eq!(s.next_step(), Step::Backoff(Duration::from_secs(10)));
        s.backoff_elapsed();
        assert_eq!(s.next_step(), Step::Connect);
        s.connected();
        assert_eq!(s.next_step(), Step::Listen);
    }

    #[test]
    fn fifth_error_forces_reconnect() {
        let mut s = supervisor(true);
        for count in 1..5 {
            assert_eq!(s.read_failed(), ReadFailure::Retry(Duration::from_secs(1)));
            assert_eq!(s.consecutive_errors(), count);
            assert_eq!(s.state(), MonitorState::Listening);
        }
        assert_eq!(
            s.read_failed(),
            ReadFailure::Reconnect(Duration::from_secs(1))
        );
        assert_eq!(s.consecutive_errors(), 0);
        assert_eq!(s.next_step(), Step::Connect);
    }

    #[test]
    fn quiet_read_resets_errors() {
        let mut s = supervisor(true);
        for _ in 0..4 {
            s.read_failed();
        }
        s.quiet();
        assert_eq!(s.consecutive_errors(), 0);
        for _ in 0..4 {
            assert!(matches!(s.read_failed(), ReadFailure::Retry(_)));
        }
        s.power_received();
        assert_eq!(s.consecutive_errors(), 0);
    }

    #[test]
    fn reconnect_resets_errors() {
        let mut s = supervisor(true);
        s.read_failed();
        s.read_failed();
        s.disconnected();
        assert_eq!(s.next_step(), Step::Connect);
        s.connected();
        assert_eq!(s.consecutive_errors(), 0);
    }

    #[test]
    fn stopped_is_final() {
        let mut s = supervisor(true);
        s.stop();
        s.connected();
        s.backoff_elapsed();
        assert_eq!(s.next_step(), Step::Idle);
    }

    #[test]
    fn unrelated_events_do_not_change_state() {
        let mut s = supervisor(true);
        s.connect_failed();
        s.backoff_elapsed();
        assert_eq!(s.state(), MonitorState::Listening);
    }
}
