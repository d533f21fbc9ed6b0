//! The thread that owns a device's connection.
//!
//! Callers never touch the connection directly. Every operation is a
//! [`Request`] sent to the worker, which serves them one at a time and runs
//! the power monitor in between.

use super::{
    monitor::{ReadFailure, Step, Supervisor},
    parse_on, ClientOptions,
};
use crate::{
    backend::{Connect, DynBackend},
    codec::Line,
    command::{Command, MAIN_POWER, MAIN_TEMP},
    error::{Error, MonitorRunningError, NotConnectedError},
    port::{Port, Reply},
};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::{
    ops::ControlFlow,
    time::{Duration, Instant},
};

/// The connection state reported to callers.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(crate) struct Status {
    pub connected: bool,
    pub monitoring: bool,
}

/// Work for the worker thread.
///
/// Requests that produce a result carry the sending half of a channel the
/// result is returned on.
#[derive(Debug)]
pub(crate) enum Request {
    Connect {
        reply: Sender<Result<(), Error>>,
    },
    Close {
        reply: Sender<()>,
    },
    Reconnect {
        reply: Sender<Result<(), Error>>,
    },
    Status {
        reply: Sender<Status>,
    },
    Command {
        command: Command,
        reply: Sender<Result<Reply, Error>>,
    },
    StartMonitoring {
        events: Sender<bool>,
        reply: Sender<Result<(), Error>>,
    },
    StopMonitoring {
        reply: Sender<bool>,
    },
    Subscribe {
        events: Sender<bool>,
    },
    Shutdown,
}

/// An active power monitoring session.
struct Session {
    supervisor: Supervisor,
    /// Feeds the thread that invokes the monitoring callback.
    events: Sender<bool>,
}

pub(crate) struct Worker {
    name: String,
    connector: Box<dyn Connect>,
    options: ClientOptions,
    port: Option<Port<DynBackend>>,
    session: Option<Session>,
    subscribers: Vec<Sender<bool>>,
    requests: Receiver<Request>,
}

impl Worker {
    pub fn new(
        name: String,
        connector: Box<dyn Connect>,
        options: ClientOptions,
        requests: Receiver<Request>,
    ) -> Self {
        Worker {
            name,
            connector,
            options,
            port: None,
            session: None,
            subscribers: Vec::new(),
            requests,
        }
    }

    /// Serve requests until told to shut down or every client handle is gone.
    pub fn run(mut self) {
        loop {
            let request = if self.session.is_some() {
                match self.requests.try_recv() {
                    Ok(request) => Some(request),
                    Err(TryRecvError::Empty) => None,
                    Err(TryRecvError::Disconnected) => break,
                }
            } else {
                match self.requests.recv() {
                    Ok(request) => Some(request),
                    Err(_) => break,
                }
            };
            let flow = match request {
                Some(request) => self.handle(request),
                None => self.monitor_step(),
            };
            if flow.is_break() {
                break;
            }
        }
        self.end_session();
        self.disconnect();
        log::debug!("{} worker stopped", self.name);
    }

    fn handle(&mut self, request: Request) -> ControlFlow<()> {
        match request {
            Request::Connect { reply } => {
                let result = self.ensure_connected();
                let _ = reply.send(result);
            }
            Request::Close { reply } => {
                self.disconnect();
                let _ = reply.send(());
            }
            Request::Reconnect { reply } => {
                self.disconnect();
                let result = self.ensure_connected();
                let _ = reply.send(result);
            }
            Request::Status { reply } => {
                let _ = reply.send(Status {
                    connected: self.port.is_some(),
                    monitoring: self.session.is_some(),
                });
            }
            Request::Command { command, reply } => {
                let result = self.command(command);
                let _ = reply.send(result);
            }
            Request::StartMonitoring { events, reply } => {
                let result = self.start_session(events);
                let _ = reply.send(result);
            }
            Request::StopMonitoring { reply } => {
                let was_monitoring = self.end_session();
                let _ = reply.send(was_monitoring);
            }
            Request::Subscribe { events } => self.subscribers.push(events),
            Request::Shutdown => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    fn supervisor(&mut self) -> Option<&mut Supervisor> {
        self.session.as_mut().map(|session| &mut session.supervisor)
    }

    /// Open a connection if there isn't one already.
    fn ensure_connected(&mut self) -> Result<(), Error> {
        if self.port.is_some() {
            return Ok(());
        }
        let backend = match self.connector.connect() {
            Ok(backend) => backend,
            Err(e) => {
                log::warn!("{} failed to connect: {}", self.name, e);
                return Err(e.into());
            }
        };
        let mut port = Port::from_backend(backend);
        port.set_command_timeout(self.options.command_timeout);
        port.set_read_interval(self.options.read_interval);
        self.port = Some(port);
        log::info!("{} connected", self.name);

        if let Some(supervisor) = self.supervisor() {
            supervisor.connected();
            self.refresh_power();
        }
        Ok(())
    }

    /// Close the connection, if there is one.
    fn disconnect(&mut self) {
        if let Some(mut port) = self.port.take() {
            if let Err(e) = port.close() {
                log::debug!("{} error while closing: {}", self.name, e);
            }
            log::info!("{} disconnected", self.name);
        }
        if let Some(supervisor) = self.supervisor() {
            supervisor.disconnected();
        }
    }

    fn command(&mut self, command: Command) -> Result<Reply, Error> {
        let port = self.port.as_mut().ok_or(NotConnectedError)?;
        let monitoring = self.session.is_some();
        let mut pushed = Vec::new();
        let result = port.command_reply_with_handler(command, |line| {
            if monitoring {
                if let Some(on) = power_event(&line) {
                    pushed.push(on);
                }
            }
        });
        for on in pushed {
            self.publish(on);
        }
        result
    }

    /// Query the power state and publish it.
    fn refresh_power(&mut self) {
        match self.command(Command::query(MAIN_POWER)) {
            Ok(reply) => match reply.value() {
                Some(value) => self.publish(parse_on(value)),
                None => log::warn!("{} unexpected power response `{}`", self.name, reply.text()),
            },
            Err(e) => log::warn!("{} failed to refresh the power state: {}", self.name, e),
        }
    }

    /// Deliver a power state to the monitoring callback and every subscriber.
    fn publish(&mut self, on: bool) {
        log::info!(
            "{} power state changed: {}",
            self.name,
            if on { "ON" } else { "OFF" }
        );
        if let Some(session) = &self.session {
            // Unbounded, so a callback that calls back into the client cannot
            // stall the worker. The receiving end only goes away once the
            // session has ended.
            let _ = session.events.send(on);
        }
        self.subscribers.retain(|events| events.send(on).is_ok());
    }

    fn start_session(&mut self, events: Sender<bool>) -> Result<(), Error> {
        if self.session.is_some() {
            log::warn!("{} power monitoring is already running", self.name);
            return Err(MonitorRunningError.into());
        }
        self.session = Some(Session {
            supervisor: Supervisor::new(&self.options, self.port.is_some()),
            events,
        });
        log::info!("{} started power monitoring", self.name);
        Ok(())
    }

    /// End the monitoring session, returning whether there was one.
    ///
    /// Dropping the session's sender ends the callback thread.
    fn end_session(&mut self) -> bool {
        match self.session.take() {
            Some(mut session) => {
                session.supervisor.stop();
                log::info!("{} stopped power monitoring", self.name);
                true
            }
            None => false,
        }
    }

    /// Advance the power monitor by one step.
    fn monitor_step(&mut self) -> ControlFlow<()> {
        let Some(step) = self.supervisor().map(|s| s.next_step()) else {
            return ControlFlow::Continue(());
        };
        match step {
            Step::Connect => {
                log::warn!("{} connection lost, reconnecting", self.name);
                if self.ensure_connected().is_err() {
                    log::warn!(
                        "{} reconnection failed, retrying in {} s",
                        self.name,
                        self.options.reconnect_interval.as_secs_f32()
                    );
                    if let Some(supervisor) = self.supervisor() {
                        supervisor.connect_failed();
                    }
                }
                ControlFlow::Continue(())
            }
            Step::Listen => self.listen(),
            Step::Backoff(interval) => {
                self.wait(interval)?;
                if let Some(supervisor) = self.supervisor() {
                    supervisor.backoff_elapsed();
                }
                ControlFlow::Continue(())
            }
            Step::Idle => ControlFlow::Continue(()),
        }
    }

    /// Read one unsolicited line and act on it.
    fn listen(&mut self) -> ControlFlow<()> {
        let Some(port) = self.port.as_mut() else {
            if let Some(supervisor) = self.supervisor() {
                supervisor.disconnected();
            }
            return ControlFlow::Continue(());
        };
        match port.read_line(self.options.monitor_read_timeout) {
            Ok(None) => {
                if let Some(supervisor) = self.supervisor() {
                    supervisor.quiet();
                }
                ControlFlow::Continue(())
            }
            Ok(Some(line)) => {
                self.unsolicited(&line);
                ControlFlow::Continue(())
            }
            Err(e) => {
                let Some(supervisor) = self.supervisor() else {
                    return ControlFlow::Continue(());
                };
                let failure = supervisor.read_failed();
                let count = supervisor.consecutive_errors();
                let delay = match failure {
                    ReadFailure::Retry(delay) => {
                        log::warn!(
                            "{} power monitor read failed ({} in a row): {}",
                            self.name,
                            count,
                            e
                        );
                        delay
                    }
                    ReadFailure::Reconnect(delay) => {
                        log::error!(
                            "{} too many consecutive read errors, closing the connection: {}",
                            self.name,
                            e
                        );
                        self.disconnect();
                        delay
                    }
                };
                self.wait(delay)
            }
        }
    }

    fn unsolicited(&mut self, line: &Line) {
        if line.is_empty() {
            return;
        }
        if let Some(on) = power_event(line) {
            if let Some(supervisor) = self.supervisor() {
                supervisor.power_received();
            }
            self.publish(on);
        } else if !is_temperature(line) {
            log::debug!("{} unsolicited: `{}`", self.name, line);
        }
    }

    /// Wait for `duration` while still serving requests.
    ///
    /// The wait ends early if a request changes the monitor's state, and
    /// breaks if the worker must shut down.
    fn wait(&mut self, duration: Duration) -> ControlFlow<()> {
        let deadline = Instant::now() + duration;
        let state = self.supervisor().map(|s| s.state());
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.requests.recv_timeout(remaining) {
                Ok(request) => {
                    self.handle(request)?;
                    if self.supervisor().map(|s| s.state()) != state {
                        return ControlFlow::Continue(());
                    }
                }
                Err(RecvTimeoutError::Timeout) => return ControlFlow::Continue(()),
                Err(RecvTimeoutError::Disconnected) => return ControlFlow::Break(()),
            }
        }
    }
}

/// Decode a `Main.Power=...` line.
fn power_event(line: &Line) -> Option<bool> {
    if line.path() == MAIN_POWER {
        line.value().map(parse_on)
    } else {
        None
    }
}

/// Whether `line` reports one of the `Main.Temp.*` sensors.
fn is_temperature(line: &Line) -> bool {
    line.path()
        .strip_prefix(MAIN_TEMP)
        .is_some_and(|sensor| sensor.starts_with('.'))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn power_lines() {
        assert_eq!(power_event(&Line::decode("Main.Power=On\r\n")), Some(true));
        assert_eq!(power_event(&Line::decode("Main.Power=off")), Some(false));
        assert_eq!(power_event(&Line::decode("Main.Power=Standby")), Some(false));
        assert_eq!(power_event(&Line::decode("Main.Power?")), None);
        assert_eq!(power_event(&Line::decode("Zone2.Power=On")), None);
        assert_eq!(power_event(&Line::decode("Main.Temp.1=45")), None);
    }

    #[test]
    fn temperature_lines() {
        assert!(is_temperature(&Line::decode("Main.Temp.1=45\r\n")));
        assert!(is_temperature(&Line::decode("Main.Temp.Front=38")));
        assert!(!is_temperature(&Line::decode("Main.Temperature=45")));
        assert!(!is_temperature(&Line::decode("Main.Temp=45")));
        assert!(!is_temperature(&Line::decode("Zone2.Temp.1=45")));
    }
}
