//! A thread-safe handle to one receiver.
//!
//! Each [`Client`] starts a worker thread that exclusively owns the device's
//! connection. Every method sends a request to that thread and blocks until it
//! is served, so a `Client` can be shared between threads (for example in an
//! [`Arc`](std::sync::Arc)) and commands from different threads never
//! interleave on the wire.
//!
//! ```rust
//! # use nadproto::ClientOptions;
//! # fn wrapper() -> Result<(), nadproto::Error> {
//! let client = ClientOptions::new().open("192.168.1.50")?;
//! client.set_power(true)?;
//! client.set_volume(35)?;
//! println!("{} on input {}", client.get_model()?, client.get_source()?);
//! # Ok(())
//! # }
//! ```

mod monitor;
mod options;
mod worker;

pub use options::ClientOptions;

use crate::{
    backend::Connect,
    command::{Command, MAIN_MODEL, MAIN_MUTE, MAIN_POWER, MAIN_SOURCE, MAIN_VERSION, MAIN_VOLUME},
    error::{ClientClosedError, Error, ParseError},
    port::Reply,
    volume,
};
use crossbeam_channel::{Receiver, Sender};
use std::{
    io,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, PoisonError,
    },
    thread::{self, JoinHandle},
};
use worker::{Request, Status, Worker};

/// Interpret an on/off value. Anything other than `On` is off.
pub(crate) fn parse_on(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("on")
}

fn on_off(on: bool) -> &'static str {
    if on {
        "On"
    } else {
        "Off"
    }
}

/// The value of a reply, or a [`ParseError`] if it has none.
fn value_of(reply: &Reply) -> Result<&str, ParseError> {
    reply
        .value()
        .ok_or_else(|| ParseError::new(reply.text(), "a `Path=Value` response"))
}

/// A handle to one receiver.
///
/// Use [`ClientOptions`] to create one. Dropping the client closes the
/// connection and stops its worker thread.
pub struct Client {
    name: String,
    requests: Sender<Request>,
    worker: Option<JoinHandle<()>>,
    /// The thread running the power monitoring callback, if any.
    dispatcher: Mutex<Option<Dispatcher>>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl Client {
    /// Start the worker thread for a new, unconnected client.
    fn spawn(connector: Box<dyn Connect>, options: ClientOptions) -> Result<Self, Error> {
        let name = options.name.clone().unwrap_or_else(|| connector.name());
        let (requests, receiver) = crossbeam_channel::unbounded();
        let worker = Worker::new(name.clone(), connector, options, receiver);
        let handle = thread::Builder::new()
            .name(format!("nad {name}"))
            .spawn(move || worker.run())?;
        Ok(Client {
            name,
            requests,
            worker: Some(handle),
            dispatcher: Mutex::new(None),
        })
    }

    /// Send a request and wait for the worker's answer.
    fn request<T>(&self, make: impl FnOnce(Sender<T>) -> Request) -> Result<T, Error> {
        let (reply, answer) = crossbeam_channel::bounded(1);
        self.requests
            .send(make(reply))
            .map_err(|_| ClientClosedError)?;
        answer.recv().map_err(|_| ClientClosedError.into())
    }

    fn status(&self) -> Option<Status> {
        self.request(|reply| Request::Status { reply }).ok()
    }

    /// The name identifying the client in logs.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Connect to the device. Connecting while connected does nothing.
    pub fn connect(&self) -> Result<(), Error> {
        self.request(|reply| Request::Connect { reply })?
    }

    /// Close the connection.
    ///
    /// If power monitoring is active it reopens the connection on its next
    /// step. Stop monitoring first to stay disconnected.
    pub fn close(&self) {
        let _ = self.request(|reply| Request::Close { reply });
    }

    /// Close the connection and open a new one.
    pub fn reconnect(&self) -> Result<(), Error> {
        self.request(|reply| Request::Reconnect { reply })?
    }

    /// Whether there is an open connection.
    pub fn is_connected(&self) -> bool {
        self.status().is_some_and(|status| status.connected)
    }

    /// Whether power monitoring is active.
    pub fn is_monitoring(&self) -> bool {
        self.status().is_some_and(|status| status.monitoring)
    }

    /// Send a raw command and wait for its response.
    ///
    /// ```rust
    /// # use nadproto::Client;
    /// # fn wrapper(client: &Client) -> Result<(), nadproto::Error> {
    /// let reply = client.send("Main.Bass?")?;
    /// println!("bass: {:?}", reply.value());
    /// # Ok(())
    /// # }
    /// ```
    pub fn send<C: Into<Command>>(&self, command: C) -> Result<Reply, Error> {
        let command = command.into();
        self.request(|reply| Request::Command { command, reply })?
    }

    /// Whether the main zone is powered on.
    pub fn get_power(&self) -> Result<bool, Error> {
        let reply = self.send(Command::query(MAIN_POWER))?;
        Ok(parse_on(value_of(&reply)?))
    }

    /// Power the main zone on or off.
    pub fn set_power(&self, on: bool) -> Result<(), Error> {
        self.send(Command::set(MAIN_POWER, on_off(on)))?;
        Ok(())
    }

    /// Invert the power state, returning the new state.
    pub fn toggle_power(&self) -> Result<bool, Error> {
        let on = !self.get_power()?;
        self.set_power(on)?;
        Ok(on)
    }

    /// The volume on a 0 to 100 scale.
    pub fn get_volume(&self) -> Result<u8, Error> {
        let reply = self.send(Command::query(MAIN_VOLUME))?;
        let db = volume::parse_db(value_of(&reply)?)
            .ok_or_else(|| ParseError::new(reply.text(), "a decibel value"))?;
        Ok(volume::ui_from_db(db))
    }

    /// Set the volume on a 0 to 100 scale. Values outside the scale are clamped.
    pub fn set_volume(&self, ui: i32) -> Result<(), Error> {
        self.send(Command::set(MAIN_VOLUME, volume::db_from_ui(ui)))?;
        Ok(())
    }

    /// Step the volume up.
    pub fn volume_up(&self) -> Result<(), Error> {
        self.send(Command::increment(MAIN_VOLUME))?;
        Ok(())
    }

    /// Step the volume down.
    pub fn volume_down(&self) -> Result<(), Error> {
        self.send(Command::decrement(MAIN_VOLUME))?;
        Ok(())
    }

    /// Whether the main zone is muted.
    pub fn get_mute(&self) -> Result<bool, Error> {
        let reply = self.send(Command::query(MAIN_MUTE))?;
        Ok(parse_on(value_of(&reply)?))
    }

    /// Mute or unmute the main zone.
    pub fn set_mute(&self, muted: bool) -> Result<(), Error> {
        self.send(Command::set(MAIN_MUTE, on_off(muted)))?;
        Ok(())
    }

    /// Invert the mute state, returning the new state.
    pub fn toggle_mute(&self) -> Result<bool, Error> {
        let muted = !self.get_mute()?;
        self.set_mute(muted)?;
        Ok(muted)
    }

    /// The selected input source, numbered from 1.
    pub fn get_source(&self) -> Result<u32, Error> {
        let reply = self.send(Command::query(MAIN_SOURCE))?;
        value_of(&reply)?
            .parse()
            .map_err(|_| ParseError::new(reply.text(), "a source number").into())
    }

    /// Select an input source, numbered from 1.
    pub fn set_source(&self, source: u32) -> Result<(), Error> {
        self.send(Command::set(MAIN_SOURCE, source))?;
        Ok(())
    }

    /// The model name, such as `T758`.
    pub fn get_model(&self) -> Result<String, Error> {
        let reply = self.send(Command::query(MAIN_MODEL))?;
        Ok(value_of(&reply)?.to_string())
    }

    /// The firmware version.
    pub fn get_version(&self) -> Result<String, Error> {
        let reply = self.send(Command::query(MAIN_VERSION))?;
        Ok(value_of(&reply)?.to_string())
    }

    /// Start watching for power changes made at the device.
    ///
    /// `callback` is called with the new state for every `Main.Power` line the
    /// device pushes, in order and never concurrently, on a dedicated thread.
    /// While monitoring, lost connections are detected and reopened, and the
    /// power state is queried again after every reconnection.
    ///
    /// The monitor does not wait for the callback. Power changes are queued
    /// for it without limit, and commands are served while it runs, so the
    /// callback may use the client itself. A callback slower than the
    /// device's power changes makes the queue grow.
    ///
    /// Fails with [`MonitorRunningError`](crate::error::MonitorRunningError)
    /// if monitoring is already active.
    pub fn start_power_monitoring<F>(&self, callback: F) -> Result<(), Error>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let mut dispatcher = self.dispatcher.lock().unwrap_or_else(PoisonError::into_inner);
        let (events, received) = crossbeam_channel::unbounded();
        let spawned = Dispatcher::spawn(&self.name, received, callback)?;
        match self.request(|reply| Request::StartMonitoring { events, reply }) {
            Ok(Ok(())) => {
                if let Some(previous) = dispatcher.replace(spawned) {
                    previous.stop();
                }
                Ok(())
            }
            Ok(Err(e)) | Err(e) => {
                // The event sender was dropped with the request, so the thread ends.
                spawned.stop();
                Err(e)
            }
        }
    }

    /// Stop watching for power changes.
    ///
    /// Once this returns the callback will not be called again, even for
    /// power changes that were already queued. It may be called from within
    /// the callback itself.
    pub fn stop_power_monitoring(&self) {
        let _ = self.request(|reply| Request::StopMonitoring { reply });
        let dispatcher = self
            .dispatcher
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop();
        }
    }

    /// Receive every power state the client observes while monitoring is
    /// active, in addition to the monitoring callback.
    ///
    /// Subscriptions stay registered until the receiver is dropped.
    pub fn subscribe(&self) -> Result<Receiver<bool>, Error> {
        let (events, received) = crossbeam_channel::unbounded();
        self.requests
            .send(Request::Subscribe { events })
            .map_err(|_| ClientClosedError)?;
        Ok(received)
    }
}

/// The thread that invokes a power monitoring callback.
#[derive(Debug)]
struct Dispatcher {
    handle: JoinHandle<()>,
    /// Once set, events still queued for the callback are discarded.
    stopped: Arc<AtomicBool>,
}

impl Dispatcher {
    fn spawn<F>(name: &str, received: Receiver<bool>, mut callback: F) -> io::Result<Self>
    where
        F: FnMut(bool) + Send + 'static,
    {
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);
        let handle = thread::Builder::new()
            .name(format!("nad {name} power"))
            .spawn(move || {
                for on in received {
                    if flag.load(Ordering::Acquire) {
                        break;
                    }
                    callback(on);
                }
            })?;
        Ok(Dispatcher { handle, stopped })
    }

    /// Stop invoking the callback and wait for the thread to finish, unless
    /// it is the current thread.
    fn stop(self) {
        self.stopped.store(true, Ordering::Release);
        if self.handle.thread().id() == thread::current().id() {
            return;
        }
        if self.handle.join().is_err() {
            log::warn!("the power monitoring callback panicked");
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        let _ = self.requests.send(Request::Shutdown);
        if let Some(handle) = self.worker.take() {
            if handle.thread().id() != thread::current().id() && handle.join().is_err() {
                log::error!("{} worker panicked", self.name);
            }
        }
        let dispatcher = self
            .dispatcher
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(dispatcher) = dispatcher {
            dispatcher.stop();
        }
    }
}
