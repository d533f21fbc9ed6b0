//! A "scope guard" that will reset a port's read timeout when it goes out of scope.

use crate::{backend::Backend, port::Port};
use std::{io, time::Duration};

/// A "scope guard" that will update the port's read timeout and then reset it
/// when it goes out of scope.
///
/// To create a guard, use the port's [`timeout_guard`](Port::timeout_guard) method.
///
/// While the guard is in scope, the port can only be accessed through the guard.
/// However, because the guard implements [`Deref`](std::ops::Deref) and
/// [`DerefMut`](std::ops::DerefMut) callers can treat the guard as the port.
///
/// If the original timeout cannot be restored, the port is poisoned and the
/// failure is reported by the next operation on it.
#[derive(Debug)]
pub struct TimeoutGuard<'a, B: Backend> {
    /// The underlying port.
    port: &'a mut Port<B>,
    /// The original timeout that will be restored when the guard is dropped.
    original_timeout: Option<Duration>,
}

impl<'a, B: Backend> TimeoutGuard<'a, B> {
    /// Update the port's timeout and return a [`TimeoutGuard`] wrapping the port.
    pub(crate) fn new(port: &'a mut Port<B>, timeout: Option<Duration>) -> Result<Self, io::Error> {
        let backend = port.backend_mut();
        let original_timeout = backend.read_timeout()?;
        backend.set_read_timeout(timeout)?;
        Ok(TimeoutGuard {
            port,
            original_timeout,
        })
    }

    /// The timeout that will be restored when the guard is dropped.
    pub fn original_timeout(&self) -> Option<Duration> {
        self.original_timeout
    }
}

impl<B: Backend> std::ops::Deref for TimeoutGuard<'_, B> {
    type Target = Port<B>;
    fn deref(&self) -> &Self::Target {
        self.port
    }
}

impl<B: Backend> std::ops::DerefMut for TimeoutGuard<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.port
    }
}

impl<B: Backend> Drop for TimeoutGuard<'_, B> {
    fn drop(&mut self) {
        if let Err(err) = self
            .port
            .backend_mut()
            .set_read_timeout(self.original_timeout)
        {
            let message = match self.original_timeout {
                Some(timeout) => format!(
                    "failed to restore the read timeout of {} ms: {err}",
                    timeout.as_millis()
                ),
                None => format!("failed to restore a blocking read timeout: {err}"),
            };
            self.port.poison(io::Error::new(err.kind(), message));
        }
    }
}
