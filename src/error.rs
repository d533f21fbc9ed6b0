//! Error types.
//!
//! Each failure is represented by a unique type that implements [`std::error::Error`].
//! Most APIs can fail for more than one reason, so they return the higher level
//! [`Error`] enum. Every error type converts into [`Error`], allowing them to be
//! used with `?`, and can be recovered from it with [`TryFrom`]:
//!
//! ```
//! use nadproto::error::{Error, TimeoutError};
//!
//! fn skipped_lines(error: Error) -> Option<usize> {
//!     TimeoutError::try_from(error).ok().map(|e| e.skipped())
//! }
//! ```
//!
//! Nothing in this crate panics on a protocol or transport failure: every
//! operation on a [`Client`](crate::Client) reports why it failed through one of
//! these types.

use std::io;

/// Implement Error and Display traits for the specified type.
///
/// After the type define the format string and any arguments it should
/// reference after `self =>` (to abide by macro hygiene rules).
macro_rules! impl_error_display {
    (
        $name:path,
        $self:ident =>
        $display:literal
        $(,
            $($arg:expr),+
        )?
    ) => {
        impl std::error::Error for $name {}

        impl std::fmt::Display for $name {
            fn fmt(&$self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                write!(
                    f,
                    $display
                    $(,
                        $($arg),+
                    )?
                )
            }
        }
    };
}

/// Define error enums that contain concrete error types (not other error enums).
///
/// From and TryFrom traits will be implemented for the enum and it's underlying
/// errors. The enum's Display implementation will defer to the underlying errors'
/// Display implementations.
///
/// ```compile_fail
/// # // This fails to compile because the macro is not exported.
/// error_enum!{
///     #[non_exhaustive]
///     pub enum ThisError {
///         VariantA(A),
///         VariantB(B),
///     }
/// }
/// ```
macro_rules! error_enum {
    (
        $(#[$attr:meta])*
        pub enum $name:ident {
            $(
                $(#[$variant_attr:meta])*
                $variant:ident($inner:path)
            ),+
            $(,)?
        }
    ) => {
        $(
            #[$attr]
        )*
        pub enum $name {
            $(
                $(#[$variant_attr])*
                $variant($inner)
            ),+
        }

        impl std::error::Error for $name {
            fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
                match self {
                    $(
                        $name::$variant(e) => Some(e)
                    ),+
                }
            }
        }

        // Defer the display to the inner error type
        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                match self {
                    $(
                        $name::$variant(e) => e.fmt(f)
                    ),+
                }
            }
        }

        // Allow the enum to be convertible from an infallible error
        impl From<std::convert::Infallible> for $name {
            fn from(_: std::convert::Infallible) -> Self {
                unreachable!();
            }
        }

        // Conversions with underlying errors
        $(
            impl From<$inner> for $name {
                fn from(other: $inner) -> Self {
                    $name::$variant(other)
                }
            }

            impl TryFrom<$name> for $inner {
                type Error = $name;
                fn try_from(other: $name) -> Result<Self, Self::Error> {
                    match other {
                        $name::$variant(value) => Ok(value),
                        #[allow(unreachable_patterns)]
                        value => Err(value)
                    }
                }
            }
        )+
    };
}

/// There is no open connection to the device.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct NotConnectedError;

impl_error_display! {
    NotConnectedError,
    self => "not connected to the device"
}

/// No response matching a command arrived before the command's deadline.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TimeoutError {
    command: Box<str>,
    skipped: usize,
}

impl TimeoutError {
    pub(crate) fn new(command: &str, skipped: usize) -> Self {
        TimeoutError {
            command: command.into(),
            skipped,
        }
    }

    /// The command that went unanswered.
    pub fn command(&self) -> &str {
        &self.command
    }

    /// How many unrelated lines were drained while waiting for the response.
    pub fn skipped(&self) -> usize {
        self.skipped
    }
}

impl_error_display! {
    TimeoutError,
    self => "no response to `{}` (skipped {} unrelated lines)", self.command, self.skipped
}

/// A response matched its command but the value could not be interpreted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ParseError {
    response: Box<str>,
    expected: &'static str,
}

impl ParseError {
    pub(crate) fn new(response: &str, expected: &'static str) -> Self {
        ParseError {
            response: response.into(),
            expected,
        }
    }

    /// The full text of the offending response.
    pub fn response(&self) -> &str {
        &self.response
    }

    /// A description of the value that was expected.
    pub fn expected(&self) -> &str {
        self.expected
    }
}

impl_error_display! {
    ParseError,
    self => "cannot parse response `{}`: expected {}", self.response, self.expected
}

/// A command contained bytes that cannot be sent on the wire.
///
/// Commands are restricted to printable ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InvalidCommandError(Box<str>);

impl InvalidCommandError {
    pub(crate) fn new(command: &str) -> Self {
        InvalidCommandError(command.into())
    }

    /// The rejected command text.
    pub fn command(&self) -> &str {
        &self.0
    }
}

impl_error_display! {
    InvalidCommandError,
    self => "command {:?} contains characters other than printable ASCII", self.0
}

/// The client's worker thread is no longer running.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ClientClosedError;

impl_error_display! {
    ClientClosedError,
    self => "the client's connection worker has stopped"
}

/// Power monitoring was started on a client that is already monitoring.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct MonitorRunningError;

impl_error_display! {
    MonitorRunningError,
    self => "power monitoring is already running"
}

error_enum! {
    /// Any error that can occur while communicating with a device.
    #[derive(Debug)]
    #[non_exhaustive]
    pub enum Error {
        /// There is no open connection.
        NotConnected(NotConnectedError),
        /// No matching response arrived in time.
        Timeout(TimeoutError),
        /// The transport failed while reading or writing.
        Io(io::Error),
        /// A matching response carried an unusable value.
        Parse(ParseError),
        /// The command cannot be encoded.
        InvalidCommand(InvalidCommandError),
        /// The worker owning the connection has stopped.
        ClientClosed(ClientClosedError),
        /// Power monitoring is already active.
        MonitorRunning(MonitorRunningError),
    }
}

impl Error {
    /// A convenience function for determining if the error is due to a
    /// command or the transport timing out.
    pub fn is_timeout(&self) -> bool {
        match self {
            Error::Timeout(_) => true,
            Error::Io(e) => matches!(
                e.kind(),
                io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
            ),
            _ => false,
        }
    }
}
