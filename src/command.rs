//! Commands and the responses they expect.
//!
//! Every command names a dotted path such as `Main.Volume` followed by an
//! operator:
//!
//! | Form          | Example            | Expected response     |
//! |---------------|--------------------|-----------------------|
//! | query         | `Main.Volume?`     | `Main.Volume=...`     |
//! | set           | `Main.Volume=-40`  | `Main.Volume=...`     |
//! | step          | `Main.Volume+`     | `Main.Volume=...`     |
//! | anything else | `Main`             | the first line received |

use crate::codec::VALUE_SEPARATOR;
use std::fmt;

/// The power state of the main zone.
pub const MAIN_POWER: &str = "Main.Power";
/// The volume of the main zone, in decibels.
pub const MAIN_VOLUME: &str = "Main.Volume";
/// The mute state of the main zone.
pub const MAIN_MUTE: &str = "Main.Mute";
/// The selected input source, numbered from 1.
pub const MAIN_SOURCE: &str = "Main.Source";
/// The model name.
pub const MAIN_MODEL: &str = "Main.Model";
/// The firmware version.
pub const MAIN_VERSION: &str = "Main.Version";
/// Temperature sensors. Receivers push these periodically.
pub const MAIN_TEMP: &str = "Main.Temp";

/// The operator a command uses.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum CommandKind {
    /// Read a value: `Path?`.
    Query,
    /// Write a value: `Path=Value`.
    Set,
    /// Step a value up or down: `Path+` or `Path-`.
    Step,
    /// Any other text.
    Other,
}

/// A command that can be sent to a device.
///
/// Commands are not validated when they are created. Text that cannot be put
/// on the wire is rejected when the command is sent.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Command {
    text: String,
    kind: CommandKind,
}

impl Command {
    /// Create a command from its raw text.
    ///
    /// ```
    /// # use nadproto::command::{Command, CommandKind};
    /// assert_eq!(Command::new("Main.Power?").kind(), CommandKind::Query);
    /// assert_eq!(Command::new("Main.Power=On").kind(), CommandKind::Set);
    /// assert_eq!(Command::new("Main.Volume-").kind(), CommandKind::Step);
    /// ```
    pub fn new<S: Into<String>>(text: S) -> Self {
        let text = text.into();
        let kind = if text.contains('?') {
            CommandKind::Query
        } else if text.contains(VALUE_SEPARATOR) {
            CommandKind::Set
        } else if text.len() > 1 && (text.ends_with('+') || text.ends_with('-')) {
            CommandKind::Step
        } else {
            CommandKind::Other
        };
        Command { text, kind }
    }

    /// Query the value at `path`.
    pub fn query(path: &str) -> Self {
        Command::new(format!("{path}?"))
    }

    /// Set the value at `path`.
    pub fn set<V: fmt::Display>(path: &str, value: V) -> Self {
        Command::new(format!("{path}={value}"))
    }

    /// Step the value at `path` up.
    pub fn increment(path: &str) -> Self {
        Command::new(format!("{path}+"))
    }

    /// Step the value at `path` down.
    pub fn decrement(path: &str) -> Self {
        Command::new(format!("{path}-"))
    }

    /// The raw text of the command.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// The operator the command uses.
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    /// The prefix a line must start with to be this command's response.
    ///
    /// Returns `None` for commands without a recognised operator, in which
    /// case the first non-empty line received is the response.
    ///
    /// ```
    /// # use nadproto::command::Command;
    /// assert_eq!(Command::new("Main.Volume?").expected_prefix().as_deref(), Some("Main.Volume="));
    /// assert_eq!(Command::new("Main.Volume=-40").expected_prefix().as_deref(), Some("Main.Volume="));
    /// assert_eq!(Command::new("Main.Volume+").expected_prefix().as_deref(), Some("Main.Volume="));
    /// assert_eq!(Command::new("Main").expected_prefix(), None);
    /// ```
    pub fn expected_prefix(&self) -> Option<String> {
        match self.kind {
            CommandKind::Query => Some(self.text.replace('?', "=")),
            CommandKind::Set => self
                .text
                .split_once(VALUE_SEPARATOR)
                .map(|(path, _)| format!("{path}{VALUE_SEPARATOR}")),
            CommandKind::Step => {
                let path = &self.text[..self.text.len() - 1];
                Some(format!("{path}{VALUE_SEPARATOR}"))
            }
            CommandKind::Other => None,
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl From<&str> for Command {
    fn from(text: &str) -> Self {
        Command::new(text)
    }
}

impl From<String> for Command {
    fn from(text: String) -> Self {
        Command::new(text)
    }
}

impl From<&Command> for Command {
    fn from(command: &Command) -> Self {
        command.clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn builders() {
        assert_eq!(Command::query(MAIN_POWER).text(), "Main.Power?");
        assert_eq!(Command::set(MAIN_VOLUME, -40).text(), "Main.Volume=-40");
        assert_eq!(Command::set(MAIN_POWER, "On").text(), "Main.Power=On");
        assert_eq!(Command::increment(MAIN_VOLUME).text(), "Main.Volume+");
        assert_eq!(Command::decrement(MAIN_VOLUME).text(), "Main.Volume-");
    }

    #[test]
    fn query_prefix_replaces_question_mark() {
        let command = Command::query(MAIN_SOURCE);
        assert_eq!(command.kind(), CommandKind::Query);
        assert_eq!(command.expected_prefix().unwrap(), "Main.Source=");
    }

    #[test]
    fn set_prefix_stops_at_first_separator() {
        let command = Command::new("Main.Name=a=b");
        assert_eq!(command.kind(), CommandKind::Set);
        assert_eq!(command.expected_prefix().unwrap(), "Main.Name=");
    }

    #[test]
    fn negative_set_is_not_a_step() {
        let command = Command::set(MAIN_VOLUME, -5);
        assert_eq!(command.kind(), CommandKind::Set);
        assert_eq!(command.expected_prefix().unwrap(), "Main.Volume=");
    }

    #[test]
    fn step_expects_new_value() {
        for command in [Command::increment(MAIN_VOLUME), Command::decrement(MAIN_VOLUME)] {
            assert_eq!(command.kind(), CommandKind::Step);
            assert_eq!(command.expected_prefix().unwrap(), "Main.Volume=");
        }
    }

    #[test]
    fn other_has_no_prefix() {
        for text in ["", "Main", "+", "-"] {
            let command = Command::new(text);
            assert_eq!(command.kind(), CommandKind::Other, "{text:?}");
            assert_eq!(command.expected_prefix(), None);
        }
    }
}
