//! Encoding commands into wire frames and decoding received lines.
//!
//! The protocol is plain ASCII, one command or response per line, with every
//! line terminated by `\r\n`. Responses and unsolicited status pushes share the
//! `Path=Value` grammar.

use crate::error::InvalidCommandError;

/// The carriage return byte.
pub(crate) const CARRIAGE_RETURN: u8 = b'\r';

/// The line feed byte.
pub(crate) const LINE_FEED: u8 = b'\n';

/// The byte separating a path from its value.
pub(crate) const VALUE_SEPARATOR: char = '=';

/// Whether a byte may appear in a command.
fn is_printable(byte: u8) -> bool {
	(0x20..=0x7E).contains(&byte)
}

/// Encode a command into a frame ready to be written to a device.
///
/// The command must consist only of printable ASCII characters. The line
/// terminator is appended.
///
/// ## Example
///
/// ```
/// # use nadproto::codec::encode;
/// assert_eq!(encode("Main.Power?").unwrap(), b"Main.Power?\r\n");
/// assert!(encode("Main.Power?\n").is_err());
/// ```
pub fn encode(command: &str) -> Result<Vec<u8>, InvalidCommandError> {
	if !command.bytes().all(is_printable) {
		return Err(InvalidCommandError::new(command));
	}
	let mut frame = Vec::with_capacity(command.len() + 2);
	frame.extend_from_slice(command.as_bytes());
	frame.push(CARRIAGE_RETURN);
	frame.push(LINE_FEED);
	Ok(frame)
}

/// How a received line relates to the response a caller is waiting for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum LineKind {
	/// The line contained nothing but whitespace.
	Empty,
	/// The line starts with the expected prefix.
	Match,
	/// The line is something else, such as an unsolicited status push.
	Unrelated,
}

/// Classify the text of a line against an expected response prefix.
///
/// Leading and trailing whitespace is ignored. Without an expected prefix,
/// every non-empty line is [`LineKind::Unrelated`].
///
/// ## Example
///
/// ```
/// # use nadproto::codec::{classify, LineKind};
/// assert_eq!(classify(" Main.Mute=Off\r\n", Some("Main.Mute=")), LineKind::Match);
/// assert_eq!(classify("Main.Temp.1=41", Some("Main.Mute=")), LineKind::Unrelated);
/// assert_eq!(classify("\r\n", Some("Main.Mute=")), LineKind::Empty);
/// assert_eq!(classify("Main.Mute=Off", None), LineKind::Unrelated);
/// ```
pub fn classify(text: &str, expected: Option<&str>) -> LineKind {
	let text = text.trim();
	if text.is_empty() {
		return LineKind::Empty;
	}
	match expected {
		Some(prefix) if text.starts_with(prefix) => LineKind::Match,
		_ => LineKind::Unrelated,
	}
}

/// A line received from a device.
///
/// The raw bytes are kept as received, terminator included. The text is the
/// lossily decoded and trimmed content, so garbled bytes never prevent a line
/// from being decoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Line {
	raw: Box<[u8]>,
	text: String,
}

impl Line {
	/// Decode a raw line.
	pub fn decode<R: AsRef<[u8]>>(raw: R) -> Self {
		let raw = raw.as_ref();
		Line {
			raw: Box::from(raw),
			text: String::from_utf8_lossy(raw).trim().to_string(),
		}
	}

	/// The bytes of the line as they were received.
	pub fn raw(&self) -> &[u8] {
		&self.raw
	}

	/// The trimmed text of the line.
	pub fn text(&self) -> &str {
		&self.text
	}

	/// Whether the line had no content other than whitespace.
	pub fn is_empty(&self) -> bool {
		self.text.is_empty()
	}

	/// Classify the line against an expected response prefix.
	///
	/// See [`classify`].
	pub fn classify(&self, expected: Option<&str>) -> LineKind {
		classify(&self.text, expected)
	}

	/// The part of the line before the `=`, or the whole line if there is none.
	///
	/// `Main.Volume=-40` has the path `Main.Volume`.
	pub fn path(&self) -> &str {
		self.text
			.split_once(VALUE_SEPARATOR)
			.map_or(self.text.as_str(), |(path, _)| path)
			.trim()
	}

	/// The trimmed part of the line after the first `=`, if any.
	///
	/// `Main.Volume=-40` has the value `-40`.
	pub fn value(&self) -> Option<&str> {
		self.text
			.split_once(VALUE_SEPARATOR)
			.map(|(_, value)| value.trim())
	}
}

impl std::fmt::Display for Line {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(&self.text)
	}
}

#[cfg(test)]
mod test {
	use super::*;

	#[test]
	fn encode_appends_terminator() {
		assert_eq!(encode("Main.Volume=-40").unwrap(), b"Main.Volume=-40\r\n");
		assert_eq!(encode("").unwrap(), b"\r\n");
	}

	#[test]
	fn encode_rejects_non_printable() {
		for bad in ["Main.Power?\r", "Main\tPower?", "Main.Pöwer?", "\u{7f}"] {
			let err = encode(bad).unwrap_err();
			assert_eq!(err.command(), bad);
		}
	}

	#[test]
	fn classify_trims_before_matching() {
		assert_eq!(classify("   ", Some("Main.Power=")), LineKind::Empty);
		assert_eq!(classify("", None), LineKind::Empty);
		assert_eq!(
			classify("\tMain.Power=On \r\n", Some("Main.Power=")),
			LineKind::Match
		);
		// Prefix matching is case sensitive, like the device.
		assert_eq!(
			classify("main.power=On", Some("Main.Power=")),
			LineKind::Unrelated
		);
	}

	#[test]
	fn decode_line() {
		let line = Line::decode(b"Main.Model=T758\r\n");
		assert_eq!(line.raw(), b"Main.Model=T758\r\n");
		assert_eq!(line.text(), "Main.Model=T758");
		assert_eq!(line.path(), "Main.Model");
		assert_eq!(line.value(), Some("T758"));
		assert!(!line.is_empty());
		assert_eq!(line.to_string(), "Main.Model=T758");

		let line = Line::decode(b"\r\n");
		assert!(line.is_empty());
		assert_eq!(line.value(), None);
	}

	#[test]
	fn decode_garbled_line() {
		let line = Line::decode(b"\xffMain.Power=On\r\n");
		assert!(line.text().ends_with("Main.Power=On"));
		assert_eq!(line.classify(Some("Main.Power=")), LineKind::Unrelated);
	}

	#[test]
	fn value_keeps_later_separators() {
		let line = Line::decode("Main.Name = a=b ");
		assert_eq!(line.path(), "Main.Name");
		assert_eq!(line.value(), Some("a=b"));
	}
}
