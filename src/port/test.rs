use std::time::{Duration, Instant};

use crate::{
	backend::{Backend, Mock},
	error::*,
	port::Port,
	volume,
};

/// Create a port over `mock` with short timeouts so that tests run quickly.
fn port_with(mock: &Mock, timeout_ms: u64, interval_ms: u64) -> Port<Mock> {
	let mut port = Port::from_backend(mock.clone());
	port.set_command_timeout(Duration::from_millis(timeout_ms));
	port.set_read_interval(Duration::from_millis(interval_ms));
	port
}

#[test]
fn query_skips_unrelated_lines() {
	let mock = Mock::new();
	mock.reply_to("Main.Volume?", &["Main.Temp.1=45", "Main.Volume=-46"]);
	let mut port = port_with(&mock, 500, 50);

	let reply = port.command_reply("Main.Volume?").unwrap();
	assert_eq!(reply.text(), "Main.Volume=-46");
	assert_eq!(reply.skipped(), 1);
	let db = volume::parse_db(reply.value().unwrap()).unwrap();
	assert_eq!(volume::ui_from_db(db), 50);
	assert_eq!(mock.written(), ["Main.Volume?"]);
}

#[test]
fn set_is_answered_by_echo() {
	let mock = Mock::new();
	mock.reply_to("Main.Power=On", &["Main.Power=On"]);
	let mut port = port_with(&mock, 500, 50);

	let reply = port.command_reply("Main.Power=On").unwrap();
	assert_eq!(reply.value(), Some("On"));
	assert_eq!(reply.skipped(), 0);
}

#[test]
fn step_waits_for_new_value() {
	let mock = Mock::new();
	mock.reply_to("Main.Volume+", &["Main.Temp.2=39", "Main.Volume=-45"]);
	let mut port = port_with(&mock, 500, 50);

	let reply = port.command_reply("Main.Volume+").unwrap();
	assert_eq!(reply.text(), "Main.Volume=-45");
	assert_eq!(reply.skipped(), 1);
}

#[test]
fn other_command_takes_first_non_empty_line() {
	let mock = Mock::new();
	mock.reply_to("Main", &["", "  ", "Main.Power=On", "Main.Volume=-40"]);
	let mut port = port_with(&mock, 500, 50);

	let reply = port.command_reply("Main").unwrap();
	assert_eq!(reply.text(), "Main.Power=On");
	assert_eq!(reply.skipped(), 0);
}

#[test]
fn empty_lines_are_not_counted() {
	let mock = Mock::new();
	mock.reply_to("Main.Mute?", &["", "", "", ""]);
	let mut port = port_with(&mock, 300, 50);

	match port.command_reply("Main.Mute?") {
		Err(Error::Timeout(e)) => {
			assert_eq!(e.command(), "Main.Mute?");
			assert_eq!(e.skipped(), 0);
		}
		other => panic!("unexpected result: {other:?}"),
	}
}

#[test]
fn many_unrelated_lines_before_response() {
	let mock = Mock::new();
	let mut lines: Vec<String> = (0..20).map(|i| format!("Main.Temp.{i}=40")).collect();
	lines.push("Main.Source=3".to_string());
	let lines: Vec<&str> = lines.iter().map(String::as_str).collect();
	mock.reply_to("Main.Source?", &lines);
	let mut port = port_with(&mock, 500, 50);

	let reply = port.command_reply("Main.Source?").unwrap();
	assert_eq!(reply.value(), Some("3"));
	assert_eq!(reply.skipped(), 20);
}

#[test]
fn timeout_respects_deadline() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 300, 100);

	let start = Instant::now();
	let err = port.command_reply("Main.Model?").unwrap_err();
	let elapsed = start.elapsed();
	assert!(err.is_timeout());
	assert!(elapsed >= Duration::from_millis(300), "{elapsed:?}");
	assert!(elapsed < Duration::from_millis(300 + 100 + 250), "{elapsed:?}");
}

#[test]
fn unrelated_lines_go_to_handler() {
	let mock = Mock::new();
	mock.reply_to(
		"Main.Mute?",
		&["Main.Power=Off", "Main.Temp.1=41", "Main.Mute=On"],
	);
	let mut port = port_with(&mock, 500, 50);

	let mut seen = Vec::new();
	let reply = port
		.command_reply_with_handler("Main.Mute?", |line| seen.push(line.text().to_string()))
		.unwrap();
	assert_eq!(reply.value(), Some("On"));
	assert_eq!(seen, ["Main.Power=Off", "Main.Temp.1=41"]);
}

#[test]
fn garbled_line_is_skipped() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 500, 50);
	mock.append_data(b"\xff\xfeMain.Power=On\r\nMain.Power=Off\r\n");

	let reply = port.command_reply("Main.Power?").unwrap();
	assert_eq!(reply.value(), Some("Off"));
	assert_eq!(reply.skipped(), 1);
}

#[test]
fn read_errors_are_tolerated_while_waiting() {
	let mock = Mock::new();
	mock.queue_read_error(std::io::Error::from(std::io::ErrorKind::ConnectionReset));
	mock.reply_to("Main.Power?", &["Main.Power=On"]);
	let mut port = port_with(&mock, 500, 50);

	let reply = port.command_reply("Main.Power?").unwrap();
	assert_eq!(reply.value(), Some("On"));
}

#[test]
fn write_error_is_reported() {
	let mock = Mock::new();
	mock.write_error(Some(std::io::Error::from(std::io::ErrorKind::BrokenPipe)));
	let mut port = port_with(&mock, 300, 50);

	let err = port.command_reply("Main.Power?").unwrap_err();
	assert!(matches!(err, Error::Io(_)), "{err:?}");
}

#[test]
fn invalid_command_is_not_sent() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 300, 50);

	let err = port.command("Main.Power?\r\nMain.Power=Off").unwrap_err();
	assert!(matches!(err, Error::InvalidCommand(_)), "{err:?}");
	assert!(mock.written().is_empty());
}

#[test]
fn partial_line_stays_buffered() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 300, 50);

	mock.append_data("Main.Pow");
	assert_eq!(port.read_line(Duration::from_millis(50)).unwrap(), None);
	mock.append_data("er=On\r\nMain.Mute=Off\r\n");
	let line = port.read_line(Duration::from_millis(50)).unwrap().unwrap();
	assert_eq!(line.text(), "Main.Power=On");
	// The second line arrived in the same chunk and is returned without a read.
	let line = port.read_line(Duration::ZERO).unwrap().unwrap();
	assert_eq!(line.text(), "Main.Mute=Off");
	assert!(mock.is_empty());
}

#[test]
fn read_line_restores_timeout() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 300, 50);
	port.backend_mut()
		.set_read_timeout(Some(Duration::from_secs(7)))
		.unwrap();

	assert_eq!(port.read_line(Duration::from_millis(20)).unwrap(), None);
	assert_eq!(
		port.backend().read_timeout().unwrap(),
		Some(Duration::from_secs(7))
	);
}

#[test]
fn read_line_reports_hard_errors() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 300, 50);
	mock.queue_read_error(std::io::Error::from(std::io::ErrorKind::ConnectionAborted));

	let err = port.read_line(Duration::from_millis(50)).unwrap_err();
	assert_eq!(err.kind(), std::io::ErrorKind::ConnectionAborted);
}

#[test]
fn poisoned_port_reports_error_once() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 300, 50);
	port.poison(std::io::Error::new(std::io::ErrorKind::Other, "poisoned"));

	assert!(port.read_line(Duration::from_millis(10)).is_err());
	assert_eq!(port.read_line(Duration::from_millis(10)).unwrap(), None);
}

#[test]
fn close_closes_backend() {
	let mock = Mock::new();
	let mut port = port_with(&mock, 300, 50);
	port.close().unwrap();
	assert!(mock.is_closed());
}
