//! Stdin control surface.
//!
//! Stands in for the original hardware triggers: one command starts a block
//! transfer, one cycles the QoS level. Lines are read on a dedicated thread
//! and handed to the main loop through a bounded channel.

use std::io::BufRead;

use crossbeam_channel::{Receiver, bounded};
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Transfer the named file, or the first discovered image when `None`.
    Send(Option<String>),
    /// Cycle the configured QoS level 0 -> 1 -> 2 -> 0.
    CycleQos,
    Quit,
}

pub fn parse_command(line: &str) -> Option<Command> {
    let mut words = line.split_whitespace();
    match words.next()? {
        "send" => Some(Command::Send(words.next().map(str::to_string))),
        "qos" => Some(Command::CycleQos),
        "quit" | "exit" => Some(Command::Quit),
        _ => None,
    }
}

/// Read commands from stdin on a background thread.
pub fn spawn_stdin_reader() -> Receiver<Command> {
    let (tx, rx) = bounded(8);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if line.trim().is_empty() {
                continue;
            }
            match parse_command(&line) {
                Some(command) => {
                    let quit = command == Command::Quit;
                    if tx.send(command).is_err() || quit {
                        break;
                    }
                }
                None => warn!(line = %line, "unknown command (try: send [file], qos, quit)"),
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_commands() {
        assert_eq!(parse_command("send"), Some(Command::Send(None)));
        assert_eq!(
            parse_command("send cat.jpg"),
            Some(Command::Send(Some("cat.jpg".into())))
        );
        assert_eq!(parse_command("qos"), Some(Command::CycleQos));
        assert_eq!(parse_command("quit"), Some(Command::Quit));
        assert_eq!(parse_command("exit"), Some(Command::Quit));
        assert_eq!(parse_command("bogus"), None);
        assert_eq!(parse_command(""), None);
    }
}
