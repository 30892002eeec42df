//! Operator console
//!
//! Reads commands from stdin on a plain thread so a blocked read never holds
//! up runtime shutdown.

use std::io::{BufRead, Write};

use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorCommand {
    /// Force-drop the chat connection to exercise recovery
    Kill,
    Quit,
}

impl OperatorCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            "kill" => Some(OperatorCommand::Kill),
            "quit" => Some(OperatorCommand::Quit),
            _ => None,
        }
    }
}

/// Start the prompt loop. EOF on stdin is reported as [`OperatorCommand::Quit`].
pub fn spawn() -> mpsc::UnboundedReceiver<OperatorCommand> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        let mut lines = stdin.lock().lines();
        loop {
            print!("> ");
            let _ = std::io::stdout().flush();

            let command = match lines.next() {
                Some(Ok(line)) => match OperatorCommand::parse(&line) {
                    Some(command) => command,
                    None => {
                        println!("Unknown command!");
                        continue;
                    }
                },
                Some(Err(_)) | None => OperatorCommand::Quit,
            };

            if tx.send(command).is_err() || command == OperatorCommand::Quit {
                break;
            }
        }
    });
    rx
}
