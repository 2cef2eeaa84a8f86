//! Line-oriented user input.
//!
//! The front end reads one command per line from stdin:
//!
//! ```text
//! connect <host> <topic>
//! disconnect
//! status
//! log
//! help
//! quit
//! ```

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
    /// Missing arguments are kept empty so the monitor can report them
    Connect { host: String, topic: String },
    Disconnect,
    Status,
    Log,
    Help,
    Quit,
}

pub const HELP: &str = "commands: connect <host> <topic> | disconnect | status | log | help | quit";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InputError {
    #[error("Unknown command: {0}")]
    Unknown(String),

    #[error("Too many arguments for {0}")]
    TooManyArguments(&'static str),
}

impl Input {
    /// Parses a line. Blank lines yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<Self>, InputError> {
        let mut words = line.split_whitespace();
        let Some(command) = words.next() else {
            return Ok(None);
        };

        let input = match command.to_ascii_lowercase().as_str() {
            "connect" | "c" => {
                let host = words.next().unwrap_or_default().to_string();
                let topic = words.next().unwrap_or_default().to_string();
                if words.next().is_some() {
                    return Err(InputError::TooManyArguments("connect"));
                }
                Input::Connect { host, topic }
            }
            "disconnect" | "d" => Input::Disconnect,
            "status" | "s" => Input::Status,
            "log" | "l" => Input::Log,
            "help" | "h" | "?" => Input::Help,
            "quit" | "q" | "exit" => Input::Quit,
            other => return Err(InputError::Unknown(other.to_string())),
        };

        Ok(Some(input))
    }
}

/// What happens when stdin runs dry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndOfInput {
    /// Interactive session: closing the input ends the program
    Shutdown,
    /// Started with a broker target, e.g. under a service manager with
    /// stdin closed; keep watching until interrupted
    KeepRunning,
}

impl EndOfInput {
    pub fn for_startup(connect_requested: bool) -> Self {
        if connect_requested {
            EndOfInput::KeepRunning
        } else {
            EndOfInput::Shutdown
        }
    }
}
