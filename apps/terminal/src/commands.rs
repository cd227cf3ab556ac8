//! Typed terminal commands mapped onto workflow intents.

use shared::domain::CatalogIndex;
use workflow::WorkflowHandle;

pub const HELP: &str = "commands: pick <n> | unpick <pos> | capture | confirm | discard | ack | restart | quit";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Pick(CatalogIndex),
    /// One-based position in the current selection, as printed.
    Unpick(usize),
    Capture,
    Confirm,
    Discard,
    Acknowledge,
    Restart,
    Quit,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Err(HELP.to_string());
        };
        let argument = words.next();
        if words.next().is_some() {
            return Err(format!("too many arguments for `{verb}`"));
        }

        let command = match (verb.to_ascii_lowercase().as_str(), argument) {
            ("pick" | "p", Some(raw)) => Command::Pick(CatalogIndex(parse_number(raw)?)),
            ("unpick" | "u", Some(raw)) => {
                let position: usize = parse_number(raw)?;
                if position == 0 {
                    return Err("positions start at 1".to_string());
                }
                Command::Unpick(position)
            }
            ("capture" | "c", None) => Command::Capture,
            ("confirm" | "y", None) => Command::Confirm,
            ("discard" | "n", None) => Command::Discard,
            ("ack" | "ok", None) => Command::Acknowledge,
            ("restart" | "r", None) => Command::Restart,
            ("quit" | "exit" | "q", None) => Command::Quit,
            _ => return Err(format!("unknown command `{}`; {HELP}", line.trim())),
        };
        Ok(command)
    }

    pub fn send(self, handle: &WorkflowHandle) -> bool {
        match self {
            Command::Pick(index) => handle.pick_image(index),
            Command::Unpick(position) => handle.unpick(position - 1),
            Command::Capture => handle.capture_frame(),
            Command::Confirm => handle.confirm_capture(),
            Command::Discard => handle.discard_capture(),
            Command::Acknowledge => handle.acknowledge_error(),
            Command::Restart => handle.restart(),
            Command::Quit => handle.shutdown(),
        }
    }
}

fn parse_number<T: std::str::FromStr>(raw: &str) -> Result<T, String> {
    raw.parse()
        .map_err(|_| format!("`{raw}` is not a valid number"))
}

#[cfg(test)]
#[path = "tests/commands_tests.rs"]
mod tests;
