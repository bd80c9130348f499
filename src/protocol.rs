use crate::error::CommandError;
use crate::session::BROADCAST_TARGET;

pub const SUCCESS: &str = "SUCCESS";
pub const FAIL: &str = "FAIL";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Connect(String),
    Id,
    ChangeId(String),
    Who,
    MsgAll(String),
    Msg { to: String, text: String },
    Recv,
    Leave,
}

/// Parses one frame. The frame splits into at most three space-separated
/// tokens and the last one keeps the rest of the line verbatim.
pub fn parse_command(line: &str) -> Result<Command, CommandError> {
    let line = line.trim_end_matches(['\r', '\n']);
    let mut parts = line.splitn(2, ' ');

    let cmd = parts.next().unwrap_or("").to_uppercase();

    let rest = parts.next();

    match cmd.as_str() {
        "CONNECT" => {
            // the name is the second token; anything after it is ignored
            let name = rest.unwrap_or("").split(' ').next().unwrap_or("");
            Ok(Command::Connect(name.to_string()))
        }
        "ID" => no_args(rest, Command::Id, "ID"),
        "WHO" => no_args(rest, Command::Who, "WHO"),
        "RECV" => no_args(rest, Command::Recv, "RECV"),
        "LEAVE" => no_args(rest, Command::Leave, "LEAVE"),
        "CHANGE" => {
            let usage = "CHANGE ID <initials>";
            let mut args = rest.ok_or(CommandError::Malformed(usage))?.splitn(2, ' ');

            let sub = args.next().unwrap_or("");
            if !sub.eq_ignore_ascii_case("ID") {
                return Err(CommandError::Malformed(usage));
            }

            match args.next() {
                Some(initials) if !initials.is_empty() => Ok(Command::ChangeId(initials.to_string())),
                _ => Err(CommandError::Malformed(usage)),
            }
        }
        "MSG" => {
            let usage = "MSG <name|ALL> <text>";
            let mut args = rest.ok_or(CommandError::Malformed(usage))?.splitn(2, ' ');

            let to = args.next().unwrap_or("");
            let text = args.next().ok_or(CommandError::Malformed(usage))?;
            if to.is_empty() {
                return Err(CommandError::Malformed(usage));
            }

            if to == BROADCAST_TARGET {
                Ok(Command::MsgAll(text.to_string()))
            } else {
                Ok(Command::Msg {
                    to: to.to_string(),
                    text: text.to_string(),
                })
            }
        }
        _ => Err(CommandError::Unknown(cmd)),
    }
}

fn no_args(rest: Option<&str>, cmd: Command, usage: &'static str) -> Result<Command, CommandError> {
    match rest {
        None | Some("") => Ok(cmd),
        Some(_) => Err(CommandError::Malformed(usage)),
    }
}
