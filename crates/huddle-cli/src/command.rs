//! Input line parsing.

/// One line of user input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// `/create [nickname]`
    Create { nickname: Option<String> },
    /// `/join ROOM [nickname]`
    Join { room: String, nickname: Option<String> },
    /// `/leave`
    Leave,
    /// `/typing on|off`
    Typing(bool),
    /// `/who`
    Who,
    /// `/help`
    Help,
    /// `/quit`
    Quit,
    /// Anything not starting with `/` is a chat message.
    Say(String),
    /// Slash command that did not parse.
    Invalid(String),
}

pub const HELP: &str = "\
commands:
  /create [nickname]      create a room
  /join ROOM [nickname]   join a room
  /leave                  leave the current room
  /typing on|off          set the typing flag
  /who                    show connection and session
  /quit                   exit
anything else is sent to the room";

pub fn parse(line: &str) -> Command {
    let line = line.trim_end_matches(['\r', '\n']);
    let Some(rest) = line.strip_prefix('/') else {
        return Command::Say(line.to_owned());
    };

    let mut words = rest.split_whitespace();
    let name = words.next().unwrap_or_default();
    let arg = words.next().map(str::to_owned);
    let extra = words.next().map(str::to_owned);

    match (name, arg, extra) {
        ("create", nickname, None) => Command::Create { nickname },
        ("join", Some(room), nickname) => Command::Join { room, nickname },
        ("leave", None, None) => Command::Leave,
        ("typing", Some(flag), None) if flag == "on" => Command::Typing(true),
        ("typing", Some(flag), None) if flag == "off" => Command::Typing(false),
        ("who", None, None) => Command::Who,
        ("help", None, None) => Command::Help,
        ("quit" | "exit", None, None) => Command::Quit,
        _ => Command::Invalid(line.to_owned()),
    }
}
