//! Command text protocol.

use crate::domain::SenderId;

pub const HELP_TEXT: &str = "Commands:\n\
/start – help\n\
/status – current state\n\
/on, /off – control relay\n\
/whoami – show your chat id\n\
Admin only: /allow <id>, /revoke <id>, /list";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    WhoAmI,
    Status,
    On,
    Off,
    Allow(SenderId),
    Revoke(SenderId),
    List,
    /// `allow`/`revoke` with a missing or non-numeric argument.
    Usage(AdminVerb),
    Unknown,
    /// `/cmd@other_bot` in a group chat; not for us.
    Elsewhere,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AdminVerb {
    Allow,
    Revoke,
}

impl AdminVerb {
    pub fn usage(self) -> &'static str {
        match self {
            AdminVerb::Allow => "Usage: /allow <chat_id>",
            AdminVerb::Revoke => "Usage: /revoke <chat_id>",
        }
    }
}

impl Command {
    /// Commands that only the admin may run.
    pub fn is_admin_only(&self) -> bool {
        matches!(
            self,
            Command::Allow(_) | Command::Revoke(_) | Command::List | Command::Usage(_)
        )
    }
}

/// Split `/cmd@botname args` into a lowercase command token, the addressed
/// bot (if any) and the rest.
fn split_command(text: &str) -> (String, Option<&str>, &str) {
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim();

    let bare = first.strip_prefix('/').unwrap_or(first);
    let (cmd, addressee) = match bare.split_once('@') {
        Some((cmd, bot)) => (cmd, Some(bot)),
        None => (bare, None),
    };

    (cmd.to_lowercase(), addressee, rest)
}

/// Parse without knowing our own username: any `@bot` suffix is accepted.
pub fn parse(text: &str) -> Command {
    parse_for(text, None)
}

/// Parse a message for the bot named `me`.
pub fn parse_for(text: &str, me: Option<&str>) -> Command {
    let (cmd, addressee, rest) = split_command(text);

    if let (Some(to), Some(me)) = (addressee, me) {
        if !to.eq_ignore_ascii_case(me.trim_start_matches('@')) {
            return Command::Elsewhere;
        }
    }

    match cmd.as_str() {
        "allow" => parse_target(rest).map_or(Command::Usage(AdminVerb::Allow), Command::Allow),
        "revoke" => parse_target(rest).map_or(Command::Usage(AdminVerb::Revoke), Command::Revoke),
        _ if !rest.is_empty() => Command::Unknown,
        "start" | "help" => Command::Help,
        "whoami" => Command::WhoAmI,
        "status" => Command::Status,
        "on" => Command::On,
        "off" => Command::Off,
        "list" => Command::List,
        _ => Command::Unknown,
    }
}

// Exactly one integer argument.
fn parse_target(rest: &str) -> Option<SenderId> {
    let mut args = rest.split_whitespace();
    let id = args.next()?.parse::<i64>().ok()?;
    if args.next().is_some() {
        return None;
    }
    Some(SenderId(id))
}
