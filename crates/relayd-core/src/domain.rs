use std::fmt;

/// Telegram chat id of a remote command issuer.
///
/// This is the only authorization key; usernames are never trusted.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SenderId(pub i64);

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Telegram update id (monotonic per bot).
pub type UpdateId = i64;
