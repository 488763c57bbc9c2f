use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RelayError {
    #[error("relay index {index} is out of range")]
    OutOfRange { index: i64 },
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unknown command type `{0}`")]
    UnknownCommand(String),
    #[error("hub is asleep; command ignored")]
    Asleep,
}
