pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    Parse(ParseError),
    Protocol(ProtocolError),
}

/// The bytes could not be interpreted as a PTP message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    TooShort,
    BadLength,
    BadMessageType,
    BufferTooSmall,
}

/// The message is well formed but must not be processed by this port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolError {
    WrongDomain,
    FromSelf,
    AlternateMaster,
    NegativeCorrection,
    InvalidTimestamp,
}

impl From<ParseError> for Error {
    fn from(err: ParseError) -> Self {
        Error::Parse(err)
    }
}

impl From<ProtocolError> for Error {
    fn from(err: ProtocolError) -> Self {
        Error::Protocol(err)
    }
}

impl core::fmt::Display for Error {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Error::Parse(err) => write!(f, "parse error: {:?}", err),
            Error::Protocol(err) => write!(f, "protocol error: {:?}", err),
        }
    }
}
