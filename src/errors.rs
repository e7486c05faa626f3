use crate::{dlc::Phase, parties::Contractor};

/// The broad class of an [`Error`]. Callers can use this to decide whether
/// a failure is recoverable (e.g. by waiting, or by re-funding the wallet)
/// or whether the contract negotiation must be abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Malformed conditions, deals, keys or messages.
    Validation,
    /// An operation was called out of sequence.
    ProtocolState,
    /// A signature failed verification. Never downgraded.
    CryptoVerification,
    /// The wallet could not fund the contract, or a broadcast was rejected.
    Funding,
    /// Called too early. Recoverable by waiting.
    Timing,
    /// An oracle period was unknown or not yet resolved.
    Oracle,
    /// Arithmetic or encoding failures which should not happen with valid input.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid contract conditions: {0}")]
    InvalidConditions(String),

    #[error("index {index} out of range (length {len})")]
    OutOfRange { index: usize, len: usize },

    #[error("invalid public key")]
    InvalidKey,

    #[error("invalid message")]
    InvalidMessage,

    #[error("invalid signature encoding")]
    InvalidSignature,

    #[error("counterparty data does not match: {0}")]
    Mismatch(String),

    #[error("{operation} is not allowed in phase {phase:?}")]
    InvalidState {
        operation: &'static str,
        phase: Phase,
    },

    #[error("missing {what} of {party:?}")]
    Missing {
        what: &'static str,
        party: Contractor,
    },

    #[error("deal {0} has no oracle message commitment")]
    MissingCommitment(usize),

    #[error("deal {0} has no execution output to claim")]
    NothingToClaim(usize),

    #[error("no deal has been fixed")]
    NotFixed,

    #[error("deal {fixed} is already fixed")]
    AlreadyFixed { fixed: usize },

    #[error("oracle signature verification failed")]
    Verification,

    #[error("insufficient funds: need {needed}")]
    InsufficientFunds { needed: bitcoin::Amount },

    #[error("transaction broadcast rejected: {0}")]
    Broadcast(String),

    #[error("refund is locked until height {lock_time}, current height is {height}")]
    PrematureRefund { height: u32, lock_time: u32 },

    #[error("deals cannot be fixed before {fixing_time}")]
    TooEarly {
        fixing_time: chrono::DateTime<chrono::Utc>,
    },

    #[error("unknown oracle period {0}")]
    NotFound(chrono::NaiveDate),

    #[error("oracle period {0} has not been resolved")]
    NotReady(chrono::NaiveDate),

    #[error("invalid oracle: {0}")]
    InvalidOracle(&'static str),

    #[error("oracle period {0} was already resolved with different messages")]
    AlreadyResolved(chrono::NaiveDate),

    #[error("fee calculation failed")]
    Fee,

    #[error("output value is below the dust threshold")]
    Dust,

    #[error("wallet error: {0}")]
    Wallet(String),

    #[error("sighash error: {0}")]
    Sighash(#[from] bitcoin::sighash::Error),

    #[error("key derivation error: {0}")]
    Bip32(#[from] bitcoin::bip32::Error),
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidConditions(_)
            | Error::OutOfRange { .. }
            | Error::InvalidKey
            | Error::InvalidMessage
            | Error::InvalidSignature
            | Error::Mismatch(_)
            | Error::Dust => ErrorKind::Validation,

            Error::InvalidState { .. }
            | Error::Missing { .. }
            | Error::MissingCommitment(_)
            | Error::NothingToClaim(_)
            | Error::NotFixed
            | Error::AlreadyFixed { .. } => ErrorKind::ProtocolState,

            Error::Verification => ErrorKind::CryptoVerification,

            Error::InsufficientFunds { .. } | Error::Broadcast(_) | Error::Wallet(_) => {
                ErrorKind::Funding
            }

            Error::PrematureRefund { .. } | Error::TooEarly { .. } => ErrorKind::Timing,

            Error::NotFound(_)
            | Error::NotReady(_)
            | Error::InvalidOracle(_)
            | Error::AlreadyResolved(_) => ErrorKind::Oracle,

            Error::Fee | Error::Sighash(_) | Error::Bip32(_) => ErrorKind::Internal,
        }
    }
}

impl From<secp::errors::InvalidPointBytes> for Error {
    fn from(_: secp::errors::InvalidPointBytes) -> Self {
        Error::InvalidKey
    }
}

impl From<secp::errors::InvalidScalarBytes> for Error {
    fn from(_: secp::errors::InvalidScalarBytes) -> Self {
        Error::InvalidSignature
    }
}

impl From<bitcoin::ecdsa::Error> for Error {
    fn from(_: bitcoin::ecdsa::Error) -> Self {
        Error::InvalidSignature
    }
}

impl From<bitcoin::absolute::Error> for Error {
    fn from(e: bitcoin::absolute::Error) -> Self {
        Error::InvalidConditions(e.to_string())
    }
}
