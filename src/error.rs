/// Error types for the threshold proxy re-encryption library
use thiserror::Error;

/// Errors raised by the key algebra, re-encryption and combination steps.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PreError {
    /// Invalid parameter provided (e.g., threshold of zero, threshold above share count)
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    /// Fewer distinct partials than the threshold were supplied to the combiner
    #[error("insufficient shares: required {required}, provided {provided}")]
    InsufficientShares { required: usize, provided: usize },
    /// A partial does not belong to the policy/capsule being combined
    #[error("invalid fragment: {0}")]
    InvalidFragment(String),
    /// A capsule failed its integrity check before re-encryption
    #[error("capsule failed verification")]
    InvalidCapsule,
    /// Wrong key, tampered capsule or tampered ciphertext; deliberately not more specific
    #[error("decapsulation failed")]
    DecapsulationFailure,
    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<ark_serialize::SerializationError> for PreError {
    fn from(err: ark_serialize::SerializationError) -> Self {
        PreError::Serialization(err.to_string())
    }
}

impl From<bincode::Error> for PreError {
    fn from(err: bincode::Error) -> Self {
        PreError::Serialization(err.to_string())
    }
}

/// Errors surfaced by the staking registry collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// No eligible staker remains once exclusions and duration are applied
    #[error("not enough eligible stakers")]
    NotEnoughStakers,
    #[error("registry unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AddressError {
    #[error("invalid hex in address: {0}")]
    InvalidHex(String),
    #[error("address must be 20 bytes, got {0}")]
    InvalidLength(usize),
}

/// Errors raised while building the candidate proxy pool.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectionError {
    /// The pool can never yield enough successes for the policy
    #[error("insufficient pool: {available} candidates available, {required} required")]
    InsufficientPool { available: usize, required: usize },
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),
}

/// Transport-level failure while contacting a single proxy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContactError {
    #[error("proxy {0} unreachable")]
    Unreachable(String),
    #[error("proxy {0} timed out")]
    Timeout(String),
    #[error("proxy {address} rejected the request: {reason}")]
    Rejected { address: String, reason: String },
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid config file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("configuration error: {0}")]
    Invalid(String),
}

/// Errors returned by the policy grant and recovery drivers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GrantError {
    #[error(transparent)]
    Crypto(#[from] PreError),
    #[error(transparent)]
    Selection(#[from] SelectionError),
    /// The candidate pool ran dry before enough proxies agreed to take part,
    /// or a dealt fragment could not be delivered
    #[error("policy grant incomplete: {successes} of {required} proxies succeeded")]
    Incomplete { successes: usize, required: usize },
    /// Not enough proxies returned a verified partial
    #[error("collected {collected} verified partials, {required} required")]
    InsufficientPartials { collected: usize, required: usize },
}
