//! Error types for building probers.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FactoryError {
    #[error("unknown prober type: {0}")]
    UnknownProberType(String),

    #[error("unknown icmp mode: {0}")]
    UnknownIcmpMode(String),
}
