//! Broker error types.

use thiserror::Error;

/// Message transport errors.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),

    #[error("broker did not confirm publish to {exchange} / {routing_key}")]
    NotConfirmed {
        exchange: String,
        routing_key: String,
    },
}

/// Result type for broker operations.
pub type BrokerResult<T> = std::result::Result<T, BrokerError>;
