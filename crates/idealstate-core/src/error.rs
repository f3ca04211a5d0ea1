// Copyright 2024 The Idealstate Authors
// SPDX-License-Identifier: Apache-2.0

//! Error types shared by the idealstate crates.

use thiserror::Error;

/// A specialized `Result` type for core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building cluster state snapshots or loading configuration.
#[derive(Debug, Error)]
pub enum Error {
    /// A token in a cluster state string could not be interpreted.
    #[error("invalid cluster state token '{token}': {reason}")]
    InvalidState {
        /// The offending token.
        token: String,
        /// Why the token was rejected.
        reason: String,
    },

    /// An up-states filter contained an unknown state character.
    #[error("unknown node state character '{0}' in up-states filter")]
    InvalidUpStates(char),

    /// A bucket id could not be parsed.
    #[error("invalid bucket id '{input}': {reason}")]
    InvalidBucket {
        /// The rejected input.
        input: String,
        /// Why the input was rejected.
        reason: String,
    },

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Creates an [`Error::InvalidState`] for the given token.
    #[must_use]
    pub fn invalid_state(token: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidState { token: token.into(), reason: reason.into() }
    }

    /// Creates an [`Error::InvalidBucket`] for the given input.
    #[must_use]
    pub fn invalid_bucket(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidBucket { input: input.into(), reason: reason.into() }
    }
}
