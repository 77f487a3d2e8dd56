// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use crate::registry::Capability;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// The connection dropped, or the compositor sent something we couldn't
    /// decode. Always fatal.
    #[error("transport error: {0}")]
    Transport(String),
    /// A required global was never advertised, or was removed.
    #[error("{0} is unavailable")]
    CapabilityUnavailable(Capability),
    #[error("failed to allocate shared memory: {0}")]
    Allocation(String),
    /// A commit was attempted while the previous frame callback is still
    /// outstanding.
    #[error("frame callback already pending")]
    FramePending,
}

impl Error {
    /// Whether the error should terminate the dispatch loop.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Transport(_) | Error::Allocation(_))
    }
}

impl From<wayland_client::DispatchError> for Error {
    fn from(err: wayland_client::DispatchError) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<wayland_client::backend::WaylandError> for Error {
    fn from(err: wayland_client::backend::WaylandError) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<wayland_client::ConnectError> for Error {
    fn from(err: wayland_client::ConnectError) -> Self {
        Error::Transport(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Error::Transport(err.to_string())
    }
}
