// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use crate::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameStatus {
    Idle,
    Committed,
    CallbackPending,
}

/// Per-surface frame pacing. A commit subscribes a frame callback, and the
/// next commit has to wait for it to fire. There is never more than one
/// callback outstanding.
#[derive(Debug)]
pub enum FrameState<C> {
    Idle,
    Committed,
    CallbackPending(C),
}

impl<C> Default for FrameState<C> {
    fn default() -> Self {
        FrameState::Idle
    }
}

impl<C> FrameState<C> {
    pub fn status(&self) -> FrameStatus {
        match self {
            FrameState::Idle => FrameStatus::Idle,
            FrameState::Committed => FrameStatus::Committed,
            FrameState::CallbackPending(_) => FrameStatus::CallbackPending,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, FrameState::CallbackPending(_))
    }

    pub fn begin_commit(&mut self) -> Result<(), Error> {
        match self {
            FrameState::Idle => {
                *self = FrameState::Committed;
                Ok(())
            }
            _ => Err(Error::FramePending),
        }
    }

    pub fn callback_registered(&mut self, callback: C) {
        debug_assert!(matches!(self, FrameState::Committed));
        *self = FrameState::CallbackPending(callback);
    }

    /// Consumes the pending callback, if any, and returns to idle.
    pub fn complete(&mut self) -> Option<C> {
        match std::mem::take(self) {
            FrameState::CallbackPending(cb) => Some(cb),
            other => {
                *self = other;
                None
            }
        }
    }
}
