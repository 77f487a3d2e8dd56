// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

//! A shared-memory wayland client core: capability discovery, buffer pools,
//! surfaces and the frame callback loop that drives them.
//!
//! The core is written against [transport::Transport], and [Client] consumes
//! [transport::Event]s. [wayland] connects both to a real compositor.

pub mod buffer;
pub mod client;
pub mod config;
mod error;
pub mod frame;
pub mod logging;
pub mod paint;
mod protocols;
pub mod registry;
pub mod surface;
pub mod transport;
pub mod view;
pub mod wayland;

#[cfg(test)]
mod testing;

pub use client::Client;
pub use error::Error;
pub use registry::Capability;
