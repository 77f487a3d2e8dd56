// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use std::{fmt, os::fd::BorrowedFd};

use crate::{
    buffer::{BufferGeometry, BufferTag},
    registry::{Capability, GlobalCapability},
    surface::SurfaceKey,
    Error,
};

/// The requests the core sends to the compositor. The wayland implementation
/// lives in [crate::wayland]; tests use a recording mock.
///
/// Objects that produce events are created with the key of the surface they
/// belong to, so that their events can be routed back without lookups.
pub trait Transport {
    type Surface: fmt::Debug;
    type Buffer: fmt::Debug;
    type Callback: fmt::Debug;
    type ShellSurface: fmt::Debug;
    type View: fmt::Debug;

    fn bind(&mut self, capability: Capability, global: &GlobalCapability, version: u32);
    fn release(&mut self, capability: Capability);

    fn create_surface(&mut self, key: SurfaceKey) -> Result<Self::Surface, Error>;
    fn destroy_surface(&mut self, surface: Self::Surface);

    /// Registers the fd as a pool, creates one buffer spanning it, and
    /// destroys the pool again.
    fn create_buffer(
        &mut self,
        tag: BufferTag,
        fd: BorrowedFd<'_>,
        geometry: &BufferGeometry,
    ) -> Result<Self::Buffer, Error>;
    fn destroy_buffer(&mut self, buffer: Self::Buffer);

    fn set_buffer_scale(&mut self, surface: &Self::Surface, scale: u32);
    fn damage(&mut self, surface: &Self::Surface, width: u32, height: u32);
    fn attach(&mut self, surface: &Self::Surface, buffer: &Self::Buffer);
    fn frame(&mut self, surface: &Self::Surface, key: SurfaceKey) -> Self::Callback;
    fn commit(&mut self, surface: &Self::Surface);

    fn create_toplevel(
        &mut self,
        key: SurfaceKey,
        surface: &Self::Surface,
        title: &str,
    ) -> Result<Self::ShellSurface, Error>;
    fn pong_toplevel(&mut self, shell_surface: &Self::ShellSurface, serial: u32);

    fn pong(&mut self, serial: u32) -> Result<(), Error>;
    fn create_view(
        &mut self,
        key: SurfaceKey,
        serial: u32,
        surface: &Self::Surface,
        size: glam::UVec2,
        scale: u32,
    ) -> Result<Self::View, Error>;
    fn destroy_view(&mut self, view: Self::View);
}

/// Everything the compositor can tell us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Global(GlobalCapability),
    GlobalRemove {
        name: u32,
    },
    ShmFormat(u32),
    FrameDone {
        surface: SurfaceKey,
        time: u32,
    },
    BufferRelease(BufferTag),
    Ping {
        serial: u32,
    },
    ToplevelPing {
        surface: SurfaceKey,
        serial: u32,
    },
    ViewRequested {
        serial: u32,
        size: glam::UVec2,
        scale: u32,
    },
    ViewResized {
        surface: SurfaceKey,
        size: glam::UVec2,
    },
    ViewRescaled {
        surface: SurfaceKey,
        scale: u32,
    },
    ViewRemoved {
        surface: SurfaceKey,
    },
}
