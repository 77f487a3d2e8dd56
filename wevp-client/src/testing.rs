// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, os::fd::BorrowedFd};

use crate::{
    buffer::{BufferGeometry, BufferTag},
    paint::{Canvas, Painter},
    registry::{Capability, CapabilityRegistry, GlobalCapability},
    surface::SurfaceKey,
    transport::{Event, Transport},
    Error,
};

/// A request as seen by the compositor. Object handles are small integers
/// allocated in creation order, starting at 1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Bind {
        capability: Capability,
        name: u32,
        version: u32,
    },
    Release(Capability),
    CreateSurface(u32),
    DestroySurface(u32),
    CreateBuffer {
        buffer: u32,
        width: u32,
        height: u32,
        stride: u32,
    },
    DestroyBuffer(u32),
    SetBufferScale {
        surface: u32,
        scale: u32,
    },
    Damage {
        surface: u32,
        width: u32,
        height: u32,
    },
    Attach {
        surface: u32,
        buffer: u32,
    },
    Frame {
        surface: u32,
    },
    Commit {
        surface: u32,
    },
    CreateToplevel {
        surface: u32,
        title: String,
    },
    PongToplevel(u32),
    Pong(u32),
    CreateView {
        serial: u32,
        surface: u32,
        width: u32,
        height: u32,
        scale: u32,
    },
    DestroyView(u32),
}

/// Records requests, and produces the events a well-behaved compositor would
/// send in response.
#[derive(Debug, Default)]
pub struct MockTransport {
    /// Makes every buffer creation fail, like an exhausted shm pool.
    pub fail_allocations: bool,
    next_id: u32,
    requests: Vec<Request>,
    buffers: HashMap<u32, BufferTag>,
    callbacks: HashMap<SurfaceKey, u32>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take_requests(&mut self) -> Vec<Request> {
        std::mem::take(&mut self.requests)
    }

    /// Fires the outstanding frame callback for a surface.
    pub fn frame_done(&mut self, surface: SurfaceKey, time: u32) -> Event {
        if self.callbacks.remove(&surface).is_none() {
            panic!("no frame callback outstanding for {:?}", surface);
        }

        Event::FrameDone { surface, time }
    }

    pub fn has_callback(&self, surface: SurfaceKey) -> bool {
        self.callbacks.contains_key(&surface)
    }

    pub fn release(&mut self, buffer: u32) -> Event {
        let tag = self
            .buffers
            .get(&buffer)
            .copied()
            .unwrap_or_else(|| panic!("release of unknown buffer {}", buffer));

        Event::BufferRelease(tag)
    }

    fn alloc(&mut self) -> u32 {
        self.next_id += 1;
        self.next_id
    }
}

impl Transport for MockTransport {
    type Surface = u32;
    type Buffer = u32;
    type Callback = u32;
    type ShellSurface = u32;
    type View = u32;

    fn bind(&mut self, capability: Capability, global: &GlobalCapability, version: u32) {
        self.requests.push(Request::Bind {
            capability,
            name: global.name,
            version,
        });
    }

    fn release(&mut self, capability: Capability) {
        self.requests.push(Request::Release(capability));
    }

    fn create_surface(&mut self, _key: SurfaceKey) -> Result<u32, Error> {
        let id = self.alloc();
        self.requests.push(Request::CreateSurface(id));
        Ok(id)
    }

    fn destroy_surface(&mut self, surface: u32) {
        self.requests.push(Request::DestroySurface(surface));
    }

    fn create_buffer(
        &mut self,
        tag: BufferTag,
        _fd: BorrowedFd<'_>,
        geometry: &BufferGeometry,
    ) -> Result<u32, Error> {
        if self.fail_allocations {
            return Err(Error::Allocation("out of memory".to_owned()));
        }

        let id = self.alloc();
        self.buffers.insert(id, tag);
        self.requests.push(Request::CreateBuffer {
            buffer: id,
            width: geometry.width,
            height: geometry.height,
            stride: geometry.stride,
        });

        Ok(id)
    }

    fn destroy_buffer(&mut self, buffer: u32) {
        self.requests.push(Request::DestroyBuffer(buffer));
    }

    fn set_buffer_scale(&mut self, surface: &u32, scale: u32) {
        self.requests.push(Request::SetBufferScale {
            surface: *surface,
            scale,
        });
    }

    fn damage(&mut self, surface: &u32, width: u32, height: u32) {
        self.requests.push(Request::Damage {
            surface: *surface,
            width,
            height,
        });
    }

    fn attach(&mut self, surface: &u32, buffer: &u32) {
        self.requests.push(Request::Attach {
            surface: *surface,
            buffer: *buffer,
        });
    }

    fn frame(&mut self, surface: &u32, key: SurfaceKey) -> u32 {
        let id = self.alloc();
        if self.callbacks.insert(key, id).is_some() {
            panic!("second frame callback requested for {:?}", key);
        }

        self.requests.push(Request::Frame { surface: *surface });
        id
    }

    fn commit(&mut self, surface: &u32) {
        self.requests.push(Request::Commit { surface: *surface });
    }

    fn create_toplevel(&mut self, _key: SurfaceKey, surface: &u32, title: &str) -> Result<u32, Error> {
        let id = self.alloc();
        self.requests.push(Request::CreateToplevel {
            surface: *surface,
            title: title.to_owned(),
        });

        Ok(id)
    }

    fn pong_toplevel(&mut self, _shell_surface: &u32, serial: u32) {
        self.requests.push(Request::PongToplevel(serial));
    }

    fn pong(&mut self, serial: u32) -> Result<(), Error> {
        self.requests.push(Request::Pong(serial));
        Ok(())
    }

    fn create_view(
        &mut self,
        _key: SurfaceKey,
        serial: u32,
        surface: &u32,
        size: glam::UVec2,
        scale: u32,
    ) -> Result<u32, Error> {
        let id = self.alloc();
        self.requests.push(Request::CreateView {
            serial,
            surface: *surface,
            width: size.x,
            height: size.y,
            scale,
        });

        Ok(id)
    }

    fn destroy_view(&mut self, view: u32) {
        self.requests.push(Request::DestroyView(view));
    }
}

/// Builds a registry with the given capabilities advertised and bound, then
/// clears the bind requests from the transport.
pub fn registry_with(transport: &mut MockTransport, caps: &[Capability]) -> CapabilityRegistry {
    let mut registry = CapabilityRegistry::new(caps);
    for (idx, cap) in caps.iter().enumerate() {
        registry.on_global_added(
            transport,
            GlobalCapability {
                name: idx as u32 + 1,
                interface: cap.interface().to_owned(),
                version: cap.max_version(),
            },
        );
    }

    transport.take_requests();
    registry
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PaintCall {
    pub time: u32,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Default)]
pub struct RecordingPainter {
    pub calls: Vec<PaintCall>,
}

impl RecordingPainter {
    pub fn times(&self) -> Vec<u32> {
        self.calls.iter().map(|c| c.time).collect()
    }
}

impl Painter for RecordingPainter {
    fn paint(&mut self, canvas: &mut Canvas<'_>, time: u32) {
        canvas.pixels.fill(0xff);
        self.calls.push(PaintCall {
            time,
            width: canvas.geometry.width,
            height: canvas.geometry.height,
        });
    }
}
