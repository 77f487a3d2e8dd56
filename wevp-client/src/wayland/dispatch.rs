// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use tracing::{debug, trace};
use wayland_client::{
    delegate_noop,
    protocol::{
        wl_buffer, wl_callback, wl_compositor, wl_registry, wl_shell, wl_shell_surface, wl_shm,
        wl_shm_pool, wl_surface,
    },
    Connection, Dispatch, QueueHandle, WEnum,
};

use super::State;
use crate::{
    buffer::BufferTag,
    protocols::wevp_embed::{wevp_embedder, wevp_view},
    registry::GlobalCapability,
    surface::SurfaceKey,
    transport::Event,
};

delegate_noop!(State: wl_compositor::WlCompositor);
delegate_noop!(State: wl_shm_pool::WlShmPool);
delegate_noop!(State: wl_shell::WlShell);

impl Dispatch<wl_registry::WlRegistry, ()> for State {
    fn event(
        state: &mut Self,
        _registry: &wl_registry::WlRegistry,
        event: wl_registry::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_registry::Event::Global {
                name,
                interface,
                version,
            } => state.handle(Event::Global(GlobalCapability {
                name,
                interface,
                version,
            })),
            wl_registry::Event::GlobalRemove { name } => {
                state.handle(Event::GlobalRemove { name })
            }
            _ => (),
        }
    }
}

impl Dispatch<wl_shm::WlShm, ()> for State {
    fn event(
        state: &mut Self,
        _shm: &wl_shm::WlShm,
        event: wl_shm::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_shm::Event::Format { format } = event {
            let code = match format {
                WEnum::Value(format) => u32::from(format),
                WEnum::Unknown(raw) => raw,
            };

            state.handle(Event::ShmFormat(code));
        }
    }
}

impl Dispatch<wl_surface::WlSurface, SurfaceKey> for State {
    fn event(
        _state: &mut Self,
        _surface: &wl_surface::WlSurface,
        event: wl_surface::Event,
        key: &SurfaceKey,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        trace!(surface = ?key, ?event, "surface event");
    }
}

impl Dispatch<wl_callback::WlCallback, SurfaceKey> for State {
    fn event(
        state: &mut Self,
        _callback: &wl_callback::WlCallback,
        event: wl_callback::Event,
        key: &SurfaceKey,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_callback::Event::Done { callback_data } = event {
            state.handle(Event::FrameDone {
                surface: *key,
                time: callback_data,
            });
        }
    }
}

impl Dispatch<wl_buffer::WlBuffer, BufferTag> for State {
    fn event(
        state: &mut Self,
        _buffer: &wl_buffer::WlBuffer,
        event: wl_buffer::Event,
        tag: &BufferTag,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        if let wl_buffer::Event::Release = event {
            state.handle(Event::BufferRelease(*tag));
        }
    }
}

impl Dispatch<wl_shell_surface::WlShellSurface, SurfaceKey> for State {
    fn event(
        state: &mut Self,
        _shell_surface: &wl_shell_surface::WlShellSurface,
        event: wl_shell_surface::Event,
        key: &SurfaceKey,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wl_shell_surface::Event::Ping { serial } => state.handle(Event::ToplevelPing {
                surface: *key,
                serial,
            }),
            wl_shell_surface::Event::Configure { width, height, .. } => {
                // Windows keep their configured size.
                debug!(surface = ?key, width, height, "ignoring shell configure");
            }
            _ => (),
        }
    }
}

impl Dispatch<wevp_embedder::WevpEmbedder, ()> for State {
    fn event(
        state: &mut Self,
        _embedder: &wevp_embedder::WevpEmbedder,
        event: wevp_embedder::Event,
        _data: &(),
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        match event {
            wevp_embedder::Event::Ping { serial } => state.handle(Event::Ping { serial }),
            wevp_embedder::Event::ViewRequested {
                serial,
                width,
                height,
                scale,
            } => state.handle(Event::ViewRequested {
                serial,
                size: glam::UVec2::new(width, height),
                scale,
            }),
        }
    }
}

impl Dispatch<wevp_view::WevpView, SurfaceKey> for State {
    fn event(
        state: &mut Self,
        _view: &wevp_view::WevpView,
        event: wevp_view::Event,
        key: &SurfaceKey,
        _conn: &Connection,
        _qh: &QueueHandle<Self>,
    ) {
        let surface = *key;
        match event {
            wevp_view::Event::Resized { width, height } => state.handle(Event::ViewResized {
                surface,
                size: glam::UVec2::new(width, height),
            }),
            wevp_view::Event::Rescaled { scale } => {
                state.handle(Event::ViewRescaled { surface, scale })
            }
            wevp_view::Event::Removed => state.handle(Event::ViewRemoved { surface }),
        }
    }
}
