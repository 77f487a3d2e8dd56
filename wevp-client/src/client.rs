// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use slotmap::SlotMap;
use tracing::{debug, info, warn};

use crate::{
    config::WindowConfig,
    paint::Painter,
    registry::{Capability, CapabilityRegistry},
    surface::{Context, Role, Surface, SurfaceKey},
    transport::{Event, Transport},
    view::ViewController,
    Error,
};

/// All client-side state for one connection. Events are fed in one at a time,
/// in the order the compositor sent them, and every resulting request is
/// issued on the transport before `handle_event` returns.
pub struct Client<T: Transport, P> {
    registry: CapabilityRegistry,
    surfaces: SlotMap<SurfaceKey, Surface<T>>,
    views: ViewController,
    painter: P,
}

impl<T: Transport, P: Painter> Client<T, P> {
    pub fn new(wanted: &[Capability], painter: P) -> Self {
        Self {
            registry: CapabilityRegistry::new(wanted),
            surfaces: SlotMap::with_key(),
            views: ViewController::new(),
            painter,
        }
    }

    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    pub fn views(&self) -> &ViewController {
        &self.views
    }

    pub fn painter(&self) -> &P {
        &self.painter
    }

    pub fn painter_mut(&mut self) -> &mut P {
        &mut self.painter
    }

    pub fn surface(&self, key: SurfaceKey) -> Option<&Surface<T>> {
        self.surfaces.get(key)
    }

    pub fn surfaces(&self) -> impl Iterator<Item = (SurfaceKey, &Surface<T>)> {
        self.surfaces.iter()
    }

    /// Fails unless every one of `caps` is bound.
    pub fn require(&self, caps: &[Capability]) -> Result<(), Error> {
        for cap in caps {
            self.registry.require(*cap)?;
        }

        Ok(())
    }

    /// Creates a window and commits its first frame. The window is made a
    /// shell toplevel if the compositor offers a shell.
    pub fn create_window(
        &mut self,
        transport: &mut T,
        window: &WindowConfig,
    ) -> Result<SurfaceKey, Error> {
        let shell = self.registry.is_bound(Capability::Shell);
        let size = glam::UVec2::new(window.width, window.height);
        let title = window.title.as_str();

        let mut ctx = Context {
            transport,
            registry: &self.registry,
            painter: &mut self.painter,
        };

        let key = self.surfaces.try_insert_with_key(|key| {
            Surface::create(&mut ctx, key, size, window.scale, |transport, wl_surface| {
                if shell {
                    let toplevel = transport.create_toplevel(key, wl_surface, title)?;
                    Ok(Role::Toplevel(toplevel))
                } else {
                    Ok(Role::None)
                }
            })
        })?;

        info!(
            title,
            width = size.x,
            height = size.y,
            scale = window.scale,
            toplevel = shell,
            "created window"
        );

        Ok(key)
    }

    /// Commits the surface's current buffer. Fails with
    /// [Error::FramePending] if a frame callback is outstanding.
    pub fn commit(&mut self, transport: &mut T, key: SurfaceKey) -> Result<(), Error> {
        match self.surfaces.get_mut(key) {
            Some(surface) => surface.commit(transport),
            None => Ok(()),
        }
    }

    pub fn destroy_surface(&mut self, transport: &mut T, key: SurfaceKey) {
        if let Some(surface) = self.surfaces.remove(key) {
            debug!(surface = ?key, "destroying surface");
            self.views.forget(key);
            surface.destroy(transport);
        }
    }

    /// Destroys every surface. Used before disconnecting.
    pub fn destroy_all(&mut self, transport: &mut T) {
        let keys: Vec<_> = self.surfaces.keys().collect();
        for key in keys {
            self.destroy_surface(transport, key);
        }
    }

    /// Handles one event from the compositor. Anomalies are logged and
    /// ignored; only errors that should end the session are returned.
    pub fn handle_event(&mut self, transport: &mut T, event: Event) -> Result<(), Error> {
        match event {
            Event::Global(global) => {
                self.registry.on_global_added(transport, global);
                Ok(())
            }
            Event::GlobalRemove { name } => {
                self.registry.on_global_removed(transport, name);
                Ok(())
            }
            Event::ShmFormat(format) => {
                self.registry.on_shm_format(format);
                Ok(())
            }
            Event::FrameDone { surface, time } => {
                self.with_surface(transport, surface, |s, ctx| s.on_frame_done(ctx, time))
            }
            Event::BufferRelease(tag) => self.with_surface(transport, tag.surface, |s, ctx| {
                s.on_buffer_released(ctx, tag.pool)
            }),
            Event::Ping { serial } => self.views.on_ping(transport, serial),
            Event::ToplevelPing { surface, serial } => {
                match self.surfaces.get(surface).map(|s| s.role()) {
                    Some(Role::Toplevel(shell_surface)) => {
                        transport.pong_toplevel(shell_surface, serial)
                    }
                    _ => debug!(?surface, serial, "ping for unknown shell surface"),
                }

                Ok(())
            }
            Event::ViewRequested {
                serial,
                size,
                scale,
            } => {
                let mut ctx = Context {
                    transport,
                    registry: &self.registry,
                    painter: &mut self.painter,
                };

                match self.views.on_view_requested(
                    &mut ctx,
                    &mut self.surfaces,
                    serial,
                    size,
                    scale,
                ) {
                    Err(Error::CapabilityUnavailable(cap)) => {
                        warn!(serial, %cap, "unable to create view");
                        Ok(())
                    }
                    res => res.map(|_| ()),
                }
            }
            Event::ViewResized { surface, size } => {
                self.with_surface(transport, surface, |s, ctx| s.on_resized(ctx, size))
            }
            Event::ViewRescaled { surface, scale } => {
                self.with_surface(transport, surface, |s, ctx| s.on_rescaled(ctx, scale))
            }
            Event::ViewRemoved { surface } => {
                self.views.on_view_removed(surface);
                self.destroy_surface(transport, surface);
                Ok(())
            }
        }
    }

    /// Runs a handler against a live surface. Events for surfaces that are
    /// already gone are dropped. A surface that loses a capability it needs
    /// is destroyed.
    fn with_surface<F>(&mut self, transport: &mut T, key: SurfaceKey, f: F) -> Result<(), Error>
    where
        F: FnOnce(&mut Surface<T>, &mut Context<'_, T>) -> Result<(), Error>,
    {
        let Some(surface) = self.surfaces.get_mut(key) else {
            debug!(surface = ?key, "ignoring event for destroyed surface");
            return Ok(());
        };

        let mut ctx = Context {
            transport: &mut *transport,
            registry: &self.registry,
            painter: &mut self.painter,
        };

        match f(surface, &mut ctx) {
            Err(Error::CapabilityUnavailable(cap)) => {
                warn!(surface = ?key, %cap, "disabling surface");
                self.destroy_surface(transport, key);
                Ok(())
            }
            res => res,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        frame::FrameStatus,
        registry::GlobalCapability,
        testing::{registry_with, MockTransport, PaintCall, RecordingPainter, Request},
    };
    use pretty_assertions::assert_eq;

    const BASIC: &[Capability] = &[Capability::Compositor, Capability::Shm];
    const ALL: &[Capability] = &[
        Capability::Compositor,
        Capability::Shm,
        Capability::Shell,
        Capability::Embedder,
    ];

    type TestClient = Client<MockTransport, RecordingPainter>;

    fn client(transport: &mut MockTransport, caps: &[Capability]) -> TestClient {
        let mut client = Client::new(caps, RecordingPainter::default());
        client.registry = registry_with(transport, caps);
        client
    }

    fn window(width: u32, height: u32, scale: u32) -> WindowConfig {
        WindowConfig {
            title: "test".to_owned(),
            width,
            height,
            scale,
        }
    }

    fn current_buffer(client: &TestClient, key: SurfaceKey) -> u32 {
        *client.surface(key).unwrap().pool().unwrap().buffer().unwrap()
    }

    fn release_current(client: &mut TestClient, transport: &mut MockTransport, key: SurfaceKey) {
        let ev = transport.release(current_buffer(client, key));
        client.handle_event(transport, ev).unwrap();
    }

    #[test_log::test]
    fn rescale() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(200, 100, 1))
            .unwrap();

        release_current(&mut client, &mut transport, key);
        let ev = transport.frame_done(key, 16);
        client.handle_event(&mut transport, ev).unwrap();
        release_current(&mut client, &mut transport, key);

        let old = current_buffer(&client, key);
        transport.take_requests();
        client.painter_mut().calls.clear();

        client
            .handle_event(
                &mut transport,
                Event::ViewRescaled {
                    surface: key,
                    scale: 2,
                },
            )
            .unwrap();

        let new = current_buffer(&client, key);
        assert_eq!(
            transport.take_requests(),
            vec![
                Request::DestroyBuffer(old),
                Request::CreateBuffer {
                    buffer: new,
                    width: 400,
                    height: 200,
                    stride: 1600,
                },
                Request::SetBufferScale {
                    surface: 1,
                    scale: 2
                },
                Request::Damage {
                    surface: 1,
                    width: 400,
                    height: 200,
                },
                Request::Attach {
                    surface: 1,
                    buffer: new
                },
                Request::Commit { surface: 1 },
            ]
        );

        assert_eq!(
            client.painter().calls,
            vec![PaintCall {
                time: 16,
                width: 400,
                height: 200,
            }]
        );

        // The frame callback from the last redraw is still the only one.
        assert!(transport.has_callback(key));
        assert_eq!(
            client.surface(key).unwrap().frame_status(),
            FrameStatus::CallbackPending
        );
    }

    #[test]
    fn rescale_in_flight() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(200, 100, 1))
            .unwrap();
        let old = current_buffer(&client, key);
        transport.take_requests();

        client
            .handle_event(
                &mut transport,
                Event::ViewRescaled {
                    surface: key,
                    scale: 2,
                },
            )
            .unwrap();

        let new = current_buffer(&client, key);
        let requests = transport.take_requests();
        assert!(!requests.contains(&Request::DestroyBuffer(old)));
        assert_eq!(requests.last(), Some(&Request::Commit { surface: 1 }));

        // The old buffer is destroyed once the compositor lets go of it.
        let ev = transport.release(old);
        client.handle_event(&mut transport, ev).unwrap();
        assert_eq!(transport.take_requests(), vec![Request::DestroyBuffer(old)]);

        // The new buffer is still held, so the next frame goes into a third.
        let ev = transport.frame_done(key, 33);
        client.handle_event(&mut transport, ev).unwrap();

        let third = current_buffer(&client, key);
        assert_ne!(third, new);
        assert_eq!(
            transport.take_requests(),
            vec![
                Request::CreateBuffer {
                    buffer: third,
                    width: 400,
                    height: 200,
                    stride: 1600,
                },
                Request::Damage {
                    surface: 1,
                    width: 400,
                    height: 200,
                },
                Request::Attach {
                    surface: 1,
                    buffer: third
                },
                Request::Frame { surface: 1 },
                Request::Commit { surface: 1 },
            ]
        );

        // Same geometry, so it's kept for the next swap.
        let ev = transport.release(new);
        client.handle_event(&mut transport, ev).unwrap();
        assert!(transport.take_requests().is_empty());

        assert_eq!(client.painter().times(), vec![0, 0, 33]);
    }

    #[test]
    fn frame_loop() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(10, 10, 1))
            .unwrap();

        for time in [16, 33, 50] {
            release_current(&mut client, &mut transport, key);
            transport.take_requests();

            let ev = transport.frame_done(key, time);
            client.handle_event(&mut transport, ev).unwrap();

            let buffer = current_buffer(&client, key);
            assert_eq!(
                transport.take_requests(),
                vec![
                    Request::Damage {
                        surface: 1,
                        width: 10,
                        height: 10,
                    },
                    Request::Attach { surface: 1, buffer },
                    Request::Frame { surface: 1 },
                    Request::Commit { surface: 1 },
                ]
            );
        }

        assert_eq!(client.painter().times(), vec![0, 16, 33, 50]);
    }

    #[test]
    fn commit_while_pending() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(10, 10, 1))
            .unwrap();
        transport.take_requests();

        assert_eq!(
            client.commit(&mut transport, key),
            Err(Error::FramePending)
        );
        assert!(transport.take_requests().is_empty());
    }

    #[test]
    fn resize_to_same_size() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(200, 100, 1))
            .unwrap();
        transport.take_requests();

        client
            .handle_event(
                &mut transport,
                Event::ViewResized {
                    surface: key,
                    size: (200, 100).into(),
                },
            )
            .unwrap();
        client
            .handle_event(
                &mut transport,
                Event::ViewRescaled {
                    surface: key,
                    scale: 1,
                },
            )
            .unwrap();

        assert!(transport.take_requests().is_empty());
        assert_eq!(client.painter().times(), vec![0]);
    }

    #[test]
    fn resize() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(200, 100, 2))
            .unwrap();

        client
            .handle_event(
                &mut transport,
                Event::ViewResized {
                    surface: key,
                    size: (50, 60).into(),
                },
            )
            .unwrap();

        let surface = client.surface(key).unwrap();
        assert_eq!(surface.size(), glam::UVec2::new(50, 60));
        assert_eq!(surface.pixel_size(), glam::UVec2::new(100, 120));
        assert_eq!(
            surface.pool().unwrap().geometry().width,
            surface.pixel_size().x
        );
    }

    #[test]
    fn unknown_global() {
        let mut transport = MockTransport::new();
        let mut client: TestClient = Client::new(ALL, RecordingPainter::default());

        client
            .handle_event(
                &mut transport,
                Event::Global(GlobalCapability {
                    name: 1,
                    interface: "wl_foo".to_owned(),
                    version: 1,
                }),
            )
            .unwrap();

        assert!(transport.take_requests().is_empty());
        assert_eq!(client.registry().bound().count(), 0);
    }

    #[test]
    fn ping() {
        let mut transport = MockTransport::new();
        let mut client: TestClient = Client::new(ALL, RecordingPainter::default());

        client
            .handle_event(&mut transport, Event::Ping { serial: 7 })
            .unwrap();

        assert_eq!(transport.take_requests(), vec![Request::Pong(7)]);
    }

    #[test]
    fn no_globals() {
        let mut transport = MockTransport::new();
        let mut client: TestClient = Client::new(ALL, RecordingPainter::default());

        assert_eq!(client.registry().bound().count(), 0);
        assert_eq!(
            client.require(BASIC),
            Err(Error::CapabilityUnavailable(Capability::Compositor))
        );
        assert_eq!(
            client.create_window(&mut transport, &window(10, 10, 1)),
            Err(Error::CapabilityUnavailable(Capability::Compositor))
        );
        assert!(transport.take_requests().is_empty());
    }

    #[test]
    fn stale_frame_done() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(10, 10, 1))
            .unwrap();
        let buffer = current_buffer(&client, key);
        client.destroy_surface(&mut transport, key);
        transport.take_requests();

        let ev = transport.frame_done(key, 16);
        client.handle_event(&mut transport, ev).unwrap();
        let ev = transport.release(buffer);
        client.handle_event(&mut transport, ev).unwrap();

        assert!(transport.take_requests().is_empty());
        assert_eq!(client.painter().times(), vec![0]);
    }

    #[test_log::test]
    fn capability_removed() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(10, 10, 1))
            .unwrap();
        let buffer = current_buffer(&client, key);
        transport.take_requests();

        // wl_shm was advertised second.
        client
            .handle_event(&mut transport, Event::GlobalRemove { name: 2 })
            .unwrap();
        assert_eq!(
            transport.take_requests(),
            vec![Request::Release(Capability::Shm)]
        );

        client
            .handle_event(
                &mut transport,
                Event::ViewResized {
                    surface: key,
                    size: (20, 20).into(),
                },
            )
            .unwrap();

        assert_eq!(
            transport.take_requests(),
            vec![Request::DestroyBuffer(buffer), Request::DestroySurface(1)]
        );
        assert!(client.surface(key).is_none());
    }

    #[test_log::test]
    fn buffer_held_until_next_attach() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(10, 10, 1))
            .unwrap();
        let first = current_buffer(&client, key);
        transport.take_requests();

        // The compositor keeps the first buffer, so a second one is allocated.
        let ev = transport.frame_done(key, 16);
        client.handle_event(&mut transport, ev).unwrap();

        let second = current_buffer(&client, key);
        assert_ne!(first, second);
        assert_eq!(
            transport.take_requests(),
            vec![
                Request::CreateBuffer {
                    buffer: second,
                    width: 10,
                    height: 10,
                    stride: 40,
                },
                Request::Damage {
                    surface: 1,
                    width: 10,
                    height: 10,
                },
                Request::Attach {
                    surface: 1,
                    buffer: second
                },
                Request::Frame { surface: 1 },
                Request::Commit { surface: 1 },
            ]
        );

        // From here on the two buffers alternate, each released only once
        // the other one is attached.
        let mut held = second;
        let mut released = first;
        for time in [33, 50, 66] {
            let ev = transport.release(released);
            client.handle_event(&mut transport, ev).unwrap();
            assert!(transport.take_requests().is_empty());

            let ev = transport.frame_done(key, time);
            client.handle_event(&mut transport, ev).unwrap();

            assert_eq!(current_buffer(&client, key), released);
            assert_eq!(
                transport.take_requests(),
                vec![
                    Request::Damage {
                        surface: 1,
                        width: 10,
                        height: 10,
                    },
                    Request::Attach {
                        surface: 1,
                        buffer: released
                    },
                    Request::Frame { surface: 1 },
                    Request::Commit { surface: 1 },
                ]
            );

            std::mem::swap(&mut held, &mut released);
        }

        assert!(transport.has_callback(key));
        assert_eq!(client.painter().times(), vec![0, 16, 33, 50, 66]);

        client.destroy_surface(&mut transport, key);
        let mut destroyed: Vec<_> = transport
            .take_requests()
            .into_iter()
            .filter_map(|r| match r {
                Request::DestroyBuffer(b) => Some(b),
                _ => None,
            })
            .collect();
        destroyed.sort();
        assert_eq!(destroyed, vec![first, second]);
    }

    #[test_log::test]
    fn oversized_resize_ignored() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(10, 10, 2))
            .unwrap();
        transport.take_requests();

        client
            .handle_event(
                &mut transport,
                Event::ViewResized {
                    surface: key,
                    size: (0x8000_0001, 1).into(),
                },
            )
            .unwrap();
        client
            .handle_event(
                &mut transport,
                Event::ViewRescaled {
                    surface: key,
                    scale: u32::MAX,
                },
            )
            .unwrap();

        assert!(transport.take_requests().is_empty());
        let surface = client.surface(key).unwrap();
        assert_eq!(surface.size(), glam::UVec2::new(10, 10));
        assert_eq!(surface.scale(), 2);
        assert_eq!(surface.pixel_size(), glam::UVec2::new(20, 20));
    }

    #[test_log::test]
    fn oversized_view_ignored() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, ALL);

        client
            .handle_event(
                &mut transport,
                Event::ViewRequested {
                    serial: 1,
                    size: (0x4000_0000, 0x4000_0000).into(),
                    scale: 4,
                },
            )
            .unwrap();

        assert!(transport.take_requests().is_empty());
        assert!(client.views().is_empty());
    }

    #[test]
    fn allocation_failure_is_fatal() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, BASIC);

        let key = client
            .create_window(&mut transport, &window(10, 10, 1))
            .unwrap();

        // The held buffer forces an allocation on the next frame.
        transport.fail_allocations = true;
        let ev = transport.frame_done(key, 16);
        let err = client.handle_event(&mut transport, ev).unwrap_err();

        assert!(matches!(err, Error::Allocation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn toplevel() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, ALL);

        let key = client
            .create_window(&mut transport, &window(10, 10, 1))
            .unwrap();

        let requests = transport.take_requests();
        assert_eq!(
            requests[..2],
            [
                Request::CreateSurface(1),
                Request::CreateToplevel {
                    surface: 1,
                    title: "test".to_owned(),
                },
            ]
        );

        client
            .handle_event(
                &mut transport,
                Event::ToplevelPing {
                    surface: key,
                    serial: 4,
                },
            )
            .unwrap();
        assert_eq!(transport.take_requests(), vec![Request::PongToplevel(4)]);
    }

    #[test]
    fn view_lifecycle() {
        let mut transport = MockTransport::new();
        let mut client = client(&mut transport, ALL);

        client
            .handle_event(
                &mut transport,
                Event::ViewRequested {
                    serial: 5,
                    size: (20, 10).into(),
                    scale: 1,
                },
            )
            .unwrap();

        let key = client.views().get(5).unwrap();
        let buffer = current_buffer(&client, key);
        transport.take_requests();

        client
            .handle_event(&mut transport, Event::ViewRemoved { surface: key })
            .unwrap();

        assert_eq!(
            transport.take_requests(),
            vec![
                Request::DestroyView(2),
                Request::DestroyBuffer(buffer),
                Request::DestroySurface(1),
            ]
        );
        assert!(client.views().is_empty());
        assert!(client.surface(key).is_none());

        // Late events for the removed view are ignored.
        client
            .handle_event(
                &mut transport,
                Event::ViewResized {
                    surface: key,
                    size: (40, 40).into(),
                },
            )
            .unwrap();
        assert!(transport.take_requests().is_empty());
    }
}
