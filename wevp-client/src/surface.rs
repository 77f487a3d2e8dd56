// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use tracing::{debug, trace, warn};

use crate::{
    buffer::{BufferGeometry, BufferPool, PixelFormat, PoolId},
    frame::{FrameState, FrameStatus},
    paint::{Canvas, Painter},
    registry::{Capability, CapabilityRegistry},
    transport::Transport,
    Error,
};

slotmap::new_key_type! { pub struct SurfaceKey; }

/// What a surface is shown as.
pub enum Role<T: Transport> {
    None,
    Toplevel(T::ShellSurface),
    View { serial: u32, view: T::View },
}

/// The pieces of client state a surface needs while handling an event.
pub struct Context<'a, T: Transport> {
    pub transport: &'a mut T,
    pub registry: &'a CapabilityRegistry,
    pub painter: &'a mut dyn Painter,
}

pub struct Surface<T: Transport> {
    pub key: SurfaceKey,
    wl_surface: T::Surface,
    role: Role<T>,

    size: glam::UVec2,
    scale: u32,
    format: PixelFormat,
    committed_scale: Option<u32>,

    pool: Option<BufferPool<T::Buffer>>,
    /// Pools replaced while in flight, waiting for their release.
    retired: Vec<BufferPool<T::Buffer>>,
    /// A released pool with the current geometry, reused on the next swap.
    spare: Option<BufferPool<T::Buffer>>,

    frame: FrameState<T::Callback>,
    last_time: Option<u32>,
}

impl<T: Transport> Surface<T> {
    /// Creates the protocol surface, gives it a role, then allocates a
    /// buffer, paints the first frame and commits it.
    pub fn create<F>(
        ctx: &mut Context<'_, T>,
        key: SurfaceKey,
        size: glam::UVec2,
        scale: u32,
        role: F,
    ) -> Result<Self, Error>
    where
        F: FnOnce(&mut T, &T::Surface) -> Result<Role<T>, Error>,
    {
        ctx.registry.require(Capability::Compositor)?;
        ctx.registry.require(Capability::Shm)?;

        let format = PixelFormat::default();
        BufferGeometry::scaled(size, scale.max(1), format)?;

        let wl_surface = ctx.transport.create_surface(key)?;
        let role = match role(&mut *ctx.transport, &wl_surface) {
            Ok(role) => role,
            Err(err) => {
                ctx.transport.destroy_surface(wl_surface);
                return Err(err);
            }
        };

        let mut surface = Self {
            key,
            wl_surface,
            role,
            size,
            scale: scale.max(1),
            format,
            committed_scale: None,
            pool: None,
            retired: Vec::new(),
            spare: None,
            frame: FrameState::Idle,
            last_time: None,
        };

        if let Err(err) = surface.start(ctx) {
            surface.destroy(ctx.transport);
            return Err(err);
        }

        Ok(surface)
    }

    fn start(&mut self, ctx: &mut Context<'_, T>) -> Result<(), Error> {
        self.pool = Some(BufferPool::create(
            ctx.transport,
            self.key,
            self.geometry()?,
        )?);

        self.draw(ctx.painter, 0);
        self.commit(ctx.transport)
    }

    pub fn wl_surface(&self) -> &T::Surface {
        &self.wl_surface
    }

    pub fn role(&self) -> &Role<T> {
        &self.role
    }

    pub fn size(&self) -> glam::UVec2 {
        self.size
    }

    pub fn scale(&self) -> u32 {
        self.scale
    }

    pub fn pixel_size(&self) -> glam::UVec2 {
        // Size and scale are only accepted if the product fits.
        self.size * self.scale
    }

    pub fn geometry(&self) -> Result<BufferGeometry, Error> {
        BufferGeometry::scaled(self.size, self.scale, self.format)
    }

    pub fn pool(&self) -> Option<&BufferPool<T::Buffer>> {
        self.pool.as_ref()
    }

    pub fn frame_status(&self) -> FrameStatus {
        self.frame.status()
    }

    pub fn last_time(&self) -> Option<u32> {
        self.last_time
    }

    /// Paints the current buffer at `time`. Times that go backwards (by
    /// wrapping comparison) are clamped to the last one seen. Returns false
    /// if there is no writable buffer.
    pub fn paint(&mut self, painter: &mut dyn Painter, time: u32) -> bool {
        let time = match self.last_time {
            Some(last) if (time.wrapping_sub(last) as i32) < 0 => last,
            _ => time,
        };

        self.last_time = Some(time);
        self.draw(painter, time)
    }

    fn draw(&mut self, painter: &mut dyn Painter, time: u32) -> bool {
        let scale = self.scale;
        let Some(pool) = self.pool.as_mut() else {
            return false;
        };

        let geometry = pool.geometry();
        let Some(pixels) = pool.pixels() else {
            warn!(surface = ?self.key, "skipping paint of in-flight buffer");
            return false;
        };

        painter.paint(
            &mut Canvas {
                pixels,
                geometry,
                scale,
            },
            time,
        );

        true
    }

    /// Damages the whole buffer, attaches it, subscribes a frame callback and
    /// commits. Fails if the previous frame callback hasn't fired yet.
    pub fn commit(&mut self, transport: &mut T) -> Result<(), Error> {
        if self.pool.is_none() {
            warn!(surface = ?self.key, "commit without a buffer");
            return Ok(());
        }

        self.frame.begin_commit()?;
        self.submit(transport, true);
        Ok(())
    }

    /// Commits new geometry. This reuses the outstanding frame callback if
    /// there is one.
    fn present(&mut self, transport: &mut T) -> Result<(), Error> {
        if self.frame.is_pending() {
            self.submit(transport, false);
            Ok(())
        } else {
            self.commit(transport)
        }
    }

    fn submit(&mut self, transport: &mut T, subscribe: bool) {
        let Some(pool) = self.pool.as_mut() else {
            return;
        };

        let geometry = pool.geometry();
        if self.committed_scale != Some(self.scale) {
            transport.set_buffer_scale(&self.wl_surface, self.scale);
            self.committed_scale = Some(self.scale);
        }

        transport.damage(&self.wl_surface, geometry.width, geometry.height);
        if let Some(buffer) = pool.buffer() {
            transport.attach(&self.wl_surface, buffer);
        }

        let callback = subscribe.then(|| transport.frame(&self.wl_surface, self.key));
        transport.commit(&self.wl_surface);
        pool.mark_in_flight();

        if let Some(cb) = callback {
            self.frame.callback_registered(cb);
        }
    }

    /// Paints and commits the next frame. If the compositor still holds the
    /// current buffer, the frame goes into another one.
    pub fn on_frame_done(&mut self, ctx: &mut Context<'_, T>, time: u32) -> Result<(), Error> {
        // The compositor destroys the callback object after sending done.
        if self.frame.complete().is_none() {
            debug!(surface = ?self.key, "ignoring unexpected frame callback");
            return Ok(());
        }

        if self.pool.as_ref().is_some_and(|p| p.is_in_flight()) {
            self.swap_pool(ctx)?;
        }

        self.paint(ctx.painter, time);
        self.commit(ctx.transport)
    }

    /// Retires the held pool, and replaces it with the spare or a fresh one.
    fn swap_pool(&mut self, ctx: &mut Context<'_, T>) -> Result<(), Error> {
        let pool = match self.spare.take() {
            Some(spare) => spare,
            None => self.allocate(ctx)?,
        };

        trace!(surface = ?self.key, pool = ?pool.id(), "swapping to another buffer");
        self.retire_pool(ctx.transport);
        self.pool = Some(pool);
        Ok(())
    }

    fn allocate(&self, ctx: &mut Context<'_, T>) -> Result<BufferPool<T::Buffer>, Error> {
        ctx.registry.require(Capability::Compositor)?;
        ctx.registry.require(Capability::Shm)?;

        BufferPool::create(ctx.transport, self.key, self.geometry()?)
    }

    pub fn on_buffer_released(
        &mut self,
        ctx: &mut Context<'_, T>,
        pool_id: PoolId,
    ) -> Result<(), Error> {
        if let Some(pool) = self.pool.as_mut().filter(|p| p.id() == pool_id) {
            pool.release();
            return Ok(());
        }

        if let Some(idx) = self.retired.iter().position(|p| p.id() == pool_id) {
            let mut pool = self.retired.swap_remove(idx);
            pool.release();

            let current = self.pool.as_ref().map(|p| p.geometry());
            if self.spare.is_none() && current == Some(pool.geometry()) {
                self.spare = Some(pool);
            } else {
                pool.destroy(ctx.transport);
            }

            return Ok(());
        }

        debug!(surface = ?self.key, pool = ?pool_id, "release for unknown buffer");
        Ok(())
    }

    pub fn on_resized(&mut self, ctx: &mut Context<'_, T>, size: glam::UVec2) -> Result<(), Error> {
        if size == self.size {
            return Ok(());
        }

        if size.x == 0 || size.y == 0 {
            warn!(surface = ?self.key, ?size, "ignoring resize to empty size");
            return Ok(());
        }

        if let Err(err) = BufferGeometry::scaled(size, self.scale, self.format) {
            warn!(surface = ?self.key, ?size, %err, "ignoring resize");
            return Ok(());
        }

        debug!(surface = ?self.key, from = ?self.size, to = ?size, "resize");
        self.size = size;
        self.reallocate(ctx)
    }

    pub fn on_rescaled(&mut self, ctx: &mut Context<'_, T>, scale: u32) -> Result<(), Error> {
        if scale == self.scale {
            return Ok(());
        }

        if scale == 0 {
            warn!(surface = ?self.key, "ignoring rescale to zero");
            return Ok(());
        }

        if let Err(err) = BufferGeometry::scaled(self.size, scale, self.format) {
            warn!(surface = ?self.key, scale, %err, "ignoring rescale");
            return Ok(());
        }

        debug!(surface = ?self.key, from = self.scale, to = scale, "rescale");
        self.scale = scale;
        self.reallocate(ctx)
    }

    /// Replaces the buffer to match the current geometry, repaints at the
    /// last time seen, and commits.
    fn reallocate(&mut self, ctx: &mut Context<'_, T>) -> Result<(), Error> {
        ctx.registry.require(Capability::Compositor)?;
        ctx.registry.require(Capability::Shm)?;

        if let Some(mut spare) = self.spare.take() {
            spare.destroy(ctx.transport);
        }

        self.retire_pool(ctx.transport);
        self.pool = Some(self.allocate(ctx)?);

        let time = self.last_time.unwrap_or_default();
        self.paint(ctx.painter, time);
        self.present(ctx.transport)
    }

    fn retire_pool(&mut self, transport: &mut T) {
        let Some(mut pool) = self.pool.take() else {
            return;
        };

        if pool.is_in_flight() {
            trace!(surface = ?self.key, pool = ?pool.id(), "retiring in-flight pool");
            self.retired.push(pool);
        } else {
            pool.destroy(transport);
        }
    }

    /// Destroys the role object, every buffer and the protocol surface. A
    /// frame callback still pending becomes a no-op.
    pub fn destroy(mut self, transport: &mut T) {
        match std::mem::replace(&mut self.role, Role::None) {
            Role::View { view, .. } => transport.destroy_view(view),
            Role::Toplevel(_) | Role::None => (),
        }

        for mut pool in self.pool.take().into_iter().chain(self.spare.take()) {
            pool.destroy(transport);
        }

        for mut pool in self.retired.drain(..) {
            pool.destroy(transport);
        }

        transport.destroy_surface(self.wl_surface);
    }
}
