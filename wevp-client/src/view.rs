// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use std::collections::HashMap;

use slotmap::SlotMap;
use tracing::{debug, info, warn};

use crate::{
    buffer::{BufferGeometry, PixelFormat},
    registry::Capability,
    surface::{Context, Role, Surface, SurfaceKey},
    transport::Transport,
    Error,
};

/// Tracks views created on behalf of the embedding extension, keyed by the
/// serial of the request that created them.
#[derive(Debug, Default)]
pub struct ViewController {
    views: HashMap<u32, SurfaceKey>,
}

impl ViewController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answers a liveness ping immediately.
    pub fn on_ping<T: Transport>(&mut self, transport: &mut T, serial: u32) -> Result<(), Error> {
        debug!(serial, "ping");
        transport.pong(serial)
    }

    /// Creates a surface with a view role for a server request. Returns the
    /// new surface's key, or None if the request was ignored.
    pub fn on_view_requested<T: Transport>(
        &mut self,
        ctx: &mut Context<'_, T>,
        surfaces: &mut SlotMap<SurfaceKey, Surface<T>>,
        serial: u32,
        size: glam::UVec2,
        scale: u32,
    ) -> Result<Option<SurfaceKey>, Error> {
        info!(serial, width = size.x, height = size.y, scale, "view requested");

        if self.views.contains_key(&serial) {
            warn!(serial, "ignoring view request with a serial already in use");
            return Ok(None);
        }

        if size.x == 0 || size.y == 0 || scale == 0 {
            warn!(serial, ?size, scale, "ignoring view request with empty geometry");
            return Ok(None);
        }

        if let Err(err) = BufferGeometry::scaled(size, scale, PixelFormat::default()) {
            warn!(serial, %err, "ignoring view request");
            return Ok(None);
        }

        ctx.registry.require(Capability::Embedder)?;

        let key = surfaces.try_insert_with_key(|key| {
            Surface::create(ctx, key, size, scale, |transport, wl_surface| {
                let view = transport.create_view(key, serial, wl_surface, size, scale)?;
                Ok(Role::View { serial, view })
            })
        })?;

        self.views.insert(serial, key);
        Ok(Some(key))
    }

    /// Forgets the view and returns its surface, which the caller destroys.
    pub fn on_view_removed(&mut self, surface: SurfaceKey) -> Option<u32> {
        let serial = self.serial_of(surface)?;
        debug!(serial, "view removed");

        self.views.remove(&serial);
        Some(serial)
    }

    /// Drops any view entry for a surface that went away for another reason.
    pub fn forget(&mut self, surface: SurfaceKey) {
        self.views.retain(|_, key| *key != surface);
    }

    pub fn get(&self, serial: u32) -> Option<SurfaceKey> {
        self.views.get(&serial).copied()
    }

    fn serial_of(&self, surface: SurfaceKey) -> Option<u32> {
        self.views
            .iter()
            .find(|(_, key)| **key == surface)
            .map(|(serial, _)| *serial)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }
}
