// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use std::{collections::HashMap, fmt};

use tracing::{debug, info, warn};

use crate::{buffer::format_name, transport::Transport, Error};

/// A server-advertised global that this client knows how to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    Compositor,
    Shm,
    Shell,
    Embedder,
}

impl Capability {
    pub fn interface(&self) -> &'static str {
        match self {
            Capability::Compositor => "wl_compositor",
            Capability::Shm => "wl_shm",
            Capability::Shell => "wl_shell",
            Capability::Embedder => "wevp_embedder",
        }
    }

    pub fn from_interface(interface: &str) -> Option<Self> {
        match interface {
            "wl_compositor" => Some(Capability::Compositor),
            "wl_shm" => Some(Capability::Shm),
            "wl_shell" => Some(Capability::Shell),
            "wevp_embedder" => Some(Capability::Embedder),
            _ => None,
        }
    }

    /// The highest version we speak. Binds use the minimum of this and the
    /// advertised version.
    pub fn max_version(&self) -> u32 {
        match self {
            // set_buffer_scale needs v3.
            Capability::Compositor => 4,
            Capability::Shm => 1,
            Capability::Shell => 1,
            Capability::Embedder => 1,
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.interface())
    }
}

/// A global as advertised by wl_registry.global.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GlobalCapability {
    pub name: u32,
    pub interface: String,
    pub version: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub name: u32,
    pub version: u32,
}

/// Tracks the globals advertised over the lifetime of a connection, and which
/// of them we bound.
#[derive(Debug)]
pub struct CapabilityRegistry {
    wanted: Vec<Capability>,
    globals: HashMap<u32, GlobalCapability>,
    bound: HashMap<Capability, Binding>,
    shm_formats: Vec<u32>,
}

impl CapabilityRegistry {
    pub fn new(wanted: &[Capability]) -> Self {
        Self {
            wanted: wanted.to_vec(),
            globals: HashMap::new(),
            bound: HashMap::new(),
            shm_formats: Vec::new(),
        }
    }

    pub fn on_global_added<T: Transport>(&mut self, transport: &mut T, global: GlobalCapability) {
        debug!(
            name = global.name,
            interface = %global.interface,
            version = global.version,
            "global object added"
        );

        if let Some(existing) = self.globals.get(&global.name) {
            warn!(
                name = global.name,
                existing = %existing.interface,
                interface = %global.interface,
                "ignoring global advertised under a name that is already in use"
            );
            return;
        }

        self.globals.insert(global.name, global.clone());

        let Some(capability) = Capability::from_interface(&global.interface) else {
            debug!(interface = %global.interface, "ignoring unknown interface");
            return;
        };

        if !self.wanted.contains(&capability) {
            debug!(%capability, "ignoring unneeded interface");
            return;
        }

        if let Some(binding) = self.bound.get(&capability) {
            warn!(
                %capability,
                name = global.name,
                bound = binding.name,
                "ignoring duplicate advertisement of bound interface"
            );
            return;
        }

        let version = global.version.min(capability.max_version());
        transport.bind(capability, &global, version);
        self.bound.insert(
            capability,
            Binding {
                name: global.name,
                version,
            },
        );

        info!(%capability, version, "bound global");
    }

    /// Forgets a global. If it was bound, the binding is released and the
    /// capability returned; it is unavailable until advertised again.
    pub fn on_global_removed<T: Transport>(
        &mut self,
        transport: &mut T,
        name: u32,
    ) -> Option<Capability> {
        let Some(global) = self.globals.remove(&name) else {
            warn!(name, "removal of unknown global");
            return None;
        };

        debug!(name, interface = %global.interface, "global object removed");

        let capability = self
            .bound
            .iter()
            .find(|(_, binding)| binding.name == name)
            .map(|(cap, _)| *cap)?;

        self.bound.remove(&capability);
        transport.release(capability);
        warn!(%capability, "bound global removed");

        Some(capability)
    }

    pub fn on_shm_format(&mut self, format: u32) {
        match format_name(format) {
            Some(name) => info!("possible shm format: {}", name),
            None => info!("possible shm format: {:#x}", format),
        }

        if !self.shm_formats.contains(&format) {
            self.shm_formats.push(format);
        }
    }

    pub fn require(&self, capability: Capability) -> Result<Binding, Error> {
        self.bound
            .get(&capability)
            .copied()
            .ok_or(Error::CapabilityUnavailable(capability))
    }

    pub fn is_bound(&self, capability: Capability) -> bool {
        self.bound.contains_key(&capability)
    }

    pub fn bound(&self) -> impl Iterator<Item = (Capability, Binding)> + '_ {
        self.bound.iter().map(|(cap, binding)| (*cap, *binding))
    }

    pub fn globals(&self) -> impl Iterator<Item = &GlobalCapability> {
        self.globals.values()
    }

    pub fn shm_formats(&self) -> &[u32] {
        &self.shm_formats
    }
}
