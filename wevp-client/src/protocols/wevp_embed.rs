// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

#![allow(non_upper_case_globals)]
#![allow(non_camel_case_types)]

use wayland_client;
use wayland_client::protocol::*;

pub mod __interfaces {
    use wayland_client::backend as wayland_backend;
    use wayland_client::protocol::__interfaces::*;
    wayland_scanner::generate_interfaces!("protocols/wevp-embed.xml");
}

use self::__interfaces::*;
wayland_scanner::generate_client_code!("protocols/wevp-embed.xml");

pub use wevp_embedder::WevpEmbedder;
pub use wevp_view::WevpView;
