// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use tracing_subscriber::{layer::SubscriberExt as _, util::SubscriberInitExt as _, EnvFilter, Layer};

/// Installs a stderr logger for the library and the named binary. `RUST_LOG`
/// overrides the default filter.
pub fn init_logging(bin: &str) -> anyhow::Result<()> {
    let target = bin.replace('-', "_");

    let mut filter = EnvFilter::builder()
        .with_default_directive("wevp_client=info".parse()?)
        .from_env_lossy();

    // Only add the binary's directive if RUST_LOG didn't mention it.
    if std::env::var("RUST_LOG").map_or(true, |v| !v.contains(&target)) {
        filter = filter.add_directive(format!("{}=info", target).parse()?);
    }

    let printed_log = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(filter);

    tracing_subscriber::registry().with(printed_log).try_init()?;

    Ok(())
}
