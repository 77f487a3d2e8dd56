// Copyright 2024 Colin Marc <hi@colinmarc.com>
//
// SPDX-License-Identifier: MIT

use std::{
    fmt,
    os::{
        fd::{AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
        unix::net::UnixStream,
    },
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
};

use tracing::{debug, error, info, trace, warn};
use wayland_client::{
    backend::WaylandError,
    protocol::{
        wl_buffer, wl_callback, wl_compositor, wl_registry, wl_shell, wl_shell_surface, wl_shm,
        wl_surface,
    },
    Connection, EventQueue, Proxy as _, QueueHandle,
};

use crate::{
    buffer::{BufferGeometry, BufferTag},
    client::Client,
    config::WindowConfig,
    paint::Painter,
    protocols::wevp_embed::{WevpEmbedder, WevpView},
    registry::{Capability, GlobalCapability},
    surface::SurfaceKey,
    transport::{Event, Transport},
    Error,
};

mod dispatch;

const DISPLAY: mio::Token = mio::Token(0);
const WAKER: mio::Token = mio::Token(1);

/// Where the compositor socket is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A socket name, relative to `$XDG_RUNTIME_DIR`.
    Name(String),
    /// An absolute socket path.
    Path(PathBuf),
    /// An already connected socket, inherited from the parent process.
    Fd(RawFd),
}

impl FromStr for Endpoint {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(Error::Transport("empty display name".to_owned()));
        }

        if let Some(fd) = s.strip_prefix("fd:") {
            return match fd.parse::<RawFd>() {
                Ok(fd) if fd >= 0 => Ok(Endpoint::Fd(fd)),
                _ => Err(Error::Transport(format!("invalid socket fd: {:?}", s))),
            };
        }

        if Path::new(s).is_absolute() {
            Ok(Endpoint::Path(PathBuf::from(s)))
        } else {
            Ok(Endpoint::Name(s.to_owned()))
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endpoint::Name(name) => f.write_str(name),
            Endpoint::Path(path) => write!(f, "{}", path.display()),
            Endpoint::Fd(fd) => write!(f, "fd:{}", fd),
        }
    }
}

impl Endpoint {
    pub fn connect(&self) -> Result<UnixStream, Error> {
        let path = match self {
            Endpoint::Fd(fd) => {
                // Safety: the parent process handed us this fd for exactly
                // this purpose, and nothing else claims it.
                let fd = unsafe { OwnedFd::from_raw_fd(*fd) };
                return Ok(UnixStream::from(fd));
            }
            Endpoint::Path(path) => path.clone(),
            Endpoint::Name(name) => {
                let dir = std::env::var_os("XDG_RUNTIME_DIR")
                    .filter(|v| !v.is_empty())
                    .ok_or_else(|| Error::Transport("XDG_RUNTIME_DIR not set".to_owned()))?;
                Path::new(&dir).join(name)
            }
        };

        UnixStream::connect(&path)
            .map_err(|err| Error::Transport(format!("connecting to {}: {}", path.display(), err)))
    }
}

/// Issues requests on real wayland proxies.
pub struct WaylandTransport {
    qh: QueueHandle<State>,
    registry: Option<wl_registry::WlRegistry>,
    compositor: Option<wl_compositor::WlCompositor>,
    shm: Option<wl_shm::WlShm>,
    shell: Option<wl_shell::WlShell>,
    embedder: Option<WevpEmbedder>,
}

impl WaylandTransport {
    fn compositor(&self) -> Result<&wl_compositor::WlCompositor, Error> {
        self.compositor
            .as_ref()
            .ok_or(Error::CapabilityUnavailable(Capability::Compositor))
    }

    fn shm(&self) -> Result<&wl_shm::WlShm, Error> {
        self.shm
            .as_ref()
            .ok_or(Error::CapabilityUnavailable(Capability::Shm))
    }

    fn embedder(&self) -> Result<&WevpEmbedder, Error> {
        self.embedder
            .as_ref()
            .ok_or(Error::CapabilityUnavailable(Capability::Embedder))
    }
}

impl Transport for WaylandTransport {
    type Surface = wl_surface::WlSurface;
    type Buffer = wl_buffer::WlBuffer;
    type Callback = wl_callback::WlCallback;
    type ShellSurface = wl_shell_surface::WlShellSurface;
    type View = WevpView;

    fn bind(&mut self, capability: Capability, global: &GlobalCapability, version: u32) {
        let Some(registry) = self.registry.as_ref() else {
            warn!(%capability, "bind without a registry");
            return;
        };

        let qh = &self.qh;
        match capability {
            Capability::Compositor => {
                self.compositor = Some(registry.bind(global.name, version, qh, ()));
            }
            Capability::Shm => {
                self.shm = Some(registry.bind(global.name, version, qh, ()));
            }
            Capability::Shell => {
                self.shell = Some(registry.bind(global.name, version, qh, ()));
            }
            Capability::Embedder => {
                self.embedder = Some(registry.bind(global.name, version, qh, ()));
            }
        }
    }

    fn release(&mut self, capability: Capability) {
        // None of these have a destructor at the versions we bind.
        match capability {
            Capability::Compositor => self.compositor = None,
            Capability::Shm => self.shm = None,
            Capability::Shell => self.shell = None,
            Capability::Embedder => self.embedder = None,
        }
    }

    fn create_surface(&mut self, key: SurfaceKey) -> Result<Self::Surface, Error> {
        Ok(self.compositor()?.create_surface(&self.qh, key))
    }

    fn destroy_surface(&mut self, surface: Self::Surface) {
        surface.destroy();
    }

    fn create_buffer(
        &mut self,
        tag: BufferTag,
        fd: BorrowedFd<'_>,
        geometry: &BufferGeometry,
    ) -> Result<Self::Buffer, Error> {
        let size = i32::try_from(geometry.size_bytes())
            .map_err(|_| Error::Allocation(format!("buffer too large: {:?}", geometry)))?;


        let pool = self.shm()?.create_pool(fd, size, &self.qh, ());
        let buffer = pool.create_buffer(
            0,
            geometry.width as i32,
            geometry.height as i32,
            geometry.stride as i32,
            geometry.format.wl_format(),
            &self.qh,
            tag,
        );

        // The buffer keeps the memory alive on the compositor side.
        pool.destroy();

        Ok(buffer)
    }

    fn destroy_buffer(&mut self, buffer: Self::Buffer) {
        buffer.destroy();
    }

    fn set_buffer_scale(&mut self, surface: &Self::Surface, scale: u32) {
        if surface.version() >= 3 {
            surface.set_buffer_scale(scale as i32);
        } else if scale != 1 {
            warn!(scale, "compositor does not support buffer scale");
        }
    }

    fn damage(&mut self, surface: &Self::Surface, width: u32, height: u32) {
        if surface.version() >= 4 {
            surface.damage_buffer(0, 0, width as i32, height as i32);
        } else {
            // Surface coordinates are never larger than buffer coordinates.
            surface.damage(0, 0, width as i32, height as i32);
        }
    }

    fn attach(&mut self, surface: &Self::Surface, buffer: &Self::Buffer) {
        surface.attach(Some(buffer), 0, 0);
    }

    fn frame(&mut self, surface: &Self::Surface, key: SurfaceKey) -> Self::Callback {
        surface.frame(&self.qh, key)
    }

    fn commit(&mut self, surface: &Self::Surface) {
        surface.commit();
    }

    fn create_toplevel(
        &mut self,
        key: SurfaceKey,
        surface: &Self::Surface,
        title: &str,
    ) -> Result<Self::ShellSurface, Error> {
        let shell = self
            .shell
            .as_ref()
            .ok_or(Error::CapabilityUnavailable(Capability::Shell))?;

        let shell_surface = shell.get_shell_surface(surface, &self.qh, key);
        shell_surface.set_toplevel();
        shell_surface.set_title(title.to_owned());

        Ok(shell_surface)
    }

    fn pong_toplevel(&mut self, shell_surface: &Self::ShellSurface, serial: u32) {
        shell_surface.pong(serial);
    }

    fn pong(&mut self, serial: u32) -> Result<(), Error> {
        self.embedder()?.pong(serial);
        Ok(())
    }

    fn create_view(
        &mut self,
        key: SurfaceKey,
        serial: u32,
        surface: &Self::Surface,
        size: glam::UVec2,
        scale: u32,
    ) -> Result<Self::View, Error> {
        Ok(self
            .embedder()?
            .create_view(serial, surface, size.x, size.y, scale, &self.qh, key))
    }

    fn destroy_view(&mut self, view: Self::View) {
        view.destroy();
    }
}

/// The dispatch state. Wayland callbacks translate events and hand them to
/// the client.
pub struct State {
    client: Client<WaylandTransport, Box<dyn Painter>>,
    transport: WaylandTransport,
    fatal: Option<Error>,
}

impl State {
    fn handle(&mut self, event: Event) {
        trace!(?event, "handling event");

        if let Err(err) = self.client.handle_event(&mut self.transport, event) {
            if err.is_fatal() {
                error!(%err, "fatal error while handling event");
                self.fatal.get_or_insert(err);
            } else {
                warn!(%err, "error while handling event");
            }
        }
    }

    fn check(&mut self) -> Result<(), Error> {
        match self.fatal.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// Stops a running [WaylandClient] from another thread or a signal handler.
#[derive(Clone)]
pub struct Closer(Arc<mio::Waker>);

impl Closer {
    pub fn close(&self) {
        if let Err(err) = self.0.wake() {
            warn!(%err, "failed to wake event loop");
        }
    }
}

/// A connection to the compositor, and the loop that drives it.
pub struct WaylandClient {
    conn: Connection,
    queue: EventQueue<State>,
    state: State,
    poll: mio::Poll,
    waker: Arc<mio::Waker>,
}

impl WaylandClient {
    pub fn connect(
        endpoint: &Endpoint,
        wanted: &[Capability],
        painter: Box<dyn Painter>,
    ) -> Result<Self, Error> {
        info!(%endpoint, "connecting to compositor");
        let stream = endpoint.connect()?;
        Self::from_stream(stream, wanted, painter)
    }

    pub fn from_stream(
        stream: UnixStream,
        wanted: &[Capability],
        painter: Box<dyn Painter>,
    ) -> Result<Self, Error> {
        let conn = Connection::from_socket(stream)?;
        let queue = conn.new_event_queue();

        let state = State {
            client: Client::new(wanted, painter),
            transport: WaylandTransport {
                qh: queue.handle(),
                registry: None,
                compositor: None,
                shm: None,
                shell: None,
                embedder: None,
            },
            fatal: None,
        };

        let poll = mio::Poll::new()?;
        let waker = Arc::new(mio::Waker::new(poll.registry(), WAKER)?);

        let display_fd = conn.backend().poll_fd().as_raw_fd();
        poll.registry().register(
            &mut mio::unix::SourceFd(&display_fd),
            DISPLAY,
            mio::Interest::READABLE,
        )?;

        Ok(Self {
            conn,
            queue,
            state,
            poll,
            waker,
        })
    }

    /// Requests the registry and waits for the initial globals. A second
    /// round trip collects the events sent in response to our binds, like
    /// the shm formats.
    pub fn discover(&mut self) -> Result<(), Error> {
        let registry = self.conn.display().get_registry(&self.queue.handle(), ());
        self.state.transport.registry = Some(registry);

        self.queue.roundtrip(&mut self.state)?;
        self.state.check()?;
        self.queue.roundtrip(&mut self.state)?;
        self.state.check()?;

        debug!(
            bound = self.state.client.registry().bound().count(),
            globals = self.state.client.registry().globals().count(),
            "discovery complete"
        );

        Ok(())
    }

    pub fn require(&self, caps: &[Capability]) -> Result<(), Error> {
        self.state.client.require(caps)
    }

    pub fn create_window(&mut self, window: &WindowConfig) -> Result<SurfaceKey, Error> {
        self.state
            .client
            .create_window(&mut self.state.transport, window)
    }

    pub fn client(&self) -> &Client<WaylandTransport, Box<dyn Painter>> {
        &self.state.client
    }

    pub fn closer(&self) -> Closer {
        Closer(self.waker.clone())
    }

    /// Dispatches events until the connection fails or the closer is
    /// triggered.
    pub fn run(&mut self) -> Result<(), Error> {
        let mut events = mio::Events::with_capacity(64);

        loop {
            self.queue.dispatch_pending(&mut self.state)?;
            self.state.check()?;

            match self.queue.flush() {
                Err(WaylandError::Io(err)) if err.kind() == std::io::ErrorKind::WouldBlock => (),
                res => res?,
            }

            // Readiness is edge-triggered, so read until the socket is empty
            // before polling.
            if let Some(guard) = self.queue.prepare_read() {
                match guard.read() {
                    Ok(_) => continue,
                    Err(WaylandError::Io(err))
                        if err.kind() == std::io::ErrorKind::WouldBlock => {}
                    Err(err) => return Err(err.into()),
                }
            } else {
                continue;
            }

            match self.poll.poll(&mut events, None) {
                Ok(()) => (),
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            }

            for event in events.iter() {
                match event.token() {
                    DISPLAY => (),
                    WAKER => {
                        info!("shutting down");
                        return Ok(());
                    }
                    _ => unreachable!(),
                }
            }
        }
    }
}

impl Drop for WaylandClient {
    fn drop(&mut self) {
        debug!("disconnecting from compositor");
        self.state.client.destroy_all(&mut self.state.transport);

        if let Err(err) = self.conn.flush() {
            debug!(%err, "failed to flush connection");
        }
    }
}
