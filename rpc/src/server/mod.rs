//!
//! Server module: the [`Server`] facade wiring the service registry,
//! dispatcher, HTTP surface, WebSocket sessions and the protocol
//! multiplexer together behind a single listening port.
//!

pub mod dispatcher;
pub mod http;
pub mod interface;
pub mod mux;
pub mod session;

use crate::imports::*;
use crate::metrics::Metrics;
pub use dispatcher::{Dispatcher, Outcome};
pub use http::{raw_handler, RawHandlerFn, RawResponse};
pub use interface::{Method, MethodFn, MethodFnReturn, SchemaMethod, Service};
pub use session::{raw_ws_handler, RawNotifier, RawWsHandlerFn, RpcNotifier};

use futures::Stream;
use std::path::PathBuf;
use std::task::{Context as TaskContext, Poll};
use tokio::net::{TcpListener, TcpStream};

pub const BUILTIN_PATH_JSONRPC: &str = "_jsonrpc_";
pub const BUILTIN_PATH_JSONRPC_WS: &str = "_jsonrpc_ws_";
pub const BUILTIN_PATH_RAW_WS: &str = "_raw_ws_";
pub const BUILTIN_PATH_DIR: &str = "_dir_";
pub const BUILTIN_PATH_METRICS: &str = "_metrics_";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Hook invoked after the listener is bound but before serving begins. An
/// error aborts startup.
pub type BeforeRunFn = Box<dyn FnOnce() -> Result<()> + Send + 'static>;

pub struct ServerOptions {
    pub addr: String,
    /// Cluster label attached to every metric.
    pub cluster_name: String,
    pub encoding: Encoding,
    /// Serve the index page, the metrics path and the static tree.
    pub enable_inner_service: bool,
    /// Root of the `_dir_` static tree. Defaults to the parent directory of
    /// the running binary.
    pub static_dir: Option<PathBuf>,
}

impl Default for ServerOptions {
    fn default() -> Self {
        ServerOptions {
            addr: "127.0.0.1:8080".to_string(),
            cluster_name: "defaultCluster".to_string(),
            encoding: Encoding::default(),
            enable_inner_service: false,
            static_dir: None,
        }
    }
}

/// Stream of TCP connections classified as binary RPC traffic. Feed it to
/// the host's gRPC server (e.g. tonic's `serve_with_incoming`).
pub struct BinaryIncoming {
    receiver: Pin<Box<Receiver<TcpStream>>>,
}

impl Stream for BinaryIncoming {
    type Item = std::io::Result<TcpStream>;

    fn poll_next(
        mut self: Pin<&mut Self>,
        cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Self::Item>> {
        self.receiver.as_mut().poll_next(cx).map(|next| next.map(Ok))
    }
}

pub struct Server {
    options: ServerOptions,
    dispatcher: Arc<Dispatcher>,
    metrics: Arc<Metrics>,
    get_handles: Mutex<AHashMap<String, RawHandlerFn>>,
    post_handles: Mutex<AHashMap<String, RawHandlerFn>>,
    raw_ws: Mutex<Option<RawWsHandlerFn>>,
    before_run: Mutex<Option<BeforeRunFn>>,
    binary: Channel<TcpStream>,
    stop: DuplexChannel,
    listener: Mutex<Option<TcpListener>>,
    bound: Mutex<Option<SocketAddr>>,
}

impl Server {
    pub fn new(options: ServerOptions) -> Arc<Server> {
        let metrics = Metrics::new(options.cluster_name.clone());
        let dispatcher = Arc::new(Dispatcher::new(options.encoding));
        Arc::new(Server {
            options,
            dispatcher,
            metrics,
            get_handles: Mutex::new(AHashMap::new()),
            post_handles: Mutex::new(AHashMap::new()),
            raw_ws: Mutex::new(None),
            before_run: Mutex::new(None),
            binary: Channel::unbounded(),
            stop: DuplexChannel::oneshot(),
            listener: Mutex::new(None),
            bound: Mutex::new(None),
        })
    }

    /// Register a JSON-RPC service. Duplicate service names fail; late
    /// registration while serving is permitted.
    pub fn register_rpc(&self, service: Service) -> Result<()> {
        self.dispatcher.register(service)
    }

    /// Register a raw GET/POST path. Paths shadowing a built-in path are
    /// rejected.
    pub fn register_path(
        &self,
        method: HttpMethod,
        path: &str,
        handler: RawHandlerFn,
    ) -> Result<()> {
        http::check_path(path)?;
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{path}")
        };
        let handles = match method {
            HttpMethod::Get => &self.get_handles,
            HttpMethod::Post => &self.post_handles,
        };
        let Ok(mut handles) = handles.lock() else {
            return Err(Error::Registration("rpc: path registry lock poisoned".to_string()));
        };
        if handles.contains_key(&path) {
            return Err(Error::Registration(format!(
                "rpc: path already registered: {path}"
            )));
        }
        handles.insert(path, handler);
        Ok(())
    }

    /// Install the handler backing the raw WebSocket path.
    pub fn register_raw_ws(&self, handler: RawWsHandlerFn) {
        if let Ok(mut slot) = self.raw_ws.lock() {
            *slot = Some(handler);
        }
    }

    pub fn set_before_run(&self, hook: BeforeRunFn) {
        if let Ok(mut slot) = self.before_run.lock() {
            *slot = Some(hook);
        }
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Connections classified as binary RPC traffic. The host application
    /// owns the gRPC server; uniport only routes the streams.
    pub fn binary_incoming(&self) -> BinaryIncoming {
        BinaryIncoming {
            receiver: Box::pin(self.binary.receiver.clone()),
        }
    }

    /// Bind the listener without serving yet. `run` binds implicitly when
    /// this was not called.
    pub async fn bind(&self) -> Result<SocketAddr> {
        let listener = TcpListener::bind(&self.options.addr)
            .await
            .map_err(|err| Error::Listen(self.options.addr.clone(), err.to_string()))?;
        let addr = listener.local_addr()?;
        if let Ok(mut slot) = self.listener.lock() {
            *slot = Some(listener);
        }
        if let Ok(mut slot) = self.bound.lock() {
            *slot = Some(addr);
        }
        Ok(addr)
    }

    /// The bound address, available after `bind`.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.bound.lock().ok().and_then(|slot| *slot)
    }

    /// Serve until `stop` is called (returns `Ok`) or the listener fails
    /// (returns the transport error). Writes `<bin>.pid` and `<bin>.net`
    /// side files for the duration of the run.
    pub async fn run(self: &Arc<Self>) -> Result<()> {
        let hook = self.before_run.lock().ok().and_then(|mut slot| slot.take());
        if let Some(hook) = hook {
            hook()?;
        }

        if self.local_addr().is_none() {
            self.bind().await?;
        }
        let listener = self
            .listener
            .lock()
            .ok()
            .and_then(|mut slot| slot.take())
            .ok_or(Error::NotBound)?;
        let addr = listener.local_addr()?;

        let state = Arc::new(http::HttpState {
            dispatcher: self.dispatcher.clone(),
            metrics: self.metrics.clone(),
            raw_ws: self.raw_ws.lock().ok().and_then(|slot| slot.clone()),
            get_handles: self
                .get_handles
                .lock()
                .map(|handles| handles.clone())
                .unwrap_or_default(),
            post_handles: self
                .post_handles
                .lock()
                .map(|handles| handles.clone())
                .unwrap_or_default(),
            enable_inner_service: self.options.enable_inner_service,
            static_dir: self.options.static_dir.clone().or_else(default_static_dir),
        });
        let router = http::build_router(state);

        let side_files = SideFiles::write(addr);
        info!("uniport server run on {addr}");

        let result = mux::run(
            listener,
            router,
            self.binary.sender.clone(),
            self.stop.clone(),
        )
        .await;

        drop(side_files);
        result
    }

    /// Signal the acceptor to stop.
    pub fn stop(&self) -> Result<()> {
        self.stop
            .request
            .sender
            .try_send(())
            .map_err(|err| Error::Stop(err.to_string()))
    }

    /// Block until the acceptor has stopped.
    pub async fn join(&self) -> Result<()> {
        self.stop
            .response
            .receiver
            .recv()
            .await
            .map_err(|err| Error::Join(err.to_string()))
    }

    pub async fn stop_and_join(&self) -> Result<()> {
        self.stop()?;
        self.join().await
    }
}

fn default_static_dir() -> Option<PathBuf> {
    let exe = std::env::current_exe().ok()?;
    exe.parent().map(|dir| dir.join(".."))
}

/// `<bin>.pid` and `<bin>.net` written on start; removal is best-effort
/// and happens at most once, on drop.
struct SideFiles {
    paths: Vec<PathBuf>,
}

impl SideFiles {
    fn write(addr: SocketAddr) -> SideFiles {
        let stem = http::binary_name();
        let mut paths = Vec::new();
        for (extension, contents) in [
            ("pid", std::process::id().to_string()),
            ("net", addr.to_string()),
        ] {
            let path = PathBuf::from(format!("{stem}.{extension}"));
            match std::fs::write(&path, &contents) {
                Ok(()) => paths.push(path),
                Err(err) => warn!("unable to write {}: {err}", path.display()),
            }
        }
        SideFiles { paths }
    }
}

impl Drop for SideFiles {
    fn drop(&mut self) {
        for path in self.paths.drain(..) {
            if let Err(err) = std::fs::remove_file(&path) {
                warn!("unable to remove {}: {err}", path.display());
            }
        }
    }
}
