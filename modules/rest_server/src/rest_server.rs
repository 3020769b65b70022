//! Blockweave REST server
//!
//! A listener thread accepts connections, reads and parses each request and
//! hands it to a fixed pool of worker threads through a [`RequestQueue`].
//! Workers route the request, write the response and close the connection.

pub mod configuration;
pub mod handlers;
pub mod parsing;
pub mod queue;
pub mod request;

use std::{
    io::{self, Read},
    net::{Ipv4Addr, Shutdown, SocketAddr, TcpListener, TcpStream},
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use blockweave_common::{RestResponse, ShutdownSignal};
use blockweave_module_ledger::Ledger;
use serde_json::json;
use socket2::SockRef;
use thiserror::Error;
use tracing::{debug, error, info, warn};

pub use configuration::RestConfig;
use handlers::{handle_request, HandlerContext};
pub use queue::RequestQueue;
use request::{write_response, HttpRequest};

/// Requests larger than this are truncated
const READ_BUFFER_SIZE: usize = 4096;

/// How long a client may take to send its request
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an idle worker waits before re-checking the queue
const DEQUEUE_TIMEOUT: Duration = Duration::from_millis(100);

const WAKE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind REST listener on port {port}: {source}")]
    Bind {
        port: u16,
        #[source]
        source: io::Error,
    },

    #[error("REST server is already running")]
    AlreadyRunning,

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: String,
        #[source]
        source: io::Error,
    },
}

/// A parsed request together with the connection to answer it on
struct PendingRequest {
    request: HttpRequest,
    stream: TcpStream,
}

struct Running {
    local_addr: SocketAddr,
    listener: TcpListener,
    queue: Arc<RequestQueue<PendingRequest>>,
    stop: ShutdownSignal,
    listener_thread: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
}

pub struct RestServer {
    config: RestConfig,
    context: Arc<HandlerContext>,
    running: Option<Running>,
}

impl RestServer {
    pub fn new(config: RestConfig, ledger: Arc<Ledger>) -> Self {
        let context = Arc::new(HandlerContext {
            ledger,
            data_dir: config.data_dir.clone(),
            miner_address: config.miner_address.clone(),
        });
        Self {
            config,
            context,
            running: None,
        }
    }

    /// Bind the listener and spawn the listener and worker threads.
    pub fn start(&mut self) -> Result<(), ServerError> {
        if self.running.is_some() {
            return Err(ServerError::AlreadyRunning);
        }

        let port = self.config.port;
        let bind_error = |source| ServerError::Bind { port, source };

        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port)).map_err(bind_error)?;
        let local_addr = listener.local_addr().map_err(bind_error)?;
        let accept_handle = listener.try_clone().map_err(bind_error)?;

        let queue = Arc::new(RequestQueue::new());
        let stop = ShutdownSignal::new();

        let listener_thread = {
            let queue = queue.clone();
            let stop = stop.clone();
            spawn("rest-listener".to_string(), move || {
                listen(accept_handle, &queue, &stop)
            })?
        };

        let mut running = Running {
            local_addr,
            listener,
            queue,
            stop,
            listener_thread,
            workers: Vec::with_capacity(self.config.workers),
        };

        for index in 0..self.config.workers {
            let queue = running.queue.clone();
            let context = self.context.clone();
            match spawn(format!("rest-worker-{index}"), move || work(&queue, &context)) {
                Ok(handle) => running.workers.push(handle),
                Err(e) => {
                    shutdown(running);
                    return Err(e);
                }
            }
        }

        info!(
            "REST server listening on {local_addr} with {} workers",
            self.config.workers
        );
        self.running = Some(running);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Address the listener is bound to, while running
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.running.as_ref().map(|running| running.local_addr)
    }

    /// Stop accepting, let the workers drain the queue and join every
    /// thread. Does nothing if the server is not running.
    pub fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            shutdown(running);
            info!("REST server stopped");
        }
    }
}

impl Drop for RestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn spawn<F>(name: String, f: F) -> Result<JoinHandle<()>, ServerError>
where
    F: FnOnce() + Send + 'static,
{
    thread::Builder::new()
        .name(name.clone())
        .spawn(f)
        .map_err(|source| ServerError::Spawn { name, source })
}

fn shutdown(running: Running) {
    running.stop.request();

    // Unblock the accept call: shut the listening socket down, then poke it
    // with a local connection in case the platform ignores the shutdown.
    if let Err(e) = SockRef::from(&running.listener).shutdown(Shutdown::Both) {
        debug!("Listener shutdown: {e}");
    }
    let wake_addr = SocketAddr::from((Ipv4Addr::LOCALHOST, running.local_addr.port()));
    let _ = TcpStream::connect_timeout(&wake_addr, WAKE_TIMEOUT);
    drop(running.listener);

    // The listener may still be reading a connection it accepted earlier, so
    // the queue only closes once nothing more can be enqueued.
    if running.listener_thread.join().is_err() {
        error!("REST listener thread panicked");
    }
    running.queue.shutdown();

    for worker in running.workers {
        if worker.join().is_err() {
            error!("REST worker thread panicked");
        }
    }
}

fn listen(listener: TcpListener, queue: &RequestQueue<PendingRequest>, stop: &ShutdownSignal) {
    for incoming in listener.incoming() {
        if stop.is_requested() {
            break;
        }
        match incoming {
            Ok(stream) => accept(stream, queue),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(e) => error!("Failed to accept connection: {e}"),
        }
    }
    debug!("REST listener exiting");
}

fn accept(mut stream: TcpStream, queue: &RequestQueue<PendingRequest>) {
    if let Err(e) = stream.set_read_timeout(Some(READ_TIMEOUT)) {
        warn!("Failed to set read timeout: {e}");
    }

    let mut buffer = [0u8; READ_BUFFER_SIZE];
    let read = match stream.read(&mut buffer) {
        Ok(0) => return,
        Ok(read) => read,
        Err(e) => {
            debug!("Failed to read request: {e}");
            return;
        }
    };

    match HttpRequest::parse(&buffer[..read]) {
        Some(request) => {
            debug!("Queued {} {}", request.method, request.path);
            queue.enqueue(PendingRequest { request, stream });
        }
        None => {
            // No method or path to route on, so this never reaches a worker
            let response = RestResponse::with_json(400, &json!({ "error": "Malformed request" }));
            if let Err(e) = write_response(&mut stream, &response) {
                debug!("Failed to reject malformed request: {e}");
            }
        }
    }
}

fn work(queue: &RequestQueue<PendingRequest>, context: &HandlerContext) {
    loop {
        match queue.dequeue(DEQUEUE_TIMEOUT) {
            Some(pending) => serve(pending, context),
            None if queue.is_shutdown() && queue.is_empty() => break,
            None => {}
        }
    }
}

fn serve(pending: PendingRequest, context: &HandlerContext) {
    let PendingRequest {
        request,
        mut stream,
    } = pending;

    info!("REST received {} {}", request.method, request.path);
    let response = handle_request(context, &request);

    if let Err(e) = write_response(&mut stream, &response) {
        warn!("Failed to send response: {e}");
    }
    let _ = stream.shutdown(Shutdown::Both);
}
