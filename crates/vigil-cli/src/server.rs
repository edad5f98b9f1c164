//! Unix-socket endpoints.
//!
//! The event endpoint is a datagram socket: one datagram, one raw JSON
//! event, parsed and handed to the router's queue. The API endpoint is a
//! stream socket with length-prefixed framing (little-endian `u32` byte
//! count, then that many bytes of UTF-8 JSON); one request, one response.
//!
//! Both endpoints run on dedicated threads; API connections get a
//! short-lived thread each, capped by the server thread budget, and excess
//! connections receive a busy response instead of queueing unboundedly.

use std::io::{Read, Write};
use std::os::unix::net::{UnixDatagram, UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use vigil_policy::{Event, PolicyBuilder};
use vigil_router::{ConcurrentQueue, MetricScope, Router};

const DATAGRAM_MAX: usize = 65536;
const FRAME_MAX: u32 = 1 << 20;

pub struct ServerConfig {
    pub event_socket: PathBuf,
    pub api_socket: PathBuf,
    pub api_timeout: Duration,
    /// Concurrent API connection budget.
    pub server_threads: usize,
    /// Extra connections allowed to start beyond the budget before the
    /// endpoint answers busy.
    pub api_queue_tasks: usize,
    /// Depth of the raw-datagram hand-off queue between the receive thread
    /// and the parser thread. 0 parses inline on the receive thread.
    pub event_queue_tasks: usize,
}

/// The two endpoints plus their threads.
pub struct Server {
    running: Arc<AtomicBool>,
    threads: Vec<JoinHandle<()>>,
    event_socket: PathBuf,
    api_socket: PathBuf,
}

impl Server {
    /// Bind both endpoints and start serving.
    pub fn start(
        config: ServerConfig,
        router: Arc<Router>,
        builder: PolicyBuilder,
        event_metrics: Arc<MetricScope>,
        api_metrics: Arc<MetricScope>,
    ) -> std::io::Result<Self> {
        let running = Arc::new(AtomicBool::new(true));
        let mut threads = Vec::new();

        threads.extend(spawn_event_endpoint(
            &config.event_socket,
            config.event_queue_tasks,
            Arc::clone(&router),
            Arc::clone(&running),
            event_metrics,
        )?);
        threads.push(spawn_api_endpoint(
            &config,
            router,
            builder,
            Arc::clone(&running),
            api_metrics,
        )?);

        info!(
            event = %config.event_socket.display(),
            api = %config.api_socket.display(),
            "server endpoints bound"
        );
        Ok(Server {
            running,
            threads,
            event_socket: config.event_socket,
            api_socket: config.api_socket,
        })
    }

    /// Request a stop and join the endpoint threads.
    pub fn stop(mut self) {
        self.running.store(false, Ordering::Release);
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
        let _ = std::fs::remove_file(&self.event_socket);
        let _ = std::fs::remove_file(&self.api_socket);
        info!("server stopped");
    }

    /// Block until the endpoints exit (they only exit on `stop`).
    pub fn join(mut self) {
        for thread in self.threads.drain(..) {
            let _ = thread.join();
        }
    }
}

// ---------------------------------------------------------------------------
// Event endpoint
// ---------------------------------------------------------------------------

fn spawn_event_endpoint(
    path: &Path,
    queue_tasks: usize,
    router: Arc<Router>,
    running: Arc<AtomicBool>,
    metrics: Arc<MetricScope>,
) -> std::io::Result<Vec<JoinHandle<()>>> {
    rebind_path(path)?;
    let socket = UnixDatagram::bind(path)?;
    socket.set_read_timeout(Some(Duration::from_millis(200)))?;
    let received = metrics.counter("received");
    let malformed = metrics.counter("malformed");
    let overflow = metrics.counter("overflow");

    // With a task queue, the receive thread only copies datagrams out of the
    // socket; a parser thread does the JSON work. Inline otherwise.
    let mut handoff: Option<Arc<ConcurrentQueue<String>>> = None;
    let mut threads = Vec::new();
    if queue_tasks > 0 {
        let tasks: Arc<ConcurrentQueue<String>> = Arc::new(ConcurrentQueue::new(
            queue_tasks,
            &metrics,
            &metrics,
        ));
        let parser_tasks = Arc::clone(&tasks);
        let parser_router = Arc::clone(&router);
        let parser_running = Arc::clone(&running);
        let parser_malformed = Arc::clone(&malformed);
        threads.push(std::thread::spawn(move || {
            while parser_running.load(Ordering::Acquire) {
                if let Some(raw) = parser_tasks.pop_timeout(Duration::from_millis(200)) {
                    parse_and_enqueue(&raw, &parser_router, &parser_malformed);
                }
            }
            while let Some(raw) = parser_tasks.try_pop() {
                parse_and_enqueue(&raw, &parser_router, &parser_malformed);
            }
        }));
        handoff = Some(tasks);
    }

    threads.push(std::thread::spawn(move || {
        let mut buffer = vec![0u8; DATAGRAM_MAX];
        while running.load(Ordering::Acquire) {
            let len = match socket.recv(&mut buffer) {
                Ok(len) => len,
                Err(e)
                    if e.kind() == std::io::ErrorKind::WouldBlock
                        || e.kind() == std::io::ErrorKind::TimedOut =>
                {
                    continue
                }
                Err(e) => {
                    error!(error = %e, "event endpoint receive failed");
                    continue;
                }
            };
            received.fetch_add(1, Ordering::Relaxed);
            let raw = match std::str::from_utf8(&buffer[..len]) {
                Ok(raw) => raw,
                Err(_) => {
                    malformed.fetch_add(1, Ordering::Relaxed);
                    debug!("non-utf8 event datagram dropped");
                    continue;
                }
            };
            match &handoff {
                Some(tasks) => {
                    if tasks.try_push(raw.to_owned()).is_err() {
                        overflow.fetch_add(1, Ordering::Relaxed);
                        debug!("event task queue full; datagram dropped");
                    }
                }
                None => parse_and_enqueue(raw, &router, &malformed),
            }
        }
    }));
    Ok(threads)
}

fn parse_and_enqueue(raw: &str, router: &Router, malformed: &std::sync::atomic::AtomicU64) {
    match Event::parse(raw) {
        Ok(event) => router.fast_enqueue_event(event),
        Err(_) => {
            malformed.fetch_add(1, Ordering::Relaxed);
            debug!("malformed event datagram dropped");
        }
    }
}

// ---------------------------------------------------------------------------
// API endpoint
// ---------------------------------------------------------------------------

fn spawn_api_endpoint(
    config: &ServerConfig,
    router: Arc<Router>,
    builder: PolicyBuilder,
    running: Arc<AtomicBool>,
    metrics: Arc<MetricScope>,
) -> std::io::Result<JoinHandle<()>> {
    rebind_path(&config.api_socket)?;
    let listener = UnixListener::bind(&config.api_socket)?;
    listener.set_nonblocking(true)?;

    let timeout = config.api_timeout;
    let busy_threshold = config.server_threads + config.api_queue_tasks;
    let active = Arc::new(AtomicUsize::new(0));
    let requests = metrics.counter("requests");

    Ok(std::thread::spawn(move || {
        while running.load(Ordering::Acquire) {
            let stream = match listener.accept() {
                Ok((stream, _)) => stream,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(50));
                    continue;
                }
                Err(e) => {
                    error!(error = %e, "api endpoint accept failed");
                    continue;
                }
            };
            requests.fetch_add(1, Ordering::Relaxed);

            if active.load(Ordering::Acquire) >= busy_threshold {
                warn!("api endpoint busy; rejecting connection");
                let _ = respond(
                    &stream,
                    &json!({"status": "error", "error": "server is busy"}),
                );
                continue;
            }

            active.fetch_add(1, Ordering::AcqRel);
            let router = Arc::clone(&router);
            let builder = builder.clone();
            let active = Arc::clone(&active);
            std::thread::spawn(move || {
                if let Err(e) = serve_connection(&stream, timeout, &router, &builder) {
                    debug!(error = %e, "api connection ended with an error");
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });
        }
    }))
}

fn serve_connection(
    stream: &UnixStream,
    timeout: Duration,
    router: &Router,
    builder: &PolicyBuilder,
) -> std::io::Result<()> {
    stream.set_nonblocking(false)?;
    stream.set_read_timeout(Some(timeout))?;
    stream.set_write_timeout(Some(timeout))?;

    let request = read_frame(stream)?;
    let response = match serde_json::from_str::<Value>(&request) {
        Ok(request) => dispatch(&request, router, builder),
        Err(e) => json!({"status": "error", "error": format!("invalid request: {e}")}),
    };
    respond(stream, &response)
}

/// Route one API command to the router or the policy builder.
fn dispatch(request: &Value, router: &Router, builder: &PolicyBuilder) -> Value {
    let command = request.get("command").and_then(Value::as_str).unwrap_or("");
    match command {
        "route.add" => {
            let name = request.get("name").and_then(Value::as_str);
            let priority = request.get("priority").and_then(Value::as_i64);
            let filter = request.get("filter").and_then(Value::as_str);
            let policy = request.get("policy").and_then(Value::as_str);
            match (name, priority, filter, policy) {
                (Some(name), Some(priority), Some(filter), Some(policy)) => {
                    match router.add_route(name, priority as i32, filter, policy) {
                        Ok(()) => json!({"status": "ok"}),
                        Err(e) => json!({"status": "error", "error": e.to_string()}),
                    }
                }
                _ => json!({
                    "status": "error",
                    "error": "route.add needs name, priority, filter and policy"
                }),
            }
        }
        "route.remove" => match request.get("name").and_then(Value::as_str) {
            Some(name) => match router.remove_route(name) {
                Ok(()) => json!({"status": "ok"}),
                Err(e) => json!({"status": "error", "error": e.to_string()}),
            },
            None => json!({"status": "error", "error": "route.remove needs a name"}),
        },
        "route.list" => {
            let table: Vec<Value> = router
                .route_table()
                .into_iter()
                .map(|r| {
                    json!({
                        "name": r.name,
                        "priority": r.priority,
                        "filter": r.filter,
                        "policy": r.policy,
                    })
                })
                .collect();
            json!({"status": "ok", "table": table})
        }
        "policy.validate" => match request.get("policy").and_then(Value::as_str) {
            Some(name) => match builder.build_policy(name) {
                Ok(policy) => json!({"status": "ok", "policy": policy.name}),
                Err(e) => json!({"status": "error", "error": e.to_string()}),
            },
            None => json!({"status": "error", "error": "policy.validate needs a policy"}),
        },
        other => json!({"status": "error", "error": format!("unknown command \"{other}\"")}),
    }
}

// ---------------------------------------------------------------------------
// Framing
// ---------------------------------------------------------------------------

fn read_frame(mut stream: &UnixStream) -> std::io::Result<String> {
    let mut header = [0u8; 4];
    stream.read_exact(&mut header)?;
    let len = u32::from_le_bytes(header);
    if len > FRAME_MAX {
        return Err(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "frame too large",
        ));
    }
    let mut payload = vec![0u8; len as usize];
    stream.read_exact(&mut payload)?;
    String::from_utf8(payload)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn write_frame(mut stream: &UnixStream, payload: &str) -> std::io::Result<()> {
    let len = payload.len() as u32;
    stream.write_all(&len.to_le_bytes())?;
    stream.write_all(payload.as_bytes())?;
    stream.flush()
}

fn respond(stream: &UnixStream, response: &Value) -> std::io::Result<()> {
    write_frame(stream, &response.to_string())
}

fn rebind_path(path: &Path) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if path.exists() {
        std::fs::remove_file(path)?;
    }
    Ok(())
}
