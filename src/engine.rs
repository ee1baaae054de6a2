//! Engine lifecycle management.
//!
//! The browser engine is a persistent Node.js helper process running an
//! inline Playwright program. It is launched lazily on first demand behind a
//! single-flight startup future, speaks newline-delimited JSON over stdio
//! (commands in, events out), and is torn down on shutdown. A failed startup
//! resets the state so a later request can retry.

use std::collections::HashMap;
use std::io;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::Mutex;
use tokio::time::timeout;

use crate::protocol::{EngineCommand, EngineEvent};
use crate::{Result, ShotError};

/// Default bound on engine startup (Chromium launch included).
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for checking node/playwright availability.
const NODE_CHECK_TIMEOUT: Duration = Duration::from_secs(5);

/// Script to check if Playwright is installed.
const PLAYWRIGHT_CHECK_SCRIPT: &str = "require('playwright'); process.stdout.write('ok');";

/// Persistent helper program. Reads one JSON command per stdin line, writes
/// one JSON event per stdout line. Pages are keyed by session id; the embed
/// handshake runs inside the page via `page.evaluate`.
const HELPER_SCRIPT: &str = r#"
const readline = require('readline');

const headless = process.argv[1] !== '0';

function emit(msg) {
  process.stdout.write(JSON.stringify(msg) + '\n');
}

function errorMessage(err) {
  return err && err.message ? err.message : String(err);
}

function injectEmbed({ embedUrl, accessToken, dashboardId, workspaceId, width, height, scale, tokenResendMs }) {
  return new Promise((resolve, reject) => {
    function messageHandler(event) {
      // Only the injected iframe's content window may settle the handshake.
      if (event.source !== iframe.contentWindow) return;
      if (!event.data || typeof event.data !== 'object') return;
      if (event.data.url === '/dashboards/defaultId/events/loaded') {
        window.removeEventListener('message', messageHandler);
        resolve();
      } else if (event.data.url === '/dashboards/defaultId/events/error') {
        window.removeEventListener('message', messageHandler);
        reject(new Error((event.data.body && event.data.body.message) || 'Unknown Power BI error'));
      }
    }

    window.addEventListener('message', messageHandler);

    const iframe = document.createElement('iframe');
    iframe.style.width = width + 'px';
    iframe.style.height = height + 'px';
    iframe.style.border = 'none';
    iframe.style.background = 'transparent';
    iframe.style.pointerEvents = 'none';
    iframe.style.zoom = String(scale);
    iframe.src = embedUrl;
    document.body.appendChild(iframe);

    iframe.onload = () => {
      iframe.contentWindow.postMessage({
        action: 'loadDashboard',
        id: dashboardId,
        accessToken: accessToken,
        groupId: workspaceId,
        pageView: 'fitToWidth',
        settings: {
          filterPaneEnabled: false,
          navContentPaneEnabled: false
        }
      }, '*');

      // The SDK occasionally drops the first token delivery; re-send it
      // unconditionally after a short delay.
      setTimeout(() => {
        iframe.contentWindow.postMessage({ action: 'setAccessToken', accessToken: accessToken }, '*');
      }, tokenResendMs);
    };
  });
}

async function main() {
  const { chromium } = require('playwright');
  const browser = await chromium.launch({
    headless,
    args: ['--no-sandbox', '--disable-dev-shm-usage']
  });
  const pages = new Map();
  emit({ event: 'engineReady' });

  async function handle(cmd) {
    switch (cmd.cmd) {
      case 'prepare': {
        const page = await browser.newPage();
        await page.setViewportSize({ width: cmd.width * cmd.scale, height: cmd.height * cmd.scale });
        await page.goto('about:blank');
        pages.set(cmd.id, page);
        emit({ id: cmd.id, event: 'ready' });
        return;
      }
      case 'inject': {
        const page = pages.get(cmd.id);
        if (!page) throw new Error('no page for session ' + cmd.id);
        page.evaluate(injectEmbed, {
          embedUrl: cmd.embedUrl,
          accessToken: cmd.accessToken,
          dashboardId: cmd.dashboardId,
          workspaceId: cmd.workspaceId,
          width: cmd.width,
          height: cmd.height,
          scale: cmd.scale,
          tokenResendMs: cmd.tokenResendMs
        }).then(
          () => emit({ id: cmd.id, event: 'loaded' }),
          (err) => {
            // Disposing the page rejects the pending evaluate; stay quiet then.
            if (pages.has(cmd.id)) {
              emit({ id: cmd.id, event: 'error', message: errorMessage(err) });
            }
          }
        );
        return;
      }
      case 'capture': {
        const page = pages.get(cmd.id);
        if (!page) throw new Error('no page for session ' + cmd.id);
        const buffer = await page.screenshot({
          clip: { x: 0, y: 0, width: cmd.width, height: cmd.height },
          type: 'png',
          fullPage: false
        });
        emit({ id: cmd.id, event: 'captured', image: buffer.toString('base64') });
        return;
      }
      case 'dispose': {
        const page = pages.get(cmd.id);
        pages.delete(cmd.id);
        if (page) await page.close();
        emit({ id: cmd.id, event: 'disposed' });
        return;
      }
      default:
        emit({ event: 'protocolError', message: 'unknown command: ' + String(cmd.cmd) });
    }
  }

  const rl = readline.createInterface({ input: process.stdin, terminal: false });
  rl.on('line', (line) => {
    if (!line.trim()) return;
    let cmd;
    try {
      cmd = JSON.parse(line);
    } catch (err) {
      emit({ event: 'protocolError', message: errorMessage(err) });
      return;
    }
    handle(cmd).catch((err) => {
      emit({ id: cmd.id, event: 'error', message: errorMessage(err) });
    });
  });
  rl.on('close', async () => {
    await browser.close();
    process.exit(0);
  });
}

main().catch((err) => {
  process.stderr.write(String(err && err.stack ? err.stack : err) + '\n');
  process.exit(1);
});
"#;

#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// The Node.js command to use (default: "node").
    pub node_command: String,
    /// Whether Chromium runs headless.
    pub headless: bool,
    /// Bound on engine startup.
    pub startup_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            node_command: "node".to_string(),
            headless: true,
            startup_timeout: DEFAULT_STARTUP_TIMEOUT,
        }
    }
}

type StartupResult = std::result::Result<Arc<EngineHandle>, Arc<ShotError>>;
type StartupFuture = Shared<BoxFuture<'static, StartupResult>>;

enum EngineState {
    Stopped,
    /// `attempt` ties the in-flight future to its settlement: a waiter from
    /// an older attempt must neither clear nor install over a newer one.
    Starting { attempt: u64, startup: StartupFuture },
    Running(Arc<EngineHandle>),
}

/// Owns the single shared engine instance: lazy single-flight startup,
/// idempotent shutdown.
pub struct Engine {
    options: EngineOptions,
    state: Mutex<EngineState>,
    attempts: AtomicU64,
}

impl Engine {
    pub fn new(options: EngineOptions) -> Self {
        Self {
            options,
            state: Mutex::new(EngineState::Stopped),
            attempts: AtomicU64::new(0),
        }
    }

    /// Returns the running engine, starting it if necessary. Concurrent
    /// callers that observe a startup in flight await that same attempt; a
    /// startup failure propagates to all of them and clears the state so a
    /// later call retries.
    pub async fn handle(&self) -> Result<Arc<EngineHandle>> {
        let (attempt, startup) = {
            let mut state = self.state.lock().await;
            match &*state {
                EngineState::Running(handle) => return Ok(handle.clone()),
                EngineState::Starting { attempt, startup } => (*attempt, startup.clone()),
                EngineState::Stopped => {
                    let attempt = self.attempts.fetch_add(1, Ordering::Relaxed);
                    let options = self.options.clone();
                    let startup = async move {
                        EngineHandle::launch(options)
                            .await
                            .map(Arc::new)
                            .map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    *state = EngineState::Starting {
                        attempt,
                        startup: startup.clone(),
                    };
                    (attempt, startup)
                }
            }
        };

        match startup.await {
            Ok(handle) => self.settle_success(attempt, handle).await,
            Err(err) => Err(self.settle_failure(attempt, &err).await),
        }
    }

    /// Installs a finished startup, unless a shutdown or a newer attempt
    /// superseded it while it was in flight.
    async fn settle_success(
        &self,
        attempt: u64,
        handle: Arc<EngineHandle>,
    ) -> Result<Arc<EngineHandle>> {
        let mut state = self.state.lock().await;
        match &*state {
            EngineState::Starting {
                attempt: current, ..
            } if *current == attempt => {
                *state = EngineState::Running(handle.clone());
                Ok(handle)
            }
            // Another waiter of this attempt already installed the handle.
            EngineState::Running(current) => {
                let current = current.clone();
                drop(state);
                if !Arc::ptr_eq(&current, &handle) {
                    handle.close().await;
                }
                Ok(current)
            }
            // Shutdown cleared this attempt while it was launching.
            EngineState::Starting { .. } | EngineState::Stopped => {
                drop(state);
                handle.close().await;
                Err(ShotError::engine("engine was shut down during startup"))
            }
        }
    }

    /// Clears the in-flight state so a later call retries, but only when the
    /// failed attempt is still the current one; a stale waiter must not take
    /// down a newer attempt it never belonged to.
    async fn settle_failure(&self, attempt: u64, err: &ShotError) -> ShotError {
        let mut state = self.state.lock().await;
        if matches!(
            &*state,
            EngineState::Starting { attempt: current, .. } if *current == attempt
        ) {
            *state = EngineState::Stopped;
        }
        clone_startup_error(err)
    }

    /// Stops the engine if running. Safe to call when never started; a
    /// subsequent `handle()` starts fresh.
    pub async fn shutdown(&self) {
        let previous = {
            let mut state = self.state.lock().await;
            std::mem::replace(&mut *state, EngineState::Stopped)
        };
        match previous {
            EngineState::Stopped => {}
            EngineState::Running(handle) => handle.close().await,
            EngineState::Starting { startup, .. } => {
                if let Ok(handle) = startup.await {
                    handle.close().await;
                }
            }
        }
    }
}

/// One live helper process: command writer, event router, session ids.
pub struct EngineHandle {
    stdin: Mutex<ChildStdin>,
    child: Mutex<Child>,
    router: Arc<EventRouter>,
    next_session_id: AtomicU64,
}

impl std::fmt::Debug for EngineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineHandle").finish_non_exhaustive()
    }
}

impl EngineHandle {
    async fn launch(options: EngineOptions) -> Result<Self> {
        ensure_node_available(&options.node_command).await?;
        ensure_playwright_available(&options.node_command).await?;

        let mut cmd = Command::new(&options.node_command);
        cmd.arg("-e")
            .arg(HELPER_SCRIPT)
            .arg(if options.headless { "1" } else { "0" })
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|err| map_spawn_error(err, &options.node_command))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ShotError::engine("engine stdin unavailable"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ShotError::engine("engine stdout unavailable"))?;
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::debug!(target: "embedshot::engine", "{line}");
                }
            });
        }

        let mut lines = BufReader::new(stdout).lines();
        match timeout(options.startup_timeout, lines.next_line()).await {
            Ok(Ok(Some(line))) => match serde_json::from_str::<EngineEvent>(&line) {
                Ok(EngineEvent::EngineReady) => {}
                Ok(other) => {
                    let _ = child.kill().await;
                    return Err(ShotError::protocol(format!(
                        "expected engineReady, got {other:?}"
                    )));
                }
                Err(err) => {
                    let _ = child.kill().await;
                    return Err(ShotError::protocol(format!(
                        "unexpected engine output during startup: {err} - raw: {}",
                        line.trim()
                    )));
                }
            },
            Ok(Ok(None)) => {
                let _ = child.kill().await;
                return Err(ShotError::engine("engine process exited during startup"));
            }
            Ok(Err(err)) => {
                let _ = child.kill().await;
                return Err(ShotError::Io(err));
            }
            Err(_) => {
                let _ = child.kill().await;
                return Err(ShotError::engine(format!(
                    "engine did not become ready within {:?}",
                    options.startup_timeout
                )));
            }
        }

        let router = Arc::new(EventRouter::default());
        tokio::spawn(route_events(lines, router.clone()));

        tracing::info!("browser engine started");

        Ok(Self {
            stdin: Mutex::new(stdin),
            child: Mutex::new(child),
            router,
            next_session_id: AtomicU64::new(1),
        })
    }

    /// Registers a render session with the event router. The returned
    /// channel deregisters itself on drop, so no handler leaks across
    /// captures whatever the exit path.
    pub fn open_session(self: &Arc<Self>) -> SessionChannel {
        let id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let events = self.router.register(id);
        SessionChannel {
            id,
            events,
            handle: self.clone(),
        }
    }

    /// Writes one command line to the helper's stdin.
    pub async fn send(&self, command: &EngineCommand) -> Result<()> {
        let mut line = serde_json::to_string(command)?;
        line.push('\n');
        let mut stdin = self.stdin.lock().await;
        stdin
            .write_all(line.as_bytes())
            .await
            .map_err(|err| ShotError::engine(format!("failed to send engine command: {err}")))?;
        stdin
            .flush()
            .await
            .map_err(|err| ShotError::engine(format!("failed to send engine command: {err}")))?;
        Ok(())
    }

    async fn close(&self) {
        let mut child = self.child.lock().await;
        let _ = child.kill().await;
        let _ = child.wait().await;
        self.router.close("engine was shut down");
        tracing::info!("browser engine stopped");
    }
}

/// Routes helper events to the render session they belong to.
#[derive(Default)]
struct EventRouter {
    sessions: StdMutex<HashMap<u64, UnboundedSender<EngineEvent>>>,
}

impl EventRouter {
    fn register(&self, id: u64) -> UnboundedReceiver<EngineEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.sessions.lock().unwrap().insert(id, tx);
        rx
    }

    fn deregister(&self, id: u64) {
        self.sessions.lock().unwrap().remove(&id);
    }

    /// Returns false when no session is registered under `id`.
    fn dispatch(&self, id: u64, event: EngineEvent) -> bool {
        match self.sessions.lock().unwrap().get(&id) {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }

    /// Disconnects every registered session; used when the helper goes away.
    /// Dropping the senders closes each session's channel, which sessions
    /// report as engine loss rather than an SDK error signal.
    fn close(&self, reason: &str) {
        let mut sessions = self.sessions.lock().unwrap();
        if !sessions.is_empty() {
            tracing::warn!(reason, sessions = sessions.len(), "disconnecting active sessions");
        }
        sessions.clear();
    }
}

async fn route_events(mut lines: Lines<BufReader<ChildStdout>>, router: Arc<EventRouter>) {
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<EngineEvent>(line) {
                    Ok(event) => match event.session_id() {
                        Some(id) => {
                            if !router.dispatch(id, event) {
                                tracing::debug!(id, "dropping event for inactive session");
                            }
                        }
                        None => {
                            if let EngineEvent::ProtocolError { message } = event {
                                tracing::warn!(%message, "engine rejected a command");
                            }
                        }
                    },
                    // Malformed output must not take the router down.
                    Err(err) => tracing::warn!(%err, line, "discarding unparseable engine output"),
                }
            }
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(%err, "engine stdout read failed");
                break;
            }
        }
    }
    router.close("engine process exited");
}

/// Event channel for one render session. Dropping it removes the session
/// from the router, so late events are discarded rather than queued forever.
pub struct SessionChannel {
    id: u64,
    events: UnboundedReceiver<EngineEvent>,
    handle: Arc<EngineHandle>,
}

impl SessionChannel {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next event for this session; `None` when the engine went away and the
    /// router already delivered its final error.
    pub async fn recv(&mut self) -> Option<EngineEvent> {
        self.events.recv().await
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.handle.router.deregister(self.id);
    }
}

fn preflight_disabled() -> bool {
    // Used by tests that point node_command at a stub engine.
    std::env::var("EMBEDSHOT_SKIP_ENGINE_PREFLIGHT").is_ok()
}

/// Startup failures are shared between waiters behind an `Arc`; rebuild an
/// owned copy, keeping the variant (and so the Display prefix) for the
/// common cases instead of wrapping the full message a second time.
fn clone_startup_error(err: &ShotError) -> ShotError {
    match err {
        ShotError::Engine(msg) => ShotError::Engine(msg.clone()),
        ShotError::Protocol(msg) => ShotError::Protocol(msg.clone()),
        other => ShotError::engine(other.to_string()),
    }
}

pub(crate) fn map_spawn_error(err: io::Error, command: &str) -> ShotError {
    if err.kind() == io::ErrorKind::NotFound {
        ShotError::engine(format!(
            "Unable to spawn the engine helper; '{}' was not found on PATH",
            command
        ))
    } else {
        ShotError::Io(err)
    }
}

/// Ensures Node.js is available before a launch is attempted.
pub(crate) async fn ensure_node_available(node_command: &str) -> Result<()> {
    if preflight_disabled() {
        return Ok(());
    }

    let mut cmd = Command::new(node_command);
    cmd.arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    let status = timeout(NODE_CHECK_TIMEOUT, cmd.status())
        .await
        .map_err(|_| {
            ShotError::engine(format!(
                "Timed out checking node availability after {:?}",
                NODE_CHECK_TIMEOUT
            ))
        })?
        .map_err(|err| map_spawn_error(err, node_command))?;

    if !status.success() {
        return Err(ShotError::engine(format!(
            "Node command {:?} is not available (exit {})",
            node_command, status
        )));
    }

    Ok(())
}

/// Ensures the Playwright npm package is installed.
pub(crate) async fn ensure_playwright_available(node_command: &str) -> Result<()> {
    if preflight_disabled() {
        return Ok(());
    }

    let mut cmd = Command::new(node_command);
    cmd.arg("-e")
        .arg(PLAYWRIGHT_CHECK_SCRIPT)
        .stdout(Stdio::null())
        .stderr(Stdio::piped());

    let output = timeout(NODE_CHECK_TIMEOUT, cmd.output())
        .await
        .map_err(|_| {
            ShotError::engine(format!(
                "Timed out checking Playwright availability after {:?}",
                NODE_CHECK_TIMEOUT
            ))
        })?
        .map_err(|err| map_spawn_error(err, node_command))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr
            .to_ascii_lowercase()
            .contains("cannot find module 'playwright'")
        {
            return Err(ShotError::engine(
                "Playwright npm package is missing; install with `npm install playwright`."
                    .to_string(),
            ));
        }
        return Err(ShotError::engine(format!(
            "Playwright preflight failed ({:?}): {}",
            output.status,
            stderr.trim()
        )));
    }

    Ok(())
}
