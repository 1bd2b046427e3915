//! In-memory scripted ACP agent shared by the integration tests
//!
//! `FakeTransport` implements the crate's `Transport` trait without spawning
//! anything: frames written to it are handled by a task that plays the agent
//! side of the protocol according to a `Script`.

#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use kodegen_acp_bridge::client::LaunchContext;
use kodegen_acp_bridge::{
    AgentConfig, AgentConnection, AgentError, BridgeOptions, EventStream, Launcher,
    ProcessManager, Result, StreamEvent, Transport,
};

// ============================================================================
// Script
// ============================================================================

/// How the fake agent behaves
#[derive(Debug, Clone)]
pub struct Script {
    /// Advertise `loadSession`
    pub load_session: bool,
    /// Answer `session/load` with an error
    pub fail_load: bool,
    /// Declared session modes; the first is current
    pub modes: Vec<String>,
    /// `update` objects sent before every prompt response
    pub turn: Vec<Value>,
    /// `stopReason` of every prompt response
    pub stop_reason: String,
    /// `usage` of every prompt response
    pub usage: Option<Value>,
    /// Options of a permission request sent during every prompt
    pub permission: Option<Vec<Value>>,
    /// Keep prompts open until `session/cancel`
    pub hang: bool,
    /// Exit instead of answering prompts
    pub die_on_prompt: bool,
    /// Answer `initialize` with an error
    pub fail_initialize: bool,
    /// Delay before answering `initialize`
    pub init_delay: Duration,
}

impl Script {
    /// Agent that streams `text` and completes every prompt
    pub fn echo(text: &str) -> Self {
        Self {
            load_session: false,
            fail_load: false,
            modes: Vec::new(),
            turn: vec![message_chunk(text)],
            stop_reason: "end_turn".to_string(),
            usage: None,
            permission: None,
            hang: false,
            die_on_prompt: false,
            fail_initialize: false,
            init_delay: Duration::ZERO,
        }
    }

    pub fn turn(mut self, updates: Vec<Value>) -> Self {
        self.turn = updates;
        self
    }

    pub fn modes(mut self, modes: &[&str]) -> Self {
        self.modes = modes.iter().map(|m| (*m).to_string()).collect();
        self
    }

    pub fn load_session(mut self) -> Self {
        self.load_session = true;
        self
    }

    pub fn permission(mut self, options: Vec<Value>) -> Self {
        self.permission = Some(options);
        self
    }

    pub fn hang(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn die_on_prompt(mut self) -> Self {
        self.die_on_prompt = true;
        self
    }

    pub fn fail_initialize(mut self) -> Self {
        self.fail_initialize = true;
        self
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    fn modes_value(&self) -> Value {
        match self.modes.first() {
            Some(current) => json!({
                "currentModeId": current,
                "availableModes": self
                    .modes
                    .iter()
                    .map(|id| json!({"id": id, "name": id}))
                    .collect::<Vec<_>>(),
            }),
            None => Value::Null,
        }
    }
}

pub fn message_chunk(text: &str) -> Value {
    json!({"sessionUpdate": "agent_message_chunk", "content": {"type": "text", "text": text}})
}

pub fn thought_chunk(text: &str) -> Value {
    json!({"sessionUpdate": "agent_thought_chunk", "content": {"type": "text", "text": text}})
}

pub fn option(id: &str, kind: &str) -> Value {
    json!({"optionId": id, "name": id, "kind": kind})
}

// ============================================================================
// Agent log
// ============================================================================

/// Everything the fake agents received, shared across spawns
#[derive(Debug, Default)]
pub struct AgentLog {
    frames: Mutex<Vec<Value>>,
    permission_outcomes: Mutex<Vec<Value>>,
}

impl AgentLog {
    /// Methods received, in order
    pub fn methods(&self) -> Vec<String> {
        self.frames
            .lock()
            .iter()
            .filter_map(|f| f.get("method").and_then(Value::as_str).map(str::to_string))
            .collect()
    }

    pub fn count(&self, method: &str) -> usize {
        self.methods().iter().filter(|m| *m == method).count()
    }

    /// Params of every request or notification with `method`
    pub fn params(&self, method: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|f| f.get("method").and_then(Value::as_str) == Some(method))
            .map(|f| f.get("params").cloned().unwrap_or(Value::Null))
            .collect()
    }

    /// `outcome` objects the client answered permission requests with
    pub fn permission_outcomes(&self) -> Vec<Value> {
        self.permission_outcomes.lock().clone()
    }
}

// ============================================================================
// Transport
// ============================================================================

pub struct FakeTransport {
    script: Arc<Script>,
    log: Arc<AgentLog>,
    kill: CancellationToken,
    to_agent: Option<mpsc::UnboundedSender<Value>>,
    ready: bool,
}

impl FakeTransport {
    pub fn new(script: Arc<Script>, log: Arc<AgentLog>, kill: CancellationToken) -> Self {
        Self {
            script,
            log,
            kill,
            to_agent: None,
            ready: false,
        }
    }
}

impl Transport for FakeTransport {
    async fn connect(&mut self) -> Result<()> {
        self.ready = true;
        Ok(())
    }

    async fn write(&mut self, data: &str) -> Result<()> {
        let frame: Value = serde_json::from_str(data.trim())?;
        self.log.frames.lock().push(frame.clone());
        let Some(to_agent) = &self.to_agent else {
            return Err(AgentError::transport("fake agent not started"));
        };
        to_agent
            .send(frame)
            .map_err(|_| AgentError::transport("fake agent exited"))
    }

    async fn end_input(&mut self) -> Result<()> {
        self.to_agent = None;
        Ok(())
    }

    fn read_messages(&mut self) -> mpsc::UnboundedReceiver<Result<Value>> {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (to_agent, from_client) = mpsc::unbounded_channel();
        self.to_agent = Some(to_agent);
        tokio::spawn(run_agent(
            Arc::clone(&self.script),
            Arc::clone(&self.log),
            from_client,
            out_tx,
            self.kill.clone(),
        ));
        out_rx
    }

    fn is_ready(&self) -> bool {
        self.ready
    }

    async fn close(&mut self) -> Result<()> {
        self.ready = false;
        self.to_agent = None;
        self.kill.cancel();
        Ok(())
    }
}

struct PendingPermission {
    request_id: i64,
    prompt_id: Value,
}

async fn run_agent(
    script: Arc<Script>,
    log: Arc<AgentLog>,
    mut from_client: mpsc::UnboundedReceiver<Value>,
    out: mpsc::UnboundedSender<Result<Value>>,
    kill: CancellationToken,
) {
    let mut sessions = 0u32;
    let mut next_request = 1000i64;
    let mut pending_permission: Option<PendingPermission> = None;
    let mut hanging: Option<Value> = None;
    let mut cancel_requested = false;

    let reply = |id: Value, result: Value| {
        let _ = out.send(Ok(json!({"jsonrpc": "2.0", "id": id, "result": result})));
    };
    let reply_error = |id: Value, code: i64, message: &str| {
        let _ = out.send(Ok(
            json!({"jsonrpc": "2.0", "id": id, "error": {"code": code, "message": message}}),
        ));
    };
    let finish = |id: Value| {
        let mut result = json!({"stopReason": script.stop_reason});
        if let Some(usage) = &script.usage {
            result["usage"] = usage.clone();
        }
        reply(id, result);
    };

    loop {
        let frame = tokio::select! {
            () = kill.cancelled() => break,
            frame = from_client.recv() => match frame {
                Some(frame) => frame,
                None => break,
            },
        };

        let method = frame.get("method").and_then(Value::as_str).map(str::to_string);
        let id = frame.get("id").cloned();
        let params = frame.get("params").cloned().unwrap_or(Value::Null);

        match (method.as_deref(), id) {
            (Some("initialize"), Some(id)) => {
                if !script.init_delay.is_zero() {
                    tokio::time::sleep(script.init_delay).await;
                }
                if script.fail_initialize {
                    reply_error(id, -32603, "initialize refused");
                } else {
                    reply(
                        id,
                        json!({
                            "protocolVersion": 1,
                            "agentCapabilities": {"loadSession": script.load_session},
                            "agentInfo": {"name": "fake-agent", "version": "0.0.0"},
                        }),
                    );
                }
            }
            (Some("session/new"), Some(id)) => {
                sessions += 1;
                let mut result = json!({"sessionId": format!("sess-{sessions}")});
                let modes = script.modes_value();
                if !modes.is_null() {
                    result["modes"] = modes;
                }
                reply(id, result);
            }
            (Some("session/load"), Some(id)) => {
                if script.fail_load || !script.load_session {
                    reply_error(id, -32002, "session not found");
                } else {
                    let modes = script.modes_value();
                    let result = if modes.is_null() {
                        Value::Null
                    } else {
                        json!({"modes": modes})
                    };
                    reply(id, result);
                }
            }
            (Some("session/set_mode"), Some(id)) => reply(id, json!({})),
            (Some("session/prompt"), Some(id)) => {
                if script.die_on_prompt {
                    break;
                }
                cancel_requested = false;
                let session_id = params["sessionId"].clone();
                for update in &script.turn {
                    let _ = out.send(Ok(json!({
                        "jsonrpc": "2.0",
                        "method": "session/update",
                        "params": {"sessionId": session_id, "update": update},
                    })));
                }
                if let Some(options) = &script.permission {
                    next_request += 1;
                    let _ = out.send(Ok(json!({
                        "jsonrpc": "2.0",
                        "id": next_request,
                        "method": "session/request_permission",
                        "params": {
                            "sessionId": session_id,
                            "toolCall": {"toolCallId": "perm-call", "title": "Write file"},
                            "options": options,
                        },
                    })));
                    pending_permission = Some(PendingPermission {
                        request_id: next_request,
                        prompt_id: id,
                    });
                } else if script.hang {
                    hanging = Some(id);
                } else {
                    finish(id);
                }
            }
            (Some("session/cancel"), None) => match hanging.take() {
                Some(id) => reply(id, json!({"stopReason": "cancelled"})),
                None => cancel_requested = true,
            },
            (None, Some(id)) => {
                if let Some(pending) = pending_permission.take() {
                    if id == json!(pending.request_id) {
                        let outcome = frame["result"]["outcome"].clone();
                        log.permission_outcomes.lock().push(outcome);
                        if cancel_requested {
                            cancel_requested = false;
                            reply(pending.prompt_id, json!({"stopReason": "cancelled"}));
                        } else if script.hang {
                            hanging = Some(pending.prompt_id);
                        } else {
                            finish(pending.prompt_id);
                        }
                    } else {
                        pending_permission = Some(pending);
                    }
                }
            }
            (Some(other), Some(id)) => reply_error(id, -32601, &format!("unknown method {other}")),
            _ => {}
        }
    }
}

// ============================================================================
// Launcher
// ============================================================================

/// Launcher handing out fake agents, counting spawns
#[derive(Clone)]
pub struct FakeLauncher {
    script: Arc<Script>,
    log: Arc<AgentLog>,
    spawns: Arc<AtomicUsize>,
    delay: Duration,
    kills: Arc<Mutex<Vec<CancellationToken>>>,
}

impl FakeLauncher {
    pub fn new(script: Script) -> Self {
        Self {
            script: Arc::new(script),
            log: Arc::new(AgentLog::default()),
            spawns: Arc::new(AtomicUsize::new(0)),
            delay: Duration::ZERO,
            kills: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Wait `delay` before every launch
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn spawn_count(&self) -> usize {
        self.spawns.load(Ordering::SeqCst)
    }

    pub fn log(&self) -> &Arc<AgentLog> {
        &self.log
    }

    /// Make the most recently launched agent exit
    pub fn kill_latest(&self) {
        if let Some(kill) = self.kills.lock().last() {
            kill.cancel();
        }
    }
}

impl Launcher for FakeLauncher {
    fn launch(&self, ctx: LaunchContext) -> BoxFuture<'static, Result<AgentConnection>> {
        let this = self.clone();
        async move {
            this.spawns.fetch_add(1, Ordering::SeqCst);
            if !this.delay.is_zero() {
                tokio::time::sleep(this.delay).await;
            }
            let kill = CancellationToken::new();
            this.kills.lock().push(kill.clone());
            let transport = FakeTransport::new(Arc::clone(&this.script), Arc::clone(&this.log), kill);
            AgentConnection::open(transport, ctx).await
        }
        .boxed()
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Agent config resolving to an executable that exists on every unix box
pub fn agent(id: &str) -> AgentConfig {
    AgentConfig::new(id, "sh")
}

pub fn workdir() -> PathBuf {
    std::env::temp_dir()
}

pub fn options() -> BridgeOptions {
    BridgeOptions::builder()
        .default_workdir(workdir())
        .handshake_timeout(Duration::from_secs(5))
        .build()
}

pub fn manager(launcher: &FakeLauncher) -> ProcessManager {
    ProcessManager::with_launcher(options(), Arc::new(launcher.clone()))
}

/// Collect a stream, failing the test if it does not end
pub async fn drain(stream: EventStream) -> Vec<StreamEvent> {
    tokio::time::timeout(Duration::from_secs(5), stream.collect::<Vec<_>>())
        .await
        .expect("stream did not end")
}

/// Poll `condition` until it holds or a second passes
pub async fn eventually(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}
