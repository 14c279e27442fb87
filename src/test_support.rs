//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeSet, VecDeque};
use std::env;
use std::ffi::OsString;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::{Mutex as AsyncMutex, MutexGuard};

use crate::kamatera::api::{ApiRequest, ApiResponse, Transport, TransportError, TransportFuture};
use crate::ssh::{CommandError, CommandOutput, CommandRunner};

/// Computes a response from the request and every request seen before it.
pub type Responder = Box<dyn Fn(&ApiRequest, &[ApiRequest]) -> ApiResponse + Send + Sync>;

enum ScriptedReply {
    Fixed(Result<ApiResponse, TransportError>),
    Computed(Responder),
}

#[derive(Default)]
struct TransportState {
    replies: VecDeque<ScriptedReply>,
    requests: Vec<ApiRequest>,
}

/// Scripted HTTP transport that answers requests in FIFO order.
///
/// Requests are recorded so tests can assert on paths, verbs and bodies.
/// Running out of replies yields a transport failure.
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    state: Arc<Mutex<TransportState>>,
}

impl std::fmt::Debug for ScriptedTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("ScriptedTransport")
            .field("pending", &state.replies.len())
            .field("requests", &state.requests.len())
            .finish()
    }
}

impl ScriptedTransport {
    /// Creates a transport with no queued replies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TransportState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queues a response with `status` and a raw `body`.
    pub fn push_json(&self, status: u16, body: &str) {
        self.lock()
            .replies
            .push_back(ScriptedReply::Fixed(Ok(ApiResponse {
                status,
                body: body.to_owned(),
            })));
    }

    /// Queues a network failure.
    pub fn push_transport_error(&self, message: &str) {
        self.lock()
            .replies
            .push_back(ScriptedReply::Fixed(Err(TransportError::new(message))));
    }

    /// Queues a response computed when the request arrives.
    pub fn push_with(
        &self,
        responder: impl Fn(&ApiRequest, &[ApiRequest]) -> ApiResponse + Send + Sync + 'static,
    ) {
        self.lock()
            .replies
            .push_back(ScriptedReply::Computed(Box::new(responder)));
    }

    /// Returns a snapshot of all requests recorded so far.
    #[must_use]
    pub fn requests(&self) -> Vec<ApiRequest> {
        self.lock().requests.clone()
    }

    /// Returns the number of replies not consumed yet.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.lock().replies.len()
    }
}

impl Transport for ScriptedTransport {
    fn send<'a>(&'a self, request: &'a ApiRequest) -> TransportFuture<'a> {
        let result = {
            let mut state = self.lock();
            let reply = state.replies.pop_front();
            let outcome = match reply {
                Some(ScriptedReply::Fixed(result)) => result,
                Some(ScriptedReply::Computed(responder)) => Ok(responder(request, &state.requests)),
                None => Err(TransportError::new("no scripted response available")),
            };
            state.requests.push(request.clone());
            outcome
        };
        Box::pin(async move { result })
    }
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
    /// Extra environment variables.
    pub env: Vec<(String, String)>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(self.program.clone());
        parts.extend(
            self.args
                .iter()
                .map(|arg| arg.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push_output(Some(0), "", "");
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32) {
        self.push_output(Some(code), "", "simulated failure");
    }

    /// Pushes an explicit command output response.
    pub fn push_output(
        &self,
        code: Option<i32>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
    ) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(CommandOutput {
                code,
                stdout: stdout.into(),
                stderr: stderr.into(),
            });
    }
}

impl CommandRunner for ScriptedRunner {
    fn run(
        &self,
        program: &str,
        args: &[OsString],
        env: &[(&str, &str)],
    ) -> Result<CommandOutput, CommandError> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
                env: env
                    .iter()
                    .map(|(key, value)| ((*key).to_owned(), (*value).to_owned()))
                    .collect(),
            });
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .ok_or_else(|| CommandError {
                program: program.to_owned(),
                message: String::from("no scripted response available"),
            })
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push(((*key).to_owned(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}

/// Renders a `/service/servers` listing body from `(id, name, power)` rows.
#[must_use]
pub fn json_server_list(servers: &[(&str, &str, &str)]) -> String {
    let items = servers
        .iter()
        .map(|(id, name, power)| {
            format!(
                "{{\"id\":\"{id}\",\"datacenter\":\"EU\",\"name\":\"{name}\",\"power\":\"{power}\"}}"
            )
        })
        .collect::<Vec<_>>()
        .join(",");
    format!("[{items}]")
}
