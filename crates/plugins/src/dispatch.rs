//! Runs one plugin invocation as a child process.
//!
//! The payload is written to the child's stdin as one JSON document and
//! stdin is closed. The child must answer with exactly one JSON document on
//! stdout and exit 0:
//!
//! - Exit 0, stdout one JSON value → success
//! - Exit 0, stdout empty, several documents or trailing text → protocol error
//! - Non-zero exit or killed by a signal → execution error with stderr
//! - Timeout → the child is killed and no partial output is used

use std::{process::Stdio, sync::Arc, time::Duration};

use {
    serde_json::Value,
    subhost_common::protocol::{self, Invocation},
    tokio::io::AsyncWriteExt,
    tracing::{debug, warn},
};

use crate::{
    environment::EnvironmentManager,
    error::{Error, Result},
    locks::LockRole,
    registry::{LaunchSpec, Snapshot},
    runtime::Runtime,
};

/// Env var carrying the invoked plugin's name.
pub const PLUGIN_NAME_ENV: &str = "SUBHOST_PLUGIN_NAME";

pub struct Dispatcher {
    environments: Arc<EnvironmentManager>,
    tool_path_env: String,
    default_timeout: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        environments: Arc<EnvironmentManager>,
        tool_path_env: impl Into<String>,
        default_timeout: Option<Duration>,
    ) -> Self {
        Self {
            environments,
            tool_path_env: tool_path_env.into(),
            default_timeout,
        }
    }

    /// Dispatch `payload` to `name` as found in `snapshot`.
    ///
    /// `timeout` overrides the plugin's declared bound, which overrides the
    /// configured default.
    pub async fn dispatch(
        &self,
        snapshot: &Snapshot,
        name: &str,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let launch = snapshot
            .ready(name)
            .ok_or_else(|| Error::NotFound(name.to_string()))?;
        protocol::validate_payload(payload)?;

        let runtime = self
            .environments
            .runtimes()
            .get(&launch.runtime)
            .ok_or_else(|| {
                Error::environment(name, format!("no runtime for '.{}' files", launch.runtime))
            })?;
        let timeout = timeout
            .or(launch.timeout_secs.map(Duration::from_secs))
            .or(self.default_timeout);

        let lock = self.environments.locks().get(name);
        let _live = lock.live.read().await;
        let live_file = self
            .environments
            .locks()
            .file(name, LockRole::Live)
            .map_err(|e| Error::environment(name, e))?;
        live_file
            .shared(self.run(name, launch, runtime, payload, timeout))
            .await
            .map_err(|e| Error::environment(name, e))?
    }

    /// Spawn and wait for the plugin; caller holds the plugin's live locks.
    async fn run(
        &self,
        name: &str,
        launch: &LaunchSpec,
        runtime: Arc<dyn Runtime>,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        // Prefer the marker on disk: another process may have committed a
        // newer generation since this snapshot was published.
        let environment = self
            .environments
            .current(name)
            .unwrap_or_else(|| launch.environment.clone());
        if !environment.path.is_dir() {
            return Err(Error::environment(
                name,
                format!("environment {} is missing", environment.path.display()),
            ));
        }
        let tool_storage = self.environments.ensure_tool_storage(name)?;

        let body = serde_json::to_vec(payload)?;
        debug!(
            plugin = name,
            invocation = invocation_label(payload),
            mode = protocol::requested_mode(payload),
            payload_len = body.len(),
            ?timeout,
            "dispatching"
        );

        let mut child = runtime
            .command(&environment.path, &launch.source_path)
            .current_dir(&tool_storage)
            .env(&self.tool_path_env, &tool_storage)
            .env(PLUGIN_NAME_ENV, name)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                Error::environment(
                    name,
                    format!("failed to spawn {}: {e}", launch.source_path.display()),
                )
            })?;

        // Written from a task so a child that fills stdout before reading all
        // of stdin cannot deadlock us.
        let writer = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                let written = stdin.write_all(&body).await;
                drop(stdin);
                written
            })
        });

        let waited = match timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait_with_output()).await {
                Ok(waited) => waited,
                Err(_) => {
                    if let Some(writer) = writer {
                        writer.abort();
                    }
                    warn!(plugin = name, ?limit, "plugin timed out, killed");
                    return Err(Error::Timeout {
                        plugin: name.to_string(),
                        timeout: limit,
                    });
                },
            },
            None => child.wait_with_output().await,
        };
        let output = waited?;

        if let Some(writer) = writer {
            match writer.await {
                Ok(Err(e)) if e.kind() != std::io::ErrorKind::BrokenPipe => {
                    warn!(plugin = name, error = %e, "failed to write payload");
                },
                Err(e) => warn!(plugin = name, error = %e, "payload writer panicked"),
                _ => {},
            }
        }

        debug!(
            plugin = name,
            exit_code = output.status.code(),
            stdout_len = output.stdout.len(),
            stderr_len = output.stderr.len(),
            "plugin completed"
        );

        classify(
            name,
            output.status.success(),
            output.status.code(),
            &output.stdout,
            &output.stderr,
        )
    }
}

/// Turn a finished child's exit status and output into a result.
pub fn classify(
    plugin: &str,
    success: bool,
    exit_code: Option<i32>,
    stdout: &[u8],
    stderr: &[u8],
) -> Result<Value> {
    let stderr = String::from_utf8_lossy(stderr).into_owned();
    if !success {
        return Err(Error::Execution {
            plugin: plugin.to_string(),
            exit_code,
            stderr,
        });
    }
    serde_json::from_slice::<Value>(stdout).map_err(|e| Error::Protocol {
        plugin: plugin.to_string(),
        reason: describe_stdout_error(stdout, &e),
        stderr,
    })
}

fn describe_stdout_error(stdout: &[u8], err: &serde_json::Error) -> String {
    if stdout.iter().all(u8::is_ascii_whitespace) {
        return "stdout is empty, expected one JSON document".into();
    }
    format!("stdout is not exactly one JSON document: {err}")
}

fn invocation_label(payload: &Value) -> &'static str {
    match protocol::invocation(payload) {
        Invocation::Single(_) => "single",
        Invocation::Batch(_) => "batch",
        Invocation::Bare => "bare",
    }
}
