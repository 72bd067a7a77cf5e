//! Test helpers: a scripted executor and log capture

use crate::error::{FlotillaError, Result};
use crate::remote::{AuthConfig, RemoteCommand, RemoteExecutor};
use async_trait::async_trait;
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing_subscriber::fmt::MakeWriter;

enum Reply {
    Output(String),
    Fail(String),
}

struct Rule {
    host: Option<String>,
    pattern: String,
    reply: Reply,
}

/// In-memory executor answering commands from a script.
///
/// Rules match when the host matches (or the rule is host-agnostic) and the
/// sent shell text contains the pattern. The first matching rule wins;
/// unmatched commands succeed with empty output.
#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    delays: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<(String, String, String)>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, host: Option<&str>, pattern: &str, reply: Reply) {
        self.rules.lock().unwrap().push(Rule {
            host: host.map(str::to_string),
            pattern: pattern.to_string(),
            reply,
        });
    }

    pub fn respond(&self, host: &str, pattern: &str, output: &str) {
        self.push(Some(host), pattern, Reply::Output(output.to_string()));
    }

    pub fn respond_all(&self, pattern: &str, output: &str) {
        self.push(None, pattern, Reply::Output(output.to_string()));
    }

    pub fn fail_on(&self, host: &str, pattern: &str) {
        self.fail_with(host, pattern, "scripted failure");
    }

    pub fn fail_with(&self, host: &str, pattern: &str, stderr: &str) {
        self.push(Some(host), pattern, Reply::Fail(stderr.to_string()));
    }

    pub fn delay(&self, host: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(host.to_string(), delay);
    }

    /// Shell texts sent to `host`, in order
    pub fn commands_for(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _, _)| h == host)
            .map(|(_, _, cmd)| cmd.clone())
            .collect()
    }

    /// Users that logged in to `host`, one entry per command
    pub fn users_for(&self, host: &str) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(h, _, _)| h == host)
            .map(|(_, user, _)| user.clone())
            .collect()
    }
}

#[async_trait]
impl RemoteExecutor for ScriptedExecutor {
    async fn execute(
        &self,
        host: &str,
        auth: &AuthConfig,
        command: &RemoteCommand,
    ) -> Result<String> {
        let shell = command.shell().into_owned();
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), auth.user.clone(), shell.clone()));

        let delay = self.delays.lock().unwrap().get(host).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let rules = self.rules.lock().unwrap();
        let rule = rules.iter().find(|r| {
            r.host.as_deref().map_or(true, |h| h == host) && shell.contains(&r.pattern)
        });

        match rule.map(|r| &r.reply) {
            Some(Reply::Output(out)) => Ok(out.clone()),
            Some(Reply::Fail(stderr)) => Err(FlotillaError::remote(host, stderr.clone())),
            None => Ok(String::new()),
        }
    }
}

#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

struct LogWriter(Arc<Mutex<Vec<u8>>>);

impl io::Write for LogWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogWriter(Arc::clone(&self.0))
    }
}

/// Run `future` with a thread-local subscriber and return everything it
/// logged. Only reliable on the current-thread runtime.
pub async fn capture_logs<F: Future>(future: F) -> (F::Output, String) {
    let buffer = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::TRACE)
        .with_ansi(false)
        .with_writer(buffer.clone())
        .finish();

    let guard = tracing::subscriber::set_default(subscriber);
    let output = future.await;
    drop(guard);

    let logs = String::from_utf8_lossy(&buffer.0.lock().unwrap()).into_owned();
    (output, logs)
}
