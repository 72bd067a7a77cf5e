//! Bounded polling for asynchronous remote conditions

use super::{Remote, RemoteCommand};
use crate::error::{FlotillaError, Result};
use std::time::Duration;

/// Poll `command` on `host` every `interval` until its output contains
/// `marker`, giving up after `timeout`.
///
/// Errors from individual polls are logged and polling continues; the
/// status source (service logs, usually) may not exist yet when polling
/// starts. Running out of time is [`FlotillaError::Timeout`].
pub async fn wait_for_marker(
    remote: &Remote,
    host: &str,
    command: &RemoteCommand,
    marker: &str,
    interval: Duration,
    timeout: Duration,
) -> Result<()> {
    let poll = async {
        let mut attempt = 0u32;
        loop {
            tokio::time::sleep(interval).await;
            attempt += 1;
            match remote.exec(host, command.clone()).await {
                Ok(output) if output.contains(marker) => return attempt,
                Ok(_) => tracing::debug!("{}: '{}' not seen yet (poll {})", host, marker, attempt),
                Err(e) => tracing::debug!("{}: poll {} failed: {}", host, attempt, e),
            }
        }
    };

    match tokio::time::timeout(timeout, poll).await {
        Ok(attempts) => {
            tracing::debug!("{}: '{}' seen after {} poll(s)", host, marker, attempts);
            Ok(())
        }
        Err(_) => Err(FlotillaError::Timeout(format!(
            "'{}' did not appear on {} within {:?}",
            marker, host, timeout
        ))),
    }
}
