//! Public connection façade.
//!
//! [`Connection`] owns one logical device session: a connection target, a
//! credential resolver, and (while connected) the established channel
//! chain. Its observable state machine is
//! `disconnected → connecting → connected → executing → connected`, with
//! failures dropping back to `disconnected` and the whole chain torn down.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use regex::bytes::Regex;
use serde::Serialize;

use crate::channel::{PtySpawner, TerminalFactory};
use crate::credentials::CredentialResolver;
use crate::device::DeviceInfo;
use crate::discovery::{self, Discovery, Session};
use crate::error::{CommandError, Result};
use crate::target::ConnectionTarget;

/// Observable façade state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Executing,
    Disconnecting,
}

/// Timeouts and retry budgets for one connection.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Read timeout for one negotiation step.
    pub step_timeout: Duration,
    /// Completion timeout for one command.
    pub command_timeout: Duration,
    /// Budget for establishing the whole hop chain.
    pub chain_timeout: Duration,
    /// Password attempts per hop before authentication fails.
    pub password_retries: usize,
    /// Connect attempts per `reconnect()` call.
    pub reconnect_attempts: usize,
    /// Delay before the second reconnect attempt; doubles per attempt.
    pub reconnect_backoff: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            step_timeout: Duration::from_secs(30),
            command_timeout: Duration::from_secs(60),
            chain_timeout: Duration::from_secs(180),
            password_retries: 3,
            reconnect_attempts: 3,
            reconnect_backoff: Duration::from_secs(2),
        }
    }
}

/// Output of one executed command.
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    /// The command as sent.
    pub command: String,
    /// Captured output, echo and trailing prompt stripped.
    pub output: String,
}

/// One logical session with a network device, possibly through a chain of
/// jump hosts.
pub struct Connection {
    target: ConnectionTarget,
    resolver: Arc<dyn CredentialResolver>,
    factory: Box<dyn TerminalFactory>,
    options: SessionOptions,
    state: ConnectionState,
    session: Option<Session>,
    info: DeviceInfo,
    properties: HashMap<String, String>,
}

impl Connection {
    /// Create a disconnected connection for a target. Sessions spawn real
    /// `ssh`/`telnet` clients unless another factory is injected.
    pub fn new(target: ConnectionTarget, resolver: Arc<dyn CredentialResolver>) -> Self {
        Self {
            target,
            resolver,
            factory: Box::new(PtySpawner),
            options: SessionOptions::default(),
            state: ConnectionState::Disconnected,
            session: None,
            info: DeviceInfo::default(),
            properties: HashMap::new(),
        }
    }

    /// Replace the timeout and retry configuration.
    pub fn with_options(mut self, options: SessionOptions) -> Self {
        self.options = options;
        self
    }

    /// Replace the terminal factory. Tests inject scripted terminals here.
    pub fn with_factory(mut self, factory: Box<dyn TerminalFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Current façade state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        matches!(
            self.state,
            ConnectionState::Connected | ConnectionState::Executing
        )
    }

    /// Identity facts from the last successful discovery. Survives
    /// disconnection; replaced wholesale on the next discovery.
    pub fn device_info(&self) -> &DeviceInfo {
        &self.info
    }

    /// The detected device prompt, while connected.
    pub fn prompt(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.prompt.as_str())
    }

    /// Run discovery without keeping the session: populates the identity
    /// facts and tears the chain back down.
    pub async fn discovery(&mut self) -> Result<&DeviceInfo> {
        let mut session = self.establish().await?;
        session.channel.close();
        self.info = session.info;
        Ok(&self.info)
    }

    /// Establish the chain and transition to `connected`.
    pub async fn connect(&mut self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.state = ConnectionState::Connecting;
        match self.establish().await {
            Ok(session) => {
                self.info = session.info.clone();
                self.session = Some(session);
                self.state = ConnectionState::Connected;
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Tear down any live chain and retry `connect()` with exponential
    /// backoff between attempts.
    pub async fn reconnect(&mut self) -> Result<()> {
        self.teardown();
        let mut backoff = self.options.reconnect_backoff;
        let attempts = self.options.reconnect_attempts.max(1);
        let mut last = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                debug!("reconnect attempt {}/{} in {:?}", attempt, attempts, backoff);
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            match self.connect().await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("reconnect attempt {}/{} failed: {}", attempt, attempts, e);
                    last = Some(e);
                }
            }
        }
        Err(last.expect("at least one attempt"))
    }

    /// Execute a command and capture its output, completion detected by
    /// the device prompt.
    pub async fn send(&mut self, command: &str) -> Result<CommandResult> {
        self.send_with(command, None, self.options.command_timeout)
            .await
    }

    /// Execute a command waiting for an arbitrary completion pattern
    /// instead of the prompt, under an explicit timeout.
    pub async fn send_with(
        &mut self,
        command: &str,
        wait_for: Option<&Regex>,
        timeout: Duration,
    ) -> Result<CommandResult> {
        if self.state != ConnectionState::Connected {
            return Err(CommandError::Failed {
                command: command.to_string(),
                message: format!("connection is {:?}", self.state),
            }
            .into());
        }
        let session = self.session.as_mut().expect("connected without session");

        self.state = ConnectionState::Executing;
        debug!("executing: {}", command);
        let result = discovery::execute(
            &mut session.channel,
            session.profile,
            &session.prompt_pattern,
            command,
            wait_for,
            timeout,
        )
        .await;
        match result {
            Ok(output) => {
                self.state = ConnectionState::Connected;
                Ok(CommandResult {
                    command: command.to_string(),
                    output,
                })
            }
            Err(e @ CommandError::Failed { .. }) => {
                // The session is gone; leave nothing half-open behind.
                self.teardown();
                Err(e.into())
            }
            Err(e) => {
                self.state = ConnectionState::Connected;
                Err(e.into())
            }
        }
    }

    /// Elevate to privileged mode mid-session.
    pub async fn enable(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(CommandError::Failed {
                command: "enable".to_string(),
                message: format!("connection is {:?}", self.state),
            }
            .into());
        }
        let session = self.session.as_mut().expect("connected without session");
        if !session.profile.is_unprivileged(&session.prompt) {
            return Ok(());
        }

        let hop = self.target.destination();
        let password = hop.effective_enable_password().cloned().or_else(|| {
            hop.username
                .as_ref()
                .and_then(|user| self.resolver.resolve(user, &hop.host))
        });
        let step = self.options.step_timeout;
        discovery::negotiate_enable(
            &mut session.channel,
            session.profile,
            password,
            self.target.len(),
            step,
        )
        .await?;

        if let Some(prompt) = discovery::probe_prompt(&mut session.channel, step).await {
            session.prompt_pattern = discovery::prompt_pattern_for(&prompt);
            session.prompt = prompt.clone();
            self.info.prompt = Some(prompt);
        }
        Ok(())
    }

    /// Reboot the device. Success is the device dropping the session
    /// within the command timeout; the façade ends up disconnected.
    pub async fn reload(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(CommandError::Failed {
                command: "reload".to_string(),
                message: format!("connection is {:?}", self.state),
            }
            .into());
        }
        let session = self.session.as_mut().expect("connected without session");
        let result = discovery::reload(
            &mut session.channel,
            session.profile,
            self.options.command_timeout,
        )
        .await;
        self.teardown();
        result.map_err(Into::into)
    }

    /// Close the chain, last hop to first. Each hop gets an `exit` before
    /// the transport goes away so jump hosts are left clean. Idempotent.
    pub async fn disconnect(&mut self) {
        if self.session.is_none() {
            self.state = ConnectionState::Disconnected;
            return;
        }
        self.state = ConnectionState::Disconnecting;
        if let Some(session) = self.session.as_mut() {
            for hop in (1..=self.target.len()).rev() {
                debug!("closing hop {}", hop);
                if session.channel.send_line("exit").is_err() {
                    break;
                }
                // Give the remote side a moment to process the exit.
                let _ = session.channel.peek(Duration::from_millis(200)).await;
            }
        }
        self.teardown();
        info!("disconnected from {}", self.target.destination());
    }

    /// Store a scratch value on the connection instance.
    pub fn store_property(&mut self, key: &str, value: &str) {
        self.properties.insert(key.to_string(), value.to_string());
    }

    /// Fetch a scratch value stored with [`store_property`].
    ///
    /// [`store_property`]: Connection::store_property
    pub fn get_property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    async fn establish(&self) -> Result<Session> {
        Discovery::new(
            &self.target,
            self.resolver.as_ref(),
            self.factory.as_ref(),
            &self.options,
        )
        .run()
        .await
    }

    fn teardown(&mut self) {
        if let Some(mut session) = self.session.take() {
            session.channel.close();
        }
        self.state = ConnectionState::Disconnected;
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credentials::NoCredentials;

    fn connection() -> Connection {
        let target = ConnectionTarget::parse(&["ssh://cisco:pw@10.0.0.1"]).unwrap();
        Connection::new(target, Arc::new(NoCredentials))
    }

    #[test]
    fn test_starts_disconnected() {
        let conn = connection();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(!conn.is_connected());
        assert!(conn.prompt().is_none());
    }

    #[test]
    fn test_default_options() {
        let options = SessionOptions::default();
        assert_eq!(options.step_timeout, Duration::from_secs(30));
        assert_eq!(options.command_timeout, Duration::from_secs(60));
        assert_eq!(options.chain_timeout, Duration::from_secs(180));
        assert_eq!(options.password_retries, 3);
        assert_eq!(options.reconnect_attempts, 3);
    }

    #[test]
    fn test_property_store() {
        let mut conn = connection();
        assert!(conn.get_property("stage").is_none());
        conn.store_property("stage", "pre-upgrade");
        assert_eq!(conn.get_property("stage"), Some("pre-upgrade"));
        conn.store_property("stage", "post-upgrade");
        assert_eq!(conn.get_property("stage"), Some("post-upgrade"));
    }

    #[tokio::test]
    async fn test_send_requires_connected() {
        let mut conn = connection();
        let err = conn.send("show version").await.unwrap_err();
        assert_eq!(err.command(), Some("show version"));
    }

    #[tokio::test]
    async fn test_disconnect_when_never_connected() {
        let mut conn = connection();
        conn.disconnect().await;
        conn.disconnect().await;
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
