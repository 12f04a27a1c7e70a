//! Hop-by-hop session establishment and device discovery.
//!
//! [`Discovery`] drives the connection chain front to back: spawn the
//! first hop's client, negotiate its login with the pattern engine, write
//! the next hop's command into the same stream, repeat. The destination
//! hop additionally gets platform detection, privilege negotiation, paging
//! setup and identity extraction. The whole chain runs under one timeout
//! budget independent of the per-step timeouts.
//!
//! The established [`Session`] carries the live channel together with the
//! detected profile and the device's exact prompt pattern; command
//! execution, enable and reload all run against it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use once_cell::sync::Lazy;
use regex::bytes::Regex;
use secrecy::SecretString;

use crate::channel::{Channel, Expectation, TerminalFactory};
use crate::connection::SessionOptions;
use crate::credentials::CredentialResolver;
use crate::device::DeviceInfo;
use crate::error::{CommandError, ConnectionError, Error, Result};
use crate::fsm::{Action, Event, FailKind, Fsm, FsmFailure, NextState, Transition};
use crate::platform::{registry, PlatformProfile};
use crate::target::ConnectionTarget;

/// Generic prompt union used before the device's own prompt is known.
/// Covers shell prompts on jump hosts and exec prompts on every family,
/// XR route-processor paths included.
static ANY_PROMPT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?m)^(?:RP/\d+/RS?P?\d+/CPU\d+:)?[\w.@:~/-]+(?:\([^)]*\))?[$#>%]\s*$")
        .expect("prompt pattern")
});

// Login rule set event indices.
const E_STANDBY: usize = 0;
const E_DENIED: usize = 1;
const E_UNREACHABLE: usize = 2;
const E_CLOSED: usize = 3;
const E_HOST_KEY: usize = 4;
const E_USERNAME: usize = 5;
const E_PASSWORD: usize = 6;
const E_PRESS_RETURN: usize = 7;
const E_ESCAPE: usize = 8;
const E_MORE: usize = 9;
const E_PROMPT: usize = 10;
const E_TIMEOUT: usize = 11;

/// State entered after the single tolerated timeout nudge.
const NUDGED: u32 = 50;

/// An established chain: live channel plus everything discovery learned.
pub(crate) struct Session {
    pub channel: Channel,
    pub profile: &'static PlatformProfile,
    pub prompt: String,
    pub prompt_pattern: Regex,
    pub info: DeviceInfo,
}

/// One discovery run over a connection target.
pub(crate) struct Discovery<'a> {
    target: &'a ConnectionTarget,
    resolver: &'a dyn CredentialResolver,
    factory: &'a dyn TerminalFactory,
    options: &'a SessionOptions,
}

impl<'a> Discovery<'a> {
    pub fn new(
        target: &'a ConnectionTarget,
        resolver: &'a dyn CredentialResolver,
        factory: &'a dyn TerminalFactory,
        options: &'a SessionOptions,
    ) -> Self {
        Self {
            target,
            resolver,
            factory,
            options,
        }
    }

    /// Establish the whole chain and discover the destination device.
    ///
    /// On any failure the channel is closed before the error is returned;
    /// no partially-open chain is ever handed to the caller.
    pub async fn run(&self) -> Result<Session> {
        let first = &self.target.hops()[0];
        info!("connecting hop 1/{}: {}", self.target.len(), first);
        let terminal = self
            .factory
            .spawn(&first.spawn_command())
            .map_err(|e| ConnectionError::Spawn {
                hop: 1,
                message: e.to_string(),
            })?;
        let mut channel = Channel::new(terminal);

        let current_hop = AtomicUsize::new(1);
        let outcome = tokio::time::timeout(
            self.options.chain_timeout,
            self.establish(&mut channel, &current_hop),
        )
        .await;

        match outcome {
            Ok(Ok(session_parts)) => {
                let (profile, prompt, prompt_pattern, info) = session_parts;
                info!(
                    "connected to {} ({})",
                    info.hostname.as_deref().unwrap_or("<unknown>"),
                    profile.name
                );
                Ok(Session {
                    channel,
                    profile,
                    prompt,
                    prompt_pattern,
                    info,
                })
            }
            Ok(Err(e)) => {
                channel.close();
                Err(e)
            }
            Err(_) => {
                channel.close();
                Err(ConnectionError::Timeout {
                    hop: current_hop.load(Ordering::Relaxed),
                    timeout: self.options.chain_timeout,
                }
                .into())
            }
        }
    }

    async fn establish(
        &self,
        channel: &mut Channel,
        current_hop: &AtomicUsize,
    ) -> Result<(&'static PlatformProfile, String, Regex, DeviceInfo)> {
        let hops = self.target.hops();
        let last = hops.len();
        let mut final_outcome = None;

        for (index, hop) in hops.iter().enumerate() {
            let hop_no = index + 1;
            current_hop.store(hop_no, Ordering::Relaxed);

            if index > 0 {
                info!("connecting hop {}/{}: {}", hop_no, last, hop);
                channel
                    .send_line(&hop.spawn_command())
                    .map_err(|_| ConnectionError::Closed { hop: hop_no })?;
            }

            let password = hop.password.clone().or_else(|| {
                hop.username
                    .as_ref()
                    .and_then(|user| self.resolver.resolve(user, &hop.host))
            });
            let fsm = login_fsm(
                hop.username.as_deref(),
                password,
                self.options.password_retries,
                self.options.step_timeout,
            );
            let outcome = fsm
                .run(channel)
                .await
                .map_err(|f| login_failure(f, hop_no, self.options.step_timeout))?;
            debug!("hop {} prompt: {:?}", hop_no, outcome.matched.trim());
            final_outcome = Some(outcome);
        }

        let outcome = final_outcome.expect("target is non-empty");
        let mut prompt = outcome.matched.trim().to_string();
        let profile = registry::detect(&outcome.before, &prompt);
        debug!("detected platform: {}", profile.name);

        let mut info = DeviceInfo {
            os_type: Some(profile.os_type.to_string()),
            // No credential exchange happened when the machine never left
            // its initial state: console or pre-authenticated line.
            is_console: outcome.state == 0,
            ..DeviceInfo::default()
        };

        if profile.supports_enable && profile.is_unprivileged(&prompt) {
            let hop = self.target.destination();
            let enable_password = hop
                .effective_enable_password()
                .cloned()
                .or_else(|| {
                    hop.username
                        .as_ref()
                        .and_then(|user| self.resolver.resolve(user, &hop.host))
                });
            negotiate_enable(
                channel,
                profile,
                enable_password,
                last,
                self.options.step_timeout,
            )
            .await?;
            prompt = probe_prompt(channel, self.options.step_timeout)
                .await
                .ok_or(ConnectionError::Closed { hop: last })?;
        }

        let prompt_pattern = prompt_pattern_for(&prompt);
        info.prompt = Some(prompt.clone());
        info.hostname = profile.hostname_from_prompt(&prompt);

        for command in &profile.paging_disable {
            if let Err(e) = execute(
                channel,
                profile,
                &prompt_pattern,
                command,
                None,
                self.options.command_timeout,
            )
            .await
            {
                warn!("paging setup '{}' failed: {}", command, e);
            }
        }

        if profile.identity_extraction {
            self.extract_identity(channel, profile, &prompt_pattern, &mut info)
                .await;
        }

        Ok((profile, prompt, prompt_pattern, info))
    }

    /// Identity queries are best-effort: a device that rejects them still
    /// yields a usable session.
    async fn extract_identity(
        &self,
        channel: &mut Channel,
        profile: &PlatformProfile,
        prompt: &Regex,
        info: &mut DeviceInfo,
    ) {
        for command in &profile.version_commands {
            match execute(
                channel,
                profile,
                prompt,
                command,
                None,
                self.options.command_timeout,
            )
            .await
            {
                Ok(output) => {
                    info.apply_version_output(&output);
                    break;
                }
                Err(CommandError::Syntax { .. }) => {
                    debug!("'{}' not supported, trying fallback", command);
                }
                Err(e) => {
                    warn!("version query failed: {}", e);
                    return;
                }
            }
        }

        if let Some(command) = profile.inventory_command {
            match execute(
                channel,
                profile,
                prompt,
                command,
                None,
                self.options.command_timeout,
            )
            .await
            {
                Ok(output) => info.apply_inventory_output(&output),
                Err(e) => debug!("inventory query failed: {}", e),
            }
        }

        match execute(
            channel,
            profile,
            prompt,
            "show users",
            None,
            self.options.command_timeout,
        )
        .await
        {
            Ok(output) => info.apply_users_output(&output),
            Err(e) => debug!("console detection failed: {}", e),
        }
    }
}

/// Build the login rule set for one hop.
///
/// States 0..=retries count password attempts; [`NUDGED`] marks the one
/// tolerated timeout. Specific failure phrasings are listed before the
/// generic prompt so they win over it on the same buffered text.
fn login_fsm(
    username: Option<&str>,
    password: Option<SecretString>,
    retries: usize,
    timeout: Duration,
) -> Fsm {
    let events = vec![
        Event::pattern(r"(?i)standby console disabled"),
        Event::pattern(
            r"(?i)permission denied|authentication failed|login invalid|incorrect password|% Bad passwords|% Authentication failed|% Login invalid",
        ),
        Event::pattern(
            r"(?i)connection refused|no route to host|could not resolve|name or service not known|network is unreachable|unable to connect|connection timed out|host key verification failed",
        ),
        Event::pattern(r"(?i)connection closed|closed by foreign host|closed by remote host|reset by peer"),
        Event::pattern(r"(?i)\(yes/no(?:/\[fingerprint\])?\)\?"),
        Event::pattern(r"(?mi)^.*(username|login):\s*$"),
        Event::pattern(r"(?mi)^.*password:\s*$"),
        Event::pattern(r"Press RETURN to get started"),
        Event::pattern(r"Escape character is"),
        Event::pattern(r"--\s?[Mm]ore\s?--"),
        Event::Pattern(ANY_PROMPT.clone()),
        Event::Timeout,
    ];

    let counting: Vec<u32> = (0..=retries as u32).collect();
    let all: Vec<u32> = counting.iter().copied().chain([NUDGED]).collect();

    let mut transitions = vec![
        Transition::new(
            E_STANDBY,
            &all,
            NextState::Done,
            Action::Fail(FailKind::Connection, "standby console disabled".to_string()),
        ),
        Transition::new(
            E_DENIED,
            &all,
            NextState::Done,
            Action::Fail(FailKind::Authentication, "credentials rejected".to_string()),
        ),
        Transition::new(
            E_UNREACHABLE,
            &all,
            NextState::Done,
            Action::Fail(
                FailKind::Connection,
                "host unreachable or connection refused".to_string(),
            ),
        ),
        Transition::new(
            E_CLOSED,
            &all,
            NextState::Done,
            Action::Fail(
                FailKind::Connection,
                "connection closed during negotiation".to_string(),
            ),
        ),
    ];

    // Stay-in-place nudges keep the attempt counter where it is.
    for &s in &all {
        transitions.push(Transition::new(
            E_HOST_KEY,
            &[s],
            NextState::State(s),
            Action::SendLine("yes".to_string()),
        ));
        transitions.push(Transition::new(
            E_USERNAME,
            &[s],
            NextState::State(s),
            match username {
                Some(user) => Action::SendLine(user.to_string()),
                None => Action::Fail(
                    FailKind::Authentication,
                    "username requested but none configured".to_string(),
                ),
            },
        ));
        transitions.push(Transition::new(
            E_PRESS_RETURN,
            &[s],
            NextState::State(s),
            Action::SendLine(String::new()),
        ));
        transitions.push(Transition::new(
            E_ESCAPE,
            &[s],
            NextState::State(s),
            Action::Noop,
        ));
        transitions.push(Transition::new(
            E_MORE,
            &[s],
            NextState::State(s),
            Action::Send("q".to_string()),
        ));
        transitions.push(Transition::new(E_PROMPT, &[s], NextState::Done, Action::Noop));
    }

    // Password attempts, budget exhausted at state == retries. A prompt
    // after the nudge restarts the count at one.
    for attempt in 0..retries as u32 {
        transitions.push(Transition::new(
            E_PASSWORD,
            &[attempt],
            NextState::State(attempt + 1),
            match &password {
                Some(secret) => Action::SendSecret(secret.clone()),
                None => Action::Fail(
                    FailKind::Authentication,
                    "password requested but none available".to_string(),
                ),
            },
        ));
    }
    transitions.push(Transition::new(
        E_PASSWORD,
        &[retries as u32],
        NextState::Done,
        Action::Fail(
            FailKind::Authentication,
            "password retry budget exhausted".to_string(),
        ),
    ));
    transitions.push(Transition::new(
        E_PASSWORD,
        &[NUDGED],
        NextState::State(1),
        match &password {
            Some(secret) => Action::SendSecret(secret.clone()),
            None => Action::Fail(
                FailKind::Authentication,
                "password requested but none available".to_string(),
            ),
        },
    ));

    // One tolerated timeout sends a newline to re-prompt; the next fails.
    transitions.push(Transition::new(
        E_TIMEOUT,
        &counting,
        NextState::State(NUDGED),
        Action::SendLine(String::new()),
    ));
    transitions.push(Transition::new(
        E_TIMEOUT,
        &[NUDGED],
        NextState::Done,
        Action::Fail(FailKind::Timeout, "no prompt after nudge".to_string()),
    ));

    Fsm::new("LOGIN", events, transitions, timeout)
}

fn login_failure(failure: FsmFailure, hop: usize, step: Duration) -> Error {
    let e = match failure {
        FsmFailure::Timeout(timeout) => ConnectionError::Timeout { hop, timeout },
        FsmFailure::StreamClosed => ConnectionError::Closed { hop },
        FsmFailure::Looped => ConnectionError::Failed {
            hop,
            message: "login negotiation did not settle".to_string(),
        },
        FsmFailure::Action(FailKind::Authentication, message) => {
            ConnectionError::Authentication { hop, message }
        }
        FsmFailure::Action(FailKind::Timeout, _) => ConnectionError::Timeout { hop, timeout: step },
        FsmFailure::Action(_, message) => ConnectionError::Failed { hop, message },
    };
    e.into()
}

/// Elevate an unprivileged session with the enable sequence.
pub(crate) async fn negotiate_enable(
    channel: &mut Channel,
    profile: &PlatformProfile,
    password: Option<SecretString>,
    hop: usize,
    timeout: Duration,
) -> Result<()> {
    let Some(password) = password else {
        return Err(ConnectionError::Authentication {
            hop,
            message: "privileged mode requires a password but none is available".to_string(),
        }
        .into());
    };

    channel
        .send_line("enable")
        .map_err(|_| ConnectionError::Closed { hop })?;

    let events = vec![
        Event::pattern(r"(?i)% ?(access denied|bad secrets|bad passwords)|Access denied"),
        Event::Pattern(profile.password.clone()),
        Event::Pattern(profile.privileged.clone()),
        Event::Timeout,
    ];
    let transitions = vec![
        Transition::new(
            0,
            &[0, 1, 2, 3],
            NextState::Done,
            Action::Fail(FailKind::Authentication, "enable password rejected".to_string()),
        ),
        Transition::new(1, &[0], NextState::State(1), Action::SendSecret(password.clone())),
        Transition::new(1, &[1], NextState::State(2), Action::SendSecret(password.clone())),
        Transition::new(1, &[2], NextState::State(3), Action::SendSecret(password)),
        Transition::new(
            1,
            &[3],
            NextState::Done,
            Action::Fail(FailKind::Authentication, "enable password rejected".to_string()),
        ),
        Transition::new(2, &[0, 1, 2, 3], NextState::Done, Action::Noop),
        Transition::new(
            3,
            &[0, 1, 2, 3],
            NextState::Done,
            Action::Fail(FailKind::Timeout, "no privileged prompt".to_string()),
        ),
    ];

    Fsm::new("ENABLE", events, transitions, timeout)
        .run(channel)
        .await
        .map(|_| ())
        .map_err(|f| login_failure(f, hop, timeout))
}

/// Re-prompt with a newline and return the freshly printed prompt line.
pub(crate) async fn probe_prompt(channel: &mut Channel, timeout: Duration) -> Option<String> {
    channel.drain();
    channel.send_line("").ok()?;
    match channel.expect(&[&ANY_PROMPT], timeout).await {
        Expectation::Match { matched, .. } => Some(matched.trim().to_string()),
        _ => None,
    }
}

/// Derive the device's exact prompt pattern from a detected prompt line.
/// The escaped stem plus a mode character tail also matches config-mode
/// variants of the same prompt.
pub(crate) fn prompt_pattern_for(prompt: &str) -> Regex {
    let stem = prompt
        .trim_end()
        .trim_end_matches(['#', '>', '$', '%']);
    Regex::new(&format!(
        r"(?m)^{}(?:\([^)]*\))?[#>$%]\s*$",
        regex::escape(stem)
    ))
    .expect("escaped prompt pattern")
}

/// Run one command and capture its output.
///
/// The buffer is drained first so stale output never leaks into the
/// result. Completion is the device prompt unless `wait_for` overrides
/// it; the echoed command line and the trailing prompt are stripped.
pub(crate) async fn execute(
    channel: &mut Channel,
    profile: &PlatformProfile,
    prompt: &Regex,
    command: &str,
    wait_for: Option<&Regex>,
    timeout: Duration,
) -> std::result::Result<String, CommandError> {
    channel.drain();
    channel.send_line(command).map_err(|_| CommandError::Failed {
        command: command.to_string(),
        message: "session stream closed".to_string(),
    })?;

    let done = wait_for.unwrap_or(prompt);
    let deadline = Instant::now() + timeout;
    let mut output = String::new();

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CommandError::Timeout {
                command: command.to_string(),
                timeout,
            });
        }

        match channel
            .expect(
                &[
                    &profile.syntax_error,
                    &profile.more,
                    &profile.connection_closed,
                    done,
                ],
                remaining,
            )
            .await
        {
            Expectation::Match { index: 0, .. } => {
                // Let the device finish printing before surfacing the error
                // so the buffer is clean for the next command.
                let _ = channel.expect(&[done], Duration::from_secs(2)).await;
                return Err(CommandError::Syntax {
                    command: command.to_string(),
                });
            }
            Expectation::Match { index: 1, before, .. } => {
                output.push_str(&before);
                // Pager guard; paging disable should prevent this.
                let _ = channel.send(" ");
            }
            Expectation::Match { index: 2, .. } => {
                return Err(CommandError::Failed {
                    command: command.to_string(),
                    message: "remote side closed the session".to_string(),
                });
            }
            Expectation::Match { before, .. } => {
                output.push_str(&before);
                break;
            }
            Expectation::Timeout => {
                return Err(CommandError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
            Expectation::Closed => {
                return Err(CommandError::Failed {
                    command: command.to_string(),
                    message: "session closed mid-command".to_string(),
                });
            }
        }
    }

    Ok(clean_output(command, &output))
}

/// Strip carriage returns, the echoed command line and trailing blank
/// space from captured output.
fn clean_output(command: &str, raw: &str) -> String {
    let text = raw.replace('\r', "");
    let body = match memchr::memchr(b'\n', text.as_bytes()) {
        Some(pos) if text[..pos].trim_end() == command => &text[pos + 1..],
        _ => text.as_str(),
    };
    body.trim_end().to_string()
}

/// Send the reload command and answer its confirmation prompts; success
/// is the stream closing within the timeout.
pub(crate) async fn reload(
    channel: &mut Channel,
    profile: &PlatformProfile,
    timeout: Duration,
) -> std::result::Result<(), CommandError> {
    let command = profile.reload_command;
    channel.drain();
    channel.send_line(command).map_err(|_| CommandError::Failed {
        command: command.to_string(),
        message: "session stream closed".to_string(),
    })?;

    let mut patterns: Vec<&Regex> = profile.reload_confirms.iter().map(|(p, _)| p).collect();
    patterns.push(&profile.connection_closed);
    let deadline = Instant::now() + timeout;

    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(CommandError::Timeout {
                command: command.to_string(),
                timeout,
            });
        }

        match channel.expect(&patterns, remaining).await {
            Expectation::Match { index, .. } if index < profile.reload_confirms.len() => {
                let response = profile.reload_confirms[index].1;
                let result = if response == "\r" {
                    channel.send("\r")
                } else {
                    channel.send_line(response)
                };
                if result.is_err() {
                    // Device dropped the session right after confirming.
                    return Ok(());
                }
            }
            // The remote-close phrasing counts the same as the stream ending.
            Expectation::Match { .. } | Expectation::Closed => {
                info!("device dropped the session, reload accepted");
                return Ok(());
            }
            Expectation::Timeout => {
                return Err(CommandError::Timeout {
                    command: command.to_string(),
                    timeout,
                });
            }
        }
    }
}
