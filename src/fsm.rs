//! Pattern-Action Engine.
//!
//! A small finite state machine that drives one interactive exchange:
//! read terminal output, match it against an ordered event list, look up
//! the (event, state) transition, execute its action, move on. The same
//! engine runs login negotiation, command execution and reload sequences;
//! only the rule data changes.
//!
//! Events are matched in list order (see [`Channel::expect`]); actions are
//! data interpreted by the engine, not callbacks, so rule sets stay plain
//! tables the way the platform profiles are.

use std::time::Duration;

use log::{debug, trace};
use regex::bytes::Regex;
use secrecy::{ExposeSecret, SecretString};

use crate::channel::{Channel, Expectation};

/// Ceiling on transitions per run; a guard against rule sets that loop.
const MAX_TRANSITIONS: usize = 20;

/// One entry of the ordered event list.
#[derive(Debug)]
pub enum Event {
    /// Output pattern.
    Pattern(Regex),
    /// No pattern matched within the step timeout.
    Timeout,
    /// The stream closed.
    Eof,
}

impl Event {
    pub fn pattern(pattern: &str) -> Self {
        Event::Pattern(Regex::new(pattern).expect("invalid event pattern"))
    }
}

/// What the engine does when a transition fires.
#[derive(Debug, Clone)]
pub enum Action {
    /// Transition without output.
    Noop,
    /// Write raw text.
    Send(String),
    /// Write a line.
    SendLine(String),
    /// Write a secret as a line. Never logged.
    SendSecret(SecretString),
    /// Stop the run with a failure of the given kind.
    Fail(FailKind, String),
}

/// Failure kinds an action can signal. The caller attaches its own payload
/// (hop index, command text) when mapping these to crate errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailKind {
    Connection,
    Authentication,
    Timeout,
    Syntax,
}

/// Where a transition leads.
#[derive(Debug, Clone, Copy)]
pub enum NextState {
    /// Continue in the given state.
    State(u32),
    /// Stop successfully.
    Done,
    /// Stop and hand control to a follow-up rule set; the terminal event
    /// is reported so the next run can start from it.
    Restart,
}

/// One rule: when `event` fires in any of `states`, run `action` and move
/// to `next`. A non-zero `timeout` replaces the running step timeout.
#[derive(Debug)]
pub struct Transition {
    pub event: usize,
    pub states: Vec<u32>,
    pub next: NextState,
    pub action: Action,
    pub timeout: Option<Duration>,
}

impl Transition {
    pub fn new(event: usize, states: &[u32], next: NextState, action: Action) -> Self {
        Self {
            event,
            states: states.to_vec(),
            next,
            action,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// How a run ended when it did not succeed.
#[derive(Debug)]
pub enum FsmFailure {
    /// Timeout with no tolerating rule.
    Timeout(Duration),
    /// Stream closed with no tolerating rule.
    StreamClosed,
    /// Transition ceiling exceeded.
    Looped,
    /// A `Fail` action fired.
    Action(FailKind, String),
}

/// Successful run outcome.
#[derive(Debug)]
pub struct FsmOutcome {
    /// Index of the terminal event.
    pub event: usize,
    /// State the machine was in when the terminal event fired.
    pub state: u32,
    /// Text preceding the terminal match.
    pub before: String,
    /// The terminal match itself.
    pub matched: String,
    /// True when the terminal transition asked for a follow-up rule set.
    pub restart: bool,
}

/// The engine. Built per step from an event list and transition table.
pub struct Fsm {
    name: &'static str,
    events: Vec<Event>,
    transitions: Vec<Transition>,
    timeout: Duration,
    /// Event index to fire immediately instead of reading first. Used when
    /// the previous rule set already consumed this event's match.
    init_event: Option<usize>,
}

impl Fsm {
    pub fn new(
        name: &'static str,
        events: Vec<Event>,
        transitions: Vec<Transition>,
        timeout: Duration,
    ) -> Self {
        Self {
            name,
            events,
            transitions,
            timeout,
            init_event: None,
        }
    }

    pub fn with_init_event(mut self, event: usize) -> Self {
        self.init_event = Some(event);
        self
    }

    /// Drive the channel until a terminal transition, a failure signal, a
    /// timeout or the transition ceiling.
    pub async fn run(mut self, channel: &mut Channel) -> Result<FsmOutcome, FsmFailure> {
        let mut state: u32 = 0;
        let mut timeout = self.timeout;
        let mut banner = String::new();
        debug!("[{}] started", self.name);

        for _ in 0..MAX_TRANSITIONS {
            let (event, before, matched) = match self.init_event.take() {
                Some(event) => (event, String::new(), String::new()),
                None => match self.observe(channel, timeout).await {
                    Ok(hit) => hit,
                    Err(failure) => return Err(failure),
                },
            };
            banner.push_str(&before);

            let Some(transition) = self
                .transitions
                .iter()
                .find(|t| t.event == event && t.states.contains(&state))
            else {
                debug!("[{}] no transition for E={} S={}", self.name, event, state);
                continue;
            };

            trace!("[{}] E={} S={} -> {:?}", self.name, event, state, transition.next);
            match &transition.action {
                Action::Noop => {}
                Action::Send(text) => {
                    if channel.send(text).is_err() {
                        return Err(FsmFailure::StreamClosed);
                    }
                }
                Action::SendLine(text) => {
                    if channel.send_line(text).is_err() {
                        return Err(FsmFailure::StreamClosed);
                    }
                }
                Action::SendSecret(secret) => {
                    if channel.send_line(secret.expose_secret()).is_err() {
                        return Err(FsmFailure::StreamClosed);
                    }
                }
                Action::Fail(kind, message) => {
                    debug!("[{}] failed: {}", self.name, message);
                    return Err(FsmFailure::Action(*kind, message.clone()));
                }
            }

            if let Some(t) = transition.timeout {
                timeout = t;
            }

            match transition.next {
                NextState::State(next) => state = next,
                NextState::Done | NextState::Restart => {
                    debug!("[{}] finished at E={} S={}", self.name, event, state);
                    return Ok(FsmOutcome {
                        event,
                        state,
                        before: banner,
                        matched,
                        restart: matches!(transition.next, NextState::Restart),
                    });
                }
            }
        }

        debug!("[{}] transition ceiling reached", self.name);
        Err(FsmFailure::Looped)
    }

    /// Wait for the next event. Timeout and Eof become events only when the
    /// event list declares them.
    async fn observe(
        &self,
        channel: &mut Channel,
        timeout: Duration,
    ) -> Result<(usize, String, String), FsmFailure> {
        let mut patterns: Vec<&Regex> = Vec::new();
        let mut indexes: Vec<usize> = Vec::new();
        for (i, event) in self.events.iter().enumerate() {
            if let Event::Pattern(re) = event {
                patterns.push(re);
                indexes.push(i);
            }
        }

        match channel.expect(&patterns, timeout).await {
            Expectation::Match {
                index,
                before,
                matched,
            } => Ok((indexes[index], before, matched)),
            Expectation::Timeout => {
                match self.events.iter().position(|e| matches!(e, Event::Timeout)) {
                    Some(i) => Ok((i, String::new(), String::new())),
                    None => Err(FsmFailure::Timeout(timeout)),
                }
            }
            Expectation::Closed => {
                match self.events.iter().position(|e| matches!(e, Event::Eof)) {
                    Some(i) => Ok((i, String::new(), String::new())),
                    None => Err(FsmFailure::StreamClosed),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{ReadEvent, Terminal};
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::collections::VecDeque;
    use std::io;

    /// Terminal that replays chunks and answers known input lines.
    struct Scripted {
        chunks: VecDeque<Bytes>,
        replies: Vec<(String, String)>,
        hold_open: bool,
    }

    impl Scripted {
        fn new(chunks: &[&str], replies: &[(&str, &str)], hold_open: bool) -> Self {
            Self {
                chunks: chunks.iter().map(|c| Bytes::from(c.to_string())).collect(),
                replies: replies
                    .iter()
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .collect(),
                hold_open,
            }
        }
    }

    #[async_trait]
    impl Terminal for Scripted {
        async fn read_chunk(&mut self, _timeout: Duration) -> ReadEvent {
            match self.chunks.pop_front() {
                Some(data) => ReadEvent::Data(data),
                None if self.hold_open => ReadEvent::Idle,
                None => ReadEvent::Closed,
            }
        }

        fn write(&mut self, data: &[u8]) -> io::Result<()> {
            let text = String::from_utf8_lossy(data).trim_end().to_string();
            if let Some(pos) = self.replies.iter().position(|(k, _)| *k == text) {
                let (_, reply) = self.replies.remove(pos);
                self.chunks.push_back(Bytes::from(reply));
            }
            Ok(())
        }

        fn is_alive(&mut self) -> bool {
            true
        }

        fn close(&mut self) {}
    }

    fn channel(chunks: &[&str], replies: &[(&str, &str)], hold_open: bool) -> Channel {
        Channel::new(Box::new(Scripted::new(chunks, replies, hold_open)))
    }

    #[tokio::test]
    async fn test_first_listed_rule_fires() {
        // Both events match the same buffered text; the specific one is
        // listed first and must win.
        let events = vec![Event::pattern(r"[Pp]assword:"), Event::pattern(r":")];
        let transitions = vec![
            Transition::new(0, &[0], NextState::Done, Action::Noop),
            Transition::new(
                1,
                &[0],
                NextState::Done,
                Action::Fail(FailKind::Connection, "generic fired".to_string()),
            ),
        ];
        let mut ch = channel(&["Password:"], &[], true);
        let outcome = Fsm::new("TEST", events, transitions, Duration::from_secs(1))
            .run(&mut ch)
            .await
            .unwrap();
        assert_eq!(outcome.event, 0);
    }

    #[tokio::test]
    async fn test_timeout_tolerated_once_then_escalates() {
        // First timeout sends a newline to re-prompt, second one fails.
        let events = vec![Event::pattern(r"router#"), Event::Timeout];
        let transitions = vec![
            Transition::new(0, &[0, 1], NextState::Done, Action::Noop),
            Transition::new(1, &[0], NextState::State(1), Action::SendLine(String::new())),
            Transition::new(
                1,
                &[1],
                NextState::Done,
                Action::Fail(FailKind::Timeout, "no prompt".to_string()),
            ),
        ];
        // The empty-line reply produces the prompt: tolerated retry works.
        let mut ch = channel(&[], &[("", "router#")], true);
        let outcome = Fsm::new("TEST", events, transitions, Duration::from_millis(50))
            .run(&mut ch)
            .await
            .unwrap();
        assert_eq!(outcome.event, 0);
    }

    #[tokio::test]
    async fn test_timeout_escalation_without_reply() {
        let events = vec![Event::pattern(r"router#"), Event::Timeout];
        let transitions = vec![
            Transition::new(1, &[0], NextState::State(1), Action::SendLine(String::new())),
            Transition::new(
                1,
                &[1],
                NextState::Done,
                Action::Fail(FailKind::Timeout, "no prompt".to_string()),
            ),
        ];
        let mut ch = channel(&[], &[], true);
        let failure = Fsm::new("TEST", events, transitions, Duration::from_millis(20))
            .run(&mut ch)
            .await
            .unwrap_err();
        assert!(matches!(failure, FsmFailure::Action(FailKind::Timeout, _)));
    }

    #[tokio::test]
    async fn test_stream_close_without_eof_rule() {
        let events = vec![Event::pattern(r"router#")];
        let transitions = vec![Transition::new(0, &[0], NextState::Done, Action::Noop)];
        let mut ch = channel(&["goodbye\n"], &[], false);
        let failure = Fsm::new("TEST", events, transitions, Duration::from_secs(1))
            .run(&mut ch)
            .await
            .unwrap_err();
        assert!(matches!(failure, FsmFailure::StreamClosed));
    }

    #[tokio::test]
    async fn test_init_event_fires_without_reading() {
        // Simulates the hand-off from a connect rule set that already
        // consumed the password prompt.
        let events = vec![Event::pattern(r"[Pp]assword:"), Event::pattern(r"router#")];
        let transitions = vec![
            Transition::new(
                0,
                &[0],
                NextState::State(1),
                Action::SendLine("secret".to_string()),
            ),
            Transition::new(1, &[1], NextState::Done, Action::Noop),
        ];
        let mut ch = channel(&[], &[("secret", "\nrouter#")], true);
        let outcome = Fsm::new("TEST", events, transitions, Duration::from_secs(1))
            .with_init_event(0)
            .run(&mut ch)
            .await
            .unwrap();
        assert_eq!(outcome.event, 1);
    }

    #[tokio::test]
    async fn test_transition_ceiling() {
        // A rule that matches forever without consuming progress.
        let events = vec![Event::pattern(r"x")];
        let transitions = vec![Transition::new(
            0,
            &[0],
            NextState::State(0),
            Action::Noop,
        )];
        let chunks: Vec<&str> = vec!["x"; 64];
        let mut ch = channel(&chunks, &[], true);
        let failure = Fsm::new("TEST", events, transitions, Duration::from_secs(1))
            .run(&mut ch)
            .await
            .unwrap_err();
        assert!(matches!(failure, FsmFailure::Looped));
    }
}
