//! Terminal seam and the PTY-backed implementation.
//!
//! A [`Terminal`] is one spawned interactive process (a local `ssh` or
//! `telnet` client) seen as a byte stream. The trait exists so the engine
//! and the façade can be driven by scripted terminals in tests; production
//! code always goes through [`PtySpawner`].

use std::io::{self, Read, Write};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use log::{debug, warn};
use portable_pty::{native_pty_system, Child, CommandBuilder, MasterPty, PtySize};
use tokio::sync::mpsc;

/// Terminal rows; matches a typical console line discipline.
const PTY_ROWS: u16 = 24;
/// Terminal columns; wide enough that device output does not wrap.
const PTY_COLS: u16 = 160;

/// Outcome of one bounded read from a terminal.
#[derive(Debug)]
pub enum ReadEvent {
    /// New output arrived.
    Data(Bytes),
    /// Nothing arrived within the timeout.
    Idle,
    /// The stream ended: process exited or the remote side reset.
    Closed,
}

/// One spawned interactive session as a byte stream.
#[async_trait]
pub trait Terminal: Send {
    /// Pull the next chunk of output, waiting at most `timeout`.
    async fn read_chunk(&mut self, timeout: Duration) -> ReadEvent;

    /// Write raw bytes to the session. Never waits for acknowledgement.
    fn write(&mut self, data: &[u8]) -> io::Result<()>;

    /// Whether the underlying process is still running.
    fn is_alive(&mut self) -> bool;

    /// Terminate the session. Idempotent.
    fn close(&mut self);
}

/// Creates terminals from spawn command lines. The façade takes a factory
/// at construction so tests can inject scripted terminals.
pub trait TerminalFactory: Send + Sync {
    fn spawn(&self, command: &str) -> io::Result<Box<dyn Terminal>>;
}

/// Production factory: spawns the command on a local pseudo-terminal.
#[derive(Debug, Default)]
pub struct PtySpawner;

impl TerminalFactory for PtySpawner {
    fn spawn(&self, command: &str) -> io::Result<Box<dyn Terminal>> {
        Ok(Box::new(PtyTerminal::spawn(command)?))
    }
}

/// Terminal backed by a portable-pty child process.
pub struct PtyTerminal {
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send>,
    writer: Box<dyn Write + Send>,
    output: mpsc::Receiver<Bytes>,
    closed: bool,
}

impl PtyTerminal {
    /// Spawn `command` on a fresh PTY. The command line is split on
    /// whitespace; hop spawn commands never carry quoted arguments.
    pub fn spawn(command: &str) -> io::Result<Self> {
        let pty = native_pty_system()
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(|e| io::Error::other(e.to_string()))?;

        let mut parts = command.split_whitespace();
        let program = parts
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty spawn command"))?;
        let mut cmd = CommandBuilder::new(program);
        for arg in parts {
            cmd.arg(arg);
        }
        // Plain terminal type keeps color control sequences out of the stream.
        cmd.env("TERM", "vt100");

        debug!("spawning session: '{}'", command);
        let child = pty
            .slave
            .spawn_command(cmd)
            .map_err(|e| io::Error::other(e.to_string()))?;
        drop(pty.slave);

        let mut reader = pty
            .master
            .try_clone_reader()
            .map_err(|e| io::Error::other(e.to_string()))?;
        let writer = pty
            .master
            .take_writer()
            .map_err(|e| io::Error::other(e.to_string()))?;

        // Reads block; a dedicated thread pumps output into a channel so
        // the async side can wait with a timeout.
        let (tx, output) = mpsc::channel::<Bytes>(64);
        std::thread::spawn(move || {
            let mut buf = [0u8; 4096];
            loop {
                match reader.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => {
                        if tx.blocking_send(Bytes::copy_from_slice(&buf[..n])).is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        debug!("pty reader finished: {}", e);
                        break;
                    }
                }
            }
        });

        Ok(Self {
            _master: pty.master,
            child,
            writer,
            output,
            closed: false,
        })
    }
}

#[async_trait]
impl Terminal for PtyTerminal {
    async fn read_chunk(&mut self, timeout: Duration) -> ReadEvent {
        if self.closed {
            return ReadEvent::Closed;
        }
        match tokio::time::timeout(timeout, self.output.recv()).await {
            Ok(Some(data)) => ReadEvent::Data(data),
            Ok(None) => ReadEvent::Closed,
            Err(_) => ReadEvent::Idle,
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        if self.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "session closed"));
        }
        self.writer.write_all(data)?;
        self.writer.flush()
    }

    fn is_alive(&mut self) -> bool {
        if self.closed {
            return false;
        }
        match self.child.try_wait() {
            Ok(None) => true,
            Ok(Some(_)) => false,
            Err(e) => {
                warn!("child status check failed: {}", e);
                false
            }
        }
    }

    fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Err(e) = self.child.kill() {
            debug!("child kill: {}", e);
        }
        let _ = self.child.wait();
    }
}

impl Drop for PtyTerminal {
    fn drop(&mut self) {
        self.close();
    }
}
