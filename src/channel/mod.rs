//! Session channel layer: PTY-backed terminals and buffered pattern
//! matching. One channel carries the whole hop chain; hops beyond the
//! first ride the same stream.

mod buffer;
mod expect;
mod terminal;

pub use buffer::PatternBuffer;
pub use expect::{Channel, Expectation};
pub use terminal::{PtySpawner, PtyTerminal, ReadEvent, Terminal, TerminalFactory};
