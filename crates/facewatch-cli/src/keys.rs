//! Operator key input, polled once per loop iteration.

use std::sync::mpsc::{self, Receiver, TryRecvError};

/// Keys the frame loop reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Key {
    Quit,
    Snapshot,
}

impl Key {
    /// `q`/ESC quits, `s` saves a snapshot; anything else is ignored.
    pub fn parse(input: &str) -> Option<Self> {
        match input.trim() {
            "q" | "Q" | "\u{1b}" => Some(Key::Quit),
            "s" | "S" => Some(Key::Snapshot),
            _ => None,
        }
    }
}

/// Non-blocking key source.
pub trait KeySource {
    fn poll(&mut self) -> Option<Key>;
}

/// Keys typed on stdin, one per line, read on a background thread.
///
/// End of input stops polling; the loop then runs until another quit path.
pub struct StdinKeys {
    rx: Receiver<Key>,
    closed: bool,
}

impl StdinKeys {
    pub fn spawn() -> std::io::Result<Self> {
        let (tx, rx) = mpsc::channel();
        std::thread::Builder::new()
            .name("facewatch-keys".into())
            .spawn(move || {
                let mut line = String::new();
                loop {
                    line.clear();
                    match std::io::stdin().read_line(&mut line) {
                        Ok(0) | Err(_) => break,
                        Ok(_) => {
                            if let Some(key) = Key::parse(&line) {
                                if tx.send(key).is_err() {
                                    break;
                                }
                            }
                        }
                    }
                }
            })?;
        Ok(Self { rx, closed: false })
    }
}

impl KeySource for StdinKeys {
    fn poll(&mut self) -> Option<Key> {
        if self.closed {
            return None;
        }
        match self.rx.try_recv() {
            Ok(key) => Some(key),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                // stdin closed (e.g. not a terminal): keep running until killed.
                tracing::debug!("key input closed");
                self.closed = true;
                None
            }
        }
    }
}
