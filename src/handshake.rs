//! Initialisation handshake that populates the shared frequency table
//!
//! A session begins with a count header declaring how many frequencies
//! follow; from `Idle` a bare frequency or content chunk also opens one.
//! Once complete, only a new count header replaces the published table. Frequencies then arrive
//! either one per datagram (`index, frequency`) or packed into content
//! chunks that fill consecutive slots. The session completes when the
//! number received equals the declared count; the count message itself is
//! not included in that total.
//!
//! An explicit done marker (or a content chunk's `0.0` sentinel) ends the
//! session early. It completes only if at most `tolerated_loss` frequencies
//! went missing, otherwise the partial table is discarded. Receiving more
//! frequencies than declared also discards the session.

use crate::protocol::{ContentFrequencies, Message};
use crate::table::TableWriter;
use tracing::{debug, info, warn};

/// Frequencies that may go missing before a done marker aborts a session
pub const DEFAULT_TOLERATED_LOSS: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeState {
    Idle,
    Receiving {
        expected: Option<usize>,
        received: usize,
        chunk_size: Option<u16>,
    },
    Complete {
        count: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// More frequencies arrived than the count header declared
    Overload { expected: usize, received: usize },
    /// The session ended with more than the tolerated number missing
    TooManyMissing { expected: usize, received: usize },
    /// The session ended before any frequency arrived
    Empty,
}

/// What a message did to the handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeOutcome {
    Started,
    /// A new count header arrived mid-session; partial data was dropped
    Restarted { discarded: usize },
    Progress { received: usize },
    Completed { count: usize },
    Aborted(AbortReason),
    Ignored,
}

/// Handshake state machine; owns the table's writer handle
pub struct Handshake {
    writer: TableWriter,
    state: HandshakeState,
    tolerated_loss: usize,
    /// One past the highest index written this session
    extent: usize,
    sessions: u64,
}

impl Handshake {
    pub fn new(writer: TableWriter, tolerated_loss: usize) -> Self {
        Self {
            writer,
            state: HandshakeState::Idle,
            tolerated_loss,
            extent: 0,
            sessions: 0,
        }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// Sessions opened so far, with or without a count header
    pub fn sessions(&self) -> u64 {
        self.sessions
    }

    /// Feed one decoded message. Performance messages are ignored.
    pub fn handle(&mut self, message: Message<'_>) -> HandshakeOutcome {
        match message {
            Message::InitCount {
                expected,
                chunk_size,
            } => self.on_count(expected as usize, chunk_size),
            Message::InitFrequency { index, frequency } => {
                self.on_frequency(index as usize, frequency)
            }
            Message::InitContent(content) => self.on_content(content),
            Message::InitDone => self.on_done(),
            Message::Performance { .. } => HandshakeOutcome::Ignored,
        }
    }

    fn on_count(&mut self, expected: usize, chunk_size: Option<u16>) -> HandshakeOutcome {
        match self.state {
            HandshakeState::Receiving { received: 0, .. } => {
                self.state = HandshakeState::Receiving {
                    expected: Some(expected),
                    received: 0,
                    chunk_size,
                };
                info!(
                    "Initialisation begin: {} frequencies (chunk size {:?})",
                    expected, chunk_size
                );
                HandshakeOutcome::Started
            }
            HandshakeState::Receiving { received, .. } => {
                warn!(
                    "New count header mid-session, restarting (discarding {} frequencies)",
                    received
                );
                self.begin(Some(expected), chunk_size);
                HandshakeOutcome::Restarted {
                    discarded: received,
                }
            }
            HandshakeState::Idle | HandshakeState::Complete { .. } => {
                info!(
                    "Initialisation begin: {} frequencies (chunk size {:?})",
                    expected, chunk_size
                );
                self.begin(Some(expected), chunk_size);
                HandshakeOutcome::Started
            }
        }
    }

    fn on_frequency(&mut self, index: usize, frequency: f32) -> HandshakeOutcome {
        let Some(started) = self.ensure_session() else {
            debug!("Late frequency for index {} after completion, ignoring", index);
            return HandshakeOutcome::Ignored;
        };

        if !self.writer.write(index, frequency) {
            warn!(
                "Frequency index {} outside table capacity {}",
                index,
                self.writer.capacity()
            );
            return if started {
                HandshakeOutcome::Started
            } else {
                HandshakeOutcome::Ignored
            };
        }
        self.extent = self.extent.max(index + 1);
        self.bump_received(1);
        self.check_progress()
    }

    fn on_content(&mut self, content: ContentFrequencies<'_>) -> HandshakeOutcome {
        if self.ensure_session().is_none() {
            debug!("Late content chunk after completion, ignoring");
            return HandshakeOutcome::Ignored;
        }
        let terminated = content.is_terminated();

        let mut written = 0;
        for frequency in content {
            let index = self.received();
            if !self.writer.write(index, frequency) {
                warn!(
                    "Content overflows table capacity {}",
                    self.writer.capacity()
                );
                break;
            }
            self.extent = self.extent.max(index + 1);
            self.bump_received(1);
            written += 1;
        }
        debug!("Content chunk: {} frequencies, total {}", written, self.received());

        if let Some(outcome) = self.check_overload() {
            return outcome;
        }
        if terminated {
            debug!("Content sentinel reached");
            return self.on_done();
        }
        self.check_progress()
    }

    fn on_done(&mut self) -> HandshakeOutcome {
        let HandshakeState::Receiving {
            expected, received, ..
        } = self.state
        else {
            debug!("Done marker outside a session, ignoring");
            return HandshakeOutcome::Ignored;
        };

        if received == 0 {
            return self.abort(AbortReason::Empty);
        }
        match expected {
            None => self.complete(),
            Some(expected) if received + self.tolerated_loss >= expected => self.complete(),
            Some(expected) => self.abort(AbortReason::TooManyMissing { expected, received }),
        }
    }

    fn begin(&mut self, expected: Option<usize>, chunk_size: Option<u16>) {
        self.writer.begin();
        self.extent = 0;
        self.sessions += 1;
        self.state = HandshakeState::Receiving {
            expected,
            received: 0,
            chunk_size,
        };
    }

    /// Start an open-ended session from `Idle`. Returns whether one was
    /// started, or `None` when a published table must not be disturbed.
    fn ensure_session(&mut self) -> Option<bool> {
        match self.state {
            HandshakeState::Receiving { .. } => Some(false),
            HandshakeState::Complete { .. } => None,
            HandshakeState::Idle => {
                info!("Initialisation begin without count header");
                self.begin(None, None);
                Some(true)
            }
        }
    }

    fn received(&self) -> usize {
        match self.state {
            HandshakeState::Receiving { received, .. } => received,
            _ => 0,
        }
    }

    fn bump_received(&mut self, n: usize) {
        if let HandshakeState::Receiving { received, .. } = &mut self.state {
            *received += n;
        }
    }

    fn check_overload(&mut self) -> Option<HandshakeOutcome> {
        match self.state {
            HandshakeState::Receiving {
                expected: Some(expected),
                received,
                ..
            } if received > expected => {
                Some(self.abort(AbortReason::Overload { expected, received }))
            }
            _ => None,
        }
    }

    fn check_progress(&mut self) -> HandshakeOutcome {
        if let Some(outcome) = self.check_overload() {
            return outcome;
        }
        match self.state {
            HandshakeState::Receiving {
                expected: Some(expected),
                received,
                ..
            } if received == expected => self.complete(),
            HandshakeState::Receiving { received, .. } => HandshakeOutcome::Progress { received },
            _ => HandshakeOutcome::Ignored,
        }
    }

    fn complete(&mut self) -> HandshakeOutcome {
        let expected = match self.state {
            HandshakeState::Receiving { expected, .. } => expected.unwrap_or(0),
            _ => 0,
        };
        let count = self.extent.max(expected).min(self.writer.capacity());
        self.writer.publish(count);
        self.state = HandshakeState::Complete { count };
        info!("✅ Initialisation complete: {} frequencies", count);
        HandshakeOutcome::Completed { count }
    }

    fn abort(&mut self, reason: AbortReason) -> HandshakeOutcome {
        self.writer.discard();
        self.state = HandshakeState::Idle;
        self.extent = 0;
        warn!("Initialisation aborted: {:?}", reason);
        HandshakeOutcome::Aborted(reason)
    }
}
