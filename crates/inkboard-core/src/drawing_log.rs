//! The drawing log: authoritative, totally ordered board history.
//!
//! Entries are keyed by a [`Stamp`], a `(logical_clock, participant)` pair.
//! Local entries take `lamport + 1` as their clock; remote entries are
//! validated and inserted at their sorted position. Because the order is a
//! pure function of the stamps, every replica that holds the same set of
//! entries holds them in the same order, no matter how they arrived.
//!
//! ```text
//! (1,alice) stroke   (1,bob) stroke   (2,bob) clear   (3,alice) stroke
//!                                     ^ replay_from(0) starts here
//! ```

use std::collections::BTreeMap;
use std::fmt;

use crate::error::{BoardError, BoardResult};
use crate::stroke::{ParticipantId, Stroke};

/// Position of an entry in the log.
pub type LogPosition = usize;

/// Highest logical clock seen per participant.
pub type ClockVector = BTreeMap<ParticipantId, u64>;

/// Total-order key of a log entry: clock first, participant id as tie-break.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Stamp {
    pub clock: u64,
    pub participant: ParticipantId,
}

impl Stamp {
    pub fn new(clock: u64, participant: ParticipantId) -> Self {
        Self { clock, participant }
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.clock, self.participant)
    }
}

/// Suppresses every entry ordered before it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClearEvent {
    pub origin: ParticipantId,
    /// Wall-clock creation time, if the author sent one. Informational only,
    /// never used for ordering.
    pub timestamp_ms: Option<u64>,
}

/// Payload of a log entry.
#[derive(Debug, Clone, PartialEq)]
pub enum BoardEvent {
    Stroke(Stroke),
    Clear(ClearEvent),
}

impl BoardEvent {
    /// Participant that authored the event.
    pub fn author(&self) -> &ParticipantId {
        match self {
            BoardEvent::Stroke(stroke) => &stroke.id().participant,
            BoardEvent::Clear(clear) => &clear.origin,
        }
    }
}

/// A stamped event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub stamp: Stamp,
    pub event: BoardEvent,
}

impl LogEntry {
    pub fn new(stamp: Stamp, event: BoardEvent) -> Self {
        Self { stamp, event }
    }

    pub fn is_clear(&self) -> bool {
        matches!(self.event, BoardEvent::Clear(_))
    }

    fn validate(&self) -> BoardResult<()> {
        if self.stamp.clock == 0 {
            return Err(BoardError::Malformed(format!("entry {} has clock 0", self.stamp)));
        }
        if self.event.author() != &self.stamp.participant {
            return Err(BoardError::Malformed(format!(
                "entry {} authored by {}",
                self.stamp,
                self.event.author()
            )));
        }
        Ok(())
    }
}

/// Outcome of an append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Appended {
    /// Inserted at `position`; `at_tail` when nothing was ordered after it.
    Inserted { position: LogPosition, at_tail: bool },
    /// An identical entry was already present at `position`.
    Duplicate { position: LogPosition },
    /// The entry predates compacted history and was dropped.
    Obsolete,
}

impl Appended {
    pub fn is_inserted(&self) -> bool {
        matches!(self, Appended::Inserted { .. })
    }
}

/// Append-only ordered history of strokes and clears.
#[derive(Debug, Clone)]
pub struct DrawingLog {
    participant: ParticipantId,
    entries: Vec<LogEntry>,
    lamport: u64,
    clocks: ClockVector,
    /// Stamp of the first retained entry after compaction.
    floor: Option<Stamp>,
}

impl DrawingLog {
    /// Create an empty log owned by `participant`.
    pub fn new(participant: ParticipantId) -> Self {
        Self {
            participant,
            entries: Vec::new(),
            lamport: 0,
            clocks: ClockVector::new(),
            floor: None,
        }
    }

    pub fn participant(&self) -> &ParticipantId {
        &self.participant
    }

    /// Change the local participant id. Fails once the old id authored entries.
    pub fn set_participant(&mut self, participant: ParticipantId) -> BoardResult<()> {
        if participant != self.participant && self.current_clock_for(&self.participant) > 0 {
            return Err(BoardError::InvalidState(format!(
                "{} already authored entries",
                self.participant
            )));
        }
        self.participant = participant;
        Ok(())
    }

    /// Append a locally created event at the tail.
    pub fn append_local(&mut self, event: BoardEvent) -> BoardResult<Appended> {
        if event.author() != &self.participant {
            return Err(BoardError::InvalidState(format!(
                "local append of an event authored by {}",
                event.author()
            )));
        }
        let stamp = Stamp::new(self.lamport + 1, self.participant.clone());
        self.observe(&stamp);
        self.entries.push(LogEntry::new(stamp, event));
        Ok(Appended::Inserted {
            position: self.entries.len() - 1,
            at_tail: true,
        })
    }

    /// Insert an entry received from another replica at its ordered position.
    ///
    /// Identical re-deliveries are reported as [`Appended::Duplicate`]. An
    /// entry that does not advance its author's clock is rejected with
    /// [`BoardError::OrderingConflict`] and leaves the log untouched.
    pub fn append_remote(&mut self, entry: LogEntry) -> BoardResult<Appended> {
        self.insert_remote(entry, true)
    }

    /// Insert an entry from the relay's history, filling a gap below its
    /// author's highest clock if needed.
    ///
    /// Only a different entry under an already used stamp is an
    /// [`BoardError::OrderingConflict`]. Live delivery can overtake a resync
    /// reply, so history entries may legitimately arrive behind newer ones.
    pub fn backfill(&mut self, entry: LogEntry) -> BoardResult<Appended> {
        self.insert_remote(entry, false)
    }

    fn insert_remote(&mut self, entry: LogEntry, in_order: bool) -> BoardResult<Appended> {
        entry.validate()?;
        if self.floor.as_ref().is_some_and(|floor| entry.stamp < *floor) {
            return Ok(Appended::Obsolete);
        }
        match self.entries.binary_search_by(|probe| probe.stamp.cmp(&entry.stamp)) {
            Ok(position) if self.entries[position] == entry => Ok(Appended::Duplicate { position }),
            Ok(_) => Err(BoardError::OrderingConflict {
                current: self.current_clock_for(&entry.stamp.participant),
                stamp: entry.stamp,
            }),
            Err(position) => {
                let current = self.current_clock_for(&entry.stamp.participant);
                if in_order && entry.stamp.clock <= current {
                    return Err(BoardError::OrderingConflict {
                        stamp: entry.stamp,
                        current,
                    });
                }
                self.observe(&entry.stamp);
                let at_tail = position == self.entries.len();
                self.entries.insert(position, entry);
                Ok(Appended::Inserted { position, at_tail })
            }
        }
    }

    fn observe(&mut self, stamp: &Stamp) {
        self.lamport = self.lamport.max(stamp.clock);
        let clock = self.clocks.entry(stamp.participant.clone()).or_insert(0);
        *clock = (*clock).max(stamp.clock);
    }

    /// Entries to render from `position` to the end, starting at the latest
    /// clear within that range.
    pub fn replay_from(&self, position: LogPosition) -> Replay<'_> {
        let start = position.min(self.entries.len());
        let start = self.entries[start..]
            .iter()
            .rposition(LogEntry::is_clear)
            .map_or(start, |offset| start + offset);
        Replay {
            start,
            iter: self.entries[start..].iter(),
        }
    }

    /// Highest clock seen from `participant`, 0 if none.
    pub fn current_clock_for(&self, participant: &ParticipantId) -> u64 {
        self.clocks.get(participant).copied().unwrap_or(0)
    }

    pub fn clocks(&self) -> &ClockVector {
        &self.clocks
    }

    /// Current Lamport clock (highest clock seen from anyone).
    pub fn lamport(&self) -> u64 {
        self.lamport
    }

    /// Entries not covered by `since`, in log order.
    pub fn events_since(&self, since: &ClockVector) -> Vec<LogEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.stamp.clock > since.get(&entry.stamp.participant).copied().unwrap_or(0))
            .cloned()
            .collect()
    }

    /// Drop entries before the latest clear every known participant has
    /// acknowledged. `acknowledged` maps participants to the clock through
    /// which they have received the full history. Returns the number of
    /// entries dropped.
    pub fn compact(&mut self, acknowledged: &ClockVector) -> usize {
        let floor_clock = self
            .clocks
            .keys()
            .chain(acknowledged.keys())
            .map(|participant| acknowledged.get(participant).copied().unwrap_or(0))
            .min();
        let Some(floor_clock) = floor_clock else {
            return 0;
        };
        let Some(cut) = self
            .entries
            .iter()
            .rposition(|entry| entry.is_clear() && entry.stamp.clock <= floor_clock)
        else {
            return 0;
        };
        if cut == 0 {
            return 0;
        }
        self.entries.drain(..cut);
        self.floor = Some(self.entries[0].stamp.clone());
        log::debug!("Compacted {} entries before clear {}", cut, self.entries[0].stamp);
        cut
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn get(&self, position: LogPosition) -> Option<&LogEntry> {
        self.entries.get(position)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Lazy, restartable replay over a suffix of the log. Clone it to replay again.
#[derive(Debug, Clone)]
pub struct Replay<'a> {
    start: LogPosition,
    iter: std::slice::Iter<'a, LogEntry>,
}

impl<'a> Replay<'a> {
    /// Log position of the first entry yielded.
    pub fn start(&self) -> LogPosition {
        self.start
    }
}

impl<'a> Iterator for Replay<'a> {
    type Item = &'a LogEntry;

    fn next(&mut self) -> Option<Self::Item> {
        self.iter.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.iter.size_hint()
    }
}

impl ExactSizeIterator for Replay<'_> {}
