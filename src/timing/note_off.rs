use crate::error::Result;
use crate::midi::{MidiMessage, SharedSink};
use crossbeam::channel::{unbounded, RecvTimeoutError, Sender};
use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

enum TimerCommand {
    Schedule { due: Instant, message: MidiMessage },
    /// Send everything pending right now and exit.
    Flush,
    /// Exit once everything pending has fired on time.
    Drain,
}

struct Pending {
    due: Instant,
    seq: u64,
    message: MidiMessage,
}

impl PartialEq for Pending {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Pending {}

impl PartialOrd for Pending {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Pending {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.due, self.seq).cmp(&(other.due, other.seq))
    }
}

/// Deferred note-offs for one playback session.
///
/// A single timer thread owns every pending note-off, so scheduling never
/// blocks the caller and the whole set can be flushed at once on cancel.
pub struct NoteOffTimers {
    tx: Sender<TimerCommand>,
    thread: Option<JoinHandle<()>>,
}

impl NoteOffTimers {
    pub fn spawn(sink: SharedSink) -> Result<Self> {
        let (tx, rx) = unbounded::<TimerCommand>();
        let thread = thread::Builder::new()
            .name("note-off-timers".into())
            .spawn(move || {
                let mut pending: BinaryHeap<Reverse<Pending>> = BinaryHeap::new();
                let mut seq = 0u64;
                let mut draining = false;
                let mut disconnected = false;

                loop {
                    fire_due(&sink, &mut pending, Instant::now());

                    let next_due = pending.peek().map(|Reverse(p)| p.due);
                    if disconnected || draining {
                        match next_due {
                            None => break,
                            Some(due) if disconnected => {
                                thread::sleep(due.saturating_duration_since(Instant::now()));
                                continue;
                            }
                            Some(_) => {}
                        }
                    }

                    let command = match next_due {
                        Some(due) => rx.recv_deadline(due),
                        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
                    };

                    match command {
                        Ok(TimerCommand::Schedule { due, message }) => {
                            seq += 1;
                            pending.push(Reverse(Pending { due, seq, message }));
                        }
                        Ok(TimerCommand::Flush) => {
                            debug!("Flushing {} pending note-offs", pending.len());
                            while let Some(Reverse(p)) = pending.pop() {
                                send(&sink, &p.message);
                            }
                            break;
                        }
                        Ok(TimerCommand::Drain) => draining = true,
                        Err(RecvTimeoutError::Timeout) => {}
                        Err(RecvTimeoutError::Disconnected) => disconnected = true,
                    }
                }
            })?;

        Ok(NoteOffTimers {
            tx,
            thread: Some(thread),
        })
    }

    /// Queues `message` to go out after `delay`.
    pub fn schedule(&self, delay: Duration, message: MidiMessage) {
        let due = Instant::now() + delay;
        if self.tx.send(TimerCommand::Schedule { due, message }).is_err() {
            warn!("Note-off timer thread is gone; note-off dropped");
        }
    }

    /// Sends every pending note-off immediately. Nothing is left hanging.
    pub fn cancel(mut self) {
        self.shutdown(TimerCommand::Flush);
    }

    /// Waits for every pending note-off to fire at its due time.
    pub fn finish(mut self) {
        self.shutdown(TimerCommand::Drain);
    }

    fn shutdown(&mut self, command: TimerCommand) {
        if let Some(thread) = self.thread.take() {
            let _ = self.tx.send(command);
            if thread.join().is_err() {
                warn!("Note-off timer thread panicked");
            }
        }
    }
}

impl Drop for NoteOffTimers {
    fn drop(&mut self) {
        self.shutdown(TimerCommand::Flush);
    }
}

fn fire_due(sink: &SharedSink, pending: &mut BinaryHeap<Reverse<Pending>>, now: Instant) {
    while pending.peek().is_some_and(|Reverse(p)| p.due <= now) {
        if let Some(Reverse(p)) = pending.pop() {
            send(sink, &p.message);
        }
    }
}

fn send(sink: &SharedSink, message: &MidiMessage) {
    if let Err(e) = sink.send(message) {
        warn!("Failed to send deferred {}: {}", message, e);
    }
}
