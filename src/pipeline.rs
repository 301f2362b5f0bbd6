//! Parallel per-line processing with order-preserving output.
//!
//! # Architecture
//!
//! ```text
//!  reader ──> SafeQueue<(seq, line)> ──> worker × N ──> CompletionQueue
//!                                         (scratch)          │ drain in seq order
//!                                                            ▼
//!                                                    bounded channel ──> writer
//! ```
//!
//! One producer assigns every input line a monotonically increasing sequence
//! number. Workers pull from a shared FIFO, process independently, and
//! publish under their sequence number. The completion queue forwards
//! results to the output channel strictly in input order, no matter how
//! worker completions interleave.
//!
//! # Termination
//!
//! The producer signals the total line count after EOF; the consumer exits
//! once that count has been emitted. Workers exit when the input queue is
//! closed and drained. A per-line failure occupies that line's output slot
//! (`Line <n>: <error>`) and never halts the pipeline.

use std::collections::VecDeque;
use std::io::{self, BufRead, Write};
use std::sync::{Condvar, Mutex};
use std::thread;

use ahash::AHashMap;
use crossbeam_channel as chan;
use tracing::warn;

/// Default size of the worker pool.
pub const DEFAULT_WORKERS: usize = 32;

/// Capacity of the ordered output channel; workers block when the consumer
/// falls this far behind.
const COMPLETION_CHANNEL_CAP: usize = 1024;

/// The processing seam between the pipeline and the match engine.
///
/// The processor is shared immutably across workers; each worker owns one
/// scratch for its whole lifetime. Mock processors drive the pipeline tests.
pub trait LineProcessor: Sync {
    type Scratch;

    /// Allocates one worker's scratch state.
    fn alloc_scratch(&self) -> Result<Self::Scratch, String>;

    /// Processes a single input line into its output bytes.
    fn process_line(&self, line: &[u8], scratch: &mut Self::Scratch) -> Result<Vec<u8>, String>;
}

/// Unbounded FIFO queue with blocking pop (mutex + condvar).
pub struct SafeQueue<T> {
    inner: Mutex<SafeQueueInner<T>>,
    cond: Condvar,
}

struct SafeQueueInner<T> {
    items: VecDeque<T>,
    closed: bool,
}

impl<T> Default for SafeQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> SafeQueue<T> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SafeQueueInner {
                items: VecDeque::new(),
                closed: false,
            }),
            cond: Condvar::new(),
        }
    }

    /// Appends an item and wakes one waiting consumer.
    pub fn push(&self, item: T) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.items.push_back(item);
        self.cond.notify_one();
    }

    /// Marks the queue closed; blocked and future `pop`s drain the backlog
    /// and then return `None`.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.closed = true;
        self.cond.notify_all();
    }

    /// Blocks until an item is available or the queue is closed and empty.
    pub fn pop(&self) -> Option<T> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(item) = inner.items.pop_front() {
                return Some(item);
            }
            if inner.closed {
                return None;
            }
            inner = self.cond.wait(inner).unwrap_or_else(|e| e.into_inner());
        }
    }
}

/// Order-preserving completion queue.
///
/// `push(seq, value)` may arrive in any order; values are forwarded to the
/// output channel strictly by ascending sequence number. Sequence numbers
/// must be dense (every `seq` in `0..n` pushed exactly once) or the drain
/// stalls at the first gap.
pub struct CompletionQueue<T> {
    state: Mutex<CompletionState<T>>,
    sender: chan::Sender<T>,
}

struct CompletionState<T> {
    next_seq: u64,
    pending: AHashMap<u64, T>,
}

impl<T> CompletionQueue<T> {
    /// Creates the queue together with its ordered output channel.
    pub fn new(capacity: usize) -> (Self, chan::Receiver<T>) {
        let (sender, receiver) = chan::bounded(capacity);
        (
            Self {
                state: Mutex::new(CompletionState {
                    next_seq: 0,
                    pending: AHashMap::new(),
                }),
                sender,
            },
            receiver,
        )
    }

    /// Publishes the result for `seq`, forwarding any newly contiguous run.
    ///
    /// The forward loop runs under the lock, so concurrent pushers serialize
    /// on the in-order hand-off; a full output channel applies backpressure
    /// to workers.
    pub fn push(&self, seq: u64, value: T) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.pending.insert(seq, value);
        loop {
            let next = state.next_seq;
            let Some(value) = state.pending.remove(&next) else {
                break;
            };
            state.next_seq += 1;
            if self.sender.send(value).is_err() {
                // Receiver gone; drop the backlog silently.
                state.pending.clear();
                return;
            }
        }
    }
}

/// Runs `input` through `workers` parallel processors into `output`.
///
/// Emits exactly one output line per input line, in input order. Returns the
/// number of lines emitted. I/O failures on `output` are returned after the
/// pipeline has drained; failures on `input` end the stream early.
pub fn run<P, R, W>(
    processor: &P,
    input: R,
    output: &mut W,
    workers: usize,
) -> io::Result<u64>
where
    P: LineProcessor,
    R: BufRead + Send,
    W: Write,
{
    let input_queue: SafeQueue<(u64, Vec<u8>)> = SafeQueue::new();
    let (completions, ordered) = CompletionQueue::new(COMPLETION_CHANNEL_CAP);
    let (eof_tx, eof_rx) = chan::bounded::<u64>(1);

    thread::scope(|scope| {
        let input_queue = &input_queue;
        let completions = &completions;

        for _ in 0..workers {
            scope.spawn(move || {
                let mut scratch = match processor.alloc_scratch() {
                    Ok(scratch) => scratch,
                    Err(err) => {
                        // Without scratch this worker can only fail its
                        // lines; other workers may still succeed.
                        warn!("scratch allocation failed: {err}");
                        while let Some((seq, _)) = input_queue.pop() {
                            completions.push(seq, format!("Line {seq}: {err}").into_bytes());
                        }
                        return;
                    }
                };
                while let Some((seq, line)) = input_queue.pop() {
                    let out = match processor.process_line(&line, &mut scratch) {
                        Ok(out) => out,
                        Err(err) => format!("Line {seq}: {err}").into_bytes(),
                    };
                    completions.push(seq, out);
                }
            });
        }

        scope.spawn(move || {
            let produced = read_lines(input, |seq, line| input_queue.push((seq, line)));
            let _ = eof_tx.send(produced);
        });

        let mut emitted = 0u64;
        let mut produced: Option<u64> = None;
        let mut write_err: Option<io::Error> = None;
        // Swapped for a never-ready channel once the EOF signal is consumed,
        // so the closed channel does not spin the select loop.
        let mut eof_rx = eof_rx;

        while produced != Some(emitted) {
            chan::select! {
                recv(ordered) -> msg => {
                    let Ok(line) = msg else { break };
                    if write_err.is_none() {
                        let result = output
                            .write_all(&line)
                            .and_then(|()| output.write_all(b"\n"));
                        if let Err(err) = result {
                            write_err = Some(err);
                        }
                    }
                    emitted += 1;
                }
                recv(eof_rx) -> msg => {
                    if let Ok(count) = msg {
                        produced = Some(count);
                    }
                    eof_rx = chan::never();
                }
            }
        }

        input_queue.close();
        match write_err {
            Some(err) => Err(err),
            None => Ok(emitted),
        }
    })
}

/// Feeds `input` line by line to `sink`, returning the number of lines.
///
/// Line terminators (`\n`, and a preceding `\r` if present) are stripped. A
/// read error truncates the stream at the lines read so far.
fn read_lines<R: BufRead>(mut input: R, mut sink: impl FnMut(u64, Vec<u8>)) -> u64 {
    let mut seq = 0u64;
    loop {
        let mut line = Vec::new();
        match input.read_until(b'\n', &mut line) {
            Ok(0) => break,
            Ok(_) => {
                if line.last() == Some(&b'\n') {
                    line.pop();
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                }
                sink(seq, line);
                seq += 1;
            }
            Err(err) => {
                warn!("input read failed after {seq} line(s): {err}");
                break;
            }
        }
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    /// Processor that uppercases lines, stalling on a marker to scramble
    /// completion order.
    struct Uppercase;

    impl LineProcessor for Uppercase {
        type Scratch = ();

        fn alloc_scratch(&self) -> Result<(), String> {
            Ok(())
        }

        fn process_line(&self, line: &[u8], _scratch: &mut ()) -> Result<Vec<u8>, String> {
            if line.starts_with(b"slow") {
                thread::sleep(Duration::from_millis(5));
            }
            Ok(line.to_ascii_uppercase())
        }
    }

    struct FailOdd;

    impl LineProcessor for FailOdd {
        type Scratch = ();

        fn alloc_scratch(&self) -> Result<(), String> {
            Ok(())
        }

        fn process_line(&self, line: &[u8], _scratch: &mut ()) -> Result<Vec<u8>, String> {
            let n: u64 = std::str::from_utf8(line)
                .unwrap_or("0")
                .trim()
                .parse()
                .unwrap_or(0);
            if n % 2 == 1 {
                Err("odd line".to_string())
            } else {
                Ok(line.to_vec())
            }
        }
    }

    fn run_to_string<P: LineProcessor>(processor: &P, input: &str, workers: usize) -> String {
        let mut out = Vec::new();
        run(processor, Cursor::new(input.to_string()), &mut out, workers).unwrap();
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn safe_queue_fifo_and_close() {
        let q: SafeQueue<u32> = SafeQueue::new();
        q.push(1);
        q.push(2);
        q.close();
        assert_eq!(q.pop(), Some(1));
        assert_eq!(q.pop(), Some(2));
        assert_eq!(q.pop(), None);
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn safe_queue_close_wakes_blocked_pop() {
        let q: SafeQueue<u32> = SafeQueue::new();
        thread::scope(|scope| {
            let handle = scope.spawn(|| q.pop());
            thread::sleep(Duration::from_millis(10));
            q.close();
            assert_eq!(handle.join().unwrap(), None);
        });
    }

    #[test]
    fn completion_queue_reorders_adversarial_pushes() {
        let (queue, receiver) = CompletionQueue::new(16);
        // Push every sequence except 0, then 0 last.
        for seq in (1..10u64).rev() {
            queue.push(seq, seq);
        }
        assert!(receiver.try_recv().is_err(), "nothing flows before seq 0");
        queue.push(0, 0);
        let drained: Vec<u64> = (0..10).map(|_| receiver.recv().unwrap()).collect();
        assert_eq!(drained, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn completion_queue_concurrent_pushes_stay_ordered() {
        let (queue, receiver) = CompletionQueue::new(COMPLETION_CHANNEL_CAP);
        let next = AtomicU64::new(0);
        thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| loop {
                    let seq = next.fetch_add(1, Ordering::Relaxed);
                    if seq >= 1000 {
                        break;
                    }
                    queue.push(seq, seq);
                });
            }
        });
        let drained: Vec<u64> = (0..1000).map(|_| receiver.recv().unwrap()).collect();
        assert_eq!(drained, (0..1000).collect::<Vec<_>>());
    }

    #[test]
    fn output_preserves_input_order() {
        // Slow lines sprinkled through force out-of-order completion.
        let mut input = String::new();
        for i in 0..200 {
            if i % 7 == 0 {
                input.push_str(&format!("slow {i}\n"));
            } else {
                input.push_str(&format!("line {i}\n"));
            }
        }
        let out = run_to_string(&Uppercase, &input, 8);
        assert_eq!(out, input.to_ascii_uppercase());
    }

    #[test]
    fn ten_thousand_lines_through_thirty_two_workers() {
        let mut input = String::new();
        for i in 0..10_000 {
            input.push_str(&format!("line number {i}\n"));
        }
        let out = run_to_string(&Uppercase, &input, DEFAULT_WORKERS);
        let expected: String = input.to_ascii_uppercase();
        assert_eq!(out, expected);
    }

    #[test]
    fn per_line_errors_fill_their_slot() {
        let out = run_to_string(&FailOdd, "0\n1\n2\n3\n", 4);
        assert_eq!(out, "0\nLine 1: odd line\n2\nLine 3: odd line\n");
    }

    #[test]
    fn empty_input_emits_nothing() {
        let mut out = Vec::new();
        let emitted = run(&Uppercase, Cursor::new(Vec::new()), &mut out, 4).unwrap();
        assert_eq!(emitted, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn final_line_without_newline_is_processed() {
        let out = run_to_string(&Uppercase, "a\nb", 2);
        assert_eq!(out, "A\nB\n");
    }

    #[test]
    fn crlf_terminators_are_stripped() {
        let out = run_to_string(&Uppercase, "a\r\nb\r\n", 2);
        assert_eq!(out, "A\nB\n");
    }
}
