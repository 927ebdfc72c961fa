//! Incremental splitter for generated reply streams.
//!
//! A generated stream is spoken text followed by a sentinel-delimited
//! structured payload. The splitter forwards every byte before the open
//! sentinel to the speech sink as soon as it arrives, buffers the
//! payload, and never depends on where the producer happened to cut its
//! fragments: a sentinel split across fragments is matched greedily
//! against the longest seen prefix before being declared absent.
//!
//! The splitter is a pure consumer of an ordered fragment sequence and
//! two sentinel strings; it holds no cross-turn state and touches no
//! I/O.

use super::decision::DecisionFrame;

/// Default open sentinel.
pub const OPEN_SENTINEL: &str = "<frame>";

/// Default close sentinel.
pub const CLOSE_SENTINEL: &str = "</frame>";

/// Incremental matcher for one sentinel, fed a byte at a time.
///
/// Bytes consumed into a partial match are withheld; on a mismatch the
/// withheld bytes that can no longer start a match are released to the
/// overflow buffer (KMP failure links keep any still-viable suffix).
#[derive(Debug, Clone)]
struct SentinelMatcher {
    pattern: Vec<u8>,
    failure: Vec<usize>,
    matched: usize,
}

impl SentinelMatcher {
    fn new(pattern: &str) -> Self {
        let pattern = pattern.as_bytes().to_vec();
        let failure = kmp_failure(&pattern);
        Self {
            pattern,
            failure,
            matched: 0,
        }
    }

    /// Feeds one byte. Returns true when the full sentinel completed.
    /// Bytes proven not to belong to a match are pushed to `overflow`.
    fn feed(&mut self, byte: u8, overflow: &mut Vec<u8>) -> bool {
        loop {
            if byte == self.pattern[self.matched] {
                self.matched += 1;
                if self.matched == self.pattern.len() {
                    self.matched = 0;
                    return true;
                }
                return false;
            }
            if self.matched == 0 {
                overflow.push(byte);
                return false;
            }
            let fallback = self.failure[self.matched - 1];
            overflow.extend_from_slice(&self.pattern[..self.matched - fallback]);
            self.matched = fallback;
        }
    }
}

fn kmp_failure(pattern: &[u8]) -> Vec<usize> {
    let mut failure = vec![0; pattern.len()];
    let mut k = 0;
    for i in 1..pattern.len() {
        while k > 0 && pattern[i] != pattern[k] {
            k = failure[k - 1];
        }
        if pattern[i] == pattern[k] {
            k += 1;
        }
        failure[i] = k;
    }
    failure
}

/// Where the scanner currently is in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Before the open sentinel: bytes flow to the speech sink.
    Speaking,
    /// Between the sentinels: bytes buffer into the payload.
    Buffering,
    /// After the close sentinel: trailing bytes flow to the sink.
    Trailing,
}

/// Result of a completed stream split.
#[derive(Debug, Clone, PartialEq)]
pub struct SplitOutcome {
    /// All text forwarded to the speech sink, concatenated.
    pub spoken: String,
    /// The parsed payload; `None` when no sentinel pair appeared.
    pub frame: Option<DecisionFrame>,
    /// The raw payload text, for telemetry.
    pub raw_payload: Option<String>,
}

/// The incremental stream splitter.
pub struct FrameSplitter {
    open: SentinelMatcher,
    close: SentinelMatcher,
    open_str: String,
    close_str: String,
    stage: Stage,
    payload: Vec<u8>,
    spoken: String,
    full_text: String,
}

impl FrameSplitter {
    /// Creates a splitter with the default sentinels.
    pub fn new() -> Self {
        Self::with_sentinels(OPEN_SENTINEL, CLOSE_SENTINEL)
    }

    /// Creates a splitter with custom sentinels.
    pub fn with_sentinels(open: &str, close: &str) -> Self {
        Self {
            open: SentinelMatcher::new(open),
            close: SentinelMatcher::new(close),
            open_str: open.to_string(),
            close_str: close.to_string(),
            stage: Stage::Speaking,
            payload: Vec::new(),
            spoken: String::new(),
            full_text: String::new(),
        }
    }

    /// Consumes one fragment, forwarding ready spoken text to `speak`.
    pub fn push(&mut self, fragment: &str, speak: &mut dyn FnMut(&str)) {
        self.full_text.push_str(fragment);

        let mut out: Vec<u8> = Vec::new();
        for byte in fragment.bytes() {
            match self.stage {
                Stage::Speaking => {
                    if self.open.feed(byte, &mut out) {
                        self.stage = Stage::Buffering;
                    }
                }
                Stage::Buffering => {
                    if self.close.feed(byte, &mut self.payload) {
                        self.stage = Stage::Trailing;
                    }
                }
                Stage::Trailing => out.push(byte),
            }
        }

        if !out.is_empty() {
            let text = String::from_utf8_lossy(&out).into_owned();
            self.spoken.push_str(&text);
            speak(&text);
        }
    }

    /// Completes the stream.
    ///
    /// If no well-formed sentinel pair was seen, the accumulated text
    /// is rescanned once; failing that, the payload is treated as
    /// absent and everything not yet forwarded is spoken.
    pub fn finish(mut self, speak: &mut dyn FnMut(&str)) -> SplitOutcome {
        if self.stage == Stage::Trailing {
            let raw = String::from_utf8_lossy(&self.payload).into_owned();
            let frame = DecisionFrame::parse(&raw);
            return SplitOutcome {
                spoken: self.spoken,
                frame: Some(frame),
                raw_payload: Some(raw),
            };
        }

        // One whole-text rescan for a pair the incremental pass did not
        // complete.
        if let Some(open_idx) = self.full_text.find(&self.open_str) {
            let after_open = open_idx + self.open_str.len();
            if let Some(close_off) = self.full_text[after_open..].find(&self.close_str) {
                let raw = self.full_text[after_open..after_open + close_off].to_string();
                let before_open = &self.full_text[..open_idx];
                if before_open.len() > self.spoken.len() {
                    let rest = &before_open[self.spoken.len()..];
                    self.spoken.push_str(rest);
                    speak(rest);
                }
                let frame = DecisionFrame::parse(&raw);
                return SplitOutcome {
                    spoken: self.spoken,
                    frame: Some(frame),
                    raw_payload: Some(raw),
                };
            }
        }

        // No payload at all: the entire text is the spoken reply,
        // including anything withheld as a potential sentinel.
        if self.full_text.len() > self.spoken.len() {
            let rest = self.full_text[self.spoken.len()..].to_string();
            self.spoken.push_str(&rest);
            speak(&rest);
        }

        SplitOutcome {
            spoken: self.spoken,
            frame: None,
            raw_payload: None,
        }
    }
}

impl Default for FrameSplitter {
    fn default() -> Self {
        Self::new()
    }
}
