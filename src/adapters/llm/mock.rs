//! Mock classifier and generator for testing.
//!
//! Both are scripted with queues of canned results, support error
//! injection, and record every call for verification, so orchestrator
//! flows run without any network dependency.

use async_trait::async_trait;
use futures::stream;
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::sleep;

use crate::domain::dialogue::ClassifiedTurn;
use crate::domain::frame::{CLOSE_SENTINEL, OPEN_SENTINEL};
use crate::domain::session::SessionContext;
use crate::ports::{
    ClassifierError, GeneratorError, ReplyGenerator, ReplyRequest, ReplyStream, TurnClassifier,
};

/// Scripted classifier: returns queued results in order, then falls
/// back to `unclear`.
#[derive(Debug, Clone, Default)]
pub struct MockClassifier {
    results: Arc<Mutex<VecDeque<Result<ClassifiedTurn, ClassifierError>>>>,
    calls: Arc<Mutex<Vec<String>>>,
}

impl MockClassifier {
    /// Creates a classifier with no scripted results.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a classification result.
    pub fn with_result(self, turn: ClassifiedTurn) -> Self {
        self.results.lock().unwrap().push_back(Ok(turn));
        self
    }

    /// Queues a classification error.
    pub fn with_error(self, error: ClassifierError) -> Self {
        self.results.lock().unwrap().push_back(Err(error));
        self
    }

    /// All transcripts this classifier was asked about.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of classify calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl TurnClassifier for MockClassifier {
    async fn classify(
        &self,
        transcript: &str,
        _ctx: &SessionContext,
    ) -> Result<ClassifiedTurn, ClassifierError> {
        self.calls.lock().unwrap().push(transcript.to_string());
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(ClassifiedTurn::unclear(transcript)))
    }
}

/// One scripted generator reply.
#[derive(Debug, Clone)]
enum MockReply {
    /// Stream these fragments, in order.
    Fragments(Vec<String>),
    /// Fail the whole generation call.
    Error(GeneratorError),
    /// Start the stream, then fail after the given fragments.
    BrokenStream(Vec<String>, GeneratorError),
}

/// Scripted reply generator.
#[derive(Debug, Clone, Default)]
pub struct MockGenerator {
    replies: Arc<Mutex<VecDeque<MockReply>>>,
    calls: Arc<Mutex<Vec<ReplyRequest>>>,
    delay_per_fragment: Duration,
}

impl MockGenerator {
    /// Creates a generator with no scripted replies; unscripted calls
    /// stream a plain default reply with no frame.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a plain spoken reply split into word fragments, with no
    /// structured frame.
    pub fn with_reply(self, text: impl Into<String>) -> Self {
        let fragments = text
            .into()
            .split_inclusive(' ')
            .map(str::to_string)
            .collect();
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Fragments(fragments));
        self
    }

    /// Queues a spoken reply followed by a framed payload, the whole
    /// stream cut into fragments of `chunk_size` bytes.
    pub fn with_framed_reply(
        self,
        text: impl Into<String>,
        payload_json: impl Into<String>,
        chunk_size: usize,
    ) -> Self {
        let stream = format!(
            "{}{}{}{}",
            text.into(),
            OPEN_SENTINEL,
            payload_json.into(),
            CLOSE_SENTINEL
        );
        let fragments = chunk_string(&stream, chunk_size.max(1));
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Fragments(fragments));
        self
    }

    /// Queues exact fragments, sentinels and all.
    pub fn with_fragments(self, fragments: Vec<String>) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Fragments(fragments));
        self
    }

    /// Queues a generation failure.
    pub fn with_error(self, error: GeneratorError) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::Error(error));
        self
    }

    /// Queues a stream that breaks after the given fragments.
    pub fn with_broken_stream(self, fragments: Vec<String>, error: GeneratorError) -> Self {
        self.replies
            .lock()
            .unwrap()
            .push_back(MockReply::BrokenStream(fragments, error));
        self
    }

    /// Adds latency between fragments, for cancellation tests.
    pub fn with_fragment_delay(mut self, delay: Duration) -> Self {
        self.delay_per_fragment = delay;
        self
    }

    /// All recorded generation requests.
    pub fn calls(&self) -> Vec<ReplyRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Number of generate calls made.
    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

fn chunk_string(s: &str, chunk_size: usize) -> Vec<String> {
    let mut fragments = Vec::new();
    let mut start = 0;
    while start < s.len() {
        let mut end = (start + chunk_size).min(s.len());
        // Align to a char boundary so each fragment is valid UTF-8.
        while end < s.len() && !s.is_char_boundary(end) {
            end += 1;
        }
        fragments.push(s[start..end].to_string());
        start = end;
    }
    fragments
}

#[async_trait]
impl ReplyGenerator for MockGenerator {
    async fn generate(&self, request: ReplyRequest) -> Result<ReplyStream, GeneratorError> {
        self.calls.lock().unwrap().push(request);

        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| MockReply::Fragments(vec!["Okay. ".to_string(), "Noted.".to_string()]));
        let delay = self.delay_per_fragment;

        let items: Vec<Result<String, GeneratorError>> = match reply {
            MockReply::Error(error) => return Err(error),
            MockReply::Fragments(fragments) => fragments.into_iter().map(Ok).collect(),
            MockReply::BrokenStream(fragments, error) => fragments
                .into_iter()
                .map(Ok)
                .chain(std::iter::once(Err(error)))
                .collect(),
        };

        let stream = stream::iter(items).then(move |item| async move {
            if !delay.is_zero() {
                sleep(delay).await;
            }
            item
        });

        Ok(Box::pin(stream))
    }
}
