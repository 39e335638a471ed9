use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use cameradar_core::engine::{AttackOptions, Dictionary, DictionaryKind, DiscoverOptions, Engine};
use cameradar_core::errors::EngineError;
use cameradar_core::stream::Stream;

/// Pre-programmed engine replies for deterministic testing without a network.
#[derive(Clone, Debug)]
pub enum MockReply {
    /// Return these streams.
    Streams(Vec<Stream>),
    /// Return the streams the attack was given, untouched.
    Echo,
    /// Return an error.
    Error(EngineError),
    /// Wait a duration, then yield the inner reply.
    Delay(Duration, Box<MockReply>),
    /// Panic inside the engine call.
    Panic(String),
}

impl MockReply {
    pub fn delayed(delay: Duration, inner: MockReply) -> Self {
        Self::Delay(delay, Box::new(inner))
    }
}

/// Mock engine that answers discovery and attack calls from two scripts.
///
/// An exhausted discovery script is an error; an exhausted attack script
/// echoes its input so tests only script the passes they care about.
pub struct MockEngine {
    discover_replies: Mutex<VecDeque<MockReply>>,
    attack_replies: Mutex<VecDeque<MockReply>>,
    discover_calls: AtomicUsize,
    route_attacks: AtomicUsize,
    credential_attacks: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    targets: Mutex<Vec<String>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            discover_replies: Mutex::new(VecDeque::new()),
            attack_replies: Mutex::new(VecDeque::new()),
            discover_calls: AtomicUsize::new(0),
            route_attacks: AtomicUsize::new(0),
            credential_attacks: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            targets: Mutex::new(Vec::new()),
        }
    }

    #[must_use]
    pub fn on_discover(self, reply: MockReply) -> Self {
        self.discover_replies.lock().push_back(reply);
        self
    }

    #[must_use]
    pub fn on_attack(self, reply: MockReply) -> Self {
        self.attack_replies.lock().push_back(reply);
        self
    }

    pub fn discover_calls(&self) -> usize {
        self.discover_calls.load(Ordering::SeqCst)
    }

    pub fn route_attacks(&self) -> usize {
        self.route_attacks.load(Ordering::SeqCst)
    }

    pub fn credential_attacks(&self) -> usize {
        self.credential_attacks.load(Ordering::SeqCst)
    }

    /// Highest number of calls that were ever running at once.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    /// Targets in the order discovery was called for them.
    pub fn discovered_targets(&self) -> Vec<String> {
        self.targets.lock().clone()
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(&self.in_flight)
    }
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight count even when the call panics.
struct InFlight<'a>(&'a AtomicUsize);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Resolve a reply, unrolling nested delays iteratively.
async fn resolve_reply(reply: MockReply, input: Vec<Stream>) -> Result<Vec<Stream>, EngineError> {
    let mut current = reply;
    loop {
        match current {
            MockReply::Streams(streams) => return Ok(streams),
            MockReply::Echo => return Ok(input),
            MockReply::Error(e) => return Err(e),
            MockReply::Panic(msg) => panic!("{msg}"),
            MockReply::Delay(duration, inner) => {
                tokio::time::sleep(duration).await;
                current = *inner;
            }
        }
    }
}

#[async_trait]
impl Engine for MockEngine {
    fn name(&self) -> &str {
        "mock"
    }

    async fn discover(
        &self,
        target: &str,
        _ports: &[u16],
        _options: &DiscoverOptions,
    ) -> Result<Vec<Stream>, EngineError> {
        let _guard = self.enter();
        let idx = self.discover_calls.fetch_add(1, Ordering::SeqCst);
        self.targets.lock().push(target.to_string());

        let reply = self.discover_replies.lock().pop_front();
        match reply {
            Some(reply) => resolve_reply(reply, Vec::new()).await,
            None => Err(EngineError::Discovery(format!(
                "MockEngine: no discovery reply configured for call {idx}"
            ))),
        }
    }

    async fn attack(
        &self,
        streams: Vec<Stream>,
        dictionary: &Dictionary,
        _options: &AttackOptions,
    ) -> Result<Vec<Stream>, EngineError> {
        let _guard = self.enter();
        match dictionary.kind {
            DictionaryKind::Routes => self.route_attacks.fetch_add(1, Ordering::SeqCst),
            DictionaryKind::Credentials => self.credential_attacks.fetch_add(1, Ordering::SeqCst),
        };

        let reply = self.attack_replies.lock().pop_front().unwrap_or(MockReply::Echo);
        resolve_reply(reply, streams).await
    }
}
