//! Record/replay mode state machine and pipeline hooks

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use tracing::{debug, error, info, info_span, warn};

use crate::config::ConfigHandle;
use crate::exchange::{Exchange, InboundRequest, RecordedRequest, RequestKey, UpstreamResponse};
use crate::matcher::{Matcher, RecordsetStore};
use crate::sink::ResponseSink;
use crate::timing::{now_millis, Delivery, TimeFrame, TimingSimulator};
use crate::Result;

/// Status used when replay finds no recorded exchange
pub const NOT_FOUND_STATUS: u16 = 404;

/// Engine operating mode
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Mode {
    /// Pass everything through
    #[default]
    Idle,
    /// Capture upstream exchanges into a recordset
    Recording {
        /// Target recordset
        recordset: String,
    },
    /// Serve responses from a recordset
    Replaying {
        /// Target recordset
        recordset: String,
    },
}

impl Mode {
    /// Check if mode is Recording
    #[must_use]
    pub fn is_recording(&self) -> bool {
        matches!(self, Self::Recording { .. })
    }

    /// Check if mode is Replaying
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        matches!(self, Self::Replaying { .. })
    }

    /// Target recordset of the active mode
    #[must_use]
    pub fn recordset(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Recording { recordset } | Self::Replaying { recordset } => Some(recordset),
        }
    }
}

/// What `on_request` did with the response
#[derive(Debug)]
pub enum RequestDisposition<S> {
    /// Not replaying; the host continues its pipeline with the untouched response
    Passthrough(S),
    /// A recorded response was written and its body delivered or scheduled
    Replayed(Delivery),
    /// No recorded exchange matched; the response was ended with 404
    NotFound,
}

impl<S> RequestDisposition<S> {
    /// Check if the request was passed through
    #[must_use]
    pub fn is_passthrough(&self) -> bool {
        matches!(self, Self::Passthrough(_))
    }
}

/// What `on_response` did with the upstream exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Not recording
    Skipped,
    /// Exchange appended to a recordset
    Recorded,
}

/// Engine counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineStats {
    /// Replayed requests that found an exchange
    pub hits: usize,
    /// Replayed requests answered with 404
    pub misses: usize,
    /// Exchanges recorded
    pub recorded: usize,
}

/// Recorder/replayer sitting in a proxy's request/response pipeline
pub struct ReplayEngine {
    mode: RwLock<Mode>,
    store: Arc<RecordsetStore>,
    external_matcher: RwLock<Option<Arc<dyn Matcher>>>,
    config: ConfigHandle,
    timing: TimingSimulator,
    hits: AtomicUsize,
    misses: AtomicUsize,
    recorded: AtomicUsize,
}

impl ReplayEngine {
    /// Create an idle engine using the built-in matcher
    #[must_use]
    pub fn new(config: ConfigHandle) -> Self {
        Self::with_timing(config, TimingSimulator::new())
    }

    /// Create an idle engine with an explicit timing simulator
    #[must_use]
    pub fn with_timing(config: ConfigHandle, timing: TimingSimulator) -> Self {
        Self {
            mode: RwLock::new(Mode::Idle),
            store: Arc::new(RecordsetStore::new()),
            external_matcher: RwLock::new(None),
            config,
            timing,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            recorded: AtomicUsize::new(0),
        }
    }

    /// Enter recording mode targeting `recordset`
    pub fn start(&self, recordset: impl Into<String>) {
        let recordset = recordset.into();
        debug!("start '{}'", recordset);

        if !self.has_external_matcher() && !self.store.contains(&recordset) {
            warn!(
                "Recordset '{}' is not initialized; recorded exchanges will be rejected",
                recordset
            );
        }

        *self.mode_mut() = Mode::Recording { recordset };
        info!("Record mode ON");
    }

    /// Leave recording and replaying.
    ///
    /// Deliveries already scheduled still fire.
    pub fn stop(&self) {
        debug!("stop");
        *self.mode_mut() = Mode::Idle;
        info!("Record/replay mode OFF");
    }

    /// Enter replay mode targeting `recordset`
    pub fn replay(&self, recordset: impl Into<String>) {
        let recordset = recordset.into();
        debug!("replay '{}'", recordset);
        *self.mode_mut() = Mode::Replaying { recordset };
        info!("Replay mode ON");
    }

    /// Replace the built-in matcher for the rest of the engine's life
    pub fn register_matcher(&self, matcher: Arc<dyn Matcher>) {
        info!("External matcher registered");
        *self
            .external_matcher
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(matcher);
    }

    /// Current mode
    #[must_use]
    pub fn mode(&self) -> Mode {
        self.mode_ref().clone()
    }

    /// Check if recording
    #[must_use]
    pub fn is_recording(&self) -> bool {
        self.mode_ref().is_recording()
    }

    /// Check if replaying
    #[must_use]
    pub fn is_replaying(&self) -> bool {
        self.mode_ref().is_replaying()
    }

    /// Target recordset of the active mode
    #[must_use]
    pub fn current_recordset(&self) -> Option<String> {
        self.mode_ref().recordset().map(str::to_string)
    }

    /// Whether an external matcher has been registered
    #[must_use]
    pub fn has_external_matcher(&self) -> bool {
        self.external_matcher
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// The built-in store backing the default matcher
    #[must_use]
    pub fn store(&self) -> &Arc<RecordsetStore> {
        &self.store
    }

    /// Request hook.
    ///
    /// Outside replay mode, or when the response is already finalized, the
    /// response is handed back untouched. During replay the response is
    /// completed exactly once: from the recorded exchange, or with an empty
    /// 404 when nothing matches.
    pub fn on_request<S: ResponseSink>(
        &self,
        request: &InboundRequest,
        mut response: S,
    ) -> RequestDisposition<S> {
        let recordset = match &*self.mode_ref() {
            Mode::Replaying { recordset } if !response.is_finished() => request
                .recordset
                .clone()
                .unwrap_or_else(|| recordset.clone()),
            _ => return RequestDisposition::Passthrough(response),
        };
        let replay_start = now_millis();

        let span = info_span!("replay", mode = "REPLAY", recordset = %recordset);
        let _enter = span.enter();
        info!("{} {}", request.method, request.url);

        let key = RequestKey::from_request(request);
        let Some(exchange) = self.lookup(&recordset, &key) else {
            debug!("No matching exchange");
            self.misses.fetch_add(1, Ordering::Relaxed);
            response.set_status(NOT_FOUND_STATUS);
            response.end(Bytes::new());
            return RequestDisposition::NotFound;
        };

        self.hits.fetch_add(1, Ordering::Relaxed);
        response.write_head(
            exchange.response.status,
            &exchange.response.status_message,
            &exchange.response.headers,
        );

        let speed = self.config.speed();
        let frame = TimeFrame::for_exchange(&exchange, replay_start);
        let delivery = self
            .timing
            .deliver(speed, exchange.response.body.clone(), response, frame);

        RequestDisposition::Replayed(delivery)
    }

    /// Response hook, called after the host obtained a real upstream response.
    ///
    /// Records the exchange when recording; otherwise does nothing. The host
    /// continues its pipeline regardless of the outcome.
    ///
    /// # Errors
    ///
    /// Returns error if the matcher rejects the exchange, e.g.
    /// `UnknownRecordset` when the target was never initialized
    pub fn on_response(
        &self,
        request: &InboundRequest,
        upstream: &UpstreamResponse,
    ) -> Result<RecordOutcome> {
        let target = match &*self.mode_ref() {
            Mode::Recording { recordset } => recordset.clone(),
            _ => return Ok(RecordOutcome::Skipped),
        };
        let recordset = request.recordset.clone().unwrap_or(target);

        let span = info_span!("record", mode = "RECORD", recordset = %recordset);
        let _enter = span.enter();
        info!("{} {}", request.method, request.url);

        if request.raw_body.is_none() {
            warn!(
                method = %request.method,
                url = %request.url,
                "No body captured for recorded request"
            );
        }

        let exchange = Exchange::new(
            RecordedRequest::from_inbound(request),
            upstream.into(),
            request.start_time,
            now_millis(),
        );

        if let Err(e) = self.matcher().add_request(&recordset, exchange) {
            error!("Failed to record exchange: {}", e);
            return Err(e);
        }

        self.recorded.fetch_add(1, Ordering::Relaxed);
        Ok(RecordOutcome::Recorded)
    }

    /// Find a recorded exchange through the active matcher.
    ///
    /// Matcher failures are logged and reported as no match.
    #[must_use]
    pub fn find_request(&self, recordset: &str, key: &RequestKey) -> Option<Arc<Exchange>> {
        self.lookup(recordset, key)
    }

    /// Append an exchange through the active matcher
    ///
    /// # Errors
    ///
    /// Returns error if the matcher rejects the exchange
    pub fn add_request(&self, recordset: &str, exchange: Exchange) -> Result<()> {
        self.matcher().add_request(recordset, exchange)
    }

    /// List exchanges through the active matcher
    ///
    /// # Errors
    ///
    /// Returns error if the matcher cannot read the recordset
    pub fn get_requests(&self, recordset: &str) -> Result<Vec<Arc<Exchange>>> {
        self.matcher().get_requests(recordset)
    }

    /// Replace a recordset through the active matcher
    ///
    /// # Errors
    ///
    /// Returns error if the matcher cannot write the recordset
    pub fn set_requests(&self, recordset: &str, exchanges: Vec<Exchange>) -> Result<()> {
        self.matcher().set_requests(recordset, exchanges)
    }

    /// Engine counters
    #[must_use]
    pub fn stats(&self) -> EngineStats {
        EngineStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            recorded: self.recorded.load(Ordering::Relaxed),
        }
    }

    fn lookup(&self, recordset: &str, key: &RequestKey) -> Option<Arc<Exchange>> {
        match self.matcher().find_request(recordset, key) {
            Ok(found) => found,
            Err(e) => {
                error!(
                    "Lookup failed in recordset '{}', treating as no match: {}",
                    recordset, e
                );
                None
            }
        }
    }

    fn matcher(&self) -> Arc<dyn Matcher> {
        let external = self
            .external_matcher
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        match external.as_ref() {
            Some(matcher) => Arc::clone(matcher),
            None => Arc::clone(&self.store) as Arc<dyn Matcher>,
        }
    }

    fn mode_ref(&self) -> RwLockReadGuard<'_, Mode> {
        self.mode.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn mode_mut(&self) -> RwLockWriteGuard<'_, Mode> {
        self.mode.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ReplayEngine {
    fn default() -> Self {
        Self::new(ConfigHandle::default())
    }
}
