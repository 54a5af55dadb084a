//! Session orchestration for metered inference.
//!
//! ```text
//! Disconnected ─connect()─▶ Connecting ─ok─▶ Connected { provider_acked: false }
//!      ▲                         │                     │ run_inference()
//!      │                        err                    ▼
//!      │◀────────────────────────┘               Requesting ──done──▶ Connected { provider_acked }
//!      └──────────────── disconnect() from any phase ───────────────────────┘
//! ```
//!
//! Each request runs: funding check → provider acknowledgment (once per
//! session) → service metadata → request headers → dispatch. Steps are
//! strictly sequential. Every session carries an epoch; a request whose
//! session ended while it was in flight returns `SessionEnded` and leaves
//! the new session's state untouched.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;

use crate::auth::RequestAuthenticator;
use crate::config::Config;
use crate::dispatch::{InferenceDispatcher, InferenceRequest};
use crate::error::{ConfigError, ErrorPayload, InferenceError};
use crate::ledger::{FundingOutcome, FundingPolicy, LedgerClient, ensure_funded};
use crate::provider::{AckOutcome, AckRegistry, MetadataResolver, ProviderRegistry};
use crate::wallet::{Identity, WalletConnector, eth};

/// Observable orchestration phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "snake_case")]
pub enum Phase {
    Disconnected,
    Connecting,
    Connected { provider_acked: bool },
    Requesting,
}

impl Phase {
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected { .. } | Self::Requesting)
    }
}

/// A finished inference call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completion {
    pub provider: String,
    pub model: String,
    pub chat_id: String,
    pub content: String,
    /// Provider attestation result; `None` when not checked or unavailable.
    pub verified: Option<bool>,
}

/// What the last request did, for status surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "detail", rename_all = "snake_case")]
pub enum Activity {
    Idle,
    Loading,
    Errored(ErrorPayload),
    Ready(Completion),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionSnapshot {
    pub address: Option<String>,
    pub is_connected: bool,
    pub phase: Phase,
    pub activity: Activity,
    pub acknowledged_providers: Vec<String>,
}

impl SessionSnapshot {
    fn disconnected() -> Self {
        Self {
            address: None,
            is_connected: false,
            phase: Phase::Disconnected,
            activity: Activity::Idle,
            acknowledged_providers: Vec::new(),
        }
    }
}

/// Called synchronously on every phase change, after the new state is
/// published.
pub trait TransitionHandler: Send + Sync {
    fn on_transition(&self, from: Phase, to: Phase);
}

/// Per-connection state. Dropped wholesale on disconnect.
struct Session {
    epoch: u64,
    identity: Identity,
    acks: AckRegistry,
    metadata: MetadataResolver,
}

struct SessionState {
    phase: Phase,
    session: Option<Arc<Session>>,
    activity: Activity,
    in_flight: usize,
}

/// Assembles an [`Orchestrator`] from its collaborators.
pub struct OrchestratorBuilder {
    connector: Option<Arc<dyn WalletConnector>>,
    ledger: Option<Arc<dyn LedgerClient>>,
    registry: Option<Arc<dyn ProviderRegistry>>,
    funding: FundingPolicy,
    dispatch_timeout: Duration,
    verify_responses: bool,
    cache_metadata: bool,
    handlers: Vec<Arc<dyn TransitionHandler>>,
}

impl Default for OrchestratorBuilder {
    fn default() -> Self {
        Self {
            connector: None,
            ledger: None,
            registry: None,
            funding: FundingPolicy::default(),
            dispatch_timeout: Duration::from_millis(crate::config::DEFAULT_DISPATCH_TIMEOUT_MS),
            verify_responses: false,
            cache_metadata: false,
            handlers: Vec::new(),
        }
    }
}

impl OrchestratorBuilder {
    /// Funding policy, timeouts and feature flags from `config`.
    pub fn from_config(config: &Config) -> Self {
        Self {
            funding: config.funding,
            dispatch_timeout: config.inference.dispatch_timeout,
            verify_responses: config.inference.verify_responses,
            cache_metadata: config.inference.cache_metadata,
            ..Self::default()
        }
    }

    pub fn connector(mut self, connector: Arc<dyn WalletConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn ledger(mut self, ledger: Arc<dyn LedgerClient>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn registry(mut self, registry: Arc<dyn ProviderRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn funding(mut self, funding: FundingPolicy) -> Self {
        self.funding = funding;
        self
    }

    pub fn dispatch_timeout(mut self, timeout: Duration) -> Self {
        self.dispatch_timeout = timeout;
        self
    }

    pub fn verify_responses(mut self, enabled: bool) -> Self {
        self.verify_responses = enabled;
        self
    }

    pub fn cache_metadata(mut self, enabled: bool) -> Self {
        self.cache_metadata = enabled;
        self
    }

    pub fn on_transition(mut self, handler: Arc<dyn TransitionHandler>) -> Self {
        self.handlers.push(handler);
        self
    }

    pub fn build(self) -> Result<Orchestrator, ConfigError> {
        let missing = |what: &str| ConfigError::MissingRequired {
            key: what.to_string(),
            hint: format!("call OrchestratorBuilder::{what}() before build()"),
        };
        let connector = self.connector.ok_or_else(|| missing("connector"))?;
        let ledger = self.ledger.ok_or_else(|| missing("ledger"))?;
        let registry = self.registry.ok_or_else(|| missing("registry"))?;
        if self.dispatch_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                key: "dispatch_timeout".to_string(),
                message: "must be > 0".to_string(),
            });
        }

        let (snapshot_tx, _) = watch::channel(SessionSnapshot::disconnected());
        Ok(Orchestrator {
            connector,
            ledger,
            registry,
            dispatcher: InferenceDispatcher::new(self.dispatch_timeout),
            authenticator: RequestAuthenticator::new(),
            funding: self.funding,
            verify_responses: self.verify_responses,
            cache_metadata: self.cache_metadata,
            handlers: self.handlers,
            epoch: AtomicU64::new(0),
            connect_lock: tokio::sync::Mutex::new(()),
            state: Mutex::new(SessionState {
                phase: Phase::Disconnected,
                session: None,
                activity: Activity::Idle,
                in_flight: 0,
            }),
            snapshot_tx,
        })
    }
}

/// Sequences wallet, ledger, broker and provider calls for one user session.
///
/// `Send + Sync`; share it through an `Arc` to run requests concurrently.
pub struct Orchestrator {
    connector: Arc<dyn WalletConnector>,
    ledger: Arc<dyn LedgerClient>,
    registry: Arc<dyn ProviderRegistry>,
    dispatcher: InferenceDispatcher,
    authenticator: RequestAuthenticator,
    funding: FundingPolicy,
    verify_responses: bool,
    cache_metadata: bool,
    handlers: Vec<Arc<dyn TransitionHandler>>,
    epoch: AtomicU64,
    connect_lock: tokio::sync::Mutex<()>,
    state: Mutex<SessionState>,
    snapshot_tx: watch::Sender<SessionSnapshot>,
}

impl Orchestrator {
    pub fn builder() -> OrchestratorBuilder {
        OrchestratorBuilder::default()
    }

    fn state(&self) -> MutexGuard<'_, SessionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.snapshot_tx.borrow().clone()
    }

    /// Receive every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot_tx.subscribe()
    }

    pub fn phase(&self) -> Phase {
        self.state().phase
    }

    pub fn funding_policy(&self) -> &FundingPolicy {
        &self.funding
    }

    /// Identity of the current session, if connected.
    pub fn identity(&self) -> Option<Identity> {
        self.state()
            .session
            .as_ref()
            .map(|session| session.identity.clone())
    }

    /// Connect the wallet and open a session. Returns the wallet address.
    pub async fn connect(&self) -> Result<String, InferenceError> {
        let _connecting = self.connect_lock.lock().await;

        let epoch = {
            let mut state = self.state();
            if let Some(session) = &state.session {
                return Ok(session.identity.address().to_string());
            }
            let transition = self.set_phase(&mut state, Phase::Connecting);
            self.publish(&state);
            drop(state);
            self.notify(transition);
            self.epoch.load(Ordering::SeqCst)
        };

        tracing::debug!(connector = self.connector.id(), "Connecting wallet");
        let connected = self.connector.connect().await;

        let mut state = self.state();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            // A disconnect raced the wallet prompt.
            drop(state);
            if let Ok(identity) = connected {
                identity.invalidate();
            }
            return Err(InferenceError::SessionEnded);
        }

        match connected {
            Ok(identity) => {
                let epoch = self.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                let address = identity.address().to_string();
                state.session = Some(Arc::new(Session {
                    epoch,
                    identity,
                    acks: AckRegistry::new(),
                    metadata: MetadataResolver::new(self.registry.clone(), self.cache_metadata),
                }));
                state.activity = Activity::Idle;
                let transition = self.set_phase(
                    &mut state,
                    Phase::Connected {
                        provider_acked: false,
                    },
                );
                self.publish(&state);
                drop(state);
                self.notify(transition);
                tracing::info!(%address, "Wallet connected");
                Ok(address)
            }
            Err(e) => {
                let e = match e {
                    InferenceError::Connection { .. } => e,
                    other => InferenceError::Connection {
                        reason: other.to_string(),
                    },
                };
                state.activity = Activity::Errored(ErrorPayload::from(&e));
                let transition = self.set_phase(&mut state, Phase::Disconnected);
                self.publish(&state);
                drop(state);
                self.notify(transition);
                tracing::warn!(error = %e, "Wallet connection failed");
                Err(e)
            }
        }
    }

    /// End the session from any phase. In-flight requests finish with
    /// `SessionEnded`.
    pub async fn disconnect(&self) {
        let (session, transition) = {
            let mut state = self.state();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            let session = state.session.take();
            state.in_flight = 0;
            state.activity = Activity::Idle;
            let transition = self.set_phase(&mut state, Phase::Disconnected);
            self.publish(&state);
            (session, transition)
        };
        self.notify(transition);

        if let Some(session) = session {
            session.acks.clear();
            session.identity.invalidate();
            tracing::info!(address = %session.identity.address(), "Wallet disconnected");
        }
        self.connector.disconnect().await;
    }

    /// Run one inference request against `provider`.
    pub async fn run_inference(
        &self,
        provider: &str,
        request: InferenceRequest,
    ) -> Result<Completion, InferenceError> {
        let session = {
            let mut state = self.state();
            let Some(session) = state.session.clone() else {
                return Err(InferenceError::NotConnected);
            };
            state.in_flight += 1;
            state.activity = Activity::Loading;
            let transition = self.set_phase(&mut state, Phase::Requesting);
            self.publish(&state);
            drop(state);
            self.notify(transition);
            session
        };

        let mut guard = InFlightGuard {
            orchestrator: self,
            epoch: session.epoch,
            finished: false,
        };
        let result = self.execute(&session, provider, &request).await;
        guard.finished = true;

        self.finish(&session, result)
    }

    async fn execute(
        &self,
        session: &Session,
        provider: &str,
        request: &InferenceRequest,
    ) -> Result<Completion, InferenceError> {
        let provider = eth::normalize_wallet_address(provider).ok_or_else(|| {
            InferenceError::ProviderUnreachable {
                provider: provider.to_string(),
                reason: "not a 0x-prefixed 20-byte address".to_string(),
            }
        })?;
        let identity = &session.identity;

        if let FundingOutcome::ToppedUp { previous, deposited } =
            ensure_funded(self.ledger.as_ref(), identity, &self.funding).await?
        {
            tracing::debug!(%previous, %deposited, "Funding precondition satisfied by top-up");
        }

        let ack = session
            .acks
            .ensure_acknowledged(&provider, || {
                self.registry.acknowledge_provider(identity, &provider)
            })
            .await?;
        if ack == AckOutcome::Performed {
            tracing::info!(provider = %provider, "Provider signer acknowledged");
            self.republish(session.epoch);
        }

        let metadata = session.metadata.resolve(&provider).await?;
        let payload = request.signing_payload()?;
        let headers = self
            .authenticator
            .sign(identity, &session.acks, &provider, &payload)
            .await?;

        let completion = self
            .dispatcher
            .send(
                &metadata.completions_url(),
                &metadata.model,
                request,
                &headers,
            )
            .await?
            .into_completion()?;

        let verified = if self.verify_responses {
            match self
                .registry
                .verify_response(
                    identity,
                    &provider,
                    &completion.chat_id,
                    &completion.content,
                )
                .await
            {
                Ok(verified) => verified,
                Err(e) => {
                    tracing::warn!(
                        provider = %provider,
                        error = %e,
                        "Response verification failed"
                    );
                    None
                }
            }
        } else {
            None
        };

        Ok(Completion {
            provider,
            model: metadata.model,
            chat_id: completion.chat_id,
            content: completion.content,
            verified,
        })
    }

    /// Settle a request against the session it started in.
    fn finish(
        &self,
        session: &Session,
        result: Result<Completion, InferenceError>,
    ) -> Result<Completion, InferenceError> {
        let mut state = self.state();
        if self.epoch.load(Ordering::SeqCst) != session.epoch {
            drop(state);
            tracing::warn!(
                address = %session.identity.address(),
                "Session ended while request was in flight; discarding result"
            );
            return Err(InferenceError::SessionEnded);
        }

        state.activity = match &result {
            Ok(completion) => Activity::Ready(completion.clone()),
            Err(e) => Activity::Errored(ErrorPayload::from(e)),
        };
        let transition = self.release_request(&mut state, session);
        self.publish(&state);
        drop(state);
        self.notify(transition);

        if let Err(e) = &result {
            tracing::debug!(code = e.code(), error = %e, "Inference request failed");
        }
        result
    }

    /// Leave `Requesting` once the last in-flight request settles.
    fn release_request(
        &self,
        state: &mut SessionState,
        session: &Session,
    ) -> Option<(Phase, Phase)> {
        state.in_flight = state.in_flight.saturating_sub(1);
        if state.in_flight > 0 {
            return None;
        }
        let provider_acked = !session.acks.acknowledged().is_empty();
        self.set_phase(state, Phase::Connected { provider_acked })
    }

    fn set_phase(&self, state: &mut SessionState, to: Phase) -> Option<(Phase, Phase)> {
        let from = state.phase;
        if from == to {
            return None;
        }
        state.phase = to;
        tracing::debug!(?from, ?to, "Session phase changed");
        Some((from, to))
    }

    fn notify(&self, transition: Option<(Phase, Phase)>) {
        if let Some((from, to)) = transition {
            for handler in &self.handlers {
                handler.on_transition(from, to);
            }
        }
    }

    fn publish(&self, state: &SessionState) {
        let snapshot = match &state.session {
            Some(session) => SessionSnapshot {
                address: Some(session.identity.address().to_string()),
                is_connected: true,
                phase: state.phase,
                activity: state.activity.clone(),
                acknowledged_providers: session.acks.acknowledged(),
            },
            None => SessionSnapshot {
                activity: state.activity.clone(),
                phase: state.phase,
                ..SessionSnapshot::disconnected()
            },
        };
        self.snapshot_tx.send_replace(snapshot);
    }

    /// Publish again if `epoch` is still the live session.
    fn republish(&self, epoch: u64) {
        let state = self.state();
        if self.epoch.load(Ordering::SeqCst) == epoch {
            self.publish(&state);
        }
    }
}

/// Releases the in-flight slot if a request future is dropped before it
/// settles.
struct InFlightGuard<'a> {
    orchestrator: &'a Orchestrator,
    epoch: u64,
    finished: bool,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let orchestrator = self.orchestrator;
        let mut state = orchestrator.state();
        if orchestrator.epoch.load(Ordering::SeqCst) != self.epoch {
            return;
        }
        let Some(session) = state.session.clone() else {
            return;
        };
        let transition = orchestrator.release_request(&mut state, &session);
        if state.in_flight == 0 {
            // A cancelled request produced no outcome to report.
            state.activity = Activity::Idle;
        }
        orchestrator.publish(&state);
        drop(state);
        orchestrator.notify(transition);
    }
}
