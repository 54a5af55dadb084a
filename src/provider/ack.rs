//! Per-session memo of acknowledged providers.
//!
//! Each provider moves `Unacknowledged → Pending → Acknowledged`. While an
//! acknowledgment is pending, other callers for the same provider wait on
//! it and share its outcome instead of issuing a second broker call. A
//! failed (or abandoned) acknowledgment returns the provider to
//! `Unacknowledged`.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::watch;

use crate::error::InferenceError;

type AckSignal = Option<Result<(), InferenceError>>;

enum AckState {
    Pending(watch::Receiver<AckSignal>),
    Acknowledged,
}

/// Public view of one provider's acknowledgment state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AckStatus {
    Unacknowledged,
    Pending,
    Acknowledged,
}

/// How `ensure_acknowledged` was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// This call performed the broker acknowledgment.
    Performed,
    /// Already acknowledged earlier in the session.
    Memoized,
    /// Waited on a concurrent caller's acknowledgment.
    Joined,
}

#[derive(Default)]
pub struct AckRegistry {
    entries: Mutex<HashMap<String, AckState>>,
}

enum Role {
    Leader(watch::Sender<AckSignal>),
    Follower(watch::Receiver<AckSignal>),
}

impl AckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> MutexGuard<'_, HashMap<String, AckState>> {
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn status(&self, provider: &str) -> AckStatus {
        match self.entries().get(provider) {
            None => AckStatus::Unacknowledged,
            Some(AckState::Pending(_)) => AckStatus::Pending,
            Some(AckState::Acknowledged) => AckStatus::Acknowledged,
        }
    }

    pub fn is_acknowledged(&self, provider: &str) -> bool {
        self.status(provider) == AckStatus::Acknowledged
    }

    /// Acknowledged providers, sorted.
    pub fn acknowledged(&self) -> Vec<String> {
        let mut providers: Vec<String> = self
            .entries()
            .iter()
            .filter(|(_, state)| matches!(state, AckState::Acknowledged))
            .map(|(provider, _)| provider.clone())
            .collect();
        providers.sort();
        providers
    }

    pub fn clear(&self) {
        self.entries().clear();
    }

    /// Run `acknowledge` unless the provider is already acknowledged or an
    /// acknowledgment for it is in flight.
    pub async fn ensure_acknowledged<F, Fut>(
        &self,
        provider: &str,
        acknowledge: F,
    ) -> Result<AckOutcome, InferenceError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), InferenceError>>,
    {
        loop {
            let role = {
                let mut entries = self.entries();
                match entries.get(provider) {
                    Some(AckState::Acknowledged) => return Ok(AckOutcome::Memoized),
                    Some(AckState::Pending(rx)) => Role::Follower(rx.clone()),
                    None => {
                        let (tx, rx) = watch::channel(None);
                        entries.insert(provider.to_string(), AckState::Pending(rx));
                        Role::Leader(tx)
                    }
                }
            };

            match role {
                Role::Leader(tx) => {
                    let mut guard = PendingGuard {
                        registry: self,
                        provider,
                        armed: true,
                    };
                    let result = acknowledge().await;
                    guard.settle(result.is_ok());
                    tx.send_replace(Some(result.clone()));
                    return result.map(|()| AckOutcome::Performed);
                }
                Role::Follower(mut rx) => {
                    let signal = match rx.wait_for(Option::is_some).await {
                        Ok(value) => (*value).clone(),
                        // Leader was dropped mid-flight; its guard already
                        // reset the entry, so compete again.
                        Err(_) => continue,
                    };
                    match signal {
                        Some(result) => return result.map(|()| AckOutcome::Joined),
                        None => continue,
                    }
                }
            }
        }
    }
}

/// Resets a pending entry if the leading future never settles it.
struct PendingGuard<'a> {
    registry: &'a AckRegistry,
    provider: &'a str,
    armed: bool,
}

impl PendingGuard<'_> {
    fn settle(&mut self, acknowledged: bool) {
        let mut entries = self.registry.entries();
        if acknowledged {
            entries.insert(self.provider.to_string(), AckState::Acknowledged);
        } else {
            entries.remove(self.provider);
        }
        self.armed = false;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut entries = self.registry.entries();
        if matches!(entries.get(self.provider), Some(AckState::Pending(_))) {
            entries.remove(self.provider);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn second_call_is_memoized() {
        let registry = AckRegistry::new();
        let calls = AtomicUsize::new(0);

        let first = registry
            .ensure_acknowledged("0xp", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();
        let second = registry
            .ensure_acknowledged("0xp", || async {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
            .await
            .unwrap();

        assert_eq!(first, AckOutcome::Performed);
        assert_eq!(second, AckOutcome::Memoized);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(registry.status("0xp"), AckStatus::Acknowledged);
        assert_eq!(registry.acknowledged(), vec!["0xp".to_string()]);
    }

    #[tokio::test]
    async fn concurrent_callers_share_one_call() {
        let registry = Arc::new(AckRegistry::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                registry
                    .ensure_acknowledged("0xp", || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Ok(())
                    })
                    .await
            }));
        }

        let mut performed = 0;
        for handle in handles {
            if handle.await.unwrap().unwrap() == AckOutcome::Performed {
                performed += 1;
            }
        }
        assert_eq!(performed, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn waiters_share_failure_and_entry_resets() {
        let registry = Arc::new(AckRegistry::new());
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();

        let leader = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .ensure_acknowledged("0xp", || async move {
                        let _ = started_tx.send(());
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Err(InferenceError::ProviderUnreachable {
                            provider: "0xp".to_string(),
                            reason: "signer not found".to_string(),
                        })
                    })
                    .await
            })
        };

        started_rx.await.unwrap();
        assert_eq!(registry.status("0xp"), AckStatus::Pending);
        let follower = registry
            .ensure_acknowledged("0xp", || async { Ok(()) })
            .await;

        assert!(matches!(
            follower,
            Err(InferenceError::ProviderUnreachable { .. })
        ));
        assert!(leader.await.unwrap().is_err());
        assert_eq!(registry.status("0xp"), AckStatus::Unacknowledged);

        // A later attempt may try again.
        let retry = registry
            .ensure_acknowledged("0xp", || async { Ok(()) })
            .await
            .unwrap();
        assert_eq!(retry, AckOutcome::Performed);
    }

    #[tokio::test]
    async fn abandoned_leader_releases_pending_entry() {
        let registry = Arc::new(AckRegistry::new());

        let leader = {
            let registry = registry.clone();
            tokio::spawn(async move {
                registry
                    .ensure_acknowledged("0xp", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        Ok(())
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(registry.status("0xp"), AckStatus::Pending);

        leader.abort();
        let _ = leader.await;
        assert_eq!(registry.status("0xp"), AckStatus::Unacknowledged);
    }

    #[tokio::test]
    async fn clear_forgets_acknowledgments() {
        let registry = AckRegistry::new();
        registry
            .ensure_acknowledged("0xp", || async { Ok(()) })
            .await
            .unwrap();
        registry.clear();
        assert_eq!(registry.status("0xp"), AckStatus::Unacknowledged);
    }
}
