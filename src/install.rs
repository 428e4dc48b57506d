//! Install-lifecycle events.
//!
//! The platform announces install events on an [`InstallEvents`] bus.
//! [`InstallEvents::register`] starts a handler task and returns an
//! [`InstallSubscription`]; dropping or disposing the subscription stops
//! the handler, and no event is handled after that.

use std::sync::Arc;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;

use crate::persistence::{LocalStore, INSTALLED_FLAG};

const EVENT_BUS_CAPACITY: usize = 16;

/// A deferred install prompt, held until the user acts on it or the app
/// gets installed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredPrompt {
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InstallEvent {
    /// The platform offers an install prompt; the default UI is suppressed
    BeforeInstallPrompt(DeferredPrompt),
    /// The app was installed to the home screen
    AppInstalled,
}

/// Broadcast bus for install events.
#[derive(Clone)]
pub struct InstallEvents {
    tx: broadcast::Sender<InstallEvent>,
}

impl Default for InstallEvents {
    fn default() -> Self {
        Self::new()
    }
}

impl InstallEvents {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        Self { tx }
    }

    /// Publish an event. Returns the number of live subscriptions.
    pub fn emit(&self, event: InstallEvent) -> usize {
        self.tx.send(event).unwrap_or(0)
    }

    /// Start handling events.
    ///
    /// `on_prompt` runs for every install prompt. On `AppInstalled` the
    /// deferred prompt is cleared and `installed = true` is written to
    /// `store`; a failed write is logged and never stops the handler.
    pub fn register<F>(&self, store: LocalStore, on_prompt: F) -> InstallSubscription
    where
        F: Fn(&DeferredPrompt) + Send + 'static,
    {
        let mut rx = self.tx.subscribe();
        let deferred = Arc::new(Mutex::new(None));
        let (handled_tx, handled_rx) = watch::channel(0u64);

        let task_deferred = Arc::clone(&deferred);
        let handle = tokio::spawn(async move {
            loop {
                let event = match rx.recv().await {
                    Ok(event) => event,
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Install event handler lagged");
                        continue;
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                };

                match event {
                    InstallEvent::BeforeInstallPrompt(prompt) => {
                        tracing::info!("Install prompt deferred");
                        on_prompt(&prompt);
                        *task_deferred.lock().await = Some(prompt);
                    }
                    InstallEvent::AppInstalled => {
                        tracing::info!("App installed");
                        *task_deferred.lock().await = None;
                        store.set_flag(INSTALLED_FLAG, true).await;
                    }
                }
                handled_tx.send_modify(|n| *n += 1);
            }
        });

        InstallSubscription {
            handle: Some(handle),
            deferred,
            handled: handled_rx,
        }
    }
}

/// Handle to a running install-event handler.
pub struct InstallSubscription {
    handle: Option<JoinHandle<()>>,
    deferred: Arc<Mutex<Option<DeferredPrompt>>>,
    handled: watch::Receiver<u64>,
}

impl InstallSubscription {
    /// The prompt currently held back, if any.
    pub async fn deferred_prompt(&self) -> Option<DeferredPrompt> {
        self.deferred.lock().await.clone()
    }

    /// Take the held prompt to show it. A prompt can be used once.
    pub async fn take_prompt(&self) -> Option<DeferredPrompt> {
        self.deferred.lock().await.take()
    }

    /// Number of events handled so far.
    pub fn handled(&self) -> u64 {
        *self.handled.borrow()
    }

    /// Wait until at least `count` events have been handled. Returns early
    /// if the handler has stopped.
    pub async fn wait_handled(&mut self, count: u64) {
        if let Err(e) = self.handled.wait_for(|n| *n >= count).await {
            tracing::debug!(count, error = %e, "Install handler stopped before reaching count");
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop handling events.
    pub fn dispose(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
            tracing::debug!("Install subscription disposed");
        }
    }
}

impl Drop for InstallSubscription {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn prompt() -> DeferredPrompt {
        DeferredPrompt {
            platforms: vec!["web".to_string()],
        }
    }

    #[tokio::test]
    async fn test_prompt_deferred_then_installed() {
        let events = InstallEvents::new();
        let store = LocalStore::open(":memory:").await;
        let prompts = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&prompts);

        let mut sub = events.register(store.clone(), move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(events.emit(InstallEvent::BeforeInstallPrompt(prompt())), 1);
        sub.wait_handled(1).await;
        assert_eq!(prompts.load(Ordering::SeqCst), 1);
        assert_eq!(sub.deferred_prompt().await, Some(prompt()));
        assert!(!store.is_installed().await);

        events.emit(InstallEvent::AppInstalled);
        sub.wait_handled(2).await;
        assert_eq!(sub.deferred_prompt().await, None);
        assert!(store.is_installed().await);
    }

    #[tokio::test]
    async fn test_disposed_subscription_ignores_events() {
        let events = InstallEvents::new();
        let store = LocalStore::open(":memory:").await;
        let sub = events.register(store.clone(), |_| {});
        assert!(sub.is_active());

        sub.dispose();
        events.emit(InstallEvent::AppInstalled);
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert_eq!(store.get_flag(INSTALLED_FLAG).await, None);
    }

    #[tokio::test]
    async fn test_unavailable_store_does_not_stop_handler() {
        let events = InstallEvents::new();
        let mut sub = events.register(LocalStore::unavailable(), |_| {});

        events.emit(InstallEvent::AppInstalled);
        sub.wait_handled(1).await;
        events.emit(InstallEvent::BeforeInstallPrompt(prompt()));
        sub.wait_handled(2).await;
        assert!(sub.is_active());
        assert_eq!(sub.take_prompt().await, Some(prompt()));
        assert_eq!(sub.take_prompt().await, None);
    }

    #[tokio::test]
    async fn test_wait_returns_when_bus_closes() {
        let events = InstallEvents::new();
        let mut sub = events.register(LocalStore::unavailable(), |_| {});
        events.emit(InstallEvent::AppInstalled);
        drop(events);

        // Only one event was ever sent; the handler exits on the closed bus
        tokio::time::timeout(std::time::Duration::from_secs(5), sub.wait_handled(3))
            .await
            .expect("wait_handled should return once the handler stops");
        assert_eq!(sub.handled(), 1);
    }

    #[test]
    fn test_emit_without_subscribers() {
        assert_eq!(InstallEvents::new().emit(InstallEvent::AppInstalled), 0);
    }
}
