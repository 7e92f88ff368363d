//! A structured single-flight primitive: one in-flight computation per key,
//! with followers subscribing to the leader's result.
//!
//! Design Note (§9): "Session locking via a map of booleans: use a
//! structured single-flight primitive (one in-flight computation per key
//! with followers subscribing to its result)." This is that primitive,
//! generic over the key and the (cloneable) result so both [`crate::session::SessionPool`]
//! login and any future per-appliance singleton work can share it.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

/// Coalesces concurrent callers keyed by `K` into a single execution of the
/// async closure passed to [`Group::run`].
///
/// Callers hold this behind an `Arc` (`run` takes `self: &Arc<Self>`) so the
/// leader's spawned computation can outlive the specific `run` call that
/// started it.
pub struct Group<K, V> {
    inflight: Mutex<HashMap<K, broadcast::Sender<Result<V, String>>>>,
}

impl<K, V> Default for Group<K, V>
where
    K: std::hash::Hash + Eq + Clone,
    V: Clone + Send + 'static,
{
    fn default() -> Self {
        Self {
            inflight: Mutex::new(HashMap::new()),
        }
    }
}

impl<K, V> Group<K, V>
where
    K: std::hash::Hash + Eq + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f` for `key`, or join an already in-flight call for the same
    /// key. Only one caller per key ever executes `f`; the rest await its
    /// broadcast result. Errors are carried as `String` since `V`'s error
    /// type may not be `Clone`; callers map back to their own error type.
    ///
    /// The leader's computation is spawned onto its own task, so a caller
    /// deadline that cancels this `run` call (whether the caller is the
    /// leader or a follower) drops only the waiting future, never the
    /// in-flight computation itself (§4.2: "Single-flight login leaders are
    /// NOT cancelled by a follower's timeout").
    pub async fn run<F, Fut>(self: &Arc<Self>, key: K, f: F) -> Result<V, String>
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: std::future::Future<Output = Result<V, String>> + Send + 'static,
    {
        let mut guard = self.inflight.lock().await;
        if let Some(sender) = guard.get(&key) {
            let mut receiver = sender.subscribe();
            drop(guard);
            return match receiver.recv().await {
                Ok(result) => result,
                Err(_) => Err("single-flight leader dropped without a result".to_string()),
            };
        }

        let (sender, mut receiver) = broadcast::channel(1);
        guard.insert(key.clone(), sender.clone());
        drop(guard);

        let this = self.clone();
        let leader_key = key.clone();
        tokio::spawn(async move {
            let result = f().await;
            let mut guard = this.inflight.lock().await;
            guard.remove(&leader_key);
            drop(guard);
            // Ignore send errors: no followers subscribed is not an error here.
            let _ = sender.send(result);
        });

        match receiver.recv().await {
            Ok(result) => result,
            Err(_) => Err("single-flight leader dropped without a result".to_string()),
        }
    }
}
