//! Request/response correlation over an unordered stream
//!
//! The wire protocol has no request ids: a `getdata` for a block is
//! answered, eventually, by an unsolicited `block` message. The matcher
//! keys pending requests by content hash, fires the send action for the
//! first waiter, parks later waiters on the same key without re-sending,
//! and re-issues the send on a fixed interval until a response lands
//! (duplicate requests are harmless by protocol design).

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

struct Pending<V> {
    waiters: Vec<oneshot::Sender<V>>,
    resend: JoinHandle<()>,
}

impl<V> Drop for Pending<V> {
    fn drop(&mut self) {
        self.resend.abort();
    }
}

/// Correlates `demand(key)` calls with later `got_response(key, value)`
/// deliveries.
pub struct ReplyMatcher<K, V> {
    pending: Arc<Mutex<HashMap<K, Pending<V>>>>,
    send: Arc<dyn Fn(&K) + Send + Sync>,
    resend_interval: Duration,
}

impl<K, V> Clone for ReplyMatcher<K, V> {
    fn clone(&self) -> Self {
        Self {
            pending: Arc::clone(&self.pending),
            send: Arc::clone(&self.send),
            resend_interval: self.resend_interval,
        }
    }
}

impl<K, V> ReplyMatcher<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Clone + Send + 'static,
{
    pub fn new(
        resend_interval: Duration,
        send: impl Fn(&K) + Send + Sync + 'static,
    ) -> Self {
        Self {
            pending: Arc::new(Mutex::new(HashMap::new())),
            send: Arc::new(send),
            resend_interval,
        }
    }

    /// Wait for the response keyed by `key`, triggering the send action if
    /// this key has no pending entry yet.
    ///
    /// Returns `None` when the matcher is torn down (connection lost)
    /// before a response arrives.
    pub async fn demand(&self, key: K) -> Option<V> {
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.pending.lock().expect("matcher lock");
            if let Some(entry) = pending.get_mut(&key) {
                entry.waiters.push(tx);
            } else {
                (self.send)(&key);
                let resend = {
                    let send = Arc::clone(&self.send);
                    let key = key.clone();
                    let interval = self.resend_interval;
                    tokio::spawn(async move {
                        loop {
                            tokio::time::sleep(interval).await;
                            send(&key);
                        }
                    })
                };
                pending.insert(
                    key,
                    Pending {
                        waiters: vec![tx],
                        resend,
                    },
                );
            }
        }
        rx.await.ok()
    }

    /// Resolve every waiter currently parked on `key`.
    ///
    /// Responses for keys nobody asked about are dropped. Waiters arriving
    /// after this call start a fresh entry.
    pub fn got_response(&self, key: &K, value: V) {
        let entry = {
            let mut pending = self.pending.lock().expect("matcher lock");
            pending.remove(key)
        };
        if let Some(mut entry) = entry {
            for waiter in entry.waiters.drain(..) {
                let _ = waiter.send(value.clone());
            }
        }
    }

    /// Drop every pending entry, waking all parked waiters with `None`
    /// and stopping their resend timers. Called on connection loss.
    pub fn abandon(&self) {
        self.pending.lock().expect("matcher lock").clear();
    }

    #[cfg(test)]
    fn pending_len(&self) -> usize {
        self.pending.lock().expect("matcher lock").len()
    }

    #[cfg(test)]
    fn waiters_len(&self, key: &K) -> usize {
        self.pending
            .lock()
            .expect("matcher lock")
            .get(key)
            .map_or(0, |entry| entry.waiters.len())
    }
}
