//! Collapses concurrent calls for the same key into one execution.
//!
//! The first caller for a key becomes the leader and starts the work on its
//! own task; callers arriving before it settles subscribe to its outcome.
//! The work runs to completion even if every caller stops listening. The
//! check-and-register step happens under one lock with no await in between.

use std::collections::HashMap;
use std::future::Future;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::broadcast;

pub struct SingleFlight<K, V> {
    in_flight: Arc<Mutex<HashMap<K, broadcast::Sender<V>>>>,
}

impl<K, V> Default for SingleFlight<K, V> {
    fn default() -> Self {
        Self {
            in_flight: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

enum Role<V> {
    Leader(broadcast::Sender<V>),
    Waiter(broadcast::Receiver<V>),
}

/// Removes the in-flight entry when the work settles or its task panics.
struct LeaderGuard<K: Eq + Hash, V> {
    key: Option<K>,
    in_flight: Arc<Mutex<HashMap<K, broadcast::Sender<V>>>>,
}

impl<K: Eq + Hash, V> Drop for LeaderGuard<K, V> {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            self.in_flight
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(&key);
        }
    }
}

/// Outcome of `SingleFlight::run`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flight<V> {
    /// This caller executed the work.
    Led(V),
    /// This caller attached to someone else's execution.
    Joined(V),
    /// The work panicked before producing a value.
    Abandoned,
}

impl<K, V> SingleFlight<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone,
{
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<K, broadcast::Sender<V>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn is_in_flight(&self, key: &K) -> bool {
        self.lock().contains_key(key)
    }

    pub fn in_flight_count(&self) -> usize {
        self.lock().len()
    }

    /// Runs `work` unless an identical key is already in flight, in which
    /// case the existing execution's value is awaited instead. `work` is
    /// only constructed for the leader, and its future is spawned so that
    /// dropping the leader's caller does not cancel it.
    pub async fn run<F, Fut>(&self, key: K, work: F) -> Flight<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = V> + Send + 'static,
        K: Send + 'static,
        V: Send + 'static,
    {
        let role = {
            let mut guard = self.lock();
            match guard.get(&key) {
                Some(sender) => Role::Waiter(sender.subscribe()),
                None => {
                    let (sender, _) = broadcast::channel(1);
                    guard.insert(key.clone(), sender.clone());
                    Role::Leader(sender)
                }
            }
        };

        match role {
            Role::Waiter(mut receiver) => {
                crate::metrics::single_flight_joined();
                match receiver.recv().await {
                    Ok(value) => Flight::Joined(value),
                    Err(_) => Flight::Abandoned,
                }
            }
            Role::Leader(sender) => {
                let mut leader = LeaderGuard {
                    key: Some(key),
                    in_flight: self.in_flight.clone(),
                };
                let pending = work();
                let task = tokio::spawn(async move {
                    let value = pending.await;
                    // unregister and publish under the same lock so no
                    // waiter can subscribe after the send
                    {
                        let mut guard = leader
                            .in_flight
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner);
                        if let Some(key) = leader.key.take() {
                            guard.remove(&key);
                        }
                        let _ = sender.send(value.clone());
                    }
                    value
                });
                match task.await {
                    Ok(value) => Flight::Led(value),
                    Err(_) => Flight::Abandoned,
                }
            }
        }
    }
}

impl<V> Flight<V> {
    pub fn into_value(self) -> Option<V> {
        match self {
            Flight::Led(value) | Flight::Joined(value) => Some(value),
            Flight::Abandoned => None,
        }
    }

    pub fn joined(&self) -> bool {
        matches!(self, Flight::Joined(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn concurrent_callers_share_one_execution() {
        let flights: Arc<SingleFlight<String, Arc<u32>>> = Arc::new(SingleFlight::new());
        let calls = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let flights = flights.clone();
            let calls = calls.clone();
            handles.push(tokio::spawn(async move {
                flights
                    .run("audi|a3|2020".to_string(), || async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(50)).await;
                        Arc::new(42)
                    })
                    .await
            }));
        }

        let mut results = Vec::new();
        for handle in handles {
            results.push(handle.await.unwrap());
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(results.iter().filter(|f| !f.joined()).count(), 1);
        let values: Vec<Arc<u32>> = results.into_iter().filter_map(Flight::into_value).collect();
        assert_eq!(values.len(), 8);
        assert!(values.iter().all(|v| Arc::ptr_eq(v, &values[0])));
        assert_eq!(flights.in_flight_count(), 0);
    }

    #[tokio::test]
    async fn distinct_keys_run_independently() {
        let flights: SingleFlight<&'static str, u32> = SingleFlight::new();
        let (a, b) = tokio::join!(
            flights.run("a", || async { 1 }),
            flights.run("b", || async { 2 })
        );
        assert_eq!(a, Flight::Led(1));
        assert_eq!(b, Flight::Led(2));
    }

    #[tokio::test]
    async fn entry_is_removed_after_settle_so_next_call_reruns() {
        let flights: SingleFlight<&'static str, Result<u32, String>> = SingleFlight::new();
        let first = flights.run("k", || async { Err("boom".to_string()) }).await;
        assert_eq!(first, Flight::Led(Err("boom".to_string())));
        assert!(!flights.is_in_flight(&"k"));
        let second = flights.run("k", || async { Ok(7) }).await;
        assert_eq!(second, Flight::Led(Ok(7)));
    }

    #[tokio::test(start_paused = true)]
    async fn work_outlives_an_aborted_leader() {
        let flights: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let leader = {
            let flights = flights.clone();
            tokio::spawn(async move {
                flights
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                        1
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert!(flights.is_in_flight(&"k"));

        let waiter = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.run("k", || async { 2 }).await })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        leader.abort();
        assert_eq!(waiter.await.unwrap(), Flight::Joined(1));
        assert!(!flights.is_in_flight(&"k"));
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_work_releases_waiters() {
        let flights: Arc<SingleFlight<&'static str, u32>> = Arc::new(SingleFlight::new());
        let leader = {
            let flights = flights.clone();
            tokio::spawn(async move {
                flights
                    .run("k", || async {
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        None::<u32>.expect("valuation blew up")
                    })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(1)).await;
        let waiter = {
            let flights = flights.clone();
            tokio::spawn(async move { flights.run("k", || async { 2 }).await })
        };
        assert_eq!(leader.await.unwrap(), Flight::Abandoned);
        assert_eq!(waiter.await.unwrap(), Flight::Abandoned);
        assert!(!flights.is_in_flight(&"k"));

        let rerun = flights.run("k", || async { 3 }).await;
        assert_eq!(rerun, Flight::Led(3));
    }
}
