//! Field Store Module Tests
//!
//! ## Test Scopes
//! - **Decision rules**: the present/absent table of every operation, checked on
//!   the pure rules.
//! - **Store round-trips**: the same operations through WATCH/MULTI/EXEC against
//!   the in-process backend, including null keys and values.
//! - **Conflicts**: a competing write between read and commit forces a retry;
//!   `compute_if_absent` still calls its mapping once.
//! - **Bulk operations**: `put_all`, `remove_all`, `clear`, size accounting.
//! - **Recovery**: writes into a vanished hash bring back its marker and
//!   expiration; an aborted unwatched commit is retried, not dropped.

#[cfg(test)]
mod tests {
    use crate::config::MapConfig;
    use crate::error::{MapError, StoreResult};
    use crate::fields::rules::{self, Step};
    use crate::fields::{FieldStore, Value, EMPTY_FIELD_TOKEN, NULL_TOKEN};
    use crate::registry::KeyRegistry;
    use crate::store::{Backend, Commit, KeyType, MemoryBackend, ScanPage, Session, WriteOp};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    fn s(v: &str) -> Value {
        Some(v.to_string())
    }

    async fn new_store() -> (MemoryBackend, FieldStore) {
        let backend = MemoryBackend::default();
        let shared: Arc<dyn Backend> = Arc::new(backend.clone());
        let registry = KeyRegistry::new(shared.clone(), &MapConfig::default()).unwrap();
        let key = registry.mint().await.unwrap();
        let store = FieldStore::new(shared, &key, Duration::from_secs(30));
        store.initialize().await.unwrap();
        (backend, store)
    }

    /// Runs `write` from a separate session, blocking the calling closure.
    fn interfere(backend: &MemoryBackend, key: &str, field: &str) {
        let backend = backend.clone();
        let key = key.to_string();
        let field = field.to_string();
        tokio::task::block_in_place(|| {
            tokio::runtime::Handle::current().block_on(async move {
                let mut session = backend.session().await.unwrap();
                session.hset(&key, &field, "interference").await.unwrap();
            })
        });
    }

    // ============================================================
    // DECISION RULES: compute family
    // ============================================================

    struct ComputeCase {
        name: &'static str,
        current: Option<Value>,
        produced: Value,
        expected: Step<Value>,
    }

    #[test]
    fn test_compute_rules_table() {
        let cases = vec![
            ComputeCase {
                name: "compute absent -> value",
                current: None,
                produced: s("new"),
                expected: Step::Write(s("new"), s("new")),
            },
            ComputeCase {
                name: "compute absent -> none",
                current: None,
                produced: None,
                expected: Step::Keep(None),
            },
            ComputeCase {
                name: "compute present -> value",
                current: Some(s("old")),
                produced: s("new"),
                expected: Step::Write(s("new"), s("new")),
            },
            ComputeCase {
                name: "compute present -> none",
                current: Some(s("old")),
                produced: None,
                expected: Step::Delete(None),
            },
        ];

        for case in cases {
            let produced = case.produced.clone();
            let step = rules::compute(case.current, |_| produced);
            assert_eq!(step, case.expected, "{}", case.name);
        }
    }

    #[test]
    fn test_compute_if_absent_rules_table() {
        let cases = vec![
            ComputeCase {
                name: "absent -> value",
                current: None,
                produced: s("new"),
                expected: Step::Write(s("new"), s("new")),
            },
            ComputeCase {
                name: "absent -> none",
                current: None,
                produced: None,
                expected: Step::Keep(None),
            },
            ComputeCase {
                name: "present -> value",
                current: Some(s("old")),
                produced: s("new"),
                expected: Step::Keep(s("old")),
            },
            ComputeCase {
                name: "present -> none",
                current: Some(s("old")),
                produced: None,
                expected: Step::Keep(s("old")),
            },
        ];

        for case in cases {
            let produced = case.produced.clone();
            let step = rules::compute_if_absent(case.current, || produced);
            assert_eq!(step, case.expected, "{}", case.name);
        }
    }

    #[test]
    fn test_compute_if_present_rules_table() {
        let cases = vec![
            ComputeCase {
                name: "absent -> value",
                current: None,
                produced: s("new"),
                expected: Step::Keep(None),
            },
            ComputeCase {
                name: "absent -> none",
                current: None,
                produced: None,
                expected: Step::Keep(None),
            },
            ComputeCase {
                name: "present -> value",
                current: Some(s("old")),
                produced: s("new"),
                expected: Step::Write(s("new"), s("new")),
            },
            ComputeCase {
                name: "present -> none",
                current: Some(s("old")),
                produced: None,
                expected: Step::Delete(None),
            },
        ];

        for case in cases {
            let produced = case.produced.clone();
            let step = rules::compute_if_present(case.current, |_| produced);
            assert_eq!(step, case.expected, "{}", case.name);
        }
    }

    #[test]
    fn test_merge_rules_table() {
        let cases = vec![
            ComputeCase {
                name: "absent -> given value, remapping ignored",
                current: None,
                produced: s("unused"),
                expected: Step::Write(s("v"), s("v")),
            },
            ComputeCase {
                name: "absent, remapping would yield none",
                current: None,
                produced: None,
                expected: Step::Write(s("v"), s("v")),
            },
            ComputeCase {
                name: "present -> remapped",
                current: Some(s("old")),
                produced: s("old+v"),
                expected: Step::Write(s("old+v"), s("old+v")),
            },
            ComputeCase {
                name: "present -> none deletes",
                current: Some(s("old")),
                produced: None,
                expected: Step::Delete(None),
            },
        ];

        for case in cases {
            let produced = case.produced.clone();
            let step = rules::merge(case.current, "v", |_, _| produced);
            assert_eq!(step, case.expected, "{}", case.name);
        }
    }

    #[test]
    fn test_null_mapping_counts_as_absent() {
        let null_present: Option<Value> = Some(None);

        assert_eq!(
            rules::compute_if_absent(null_present.clone(), || s("x")),
            Step::Write(s("x"), s("x"))
        );
        assert_eq!(
            rules::compute_if_present(null_present.clone(), |_| s("x")),
            Step::Keep(None)
        );
        assert_eq!(
            rules::merge(null_present.clone(), "v", |_, _| s("x")),
            Step::Write(s("v"), s("v"))
        );
        assert_eq!(
            rules::put_if_absent(null_present.clone(), s("x")),
            Step::Write(s("x"), Some(None))
        );
        // compute removes an existing null mapping when it yields nothing
        assert_eq!(rules::compute(null_present, |_| None), Step::Delete(None));
    }

    // ============================================================
    // DECISION RULES: point writes
    // ============================================================

    #[test]
    fn test_point_write_rules() {
        assert_eq!(rules::put(None, s("v")), Step::Write(s("v"), None));
        assert_eq!(
            rules::put(Some(s("old")), s("v")),
            Step::Write(s("v"), Some(s("old")))
        );

        assert_eq!(rules::put_if_absent(None, s("v")), Step::Write(s("v"), None));
        assert_eq!(
            rules::put_if_absent(Some(s("old")), s("v")),
            Step::Keep(Some(s("old")))
        );

        assert_eq!(rules::remove(None), Step::Keep(None));
        assert_eq!(rules::remove(Some(s("old"))), Step::Delete(Some(s("old"))));

        assert_eq!(rules::remove_if(None, &s("old")), Step::Keep(false));
        assert_eq!(rules::remove_if(Some(s("old")), &s("old")), Step::Delete(true));
        assert_eq!(rules::remove_if(Some(s("old")), &s("other")), Step::Keep(false));

        assert_eq!(rules::replace(None, s("v")), Step::Keep(None));
        assert_eq!(
            rules::replace(Some(s("old")), s("v")),
            Step::Write(s("v"), Some(s("old")))
        );

        assert_eq!(rules::replace_if(None, &s("old"), s("v")), Step::Keep(false));
        assert_eq!(
            rules::replace_if(Some(s("old")), &s("old"), s("v")),
            Step::Write(s("v"), true)
        );
        assert_eq!(
            rules::replace_if(Some(s("old")), &s("x"), s("v")),
            Step::Keep(false)
        );
        assert!(!*rules::replace_if(Some(None), &s("x"), s("v")).result());
    }

    // ============================================================
    // STORE ROUND-TRIPS
    // ============================================================

    #[tokio::test]
    async fn test_put_get_roundtrip_with_nulls() {
        let (backend, store) = new_store().await;

        assert_eq!(store.put(Some("a"), Some("1")).await.unwrap(), None);
        assert_eq!(store.put(None, Some("null-key")).await.unwrap(), None);
        assert_eq!(store.put(Some("b"), None).await.unwrap(), None);

        assert_eq!(store.get(Some("a")).await.unwrap(), Some(s("1")));
        assert_eq!(store.get(None).await.unwrap(), Some(s("null-key")));
        assert_eq!(store.get(Some("b")).await.unwrap(), Some(None));
        assert_eq!(store.get(Some("missing")).await.unwrap(), None);

        // The sentinel is what actually lands in the hash.
        let mut session = backend.session().await.unwrap();
        assert_eq!(
            session.hget(store.key(), NULL_TOKEN).await.unwrap(),
            Some("null-key".to_string())
        );
        assert_eq!(
            session.hget(store.key(), "b").await.unwrap(),
            Some(NULL_TOKEN.to_string())
        );
    }

    #[tokio::test]
    async fn test_put_returns_previous_value() {
        let (_backend, store) = new_store().await;

        store.put(Some("a"), Some("1")).await.unwrap();
        let previous = store.put(Some("a"), Some("2")).await.unwrap();

        assert_eq!(previous, Some(s("1")));
        assert_eq!(store.get(Some("a")).await.unwrap(), Some(s("2")));
    }

    #[tokio::test]
    async fn test_conditional_writes() {
        let (_backend, store) = new_store().await;
        store.put(Some("a"), Some("1")).await.unwrap();

        assert_eq!(
            store.put_if_absent(Some("a"), Some("2")).await.unwrap(),
            Some(s("1"))
        );
        assert_eq!(store.put_if_absent(Some("b"), Some("2")).await.unwrap(), None);

        assert!(!store.replace_if(Some("a"), Some("x"), Some("3")).await.unwrap());
        assert!(store.replace_if(Some("a"), Some("1"), Some("3")).await.unwrap());
        assert_eq!(store.replace(Some("zzz"), Some("3")).await.unwrap(), None);
        assert!(!store.contains_key(Some("zzz")).await.unwrap());

        assert!(!store.remove_if(Some("a"), Some("1")).await.unwrap());
        assert!(store.remove_if(Some("a"), Some("3")).await.unwrap());
        assert_eq!(store.remove(Some("b")).await.unwrap(), Some(s("2")));
        assert_eq!(store.remove(Some("b")).await.unwrap(), None);

        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_compute_family_through_store() {
        let (_backend, store) = new_store().await;

        let created = store
            .compute(Some("n"), |_, old| {
                Some((old.map(|v| v.parse::<i32>().unwrap()).unwrap_or(0) + 1).to_string())
            })
            .await
            .unwrap();
        assert_eq!(created, s("1"));

        let bumped = store
            .compute_if_present(Some("n"), |_, old| {
                Some((old.parse::<i32>().unwrap() + 10).to_string())
            })
            .await
            .unwrap();
        assert_eq!(bumped, s("11"));

        let untouched = store
            .compute_if_absent(Some("n"), |_| s("ignored"))
            .await
            .unwrap();
        assert_eq!(untouched, s("11"));

        let merged = store
            .merge(Some("n"), Some("5"), |old, v| Some(format!("{}+{}", old, v)))
            .await
            .unwrap();
        assert_eq!(merged, s("11+5"));

        let removed = store.compute(Some("n"), |_, _| None).await.unwrap();
        assert_eq!(removed, None);
        assert!(!store.contains_key(Some("n")).await.unwrap());
    }

    #[tokio::test]
    async fn test_compute_if_absent_passes_key_to_mapping() {
        let (_backend, store) = new_store().await;

        let value = store
            .compute_if_absent(Some("k"), |key| key.map(|k| k.to_uppercase()))
            .await
            .unwrap();

        assert_eq!(value, s("K"));
        assert_eq!(store.get(Some("k")).await.unwrap(), Some(s("K")));
    }

    #[tokio::test]
    async fn test_merge_rejects_null_value() {
        let (_backend, store) = new_store().await;

        let result = store.merge(Some("k"), None, |_, _| None).await;

        assert!(matches!(result, Err(MapError::NullArgument("value"))));
    }

    // ============================================================
    // CONFLICTS
    // ============================================================

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_conflicting_write_triggers_retry() {
        // ARRANGE
        let (backend, store) = new_store().await;
        let key = store.key().to_string();
        let calls = AtomicUsize::new(0);

        // ACT: the first remapping call writes another field behind our back
        let result = store
            .compute(Some("counter"), |_, old| {
                if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    interfere(&backend, &key, "other");
                }
                Some(format!("{}!", old.unwrap_or("")))
            })
            .await
            .unwrap();

        // ASSERT: second attempt committed
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(result, s("!"));
        assert_eq!(store.size().await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_compute_if_absent_mapping_runs_once_across_retries() {
        let (backend, store) = new_store().await;
        let key = store.key().to_string();
        let calls = AtomicUsize::new(0);

        let result = store
            .compute_if_absent(Some("lazy"), |_| {
                calls.fetch_add(1, Ordering::SeqCst);
                interfere(&backend, &key, "other");
                s("computed")
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result, s("computed"));
        assert_eq!(store.get(Some("lazy")).await.unwrap(), Some(s("computed")));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_competing_clear_causes_retry_not_error() {
        // The CAS loop never gives up; a clear between read and commit is
        // absorbed by one more attempt against the cleared hash.
        let (backend, store) = new_store().await;
        store.put(Some("a"), Some("1")).await.unwrap();
        let shared: Arc<dyn Backend> = Arc::new(backend.clone());
        let key = KeyRegistry::new(shared.clone(), &MapConfig::default())
            .unwrap()
            .parse_key(store.key())
            .unwrap();
        let other = FieldStore::new(shared, &key, Duration::from_secs(30));
        let seen = std::sync::Mutex::new(Vec::new());

        let result = store
            .compute(Some("a"), |_, old| {
                let mut seen = seen.lock().unwrap();
                seen.push(old.map(str::to_string));
                if seen.len() == 1 {
                    tokio::task::block_in_place(|| {
                        tokio::runtime::Handle::current()
                            .block_on(other.clear())
                            .unwrap()
                    });
                }
                Some("2".to_string())
            })
            .await
            .unwrap();

        assert_eq!(result, s("2"));
        assert_eq!(*seen.lock().unwrap(), vec![s("1"), None]);
        assert_eq!(store.size().await.unwrap(), 1);
    }

    // ============================================================
    // BULK OPERATIONS AND SIZE
    // ============================================================

    #[tokio::test]
    async fn test_size_excludes_marker() {
        let (backend, store) = new_store().await;
        assert_eq!(store.size().await.unwrap(), 0);

        store
            .put_all(&[
                (s("a"), s("1")),
                (s("b"), None),
                (None, s("3")),
            ])
            .await
            .unwrap();
        assert_eq!(store.size().await.unwrap(), 3);

        let removed = store.remove_all(&[s("a"), None, s("missing")]).await.unwrap();
        assert_eq!(removed, 2);
        assert_eq!(store.size().await.unwrap(), 1);

        let mut session = backend.session().await.unwrap();
        assert!(session.hexists(store.key(), EMPTY_FIELD_TOKEN).await.unwrap());
    }

    #[tokio::test]
    async fn test_size_floors_at_zero_without_marker() {
        let (backend, store) = new_store().await;
        let mut session = backend.session().await.unwrap();
        session.del(store.key()).await.unwrap();

        assert_eq!(store.size().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_clear_keeps_marker_and_ttl() {
        let (backend, store) = new_store().await;
        store.put(Some("a"), Some("1")).await.unwrap();

        store.clear().await.unwrap();

        assert_eq!(store.size().await.unwrap(), 0);
        assert!(!store.contains_key(Some("a")).await.unwrap());
        let ttl = backend.ttl(store.key()).await.unwrap();
        assert!(ttl <= Duration::from_secs(30));
    }

    // ============================================================
    // RECOVERY
    // ============================================================

    #[tokio::test]
    async fn test_write_into_vanished_hash_restores_marker_and_ttl() {
        // ARRANGE: the hash expired while the store was still in use
        let (backend, store) = new_store().await;
        let mut session = backend.session().await.unwrap();
        session.del(store.key()).await.unwrap();
        drop(session);

        // ACT
        store.put(Some("a"), Some("1")).await.unwrap();

        // ASSERT
        assert_eq!(store.size().await.unwrap(), 1);
        let mut session = backend.session().await.unwrap();
        assert!(session.hexists(store.key(), EMPTY_FIELD_TOKEN).await.unwrap());
        drop(session);
        assert!(backend.ttl(store.key()).await.is_some());
    }

    #[tokio::test]
    async fn test_put_all_into_vanished_hash_restores_marker_and_ttl() {
        let (backend, store) = new_store().await;
        let mut session = backend.session().await.unwrap();
        session.del(store.key()).await.unwrap();
        drop(session);

        store
            .put_all(&[(s("a"), s("1")), (s("b"), s("2"))])
            .await
            .unwrap();

        assert_eq!(store.size().await.unwrap(), 2);
        assert!(backend.ttl(store.key()).await.is_some());
    }

    /// Delegates to a [`MemoryBackend`] but reports the next `pending` commits
    /// as aborted without applying them, as a connection with a leftover
    /// watch would.
    struct AbortingBackend {
        inner: MemoryBackend,
        pending: Arc<AtomicUsize>,
    }

    struct AbortingSession {
        inner: Box<dyn Session>,
        pending: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Backend for AbortingBackend {
        async fn session(&self) -> StoreResult<Box<dyn Session>> {
            Ok(Box::new(AbortingSession {
                inner: self.inner.session().await?,
                pending: self.pending.clone(),
            }))
        }

        fn describe(&self) -> String {
            "aborting".to_string()
        }
    }

    #[async_trait]
    impl Session for AbortingSession {
        async fn hget(&mut self, key: &str, field: &str) -> StoreResult<Option<String>> {
            self.inner.hget(key, field).await
        }

        async fn hset(&mut self, key: &str, field: &str, value: &str) -> StoreResult<()> {
            self.inner.hset(key, field, value).await
        }

        async fn hset_multiple(&mut self, key: &str, pairs: &[(String, String)]) -> StoreResult<()> {
            self.inner.hset_multiple(key, pairs).await
        }

        async fn hdel(&mut self, key: &str, fields: &[String]) -> StoreResult<u64> {
            self.inner.hdel(key, fields).await
        }

        async fn hexists(&mut self, key: &str, field: &str) -> StoreResult<bool> {
            self.inner.hexists(key, field).await
        }

        async fn hlen(&mut self, key: &str) -> StoreResult<u64> {
            self.inner.hlen(key).await
        }

        async fn hscan(&mut self, key: &str, cursor: u64, count: usize) -> StoreResult<ScanPage> {
            self.inner.hscan(key, cursor, count).await
        }

        async fn exists(&mut self, key: &str) -> StoreResult<bool> {
            self.inner.exists(key).await
        }

        async fn key_type(&mut self, key: &str) -> StoreResult<KeyType> {
            self.inner.key_type(key).await
        }

        async fn expire(&mut self, key: &str, ttl: Duration) -> StoreResult<bool> {
            self.inner.expire(key, ttl).await
        }

        async fn incr(&mut self, key: &str) -> StoreResult<i64> {
            self.inner.incr(key).await
        }

        async fn get(&mut self, key: &str) -> StoreResult<Option<String>> {
            self.inner.get(key).await
        }

        async fn del(&mut self, key: &str) -> StoreResult<bool> {
            self.inner.del(key).await
        }

        async fn watch(&mut self, key: &str) -> StoreResult<()> {
            self.inner.watch(key).await
        }

        async fn unwatch(&mut self) -> StoreResult<()> {
            self.inner.unwatch().await
        }

        async fn exec(&mut self, ops: &[WriteOp]) -> StoreResult<Commit> {
            let take = self
                .pending
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
            if take.is_ok() {
                self.inner.unwatch().await?;
                return Ok(Commit::Aborted);
            }
            self.inner.exec(ops).await
        }
    }

    #[tokio::test]
    async fn test_clear_retries_an_aborted_commit() {
        // ARRANGE
        let memory = MemoryBackend::default();
        let pending = Arc::new(AtomicUsize::new(0));
        let backend: Arc<dyn Backend> = Arc::new(AbortingBackend {
            inner: memory.clone(),
            pending: pending.clone(),
        });
        let key = KeyRegistry::new(backend.clone(), &MapConfig::default())
            .unwrap()
            .validate_id(1)
            .unwrap();
        let store = FieldStore::new(backend, &key, Duration::from_secs(30));
        store.initialize().await.unwrap();
        store.put(Some("a"), Some("1")).await.unwrap();

        // ACT: the first commit of the clear is lost
        pending.store(1, Ordering::Release);
        store.clear().await.unwrap();

        // ASSERT
        assert_eq!(pending.load(Ordering::Acquire), 0);
        assert!(!store.contains_key(Some("a")).await.unwrap());
        assert_eq!(store.size().await.unwrap(), 0);
        assert!(memory.ttl(store.key()).await.is_some());
    }
}
