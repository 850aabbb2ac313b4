//! Registry Module Tests
//!
//! ## Test Scopes
//! - **Minting**: sequential ids, skipping taken ids, wrap-around past `max_id`.
//! - **Validation**: id ranges, key syntax and whitespace, wrong-type keys.

#[cfg(test)]
mod tests {
    use crate::config::MapConfig;
    use crate::error::MapError;
    use crate::registry::{KeyRegistry, MapKey, COUNTER_KEY};
    use crate::store::{Backend, MemoryBackend};
    use std::sync::Arc;
    use std::time::Duration;

    fn registry_with_max(max_id: u64) -> (MemoryBackend, KeyRegistry) {
        let backend = MemoryBackend::default();
        let config = MapConfig {
            max_id,
            ..MapConfig::default()
        };
        let registry = KeyRegistry::new(Arc::new(backend.clone()), &config).unwrap();
        (backend, registry)
    }

    async fn occupy(backend: &MemoryBackend, key: &MapKey) {
        let mut session = backend.session().await.unwrap();
        session.hset(&key.to_string(), "f", "v").await.unwrap();
    }

    // ============================================================
    // MINTING
    // ============================================================

    #[tokio::test]
    async fn test_mint_returns_sequential_ids() {
        let (_backend, registry) = registry_with_max(100);

        let first = registry.mint().await.unwrap();
        let second = registry.mint().await.unwrap();

        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 2);
        assert_eq!(first.to_string(), "redis-map:1");
    }

    #[tokio::test]
    async fn test_mint_skips_ids_already_in_use() {
        // ARRANGE: someone attached to id 2 explicitly
        let (backend, registry) = registry_with_max(100);
        occupy(&backend, &registry.validate_id(2).unwrap()).await;

        // ACT
        let first = registry.mint().await.unwrap();
        let second = registry.mint().await.unwrap();

        // ASSERT
        assert_eq!(first.id(), 1);
        assert_eq!(second.id(), 3);
    }

    #[tokio::test]
    async fn test_mint_wraps_around_after_max_id() {
        let (backend, registry) = registry_with_max(3);

        let ids: Vec<u64> = {
            let mut ids = Vec::new();
            for _ in 0..3 {
                ids.push(registry.mint().await.unwrap().id());
            }
            ids
        };
        assert_eq!(ids, vec![1, 2, 3]);

        // Keep id 1 alive so the wrapped counter has to skip it.
        occupy(&backend, &registry.validate_id(1).unwrap()).await;

        let wrapped = registry.mint().await.unwrap();
        assert_eq!(wrapped.id(), 2);
    }

    #[tokio::test]
    async fn test_mint_refreshes_counter_expiration() {
        let (backend, registry) = registry_with_max(100);

        registry.mint().await.unwrap();

        let ttl = backend.ttl(COUNTER_KEY).await.unwrap();
        assert!(ttl <= Duration::from_secs(300));
        assert!(ttl > Duration::from_secs(290));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_mints_are_unique() {
        let (_backend, registry) = registry_with_max(1_000);
        let registry = Arc::new(registry);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                let mut ids = Vec::new();
                for _ in 0..20 {
                    ids.push(registry.mint().await.unwrap().id());
                }
                ids
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            all.extend(handle.await.unwrap());
        }
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 160);
    }

    // ============================================================
    // VALIDATION
    // ============================================================

    #[test]
    fn test_validate_id_range() {
        let backend = MemoryBackend::default();
        let registry = KeyRegistry::new(Arc::new(backend), &MapConfig::default()).unwrap();

        assert!(registry.validate_id(1).is_ok());
        assert!(registry.validate_id(i32::MAX as i64).is_ok());
        assert!(matches!(registry.validate_id(0), Err(MapError::Validation(_))));
        assert!(matches!(registry.validate_id(-5), Err(MapError::Validation(_))));
        assert!(matches!(
            registry.validate_id(i32::MAX as i64 + 1),
            Err(MapError::Validation(_))
        ));
    }

    #[test]
    fn test_parse_key_accepts_trimmed_keys() {
        let backend = MemoryBackend::default();
        let registry = KeyRegistry::new(Arc::new(backend), &MapConfig::default()).unwrap();

        assert_eq!(registry.parse_key("redis-map:42").unwrap().id(), 42);
        assert_eq!(registry.parse_key("  redis-map:7\n").unwrap().id(), 7);
    }

    #[test]
    fn test_parse_key_rejects_malformed_keys() {
        let backend = MemoryBackend::default();
        let registry = KeyRegistry::new(Arc::new(backend), &MapConfig::default()).unwrap();

        for raw in [
            "",
            "redis-map",
            "redis-map:",
            "redis-map:abc",
            "redis-map:-1",
            "redis-map:0",
            "other:5",
            "redis-map:5:extra",
            "redis-map:99999999999999999999999",
        ] {
            assert!(
                matches!(registry.parse_key(raw), Err(MapError::Validation(_))),
                "'{}' should be rejected",
                raw
            );
        }
    }

    #[test]
    fn test_parse_key_rejects_non_ascii_digits() {
        let backend = MemoryBackend::default();
        let registry = KeyRegistry::new(Arc::new(backend), &MapConfig::default()).unwrap();

        match registry.parse_key("redis-map:\u{0663}") {
            Err(MapError::Validation(message)) => {
                assert!(message.contains("does not match"), "{}", message)
            }
            other => panic!("expected a syntax error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_validate_key_rejects_non_canonical_spellings() {
        // ARRANGE: another client wrote a hash under a zero-padded key
        let (backend, registry) = registry_with_max(100);
        let mut session = backend.session().await.unwrap();
        session.hset("redis-map:007", "a", "1").await.unwrap();
        drop(session);

        // ACT
        let padded = registry.validate_key("redis-map:007").await;
        let wide = registry.validate_key(" redis-map:0042 ").await;

        // ASSERT: refused rather than silently redirected to redis-map:7
        for result in [padded, wide] {
            match result {
                Err(MapError::Validation(message)) => {
                    assert!(message.contains("canonical"), "{}", message)
                }
                other => panic!("expected a validation error, got {:?}", other),
            }
        }
        assert_eq!(registry.validate_key("redis-map:7").await.unwrap().id(), 7);
    }

    #[tokio::test]
    async fn test_validate_key_accepts_missing_and_hash_keys() {
        let (backend, registry) = registry_with_max(100);
        occupy(&backend, &registry.validate_id(5).unwrap()).await;

        assert!(registry.validate_key("redis-map:5").await.is_ok());
        assert!(registry.validate_key("redis-map:6").await.is_ok());
    }

    #[tokio::test]
    async fn test_validate_key_rejects_wrong_type() {
        let (backend, registry) = registry_with_max(100);
        backend.insert_string("redis-map:9", "not a hash").await;

        let by_key = registry.validate_key("redis-map:9").await;
        let by_id = registry.validate_existing_id(9).await;

        assert!(matches!(by_key, Err(MapError::Validation(_))));
        assert!(matches!(by_id, Err(MapError::Validation(_))));
    }
}
