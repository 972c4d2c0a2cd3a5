//! Property-based tests (fuzzing) for record handling and the read path.
//!
//! Uses proptest to generate random/malformed inputs and verify that
//! decoding only returns clean errors and that reads always produce a record.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use proptest::prelude::*;

use record_sync::storage::memory::{InMemoryCache, InMemoryDurable};
use record_sync::storage::sql::SqlStore;
use record_sync::{
    CacheStore, DurableStore, QuizRecord, StaticAdmins, SyncConfig, SyncCoordinator, UserRecord,
    UserStatus,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn status_strategy() -> impl Strategy<Value = UserStatus> {
    prop::sample::select(UserStatus::ALL.to_vec())
}

fn user_strategy() -> impl Strategy<Value = UserRecord> {
    (
        any::<i64>(),
        "[a-zA-Z ]{0,20}",
        any::<bool>(),
        any::<u32>(),
        status_strategy(),
        any::<bool>(),
        0..=i64::MAX as u64,
        prop::option::of((0i64..4_000_000_000, 0u32..1_000_000_000)),
    )
        .prop_map(|(id, name, is_admin, warns, status, is_winner, messages, mute)| {
            let mut user = UserRecord::new(id, is_admin);
            user.first_name = name;
            user.warns = warns;
            user.status = status;
            user.is_winner = is_winner;
            user.message_count = messages;
            user.mute_until = mute.and_then(|(secs, nanos)| DateTime::from_timestamp(secs, nanos));
            user
        })
}

fn date_strategy() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

fn coordinator(admins: &[i64]) -> (SyncCoordinator, Arc<InMemoryCache>, Arc<InMemoryDurable>) {
    let cache = Arc::new(InMemoryCache::new());
    let durable = Arc::new(InMemoryDurable::new());
    let coordinator = SyncCoordinator::new(
        SyncConfig { sync_retry_delay_ms: 1, ..Default::default() },
        cache.clone(),
        durable.clone(),
        Arc::new(StaticAdmins::new(admins.iter().copied())),
    );
    (coordinator, cache, durable)
}

// =============================================================================
// Decoding Fuzz Tests
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn fuzz_user_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2000)) {
        // Must not panic; errors are fine
        let _ = UserRecord::from_bytes(&bytes);
    }

    #[test]
    fn fuzz_quiz_from_random_bytes(bytes in prop::collection::vec(any::<u8>(), 0..2000)) {
        let _ = QuizRecord::from_bytes(&bytes);
    }

    #[test]
    fn fuzz_status_from_arbitrary_text(text in ".{0,20}") {
        if let Ok(status) = text.parse::<UserStatus>() {
            prop_assert_eq!(status.as_str(), text.as_str());
        }
    }

    #[test]
    fn fuzz_truncated_user_is_decode_error(user in user_strategy(), cut in 1usize..64) {
        let bytes = user.to_bytes().unwrap();
        let cut = cut.min(bytes.len());
        let result = UserRecord::from_bytes(&bytes[..bytes.len() - cut]);
        prop_assert!(result.is_err());
        prop_assert!(result.unwrap_err().is_miss());
    }
}

// =============================================================================
// Record Invariants
// =============================================================================

proptest! {
    #[test]
    fn prop_warns_never_negative(
        start in 0u32..1000,
        deltas in prop::collection::vec(-50i64..50, 0..40),
    ) {
        let mut user = UserRecord::new(1, false);
        user.warns = start;
        let mut expected = i64::from(start);
        for delta in deltas {
            user.apply_warning_delta(delta);
            expected = (expected + delta).max(0);
            prop_assert_eq!(i64::from(user.warns), expected);
        }
    }

    #[test]
    fn prop_warns_saturate_at_extremes(start in any::<u32>(), delta in any::<i64>()) {
        let mut user = UserRecord::new(1, false);
        user.warns = start;
        user.apply_warning_delta(delta);
        let expected = (i64::from(start) as i128 + delta as i128).clamp(0, u32::MAX as i128);
        prop_assert_eq!(user.warns as i128, expected);
    }

    #[test]
    fn prop_reconcile_admin_is_idempotent(user in user_strategy(), should_be_admin in any::<bool>()) {
        let mut user = user;
        let was = user.is_admin;
        prop_assert_eq!(user.reconcile_admin(should_be_admin), was != should_be_admin);
        prop_assert_eq!(user.is_admin, should_be_admin);
        prop_assert!(!user.reconcile_admin(should_be_admin));
    }

    #[test]
    fn prop_civil_date_matches_offset(
        offset_hours in -12i32..=14,
        secs in 0i64..4_000_000_000,
    ) {
        let config = SyncConfig { utc_offset_secs: offset_hours * 3600, ..Default::default() };
        let at = DateTime::<Utc>::from_timestamp(secs, 0).unwrap();
        let shifted = DateTime::<Utc>::from_timestamp(secs + i64::from(offset_hours) * 3600, 0).unwrap();
        prop_assert_eq!(config.civil_date(at), shifted.date_naive());
    }
}

// =============================================================================
// Coordinator Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_get_user_always_produces_record(
        id in any::<i64>(),
        garbage in prop::option::of(prop::collection::vec(any::<u8>(), 0..256)),
        is_admin in any::<bool>(),
    ) {
        let admins: Vec<i64> = if is_admin { vec![id] } else { Vec::new() };
        let (coordinator, cache, _durable) = coordinator(&admins);
        let user = runtime().block_on(async {
            if let Some(bytes) = &garbage {
                cache.set(&format!("user:{}", id), bytes, Duration::from_secs(60)).await.unwrap();
            }
            let user = coordinator.get_user(id).await;
            coordinator.shutdown().await;
            user
        });
        prop_assert_eq!(user.id, id);
        prop_assert_eq!(user.is_admin, is_admin);
    }

    #[test]
    fn prop_save_quiz_keeps_one_row_per_date(
        date in date_strategy(),
        quotes in prop::collection::vec("[a-z ]{1,30}", 1..6),
    ) {
        let (coordinator, _cache, durable) = coordinator(&[]);
        let last = runtime().block_on(async {
            let mut last = None;
            for quote in &quotes {
                let quiz = QuizRecord::new(date, quote.clone(), "answer", NaiveTime::MIN);
                coordinator.save_quiz(&quiz).await.unwrap();
                last = Some(quiz);
            }
            let stored = durable.get_quiz(date).await.unwrap();
            prop_assert_eq!(&stored, &last);
            Ok(coordinator.get_quiz(date).await.unwrap())
        })?;
        prop_assert_eq!(durable.quiz_count(), 1);
        prop_assert_eq!(last.map(|q| q.quote), quotes.last().cloned());
    }

    #[test]
    fn prop_saved_user_reaches_durable(user in user_strategy()) {
        let (coordinator, _cache, durable) = coordinator(&[]);
        let user = UserRecord { is_admin: false, ..user };
        let stored = runtime().block_on(async {
            coordinator.save_user(&user).await.unwrap();
            coordinator.wait_for_pending().await;
            durable.get_user(user.id).await.unwrap()
        });
        prop_assert_eq!(stored, Some(user));
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn prop_saved_user_reaches_sql_durable(user in user_strategy()) {
        let _ = std::fs::create_dir_all("temp");
        let path = std::path::PathBuf::from("temp").join("proptest_sql_durable.db");
        let remove = |path: &std::path::PathBuf| {
            let _ = std::fs::remove_file(path);
            let _ = std::fs::remove_file(format!("{}-wal", path.display()));
            let _ = std::fs::remove_file(format!("{}-shm", path.display()));
        };
        remove(&path);

        let user = UserRecord { is_admin: false, ..user };
        let stored = runtime().block_on(async {
            let url = format!("sqlite://{}?mode=rwc", path.display());
            let sql = Arc::new(SqlStore::new(&url).await.unwrap());
            let coordinator = SyncCoordinator::new(
                SyncConfig { sync_retry_delay_ms: 1, ..Default::default() },
                Arc::new(InMemoryCache::new()),
                sql.clone(),
                Arc::new(StaticAdmins::default()),
            );
            coordinator.save_user(&user).await.unwrap();
            coordinator.wait_for_pending().await;
            let stored = sql.get_user(user.id).await.unwrap();
            coordinator.shutdown().await;
            sql.close().await;
            stored
        });
        remove(&path);
        prop_assert_eq!(stored, Some(user));
    }
}
