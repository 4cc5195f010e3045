use async_trait::async_trait;
use lease_locker::logger::RecordingLogger;
use lease_locker::retry;
use lease_locker::{
    DeleteOutcome, InMemoryStore, LeaseStore, LockError, LockOption, LockOptions, Locker, StoreError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const KEY: &str = "lock";
const STORE_KEY: &str = "test:lock";

fn setup() -> (Arc<InMemoryStore>, Locker) {
    let store = Arc::new(InMemoryStore::new());
    let locker = Locker::builder()
        .shared_store(store.clone())
        .configure(|o| o.prefix = "test".to_string())
        .build()
        .unwrap();
    (store, locker)
}

/// Store that fails every call, standing in for a dropped connection.
struct UnreachableStore {
    calls: AtomicUsize,
}

#[async_trait]
impl LeaseStore for UnreachableStore {
    async fn set_if_absent(&self, _key: &str, _value: &str, _ttl: Duration) -> Result<bool, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn compare_and_extend(&self, _key: &str, _expected: &str, _ttl: Duration) -> Result<bool, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> Result<DeleteOutcome, StoreError> {
        Err(StoreError::Unavailable("connection refused".to_string()))
    }
}

/// Store whose deletes never answer.
struct StalledStore {
    inner: InMemoryStore,
}

#[async_trait]
impl LeaseStore for StalledStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.set_if_absent(key, value, ttl).await
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.compare_and_extend(key, expected, ttl).await
    }

    async fn compare_and_delete(&self, _key: &str, _expected: &str) -> Result<DeleteOutcome, StoreError> {
        futures::future::pending().await
    }
}

/// Store whose claims land immediately but answer late.
struct SlowClaimStore {
    inner: InMemoryStore,
}

#[async_trait]
impl LeaseStore for SlowClaimStore {
    async fn set_if_absent(&self, key: &str, value: &str, ttl: Duration) -> Result<bool, StoreError> {
        let claimed = self.inner.set_if_absent(key, value, ttl).await;
        tokio::time::sleep(Duration::from_secs(1)).await;
        claimed
    }

    async fn compare_and_extend(&self, key: &str, expected: &str, ttl: Duration) -> Result<bool, StoreError> {
        self.inner.compare_and_extend(key, expected, ttl).await
    }

    async fn compare_and_delete(&self, key: &str, expected: &str) -> Result<DeleteOutcome, StoreError> {
        self.inner.compare_and_delete(key, expected).await
    }
}

#[tokio::test]
async fn test_occupied_lock_returns_locked() {
    let (store, locker) = setup();
    store.put(STORE_KEY, "1", Duration::from_secs(60));

    let result = locker.obtain(&CancellationToken::new(), KEY, []).await;

    assert!(matches!(result, Err(LockError::Locked)));
    assert_eq!(store.get(STORE_KEY).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_cannot_release_someone_elses_lock() {
    let (store, locker) = setup();
    let lock = locker.obtain(&CancellationToken::new(), KEY, []).await.unwrap();

    store.put(STORE_KEY, "1", Duration::from_secs(60));

    assert!(lock.release().await.unwrap_err().is_not_held());
    assert_eq!(store.get(STORE_KEY).as_deref(), Some("1"));
}

#[tokio::test]
async fn test_cannot_release_twice() {
    let (_store, locker) = setup();
    let lock = locker.obtain(&CancellationToken::new(), KEY, []).await.unwrap();

    lock.release().await.unwrap();
    assert!(lock.release().await.unwrap_err().is_not_held());
}

#[tokio::test(start_paused = true)]
async fn test_auto_renewal_can_be_switched() {
    let (store, locker) = setup();
    let cancel = CancellationToken::new();

    let lock = locker
        .obtain(&cancel, KEY, [LockOption::ttl(Duration::from_secs(2))])
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(store.contains(STORE_KEY));
    lock.release().await.unwrap();

    let lock = locker
        .obtain(
            &cancel,
            KEY,
            [LockOption::auto_renew(false), LockOption::ttl(Duration::from_secs(2))],
        )
        .await
        .unwrap();
    assert!(!lock.is_renewing());
    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(lock.release().await.unwrap_err().is_not_held());
}

#[tokio::test(start_paused = true)]
async fn test_retry_succeeds_after_lease_lapses() {
    let (_store, locker) = setup();
    let cancel = CancellationToken::new();

    let first = locker
        .obtain(&cancel, KEY, [LockOption::ttl(Duration::from_millis(20))])
        .await
        .unwrap();

    let second = locker
        .obtain(
            &cancel,
            KEY,
            [
                LockOption::retry_strategy(retry::linear(Duration::from_millis(20))),
                LockOption::max_retries(3),
            ],
        )
        .await
        .unwrap();

    assert_ne!(first.token(), second.token());
    assert!(first.release().await.unwrap_err().is_not_held());
    second.release().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_retry_exhausts() {
    let (_store, locker) = setup();
    let cancel = CancellationToken::new();

    let first = locker
        .obtain(&cancel, KEY, [LockOption::ttl(Duration::from_secs(1))])
        .await
        .unwrap();

    let result = locker
        .obtain(
            &cancel,
            KEY,
            [
                LockOption::retry_strategy(retry::linear(Duration::from_millis(5))),
                LockOption::max_retries(2),
            ],
        )
        .await;

    assert!(matches!(result, Err(LockError::Locked)));
    first.release().await.unwrap();
}

#[tokio::test]
async fn test_retries_are_logged() {
    let (store, locker) = setup();
    store.put(STORE_KEY, "1", Duration::from_secs(60));
    let logger = Arc::new(RecordingLogger::new());

    let result = locker
        .obtain(
            &CancellationToken::new(),
            KEY,
            [
                LockOption::retry_strategy(retry::linear(Duration::from_millis(1))),
                LockOption::max_retries(2),
                LockOption::logger(logger.clone()),
            ],
        )
        .await;

    assert!(result.unwrap_err().is_locked());
    let lines = logger.lines();
    assert_eq!(lines.len(), 2);
    assert!(lines[1].1.contains("key=test:lock times=2 max_times=2"));
}

#[tokio::test]
async fn test_lock_released_after_with_lock() {
    let (store, locker) = setup();
    let cancel = CancellationToken::new();

    for i in 0..5 {
        let value = locker
            .with_lock(&cancel, KEY, [], |_| async move { Ok::<_, LockError>(i * 2) })
            .await
            .unwrap();
        assert_eq!(value, i * 2);
    }

    assert!(!store.contains(STORE_KEY));
    assert_eq!(locker.metrics().releases_total(), 5);
}

#[tokio::test]
async fn test_with_lock_returns_work_error_and_releases() {
    #[derive(Debug)]
    enum JobError {
        Lock(LockError),
        Failed(&'static str),
    }

    impl From<LockError> for JobError {
        fn from(e: LockError) -> Self {
            JobError::Lock(e)
        }
    }

    let (store, locker) = setup();
    let result: Result<(), JobError> = locker
        .with_lock(&CancellationToken::new(), KEY, [], |_| async {
            Err(JobError::Failed("boom"))
        })
        .await;

    assert!(matches!(result, Err(JobError::Failed("boom"))));
    assert!(!store.contains(STORE_KEY));
}

#[tokio::test]
async fn test_lock_released_after_panic() {
    let (store, locker) = setup();
    let cancel = CancellationToken::new();

    let panicking = locker.clone();
    let task_cancel = cancel.clone();
    let handle = tokio::spawn(async move {
        panicking
            .with_lock(&task_cancel, KEY, [], |_| async {
                if true {
                    panic!("err");
                }
                Ok::<_, LockError>(())
            })
            .await
    });
    assert!(handle.await.unwrap_err().is_panic());

    assert!(!store.contains(STORE_KEY));
    locker
        .with_lock(&cancel, KEY, [], |_| async { Ok::<_, LockError>(()) })
        .await
        .unwrap();
}

#[tokio::test]
async fn test_with_lock_surfaces_obtain_error() {
    let (_store, locker) = setup();
    let cancel = CancellationToken::new();
    let lock = locker.obtain(&cancel, KEY, []).await.unwrap();

    let ran = AtomicUsize::new(0);

    let result = locker
        .with_lock(&cancel, KEY, [], |_| async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok::<_, LockError>(())
        })
        .await;

    assert!(matches!(result, Err(LockError::Locked)));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
    lock.silent_release().await;
}

#[tokio::test(start_paused = true)]
async fn test_dropped_with_lock_future_still_releases() {
    let (store, locker) = setup();
    let cancel = CancellationToken::new();

    let work = locker.with_lock(&cancel, KEY, [], |_| async {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok::<_, LockError>(())
    });
    let timed_out = tokio::time::timeout(Duration::from_millis(100), work).await;
    assert!(timed_out.is_err());

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(!store.contains(STORE_KEY));
}

#[tokio::test]
async fn test_store_errors_propagate_without_retry() {
    let store = Arc::new(UnreachableStore {
        calls: AtomicUsize::new(0),
    });
    let locker = Locker::builder()
        .shared_store(store.clone())
        .options(LockOptions::default())
        .build()
        .unwrap();

    let err = locker
        .obtain(
            &CancellationToken::new(),
            KEY,
            [
                LockOption::retry_strategy(retry::linear(Duration::from_millis(1))),
                LockOption::max_retries(5),
            ],
        )
        .await
        .unwrap_err();

    assert!(matches!(err, LockError::Store(StoreError::Unavailable(_))));
    assert_eq!(store.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_release_is_bounded() {
    let store = Arc::new(StalledStore {
        inner: InMemoryStore::new(),
    });
    let locker = Locker::builder()
        .shared_store(store)
        .options(LockOptions::default())
        .build()
        .unwrap();

    let cancel = CancellationToken::new();
    let lock = locker
        .obtain(&cancel, KEY, [LockOption::auto_renew(false)])
        .await
        .unwrap();
    cancel.cancel();

    let err = lock.release().await.unwrap_err();
    assert!(matches!(err, LockError::ReleaseTimeout(_)));
    assert_eq!(locker.metrics().releases_failed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_exponential_strategy_drives_obtain() {
    let (store, locker) = setup();
    store.put(STORE_KEY, "1", Duration::from_millis(100));
    let start = tokio::time::Instant::now();

    let lock = locker
        .obtain(
            &CancellationToken::new(),
            KEY,
            [
                LockOption::retry_strategy(retry::exponential(
                    Duration::from_millis(10),
                    Duration::from_millis(300),
                )),
                LockOption::max_retries(10),
            ],
        )
        .await
        .unwrap();

    // Waits of 10, 10, 16, 32, 64 ms cross the 100 ms lease.
    assert!(start.elapsed() >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_millis(200));
    lock.release().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_obtain_has_single_winner() {
    let (store, locker) = setup();
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let locker = locker.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move { locker.obtain(&cancel, KEY, []).await }));
    }

    let mut winners = Vec::new();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(lock) => winners.push(lock),
            Err(e) => assert!(e.is_locked()),
        }
    }

    assert_eq!(winners.len(), 1);
    assert_eq!(store.get(STORE_KEY).as_deref(), Some(winners[0].token()));
    assert_eq!(locker.metrics().contention_total(), 15);
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_claim_removes_landed_claim() {
    let store = Arc::new(SlowClaimStore {
        inner: InMemoryStore::new(),
    });
    let locker = Locker::builder()
        .shared_store(store.clone())
        .options(LockOptions::default())
        .build()
        .unwrap();
    let cancel = CancellationToken::new();

    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let err = locker.obtain(&cancel, KEY, []).await.unwrap_err();

    assert!(matches!(err, LockError::Cancelled));
    assert!(!store.inner.contains(KEY));
}

#[tokio::test]
async fn test_cancelled_before_obtain_never_touches_store() {
    let (store, locker) = setup();
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = locker.obtain(&cancel, KEY, []).await.unwrap_err();

    assert!(matches!(err, LockError::Cancelled));
    assert!(store.is_empty());
}
