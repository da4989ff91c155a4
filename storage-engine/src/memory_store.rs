use async_trait::async_trait;
use datasource::ports::StoreConnection;
use shared::{StoreError, StoreResult};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard, Notify};
use tokio::time::Instant;

const WRONGTYPE: &str = "WRONGTYPE Operation against a key holding the wrong kind of value";

#[derive(Debug)]
enum Data {
    Text(String),
    List(VecDeque<String>),
}

#[derive(Debug)]
struct Entry {
    data: Data,
    expires_at: Option<Instant>,
}

impl Entry {
    fn new(data: Data) -> Self {
        Self {
            data,
            expires_at: None,
        }
    }

    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

fn wrong_type() -> StoreError {
    StoreError::Response(WRONGTYPE.to_string())
}

fn invalid_expire(command: &str) -> StoreError {
    StoreError::Response(format!("ERR invalid expire time in '{}' command", command))
}

/// Deadline `seconds` from now, or `None` when it does not fit in an `Instant`.
fn deadline_after(seconds: u64) -> Option<Instant> {
    Instant::now().checked_add(Duration::from_secs(seconds))
}

type Entries = HashMap<String, Entry>;

#[derive(Default)]
struct Dataset {
    entries: Mutex<Entries>,
    pushed: Notify,
}

impl Dataset {
    fn purge_expired(entries: &mut HashMap<String, Entry>, key: &str) {
        if entries
            .get(key)
            .is_some_and(|e| e.is_expired(Instant::now()))
        {
            entries.remove(key);
        }
    }

    fn pop_locked(
        entries: &mut HashMap<String, Entry>,
        key: &str,
        front: bool,
    ) -> StoreResult<Option<String>> {
        Self::purge_expired(entries, key);
        let Some(entry) = entries.get_mut(key) else {
            return Ok(None);
        };
        let Data::List(list) = &mut entry.data else {
            return Err(wrong_type());
        };

        let value = if front { list.pop_front() } else { list.pop_back() };
        if list.is_empty() {
            entries.remove(key);
        }
        Ok(value)
    }
}

/// In-process store with the string and list semantics of the Redis commands
/// behind [`StoreConnection`].
///
/// The store only holds data. Commands go through a [`MemoryConnection`]
/// opened with [`MemoryStore::connect`]; every connection of one store sees
/// the same keys. Expired keys are dropped lazily on access. Empty lists are
/// deleted.
#[derive(Clone, Default)]
pub struct MemoryStore {
    data: Arc<Dataset>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection to this store.
    pub fn connect(&self) -> MemoryConnection {
        MemoryConnection {
            data: self.data.clone(),
            line: Mutex::new(()),
            closed: AtomicBool::new(false),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore").finish_non_exhaustive()
    }
}

/// One connection to a [`MemoryStore`].
///
/// Commands on one connection run one at a time, and a blocking pop holds the
/// connection until it returns. A pop is woken by pushes made through any
/// connection of the same store. `QUIT` closes this connection only.
pub struct MemoryConnection {
    data: Arc<Dataset>,
    line: Mutex<()>,
    closed: AtomicBool,
}

impl MemoryConnection {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(StoreError::Connection("connection closed".to_string()));
        }
        Ok(())
    }

    async fn push(&self, key: &str, value: String, front: bool) -> StoreResult<i64> {
        let _line = self.line.lock().await;
        self.ensure_open()?;
        let len = {
            let mut entries = self.data.entries.lock().await;
            Dataset::purge_expired(&mut entries, key);

            let entry = entries
                .entry(key.to_string())
                .or_insert_with(|| Entry::new(Data::List(VecDeque::new())));
            let Data::List(list) = &mut entry.data else {
                return Err(wrong_type());
            };

            if front {
                list.push_front(value);
            } else {
                list.push_back(value);
            }
            list.len()
        };

        self.data.pushed.notify_waiters();
        Ok(len as i64)
    }

    async fn pop(&self, key: &str, front: bool) -> StoreResult<Option<String>> {
        let _line = self.line.lock().await;
        self.ensure_open()?;
        let mut entries = self.data.entries.lock().await;
        Dataset::pop_locked(&mut entries, key, front)
    }

    async fn blocking_pop(
        &self,
        key: &str,
        timeout_secs: u64,
        front: bool,
    ) -> StoreResult<Option<(String, String)>> {
        let _line = self.line.lock().await;
        // a timeout too far out to represent waits forever
        let deadline = (timeout_secs > 0)
            .then(|| deadline_after(timeout_secs))
            .flatten();

        loop {
            // registered before the checks so a push or quit in between is not missed
            let notified = self.data.pushed.notified();
            self.ensure_open()?;
            {
                let mut entries = self.data.entries.lock().await;
                if let Some(value) = Dataset::pop_locked(&mut entries, key, front)? {
                    return Ok(Some((key.to_string(), value)));
                }
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Ok(None);
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Lock the line and the dataset for a single non-blocking command.
    async fn entries(&self) -> StoreResult<(MutexGuard<'_, ()>, MutexGuard<'_, Entries>)> {
        let line = self.line.lock().await;
        self.ensure_open()?;
        Ok((line, self.data.entries.lock().await))
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    async fn exists(&self, key: &str) -> StoreResult<bool> {
        let (_line, mut entries) = self.entries().await?;
        Dataset::purge_expired(&mut entries, key);
        Ok(entries.contains_key(key))
    }

    async fn rpush(&self, key: &str, value: String) -> StoreResult<i64> {
        self.push(key, value, false).await
    }

    async fn lpush(&self, key: &str, value: String) -> StoreResult<i64> {
        self.push(key, value, true).await
    }

    async fn brpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<(String, String)>> {
        self.blocking_pop(key, timeout_secs, false).await
    }

    async fn blpop(&self, key: &str, timeout_secs: u64) -> StoreResult<Option<(String, String)>> {
        self.blocking_pop(key, timeout_secs, true).await
    }

    async fn lpop(&self, key: &str) -> StoreResult<Option<String>> {
        self.pop(key, true).await
    }

    async fn llen(&self, key: &str) -> StoreResult<i64> {
        let (_line, mut entries) = self.entries().await?;
        Dataset::purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(0),
            Some(Entry {
                data: Data::List(list),
                ..
            }) => Ok(list.len() as i64),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn lrange(&self, key: &str, start: i64, stop: i64) -> StoreResult<Vec<String>> {
        let (_line, mut entries) = self.entries().await?;
        Dataset::purge_expired(&mut entries, key);
        let list = match entries.get(key) {
            None => return Ok(Vec::new()),
            Some(Entry {
                data: Data::List(list),
                ..
            }) => list,
            Some(_) => return Err(wrong_type()),
        };

        let len = list.len() as i64;
        let start = if start < 0 { (start + len).max(0) } else { start };
        let stop = if stop < 0 { stop + len } else { stop.min(len - 1) };
        if start > stop || start >= len {
            return Ok(Vec::new());
        }

        Ok(list
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .cloned()
            .collect())
    }

    async fn set(&self, key: &str, value: String) -> StoreResult<()> {
        let (_line, mut entries) = self.entries().await?;
        entries.insert(key.to_string(), Entry::new(Data::Text(value)));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: String) -> StoreResult<bool> {
        let (_line, mut entries) = self.entries().await?;
        Dataset::purge_expired(&mut entries, key);
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), Entry::new(Data::Text(value)));
        Ok(true)
    }

    async fn set_ex(&self, key: &str, value: String, seconds: u64) -> StoreResult<()> {
        let (_line, mut entries) = self.entries().await?;
        let expires_at = (seconds > 0)
            .then(|| deadline_after(seconds))
            .flatten()
            .ok_or_else(|| invalid_expire("setex"))?;

        entries.insert(
            key.to_string(),
            Entry {
                data: Data::Text(value),
                expires_at: Some(expires_at),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let (_line, mut entries) = self.entries().await?;
        Dataset::purge_expired(&mut entries, key);
        match entries.get(key) {
            None => Ok(None),
            Some(Entry {
                data: Data::Text(value),
                ..
            }) => Ok(Some(value.clone())),
            Some(_) => Err(wrong_type()),
        }
    }

    async fn del(&self, key: &str) -> StoreResult<i64> {
        let (_line, mut entries) = self.entries().await?;
        Dataset::purge_expired(&mut entries, key);
        Ok(entries.remove(key).map_or(0, |_| 1))
    }

    async fn expire(&self, key: &str, seconds: i64) -> StoreResult<bool> {
        let (_line, mut entries) = self.entries().await?;
        Dataset::purge_expired(&mut entries, key);
        if seconds <= 0 {
            return Ok(entries.remove(key).is_some());
        }
        let expires_at = deadline_after(seconds as u64).ok_or_else(|| invalid_expire("expire"))?;

        match entries.get_mut(key) {
            Some(entry) => {
                entry.expires_at = Some(expires_at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Close this connection without waiting for its in-flight commands.
    async fn quit(&self) -> StoreResult<()> {
        self.ensure_open()?;
        self.closed.store(true, Ordering::SeqCst);
        // wake blocked pops so they observe the close
        self.data.pushed.notify_waiters();
        Ok(())
    }
}

impl std::fmt::Debug for MemoryConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryConnection")
            .field("closed", &self.closed.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datasource::{CallOptions, Storage};
    use serde::Serialize;
    use shared::Error;
    use std::sync::Arc;
    use tokio::time::sleep;

    fn storage() -> (Arc<MemoryConnection>, Storage) {
        let conn = Arc::new(MemoryStore::new().connect());
        let storage = Storage::new(conn.clone(), Some("test:".to_string()));
        (conn, storage)
    }

    fn open(store: &MemoryStore) -> Storage {
        Storage::new(Arc::new(store.connect()), None)
    }

    #[derive(Serialize)]
    struct Session {
        user: String,
        roles: Vec<String>,
    }

    #[tokio::test]
    async fn test_save_then_read_round_trip() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        storage.save("plain", "hello", &opts).await.unwrap();
        assert_eq!(
            storage.read("plain", &opts).await.unwrap(),
            Some("hello".to_string())
        );

        let session = Session {
            user: "ana".to_string(),
            roles: vec!["admin".to_string()],
        };
        storage.save("session", &session, &opts).await.unwrap();
        assert_eq!(
            storage.read("session", &opts).await.unwrap(),
            Some(Storage::prepare_string(&session).unwrap())
        );
    }

    #[tokio::test]
    async fn test_read_missing_is_none() {
        let (_, storage) = storage();
        assert_eq!(
            storage.read("nothing", &CallOptions::default()).await.unwrap(),
            None
        );
    }

    #[tokio::test]
    async fn test_savenx_keeps_first_value() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        assert!(storage.savenx("lock", "v1", &opts).await.unwrap());
        assert!(!storage.savenx("lock", "v2", &opts).await.unwrap());
        assert_eq!(
            storage.read("lock", &opts).await.unwrap(),
            Some("v1".to_string())
        );
    }

    #[tokio::test]
    async fn test_rpush_llen_lpop() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        let before = storage.llen("jobs", &opts).await.unwrap();
        storage.rpush("jobs", "job-1", &opts).await.unwrap();
        assert_eq!(storage.llen("jobs", &opts).await.unwrap(), before + 1);

        assert_eq!(
            storage.lpop("jobs", &opts).await.unwrap(),
            Some("job-1".to_string())
        );
        assert_eq!(storage.llen("jobs", &opts).await.unwrap(), 0);
        assert!(!storage.exists("jobs", &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_push_order_and_lrange() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        storage.rpush("l", "b", &opts).await.unwrap();
        storage.rpush("l", "c", &opts).await.unwrap();
        assert_eq!(storage.lpush("l", "a", &opts).await.unwrap(), 3);

        assert_eq!(storage.lrange("l", 0, -1, &opts).await.unwrap(), vec!["a", "b", "c"]);
        assert_eq!(storage.lrange("l", 1, 1, &opts).await.unwrap(), vec!["b"]);
        assert_eq!(storage.lrange("l", -2, 10, &opts).await.unwrap(), vec!["b", "c"]);
        assert!(storage.lrange("l", 2, 1, &opts).await.unwrap().is_empty());
        assert!(storage.lrange("l", 5, 9, &opts).await.unwrap().is_empty());
        assert!(storage.lrange("none", 0, -1, &opts).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expire_removes_key() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        storage.save("temp", "x", &opts).await.unwrap();
        assert!(storage.expire("temp", 1, &opts).await.unwrap());
        assert!(storage.exists("temp", &opts).await.unwrap());

        sleep(Duration::from_millis(1100)).await;
        assert!(!storage.exists("temp", &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_expire_missing_key() {
        let (_, storage) = storage();
        assert!(!storage
            .expire("ghost", 10, &CallOptions::default())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_saveex_expires() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        storage.saveex("otp", 1, &123456, &opts).await.unwrap();
        assert_eq!(
            storage.read("otp", &opts).await.unwrap(),
            Some("123456".to_string())
        );

        sleep(Duration::from_millis(1100)).await;
        assert_eq!(storage.read("otp", &opts).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_saveex_zero_rejected_by_store() {
        let (_, storage) = storage();
        let err = storage
            .saveex("otp", 0, "x", &CallOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Response(_))));
    }

    #[tokio::test]
    async fn test_remove() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        storage.save("k", "v", &opts).await.unwrap();
        assert_eq!(storage.remove("k", &opts).await.unwrap(), 1);
        assert_eq!(storage.remove("k", &opts).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_type() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        storage.save("s", "v", &opts).await.unwrap();
        let err = storage.rpush("s", "x", &opts).await.unwrap_err();
        match err {
            Error::Store(StoreError::Response(msg)) => assert_eq!(msg, WRONGTYPE),
            other => panic!("expected WRONGTYPE, got {:?}", other),
        }

        storage.rpush("l", "x", &opts).await.unwrap();
        assert!(storage.read("l", &opts).await.is_err());
    }

    #[tokio::test]
    async fn test_per_call_prefix_isolates_keys() {
        let (_, storage) = storage();
        let other = CallOptions::new().with_key_prefix("other:");

        storage.save("k", "default", &CallOptions::default()).await.unwrap();
        storage.save("k", "other", &other).await.unwrap();

        assert_eq!(
            storage.read("k", &CallOptions::default()).await.unwrap(),
            Some("default".to_string())
        );
        assert_eq!(storage.read("k", &other).await.unwrap(), Some("other".to_string()));
    }

    #[tokio::test]
    async fn test_blpop_default_timeout() {
        let (_, storage) = storage();

        let started = Instant::now();
        let popped = storage.blpop("idle", &CallOptions::default()).await.unwrap();
        assert_eq!(popped, None);
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_brpop_returns_available_tail() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        storage.rpush("q", "first", &opts).await.unwrap();
        storage.rpush("q", "last", &opts).await.unwrap();

        assert_eq!(
            storage.brpop("q", &opts).await.unwrap(),
            Some(("test:q".to_string(), "last".to_string()))
        );
    }

    #[tokio::test]
    async fn test_blocking_pop_wakes_on_push() {
        let store = MemoryStore::new();
        let consumer = Arc::new(open(&store));
        let producer = open(&store);

        let waiter = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                consumer
                    .brpop("events", &CallOptions::new().with_timeout(5))
                    .await
            })
        };

        sleep(Duration::from_millis(50)).await;
        producer
            .lpush("events", "ping", &CallOptions::default())
            .await
            .unwrap();

        let popped = waiter.await.unwrap().unwrap();
        assert_eq!(popped, Some(("events".to_string(), "ping".to_string())));
    }

    #[tokio::test]
    async fn test_disconnect_closes_store() {
        let (conn, storage) = storage();
        storage.disconnect().await;

        assert!(matches!(
            storage.read("k", &CallOptions::default()).await,
            Err(Error::NotConnected)
        ));
        // QUIT runs on a spawned task
        tokio::time::timeout(Duration::from_secs(1), async {
            while conn.get("test:k").await.is_ok() {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(
            conn.get("test:k").await,
            Err(StoreError::Connection(_))
        ));
    }

    #[tokio::test]
    async fn test_quit_closes_only_its_connection() {
        let store = MemoryStore::new();
        let first = store.connect();
        let second = store.connect();

        first.set("k", "v".to_string()).await.unwrap();
        first.quit().await.unwrap();

        assert!(matches!(first.exists("k").await, Err(StoreError::Connection(_))));
        assert!(matches!(first.quit().await, Err(StoreError::Connection(_))));
        assert_eq!(second.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_disconnect_during_pending_brpop() {
        let store = MemoryStore::new();
        let storage = Arc::new(open(&store));

        let pending = {
            let storage = storage.clone();
            tokio::spawn(async move { storage.brpop("never", &CallOptions::default()).await })
        };
        sleep(Duration::from_millis(50)).await;

        tokio::time::timeout(Duration::from_secs(1), storage.disconnect())
            .await
            .expect("disconnect waited behind the pending pop");
        assert!(!storage.is_connected().await);

        // the closed connection wakes the pop with a connection error
        let popped = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(popped, Err(Error::Store(StoreError::Connection(_)))));
    }

    #[tokio::test]
    async fn test_blocking_pop_holds_connection() {
        let store = MemoryStore::new();
        let consumer = Arc::new(open(&store));
        let producer = open(&store);

        let pop = {
            let consumer = consumer.clone();
            tokio::spawn(async move {
                consumer
                    .brpop("jobs", &CallOptions::new().with_timeout(5))
                    .await
            })
        };
        sleep(Duration::from_millis(50)).await;

        let len = {
            let consumer = consumer.clone();
            tokio::spawn(async move { consumer.llen("jobs", &CallOptions::default()).await })
        };
        sleep(Duration::from_millis(50)).await;
        assert!(!len.is_finished(), "llen ran while the pop held the connection");

        // another connection is not held up
        assert_eq!(producer.llen("jobs", &CallOptions::default()).await.unwrap(), 0);
        producer
            .rpush("jobs", "job-1", &CallOptions::default())
            .await
            .unwrap();

        assert_eq!(
            pop.await.unwrap().unwrap(),
            Some(("jobs".to_string(), "job-1".to_string()))
        );
        assert_eq!(len.await.unwrap().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_expire_out_of_range_rejected() {
        let (_, storage) = storage();
        let opts = CallOptions::default();
        storage.save("k", "v", &opts).await.unwrap();

        let err = storage.expire("k", i64::MAX, &opts).await.unwrap_err();
        match err {
            Error::Store(StoreError::Response(msg)) => {
                assert_eq!(msg, "ERR invalid expire time in 'expire' command")
            }
            other => panic!("expected invalid expire time, got {:?}", other),
        }
        assert_eq!(storage.read("k", &opts).await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn test_saveex_out_of_range_rejected() {
        let (_, storage) = storage();
        let opts = CallOptions::default();

        let err = storage.saveex("k", u64::MAX, "v", &opts).await.unwrap_err();
        match err {
            Error::Store(StoreError::Response(msg)) => {
                assert_eq!(msg, "ERR invalid expire time in 'setex' command")
            }
            other => panic!("expected invalid expire time, got {:?}", other),
        }
        assert!(!storage.exists("k", &opts).await.unwrap());
    }

    #[tokio::test]
    async fn test_blocking_pop_with_huge_timeout_waits_for_push() {
        let store = MemoryStore::new();
        let consumer = Arc::new(open(&store));
        let producer = open(&store);
        let forever = CallOptions::new().with_timeout(u64::MAX);

        let waiter = {
            let consumer = consumer.clone();
            let forever = forever.clone();
            tokio::spawn(async move {
                let head = consumer.blpop("q", &forever).await?;
                let tail = consumer.brpop("q", &forever).await?;
                Ok::<_, Error>((head, tail))
            })
        };
        sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        producer.rpush("q", "a", &CallOptions::default()).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        producer.rpush("q", "b", &CallOptions::default()).await.unwrap();

        let (head, tail) = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(head, Some(("q".to_string(), "a".to_string())));
        assert_eq!(tail, Some(("q".to_string(), "b".to_string())));
    }
}
