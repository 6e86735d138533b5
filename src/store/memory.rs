//! In-process store. Used by tests and by embedders that keep reference data
//! in memory.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::hash::Hash;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, RwLock};
use uuid::Uuid;

use super::{GradeStore, KeyTransaction};
use crate::error::Result;
use crate::models::{
    AverageKey, EvaluationKind, GradedEntry, Period, SchoolClass, Student, StudentStatus, Subject,
    SubjectAverage, SubjectAverageLine, WeightedValue,
};

#[derive(Debug, Default)]
struct State {
    students: HashMap<Uuid, Student>,
    classes: HashMap<Uuid, SchoolClass>,
    subjects: HashMap<Uuid, Subject>,
    kinds: HashMap<Uuid, EvaluationKind>,
    periods: HashMap<Uuid, Period>,
    entries: HashMap<AverageKey, BTreeMap<Uuid, GradedEntry>>,
    averages: HashMap<AverageKey, SubjectAverage>,
}

type LockMap<K, L> = SyncMutex<HashMap<K, Arc<L>>>;

/// Key units take the period lock shared; closing a period takes it
/// exclusively, so a close waits for every unit already in flight.
#[derive(Debug, Default)]
struct Inner {
    state: RwLock<State>,
    key_locks: LockMap<AverageKey, Mutex<()>>,
    period_locks: LockMap<Uuid, RwLock<()>>,
}

fn acquire<K: Eq + Hash, L: Default>(map: &LockMap<K, L>, key: K) -> Arc<L> {
    map.lock().entry(key).or_default().clone()
}

/// Drop the map's handle once nobody else holds or waits on the lock.
fn release<K: Eq + Hash, L>(map: &LockMap<K, L>, key: &K) {
    let mut locks = map.lock();
    if locks
        .get(key)
        .is_some_and(|lock| Arc::strong_count(lock) == 1)
    {
        locks.remove(key);
    }
}

/// Locks held by one key unit. Released on drop, whether or not the unit
/// committed.
#[derive(Debug)]
struct KeyLease {
    inner: Arc<Inner>,
    key: AverageKey,
    key_guard: Option<OwnedMutexGuard<()>>,
    period_guard: Option<OwnedRwLockReadGuard<()>>,
}

impl Drop for KeyLease {
    fn drop(&mut self) {
        self.period_guard.take();
        self.key_guard.take();
        release(&self.inner.period_locks, &self.key.period_id);
        release(&self.inner.key_locks, &self.key);
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_class(&self, class: SchoolClass) {
        self.inner.state.write().await.classes.insert(class.id, class);
    }

    pub async fn add_student(&self, student: Student) {
        self.inner
            .state
            .write()
            .await
            .students
            .insert(student.id, student);
    }

    pub async fn add_subject(&self, subject: Subject) {
        self.inner
            .state
            .write()
            .await
            .subjects
            .insert(subject.id, subject);
    }

    pub async fn add_evaluation_kind(&self, kind: EvaluationKind) {
        self.inner.state.write().await.kinds.insert(kind.id, kind);
    }

    pub async fn add_period(&self, period: Period) {
        self.inner
            .state
            .write()
            .await
            .periods
            .insert(period.id, period);
    }

    /// Every stored entry of a key, ordered by evaluation kind id.
    pub async fn entries(&self, key: AverageKey) -> Vec<GradedEntry> {
        self.inner
            .state
            .read()
            .await
            .entries
            .get(&key)
            .map(|entries| entries.values().cloned().collect())
            .unwrap_or_default()
    }

    async fn lease(&self, key: AverageKey) -> KeyLease {
        let key_guard = acquire(&self.inner.key_locks, key).lock_owned().await;
        let period_guard = acquire(&self.inner.period_locks, key.period_id)
            .read_owned()
            .await;
        KeyLease {
            inner: Arc::clone(&self.inner),
            key,
            key_guard: Some(key_guard),
            period_guard: Some(period_guard),
        }
    }
}

#[async_trait]
impl GradeStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self, key: AverageKey) -> Result<MemoryTransaction> {
        let lease = self.lease(key).await;
        let state = self.inner.state.read().await;
        let entries = state.entries.get(&key).cloned().unwrap_or_default();
        let average = state.averages.get(&key).cloned();
        drop(state);

        Ok(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            key,
            entries,
            average,
            _lease: lease,
        })
    }

    async fn student(&self, id: Uuid) -> Result<Option<Student>> {
        Ok(self.inner.state.read().await.students.get(&id).cloned())
    }

    async fn class(&self, id: Uuid) -> Result<Option<SchoolClass>> {
        Ok(self.inner.state.read().await.classes.get(&id).cloned())
    }

    async fn subject(&self, id: Uuid) -> Result<Option<Subject>> {
        Ok(self.inner.state.read().await.subjects.get(&id).cloned())
    }

    async fn evaluation_kind(&self, id: Uuid) -> Result<Option<EvaluationKind>> {
        Ok(self.inner.state.read().await.kinds.get(&id).cloned())
    }

    async fn period(&self, id: Uuid) -> Result<Option<Period>> {
        Ok(self.inner.state.read().await.periods.get(&id).cloned())
    }

    async fn active_students(&self, class_id: Uuid) -> Result<Vec<Student>> {
        let state = self.inner.state.read().await;
        let mut students: Vec<Student> = state
            .students
            .values()
            .filter(|s| s.class_id == class_id && s.status == StudentStatus::Active)
            .cloned()
            .collect();
        students.sort_by(|a, b| a.last_name.cmp(&b.last_name).then(a.id.cmp(&b.id)));
        Ok(students)
    }

    async fn subject_averages(
        &self,
        student_id: Uuid,
        period_id: Uuid,
    ) -> Result<Vec<SubjectAverageLine>> {
        let state = self.inner.state.read().await;
        let mut lines: Vec<SubjectAverageLine> = state
            .averages
            .values()
            .filter(|a| a.key.student_id == student_id && a.key.period_id == period_id)
            .filter_map(|a| {
                let subject = state.subjects.get(&a.key.subject_id)?;
                Some(SubjectAverageLine {
                    subject_id: subject.id,
                    subject_name: subject.name.clone(),
                    coefficient: subject.coefficient,
                    average: a.average,
                    entry_count: a.entry_count,
                })
            })
            .collect();
        lines.sort_by(|a, b| a.subject_name.cmp(&b.subject_name));
        Ok(lines)
    }

    async fn cached_average(&self, key: AverageKey) -> Result<Option<SubjectAverage>> {
        Ok(self.inner.state.read().await.averages.get(&key).cloned())
    }

    async fn period_keys(&self, period_id: Uuid) -> Result<Vec<AverageKey>> {
        let state = self.inner.state.read().await;
        let keys: BTreeSet<AverageKey> = state
            .entries
            .iter()
            .filter(|(_, entries)| !entries.is_empty())
            .map(|(key, _)| *key)
            .chain(state.averages.keys().copied())
            .filter(|key| key.period_id == period_id)
            .collect();
        Ok(keys.into_iter().collect())
    }

    async fn close_period(&self, period_id: Uuid) -> Result<bool> {
        let exclusive = acquire(&self.inner.period_locks, period_id)
            .write_owned()
            .await;
        let closed = {
            let mut state = self.inner.state.write().await;
            match state.periods.get_mut(&period_id) {
                Some(period) if !period.closed => {
                    period.closed = true;
                    true
                }
                _ => false,
            }
        };
        drop(exclusive);
        release(&self.inner.period_locks, &period_id);
        Ok(closed)
    }
}

/// Staged view of one key. Nothing is visible to other readers until
/// [`KeyTransaction::commit`]; dropping it discards the staged writes.
#[derive(Debug)]
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    key: AverageKey,
    entries: BTreeMap<Uuid, GradedEntry>,
    average: Option<SubjectAverage>,
    _lease: KeyLease,
}

#[async_trait]
impl KeyTransaction for MemoryTransaction {
    fn key(&self) -> AverageKey {
        self.key
    }

    async fn period(&mut self) -> Result<Option<Period>> {
        Ok(self
            .inner
            .state
            .read()
            .await
            .periods
            .get(&self.key.period_id)
            .cloned())
    }

    async fn weighted_values(&mut self) -> Result<Vec<WeightedValue>> {
        let state = self.inner.state.read().await;
        Ok(self
            .entries
            .values()
            .filter_map(|entry| {
                let kind = state.kinds.get(&entry.evaluation_kind_id)?;
                Some(WeightedValue {
                    value: entry.value,
                    coefficient: kind.coefficient,
                })
            })
            .collect())
    }

    async fn upsert_entry(&mut self, entry: &GradedEntry) -> Result<()> {
        self.entries
            .insert(entry.evaluation_kind_id, entry.clone());
        Ok(())
    }

    async fn delete_entry(&mut self, evaluation_kind_id: Uuid) -> Result<bool> {
        Ok(self.entries.remove(&evaluation_kind_id).is_some())
    }

    async fn put_average(&mut self, average: &SubjectAverage) -> Result<()> {
        self.average = Some(average.clone());
        Ok(())
    }

    async fn clear_average(&mut self) -> Result<()> {
        self.average = None;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        let mut state = self.inner.state.write().await;
        if self.entries.is_empty() {
            state.entries.remove(&self.key);
        } else {
            state.entries.insert(self.key, self.entries);
        }
        match self.average {
            Some(average) => {
                state.averages.insert(self.key, average);
            }
            None => {
                state.averages.remove(&self.key);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use rust_decimal::Decimal;

    fn open_period() -> Period {
        Period {
            id: Uuid::new_v4(),
            name: "Trimestre 1".to_string(),
            start_date: NaiveDate::from_ymd_opt(2026, 10, 1).expect("date"),
            end_date: NaiveDate::from_ymd_opt(2026, 12, 20).expect("date"),
            closed: false,
        }
    }

    fn entry_for(key: AverageKey) -> GradedEntry {
        GradedEntry {
            student_id: key.student_id,
            subject_id: key.subject_id,
            period_id: key.period_id,
            evaluation_kind_id: Uuid::new_v4(),
            value: Decimal::new(75, 1),
            evaluated_on: NaiveDate::from_ymd_opt(2026, 10, 15).expect("date"),
            comment: None,
        }
    }

    #[tokio::test]
    async fn closing_waits_for_units_in_flight() {
        let store = MemoryStore::new();
        let period = open_period();
        store.add_period(period.clone()).await;
        let key = AverageKey::new(Uuid::new_v4(), Uuid::new_v4(), period.id);

        let mut tx = store.begin(key).await.expect("begin");
        let seen = tx.period().await.expect("read").expect("period");
        assert!(!seen.closed);

        let closer = {
            let store = store.clone();
            let period_id = period.id;
            tokio::spawn(async move { store.close_period(period_id).await })
        };
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert!(!closer.is_finished());
        let still_open = store.period(period.id).await.expect("read").expect("period");
        assert!(!still_open.closed);

        tx.upsert_entry(&entry_for(key)).await.expect("upsert");
        tx.commit().await.expect("commit");

        assert!(closer.await.expect("join").expect("close"));
        let closed = store.period(period.id).await.expect("read").expect("period");
        assert!(closed.closed);
        assert_eq!(store.entries(key).await.len(), 1);

        let mut late = store.begin(key).await.expect("begin");
        let seen = late.period().await.expect("read").expect("period");
        assert!(seen.closed);
    }

    #[tokio::test]
    async fn released_units_leave_no_locks_behind() {
        let store = MemoryStore::new();
        let period = open_period();
        store.add_period(period.clone()).await;
        let key = AverageKey::new(Uuid::new_v4(), Uuid::new_v4(), period.id);

        let mut tx = store.begin(key).await.expect("begin");
        assert_eq!(store.inner.key_locks.lock().len(), 1);
        assert_eq!(store.inner.period_locks.lock().len(), 1);
        tx.upsert_entry(&entry_for(key)).await.expect("upsert");
        tx.commit().await.expect("commit");
        assert!(store.inner.key_locks.lock().is_empty());
        assert!(store.inner.period_locks.lock().is_empty());

        let mut abandoned = store.begin(key).await.expect("begin");
        abandoned.clear_average().await.expect("clear");
        drop(abandoned);
        assert!(store.inner.key_locks.lock().is_empty());
        assert!(store.inner.period_locks.lock().is_empty());
        assert_eq!(store.entries(key).await.len(), 1);

        assert!(store.close_period(period.id).await.expect("close"));
        assert!(store.inner.period_locks.lock().is_empty());
    }

    #[tokio::test]
    async fn waiting_units_keep_their_key_lock() {
        let store = MemoryStore::new();
        let period = open_period();
        store.add_period(period.clone()).await;
        let key = AverageKey::new(Uuid::new_v4(), Uuid::new_v4(), period.id);

        let first = store.begin(key).await.expect("begin");
        let waiter = {
            let store = store.clone();
            tokio::spawn(async move {
                let mut tx = store.begin(key).await?;
                tx.upsert_entry(&entry_for(key)).await?;
                tx.commit().await
            })
        };
        for _ in 0..16 {
            tokio::task::yield_now().await;
        }
        assert!(!waiter.is_finished());
        drop(first);
        assert_eq!(store.inner.key_locks.lock().len(), 1);

        waiter.await.expect("join").expect("commit");
        assert_eq!(store.entries(key).await.len(), 1);
        assert!(store.inner.key_locks.lock().is_empty());
    }
}
