//! Persistence seam for the engine.
//!
//! Reference data (students, subjects, kinds, periods) is read-only from the
//! engine's point of view. Everything that touches entries or cached averages
//! for one key goes through a [`KeyTransaction`], which holds that key's lock
//! until it is committed or dropped.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    AverageKey, EvaluationKind, GradedEntry, Period, SchoolClass, Student, Subject,
    SubjectAverage, SubjectAverageLine, WeightedValue,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[async_trait]
pub trait GradeStore: Send + Sync {
    type Tx: KeyTransaction;

    /// Open an atomic unit for `key`, waiting for any other unit on the same key.
    async fn begin(&self, key: AverageKey) -> Result<Self::Tx>;

    async fn student(&self, id: Uuid) -> Result<Option<Student>>;
    async fn class(&self, id: Uuid) -> Result<Option<SchoolClass>>;
    async fn subject(&self, id: Uuid) -> Result<Option<Subject>>;
    async fn evaluation_kind(&self, id: Uuid) -> Result<Option<EvaluationKind>>;
    async fn period(&self, id: Uuid) -> Result<Option<Period>>;

    async fn active_students(&self, class_id: Uuid) -> Result<Vec<Student>>;

    /// Cached subject averages of one student for one period, joined with
    /// their subject.
    async fn subject_averages(
        &self,
        student_id: Uuid,
        period_id: Uuid,
    ) -> Result<Vec<SubjectAverageLine>>;

    async fn cached_average(&self, key: AverageKey) -> Result<Option<SubjectAverage>>;

    /// Every key of the period that has entries or a cached average.
    async fn period_keys(&self, period_id: Uuid) -> Result<Vec<AverageKey>>;

    /// Flag the period as closed. Returns false if it already was.
    async fn close_period(&self, period_id: Uuid) -> Result<bool>;
}

#[async_trait]
pub trait KeyTransaction: Send {
    fn key(&self) -> AverageKey;

    /// The key's period, read so that closing it waits for this unit.
    async fn period(&mut self) -> Result<Option<Period>>;

    /// Current entries of the key with their evaluation-kind coefficients.
    async fn weighted_values(&mut self) -> Result<Vec<WeightedValue>>;

    /// Insert or replace the entry for its evaluation kind.
    async fn upsert_entry(&mut self, entry: &GradedEntry) -> Result<()>;

    /// Remove the entry of one evaluation kind. Returns false if there was none.
    async fn delete_entry(&mut self, evaluation_kind_id: Uuid) -> Result<bool>;

    async fn put_average(&mut self, average: &SubjectAverage) -> Result<()>;

    async fn clear_average(&mut self) -> Result<()>;

    async fn commit(self) -> Result<()>;
}
