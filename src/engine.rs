//! The averaging and ranking engine.
//!
//! Every entry mutation recomputes the subject average of exactly its own
//! (student, subject, period) key inside the same store transaction, so the
//! cache never lags behind the entries it summarises.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::average::{general_mean, plain_mean, subject_mean};
use crate::config::EngineConfig;
use crate::error::{GradeError, Result};
use crate::models::{
    AverageKey, BatchOutcome, Bulletin, ClassRanking, EntryBatch, EvaluationKind, GradedEntry,
    Period, SchoolClass, Student, Subject, SubjectAverage,
};
use crate::ranking::{rank_cohort, Candidate};
use crate::report;
use crate::store::{GradeStore, KeyTransaction};

pub struct Gradebook<S> {
    store: S,
    config: EngineConfig,
}

/// Reject writes against a closed period or dated outside it.
fn guard_period(period: &Period, evaluated_on: Option<NaiveDate>) -> Result<()> {
    if period.closed {
        return Err(GradeError::PeriodClosed {
            period_id: period.id,
        });
    }
    if let Some(date) = evaluated_on {
        if !period.contains(date) {
            return Err(GradeError::InvalidDate {
                period_id: period.id,
                date,
                start: period.start_date,
                end: period.end_date,
            });
        }
    }
    Ok(())
}

impl<S: GradeStore> Gradebook<S> {
    pub fn new(store: S, config: EngineConfig) -> Self {
        Self { store, config }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    async fn require_student(&self, id: Uuid) -> Result<Student> {
        self.store
            .student(id)
            .await?
            .ok_or_else(|| GradeError::missing("student", id))
    }

    async fn require_class(&self, id: Uuid) -> Result<SchoolClass> {
        self.store
            .class(id)
            .await?
            .ok_or_else(|| GradeError::missing("class", id))
    }

    async fn require_subject(&self, id: Uuid) -> Result<Subject> {
        self.store
            .subject(id)
            .await?
            .ok_or_else(|| GradeError::missing("subject", id))
    }

    async fn require_kind(&self, id: Uuid) -> Result<EvaluationKind> {
        self.store
            .evaluation_kind(id)
            .await?
            .ok_or_else(|| GradeError::missing("evaluation kind", id))
    }

    async fn require_period(&self, id: Uuid) -> Result<Period> {
        self.store
            .period(id)
            .await?
            .ok_or_else(|| GradeError::missing("period", id))
    }

    /// Replace the cached average of the transaction's key with a fresh
    /// computation over its current entries.
    async fn recompute_in(&self, tx: &mut S::Tx) -> Result<Option<SubjectAverage>> {
        let key = tx.key();
        let values = tx.weighted_values().await?;

        match subject_mean(&values, self.config.decimal_places) {
            Some(mean) => {
                let average = SubjectAverage {
                    key,
                    average: mean.average,
                    entry_count: mean.entry_count,
                    weighted_points: mean.weighted_points,
                    computed_at: Utc::now(),
                };
                tx.put_average(&average).await?;
                debug!(%key, average = %average.average, entries = average.entry_count, "subject average stored");
                Ok(Some(average))
            }
            None => {
                tx.clear_average().await?;
                debug!(%key, entries = values.len(), "subject average cleared");
                Ok(None)
            }
        }
    }

    async fn recompute_key(&self, key: AverageKey) -> Result<Option<SubjectAverage>> {
        let mut tx = self.store.begin(key).await?;
        let average = self.recompute_in(&mut tx).await?;
        tx.commit().await?;
        Ok(average)
    }

    /// Create or replace one entry and refresh its subject average.
    ///
    /// Returns the subject average after the write, `None` when the key has
    /// no weighted entries left.
    pub async fn record_entry(&self, entry: GradedEntry) -> Result<Option<SubjectAverage>> {
        if let Err(err) = self.config.check_value(entry.value) {
            warn!(student = %entry.student_id, value = %entry.value, error = %err, "entry rejected");
            return Err(err);
        }
        self.require_student(entry.student_id).await?;
        self.require_subject(entry.subject_id).await?;
        self.require_kind(entry.evaluation_kind_id).await?;

        let key = entry.key();
        let mut tx = self.store.begin(key).await?;
        let period = tx
            .period()
            .await?
            .ok_or_else(|| GradeError::missing("period", key.period_id))?;
        if let Err(err) = guard_period(&period, Some(entry.evaluated_on)) {
            warn!(%key, error = %err, "entry rejected");
            return Err(err);
        }

        tx.upsert_entry(&entry).await?;
        let average = self.recompute_in(&mut tx).await?;
        tx.commit().await?;

        info!(%key, kind = %entry.evaluation_kind_id, value = %entry.value, "entry recorded");
        Ok(average)
    }

    /// Remove one entry and refresh its subject average. Removing the last
    /// entry of a key leaves no cached average behind.
    pub async fn delete_entry(
        &self,
        student_id: Uuid,
        subject_id: Uuid,
        period_id: Uuid,
        evaluation_kind_id: Uuid,
    ) -> Result<Option<SubjectAverage>> {
        let key = AverageKey::new(student_id, subject_id, period_id);
        let mut tx = self.store.begin(key).await?;
        let period = tx
            .period()
            .await?
            .ok_or_else(|| GradeError::missing("period", period_id))?;
        if let Err(err) = guard_period(&period, None) {
            warn!(%key, error = %err, "entry deletion rejected");
            return Err(err);
        }

        if !tx.delete_entry(evaluation_kind_id).await? {
            return Err(GradeError::missing("graded entry", evaluation_kind_id));
        }
        let average = self.recompute_in(&mut tx).await?;
        tx.commit().await?;

        info!(%key, kind = %evaluation_kind_id, "entry deleted");
        Ok(average)
    }

    /// Apply one evaluation to many students at once.
    ///
    /// Shared references and the period guard are checked for the whole
    /// batch. After that each line stands alone: rejections and store
    /// failures alike are collected per student and the batch carries on.
    pub async fn record_entries(&self, batch: EntryBatch) -> Result<BatchOutcome> {
        self.require_subject(batch.subject_id).await?;
        self.require_kind(batch.evaluation_kind_id).await?;
        let period = self.require_period(batch.period_id).await?;
        guard_period(&period, Some(batch.evaluated_on))?;

        let mut outcome = BatchOutcome::default();
        for line in batch.lines {
            let entry = GradedEntry {
                student_id: line.student_id,
                subject_id: batch.subject_id,
                period_id: batch.period_id,
                evaluation_kind_id: batch.evaluation_kind_id,
                value: line.value,
                evaluated_on: batch.evaluated_on,
                comment: line.comment,
            };
            match self.record_entry(entry.clone()).await {
                Ok(_) => outcome.recorded.push(entry),
                Err(err) => {
                    if !err.is_rejection() {
                        error!(student = %line.student_id, error = %err, "batch line failed");
                    }
                    outcome.errors.push((line.student_id, err));
                }
            }
        }

        info!(
            period = %batch.period_id,
            subject = %batch.subject_id,
            recorded = outcome.recorded.len(),
            failed = outcome.errors.len(),
            "batch recorded"
        );
        Ok(outcome)
    }

    /// Recompute hook for collaborators that committed an entry change on
    /// their own. Recomputes exactly the entry's key.
    pub async fn on_entry_changed(
        &self,
        student_id: Uuid,
        subject_id: Uuid,
        period_id: Uuid,
        evaluation_kind_id: Uuid,
    ) -> Result<Option<SubjectAverage>> {
        self.require_student(student_id).await?;
        self.require_subject(subject_id).await?;
        self.require_kind(evaluation_kind_id).await?;
        self.require_period(period_id).await?;
        let key = AverageKey::new(student_id, subject_id, period_id);
        debug!(%key, kind = %evaluation_kind_id, "entry change notified");
        self.recompute_key(key).await
    }

    /// Compute and cache the subject average of one key.
    pub async fn compute_subject_average(
        &self,
        student_id: Uuid,
        subject_id: Uuid,
        period_id: Uuid,
    ) -> Result<Option<SubjectAverage>> {
        self.require_student(student_id).await?;
        self.require_subject(subject_id).await?;
        self.require_period(period_id).await?;
        self.recompute_key(AverageKey::new(student_id, subject_id, period_id))
            .await
    }

    /// Weighted mean of the cached subject averages. Never cached itself.
    pub async fn compute_general_average(
        &self,
        student_id: Uuid,
        period_id: Uuid,
    ) -> Result<Option<Decimal>> {
        self.require_student(student_id).await?;
        self.require_period(period_id).await?;
        self.general_average(student_id, period_id).await
    }

    async fn general_average(&self, student_id: Uuid, period_id: Uuid) -> Result<Option<Decimal>> {
        let lines = self.store.subject_averages(student_id, period_id).await?;
        Ok(general_mean(&lines, self.config.decimal_places))
    }

    /// Rank the active students of a class by general average.
    ///
    /// A point-in-time read: concurrent entry writes for other students are
    /// not blocked and may or may not be visible.
    pub async fn rank_class(&self, class_id: Uuid, period_id: Uuid) -> Result<ClassRanking> {
        let class = self.require_class(class_id).await?;
        let period = self.require_period(period_id).await?;
        let students = self.store.active_students(class_id).await?;

        let mut candidates = Vec::with_capacity(students.len());
        for student in students {
            let general_average = self.general_average(student.id, period_id).await?;
            candidates.push(Candidate {
                student,
                general_average,
            });
        }

        let results = rank_cohort(candidates);
        let averages: Vec<Decimal> = results.iter().map(|r| r.general_average).collect();
        let class_average = plain_mean(&averages, self.config.decimal_places);

        debug!(
            class = %class_id,
            period = %period_id,
            cohort = results.len(),
            "class ranked"
        );

        Ok(ClassRanking {
            class_id,
            class_name: class.name,
            period_id,
            period_name: period.name,
            cohort_size: results.len(),
            class_average,
            results,
        })
    }

    /// Report card of one student for one period.
    pub async fn bulletin(&self, student_id: Uuid, period_id: Uuid) -> Result<Bulletin> {
        let student = self.require_student(student_id).await?;
        let period = self.require_period(period_id).await?;
        let subjects = self.store.subject_averages(student_id, period_id).await?;
        let general_average = general_mean(&subjects, self.config.decimal_places);
        let ranking = self.rank_class(student.class_id, period_id).await?;
        let placement = ranking.results.iter().find(|r| r.student_id == student_id);

        Ok(Bulletin {
            class_name: ranking.class_name.clone(),
            subjects,
            general_average,
            rank: placement.map(|r| r.rank),
            is_tied: placement.is_some_and(|r| r.is_tied),
            cohort_size: ranking.cohort_size,
            class_average: ranking.class_average,
            mention: general_average
                .map(|average| report::mention(average, self.config.max_scale).to_string()),
            student,
            period,
        })
    }

    /// Freeze a period. Closing is one-way; closing twice is not an error.
    pub async fn close_period(&self, period_id: Uuid) -> Result<bool> {
        self.require_period(period_id).await?;
        let closed = self.store.close_period(period_id).await?;
        if closed {
            info!(period = %period_id, "period closed");
        } else {
            debug!(period = %period_id, "period already closed");
        }
        Ok(closed)
    }

    /// Maintenance sweep over every key of a period. Returns how many keys
    /// hold an average afterwards.
    pub async fn recompute_period(&self, period_id: Uuid) -> Result<usize> {
        self.require_period(period_id).await?;
        let keys = self.store.period_keys(period_id).await?;

        let mut present = 0usize;
        for key in &keys {
            if self.recompute_key(*key).await?.is_some() {
                present += 1;
            }
        }

        info!(period = %period_id, keys = keys.len(), averages = present, "period recomputed");
        Ok(present)
    }
}
