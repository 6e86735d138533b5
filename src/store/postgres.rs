use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use super::{GradeStore, KeyTransaction};
use crate::error::Result;
use crate::models::{
    AverageKey, EvaluationKind, GradedEntry, Period, SchoolClass, Student, StudentStatus, Subject,
    SubjectAverage, SubjectAverageLine, WeightedValue,
};

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

/// Identifiers of the reference data written by [`PgStore::seed`].
#[derive(Debug, Clone)]
pub struct SeedSummary {
    pub class_id: Uuid,
    pub period_id: Uuid,
    pub period_start: NaiveDate,
    pub subject_ids: Vec<Uuid>,
    pub evaluation_kind_ids: Vec<Uuid>,
    pub student_ids: Vec<Uuid>,
}

fn student_from_row(row: &PgRow) -> Result<Student> {
    let status: String = row.try_get("status")?;
    let status = StudentStatus::parse(&status)
        .ok_or_else(|| sqlx::Error::Decode(format!("unknown student status {status}").into()))?;
    Ok(Student {
        id: row.try_get("id")?,
        matricule: row.try_get("matricule")?,
        first_name: row.try_get("first_name")?,
        last_name: row.try_get("last_name")?,
        class_id: row.try_get("class_id")?,
        status,
    })
}

fn period_from_row(row: &PgRow) -> Result<Period> {
    Ok(Period {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        start_date: row.try_get("start_date")?,
        end_date: row.try_get("end_date")?,
        closed: row.try_get("closed")?,
    })
}

fn average_from_row(key: AverageKey, row: &PgRow) -> Result<SubjectAverage> {
    Ok(SubjectAverage {
        key,
        average: row.try_get("average")?,
        entry_count: row.try_get("entry_count")?,
        weighted_points: row.try_get("weighted_points")?,
        computed_at: row.try_get("computed_at")?,
    })
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub async fn init_db(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Upsert a small school: one class, three subjects, three evaluation
    /// kinds, one open term and four active students.
    pub async fn seed(&self) -> Result<SeedSummary> {
        let class_id = Uuid::parse_str("6f1f3c5e-1d0b-4c59-9a53-0e8f4f1b2a10").map_err(decode)?;
        let period_id = Uuid::parse_str("0b9d4d7e-7a41-4a4f-8f0e-52a1b3c6d7e8").map_err(decode)?;
        let period_start = NaiveDate::from_ymd_opt(2026, 10, 1)
            .ok_or_else(|| decode("invalid period start"))?;
        let period_end = NaiveDate::from_ymd_opt(2026, 12, 20)
            .ok_or_else(|| decode("invalid period end"))?;

        sqlx::query(
            r#"
            INSERT INTO gradebook.classes (id, name)
            VALUES ($1, $2)
            ON CONFLICT (id) DO UPDATE SET name = EXCLUDED.name
            "#,
        )
        .bind(class_id)
        .bind("CM2 A")
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO gradebook.periods (id, name, start_date, end_date, closed)
            VALUES ($1, $2, $3, $4, FALSE)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(period_id)
        .bind("Trimestre 1")
        .bind(period_start)
        .bind(period_end)
        .execute(&self.pool)
        .await?;

        let subjects = [
            ("2c6f0a9e-3f7c-4a0e-9d55-1a2b3c4d5e01", "Mathematiques", Decimal::new(4, 0)),
            ("2c6f0a9e-3f7c-4a0e-9d55-1a2b3c4d5e02", "Francais", Decimal::new(3, 0)),
            ("2c6f0a9e-3f7c-4a0e-9d55-1a2b3c4d5e03", "Sciences", Decimal::new(2, 0)),
        ];
        let mut subject_ids = Vec::new();
        for (id, name, coefficient) in subjects {
            let id = Uuid::parse_str(id).map_err(decode)?;
            sqlx::query(
                r#"
                INSERT INTO gradebook.subjects (id, name, coefficient)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name, coefficient = EXCLUDED.coefficient
                "#,
            )
            .bind(id)
            .bind(name)
            .bind(coefficient)
            .execute(&self.pool)
            .await?;
            subject_ids.push(id);
        }

        let kinds = [
            ("9a1e7b44-52c3-4b8e-b0d6-7f8e9d0c1b01", "devoir", Decimal::new(1, 0)),
            ("9a1e7b44-52c3-4b8e-b0d6-7f8e9d0c1b02", "controle", Decimal::new(2, 0)),
            ("9a1e7b44-52c3-4b8e-b0d6-7f8e9d0c1b03", "composition", Decimal::new(3, 0)),
        ];
        let mut evaluation_kind_ids = Vec::new();
        for (id, name, coefficient) in kinds {
            let id = Uuid::parse_str(id).map_err(decode)?;
            sqlx::query(
                r#"
                INSERT INTO gradebook.evaluation_kinds (id, name, coefficient)
                VALUES ($1, $2, $3)
                ON CONFLICT (id) DO UPDATE
                SET name = EXCLUDED.name, coefficient = EXCLUDED.coefficient
                "#,
            )
            .bind(id)
            .bind(name)
            .bind(coefficient)
            .execute(&self.pool)
            .await?;
            evaluation_kind_ids.push(id);
        }

        let students = [
            ("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2", "CM2-001", "Awa", "Diop"),
            ("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc", "CM2-002", "Moussa", "Fall"),
            ("d5a0a1a2-2a3c-44c2-8f73-60b7897a9dd2", "CM2-003", "Khady", "Ndiaye"),
            ("7e4b2c1d-0f9a-4b3c-8d2e-1f0a9b8c7d6e", "CM2-004", "Ibrahima", "Sow"),
        ];
        let mut student_ids = Vec::new();
        for (id, matricule, first_name, last_name) in students {
            let id = Uuid::parse_str(id).map_err(decode)?;
            sqlx::query(
                r#"
                INSERT INTO gradebook.students
                (id, matricule, first_name, last_name, class_id, status)
                VALUES ($1, $2, $3, $4, $5, 'active')
                ON CONFLICT (id) DO UPDATE
                SET matricule = EXCLUDED.matricule,
                    first_name = EXCLUDED.first_name,
                    last_name = EXCLUDED.last_name,
                    class_id = EXCLUDED.class_id
                "#,
            )
            .bind(id)
            .bind(matricule)
            .bind(first_name)
            .bind(last_name)
            .bind(class_id)
            .execute(&self.pool)
            .await?;
            student_ids.push(id);
        }

        Ok(SeedSummary {
            class_id,
            period_id,
            period_start,
            subject_ids,
            evaluation_kind_ids,
            student_ids,
        })
    }
}

fn decode(err: impl std::fmt::Display) -> sqlx::Error {
    sqlx::Error::Decode(err.to_string().into())
}

#[async_trait]
impl GradeStore for PgStore {
    type Tx = PgTransaction;

    async fn begin(&self, key: AverageKey) -> Result<PgTransaction> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(key.to_string())
            .execute(&mut *tx)
            .await?;
        Ok(PgTransaction { tx, key })
    }

    async fn student(&self, id: Uuid) -> Result<Option<Student>> {
        sqlx::query(
            "SELECT id, matricule, first_name, last_name, class_id, status \
             FROM gradebook.students WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| student_from_row(&row))
        .transpose()
    }

    async fn class(&self, id: Uuid) -> Result<Option<SchoolClass>> {
        let row = sqlx::query("SELECT id, name FROM gradebook.classes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(SchoolClass {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
            })),
            None => Ok(None),
        }
    }

    async fn subject(&self, id: Uuid) -> Result<Option<Subject>> {
        let row = sqlx::query("SELECT id, name, coefficient FROM gradebook.subjects WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(row) => Ok(Some(Subject {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                coefficient: row.try_get("coefficient")?,
            })),
            None => Ok(None),
        }
    }

    async fn evaluation_kind(&self, id: Uuid) -> Result<Option<EvaluationKind>> {
        let row = sqlx::query(
            "SELECT id, name, coefficient FROM gradebook.evaluation_kinds WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => Ok(Some(EvaluationKind {
                id: row.try_get("id")?,
                name: row.try_get("name")?,
                coefficient: row.try_get("coefficient")?,
            })),
            None => Ok(None),
        }
    }

    async fn period(&self, id: Uuid) -> Result<Option<Period>> {
        sqlx::query(
            "SELECT id, name, start_date, end_date, closed FROM gradebook.periods WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| period_from_row(&row))
        .transpose()
    }

    async fn active_students(&self, class_id: Uuid) -> Result<Vec<Student>> {
        let rows = sqlx::query(
            "SELECT id, matricule, first_name, last_name, class_id, status \
             FROM gradebook.students \
             WHERE class_id = $1 AND status = 'active' \
             ORDER BY last_name, id",
        )
        .bind(class_id)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(student_from_row).collect()
    }

    async fn subject_averages(
        &self,
        student_id: Uuid,
        period_id: Uuid,
    ) -> Result<Vec<SubjectAverageLine>> {
        let rows = sqlx::query(
            "SELECT s.id AS subject_id, s.name, s.coefficient, a.average, a.entry_count \
             FROM gradebook.subject_averages a \
             JOIN gradebook.subjects s ON s.id = a.subject_id \
             WHERE a.student_id = $1 AND a.period_id = $2 \
             ORDER BY s.name",
        )
        .bind(student_id)
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;

        let mut lines = Vec::with_capacity(rows.len());
        for row in rows {
            lines.push(SubjectAverageLine {
                subject_id: row.try_get("subject_id")?,
                subject_name: row.try_get("name")?,
                coefficient: row.try_get("coefficient")?,
                average: row.try_get("average")?,
                entry_count: row.try_get("entry_count")?,
            });
        }
        Ok(lines)
    }

    async fn cached_average(&self, key: AverageKey) -> Result<Option<SubjectAverage>> {
        sqlx::query(
            "SELECT average, entry_count, weighted_points, computed_at \
             FROM gradebook.subject_averages \
             WHERE student_id = $1 AND subject_id = $2 AND period_id = $3",
        )
        .bind(key.student_id)
        .bind(key.subject_id)
        .bind(key.period_id)
        .fetch_optional(&self.pool)
        .await?
        .map(|row| average_from_row(key, &row))
        .transpose()
    }

    async fn period_keys(&self, period_id: Uuid) -> Result<Vec<AverageKey>> {
        let rows = sqlx::query(
            "SELECT student_id, subject_id FROM gradebook.graded_entries WHERE period_id = $1 \
             UNION \
             SELECT student_id, subject_id FROM gradebook.subject_averages WHERE period_id = $1 \
             ORDER BY student_id, subject_id",
        )
        .bind(period_id)
        .fetch_all(&self.pool)
        .await?;

        let mut keys = Vec::with_capacity(rows.len());
        for row in rows {
            keys.push(AverageKey::new(
                row.try_get("student_id")?,
                row.try_get("subject_id")?,
                period_id,
            ));
        }
        Ok(keys)
    }

    async fn close_period(&self, period_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE gradebook.periods SET closed = TRUE WHERE id = $1 AND closed = FALSE",
        )
        .bind(period_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}

/// A database transaction holding the advisory lock of one key.
pub struct PgTransaction {
    tx: Transaction<'static, Postgres>,
    key: AverageKey,
}

#[async_trait]
impl KeyTransaction for PgTransaction {
    fn key(&self) -> AverageKey {
        self.key
    }

    async fn period(&mut self) -> Result<Option<Period>> {
        sqlx::query(
            "SELECT id, name, start_date, end_date, closed \
             FROM gradebook.periods WHERE id = $1 FOR SHARE",
        )
        .bind(self.key.period_id)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(|row| period_from_row(&row))
        .transpose()
    }

    async fn weighted_values(&mut self) -> Result<Vec<WeightedValue>> {
        let rows = sqlx::query(
            "SELECT e.value, k.coefficient \
             FROM gradebook.graded_entries e \
             JOIN gradebook.evaluation_kinds k ON k.id = e.evaluation_kind_id \
             WHERE e.student_id = $1 AND e.subject_id = $2 AND e.period_id = $3",
        )
        .bind(self.key.student_id)
        .bind(self.key.subject_id)
        .bind(self.key.period_id)
        .fetch_all(&mut *self.tx)
        .await?;

        let mut values = Vec::with_capacity(rows.len());
        for row in rows {
            values.push(WeightedValue {
                value: row.try_get("value")?,
                coefficient: row.try_get("coefficient")?,
            });
        }
        Ok(values)
    }

    async fn upsert_entry(&mut self, entry: &GradedEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gradebook.graded_entries
            (student_id, subject_id, period_id, evaluation_kind_id, value, evaluated_on, comment)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (student_id, subject_id, period_id, evaluation_kind_id) DO UPDATE
            SET value = EXCLUDED.value,
                evaluated_on = EXCLUDED.evaluated_on,
                comment = EXCLUDED.comment,
                updated_at = NOW()
            "#,
        )
        .bind(entry.student_id)
        .bind(entry.subject_id)
        .bind(entry.period_id)
        .bind(entry.evaluation_kind_id)
        .bind(entry.value)
        .bind(entry.evaluated_on)
        .bind(&entry.comment)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn delete_entry(&mut self, evaluation_kind_id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM gradebook.graded_entries \
             WHERE student_id = $1 AND subject_id = $2 AND period_id = $3 \
             AND evaluation_kind_id = $4",
        )
        .bind(self.key.student_id)
        .bind(self.key.subject_id)
        .bind(self.key.period_id)
        .bind(evaluation_kind_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn put_average(&mut self, average: &SubjectAverage) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO gradebook.subject_averages
            (student_id, subject_id, period_id, average, entry_count, weighted_points, computed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (student_id, subject_id, period_id) DO UPDATE
            SET average = EXCLUDED.average,
                entry_count = EXCLUDED.entry_count,
                weighted_points = EXCLUDED.weighted_points,
                computed_at = EXCLUDED.computed_at
            "#,
        )
        .bind(average.key.student_id)
        .bind(average.key.subject_id)
        .bind(average.key.period_id)
        .bind(average.average)
        .bind(average.entry_count)
        .bind(average.weighted_points)
        .bind(average.computed_at)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn clear_average(&mut self) -> Result<()> {
        sqlx::query(
            "DELETE FROM gradebook.subject_averages \
             WHERE student_id = $1 AND subject_id = $2 AND period_id = $3",
        )
        .bind(self.key.student_id)
        .bind(self.key.subject_id)
        .bind(self.key.period_id)
        .execute(&mut *self.tx)
        .await?;
        Ok(())
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
