use std::fmt::Write;

use rust_decimal::Decimal;

use crate::models::{Bulletin, ClassRanking};

const NO_GRADE: &str = "no grade";

/// Grade band of a general average, judged as a fraction of the scale.
pub fn mention(average: Decimal, max_scale: Decimal) -> &'static str {
    let tenths = average * Decimal::TEN;
    if tenths >= max_scale * Decimal::new(8, 0) {
        "Très Bien"
    } else if tenths >= max_scale * Decimal::new(7, 0) {
        "Bien"
    } else if tenths >= max_scale * Decimal::new(6, 0) {
        "Assez Bien"
    } else if tenths >= max_scale * Decimal::new(5, 0) {
        "Passable"
    } else {
        "Insuffisant"
    }
}

pub fn ordinal(rank: usize) -> String {
    if rank == 1 {
        "1er".to_string()
    } else {
        format!("{rank}e")
    }
}

pub fn format_average(average: Option<Decimal>, max_scale: Decimal) -> String {
    match average {
        Some(value) => format!("{value:.2}/{max_scale}"),
        None => NO_GRADE.to_string(),
    }
}

pub fn build_ranking_report(ranking: &ClassRanking, max_scale: Decimal) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Class Ranking: {}", ranking.class_name);
    let _ = writeln!(
        output,
        "Period {} ({} ranked students, class average {})",
        ranking.period_name,
        ranking.cohort_size,
        format_average(ranking.class_average, max_scale)
    );
    let _ = writeln!(output);

    if ranking.results.is_empty() {
        let _ = writeln!(output, "No graded students for this period.");
        return output;
    }

    let _ = writeln!(output, "| Rank | Matricule | Student | Average |");
    let _ = writeln!(output, "|------|-----------|---------|---------|");
    for result in &ranking.results {
        let rank = if result.is_tied {
            format!("{} ex aequo", ordinal(result.rank))
        } else {
            ordinal(result.rank)
        };
        let _ = writeln!(
            output,
            "| {} | {} | {} | {} |",
            rank,
            result.matricule,
            result.student_name,
            format_average(Some(result.general_average), max_scale)
        );
    }

    output
}

pub fn build_bulletin(bulletin: &Bulletin, max_scale: Decimal) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Bulletin: {}", bulletin.student.full_name());
    let _ = writeln!(
        output,
        "Matricule {} | Class {} | {}",
        bulletin.student.matricule, bulletin.class_name, bulletin.period.name
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Subjects");

    if bulletin.subjects.is_empty() {
        let _ = writeln!(output, "No grades recorded for this period.");
    } else {
        for line in &bulletin.subjects {
            let _ = writeln!(
                output,
                "- {} (coef {}): {} across {} entries",
                line.subject_name,
                line.coefficient,
                format_average(Some(line.average), max_scale),
                line.entry_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Summary");
    let _ = writeln!(
        output,
        "- General average: {}",
        format_average(bulletin.general_average, max_scale)
    );

    match bulletin.rank {
        Some(rank) => {
            let tie = if bulletin.is_tied { " ex aequo" } else { "" };
            let _ = writeln!(
                output,
                "- Rank: {}{} of {}",
                ordinal(rank),
                tie,
                bulletin.cohort_size
            );
        }
        None => {
            let _ = writeln!(output, "- Rank: unranked");
        }
    }

    let _ = writeln!(
        output,
        "- Class average: {}",
        format_average(bulletin.class_average, max_scale)
    );
    let _ = writeln!(
        output,
        "- Mention: {}",
        bulletin.mention.as_deref().unwrap_or("-")
    );

    output
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Period, RankedResult, Student, StudentStatus};
    use chrono::NaiveDate;
    use uuid::Uuid;

    fn dec(value: &str) -> Decimal {
        value.parse().expect("valid decimal")
    }

    fn result(name: &str, average: &str, rank: usize, tie_count: usize) -> RankedResult {
        RankedResult {
            student_id: Uuid::new_v4(),
            student_name: name.to_string(),
            matricule: format!("M-{name}"),
            general_average: dec(average),
            rank,
            tie_count,
            is_tied: tie_count > 1,
        }
    }

    fn bulletin_without_grades() -> Bulletin {
        Bulletin {
            student: Student {
                id: Uuid::new_v4(),
                matricule: "CM2-009".to_string(),
                first_name: "Fatou".to_string(),
                last_name: "Gueye".to_string(),
                class_id: Uuid::new_v4(),
                status: StudentStatus::Active,
            },
            class_name: "CM2 A".to_string(),
            period: Period {
                id: Uuid::new_v4(),
                name: "Trimestre 1".to_string(),
                start_date: NaiveDate::from_ymd_opt(2026, 10, 1).expect("date"),
                end_date: NaiveDate::from_ymd_opt(2026, 12, 20).expect("date"),
                closed: false,
            },
            subjects: Vec::new(),
            general_average: None,
            rank: None,
            is_tied: false,
            cohort_size: 3,
            class_average: Some(dec("6.5")),
            mention: None,
        }
    }

    #[test]
    fn mentions_follow_scale_fractions() {
        let scale = Decimal::TEN;
        assert_eq!(mention(dec("8"), scale), "Très Bien");
        assert_eq!(mention(dec("7.99"), scale), "Bien");
        assert_eq!(mention(dec("6"), scale), "Assez Bien");
        assert_eq!(mention(dec("5"), scale), "Passable");
        assert_eq!(mention(dec("4.99"), scale), "Insuffisant");
        assert_eq!(mention(dec("16"), dec("20")), "Très Bien");
    }

    #[test]
    fn ordinals_use_french_suffixes() {
        assert_eq!(ordinal(1), "1er");
        assert_eq!(ordinal(2), "2e");
        assert_eq!(ordinal(14), "14e");
    }

    #[test]
    fn absent_average_never_renders_as_zero() {
        assert_eq!(format_average(None, Decimal::TEN), "no grade");
        assert_eq!(format_average(Some(dec("6.1")), Decimal::TEN), "6.10/10");
    }

    #[test]
    fn ranking_report_marks_ties() {
        let ranking = ClassRanking {
            class_id: Uuid::new_v4(),
            class_name: "CM2 A".to_string(),
            period_id: Uuid::new_v4(),
            period_name: "Trimestre 1".to_string(),
            cohort_size: 3,
            class_average: Some(dec("8.33")),
            results: vec![
                result("Cheikh Ba", "9", 1, 1),
                result("Ana Diop", "8", 2, 2),
                result("Dior Sow", "8", 2, 2),
            ],
        };

        let report = build_ranking_report(&ranking, Decimal::TEN);
        assert!(report.contains("| 1er | M-Cheikh Ba | Cheikh Ba | 9.00/10 |"));
        assert!(report.contains("| 2e ex aequo | M-Ana Diop | Ana Diop | 8.00/10 |"));
        assert!(report.contains("class average 8.33/10"));
    }

    #[test]
    fn empty_ranking_says_so() {
        let ranking = ClassRanking {
            class_id: Uuid::new_v4(),
            class_name: "CM2 B".to_string(),
            period_id: Uuid::new_v4(),
            period_name: "Trimestre 2".to_string(),
            cohort_size: 0,
            class_average: None,
            results: Vec::new(),
        };
        let report = build_ranking_report(&ranking, Decimal::TEN);
        assert!(report.contains("class average no grade"));
        assert!(report.contains("No graded students for this period."));
    }

    #[test]
    fn bulletin_without_grades_shows_no_grade() {
        let report = build_bulletin(&bulletin_without_grades(), Decimal::TEN);
        assert!(report.contains("- General average: no grade"));
        assert!(report.contains("- Rank: unranked"));
        assert!(report.contains("- Class average: 6.50/10"));
        assert!(!report.contains("0.00/10"));
    }
}
