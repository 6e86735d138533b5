use std::cmp::Ordering;

use rust_decimal::Decimal;

use crate::models::{RankedResult, Student};

/// A class member and their general average for the period, if any.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub student: Student,
    pub general_average: Option<Decimal>,
}

fn tie_order(a: &Student, b: &Student) -> Ordering {
    a.last_name
        .cmp(&b.last_name)
        .then_with(|| a.first_name.cmp(&b.first_name))
        .then_with(|| a.matricule.cmp(&b.matricule))
}

/// Competition ranking: rank = 1 + number of students strictly ahead.
///
/// Students without a general average are dropped before ranking and do
/// not count towards the cohort. Inside a tie block students are listed by
/// last name, first name, then matricule.
pub fn rank_cohort(candidates: Vec<Candidate>) -> Vec<RankedResult> {
    let mut graded: Vec<(Student, Decimal)> = candidates
        .into_iter()
        .filter_map(|candidate| {
            candidate
                .general_average
                .map(|average| (candidate.student, average))
        })
        .collect();

    graded.sort_by(|(sa, a), (sb, b)| b.cmp(a).then_with(|| tie_order(sa, sb)));

    let mut ranks = Vec::with_capacity(graded.len());
    for (position, (_, average)) in graded.iter().enumerate() {
        let rank = match position {
            0 => 1,
            _ if graded[position - 1].1 == *average => ranks[position - 1],
            _ => position + 1,
        };
        ranks.push(rank);
    }

    let mut results = Vec::with_capacity(graded.len());
    let mut start = 0;
    while start < graded.len() {
        let mut end = start + 1;
        while end < graded.len() && ranks[end] == ranks[start] {
            end += 1;
        }
        let tie_count = end - start;
        for index in start..end {
            let (student, average) = &graded[index];
            results.push(RankedResult {
                student_id: student.id,
                student_name: student.full_name(),
                matricule: student.matricule.clone(),
                general_average: *average,
                rank: ranks[index],
                tie_count,
                is_tied: tie_count > 1,
            });
        }
        start = end;
    }

    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::StudentStatus;
    use uuid::Uuid;

    fn student(first: &str, last: &str) -> Student {
        Student {
            id: Uuid::new_v4(),
            matricule: format!("M-{last}-{first}"),
            first_name: first.to_string(),
            last_name: last.to_string(),
            class_id: Uuid::nil(),
            status: StudentStatus::Active,
        }
    }

    fn candidate(first: &str, last: &str, average: Option<&str>) -> Candidate {
        Candidate {
            student: student(first, last),
            general_average: average.map(|value| value.parse().expect("valid decimal")),
        }
    }

    #[test]
    fn ties_share_a_rank_and_the_next_rank_skips() {
        let results = rank_cohort(vec![
            candidate("Ana", "Diop", Some("8.0")),
            candidate("Binta", "Fall", Some("7.0")),
            candidate("Cheikh", "Ba", Some("9.0")),
            candidate("Dior", "Sow", Some("8.00")),
        ]);

        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2, 4]);

        let ties: Vec<bool> = results.iter().map(|r| r.is_tied).collect();
        assert_eq!(ties, vec![false, true, true, false]);
        assert_eq!(results[1].tie_count, 2);
        assert_eq!(results[3].tie_count, 1);
    }

    #[test]
    fn tie_block_is_ordered_by_name() {
        let results = rank_cohort(vec![
            candidate("Zeyna", "Ndiaye", Some("6.5")),
            candidate("Awa", "Ndiaye", Some("6.5")),
            candidate("Moussa", "Camara", Some("6.5")),
        ]);

        let names: Vec<&str> = results.iter().map(|r| r.student_name.as_str()).collect();
        assert_eq!(names, vec!["Moussa Camara", "Awa Ndiaye", "Zeyna Ndiaye"]);
        assert!(results.iter().all(|r| r.rank == 1 && r.tie_count == 3));
    }

    #[test]
    fn students_without_data_are_not_ranked() {
        let results = rank_cohort(vec![
            candidate("Ana", "Diop", Some("5.5")),
            candidate("Fatou", "Gueye", None),
            candidate("Ibou", "Kane", Some("4")),
        ]);

        assert_eq!(results.len(), 2);
        assert_eq!(results[1].rank, 2);
        assert!(results.iter().all(|r| r.matricule != "M-Gueye-Fatou"));
    }

    #[test]
    fn empty_cohort_yields_nothing() {
        assert!(rank_cohort(vec![candidate("Ana", "Diop", None)]).is_empty());
    }

    #[test]
    fn trailing_tie_block_is_flagged() {
        let results = rank_cohort(vec![
            candidate("Ana", "Diop", Some("9")),
            candidate("Binta", "Fall", Some("3")),
            candidate("Cheikh", "Ba", Some("3")),
        ]);
        let ranks: Vec<usize> = results.iter().map(|r| r.rank).collect();
        assert_eq!(ranks, vec![1, 2, 2]);
        assert!(results[1].is_tied && results[2].is_tied);
    }
}
