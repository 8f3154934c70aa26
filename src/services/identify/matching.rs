//! Fuzzy matching of OCR'd header fields against the enrollment list.
//! Date of birth filters first and is exact; names compare accent-folded
//! with a strict margin between the top two candidates.

use serde::{Deserialize, Serialize};
use time::Date;

use crate::db::models::Student;

const LAST_NAME_WEIGHT: f64 = 0.6;
const FIRST_NAME_WEIGHT: f64 = 0.4;
const TOP_K: usize = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MatchStatus {
    Match,
    Ambiguous,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub(crate) struct Candidate {
    pub(crate) student_id: String,
    pub(crate) last_name: String,
    pub(crate) first_name: String,
    pub(crate) score: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct MatchResult {
    pub(crate) status: MatchStatus,
    pub(crate) top_k: Vec<Candidate>,
}

pub(crate) fn match_students(
    last_name: &str,
    first_name: &str,
    dob: Date,
    students: &[Student],
    threshold: f64,
    margin: f64,
) -> MatchResult {
    let mut candidates: Vec<Candidate> = students
        .iter()
        .filter(|student| student.date_of_birth == dob)
        .map(|student| Candidate {
            student_id: student.id.clone(),
            last_name: student.last_name.clone(),
            first_name: student.first_name.clone(),
            score: composite_similarity(last_name, first_name, student),
        })
        .collect();

    candidates.sort_by(|a, b| {
        b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal)
    });
    candidates.truncate(TOP_K);

    let status = match candidates.as_slice() {
        [] => MatchStatus::None,
        [top] if top.score >= threshold => MatchStatus::Match,
        [_] => MatchStatus::None,
        [top, second, ..] => {
            if top.score < threshold {
                MatchStatus::None
            } else if top.score - second.score > margin {
                MatchStatus::Match
            } else {
                MatchStatus::Ambiguous
            }
        }
    };

    MatchResult { status, top_k: candidates }
}

fn composite_similarity(last_name: &str, first_name: &str, student: &Student) -> f64 {
    LAST_NAME_WEIGHT * name_similarity(last_name, &student.last_name)
        + FIRST_NAME_WEIGHT * name_similarity(first_name, &student.first_name)
}

pub(crate) fn name_similarity(a: &str, b: &str) -> f64 {
    let a = normalize_name(a);
    let b = normalize_name(b);
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    let max_len = a.chars().count().max(b.chars().count());
    if max_len == 0 {
        return 1.0;
    }
    let distance = levenshtein(&a, &b);
    1.0 - distance as f64 / max_len as f64
}

/// Uppercase, accent-folded, whitespace collapsed to single spaces. Hyphens
/// become spaces so compound names compare term by term.
pub(crate) fn normalize_name(raw: &str) -> String {
    let folded: String = raw
        .chars()
        .map(fold_accent)
        .map(|c| if c == '-' || c == '\'' { ' ' } else { c })
        .collect();

    folded.split_whitespace().collect::<Vec<_>>().join(" ").to_uppercase()
}

fn fold_accent(c: char) -> char {
    match c {
        'à' | 'á' | 'â' | 'ä' | 'À' | 'Á' | 'Â' | 'Ä' => 'a',
        'ç' | 'Ç' => 'c',
        'é' | 'è' | 'ê' | 'ë' | 'É' | 'È' | 'Ê' | 'Ë' => 'e',
        'í' | 'î' | 'ï' | 'Í' | 'Î' | 'Ï' => 'i',
        'ó' | 'ô' | 'ö' | 'Ó' | 'Ô' | 'Ö' => 'o',
        'ú' | 'ù' | 'û' | 'ü' | 'Ú' | 'Ù' | 'Û' | 'Ü' => 'u',
        'ÿ' | 'Ÿ' => 'y',
        'ñ' | 'Ñ' => 'n',
        other => other.to_ascii_lowercase(),
    }
}

fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];

    for (i, &ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, &cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }

    previous[b.len()]
}

/// Strict French date, DD/MM/YYYY only.
pub(crate) fn parse_dob(raw: &str) -> Option<Date> {
    let parts: Vec<&str> = raw.trim().split('/').collect();
    let [day, month, year] = parts.as_slice() else {
        return None;
    };
    if day.len() != 2 || month.len() != 2 || year.len() != 4 {
        return None;
    }

    let day: u8 = day.parse().ok()?;
    let month: u8 = month.parse().ok()?;
    let year: i32 = year.parse().ok()?;

    let month = time::Month::try_from(month).ok()?;
    Date::from_calendar_date(year, month, day).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;

    fn student(id: &str, last: &str, first: &str, dob: Date) -> Student {
        Student {
            id: id.to_string(),
            last_name: last.to_string(),
            first_name: first.to_string(),
            date_of_birth: dob,
            class_name: "3A".to_string(),
            created_at: primitive_now_utc(),
        }
    }

    fn dob(day: u8, month: u8, year: i32) -> Date {
        Date::from_calendar_date(year, time::Month::try_from(month).unwrap(), day).unwrap()
    }

    #[test]
    fn normalization_folds_accents_and_hyphens() {
        assert_eq!(normalize_name("Jean-Édouard"), "JEAN EDOUARD");
        assert_eq!(normalize_name("  DUPONT\t MARTIN "), "DUPONT MARTIN");
        assert_eq!(normalize_name("Héloïse"), "HELOISE");
    }

    #[test]
    fn similarity_is_one_for_equivalent_names() {
        assert_eq!(name_similarity("Dupont", "DUPONT"), 1.0);
        assert_eq!(name_similarity("Héloïse", "Heloise"), 1.0);
    }

    #[test]
    fn similarity_degrades_with_edits() {
        let close = name_similarity("DUPONT", "DUPOND");
        let far = name_similarity("DUPONT", "MARTIN");
        assert!(close > 0.8);
        assert!(far < 0.4);
        assert!(close > far);
    }

    #[test]
    fn dob_filter_is_exact() {
        let students = [
            student("s1", "DUPONT", "MARIE", dob(15, 3, 2008)),
            student("s2", "DUPONT", "MARIE", dob(16, 3, 2008)),
        ];
        let result = match_students("DUPONT", "MARIE", dob(15, 3, 2008), &students, 0.75, 0.15);
        assert_eq!(result.status, MatchStatus::Match);
        assert_eq!(result.top_k.len(), 1);
        assert_eq!(result.top_k[0].student_id, "s1");
    }

    #[test]
    fn near_tie_is_ambiguous() {
        let students = [
            student("s1", "DUPONT", "MARIE", dob(15, 3, 2008)),
            student("s2", "DUPOND", "MARIE", dob(15, 3, 2008)),
        ];
        let result = match_students("DUPONT", "MARIE", dob(15, 3, 2008), &students, 0.75, 0.15);
        assert_eq!(result.status, MatchStatus::Ambiguous);
        assert_eq!(result.top_k.len(), 2);
    }

    #[test]
    fn no_candidate_clears_threshold() {
        let students = [student("s1", "MARTIN", "PAUL", dob(15, 3, 2008))];
        let result = match_students("DURAND", "ALICE", dob(15, 3, 2008), &students, 0.75, 0.15);
        assert_eq!(result.status, MatchStatus::None);
    }

    #[test]
    fn empty_pool_is_none() {
        let result = match_students("DUPONT", "MARIE", dob(15, 3, 2008), &[], 0.75, 0.15);
        assert_eq!(result.status, MatchStatus::None);
        assert!(result.top_k.is_empty());
    }

    #[test]
    fn dob_parses_strictly() {
        assert_eq!(parse_dob("15/03/2008"), Some(dob(15, 3, 2008)));
        assert_eq!(parse_dob("15/3/2008"), None);
        assert_eq!(parse_dob("2008-03-15"), None);
        assert_eq!(parse_dob("32/01/2008"), None);
        assert_eq!(parse_dob(""), None);
    }
}
