use thiserror::Error;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::GradingAction;
use crate::repositories;

#[derive(Debug, Error)]
pub(crate) enum DispatchError {
    #[error("Exam not found")]
    ExamNotFound,
    #[error("Exam has no correctors")]
    NoCorrectors,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

pub(crate) struct DispatchOutcome {
    pub(crate) dispatch_run_id: String,
    pub(crate) assignments: Vec<(String, String)>,
}

/// Round-robin all READY copies of an exam across its correctors. Runs in a
/// single transaction under an exam-level advisory lock; re-running replaces
/// prior assignments wholesale.
pub(crate) async fn dispatch_exam(
    state: &AppState,
    exam_id: &str,
    actor_id: &str,
) -> Result<DispatchOutcome, DispatchError> {
    repositories::exams::find_by_id(state.db(), exam_id)
        .await?
        .ok_or(DispatchError::ExamNotFound)?;

    let correctors = repositories::exams::list_correctors(state.db(), exam_id).await?;
    if correctors.is_empty() {
        return Err(DispatchError::NoCorrectors);
    }

    let dispatch_run_id = Uuid::new_v4().to_string();
    let now = primitive_now_utc();

    let mut tx = state.db().begin().await?;
    repositories::copies::advisory_lock_exam(&mut tx, exam_id).await?;

    // Stable sort of copy ids makes the pass deterministic.
    let copy_ids = repositories::copies::list_ready_ids_for_dispatch(&mut tx, exam_id).await?;

    let mut assignments = Vec::with_capacity(copy_ids.len());
    for (index, copy_id) in copy_ids.iter().enumerate() {
        let corrector = &correctors[index % correctors.len()];
        repositories::copies::assign_corrector(&mut tx, copy_id, corrector, &dispatch_run_id, now)
            .await?;
        repositories::events::append(
            &mut tx,
            repositories::events::AppendEvent {
                id: &Uuid::new_v4().to_string(),
                copy_id,
                actor_id: Some(actor_id),
                action: GradingAction::Dispatch,
                metadata: serde_json::json!({
                    "corrector": corrector,
                    "dispatch_run_id": dispatch_run_id,
                }),
                created_at: now,
            },
        )
        .await?;
        assignments.push((copy_id.clone(), corrector.clone()));
    }

    tx.commit().await?;

    Ok(DispatchOutcome { dispatch_run_id, assignments })
}

/// Same round-robin the dispatcher uses; split out so balance is checkable
/// without a database.
pub(crate) fn round_robin<'a>(
    copy_ids: &'a [String],
    correctors: &'a [String],
) -> Vec<(&'a str, &'a str)> {
    copy_ids
        .iter()
        .enumerate()
        .map(|(index, copy_id)| {
            (copy_id.as_str(), correctors[index % correctors.len()].as_str())
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn ids(prefix: &str, count: usize) -> Vec<String> {
        (0..count).map(|i| format!("{prefix}-{i:03}")).collect()
    }

    #[test]
    fn assignment_counts_stay_within_one_of_each_other() {
        for (n, k) in [(10, 3), (7, 7), (5, 2), (1, 4), (12, 5)] {
            let copies = ids("copy", n);
            let correctors = ids("user", k);
            let assignments = round_robin(&copies, &correctors);

            let mut counts: HashMap<&str, usize> = HashMap::new();
            for (_, corrector) in &assignments {
                *counts.entry(corrector).or_default() += 1;
            }

            let floor = n / k;
            let ceil = n.div_ceil(k);
            for corrector in &correctors {
                let assigned = counts.get(corrector.as_str()).copied().unwrap_or(0);
                assert!(
                    (floor..=ceil).contains(&assigned),
                    "n={n} k={k}: corrector got {assigned}, expected within [{floor}, {ceil}]"
                );
            }
            let total: usize = counts.values().sum();
            assert_eq!(total, n);
        }
    }

    #[test]
    fn assignment_is_deterministic_for_sorted_input() {
        let copies = ids("copy", 4);
        let correctors = ids("user", 2);
        let first = round_robin(&copies, &correctors);
        let second = round_robin(&copies, &correctors);
        assert_eq!(first, second);
        assert_eq!(first[0], ("copy-000", "user-000"));
        assert_eq!(first[1], ("copy-001", "user-001"));
        assert_eq!(first[2], ("copy-002", "user-000"));
    }
}
