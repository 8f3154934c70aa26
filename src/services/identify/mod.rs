//! Copy identification: read the identity header of each booklet, match it
//! against the student list, and cross-check booklets of the same copy.
//! Local grid OCR runs first; the cloud provider is only consulted when the
//! local read is below the strict confidence floor, and its answer is held
//! to the same floor. Any pipeline failure degrades to manual identification
//! instead of blocking the copy.

pub(crate) mod cloud;
pub(crate) mod grid_ocr;
pub(crate) mod matching;

use std::io::Cursor;

use thiserror::Error;
use time::Date;
use tracing::warn;
use uuid::Uuid;

use crate::core::state::AppState;
use crate::core::time::primitive_now_utc;
use crate::db::types::{CrossValidation, GradingAction, OcrMode};
use crate::repositories;
use crate::services::identify::cloud::CloudOcrService;
use crate::services::identify::matching::{Candidate, MatchResult, MatchStatus};

#[derive(Debug, Error)]
pub(crate) enum IdentifyError {
    #[error("Copy not found")]
    CopyNotFound,
    #[error("Student not found")]
    StudentNotFound,
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// One successfully read booklet header.
#[derive(Debug, Clone)]
struct SheetReading {
    last_name: String,
    first_name: String,
    dob: Date,
    confidence: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Decision {
    Auto { student_id: String },
    SemiAuto,
    Manual,
}

/// Runs the full cascade for one copy and stores the outcome. The copy is
/// only linked to a student on an unambiguous, cross-validated match.
pub(crate) async fn identify_copy(
    state: &AppState,
    cloud: Option<&CloudOcrService>,
    copy_id: &str,
) -> Result<(), IdentifyError> {
    let copy = repositories::copies::find_by_id(state.db(), copy_id)
        .await?
        .ok_or(IdentifyError::CopyNotFound)?;
    let booklets = repositories::booklets::list_for_copy(state.db(), copy_id).await?;

    let mut readings = Vec::new();
    for booklet in &booklets {
        match read_sheet(state, cloud, booklet.pages_images.0.first()).await {
            Some(reading) => readings.push(reading),
            None => {
                warn!(copy_id, booklet_id = %booklet.id, "booklet header unreadable");
            }
        }
    }

    let students = repositories::students::list_all(state.db()).await?;
    let ocr = state.settings().ocr();

    let sheet_matches: Vec<MatchResult> = readings
        .iter()
        .map(|reading| {
            matching::match_students(
                &reading.last_name,
                &reading.first_name,
                reading.dob,
                &students,
                ocr.match_threshold,
                ocr.match_margin,
            )
        })
        .collect();

    let (decision, cross_validation) = decide(&sheet_matches);

    let header_text = readings.first().map(|reading| {
        format!("{} / {} / {}", reading.last_name, reading.first_name, reading.dob)
    });
    let confidence = readings
        .iter()
        .map(|reading| reading.confidence)
        .fold(None, |acc: Option<f64>, value| Some(acc.map_or(value, |a| a.min(value))));
    let top_candidates = sheet_matches
        .first()
        .map(|result| candidates_json(&result.top_k))
        .unwrap_or_else(|| serde_json::Value::Array(Vec::new()));

    let (mode, chosen_rank) = match &decision {
        Decision::Auto { .. } => (OcrMode::Auto, Some(1)),
        Decision::SemiAuto => (OcrMode::SemiAuto, None),
        Decision::Manual => (OcrMode::Manual, None),
    };

    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;
    repositories::ocr_results::upsert(
        &mut tx,
        repositories::ocr_results::UpsertOcrResult {
            copy_id,
            header_text: header_text.as_deref(),
            confidence,
            ocr_mode: mode,
            top_candidates,
            chosen_rank,
            cross_validation,
            now,
        },
    )
    .await?;

    if let Decision::Auto { student_id } = &decision {
        repositories::copies::set_student(&mut tx, &copy.id, Some(student_id), true, now).await?;
        repositories::events::append(
            &mut tx,
            repositories::events::AppendEvent {
                id: &Uuid::new_v4().to_string(),
                copy_id: &copy.id,
                actor_id: None,
                action: GradingAction::Identified,
                metadata: serde_json::json!({
                    "student_id": student_id,
                    "ocr_mode": "auto",
                }),
                created_at: now,
            },
        )
        .await?;
    }
    tx.commit().await?;

    Ok(())
}

/// Records an operator's candidate choice and links the student. Used both
/// for picking among the stored candidates and for fully manual overrides.
pub(crate) async fn choose_student(
    state: &AppState,
    copy_id: &str,
    student_id: &str,
    actor_id: &str,
) -> Result<(), IdentifyError> {
    let copy = repositories::copies::find_by_id(state.db(), copy_id)
        .await?
        .ok_or(IdentifyError::CopyNotFound)?;
    repositories::students::find_by_id(state.db(), student_id)
        .await?
        .ok_or(IdentifyError::StudentNotFound)?;

    let existing = repositories::ocr_results::find_by_copy(state.db(), copy_id).await?;
    let chosen_rank = existing.as_ref().and_then(|result| {
        result.top_candidates.0.as_array().and_then(|candidates| {
            candidates.iter().position(|candidate| {
                candidate.get("student_id").and_then(serde_json::Value::as_str)
                    == Some(student_id)
            })
        })
    });
    // A pick outside the stored candidates is a manual override.
    let manual_override = chosen_rank.is_none();

    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;
    if existing.is_none() {
        repositories::ocr_results::upsert(
            &mut tx,
            repositories::ocr_results::UpsertOcrResult {
                copy_id,
                header_text: None,
                confidence: None,
                ocr_mode: OcrMode::Manual,
                top_candidates: serde_json::Value::Array(Vec::new()),
                chosen_rank: None,
                cross_validation: None,
                now,
            },
        )
        .await?;
    }
    repositories::ocr_results::record_choice(
        &mut tx,
        copy_id,
        chosen_rank.map(|rank| rank as i32 + 1),
        manual_override,
        now,
    )
    .await?;
    repositories::copies::set_student(&mut tx, &copy.id, Some(student_id), true, now).await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id: &copy.id,
            actor_id: Some(actor_id),
            action: GradingAction::Identified,
            metadata: serde_json::json!({
                "student_id": student_id,
                "ocr_mode": if manual_override { "manual" } else { "semi_auto" },
            }),
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Detaches the student from a copy, keeping the OCR candidates so the
/// operator can pick again.
pub(crate) async fn rollback_identification(
    state: &AppState,
    copy_id: &str,
    actor_id: &str,
) -> Result<(), IdentifyError> {
    let copy = repositories::copies::find_by_id(state.db(), copy_id)
        .await?
        .ok_or(IdentifyError::CopyNotFound)?;

    let previous_student = copy.student_id.clone();
    let now = primitive_now_utc();
    let mut tx = state.db().begin().await?;
    repositories::copies::set_student(&mut tx, &copy.id, None, false, now).await?;
    repositories::ocr_results::clear_choice(&mut tx, copy_id, now).await?;
    repositories::events::append(
        &mut tx,
        repositories::events::AppendEvent {
            id: &Uuid::new_v4().to_string(),
            copy_id: &copy.id,
            actor_id: Some(actor_id),
            action: GradingAction::IdentifyRollback,
            metadata: serde_json::json!({ "previous_student_id": previous_student }),
            created_at: now,
        },
    )
    .await?;
    tx.commit().await?;

    Ok(())
}

/// Reads one booklet's first page. Grid OCR first; the cloud provider only
/// when the local read misses the strict floor or a well-formed date.
async fn read_sheet(
    state: &AppState,
    cloud: Option<&CloudOcrService>,
    first_page_key: Option<&String>,
) -> Option<SheetReading> {
    let storage = state.storage()?;
    let key = first_page_key?;

    let bytes = match storage.download_bytes(key).await {
        Ok(bytes) => bytes,
        Err(err) => {
            warn!(key, error = %err, "failed to fetch page image");
            return None;
        }
    };
    let page = match image::load_from_memory(&bytes) {
        Ok(decoded) => decoded.to_rgb8(),
        Err(err) => {
            warn!(key, error = %err, "page image is not decodable");
            return None;
        }
    };

    let strict = state.settings().ocr().threshold_strict;
    if let Some(read) = grid_ocr::read_header(&page) {
        if read.confidence >= strict {
            if let Some(dob) = matching::parse_dob(&read.dob_raw) {
                return Some(SheetReading {
                    last_name: read.last_name,
                    first_name: read.first_name,
                    dob,
                    confidence: read.confidence,
                });
            }
        }
    }

    let cloud = cloud.filter(|service| service.available())?;
    let crop = match header_crop_png(&page) {
        Ok(crop) => crop,
        Err(err) => {
            warn!(key, error = %err, "failed to crop header for cloud OCR");
            return None;
        }
    };
    match cloud.read_header(&crop).await {
        Ok(header) => cloud_reading(header, strict),
        Err(err) => {
            warn!(key, error = %err, "cloud OCR failed");
            None
        }
    }
}

/// The cloud tier answers with its own confidence score; a reading below the
/// strict floor or without a parseable date falls through to manual review.
fn cloud_reading(header: cloud::CloudHeader, strict: f64) -> Option<SheetReading> {
    if header.confidence < strict {
        return None;
    }
    let dob = matching::parse_dob(&header.date_of_birth)?;
    Some(SheetReading {
        last_name: header.last_name,
        first_name: header.first_name,
        dob,
        confidence: header.confidence,
    })
}

/// Cross-validates per-booklet matches and derives the identification mode.
/// Auto requires every readable booklet to agree on the same top candidate
/// with a clear match.
fn decide(sheet_matches: &[MatchResult]) -> (Decision, Option<CrossValidation>) {
    let with_candidates: Vec<&MatchResult> =
        sheet_matches.iter().filter(|result| !result.top_k.is_empty()).collect();
    if with_candidates.is_empty() {
        return (Decision::Manual, None);
    }

    let first_top = &with_candidates[0].top_k[0].student_id;
    let all_agree =
        with_candidates.iter().all(|result| &result.top_k[0].student_id == first_top);

    let cross_validation = if with_candidates.len() == 1 {
        CrossValidation::SingleSheet
    } else if all_agree {
        CrossValidation::Consistent
    } else {
        CrossValidation::Inconsistent
    };

    if cross_validation == CrossValidation::Inconsistent {
        return (Decision::Manual, Some(cross_validation));
    }

    // Candidates exist even when no sheet clears the match threshold; the
    // operator picks among them instead of starting from a blank list.
    let all_match = with_candidates.iter().all(|result| result.status == MatchStatus::Match);
    let decision = if all_match {
        Decision::Auto { student_id: first_top.clone() }
    } else {
        Decision::SemiAuto
    };

    (decision, Some(cross_validation))
}

fn candidates_json(candidates: &[Candidate]) -> serde_json::Value {
    serde_json::to_value(candidates).unwrap_or_else(|_| serde_json::Value::Array(Vec::new()))
}

fn header_crop_png(page: &image::RgbImage) -> Result<Vec<u8>, image::ImageError> {
    let crop_height = (page.height() / 4).max(1);
    let header = image::imageops::crop_imm(page, 0, 0, page.width(), crop_height).to_image();
    let mut buffer = Cursor::new(Vec::new());
    image::DynamicImage::ImageRgb8(header).write_to(&mut buffer, image::ImageFormat::Png)?;
    Ok(buffer.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(status: MatchStatus, top_ids: &[&str]) -> MatchResult {
        MatchResult {
            status,
            top_k: top_ids
                .iter()
                .enumerate()
                .map(|(rank, id)| Candidate {
                    student_id: id.to_string(),
                    last_name: "X".to_string(),
                    first_name: "Y".to_string(),
                    score: 1.0 - rank as f64 * 0.2,
                })
                .collect(),
        }
    }

    #[test]
    fn single_matching_sheet_identifies_automatically() {
        let (decision, cross) = decide(&[result(MatchStatus::Match, &["s1", "s2"])]);
        assert_eq!(decision, Decision::Auto { student_id: "s1".to_string() });
        assert_eq!(cross, Some(CrossValidation::SingleSheet));
    }

    #[test]
    fn agreeing_sheets_are_consistent() {
        let (decision, cross) = decide(&[
            result(MatchStatus::Match, &["s1"]),
            result(MatchStatus::Match, &["s1", "s2"]),
        ]);
        assert_eq!(decision, Decision::Auto { student_id: "s1".to_string() });
        assert_eq!(cross, Some(CrossValidation::Consistent));
    }

    #[test]
    fn disagreeing_sheets_force_manual_review() {
        let (decision, cross) = decide(&[
            result(MatchStatus::Match, &["s1"]),
            result(MatchStatus::Match, &["s2"]),
        ]);
        assert_eq!(decision, Decision::Manual);
        assert_eq!(cross, Some(CrossValidation::Inconsistent));
    }

    #[test]
    fn ambiguous_sheet_downgrades_to_semi_auto() {
        let (decision, _) = decide(&[
            result(MatchStatus::Match, &["s1"]),
            result(MatchStatus::Ambiguous, &["s1", "s2"]),
        ]);
        assert_eq!(decision, Decision::SemiAuto);
    }

    #[test]
    fn no_candidates_anywhere_is_manual() {
        let (decision, cross) = decide(&[result(MatchStatus::None, &[])]);
        assert_eq!(decision, Decision::Manual);
        assert_eq!(cross, None);
        assert_eq!(decide(&[]).0, Decision::Manual);
    }

    #[test]
    fn below_threshold_candidates_offer_a_pick_list() {
        let (decision, cross) = decide(&[result(MatchStatus::None, &["s1"])]);
        assert_eq!(decision, Decision::SemiAuto);
        assert_eq!(cross, Some(CrossValidation::SingleSheet));
    }

    fn header(confidence: f64, date_of_birth: &str) -> cloud::CloudHeader {
        cloud::CloudHeader {
            last_name: "DURAND".to_string(),
            first_name: "ALICE".to_string(),
            date_of_birth: date_of_birth.to_string(),
            confidence,
        }
    }

    #[test]
    fn low_confidence_cloud_reading_is_discarded() {
        assert!(cloud_reading(header(0.40, "01/02/2008"), 0.85).is_none());
    }

    #[test]
    fn confident_cloud_reading_is_kept() {
        let reading = cloud_reading(header(0.92, "01/02/2008"), 0.85).expect("reading");
        assert_eq!(reading.last_name, "DURAND");
        assert!((reading.confidence - 0.92).abs() < f64::EPSILON);
    }

    #[test]
    fn cloud_reading_requires_a_parseable_date() {
        assert!(cloud_reading(header(0.95, "2008-02-01"), 0.85).is_none());
    }
}
