use crate::api::errors::ApiError;
use crate::core::state::AppState;

/// Annotation rectangles use normalized page coordinates; the box must stay
/// inside the page.
pub(crate) fn check_rect(x: f64, y: f64, w: f64, h: f64) -> Result<(), ApiError> {
    if !(0.0..=1.0).contains(&x)
        || !(0.0..=1.0).contains(&y)
        || !(0.0..=1.0).contains(&w)
        || !(0.0..=1.0).contains(&h)
    {
        return Err(ApiError::BadRequest(
            "Annotation coordinates must be within [0, 1]".to_string(),
        ));
    }
    if x + w > 1.0 || y + h > 1.0 {
        return Err(ApiError::BadRequest(
            "Annotation rectangle extends beyond the page".to_string(),
        ));
    }
    Ok(())
}

pub(crate) async fn check_page_index(
    state: &AppState,
    copy_id: &str,
    page_index: i32,
) -> Result<(), ApiError> {
    if page_index < 0 {
        return Err(ApiError::BadRequest("page_index must be non-negative".to_string()));
    }

    let pages = crate::repositories::copies::booklet_page_count(state.db(), copy_id)
        .await
        .map_err(|e| ApiError::internal(e, "Failed to count copy pages"))?;
    if i64::from(page_index) >= pages {
        return Err(ApiError::BadRequest(format!(
            "page_index {page_index} is out of range for a copy with {pages} pages"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rect_must_stay_inside_the_page() {
        assert!(check_rect(0.0, 0.0, 1.0, 1.0).is_ok());
        assert!(check_rect(0.5, 0.5, 0.25, 0.25).is_ok());
        assert!(check_rect(0.8, 0.1, 0.3, 0.1).is_err());
        assert!(check_rect(0.1, 0.95, 0.1, 0.1).is_err());
        assert!(check_rect(-0.1, 0.0, 0.5, 0.5).is_err());
        assert!(check_rect(0.0, 0.0, 1.5, 0.5).is_err());
    }
}
