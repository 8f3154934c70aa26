use sqlx::PgPool;

use crate::repositories;

/// Total for a copy: question scores plus annotation score deltas.
/// Accumulates in integer hundredths so repeated decimal adds cannot drift;
/// the result is exact to two fractional digits.
pub(crate) async fn compute_score(pool: &PgPool, copy_id: &str) -> Result<f64, sqlx::Error> {
    let scores = repositories::scores::list_for_copy(pool, copy_id).await?;
    let delta_sum = repositories::annotations::sum_score_deltas(pool, copy_id).await?;

    let mut hundredths: i64 = 0;
    for score in &scores {
        hundredths += to_hundredths(score.score);
    }
    hundredths += delta_sum * 100;

    Ok(hundredths as f64 / 100.0)
}

fn to_hundredths(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hundredths_rounding_is_exact_for_two_decimals() {
        assert_eq!(to_hundredths(0.1), 10);
        assert_eq!(to_hundredths(0.3), 30);
        assert_eq!(to_hundredths(2.25), 225);
        assert_eq!(to_hundredths(-1.5), -150);
    }

    #[test]
    fn repeated_tenths_do_not_drift() {
        // 0.1 + 0.2 != 0.3 in f64; the fixed-point sum must still be exact.
        let total: i64 = [0.1, 0.2, 0.3, 0.4].iter().map(|&v| to_hundredths(v)).sum();
        assert_eq!(total, 100);
        assert_eq!(total as f64 / 100.0, 1.0);
    }
}
