//! Residual risk calculator.
//!
//! Controls are independent filters: each one removes its effectiveness
//! fraction of whatever exposure is left, so the combined effectiveness is
//! `1 - prod(1 - e_i)`.

use crate::error::{AppetiteError, AppetiteResult};
use appetite_store::AppetiteStorage;
use appetite_types::{Control, LinkStatus, ResidualScore, Risk, RiskId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Effectiveness of one control in `[0, 1]`: the mean of its four
/// dimensions.
pub fn control_effectiveness(control: &Control) -> AppetiteResult<f64> {
    let dimensions = control.dimensions();
    if let Some(bad) = dimensions.iter().find(|d| **d > 100) {
        return Err(AppetiteError::Validation(format!(
            "control {} has an effectiveness dimension of {}, expected 0-100",
            control.control_id, bad
        )));
    }
    let sum: u32 = dimensions.iter().map(|d| u32::from(*d)).sum();
    Ok(f64::from(sum) / 400.0)
}

/// Combine independent effectiveness fractions.
///
/// The product runs over the sorted inputs so that the result does not
/// depend on link order.
pub fn combined_effectiveness(effectiveness: &[f64]) -> f64 {
    let mut sorted = effectiveness
        .iter()
        .map(|e| e.clamp(0.0, 1.0))
        .collect::<Vec<_>>();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let remaining: f64 = sorted.iter().map(|e| 1.0 - e).product();
    1.0 - remaining
}

/// `round(inherent * (1 - combined))`, floored at 1.
pub fn residual_level(inherent: u8, combined: f64) -> u8 {
    let level = (f64::from(inherent) * (1.0 - combined)).round();
    (level as u8).max(1)
}

fn check_inherent(risk: &Risk) -> AppetiteResult<()> {
    for (name, value) in [
        ("likelihood", risk.inherent_likelihood),
        ("impact", risk.inherent_impact),
    ] {
        if !(1..=5).contains(&value) {
            return Err(AppetiteError::Validation(format!(
                "risk {} has inherent {} {}, expected 1-5",
                risk.risk_id, name, value
            )));
        }
    }
    Ok(())
}

/// Residual score of a risk given its active controls.
pub fn compute_residual(
    risk: &Risk,
    active_controls: &[Control],
    computed_at: DateTime<Utc>,
) -> AppetiteResult<ResidualScore> {
    check_inherent(risk)?;
    let effectiveness = active_controls
        .iter()
        .map(control_effectiveness)
        .collect::<AppetiteResult<Vec<_>>>()?;
    let combined = combined_effectiveness(&effectiveness);
    Ok(ResidualScore {
        likelihood: residual_level(risk.inherent_likelihood, combined),
        impact: residual_level(risk.inherent_impact, combined),
        combined_effectiveness: combined,
        computed_at,
    })
}

/// Result of recomputing one risk.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResidualUpdate {
    pub risk_id: RiskId,
    pub previous: Option<ResidualScore>,
    pub current: ResidualScore,
    /// Whether the cached score changed. Timestamps are ignored.
    pub changed: bool,
}

/// Recompute and store the residual score of a risk from its active control
/// links.
///
/// Running it again with unchanged inputs stores the same result.
pub async fn recalculate(
    storage: &dyn AppetiteStorage,
    risk_id: &RiskId,
) -> AppetiteResult<ResidualUpdate> {
    let risk = storage
        .get_risk(risk_id)
        .await?
        .ok_or_else(|| AppetiteError::NotFound(format!("risk {}", risk_id)))?;

    let mut controls = Vec::new();
    for link in storage.control_links(risk_id).await? {
        if link.status != LinkStatus::Active {
            continue;
        }
        let control = storage.get_control(&link.control_id).await?.ok_or_else(|| {
            AppetiteError::NotFound(format!("control {} linked to risk {}", link.control_id, risk_id))
        })?;
        controls.push(control);
    }

    let current = compute_residual(&risk, &controls, Utc::now())?;
    let changed = risk
        .residual
        .as_ref()
        .map_or(true, |previous| !previous.same_result(&current));
    if changed {
        storage.set_residual(risk_id, current.clone()).await?;
        info!(
            risk_id = %risk_id,
            likelihood = current.likelihood,
            impact = current.impact,
            controls = controls.len(),
            "residual risk updated"
        );
    } else {
        debug!(risk_id = %risk_id, "residual risk unchanged");
    }

    Ok(ResidualUpdate {
        risk_id: risk_id.clone(),
        previous: risk.residual,
        current,
        changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use appetite_types::{ControlId, OrgId};
    use proptest::prelude::*;

    fn risk(likelihood: u8, impact: u8) -> Risk {
        Risk {
            risk_id: RiskId::new("risk-1"),
            org_id: OrgId::new("org-1"),
            title: "Payment outage".to_string(),
            category_id: None,
            inherent_likelihood: likelihood,
            inherent_impact: impact,
            residual: None,
        }
    }

    fn control(id: &str, score: u8) -> Control {
        Control {
            control_id: ControlId::new(id),
            org_id: OrgId::new("org-1"),
            name: id.to_string(),
            design: score,
            implementation: score,
            monitoring: score,
            evaluation: score,
        }
    }

    #[test]
    fn two_controls_compound_multiplicatively() {
        let combined = combined_effectiveness(&[0.5, 0.4]);
        assert!((combined - 0.7).abs() < 1e-12);
        assert_eq!(residual_level(5, combined), 2);
    }

    #[test]
    fn residual_is_floored_at_one() {
        assert_eq!(residual_level(5, 1.0), 1);
        assert_eq!(residual_level(1, 0.9), 1);
    }

    #[test]
    fn effectiveness_is_the_mean_of_dimensions() {
        let mut c = control("ctl-1", 0);
        c.design = 100;
        c.implementation = 60;
        c.monitoring = 40;
        c.evaluation = 0;
        assert!((control_effectiveness(&c).unwrap() - 0.5).abs() < 1e-12);

        c.monitoring = 101;
        assert!(matches!(
            control_effectiveness(&c),
            Err(AppetiteError::Validation(_))
        ));
    }

    #[test]
    fn no_controls_leaves_inherent_scores() {
        let score = compute_residual(&risk(4, 3), &[], Utc::now()).unwrap();
        assert_eq!((score.likelihood, score.impact), (4, 3));
        assert_eq!(score.score(), 12);
    }

    #[test]
    fn inherent_scores_outside_scale_are_rejected() {
        assert!(matches!(
            compute_residual(&risk(0, 3), &[], Utc::now()),
            Err(AppetiteError::Validation(_))
        ));
        assert!(matches!(
            compute_residual(&risk(3, 6), &[], Utc::now()),
            Err(AppetiteError::Validation(_))
        ));
    }

    proptest! {
        #[test]
        fn recomputing_is_idempotent(
            likelihood in 1u8..=5,
            impact in 1u8..=5,
            scores in prop::collection::vec(0u8..=100, 0..6),
        ) {
            let controls = scores
                .iter()
                .enumerate()
                .map(|(i, s)| control(&format!("ctl-{i}"), *s))
                .collect::<Vec<_>>();
            let first = compute_residual(&risk(likelihood, impact), &controls, Utc::now()).unwrap();
            let mut reversed = controls.clone();
            reversed.reverse();
            let second = compute_residual(&risk(likelihood, impact), &reversed, Utc::now()).unwrap();
            prop_assert!(first.same_result(&second));
        }

        #[test]
        fn adding_a_control_never_increases_residual(
            likelihood in 1u8..=5,
            impact in 1u8..=5,
            scores in prop::collection::vec(0u8..=100, 0..6),
            extra in 0u8..=100,
        ) {
            let mut controls = scores
                .iter()
                .enumerate()
                .map(|(i, s)| control(&format!("ctl-{i}"), *s))
                .collect::<Vec<_>>();
            let before = compute_residual(&risk(likelihood, impact), &controls, Utc::now()).unwrap();
            controls.push(control("ctl-extra", extra));
            let after = compute_residual(&risk(likelihood, impact), &controls, Utc::now()).unwrap();
            prop_assert!(after.combined_effectiveness >= before.combined_effectiveness);
            prop_assert!(after.likelihood <= before.likelihood);
            prop_assert!(after.impact <= before.impact);
        }
    }
}
