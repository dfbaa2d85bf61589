// Orchestra Engine — Strategy derivation (spec.md §4.4 "Strategy derivation")
//
// A pure function of role availability (spec.md §8 property 8): the same
// three availability bits always produce the same Strategy.

use std::time::Duration;

use crate::atoms::constants::PROVIDER_READY_TIMEOUT_SECS;
use crate::atoms::error::{OrchestraError, OrchestraResult};
use crate::atoms::types::Strategy;
use crate::engine::agent::Agent;

/// A role counts as available iff its agent is present, passes
/// `ensure_ready`, and pings successfully inside the readiness deadline.
async fn role_available(agent: Option<&mut Agent>) -> bool {
    let Some(agent) = agent else { return false };
    if agent.ensure_ready().is_err() {
        return false;
    }
    tokio::time::timeout(Duration::from_secs(PROVIDER_READY_TIMEOUT_SECS), agent.provider.ping())
        .await
        .map(|r| r.is_ok())
        .unwrap_or(false)
}

pub struct RoleAvailability {
    pub coder: bool,
    pub reviewer: bool,
}

pub fn strategy_for(coder: bool, reviewer: bool) -> Strategy {
    match (coder, reviewer) {
        (true, true) => Strategy::Full,
        (false, true) => Strategy::NoCoder,
        (true, false) => Strategy::NoReviewer,
        (false, false) => Strategy::Solo,
    }
}

/// Derive the run's Strategy. Fails with `Config` if the Planner itself is
/// unavailable — the only role spec.md §4.4 treats as mandatory.
pub async fn derive_strategy(
    planner: Option<&mut Agent>,
    coder: Option<&mut Agent>,
    reviewer: Option<&mut Agent>,
) -> OrchestraResult<(Strategy, RoleAvailability)> {
    if !role_available(planner).await {
        return Err(OrchestraError::NotReady("planner is required".into()));
    }
    let coder_ok = role_available(coder).await;
    let reviewer_ok = role_available(reviewer).await;
    Ok((strategy_for(coder_ok, reviewer_ok), RoleAvailability { coder: coder_ok, reviewer: reviewer_ok }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strategy_table_matches_spec() {
        assert_eq!(strategy_for(true, true), Strategy::Full);
        assert_eq!(strategy_for(false, true), Strategy::NoCoder);
        assert_eq!(strategy_for(true, false), Strategy::NoReviewer);
        assert_eq!(strategy_for(false, false), Strategy::Solo);
    }
}
