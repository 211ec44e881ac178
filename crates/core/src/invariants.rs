//! Developer guardrails and invariants
//!
//! Debug assertions for detecting impossible states during development.
//! These checks are compiled out in release builds.

use crate::models::Squad;

/// Validate that a squad about to be persisted is internally consistent
pub fn assert_squad_invariants(squad: &Squad) {
    debug_assert!(
        squad.validate().is_ok(),
        "Squad {} is invalid: {:?}",
        squad.name,
        squad.validate()
    );

    // Open squads always own their exclusivity role
    debug_assert!(
        squad.is_terminal() || squad.role_id.is_some(),
        "Open squad {} has no role",
        squad.name
    );

    // Terminal squads have handed their role and voice room back
    debug_assert!(
        !squad.is_terminal() || (squad.role_id.is_none() && squad.voice_id.is_none()),
        "Terminal squad {} still holds role {:?} / voice {:?}",
        squad.name,
        squad.role_id,
        squad.voice_id
    );

    debug_assert!(
        !squad.thread_private || squad.thread_id.is_some(),
        "Squad {} marked private without a thread",
        squad.name
    );
}
