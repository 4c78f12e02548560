//! Placement state machine.

use common::CouponId;
use serde::{Deserialize, Serialize};

use crate::services::inventory::Reservation;
use crate::steps;

/// The state of a placement in its lifecycle.
///
/// State transitions:
/// ```text
/// NotStarted ──► Running ──┬──► Completed
///                          └──► Compensating ──► Failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PlacementState {
    #[default]
    NotStarted,

    /// Steps are being executed.
    Running,

    /// A step failed and completed steps are being undone.
    Compensating,

    /// The order was persisted (terminal state).
    Completed,

    /// Compensation finished after a failure (terminal state).
    Failed,
}

impl PlacementState {
    pub fn can_run(&self) -> bool {
        matches!(self, PlacementState::NotStarted)
    }

    pub fn can_compensate(&self) -> bool {
        matches!(self, PlacementState::Running)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PlacementState::Completed | PlacementState::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PlacementState::NotStarted => "NotStarted",
            PlacementState::Running => "Running",
            PlacementState::Compensating => "Compensating",
            PlacementState::Completed => "Completed",
            PlacementState::Failed => "Failed",
        }
    }
}

impl std::fmt::Display for PlacementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Bookkeeping for one placement run: which steps finished and what they
/// changed, so a failure can undo exactly that.
#[derive(Debug, Default)]
pub struct Placement {
    state: PlacementState,
    completed_steps: Vec<&'static str>,
    reservation: Reservation,
    redeemed_coupon: Option<CouponId>,
    failure: Option<(&'static str, String)>,
}

impl Placement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> PlacementState {
        self.state
    }

    pub fn completed_steps(&self) -> &[&'static str] {
        &self.completed_steps
    }

    pub fn start(&mut self) {
        if self.state.can_run() {
            self.state = PlacementState::Running;
        }
    }

    pub fn step_completed(&mut self, step: &'static str) {
        self.completed_steps.push(step);
    }

    pub fn reservation_mut(&mut self) -> &mut Reservation {
        &mut self.reservation
    }

    pub fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    pub fn coupon_redeemed(&mut self, coupon_id: CouponId) {
        self.redeemed_coupon = Some(coupon_id);
    }

    pub fn redeemed_coupon(&self) -> Option<CouponId> {
        self.redeemed_coupon
    }

    /// Records the failed step and enters compensation.
    pub fn step_failed(&mut self, step: &'static str, reason: impl Into<String>) {
        self.failure = Some((step, reason.into()));
        if self.state.can_compensate() {
            self.state = PlacementState::Compensating;
        }
    }

    pub fn failed_step(&self) -> Option<&'static str> {
        self.failure.as_ref().map(|(step, _)| *step)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_ref().map(|(_, reason)| reason.as_str())
    }

    /// Side-effecting steps to undo, newest first.
    ///
    /// Includes the failed step itself, which may have applied part of its
    /// work before it failed or timed out.
    pub fn steps_to_compensate(&self) -> Vec<&'static str> {
        self.failed_step()
            .into_iter()
            .chain(self.completed_steps.iter().rev().copied())
            .filter(|step| steps::is_compensable(step))
            .collect()
    }

    pub fn complete(&mut self) {
        self.state = PlacementState::Completed;
    }

    pub fn fail(&mut self) {
        self.state = PlacementState::Failed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_state_is_not_started() {
        assert_eq!(PlacementState::default(), PlacementState::NotStarted);
    }

    #[test]
    fn test_can_run_and_compensate() {
        assert!(PlacementState::NotStarted.can_run());
        assert!(!PlacementState::Running.can_run());
        assert!(PlacementState::Running.can_compensate());
        assert!(!PlacementState::Compensating.can_compensate());
        assert!(!PlacementState::Completed.can_compensate());
    }

    #[test]
    fn test_terminal_states() {
        assert!(!PlacementState::Running.is_terminal());
        assert!(!PlacementState::Compensating.is_terminal());
        assert!(PlacementState::Completed.is_terminal());
        assert!(PlacementState::Failed.is_terminal());
    }

    #[test]
    fn test_compensation_runs_in_reverse_over_side_effects() {
        let mut placement = Placement::new();
        placement.start();
        for step in [
            steps::STEP_RESOLVE_ITEMS,
            steps::STEP_VALIDATE_COUPON,
            steps::STEP_COMPUTE_PRICING,
            steps::STEP_RESERVE_INVENTORY,
            steps::STEP_REDEEM_COUPON,
        ] {
            placement.step_completed(step);
        }
        placement.step_failed(steps::STEP_PERSIST_ORDER, "insert failed");

        assert_eq!(placement.state(), PlacementState::Compensating);
        assert_eq!(placement.failed_step(), Some(steps::STEP_PERSIST_ORDER));
        assert_eq!(placement.failure_reason(), Some("insert failed"));
        assert_eq!(
            placement.steps_to_compensate(),
            vec![steps::STEP_REDEEM_COUPON, steps::STEP_RESERVE_INVENTORY]
        );

        placement.fail();
        assert_eq!(placement.state(), PlacementState::Failed);
    }

    #[test]
    fn test_failed_side_effect_step_is_compensated() {
        let mut placement = Placement::new();
        placement.start();
        placement.step_completed(steps::STEP_COMPUTE_PRICING);
        placement.step_failed(steps::STEP_RESERVE_INVENTORY, "timed out");

        assert_eq!(
            placement.steps_to_compensate(),
            vec![steps::STEP_RESERVE_INVENTORY]
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(PlacementState::Compensating.to_string(), "Compensating");
    }
}
