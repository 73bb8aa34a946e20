// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 daqflow developers

//! Two-phase start coordination.
//!
//! A synchronized multi-node start splits "go" into Arm and Trigger so a
//! controller can gate "Trigger all" on "every node reached Armed":
//!
//! ```text
//! Controller                 Node 1                    Node 2
//!     |---- Configure ------->|                          |
//!     |---- Configure ------------------------------->   |
//!     |<--- Configured -------|                          |
//!     |<--- Configured ------------------------------    |
//!     |---- Arm ------------->| (arms hardware)          |
//!     |---- Arm ------------------------------------->   | (arms hardware)
//!     |<--- Armed ------------|                          |
//!     |<--- Armed -----------------------------------    |
//!     |       (all nodes armed: the Armed barrier holds) |
//!     |---- Trigger --------->| (software start)         |
//!     |---- Trigger ---------------------------------->  | (same time)
//! ```
//!
//! The manager issues no hardware commands itself; it only refuses illegal
//! phase transitions so the barrier is checkable at the type level.

/// Phase of the two-phase start sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartPhase {
    /// Initial phase, nothing prepared.
    Loaded,
    /// Configuration applied.
    Configured,
    /// Hardware prepared, waiting for the trigger.
    Armed,
    /// Acquisition in progress.
    Running,
}

/// Outcome of a phase transition request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseResult {
    Success,
    /// Operation not valid in the current phase.
    InvalidState,
    /// Trigger attempted before Armed.
    NotArmed,
    /// Arm attempted while already Armed.
    AlreadyArmed,
}

/// Per-node tracker making the Armed barrier explicit.
#[derive(Debug)]
pub struct TwoPhaseStartManager {
    phase: StartPhase,
}

impl Default for TwoPhaseStartManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TwoPhaseStartManager {
    /// Start in [`StartPhase::Loaded`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            phase: StartPhase::Loaded,
        }
    }

    #[must_use]
    pub fn phase(&self) -> StartPhase {
        self.phase
    }

    /// Mark configuration applied: Loaded -> Configured.
    pub fn configure(&mut self) -> PhaseResult {
        if self.phase != StartPhase::Loaded {
            return PhaseResult::InvalidState;
        }
        self.phase = StartPhase::Configured;
        PhaseResult::Success
    }

    /// Mark hardware armed: Configured -> Armed.
    pub fn arm(&mut self) -> PhaseResult {
        if self.phase == StartPhase::Armed {
            return PhaseResult::AlreadyArmed;
        }
        if self.phase != StartPhase::Configured {
            return PhaseResult::InvalidState;
        }
        self.phase = StartPhase::Armed;
        PhaseResult::Success
    }

    /// Fire the software trigger: Armed -> Running.
    pub fn trigger(&mut self) -> PhaseResult {
        if self.phase != StartPhase::Armed {
            return PhaseResult::NotArmed;
        }
        self.phase = StartPhase::Running;
        PhaseResult::Success
    }

    /// Stop acquisition: Running or Armed -> Loaded.
    pub fn stop(&mut self) -> PhaseResult {
        if self.phase != StartPhase::Running && self.phase != StartPhase::Armed {
            return PhaseResult::InvalidState;
        }
        self.phase = StartPhase::Loaded;
        PhaseResult::Success
    }

    /// Return to Loaded from any phase.
    pub fn reset(&mut self) -> PhaseResult {
        self.phase = StartPhase::Loaded;
        PhaseResult::Success
    }

    #[must_use]
    pub fn is_armed(&self) -> bool {
        self.phase == StartPhase::Armed
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.phase == StartPhase::Running
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path() {
        let mut mgr = TwoPhaseStartManager::new();
        assert_eq!(mgr.phase(), StartPhase::Loaded);
        assert_eq!(mgr.configure(), PhaseResult::Success);
        assert_eq!(mgr.arm(), PhaseResult::Success);
        assert!(mgr.is_armed());
        assert_eq!(mgr.trigger(), PhaseResult::Success);
        assert!(mgr.is_running());
        assert_eq!(mgr.stop(), PhaseResult::Success);
        assert_eq!(mgr.phase(), StartPhase::Loaded);
    }

    #[test]
    fn trigger_without_arm_is_not_armed() {
        let mut mgr = TwoPhaseStartManager::new();
        assert_eq!(mgr.trigger(), PhaseResult::NotArmed);
        mgr.configure();
        assert_eq!(mgr.trigger(), PhaseResult::NotArmed);
        assert!(!mgr.is_running());
    }

    #[test]
    fn double_arm_is_already_armed() {
        let mut mgr = TwoPhaseStartManager::new();
        mgr.configure();
        assert_eq!(mgr.arm(), PhaseResult::Success);
        assert_eq!(mgr.arm(), PhaseResult::AlreadyArmed);
        assert!(mgr.is_armed());
    }

    #[test]
    fn arm_before_configure_is_invalid() {
        let mut mgr = TwoPhaseStartManager::new();
        assert_eq!(mgr.arm(), PhaseResult::InvalidState);
        assert_eq!(mgr.phase(), StartPhase::Loaded);
    }

    #[test]
    fn stop_from_armed_or_running_only() {
        let mut mgr = TwoPhaseStartManager::new();
        assert_eq!(mgr.stop(), PhaseResult::InvalidState);
        mgr.configure();
        assert_eq!(mgr.stop(), PhaseResult::InvalidState);
        mgr.arm();
        assert_eq!(mgr.stop(), PhaseResult::Success);
    }

    #[test]
    fn reset_from_any_phase() {
        let mut mgr = TwoPhaseStartManager::new();
        mgr.configure();
        mgr.arm();
        mgr.trigger();
        assert_eq!(mgr.reset(), PhaseResult::Success);
        assert_eq!(mgr.phase(), StartPhase::Loaded);
        assert_eq!(mgr.reset(), PhaseResult::Success);
    }
}
