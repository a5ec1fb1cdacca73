//! Mutation stage machine.
//!
//! Every engine run walks these stages. Only the edges listed in
//! [`MutationStage::can_transition_to`] are legal; anything else is an
//! internal error. Each entered stage is recorded with a timestamp.
//! While the tracker is in a critical stage it holds a [`CriticalSection`],
//! so termination signals wait until the run is back in a consistent state.
//!
//! ```text
//! Start → Evaluate ─┬→ Done                       (already compliant)
//!                   └→ AwaitingAuthorization ─┬→ Done  (denied)
//!                                             └→ Backup → Edit → Validate
//! Validate ─┬→ Apply → Verify → Done
//!           └→ Verify           (no service to restart)
//! Edit | Validate | Apply | Verify → Rollback → Done
//! ```

use crate::error::{HardenError, Result};
use crate::process_guard::CriticalSection;
use chrono::{DateTime, Local};
use strum::{Display, EnumIter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum MutationStage {
    Start,
    Evaluate,
    AwaitingAuthorization,
    Backup,
    Edit,
    Validate,
    Apply,
    Verify,
    Rollback,
    Done,
}

impl MutationStage {
    #[inline]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Done)
    }

    /// Stages during which the target may differ from its snapshot
    #[inline]
    pub const fn is_critical(self) -> bool {
        matches!(
            self,
            Self::Backup | Self::Edit | Self::Validate | Self::Apply | Self::Verify | Self::Rollback
        )
    }

    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Start, Self::Evaluate)
                | (Self::Evaluate, Self::Done)
                | (Self::Evaluate, Self::AwaitingAuthorization)
                | (Self::AwaitingAuthorization, Self::Done)
                | (Self::AwaitingAuthorization, Self::Backup)
                | (Self::Backup, Self::Edit)
                | (Self::Edit, Self::Validate)
                | (Self::Edit, Self::Rollback)
                | (Self::Validate, Self::Apply)
                | (Self::Validate, Self::Verify)
                | (Self::Validate, Self::Rollback)
                | (Self::Apply, Self::Verify)
                | (Self::Apply, Self::Rollback)
                | (Self::Verify, Self::Done)
                | (Self::Verify, Self::Rollback)
                | (Self::Rollback, Self::Done)
        )
    }
}

/// Current stage plus the timestamped path taken to reach it
#[derive(Debug)]
pub struct StageTracker {
    current: MutationStage,
    history: Vec<(MutationStage, DateTime<Local>)>,
    critical: Option<CriticalSection>,
}

impl Default for StageTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTracker {
    pub fn new() -> Self {
        Self {
            current: MutationStage::Start,
            history: vec![(MutationStage::Start, Local::now())],
            critical: None,
        }
    }

    #[inline]
    pub fn current(&self) -> MutationStage {
        self.current
    }

    /// Move to `next`. Entering the first critical stage fails with a
    /// precondition error once shutdown has been requested.
    pub fn advance(&mut self, next: MutationStage) -> Result<()> {
        if !self.current.can_transition_to(next) {
            return Err(HardenError::transition(format!(
                "illegal stage transition {} -> {}",
                self.current, next
            )));
        }
        if !next.is_critical() {
            self.critical = None;
        } else if self.critical.is_none() {
            self.critical = Some(CriticalSection::enter()?);
        }
        tracing::debug!("stage {} -> {}", self.current, next);
        self.current = next;
        self.history.push((next, Local::now()));
        Ok(())
    }

    pub fn history(&self) -> &[(MutationStage, DateTime<Local>)] {
        &self.history
    }

    /// Stage names only, in order
    pub fn path(&self) -> Vec<MutationStage> {
        self.history.iter().map(|(stage, _)| *stage).collect()
    }

    /// True while the tracker holds the critical section
    pub fn in_critical_section(&self) -> bool {
        self.critical.is_some()
    }

    pub fn into_history(self) -> Vec<(MutationStage, DateTime<Local>)> {
        self.history
    }
}
