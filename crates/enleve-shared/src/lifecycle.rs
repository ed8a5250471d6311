//! Attendance lifecycle.
//!
//! Statuses only move forward along
//! `Automatizado -> Em Espera -> Com Corretor -> Finalizado`; any forward
//! jump is allowed (an automated lead can be claimed directly) and
//! `Finalizado` is terminal.

use crate::error::TransitionError;
use crate::types::AttendanceStatus;

impl AttendanceStatus {
    fn rank(self) -> u8 {
        match self {
            Self::Automatizado => 0,
            Self::EmEspera => 1,
            Self::ComCorretor => 2,
            Self::Finalizado => 3,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Finalizado
    }

    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    pub fn can_transition_to(self, next: AttendanceStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn check_transition(self, next: AttendanceStatus) -> Result<(), TransitionError> {
        if self.is_terminal() {
            return Err(TransitionError::Terminal);
        }
        if !self.can_transition_to(next) {
            return Err(TransitionError::NotAllowed {
                from: self,
                to: next,
            });
        }
        Ok(())
    }
}

/// Which board column a broker claims from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Claim {
    /// Lead still handled by the assistant; anyone may take it.
    Automated,
    /// Lead waiting in the queue; only the broker whose turn it is.
    Waiting,
}

impl Claim {
    pub fn source(self) -> AttendanceStatus {
        match self {
            Self::Automated => AttendanceStatus::Automatizado,
            Self::Waiting => AttendanceStatus::EmEspera,
        }
    }

    pub fn check(self, current: AttendanceStatus) -> Result<(), TransitionError> {
        if current.is_terminal() {
            return Err(TransitionError::Terminal);
        }
        if current != self.source() {
            return Err(TransitionError::WrongColumn {
                expected: self.source(),
                found: current,
            });
        }
        current.check_transition(AttendanceStatus::ComCorretor)
    }
}

pub fn check_finalize(current: AttendanceStatus) -> Result<(), TransitionError> {
    current.check_transition(AttendanceStatus::Finalizado)
}
