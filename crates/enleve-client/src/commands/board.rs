//! The three-column lead board.
//!
//! Columns are loaded independently: automated leads newest first, waiting
//! leads in queue order, assigned leads most recently touched first. Claims
//! go through a conditional update so two brokers racing for the same lead
//! cannot both win.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{info, warn};

use enleve_shared::backend::{AttendanceOrder, AttendanceQuery, SortOrder};
use enleve_shared::constants::NEXT_TURN_POSITION;
use enleve_shared::lifecycle::{check_finalize, Claim};
use enleve_shared::models::{Attendance, AttendancePatch, ChatHistoryEntry};
use enleve_shared::types::{AttendanceId, AttendanceStatus};
use enleve_shared::{BackendError, TransitionError};

use crate::commands::BrokerSummary;
use crate::error::{ClientError, Result};
use crate::events::{
    Notice, MSG_CLAIMED, MSG_CLAIMED_ROTATED, MSG_CLAIM_FAILED, MSG_FINALIZED,
    MSG_FINALIZE_FAILED, MSG_LOAD_FAILED,
};
use crate::state::AppState;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AssignedLead {
    pub attendance: Attendance,
    pub broker: Option<BrokerSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BoardSnapshot {
    pub automated: Vec<Attendance>,
    pub waiting: Vec<Attendance>,
    pub assigned: Vec<AssignedLead>,
}

impl BoardSnapshot {
    pub fn len(&self) -> usize {
        self.automated.len() + self.waiting.len() + self.assigned.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Result of a successful claim.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClaimOutcome {
    pub attendance: Attendance,
    /// Whether the caller was moved to the back of the queue. Always
    /// `false` for automated leads.
    pub rotated: bool,
}

pub struct Board {
    state: Arc<AppState>,
    last: RwLock<Option<BoardSnapshot>>,
}

impl Board {
    pub fn new(state: Arc<AppState>) -> Self {
        Self {
            state,
            last: RwLock::new(None),
        }
    }

    /// Snapshot from the last successful load.
    pub async fn snapshot(&self) -> Option<BoardSnapshot> {
        self.last.read().await.clone()
    }

    /// Reload all three columns.
    pub async fn load(&self) -> Result<BoardSnapshot> {
        match self.fetch().await {
            Ok(snapshot) => {
                *self.last.write().await = Some(snapshot.clone());
                Ok(snapshot)
            }
            Err(e) => {
                warn!(error = %e, "board load failed");
                self.state.notify(Notice::failure(&e, MSG_LOAD_FAILED));
                Err(e)
            }
        }
    }

    async fn fetch(&self) -> Result<BoardSnapshot> {
        let backend = self.state.backend();
        self.state.session.require_user().await?;

        let automated_q = AttendanceQuery::with_status(AttendanceStatus::Automatizado)
            .order_by(AttendanceOrder::CreatedAt, SortOrder::Desc);
        let waiting_q = AttendanceQuery::with_status(AttendanceStatus::EmEspera)
            .order_by(AttendanceOrder::QueuedAt, SortOrder::Asc);
        let assigned_q = AttendanceQuery::with_status(AttendanceStatus::ComCorretor)
            .order_by(AttendanceOrder::UpdatedAt, SortOrder::Desc);

        let (automated, waiting, assigned) = futures::try_join!(
            backend.list_attendances(&automated_q),
            backend.list_attendances(&waiting_q),
            backend.list_attendances(&assigned_q),
        )?;

        let mut broker_ids: Vec<_> = assigned.iter().filter_map(|a| a.assigned_broker).collect();
        broker_ids.sort();
        broker_ids.dedup();
        let profiles = backend.list_profiles(&broker_ids).await?;
        let summaries: HashMap<_, _> = join_all(
            profiles
                .iter()
                .map(|profile| BrokerSummary::resolve(backend, profile)),
        )
        .await
        .into_iter()
        .map(|summary| (summary.id, summary))
        .collect();

        let assigned = assigned
            .into_iter()
            .map(|attendance| AssignedLead {
                broker: attendance
                    .assigned_broker
                    .and_then(|id| summaries.get(&id).cloned()),
                attendance,
            })
            .collect();

        Ok(BoardSnapshot {
            automated,
            waiting,
            assigned,
        })
    }

    /// Take a lead straight from the assistant. No queue precondition.
    pub async fn claim_automated(&self, id: AttendanceId) -> Result<ClaimOutcome> {
        let result = self.claim(id, Claim::Automated).await;
        self.report(&result, MSG_CLAIMED, MSG_CLAIM_FAILED);
        result
    }

    /// Take a waiting lead. Only the broker at the head of the queue may,
    /// and doing so moves them to the back.
    pub async fn claim_waiting(&self, id: AttendanceId) -> Result<ClaimOutcome> {
        let result = self.claim(id, Claim::Waiting).await;
        let success = match &result {
            Ok(outcome) if outcome.rotated => MSG_CLAIMED_ROTATED,
            _ => MSG_CLAIMED,
        };
        self.report(&result, success, MSG_CLAIM_FAILED);
        result
    }

    async fn claim(&self, id: AttendanceId, claim: Claim) -> Result<ClaimOutcome> {
        let backend = self.state.backend();
        let session = self.state.session.require_user().await?;
        let me = session.user_id();

        if claim == Claim::Waiting {
            let profile = backend
                .get_profile(me)
                .await?
                .ok_or(ClientError::ProfileMissing)?;
            if profile.queue_position != Some(NEXT_TURN_POSITION) {
                info!(
                    broker = %me,
                    position = ?profile.queue_position,
                    attendance = %id,
                    "claim refused, not broker's turn"
                );
                return Err(ClientError::NotYourTurn);
            }
        }

        let current = backend.get_attendance(id).await?;
        if let Err(e) = claim.check(current.status) {
            return Err(match (e, current.status) {
                (TransitionError::WrongColumn { .. }, AttendanceStatus::ComCorretor) => {
                    ClientError::AlreadyClaimed
                }
                (e, _) => e.into(),
            });
        }

        let Some(attendance) = backend
            .update_attendance_if(id, claim.source(), &AttendancePatch::assign(me))
            .await?
        else {
            info!(broker = %me, attendance = %id, "claim lost to a concurrent update");
            return Err(ClientError::AlreadyClaimed);
        };
        info!(broker = %me, attendance = %id, ?claim, "lead claimed");

        let rotated = match claim {
            Claim::Automated => false,
            Claim::Waiting => match backend.rotate_queue(me).await {
                Ok(()) => true,
                Err(e) => {
                    // The claim stands even if the queue did not advance.
                    warn!(broker = %me, error = %e, "queue rotation failed");
                    false
                }
            },
        };

        Ok(ClaimOutcome {
            attendance,
            rotated,
        })
    }

    /// Close a lead from any active column.
    pub async fn finalize(&self, id: AttendanceId) -> Result<Attendance> {
        let result = self.try_finalize(id).await;
        self.report(&result, MSG_FINALIZED, MSG_FINALIZE_FAILED);
        result
    }

    async fn try_finalize(&self, id: AttendanceId) -> Result<Attendance> {
        let backend = self.state.backend();
        let session = self.state.session.require_user().await?;

        let current = backend.get_attendance(id).await?;
        check_finalize(current.status)?;

        let done = backend
            .update_attendance_if(id, current.status, &AttendancePatch::finalize())
            .await?
            .ok_or_else(|| {
                ClientError::Backend(BackendError::Conflict(format!(
                    "attendance {id} changed while finalizing"
                )))
            })?;
        info!(broker = %session.user_id(), attendance = %id, "lead finalized");
        Ok(done)
    }

    /// The assistant's report for a lead.
    pub async fn report_text(&self, id: AttendanceId) -> Result<Option<String>> {
        self.state.session.require_user().await?;
        Ok(self.state.backend().get_attendance(id).await?.ai_report)
    }

    /// The automated conversation behind a lead, oldest message first.
    pub async fn chat_history(&self, id: AttendanceId) -> Result<Vec<ChatHistoryEntry>> {
        self.state.session.require_user().await?;
        let backend = self.state.backend();
        let attendance = backend.get_attendance(id).await?;
        match attendance.session_id.as_deref() {
            Some(session_id) => Ok(backend.chat_history(session_id).await?),
            None => Ok(Vec::new()),
        }
    }

    fn report<T>(&self, result: &Result<T>, success: &str, fallback: &str) {
        match result {
            Ok(_) => self.state.notify(Notice::success(success)),
            Err(e) => {
                warn!(error = %e, "board action failed");
                self.state.notify(Notice::failure(e, fallback));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use enleve_shared::backend::RecordStore;
    use enleve_shared::types::{Channel, UserId};
    use enleve_store::{LocalBackend, NewAttendance};
    use tempfile::TempDir;
    use tokio::sync::mpsc::UnboundedReceiver;

    use super::*;
    use crate::events::ChannelNotifier;

    struct Fixture {
        local: LocalBackend,
        board: Board,
        notices: UnboundedReceiver<Notice>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let local = LocalBackend::in_memory(dir.path().join("objects"))
            .await
            .unwrap();
        let (notifier, notices) = ChannelNotifier::new();
        let state = AppState::new(
            Arc::new(local.clone()),
            Duration::from_secs(30),
            Arc::new(notifier),
        );
        Fixture {
            local,
            board: Board::new(Arc::new(state)),
            notices,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn columns_are_partitioned_and_ordered() {
        let mut f = fixture().await;
        let me = f.local.enroll_broker(UserId::new(), "Ana").await.unwrap().id;
        f.local.set_current_user(me, None).await;

        let a1 = f
            .local
            .ingest(NewAttendance::automated(Channel::WhatsApp, "A1", "1"))
            .await
            .unwrap();
        let a2 = f
            .local
            .ingest(NewAttendance::automated(Channel::Instagram, "A2", "2"))
            .await
            .unwrap();
        let w1 = f
            .local
            .ingest(NewAttendance::waiting(Channel::WhatsApp, "W1", "3"))
            .await
            .unwrap();
        let w2 = f
            .local
            .ingest(NewAttendance::waiting(Channel::WhatsApp, "W2", "4"))
            .await
            .unwrap();
        f.board.claim_automated(a1.id).await.unwrap();

        let snapshot = f.board.load().await.unwrap();
        assert_eq!(
            snapshot.automated.iter().map(|a| a.id).collect::<Vec<_>>(),
            [a2.id]
        );
        assert_eq!(
            snapshot.waiting.iter().map(|a| a.id).collect::<Vec<_>>(),
            [w1.id, w2.id]
        );
        assert_eq!(snapshot.assigned.len(), 1);
        let broker = snapshot.assigned[0].broker.as_ref().unwrap();
        assert_eq!(broker.display_name, "Ana");
        assert_eq!(broker.initial, 'A');
        assert!(broker.avatar_url.is_none());

        assert_eq!(f.notices.try_recv().unwrap().title, MSG_CLAIMED);
        assert!(f.notices.try_recv().is_err());
    }

    #[tokio::test]
    async fn automated_claim_ignores_queue_position() {
        let mut f = fixture().await;
        f.local.enroll_broker(UserId::new(), "First").await.unwrap();
        let me = f.local.enroll_broker(UserId::new(), "Second").await.unwrap().id;
        f.local.set_current_user(me, None).await;
        let lead = f
            .local
            .ingest(NewAttendance::automated(Channel::WhatsApp, "L", "1"))
            .await
            .unwrap();

        let outcome = f.board.claim_automated(lead.id).await.unwrap();
        assert_eq!(outcome.attendance.status, AttendanceStatus::ComCorretor);
        assert_eq!(outcome.attendance.assigned_broker, Some(me));
        assert!(!outcome.rotated);
        // Queue untouched.
        assert_eq!(f.local.queue().await.unwrap()[1].id, me);
        assert!(!f.notices.try_recv().unwrap().is_error());
    }

    #[tokio::test]
    async fn waiting_claim_rotates_the_queue() {
        let mut f = fixture().await;
        let me = f.local.enroll_broker(UserId::new(), "A").await.unwrap().id;
        let other = f.local.enroll_broker(UserId::new(), "B").await.unwrap().id;
        f.local.set_current_user(me, None).await;
        let lead = f
            .local
            .ingest(NewAttendance::waiting(Channel::WhatsApp, "L", "1"))
            .await
            .unwrap();

        let outcome = f.board.claim_waiting(lead.id).await.unwrap();
        assert!(outcome.rotated);
        assert_eq!(outcome.attendance.assigned_broker, Some(me));

        let queue = f.local.queue().await.unwrap();
        assert_eq!(queue[0].id, other);
        assert_eq!(queue[1].id, me);
        assert_eq!(f.notices.try_recv().unwrap().title, MSG_CLAIMED_ROTATED);
    }

    #[tokio::test]
    async fn waiting_claim_out_of_turn_changes_nothing() {
        let mut f = fixture().await;
        let first = f.local.enroll_broker(UserId::new(), "A").await.unwrap().id;
        let me = f.local.enroll_broker(UserId::new(), "B").await.unwrap().id;
        f.local.set_current_user(me, None).await;
        let lead = f
            .local
            .ingest(NewAttendance::waiting(Channel::WhatsApp, "L", "1"))
            .await
            .unwrap();
        let before = f.board.load().await.unwrap();

        let err = f.board.claim_waiting(lead.id).await.unwrap_err();
        assert!(matches!(err, ClientError::NotYourTurn));

        let after = f.local.get_attendance(lead.id).await.unwrap();
        assert_eq!(after, lead);
        assert_eq!(f.local.queue().await.unwrap()[0].id, first);
        assert_eq!(f.board.snapshot().await.unwrap(), before);

        let notice = f.notices.try_recv().unwrap();
        assert!(notice.is_error());
        assert_eq!(notice.title, "Não é sua vez na fila!");
    }

    #[tokio::test]
    async fn second_claim_reports_already_claimed() {
        let f = fixture().await;
        let me = f.local.enroll_broker(UserId::new(), "A").await.unwrap().id;
        f.local.set_current_user(me, None).await;
        let lead = f
            .local
            .ingest(NewAttendance::automated(Channel::WhatsApp, "L", "1"))
            .await
            .unwrap();

        f.board.claim_automated(lead.id).await.unwrap();
        assert!(matches!(
            f.board.claim_automated(lead.id).await,
            Err(ClientError::AlreadyClaimed)
        ));
    }

    #[tokio::test]
    async fn finalize_is_terminal() {
        let f = fixture().await;
        let me = f.local.enroll_broker(UserId::new(), "A").await.unwrap().id;
        f.local.set_current_user(me, None).await;
        let lead = f
            .local
            .ingest(NewAttendance::waiting(Channel::Instagram, "L", "@l"))
            .await
            .unwrap();

        let closed = f.board.finalize(lead.id).await.unwrap();
        assert_eq!(closed.status, AttendanceStatus::Finalizado);
        assert!(matches!(
            f.board.finalize(lead.id).await,
            Err(ClientError::Transition(TransitionError::Terminal))
        ));
        assert!(matches!(
            f.board.claim_waiting(lead.id).await,
            Err(ClientError::Transition(TransitionError::Terminal))
        ));
    }

    #[tokio::test]
    async fn actions_need_a_session() {
        let mut f = fixture().await;
        let lead = f
            .local
            .ingest(NewAttendance::automated(Channel::WhatsApp, "L", "1"))
            .await
            .unwrap();
        assert!(matches!(
            f.board.claim_automated(lead.id).await,
            Err(ClientError::Unauthenticated)
        ));
        assert!(f.notices.try_recv().unwrap().is_error());
    }

    #[tokio::test]
    async fn report_and_chat_history() {
        let f = fixture().await;
        let me = f.local.enroll_broker(UserId::new(), "A").await.unwrap().id;
        f.local.set_current_user(me, None).await;
        let lead = f
            .local
            .ingest(
                NewAttendance::automated(Channel::WhatsApp, "L", "1")
                    .report("Procura apartamento de 2 quartos")
                    .session("sess-1"),
            )
            .await
            .unwrap();
        for (sender, content) in [("human", "Oi"), ("ai", "Olá! Como posso ajudar?")] {
            f.local
                .append_chat_message(
                    "sess-1",
                    &enleve_shared::models::ChatMessage {
                        sender: sender.into(),
                        content: content.into(),
                    },
                )
                .await
                .unwrap();
        }

        assert_eq!(
            f.board.report_text(lead.id).await.unwrap().as_deref(),
            Some("Procura apartamento de 2 quartos")
        );
        let history = f.board.chat_history(lead.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert!(history[0].message.is_customer());
        assert_eq!(history[1].message.content, "Olá! Como posso ajudar?");
    }
}
