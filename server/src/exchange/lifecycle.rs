//! Status rules for the exchange lifecycle.
//!
//! A request moves to a response, the response to a session, and the session
//! ends in completion (with credit settlement), cancellation or a dispute.
//! Everything here is pure: the storage modules load rows, ask these types
//! whether a move is allowed, and only then write.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::listing::ListingType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LifecycleError {
    #[error("This request is no longer pending")]
    RequestNotPending,
    #[error("Can only update pending requests")]
    RequestNotEditable,
    #[error("Can only cancel pending requests")]
    RequestNotCancellable,
    #[error("This response is not in accepted status")]
    ResponseNotAccepted,
    #[error("This response has already been rejected")]
    ResponseAlreadyRejected,
    #[error("You don't have access to this session")]
    NotParticipant,
    #[error("Cannot change session status from {from} to {to}")]
    InvalidSessionTransition {
        from: SessionStatus,
        to: SessionStatus,
    },
    #[error("Cannot cancel a completed session")]
    AlreadyCompleted,
    #[error("Session is already {0}")]
    SessionClosed(SessionStatus),
    #[error("You have already confirmed completion of this session")]
    AlreadyConfirmed,
    #[error("Can only review completed sessions")]
    NotCompleted,
    #[error("Cannot dispute a cancelled session")]
    NotDisputable,
    #[error("Can only respond to open disputes")]
    DisputeNotOpen,
    #[error("Can only escalate disputes under review")]
    DisputeNotUnderReview,
    #[error("This dispute is already {0}")]
    DisputeClosed(DisputeStatus),
    #[error("Status must be either 'resolved' or 'closed'")]
    InvalidResolution,
}

macro_rules! status_names {
    ($ty:ident { $($variant:ident => $name:literal),+ $(,)? }) => {
        impl $ty {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $name),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "exchange_type", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ExchangeType {
    CreditsOnly,
    SkillOnly,
    CreditsAndSkill,
}

status_names!(ExchangeType {
    CreditsOnly => "credits_only",
    SkillOnly => "skill_only",
    CreditsAndSkill => "credits_and_skill",
});

impl ExchangeType {
    pub fn involves_credits(&self) -> bool {
        matches!(self, ExchangeType::CreditsOnly | ExchangeType::CreditsAndSkill)
    }

    pub fn involves_skills(&self) -> bool {
        matches!(self, ExchangeType::SkillOnly | ExchangeType::CreditsAndSkill)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "exchange_request_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    #[default]
    Pending,
    Accepted,
    Rejected,
    Cancelled,
}

status_names!(RequestStatus {
    Pending => "pending",
    Accepted => "accepted",
    Rejected => "rejected",
    Cancelled => "cancelled",
});

impl RequestStatus {
    pub fn ensure_editable(self) -> Result<(), LifecycleError> {
        match self {
            RequestStatus::Pending => Ok(()),
            _ => Err(LifecycleError::RequestNotEditable),
        }
    }

    pub fn cancel(self) -> Result<RequestStatus, LifecycleError> {
        match self {
            RequestStatus::Pending => Ok(RequestStatus::Cancelled),
            _ => Err(LifecycleError::RequestNotCancellable),
        }
    }

    /// Status of the request once the listing creator has answered it
    pub fn respond(self, answer: ResponseStatus) -> Result<RequestStatus, LifecycleError> {
        if self != RequestStatus::Pending {
            return Err(LifecycleError::RequestNotPending);
        }

        Ok(match answer {
            ResponseStatus::Rejected => RequestStatus::Rejected,
            ResponseStatus::Accepted | ResponseStatus::Pending => RequestStatus::Pending,
        })
    }

    /// The requester takes up an accepted response, opening a session
    pub fn accept(self, response: ResponseStatus) -> Result<RequestStatus, LifecycleError> {
        if response != ResponseStatus::Accepted {
            return Err(LifecycleError::ResponseNotAccepted);
        }
        if self != RequestStatus::Pending {
            return Err(LifecycleError::RequestNotPending);
        }

        Ok(RequestStatus::Accepted)
    }

    /// The requester turns down the response
    pub fn decline(
        self,
        response: ResponseStatus,
    ) -> Result<(RequestStatus, ResponseStatus), LifecycleError> {
        if response == ResponseStatus::Rejected {
            return Err(LifecycleError::ResponseAlreadyRejected);
        }
        if self != RequestStatus::Pending {
            return Err(LifecycleError::RequestNotPending);
        }

        Ok((RequestStatus::Rejected, ResponseStatus::Rejected))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "exchange_response_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ResponseStatus {
    Accepted,
    Rejected,
    Pending,
}

status_names!(ResponseStatus {
    Accepted => "accepted",
    Rejected => "rejected",
    Pending => "pending",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "exchange_session_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    #[default]
    Scheduled,
    InProgress,
    Completed,
    Cancelled,
    Disputed,
}

status_names!(SessionStatus {
    Scheduled => "scheduled",
    InProgress => "in_progress",
    Completed => "completed",
    Cancelled => "cancelled",
    Disputed => "disputed",
});

impl SessionStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, SessionStatus::Scheduled | SessionStatus::InProgress)
    }

    /// Status changes a participant may make directly through an update.
    /// Completion, cancellation and disputes each have their own operation.
    pub fn update_to(self, to: SessionStatus) -> Result<SessionStatus, LifecycleError> {
        use SessionStatus::*;

        match (self, to) {
            (from, to) if from == to && from.is_open() => Ok(to),
            (Scheduled, InProgress) | (InProgress, Scheduled) => Ok(to),
            (from, to) => Err(LifecycleError::InvalidSessionTransition { from, to }),
        }
    }

    pub fn cancel(self) -> Result<SessionStatus, LifecycleError> {
        match self {
            SessionStatus::Scheduled | SessionStatus::InProgress => Ok(SessionStatus::Cancelled),
            SessionStatus::Completed => Err(LifecycleError::AlreadyCompleted),
            other => Err(LifecycleError::SessionClosed(other)),
        }
    }

    pub fn dispute(self) -> Result<SessionStatus, LifecycleError> {
        match self {
            SessionStatus::Scheduled | SessionStatus::InProgress | SessionStatus::Completed => {
                Ok(SessionStatus::Disputed)
            }
            SessionStatus::Cancelled => Err(LifecycleError::NotDisputable),
            SessionStatus::Disputed => Err(LifecycleError::SessionClosed(self)),
        }
    }

    pub fn ensure_reviewable(self) -> Result<(), LifecycleError> {
        match self {
            SessionStatus::Completed => Ok(()),
            _ => Err(LifecycleError::NotCompleted),
        }
    }
}

/// Which side of a session a user is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Requestor,
    Responder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Participants {
    pub requestor: Uuid,
    pub responder: Uuid,
}

impl Participants {
    pub fn role_of(&self, user_id: Uuid) -> Result<Role, LifecycleError> {
        if user_id == self.requestor {
            Ok(Role::Requestor)
        } else if user_id == self.responder {
            Ok(Role::Responder)
        } else {
            Err(LifecycleError::NotParticipant)
        }
    }

    pub fn user(&self, role: Role) -> Uuid {
        match role {
            Role::Requestor => self.requestor,
            Role::Responder => self.responder,
        }
    }

    pub fn counterpart(&self, user_id: Uuid) -> Result<Uuid, LifecycleError> {
        Ok(match self.role_of(user_id)? {
            Role::Requestor => self.responder,
            Role::Responder => self.requestor,
        })
    }
}

/// Both sides must confirm before a session completes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Confirmations {
    pub requestor: bool,
    pub responder: bool,
}

impl Confirmations {
    pub fn both(&self) -> bool {
        self.requestor && self.responder
    }

    /// Record `role`'s confirmation on a session in `status`.
    /// Returns the new flags and the status the session ends up in.
    pub fn confirm(
        self,
        status: SessionStatus,
        role: Role,
    ) -> Result<(Confirmations, SessionStatus), LifecycleError> {
        if !status.is_open() {
            return Err(LifecycleError::SessionClosed(status));
        }

        let mut next = self;
        let flag = match role {
            Role::Requestor => &mut next.requestor,
            Role::Responder => &mut next.responder,
        };
        if *flag {
            return Err(LifecycleError::AlreadyConfirmed);
        }
        *flag = true;

        let status = if next.both() {
            SessionStatus::Completed
        } else {
            status
        };

        Ok((next, status))
    }
}

/// One direction of skills being taught within a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SkillTransfer {
    pub provider: Uuid,
    pub receiver: Uuid,
    pub skills: Vec<String>,
}

/// What the two sides agreed to when a session is opened
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExchangeTerms {
    pub exchange_type: ExchangeType,
    pub credits_amount: i64,
    pub credits_payer: Option<Uuid>,
    pub skills_exchanged: Vec<SkillTransfer>,
}

/// The listing and request fields that decide the terms of a session
#[derive(Debug, Clone)]
pub struct Proposal<'a> {
    pub listing_type: ListingType,
    pub listing_creator: Uuid,
    pub listing_skills: &'a [String],
    pub requester: Uuid,
    pub exchange_type: ExchangeType,
    pub credits: i64,
    pub skills: &'a [String],
}

impl ExchangeTerms {
    /// The requester pays any proposed credits, whichever way the listing
    /// points. Skills the requester proposed always flow from requester to creator.
    pub fn derive(proposal: &Proposal<'_>) -> ExchangeTerms {
        let (provider, receiver) = match proposal.listing_type {
            ListingType::Offer => (proposal.listing_creator, proposal.requester),
            ListingType::Request => (proposal.requester, proposal.listing_creator),
        };

        let credits_amount = if proposal.exchange_type.involves_credits() {
            proposal.credits.max(0)
        } else {
            0
        };
        let credits_payer = (credits_amount > 0).then_some(proposal.requester);

        let mut skills_exchanged = Vec::new();
        if proposal.exchange_type.involves_skills() {
            if !proposal.listing_skills.is_empty() {
                skills_exchanged.push(SkillTransfer {
                    provider,
                    receiver,
                    skills: proposal.listing_skills.to_vec(),
                });
            }
            if !proposal.skills.is_empty() {
                skills_exchanged.push(SkillTransfer {
                    provider: proposal.requester,
                    receiver: proposal.listing_creator,
                    skills: proposal.skills.to_vec(),
                });
            }
        }

        ExchangeTerms {
            exchange_type: proposal.exchange_type,
            credits_amount,
            credits_payer,
            skills_exchanged,
        }
    }
}

/// A credit movement owed once a session completes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Settlement {
    pub payer: Uuid,
    pub payee: Uuid,
    pub amount: i64,
}

impl Settlement {
    /// `None` when the session carries no credits
    pub fn for_session(
        participants: &Participants,
        credits_amount: i64,
        credits_payer: Option<Uuid>,
    ) -> Result<Option<Settlement>, LifecycleError> {
        let payer = match credits_payer {
            Some(payer) if credits_amount > 0 => payer,
            _ => return Ok(None),
        };

        Ok(Some(Settlement {
            payer,
            payee: participants.counterpart(payer)?,
            amount: credits_amount,
        }))
    }

    pub fn can_cover(&self, payer_balance: i64) -> bool {
        payer_balance >= self.amount
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "dispute_status", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
    Closed,
    Escalated,
}

status_names!(DisputeStatus {
    Open => "open",
    UnderReview => "under_review",
    Resolved => "resolved",
    Closed => "closed",
    Escalated => "escalated",
});

impl DisputeStatus {
    pub const ACTIVE: [DisputeStatus; 3] = [
        DisputeStatus::Open,
        DisputeStatus::UnderReview,
        DisputeStatus::Escalated,
    ];

    pub fn is_active(&self) -> bool {
        Self::ACTIVE.contains(self)
    }

    /// The respondent answers an open dispute
    pub fn respond(self) -> Result<DisputeStatus, LifecycleError> {
        match self {
            DisputeStatus::Open => Ok(DisputeStatus::UnderReview),
            _ => Err(LifecycleError::DisputeNotOpen),
        }
    }

    pub fn escalate(self) -> Result<DisputeStatus, LifecycleError> {
        match self {
            DisputeStatus::UnderReview => Ok(DisputeStatus::Escalated),
            _ => Err(LifecycleError::DisputeNotUnderReview),
        }
    }

    /// An admin settles the dispute as `to`
    pub fn resolve(self, to: DisputeStatus) -> Result<DisputeStatus, LifecycleError> {
        if !matches!(to, DisputeStatus::Resolved | DisputeStatus::Closed) {
            return Err(LifecycleError::InvalidResolution);
        }
        if !self.is_active() {
            return Err(LifecycleError::DisputeClosed(self));
        }

        Ok(to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn participants() -> Participants {
        Participants {
            requestor: Uuid::new_v4(),
            responder: Uuid::new_v4(),
        }
    }

    #[test]
    fn test_request_only_pending_can_change() {
        assert_eq!(RequestStatus::Pending.cancel(), Ok(RequestStatus::Cancelled));
        assert_eq!(
            RequestStatus::Accepted.cancel(),
            Err(LifecycleError::RequestNotCancellable)
        );
        assert!(RequestStatus::Pending.ensure_editable().is_ok());
        assert_eq!(
            RequestStatus::Rejected.ensure_editable(),
            Err(LifecycleError::RequestNotEditable)
        );
    }

    #[test]
    fn test_rejected_response_rejects_request() {
        assert_eq!(
            RequestStatus::Pending.respond(ResponseStatus::Rejected),
            Ok(RequestStatus::Rejected)
        );
        assert_eq!(
            RequestStatus::Pending.respond(ResponseStatus::Accepted),
            Ok(RequestStatus::Pending)
        );
        assert_eq!(
            RequestStatus::Cancelled.respond(ResponseStatus::Accepted),
            Err(LifecycleError::RequestNotPending)
        );
    }

    #[test]
    fn test_accept_requires_accepted_response_and_pending_request() {
        assert_eq!(
            RequestStatus::Pending.accept(ResponseStatus::Accepted),
            Ok(RequestStatus::Accepted)
        );
        assert_eq!(
            RequestStatus::Pending.accept(ResponseStatus::Rejected),
            Err(LifecycleError::ResponseNotAccepted)
        );
        // A second accept finds the request already accepted
        assert_eq!(
            RequestStatus::Accepted.accept(ResponseStatus::Accepted),
            Err(LifecycleError::RequestNotPending)
        );
    }

    #[test]
    fn test_decline_response() {
        assert_eq!(
            RequestStatus::Pending.decline(ResponseStatus::Accepted),
            Ok((RequestStatus::Rejected, ResponseStatus::Rejected))
        );
        assert_eq!(
            RequestStatus::Pending.decline(ResponseStatus::Rejected),
            Err(LifecycleError::ResponseAlreadyRejected)
        );
        assert_eq!(
            RequestStatus::Accepted.decline(ResponseStatus::Accepted),
            Err(LifecycleError::RequestNotPending)
        );
    }

    #[test]
    fn test_manual_session_updates() {
        use SessionStatus::*;

        assert_eq!(Scheduled.update_to(InProgress), Ok(InProgress));
        assert_eq!(InProgress.update_to(Scheduled), Ok(Scheduled));
        assert_eq!(InProgress.update_to(InProgress), Ok(InProgress));

        for to in [Completed, Cancelled, Disputed] {
            assert_eq!(
                Scheduled.update_to(to),
                Err(LifecycleError::InvalidSessionTransition { from: Scheduled, to })
            );
        }
        assert!(Completed.update_to(InProgress).is_err());
        assert!(Cancelled.update_to(Scheduled).is_err());
    }

    #[test]
    fn test_invalid_transition_message() {
        let err = SessionStatus::Completed
            .update_to(SessionStatus::InProgress)
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Cannot change session status from completed to in_progress"
        );
    }

    #[test]
    fn test_cancel_session() {
        assert_eq!(SessionStatus::Scheduled.cancel(), Ok(SessionStatus::Cancelled));
        assert_eq!(SessionStatus::InProgress.cancel(), Ok(SessionStatus::Cancelled));
        assert_eq!(
            SessionStatus::Completed.cancel(),
            Err(LifecycleError::AlreadyCompleted)
        );
        assert_eq!(
            SessionStatus::Cancelled.cancel(),
            Err(LifecycleError::SessionClosed(SessionStatus::Cancelled))
        );
    }

    #[test]
    fn test_dispute_session() {
        assert_eq!(SessionStatus::Completed.dispute(), Ok(SessionStatus::Disputed));
        assert_eq!(SessionStatus::InProgress.dispute(), Ok(SessionStatus::Disputed));
        assert_eq!(
            SessionStatus::Cancelled.dispute(),
            Err(LifecycleError::NotDisputable)
        );
    }

    #[test]
    fn test_mutual_confirmation_completes() {
        let (first, status) = Confirmations::default()
            .confirm(SessionStatus::InProgress, Role::Responder)
            .unwrap();
        assert_eq!(status, SessionStatus::InProgress);
        assert!(first.responder && !first.requestor);

        let (second, status) = first
            .confirm(SessionStatus::InProgress, Role::Requestor)
            .unwrap();
        assert!(second.both());
        assert_eq!(status, SessionStatus::Completed);
    }

    #[test]
    fn test_confirming_twice_is_rejected() {
        let (once, _) = Confirmations::default()
            .confirm(SessionStatus::Scheduled, Role::Requestor)
            .unwrap();

        assert_eq!(
            once.confirm(SessionStatus::Scheduled, Role::Requestor),
            Err(LifecycleError::AlreadyConfirmed)
        );
    }

    #[test]
    fn test_cannot_confirm_closed_session() {
        let both = Confirmations {
            requestor: true,
            responder: true,
        };
        assert_eq!(
            both.confirm(SessionStatus::Completed, Role::Requestor),
            Err(LifecycleError::SessionClosed(SessionStatus::Completed))
        );
        assert!(Confirmations::default()
            .confirm(SessionStatus::Cancelled, Role::Requestor)
            .is_err());
    }

    #[test]
    fn test_roles() {
        let p = participants();
        let stranger = Uuid::new_v4();

        assert_eq!(p.role_of(p.requestor), Ok(Role::Requestor));
        assert_eq!(p.role_of(p.responder), Ok(Role::Responder));
        assert_eq!(p.role_of(stranger), Err(LifecycleError::NotParticipant));
        assert_eq!(p.counterpart(p.requestor), Ok(p.responder));
        assert_eq!(p.user(Role::Responder), p.responder);
    }

    #[test]
    fn test_offer_terms_requester_pays() {
        let creator = Uuid::new_v4();
        let requester = Uuid::new_v4();
        let listed = vec!["guitar".to_string()];
        let proposed = vec!["spanish".to_string()];

        let terms = ExchangeTerms::derive(&Proposal {
            listing_type: ListingType::Offer,
            listing_creator: creator,
            listing_skills: &listed,
            requester,
            exchange_type: ExchangeType::CreditsAndSkill,
            credits: 15,
            skills: &proposed,
        });

        assert_eq!(terms.credits_amount, 15);
        assert_eq!(terms.credits_payer, Some(requester));
        assert_eq!(
            terms.skills_exchanged,
            vec![
                SkillTransfer {
                    provider: creator,
                    receiver: requester,
                    skills: listed.clone(),
                },
                SkillTransfer {
                    provider: requester,
                    receiver: creator,
                    skills: proposed.clone(),
                },
            ]
        );
    }

    #[test]
    fn test_request_listing_terms_requester_still_pays() {
        let creator = Uuid::new_v4();
        let requester = Uuid::new_v4();
        let listed = vec!["tax returns".to_string()];

        let terms = ExchangeTerms::derive(&Proposal {
            listing_type: ListingType::Request,
            listing_creator: creator,
            listing_skills: &listed,
            requester,
            exchange_type: ExchangeType::CreditsOnly,
            credits: 40,
            skills: &[],
        });

        assert_eq!(terms.credits_payer, Some(requester));
        assert_ne!(terms.credits_payer, Some(creator));
        assert_eq!(terms.credits_amount, 40);
        assert!(terms.skills_exchanged.is_empty());
    }

    #[test]
    fn test_skill_only_terms_carry_no_credits() {
        let listed = vec!["yoga".to_string()];
        let terms = ExchangeTerms::derive(&Proposal {
            listing_type: ListingType::Offer,
            listing_creator: Uuid::new_v4(),
            listing_skills: &listed,
            requester: Uuid::new_v4(),
            exchange_type: ExchangeType::SkillOnly,
            credits: 25,
            skills: &[],
        });

        assert_eq!(terms.credits_amount, 0);
        assert_eq!(terms.credits_payer, None);
        assert_eq!(terms.skills_exchanged.len(), 1);
    }

    #[test]
    fn test_settlement() {
        let p = participants();

        assert_eq!(Settlement::for_session(&p, 0, Some(p.requestor)), Ok(None));
        assert_eq!(Settlement::for_session(&p, 10, None), Ok(None));

        let settlement = Settlement::for_session(&p, 10, Some(p.requestor))
            .unwrap()
            .unwrap();
        assert_eq!(settlement.payee, p.responder);
        assert!(settlement.can_cover(10));
        assert!(!settlement.can_cover(9));

        assert_eq!(
            Settlement::for_session(&p, 10, Some(Uuid::new_v4())),
            Err(LifecycleError::NotParticipant)
        );
    }

    #[test]
    fn test_dispute_flow() {
        use DisputeStatus::*;

        assert_eq!(Open.respond(), Ok(UnderReview));
        assert_eq!(UnderReview.respond(), Err(LifecycleError::DisputeNotOpen));
        assert_eq!(UnderReview.escalate(), Ok(Escalated));
        assert_eq!(Open.escalate(), Err(LifecycleError::DisputeNotUnderReview));

        for from in DisputeStatus::ACTIVE {
            assert_eq!(from.resolve(Resolved), Ok(Resolved));
            assert_eq!(from.resolve(Closed), Ok(Closed));
        }
        assert_eq!(Open.resolve(Escalated), Err(LifecycleError::InvalidResolution));
        assert_eq!(Resolved.resolve(Closed), Err(LifecycleError::DisputeClosed(Resolved)));
    }

    #[test]
    fn test_status_names_match_storage() {
        assert_eq!(SessionStatus::InProgress.as_str(), "in_progress");
        assert_eq!(DisputeStatus::UnderReview.to_string(), "under_review");
        assert_eq!(
            serde_json::to_value(ExchangeType::CreditsAndSkill).unwrap(),
            "credits_and_skill"
        );
    }
}
