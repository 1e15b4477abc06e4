use plaudit_contracts::{ConsentAction, SubmissionStatus};

/// Everything that can move a submission between statuses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEvent {
    Delivered,
    Alerted,
    Approve,
    Regenerate,
    RegenerationFailed,
    Decline,
    Copy,
    Post,
}

impl From<ConsentAction> for StatusEvent {
    fn from(action: ConsentAction) -> Self {
        match action {
            ConsentAction::Approve => StatusEvent::Approve,
            ConsentAction::Regenerate => StatusEvent::Regenerate,
            ConsentAction::Decline => StatusEvent::Decline,
        }
    }
}

/// The transition table. `None` means the edge does not exist.
pub fn next_status(from: SubmissionStatus, event: StatusEvent) -> Option<SubmissionStatus> {
    use StatusEvent as E;
    use SubmissionStatus as S;

    match (from, event) {
        (S::Pending, E::Delivered) => Some(S::Sent),
        (S::Pending, E::Alerted) => Some(S::AlertSent),
        (S::Sent | S::Edited, E::Approve) => Some(S::Approved),
        (S::Sent | S::Edited, E::Regenerate) => Some(S::Sent),
        (S::Sent | S::Edited, E::RegenerationFailed) => Some(S::Edited),
        (S::Sent | S::Edited | S::Approved, E::Decline) => Some(S::Declined),
        (S::Approved, E::Copy) => Some(S::Copied),
        (S::Copied, E::Post) => Some(S::Posted),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EVENTS: [StatusEvent; 8] = [
        StatusEvent::Delivered,
        StatusEvent::Alerted,
        StatusEvent::Approve,
        StatusEvent::Regenerate,
        StatusEvent::RegenerationFailed,
        StatusEvent::Decline,
        StatusEvent::Copy,
        StatusEvent::Post,
    ];

    #[test]
    fn consent_terminal_states_have_no_consent_edges() {
        for status in [
            SubmissionStatus::Declined,
            SubmissionStatus::Copied,
            SubmissionStatus::AlertSent,
        ] {
            for action in [
                ConsentAction::Approve,
                ConsentAction::Regenerate,
                ConsentAction::Decline,
            ] {
                assert_eq!(next_status(status, action.into()), None, "{status:?}");
            }
        }
    }

    #[test]
    fn posted_is_a_sink() {
        for event in EVENTS {
            assert_eq!(next_status(SubmissionStatus::Posted, event), None);
        }
    }

    #[test]
    fn happy_path_reaches_posted() {
        let mut status = SubmissionStatus::Pending;
        for event in [
            StatusEvent::Delivered,
            StatusEvent::Regenerate,
            StatusEvent::Approve,
            StatusEvent::Copy,
            StatusEvent::Post,
        ] {
            status = next_status(status, event).expect("edge should exist");
        }
        assert_eq!(status, SubmissionStatus::Posted);
    }

    #[test]
    fn approved_cannot_be_approved_or_regenerated_again() {
        assert_eq!(
            next_status(SubmissionStatus::Approved, StatusEvent::Approve),
            None
        );
        assert_eq!(
            next_status(SubmissionStatus::Approved, StatusEvent::Regenerate),
            None
        );
        assert_eq!(
            next_status(SubmissionStatus::Approved, StatusEvent::Decline),
            Some(SubmissionStatus::Declined)
        );
    }

    #[test]
    fn failed_regeneration_marks_edited_and_can_recover() {
        let edited = next_status(SubmissionStatus::Sent, StatusEvent::RegenerationFailed);
        assert_eq!(edited, Some(SubmissionStatus::Edited));
        assert_eq!(
            next_status(SubmissionStatus::Edited, StatusEvent::Regenerate),
            Some(SubmissionStatus::Sent)
        );
    }

    #[test]
    fn copy_requires_approval() {
        for status in SubmissionStatus::ALL {
            let expected = (status == SubmissionStatus::Approved).then_some(SubmissionStatus::Copied);
            assert_eq!(next_status(status, StatusEvent::Copy), expected);
        }
    }

    #[test]
    fn undelivered_submissions_accept_no_consent_action() {
        for action in [
            ConsentAction::Approve,
            ConsentAction::Regenerate,
            ConsentAction::Decline,
        ] {
            assert_eq!(next_status(SubmissionStatus::Pending, action.into()), None);
        }
    }
}
