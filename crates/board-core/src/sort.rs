use crate::{Session, SessionStatus};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortMode {
    #[default]
    Created,
    Status,
}

impl SortMode {
    pub fn label(self) -> &'static str {
        match self {
            SortMode::Created => "created",
            SortMode::Status => "status",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SortDirection {
    Asc,
    #[default]
    Desc,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SortConfig {
    pub mode: SortMode,
    pub direction: SortDirection,
}

pub fn status_priority(status: &SessionStatus) -> u8 {
    match status {
        SessionStatus::Waiting => 0,
        SessionStatus::Working => 1,
        SessionStatus::Unknown => 2,
        SessionStatus::Other(_) => 3,
    }
}

/// Orders sessions by status priority, then most recent activity first.
///
/// The input is left untouched and ties keep their input order. Sessions whose
/// `last_activity` cannot be parsed sort after the dated ones of the same status.
pub fn sort_sessions(sessions: &[Session]) -> Vec<Session> {
    let mut keyed: Vec<_> = sessions
        .iter()
        .map(|session| {
            let activity = session
                .last_activity_at()
                .map(|at| at.timestamp_millis());
            (
                status_priority(&session.status),
                activity.is_none(),
                Reverse(activity),
                session,
            )
        })
        .collect();
    keyed.sort_by(|left, right| {
        left.0
            .cmp(&right.0)
            .then_with(|| left.1.cmp(&right.1))
            .then_with(|| left.2.cmp(&right.2))
    });
    keyed.into_iter().map(|(_, _, _, session)| session.clone()).collect()
}

/// Display ordering for the configured sort preference.
pub fn sort_sessions_by(sessions: &[Session], config: &SortConfig) -> Vec<Session> {
    match config.mode {
        SortMode::Status => sort_sessions(sessions),
        SortMode::Created => sort_by_created(sessions, config.direction),
    }
}

fn sort_by_created(sessions: &[Session], direction: SortDirection) -> Vec<Session> {
    let mut keyed: Vec<_> = sessions
        .iter()
        .map(|session| (session.created_at().map(|at| at.timestamp_millis()), session))
        .collect();
    keyed.sort_by(|(left, _), (right, _)| match (left, right) {
        (Some(left), Some(right)) => match direction {
            SortDirection::Asc => left.cmp(right),
            SortDirection::Desc => right.cmp(left),
        },
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
    keyed.into_iter().map(|(_, session)| session.clone()).collect()
}
