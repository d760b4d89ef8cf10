use chrono::{DateTime, FixedOffset};
use tracing::{info, warn};

use crate::calendar::{CalendarClient, CalendarError, CalendarEvent, DEFAULT_CALENDAR_ID, InsertedEvent};
use crate::store::{Session, format_rfc3339};

/// How a publish attempt ended, from the point of view of the local session.
#[derive(Debug)]
pub enum SyncOutcome {
    /// The calendar accepted the event; the session is done.
    Published {
        event: CalendarEvent,
        inserted: InsertedEvent,
    },
    /// The credential is no longer valid. Retrying cannot succeed until the
    /// user authorizes again.
    AuthExpired { event: CalendarEvent, detail: String },
    /// Anything else. The session should be kept so the user can retry.
    Failed {
        event: CalendarEvent,
        error: CalendarError,
    },
}

/// Turns a finished [`Session`] into a calendar event and classifies the
/// result of submitting it.
pub struct CalendarSync<C> {
    client: C,
    calendar_id: String,
}

impl<C: CalendarClient> CalendarSync<C> {
    /// `calendar_override` is the configured target calendar, if any. Blank
    /// values fall back to the primary calendar.
    pub fn new(client: C, calendar_override: Option<String>) -> Self {
        Self {
            client,
            calendar_id: resolve_calendar_id(calendar_override.as_deref()),
        }
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub fn calendar_id(&self) -> &str {
        &self.calendar_id
    }

    pub fn build_event(&self, session: &Session, ended_at: DateTime<FixedOffset>) -> CalendarEvent {
        CalendarEvent {
            calendar_id: self.calendar_id.clone(),
            summary: session.summary.clone(),
            start: session.started_at_rfc3339(),
            end: format_rfc3339(ended_at),
        }
    }

    pub fn publish(&self, session: &Session, ended_at: DateTime<FixedOffset>) -> SyncOutcome {
        let event = self.build_event(session, ended_at);
        match self.client.insert_event(&event) {
            Ok(inserted) => {
                info!(id = %inserted.id, calendar = %event.calendar_id, "work block published");
                SyncOutcome::Published { event, inserted }
            }
            Err(CalendarError::AuthExpired(detail)) => {
                warn!(%detail, "calendar rejected the cached credential");
                SyncOutcome::AuthExpired { event, detail }
            }
            Err(error) => {
                warn!(%error, "failed to publish work block");
                SyncOutcome::Failed { event, error }
            }
        }
    }
}

pub fn resolve_calendar_id(configured: Option<&str>) -> String {
    configured
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .unwrap_or(DEFAULT_CALENDAR_ID)
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::UpcomingEvent;
    use std::cell::RefCell;

    #[derive(Default)]
    struct RecordingClient {
        submitted: RefCell<Vec<CalendarEvent>>,
        fail_with: Option<fn() -> CalendarError>,
    }

    impl CalendarClient for RecordingClient {
        fn insert_event(&self, event: &CalendarEvent) -> Result<InsertedEvent, CalendarError> {
            self.submitted.borrow_mut().push(event.clone());
            match self.fail_with {
                Some(make_error) => Err(make_error()),
                None => Ok(InsertedEvent {
                    id: "evt-1".into(),
                    html_link: Some("https://calendar.test/evt-1".into()),
                }),
            }
        }

        fn upcoming_events(
            &self,
            _calendar_id: &str,
            _from: DateTime<FixedOffset>,
            _max_results: u32,
        ) -> Result<Vec<UpcomingEvent>, CalendarError> {
            Ok(Vec::new())
        }
    }

    fn session() -> Session {
        Session::new(
            DateTime::parse_from_rfc3339("2026-03-02T09:00:00-05:00").expect("start"),
            "Deep work",
        )
    }

    fn end() -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339("2026-03-02T11:30:00-05:00").expect("end")
    }

    #[test]
    fn calendar_id_defaults_to_primary() {
        assert_eq!(resolve_calendar_id(None), "primary");
        assert_eq!(resolve_calendar_id(Some("  \n")), "primary");
        assert_eq!(resolve_calendar_id(Some(" work@group \n")), "work@group");
    }

    #[test]
    fn builds_event_from_session_and_end() {
        let sync = CalendarSync::new(RecordingClient::default(), None);
        let event = sync.build_event(&session(), end());
        assert_eq!(
            event,
            CalendarEvent {
                calendar_id: "primary".into(),
                summary: "Deep work".into(),
                start: "2026-03-02T09:00:00-05:00".into(),
                end: "2026-03-02T11:30:00-05:00".into(),
            }
        );
    }

    #[test]
    fn successful_insert_is_published() {
        let sync = CalendarSync::new(RecordingClient::default(), Some("team".into()));
        match sync.publish(&session(), end()) {
            SyncOutcome::Published { event, inserted } => {
                assert_eq!(event.calendar_id, "team");
                assert_eq!(inserted.id, "evt-1");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(sync.client().submitted.borrow().len(), 1);
    }

    #[test]
    fn auth_failure_is_classified() {
        let client = RecordingClient {
            fail_with: Some(|| CalendarError::AuthExpired("revoked".into())),
            ..RecordingClient::default()
        };
        let sync = CalendarSync::new(client, None);
        assert!(matches!(
            sync.publish(&session(), end()),
            SyncOutcome::AuthExpired { detail, .. } if detail == "revoked"
        ));
    }

    #[test]
    fn other_failures_are_classified_as_failed() {
        let client = RecordingClient {
            fail_with: Some(|| CalendarError::Http {
                status: 500,
                message: "backend error".into(),
            }),
            ..RecordingClient::default()
        };
        let sync = CalendarSync::new(client, None);
        assert!(matches!(
            sync.publish(&session(), end()),
            SyncOutcome::Failed {
                error: CalendarError::Http { status: 500, .. },
                ..
            }
        ));
    }
}
