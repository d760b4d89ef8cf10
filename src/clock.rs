//! Clock-in / clock-out state machine.
//!
//! There are two states, idle and active, and the store is the only place
//! that knows which one applies: a stored [`Session`] means active. Every
//! failure path either leaves the session in place for a retry or returns it
//! inside the error so the caller can show the start time before it is gone.

use chrono::{DateTime, FixedOffset, Local, Timelike};
use thiserror::Error;
use tracing::{error, info};

use crate::calendar::{CalendarClient, CalendarError, CalendarEvent, InsertedEvent};
use crate::credentials::CredentialCache;
use crate::store::{DEFAULT_SUMMARY, Session, SessionStore, StoreError};
use crate::sync::{CalendarSync, SyncOutcome};

#[derive(Debug, Error)]
pub enum ClockError {
    #[error("already clocked in since {} ({summary})", .started_at.to_rfc3339())]
    AlreadyActive {
        started_at: DateTime<FixedOffset>,
        summary: String,
    },
    #[error("not clocked in")]
    NotClockedIn,
    #[error(
        "clock-out time {} is before the clock-in time {}",
        .ended_at.to_rfc3339(),
        .started_at.to_rfc3339()
    )]
    EndBeforeStart {
        started_at: DateTime<FixedOffset>,
        ended_at: DateTime<FixedOffset>,
    },
    #[error(
        "calendar credential expired or was revoked ({detail}); the session that started at {} was discarded",
        .session.started_at_rfc3339()
    )]
    CredentialExpired { session: Session, detail: String },
    #[error("failed to publish the work block; the session is kept, clock out again to retry")]
    Remote(#[source] CalendarError),
    #[error("session storage failure")]
    Storage(#[from] StoreError),
    #[error("work block published ({reference}) but the session could not be cleared; do not clock out again")]
    ClearAfterPublish {
        reference: String,
        #[source]
        source: StoreError,
    },
}

/// A completed clock-out.
#[derive(Debug, Clone)]
pub struct ClockOut {
    pub session: Session,
    pub ended_at: DateTime<FixedOffset>,
    pub event: CalendarEvent,
    pub inserted: InsertedEvent,
}

pub struct SessionController<S, C, K> {
    store: S,
    sync: CalendarSync<C>,
    credentials: K,
    default_summary: String,
}

impl<S, C, K> SessionController<S, C, K>
where
    S: SessionStore,
    C: CalendarClient,
    K: CredentialCache,
{
    pub fn new(store: S, sync: CalendarSync<C>, credentials: K) -> Self {
        Self {
            store,
            sync,
            credentials,
            default_summary: DEFAULT_SUMMARY.to_string(),
        }
    }

    pub fn with_default_summary(mut self, summary: impl Into<String>) -> Self {
        self.default_summary = summary.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn sync(&self) -> &CalendarSync<C> {
        &self.sync
    }

    pub fn clock_in(&self, summary: Option<&str>) -> Result<Session, ClockError> {
        self.clock_in_at(summary, Local::now().fixed_offset())
    }

    /// Start a session at `at`. Refuses to touch an existing session.
    pub fn clock_in_at(
        &self,
        summary: Option<&str>,
        at: DateTime<FixedOffset>,
    ) -> Result<Session, ClockError> {
        let summary = summary
            .map(str::trim)
            .filter(|text| !text.is_empty())
            .unwrap_or(&self.default_summary);
        let session = Session::new(whole_seconds(at), summary);

        match self.store.put(&session) {
            Ok(()) => {
                info!(started_at = %session.started_at_rfc3339(), summary = %session.summary, "clocked in");
                Ok(session)
            }
            Err(StoreError::AlreadyActive(existing)) => Err(ClockError::AlreadyActive {
                started_at: existing.started_at,
                summary: existing.summary,
            }),
            Err(err) => Err(err.into()),
        }
    }

    pub fn clock_out(&self) -> Result<ClockOut, ClockError> {
        self.clock_out_at(Local::now().fixed_offset())
    }

    /// Publish the active session as ending at `at`.
    ///
    /// The session is cleared only when the outcome is final: published, or
    /// rejected because the credential is gone (which also drops the cached
    /// credential). Any other failure leaves both untouched.
    pub fn clock_out_at(&self, at: DateTime<FixedOffset>) -> Result<ClockOut, ClockError> {
        let session = match self.store.get() {
            Ok(session) => session,
            Err(StoreError::NoActiveSession) => return Err(ClockError::NotClockedIn),
            Err(err) => return Err(err.into()),
        };
        let ended_at = whole_seconds(at);
        if ended_at < session.started_at {
            return Err(ClockError::EndBeforeStart {
                started_at: session.started_at,
                ended_at,
            });
        }

        match self.sync.publish(&session, ended_at) {
            SyncOutcome::Published { event, inserted } => {
                if let Err(source) = self.store.clear() {
                    return Err(ClockError::ClearAfterPublish {
                        reference: inserted.html_link.clone().unwrap_or(inserted.id),
                        source,
                    });
                }
                info!(ended_at = %event.end, "clocked out");
                Ok(ClockOut {
                    session,
                    ended_at,
                    event,
                    inserted,
                })
            }
            SyncOutcome::AuthExpired { detail, .. } => {
                if let Err(err) = self.store.clear() {
                    error!(error = %err, "failed to clear session after credential rejection");
                }
                if let Err(err) = self.credentials.invalidate() {
                    error!(error = %err, "failed to remove cached credential");
                }
                Err(ClockError::CredentialExpired { session, detail })
            }
            SyncOutcome::Failed { error, .. } => Err(ClockError::Remote(error)),
        }
    }
}

fn whole_seconds(at: DateTime<FixedOffset>) -> DateTime<FixedOffset> {
    at.with_nanosecond(0).unwrap_or(at)
}
