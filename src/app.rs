use std::io::{self, IsTerminal};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::warn;

use crate::calendar::{CalendarClient, CalendarError, EventTime, GoogleCalendarClient, UpcomingEvent};
use crate::clock::SessionController;
use crate::config::{self, ClicalConfig, DataHome};
use crate::credentials::{
    ConsentPrompt, CredentialCache, GoogleCredentialProvider, OAuthClientSecret, StoredToken,
    TerminalConsent, TokenCache,
};
use crate::store::{FsSessionStore, SessionStore};
use crate::sync::{CalendarSync, resolve_calendar_id};
use crate::util::{elapsed_between, format_clock_time, format_timestamp, hyperlink};

type GoogleClient<P> = GoogleCalendarClient<GoogleCredentialProvider<P>>;
type GoogleController<P> = SessionController<FsSessionStore, GoogleClient<P>, TokenCache>;

fn session_store(home: &DataHome, config: &ClicalConfig) -> FsSessionStore {
    FsSessionStore::new(home.sessions_dir()).with_default_summary(config.default_summary.clone())
}

fn google_client<P: ConsentPrompt>(
    home: &DataHome,
    config: &ClicalConfig,
    prompt: P,
) -> Result<GoogleClient<P>> {
    let secret = OAuthClientSecret::load(&home.client_secret_path())?;
    let agent = config.http_agent();
    let provider =
        GoogleCredentialProvider::new(secret, TokenCache::new(home.token_path()), agent.clone(), prompt);
    Ok(GoogleCalendarClient::new(agent, provider))
}

fn controller<P: ConsentPrompt>(
    home: &DataHome,
    config: &ClicalConfig,
    prompt: P,
) -> Result<GoogleController<P>> {
    let client = google_client(home, config, prompt)?;
    let sync = CalendarSync::new(client, home.calendar_override()?);
    Ok(SessionController::new(
        session_store(home, config),
        sync,
        TokenCache::new(home.token_path()),
    )
    .with_default_summary(config.default_summary.clone()))
}

pub fn clock_in(home: &DataHome, config: &ClicalConfig, summary: Option<&str>) -> Result<()> {
    clock_in_with(home, config, summary, TerminalConsent)
}

fn clock_in_with<P: ConsentPrompt>(
    home: &DataHome,
    config: &ClicalConfig,
    summary: Option<&str>,
    prompt: P,
) -> Result<()> {
    let controller = controller(home, config, prompt)?;
    let session = controller.clock_in(summary)?;
    println!(
        "Clocked in at: {} ({}).",
        format_clock_time(session.started_at),
        session.summary
    );

    // Authorize now, while losing the credential cannot cost the session.
    if let Err(err) = controller.sync().client().tokens().ensure_authorized() {
        warn!(error = %err, "authorization check after clock-in failed");
        eprintln!(
            "Clocked in, but Google authorization is not ready: {err}\n\
             Clocking out will ask for authorization again; the work block is kept until it is published."
        );
    }
    Ok(())
}

pub fn clock_out(home: &DataHome, config: &ClicalConfig) -> Result<()> {
    clock_out_with(home, config, TerminalConsent)
}

fn clock_out_with<P: ConsentPrompt>(home: &DataHome, config: &ClicalConfig, prompt: P) -> Result<()> {
    let controller = controller(home, config, prompt)?;
    let calendar_id = controller.sync().calendar_id().to_string();
    let done = controller.clock_out()?;

    if calendar_id == crate::calendar::DEFAULT_CALENDAR_ID {
        println!("No calendar ID configured. Event created on the 'primary' calendar.");
    }
    println!(
        "Clocked out at: {} ({} worked).",
        format_clock_time(done.ended_at),
        elapsed_between(done.session.started_at, done.ended_at)
    );
    match done.inserted.html_link.as_deref() {
        Some(link) => println!(
            "See the new {} on your Google Calendar.",
            hyperlink("work block", link, io::stdout().is_terminal())
        ),
        None => println!("Created event {} on your Google Calendar.", done.inserted.id),
    }
    Ok(())
}

pub fn print_status(home: &DataHome, config: &ClicalConfig) -> Result<()> {
    let store = session_store(home, config);
    let calendar_id = resolve_calendar_id(home.calendar_override()?.as_deref());

    println!("clical status");
    println!("data_home: {}", home.root().display());
    println!("calendar: {calendar_id}");
    match store.active()? {
        Some(session) => {
            let now = Local::now().fixed_offset();
            println!("clocked_in: yes");
            println!("  since: {}", format_timestamp(session.started_at));
            println!("  summary: {}", session.summary);
            println!("  elapsed: {}", elapsed_between(session.started_at, now));
        }
        None => println!("clocked_in: no"),
    }
    Ok(())
}

pub fn upcoming(home: &DataHome, config: &ClicalConfig, max: Option<u32>) -> Result<()> {
    let client = google_client(home, config, TerminalConsent)?;
    let calendar_id = resolve_calendar_id(home.calendar_override()?.as_deref());
    let max_results = config::clamp_upcoming(max.unwrap_or(config.upcoming_max_results));

    let events = match client.upcoming_events(&calendar_id, Local::now().fixed_offset(), max_results)
    {
        Ok(events) => events,
        Err(CalendarError::AuthExpired(detail)) => {
            client.tokens().cache().invalidate()?;
            anyhow::bail!(
                "Google credential expired or was revoked ({detail}); the cached token was removed, run the command again to re-authorize"
            );
        }
        Err(err) => {
            return Err(err).with_context(|| format!("failed to list events on {calendar_id}"));
        }
    };

    println!("Upcoming events:");
    if events.is_empty() {
        println!("No upcoming events found");
    }
    for event in &events {
        println!("{}", describe_upcoming(event));
    }
    Ok(())
}

fn describe_upcoming(event: &UpcomingEvent) -> String {
    match (&event.start, &event.end) {
        (EventTime::AllDay(day), _) => format!("{} {{ all day on {} }}", event.summary, day.format("%a %b %e %Y")),
        (EventTime::At(start), Some(EventTime::At(end))) => format!(
            "{} {{ starts at {}, ends at {} }}",
            event.summary,
            start.format("%a %b %e %H:%M:%S %Y"),
            end.format("%H:%M:%S")
        ),
        (EventTime::At(start), _) => format!(
            "{} {{ starts at {} }}",
            event.summary,
            start.format("%a %b %e %H:%M:%S %Y")
        ),
    }
}

pub fn doctor(home: &DataHome, config: &ClicalConfig) -> Result<u8> {
    let mut issues = 0u8;

    println!("clical doctor");
    println!("data_home: {}", home.root().display());
    println!("config_path: {}", home.config_path().display());
    println!("http_timeout: {}s", config.http_timeout().as_secs());

    match OAuthClientSecret::load(&home.client_secret_path()) {
        Ok(secret) => println!("[OK] OAuth client secret loaded ({}).", secret.client_id),
        Err(err) => {
            issues += 1;
            println!("[WARN] {err}");
        }
    }

    let cache = TokenCache::new(home.token_path());
    match cache.load() {
        Ok(Some(token)) => println!("{}", describe_token(&token)),
        Ok(None) => println!(
            "[INFO] No cached token yet; the next clock-in will open the authorization flow."
        ),
        Err(err) => {
            issues += 1;
            println!("[WARN] {err}");
        }
    }

    match home.calendar_override() {
        Ok(Some(id)) => println!("[OK] Target calendar: {id}"),
        Ok(None) => println!("[INFO] No calendarId.txt; events go to the 'primary' calendar."),
        Err(err) => {
            issues += 1;
            println!("[WARN] {err:#}");
        }
    }

    match session_store(home, config).active() {
        Ok(Some(session)) => println!(
            "[INFO] Clocked in since {} ({}).",
            format_timestamp(session.started_at),
            session.summary
        ),
        Ok(None) => println!("[OK] No work block in progress."),
        Err(err) => {
            issues += 1;
            println!("[WARN] Session records unreadable: {err}");
        }
    }

    if issues == 0 {
        println!("Doctor: healthy");
        Ok(0)
    } else {
        println!("Doctor: {issues} issue(s) found");
        Ok(1)
    }
}

fn describe_token(token: &StoredToken) -> String {
    let now = chrono::Utc::now();
    match (token.is_fresh(now), token.usable_refresh_token()) {
        (true, _) => "[OK] Cached access token is valid.".to_string(),
        (false, Some(_)) => {
            "[OK] Cached access token expired; it will be refreshed on next use.".to_string()
        }
        (false, None) => {
            "[WARN] Cached access token expired and cannot be refreshed; clocking out will require re-authorization."
                .to_string()
        }
    }
}
