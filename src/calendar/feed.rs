use std::io::BufRead;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Buf;
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{debug, info, warn};
use regex::Regex;

use super::{Event, EventSource};

type Params = Option<Vec<(String, Vec<String>)>>;

/// Reads calendars published as iCalendar feeds.
/// The calendar id is the feed url (`http`, `https` or `webcal`).
pub struct IcalSource {
    client: reqwest::Client,
    lookahead: Duration,
    line_breaks: Regex,
    tags: Regex,
}

impl IcalSource {
    pub fn new(lookahead: Duration, user_agent: &str) -> Result<Self, anyhow::Error> {
        let client = reqwest::Client::builder()
            .user_agent(user_agent)
            .build()
            .context("failed to build the http client")?;

        Ok(Self {
            client,
            lookahead,
            line_breaks: Regex::new(r"(?i)<br\s*/?>|</p>")
                .context("failed to build regex expression")?,
            tags: Regex::new(r"<[^>]*>").context("failed to build regex expression")?,
        })
    }

    /// Parses a feed and keeps the events overlapping
    /// `[reference, reference + lookahead]`.
    pub fn parse<B: BufRead>(&self, data: B, reference: DateTime<Utc>) -> Vec<Event> {
        let parser = ::ical::IcalParser::new(data);
        let horizon = reference + self.lookahead;
        let mut events = Vec::new();

        for cal in parser {
            let calendar = match cal {
                Ok(calendar) => calendar,
                Err(err) => {
                    warn!("skipping unreadable calendar: {}", err);
                    continue;
                }
            };

            for event in calendar.events {
                match self.parse_event(&event.properties) {
                    Ok(parsed) => {
                        if parsed.end > reference && parsed.start < horizon {
                            events.push(parsed);
                        }
                    }
                    Err(err) => warn!("skipping malformed event: {:#}", err),
                }
            }
        }

        events
    }

    fn parse_event(&self, properties: &[::ical::property::Property]) -> Result<Event, anyhow::Error> {
        let mut event = Event::default();
        let mut start = None;
        let mut end = None;

        for property in properties {
            if let Some(value) = &property.value {
                match &property.name as &str {
                    "DTSTART" => {
                        debug!("Parsing DTSTART: {}", value);
                        start = Some(
                            parse_date_time(value, &property.params)
                                .with_context(|| format!("invalid DTSTART {}", value))?,
                        );
                    }
                    "DTEND" => {
                        debug!("Parsing DTEND: {}", value);
                        end = Some(
                            parse_date_time(value, &property.params)
                                .with_context(|| format!("invalid DTEND {}", value))?,
                        );
                    }
                    "SUMMARY" => {
                        event.name = unescape(value);
                    }
                    "LOCATION" => {
                        event.location = unescape(value);
                    }
                    "DESCRIPTION" => {
                        event.description = self.clean_description(&unescape(value));
                    }
                    "UID" => {
                        event.uid = value.to_string();
                    }
                    &_ => {}
                }
            }
        }

        let (start, all_day) = start.context("event without DTSTART")?;
        event.start = start;
        event.end = match end {
            Some((end, _)) => end,
            // a date without end lasts the whole day, a date-time is instantaneous
            None if all_day => start + Duration::days(1),
            None => start,
        };

        Ok(event)
    }

    fn clean_description(&self, value: &str) -> String {
        let text = self.line_breaks.replace_all(value, "\n");
        self.tags.replace_all(&text, "").trim().to_string()
    }
}

#[async_trait]
impl EventSource for IcalSource {
    async fn fetch_events(
        &self,
        calendar_id: &str,
        reference: DateTime<Utc>,
    ) -> Result<Vec<Event>, anyhow::Error> {
        if calendar_id.is_empty() {
            bail!("no calendar-id configured");
        }

        let url = match calendar_id.strip_prefix("webcal://") {
            Some(rest) => format!("https://{}", rest),
            None => calendar_id.to_string(),
        };

        let data = self
            .client
            .get(&url)
            .send()
            .await
            .context("failed to reach the calendar")?
            .error_for_status()
            .context("the calendar answered with an error")?
            .bytes()
            .await
            .context("failed to read the calendar")?
            .reader();

        let events = self.parse(data, reference);
        info!("fetched {} upcoming events from {}", events.len(), url);

        Ok(events)
    }
}

/// Parses the value of a DTSTART/DTEND property.
/// Returns the instant and whether the value was a plain date.
fn parse_date_time(value: &str, params: &Params) -> Result<(DateTime<Utc>, bool), anyhow::Error> {
    let tz = match param(params, "TZID") {
        Some(name) => Some(
            name.parse::<Tz>()
                .map_err(|e| anyhow::anyhow!("unknown TZID '{}': {}", name, e))?,
        ),
        None => None,
    };

    if value.len() == 8 {
        let date = NaiveDate::parse_from_str(value, "%Y%m%d")?;
        let midnight = date.and_hms_opt(0, 0, 0).context("invalid midnight")?;
        return Ok((localize(midnight, tz)?, true));
    }

    if let Some(utc) = value.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S")?;
        return Ok((naive.and_utc(), false));
    }

    // floating times without TZID are read as utc
    let naive = NaiveDateTime::parse_from_str(value, "%Y%m%dT%H%M%S")?;
    Ok((localize(naive, tz)?, false))
}

fn localize(naive: NaiveDateTime, tz: Option<Tz>) -> Result<DateTime<Utc>, anyhow::Error> {
    match tz {
        // a time skipped by a forward dst jump is moved past the gap
        Some(tz) => tz
            .from_local_datetime(&naive)
            .earliest()
            .or_else(|| tz.from_local_datetime(&(naive + Duration::hours(1))).earliest())
            .map(|local| local.with_timezone(&Utc))
            .with_context(|| format!("{} does not exist in {}", naive, tz)),
        None => Ok(naive.and_utc()),
    }
}

fn param<'a>(params: &'a Params, name: &str) -> Option<&'a str> {
    params
        .as_ref()?
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .and_then(|(_, values)| values.first())
        .map(|value| value.trim_matches('"'))
}

/// Reverts the iCalendar TEXT escapes.
fn unescape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();

    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') | Some('N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }

    out
}
