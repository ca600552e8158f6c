//! Scheduled join window for an appointment

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Tz;

use super::store::Booking;

/// Where `now` falls relative to a join window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowPosition {
    TooEarly,
    Open,
    Closed,
}

/// Scheduled start and end of an appointment in the caller's timezone
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinWindow {
    pub start: DateTime<Tz>,
    pub end: DateTime<Tz>,
}

impl JoinWindow {
    /// Anchor the booking's naive date and times in `tz`
    ///
    /// The stored values are wall-clock times already in `tz`; they are
    /// attached to the zone, never converted from UTC. An end time before
    /// the start time rolls over to the next day; an equal end time gives an
    /// empty window. Returns `None` if a time falls in a DST gap.
    pub fn resolve(booking: &Booking, tz: Tz) -> Option<Self> {
        let start = local_instant(tz, booking.date, booking.start_time)?;
        let end_date = if booking.end_time < booking.start_time {
            booking.date.succ_opt()?
        } else {
            booking.date
        };
        let end = local_instant(tz, end_date, booking.end_time)?;
        Some(Self { start, end })
    }

    /// Window opens `early` before the scheduled start and closes at the end
    ///
    /// An empty window is never open.
    pub fn position(&self, now: DateTime<Utc>, early: Duration) -> WindowPosition {
        if self.end <= self.start {
            return WindowPosition::Closed;
        }
        let opens = self.start.with_timezone(&Utc) - early;
        let closes = self.end.with_timezone(&Utc);
        if now < opens {
            WindowPosition::TooEarly
        } else if now >= closes {
            WindowPosition::Closed
        } else {
            WindowPosition::Open
        }
    }
}

fn local_instant(tz: Tz, date: NaiveDate, time: NaiveTime) -> Option<DateTime<Tz>> {
    tz.from_local_datetime(&date.and_time(time)).earliest()
}

/// Parse an IANA timezone name such as `Asia/Kolkata`
pub fn parse_timezone(name: &str) -> Option<Tz> {
    name.parse::<Tz>().ok()
}
