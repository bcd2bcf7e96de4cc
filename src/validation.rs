//! Business-hours rules for reservation start times.
//!
//! Starts are accepted from 07:00 up to 20:00 inclusive on the quarter hour,
//! so nothing begins at or after 20:15.

use chrono::{DateTime, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub const OUT_OF_HOURS_MESSAGE: &str = "Por favor selecciona una hora entre las 7 AM and 9 PM.";

const OPENING_HOUR: u8 = 7;
const CLOSING_HOUR: u8 = 21;
const LAST_HOUR: u8 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Meridiem {
    Am,
    Pm,
}

/// The quarter-hour minutes offered by the booking form.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Minute {
    Zero,
    Fifteen,
    Thirty,
    FortyFive,
}

impl Minute {
    pub const ALL: [Minute; 4] = [Minute::Zero, Minute::Fifteen, Minute::Thirty, Minute::FortyFive];

    pub fn value(self) -> u8 {
        match self {
            Minute::Zero => 0,
            Minute::Fifteen => 15,
            Minute::Thirty => 30,
            Minute::FortyFive => 45,
        }
    }
}

impl TryFrom<u32> for Minute {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Minute::Zero),
            15 => Ok(Minute::Fifteen),
            30 => Ok(Minute::Thirty),
            45 => Ok(Minute::FortyFive),
            other => Err(ValidationError::InvalidMinute(other.to_string())),
        }
    }
}

impl FromStr for Minute {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map_err(|_| ValidationError::InvalidMinute(s.to_string()))
            .and_then(Minute::try_from)
    }
}

impl fmt::Display for Minute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}", self.value())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    OutsideBusinessHours,
    HourOutOfRange(u8),
    InvalidMinute(String),
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::OutsideBusinessHours => f.write_str(OUT_OF_HOURS_MESSAGE),
            ValidationError::HourOutOfRange(hour) => write!(f, "La hora {} no es valida, usa 1 a 12", hour),
            ValidationError::InvalidMinute(minute) => {
                write!(f, "Los minutos {} no son validos, usa 00, 15, 30 o 45", minute)
            }
        }
    }
}

impl std::error::Error for ValidationError {}

/// A start time that passed the business-hours check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartTime {
    hour: u8,
    minute: Minute,
}

impl StartTime {
    /// Hour on the 24-hour clock.
    pub fn hour(&self) -> u8 {
        self.hour
    }

    pub fn minute(&self) -> Minute {
        self.minute
    }
}

/// Converts a 12-hour clock reading to the 24-hour hour.
pub fn to_24_hour(hour: u8, meridiem: Meridiem) -> Result<u8, ValidationError> {
    if !(1..=12).contains(&hour) {
        return Err(ValidationError::HourOutOfRange(hour));
    }
    Ok(match (meridiem, hour) {
        (Meridiem::Am, 12) => 0,
        (Meridiem::Am, h) => h,
        (Meridiem::Pm, 12) => 12,
        (Meridiem::Pm, h) => h + 12,
    })
}

/// Checks a 24-hour start time against the booking window.
pub fn validate_start(hour24: u8, minute: Minute) -> Result<StartTime, ValidationError> {
    if hour24 < OPENING_HOUR || hour24 >= CLOSING_HOUR || (hour24 == LAST_HOUR && minute != Minute::Zero) {
        return Err(ValidationError::OutsideBusinessHours);
    }
    Ok(StartTime { hour: hour24, minute })
}

/// Checks a 12-hour clock selection as the booking form presents it.
pub fn validate(hour: u8, minute: Minute, meridiem: Meridiem) -> Result<StartTime, ValidationError> {
    validate_start(to_24_hour(hour, meridiem)?, minute)
}

/// Applies the booking window to a full start timestamp.
pub fn validate_timestamp(start: &NaiveDateTime) -> Result<StartTime, ValidationError> {
    let minute = Minute::try_from(start.minute())?;
    // hour() is always < 24
    validate_start(start.hour() as u8, minute)
}

/// Accepts `2024-05-20 09:30:00`, `2024-05-20T09:30:00` or RFC 3339.
///
/// Always yields the wall-clock time as submitted; an RFC 3339 offset is
/// dropped rather than converted.
pub fn parse_timestamp(value: &str) -> Result<NaiveDateTime, chrono::ParseError> {
    NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .or_else(|_| DateTime::parse_from_rfc3339(value).map(|dt| dt.naive_local()))
}

/// Hour and minute selection state of the start-time picker.
///
/// Every change re-validates the whole selection. An accepted selection
/// clears the error and is reported to `on_change`; a rejected one only sets
/// the error. The selection itself is kept either way.
pub struct StartTimePicker<F>
where
    F: FnMut(StartTime),
{
    hour: u8,
    minute: Minute,
    meridiem: Meridiem,
    error: Option<String>,
    on_change: F,
}

impl<F> StartTimePicker<F>
where
    F: FnMut(StartTime),
{
    /// Starts at 7:00 AM.
    pub fn new(on_change: F) -> Self {
        Self {
            hour: OPENING_HOUR,
            minute: Minute::Zero,
            meridiem: Meridiem::Am,
            error: None,
            on_change,
        }
    }

    pub fn set_hour(&mut self, hour: u8) -> bool {
        self.hour = hour;
        self.revalidate()
    }

    pub fn set_minute(&mut self, minute: Minute) -> bool {
        self.minute = minute;
        self.revalidate()
    }

    pub fn set_meridiem(&mut self, meridiem: Meridiem) -> bool {
        self.meridiem = meridiem;
        self.revalidate()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn selection(&self) -> (u8, Minute, Meridiem) {
        (self.hour, self.minute, self.meridiem)
    }

    fn revalidate(&mut self) -> bool {
        match validate(self.hour, self.minute, self.meridiem) {
            Ok(start) => {
                self.error = None;
                (self.on_change)(start);
                true
            }
            Err(e) => {
                self.error = Some(e.to_string());
                false
            }
        }
    }
}

impl<F> fmt::Debug for StartTimePicker<F>
where
    F: FnMut(StartTime),
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StartTimePicker")
            .field("hour", &self.hour)
            .field("minute", &self.minute)
            .field("meridiem", &self.meridiem)
            .field("error", &self.error)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_every_quarter_between_seven_and_nineteen() {
        for hour in 7..=19 {
            for minute in Minute::ALL {
                let start = validate_start(hour, minute).unwrap();
                assert_eq!(start.hour(), hour);
                assert_eq!(start.minute(), minute);
            }
        }
    }

    #[test]
    fn rejects_before_opening_and_after_closing() {
        for hour in (0..7).chain(21..24) {
            for minute in Minute::ALL {
                assert_eq!(
                    validate_start(hour, minute),
                    Err(ValidationError::OutsideBusinessHours),
                    "{hour}:{minute}"
                );
            }
        }
    }

    #[test]
    fn eight_pm_only_on_the_hour() {
        assert!(validate_start(20, Minute::Zero).is_ok());
        for minute in [Minute::Fifteen, Minute::Thirty, Minute::FortyFive] {
            assert!(validate_start(20, minute).is_err(), "20:{minute}");
        }
    }

    #[test]
    fn rejection_message_is_the_form_text() {
        let err = validate(6, Minute::Zero, Meridiem::Am).unwrap_err();
        assert_eq!(err.to_string(), OUT_OF_HOURS_MESSAGE);
    }

    #[test]
    fn twelve_hour_conversion() {
        assert_eq!(to_24_hour(12, Meridiem::Am), Ok(0));
        assert_eq!(to_24_hour(7, Meridiem::Am), Ok(7));
        assert_eq!(to_24_hour(12, Meridiem::Pm), Ok(12));
        assert_eq!(to_24_hour(8, Meridiem::Pm), Ok(20));
        assert_eq!(to_24_hour(0, Meridiem::Pm), Err(ValidationError::HourOutOfRange(0)));
        assert_eq!(to_24_hour(13, Meridiem::Am), Err(ValidationError::HourOutOfRange(13)));
    }

    #[test]
    fn twelve_hour_selection_uses_meridiem() {
        assert!(validate(8, Minute::Thirty, Meridiem::Pm).is_err());
        assert!(validate(8, Minute::Thirty, Meridiem::Am).is_ok());
        assert!(validate(12, Minute::Zero, Meridiem::Pm).is_ok());
        assert!(validate(12, Minute::Zero, Meridiem::Am).is_err());
    }

    #[test]
    fn minute_parsing() {
        assert_eq!("00".parse::<Minute>(), Ok(Minute::Zero));
        assert_eq!("45".parse::<Minute>(), Ok(Minute::FortyFive));
        assert!("10".parse::<Minute>().is_err());
        assert!("xx".parse::<Minute>().is_err());
        assert_eq!(Minute::Zero.to_string(), "00");
    }

    #[test]
    fn timestamps_must_fall_on_a_quarter_inside_the_window() {
        let ok = parse_timestamp("2024-05-20 20:00:00").unwrap();
        assert!(validate_timestamp(&ok).is_ok());
        let late = parse_timestamp("2024-05-20T20:30:00").unwrap();
        assert_eq!(validate_timestamp(&late), Err(ValidationError::OutsideBusinessHours));
        let odd = parse_timestamp("2024-05-20 09:10:00").unwrap();
        assert_eq!(validate_timestamp(&odd), Err(ValidationError::InvalidMinute("10".to_string())));
    }

    #[test]
    fn rfc3339_keeps_the_submitted_wall_clock() {
        let ts = parse_timestamp("2024-05-20T09:15:00-06:00").unwrap();
        assert_eq!(ts, parse_timestamp("2024-05-20 09:15:00").unwrap());
        assert_eq!(parse_timestamp("2024-05-20T16:00:00Z").unwrap().hour(), 16);
        assert!(validate_timestamp(&parse_timestamp("2024-05-20T16:00:00-06:00").unwrap()).is_ok());
        assert!(parse_timestamp("mañana").is_err());
    }

    #[test]
    fn picker_notifies_only_on_acceptance() {
        let mut seen = Vec::new();
        {
            let mut picker = StartTimePicker::new(|start: StartTime| seen.push((start.hour(), start.minute())));
            assert!(!picker.set_hour(5));
            assert_eq!(picker.error(), Some(OUT_OF_HOURS_MESSAGE));
            assert_eq!(picker.selection().0, 5);

            assert!(picker.set_hour(9));
            assert_eq!(picker.error(), None);

            assert!(!picker.set_meridiem(Meridiem::Pm));
            assert!(picker.set_hour(8));
            assert!(!picker.set_minute(Minute::Fifteen));
            assert!(picker.error().is_some());
            assert_eq!(picker.selection(), (8, Minute::Fifteen, Meridiem::Pm));
        }
        assert_eq!(seen, vec![(9, Minute::Zero), (20, Minute::Zero)]);
    }
}
