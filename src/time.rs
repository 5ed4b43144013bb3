use std::fmt::{self, Display};
use std::time::Duration;

use thiserror::Error;

/// Error type for time parsing.
#[derive(Error, Debug, PartialEq)]
pub enum TimeError {
    #[error("Invalid time control descriptor: {0}")]
    InvalidTimeControl(String),

    #[error("Invalid clock value: {0}")]
    InvalidClock(String),
}

/// Represents the time control formats a PGN `TimeControl` tag can describe.
///
/// Chess games can be played with various time control systems that determine how much time each player has for their
/// moves. A tag may combine several descriptors separated by colons; this type models a single descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimeControl {
    /// The time control is unknown ("?").
    Unknown,

    /// The game is played without any time control ("-").
    None,

    /// The whole game must be completed within the given time ("300").
    SuddenDeath { time: Duration },

    /// Base time with an increment added after every move ("4500+60").
    Incremental { time: Duration, increment: Duration },

    /// A number of moves must be completed within the given time ("40/9000").
    Conventional { moves: u32, time: Duration },

    /// Sandclock time control ("*180").
    Sandclock { time: Duration },
}

impl TimeControl {
    /// Parses a single PGN time control descriptor.
    pub fn parse(descriptor: &str) -> Result<TimeControl, TimeError> {
        let invalid = || TimeError::InvalidTimeControl(descriptor.to_string());

        match descriptor {
            "?" => return Ok(TimeControl::Unknown),
            "-" => return Ok(TimeControl::None),
            _ => {}
        }

        if let Some(seconds) = descriptor.strip_prefix('*') {
            let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
            return Ok(TimeControl::Sandclock { time: Duration::from_secs(seconds) });
        }

        if let Some((moves, seconds)) = descriptor.split_once('/') {
            let moves: u32 = moves.parse().map_err(|_| invalid())?;
            let seconds: u64 = seconds.parse().map_err(|_| invalid())?;
            return Ok(TimeControl::Conventional { moves, time: Duration::from_secs(seconds) });
        }

        if let Some((base, increment)) = descriptor.split_once('+') {
            let base: u64 = base.parse().map_err(|_| invalid())?;
            let increment: u64 = increment.parse().map_err(|_| invalid())?;
            return Ok(TimeControl::Incremental {
                time: Duration::from_secs(base),
                increment: Duration::from_secs(increment),
            });
        }

        let seconds: u64 = descriptor.parse().map_err(|_| invalid())?;
        Ok(TimeControl::SuddenDeath { time: Duration::from_secs(seconds) })
    }
}

impl Display for TimeControl {
    /// Formats the descriptor back into its PGN tag form.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeControl::Unknown => write!(f, "?"),
            TimeControl::None => write!(f, "-"),
            TimeControl::SuddenDeath { time } => write!(f, "{}", time.as_secs()),
            TimeControl::Incremental { time, increment } => write!(f, "{}+{}", time.as_secs(), increment.as_secs()),
            TimeControl::Conventional { moves, time } => write!(f, "{}/{}", moves, time.as_secs()),
            TimeControl::Sandclock { time } => write!(f, "*{}", time.as_secs()),
        }
    }
}

//======================================================================================================================
// Clock text
//======================================================================================================================

/// Parses a clock value of the forms used by `[%clk]` and `[%emt]` annotations: "H:MM:SS", "M:SS", "SS" or a seconds
/// value with a fraction ("2.193").
pub fn parse_clock(text: &str) -> Result<Duration, TimeError> {
    let invalid = || TimeError::InvalidClock(text.to_string());

    let parts: Vec<&str> = text.split(':').collect();
    if parts.len() > 3 || parts.is_empty() {
        return Err(invalid());
    }

    if parts.len() == 1 {
        let seconds: f64 = parts[0].parse().map_err(|_| invalid())?;
        if seconds < 0.0 {
            return Err(invalid());
        }
        return Ok(Duration::from_secs_f64(seconds));
    }

    let mut seconds = 0u64;
    for part in &parts {
        let value: u64 = part.parse().map_err(|_| invalid())?;
        seconds = seconds * 60 + value;
    }
    Ok(Duration::from_secs(seconds))
}

/// Formats a duration in the "H:MM:SS" form used by `[%clk]` annotations.
pub fn format_clock(duration: Duration) -> String {
    let total = duration.as_secs();
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

#[cfg(test)]
mod tests {
    use super::*;

    mod time_control_tests {
        use super::*;

        #[test]
        fn test_parse_descriptors() {
            assert_eq!(TimeControl::parse("?"), Ok(TimeControl::Unknown));
            assert_eq!(TimeControl::parse("-"), Ok(TimeControl::None));
            assert_eq!(
                TimeControl::parse("300"),
                Ok(TimeControl::SuddenDeath { time: Duration::from_secs(300) })
            );
            assert_eq!(
                TimeControl::parse("4500+60"),
                Ok(TimeControl::Incremental {
                    time: Duration::from_secs(4500),
                    increment: Duration::from_secs(60)
                })
            );
            assert_eq!(
                TimeControl::parse("40/9000"),
                Ok(TimeControl::Conventional { moves: 40, time: Duration::from_secs(9000) })
            );
            assert_eq!(
                TimeControl::parse("*180"),
                Ok(TimeControl::Sandclock { time: Duration::from_secs(180) })
            );
            assert!(TimeControl::parse("abc").is_err());
        }

        #[test]
        fn test_display_round_trip() {
            for descriptor in ["?", "-", "300", "4500+60", "40/9000", "*180"] {
                assert_eq!(TimeControl::parse(descriptor).unwrap().to_string(), descriptor);
            }
        }
    }

    mod clock_tests {
        use super::*;

        #[test]
        fn test_parse_clock() {
            assert_eq!(parse_clock("0:05:00"), Ok(Duration::from_secs(300)));
            assert_eq!(parse_clock("1:02:03"), Ok(Duration::from_secs(3723)));
            assert_eq!(parse_clock("2:30"), Ok(Duration::from_secs(150)));
            assert_eq!(parse_clock("45"), Ok(Duration::from_secs(45)));
            assert_eq!(parse_clock("2.5"), Ok(Duration::from_secs_f64(2.5)));
            assert!(parse_clock("x").is_err());
            assert!(parse_clock("1:2:3:4").is_err());
        }

        #[test]
        fn test_format_clock() {
            assert_eq!(format_clock(Duration::from_secs(300)), "0:05:00");
            assert_eq!(format_clock(Duration::from_secs(3723)), "1:02:03");
        }
    }
}
