//! Compound duration strings.
//!
//! Windows and backoff knobs are configured with strings like `"1d2h30m"`,
//! `"90s"`, or `"1w"`. Units are `w`/`d`/`h`/`m`/`s`, order-free, case
//! insensitive, whitespace tolerated between tokens. [`format_compound`]
//! renders a duration back in the same shape with the largest units first.

use chrono::Duration;

use crate::error::ParseError;

const SECS_PER_MINUTE: i64 = 60;
const SECS_PER_HOUR: i64 = 60 * SECS_PER_MINUTE;
const SECS_PER_DAY: i64 = 24 * SECS_PER_HOUR;
const SECS_PER_WEEK: i64 = 7 * SECS_PER_DAY;

/// Parse a compound duration string into a [`Duration`].
///
/// Errors on empty input, a dangling number, or an unknown unit character.
pub fn parse_compound(s: &str) -> Result<Duration, ParseError> {
    let mut total: i64 = 0;
    let mut saw_token = false;
    let mut digits = String::new();

    for ch in s.chars() {
        if ch.is_whitespace() {
            if !digits.is_empty() {
                return Err(ParseError::BadToken(digits));
            }
            continue;
        }
        if ch.is_ascii_digit() {
            digits.push(ch);
            continue;
        }
        if digits.is_empty() {
            return Err(ParseError::BadToken(ch.to_string()));
        }
        let value: i64 = digits.parse().map_err(|_| ParseError::Overflow)?;
        let unit_secs = match ch.to_ascii_lowercase() {
            'w' => SECS_PER_WEEK,
            'd' => SECS_PER_DAY,
            'h' => SECS_PER_HOUR,
            'm' => SECS_PER_MINUTE,
            's' => 1,
            other => return Err(ParseError::UnknownUnit(other)),
        };
        total = value
            .checked_mul(unit_secs)
            .and_then(|part| total.checked_add(part))
            .ok_or(ParseError::Overflow)?;
        digits.clear();
        saw_token = true;
    }

    if !digits.is_empty() {
        return Err(ParseError::BadToken(digits));
    }
    if !saw_token {
        return Err(ParseError::Empty);
    }
    Ok(Duration::seconds(total))
}

/// Render a duration as a compound string, e.g. `"1d2h30m"`. Zero renders as
/// `"0s"`. Weeks collapse into days so the output stays stable for storage.
pub fn format_compound(d: Duration) -> String {
    let mut secs = d.num_seconds().max(0);
    if secs == 0 {
        return "0s".to_string();
    }

    let days = secs / SECS_PER_DAY;
    secs %= SECS_PER_DAY;
    let hours = secs / SECS_PER_HOUR;
    secs %= SECS_PER_HOUR;
    let minutes = secs / SECS_PER_MINUTE;
    secs %= SECS_PER_MINUTE;

    let mut out = String::new();
    if days > 0 {
        out.push_str(&format!("{days}d"));
    }
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    if secs > 0 {
        out.push_str(&format!("{secs}s"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn parses_compound_tokens_in_any_order() {
        assert_eq!(
            parse_compound("1d2h30m").unwrap(),
            Duration::seconds(SECS_PER_DAY + 2 * SECS_PER_HOUR + 30 * SECS_PER_MINUTE)
        );
        assert_eq!(
            parse_compound("30m1d").unwrap(),
            parse_compound("1d30m").unwrap()
        );
        assert_eq!(parse_compound("1w").unwrap(), Duration::seconds(SECS_PER_WEEK));
        assert_eq!(parse_compound("45s").unwrap(), Duration::seconds(45));
        assert_eq!(parse_compound("0s").unwrap(), Duration::zero());
    }

    #[test]
    fn tolerates_whitespace_and_case() {
        assert_eq!(
            parse_compound(" 1D 2h ").unwrap(),
            Duration::seconds(SECS_PER_DAY + 2 * SECS_PER_HOUR)
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_compound(""), Err(ParseError::Empty));
        assert_eq!(parse_compound("   "), Err(ParseError::Empty));
        assert_eq!(parse_compound("12"), Err(ParseError::BadToken("12".into())));
        assert_eq!(parse_compound("h"), Err(ParseError::BadToken("h".into())));
        assert_eq!(parse_compound("5x"), Err(ParseError::UnknownUnit('x')));
        assert_eq!(
            parse_compound("1 2h"),
            Err(ParseError::BadToken("1".into()))
        );
    }

    #[test]
    fn formats_largest_units_first() {
        assert_eq!(format_compound(Duration::seconds(0)), "0s");
        assert_eq!(
            format_compound(Duration::seconds(SECS_PER_DAY + 2 * SECS_PER_HOUR + 30 * SECS_PER_MINUTE)),
            "1d2h30m"
        );
        assert_eq!(format_compound(Duration::seconds(900)), "15m");
        assert_eq!(format_compound(Duration::seconds(SECS_PER_WEEK)), "7d");
    }

    proptest! {
        #[test]
        fn format_then_parse_round_trips(secs in 0i64..10 * SECS_PER_WEEK) {
            let d = Duration::seconds(secs);
            prop_assert_eq!(parse_compound(&format_compound(d)).unwrap(), d);
        }
    }
}
