//! Filters registered in every template environment.

use chrono::DateTime;
use minijinja::{Error, ErrorKind};

/// `0 -> a`, `25 -> z`, `26 -> aa`.
pub fn of_alphabet(index: u32) -> String {
    let mut n = u64::from(index) + 1;
    let mut letters = Vec::new();
    while n > 0 {
        n -= 1;
        // n % 26 < 26, the cast cannot truncate.
        #[allow(clippy::cast_possible_truncation)]
        letters.push(char::from(b'a' + (n % 26) as u8));
        n /= 26;
    }
    letters.iter().rev().collect()
}

/// Roman numeral of `1..=3999`.
///
/// # Errors
///
/// Returns error for values outside the representable range.
pub fn roman(value: u32) -> Result<String, Error> {
    const NUMERALS: [(u32, &str); 13] = [
        (1000, "M"),
        (900, "CM"),
        (500, "D"),
        (400, "CD"),
        (100, "C"),
        (90, "XC"),
        (50, "L"),
        (40, "XL"),
        (10, "X"),
        (9, "IX"),
        (5, "V"),
        (4, "IV"),
        (1, "I"),
    ];
    if value == 0 || value > 3999 {
        return Err(Error::new(
            ErrorKind::InvalidOperation,
            format!("{value} has no roman numeral"),
        ));
    }
    let mut rest = value;
    let mut out = String::new();
    for (amount, numeral) in NUMERALS {
        while rest >= amount {
            out.push_str(numeral);
            rest -= amount;
        }
    }
    Ok(out)
}

/// Reformat an RFC 3339 timestamp with a `strftime` pattern.
///
/// # Errors
///
/// Returns error if the value is not a valid timestamp.
pub fn datetime_format(value: &str, format: Option<&str>) -> Result<String, Error> {
    let parsed = DateTime::parse_from_rfc3339(value)
        .map_err(|err| Error::new(ErrorKind::InvalidOperation, format!("invalid timestamp '{value}': {err}")))?;
    Ok(parsed.format(format.unwrap_or("%Y-%m-%d %H:%M")).to_string())
}

/// Reply path of a sequence of UUIDs.
pub fn reply_path(segments: Vec<String>) -> String {
    segments.join(".")
}

/// Append one segment to a reply path.
pub fn dot(path: &str, segment: &str) -> String {
    if path.is_empty() {
        segment.to_string()
    } else {
        format!("{path}.{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_of_alphabet_wraps_to_two_letters() {
        assert_eq!(of_alphabet(0), "a");
        assert_eq!(of_alphabet(25), "z");
        assert_eq!(of_alphabet(26), "aa");
        assert_eq!(of_alphabet(27), "ab");
    }

    #[test]
    fn test_roman() {
        assert_eq!(roman(1).unwrap(), "I");
        assert_eq!(roman(14).unwrap(), "XIV");
        assert_eq!(roman(1994).unwrap(), "MCMXCIV");
        assert!(roman(0).is_err());
    }

    #[test]
    fn test_datetime_format() {
        assert_eq!(
            datetime_format("2024-03-01T10:15:00Z", Some("%d.%m.%Y")).unwrap(),
            "01.03.2024"
        );
        assert!(datetime_format("yesterday", None).is_err());
    }

    #[test]
    fn test_reply_paths() {
        assert_eq!(reply_path(vec!["a".into(), "b".into()]), "a.b");
        assert_eq!(dot("a.b", "c"), "a.b.c");
        assert_eq!(dot("", "c"), "c");
    }
}
