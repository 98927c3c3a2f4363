//! Card text extraction
//!
//! Pure helpers that turn free OCR text into plausible card fields.

/// Shortest primary account number accepted
pub const MIN_NUMBER_LENGTH: usize = 13;
/// Longest primary account number accepted
pub const MAX_NUMBER_LENGTH: usize = 19;

/// Extract a plausible card number from free text.
///
/// Spaces and dashes are removed; what remains must be digits only, of an
/// accepted length, and pass the Luhn checksum.
pub fn extract_number(text: &str) -> Option<String> {
    let compact: String = text
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '-')
        .collect();

    if compact.len() < MIN_NUMBER_LENGTH || compact.len() > MAX_NUMBER_LENGTH {
        return None;
    }
    if !compact.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    if !luhn_valid(&compact) {
        return None;
    }
    Some(compact)
}

/// Luhn (mod 10) checksum over an all-digit string
pub fn luhn_valid(digits: &str) -> bool {
    let mut sum = 0u32;
    for (i, c) in digits.chars().rev().enumerate() {
        let Some(mut d) = c.to_digit(10) else {
            return false;
        };
        if i % 2 == 1 {
            d *= 2;
            if d > 9 {
                d -= 9;
            }
        }
        sum += d;
    }
    !digits.is_empty() && sum % 10 == 0
}

/// Extract the first plausible expiry `(month, year)` from free text.
///
/// Matches `MM/YY` or `MM/YYYY` with `/`, `-` or `.` as separator. The match
/// must not be embedded in a longer run of digits. Two-digit years map into
/// 2000-2099.
pub fn extract_expiry(text: &str) -> Option<(u32, u32)> {
    let chars: Vec<char> = text.chars().collect();
    let is_digit = |i: usize| chars.get(i).is_some_and(|c| c.is_ascii_digit());
    let is_sep = |i: usize| chars.get(i).is_some_and(|c| matches!(c, '/' | '-' | '.'));

    for start in 0..chars.len() {
        if start > 0 && is_digit(start - 1) {
            continue;
        }
        if !(is_digit(start) && is_digit(start + 1) && is_sep(start + 2)) {
            continue;
        }

        let year_len = if (3..=6).all(|o| is_digit(start + o)) && !is_digit(start + 7) {
            4
        } else if is_digit(start + 3) && is_digit(start + 4) && !is_digit(start + 5) {
            2
        } else {
            continue;
        };

        let month: String = chars[start..start + 2].iter().collect();
        let year: String = chars[start + 3..start + 3 + year_len].iter().collect();
        let (Ok(month), Ok(year)) = (month.parse::<u32>(), year.parse::<u32>()) else {
            continue;
        };
        if !(1..=12).contains(&month) {
            continue;
        }

        let year = if year_len == 2 { 2000 + year } else { year };
        if !(2000..=2099).contains(&year) {
            continue;
        }
        return Some((month, year));
    }
    None
}

/// Words printed on cards that never belong to a cardholder name
const CARD_WORDS: &[&str] = &[
    "AMERICAN", "AMEX", "BANK", "BUSINESS", "CARD", "CARDHOLDER", "CLASSIC", "CREDIT", "DEBIT",
    "DINERS", "DISCOVER", "ELECTRON", "EXP", "EXPIRES", "EXPRESS", "GOOD", "JCB", "MAESTRO",
    "MASTERCARD", "MEMBER", "MONTH", "PLATINUM", "PREPAID", "SIGNATURE", "SINCE", "THRU",
    "THROUGH", "UNIONPAY", "VALID", "VISA", "YEAR",
];

/// Normalize a candidate cardholder name line.
///
/// Keeps letters, spaces, apostrophes, dots and hyphens, collapses runs of
/// whitespace and upper-cases the result. Lines with digits, and lines with
/// issuer, network or label words such as `VALID THRU` or `DEBIT CARD`, are
/// rejected.
pub fn clean_name(line: &str) -> Option<String> {
    if line.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    if !line
        .chars()
        .all(|c| c.is_alphabetic() || c.is_whitespace() || matches!(c, '\'' | '.' | '-'))
    {
        return None;
    }
    let words: Vec<String> = line.split_whitespace().map(str::to_uppercase).collect();
    if words.len() < 2 {
        return None;
    }
    if words
        .iter()
        .any(|w| CARD_WORDS.contains(&w.trim_matches(|c: char| !c.is_alphabetic())))
    {
        return None;
    }
    Some(words.join(" "))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_number_with_grouping() {
        assert_eq!(
            extract_number("4242 4242 4242 4242").as_deref(),
            Some("4242424242424242")
        );
        assert_eq!(
            extract_number("3782-822463-10005").as_deref(),
            Some("378282246310005")
        );
    }

    #[test]
    fn test_extract_number_rejects_bad_checksum() {
        assert!(extract_number("4242 4242 4242 4241").is_none());
    }

    #[test]
    fn test_extract_number_rejects_non_digits_and_length() {
        assert!(extract_number("4242 4242 42A2 4242").is_none());
        assert!(extract_number("4242").is_none());
        assert!(extract_number("42424242424242424242").is_none());
    }

    #[test]
    fn test_luhn() {
        assert!(luhn_valid("4111111111111111"));
        assert!(!luhn_valid("4111111111111112"));
        assert!(!luhn_valid(""));
        assert!(!luhn_valid("41x1"));
    }

    #[test]
    fn test_extract_expiry() {
        assert_eq!(extract_expiry("VALID THRU 12/27"), Some((12, 2027)));
        assert_eq!(extract_expiry("05-2031"), Some((5, 2031)));
        assert_eq!(extract_expiry("exp 01.30 end"), Some((1, 2030)));
    }

    #[test]
    fn test_extract_expiry_skips_invalid_month() {
        assert_eq!(extract_expiry("13/25 then 11/25"), Some((11, 2025)));
        assert!(extract_expiry("00/25").is_none());
    }

    #[test]
    fn test_extract_expiry_rejects_embedded_digits() {
        assert!(extract_expiry("112/255").is_none());
        assert!(extract_expiry("no date here").is_none());
    }

    #[test]
    fn test_clean_name() {
        assert_eq!(clean_name("  jane   o'neil ").as_deref(), Some("JANE O'NEIL"));
        assert!(clean_name("JANE").is_none());
        assert!(clean_name("12/27").is_none());
        assert!(clean_name("VALID THRU: ").is_none());
    }

    #[test]
    fn test_clean_name_rejects_card_labels() {
        assert!(clean_name("ACME BANK").is_none());
        assert!(clean_name("VALID THRU").is_none());
        assert!(clean_name("debit card").is_none());
        assert!(clean_name("Member Since").is_none());
        assert!(clean_name("no card here").is_none());
        assert!(clean_name("VISA ELECTRON").is_none());
        // Only whole words are stop words
        assert_eq!(clean_name("TYRA BANKS").as_deref(), Some("TYRA BANKS"));
    }
}
