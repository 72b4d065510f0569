//! Exact-decimal text normalization.
//!
//! Spreadsheet packages store numbers as decimal text (possibly in
//! scientific notation). Ingested values must keep that exactness: a 20-digit
//! id column must not be rounded through an `f64`, and integral values must
//! not grow a spurious `.0`. Normalization therefore works on the digit
//! string directly and never parses to a float.

/// Normalize decimal text to plain form.
///
/// Accepts an optional sign, digits with at most one decimal point, and an
/// optional `e`/`E` exponent. Returns `None` when the input is not decimal
/// text (callers keep the raw string in that case). Output has no exponent,
/// no trailing fractional zeros, no leading integer zeros, and no sign on
/// zero.
///
/// ```
/// use tabula_model::normalize_decimal;
/// assert_eq!(normalize_decimal("1.23E5").as_deref(), Some("123000"));
/// assert_eq!(normalize_decimal("042.50").as_deref(), Some("42.5"));
/// assert_eq!(normalize_decimal("12345678901234567890").as_deref(), Some("12345678901234567890"));
/// assert_eq!(normalize_decimal("n/a"), None);
/// ```
pub fn normalize_decimal(raw: &str) -> Option<String> {
    let s = raw.trim();
    let bytes = s.as_bytes();
    let mut i = 0usize;

    let neg = match bytes.first() {
        Some(b'-') => {
            i = 1;
            true
        }
        Some(b'+') => {
            i = 1;
            false
        }
        _ => false,
    };

    let mut int_digits = String::new();
    let mut frac_digits = String::new();
    while i < bytes.len() && bytes[i].is_ascii_digit() {
        int_digits.push(bytes[i] as char);
        i += 1;
    }
    if i < bytes.len() && bytes[i] == b'.' {
        i += 1;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            frac_digits.push(bytes[i] as char);
            i += 1;
        }
    }
    if int_digits.is_empty() && frac_digits.is_empty() {
        return None;
    }

    let mut exp: i64 = 0;
    if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
        i += 1;
        let exp_neg = match bytes.get(i) {
            Some(b'-') => {
                i += 1;
                true
            }
            Some(b'+') => {
                i += 1;
                false
            }
            _ => false,
        };
        let exp_start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if i == exp_start {
            return None;
        }
        exp = s[exp_start..i].parse().ok()?;
        if exp_neg {
            exp = -exp;
        }
    }
    if i != bytes.len() {
        return None;
    }
    // Anything a real producer writes fits well inside this; beyond it the
    // expansion would be absurd, so treat the input as non-numeric text.
    if !(-400..=400).contains(&exp) {
        return None;
    }

    let digits = format!("{int_digits}{frac_digits}");
    let point = int_digits.len() as i64 + exp;

    let mut out = String::new();
    if point <= 0 {
        out.push_str("0.");
        for _ in 0..(-point) {
            out.push('0');
        }
        out.push_str(&digits);
    } else if point as usize >= digits.len() {
        out.push_str(&digits);
        for _ in 0..(point as usize - digits.len()) {
            out.push('0');
        }
    } else {
        out.push_str(&digits[..point as usize]);
        out.push('.');
        out.push_str(&digits[point as usize..]);
    }

    if out.contains('.') {
        while out.ends_with('0') {
            out.pop();
        }
        if out.ends_with('.') {
            out.pop();
        }
    }

    let (int_part, frac_part) = match out.find('.') {
        Some(p) => (&out[..p], &out[p..]),
        None => (out.as_str(), ""),
    };
    let int_part = {
        let t = int_part.trim_start_matches('0');
        if t.is_empty() {
            "0"
        } else {
            t
        }
    };
    let normalized = format!("{int_part}{frac_part}");

    let is_zero = normalized.bytes().all(|b| b == b'0' || b == b'.');
    if neg && !is_zero {
        Some(format!("-{normalized}"))
    } else {
        Some(normalized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> Option<String> {
        normalize_decimal(s)
    }

    #[test]
    fn plain_values_pass_through() {
        assert_eq!(norm("0").as_deref(), Some("0"));
        assert_eq!(norm("7").as_deref(), Some("7"));
        assert_eq!(norm("123.45").as_deref(), Some("123.45"));
        assert_eq!(norm("-3.5").as_deref(), Some("-3.5"));
    }

    #[test]
    fn integral_values_lose_spurious_fractions() {
        assert_eq!(norm("42.0").as_deref(), Some("42"));
        assert_eq!(norm("42.000").as_deref(), Some("42"));
        assert_eq!(norm("123.4500").as_deref(), Some("123.45"));
        assert_eq!(norm("5.").as_deref(), Some("5"));
        assert_eq!(norm(".5").as_deref(), Some("0.5"));
    }

    #[test]
    fn scientific_notation_expands() {
        assert_eq!(norm("1.23E5").as_deref(), Some("123000"));
        assert_eq!(norm("1.2345e2").as_deref(), Some("123.45"));
        assert_eq!(norm("1E-3").as_deref(), Some("0.001"));
        assert_eq!(norm("-2.5e3").as_deref(), Some("-2500"));
        assert_eq!(norm("9.99e0").as_deref(), Some("9.99"));
    }

    #[test]
    fn large_integers_keep_every_digit() {
        let id = "91550000123456789012";
        assert_eq!(norm(id).as_deref(), Some(id));
        assert_eq!(
            norm("1234567890123456789.00").as_deref(),
            Some("1234567890123456789")
        );
    }

    #[test]
    fn leading_zeros_and_signed_zero() {
        assert_eq!(norm("007").as_deref(), Some("7"));
        assert_eq!(norm("000.250").as_deref(), Some("0.25"));
        assert_eq!(norm("-0.0").as_deref(), Some("0"));
        assert_eq!(norm("+5").as_deref(), Some("5"));
    }

    #[test]
    fn non_numbers_are_rejected() {
        assert_eq!(norm(""), None);
        assert_eq!(norm("   "), None);
        assert_eq!(norm("abc"), None);
        assert_eq!(norm("1.2.3"), None);
        assert_eq!(norm("."), None);
        assert_eq!(norm("1e"), None);
        assert_eq!(norm("12 34"), None);
        assert_eq!(norm("1E99999"), None);
    }
}
