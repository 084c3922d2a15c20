use std::time::Duration;

const UNITS: [(char, u64); 5] = [
    ('K', 1 << 10),
    ('M', 1 << 20),
    ('G', 1 << 30),
    ('T', 1 << 40),
    ('P', 1 << 50),
];

/// Parse a byte size such as `123`, `10K`, `25M`, `1.5G` or `1GB`.
///
/// Multipliers are binary (K = 1024). Fractions are truncated after scaling.
pub fn parse_size(input: &str) -> Result<u64, String> {
    let s = input.trim();
    let invalid = || format!("invalid size: {input:?}");

    let s = s
        .strip_suffix('B')
        .or_else(|| s.strip_suffix('b'))
        .unwrap_or(s);

    let (num, mult) = match s.chars().last() {
        Some(c) if c.is_ascii_alphabetic() => {
            let upper = c.to_ascii_uppercase();
            let mult = UNITS
                .iter()
                .find(|(u, _)| *u == upper)
                .map(|(_, m)| *m)
                .ok_or_else(invalid)?;
            (&s[..s.len() - 1], mult)
        }
        Some(_) => (s, 1),
        None => return Err(invalid()),
    };

    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Err(invalid());
    }
    if num.starts_with('.') || num.ends_with('.') || num.matches('.').count() > 1 {
        return Err(invalid());
    }

    if let Ok(whole) = num.parse::<u64>() {
        return whole.checked_mul(mult).ok_or_else(invalid);
    }

    let value: f64 = num.parse().map_err(|_| invalid())?;
    let scaled = value * mult as f64;
    if !scaled.is_finite() || scaled >= u64::MAX as f64 {
        return Err(invalid());
    }
    Ok(scaled as u64)
}

/// Parse an interval such as `90`, `10s`, `5m`, `2h` or `1d`.
pub fn parse_interval(input: &str) -> Result<Duration, String> {
    let s = input.trim().to_ascii_lowercase();
    let invalid = || format!("invalid interval: {input:?}");

    if !s.is_empty() && s.chars().all(|c| c.is_ascii_digit()) {
        return s.parse::<u64>().map(Duration::from_secs).map_err(|_| invalid());
    }

    let unit = s.chars().last().ok_or_else(invalid)?;
    let num = &s[..s.len() - unit.len_utf8()];
    if num.is_empty() || !num.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let value: u64 = num.parse().map_err(|_| invalid())?;

    let secs = match unit {
        's' => Some(value),
        'm' => value.checked_mul(60),
        'h' => value.checked_mul(3600),
        'd' => value.checked_mul(86_400),
        _ => None,
    }
    .ok_or_else(invalid)?;

    Ok(Duration::from_secs(secs))
}
