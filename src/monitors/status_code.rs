/// Matches an HTTP status against an expression such as `200-299`,
/// `200,201,204` or `200`. Parts are comma-separated and may mix ranges and
/// single codes; unparsable parts never match.
pub fn check_status_code(status: u16, expected: &str) -> bool {
    expected.split(',').map(str::trim).any(|part| {
        match part.split_once('-') {
            Some((min, max)) => match (min.trim().parse::<u16>(), max.trim().parse::<u16>()) {
                (Ok(min), Ok(max)) => (min..=max).contains(&status),
                _ => false,
            },
            None => part.parse::<u16>().map(|code| code == status).unwrap_or(false),
        }
    })
}
