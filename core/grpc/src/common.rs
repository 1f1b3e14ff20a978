// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use crate::errors::TimeoutError;

pub const GRPC_CONTENT_TYPE: &str = "application/grpc";
pub const TIMEOUT_KEY: &str = "grpc-timeout";
pub const STATUS_KEY: &str = "grpc-status";
pub const MESSAGE_KEY: &str = "grpc-message";
pub const ENCODING_KEY: &str = "grpc-encoding";
pub const BACKTRACE_KEY: &str = "backtrace";
pub const MAX_TIMEOUT: u64 = 36000; // 10h in seconds

// grpc-timeout allows at most 8 digits
const MAX_TIMEOUT_DIGITS: usize = 8;
const MAX_TIMEOUT_AMOUNT: u128 = 99_999_999;

/// Build the wire path of a method: `/<service>/<method>`
pub fn method_path(service_name: &str, method_name: &str) -> String {
    format!("/{}/{}", service_name, method_name)
}

/// Split a request path into `(service, method)`.
///
/// Returns `None` for anything that is not exactly two non-empty segments
/// after the leading slash, so that non-RPC traffic can be forwarded.
pub fn parse_path(path: &str) -> Option<(&str, &str)> {
    let rest = path.strip_prefix('/')?;
    let (service, method) = rest.split_once('/')?;
    if service.is_empty() || method.is_empty() || method.contains('/') {
        return None;
    }
    Some((service, method))
}

/// Format a duration as a `grpc-timeout` header value.
///
/// Picks the finest unit that fits in 8 digits, rounding up so that a
/// non-zero timeout never becomes zero on the wire.
pub fn encode_timeout(timeout: Duration) -> String {
    let nanos = timeout.as_nanos();
    let units: [(u128, char); 6] = [
        (1, 'n'),
        (1_000, 'u'),
        (1_000_000, 'm'),
        (1_000_000_000, 'S'),
        (60 * 1_000_000_000, 'M'),
        (3600 * 1_000_000_000, 'H'),
    ];

    for (scale, unit) in units {
        let amount = nanos.div_ceil(scale);
        if amount <= MAX_TIMEOUT_AMOUNT {
            return format!("{}{}", amount, unit);
        }
    }

    format!("{}H", MAX_TIMEOUT_AMOUNT)
}

/// Parse a `grpc-timeout` header value (`<digits><H|M|S|m|u|n>`).
pub fn parse_timeout(value: &str) -> Result<Duration, TimeoutError> {
    let value = value.trim();
    let Some(unit) = value.chars().last() else {
        return Err(TimeoutError::Empty);
    };

    let amount = &value[..value.len() - unit.len_utf8()];
    if amount.is_empty()
        || amount.len() > MAX_TIMEOUT_DIGITS
        || !amount.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(TimeoutError::InvalidAmount(value.to_string()));
    }

    let amount: u64 = amount
        .parse()
        .map_err(|_| TimeoutError::InvalidAmount(value.to_string()))?;

    let timeout = match unit {
        'H' => Duration::from_secs(amount * 3600),
        'M' => Duration::from_secs(amount * 60),
        'S' => Duration::from_secs(amount),
        'm' => Duration::from_millis(amount),
        'u' => Duration::from_micros(amount),
        'n' => Duration::from_nanos(amount),
        _ => return Err(TimeoutError::InvalidUnit(value.to_string())),
    };

    Ok(timeout)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_path() {
        assert_eq!(method_path("pkg.Service", "SayHello"), "/pkg.Service/SayHello");
    }

    #[test]
    fn test_parse_path() {
        assert_eq!(
            parse_path("/pkg.Service/SayHello"),
            Some(("pkg.Service", "SayHello"))
        );
        assert_eq!(parse_path("/"), None);
        assert_eq!(parse_path(""), None);
        assert_eq!(parse_path("/pkg.Service"), None);
        assert_eq!(parse_path("/pkg.Service/"), None);
        assert_eq!(parse_path("//SayHello"), None);
        assert_eq!(parse_path("/a/b/c"), None);
        assert_eq!(parse_path("pkg.Service/SayHello"), None);
    }

    #[test]
    fn test_encode_timeout() {
        assert_eq!(encode_timeout(Duration::from_nanos(500)), "500n");
        assert_eq!(encode_timeout(Duration::from_millis(250)), "250000u");
        assert_eq!(encode_timeout(Duration::from_secs(30)), "30000000u");
        assert_eq!(encode_timeout(Duration::from_secs(3600)), "3600000m");
        assert_eq!(encode_timeout(Duration::from_secs(MAX_TIMEOUT)), "36000000m");
    }

    #[test]
    fn test_parse_timeout() {
        assert_eq!(parse_timeout("1H"), Ok(Duration::from_secs(3600)));
        assert_eq!(parse_timeout("2M"), Ok(Duration::from_secs(120)));
        assert_eq!(parse_timeout("30S"), Ok(Duration::from_secs(30)));
        assert_eq!(parse_timeout("100m"), Ok(Duration::from_millis(100)));
        assert_eq!(parse_timeout("7u"), Ok(Duration::from_micros(7)));
        assert_eq!(parse_timeout("9n"), Ok(Duration::from_nanos(9)));
    }

    #[test]
    fn test_parse_timeout_invalid() {
        assert_eq!(parse_timeout(""), Err(TimeoutError::Empty));
        assert!(matches!(parse_timeout("S"), Err(TimeoutError::InvalidAmount(_))));
        assert!(matches!(
            parse_timeout("123456789S"),
            Err(TimeoutError::InvalidAmount(_))
        ));
        assert!(matches!(parse_timeout("-1S"), Err(TimeoutError::InvalidAmount(_))));
        assert!(matches!(parse_timeout("10s"), Err(TimeoutError::InvalidUnit(_))));
    }

    #[test]
    fn test_timeout_round_trip() {
        for timeout in [
            Duration::from_millis(1),
            Duration::from_millis(1500),
            Duration::from_secs(90),
        ] {
            assert_eq!(parse_timeout(&encode_timeout(timeout)), Ok(timeout));
        }
    }
}
