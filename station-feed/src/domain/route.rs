//! Route identifier type.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when parsing an invalid route identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid route id: {reason}")]
pub struct InvalidRouteId {
    reason: &'static str,
}

/// Logical grouping key selecting which stations belong to a feed.
///
/// Every backend call takes the route explicitly, so feeds for different
/// routes can coexist.
///
/// # Examples
///
/// ```
/// use station_feed::domain::RouteId;
///
/// let route: RouteId = "1".parse().unwrap();
/// assert_eq!(route.get(), 1);
/// assert!("one".parse::<RouteId>().is_err());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RouteId(i64);

impl RouteId {
    pub const fn new(id: i64) -> Self {
        RouteId(id)
    }

    pub fn get(self) -> i64 {
        self.0
    }
}

impl FromStr for RouteId {
    type Err = InvalidRouteId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(InvalidRouteId {
                reason: "must not be empty",
            });
        }
        s.parse::<i64>().map(RouteId).map_err(|_| InvalidRouteId {
            reason: "must be an integer",
        })
    }
}

impl fmt::Debug for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RouteId({})", self.0)
    }
}

impl fmt::Display for RouteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_valid() {
        assert_eq!("1".parse::<RouteId>().unwrap(), RouteId::new(1));
        assert_eq!(" 42 ".parse::<RouteId>().unwrap(), RouteId::new(42));
        assert_eq!("-3".parse::<RouteId>().unwrap(), RouteId::new(-3));
    }

    #[test]
    fn parse_invalid() {
        let err = "".parse::<RouteId>().unwrap_err();
        assert_eq!(err.to_string(), "invalid route id: must not be empty");

        let err = "1.5".parse::<RouteId>().unwrap_err();
        assert_eq!(err.to_string(), "invalid route id: must be an integer");
    }

    #[test]
    fn display_is_bare_number() {
        assert_eq!(RouteId::new(7).to_string(), "7");
        assert_eq!(format!("{:?}", RouteId::new(7)), "RouteId(7)");
    }
}
