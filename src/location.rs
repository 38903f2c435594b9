//! Host addressing: `user@hostname[:port]`

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Standard SSH port
pub const DEFAULT_PORT: u16 = 22;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LocationError {
    #[error("location is empty")]
    Empty,

    #[error("location '{0}' has no user (expected user@hostname[:port])")]
    MissingUser(String),

    #[error("location '{0}' has no hostname (expected user@hostname[:port])")]
    MissingHost(String),

    #[error("location '{location}' has an invalid port '{port}'")]
    BadPort { location: String, port: String },
}

/// One target host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    pub user: String,
    pub host: String,
    pub port: u16,
}

impl Location {
    /// `user@host` as given to ssh
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.port == DEFAULT_PORT {
            write!(f, "{}@{}", self.user, self.host)
        } else {
            write!(f, "{}@{}:{}", self.user, self.host, self.port)
        }
    }
}

impl FromStr for Location {
    type Err = LocationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(LocationError::Empty);
        }

        let Some((user, rest)) = s.split_once('@') else {
            return Err(LocationError::MissingUser(s.to_string()));
        };
        if user.is_empty() {
            return Err(LocationError::MissingUser(s.to_string()));
        }

        let (host, port) = match rest.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().ok().filter(|p| *p != 0).ok_or_else(|| {
                    LocationError::BadPort {
                        location: s.to_string(),
                        port: port.to_string(),
                    }
                })?;
                (host, port)
            }
            None => (rest, DEFAULT_PORT),
        };
        if host.is_empty() {
            return Err(LocationError::MissingHost(s.to_string()));
        }

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            port,
        })
    }
}

/// Split a comma-separated host list, keeping each entry's parse result so
/// one malformed location does not hide the others.
pub fn parse_list(list: &str) -> Vec<(String, Result<Location, LocationError>)> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| (entry.to_string(), entry.parse()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_with_default_port() {
        let location: Location = "deploy@web1.example.com".parse().unwrap();
        assert_eq!(location.user, "deploy");
        assert_eq!(location.host, "web1.example.com");
        assert_eq!(location.port, DEFAULT_PORT);
        assert_eq!(location.destination(), "deploy@web1.example.com");
        assert_eq!(location.to_string(), "deploy@web1.example.com");
    }

    #[test]
    fn test_parse_with_port() {
        let location: Location = "root@10.0.0.5:2222".parse().unwrap();
        assert_eq!(location.port, 2222);
        assert_eq!(location.to_string(), "root@10.0.0.5:2222");
    }

    #[test]
    fn test_missing_user_or_host() {
        assert_eq!(
            "web1".parse::<Location>(),
            Err(LocationError::MissingUser("web1".to_string()))
        );
        assert_eq!(
            "@web1".parse::<Location>(),
            Err(LocationError::MissingUser("@web1".to_string()))
        );
        assert_eq!(
            "root@".parse::<Location>(),
            Err(LocationError::MissingHost("root@".to_string()))
        );
        assert_eq!(
            "root@:22".parse::<Location>(),
            Err(LocationError::MissingHost("root@:22".to_string()))
        );
        assert_eq!("  ".parse::<Location>(), Err(LocationError::Empty));
    }

    #[test]
    fn test_bad_port() {
        assert!(matches!(
            "root@web1:ssh".parse::<Location>(),
            Err(LocationError::BadPort { .. })
        ));
        assert!(matches!(
            "root@web1:0".parse::<Location>(),
            Err(LocationError::BadPort { .. })
        ));
        assert!(matches!(
            "root@web1:70000".parse::<Location>(),
            Err(LocationError::BadPort { .. })
        ));
    }

    #[test]
    fn test_parse_list_keeps_bad_entries() {
        let parsed = parse_list("root@a, web2 ,root@c:2200,");
        assert_eq!(parsed.len(), 3);
        assert!(parsed[0].1.is_ok());
        assert_eq!(parsed[1].0, "web2");
        assert!(parsed[1].1.is_err());
        assert_eq!(parsed[2].1.as_ref().unwrap().port, 2200);
    }
}
