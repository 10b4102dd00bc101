use crate::error::{Error, Result};
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// Bounds on the raw sample store. Read-only once built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RetentionPolicy {
    max_age: Option<Duration>,
    max_rows: Option<u64>,
}

impl RetentionPolicy {
    /// At least one bound must be set, and any bound that is set must be
    /// positive.
    pub fn new(max_age: Option<Duration>, max_rows: Option<u64>) -> Result<Self> {
        if max_age.is_none() && max_rows.is_none() {
            return Err(Error::Config(
                "retention policy needs max_age_secs, max_rows, or both".to_string(),
            ));
        }
        if max_age.is_some_and(|age| age.is_zero()) {
            return Err(Error::Config("retention.max_age_secs must be positive".to_string()));
        }
        if max_rows == Some(0) {
            return Err(Error::Config("retention.max_rows must be positive".to_string()));
        }
        if let Some(age) = max_age {
            chrono::Duration::from_std(age).map_err(|_| {
                Error::Config(format!("retention.max_age_secs {} is too large", age.as_secs()))
            })?;
        }
        Ok(Self { max_age, max_rows })
    }

    pub fn by_age(max_age: Duration) -> Result<Self> {
        Self::new(Some(max_age), None)
    }

    pub fn by_rows(max_rows: u64) -> Result<Self> {
        Self::new(None, Some(max_rows))
    }

    pub fn max_age(&self) -> Option<Duration> {
        self.max_age
    }

    pub fn max_rows(&self) -> Option<u64> {
        self.max_rows
    }
}

impl fmt::Display for RetentionPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.max_age, self.max_rows) {
            (Some(age), Some(rows)) => write!(f, "max_age={}s, max_rows={}", age.as_secs(), rows),
            (Some(age), None) => write!(f, "max_age={}s", age.as_secs()),
            (None, Some(rows)) => write!(f, "max_rows={}", rows),
            (None, None) => write!(f, "unbounded"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_a_bound() {
        assert!(matches!(RetentionPolicy::new(None, None), Err(Error::Config(_))));
        assert!(matches!(RetentionPolicy::by_rows(0), Err(Error::Config(_))));
        assert!(matches!(
            RetentionPolicy::by_age(Duration::ZERO),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn test_display() {
        let both = RetentionPolicy::new(Some(Duration::from_secs(60)), Some(10)).unwrap();
        assert_eq!(both.to_string(), "max_age=60s, max_rows=10");
        assert_eq!(RetentionPolicy::by_rows(5).unwrap().to_string(), "max_rows=5");
    }
}
