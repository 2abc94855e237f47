//! Core identifier types for the spinneret orchestration engine.
//!
//! Crawler, stage, and run identities travel through the work queue and the
//! backing stores as strings, but inside the crate they are opaque newtypes
//! so a run id can never be handed to an API expecting a stage name.
//!
//! # Key Types
//!
//! - [`CrawlerName`]: identifies a loaded crawl definition
//! - [`StageName`]: identifies one stage within a crawler's pipeline
//! - [`RunId`]: identifies a single execution of a crawler
//! - [`Schedule`]: the re-trigger cadence of a crawler
//!
//! # Examples
//!
//! ```rust
//! use spinneret::types::{CrawlerName, Schedule, StageName};
//!
//! let crawler = CrawlerName::from("occrp-daily");
//! let stage = StageName::from("fetch");
//! assert_eq!(crawler.as_str(), "occrp-daily");
//! assert_eq!(format!("{crawler}:{stage}"), "occrp-daily:fetch");
//!
//! assert_eq!(Schedule::Daily.interval(), chrono::Duration::days(1));
//! ```

use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! name_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

name_type! {
    /// Unique name of a crawl definition.
    ///
    /// Derived from the source document's file stem unless the document
    /// overrides it with an explicit `name` key.
    CrawlerName
}

name_type! {
    /// Name of a single stage within a crawler's pipeline.
    ///
    /// Unique within its owning crawler; the conventional entry point is
    /// `"init"`.
    StageName
}

name_type! {
    /// Identifier of one execution of a crawler.
    ///
    /// Generated (uuid v4) when [`run`](crate::crawler::Crawler::run) is
    /// called without an explicit id.
    RunId
}

impl RunId {
    /// Generate a fresh random run id.
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

/// Re-trigger cadence of a crawler.
///
/// The interval table is a constant lookup: a crawler becomes due again once
/// its last run is strictly older than the interval. A crawler without a
/// schedule is only ever run explicitly.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Schedule {
    Hourly,
    Daily,
    Weekly,
    Monthly,
}

impl Schedule {
    /// The duration after which a crawler on this schedule is due again.
    #[must_use]
    pub fn interval(&self) -> Duration {
        match self {
            Schedule::Hourly => Duration::hours(1),
            Schedule::Daily => Duration::days(1),
            Schedule::Weekly => Duration::weeks(1),
            Schedule::Monthly => Duration::weeks(4),
        }
    }
}

impl fmt::Display for Schedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Schedule::Hourly => write!(f, "hourly"),
            Schedule::Daily => write!(f, "daily"),
            Schedule::Weekly => write!(f, "weekly"),
            Schedule::Monthly => write!(f, "monthly"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_distinct_types() {
        let crawler = CrawlerName::from("demo");
        let stage = StageName::from("demo");
        assert_eq!(crawler.as_str(), stage.as_str());
        assert_eq!(crawler.to_string(), "demo");
    }

    #[test]
    fn run_ids_are_unique() {
        assert_ne!(RunId::generate(), RunId::generate());
    }

    #[test]
    fn schedule_intervals() {
        assert_eq!(Schedule::Hourly.interval(), Duration::hours(1));
        assert_eq!(Schedule::Daily.interval(), Duration::days(1));
        assert_eq!(Schedule::Weekly.interval(), Duration::weeks(1));
        assert_eq!(Schedule::Monthly.interval(), Duration::weeks(4));
    }

    #[test]
    fn schedule_parses_from_yaml() {
        let s: Schedule = serde_yaml::from_str("daily").unwrap();
        assert_eq!(s, Schedule::Daily);
        assert!(serde_yaml::from_str::<Schedule>("fortnightly").is_err());
    }
}
