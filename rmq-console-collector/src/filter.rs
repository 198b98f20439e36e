//! Queue name filtering.
//!
//! A [`Filter`] is an ordered list of regular expressions. A name is accepted when
//! any rule matches it. An empty filter accepts every name, so a missing
//! configuration never silently discards data.

use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;
use regex::Regex;

use crate::error::FilterError;

/// Compiled queue name rules.
#[derive(Clone, Default)]
pub struct Filter {
    rules: Vec<Regex>,
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.rules.iter().map(Regex::as_str))
            .finish()
    }
}

impl Filter {
    /// Compile a list of rules, failing on the first invalid one.
    pub fn new<S: AsRef<str>>(rules: &[S]) -> Result<Self, FilterError> {
        let rules = rules
            .iter()
            .map(|rule| {
                Regex::new(rule.as_ref()).map_err(|source| FilterError {
                    pattern: rule.as_ref().to_string(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { rules })
    }

    /// A filter with no rules, accepting everything.
    pub fn accept_all() -> Self {
        Self::default()
    }

    /// Check whether `name` passes the filter.
    pub fn accepts(&self, name: &str) -> bool {
        if self.rules.is_empty() {
            return true;
        }

        let name = name.trim();
        self.rules.iter().any(|rule| rule.is_match(name))
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// The source patterns, in rule order.
    pub fn patterns(&self) -> impl Iterator<Item = &str> {
        self.rules.iter().map(Regex::as_str)
    }
}

/// Shared handle to the filter currently in force.
///
/// Cloning the handle shares the underlying filter; [`FilterHandle::replace`] swaps
/// it for every holder at once. Readers take a cheap [`Arc`] snapshot.
#[derive(Debug, Clone, Default)]
pub struct FilterHandle {
    current: Arc<RwLock<Arc<Filter>>>,
}

impl FilterHandle {
    pub fn new(filter: Filter) -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(filter))),
        }
    }

    /// The filter in force right now.
    pub fn snapshot(&self) -> Arc<Filter> {
        self.current.read().clone()
    }

    /// Swap in a new filter.
    pub fn replace(&self, filter: Filter) {
        *self.current.write() = Arc::new(filter);
    }
}
