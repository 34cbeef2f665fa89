//! Type filter deciding which constructions get tracked.

use residue_types::TypeKey;
use std::error::Error;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::host::TypeSystem;

/// Suffix marking a pattern as "this type or any type derived from it".
pub const SUBTYPES_SUFFIX: char = '+';

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    EmptyPattern,
    InvalidName(String),
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyPattern => write!(f, "filter pattern must name a type"),
            Self::InvalidName(name) => write!(f, "invalid type name in filter pattern: {name:?}"),
        }
    }
}

impl Error for FilterError {}

/// A type name as written in the configuration, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterPattern {
    pub type_name: String,
    pub include_subtypes: bool,
}

impl FilterPattern {
    pub fn exact(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            include_subtypes: false,
        }
    }

    pub fn with_subtypes(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            include_subtypes: true,
        }
    }

    /// Parse one token: `Name` or `Name+`.
    pub fn parse(token: &str) -> Result<Self, FilterError> {
        let token = token.trim();
        let (name, include_subtypes) = match token.strip_suffix(SUBTYPES_SUFFIX) {
            Some(name) => (name.trim_end(), true),
            None => (token, false),
        };
        if name.is_empty() {
            return Err(FilterError::EmptyPattern);
        }
        if name
            .chars()
            .any(|c| c.is_whitespace() || c == SUBTYPES_SUFFIX || c == ',' || c == ';')
        {
            return Err(FilterError::InvalidName(name.to_string()));
        }
        Ok(Self {
            type_name: name.to_string(),
            include_subtypes,
        })
    }

    /// Parse a comma-separated list. A blank list means "no patterns".
    pub fn parse_list(list: &str) -> Result<Vec<Self>, FilterError> {
        if list.trim().is_empty() {
            return Ok(Vec::new());
        }
        list.split(',').map(Self::parse).collect()
    }
}

impl FromStr for FilterPattern {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for FilterPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.include_subtypes {
            write!(f, "{}{SUBTYPES_SUFFIX}", self.type_name)
        } else {
            f.write_str(&self.type_name)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct FilterEntry {
    ty: TypeKey,
    include_subtypes: bool,
}

/// Resolved filter. Immutable once configured.
///
/// With no patterns at all every type matches. Patterns that did not
/// resolve never match anything, so a filter made only of unknown names
/// tracks nothing rather than everything.
#[derive(Debug, Clone, Default)]
pub struct TypeFilter {
    entries: Vec<FilterEntry>,
    unresolved: Vec<String>,
}

impl TypeFilter {
    pub fn configure(patterns: &[FilterPattern], types: &dyn TypeSystem) -> Self {
        let mut filter = Self::default();
        for pattern in patterns {
            match types.lookup(&pattern.type_name) {
                Some(ty) => {
                    info!(pattern = %pattern, ty = %ty, "leak filter pattern resolved");
                    filter.entries.push(FilterEntry {
                        ty,
                        include_subtypes: pattern.include_subtypes,
                    });
                }
                None => {
                    warn!(pattern = %pattern, "unknown type in leak filter; pattern will never match");
                    filter.unresolved.push(pattern.type_name.clone());
                }
            }
        }
        filter
    }

    pub fn is_track_all(&self) -> bool {
        self.entries.is_empty() && self.unresolved.is_empty()
    }

    /// Names that could not be resolved at configuration time.
    pub fn unresolved(&self) -> &[String] {
        &self.unresolved
    }

    pub fn matches(&self, ty: TypeKey, types: &dyn TypeSystem) -> bool {
        if self.is_track_all() {
            return true;
        }
        self.entries
            .iter()
            .any(|entry| entry.ty == ty || (entry.include_subtypes && types.is_a(ty, entry.ty)))
    }
}
