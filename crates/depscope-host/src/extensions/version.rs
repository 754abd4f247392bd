//! Dotted numeric versions and version-spec matching
//!
//! Specs are either an exact version (`1.2.3`) or an interval in bracket
//! notation (`[1.0,2.0)`, `(1.0,]`, ...). A blank side of an interval is
//! unbounded.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// Maximum number of numeric components in a version
const MAX_COMPONENTS: usize = 4;

/// A dotted numeric version with 1 to 4 components
///
/// Missing trailing components compare as zero, so `1.2` equals `1.2.0`.
#[derive(Debug, Clone)]
pub struct Version {
    components: Vec<u64>,
}

impl Version {
    pub fn new(components: impl Into<Vec<u64>>) -> Option<Self> {
        let components = components.into();
        if components.is_empty() || components.len() > MAX_COMPONENTS {
            return None;
        }
        Some(Self { components })
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl Default for Version {
    fn default() -> Self {
        Self {
            components: vec![0],
        }
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(VersionParseError(s.to_string()));
        }
        let components = trimmed
            .split('.')
            .map(|part| part.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| VersionParseError(s.to_string()))?;
        Version::new(components).ok_or_else(|| VersionParseError(s.to_string()))
    }
}

impl PartialEq for Version {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Version {}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (0..MAX_COMPONENTS)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ordering| *ordering != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(u64::to_string).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// Error returned for text that is not a dotted numeric version
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid version: '{0}'")]
pub struct VersionParseError(String);

/// One side of an interval spec
#[derive(Debug, Clone, PartialEq, Eq)]
struct Bound {
    version: Version,
    inclusive: bool,
}

/// Decide whether `actual` satisfies `spec`
///
/// Returns `false` when the version is absent or the version spec is blank, and for
/// malformed exact specs. An interval whose bounds both fail to parse places
/// no constraint and matches everything.
pub fn is_version_compatible(actual: Option<&Version>, spec: Option<&str>) -> bool {
    let Some(actual) = actual else {
        return false;
    };
    let spec = match spec.map(str::trim) {
        Some(spec) if !spec.is_empty() => spec,
        _ => return false,
    };

    if !spec.starts_with(['[', '(']) && !spec.contains(',') {
        return match spec.parse::<Version>() {
            Ok(required) => *actual == required,
            Err(_) => false,
        };
    }

    let (lower, upper) = parse_interval(spec);

    if let Some(lower) = lower {
        let ok = if lower.inclusive {
            *actual >= lower.version
        } else {
            *actual > lower.version
        };
        if !ok {
            return false;
        }
    }

    if let Some(upper) = upper {
        let ok = if upper.inclusive {
            *actual <= upper.version
        } else {
            *actual < upper.version
        };
        if !ok {
            return false;
        }
    }

    true
}

fn parse_interval(spec: &str) -> (Option<Bound>, Option<Bound>) {
    let lower_inclusive = !spec.starts_with('(');
    let upper_inclusive = !spec.ends_with(')');

    let inner = spec.trim_start_matches(['[', '(']).trim_end_matches([']', ')']);
    let (lower_text, upper_text) = inner.split_once(',').unwrap_or((inner, ""));

    let bound = |text: &str, inclusive: bool| {
        text.trim()
            .parse::<Version>()
            .ok()
            .map(|version| Bound { version, inclusive })
    };

    (
        bound(lower_text, lower_inclusive),
        bound(upper_text, upper_inclusive),
    )
}
