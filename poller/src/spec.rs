//! Poll specifications and how two of them relate.
//!
//! A [`PollSpec`] names the content a poll audits: an archival unit, a URL
//! prefix inside it, and an optional `[lower, upper]` range over the remainder
//! of child URLs. Two specs in the same AU are compared with
//! [`PollSpec::relation`], which drives the conflict rule in
//! [`PollSpec::conflicts_with`].

use std::cmp::Ordering;
use std::fmt;

use lcap_messages::MessageHeader;
use lcap_types::{PollKind, ProtocolVersion};
use serde::{Deserialize, Serialize};

/// URL of the spec that covers a whole archival unit.
pub const AU_URL: &str = "lockssau:";

/// How the content ranges of two specs relate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RangeRelation {
    NoRelation,
    /// Same prefix, disjoint ranges.
    SameLevelNoOverlap,
    /// Same prefix, overlapping ranges.
    SameLevelOverlap,
    /// This spec contains the other.
    Above,
    /// This spec is contained by the other.
    Below,
}

impl RangeRelation {
    /// The relation seen from the other side.
    pub fn inverse(self) -> Self {
        match self {
            Self::Above => Self::Below,
            Self::Below => Self::Above,
            other => other,
        }
    }
}

/// Immutable description of what a poll audits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PollSpec {
    pub au_id: String,
    pub plugin_id: String,
    pub url: String,
    pub lower: Option<String>,
    pub upper: Option<String>,
    pub kind: PollKind,
}

impl PollSpec {
    pub fn new(
        au_id: impl Into<String>,
        plugin_id: impl Into<String>,
        url: impl Into<String>,
        kind: PollKind,
    ) -> Self {
        Self {
            au_id: au_id.into(),
            plugin_id: plugin_id.into(),
            url: url.into(),
            lower: None,
            upper: None,
            kind,
        }
    }

    /// A spec covering a whole archival unit.
    pub fn for_au(au_id: impl Into<String>, plugin_id: impl Into<String>, kind: PollKind) -> Self {
        Self::new(au_id, plugin_id, AU_URL, kind)
    }

    /// The same spec restricted to `[lower, upper]`.
    pub fn with_range(mut self, lower: Option<String>, upper: Option<String>) -> Self {
        self.lower = lower;
        self.upper = upper;
        self
    }

    /// The same content under a different poll kind.
    pub fn with_kind(&self, kind: PollKind) -> Self {
        Self {
            kind,
            ..self.clone()
        }
    }

    /// The spec a peer asked for in a message header.
    pub fn from_header(header: &MessageHeader, kind: PollKind) -> Self {
        Self {
            au_id: header.au_id.clone(),
            plugin_id: header.plugin_id.clone(),
            url: header.url.clone(),
            lower: header.lower.clone(),
            upper: header.upper.clone(),
            kind,
        }
    }

    pub fn version(&self) -> ProtocolVersion {
        self.kind.version()
    }

    pub fn is_ranged(&self) -> bool {
        self.lower.is_some() || self.upper.is_some()
    }

    pub fn is_au(&self) -> bool {
        self.url == AU_URL
    }

    /// Whether `url` falls inside this spec.
    ///
    /// The URL must equal the prefix (unranged specs only) or extend it at a
    /// path boundary. For ranged specs the remainder after the prefix must lie
    /// within `[lower, upper]`, compared byte-wise.
    pub fn matches(&self, url: &str) -> bool {
        if self.is_au() {
            return true;
        }
        let Some(rest) = url.strip_prefix(self.url.as_str()) else {
            return false;
        };
        if rest.is_empty() {
            return !self.is_ranged();
        }
        let boundary =
            self.url.ends_with('/') || rest.starts_with('/') || rest.starts_with("!/");
        if !boundary {
            return false;
        }
        if let Some(lower) = &self.lower {
            if rest.as_bytes() < lower.as_bytes() {
                return false;
            }
        }
        if let Some(upper) = &self.upper {
            if rest.as_bytes() > upper.as_bytes() {
                return false;
            }
        }
        true
    }

    /// Compare this spec's content range with `other`'s.
    pub fn relation(&self, other: &PollSpec) -> RangeRelation {
        if self.au_id != other.au_id {
            return RangeRelation::NoRelation;
        }
        match (self.is_au(), other.is_au()) {
            (true, true) => return RangeRelation::SameLevelOverlap,
            (true, false) => return RangeRelation::Above,
            (false, true) => return RangeRelation::Below,
            (false, false) => {}
        }
        if normalized(&self.url) == normalized(&other.url) {
            return if self.ranges_disjoint(other) {
                RangeRelation::SameLevelNoOverlap
            } else {
                RangeRelation::SameLevelOverlap
            };
        }
        if self.matches(&other.url) {
            RangeRelation::Above
        } else if other.matches(&self.url) {
            RangeRelation::Below
        } else {
            RangeRelation::NoRelation
        }
    }

    fn ranges_disjoint(&self, other: &PollSpec) -> bool {
        let before = |upper: &Option<String>, lower: &Option<String>| match (upper, lower) {
            (Some(u), Some(l)) => u.as_bytes().cmp(l.as_bytes()) == Ordering::Less,
            _ => false,
        };
        before(&self.upper, &other.lower) || before(&other.upper, &self.lower)
    }

    /// Whether a new poll over `self` must be refused because `existing` is
    /// already running.
    ///
    /// Verify polls never conflict. Name polls tolerate overlapping polls at
    /// their own level, since they spawn narrower sub-polls over the same prefix.
    pub fn conflicts_with(&self, existing: &PollSpec) -> bool {
        if self.kind.is_verify() || existing.kind.is_verify() {
            return false;
        }
        match self.relation(existing) {
            RangeRelation::SameLevelOverlap => existing.kind != PollKind::Name,
            RangeRelation::Above | RangeRelation::Below => true,
            RangeRelation::NoRelation | RangeRelation::SameLevelNoOverlap => false,
        }
    }
}

fn normalized(url: &str) -> String {
    if url.ends_with('/') {
        url.to_string()
    } else {
        format!("{url}/")
    }
}

impl fmt::Display for PollSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}:{}", self.kind, self.au_id, self.url)?;
        if self.is_ranged() {
            write!(
                f,
                "[{}..{}]",
                self.lower.as_deref().unwrap_or(""),
                self.upper.as_deref().unwrap_or("")
            )?;
        }
        Ok(())
    }
}
