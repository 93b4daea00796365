//! Attribute inheritance
//!
//! An attribute is looked up on the object itself, then on each ancestor
//! along the parent chain, then on the object's zone. The first object
//! defining the full path wins and is reported alongside the value.

use crate::services::{AttributeStore, ObjectStore};
use dashmap::DashMap;
use mush_config::ConfigHandle;
use mush_core::{DbRef, MString};
use regex::{Regex, RegexBuilder};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Separator between the segments of a nested attribute name
pub const PATH_SEPARATOR: char = '`';

/// Case-insensitive attribute path, stored upper-case
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttributePath {
    segments: Vec<String>,
}

impl AttributePath {
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            segments: segments
                .into_iter()
                .map(|s| s.as_ref().trim().to_ascii_uppercase())
                .collect(),
        }
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// The first `n` segments
    pub fn prefix(&self, n: usize) -> AttributePath {
        Self {
            segments: self.segments.iter().take(n).cloned().collect(),
        }
    }

    pub fn parent(&self) -> Option<AttributePath> {
        (self.len() > 1).then(|| self.prefix(self.len() - 1))
    }
}

impl fmt::Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.segments.join("`"))
    }
}

impl FromStr for AttributePath {
    type Err = mush_core::MushError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let path = AttributePath::new(s.split(PATH_SEPARATOR));
        if path.segments.iter().any(|seg| !is_valid_segment(seg)) {
            return Err(mush_core::MushError::InvalidData(format!(
                "bad attribute name: {}",
                s
            )));
        }
        Ok(path)
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_graphic() && !matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | ',' | ';' | '%' | '\\' | '`'))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttributeFlags {
    /// Not visible to children or zone members
    pub no_inherit: bool,
    /// `$`/`^` pattern is a regular expression
    pub regexp: bool,
    /// `$`/`^` pattern matches case-sensitively
    pub case_sensitive: bool,
    /// Anybody may read it
    pub visual: bool,
    /// Never checked for `$` commands
    pub no_command: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    /// Full path, upper-case, segments joined with a backtick
    pub name: String,
    pub value: MString,
    pub owner: DbRef,
    pub flags: AttributeFlags,
}

/// Where a resolved attribute came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeSource {
    Own,
    Parent,
    Zone,
}

/// A successful lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InheritedAttribute {
    pub source: AttributeSource,
    pub source_object: DbRef,
    /// One attribute per path segment, outermost first
    pub chain: Vec<Attribute>,
}

impl InheritedAttribute {
    /// The attribute named by the full path
    pub fn attribute(&self) -> Option<&Attribute> {
        self.chain.last()
    }

    pub fn value(&self) -> MString {
        self.attribute().map(|a| a.value.clone()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Found(InheritedAttribute),
    /// Nothing defines the full path. `partial` is the longest prefix of
    /// the path found on the object itself.
    NotFound { partial: Vec<Attribute> },
}

impl Resolution {
    pub fn found(self) -> Option<InheritedAttribute> {
        match self {
            Resolution::Found(found) => Some(found),
            Resolution::NotFound { .. } => None,
        }
    }
}

/// A pattern over attribute names
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributePattern {
    /// `*` within a segment, `**` across segments, `?` one character
    Wildcard(String),
    Regex(String),
}

/// One attribute matched by name pattern
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternHit {
    pub source: AttributeSource,
    pub source_object: DbRef,
    pub attribute: Attribute,
}

/// Attribute value prefix marking user-defined patterns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatternMarker {
    /// `$pattern:action`, matched against typed commands
    Command,
    /// `^pattern:action`, matched against heard speech
    Listen,
}

impl PatternMarker {
    pub fn as_char(&self) -> char {
        match self {
            PatternMarker::Command => '$',
            PatternMarker::Listen => '^',
        }
    }
}

/// A `$` or `^` attribute whose pattern accepted some input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    pub object: DbRef,
    pub attribute: String,
    pub source: AttributeSource,
    pub action: MString,
    /// Numbered captures; becomes `%0`-`%9`
    pub captures: Vec<MString>,
    /// Named regex captures; `%$<name>`
    pub named: HashMap<String, MString>,
}

/// How glob characters translate into a regex
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WildcardStyle {
    /// Attribute names: `*` stays within a segment, `**` crosses them
    AttributeName,
    /// User command patterns: every wildcard is a capture group
    Capturing,
    /// Lock atoms: plain globbing
    Plain,
}

/// Translate a glob into an anchored regex. `\` escapes the next character.
pub fn wildcard_to_regex(pattern: &str, style: WildcardStyle, case_sensitive: bool) -> String {
    let mut out = String::from(if case_sensitive { "(?s)^" } else { "(?is)^" });
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.next() {
                Some(next) => out.push_str(&regex::escape(&next.to_string())),
                None => out.push_str(r"\\"),
            },
            '*' => match style {
                WildcardStyle::AttributeName => {
                    if chars.peek() == Some(&'*') {
                        chars.next();
                        out.push_str(".*");
                    } else {
                        out.push_str("[^`]*");
                    }
                }
                WildcardStyle::Capturing => out.push_str("(.*?)"),
                WildcardStyle::Plain => out.push_str(".*"),
            },
            '?' => out.push_str(match style {
                WildcardStyle::AttributeName => "[^`]",
                WildcardStyle::Capturing => "(.)",
                WildcardStyle::Plain => ".",
            }),
            other => out.push_str(&regex::escape(&other.to_string())),
        }
    }
    out.push('$');
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum PatternKind {
    Wildcard(WildcardStyle),
    Regex,
}

/// Bounded cache of compiled patterns. A full cache evicts an arbitrary entry.
#[derive(Debug, Default)]
pub struct PatternCache {
    entries: DashMap<(PatternKind, String, bool), Arc<Regex>>,
}

impl PatternCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn wildcard(
        &self,
        pattern: &str,
        style: WildcardStyle,
        case_sensitive: bool,
        capacity: usize,
    ) -> Option<Arc<Regex>> {
        self.get_or_compile(
            (PatternKind::Wildcard(style), pattern.to_string(), case_sensitive),
            capacity,
            || wildcard_to_regex(pattern, style, case_sensitive),
        )
    }

    pub fn regex(&self, pattern: &str, case_sensitive: bool, capacity: usize) -> Option<Arc<Regex>> {
        self.get_or_compile(
            (PatternKind::Regex, pattern.to_string(), case_sensitive),
            capacity,
            || pattern.to_string(),
        )
    }

    fn get_or_compile(
        &self,
        key: (PatternKind, String, bool),
        capacity: usize,
        source: impl FnOnce() -> String,
    ) -> Option<Arc<Regex>> {
        if let Some(hit) = self.entries.get(&key) {
            return Some(Arc::clone(hit.value()));
        }
        let compiled = match RegexBuilder::new(&source())
            .case_insensitive(!key.2)
            .build()
        {
            Ok(re) => Arc::new(re),
            Err(e) => {
                tracing::debug!("Pattern {:?} does not compile: {}", key.1, e);
                return None;
            }
        };
        if capacity == 0 {
            return Some(compiled);
        }
        if self.entries.len() >= capacity {
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            if let Some(victim) = victim {
                self.entries.remove(&victim);
            }
        }
        self.entries.insert(key, Arc::clone(&compiled));
        Some(compiled)
    }
}

/// Walks self, parents, and zone to find attributes
pub struct AttributeResolver {
    objects: Arc<dyn ObjectStore>,
    attributes: Arc<dyn AttributeStore>,
    config: ConfigHandle,
    patterns: PatternCache,
}

impl AttributeResolver {
    pub fn new(
        objects: Arc<dyn ObjectStore>,
        attributes: Arc<dyn AttributeStore>,
        config: ConfigHandle,
    ) -> Self {
        Self {
            objects,
            attributes,
            config,
            patterns: PatternCache::new(),
        }
    }

    pub fn patterns(&self) -> &PatternCache {
        &self.patterns
    }

    /// Objects consulted for `object`, in priority order
    async fn lineage(&self, object: DbRef, check_parent: bool) -> Vec<(AttributeSource, DbRef)> {
        let mut order = vec![(AttributeSource::Own, object)];
        if !check_parent {
            return order;
        }
        let Some(start) = self.objects.object(object).await else {
            return order;
        };

        let max_hops = self.config.snapshot().max_parent_depth;
        let mut visited = HashSet::from([object]);
        let mut next = start.parent;
        let mut hops = 0;
        while let Some(parent) = next {
            if hops >= max_hops {
                tracing::debug!("Parent chain of {} exceeds {} hops", object, max_hops);
                break;
            }
            if !visited.insert(parent) {
                tracing::warn!("Parent cycle through {} while resolving on {}", parent, object);
                break;
            }
            order.push((AttributeSource::Parent, parent));
            next = self.objects.object(parent).await.and_then(|o| o.parent);
            hops += 1;
        }

        if let Some(zone) = start.zone.filter(|z| !visited.contains(z)) {
            order.push((AttributeSource::Zone, zone));
        }
        order
    }

    /// Look up `path` on `object`, optionally through its parents and zone
    pub async fn resolve(&self, object: DbRef, path: &AttributePath, check_parent: bool) -> Resolution {
        let mut partial = Vec::new();
        for (source, holder) in self.lineage(object, check_parent).await {
            let chain = self.attributes.attribute_chain(holder, path).await;
            if chain.len() == path.len() && !path.is_empty() {
                let inherited = source != AttributeSource::Own;
                if inherited && chain.last().is_some_and(|a| a.flags.no_inherit) {
                    continue;
                }
                return Resolution::Found(InheritedAttribute {
                    source,
                    source_object: holder,
                    chain,
                });
            }
            if source == AttributeSource::Own {
                partial = chain;
            }
        }
        Resolution::NotFound { partial }
    }

    /// Every attribute whose name matches `pattern`. A name found on a
    /// nearer object hides the same name further up the chain.
    pub async fn resolve_pattern(
        &self,
        object: DbRef,
        pattern: &AttributePattern,
        check_parent: bool,
    ) -> Vec<PatternHit> {
        let capacity = self.config.snapshot().pattern_cache_capacity;
        let re = match pattern {
            AttributePattern::Wildcard(glob) => {
                self.patterns
                    .wildcard(glob, WildcardStyle::AttributeName, false, capacity)
            }
            AttributePattern::Regex(source) => self.patterns.regex(source, false, capacity),
        };
        let Some(re) = re else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut hits = Vec::new();
        for (source, holder) in self.lineage(object, check_parent).await {
            for attribute in self.attributes.attributes(holder).await {
                if source != AttributeSource::Own && attribute.flags.no_inherit {
                    continue;
                }
                if !re.is_match(&attribute.name) || !seen.insert(attribute.name.clone()) {
                    continue;
                }
                hits.push(PatternHit {
                    source,
                    source_object: holder,
                    attribute,
                });
            }
        }
        hits
    }

    /// `$` or `^` attributes on `object` whose pattern accepts `text`
    pub async fn match_patterns(
        &self,
        object: DbRef,
        marker: PatternMarker,
        text: &str,
        check_parent: bool,
    ) -> Vec<PatternMatch> {
        let capacity = self.config.snapshot().pattern_cache_capacity;
        let mut seen = HashSet::new();
        let mut matches = Vec::new();

        for (source, holder) in self.lineage(object, check_parent).await {
            for attribute in self.attributes.attributes(holder).await {
                if source != AttributeSource::Own && attribute.flags.no_inherit {
                    continue;
                }
                if !seen.insert(attribute.name.clone()) {
                    continue;
                }
                if marker == PatternMarker::Command && attribute.flags.no_command {
                    continue;
                }
                let Some((pattern, action)) = split_pattern(&attribute.value, marker) else {
                    continue;
                };
                let case = attribute.flags.case_sensitive;
                let re = if attribute.flags.regexp {
                    self.patterns.regex(&pattern, case, capacity)
                } else {
                    self.patterns
                        .wildcard(&pattern, WildcardStyle::Capturing, case, capacity)
                };
                let Some(caps) = re.as_ref().and_then(|re| re.captures(text)) else {
                    continue;
                };

                let captures = caps
                    .iter()
                    .skip(1)
                    .take(10)
                    .map(|m| MString::from(m.map_or("", |m| m.as_str())))
                    .collect();
                let named = re
                    .iter()
                    .flat_map(|re| re.capture_names().flatten())
                    .filter_map(|name| {
                        caps.name(name)
                            .map(|m| (name.to_ascii_uppercase(), MString::from(m.as_str())))
                    })
                    .collect();
                matches.push(PatternMatch {
                    object,
                    attribute: attribute.name.clone(),
                    source,
                    action,
                    captures,
                    named,
                });
            }
        }
        matches
    }
}

/// Split `$pattern:action` at the first unescaped colon
fn split_pattern(value: &MString, marker: PatternMarker) -> Option<(String, MString)> {
    let text = value.plain();
    let rest = text.strip_prefix(marker.as_char())?;
    let mut escaped = false;
    for (i, c) in rest.chars().enumerate() {
        match c {
            '\\' if !escaped => escaped = true,
            ':' if !escaped => {
                let pattern: String = rest.chars().take(i).collect();
                let action = value.slice(i + 2, value.len());
                return Some((pattern, action));
            }
            _ => escaped = false,
        }
    }
    None
}
