//! Workflow triggers (`on:`) and event matching

use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::Value;
use std::fmt;

/// Kind of repository event that may start a workflow
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    WorkflowDispatch,
    Other(String),
}

impl EventKind {
    pub fn from_name(name: &str) -> Self {
        match name {
            "push" => EventKind::Push,
            "pull_request" => EventKind::PullRequest,
            "workflow_dispatch" => EventKind::WorkflowDispatch,
            other => EventKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::WorkflowDispatch => "workflow_dispatch",
            EventKind::Other(name) => name,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A concrete event: what happened and on which ref
///
/// For `push` the ref is the pushed ref. For `pull_request` it is the base
/// branch the pull request targets.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub kind: EventKind,
    pub git_ref: String,
}

impl Event {
    pub fn new(kind: EventKind, git_ref: impl Into<String>) -> Self {
        Self {
            kind,
            git_ref: normalize_ref(&git_ref.into()),
        }
    }

    pub fn push(git_ref: impl Into<String>) -> Self {
        Self::new(EventKind::Push, git_ref)
    }

    pub fn pull_request(base_ref: impl Into<String>) -> Self {
        Self::new(EventKind::PullRequest, base_ref)
    }

    /// Branch name when the ref points at a branch
    pub fn branch(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/heads/")
    }

    /// Tag name when the ref points at a tag
    pub fn tag(&self) -> Option<&str> {
        self.git_ref.strip_prefix("refs/tags/")
    }
}

/// Bare branch names become `refs/heads/<name>`
fn normalize_ref(git_ref: &str) -> String {
    if git_ref.starts_with("refs/") {
        git_ref.to_string()
    } else {
        format!("refs/heads/{}", git_ref)
    }
}

/// Ref filters attached to one event in the `on:` map
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
    #[serde(default)]
    pub branches: Vec<String>,

    #[serde(default, rename = "branches-ignore")]
    pub branches_ignore: Vec<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    #[serde(default, rename = "tags-ignore")]
    pub tags_ignore: Vec<String>,
}

impl EventFilter {
    fn has_branch_filter(&self) -> bool {
        !self.branches.is_empty() || !self.branches_ignore.is_empty()
    }

    fn has_tag_filter(&self) -> bool {
        !self.tags.is_empty() || !self.tags_ignore.is_empty()
    }

    /// Check the event's ref against the filters
    pub fn accepts(&self, event: &Event) -> bool {
        if !self.has_branch_filter() && !self.has_tag_filter() {
            return true;
        }

        if let Some(branch) = event.branch() {
            if !self.has_branch_filter() {
                return false;
            }
            if !self.branches.is_empty() {
                return patterns_match(&self.branches, branch);
            }
            return !patterns_match(&self.branches_ignore, branch);
        }

        if let Some(tag) = event.tag() {
            if !self.has_tag_filter() {
                return false;
            }
            if !self.tags.is_empty() {
                return patterns_match(&self.tags, tag);
            }
            return !patterns_match(&self.tags_ignore, tag);
        }

        false
    }
}

/// Evaluate a filter list in order; `!pattern` entries negate earlier matches
fn patterns_match(patterns: &[String], name: &str) -> bool {
    let mut matched = false;
    for pattern in patterns {
        if let Some(negated) = pattern.strip_prefix('!') {
            if glob_match(negated, name) {
                matched = false;
            }
        } else if glob_match(pattern, name) {
            matched = true;
        }
    }
    matched
}

/// Ref glob matching: `*` stops at `/`, `**` crosses it, `?` is one char
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    re.push('^');
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => {
                if chars.peek() == Some(&'*') {
                    chars.next();
                    re.push_str(".*");
                } else {
                    re.push_str("[^/]*");
                }
            }
            '?' => re.push_str("[^/]"),
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');

    Regex::new(&re).map(|r| r.is_match(name)).unwrap_or(false)
}

/// Parsed `on:` section
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Trigger {
    pub events: Vec<(EventKind, EventFilter)>,
}

impl Trigger {
    /// Parse any of the three `on:` forms: string, list, or map
    pub fn from_value(value: &Value) -> Result<Self> {
        let events = match value {
            Value::String(name) => vec![(EventKind::from_name(name), EventFilter::default())],
            Value::Sequence(names) => names
                .iter()
                .map(|v| {
                    v.as_str()
                        .map(|name| (EventKind::from_name(name), EventFilter::default()))
                        .ok_or_else(|| anyhow::anyhow!("Trigger list entries must be event names"))
                })
                .collect::<Result<Vec<_>>>()?,
            Value::Mapping(map) => {
                let mut events = Vec::with_capacity(map.len());
                for (key, filter) in map {
                    let name = key
                        .as_str()
                        .ok_or_else(|| anyhow::anyhow!("Trigger event names must be strings"))?;
                    let filter = match filter {
                        Value::Null => EventFilter::default(),
                        other => serde_yaml::from_value(other.clone()).map_err(|e| {
                            anyhow::anyhow!("Invalid filter for event '{}': {}", name, e)
                        })?,
                    };
                    events.push((EventKind::from_name(name), filter));
                }
                events
            }
            Value::Null => Vec::new(),
            _ => anyhow::bail!("Unsupported 'on' trigger format"),
        };

        Ok(Self { events })
    }

    /// Does this event start the workflow?
    pub fn matches(&self, event: &Event) -> bool {
        self.events
            .iter()
            .any(|(kind, filter)| *kind == event.kind && filter.accepts(event))
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.events.iter().map(|(kind, _)| kind.as_str()).collect()
    }
}
