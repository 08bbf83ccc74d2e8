//! Link-replacement rule engine.
//!
//! Applies an ordered set of admin-supplied regex rules to a post's
//! textual content. Rules compose sequentially: each rule consumes the
//! previous rule's output. Failures are isolated per rule: a pattern
//! that fails to compile, or a template whose capture group does not
//! participate in a match, skips that one rule and never drops the post.
//!
//! Patterns compile with the `regex` crate, which guarantees
//! linear-time matching, so untrusted admin patterns cannot stall the
//! pipeline with catastrophic backtracking. Matching is
//! case-insensitive (the original deployment behavior).

use regex::{Captures, Regex, RegexBuilder};
use tracing::{debug, warn};

use crate::error::RuleError;
use crate::pipeline::types::RichText;
use crate::telegram::types::MessageEntity;

/// An uncompiled rule as the admin collaborator stores it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplacementRule {
    pub id: i64,
    pub pattern: String,
    /// Template string; `\1`, `$1` and `${1}` all reference group 1.
    pub replacement: String,
    /// Rules apply in ascending order; ties break by id.
    pub order: i64,
}

/// One parsed piece of a replacement template.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Group(usize),
}

/// A rule with its pattern compiled and template parsed.
#[derive(Debug, Clone)]
struct CompiledRule {
    id: i64,
    regex: Regex,
    template: Vec<Segment>,
}

/// Immutable, versioned, ordered rule set.
///
/// Compiled once per admin mutation and shared by `Arc`; applying it is
/// pure, so identical input always yields identical output.
#[derive(Debug, Clone)]
pub struct RuleSet {
    version: u64,
    rules: Vec<CompiledRule>,
}

impl RuleSet {
    /// Compile a rule set, skipping (and reporting) rules that fail.
    pub fn compile(mut rules: Vec<ReplacementRule>, version: u64) -> Self {
        rules.sort_by_key(|r| (r.order, r.id));
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in &rules {
            match CompiledRule::compile(rule) {
                Ok(c) => compiled.push(c),
                Err(e) => warn!(
                    rule_id = rule.id,
                    pattern = %rule.pattern,
                    error = %e,
                    "Skipping rule that failed to compile"
                ),
            }
        }
        debug!(version, rules = compiled.len(), "Compiled rule set");
        Self {
            version,
            rules: compiled,
        }
    }

    /// A rule set with no rules.
    pub fn empty(version: u64) -> Self {
        Self {
            version,
            rules: Vec::new(),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply every rule in order to `text`.
    ///
    /// Sequential composition: rule N operates on the output of rule
    /// N-1. A rule that errors on this input is skipped; the text from
    /// the preceding rules is kept.
    pub fn apply(&self, text: &str) -> String {
        let mut current = text.to_string();
        for rule in &self.rules {
            match rule.apply(&current) {
                Ok(next) => current = next,
                Err(e) => warn!(rule_id = rule.id, error = %e, "Skipping rule for this post"),
            }
        }
        current
    }

    /// Rewrite a rich-text body: apply rules to the visible text while
    /// remapping formatting spans, then rewrite hidden `text_link` URLs.
    ///
    /// Only textual content is touched; media payloads and non-text poll
    /// fields never pass through here.
    pub fn rewrite(&self, body: &RichText) -> RichText {
        let mut text = body.text.clone();
        let mut entities = body.entities.clone();

        for rule in &self.rules {
            match rule.apply_rich(&text, &entities) {
                Ok((new_text, new_entities)) => {
                    text = new_text;
                    entities = new_entities;
                }
                Err(e) => warn!(rule_id = rule.id, error = %e, "Skipping rule for this post"),
            }
        }

        for entity in &mut entities {
            if entity.kind == "text_link"
                && let Some(url) = &entity.url
            {
                let rewritten = self.apply(url);
                if rewritten != *url {
                    entity.url = Some(rewritten);
                }
            }
        }

        RichText { text, entities }
    }
}

impl CompiledRule {
    fn compile(rule: &ReplacementRule) -> Result<Self, RuleError> {
        let regex = RegexBuilder::new(&rule.pattern)
            .case_insensitive(true)
            .build()
            .map_err(|e| RuleError::BadPattern {
                id: rule.id,
                source: Box::new(e),
            })?;

        let template = parse_template(rule.id, &rule.replacement)?;

        // Group 0 is the whole match and always exists.
        let available = regex.captures_len() - 1;
        if let Some(max) = template
            .iter()
            .filter_map(|s| match s {
                Segment::Group(n) => Some(*n),
                Segment::Literal(_) => None,
            })
            .max()
            && max > available
        {
            return Err(RuleError::GroupOutOfRange {
                id: rule.id,
                group: max,
                available,
            });
        }

        Ok(Self {
            id: rule.id,
            regex,
            template,
        })
    }

    /// Replace every match in `text`, or error without partial effect.
    fn apply(&self, text: &str) -> Result<String, RuleError> {
        let mut out = String::with_capacity(text.len());
        let mut last = 0;
        for caps in self.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            out.push_str(&text[last..whole.start()]);
            out.push_str(&self.expand(&caps)?);
            last = whole.end();
        }
        out.push_str(&text[last..]);
        Ok(out)
    }

    /// Like [`apply`], but also remaps entity spans across the edits.
    ///
    /// [`apply`]: CompiledRule::apply
    fn apply_rich(
        &self,
        text: &str,
        entities: &[MessageEntity],
    ) -> Result<(String, Vec<MessageEntity>), RuleError> {
        // Collect all edits first so a template error leaves no partial
        // rewrite behind.
        let mut edits: Vec<(std::ops::Range<usize>, String)> = Vec::new();
        for caps in self.regex.captures_iter(text) {
            let Some(whole) = caps.get(0) else { continue };
            edits.push((whole.range(), self.expand(&caps)?));
        }
        if edits.is_empty() {
            return Ok((text.to_string(), entities.to_vec()));
        }

        // Build the new text and the edit list in UTF-16 units, which is
        // what entity offsets count.
        let mut out = String::with_capacity(text.len());
        let mut edits16: Vec<Edit16> = Vec::with_capacity(edits.len());
        let mut cursor_byte = 0usize;
        let mut cursor16 = 0i64;
        for (range, replacement) in &edits {
            out.push_str(&text[cursor_byte..range.start]);
            cursor16 += utf16_len(&text[cursor_byte..range.start]);
            let start16 = cursor16;
            cursor16 += utf16_len(&text[range.clone()]);
            edits16.push(Edit16 {
                start: start16,
                end: cursor16,
                new_len: utf16_len(replacement),
            });
            out.push_str(replacement);
            cursor_byte = range.end;
        }
        out.push_str(&text[cursor_byte..]);

        let remapped = entities
            .iter()
            .filter_map(|entity| {
                let start = remap_pos(entity.offset, &edits16);
                let end = remap_pos(entity.offset + entity.length, &edits16);
                (end > start).then(|| MessageEntity {
                    offset: start,
                    length: end - start,
                    ..entity.clone()
                })
            })
            .collect();

        Ok((out, remapped))
    }

    fn expand(&self, caps: &Captures<'_>) -> Result<String, RuleError> {
        let mut out = String::new();
        for segment in &self.template {
            match segment {
                Segment::Literal(s) => out.push_str(s),
                Segment::Group(n) => {
                    let group = caps.get(*n).ok_or(RuleError::UnmatchedGroup {
                        id: self.id,
                        group: *n,
                    })?;
                    out.push_str(group.as_str());
                }
            }
        }
        Ok(out)
    }
}

/// One text edit in UTF-16 code units.
#[derive(Debug, Clone, Copy)]
struct Edit16 {
    start: i64,
    end: i64,
    new_len: i64,
}

/// Map a pre-edit UTF-16 position to its post-edit position.
///
/// Positions before an edit are unchanged, positions after shift by the
/// length delta, and positions inside a replaced span clamp into the
/// replacement so a span wrapping a rewritten link keeps wrapping it.
fn remap_pos(pos: i64, edits: &[Edit16]) -> i64 {
    let mut delta = 0;
    for edit in edits {
        if pos <= edit.start {
            return pos + delta;
        }
        if pos >= edit.end {
            delta += edit.new_len - (edit.end - edit.start);
            continue;
        }
        return edit.start + delta + (pos - edit.start).min(edit.new_len);
    }
    pos + delta
}

fn utf16_len(s: &str) -> i64 {
    s.chars().map(|c| c.len_utf16() as i64).sum()
}

/// Parse a replacement template into literal/group segments.
///
/// Accepts `\1` (as the original deployment wrote rules), `$1` and
/// `${1}`; `\\` and `$$` escape the markers themselves.
fn parse_template(rule_id: i64, template: &str) -> Result<Vec<Segment>, RuleError> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = template.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\\' => match chars.peek() {
                Some('\\') => {
                    chars.next();
                    literal.push('\\');
                }
                Some(d) if d.is_ascii_digit() => {
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Group(read_number(&mut chars)));
                }
                _ => {
                    return Err(RuleError::BadTemplate {
                        id: rule_id,
                        detail: "dangling '\\' must be followed by a digit or '\\'".into(),
                    });
                }
            },
            '$' => match chars.peek() {
                Some('$') => {
                    chars.next();
                    literal.push('$');
                }
                Some('{') => {
                    chars.next();
                    flush(&mut segments, &mut literal);
                    let n = read_number(&mut chars);
                    if chars.next() != Some('}') {
                        return Err(RuleError::BadTemplate {
                            id: rule_id,
                            detail: "unclosed '${' group reference".into(),
                        });
                    }
                    segments.push(Segment::Group(n));
                }
                Some(d) if d.is_ascii_digit() => {
                    flush(&mut segments, &mut literal);
                    segments.push(Segment::Group(read_number(&mut chars)));
                }
                _ => {
                    return Err(RuleError::BadTemplate {
                        id: rule_id,
                        detail: "dangling '$' must be followed by a digit, '{' or '$'".into(),
                    });
                }
            },
            other => literal.push(other),
        }
    }
    flush(&mut segments, &mut literal);
    Ok(segments)
}

fn flush(segments: &mut Vec<Segment>, literal: &mut String) {
    if !literal.is_empty() {
        segments.push(Segment::Literal(std::mem::take(literal)));
    }
}

fn read_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> usize {
    let mut n = 0usize;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        chars.next();
        n = n.saturating_mul(10).saturating_add(d as usize);
    }
    n
}
