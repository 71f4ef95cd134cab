//! Boolean rule trees evaluated against the fields of one compound.
//!
//! Rules are built programmatically (see the builder functions on [`Rule`]).
//! The serde derives exist so a rule tree can be snapshotted alongside a
//! search continuation; there is no textual syntax.

use crate::value::{NodeValue, TagKind};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Numeric comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NumericOp {
    Equals,
    NotEquals,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl NumericOp {
    pub fn symbol(self) -> &'static str {
        match self {
            NumericOp::Equals => "==",
            NumericOp::NotEquals => "!=",
            NumericOp::LessThan => "<",
            NumericOp::LessOrEqual => "<=",
            NumericOp::GreaterThan => ">",
            NumericOp::GreaterOrEqual => ">=",
        }
    }

    /// `actual <op> expected`
    fn holds<T: PartialOrd>(self, actual: T, expected: T) -> bool {
        match self {
            NumericOp::Equals => actual == expected,
            NumericOp::NotEquals => actual != expected,
            NumericOp::LessThan => actual < expected,
            NumericOp::LessOrEqual => actual <= expected,
            NumericOp::GreaterThan => actual > expected,
            NumericOp::GreaterOrEqual => actual >= expected,
        }
    }
}

/// String comparison operators. All comparisons are ordinal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StringOp {
    Equals,
    NotEquals,
    Contains,
    StartsWith,
    EndsWith,
}

impl StringOp {
    pub fn label(self) -> &'static str {
        match self {
            StringOp::Equals => "equals",
            StringOp::NotEquals => "not equals",
            StringOp::Contains => "contains",
            StringOp::StartsWith => "starts with",
            StringOp::EndsWith => "ends with",
        }
    }

    fn holds(self, actual: &str, expected: &str) -> bool {
        match self {
            StringOp::Equals => actual == expected,
            StringOp::NotEquals => actual != expected,
            StringOp::Contains => actual.contains(expected),
            StringOp::StartsWith => actual.starts_with(expected),
            StringOp::EndsWith => actual.ends_with(expected),
        }
    }
}

/// A typed numeric operand. The field must carry the same tag kind.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Operand {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
}

impl Operand {
    pub fn kind(&self) -> TagKind {
        match self {
            Operand::Byte(_) => TagKind::Byte,
            Operand::Short(_) => TagKind::Short,
            Operand::Int(_) => TagKind::Int,
            Operand::Long(_) => TagKind::Long,
            Operand::Float(_) => TagKind::Float,
            Operand::Double(_) => TagKind::Double,
        }
    }

    fn compare(&self, op: NumericOp, value: &NodeValue) -> bool {
        match (self, value) {
            (Operand::Byte(e), NodeValue::Byte(a)) => op.holds(a, e),
            (Operand::Short(e), NodeValue::Short(a)) => op.holds(a, e),
            (Operand::Int(e), NodeValue::Int(a)) => op.holds(a, e),
            (Operand::Long(e), NodeValue::Long(a)) => op.holds(a, e),
            (Operand::Float(e), NodeValue::Float(a)) => op.holds(a, e),
            (Operand::Double(e), NodeValue::Double(a)) => op.holds(a, e),
            _ => false,
        }
    }
}

impl fmt::Display for Operand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operand::Byte(v) => write!(f, "{v}"),
            Operand::Short(v) => write!(f, "{v}"),
            Operand::Int(v) => write!(f, "{v}"),
            Operand::Long(v) => write!(f, "{v}"),
            Operand::Float(v) => write!(f, "{v}"),
            Operand::Double(v) => write!(f, "{v}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueRule {
    pub name: String,
    pub operand: Operand,
    pub op: NumericOp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StringRule {
    pub name: String,
    pub value: String,
    pub op: StringOp,
}

/// Matches any scalar field by its stringified value. `name` is a glob
/// pattern (`*`, `?`, `[..]`); `None` accepts every field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WildcardRule {
    pub name: Option<String>,
    pub value: String,
    pub op: StringOp,
}

impl WildcardRule {
    fn name_matches(&self, name: &str) -> bool {
        match &self.name {
            None => true,
            Some(pattern) => match glob::Pattern::new(pattern) {
                Ok(p) => p.matches(name),
                Err(_) => pattern == name,
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rule {
    /// Top of a rule tree. Matches when every child does; empty matches all.
    Root(Vec<Rule>),
    /// Matches when any child does.
    Union(Vec<Rule>),
    /// Matches when every child does.
    Intersect(Vec<Rule>),
    Value(ValueRule),
    String(StringRule),
    Wildcard(WildcardRule),
}

/// A named value inside a compound, as seen by the matcher. `id` is what
/// gets collected for matching fields.
#[derive(Debug, Clone, Copy)]
pub struct Field<'a, I> {
    pub id: I,
    pub name: &'a str,
    pub value: &'a NodeValue,
}

impl Rule {
    // ── Builders ────────────────────────────────────────────────

    pub fn root(children: Vec<Rule>) -> Rule {
        Rule::Root(children)
    }

    pub fn union(children: Vec<Rule>) -> Rule {
        Rule::Union(children)
    }

    pub fn intersect(children: Vec<Rule>) -> Rule {
        Rule::Intersect(children)
    }

    pub fn numeric(name: &str, op: NumericOp, operand: Operand) -> Rule {
        Rule::Value(ValueRule {
            name: name.to_string(),
            operand,
            op,
        })
    }

    pub fn byte(name: &str, op: NumericOp, value: i8) -> Rule {
        Rule::numeric(name, op, Operand::Byte(value))
    }

    pub fn short(name: &str, op: NumericOp, value: i16) -> Rule {
        Rule::numeric(name, op, Operand::Short(value))
    }

    pub fn int(name: &str, op: NumericOp, value: i32) -> Rule {
        Rule::numeric(name, op, Operand::Int(value))
    }

    pub fn long(name: &str, op: NumericOp, value: i64) -> Rule {
        Rule::numeric(name, op, Operand::Long(value))
    }

    pub fn float(name: &str, op: NumericOp, value: f32) -> Rule {
        Rule::numeric(name, op, Operand::Float(value))
    }

    pub fn double(name: &str, op: NumericOp, value: f64) -> Rule {
        Rule::numeric(name, op, Operand::Double(value))
    }

    pub fn string(name: &str, op: StringOp, value: &str) -> Rule {
        Rule::String(StringRule {
            name: name.to_string(),
            value: value.to_string(),
            op,
        })
    }

    pub fn wildcard(name: Option<&str>, op: StringOp, value: &str) -> Rule {
        Rule::Wildcard(WildcardRule {
            name: name.map(str::to_string),
            value: value.to_string(),
            op,
        })
    }

    // ── Editing ─────────────────────────────────────────────────

    pub fn is_group(&self) -> bool {
        matches!(self, Rule::Root(_) | Rule::Union(_) | Rule::Intersect(_))
    }

    pub fn children(&self) -> &[Rule] {
        match self {
            Rule::Root(c) | Rule::Union(c) | Rule::Intersect(c) => c,
            _ => &[],
        }
    }

    /// Append a child rule. Leaf rules hand the rule back unchanged.
    pub fn push(&mut self, rule: Rule) -> std::result::Result<(), Rule> {
        match self {
            Rule::Root(c) | Rule::Union(c) | Rule::Intersect(c) => {
                c.push(rule);
                Ok(())
            }
            _ => Err(rule),
        }
    }

    pub fn remove(&mut self, index: usize) -> Option<Rule> {
        match self {
            Rule::Root(c) | Rule::Union(c) | Rule::Intersect(c) if index < c.len() => {
                Some(c.remove(index))
            }
            _ => None,
        }
    }

    // ── Evaluation ──────────────────────────────────────────────

    /// Evaluate against one compound's immediate fields.
    ///
    /// Every field satisfying an evaluated leaf rule is appended to `out`
    /// in child-rule-then-field order, once, whether or not the enclosing
    /// group matches. Intersect stops at its first failing child, so leaves
    /// after it are not evaluated. Two leaf rules may be satisfied by the
    /// same field; an Intersect does not require a distinct field per rule.
    pub fn matches<I: Copy + PartialEq>(&self, fields: &[Field<'_, I>], out: &mut Vec<I>) -> bool {
        match self {
            Rule::Root(children) | Rule::Intersect(children) => {
                children.iter().all(|child| child.matches(fields, out))
            }
            Rule::Union(children) => {
                // No short-circuit: every matching leaf is collected
                children
                    .iter()
                    .fold(false, |any, child| child.matches(fields, out) || any)
            }
            _ => {
                let mut any = false;
                for field in fields.iter().filter(|f| self.leaf_matches(f)) {
                    any = true;
                    if !out.contains(&field.id) {
                        out.push(field.id);
                    }
                }
                any
            }
        }
    }

    /// Whether a leaf rule accepts a single field. Groups never do.
    pub fn leaf_matches<I>(&self, field: &Field<'_, I>) -> bool {
        match self {
            Rule::Value(rule) => {
                field.name == rule.name && rule.operand.compare(rule.op, field.value)
            }
            Rule::String(rule) => match field.value {
                NodeValue::String(actual) => {
                    field.name == rule.name && rule.op.holds(actual, &rule.value)
                }
                _ => false,
            },
            Rule::Wildcard(rule) => {
                let kind = field.value.kind();
                let scalar = kind.is_numeric() || kind == TagKind::String;
                scalar
                    && rule.name_matches(field.name)
                    && rule.op.holds(&field.value.to_string(), &rule.value)
            }
            Rule::Root(_) | Rule::Union(_) | Rule::Intersect(_) => false,
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rule::Root(_) => write!(f, "Match all of"),
            Rule::Intersect(_) => write!(f, "All of"),
            Rule::Union(_) => write!(f, "Any of"),
            Rule::Value(r) => write!(f, "{} {} {}", r.name, r.op.symbol(), r.operand),
            Rule::String(r) => write!(f, "{} {} '{}'", r.name, r.op.label(), r.value),
            Rule::Wildcard(r) => write!(
                f,
                "{} {} '{}'",
                r.name.as_deref().unwrap_or("*"),
                r.op.label(),
                r.value
            ),
        }
    }
}
