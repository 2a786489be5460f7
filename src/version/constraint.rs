//! Composer version constraints
//!
//! Supports the constraint syntax found in `require` maps:
//! - `1.2.3`, `==1.2.3`, `=1.2.3` - exact match
//! - `^1.2.3` - compatible with version (>=1.2.3 <2.0.0)
//! - `~1.2.3` - next significant release (>=1.2.3 <1.3.0)
//! - `>=1.2.3`, `>1.2.3`, `<=1.2.3`, `<1.2.3`, `!=1.2.3` - comparison operators
//! - `1.2.*`, `1.*`, `*` - wildcards
//! - `1.0 - 2.0` - hyphen ranges
//! - `^1.0 || ^2.0`, `^1.0 | ^2.0` - OR
//! - `>=1.0 <2.0`, `>=1.0,<2.0` - AND
//!
//! Lower bounds that carry no explicit stability are `-dev` bounded, the same
//! way Composer expands them, so `^2.0` accepts `2.0.0-beta1`.

use std::fmt;

use crate::version::error::VersionError;
use crate::version::semver::{NormalizedVersion, PartialVersion};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// A single comparison against a bound, or a term no tagged release can match
#[derive(Debug, Clone, PartialEq, Eq)]
enum Term {
    Compare(Op, NormalizedVersion),
    Never,
}

impl Term {
    fn matches(&self, version: &NormalizedVersion) -> bool {
        match self {
            Term::Compare(op, bound) => match op {
                Op::Eq => version == bound,
                Op::Ne => version != bound,
                Op::Lt => version < bound,
                Op::Le => version <= bound,
                Op::Gt => version > bound,
                Op::Ge => version >= bound,
            },
            Term::Never => false,
        }
    }
}

/// Parsed constraint: OR of AND-groups. An empty AND-group matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Constraint {
    alternatives: Vec<Vec<Term>>,
}

impl Constraint {
    pub fn parse(spec: &str) -> Result<Self, VersionError> {
        let spec = spec.trim();
        if spec.is_empty() {
            return Err(VersionError::InvalidConstraint(spec.to_string()));
        }

        let alternatives = spec
            .split('|')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(|part| parse_and_group(part).ok_or_else(|| invalid(spec)))
            .collect::<Result<Vec<_>, _>>()?;

        if alternatives.is_empty() {
            return Err(invalid(spec));
        }

        Ok(Self { alternatives })
    }

    pub fn matches(&self, version: &NormalizedVersion) -> bool {
        self.alternatives
            .iter()
            .any(|group| group.iter().all(|term| term.matches(version)))
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups: Vec<String> = self
            .alternatives
            .iter()
            .map(|group| {
                if group.is_empty() {
                    return "*".to_string();
                }
                group
                    .iter()
                    .map(|term| match term {
                        Term::Compare(op, v) => format!("{}{}", op_str(*op), v),
                        Term::Never => "!".to_string(),
                    })
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect();
        f.write_str(&groups.join(" || "))
    }
}

fn op_str(op: Op) -> &'static str {
    match op {
        Op::Eq => "==",
        Op::Ne => "!=",
        Op::Lt => "<",
        Op::Le => "<=",
        Op::Gt => ">",
        Op::Ge => ">=",
    }
}

fn invalid(spec: &str) -> VersionError {
    VersionError::InvalidConstraint(spec.to_string())
}

/// Check whether `version` satisfies the constraint expression
pub fn satisfies(version: &str, constraint: &str) -> Result<bool, VersionError> {
    let version = NormalizedVersion::parse(version)?;
    Ok(Constraint::parse(constraint)?.matches(&version))
}

/// `>=` bounds on the host application are read as caret bounds
pub fn tighten(constraint: &str) -> String {
    constraint.replace(">=", "^")
}

const OPERATORS: &[&str] = &["<>", "!=", ">=", "<=", "==", ">", "<", "=", "^", "~"];

/// Split an AND-group into atoms: commas and whitespace separate atoms,
/// a lone operator binds to the next token, and `a - b` stays one hyphen range.
fn split_atoms(group: &str) -> Vec<String> {
    let tokens: Vec<&str> = group
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|t| !t.is_empty())
        .collect();

    let mut atoms: Vec<String> = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i];
        if OPERATORS.contains(&token) && i + 1 < tokens.len() {
            atoms.push(format!("{}{}", token, tokens[i + 1]));
            i += 2;
        } else if token == "-" && !atoms.is_empty() && i + 1 < tokens.len() {
            let from = atoms.pop().unwrap_or_default();
            atoms.push(format!("{} - {}", from, tokens[i + 1]));
            i += 2;
        } else {
            atoms.push(token.to_string());
            i += 1;
        }
    }
    atoms
}

fn parse_and_group(group: &str) -> Option<Vec<Term>> {
    let mut terms = Vec::new();
    for atom in split_atoms(group) {
        terms.extend(parse_atom(&atom)?);
    }
    Some(terms)
}

fn parse_atom(atom: &str) -> Option<Vec<Term>> {
    // Stability flags (`^1.0@beta`, `@dev`) only affect resolution, not matching
    let atom = match atom.split_once('@') {
        Some((left, _)) => left.trim(),
        None => atom.trim(),
    };

    if atom.is_empty() || atom == "*" || atom.eq_ignore_ascii_case("x") {
        return Some(Vec::new());
    }

    if is_dev_branch(atom) {
        return Some(vec![Term::Never]);
    }

    if let Some((from, to)) = atom.split_once(" - ") {
        return parse_hyphen(from.trim(), to.trim());
    }

    if let Some(rest) = atom.strip_prefix('^') {
        return parse_caret(rest.trim());
    }

    if let Some(rest) = atom.strip_prefix('~') {
        return parse_tilde(rest.trim());
    }

    if let Some(terms) = parse_wildcard(atom) {
        return Some(terms);
    }

    let (op, rest) = if let Some(rest) = atom.strip_prefix("<>") {
        (Op::Ne, rest)
    } else if let Some(rest) = atom.strip_prefix("!=") {
        (Op::Ne, rest)
    } else if let Some(rest) = atom.strip_prefix(">=") {
        (Op::Ge, rest)
    } else if let Some(rest) = atom.strip_prefix("<=") {
        (Op::Le, rest)
    } else if let Some(rest) = atom.strip_prefix("==") {
        (Op::Eq, rest)
    } else if let Some(rest) = atom.strip_prefix('>') {
        (Op::Gt, rest)
    } else if let Some(rest) = atom.strip_prefix('<') {
        (Op::Lt, rest)
    } else if let Some(rest) = atom.strip_prefix('=') {
        (Op::Eq, rest)
    } else {
        (Op::Eq, atom)
    };

    let partial = PartialVersion::parse(rest.trim()).ok()?;
    let mut bound = partial.to_normalized();
    if matches!(op, Op::Lt | Op::Ge) && partial.modifier.is_none() {
        bound = bound.as_dev();
    }
    Some(vec![Term::Compare(op, bound)])
}

/// Lower bound for range forms: `-dev` unless a stability was written
fn lower_bound(partial: &PartialVersion) -> NormalizedVersion {
    let version = partial.to_normalized();
    if partial.modifier.is_none() {
        version.as_dev()
    } else {
        version
    }
}

fn range(lower: NormalizedVersion, upper: NormalizedVersion) -> Vec<Term> {
    vec![
        Term::Compare(Op::Ge, lower),
        Term::Compare(Op::Lt, upper.as_dev()),
    ]
}

fn parse_caret(rest: &str) -> Option<Vec<Term>> {
    let partial = PartialVersion::parse(rest).ok()?;
    let base = partial.to_normalized();
    let [major, minor, _, _] = base.segments();
    let given = partial.segments.len();

    // ^1.2.3 -> <2.0.0, ^0.3 -> <0.4.0, ^0.0.3 -> <0.0.4
    let position = if major != 0 || given == 1 {
        1
    } else if minor != 0 || given == 2 {
        2
    } else {
        3
    };

    Some(range(lower_bound(&partial), base.bump(position)?))
}

fn parse_tilde(rest: &str) -> Option<Vec<Term>> {
    let partial = PartialVersion::parse(rest).ok()?;
    let base = partial.to_normalized();
    // ~1 and ~1.2 -> <2.0, ~1.2.3 -> <1.3, ~1.2.3.4 -> <1.2.4
    let position = partial.segments.len().saturating_sub(1).max(1);
    Some(range(lower_bound(&partial), base.bump(position)?))
}

fn parse_wildcard(atom: &str) -> Option<Vec<Term>> {
    let atom = atom.strip_prefix('v').unwrap_or(atom);
    let parts: Vec<&str> = atom.split('.').collect();
    let last = parts.last()?;
    if parts.len() < 2 || !(*last == "*" || last.eq_ignore_ascii_case("x")) {
        return None;
    }

    let numbers = parts[..parts.len() - 1]
        .iter()
        .map(|p| p.parse::<u64>().ok())
        .collect::<Option<Vec<u64>>>()?;
    let segment = |i: usize| numbers.get(i).copied().unwrap_or(0);
    let base = NormalizedVersion::new(segment(0), segment(1), segment(2), segment(3));

    Some(range(base.as_dev(), base.bump(numbers.len())?))
}

fn parse_hyphen(from: &str, to: &str) -> Option<Vec<Term>> {
    let from = PartialVersion::parse(from).ok()?;
    let to = PartialVersion::parse(to).ok()?;

    let upper = if to.segments.len() >= 3 || to.modifier.is_some() {
        Term::Compare(Op::Le, to.to_normalized())
    } else {
        Term::Compare(
            Op::Lt,
            to.to_normalized().bump(to.segments.len())?.as_dev(),
        )
    };

    Some(vec![Term::Compare(Op::Ge, lower_bound(&from)), upper])
}

/// True when the raw constraint pins a dev branch (`dev-main`)
pub fn is_dev_branch(constraint: &str) -> bool {
    constraint.trim().to_ascii_lowercase().starts_with("dev-")
}
