//! Join hints.
//!
//! Hints come from `/*+ ... */` comments attached to joins and from the `join_hints` session
//! variable; `disable_merge_join` turns into [`Hint::NoMergeJoin`]. A hint never adds an
//! alternative. It restricts which alternative may win a group, and when nothing in a group
//! satisfies the applicable hints the unrestricted winner is kept.

use std::collections::BTreeSet;

use log::debug;
use strum_macros::{Display, EnumString};

use crate::memo::{JoinOp, JoinRel, RelProps};
use crate::plan::JoinKind;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Display, EnumString)]
pub enum HintOp {
    #[strum(serialize = "LOOKUP_JOIN")]
    Lookup,
    #[strum(serialize = "HASH_JOIN")]
    Hash,
    #[strum(serialize = "MERGE_JOIN")]
    Merge,
    #[strum(serialize = "INNER_JOIN")]
    Inner,
    #[strum(serialize = "SEMI_JOIN")]
    Semi,
    #[strum(serialize = "ANTI_JOIN")]
    Anti,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum Hint {
    /// Relations must be joined in this order, left to right.
    JoinOrder(Vec<String>),
    /// The join of `left` and `right` must use `op`.
    JoinOp {
        op: HintOp,
        left: String,
        right: String,
    },
    NoMergeJoin,
}

impl Hint {
    /// Parses every hint in `text`, with or without the surrounding `/*+ */`. Unknown or
    /// malformed hints are skipped.
    pub fn parse(text: &str) -> Vec<Hint> {
        let body = text.trim();
        let body = body.strip_prefix("/*+").unwrap_or(body);
        let body = body.strip_suffix("*/").unwrap_or(body);

        let mut hints = vec![];
        let mut rest = body.trim_start();
        while !rest.is_empty() {
            let name_len = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(rest.len());
            if name_len == 0 {
                let skip = rest.chars().next().map_or(1, char::len_utf8);
                rest = rest[skip..].trim_start();
                continue;
            }
            let name = rest[..name_len].to_ascii_uppercase();
            rest = rest[name_len..].trim_start();

            let mut args = vec![];
            if let Some(after) = rest.strip_prefix('(') {
                match after.find(')') {
                    Some(end) => {
                        args = after[..end]
                            .split(',')
                            .map(|a| a.trim().to_lowercase())
                            .filter(|a| !a.is_empty())
                            .collect();
                        rest = after[end + 1..].trim_start();
                    }
                    None => break,
                }
            }

            match Hint::from_parts(&name, args) {
                Some(hint) => hints.push(hint),
                None => debug!("ignoring join hint {}", name),
            }
        }
        hints
    }

    fn from_parts(name: &str, mut args: Vec<String>) -> Option<Hint> {
        let op = match name {
            "JOIN_ORDER" => return (!args.is_empty()).then(|| Hint::JoinOrder(args)),
            "NO_MERGE_JOIN" => return args.is_empty().then(|| Hint::NoMergeJoin),
            _ => name.parse::<HintOp>().ok()?,
        };
        if args.len() != 2 {
            return None;
        }
        let right = args.pop()?;
        let left = args.pop()?;
        Some(Hint::JoinOp { op, left, right })
    }

    /// Whether the hint says anything about a group exposing `relations`.
    pub fn applies_to(&self, relations: &BTreeSet<String>) -> bool {
        match self {
            Hint::JoinOrder(order) => order.iter().filter(|t| relations.contains(*t)).count() > 1,
            Hint::JoinOp { left, right, .. } => {
                relations.contains(left) && relations.contains(right)
            }
            Hint::NoMergeJoin => false,
        }
    }

    /// Whether `join`, whose children expose `left` and `right`, satisfies the hint.
    pub fn satisfied_by(&self, join: &JoinRel, left: &RelProps, right: &RelProps) -> bool {
        let (l, r) = (left.relation_names(), right.relation_names());
        match self {
            Hint::JoinOrder(order) => {
                let position = |name: &String| order.iter().position(|o| o == name);
                let last_left = l.iter().filter_map(position).max();
                let first_right = r.iter().filter_map(position).min();
                match (last_left, first_right) {
                    (Some(last), Some(first)) => last < first,
                    _ => true,
                }
            }
            Hint::JoinOp {
                op,
                left: hl,
                right: hr,
            } => {
                // the hint concerns a join further down
                if !(l.contains(hl) && r.contains(hr)) {
                    return !(l.contains(hr) && r.contains(hl));
                }
                match op {
                    HintOp::Lookup => {
                        matches!(join.op, JoinOp::Lookup(_) | JoinOp::ConcatLookup(_))
                    }
                    HintOp::Hash => matches!(join.op, JoinOp::Hash { .. }),
                    HintOp::Merge => matches!(join.op, JoinOp::Merge { .. }),
                    HintOp::Inner => {
                        matches!(join.op, JoinOp::NestedLoop)
                            && matches!(join.kind, JoinKind::Inner | JoinKind::Cross)
                    }
                    HintOp::Semi => join.kind == JoinKind::Semi,
                    HintOp::Anti => join.kind == JoinKind::Anti,
                }
            }
            Hint::NoMergeJoin => !matches!(join.op, JoinOp::Merge { .. }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hint_comment() {
        let hints = Hint::parse("/*+ JOIN_ORDER(b, a) lookup_join(A,B) no_merge_join bogus(x) */");
        assert_eq!(
            hints,
            vec![
                Hint::JoinOrder(vec!["b".into(), "a".into()]),
                Hint::JoinOp {
                    op: HintOp::Lookup,
                    left: "a".into(),
                    right: "b".into()
                },
                Hint::NoMergeJoin,
            ]
        );
    }

    #[test]
    fn test_parse_rejects_bad_arity() {
        assert!(Hint::parse("HASH_JOIN(a)").is_empty());
        assert!(Hint::parse("JOIN_ORDER()").is_empty());
        assert!(Hint::parse("").is_empty());
    }
}
