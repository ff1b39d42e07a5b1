//! Rule evaluation against the run context.
//!
//! Each job carries an ordered list of [`RuleClause`]s. Evaluation is
//! first-match-wins: the first clause whose predicate holds (and whose
//! `changes` filter, if any, matches at least one changed path) decides
//! how the job participates; a list with no matching clause excludes the
//! job from the run.

use crate::context::{Context, PipelineSource};
use crate::glob::PathGlob;
use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// How a job participates in a run once a clause matches.
#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    JsonSchema,
)]
#[serde(rename_all = "snake_case")]
pub enum When {
    #[default]
    OnSuccess,
    Never,
    Manual,
    Always,
}

/// Typed condition tree, compiled from the configuration's condition
/// strings and evaluated against a [`Context`].
#[derive(Debug, Clone)]
pub enum Predicate {
    Always,
    IsTag,
    RefEquals(String),
    RefMatches(Regex),
    SourceEquals(PipelineSource),
    MessageMatches(Regex),
    Not(Box<Predicate>),
    And(Vec<Predicate>),
    Or(Vec<Predicate>),
}

impl Predicate {
    pub fn evaluate(&self, ctx: &Context) -> bool {
        match self {
            Predicate::Always => true,
            Predicate::IsTag => ctx.is_tag(),
            Predicate::RefEquals(r) => ctx.git_ref() == r,
            Predicate::RefMatches(re) => re.is_match(ctx.git_ref()),
            Predicate::SourceEquals(s) => ctx.source() == *s,
            Predicate::MessageMatches(re) => re.is_match(ctx.commit_message()),
            Predicate::Not(p) => !p.evaluate(ctx),
            Predicate::And(ps) => ps.iter().all(|p| p.evaluate(ctx)),
            Predicate::Or(ps) => ps.iter().any(|p| p.evaluate(ctx)),
        }
    }
}

/// One ordered clause of a job's rule list.
#[derive(Debug, Clone)]
pub struct RuleClause {
    pub predicate: Predicate,
    /// When present, the clause only matches if at least one changed path
    /// matches one of these globs. A failed filter is a non-match of this
    /// clause, not an exclusion: evaluation continues with the next one.
    pub changes: Option<Vec<PathGlob>>,
    pub when: When,
}

impl RuleClause {
    fn matches(&self, ctx: &Context) -> bool {
        if !self.predicate.evaluate(ctx) {
            return false;
        }
        match &self.changes {
            None => true,
            Some(globs) => ctx
                .changed_paths()
                .iter()
                .any(|path| globs.iter().any(|g| g.matches(path))),
        }
    }
}

/// Outcome of evaluating a job's rule list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Include(When),
    Exclude,
}

/// Evaluate an ordered rule list, first match wins.
///
/// A matching `when: never` clause still short-circuits: the job is
/// excluded and later clauses are never consulted.
pub fn evaluate(rules: &[RuleClause], ctx: &Context) -> Decision {
    for clause in rules {
        if clause.matches(ctx) {
            return match clause.when {
                When::Never => Decision::Exclude,
                when => Decision::Include(when),
            };
        }
    }
    Decision::Exclude
}
