//! URL rewriting and query splitting
//!
//! Rewrites run over the working URI before the query split, so a rule can
//! rewrite the query string too.

use crate::gateway::WorkingSet;

use regex::{Captures, Regex};

/// A pattern/template pair applied to the request path
///
/// An absent `search` matches everything, which makes the rule a catch-all
/// default. Order the specific rules first: only the first match ever fires.
#[derive(Debug, Clone)]
pub struct RewriteRule {
    pub search: Option<Regex>,
    pub replace: String
}

/// Applies the first matching rule to the working URI.
///
/// On a match the original URI is retained as `outer_uri` for external
/// reporting and the expanded replacement becomes the new working URI. At
/// most one rule fires.
pub fn apply(rules: &[RewriteRule], params: &mut WorkingSet) {
    for rule in rules {
        let matched = match &rule.search {
            Some(re) => re.captures(&params.uri),
            // Catch-all: the whole URI is the $0 group.
            None => {
                params.outer_uri = Some(params.uri.clone());
                params.uri = expand_catch_all(&rule.replace, &params.uri);
                return;
            }
        };

        if let Some(caps) = matched {
            let rewritten = expand(&rule.replace, &caps);
            params.outer_uri = Some(params.uri.clone());
            params.uri = rewritten;
            return;
        }
    }
}

/// Interpolates `$0..$n` tokens in a replacement template.
///
/// `$` followed by a run of ASCII digits names a capture group: `$0` is the
/// whole match, `$1` the first group, and so on. Unmatched optional groups
/// render as the empty string. A `$` with no digits after it is literal.
fn expand(template: &str, caps: &Captures) -> String {
    expand_with(template, |index| caps.get(index).map(|g| g.as_str()))
}

/// Template expansion for a rule with no pattern: only `$0` has a value.
fn expand_catch_all(template: &str, uri: &str) -> String {
    expand_with(template, |index| (index == 0).then_some(uri))
}

/// The shared scan behind both expansion modes.
///
/// A group index the lookup doesn't know, or a digit run too long to be an
/// index at all, renders as the empty string. Configured templates are not
/// trusted to be sane.
fn expand_with<'a, F>(template: &str, group: F) -> String
    where F: Fn(usize) -> Option<&'a str>
{
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(dollar) = rest.find('$') {
        result.push_str(&rest[..dollar]);
        rest = &rest[dollar + 1..];

        let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
        if digits == 0 {
            result.push('$');
            continue;
        }

        if let Some(text) = rest[..digits].parse().ok().and_then(&group) {
            result.push_str(text);
        }
        rest = &rest[digits..];
    }

    result.push_str(rest);
    result
}

/// Splits the working URI into a document path and a query string.
///
/// The first `?` is the split point. Any further `?` characters in the
/// remainder come from doubly-encoded clients and are normalized into `&`
/// rather than rejected. With no `?` present, `document` and `query` are
/// left untouched so configured pre-seeds survive.
pub fn split_query(params: &mut WorkingSet) {
    if let Some(split) = params.uri.find('?') {
        params.document = Some(params.uri[..split].to_string());
        params.query = Some(params.uri[split + 1..].replace('?', "&"));
    }
}
