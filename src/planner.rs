//! Raw query string → search intent.

use regex::Regex;
use std::sync::OnceLock;

/// Parsed search request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Query as typed.
    pub raw: String,
    /// Domain from a leading `site:` operator.
    pub domain: Option<String>,
    /// Free text, trimmed; `None` when blank.
    pub expression: Option<String>,
}

/// Backend strategy selected for a query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryPlan {
    /// Free text restricted to one domain.
    DomainAndExpression {
        /// Domain filter.
        domain: String,
        /// Free text.
        expression: String,
    },
    /// Every page of one domain.
    DomainOnly {
        /// Domain filter.
        domain: String,
    },
    /// Free text across the corpus, one result per domain.
    ExpressionOnly {
        /// Free text.
        expression: String,
    },
    /// Nothing to search for.
    Empty,
}

fn grammar() -> &'static Regex {
    static GRAMMAR: OnceLock<Regex> = OnceLock::new();
    GRAMMAR.get_or_init(|| {
        Regex::new(r"^(site:(?P<domain>[^ ]+))?( ?(?P<query>.*))?").expect("query grammar compiles")
    })
}

/// Splits `raw` into its `site:` domain and free-text expression.
pub fn parse(raw: &str) -> Query {
    let captures = grammar().captures(raw);
    let group = |name: &str| {
        captures
            .as_ref()
            .and_then(|caps| caps.name(name))
            .map(|m| m.as_str().trim())
            .filter(|value| !value.is_empty())
            .map(str::to_string)
    };
    Query {
        raw: raw.to_string(),
        domain: group("domain"),
        expression: group("query"),
    }
}

impl From<Query> for QueryPlan {
    fn from(query: Query) -> Self {
        match (query.domain, query.expression) {
            (Some(domain), Some(expression)) => Self::DomainAndExpression { domain, expression },
            (Some(domain), None) => Self::DomainOnly { domain },
            (None, Some(expression)) => Self::ExpressionOnly { expression },
            (None, None) => Self::Empty,
        }
    }
}

/// Plans `raw` in one step.
pub fn plan(raw: &str) -> QueryPlan {
    parse(raw).into()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn site_operator_with_text() {
        assert_eq!(
            plan("site:example.com pasta carbonara"),
            QueryPlan::DomainAndExpression {
                domain: "example.com".into(),
                expression: "pasta carbonara".into(),
            }
        );
    }

    #[test]
    fn site_operator_alone() {
        assert_eq!(
            plan("site:example.com"),
            QueryPlan::DomainOnly {
                domain: "example.com".into()
            }
        );
        assert_eq!(
            plan("site:example.com    "),
            QueryPlan::DomainOnly {
                domain: "example.com".into()
            }
        );
    }

    #[test]
    fn free_text_is_trimmed() {
        assert_eq!(
            plan("  fresh pasta "),
            QueryPlan::ExpressionOnly {
                expression: "fresh pasta".into()
            }
        );
    }

    #[test]
    fn site_must_lead_the_query() {
        assert_eq!(
            plan("pasta site:example.com"),
            QueryPlan::ExpressionOnly {
                expression: "pasta site:example.com".into()
            }
        );
    }

    #[test]
    fn blank_queries_plan_nothing() {
        assert_eq!(plan(""), QueryPlan::Empty);
        assert_eq!(plan("   "), QueryPlan::Empty);
        assert_eq!(parse(" ").raw, " ");
    }
}
