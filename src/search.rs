use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

use crate::graph::{Category, Graph, Node, RiskLevel};

#[derive(Clone, Debug, Default)]
pub struct SearchQuery {
    pub text: String,
    pub risk: Option<RiskLevel>,
    pub category: Option<Category>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchHit {
    pub index: usize,
    pub score: i64,
}

fn fuzzy_match_score(matcher: &SkimMatcherV2, text: &str, query: &str) -> Option<i64> {
    matcher
        .fuzzy_match(text, query)
        .or_else(|| matcher.fuzzy_match(&text.to_ascii_lowercase(), &query.to_ascii_lowercase()))
}

fn node_score(matcher: &SkimMatcherV2, node: &Node, query: &str) -> Option<i64> {
    let address = node.metadata.get("address").and_then(|value| value.as_str());
    [Some(node.id.as_str()), node.label.as_deref(), address]
        .into_iter()
        .flatten()
        .filter_map(|text| fuzzy_match_score(matcher, text, query))
        .max()
}

/// Best matches first; ties keep graph order. An empty text matches every node that passes the filters.
pub fn search_nodes(graph: &Graph, query: &SearchQuery, limit: usize) -> Vec<SearchHit> {
    let matcher = SkimMatcherV2::default();
    let text = query.text.trim();

    let mut hits = graph
        .nodes()
        .iter()
        .enumerate()
        .filter(|(_, node)| query.risk.is_none_or(|risk| node.risk_level == Some(risk)))
        .filter(|(_, node)| query.category.is_none_or(|category| node.category == category))
        .filter_map(|(index, node)| {
            let score = if text.is_empty() {
                0
            } else {
                node_score(&matcher, node, text)?
            };
            Some(SearchHit { index, score })
        })
        .collect::<Vec<_>>();

    hits.sort_by(|a, b| b.score.cmp(&a.score).then(a.index.cmp(&b.index)));
    hits.truncate(limit);
    hits
}
