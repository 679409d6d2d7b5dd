// src/search/format.rs
// Progressive disclosure: render search hits at a chosen detail level,
// truncating to fit a token budget.

use crate::search::{DetailLevel, SearchHit};

/// Token-count estimate: `ceil(chars / 4)`. Crude but cheap, and matches
/// the order of magnitude real tokenizers produce for English/code text.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4)
}

/// Reserve left for the caller's own wrapping (headers, tool envelope)
/// when budgeting how many hits to render in full.
const RESERVE_TOKENS: usize = 100;

pub struct FormattedResults {
    pub text: String,
    pub truncated: bool,
    pub rendered_count: usize,
}

/// Render hits at the requested detail level, stopping before `budget`
/// tokens is exceeded. Always renders at least one hit if any are given,
/// even if that single hit alone exceeds the budget — a truncated
/// result is better than an empty one.
pub fn format_results(hits: &[SearchHit], level: DetailLevel, budget: usize) -> FormattedResults {
    let usable_budget = budget.saturating_sub(RESERVE_TOKENS).max(1);

    // A single full-view item (the `recall` single-id lookup path) that
    // overflows the budget is truncated in place rather than dropped
    // wholesale -- there is nothing else to fall back to.
    if level == DetailLevel::Full && hits.len() == 1 {
        let block = render_hit(1, &hits[0], level);
        if estimate_tokens(&block) > usable_budget {
            let max_chars = usable_budget.saturating_mul(4);
            let obs = &hits[0].observation;
            let title = obs.title.as_deref().unwrap_or("(untitled)");
            let header = format!("## {}\nid: {}\nkind: {}\ncreated: {}\n\n", title, obs.id, obs.kind, obs.created_at);
            let remaining_chars = max_chars.saturating_sub(header.chars().count());
            let body = format!("{header}{}", truncate_chars(&obs.content, remaining_chars));
            return FormattedResults {
                rendered_count: 1,
                text: body,
                truncated: true,
            };
        }
    }

    let mut rendered = Vec::new();
    let mut used = 0usize;

    for (idx, hit) in hits.iter().enumerate() {
        let block = render_hit(idx + 1, hit, level);
        let cost = estimate_tokens(&block);
        if !rendered.is_empty() && used + cost > usable_budget {
            break;
        }
        used += cost;
        rendered.push(block);
    }

    let truncated = rendered.len() < hits.len();
    FormattedResults {
        rendered_count: rendered.len(),
        text: rendered.join("\n\n"),
        truncated,
    }
}

fn render_hit(idx: usize, hit: &SearchHit, level: DetailLevel) -> String {
    let obs = &hit.observation;
    let title = obs.title.as_deref().unwrap_or("(untitled)");
    match level {
        DetailLevel::Compact => {
            let short_id = &obs.id[..obs.id.len().min(8)];
            let snippet = hit
                .snippet
                .clone()
                .unwrap_or_else(|| truncate_chars(&obs.content, 100));
            format!(
                "[{idx}] {short_id} | {title} | {:.3} | {snippet} | {}",
                hit.score,
                obs.created_at.format("%Y-%m-%d"),
            )
        }
        DetailLevel::Timeline => {
            format!(
                "- {} — {} ({})\n  {}",
                obs.created_at.format("%Y-%m-%d %H:%M"),
                title,
                obs.kind,
                hit.snippet.as_deref().unwrap_or(&truncate_chars(&obs.content, 160)),
            )
        }
        DetailLevel::Full => {
            format!(
                "## {}\nid: {}\nkind: {}\ncreated: {}\n\n{}",
                title, obs.id, obs.kind, obs.created_at, obs.content,
            )
        }
    }
}

fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max).collect();
        format!("{truncated}...")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::observations::Observation;
    use chrono::Utc;

    fn hit(id: &str, content_len: usize) -> SearchHit {
        SearchHit {
            observation: Observation {
                id: id.to_string(),
                project_hash: "proj-a".to_string(),
                session_id: None,
                kind: "note".to_string(),
                title: Some("Title".to_string()),
                content: "x".repeat(content_len),
                source: "host".to_string(),
                embedding: None,
                embedding_model: None,
                embedding_version: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
                deleted_at: None,
            },
            keyword_rank: Some(0),
            vector_rank: None,
            score: 1.0,
            snippet: None,
        }
    }

    #[test]
    fn token_estimate_matches_ceil_chars_over_four() {
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn truncates_when_over_budget() {
        let hits: Vec<SearchHit> = (0..20).map(|i| hit(&i.to_string(), 2000)).collect();
        let result = format_results(&hits, DetailLevel::Full, 500);
        assert!(result.truncated);
        assert!(result.rendered_count >= 1);
        assert!(result.rendered_count < hits.len());
    }

    #[test]
    fn always_renders_at_least_one_hit() {
        let hits = vec![hit("a", 10_000)];
        let result = format_results(&hits, DetailLevel::Full, 10);
        assert_eq!(result.rendered_count, 1);
    }

    #[test]
    fn single_full_view_hit_over_budget_is_truncated_in_place() {
        let hits = vec![hit("a", 10_000)];
        let result = format_results(&hits, DetailLevel::Full, 500);
        assert!(result.truncated);
        assert_eq!(result.rendered_count, 1);
        assert!(estimate_tokens(&result.text) <= 500);
    }

    #[test]
    fn compact_level_follows_the_pipe_delimited_shape() {
        let hits = vec![hit("abcd1234ef", 5000)];
        let result = format_results(&hits, DetailLevel::Compact, 2000);
        let parts: Vec<&str> = result.text.splitn(5, " | ").collect();
        assert_eq!(parts.len(), 5);
        assert!(parts[0].starts_with("[1] abcd1234"));
        assert_eq!(parts[1], "Title");
        assert!(parts[3].chars().count() <= 103);
    }
}
