//! Comment bodies from a model's message template.
//!
//! Recognised placeholders: `{unit_name}`, `{new_path}`, `{line}` and
//! `{probability}` (two decimals). Anything else is copied verbatim.

use crate::models::RecommendationCandidate;

pub fn render(template: &str, candidate: &RecommendationCandidate) -> String {
    let mut out = String::with_capacity(template.len() + candidate.unit_name.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        let Some(close) = tail.find('}') else {
            out.push_str(tail);
            return out;
        };
        match &tail[1..close] {
            "unit_name" => out.push_str(&candidate.unit_name),
            "new_path" => out.push_str(&candidate.new_path),
            "line" => out.push_str(&candidate.line_number.to_string()),
            "probability" => out.push_str(&format!("{:.2}", candidate.probability())),
            _ => out.push_str(&tail[..=close]),
        }
        rest = &tail[close + 1..];
    }
    out.push_str(rest);
    out
}
