//! Normalization of the lightweight markup used by search results.
//!
//! Backend search results arrive with markdown-ish conventions: heading
//! markers and asterisk bullets. The live-call overlay and the permanent
//! transcript both render through this one function so the two views of the
//! same content never diverge: headings become bold, `*`/`-` bullets become
//! `•` bullets, everything else passes through unchanged.

/// Normalizes one block of search-result markup. Applied identically to the
/// running live accumulator and to the final committed line.
pub fn normalize_markup(input: &str) -> String {
    input
        .lines()
        .map(normalize_line)
        .collect::<Vec<_>>()
        .join("\n")
}

fn normalize_line(line: &str) -> String {
    let indent_len = line.len() - line.trim_start().len();
    let (indent, rest) = line.split_at(indent_len);

    if let Some(heading) = strip_heading(rest) {
        return format!("{indent}**{}**", heading.trim());
    }
    if let Some(item) = rest.strip_prefix("* ").or_else(|| rest.strip_prefix("- ")) {
        return format!("{indent}• {item}");
    }
    line.to_string()
}

/// Strips a leading run of 1–6 `#` followed by a space, returning the
/// heading text.
fn strip_heading(line: &str) -> Option<&str> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if (1..=6).contains(&hashes) {
        line[hashes..].strip_prefix(' ')
    } else {
        None
    }
}
