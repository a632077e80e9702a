//! Page text clean-up and batching ahead of extraction.

/// Default token budget for one extraction batch.
pub const DEFAULT_TOKEN_LIMIT: usize = 50_000;

/// Rough token count: one token per four characters.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count() / 4
}

/// Right-trim every line and remove the left margin shared by all
/// non-blank lines.
pub fn clean_page(page: &str) -> String {
    let lines: Vec<&str> = page.lines().map(str::trim_end).collect();
    let margin = lines
        .iter()
        .filter(|l| !l.is_empty())
        .map(|l| l.len() - l.trim_start().len())
        .min()
        .unwrap_or(0);

    let mut cleaned = lines
        .iter()
        .map(|l| strip_spaces(l, margin))
        .collect::<Vec<_>>()
        .join("\n")
        .trim()
        .to_string();
    cleaned.push('\n');
    cleaned
}

/// Strip up to `count` leading spaces; other leading whitespace is kept.
fn strip_spaces(line: &str, count: usize) -> &str {
    let spaces = line.bytes().take(count).take_while(|b| *b == b' ').count();
    &line[spaces..]
}

/// Clean `pages` and pack them into batches whose estimated token count
/// stays below `token_limit`. A page larger than the limit on its own gets
/// a batch to itself.
pub fn batch_pages<S: AsRef<str>>(pages: &[S], token_limit: usize) -> Vec<String> {
    let mut batches = Vec::new();
    let mut current = String::new();
    let mut tokens = 0usize;

    for page in pages {
        let page = clean_page(page.as_ref());
        let page_tokens = estimate_tokens(&page);
        if tokens + page_tokens >= token_limit && !current.is_empty() {
            batches.push(std::mem::take(&mut current));
            tokens = 0;
        }
        current.push_str(&page);
        tokens += page_tokens;
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

/// Reporting year of a disclosure whose first `<h1>` heading ends with the
/// publication year; disclosures report on the year before.
pub fn reporting_year_from_heading(html: &str) -> Option<i32> {
    let start = html.find("<h1")?;
    let rest = &html[start..];
    let end = rest.find("</h1")?;
    let heading = rest[..end].trim_end();
    let digits = heading.get(heading.len().checked_sub(4)?..)?;
    digits.parse::<i32>().ok().map(|year| year - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_page_removes_common_margin() {
        let page = "    Scope 1 emissions   \n\n      Total: 1200\n    Scope 2";
        assert_eq!(clean_page(page), "Scope 1 emissions\n\n  Total: 1200\nScope 2\n");
    }

    #[test]
    fn test_clean_blank_page() {
        assert_eq!(clean_page("   \n  "), "\n");
    }

    #[test]
    fn test_batches_respect_token_limit() {
        let page = "x".repeat(400); // 100 tokens once cleaned
        let pages = vec![page.clone(), page.clone(), page.clone()];
        let batches = batch_pages(&pages, 250);
        assert_eq!(batches.len(), 2);
        assert_eq!(estimate_tokens(&batches[0]), 200);
    }

    #[test]
    fn test_oversized_page_gets_own_batch() {
        let pages = vec!["y".repeat(2000), "z".repeat(8)];
        let batches = batch_pages(&pages, 100);
        assert_eq!(batches.len(), 2);
        assert!(batches[0].starts_with('y'));
    }

    #[test]
    fn test_reporting_year_from_heading() {
        assert_eq!(
            reporting_year_from_heading("<html><h1 class=\"t\">Climate Change 2023</h1>"),
            Some(2022)
        );
        assert_eq!(reporting_year_from_heading("<p>no heading</p>"), None);
        assert_eq!(reporting_year_from_heading("<h1>Report</h1>"), None);
    }
}
