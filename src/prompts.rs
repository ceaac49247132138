use crate::data_models::{ScrapedContent, SearchResultRecord};

/// Cuts `text` to at most `max_chars` characters on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Replaces every run of whitespace (newlines included) with a single space.
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Numbered listing of search results as shown to the model.
pub fn format_results(results: &[SearchResultRecord], snippet_chars: usize) -> String {
    results
        .iter()
        .map(|r| {
            format!(
                "{}. Title: {}\n   Snippet: {}...\n   URL: {}\n",
                r.rank,
                or_na(&r.title),
                truncate_chars(or_na(&r.snippet), snippet_chars),
                or_na(&r.url),
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn or_na(s: &str) -> &str {
    if s.is_empty() { "N/A" } else { s }
}

/// Concatenates scraped pages, each flattened onto a single line.
pub fn format_scraped_content(content: &ScrapedContent) -> String {
    content
        .pages
        .iter()
        .map(|p| format!("Content from {}:\n{}\n", p.url, collapse_whitespace(&p.text)))
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn query_prompt(user_query: &str) -> String {
    format!(
        r#"
Based on the following user question, formulate a concise and effective search query:
"{user_query}"
Your task:
1. Create a search query of 2-5 words that will yield relevant results.
2. Determine if a specific time range is needed for the search.
Time range options:
- 'd': Limit results to the past day. Use for very recent events or rapidly changing information.
- 'w': Limit results to the past week. Use for recent events or topics with frequent updates.
- 'm': Limit results to the past month. Use for relatively recent information or ongoing events.
- 'y': Limit results to the past year. Use for annual events or information that changes yearly.
- 'none': No time limit. Use for historical information or topics not tied to a specific time frame.
Respond in the following format:
Search query: [Your 2-5 word query]
Time range: [d/w/m/y/none]
Do not provide any additional information or explanation.
"#
    )
}

pub fn selection_prompt(
    user_query: &str,
    results: &[SearchResultRecord],
    snippet_chars: usize,
) -> String {
    format!(
        r#"
Given the following search results for the user's question: "{user_query}"
Select the 2 most relevant results to scrape and analyze. Explain your reasoning for each selection.

Search Results:
{results}

Instructions:
1. You MUST select exactly 2 result numbers from the search results.
2. Choose the results that are most likely to contain comprehensive and relevant information to answer the user's question.
3. Provide a brief reason for each selection.

You MUST respond using EXACTLY this format and nothing else:

Selected Results: [Two numbers corresponding to the selected results]
Reasoning: [Your reasoning for the selections]
"#,
        results = format_results(results, snippet_chars),
    )
}

pub fn evaluation_prompt(user_query: &str, content: &ScrapedContent) -> String {
    format!(
        r#"
Evaluate if the following scraped content contains sufficient information to answer the user's question comprehensively:

User's question: "{user_query}"

Scraped Content:
{content}

Your task:
1. Determine if the scraped content provides enough relevant and detailed information to answer the user's question thoroughly.
2. If the information is sufficient, decide to 'answer'. If more information or clarification is needed, decide to 'refine' the search.

Respond using EXACTLY this format:
Evaluation: [Your evaluation of the scraped content]
Decision: [ONLY 'answer' if content is sufficient, or 'refine' if more information is needed]
"#,
        content = format_scraped_content(content),
    )
}

pub fn answer_prompt(user_query: &str, content: &ScrapedContent) -> String {
    format!(
        r#"
You are an AI assistant. Provide a comprehensive and detailed answer to the following question using ONLY the information provided in the scraped content. Do not include any references or mention any sources. Answer directly and thoroughly.

Question: "{user_query}"

Scraped Content:
{content}

Important Instructions:
1. Do not use phrases like "Based on the absence of selected results" or similar.
2. If the scraped content does not contain enough information to answer the question, say so explicitly and explain what information is missing.
3. Provide as much relevant detail as possible from the scraped content.

Answer:
"#,
        content = format_scraped_content(content),
    )
}

pub fn best_effort_prompt(user_query: &str) -> String {
    format!(
        r#"
After multiple search attempts, we couldn't find a fully satisfactory answer to the user's question: "{user_query}"

Please provide the best possible answer you can, acknowledging any limitations or uncertainties.
If appropriate, suggest ways the user might refine their question or where they might find more information.

Respond in a clear, concise, and informative manner.
"#
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("hello", 10), "hello");
        assert_eq!(truncate_chars("hello", 3), "hel");
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("", 4), "");
    }

    #[test]
    fn test_collapse_whitespace() {
        assert_eq!(collapse_whitespace("  a \n\n b\t c "), "a b c");
        assert_eq!(collapse_whitespace("\n\t"), "");
    }

    #[test]
    fn test_format_results_numbers_and_truncates() {
        let results = vec![
            SearchResultRecord::new(
                1,
                "Mars".into(),
                "x".repeat(300),
                "https://nasa.gov/mars".into(),
            ),
            SearchResultRecord::new(2, "".into(), "".into(), "https://b.example".into()),
        ];
        let out = format_results(&results, 200);
        assert!(out.starts_with("1. Title: Mars\n"));
        assert!(out.contains(&format!("   Snippet: {}...\n", "x".repeat(200))));
        assert!(!out.contains(&"x".repeat(201)));
        assert!(out.contains("2. Title: N/A\n   Snippet: N/A...\n   URL: https://b.example\n"));
    }

    #[test]
    fn test_format_scraped_content_flattens_pages() {
        let mut content = ScrapedContent::default();
        content.insert("https://a.example".into(), "line one\n\nline   two".into());
        content.insert("https://b.example".into(), "other".into());
        assert_eq!(
            format_scraped_content(&content),
            "Content from https://a.example:\nline one line two\n\nContent from https://b.example:\nother\n"
        );
    }
}
