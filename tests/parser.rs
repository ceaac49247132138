use sift::data_models::{Decision, PageSelection, SearchResultRecord, TimeRange};
use sift::parser::*;
use sift::prompts::format_results;

#[cfg(test)]
mod query_response_tests {
    use super::*;

    #[test]
    fn test_well_formed_response() {
        let text = "Search query: mars rover findings\nTime range: m";
        let (query, time_range) = parse_query_response(text, 100);
        assert_eq!(query, "mars rover findings");
        assert_eq!(time_range, TimeRange::Month);
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let text = "SEARCH QUERY: rust async\nTIME RANGE: W";
        let (query, time_range) = parse_query_response(text, 100);
        assert_eq!(query, "rust async");
        assert_eq!(time_range, TimeRange::Week);
    }

    #[test]
    fn test_range_key_alone_is_recognised() {
        let (_, time_range) = parse_query_response("Query: x\nRange: y", 100);
        assert_eq!(time_range, TimeRange::Year);
    }

    #[test]
    fn test_query_is_sanitised() {
        let text = "Search query: \"[latest]   'mars'\n";
        let (query, _) = parse_query_response(text, 100);
        assert_eq!(query, "latest mars");
    }

    #[test]
    fn test_query_is_truncated() {
        let text = format!("Search query: {}", "word ".repeat(50));
        let (query, _) = parse_query_response(&text, 100);
        assert!(query.chars().count() <= 100);
        assert!(query.starts_with("word word"));
        assert!(!query.ends_with(' '));
    }

    #[test]
    fn test_missing_query_line_yields_empty_query() {
        let (query, time_range) = parse_query_response("I think you should search for Mars.", 100);
        assert_eq!(query, "");
        assert_eq!(time_range, TimeRange::None);
    }

    #[test]
    fn test_unknown_time_range_defaults_to_none() {
        let (query, time_range) = parse_query_response("Search query: mars\nTime range: decade", 100);
        assert_eq!(query, "mars");
        assert_eq!(time_range, TimeRange::None);
    }

    #[test]
    fn test_surrounding_chatter_is_ignored() {
        let text = "Sure! Here is what you asked for.\n\nSearch query: perseverance rover\nTime range: none\nHope this helps";
        let (query, time_range) = parse_query_response(text, 100);
        assert_eq!(query, "perseverance rover");
        assert_eq!(time_range, TimeRange::None);
    }
}

#[cfg(test)]
mod time_range_tests {
    use super::*;

    #[test]
    fn test_valid_values_any_case() {
        assert_eq!(validate_time_range("d"), TimeRange::Day);
        assert_eq!(validate_time_range("W"), TimeRange::Week);
        assert_eq!(validate_time_range(" m "), TimeRange::Month);
        assert_eq!(validate_time_range("Y"), TimeRange::Year);
        assert_eq!(validate_time_range("NONE"), TimeRange::None);
    }

    #[test]
    fn test_invalid_values_default_to_none() {
        for value in ["", "day", "week", "[d/w/m/y/none]", "dd", "x", "1"] {
            assert_eq!(validate_time_range(value), TimeRange::None, "value {value:?}");
        }
    }
}

#[cfg(test)]
mod fallback_query_tests {
    use super::*;

    #[test]
    fn test_short_query_unchanged() {
        assert_eq!(fallback_query("mars rover", 5), "mars rover");
        assert_eq!(fallback_query("latest Mars rover findings", 5), "latest Mars rover findings");
    }

    #[test]
    fn test_exactly_five_words_unchanged() {
        assert_eq!(fallback_query("one two three four five", 5), "one two three four five");
    }

    #[test]
    fn test_long_query_keeps_first_five_tokens() {
        assert_eq!(
            fallback_query("what are the   latest findings from the Mars rover?", 5),
            "what are the latest findings"
        );
    }

    #[test]
    fn test_empty_query() {
        assert_eq!(fallback_query("   ", 5), "");
    }
}

#[cfg(test)]
mod page_selection_tests {
    use super::*;

    fn results(n: usize) -> Vec<SearchResultRecord> {
        (1..=n)
            .map(|i| {
                SearchResultRecord::new(
                    i,
                    format!("Result {i}"),
                    format!("About result {i}"),
                    format!("https://site{i}.example/page"),
                )
            })
            .collect()
    }

    fn selection(numbers: Vec<usize>) -> PageSelection {
        PageSelection {
            selected_result_numbers: numbers,
            reasoning: "because".to_string(),
        }
    }

    #[test]
    fn test_well_formed_response() {
        let parsed = parse_page_selection_response(
            "Selected Results: 1, 3\nReasoning: Both cover the rover's latest samples.",
        )
        .unwrap();
        assert_eq!(parsed.selected_result_numbers, vec![1, 3]);
        assert_eq!(parsed.reasoning, "Both cover the rover's latest samples.");
    }

    #[test]
    fn test_bracketed_and_markdown_response() {
        let parsed =
            parse_page_selection_response("**Selected Results:** [2] and [4]\n**Reasoning:** official sources")
                .unwrap();
        assert_eq!(parsed.selected_result_numbers, vec![2, 4]);
        assert_eq!(parsed.reasoning, "official sources");
    }

    #[test]
    fn test_missing_numbers_is_absent() {
        for text in [
            "Selected Results: none\nReasoning: nothing fits",
            "Selected Results:\nReasoning: empty",
            "Selected Results: [two, four]\nReasoning: words not numbers",
        ] {
            assert_eq!(parse_page_selection_response(text), None, "text {text:?}");
        }
    }

    #[test]
    fn test_missing_markers_is_absent() {
        assert_eq!(parse_page_selection_response("Reasoning: only reasoning"), None);
        assert_eq!(parse_page_selection_response("Selected Results: 1, 2"), None);
        assert_eq!(parse_page_selection_response(""), None);
        assert_eq!(parse_page_selection_response("I would pick 1 and 2."), None);
    }

    #[test]
    fn test_validate_requires_exactly_two() {
        assert!(validate_page_selection(&selection(vec![1, 2]), 5));
        assert!(!validate_page_selection(&selection(vec![1]), 5));
        assert!(!validate_page_selection(&selection(vec![1, 2, 3]), 5));
        assert!(!validate_page_selection(&selection(vec![]), 5));
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        assert!(!validate_page_selection(&selection(vec![0, 2]), 5));
        assert!(!validate_page_selection(&selection(vec![2, 6]), 5));
        assert!(validate_page_selection(&selection(vec![5, 1]), 5));
        assert!(!validate_page_selection(&selection(vec![1, 2]), 1));
    }

    #[test]
    fn test_formatted_results_round_trip() {
        let results = results(4);
        let listing = format_results(&results, 200);
        assert!(listing.contains("1. Title: Result 1"));
        assert!(listing.contains("3. Title: Result 3"));

        let parsed =
            parse_page_selection_response("Selected Results: 1, 3\nReasoning: best coverage")
                .unwrap();
        assert_eq!(parsed.selected_result_numbers, vec![1, 3]);
        assert!(validate_page_selection(&parsed, results.len()));

        let urls = selected_urls(&results, &parsed);
        assert_eq!(
            urls,
            vec!["https://site1.example/page", "https://site3.example/page"]
        );
    }
}

#[cfg(test)]
mod evaluation_tests {
    use super::*;

    #[test]
    fn test_answer_decision() {
        let evaluation = parse_evaluation_response(
            "Evaluation: The pages describe the findings in detail.\nDecision: answer",
        );
        assert_eq!(evaluation.text, "The pages describe the findings in detail.");
        assert_eq!(evaluation.decision, Some(Decision::Answer));
    }

    #[test]
    fn test_refine_decision_any_case_and_punctuation() {
        let evaluation = parse_evaluation_response("Evaluation: thin\nDecision: 'Refine'.");
        assert_eq!(evaluation.decision, Some(Decision::Refine));

        let evaluation = parse_evaluation_response("evaluation: ok\nDECISION: [ANSWER]");
        assert_eq!(evaluation.decision, Some(Decision::Answer));
    }

    #[test]
    fn test_ambiguous_decision_is_undecided() {
        for text in [
            "Evaluation: hmm\nDecision: maybe",
            "Evaluation: hmm\nDecision: answer or refine",
            "Evaluation: no decision line",
            "",
        ] {
            assert_eq!(parse_evaluation_response(text).decision, None, "text {text:?}");
        }
    }

    #[test]
    fn test_missing_evaluation_keeps_decision() {
        let evaluation = parse_evaluation_response("Decision: refine");
        assert_eq!(evaluation.text, "");
        assert_eq!(evaluation.decision, Some(Decision::Refine));
    }
}
