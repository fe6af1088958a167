//! crates/conversation_analytics_core/src/references.rs
//!
//! Extracts the trailing citation block an assistant appends to its answers:
//!
//! ```text
//! > [1]. [Getting started](https://docs.example.com/start)
//! > [2]. [FAQ](https://docs.example.com/faq)
//! ```
//!
//! The quote marker may also appear in its escaped JSON form `\u003e`.

use crate::domain::ConversationReference;
use regex::Regex;
use std::sync::OnceLock;
use uuid::Uuid;

/// A run of consecutive reference lines that ends the text. Trailing whitespace is tolerated.
fn block_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"(?m)(?:^(?:>|\\u003e)[ \t]*\[\d+\]\.[ \t]*\[.*?\]\(.*?\)[ \t]*\r?(?:\n|\z))+\s*\z",
        )
        .expect("reference block pattern is valid")
    })
}

/// One reference line. Name and URL stop at the first `](` and `)` respectively.
fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?m)^(?:>|\\u003e)[ \t]*\[(\d+)\]\.[ \t]*\[(.*?)\]\((.*?)\)")
            .expect("reference line pattern is valid")
    })
}

/// Parses the citation block at the end of `text` into references.
///
/// Only the final block counts: anchoring the block pattern to the end of the text
/// means citation-shaped lines quoted earlier in an answer never match. Text without
/// such a block yields an empty vector. Lines whose ordinal does not fit a `u32` are
/// skipped. Output keeps source order; ordinals are neither sorted nor deduplicated.
pub fn extract_references(
    conversation_id: Uuid,
    app_id: &str,
    text: &str,
) -> Vec<ConversationReference> {
    let Some(block) = block_regex().find(text) else {
        return Vec::new();
    };

    line_regex()
        .captures_iter(block.as_str())
        .filter_map(|caps| {
            let ordinal = caps.get(1)?.as_str().parse::<u32>().ok()?;
            let name = caps.get(2)?.as_str();
            let url = caps.get(3)?.as_str();
            Some(ConversationReference {
                conversation_id,
                app_id: app_id.to_string(),
                ordinal,
                name: name.to_string(),
                url: url.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extract(text: &str) -> Vec<(u32, String, String)> {
        extract_references(Uuid::nil(), "app-1", text)
            .into_iter()
            .map(|r| (r.ordinal, r.name, r.url))
            .collect()
    }

    fn triple(ordinal: u32, name: &str, url: &str) -> (u32, String, String) {
        (ordinal, name.to_string(), url.to_string())
    }

    #[test]
    fn plain_answer_has_no_references() {
        assert!(extract("").is_empty());
        assert!(extract("The answer is 42.\nNothing else to add.").is_empty());
    }

    #[test]
    fn trailing_block_is_extracted_in_order() {
        let text = "Here is how.\n\n> [1]. [A](http://a)\n> [2]. [B](http://b)";
        assert_eq!(
            extract(text),
            vec![triple(1, "A", "http://a"), triple(2, "B", "http://b")]
        );
    }

    #[test]
    fn owner_ids_are_copied_onto_every_reference() {
        let id = Uuid::new_v4();
        let refs = extract_references(id, "app-9", "x\n> [1]. [A](http://a)\n> [2]. [B](http://b)");
        assert_eq!(refs.len(), 2);
        assert!(refs.iter().all(|r| r.conversation_id == id && r.app_id == "app-9"));
    }

    #[test]
    fn only_the_final_block_is_authoritative() {
        let text = "For example a citation looks like:\n\
                    > [1]. [Old](http://old)\n\
                    and then the real answer follows.\n\
                    > [1]. [New](http://new)\n";
        assert_eq!(extract(text), vec![triple(1, "New", "http://new")]);
    }

    #[test]
    fn block_followed_by_prose_is_ignored() {
        let text = "> [1]. [A](http://a)\n> [2]. [B](http://b)\nHope this helps!";
        assert!(extract(text).is_empty());
    }

    #[test]
    fn blank_line_splits_blocks() {
        let text = "> [1]. [A](http://a)\n\n> [2]. [B](http://b)\n";
        assert_eq!(extract(text), vec![triple(2, "B", "http://b")]);
    }

    #[test]
    fn trailing_newlines_are_tolerated() {
        let text = "answer\n> [1]. [A](http://a)\n\n\n";
        assert_eq!(extract(text), vec![triple(1, "A", "http://a")]);
    }

    #[test]
    fn single_terminal_line_counts() {
        assert_eq!(
            extract("> [7]. [Only](https://only.example)"),
            vec![triple(7, "Only", "https://only.example")]
        );
    }

    #[test]
    fn escaped_quote_marker_is_accepted() {
        let text = "answer\n\\u003e [1]. [A](http://a)\n\\u003e [2]. [B](http://b)";
        assert_eq!(
            extract(text),
            vec![triple(1, "A", "http://a"), triple(2, "B", "http://b")]
        );
    }

    #[test]
    fn source_order_is_kept_without_sorting() {
        let text = "> [2]. [B](http://b)\n> [1]. [A](http://a)\n> [2]. [B again](http://b2)";
        let ordinals: Vec<u32> = extract(text).into_iter().map(|(o, _, _)| o).collect();
        assert_eq!(ordinals, vec![2, 1, 2]);
    }

    #[test]
    fn brackets_inside_the_name_are_kept() {
        let text = "> [1]. [Guide [v2]](http://docs/guide)";
        assert_eq!(extract(text), vec![triple(1, "Guide [v2]", "http://docs/guide")]);
    }

    #[test]
    fn url_stops_at_the_first_closing_paren() {
        let text = "answer\n> [1]. [Rust](https://en.wikipedia.org/wiki/Rust_(lang))";
        assert_eq!(
            extract(text),
            vec![triple(1, "Rust", "https://en.wikipedia.org/wiki/Rust_(lang")]
        );
    }

    #[test]
    fn text_after_the_link_is_not_part_of_the_url() {
        let text = "answer\n> [1]. [A](http://a) (pdf)\n> [2]. [B](http://b) (p. 4)";
        assert_eq!(
            extract(text),
            vec![triple(1, "A", "http://a"), triple(2, "B", "http://b")]
        );
    }

    #[test]
    fn crlf_line_endings_are_accepted() {
        let text = "answer\r\n> [1]. [A](http://a)\r\n> [2]. [B](http://b)\r\n";
        assert_eq!(
            extract(text),
            vec![triple(1, "A", "http://a"), triple(2, "B", "http://b")]
        );
    }

    #[test]
    fn oversized_ordinal_line_is_skipped() {
        let text = "> [99999999999]. [Huge](http://huge)\n> [1]. [A](http://a)";
        assert_eq!(extract(text), vec![triple(1, "A", "http://a")]);
    }
}
