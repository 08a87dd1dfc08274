use kite_core::lexer::{TokenKind, lex};
use kite_core::span::FileId;
use proptest::prelude::*;

fn piece() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z_][a-z0-9_]{0,8}",
        "[0-9]{1,6}",
        "[0-9]{1,3}\\.[0-9]{1,3}",
        "\"[a-z ]{0,6}\"",
        "'[a-z]'",
        "/\\* [a-z]{0,5} \\*/",
        "// [a-z ]{0,6}\n",
        prop::sample::select(vec![
            "+", "-", "*", "/", "%", "==", "!=", "<=", ">=", "<<=", "->", "=>", "::", "..", "..=", "(",
            ")", "{", "}", "[", "]", ";", ",", "?", "!", "&&", "||",
        ])
        .prop_map(str::to_string),
    ]
}

fn source() -> impl Strategy<Value = (Vec<String>, String)> {
    prop::collection::vec((piece(), prop::sample::select(vec![" ", "\n", "\t", "  "])), 0..40).prop_map(
        |pieces| {
            let mut text = String::new();
            let mut parts = Vec::new();
            for (piece, separator) in pieces {
                text.push_str(&piece);
                text.push_str(separator);
                parts.push(piece);
            }
            (parts, text)
        },
    )
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 256,
        .. ProptestConfig::default()
    })]
    #[test]
    fn token_spans_cover_everything_but_whitespace((parts, text) in source()) {
        let result = lex(FileId(0), &text);
        prop_assert!(result.diagnostics.is_empty(), "{:?}", result.diagnostics);

        let mut rebuilt = String::new();
        let mut cursor = 0usize;
        let mut count = 0usize;
        for token in result.tokens.iter().filter(|token| token.kind != TokenKind::Eof) {
            let start = token.span.start as usize;
            let end = token.span.end as usize;
            prop_assert!(start >= cursor && end > start);
            prop_assert!(text[cursor..start].chars().all(char::is_whitespace));
            rebuilt.push_str(&text[cursor..start]);
            rebuilt.push_str(token.text(&text));
            cursor = end;
            count += 1;
        }
        prop_assert!(text[cursor..].chars().all(char::is_whitespace));
        rebuilt.push_str(&text[cursor..]);
        prop_assert_eq!(rebuilt, text.clone());
        prop_assert_eq!(count, parts.len());
    }
}
