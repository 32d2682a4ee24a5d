use regex::Regex;
use lazy_static::lazy_static;
use crate::utils::{quote, error};
use crate::error::SchemaError;

lazy_static! {
    pub static ref TOKEN_REGEX: Regex = Regex::new(concat!(
        r"(",
        r"//[^\n]*",
        r"|/\*(?s:.*?)\*/",
        r"|\s+",
        r#"|"(?:[^"\\\n]|\\.)*""#,
        r"|'(?:[^'\\\n]|\\.)*'",
        r"|(?:\d+\.\d*|\.\d+)(?:[eE][+-]?\d+)?",
        r"|\d+[eE][+-]?\d+",
        r"|0[xX][0-9A-Fa-f]+",
        r"|\d+",
        r"|\.?[A-Za-z_][A-Za-z0-9_]*(?:\.[A-Za-z_][A-Za-z0-9_]*)*",
        r"|[=;{}\[\]<>(),:+\-.]",
        r")",
    )).unwrap();
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub text:   String,
    pub line:   usize,
    pub column: usize,
}

fn is_trivia(part: &str) -> bool {
    part.starts_with("//") || part.starts_with("/*") || part.trim().is_empty()
}

/// Splits `.proto` source text into tokens, dropping whitespace and comments.
/// The returned list always ends with an empty EOF token.
pub fn tokenize_schema(file: &str, text: &str) -> Result<Vec<Token>, SchemaError> {
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut column = 1;
    let mut last_end = 0;

    for mat in TOKEN_REGEX.find_iter(text) {
        let start = mat.start();
        let end   = mat.end();
        let part  = mat.as_str();

        if start > last_end {
            // Unexpected text between last_end and start
            let unexpected = &text[last_end..start];
            return Err(error(
                file,
                &format!("Syntax error: {}", quote(unexpected)),
                line,
                column,
            ));
        }

        if !is_trivia(part) {
            tokens.push(Token {
                text:   part.to_string(),
                line,
                column,
            });
        }

        // Update line/column
        let newline_count = part.matches('\n').count();
        if newline_count > 0 {
            line += newline_count;
            if let Some(last_line_part) = part.split('\n').last() {
                column = last_line_part.chars().count() + 1;
            }
        } else {
            column += part.chars().count();
        }

        last_end = end;
    }

    if last_end != text.len() {
        let unexpected = &text[last_end..];
        return Err(error(
            file,
            &format!("Syntax error: {}", quote(unexpected)),
            line,
            column,
        ));
    }

    // Append EOF token
    tokens.push(Token {
        text:   "".to_string(),
        line,
        column,
    });
    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(input: &str) -> Vec<String> {
        tokenize_schema("test.proto", input)
            .unwrap()
            .into_iter()
            .map(|t| t.text)
            .collect()
    }

    #[test]
    fn test_tokenize_simple() {
        let input = "int32 x = 10;";
        let expected = vec![
            Token { text: "int32".into(), line: 1, column: 1 },
            Token { text: "x".into(),     line: 1, column: 7 },
            Token { text: "=".into(),     line: 1, column: 9 },
            Token { text: "10".into(),    line: 1, column: 11 },
            Token { text: ";".into(),     line: 1, column: 13 },
            Token { text: "".into(),      line: 1, column: 14 },
        ];
        let got = tokenize_schema("test.proto", input).unwrap();
        assert_eq!(got, expected);
    }

    #[test]
    fn test_tokenize_comments_and_lines() {
        let input = "// header\nmessage /* inline\n comment */ Foo {}";
        let got = tokenize_schema("test.proto", input).unwrap();
        assert_eq!(got[0], Token { text: "message".into(), line: 2, column: 1 });
        assert_eq!(got[1], Token { text: "Foo".into(), line: 3, column: 13 });
        assert_eq!(got.len(), 5);
    }

    #[test]
    fn test_tokenize_literals() {
        assert_eq!(
            texts(r#"syntax = "proto3"; option x = 'a\'b';"#),
            vec!["syntax", "=", "\"proto3\"", ";", "option", "x", "=", "'a\\'b'", ";", ""]
        );
        assert_eq!(
            texts("0x1F 017 1.5 .5e3 2e10 -3"),
            vec!["0x1F", "017", "1.5", ".5e3", "2e10", "-", "3", ""]
        );
    }

    #[test]
    fn test_tokenize_qualified_names() {
        assert_eq!(
            texts("map<string, .foo.Bar> (my.opt).sub"),
            vec!["map", "<", "string", ",", ".foo.Bar", ">", "(", "my.opt", ")", ".sub", ""]
        );
    }

    #[test]
    fn test_tokenize_unexpected_text() {
        let err = tokenize_schema("bad.proto", "int32 x = 10 @").unwrap_err();
        match err {
            SchemaError::Parse { file, line, column, .. } => {
                assert_eq!(file, "bad.proto");
                assert_eq!((line, column), (1, 14));
            }
            other => panic!("expected a parse error but got {:?}", other),
        }
    }

    #[test]
    fn test_tokenize_unterminated_string() {
        assert!(tokenize_schema("bad.proto", "import \"a.proto;").is_err());
    }
}
