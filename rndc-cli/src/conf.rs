//! Key extraction from BIND `rndc.conf`-style files.
//!
//! Only the `key` clause is understood:
//!
//! ```text
//! key "rndc-key" {
//!     algorithm hmac-md5;
//!     secret "c3VwZXJzZWNyZXQ=";
//! };
//! ```
//!
//! `options`, `server`, and anything else in the file is skipped.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfError {
    #[error("no key clause found")]
    NoKey,

    #[error("key clause is missing its {0} statement")]
    MissingStatement(&'static str),

    #[error("unsupported key algorithm: {0} (only hmac-md5 is spoken)")]
    UnsupportedAlgorithm(String),
}

/// A key clause from the configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfKey {
    pub name: String,
    pub secret: String,
}

/// Splits the input into words, brace/semicolon punctuation, and quoted
/// strings. Comments run to end of line.
fn tokenize(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();
    while let Some(ch) = chars.next() {
        match ch {
            '#' => {
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'/') => {
                for ch in chars.by_ref() {
                    if ch == '\n' {
                        break;
                    }
                }
            }
            '"' => {
                let mut word = String::new();
                for ch in chars.by_ref() {
                    if ch == '"' {
                        break;
                    }
                    word.push(ch);
                }
                tokens.push(word);
            }
            '{' | '}' | ';' => tokens.push(ch.to_string()),
            ch if ch.is_whitespace() => {}
            ch => {
                let mut word = String::from(ch);
                while let Some(&next) = chars.peek() {
                    if next.is_whitespace() || matches!(next, '{' | '}' | ';' | '"') {
                        break;
                    }
                    word.push(next);
                    chars.next();
                }
                tokens.push(word);
            }
        }
    }
    tokens
}

/// Extracts the first key clause from configuration text.
pub fn parse_key(input: &str) -> Result<ConfKey, ConfError> {
    let tokens = tokenize(input);
    let mut iter = tokens.iter().peekable();
    while let Some(token) = iter.next() {
        if token != "key" {
            continue;
        }
        let name = match iter.peek() {
            Some(name) if name.as_str() != "{" => iter.next().unwrap().clone(),
            _ => String::new(),
        };
        if iter.next().map(String::as_str) != Some("{") {
            continue;
        }

        let mut algorithm = None;
        let mut secret = None;
        let mut depth = 1;
        while depth > 0 {
            match iter.next().map(String::as_str) {
                Some("{") => depth += 1,
                Some("}") => depth -= 1,
                Some("algorithm") => algorithm = iter.next().cloned(),
                Some("secret") => secret = iter.next().cloned(),
                Some(_) => {}
                None => break,
            }
        }

        let algorithm = algorithm.ok_or(ConfError::MissingStatement("algorithm"))?;
        if !algorithm.eq_ignore_ascii_case("hmac-md5") {
            return Err(ConfError::UnsupportedAlgorithm(algorithm));
        }
        let secret = secret.ok_or(ConfError::MissingStatement("secret"))?;
        return Ok(ConfKey { name, secret });
    }
    Err(ConfError::NoKey)
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONF: &str = r#"
# rndc.conf generated by rndc-confgen
key "rndc-key" {
    algorithm hmac-md5;
    secret "c3VwZXJzZWNyZXQ=";
};

options {
    default-key "rndc-key";
    default-server 127.0.0.1;
    default-port 953;
};
"#;

    #[test]
    fn test_parse_generated_conf() {
        let key = parse_key(CONF).unwrap();
        assert_eq!(key.name, "rndc-key");
        assert_eq!(key.secret, "c3VwZXJzZWNyZXQ=");
    }

    #[test]
    fn test_line_comments_are_skipped() {
        let conf = "// local override\nkey local { algorithm hmac-md5; secret \"YWJjZA==\"; };";
        assert_eq!(parse_key(conf).unwrap().secret, "YWJjZA==");
    }

    #[test]
    fn test_unquoted_key_name() {
        let conf = "key upstream { algorithm HMAC-MD5; secret \"YWJjZA==\"; };";
        assert_eq!(parse_key(conf).unwrap().name, "upstream");
    }

    #[test]
    fn test_no_key_clause() {
        assert!(matches!(
            parse_key("options { default-port 953; };"),
            Err(ConfError::NoKey)
        ));
    }

    #[test]
    fn test_missing_secret() {
        assert!(matches!(
            parse_key("key k { algorithm hmac-md5; };"),
            Err(ConfError::MissingStatement("secret"))
        ));
    }

    #[test]
    fn test_unsupported_algorithm() {
        let conf = "key k { algorithm hmac-sha256; secret \"YWJjZA==\"; };";
        assert!(matches!(
            parse_key(conf),
            Err(ConfError::UnsupportedAlgorithm(_))
        ));
    }
}
