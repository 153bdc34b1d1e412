//! JSON pointers: mapping error locations back to provenance and to source lines.

use serde_json::Value;

/// Marker some APIs put in front of pointers (`#/rules/...`).
const FRAGMENT_MARKER: char = '#';

/// Split a pointer into unescaped reference tokens.
///
/// A leading `#` is stripped first. A missing leading `/` is tolerated.
pub fn parse_pointer(pointer: &str) -> Vec<String> {
    let pointer = pointer.trim();
    let pointer = pointer.strip_prefix(FRAGMENT_MARKER).unwrap_or(pointer);
    let pointer = pointer.strip_prefix('/').unwrap_or(pointer);
    if pointer.is_empty() {
        return Vec::new();
    }
    pointer
        .split('/')
        .map(|t| t.replace("~1", "/").replace("~0", "~"))
        .collect()
}

/// Values addressed by each prefix of `tokens`, stopping at the first unresolvable step.
/// The first element is always `document` itself.
fn ancestry<'a>(document: &'a Value, tokens: &[String]) -> Vec<&'a Value> {
    let mut chain = vec![document];
    let mut current = document;
    for token in tokens {
        let next = match current {
            Value::Object(map) => map.get(token),
            Value::Array(items) => token.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        };
        match next {
            Some(value) => {
                chain.push(value);
                current = value;
            }
            None => break,
        }
    }
    chain
}

/// Find the provenance recorded closest to `pointer`, searching from the target upward.
///
/// Remote errors often point at a leaf option; the owning capability entry is the
/// nearest level that carries provenance. `None` means no level on the path had any.
pub fn resolve_provenance(document: &Value, pointer: &str) -> Option<String> {
    let tokens = parse_pointer(pointer);
    ancestry(document, &tokens)
        .into_iter()
        .rev()
        .find_map(|value| {
            value
                .get("provenance")
                .and_then(Value::as_str)
                .map(str::to_string)
        })
}

/// A position inside a JSON text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextPosition {
    /// Byte offset of the addressed value
    pub offset: usize,
    /// 1-based line
    pub line: usize,
    /// Whether the whole pointer resolved; false means the deepest reachable prefix
    pub exact: bool,
}

/// Locate the value addressed by `pointer` in the original JSON `text`.
///
/// Works on the text rather than a parsed value so line breaks are the author's.
pub fn locate_in_text(text: &str, pointer: &str) -> TextPosition {
    let tokens = parse_pointer(pointer);
    let mut scanner = Scanner::new(text);
    scanner.skip_ws();
    let mut offset = scanner.pos;
    let mut exact = true;

    for token in &tokens {
        match scanner.enter(token) {
            Some(pos) => offset = pos,
            None => {
                exact = false;
                break;
            }
        }
    }

    TextPosition {
        offset,
        line: line_of(text, offset),
        exact,
    }
}

/// 1-based line number of a byte offset.
pub fn line_of(text: &str, offset: usize) -> usize {
    let end = offset.min(text.len());
    text.as_bytes()[..end].iter().filter(|&&b| b == b'\n').count() + 1
}

/// The trimmed text of `line` (1-based), cut to `width` characters.
pub fn line_excerpt(text: &str, line: usize, width: usize) -> String {
    let raw = text.lines().nth(line.saturating_sub(1)).unwrap_or("").trim();
    if raw.chars().count() <= width {
        return raw.to_string();
    }
    let mut cut: String = raw.chars().take(width.saturating_sub(3)).collect();
    cut.push_str("...");
    cut
}

/// Minimal JSON walker: enough to step into members and elements without building values.
struct Scanner<'a> {
    text: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Scanner<'a> {
    fn new(text: &'a str) -> Self {
        Self {
            text,
            bytes: text.as_bytes(),
            pos: 0,
        }
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while matches!(self.peek(), Some(b' ' | b'\t' | b'\n' | b'\r')) {
            self.pos += 1;
        }
    }

    fn eat(&mut self, byte: u8) -> bool {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    /// Step from the current container into `token`; returns the child's start offset.
    fn enter(&mut self, token: &str) -> Option<usize> {
        self.skip_ws();
        match self.peek()? {
            b'{' => {
                self.pos += 1;
                if self.eat(b'}') {
                    return None;
                }
                loop {
                    self.skip_ws();
                    let key = self.string()?;
                    if !self.eat(b':') {
                        return None;
                    }
                    self.skip_ws();
                    if key == token {
                        return Some(self.pos);
                    }
                    self.skip_value()?;
                    if !self.eat(b',') {
                        return None;
                    }
                }
            }
            b'[' => {
                let index: usize = token.parse().ok()?;
                self.pos += 1;
                if self.eat(b']') {
                    return None;
                }
                for _ in 0..index {
                    self.skip_ws();
                    self.skip_value()?;
                    if !self.eat(b',') {
                        return None;
                    }
                }
                self.skip_ws();
                Some(self.pos)
            }
            _ => None,
        }
    }

    /// Read a string literal at the cursor, decoding escapes.
    fn string(&mut self) -> Option<String> {
        if self.peek()? != b'"' {
            return None;
        }
        self.pos += 1;
        let mut out = String::new();
        loop {
            let start = self.pos;
            while !matches!(self.peek()?, b'"' | b'\\') {
                self.pos += 1;
            }
            out.push_str(&self.text[start..self.pos]);
            if self.peek()? == b'"' {
                self.pos += 1;
                return Some(out);
            }
            // backslash escape
            self.pos += 1;
            let escaped = self.peek()?;
            self.pos += 1;
            match escaped {
                b'n' => out.push('\n'),
                b't' => out.push('\t'),
                b'r' => out.push('\r'),
                b'b' => out.push('\u{8}'),
                b'f' => out.push('\u{c}'),
                b'u' => {
                    let high = self.hex4()?;
                    let code = if (0xD800..0xDC00).contains(&high)
                        && self.text.get(self.pos..self.pos + 2) == Some("\\u")
                    {
                        // surrogate pair: only consume the low half if it is one
                        let saved = self.pos;
                        self.pos += 2;
                        match self.hex4()? {
                            low @ 0xDC00..=0xDFFF => {
                                0x10000 + ((high - 0xD800) << 10) + (low - 0xDC00)
                            }
                            _ => {
                                self.pos = saved;
                                high
                            }
                        }
                    } else {
                        high
                    };
                    out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                }
                other => out.push(other as char),
            }
        }
    }

    /// Four hex digits at the cursor.
    fn hex4(&mut self) -> Option<u32> {
        let hex = self.text.get(self.pos..self.pos + 4)?;
        let code = u32::from_str_radix(hex, 16).ok()?;
        self.pos += 4;
        Some(code)
    }

    fn skip_value(&mut self) -> Option<()> {
        self.skip_ws();
        match self.peek()? {
            b'"' => self.string().map(|_| ()),
            open @ (b'{' | b'[') => {
                let close = if open == b'{' { b'}' } else { b']' };
                self.pos += 1;
                if self.eat(close) {
                    return Some(());
                }
                loop {
                    self.skip_ws();
                    if open == b'{' {
                        self.string()?;
                        if !self.eat(b':') {
                            return None;
                        }
                    }
                    self.skip_value()?;
                    if self.eat(b',') {
                        continue;
                    }
                    return self.eat(close).then_some(());
                }
            }
            _ => {
                while !matches!(
                    self.peek(),
                    None | Some(b',' | b']' | b'}' | b' ' | b'\t' | b'\n' | b'\r')
                ) {
                    self.pos += 1;
                }
                Some(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn given_marker_and_escapes_when_parsing_then_tokens_unescaped() {
        assert_eq!(
            parse_pointer("#/rules/a~1b/c~0d"),
            vec!["rules", "a/b", "c~d"]
        );
        assert!(parse_pointer("#").is_empty());
        assert!(parse_pointer("").is_empty());
    }

    #[test]
    fn given_leaf_without_provenance_when_resolving_then_returns_owning_entry() {
        let document = json!({
            "rules": {
                "name": "default",
                "behaviors": [
                    { "name": "caching", "options": { "ttl": "1d" }, "provenance": "src/main.rs:8" }
                ]
            }
        });

        let found = resolve_provenance(&document, "#/rules/behaviors/0/options/ttl");
        assert_eq!(found.as_deref(), Some("src/main.rs:8"));
    }

    #[test]
    fn given_no_provenance_on_path_when_resolving_then_none() {
        let document = json!({ "rules": { "name": "default", "comment": "" } });
        assert_eq!(resolve_provenance(&document, "/rules/name"), None);
    }

    #[test]
    fn given_pointer_past_document_when_resolving_then_uses_deepest_reachable() {
        let document = json!({
            "rules": { "children": [ { "name": "a", "provenance": "src/a.rs:3" } ] }
        });
        let found = resolve_provenance(&document, "/rules/children/0/behaviors/4/options");
        assert_eq!(found.as_deref(), Some("src/a.rs:3"));
    }

    #[test]
    fn given_nested_pointer_when_locating_then_reports_author_line() {
        let text = "{\n  \"name\": \"x\",\n  \"behaviors\": [\n    {\"name\": \"a\"},\n    {\"name\": \"b\",\n     \"options\": {\"ttl\": \"1d\"}}\n  ]\n}\n";

        let position = locate_in_text(text, "/behaviors/1/options/ttl");

        assert!(position.exact);
        assert_eq!(position.line, 6);
        assert_eq!(&text[position.offset..position.offset + 4], "\"1d\"");
    }

    #[test]
    fn given_escaped_key_when_locating_then_matches_decoded_name() {
        let text = "{\"a\\\"b\": 1,\n\"c/d\": 2}";
        assert_eq!(locate_in_text(text, "/c~1d").line, 2);
        assert_eq!(locate_in_text(text, "/a\"b").line, 1);
    }

    #[test]
    fn given_escaped_surrogate_pair_in_key_when_locating_then_matches_decoded_name() {
        let text = "{\"a\": 1,\n\"\\ud83d\\ude80launch\": 2,\n\"\\ud83dx\": 3}";

        let position = locate_in_text(text, "/\u{1F680}launch");
        assert!(position.exact);
        assert_eq!(position.line, 2);

        // lone high surrogate stays a replacement character
        let lone = locate_in_text(text, "/\u{fffd}x");
        assert!(lone.exact);
        assert_eq!(lone.line, 3);
    }

    #[test]
    fn given_missing_member_when_locating_then_inexact_prefix() {
        let text = "{\n  \"children\": [\n    {}\n  ]\n}";
        let position = locate_in_text(text, "/children/0/name");
        assert!(!position.exact);
        assert_eq!(position.line, 3);
    }

    #[test]
    fn given_long_line_when_excerpting_then_truncates() {
        let text = format!("first\n    {}\n", "x".repeat(100));
        let excerpt = line_excerpt(&text, 2, 20);
        assert_eq!(excerpt.chars().count(), 20);
        assert!(excerpt.ends_with("..."));
        assert_eq!(line_excerpt(&text, 1, 20), "first");
    }
}
