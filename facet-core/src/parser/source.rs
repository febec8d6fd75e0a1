//! Source text helpers
//!
//! Comment stripping, statement splitting and depth-aware scanning. All
//! scanners track `()`, `[]` and `{}` nesting plus quoted strings, so a
//! delimiter inside a nested call never splits its parent.

/// Remove `// line` and `/* block */` comments outside of quoted strings
pub fn strip_comments(code: &str) -> String {
    let chars: Vec<char> = code.chars().collect();
    let mut out = String::with_capacity(code.len());
    let mut quote: Option<char> = None;
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();
        if let Some(q) = quote {
            out.push(c);
            if c == q {
                quote = None;
            }
            i += 1;
            continue;
        }
        match (c, next) {
            ('\'', _) | ('"', _) => {
                quote = Some(c);
                out.push(c);
                i += 1;
            }
            ('/', Some('/')) => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            ('/', Some('*')) => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i += 2;
                out.push(' ');
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Collapse whitespace runs (including tabs and newlines) to single spaces
pub fn normalize_whitespace(statement: &str) -> String {
    statement.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Split a submission into statements on top-level `;`, dropping comments
/// and empty statements.
pub fn split_statements(code: &str) -> Vec<String> {
    let stripped = strip_comments(code);
    split_top_level(&stripped, ';')
        .into_iter()
        .map(normalize_whitespace)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split on `delimiter` wherever nesting depth is zero
pub fn split_top_level(text: &str, delimiter: char) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, c) in text.char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ if c == delimiter && depth == 0 => {
                parts.push(&text[start..i]);
                start = i + c.len_utf8();
            }
            _ => {}
        }
    }
    parts.push(&text[start..]);
    parts
}

/// Byte index of the bracket closing the one opened at `open`
pub fn matching_close(text: &str, open: usize) -> Option<usize> {
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    for (i, c) in text[open..].char_indices() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(open + i);
                }
                if depth < 0 {
                    return None;
                }
            }
            _ => {}
        }
    }
    None
}

/// Whether brackets, parentheses and quotes are balanced
pub fn is_balanced(text: &str) -> bool {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    for c in text.chars() {
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' => {
                if stack.pop() != Some(c) {
                    return false;
                }
            }
            _ => {}
        }
    }
    stack.is_empty() && quote.is_none()
}

/// Byte offsets of top-level method-call dots: a `.` at depth zero that
/// follows `)` or `]` and precedes an identifier.
pub fn chain_dots(text: &str) -> Vec<usize> {
    let mut dots = Vec::new();
    let mut depth: i32 = 0;
    let mut quote: Option<char> = None;
    let mut prev: Option<char> = None;
    let bytes: Vec<(usize, char)> = text.char_indices().collect();
    for (n, (i, c)) in bytes.iter().enumerate() {
        let c = *c;
        if let Some(q) = quote {
            if c == q {
                quote = None;
            }
            prev = Some(c);
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            '.' if depth == 0 => {
                let next = bytes.get(n + 1).map(|(_, c)| *c);
                let after_call = matches!(prev, Some(')') | Some(']'));
                let before_name = matches!(next, Some(c) if c.is_alphabetic() || c == '_');
                if after_call && before_name {
                    dots.push(*i);
                }
            }
            _ => {}
        }
        if !c.is_whitespace() {
            prev = Some(c);
        }
    }
    dots
}

/// Whether the text chains method calls after a datum or call
pub fn has_chain(text: &str) -> bool {
    !chain_dots(text).is_empty()
}

/// Strip one layer of matching quotes
pub fn unquote(text: &str) -> &str {
    let t = text.trim();
    for q in ['\'', '"'] {
        if t.len() >= 2 && t.starts_with(q) && t.ends_with(q) {
            return &t[1..t.len() - 1];
        }
    }
    t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_comments() {
        let code = "a b [1] // trailing\n/* block\n comment */c d [2]";
        assert_eq!(split_statements(code), vec!["a b [1] c d [2]"]);
        assert_eq!(strip_comments("x ['//not a comment']"), "x ['//not a comment']");
    }

    #[test]
    fn test_split_statements() {
        let code = "kick vol [1 0 1 0];\n\nsnare vol [0 1].sometimes(0.5, 'gain(2);');  ";
        let statements = split_statements(code);
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0], "kick vol [1 0 1 0]");
        assert_eq!(statements[1], "snare vol [0 1].sometimes(0.5, 'gain(2);')");
    }

    #[test]
    fn test_split_top_level() {
        assert_eq!(
            split_top_level("0.5,random(0,1),[1,2]", ','),
            vec!["0.5", "random(0,1)", "[1,2]"]
        );
        assert_eq!(
            split_top_level("[1].gain(0.5).scale(0,1)", '.'),
            vec!["[1]", "gain(0.5)", "scale(0,1)"]
        );
    }

    #[test]
    fn test_matching_close() {
        let text = "[1 [2 3]] rest";
        assert_eq!(matching_close(text, 0), Some(8));
        assert_eq!(matching_close("noise(4", 5), None);
    }

    #[test]
    fn test_chain_detection() {
        assert!(has_chain("sine(1,8).gain(2)"));
        assert!(has_chain("[1 2].reverse()"));
        assert!(!has_chain("random(0,1)*0.5"));
        assert!(!has_chain("0.5"));
        assert_eq!(chain_dots("a(1).b(2).c()"), vec![4, 9]);
    }

    #[test]
    fn test_balance_and_quotes() {
        assert!(is_balanced("f([1,(2)])"));
        assert!(!is_balanced("f([1)]"));
        assert!(!is_balanced("f('x)"));
        assert_eq!(unquote("'b y'"), "b y");
        assert_eq!(unquote(" plain "), "plain");
    }
}
