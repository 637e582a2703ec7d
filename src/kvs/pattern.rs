//! Glob patterns for key enumeration
//!
//! `*` matches any run of characters (dots included), `?` matches exactly
//! one character and `\` escapes the next character.

/// Leading part of `pattern` that contains no wildcard.
///
/// Scans use it as the range start; an escaped character ends the prefix.
pub fn literal_prefix(pattern: &str) -> &str {
    match pattern.find(|c| c == '*' || c == '?' || c == '\\') {
        Some(idx) => &pattern[..idx],
        None => pattern,
    }
}

/// Escape wildcard characters so `text` matches only itself
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        if matches!(c, '*' | '?' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Match `key` against a glob `pattern`
pub fn glob_match(pattern: &str, key: &str) -> bool {
    let pat: Vec<char> = pattern.chars().collect();
    let txt: Vec<char> = key.chars().collect();

    let (mut p, mut t) = (0usize, 0usize);
    // position of the last `*` and the text index it is currently absorbing up to
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        match pat.get(p) {
            Some('*') => {
                star = Some((p, t));
                p += 1;
            }
            Some('?') => {
                p += 1;
                t += 1;
            }
            Some('\\') if p + 1 < pat.len() && pat[p + 1] == txt[t] => {
                p += 2;
                t += 1;
            }
            Some(&c) if c != '\\' && c == txt[t] => {
                p += 1;
                t += 1;
            }
            _ => match star {
                Some((sp, st)) => {
                    p = sp + 1;
                    t = st + 1;
                    star = Some((sp, st + 1));
                }
                None => return false,
            },
        }
    }

    pat[p..].iter().all(|&c| c == '*')
}
