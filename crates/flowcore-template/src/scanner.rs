//! Locate `${{ ... }}` occurrences inside an arbitrary string, tracking
//! brace depth so an embedded `{`/`}` (e.g. `${{ tojson({"a": 1}) }}`) does
//! not truncate the match early.

/// One located template: the byte range of the whole `${{ ... }}` (including
/// delimiters) and the trimmed inner expression text.
#[derive(Debug, Clone, PartialEq)]
pub struct Match {
    pub range: std::ops::Range<usize>,
    pub inner: String,
}

pub fn scan(input: &str) -> Vec<Match> {
    let bytes = input.as_bytes();
    let mut matches = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' && input[i..].starts_with("${{") {
            let start = i;
            let mut depth: i32 = 1;
            let mut j = i + 3;
            let content_start = j;
            let mut content_end = None;
            while j < bytes.len() {
                if input[j..].starts_with("{{") {
                    depth += 1;
                    j += 2;
                    continue;
                }
                if input[j..].starts_with("}}") {
                    depth -= 1;
                    if depth == 0 {
                        content_end = Some(j);
                        j += 2;
                        break;
                    }
                    j += 2;
                    continue;
                }
                j += input[j..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
            }
            if let Some(end) = content_end {
                matches.push(Match {
                    range: start..j,
                    inner: input[content_start..end].trim().to_string(),
                });
                i = j;
                continue;
            }
            // Unterminated `${{`: stop scanning, treat the rest as literal text.
            break;
        }
        i += input[i..].chars().next().map(|c| c.len_utf8()).unwrap_or(1);
    }
    matches
}
