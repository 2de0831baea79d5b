//! Formatting-insensitive normalization of SQL text.

/// Characters that never need surrounding whitespace to stay unambiguous.
fn is_punct(c: char) -> bool {
    matches!(
        c,
        '(' | ')' | ',' | ';' | '=' | '<' | '>' | '+' | '*' | '/' | '%' | '[' | ']' | '.' | ':'
    )
}

fn push_word(out: &mut String, pending_space: &mut bool, c: char) {
    if *pending_space
        && let Some(last) = out.chars().last()
        && !is_punct(last)
        && !is_punct(c)
    {
        out.push(' ');
    }
    *pending_space = false;
    out.push(c);
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

/// Copy a quoted body starting after the opening `quote`, through the
/// closing one. Returns the index after it.
fn copy_quoted(
    chars: &[char],
    start: usize,
    quote: char,
    backslash: bool,
    out: &mut String,
) -> usize {
    let mut i = start;
    while let Some(&c) = chars.get(i) {
        out.push(c);
        i += 1;
        if backslash && c == '\\' {
            if let Some(&escaped) = chars.get(i) {
                out.push(escaped);
                i += 1;
            }
        } else if c == quote {
            // SQL escapes quotes by doubling them: '' or ""
            if chars.get(i) == Some(&quote) {
                out.push(quote);
                i += 1;
            } else {
                break;
            }
        }
    }
    i
}

/// End of the `$$` or `$tag$` delimiter starting at `i`, if there is one.
/// Positional parameters like `$1` are not delimiters.
fn dollar_delimiter(chars: &[char], i: usize) -> Option<usize> {
    let mut j = i + 1;
    if chars.get(j).is_some_and(|c| c.is_alphabetic() || *c == '_') {
        while chars.get(j).is_some_and(|c| is_word_char(*c)) {
            j += 1;
        }
    }
    (chars.get(j) == Some(&'$')).then_some(j + 1)
}

/// Normalize SQL text for hashing and comparison.
///
/// Outside of quoted literals and identifiers:
/// - `--` line comments and `/* */` block comments are removed,
/// - whitespace runs collapse to one space, and disappear next to punctuation,
/// - unquoted text is lowercased (Postgres folds unquoted identifiers and
///   keywords anyway),
/// - trailing semicolons are dropped.
///
/// Quoted content (`'...'`, `E'...'`, `"..."`, `$$...$$`, `$tag$...$tag$`) is
/// kept byte-for-byte.
///
/// ```
/// use tally_sql::normalize_sql;
/// assert_eq!(
///     normalize_sql("CREATE TABLE t (\n  id int -- key\n);"),
///     normalize_sql("create table t(id INT)"),
/// );
/// assert_ne!(normalize_sql("SELECT 'A'"), normalize_sql("SELECT 'a'"));
/// ```
pub fn normalize_sql(sql: &str) -> String {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut pending_space = false;
    let mut i = 0;

    while let Some(&ch) = chars.get(i) {
        let next = chars.get(i + 1).copied();
        let delimiter = if ch == '$' {
            dollar_delimiter(&chars, i)
        } else {
            None
        };
        match ch {
            '\'' | '"' => {
                push_word(&mut out, &mut pending_space, ch);
                i = copy_quoted(&chars, i + 1, ch, false, &mut out);
            }
            'e' | 'E' if next == Some('\'') && !(i > 0 && is_word_char(chars[i - 1])) => {
                push_word(&mut out, &mut pending_space, 'e');
                out.push('\'');
                i = copy_quoted(&chars, i + 2, '\'', true, &mut out);
            }
            '$' if delimiter.is_some() => {
                let open = delimiter.unwrap_or(i + 1);
                let tag = &chars[i..open];
                push_word(&mut out, &mut pending_space, '$');
                out.extend(&tag[1..]);
                // Body copied verbatim through the matching closing tag.
                let mut j = open;
                while j < chars.len() && !chars[j..].starts_with(tag) {
                    out.push(chars[j]);
                    j += 1;
                }
                if j < chars.len() {
                    out.extend(tag);
                    j += tag.len();
                }
                i = j;
            }
            '-' if next == Some('-') => {
                while chars.get(i).is_some_and(|c| *c != '\n') {
                    i += 1;
                }
                pending_space = true;
            }
            '/' if next == Some('*') => {
                i += 2;
                while i < chars.len() && !chars[i..].starts_with(&['*', '/']) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
                pending_space = true;
            }
            c if c.is_whitespace() => {
                pending_space = true;
                i += 1;
            }
            c => {
                for lower in c.to_lowercase() {
                    push_word(&mut out, &mut pending_space, lower);
                }
                i += 1;
            }
        }
    }

    let trimmed = out.trim_end_matches([';', ' ']);
    trimmed.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitespace_collapses() {
        assert_eq!(
            normalize_sql("SELECT   a,\n\tb  FROM t"),
            "select a,b from t"
        );
    }

    #[test]
    fn test_comments_are_removed() {
        assert_eq!(
            normalize_sql("SELECT 1 -- one\n/* block\ncomment */ + 2;"),
            "select 1+2"
        );
    }

    #[test]
    fn test_quoted_content_is_preserved() {
        assert_eq!(
            normalize_sql("SELECT 'It''s  --  HERE' AS \"Mixed  Case\""),
            "select 'It''s  --  HERE' as \"Mixed  Case\""
        );
    }

    #[test]
    fn test_dollar_quoted_body_is_preserved() {
        assert_eq!(
            normalize_sql("DO $$ BEGIN  RAISE NOTICE 'X'; END $$;"),
            "do $$ BEGIN  RAISE NOTICE 'X'; END $$"
        );
    }

    #[test]
    fn test_tagged_dollar_body_is_preserved() {
        assert_eq!(
            normalize_sql(
                "CREATE FUNCTION f() RETURNS int AS $fn$ SELECT 1 -- One\n $$ $fn$ LANGUAGE sql;"
            ),
            "create function f()returns int as $fn$ SELECT 1 -- One\n $$ $fn$ language sql"
        );
        assert_ne!(
            normalize_sql("DO $body$ BEGIN RAISE NOTICE 'a -- b'; END $body$"),
            normalize_sql("DO $body$ BEGIN RAISE NOTICE 'a -- c'; END $body$"),
        );
        assert_eq!(normalize_sql("SELECT $1,  $2"), "select $1,$2");
    }

    #[test]
    fn test_escape_strings_are_preserved() {
        assert_eq!(
            normalize_sql("SELECT E'It\\'s -- KEPT'  AS x"),
            "select e'It\\'s -- KEPT' as x"
        );
        assert_ne!(
            normalize_sql("INSERT INTO t VALUES (E'a\\' -- B')"),
            normalize_sql("INSERT INTO t VALUES (E'a\\' -- C')"),
        );
        assert_eq!(normalize_sql("SELECT type'x'"), "select type'x'");
    }

    #[test]
    fn test_semantic_changes_are_visible() {
        assert_ne!(
            normalize_sql("ALTER TABLE t ADD COLUMN a int"),
            normalize_sql("ALTER TABLE t ADD COLUMN a bigint")
        );
    }

    #[test]
    fn test_trailing_semicolons_are_dropped() {
        assert_eq!(normalize_sql("select 1;;  "), "select 1");
    }
}
