//! Placeholder discovery and clause rewriting over stored SQL.
//!
//! Stored statements are tokenized with the backend's `sqlparser` dialect,
//! so literals, quoted identifiers and comments never yield placeholders.
//! `WHERE` stripping goes through the parser. Text the tokenizer or parser
//! rejects falls back to the lexical scanner in [`lexical`].

use sqlgate_core::VendorKind;
use sqlparser::ast::{SetExpr, Statement};
use sqlparser::dialect::{Dialect, MsSqlDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};

/// One `@name` occurrence in SQL code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamedPlaceholder {
    /// Byte offset of the `@`.
    pub start: usize,
    /// Byte offset one past the last name character.
    pub end: usize,
    pub name: String,
}

/// Positional placeholder dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionalStyle {
    /// `?` (MySQL, SQLite)
    Question,
    /// `$1`, `$2`, ... (PostgreSQL)
    Dollar,
}

impl PositionalStyle {
    pub fn for_vendor(vendor: VendorKind) -> Self {
        match vendor {
            VendorKind::Postgresql => PositionalStyle::Dollar,
            _ => PositionalStyle::Question,
        }
    }
}

/// The `sqlparser` dialect matching a backend.
pub fn dialect_for(vendor: VendorKind) -> Box<dyn Dialect> {
    match vendor {
        VendorKind::Mssql => Box::new(MsSqlDialect {}),
        VendorKind::Mysql => Box::new(MySqlDialect {}),
        VendorKind::Postgresql => Box::new(PostgreSqlDialect {}),
        VendorKind::Sqlite => Box::new(SQLiteDialect {}),
    }
}

fn tokenize(sql: &str, vendor: VendorKind) -> Option<Vec<TokenWithSpan>> {
    let dialect = dialect_for(vendor);
    match Tokenizer::new(dialect.as_ref(), sql)
        .with_unescape(false)
        .tokenize_with_location()
    {
        Ok(tokens) => Some(tokens),
        Err(e) => {
            tracing::warn!(vendor = %vendor, error = %e, "SQL did not tokenize, scanning lexically");
            None
        }
    }
}

/// Every `@name` placeholder in code, in order. `@@system` variables are
/// not placeholders, nor is `@` glued to a preceding word.
pub fn named_placeholders(sql: &str, vendor: VendorKind) -> Vec<NamedPlaceholder> {
    let Some(tokens) = tokenize(sql, vendor) else {
        return lexical::named_placeholders(sql);
    };
    match placeholders_in(sql, &tokens) {
        Some(found) => found,
        None => {
            tracing::warn!(vendor = %vendor, "Token positions do not line up with SQL text, scanning lexically");
            lexical::named_placeholders(sql)
        }
    }
}

/// Dialects split `@name` differently: one word, a placeholder token, or
/// an `@` sign directly followed by a word.
fn placeholders_in(sql: &str, tokens: &[TokenWithSpan]) -> Option<Vec<NamedPlaceholder>> {
    let offsets = LineOffsets::new(sql);
    let mut found = Vec::new();
    for (i, current) in tokens.iter().enumerate() {
        let last = match &current.token {
            Token::Word(w) if w.quote_style.is_none() && w.value.starts_with('@') && !w.value.starts_with("@@") => {
                current
            }
            Token::Placeholder(p) if p.starts_with('@') && !p.starts_with("@@") => current,
            Token::AtSign => match tokens.get(i + 1) {
                Some(next) if is_bare_word(&next.token) && next.span.start == current.span.end => next,
                _ => continue,
            },
            _ => continue,
        };
        let glued = i
            .checked_sub(1)
            .and_then(|p| tokens.get(p))
            .is_some_and(|prev| {
                prev.span.end == current.span.start
                    && matches!(
                        prev.token,
                        Token::Word(_) | Token::Number(..) | Token::AtSign | Token::AtAt
                    )
            });
        if glued {
            continue;
        }

        let start = offsets.byte(current.span.start)?;
        let end = offsets.byte(last.span.end)?;
        let name = sql.get(start..end)?.strip_prefix('@')?;
        if !is_name(name) {
            continue;
        }
        found.push(NamedPlaceholder {
            start,
            end,
            name: name.to_string(),
        });
    }
    Some(found)
}

fn is_bare_word(token: &Token) -> bool {
    matches!(token, Token::Word(w) if w.quote_style.is_none())
}

fn is_name(name: &str) -> bool {
    let mut bytes = name.bytes();
    bytes.next().is_some_and(lexical::is_ident_start) && bytes.all(lexical::is_ident)
}

/// Distinct placeholder names in first-appearance order.
pub fn parameter_names(sql: &str, vendor: VendorKind) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for p in named_placeholders(sql, vendor) {
        if !names.iter().any(|n| n.eq_ignore_ascii_case(&p.name)) {
            names.push(p.name);
        }
    }
    names
}

/// Replace each `@name` with whatever `replace` returns for it.
pub fn rewrite_named(sql: &str, vendor: VendorKind, mut replace: impl FnMut(&str) -> String) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut last = 0;
    for p in named_placeholders(sql, vendor) {
        out.push_str(&sql[last..p.start]);
        out.push_str(&replace(&p.name));
        last = p.end;
    }
    out.push_str(&sql[last..]);
    out
}

/// Number of positional parameters the statement expects.
pub fn positional_count(sql: &str, vendor: VendorKind) -> usize {
    let style = PositionalStyle::for_vendor(vendor);
    let Some(tokens) = tokenize(sql, vendor) else {
        return lexical::positional_count(sql, style);
    };
    let placeholders = tokens.iter().filter_map(|t| match &t.token {
        Token::Placeholder(p) => Some(p.as_str()),
        _ => None,
    });
    match style {
        PositionalStyle::Question => placeholders.filter(|p| p.starts_with('?')).count(),
        PositionalStyle::Dollar => placeholders
            .filter_map(|p| p.strip_prefix('$')?.parse::<usize>().ok())
            .max()
            .unwrap_or(0),
    }
}

/// Remove the `WHERE` clause of a single top-level `SELECT`. Returns `None`
/// when there is none to remove.
///
/// Parsed statements are re-serialized, so keyword case and spacing follow
/// `sqlparser`'s rendering. SQL the parser rejects is cut lexically at
/// `ORDER BY`, `GROUP BY`, `HAVING`, `;` or the end of the text.
pub fn strip_where(sql: &str, vendor: VendorKind) -> Option<String> {
    let dialect = dialect_for(vendor);
    let mut statements = match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) => statements,
        Err(e) => {
            tracing::debug!(vendor = %vendor, error = %e, "SQL did not parse, stripping WHERE lexically");
            return lexical::strip_where(sql);
        }
    };
    let [Statement::Query(query)] = statements.as_mut_slice() else {
        return None;
    };
    let SetExpr::Select(select) = query.body.as_mut() else {
        return None;
    };
    select.selection.take()?;
    Some(query.to_string())
}

/// Byte offsets for tokenizer locations (1-based line and character column).
struct LineOffsets<'a> {
    sql: &'a str,
    line_starts: Vec<usize>,
}

impl<'a> LineOffsets<'a> {
    fn new(sql: &'a str) -> Self {
        let mut line_starts = vec![0];
        line_starts.extend(sql.match_indices('\n').map(|(i, _)| i + 1));
        Self { sql, line_starts }
    }

    fn byte(&self, location: Location) -> Option<usize> {
        let line = usize::try_from(location.line).ok()?.checked_sub(1)?;
        let column = usize::try_from(location.column).ok()?.checked_sub(1)?;
        let start = *self.line_starts.get(line)?;
        let rest = &self.sql[start..];
        rest.char_indices()
            .map(|(i, _)| i)
            .chain(std::iter::once(rest.len()))
            .nth(column)
            .map(|i| start + i)
    }
}

/// Byte-level scanning for text `sqlparser` will not take. It only tells
/// code apart from string literals, quoted identifiers and comments.
mod lexical {
    use super::{NamedPlaceholder, PositionalStyle};

    /// `true` for every byte of `sql` that is SQL code.
    fn code_mask(sql: &str) -> Vec<bool> {
        let bytes = sql.as_bytes();
        let mut mask = vec![true; bytes.len()];
        let mut i = 0;
        while i < bytes.len() {
            let skip_to = match bytes[i] {
                b'\'' => Some(quoted_end(bytes, i, b'\'')),
                b'"' => Some(quoted_end(bytes, i, b'"')),
                b'`' => Some(quoted_end(bytes, i, b'`')),
                b'[' => Some(quoted_end(bytes, i, b']')),
                b'-' if bytes.get(i + 1) == Some(&b'-') => Some(
                    bytes[i..]
                        .iter()
                        .position(|b| *b == b'\n')
                        .map_or(bytes.len(), |p| i + p),
                ),
                b'/' if bytes.get(i + 1) == Some(&b'*') => Some(
                    find_from(bytes, i + 2, b"*/").map_or(bytes.len(), |p| p + 2),
                ),
                _ => None,
            };
            match skip_to {
                Some(end) => {
                    mask[i..end].iter_mut().for_each(|m| *m = false);
                    i = end;
                }
                None => i += 1,
            }
        }
        mask
    }

    pub(super) fn named_placeholders(sql: &str) -> Vec<NamedPlaceholder> {
        let bytes = sql.as_bytes();
        let mask = code_mask(sql);
        let mut found = Vec::new();
        let mut i = 0;
        while i < bytes.len() {
            if !mask[i] || bytes[i] != b'@' {
                i += 1;
                continue;
            }
            if bytes.get(i + 1) == Some(&b'@') {
                i += 2;
                while i < bytes.len() && is_ident(bytes[i]) {
                    i += 1;
                }
                continue;
            }
            if i > 0 && is_ident(bytes[i - 1]) {
                i += 1;
                continue;
            }
            let start = i;
            let mut end = i + 1;
            if end < bytes.len() && is_ident_start(bytes[end]) {
                while end < bytes.len() && is_ident(bytes[end]) {
                    end += 1;
                }
                found.push(NamedPlaceholder {
                    start,
                    end,
                    name: sql[start + 1..end].to_string(),
                });
            }
            i = end;
        }
        found
    }

    pub(super) fn positional_count(sql: &str, style: PositionalStyle) -> usize {
        let bytes = sql.as_bytes();
        let mask = code_mask(sql);
        match style {
            PositionalStyle::Question => bytes
                .iter()
                .zip(&mask)
                .filter(|(b, code)| **code && **b == b'?')
                .count(),
            PositionalStyle::Dollar => {
                let mut max = 0;
                let mut i = 0;
                while i < bytes.len() {
                    if mask[i] && bytes[i] == b'$' && (i == 0 || !is_ident(bytes[i - 1])) {
                        let digits = bytes[i + 1..]
                            .iter()
                            .take_while(|b| b.is_ascii_digit())
                            .count();
                        if let Ok(n) = sql[i + 1..i + 1 + digits].parse::<usize>() {
                            max = max.max(n);
                        }
                        i += 1 + digits;
                    } else {
                        i += 1;
                    }
                }
                max
            }
        }
    }

    pub(super) fn strip_where(sql: &str) -> Option<String> {
        let bytes = sql.as_bytes();
        let mask = code_mask(sql);
        let depth = paren_depth(bytes, &mask);

        let start = (0..bytes.len()).find(|&i| mask[i] && depth[i] == 0 && keyword_at(bytes, i, "WHERE"))?;
        let end = (start + "WHERE".len()..bytes.len())
            .find(|&i| {
                mask[i]
                    && depth[i] == 0
                    && (bytes[i] == b';'
                        || two_keywords_at(bytes, i, "ORDER", "BY")
                        || two_keywords_at(bytes, i, "GROUP", "BY")
                        || keyword_at(bytes, i, "HAVING"))
            })
            .unwrap_or(bytes.len());

        let head = sql[..start].trim_end();
        let tail = sql[end..].trim_start();
        Some(if tail.is_empty() {
            head.to_string()
        } else {
            format!("{head} {tail}")
        })
    }

    fn quoted_end(bytes: &[u8], open: usize, close: u8) -> usize {
        let mut i = open + 1;
        while i < bytes.len() {
            if bytes[i] == close {
                // Doubled delimiter is an escaped one.
                if bytes.get(i + 1) == Some(&close) && close != b']' {
                    i += 2;
                    continue;
                }
                return i + 1;
            }
            i += 1;
        }
        bytes.len()
    }

    fn find_from(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
        bytes
            .get(from..)?
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|p| from + p)
    }

    fn paren_depth(bytes: &[u8], mask: &[bool]) -> Vec<u32> {
        let mut depth = 0u32;
        bytes
            .iter()
            .zip(mask)
            .map(|(b, code)| {
                if *code && *b == b'(' {
                    depth += 1;
                    depth
                } else if *code && *b == b')' {
                    let here = depth;
                    depth = depth.saturating_sub(1);
                    here
                } else {
                    depth
                }
            })
            .collect()
    }

    fn keyword_at(bytes: &[u8], i: usize, keyword: &str) -> bool {
        let end = i + keyword.len();
        end <= bytes.len()
            && bytes[i..end].eq_ignore_ascii_case(keyword.as_bytes())
            && (i == 0 || !is_ident(bytes[i - 1]))
            && bytes.get(end).is_none_or(|b| !is_ident(*b))
    }

    fn two_keywords_at(bytes: &[u8], i: usize, first: &str, second: &str) -> bool {
        if !keyword_at(bytes, i, first) {
            return false;
        }
        let mut j = i + first.len();
        let gap = j;
        while j < bytes.len() && bytes[j].is_ascii_whitespace() {
            j += 1;
        }
        j > gap && keyword_at(bytes, j, second)
    }

    pub(super) fn is_ident_start(b: u8) -> bool {
        b.is_ascii_alphabetic() || b == b'_'
    }

    pub(super) fn is_ident(b: u8) -> bool {
        b.is_ascii_alphanumeric() || b == b'_'
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_named_placeholders_skip_literals_and_system_variables() {
            let sql = "SELECT @@ROWCOUNT, '@notme', [col@x], \"@q\" FROM t -- @c\n WHERE a = @a /* @b */ AND b=@b_2";
            let names: Vec<_> = named_placeholders(sql).into_iter().map(|p| p.name).collect();
            assert_eq!(names, vec!["a", "b_2"]);
        }

        #[test]
        fn test_unterminated_literal_hides_the_rest() {
            assert!(named_placeholders("SELECT 'open @x").is_empty());
            assert_eq!(positional_count("SELECT ?, '?", PositionalStyle::Question), 1);
        }

        #[test]
        fn test_strip_where_stops_at_clause_keywords() {
            let sql = "SELECT (SELECT 1 FROM s WHERE s.a = 1) AS x FROM t WHERE t.b = @b GROUP BY x";
            assert_eq!(
                strip_where(sql).unwrap(),
                "SELECT (SELECT 1 FROM s WHERE s.a = 1) AS x FROM t GROUP BY x"
            );
            assert_eq!(strip_where("SELECT nowhere FROM somewhere_t"), None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [VendorKind; 4] = [
        VendorKind::Mssql,
        VendorKind::Mysql,
        VendorKind::Postgresql,
        VendorKind::Sqlite,
    ];

    fn names(sql: &str, vendor: VendorKind) -> Vec<String> {
        named_placeholders(sql, vendor).into_iter().map(|p| p.name).collect()
    }

    #[test]
    fn test_named_placeholders_skip_literals_and_comments() {
        let sql = "SELECT '@notme' FROM t -- @c\n WHERE a = @a /* @b */ AND b = @b_2";
        for vendor in ALL {
            assert_eq!(names(sql, vendor), vec!["a", "b_2"], "{vendor}");
        }
    }

    #[test]
    fn test_tsql_system_variables_and_brackets() {
        let sql = "SELECT @@ROWCOUNT, [col@x], \"@q\" FROM t WHERE a = @a";
        assert_eq!(names(sql, VendorKind::Mssql), vec!["a"]);
    }

    #[test]
    fn test_placeholder_offsets_cover_the_name() {
        let sql = "SELECT *\nFROM t\nWHERE a = @first AND b = @second";
        for vendor in ALL {
            let found = named_placeholders(sql, vendor);
            let spans: Vec<_> = found.iter().map(|p| &sql[p.start..p.end]).collect();
            assert_eq!(spans, vec!["@first", "@second"], "{vendor}");
        }
    }

    #[test]
    fn test_email_like_text_is_not_a_placeholder() {
        assert!(named_placeholders("SELECT user@host", VendorKind::Mssql).is_empty());
        assert!(named_placeholders("SELECT user@host", VendorKind::Postgresql).is_empty());
    }

    #[test]
    fn test_escaped_quote_stays_in_literal() {
        let sql = "SELECT 'it''s @x' WHERE y = @y";
        for vendor in ALL {
            assert_eq!(parameter_names(sql, vendor), vec!["y"], "{vendor}");
        }
    }

    #[test]
    fn test_parameter_names_are_distinct() {
        let sql = "SELECT * FROM t WHERE (@name IS NULL OR name = @name) ORDER BY id OFFSET @offset ROWS FETCH NEXT @limit ROWS ONLY";
        assert_eq!(parameter_names(sql, VendorKind::Mssql), vec!["name", "offset", "limit"]);
    }

    #[test]
    fn test_untokenizable_sql_falls_back_to_lexical_scan() {
        assert_eq!(names("SELECT @a, 'unterminated", VendorKind::Mssql), vec!["a"]);
    }

    #[test]
    fn test_rewrite_named() {
        let mut n = 0;
        let out = rewrite_named("a = @x AND b = @y AND c = @x", VendorKind::Mssql, |_| {
            n += 1;
            format!("@P{n}")
        });
        assert_eq!(out, "a = @P1 AND b = @P2 AND c = @P3");
    }

    #[test]
    fn test_positional_count() {
        assert_eq!(positional_count("SELECT ? , '?' , ?", VendorKind::Mysql), 2);
        assert_eq!(positional_count("SELECT ? , '?' , ?", VendorKind::Sqlite), 2);
        assert_eq!(positional_count("SELECT $1, $3, '$9', a$2", VendorKind::Postgresql), 3);
        assert_eq!(positional_count("SELECT 1", VendorKind::Postgresql), 0);
    }

    #[test]
    fn test_strip_where_reserializes_parsed_select() {
        assert_eq!(
            strip_where("select id, name from users where name = @name", VendorKind::Mssql).unwrap(),
            "SELECT id, name FROM users"
        );
    }

    #[test]
    fn test_strip_where_keeps_pagination() {
        let sql = "SELECT * FROM users WHERE (@name IS NULL OR name LIKE @name) ORDER BY id OFFSET @offset ROWS FETCH NEXT @limit ROWS ONLY";
        let stripped = strip_where(sql, VendorKind::Mssql).unwrap();
        assert!(!stripped.to_uppercase().contains("WHERE"), "{stripped}");
        assert!(!stripped.contains("@name"), "{stripped}");
        assert!(stripped.contains("ORDER BY id"), "{stripped}");
        assert!(stripped.contains("OFFSET @offset ROWS"), "{stripped}");
        assert!(stripped.contains("@limit ROWS ONLY"), "{stripped}");
        assert_eq!(parameter_names(&stripped, VendorKind::Mssql), vec!["offset", "limit"]);
    }

    #[test]
    fn test_strip_where_to_end() {
        assert_eq!(
            strip_where("SELECT TOP (@limit) * FROM t where x = @x", VendorKind::Mssql).unwrap(),
            "SELECT TOP (@limit) * FROM t"
        );
    }

    #[test]
    fn test_strip_where_ignores_subqueries_and_literals() {
        let sql = "SELECT (SELECT 1 FROM s WHERE s.a = 1) AS x, 'WHERE' FROM t WHERE t.b = @b GROUP BY x";
        assert_eq!(
            strip_where(sql, VendorKind::Mssql).unwrap(),
            "SELECT (SELECT 1 FROM s WHERE s.a = 1) AS x, 'WHERE' FROM t GROUP BY x"
        );
    }

    #[test]
    fn test_strip_where_without_where() {
        assert_eq!(strip_where("SELECT nowhere FROM somewhere_t", VendorKind::Mssql), None);
    }

    #[test]
    fn test_strip_where_leaves_set_operations_alone() {
        let sql = "SELECT a FROM t WHERE a = @a UNION SELECT a FROM u";
        assert_eq!(strip_where(sql, VendorKind::Mssql), None);
    }

    #[test]
    fn test_unparseable_sql_is_stripped_lexically() {
        assert_eq!(
            strip_where("SELECT * FROM t WHERE a = @a ORDER BY", VendorKind::Mssql).unwrap(),
            "SELECT * FROM t ORDER BY"
        );
    }
}
