//! EOL and keyword translation
//!
//! Working files may differ from their pristine text bases in line
//! endings (`svn:eol-style`) and keyword fields (`svn:keywords`).
//! Expansion turns the repository form into the working form;
//! contraction undoes it, producing bytes comparable against the text
//! base.
//!
//! Keyword fields take three shapes: bare `$Kw$`, expanded
//! `$Kw: value $`, and fixed-width `$Kw:: value $` where the field
//! width is preserved and overflow is marked with `#`.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::fsutil;
use crate::timeutil;

pub const EOL_LF: &[u8] = b"\n";
pub const EOL_CR: &[u8] = b"\r";
pub const EOL_CRLF: &[u8] = b"\r\n";

/// A candidate keyword field never grows beyond this many bytes.
const MAX_KEYWORD_LENGTH: usize = 255;

/// Expanded keyword values are capped at this many bytes.
const MAX_VALUE_LENGTH: usize = 250;

/// Keyword name to expansion value; `None` values mean contraction.
pub type KeywordMap = BTreeMap<String, Option<Vec<u8>>>;

/// The platform's line ending.
pub fn native_eol() -> &'static [u8] {
    if cfg!(windows) { EOL_CRLF } else { EOL_LF }
}

/// Line ending for working files under the given style.
pub fn working_eol(style: &str) -> Option<&'static [u8]> {
    match style {
        "native" => Some(native_eol()),
        "LF" => Some(EOL_LF),
        "CR" => Some(EOL_CR),
        "CRLF" => Some(EOL_CRLF),
        _ => None,
    }
}

/// Line ending for the repository form under the given style.
pub fn base_eol(style: &str) -> Option<&'static [u8]> {
    match style {
        "native" | "LF" => Some(EOL_LF),
        "CR" => Some(EOL_CR),
        "CRLF" => Some(EOL_CRLF),
        _ => None,
    }
}

/// Everything a translation pass needs.
#[derive(Debug, Clone, Default)]
pub struct TranslateOptions {
    pub eol: Option<Vec<u8>>,
    pub keywords: KeywordMap,
}

impl TranslateOptions {
    pub fn is_noop(&self) -> bool {
        self.eol.is_none() && self.keywords.is_empty()
    }
}

/// Derive the keyword map for one file from its `svn:keywords` value
/// and entry fields. With `expand` false every value is `None`,
/// directing translation to contract fields back to their bare form.
pub fn compute_keywords(
    spec: &str,
    url: Option<&str>,
    author: Option<&str>,
    date: Option<&str>,
    revision: Option<i64>,
    expand: bool,
) -> KeywordMap {
    let mut map = KeywordMap::new();
    let parsed_date = date.and_then(timeutil::parse_date);
    for token in spec.split_whitespace() {
        match token {
            "LastChangedDate" | "Date" => {
                let value = expand
                    .then(|| parsed_date.map(format_human_date))
                    .flatten();
                insert_aliases(&mut map, &["LastChangedDate", "Date"], value);
            }
            "LastChangedRevision" | "Revision" | "Rev" => {
                let value = expand
                    .then(|| revision.map(|r| r.to_string().into_bytes()))
                    .flatten();
                insert_aliases(&mut map, &["LastChangedRevision", "Revision", "Rev"], value);
            }
            "LastChangedBy" | "Author" => {
                let value = expand
                    .then(|| author.map(|a| a.as_bytes().to_vec()))
                    .flatten();
                insert_aliases(&mut map, &["LastChangedBy", "Author"], value);
            }
            "HeadURL" | "URL" => {
                let value = expand.then(|| url.map(|u| u.as_bytes().to_vec())).flatten();
                insert_aliases(&mut map, &["HeadURL", "URL"], value);
            }
            "Id" => {
                let value = expand
                    .then(|| {
                        let name = url.map(url_basename).unwrap_or_default();
                        let rev = revision.map(|r| r.to_string()).unwrap_or_default();
                        let date = parsed_date
                            .map(|d| d.format("%Y-%m-%d %H:%M:%SZ").to_string())
                            .unwrap_or_default();
                        let author = author.unwrap_or_default();
                        Some(format!("{name} {rev} {date} {author}").into_bytes())
                    })
                    .flatten();
                insert_aliases(&mut map, &["Id"], value);
            }
            _ => {}
        }
    }
    map
}

fn insert_aliases(map: &mut KeywordMap, names: &[&str], value: Option<Vec<u8>>) {
    for name in names {
        map.insert(name.to_string(), value.clone());
    }
}

fn format_human_date(date: DateTime<Utc>) -> Vec<u8> {
    date.format("%Y-%m-%d %H:%M:%S +0000 (%a, %d %b %Y)")
        .to_string()
        .into_bytes()
}

fn url_basename(url: &str) -> String {
    let trimmed = url.trim_end_matches('/');
    let segment = trimmed.rsplit('/').next().unwrap_or(trimmed);
    // Undo percent-encoding applied when the name was embedded in a URL.
    let bytes = segment.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let Ok(byte) = u8::from_str_radix(&segment[i + 1..i + 3], 16) {
                out.push(byte);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

// ==================== Translation ====================

/// Translate a whole buffer: normalize line endings to `eol` (when set)
/// and expand or contract keyword fields.
pub fn translate_bytes(input: &[u8], options: &TranslateOptions) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;
    while i < input.len() {
        match input[i] {
            b'\r' | b'\n' => {
                let consumed = if input[i] == b'\r' && input.get(i + 1) == Some(&b'\n') {
                    2
                } else {
                    1
                };
                match &options.eol {
                    Some(eol) => out.extend_from_slice(eol),
                    None => out.extend_from_slice(&input[i..i + consumed]),
                }
                i += consumed;
            }
            b'$' if !options.keywords.is_empty() => {
                match try_translate_keyword(&input[i..], &options.keywords) {
                    Some((replacement, consumed)) => {
                        out.extend_from_slice(&replacement);
                        i += consumed;
                    }
                    None => {
                        out.push(b'$');
                        i += 1;
                    }
                }
            }
            byte => {
                out.push(byte);
                i += 1;
            }
        }
    }
    out
}

/// Attempt keyword translation at a `$`. Returns the replacement bytes
/// and how many input bytes the field spans.
fn try_translate_keyword(input: &[u8], keywords: &KeywordMap) -> Option<(Vec<u8>, usize)> {
    let limit = input.len().min(MAX_KEYWORD_LENGTH);
    let mut end = None;
    for (offset, &byte) in input.iter().enumerate().take(limit).skip(1) {
        if byte == b'\n' || byte == b'\r' {
            break;
        }
        if byte == b'$' {
            end = Some(offset);
            break;
        }
    }
    let end = end?;
    let body = &input[1..end];
    let span = end + 1;

    for (name, value) in keywords {
        let Some(rest) = body.strip_prefix(name.as_bytes()) else {
            continue;
        };
        if rest.is_empty() {
            // Bare form.
            return match value {
                Some(v) => Some((expanded_field(name, v), span)),
                None => None, // already contracted
            };
        }
        if let Some(field) = rest.strip_prefix(b"::") {
            // Fixed-width form; the field keeps its width.
            if !field.ends_with(b" ") && !field.is_empty() {
                continue;
            }
            let width = field.len();
            let rendered = match value {
                Some(v) => fixed_field(v, width),
                None => vec![b' '; width],
            };
            let mut out = Vec::with_capacity(span);
            out.push(b'$');
            out.extend_from_slice(name.as_bytes());
            out.extend_from_slice(b"::");
            out.extend_from_slice(&rendered);
            out.push(b'$');
            return Some((out, span));
        }
        if rest.first() == Some(&b':') {
            // Expanded form.
            return match value {
                Some(v) => Some((expanded_field(name, v), span)),
                None => Some((format!("${name}$").into_bytes(), span)),
            };
        }
    }
    None
}

fn expanded_field(name: &str, value: &[u8]) -> Vec<u8> {
    let value = &value[..value.len().min(MAX_VALUE_LENGTH)];
    let mut out = Vec::with_capacity(name.len() + value.len() + 5);
    out.push(b'$');
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    out.extend_from_slice(value);
    out.extend_from_slice(b" $");
    out
}

fn fixed_field(value: &[u8], width: usize) -> Vec<u8> {
    if width == 0 {
        return Vec::new();
    }
    // Leading space, value padded or truncated, trailing space; a '#'
    // marks truncation.
    let inner_width = width.saturating_sub(2);
    let mut field = Vec::with_capacity(width);
    field.push(b' ');
    if value.len() <= inner_width {
        field.extend_from_slice(value);
        field.resize(width - 1, b' ');
    } else if inner_width > 0 {
        field.extend_from_slice(&value[..inner_width - 1]);
        field.push(b'#');
    }
    field.resize(width.saturating_sub(1), b' ');
    field.push(b' ');
    field.truncate(width);
    field
}

/// Translate one file into another path.
pub fn translate_file(src: &Path, dst: &Path, options: &TranslateOptions) -> Result<()> {
    if let Some(parent) = dst.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if options.is_noop() {
        fsutil::delete_if_exists(dst)?;
        std::fs::copy(src, dst)?;
        return Ok(());
    }
    let input = std::fs::read(src)?;
    let output = translate_bytes(&input, options);
    fsutil::delete_if_exists(dst)?;
    std::fs::write(dst, output)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expand_options() -> TranslateOptions {
        TranslateOptions {
            eol: None,
            keywords: compute_keywords(
                "Id Revision Author",
                Some("svn://host/repo/trunk/foo.txt"),
                Some("alice"),
                Some("2006-01-01T12:00:00.000000Z"),
                Some(42),
                true,
            ),
        }
    }

    fn contract_options() -> TranslateOptions {
        TranslateOptions {
            eol: None,
            keywords: compute_keywords("Id Revision Author", None, None, None, None, false),
        }
    }

    #[test]
    fn test_eol_normalization() {
        let options = TranslateOptions {
            eol: Some(EOL_LF.to_vec()),
            keywords: KeywordMap::new(),
        };
        let out = translate_bytes(b"a\r\nb\rc\n", &options);
        assert_eq!(out, b"a\nb\nc\n");

        let options = TranslateOptions {
            eol: Some(EOL_CRLF.to_vec()),
            keywords: KeywordMap::new(),
        };
        assert_eq!(translate_bytes(b"a\nb\n", &options), b"a\r\nb\r\n");
    }

    #[test]
    fn test_bare_keyword_expands() {
        let out = translate_bytes(b"rev $Revision$ here", &expand_options());
        assert_eq!(out, b"rev $Revision: 42 $ here");
    }

    #[test]
    fn test_expanded_keyword_contracts() {
        let out = translate_bytes(b"rev $Revision: 42 $ here", &contract_options());
        assert_eq!(out, b"rev $Revision$ here");
    }

    #[test]
    fn test_expand_then_contract_is_identity() {
        let source = b"$Id$ and $Author$\nplain line\n".to_vec();
        let expanded = translate_bytes(&source, &expand_options());
        assert_ne!(expanded, source);
        let contracted = translate_bytes(&expanded, &contract_options());
        assert_eq!(contracted, source);
    }

    #[test]
    fn test_unknown_keyword_left_alone() {
        let out = translate_bytes(b"$Nonsense$ stays", &expand_options());
        assert_eq!(out, b"$Nonsense$ stays");
    }

    #[test]
    fn test_dollar_without_close_left_alone() {
        let out = translate_bytes(b"price is $5 today", &expand_options());
        assert_eq!(out, b"price is $5 today");
    }

    #[test]
    fn test_keyword_not_matched_across_lines() {
        let out = translate_bytes(b"$Revision\n$", &expand_options());
        assert_eq!(out, b"$Revision\n$");
    }

    #[test]
    fn test_fixed_width_field_keeps_width() {
        let out = translate_bytes(b"$Revision::      $", &expand_options());
        assert_eq!(out.len(), b"$Revision::      $".len());
        assert!(out.starts_with(b"$Revision:: 42"));
    }

    #[test]
    fn test_fixed_width_overflow_marker() {
        let options = TranslateOptions {
            eol: None,
            keywords: compute_keywords(
                "Author",
                None,
                Some("averylongauthorname"),
                None,
                None,
                true,
            ),
        };
        let input = b"$Author:: ab $";
        let out = translate_bytes(input, &options);
        assert_eq!(out.len(), input.len());
        assert!(out.contains(&b'#'));
    }

    #[test]
    fn test_id_keyword_shape() {
        let out = translate_bytes(b"$Id$", &expand_options());
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text, "$Id: foo.txt 42 2006-01-01 12:00:00Z alice $");
    }

    #[test]
    fn test_keyword_aliases_share_value() {
        let map = compute_keywords("LastChangedRevision", None, None, None, Some(7), true);
        assert_eq!(map.get("Rev"), map.get("LastChangedRevision"));
        assert!(map.contains_key("Revision"));
    }
}
