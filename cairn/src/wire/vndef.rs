/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! Parser for vnode-definition files.
//!
//! Line-oriented UTF-8:
//!
//! ```text
//! <id> : <attrname> = <value> [ type = <typename> ]
//! ```
//!
//! Blank lines and surrounding whitespace are ignored.  Values may be
//! double-quoted to carry embedded whitespace.  Unknown type names are a
//! hard error.  The line counter starts at 2: a `$configversion` header
//! line is assumed to have been consumed by the caller.

use thiserror::Error;

use super::{type_code_for, VnodeAttr, VnodeDefList};

/// Maximum vnode id length.
const MAX_ID_LEN: usize = 64;

/// Which extra characters a vnode id may carry, on top of letters,
/// digits, and `-_@[]#^/\`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdCharSet {
    /// Dot allowed (natural vnodes named after hosts).
    #[default]
    AllowDot,
    /// Dot and comma allowed.
    AllowDotComma,
    /// Comma allowed, dot is not.
    AllowComma,
}

/// Definition-file failures, each carrying the offending line number.
#[derive(Debug, Error, PartialEq)]
pub enum VndefError {
    #[error("line {line}: missing '{delim}'")]
    MissingDelim { line: usize, delim: char },

    #[error("line {line}: no vnode id")]
    NoVnodeId { line: usize },

    #[error("line {line}: invalid character in vnode name \"{id}\"")]
    BadVnodeChar { line: usize, id: String },

    #[error("line {line}: vnode name \"{id}\" is too long")]
    IdTooLong { line: usize, id: String },

    #[error("line {line}: no attribute name")]
    NoAttrName { line: usize },

    #[error("line {line}: no attribute value")]
    NoAttrValue { line: usize },

    #[error("line {line}: illegal char '=' in value")]
    IllegalValueChar { line: usize },

    #[error("line {line}: unterminated quote")]
    UnterminatedQuote { line: usize },

    #[error("line {line}: invalid type '{name}'")]
    BadType { line: usize, name: String },

    #[error("line {line}: invalid keyword '{keyword}'")]
    BadKeyword { line: usize, keyword: String },
}

/// Is `c` legal in a vnode id?
pub fn legal_vnode_char(c: char, ids: IdCharSet) -> bool {
    if c.is_ascii_alphanumeric() || "-_@[]#^/\\".contains(c) {
        return true;
    }
    match ids {
        IdCharSet::AllowDot => c == '.',
        IdCharSet::AllowDotComma => c == '.' || c == ',',
        IdCharSet::AllowComma => c == ',',
    }
}

/// Parse a whole definition stream (header already consumed).
pub fn parse_vnode_defs(input: &str, ids: IdCharSet) -> Result<VnodeDefList, VndefError> {
    let mut vnl = VnodeDefList::default();
    // The $configversion header was line 1.
    let mut line_num = 1usize;

    for raw in input.lines() {
        line_num += 1;
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        parse_line(line, line_num, ids, &mut vnl)?;
    }
    Ok(vnl)
}

fn parse_line(
    line: &str,
    line_num: usize,
    ids: IdCharSet,
    vnl: &mut VnodeDefList,
) -> Result<(), VndefError> {
    // <ID> :
    let Some((id_part, rest)) = line.split_once(':') else {
        return Err(VndefError::MissingDelim {
            line: line_num,
            delim: ':',
        });
    };
    let id = id_part.trim();
    if id.is_empty() {
        return Err(VndefError::NoVnodeId { line: line_num });
    }
    if let Some(_bad) = id.chars().find(|&c| !legal_vnode_char(c, ids)) {
        return Err(VndefError::BadVnodeChar {
            line: line_num,
            id: id.to_string(),
        });
    }
    if id.len() > MAX_ID_LEN {
        return Err(VndefError::IdTooLong {
            line: line_num,
            id: id.to_string(),
        });
    }

    // <ATTRNAME> =
    let Some((name_part, value_part)) = rest.split_once('=') else {
        return Err(VndefError::MissingDelim {
            line: line_num,
            delim: '=',
        });
    };
    let attrname = name_part.trim();
    if attrname.is_empty() {
        return Err(VndefError::NoAttrName { line: line_num });
    }

    // <VALUE> [type = <typename>]
    let value_part = value_part.trim_start();
    if value_part.is_empty() {
        return Err(VndefError::NoAttrValue { line: line_num });
    }

    let (value, tail) = take_value(value_part, line_num)?;

    let mut type_code = super::attr_type::UNSPECIFIED;
    let tail = tail.trim();
    if !tail.is_empty() {
        // keyword = typeval
        let Some((kw, tv)) = tail.split_once('=') else {
            return Err(VndefError::MissingDelim {
                line: line_num,
                delim: '=',
            });
        };
        let kw = kw.trim();
        if kw != "type" {
            return Err(VndefError::BadKeyword {
                line: line_num,
                keyword: kw.to_string(),
            });
        }
        let tv = tv.trim();
        if tv.is_empty() {
            return Err(VndefError::NoAttrValue { line: line_num });
        }
        type_code = type_code_for(tv).ok_or_else(|| VndefError::BadType {
            line: line_num,
            name: tv.to_string(),
        })?;
    }

    if value.contains('=') {
        return Err(VndefError::IllegalValueChar { line: line_num });
    }

    vnl.set_attr(
        id,
        VnodeAttr {
            name: attrname.to_string(),
            value,
            type_code,
            flags: 0,
        },
    );
    Ok(())
}

/// Take the attribute value off the front of `s`: a double-quoted run
/// (which may hold whitespace) or bare text up to the optional trailing
/// `type = …` clause.
fn take_value(s: &str, line_num: usize) -> Result<(String, &str), VndefError> {
    if let Some(stripped) = s.strip_prefix('"') {
        let Some(close) = stripped.find('"') else {
            return Err(VndefError::UnterminatedQuote { line: line_num });
        };
        return Ok((stripped[..close].to_string(), &stripped[close + 1..]));
    }

    // Bare value.  A second '=' on the line announces a keyword clause:
    // the last whitespace-separated token before it is the keyword, the
    // value is everything in front.  An '=' glued to the value is illegal.
    if let Some(eq) = s.find('=') {
        let before = s[..eq].trim_end();
        let Some(ws) = before.rfind(char::is_whitespace) else {
            return Err(VndefError::IllegalValueChar { line: line_num });
        };
        let value = before[..ws].trim();
        if value.is_empty() {
            return Err(VndefError::NoAttrValue { line: line_num });
        }
        return Ok((value.to_string(), &s[ws + 1..]));
    }
    Ok((s.trim().to_string(), ""))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::wire::attr_type;

    #[test]
    fn basic_lines_parse() {
        let input = "\
jupiter[0] : resources_available.ncpus = 8
jupiter[0] : resources_available.mem = 16gb type = size
jupiter[1] : sharing = default_excl
";
        let vnl = parse_vnode_defs(input, IdCharSet::AllowDot).unwrap();
        assert_eq!(vnl.vnodes.len(), 2);
        let j0 = vnl.find("jupiter[0]").unwrap();
        assert_eq!(j0.attr("resources_available.ncpus"), Some("8"));
        let mem = j0
            .attrs
            .iter()
            .find(|a| a.name == "resources_available.mem")
            .unwrap();
        assert_eq!(mem.value, "16gb");
        assert_eq!(mem.type_code, attr_type::SIZE);
    }

    #[test]
    fn blank_lines_and_whitespace_are_ignored() {
        let input = "\n\n   v1 :   ncpus   =   4   \n\n";
        let vnl = parse_vnode_defs(input, IdCharSet::AllowDot).unwrap();
        assert_eq!(vnl.find("v1").unwrap().attr("ncpus"), Some("4"));
    }

    #[test]
    fn quoted_values_keep_embedded_whitespace() {
        let input = "v1 : comment = \"two socket node\"\n";
        let vnl = parse_vnode_defs(input, IdCharSet::AllowDot).unwrap();
        assert_eq!(vnl.find("v1").unwrap().attr("comment"), Some("two socket node"));
    }

    #[test]
    fn quoted_value_with_type_clause() {
        let input = "v1 : comment = \"a b\" type = string\n";
        let vnl = parse_vnode_defs(input, IdCharSet::AllowDot).unwrap();
        let attr = &vnl.find("v1").unwrap().attrs[0];
        assert_eq!(attr.value, "a b");
        assert_eq!(attr.type_code, attr_type::STRING);
    }

    #[test]
    fn line_numbers_start_at_two() {
        let input = "v1 ncpus = 4\n";
        assert_eq!(
            parse_vnode_defs(input, IdCharSet::AllowDot).unwrap_err(),
            VndefError::MissingDelim { line: 2, delim: ':' }
        );
        let input = "v1 : ncpus = 4\nv2 ncpus = 4\n";
        assert_eq!(
            parse_vnode_defs(input, IdCharSet::AllowDot).unwrap_err(),
            VndefError::MissingDelim { line: 3, delim: ':' }
        );
    }

    #[test]
    fn bad_id_characters_are_rejected() {
        let err = parse_vnode_defs("bad!node : ncpus = 4\n", IdCharSet::AllowDot).unwrap_err();
        assert!(matches!(err, VndefError::BadVnodeChar { line: 2, .. }));
    }

    #[test]
    fn dot_allowed_only_with_the_right_charset() {
        assert!(parse_vnode_defs("host.domain : ncpus = 4\n", IdCharSet::AllowDot).is_ok());
        assert!(matches!(
            parse_vnode_defs("host.domain : ncpus = 4\n", IdCharSet::AllowComma).unwrap_err(),
            VndefError::BadVnodeChar { .. }
        ));
        assert!(parse_vnode_defs("a,b : ncpus = 4\n", IdCharSet::AllowComma).is_ok());
    }

    #[test]
    fn overlong_id_is_rejected() {
        let id = "v".repeat(65);
        let input = format!("{} : ncpus = 4\n", id);
        assert!(matches!(
            parse_vnode_defs(&input, IdCharSet::AllowDot).unwrap_err(),
            VndefError::IdTooLong { line: 2, .. }
        ));
    }

    #[test]
    fn unknown_type_is_a_hard_error() {
        let err =
            parse_vnode_defs("v1 : ncpus = 4 type = quux\n", IdCharSet::AllowDot).unwrap_err();
        assert_eq!(
            err,
            VndefError::BadType {
                line: 2,
                name: "quux".to_string()
            }
        );
    }

    #[test]
    fn wrong_keyword_is_rejected() {
        let err =
            parse_vnode_defs("v1 : ncpus = 4 kind = long\n", IdCharSet::AllowDot).unwrap_err();
        assert!(matches!(err, VndefError::BadKeyword { line: 2, .. }));
    }

    #[test]
    fn missing_pieces_are_reported() {
        assert_eq!(
            parse_vnode_defs(" : ncpus = 4\n", IdCharSet::AllowDot).unwrap_err(),
            VndefError::NoVnodeId { line: 2 }
        );
        assert_eq!(
            parse_vnode_defs("v1 : = 4\n", IdCharSet::AllowDot).unwrap_err(),
            VndefError::NoAttrName { line: 2 }
        );
        assert_eq!(
            parse_vnode_defs("v1 : ncpus =\n", IdCharSet::AllowDot).unwrap_err(),
            VndefError::NoAttrValue { line: 2 }
        );
        assert_eq!(
            parse_vnode_defs("v1 : ncpus\n", IdCharSet::AllowDot).unwrap_err(),
            VndefError::MissingDelim { line: 2, delim: '=' }
        );
    }

    #[test]
    fn unterminated_quote_is_rejected() {
        assert_eq!(
            parse_vnode_defs("v1 : comment = \"oops\n", IdCharSet::AllowDot).unwrap_err(),
            VndefError::UnterminatedQuote { line: 2 }
        );
    }

    #[test]
    fn duplicate_attribute_takes_last_value() {
        let input = "v1 : ncpus = 4\nv1 : ncpus = 8\n";
        let vnl = parse_vnode_defs(input, IdCharSet::AllowDot).unwrap();
        assert_eq!(vnl.find("v1").unwrap().attr("ncpus"), Some("8"));
        assert_eq!(vnl.find("v1").unwrap().attrs.len(), 1);
    }
}
