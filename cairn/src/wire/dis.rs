/*
SPDX-FileCopyrightText: Copyright 2026 LG Electronics Inc.
SPDX-License-Identifier: MIT
*/

//! DIS wire codec for the vnode list.
//!
//! Data-Is-Strings: every number travels as a chain of decimal
//! digit-counts ending in a signed digit string, every string as a counted
//! byte run.  `4150` encodes as `4+4150` (count, sign, digits); a
//! 10-digit value nests one level: `2` `10` `+` then the digits.  Reading
//! a count followed by another digit means the field just read was itself
//! a count; a `+`/`-` terminates the chain.
//!
//! The vnode-list layout on top of that:
//!
//! ```text
//! version : unsigned        3 or 4
//! modtime : signed 64-bit
//! nvnodes : unsigned
//! per vnode:
//!   id         : string
//!   nresources : unsigned
//!   per resource:
//!     name  : string
//!     value : string
//!     type  : signed        -- V4 only
//!     flags : signed        -- V4 only (reserved, sent as 0)
//! ```
//!
//! Versions 3 and 4 decode; only 4 encodes.  The decoder bails on the
//! first malformed sub-field; partially decoded state is dropped on the
//! error path.

use std::io::{Read, Write};

use thiserror::Error;

use super::{VnodeAttr, VnodeDefList, VnodeEntry};

/// Decoded wire versions.
pub const PS_DIS_V3: u64 = 3;
/// Current encode version.
pub const PS_DIS_V4: u64 = 4;

/// Cap on counted-string lengths; anything larger is a corrupt stream.
const MAX_STR_LEN: u64 = 16 * 1024 * 1024;

/// Wire-level failures.
#[derive(Debug, Error)]
pub enum DisError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("unexpected end of stream")]
    Eof,

    #[error("invalid character {0:#04x} in number")]
    BadDigit(u8),

    #[error("leading zero in count")]
    LeadingZero,

    #[error("number overflows 64 bits")]
    Overflow,

    #[error("counted string of {0} bytes exceeds the sanity cap")]
    HugeString(u64),

    #[error("string is not valid UTF-8")]
    BadUtf8,

    #[error("unsupported protocol version {0}")]
    Proto(u64),

    #[error("negative value {0} where an unsigned was expected")]
    Negative(i64),
}

// ── Primitive encode ──────────────────────────────────────────────────────────

fn digit_string(magnitude: u64) -> String {
    magnitude.to_string()
}

/// Write the count chain + sign + digits for one number.
fn write_number<W: Write>(w: &mut W, negative: bool, magnitude: u64) -> Result<(), DisError> {
    let digits = digit_string(magnitude);
    let mut counts: Vec<String> = Vec::new();
    let mut len = digits.len();
    while len > 9 {
        let c = len.to_string();
        len = c.len();
        counts.push(c);
    }
    counts.push(len.to_string());

    for c in counts.iter().rev() {
        w.write_all(c.as_bytes())?;
    }
    w.write_all(if negative { b"-" } else { b"+" })?;
    w.write_all(digits.as_bytes())?;
    Ok(())
}

/// Write an unsigned integer.
pub fn write_unsigned<W: Write>(w: &mut W, v: u64) -> Result<(), DisError> {
    write_number(w, false, v)
}

/// Write a signed integer.
pub fn write_signed<W: Write>(w: &mut W, v: i64) -> Result<(), DisError> {
    write_number(w, v < 0, v.unsigned_abs())
}

/// Write a counted string.
pub fn write_string<W: Write>(w: &mut W, s: &str) -> Result<(), DisError> {
    write_unsigned(w, s.len() as u64)?;
    w.write_all(s.as_bytes())?;
    Ok(())
}

// ── Primitive decode ──────────────────────────────────────────────────────────

fn read_byte<R: Read>(r: &mut R) -> Result<u8, DisError> {
    let mut buf = [0u8; 1];
    match r.read_exact(&mut buf) {
        Ok(()) => Ok(buf[0]),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(DisError::Eof),
        Err(e) => Err(e.into()),
    }
}

fn read_exact_digits<R: Read>(r: &mut R, len: usize) -> Result<u64, DisError> {
    let mut value: u64 = 0;
    for _ in 0..len {
        let b = read_byte(r)?;
        if !b.is_ascii_digit() {
            return Err(DisError::BadDigit(b));
        }
        value = value
            .checked_mul(10)
            .and_then(|v| v.checked_add((b - b'0') as u64))
            .ok_or(DisError::Overflow)?;
    }
    Ok(value)
}

/// Read one number: (negative, magnitude).
fn read_number<R: Read>(r: &mut R) -> Result<(bool, u64), DisError> {
    // First count: a single digit.
    let b = read_byte(r)?;
    if !b.is_ascii_digit() {
        return Err(DisError::BadDigit(b));
    }
    if b == b'0' {
        return Err(DisError::LeadingZero);
    }
    let mut count = (b - b'0') as u64;

    loop {
        let b = read_byte(r)?;
        match b {
            b'+' => return Ok((false, read_exact_digits(r, count as usize)?)),
            b'-' => return Ok((true, read_exact_digits(r, count as usize)?)),
            b'0'..=b'9' => {
                // The field just announced is itself a count: its first
                // digit is already in hand.
                if count < 1 {
                    return Err(DisError::LeadingZero);
                }
                let mut value = (b - b'0') as u64;
                for _ in 1..count {
                    let d = read_byte(r)?;
                    if !d.is_ascii_digit() {
                        return Err(DisError::BadDigit(d));
                    }
                    value = value
                        .checked_mul(10)
                        .and_then(|v| v.checked_add((d - b'0') as u64))
                        .ok_or(DisError::Overflow)?;
                }
                count = value;
            }
            other => return Err(DisError::BadDigit(other)),
        }
    }
}

/// Read an unsigned integer.
pub fn read_unsigned<R: Read>(r: &mut R) -> Result<u64, DisError> {
    let (neg, mag) = read_number(r)?;
    if neg {
        return Err(DisError::Negative(-(mag as i64)));
    }
    Ok(mag)
}

/// Read a signed integer.
pub fn read_signed<R: Read>(r: &mut R) -> Result<i64, DisError> {
    let (neg, mag) = read_number(r)?;
    if mag > i64::MAX as u64 {
        return Err(DisError::Overflow);
    }
    Ok(if neg { -(mag as i64) } else { mag as i64 })
}

/// Read a counted string.
pub fn read_string<R: Read>(r: &mut R) -> Result<String, DisError> {
    let len = read_unsigned(r)?;
    if len > MAX_STR_LEN {
        return Err(DisError::HugeString(len));
    }
    let mut buf = vec![0u8; len as usize];
    match r.read_exact(&mut buf) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(DisError::Eof),
        Err(e) => return Err(e.into()),
    }
    String::from_utf8(buf).map_err(|_| DisError::BadUtf8)
}

// ── Vnode list codec ──────────────────────────────────────────────────────────

/// Encode a vnode list at the current version (4).
pub fn encode_vnode_list<W: Write>(w: &mut W, vnl: &VnodeDefList) -> Result<(), DisError> {
    write_unsigned(w, PS_DIS_V4)?;
    write_signed(w, vnl.modtime)?;
    write_unsigned(w, vnl.vnodes.len() as u64)?;
    for vnode in &vnl.vnodes {
        write_string(w, &vnode.id)?;
        write_unsigned(w, vnode.attrs.len() as u64)?;
        for attr in &vnode.attrs {
            write_string(w, &attr.name)?;
            write_string(w, &attr.value)?;
            write_signed(w, attr.type_code as i64)?;
            write_signed(w, attr.flags as i64)?;
        }
    }
    Ok(())
}

/// Decode a version 3 or 4 vnode list.
pub fn decode_vnode_list<R: Read>(r: &mut R) -> Result<VnodeDefList, DisError> {
    let version = read_unsigned(r)?;
    match version {
        PS_DIS_V3 => decode_body(r, false),
        PS_DIS_V4 => decode_body(r, true),
        other => Err(DisError::Proto(other)),
    }
}

fn decode_body<R: Read>(r: &mut R, v4: bool) -> Result<VnodeDefList, DisError> {
    let modtime = read_signed(r)?;
    let nvnodes = read_unsigned(r)?;
    let mut vnl = VnodeDefList {
        modtime,
        vnodes: Vec::new(),
    };
    for _ in 0..nvnodes {
        let id = read_string(r)?;
        let nattrs = read_unsigned(r)?;
        let mut attrs = Vec::new();
        for _ in 0..nattrs {
            let name = read_string(r)?;
            let value = read_string(r)?;
            let (type_code, flags) = if v4 {
                (read_signed(r)? as i32, read_signed(r)? as i32)
            } else {
                (super::attr_type::UNSPECIFIED, 0)
            };
            attrs.push(VnodeAttr {
                name,
                value,
                type_code,
                flags,
            });
        }
        vnl.vnodes.push(VnodeEntry { id, attrs });
    }
    Ok(vnl)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
