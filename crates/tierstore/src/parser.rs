//! TOON format parser using nom
//!
//! File format:
//! ```text
//! TOON001
//! [version: u32]
//! [row_count: u32]
//! ...TOON rows (\n-terminated)...
//! ```
//!
//! Row format:
//! ```text
//! namespace[1]{id,name}: 1,"Alice"     live row
//! namespace[0]{id}: 1                  tombstone for id 1
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_until, take_while1},
    character::complete::{char, digit1, none_of, space0},
    combinator::{all_consuming, map, map_res, opt, recognize, value},
    multi::separated_list0,
    sequence::{delimited, pair, terminated, tuple},
    IResult,
};

use crate::error::{Error, Result};
use crate::record::{Record, Value};

/// Magic header for TOON files
pub const TOON_MAGIC: &[u8] = b"TOON001\n";

/// Magic header for TOON index files
pub const TOON_IDX_MAGIC: &[u8] = b"TOONIDX1";

/// TOON file header
#[derive(Debug, Clone, PartialEq)]
pub struct ToonHeader {
    /// File format version
    pub version: u32,
    /// Number of rows in the file
    pub row_count: u32,
}

/// A decoded row line
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// Namespace the row belongs to
    pub namespace: String,
    /// `false` for tombstones
    pub live: bool,
    /// Field values (tombstones carry only `id`)
    pub record: Record,
}

/// Parse TOON file header
///
/// Format:
/// ```text
/// TOON001\n
/// [4 bytes: version u32 little-endian]
/// [4 bytes: row_count u32 little-endian]
/// ```
pub fn parse_header(input: &[u8]) -> Result<ToonHeader> {
    if input.len() < TOON_MAGIC.len() + 8 {
        return Err(Error::Parse("Input too short for header".to_string()));
    }

    if &input[0..TOON_MAGIC.len()] != TOON_MAGIC {
        return Err(Error::Parse("Invalid TOON magic header".to_string()));
    }

    let mut version = [0u8; 4];
    version.copy_from_slice(&input[TOON_MAGIC.len()..TOON_MAGIC.len() + 4]);
    let mut row_count = [0u8; 4];
    row_count.copy_from_slice(&input[TOON_MAGIC.len() + 4..TOON_MAGIC.len() + 8]);

    Ok(ToonHeader {
        version: u32::from_le_bytes(version),
        row_count: u32::from_le_bytes(row_count),
    })
}

/// Create a TOON file header
pub fn create_header(version: u32, row_count: u32) -> Vec<u8> {
    let mut header = Vec::with_capacity(TOON_MAGIC.len() + 8);
    header.extend_from_slice(TOON_MAGIC);
    header.extend_from_slice(&version.to_le_bytes());
    header.extend_from_slice(&row_count.to_le_bytes());
    header
}

/// Split one raw line off the input
///
/// Returns the line content without the trailing newline
pub fn parse_line(input: &[u8]) -> IResult<&[u8], &[u8]> {
    terminated(take_until("\n"), char('\n'))(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn identifier(input: &str) -> IResult<&str, &str> {
    take_while1(is_ident_char)(input)
}

fn live_flag(input: &str) -> IResult<&str, bool> {
    delimited(
        char('['),
        alt((value(true, char('1')), value(false, char('0')))),
        char(']'),
    )(input)
}

fn field_list(input: &str) -> IResult<&str, Vec<&str>> {
    delimited(char('{'), separated_list0(char(','), identifier), char('}'))(input)
}

fn int_value(input: &str) -> IResult<&str, i64> {
    map_res(recognize(pair(opt(char('-')), digit1)), str::parse::<i64>)(input)
}

fn text_value(input: &str) -> IResult<&str, String> {
    map(
        delimited(
            char('"'),
            opt(escaped_transform(
                none_of("\\\""),
                '\\',
                alt((value("\\", tag("\\")), value("\"", tag("\"")))),
            )),
            char('"'),
        ),
        Option::unwrap_or_default,
    )(input)
}

fn field_value(input: &str) -> IResult<&str, Value> {
    alt((
        map(text_value, Value::Text),
        value(Value::Null, tag("null")),
        map(int_value, Value::Int),
    ))(input)
}

fn row(input: &str) -> IResult<&str, (&str, bool, Vec<&str>, Vec<Value>)> {
    map(
        tuple((
            identifier,
            live_flag,
            field_list,
            char(':'),
            space0,
            separated_list0(char(','), field_value),
        )),
        |(namespace, live, fields, _, _, values)| (namespace, live, fields, values),
    )(input)
}

/// Decode a row line (without trailing newline)
pub fn parse_row(line: &[u8]) -> Result<Row> {
    let text = std::str::from_utf8(line).map_err(|e| Error::Parse(e.to_string()))?;
    let (_, (namespace, live, fields, values)) = all_consuming(row)(text)?;

    if fields.len() != values.len() {
        return Err(Error::Parse(format!(
            "{} fields but {} values",
            fields.len(),
            values.len()
        )));
    }

    let mut record = Record::new();
    for (field, value) in fields.into_iter().zip(values) {
        record.set(field, value);
    }

    Ok(Row {
        namespace: namespace.to_string(),
        live,
        record,
    })
}

/// Check a namespace or field name is usable in a row line
pub fn validate_identifier(name: &str) -> Result<()> {
    if name.is_empty() || !name.chars().all(is_ident_char) {
        return Err(Error::Parse(format!("Invalid identifier '{}'", name)));
    }
    Ok(())
}

/// Encode a row line (without trailing newline)
pub fn format_row(namespace: &str, live: bool, record: &Record) -> Result<Vec<u8>> {
    validate_identifier(namespace)?;

    let mut names = Vec::with_capacity(record.len());
    let mut values = Vec::with_capacity(record.len());
    for (name, value) in record.fields() {
        validate_identifier(name)?;
        if let Value::Text(s) = value {
            if s.contains('\n') {
                return Err(Error::Parse(format!("Newline in field '{}'", name)));
            }
        }
        names.push(name.to_string());
        values.push(value.to_string());
    }

    let line = format!(
        "{}[{}]{{{}}}: {}",
        namespace,
        if live { 1 } else { 0 },
        names.join(","),
        values.join(",")
    );
    Ok(line.into_bytes())
}
