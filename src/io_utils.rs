//! CSV reader construction, encoding and delimiter resolution.
//!
//! Every CSV file a mapping names is opened through this module:
//!
//! - **Encoding**: labels resolve through `encoding_rs`, defaulting to UTF-8.
//!   Non-UTF-8 inputs are transcoded on the fly with `encoding_rs_io` so the
//!   `csv` reader always sees UTF-8.
//! - **Delimiters**: named (`tab`, `semicolon`, ...) or single ASCII characters.
//! - **Decimal separators**: `.` or `,`, used when parsing quantities.

use std::io::Read;

use encoding_rs::{Encoding, UTF_8};
use encoding_rs_io::DecodeReaderBytesBuilder;

pub fn resolve_encoding(label: Option<&str>) -> Result<&'static Encoding, String> {
    match label {
        Some(value) => Encoding::for_label(value.trim().as_bytes())
            .ok_or_else(|| format!("Unknown encoding '{value}'")),
        None => Ok(UTF_8),
    }
}

pub fn parse_delimiter(value: &str) -> Result<u8, String> {
    match value {
        "tab" | "\t" | "\\t" => Ok(b'\t'),
        "comma" | "," => Ok(b','),
        "|" | "pipe" => Ok(b'|'),
        ";" | "semicolon" => Ok(b';'),
        other => {
            let mut chars = other.chars();
            let first = chars
                .next()
                .ok_or_else(|| "Delimiter cannot be empty".to_string())?;
            if chars.next().is_some() {
                return Err(format!("Delimiter '{other}' must be a single character"));
            }
            if !first.is_ascii() {
                return Err(format!("Delimiter '{other}' must be ASCII"));
            }
            Ok(first as u8)
        }
    }
}

pub fn parse_decimal_separator(value: &str) -> Result<char, String> {
    match value.trim() {
        "." => Ok('.'),
        "," => Ok(','),
        other => Err(format!(
            "Decimal separator must be '.' or ',', got '{other}'"
        )),
    }
}

pub fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "\\t".to_string(),
        b'\n' => "\\n".to_string(),
        other => (other as char).to_string(),
    }
}

pub fn open_csv_reader<R>(reader: R, delimiter: u8) -> csv::Reader<R>
where
    R: Read,
{
    let mut builder = csv::ReaderBuilder::new();
    builder
        .has_headers(true)
        .delimiter(delimiter)
        .double_quote(true)
        .flexible(false);
    builder.from_reader(reader)
}

/// Wraps `source` so the CSV reader sees UTF-8 regardless of the file encoding.
/// A leading BOM is stripped for UTF-8 inputs as well.
pub fn open_decoded_csv_reader<R>(
    source: R,
    delimiter: u8,
    encoding: &'static Encoding,
) -> csv::Reader<Box<dyn Read + Send>>
where
    R: Read + Send + 'static,
{
    let decoded = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .bom_override(true)
        .build(source);
    open_csv_reader(Box::new(decoded) as Box<dyn Read + Send>, delimiter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delimiter_names_and_characters() {
        assert_eq!(parse_delimiter("tab").unwrap(), b'\t');
        assert_eq!(parse_delimiter("semicolon").unwrap(), b';');
        assert_eq!(parse_delimiter(":").unwrap(), b':');
        assert!(parse_delimiter("::").is_err());
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("é").is_err());
    }

    #[test]
    fn decimal_separator_is_dot_or_comma() {
        assert_eq!(parse_decimal_separator(",").unwrap(), ',');
        assert!(parse_decimal_separator(";").is_err());
    }

    #[test]
    fn latin1_input_is_transcoded() {
        let encoding = resolve_encoding(Some("latin1")).unwrap();
        let bytes: Vec<u8> = b"NOM;COM\nLiceo;Vi\xf1a del Mar\n".to_vec();
        let mut reader = open_decoded_csv_reader(std::io::Cursor::new(bytes), b';', encoding);
        let record = reader.records().next().unwrap().unwrap();
        assert_eq!(&record[1], "Viña del Mar");
    }

    #[test]
    fn unknown_encoding_is_reported() {
        let err = resolve_encoding(Some("klingon")).unwrap_err();
        assert!(err.contains("klingon"));
    }
}
