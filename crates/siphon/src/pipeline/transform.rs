//! Pluggable content transformation.
//!
//! The pipeline does not care what the transformation does, only that it
//! is deterministic: identical input bytes must always produce identical
//! output bytes and statistics.

use std::collections::HashSet;

use serde::Serialize;

use crate::error::TransformError;

/// Statistics produced alongside the transformed bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TransformStats {
    /// Data rows seen in the input (header excluded).
    pub rows_read: u64,
    /// Data rows retained after cleansing.
    pub rows_kept: u64,
}

/// Result of one transformation.
#[derive(Debug, Clone)]
pub struct TransformOutput {
    pub bytes: Vec<u8>,
    pub stats: TransformStats,
}

/// A content transformation applied to one file's bytes.
pub trait Transform: Send + Sync {
    fn apply(&self, input: &[u8]) -> Result<TransformOutput, TransformError>;
}

/// Default cleansing transform for delimited text files.
///
/// Mirrors the generic cleansing the platform applies when no
/// customer-specific logic is installed: trim fields, drop rows that are
/// entirely empty, drop exact duplicate rows (first occurrence wins).
/// The first line is treated as a header and passed through untouched
/// apart from field trimming.
#[derive(Debug, Default)]
pub struct LineCleanse;

impl LineCleanse {
    fn detect_delimiter(line: &str) -> char {
        if line.contains('\t') {
            '\t'
        } else {
            ','
        }
    }

    fn clean_row(line: &str, delimiter: char) -> String {
        line.split(delimiter)
            .map(str::trim)
            .collect::<Vec<_>>()
            .join(&delimiter.to_string())
    }

    fn is_empty_row(line: &str, delimiter: char) -> bool {
        line.split(delimiter).all(|field| field.trim().is_empty())
    }
}

impl Transform for LineCleanse {
    fn apply(&self, input: &[u8]) -> Result<TransformOutput, TransformError> {
        let text = std::str::from_utf8(input).map_err(|_| TransformError::NotUtf8)?;

        let mut lines = text.lines();
        let header = match lines.next() {
            Some(line) if !line.trim().is_empty() => line,
            _ => return Err(TransformError::Empty),
        };
        let delimiter = Self::detect_delimiter(header);

        let mut seen = HashSet::new();
        let mut kept = vec![Self::clean_row(header, delimiter)];
        let mut rows_read = 0u64;
        let mut rows_kept = 0u64;

        for line in lines {
            rows_read += 1;
            if Self::is_empty_row(line, delimiter) {
                continue;
            }
            let cleaned = Self::clean_row(line, delimiter);
            if seen.insert(cleaned.clone()) {
                kept.push(cleaned);
                rows_kept += 1;
            }
        }

        let mut bytes = kept.join("\n").into_bytes();
        bytes.push(b'\n');

        Ok(TransformOutput {
            bytes,
            stats: TransformStats {
                rows_read,
                rows_kept,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cleanse_trims_and_deduplicates() {
        let input = b"name, city \nalice, berlin\nalice,berlin\n bob , oslo \n";
        let out = LineCleanse.apply(input).unwrap();

        assert_eq!(
            String::from_utf8(out.bytes).unwrap(),
            "name,city\nalice,berlin\nbob,oslo\n"
        );
        assert_eq!(out.stats.rows_read, 3);
        assert_eq!(out.stats.rows_kept, 2);
    }

    #[test]
    fn test_cleanse_drops_empty_rows() {
        let input = b"a,b\n1,2\n , \n\n3,4\n";
        let out = LineCleanse.apply(input).unwrap();

        assert_eq!(String::from_utf8(out.bytes).unwrap(), "a,b\n1,2\n3,4\n");
        assert_eq!(out.stats.rows_read, 4);
        assert_eq!(out.stats.rows_kept, 2);
    }

    #[test]
    fn test_cleanse_tab_delimited() {
        let input = b"a\tb\n 1 \t2\n1\t2\n";
        let out = LineCleanse.apply(input).unwrap();

        assert_eq!(String::from_utf8(out.bytes).unwrap(), "a\tb\n1\t2\n");
        assert_eq!(out.stats.rows_kept, 1);
    }

    #[test]
    fn test_cleanse_is_deterministic() {
        let input = b"h1,h2\nx,y\nx,y\nz,w\n";
        let first = LineCleanse.apply(input).unwrap();
        let second = LineCleanse.apply(input).unwrap();

        assert_eq!(first.bytes, second.bytes);
        assert_eq!(first.stats, second.stats);
    }

    #[test]
    fn test_empty_input_rejected() {
        assert!(matches!(
            LineCleanse.apply(b""),
            Err(TransformError::Empty)
        ));
        assert!(matches!(
            LineCleanse.apply(b"   \n"),
            Err(TransformError::Empty)
        ));
    }

    #[test]
    fn test_binary_input_rejected() {
        assert!(matches!(
            LineCleanse.apply(&[0xff, 0xfe, 0x00, 0x01]),
            Err(TransformError::NotUtf8)
        ));
    }

    #[test]
    fn test_header_only_file() {
        let out = LineCleanse.apply(b"a,b,c\n").unwrap();
        assert_eq!(out.stats.rows_read, 0);
        assert_eq!(out.stats.rows_kept, 0);
        assert_eq!(String::from_utf8(out.bytes).unwrap(), "a,b,c\n");
    }
}
