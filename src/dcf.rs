//! Debian control file (DCF) paragraph parser.
//!
//! Control files are sequences of paragraphs separated by blank lines. Each
//! paragraph is a list of `Name: Value` fields where indented lines continue
//! the previous field. See <https://wiki.debian.org/DebianRepository/Format>.

use std::io::BufRead;

use crate::error::{CacheError, CacheResult};

/// A single parsed paragraph: field names in first-occurrence order, each
/// with its list of non-empty value lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Paragraph {
    fields: Vec<(String, Vec<String>)>,
}

impl Paragraph {
    /// The value lines recorded for `name`, if the field is present.
    pub fn get(&self, name: &str) -> Option<&[String]> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// The first value line of `name`, if any.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    fn field_index(&mut self, name: &str) -> usize {
        if let Some(idx) = self.fields.iter().position(|(n, _)| n == name) {
            return idx;
        }
        self.fields.push((name.to_string(), Vec::new()));
        self.fields.len() - 1
    }
}

/// Streaming parser yielding one [`Paragraph`] per call.
pub struct DcfParser<R> {
    reader: R,
}

impl<R: BufRead> DcfParser<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }

    /// Read the next paragraph, or `None` at end of input.
    ///
    /// Blank lines between paragraphs are skipped; a blank line after at
    /// least one field terminates the paragraph, as does end of input. No
    /// state carries over between paragraphs.
    pub fn next_paragraph(&mut self) -> CacheResult<Option<Paragraph>> {
        let mut paragraph = Paragraph::default();
        let mut current: Option<usize> = None;
        let mut buf = String::new();

        loop {
            buf.clear();
            let n = self
                .reader
                .read_line(&mut buf)
                .map_err(|e| CacheError::parse(format!("read error in control file: {e}")))?;
            if n == 0 {
                if paragraph.is_empty() {
                    return Ok(None);
                }
                return Ok(Some(paragraph));
            }

            let line = buf.trim_end_matches(['\n', '\r']);
            if line.is_empty() {
                if paragraph.is_empty() {
                    continue;
                }
                return Ok(Some(paragraph));
            }

            if let Some(rest) = line.strip_prefix([' ', '\t']) {
                // Continuation: one leading whitespace character stripped,
                // trailing horizontal whitespace trimmed.
                let Some(idx) = current else {
                    return Err(CacheError::parse(format!(
                        "continuation line before any field: {line}"
                    )));
                };
                let value = rest.trim_end_matches([' ', '\t']);
                if !value.is_empty() {
                    paragraph.fields[idx].1.push(value.to_string());
                }
                continue;
            }

            let Some((name, value)) = line.split_once(':') else {
                return Err(CacheError::parse(format!("line without a colon: {line}")));
            };
            let name = name.trim_matches([' ', '\t']);
            let value = value.trim_matches([' ', '\t']);
            let idx = paragraph.field_index(name);
            current = Some(idx);
            if !value.is_empty() {
                paragraph.fields[idx].1.push(value.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_all(input: &str) -> Vec<Paragraph> {
        let mut parser = DcfParser::new(input.as_bytes());
        let mut out = Vec::new();
        while let Some(p) = parser.next_paragraph().unwrap() {
            out.push(p);
        }
        out
    }

    #[test]
    fn single_line_field() {
        let paragraphs = parse_all("Origin: Ubuntu\n");
        assert_eq!(paragraphs.len(), 1);
        assert_eq!(paragraphs[0].get("Origin").unwrap(), ["Ubuntu"]);
    }

    #[test]
    fn field_with_empty_value_collects_continuations() {
        let paragraphs = parse_all("MD5Sum:\n abc 12 x\n def 34 y\n");
        assert_eq!(paragraphs[0].get("MD5Sum").unwrap(), ["abc 12 x", "def 34 y"]);
    }

    #[test]
    fn release_excerpt() {
        let input = "\
Origin: Ubuntu
Label: Ubuntu
Suite: trusty
Version: 14.04
Codename: trusty
Date: Thu, 08 May 2014 14:19:09 UTC
Architectures: amd64 arm64 armhf i386 powerpc ppc64el
Components: main restricted universe multiverse
Description: Ubuntu Trusty 14.04
MD5Sum:
 ead1cbf42ed119c50bf3aab28b5b6351          8234934 main/binary-amd64/Packages
 52d605b4217be64f461751f233dd9a8f               96 main/binary-amd64/Release";

        let paragraphs = parse_all(input);
        assert_eq!(paragraphs.len(), 1);
        let p = &paragraphs[0];
        assert_eq!(p.get("Label").unwrap(), ["Ubuntu"]);
        let md5sums = p.get("MD5Sum").unwrap();
        assert_eq!(
            md5sums,
            [
                "ead1cbf42ed119c50bf3aab28b5b6351          8234934 main/binary-amd64/Packages",
                "52d605b4217be64f461751f233dd9a8f               96 main/binary-amd64/Release",
            ]
        );
    }

    #[test]
    fn multiple_paragraphs() {
        let input = "Package: apt\nVersion: 1.0\n\nPackage: dpkg\nVersion: 2.0\n";
        let paragraphs = parse_all(input);
        assert_eq!(paragraphs.len(), 2);
        assert_eq!(paragraphs[0].first("Package"), Some("apt"));
        assert_eq!(paragraphs[1].first("Package"), Some("dpkg"));
    }

    #[test]
    fn consecutive_blank_lines_are_skipped() {
        let input = "Package: apt\n\n\n\nPackage: dpkg\n\n";
        let paragraphs = parse_all(input);
        assert_eq!(paragraphs.len(), 2);
    }

    #[test]
    fn continuation_before_field_is_an_error() {
        let mut parser = DcfParser::new(&b" orphan continuation\n"[..]);
        assert!(parser.next_paragraph().is_err());
    }

    #[test]
    fn line_without_colon_is_an_error() {
        let mut parser = DcfParser::new(&b"not a field line\n"[..]);
        assert!(parser.next_paragraph().is_err());
    }

    #[test]
    fn surrounding_whitespace_is_trimmed() {
        let paragraphs = parse_all("Origin :\t Ubuntu \t\n");
        assert_eq!(paragraphs[0].get("Origin").unwrap(), ["Ubuntu"]);
    }

    #[test]
    fn duplicate_field_names_merge_in_order() {
        let paragraphs = parse_all("A: one\nB: two\nA: three\n");
        assert_eq!(paragraphs[0].get("A").unwrap(), ["one", "three"]);
    }
}
