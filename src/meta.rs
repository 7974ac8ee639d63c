//! Debian repository index utilities: classifying index files and
//! extracting the per-file checksums they publish.
//!
//! `Release`/`InRelease` list the component indices; `Packages`, `Sources`,
//! and `i18n/Index` list the artifacts themselves. Indices may be shipped
//! compressed; extraction transparently decompresses gzip, bzip2, and xz.

use std::borrow::Cow;
use std::collections::HashMap;
use std::io::Read;

use bzip2::read::BzDecoder;
use flate2::read::GzDecoder;
use xz2::read::XzDecoder;

use crate::dcf::DcfParser;
use crate::error::{CacheError, CacheResult};
use crate::fileinfo::FileInfo;
use crate::paths;

// https://wiki.debian.org/DebianRepository/Format#Compression_of_indices
const COMPRESSION_SUFFIXES: [&str; 5] = [".gz", ".bz2", ".xz", ".lzma", ".lz"];

/// Final path component with any recognized compression suffix removed.
pub(crate) fn index_basename(path: &str) -> &str {
    let base = paths::base(path);
    for suffix in COMPRESSION_SUFFIXES {
        if let Some(stem) = base.strip_suffix(suffix) {
            return stem;
        }
    }
    base
}

fn compression_suffix(path: &str) -> Option<&'static str> {
    let base = paths::base(path);
    COMPRESSION_SUFFIXES.into_iter().find(|s| base.ends_with(s))
}

/// True if `path` points at a repository index file, i.e. one that may
/// carry checksums for other files.
pub fn is_meta(path: &str) -> bool {
    matches!(
        index_basename(path),
        "Release" | "Release.gpg" | "InRelease" | "Packages" | "Sources" | "Index"
    )
}

/// True if `path` is uncompressed or uses a compression we can decompress.
/// Unsupported compression is answered with 404 instead of being fetched.
pub fn is_supported(path: &str) -> bool {
    !matches!(compression_suffix(path), Some(".lzma") | Some(".lz"))
}

fn decompress<'a>(path: &str, data: &'a [u8]) -> CacheResult<Cow<'a, [u8]>> {
    let Some(suffix) = compression_suffix(path) else {
        return Ok(Cow::Borrowed(data));
    };

    let mut out = Vec::new();
    let result = match suffix {
        ".gz" => GzDecoder::new(data).read_to_end(&mut out),
        ".bz2" => BzDecoder::new(data).read_to_end(&mut out),
        ".xz" => XzDecoder::new(data).read_to_end(&mut out),
        _ => return Err(CacheError::Unsupported),
    };
    result.map_err(|e| CacheError::parse(format!("decompressing {path}: {e}")))?;
    Ok(Cow::Owned(out))
}

/// Parse the index at `path` and return the [`FileInfo`] of every file it
/// references. Paths that are not recognized indices yield an empty list.
pub fn extract_file_info(path: &str, data: &[u8]) -> CacheResult<Vec<FileInfo>> {
    match index_basename(path) {
        "Release" | "InRelease" => files_from_release(path, &decompress(path, data)?),
        "Packages" => files_from_packages(path, &decompress(path, data)?),
        "Sources" => files_from_sources(path, &decompress(path, data)?),
        "Index" if paths::parent(path).ends_with("i18n") => {
            files_from_release(path, &decompress(path, data)?)
        }
        _ => Ok(Vec::new()),
    }
}

/// A checksum line is `<hex digest> <size> <path>`.
fn parse_checksum(line: &str) -> CacheResult<(String, u64, Vec<u8>)> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    let &[digest, size, path] = fields.as_slice() else {
        return Err(CacheError::parse(format!("invalid checksum line: {line}")));
    };
    let size = size
        .parse()
        .map_err(|_| CacheError::parse(format!("invalid size in checksum line: {line}")))?;
    let digest = hex::decode(digest)
        .map_err(|_| CacheError::parse(format!("invalid digest in checksum line: {line}")))?;
    Ok((path.to_string(), size, digest))
}

type DigestSlot = fn(&mut FileInfo) -> &mut Option<Vec<u8>>;

const DIGEST_TABLES: [(&str, DigestSlot); 3] = [
    ("MD5Sum", |fi| &mut fi.md5),
    ("SHA1", |fi| &mut fi.sha1),
    ("SHA256", |fi| &mut fi.sha256),
];

/// `Release`/`InRelease`: a single paragraph whose `MD5Sum`/`SHA1`/`SHA256`
/// tables list sibling indices relative to the directory of `path`. The
/// tables are merged into one identity per referenced path.
fn files_from_release(path: &str, data: &[u8]) -> CacheResult<Vec<FileInfo>> {
    let dir = paths::parent(path);
    let Some(paragraph) = DcfParser::new(data).next_paragraph()? else {
        return Err(CacheError::parse(format!("empty index: {path}")));
    };

    let mut merged: HashMap<String, FileInfo> = HashMap::new();
    for (field, slot) in DIGEST_TABLES {
        for line in paragraph.get(field).unwrap_or_default() {
            let (sub, size, digest) = parse_checksum(line)?;
            let joined = paths::join(&[dir, &sub]);
            let fi = merged.entry(joined.clone()).or_insert(FileInfo {
                path: joined,
                size,
                md5: None,
                sha1: None,
                sha256: None,
            });
            *slot(fi) = Some(digest);
        }
    }

    Ok(merged.into_values().collect())
}

/// `Packages`: one paragraph per binary package; `Filename` resolves under
/// the repository prefix (the first segment of `path`).
fn files_from_packages(path: &str, data: &[u8]) -> CacheResult<Vec<FileInfo>> {
    let prefix = path.split('/').next().unwrap_or_default();
    let mut parser = DcfParser::new(data);
    let mut out = Vec::new();

    while let Some(paragraph) = parser.next_paragraph()? {
        let filename = paragraph
            .first("Filename")
            .ok_or_else(|| CacheError::parse(format!("no Filename in {path}")))?;
        let fpath = paths::join(&[prefix, filename]);
        let size = paragraph
            .first("Size")
            .ok_or_else(|| CacheError::parse(format!("no Size for {fpath} in {path}")))?
            .parse()
            .map_err(|_| CacheError::parse(format!("invalid Size for {fpath} in {path}")))?;

        let mut fi = FileInfo {
            path: fpath,
            size,
            md5: None,
            sha1: None,
            sha256: None,
        };
        for (field, slot) in [
            ("MD5sum", DIGEST_TABLES[0].1),
            ("SHA1", DIGEST_TABLES[1].1),
            ("SHA256", DIGEST_TABLES[2].1),
        ] {
            if let Some(v) = paragraph.first(field) {
                let digest = hex::decode(v).map_err(|_| {
                    CacheError::parse(format!("invalid {field} for {} in {path}", fi.path))
                })?;
                *slot(&mut fi) = Some(digest);
            }
        }
        out.push(fi);
    }

    Ok(out)
}

/// `Sources`: one paragraph per source package; `Files` establishes the
/// file set and MD5 digests, `Checksums-Sha1`/`Checksums-Sha256` must refer
/// back to the same files.
fn files_from_sources(path: &str, data: &[u8]) -> CacheResult<Vec<FileInfo>> {
    let prefix = path.split('/').next().unwrap_or_default();
    let mut parser = DcfParser::new(data);
    let mut out = Vec::new();

    while let Some(paragraph) = parser.next_paragraph()? {
        let dir = paragraph
            .first("Directory")
            .ok_or_else(|| CacheError::parse(format!("no Directory in {path}")))?;
        let files = paragraph
            .get("Files")
            .ok_or_else(|| CacheError::parse(format!("no Files in {path}")))?;

        let mut per_package: HashMap<String, FileInfo> = HashMap::new();
        for line in files {
            let (fname, size, digest) = parse_checksum(line)?;
            let fpath = paths::join(&[prefix, dir, &fname]);
            per_package.insert(
                fpath.clone(),
                FileInfo {
                    path: fpath,
                    size,
                    md5: Some(digest),
                    sha1: None,
                    sha256: None,
                },
            );
        }

        for (field, slot) in [
            ("Checksums-Sha1", DIGEST_TABLES[1].1),
            ("Checksums-Sha256", DIGEST_TABLES[2].1),
        ] {
            for line in paragraph.get(field).unwrap_or_default() {
                let (fname, _, digest) = parse_checksum(line)?;
                let fpath = paths::join(&[prefix, dir, &fname]);
                let Some(fi) = per_package.get_mut(&fpath) else {
                    return Err(CacheError::parse(format!(
                        "mismatch between Files and {field} in {path}"
                    )));
                };
                *slot(fi) = Some(digest);
            }
        }

        out.extend(per_package.into_values());
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const RELEASE: &str = "\
Origin: Ubuntu
Suite: trusty
MD5Sum:
 ead1cbf42ed119c50bf3aab28b5b6351          8234934 main/binary-amd64/Packages
 52d605b4217be64f461751f233dd9a8f               96 main/binary-amd64/Release
SHA256:
 9cb9ac45e87b5ebe04b7b85fe4989a5a7eae0be7c125bea2e10f2b44fe10cfdc  8234934 main/binary-amd64/Packages
";

    const PACKAGES: &str = "\
Package: apt
Filename: pool/main/a/apt/apt_1.0.1_amd64.deb
Size: 1107560
MD5sum: 70254258e046e82d9b3c9f30e9b5ce97
SHA1: 3cb8e7cd795d5f570015f04904d454aaf264ad44

Package: dpkg
Filename: pool/main/d/dpkg/dpkg_1.17.5_amd64.deb
Size: 1972632
SHA256: 3ab36aa98e2aee68ba103a23209ee6802bb2a5b2d89f0a79d24d66a21d0ceb60
";

    const SOURCES: &str = "\
Package: apt
Directory: pool/main/a/apt
Files:
 d722d48766962f2e87d2702c1c3b0a5b 1730 apt_1.0.1.dsc
 ee607af7b73dbcb2a0e04fc4b567b667 1702826 apt_1.0.1.tar.xz
Checksums-Sha1:
 fb5ef0783b891a6c767ab9b8a1a7d66579f8b235 1730 apt_1.0.1.dsc
Checksums-Sha256:
 b0c0d4d2e2aeb1982af0e9a6b3c0b879b918500c498e26b9306c72ad0d2a40ab 1730 apt_1.0.1.dsc
";

    fn find<'a>(list: &'a [FileInfo], path: &str) -> &'a FileInfo {
        list.iter()
            .find(|fi| fi.path() == path)
            .unwrap_or_else(|| panic!("no entry for {path}"))
    }

    #[test]
    fn meta_classification() {
        assert!(is_meta("ubuntu/dists/trusty/Release"));
        assert!(is_meta("ubuntu/dists/trusty/Release.gpg"));
        assert!(is_meta("ubuntu/dists/trusty/InRelease"));
        assert!(is_meta("ubuntu/dists/trusty/main/binary-amd64/Packages.gz"));
        assert!(is_meta("ubuntu/dists/trusty/main/source/Sources.bz2"));
        assert!(is_meta("ubuntu/dists/trusty/main/i18n/Index"));
        assert!(!is_meta("ubuntu/pool/main/a/apt/apt_1.0.1_amd64.deb"));
        assert!(!is_meta("ubuntu/dists/trusty/main/i18n/Translation-en.bz2"));
    }

    #[test]
    fn supported_compression() {
        assert!(is_supported("a/Packages"));
        assert!(is_supported("a/Packages.gz"));
        assert!(is_supported("a/Packages.bz2"));
        assert!(is_supported("a/Packages.xz"));
        assert!(!is_supported("a/Packages.lzma"));
        assert!(!is_supported("a/Packages.lz"));
    }

    #[test]
    fn basename_strips_one_suffix() {
        assert_eq!(index_basename("a/b/Packages.gz"), "Packages");
        assert_eq!(index_basename("a/b/Sources.xz"), "Sources");
        assert_eq!(index_basename("a/b/Release"), "Release");
        assert_eq!(index_basename("a/b/Release.gpg"), "Release.gpg");
    }

    #[test]
    fn release_merges_digest_tables() {
        let list = extract_file_info("ubuntu/dists/trusty/Release", RELEASE.as_bytes()).unwrap();
        assert_eq!(list.len(), 2);

        let packages = find(&list, "ubuntu/dists/trusty/main/binary-amd64/Packages");
        assert_eq!(packages.size(), 8234934);
        assert_eq!(
            packages.md5.as_deref(),
            Some(hex::decode("ead1cbf42ed119c50bf3aab28b5b6351").unwrap().as_slice())
        );
        assert!(packages.sha256.is_some());

        let release = find(&list, "ubuntu/dists/trusty/main/binary-amd64/Release");
        assert_eq!(release.size(), 96);
        assert!(release.sha256.is_none());
    }

    #[test]
    fn packages_resolve_under_repository_prefix() {
        let list = extract_file_info(
            "ubuntu/dists/trusty/main/binary-amd64/Packages",
            PACKAGES.as_bytes(),
        )
        .unwrap();
        assert_eq!(list.len(), 2);

        let apt = find(&list, "ubuntu/pool/main/a/apt/apt_1.0.1_amd64.deb");
        assert_eq!(apt.size(), 1107560);
        assert!(apt.md5.is_some() && apt.sha1.is_some() && apt.sha256.is_none());

        let dpkg = find(&list, "ubuntu/pool/main/d/dpkg/dpkg_1.17.5_amd64.deb");
        assert!(dpkg.md5.is_none() && dpkg.sha256.is_some());
    }

    #[test]
    fn gzip_compressed_packages_extract() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(PACKAGES.as_bytes()).unwrap();
        let compressed = encoder.finish().unwrap();

        let list = extract_file_info(
            "ubuntu/dists/trusty/main/binary-amd64/Packages.gz",
            &compressed,
        )
        .unwrap();
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn sources_join_directory_and_files() {
        let list = extract_file_info(
            "ubuntu/dists/trusty/main/source/Sources",
            SOURCES.as_bytes(),
        )
        .unwrap();
        assert_eq!(list.len(), 2);

        let dsc = find(&list, "ubuntu/pool/main/a/apt/apt_1.0.1.dsc");
        assert_eq!(dsc.size(), 1730);
        assert!(dsc.md5.is_some() && dsc.sha1.is_some() && dsc.sha256.is_some());

        let tar = find(&list, "ubuntu/pool/main/a/apt/apt_1.0.1.tar.xz");
        assert!(tar.sha1.is_none());
    }

    #[test]
    fn sources_checksum_for_unknown_file_is_an_error() {
        let input = "\
Package: apt
Directory: pool/main/a/apt
Files:
 d722d48766962f2e87d2702c1c3b0a5b 1730 apt_1.0.1.dsc
Checksums-Sha1:
 fb5ef0783b891a6c767ab9b8a1a7d66579f8b235 42 other_file.tar.xz
";
        let err = extract_file_info("ubuntu/dists/trusty/main/source/Sources", input.as_bytes())
            .unwrap_err();
        assert!(err.to_string().contains("Checksums-Sha1"));
    }

    #[test]
    fn packages_without_filename_is_an_error() {
        let input = "Package: apt\nSize: 10\n";
        assert!(extract_file_info("u/d/Packages", input.as_bytes()).is_err());
    }

    #[test]
    fn malformed_checksum_line_fails_the_extract() {
        let input = "MD5Sum:\n nothex 12 main/Packages\n";
        assert!(files_from_release("u/dists/t/Release", input.as_bytes()).is_err());
        let input = "MD5Sum:\n ead1cbf42ed119c50bf3aab28b5b6351 notanumber main/Packages\n";
        assert!(files_from_release("u/dists/t/Release", input.as_bytes()).is_err());
    }

    #[test]
    fn i18n_index_uses_the_release_algorithm() {
        let input = "\
SHA1:
 6a2d4e04fb29c13aca6f4a7b38cbbbff800ed4ee 235 Translation-en.bz2
";
        let list =
            extract_file_info("ubuntu/dists/trusty/main/i18n/Index", input.as_bytes()).unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].path(), "ubuntu/dists/trusty/main/i18n/Translation-en.bz2");
    }

    #[test]
    fn non_index_names_extract_nothing() {
        assert!(extract_file_info("u/d/Release.gpg", b"binary gpg data")
            .unwrap()
            .is_empty());
        assert!(extract_file_info("u/dists/t/Index", b"SHA1:\n")
            .unwrap()
            .is_empty());
    }
}
