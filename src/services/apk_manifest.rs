//! Package name and version from an APK's compiled `AndroidManifest.xml`.
//!
//! The manifest inside an APK is Android binary XML: a chunk stream holding a
//! string pool, a resource-id map and one chunk per element. Only the
//! attributes of the root `<manifest>` element are needed here.

use std::fs::File;
use std::io::Read;
use std::path::Path;
use thiserror::Error;
use zip::ZipArchive;
use zip::result::ZipError;

const RES_XML_TYPE: u16 = 0x0003;
const RES_STRING_POOL_TYPE: u16 = 0x0001;
const RES_XML_RESOURCE_MAP_TYPE: u16 = 0x0180;
const RES_XML_START_ELEMENT_TYPE: u16 = 0x0102;

const UTF8_FLAG: u32 = 1 << 8;
const NO_INDEX: u32 = 0xFFFF_FFFF;

const TYPE_STRING: u8 = 0x03;
const TYPE_INT_DEC: u8 = 0x10;
const TYPE_INT_HEX: u8 = 0x11;

const ATTR_VERSION_CODE: u32 = 0x0101_021b;
const ATTR_VERSION_NAME: u32 = 0x0101_021c;

/// Real manifests are a few hundred KiB at most.
const MAX_MANIFEST_SIZE: u64 = 8 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("Failed to open APK: {0}")]
    Io(#[from] std::io::Error),
    #[error("Not a valid APK archive: {0}")]
    Zip(#[from] ZipError),
    #[error("AndroidManifest.xml not found")]
    MissingManifest,
    #[error("AndroidManifest.xml is not binary XML")]
    NotBinaryXml,
    #[error("Truncated manifest at offset {0}")]
    Truncated(usize),
    #[error("AndroidManifest.xml is larger than 8 MiB")]
    TooLarge,
    #[error("No <manifest> element")]
    NoManifestElement,
    #[error("Manifest has no {0} attribute")]
    MissingAttribute(&'static str),
    #[error("Invalid versionCode: {0}")]
    InvalidVersionCode(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApkInfo {
    pub package: String,
    pub version_code: u64,
    pub version_name: Option<String>,
}

pub fn read_apk_info(path: &Path) -> Result<ApkInfo, ManifestError> {
    let mut archive = ZipArchive::new(File::open(path)?)?;
    let mut entry = match archive.by_name("AndroidManifest.xml") {
        Ok(entry) => entry,
        Err(ZipError::FileNotFound) => return Err(ManifestError::MissingManifest),
        Err(e) => return Err(e.into()),
    };
    if entry.size() > MAX_MANIFEST_SIZE {
        return Err(ManifestError::TooLarge);
    }
    let mut bytes = Vec::new();
    entry.by_ref().take(MAX_MANIFEST_SIZE + 1).read_to_end(&mut bytes)?;
    if bytes.len() as u64 > MAX_MANIFEST_SIZE {
        return Err(ManifestError::TooLarge);
    }
    parse_manifest(&bytes)
}

struct Reader<'a> {
    data: &'a [u8],
}

impl<'a> Reader<'a> {
    fn u8(&self, at: usize) -> Result<u8, ManifestError> {
        self.data.get(at).copied().ok_or(ManifestError::Truncated(at))
    }

    fn u16(&self, at: usize) -> Result<u16, ManifestError> {
        let bytes = self.data.get(at..at + 2).ok_or(ManifestError::Truncated(at))?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    fn u32(&self, at: usize) -> Result<u32, ManifestError> {
        let bytes = self.data.get(at..at + 4).ok_or(ManifestError::Truncated(at))?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn slice(&self, at: usize, len: usize) -> Result<&'a [u8], ManifestError> {
        let end = at.checked_add(len).ok_or(ManifestError::Truncated(at))?;
        self.data.get(at..end).ok_or(ManifestError::Truncated(at))
    }

    /// Fail when `count` entries of `width` bytes cannot fit after `at`.
    fn check_room(&self, at: usize, count: usize, width: usize) -> Result<(), ManifestError> {
        let room = self.data.len().saturating_sub(at) / width;
        if count > room {
            return Err(ManifestError::Truncated(at));
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StringPool {
    strings: Vec<String>,
}

impl StringPool {
    fn parse(r: &Reader<'_>, chunk: usize, header_size: usize) -> Result<Self, ManifestError> {
        let count = r.u32(chunk + 8)? as usize;
        let flags = r.u32(chunk + 16)?;
        let strings_start = chunk + r.u32(chunk + 20)? as usize;
        let utf8 = flags & UTF8_FLAG != 0;
        r.check_room(chunk + header_size, count, 4)?;

        let mut strings = Vec::with_capacity(count);
        for i in 0..count {
            let offset = strings_start + r.u32(chunk + header_size + i * 4)? as usize;
            let value = if utf8 {
                // utf16 length first, then the utf8 byte length we need
                let (_, at) = utf8_length(r, offset)?;
                let (len, at) = utf8_length(r, at)?;
                String::from_utf8_lossy(r.slice(at, len)?).into_owned()
            } else {
                let (len, at) = utf16_length(r, offset)?;
                r.check_room(at, len, 2)?;
                let units = (0..len)
                    .map(|k| r.u16(at + k * 2))
                    .collect::<Result<Vec<u16>, _>>()?;
                String::from_utf16_lossy(&units)
            };
            strings.push(value);
        }

        Ok(Self { strings })
    }

    fn get(&self, index: u32) -> Option<&str> {
        if index == NO_INDEX {
            return None;
        }
        self.strings.get(index as usize).map(String::as_str)
    }
}

fn utf8_length(r: &Reader<'_>, at: usize) -> Result<(usize, usize), ManifestError> {
    let first = r.u8(at)? as usize;
    if first & 0x80 != 0 {
        let second = r.u8(at + 1)? as usize;
        Ok((((first & 0x7f) << 8) | second, at + 2))
    } else {
        Ok((first, at + 1))
    }
}

fn utf16_length(r: &Reader<'_>, at: usize) -> Result<(usize, usize), ManifestError> {
    let first = r.u16(at)? as usize;
    if first & 0x8000 != 0 {
        let second = r.u16(at + 2)? as usize;
        Ok((((first & 0x7fff) << 16) | second, at + 4))
    } else {
        Ok((first, at + 2))
    }
}

#[derive(Debug)]
enum AttrValue {
    Text(String),
    Int(u32),
}

pub fn parse_manifest(data: &[u8]) -> Result<ApkInfo, ManifestError> {
    let r = Reader { data };
    if r.u16(0)? != RES_XML_TYPE {
        return Err(ManifestError::NotBinaryXml);
    }
    let end = (r.u32(4)? as usize).min(data.len());

    let mut pool = StringPool::default();
    let mut resource_ids: Vec<u32> = Vec::new();
    let mut offset = r.u16(2)? as usize;

    while offset + 8 <= end {
        let chunk_type = r.u16(offset)?;
        let header_size = r.u16(offset + 2)? as usize;
        let size = r.u32(offset + 4)? as usize;
        if size < 8 || header_size > size {
            return Err(ManifestError::Truncated(offset));
        }

        match chunk_type {
            RES_STRING_POOL_TYPE => pool = StringPool::parse(&r, offset, header_size)?,
            RES_XML_RESOURCE_MAP_TYPE => {
                let count = size
                    .checked_sub(header_size)
                    .ok_or(ManifestError::Truncated(offset))?
                    / 4;
                r.check_room(offset + header_size, count, 4)?;
                resource_ids = (0..count)
                    .map(|i| r.u32(offset + header_size + i * 4))
                    .collect::<Result<_, _>>()?;
            }
            RES_XML_START_ELEMENT_TYPE => {
                let ext = offset + header_size;
                let name = r.u32(ext + 4)?;
                if pool.get(name) == Some("manifest") {
                    return manifest_from_element(&r, ext, &pool, &resource_ids);
                }
            }
            _ => {}
        }

        offset += size;
    }

    Err(ManifestError::NoManifestElement)
}

fn manifest_from_element(
    r: &Reader<'_>,
    ext: usize,
    pool: &StringPool,
    resource_ids: &[u32],
) -> Result<ApkInfo, ManifestError> {
    let attr_start = ext + r.u16(ext + 8)? as usize;
    let attr_size = r.u16(ext + 10)? as usize;
    let attr_count = r.u16(ext + 12)? as usize;

    let mut package = None;
    let mut version_code = None;
    let mut version_name = None;

    for i in 0..attr_count {
        let at = attr_start + i * attr_size;
        let name_index = r.u32(at + 4)?;
        let raw = r.u32(at + 8)?;
        let data_type = r.u8(at + 15)?;
        let data = r.u32(at + 16)?;

        let value = match data_type {
            TYPE_STRING => AttrValue::Text(pool.get(data).unwrap_or_default().to_string()),
            TYPE_INT_DEC | TYPE_INT_HEX => AttrValue::Int(data),
            _ => match pool.get(raw) {
                Some(text) => AttrValue::Text(text.to_string()),
                None => AttrValue::Int(data),
            },
        };

        let name = pool.get(name_index).unwrap_or_default();
        let resource_id = resource_ids.get(name_index as usize).copied();

        if name == "package" {
            if let AttrValue::Text(text) = value {
                package = Some(text);
            }
        } else if name == "versionCode" || resource_id == Some(ATTR_VERSION_CODE) {
            version_code = Some(match value {
                AttrValue::Int(n) => u64::from(n),
                AttrValue::Text(text) => text
                    .trim()
                    .parse()
                    .map_err(|_| ManifestError::InvalidVersionCode(text))?,
            });
        } else if name == "versionName" || resource_id == Some(ATTR_VERSION_NAME) {
            version_name = Some(match value {
                AttrValue::Text(text) => text,
                AttrValue::Int(n) => n.to_string(),
            });
        }
    }

    Ok(ApkInfo {
        package: package
            .filter(|p| !p.is_empty())
            .ok_or(ManifestError::MissingAttribute("package"))?,
        version_code: version_code.ok_or(ManifestError::MissingAttribute("versionCode"))?,
        version_name,
    })
}

/// Minimal binary-XML and APK builders for tests.
#[cfg(test)]
pub(crate) mod fixtures {
    use std::io::Write;

    pub struct Attr {
        pub name: u32,
        pub raw: u32,
        pub data_type: u8,
        pub data: u32,
    }

    fn push_u16(buf: &mut Vec<u8>, v: u16) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    fn push_u32(buf: &mut Vec<u8>, v: u32) {
        buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn string_pool(strings: &[&str], utf8: bool) -> Vec<u8> {
        let mut data = Vec::new();
        let mut offsets = Vec::new();
        for s in strings {
            offsets.push(data.len() as u32);
            if utf8 {
                data.push(s.encode_utf16().count() as u8);
                data.push(s.len() as u8);
                data.extend_from_slice(s.as_bytes());
                data.push(0);
            } else {
                let units: Vec<u16> = s.encode_utf16().collect();
                push_u16(&mut data, units.len() as u16);
                for u in units {
                    push_u16(&mut data, u);
                }
                push_u16(&mut data, 0);
            }
        }
        while data.len() % 4 != 0 {
            data.push(0);
        }

        let header_size = 28u32;
        let strings_start = header_size + 4 * strings.len() as u32;
        let mut chunk = Vec::new();
        push_u16(&mut chunk, super::RES_STRING_POOL_TYPE);
        push_u16(&mut chunk, header_size as u16);
        push_u32(&mut chunk, strings_start + data.len() as u32);
        push_u32(&mut chunk, strings.len() as u32);
        push_u32(&mut chunk, 0);
        push_u32(&mut chunk, if utf8 { super::UTF8_FLAG } else { 0 });
        push_u32(&mut chunk, strings_start);
        push_u32(&mut chunk, 0);
        for offset in offsets {
            push_u32(&mut chunk, offset);
        }
        chunk.extend(data);
        chunk
    }

    pub fn resource_map(ids: &[u32]) -> Vec<u8> {
        let mut chunk = Vec::new();
        push_u16(&mut chunk, super::RES_XML_RESOURCE_MAP_TYPE);
        push_u16(&mut chunk, 8);
        push_u32(&mut chunk, 8 + 4 * ids.len() as u32);
        for id in ids {
            push_u32(&mut chunk, *id);
        }
        chunk
    }

    pub fn start_element(name: u32, attrs: &[Attr]) -> Vec<u8> {
        let mut chunk = Vec::new();
        push_u16(&mut chunk, super::RES_XML_START_ELEMENT_TYPE);
        push_u16(&mut chunk, 16);
        push_u32(&mut chunk, 16 + 20 + 20 * attrs.len() as u32);
        push_u32(&mut chunk, 1);
        push_u32(&mut chunk, super::NO_INDEX);
        push_u32(&mut chunk, super::NO_INDEX);
        push_u32(&mut chunk, name);
        push_u16(&mut chunk, 20);
        push_u16(&mut chunk, 20);
        push_u16(&mut chunk, attrs.len() as u16);
        push_u16(&mut chunk, 0);
        push_u16(&mut chunk, 0);
        push_u16(&mut chunk, 0);
        for attr in attrs {
            push_u32(&mut chunk, super::NO_INDEX);
            push_u32(&mut chunk, attr.name);
            push_u32(&mut chunk, attr.raw);
            push_u16(&mut chunk, 8);
            chunk.push(0);
            chunk.push(attr.data_type);
            push_u32(&mut chunk, attr.data);
        }
        chunk
    }

    pub fn document(chunks: &[Vec<u8>]) -> Vec<u8> {
        let body: Vec<u8> = chunks.concat();
        let mut doc = Vec::new();
        push_u16(&mut doc, super::RES_XML_TYPE);
        push_u16(&mut doc, 8);
        push_u32(&mut doc, 8 + body.len() as u32);
        doc.extend(body);
        doc
    }

    /// `<manifest package=.. versionCode=.. versionName=..>` in UTF-16.
    pub fn manifest(package: &str, version_code: u32, version_name: &str) -> Vec<u8> {
        let pool = string_pool(
            &["manifest", "package", "versionCode", "versionName", package, version_name],
            false,
        );
        let element = start_element(
            0,
            &[
                Attr { name: 1, raw: 4, data_type: super::TYPE_STRING, data: 4 },
                Attr { name: 2, raw: super::NO_INDEX, data_type: super::TYPE_INT_DEC, data: version_code },
                Attr { name: 3, raw: 5, data_type: super::TYPE_STRING, data: 5 },
            ],
        );
        document(&[pool, element])
    }

    /// A zip holding only `AndroidManifest.xml`.
    pub fn apk(manifest: &[u8]) -> Vec<u8> {
        let mut cursor = std::io::Cursor::new(Vec::new());
        {
            let mut writer = zip::ZipWriter::new(&mut cursor);
            writer
                .start_file("AndroidManifest.xml", zip::write::SimpleFileOptions::default())
                .unwrap();
            writer.write_all(manifest).unwrap();
            writer.finish().unwrap();
        }
        cursor.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;

    #[test]
    fn test_parse_utf16_manifest() {
        let info = parse_manifest(&manifest("com.store.hht", 312, "3.1.2")).unwrap();
        assert_eq!(
            info,
            ApkInfo {
                package: "com.store.hht".into(),
                version_code: 312,
                version_name: Some("3.1.2".into()),
            }
        );
    }

    #[test]
    fn test_parse_utf8_pool_with_stripped_names() {
        // Obfuscated builds blank attribute names and rely on the resource map.
        let pool = string_pool(&["", "", "manifest", "package", "com.pos.scan", "41"], true);
        let map = resource_map(&[ATTR_VERSION_CODE, ATTR_VERSION_NAME]);
        let element = start_element(
            2,
            &[
                Attr { name: 3, raw: 4, data_type: TYPE_STRING, data: 4 },
                Attr { name: 0, raw: 5, data_type: TYPE_STRING, data: 5 },
            ],
        );
        let info = parse_manifest(&document(&[pool, map, element])).unwrap();
        assert_eq!(info.package, "com.pos.scan");
        assert_eq!(info.version_code, 41);
        assert_eq!(info.version_name, None);
    }

    #[test]
    fn test_missing_version_code() {
        let pool = string_pool(&["manifest", "package", "com.x"], false);
        let element = start_element(0, &[Attr { name: 1, raw: 2, data_type: TYPE_STRING, data: 2 }]);
        let err = parse_manifest(&document(&[pool, element])).unwrap_err();
        assert!(matches!(err, ManifestError::MissingAttribute("versionCode")));
    }

    #[test]
    fn test_plain_text_rejected() {
        let err = parse_manifest(b"<?xml version=\"1.0\"?><manifest/>").unwrap_err();
        assert!(matches!(err, ManifestError::NotBinaryXml));
    }

    #[test]
    fn test_truncated_chunk() {
        let mut doc = manifest("com.store.hht", 1, "1.0");
        doc.truncate(40);
        // keep the declared size so the parser walks into missing bytes
        assert!(parse_manifest(&doc).is_err());
    }

    fn chunk_header(chunk_type: u16, header_size: u16, size: u32) -> Vec<u8> {
        let mut chunk = chunk_type.to_le_bytes().to_vec();
        chunk.extend_from_slice(&header_size.to_le_bytes());
        chunk.extend_from_slice(&size.to_le_bytes());
        chunk
    }

    #[test]
    fn test_string_pool_count_larger_than_data() {
        let mut pool = string_pool(&["manifest"], false);
        pool[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = parse_manifest(&document(&[pool])).unwrap_err();
        assert!(matches!(err, ManifestError::Truncated(_)));
    }

    #[test]
    fn test_utf16_length_larger_than_data() {
        let mut pool = string_pool(&["manifest"], false);
        // first string's length prefix sits right after the offset table
        pool[32..34].copy_from_slice(&0x7fffu16.to_le_bytes());
        let err = parse_manifest(&document(&[pool])).unwrap_err();
        assert!(matches!(err, ManifestError::Truncated(_)));
    }

    #[test]
    fn test_chunk_header_larger_than_chunk() {
        let mut map = chunk_header(RES_XML_RESOURCE_MAP_TYPE, 16, 8);
        map.extend_from_slice(&[0; 8]);
        let err = parse_manifest(&document(&[map])).unwrap_err();
        assert!(matches!(err, ManifestError::Truncated(8)));
    }

    #[test]
    fn test_resource_map_size_past_end() {
        let map = chunk_header(RES_XML_RESOURCE_MAP_TYPE, 8, 0x7fff_fff8);
        let mut doc = document(&[map]);
        // declared document size covers the oversized chunk
        doc[4..8].copy_from_slice(&u32::MAX.to_le_bytes());
        let err = parse_manifest(&doc).unwrap_err();
        assert!(matches!(err, ManifestError::Truncated(_)));
    }

    #[test]
    fn test_read_apk_info_from_zip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("store.apk");
        std::fs::write(&path, apk(&manifest("com.store.hht", 7, "0.7"))).unwrap();
        let info = read_apk_info(&path).unwrap();
        assert_eq!(info.version_code, 7);
    }

    #[test]
    fn test_oversized_manifest_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("huge.apk");
        let padding = vec![0u8; MAX_MANIFEST_SIZE as usize + 1];
        std::fs::write(&path, apk(&padding)).unwrap();
        assert!(matches!(read_apk_info(&path), Err(ManifestError::TooLarge)));
    }

    #[test]
    fn test_read_apk_info_not_a_zip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("broken.apk");
        std::fs::write(&path, b"not a zip").unwrap();
        assert!(matches!(read_apk_info(&path), Err(ManifestError::Zip(_))));
    }
}
