use crate::error::IndexError;
use crate::types::SymbolKind;
use crate::wire::{WIRE_LEN, WireReader};
use arrayvec::ArrayVec;
use smol_str::SmolStr;

// ─── Field Numbers ──────────────────────────────────────────────────────────
//
//  FileDescriptorSet   { repeated FileDescriptorProto file = 1; }
//  FileDescriptorProto { name = 1; package = 2; message_type = 4; enum_type = 5; }
//  DescriptorProto     { name = 1; nested_type = 3; enum_type = 4; }
//  EnumDescriptorProto { name = 1; }
//
// Everything else (fields, options, dependencies, services) is skipped.

pub const SET_FILE: u32 = 1;

const FILE_NAME: u32 = 1;
const FILE_PACKAGE: u32 = 2;
const FILE_MESSAGE_TYPE: u32 = 4;
const FILE_ENUM_TYPE: u32 = 5;

const MESSAGE_NAME: u32 = 1;
const MESSAGE_NESTED_TYPE: u32 = 3;
const MESSAGE_ENUM_TYPE: u32 = 4;

const ENUM_NAME: u32 = 1;

/// Deepest message nesting the scanner accepts.
pub const MAX_NESTING_DEPTH: usize = 64;

/// Most dotted components a package name may have.
pub const MAX_PACKAGE_DEPTH: usize = 64;

/// A type declaration found by the scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedType {
    /// Dotted path relative to the file's package, e.g. `Outer.Inner`.
    pub path: SmolStr,
    pub kind: SymbolKind,
}

/// Everything the index needs from one schema definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedFile {
    pub name: SmolStr,
    pub package: SmolStr,
    /// Depth-first, in declaration order.
    pub types: Vec<ScannedType>,
}

type Scope<'a> = ArrayVec<&'a str, MAX_NESTING_DEPTH>;

// ════════════════════════════════════════════════════════════════════════
// Entry points
// ════════════════════════════════════════════════════════════════════════

/// Scan one encoded schema definition. Cross-file references are not
/// looked at; that is the reflective pool's job.
pub fn scan_file(bytes: &[u8]) -> Result<ScannedFile, IndexError> {
    let mut reader = WireReader::new(bytes);
    let mut file_name: Option<&str> = None;
    let mut package: &str = "";
    let mut children: Vec<(SymbolKind, &[u8])> = Vec::new();

    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (FILE_NAME, WIRE_LEN) => file_name = Some(reader.read_str()?),
            (FILE_PACKAGE, WIRE_LEN) => package = reader.read_str()?,
            (FILE_MESSAGE_TYPE, WIRE_LEN) => children.push((SymbolKind::Message, reader.read_bytes()?)),
            (FILE_ENUM_TYPE, WIRE_LEN) => children.push((SymbolKind::Enum, reader.read_bytes()?)),
            _ => reader.skip(field, wire_type)?,
        }
    }

    let file_name = match file_name {
        Some(n) if !n.is_empty() => n,
        _ => return Err(IndexError::parse("schema definition has no file name")),
    };
    validate_package(file_name, package)?;

    let mut types = Vec::new();
    let mut scope = Scope::new();
    for (kind, payload) in children {
        scan_type(file_name, kind, payload, &mut scope, &mut types)?;
    }

    Ok(ScannedFile {
        name: SmolStr::from(file_name),
        package: SmolStr::from(package),
        types,
    })
}

/// Split an encoded schema-definition set into the `(offset, len)` spans of
/// its member definitions. The spans are not scanned here.
pub fn scan_file_set(bytes: &[u8]) -> Result<Vec<(usize, usize)>, IndexError> {
    let mut reader = WireReader::new(bytes);
    let mut spans = Vec::new();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (SET_FILE, WIRE_LEN) => spans.push(reader.read_span()?),
            _ => reader.skip(field, wire_type)?,
        }
    }
    Ok(spans)
}

// ════════════════════════════════════════════════════════════════════════
// Internal
// ════════════════════════════════════════════════════════════════════════

fn scan_type<'a>(
    file_name: &str,
    kind: SymbolKind,
    bytes: &'a [u8],
    scope: &mut Scope<'a>,
    out: &mut Vec<ScannedType>,
) -> Result<(), IndexError> {
    let name_field = match kind {
        SymbolKind::Message => MESSAGE_NAME,
        SymbolKind::Enum => ENUM_NAME,
    };

    let mut reader = WireReader::new(bytes);
    let mut local_name: Option<&'a str> = None;
    let mut children: Vec<(SymbolKind, &'a [u8])> = Vec::new();

    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match (kind, field, wire_type) {
            (_, f, WIRE_LEN) if f == name_field => local_name = Some(reader.read_str()?),
            (SymbolKind::Message, MESSAGE_NESTED_TYPE, WIRE_LEN) => {
                children.push((SymbolKind::Message, reader.read_bytes()?))
            }
            (SymbolKind::Message, MESSAGE_ENUM_TYPE, WIRE_LEN) => {
                children.push((SymbolKind::Enum, reader.read_bytes()?))
            }
            _ => reader.skip(field, wire_type)?,
        }
    }

    let local_name = match local_name {
        Some(n) if is_identifier(n) => n,
        Some(n) => {
            return Err(IndexError::parse(format!(
                "{file_name}: invalid type name {n:?}"
            )));
        }
        None => {
            return Err(IndexError::parse(format!(
                "{file_name}: type declaration without a name"
            )));
        }
    };

    scope.try_push(local_name).map_err(|_| {
        IndexError::parse(format!(
            "{file_name}: types nested deeper than {MAX_NESTING_DEPTH} levels"
        ))
    })?;

    out.push(ScannedType {
        path: SmolStr::from(scope.join(".")),
        kind,
    });
    for (child_kind, payload) in children {
        scan_type(file_name, child_kind, payload, scope, out)?;
    }

    scope.pop();
    Ok(())
}

fn validate_package(file_name: &str, package: &str) -> Result<(), IndexError> {
    if package.is_empty() {
        return Ok(());
    }
    let mut parts = 0usize;
    for part in package.split('.') {
        parts += 1;
        if parts > MAX_PACKAGE_DEPTH {
            return Err(IndexError::parse(format!(
                "{file_name}: package name has more than {MAX_PACKAGE_DEPTH} components"
            )));
        }
        if !is_identifier(part) {
            return Err(IndexError::parse(format!(
                "{file_name}: invalid package name {package:?}"
            )));
        }
    }
    Ok(())
}

/// Non-empty and free of separators. The scanner doesn't enforce the full
/// identifier grammar; the reflective pool rejects the rest later.
#[inline]
fn is_identifier(s: &str) -> bool {
    !s.is_empty() && !s.contains('.')
}
