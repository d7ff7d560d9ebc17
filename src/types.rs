use rustc_hash::FxHasher;
use smol_str::SmolStr;
use std::collections::HashSet;
use std::hash::BuildHasherDefault;

pub type FastMap<K, V> = std::collections::HashMap<K, V, BuildHasherDefault<FxHasher>>;
pub type FastHashSet<T> = HashSet<T, BuildHasherDefault<FxHasher>>;

/// Dense 0-based handles. Stable for the lifetime of one loaded index.
pub type FileId = usize;
pub type SymbolId = usize;
pub type PackageId = usize;
pub type BufferId = usize;

/// The root package is always id 0 and has an empty name.
pub const ROOT_PACKAGE: PackageId = 0;

// ─── Binary Layout ──────────────────────────────────────────────────────────
//
//  ┌──────────────────────────────────────────────┐
//  │ Header (12 bytes)                            │
//  │   magic:        [u8; 8] = "SCHEMIDX"         │
//  │   index_length: u32 (LE)                     │
//  ├──────────────────────────────────────────────┤
//  │ Index (index_length bytes, wire encoded)     │
//  │   files:    file_name, data_offset, length   │
//  │   symbols:  full_name, file_index, kind      │
//  │   packages: full_name, symbol_indexes,       │
//  │             nested_package_indexes           │
//  ├──────────────────────────────────────────────┤
//  │ Body (variable)                              │
//  │   encoded definition set, one entry per file │
//  │   data_offset is relative to the body start  │
//  └──────────────────────────────────────────────┘

pub const MAGIC: &[u8; 8] = b"SCHEMIDX";
pub const HEADER_SIZE: usize = 12; // 8 + 4

// ─── Kinds ──────────────────────────────────────────────────────────────────

pub const KIND_MESSAGE: u32 = 0;
pub const KIND_ENUM: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SymbolKind {
    Message,
    Enum,
}

impl SymbolKind {
    #[inline]
    pub fn tag(self) -> u32 {
        match self {
            SymbolKind::Message => KIND_MESSAGE,
            SymbolKind::Enum => KIND_ENUM,
        }
    }

    #[inline]
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            KIND_MESSAGE => Some(SymbolKind::Message),
            KIND_ENUM => Some(SymbolKind::Enum),
            _ => None,
        }
    }
}

// ─── Table Entries ──────────────────────────────────────────────────────────

/// Location of one file's raw definition inside the buffer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileSpan {
    pub buffer: BufferId,
    pub offset: usize,
    pub len: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub file_name: SmolStr,
    pub span: FileSpan,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolEntry {
    pub full_name: SmolStr,
    pub file_index: FileId,
    pub kind: SymbolKind,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PackageEntry {
    pub full_name: SmolStr,
    pub symbol_indexes: Vec<SymbolId>,
    pub nested_package_indexes: Vec<PackageId>,
}

impl PackageEntry {
    pub fn new(full_name: SmolStr) -> Self {
        Self {
            full_name,
            symbol_indexes: Vec::new(),
            nested_package_indexes: Vec::new(),
        }
    }
}

/// One row of a namespace listing: either a symbol or a nested package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceEntry {
    pub id: usize,
    /// Last dotted component only.
    pub name: SmolStr,
    pub is_message: bool,
}
