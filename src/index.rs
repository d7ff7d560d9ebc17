use crate::arena::BufferArena;
use crate::builder::IndexBuilder;
use crate::error::{IndexError, WireError};
use crate::scanner::{MAX_NESTING_DEPTH, MAX_PACKAGE_DEPTH, SET_FILE};
use crate::types::*;
use crate::wire::*;
use bytes::Bytes;
use smol_str::SmolStr;
use std::ops::Range;
use tracing::debug;

// ─── Index Wire Schema ──────────────────────────────────────────────────────
//
//  Index   { repeated File files = 1; repeated Symbol symbols = 2;
//            repeated Package packages = 3; }
//  File    { string file_name = 1; uint64 data_offset = 2; uint64 length = 3; }
//  Symbol  { string full_name = 1; uint32 file_index = 2; uint32 kind = 3; }
//  Package { string full_name = 1; repeated uint32 symbol_indexes = 2 [packed];
//            repeated uint32 nested_package_indexes = 3 [packed]; }

const INDEX_FILES: u32 = 1;
const INDEX_SYMBOLS: u32 = 2;
const INDEX_PACKAGES: u32 = 3;

const FILE_NAME: u32 = 1;
const FILE_DATA_OFFSET: u32 = 2;
const FILE_LENGTH: u32 = 3;

const SYMBOL_FULL_NAME: u32 = 1;
const SYMBOL_FILE_INDEX: u32 = 2;
const SYMBOL_KIND: u32 = 3;

const PACKAGE_FULL_NAME: u32 = 1;
const PACKAGE_SYMBOL_INDEXES: u32 = 2;
const PACKAGE_NESTED_PACKAGE_INDEXES: u32 = 3;

// ─── Precomputed Container ──────────────────────────────────────────────────

/// Where the index and body regions sit inside a precomputed buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrecomputedLayout {
    pub index: Range<usize>,
    pub body: Range<usize>,
}

/// Inspect the header of `buf`.
///
/// `Ok(None)` means the buffer isn't a precomputed index and should be
/// treated as raw schema definitions. A valid signature with an index length
/// running past the end of the buffer is `CorruptIndex`.
pub fn precomputed_layout(buf: &[u8]) -> Result<Option<PrecomputedLayout>, IndexError> {
    if buf.len() < HEADER_SIZE || &buf[0..8] != MAGIC {
        return Ok(None);
    }
    let index_len = u32::from_le_bytes(
        buf[8..12]
            .try_into()
            .map_err(|_| IndexError::corrupt("short header"))?,
    ) as usize;
    let index_end = HEADER_SIZE
        .checked_add(index_len)
        .filter(|end| *end <= buf.len())
        .ok_or_else(|| {
            IndexError::corrupt(format!(
                "index length {index_len} exceeds buffer of {} bytes",
                buf.len()
            ))
        })?;
    Ok(Some(PrecomputedLayout {
        index: HEADER_SIZE..index_end,
        body: index_end..buf.len(),
    }))
}

// ─── Index ──────────────────────────────────────────────────────────────────

/// Finalized, read-only descriptor index: three parallel tables, the name
/// maps derived from them, and the arena their file spans point into.
#[derive(Debug, Clone)]
pub struct Index {
    files: Vec<FileEntry>,
    symbols: Vec<SymbolEntry>,
    packages: Vec<PackageEntry>,
    file_ids: FastMap<SmolStr, FileId>,
    symbol_ids: FastMap<SmolStr, SymbolId>,
    package_ids: FastMap<SmolStr, PackageId>,
    arena: BufferArena,
}

impl Index {
    /// Build the name maps over already-consistent tables.
    pub(crate) fn from_parts(
        files: Vec<FileEntry>,
        symbols: Vec<SymbolEntry>,
        packages: Vec<PackageEntry>,
        arena: BufferArena,
    ) -> Result<Self, IndexError> {
        let file_ids = name_map("file", files.iter().map(|f| &f.file_name))?;
        let symbol_ids = name_map("symbol", symbols.iter().map(|s| &s.full_name))?;
        let package_ids = name_map("package", packages.iter().map(|p| &p.full_name))?;
        Ok(Self {
            files,
            symbols,
            packages,
            file_ids,
            symbol_ids,
            package_ids,
            arena,
        })
    }

    /// Fast path: decode the index region of a precomputed buffer and rebase
    /// every file's body-relative offset onto the retained buffer. Nothing in
    /// the body is scanned.
    pub fn from_precomputed(buffer: Bytes) -> Result<Self, IndexError> {
        let layout = precomputed_layout(&buffer)?
            .ok_or_else(|| IndexError::corrupt("missing precomputed index signature"))?;
        let tables = decode_tables(&buffer[layout.index.clone()])?;

        let body_len = layout.body.len();
        let mut arena = BufferArena::new();
        let buffer_id = arena.retain(buffer);

        let mut files = Vec::with_capacity(tables.files.len());
        for raw in tables.files {
            let in_bounds = raw
                .data_offset
                .checked_add(raw.length)
                .is_some_and(|end| end <= body_len as u64);
            if !in_bounds {
                return Err(IndexError::corrupt(format!(
                    "file {} spans {}+{} past body of {} bytes",
                    raw.file_name, raw.data_offset, raw.length, body_len
                )));
            }
            let span = FileSpan {
                buffer: buffer_id,
                offset: layout.body.start + raw.data_offset as usize,
                len: raw.length as usize,
            };
            arena.check(span)?;
            files.push(FileEntry {
                file_name: raw.file_name,
                span,
            });
        }

        validate_tree(files.len(), &tables.symbols, &tables.packages)?;
        let index = Self::from_parts(files, tables.symbols, tables.packages, arena)?;
        debug!(
            files = index.files_len(),
            symbols = index.symbols_len(),
            packages = index.packages_len(),
            "decoded precomputed index"
        );
        Ok(index)
    }

    /// Builder path: scan each buffer as a schema-definition set.
    pub fn from_schema_buffers<I>(buffers: I) -> Result<Self, IndexError>
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut builder = IndexBuilder::new();
        for buffer in buffers {
            builder.add_schema_definition_set(buffer)?;
        }
        builder.finalize()
    }

    // ════════════════════════════════════════════════════════════════════════
    // Serialization
    // ════════════════════════════════════════════════════════════════════════

    /// Encode the three tables. `offsets[i]` is the body-relative offset of
    /// file `i`.
    fn encode_tables(&self, offsets: &[usize]) -> Vec<u8> {
        let mut buf = Vec::new();
        for (file, offset) in self.files.iter().zip(offsets) {
            write_message_field(&mut buf, INDEX_FILES, |f| {
                write_str_field(f, FILE_NAME, &file.file_name);
                write_varint_field(f, FILE_DATA_OFFSET, *offset as u64);
                write_varint_field(f, FILE_LENGTH, file.span.len as u64);
            });
        }
        for symbol in &self.symbols {
            write_message_field(&mut buf, INDEX_SYMBOLS, |s| {
                write_str_field(s, SYMBOL_FULL_NAME, &symbol.full_name);
                write_varint_field(s, SYMBOL_FILE_INDEX, symbol.file_index as u64);
                write_varint_field(s, SYMBOL_KIND, symbol.kind.tag() as u64);
            });
        }
        for package in &self.packages {
            write_message_field(&mut buf, INDEX_PACKAGES, |p| {
                write_str_field(p, PACKAGE_FULL_NAME, &package.full_name);
                write_packed_field(p, PACKAGE_SYMBOL_INDEXES, &package.symbol_indexes);
                write_packed_field(p, PACKAGE_NESTED_PACKAGE_INDEXES, &package.nested_package_indexes);
            });
        }
        buf
    }

    /// Produce a precomputed buffer (header, index, body) that
    /// [`Index::from_precomputed`] loads back with identical ids.
    ///
    /// The body is itself an encoded definition set, so a reader that
    /// ignores the index can still scan it.
    pub fn write_precomputed(&self) -> Result<Vec<u8>, IndexError> {
        let mut body: Vec<u8> = Vec::with_capacity(self.files.iter().map(|f| f.span.len + 8).sum());
        let mut offsets = Vec::with_capacity(self.files.len());
        for file in &self.files {
            let bytes = self.arena.slice(file.span).ok_or_else(|| {
                IndexError::InternalInconsistency(format!("file {} has no retained bytes", file.file_name))
            })?;
            write_tag(&mut body, SET_FILE, WIRE_LEN);
            encode_varint(bytes.len() as u64, &mut body);
            offsets.push(body.len());
            body.extend_from_slice(bytes);
        }

        let index = self.encode_tables(&offsets);
        let index_len = u32::try_from(index.len())
            .map_err(|_| IndexError::corrupt(format!("index of {} bytes exceeds u32", index.len())))?;

        let mut out = Vec::with_capacity(HEADER_SIZE + index.len() + body.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&index_len.to_le_bytes());
        out.extend_from_slice(&index);
        out.extend_from_slice(&body);
        Ok(out)
    }

    // ════════════════════════════════════════════════════════════════════════
    // Read access
    // ════════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn files(&self) -> &[FileEntry] {
        &self.files
    }

    #[inline]
    pub fn symbols(&self) -> &[SymbolEntry] {
        &self.symbols
    }

    #[inline]
    pub fn packages(&self) -> &[PackageEntry] {
        &self.packages
    }

    #[inline]
    pub fn files_len(&self) -> usize {
        self.files.len()
    }

    #[inline]
    pub fn symbols_len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn packages_len(&self) -> usize {
        self.packages.len()
    }

    #[inline]
    pub fn file(&self, id: FileId) -> Option<&FileEntry> {
        self.files.get(id)
    }

    #[inline]
    pub fn symbol(&self, id: SymbolId) -> Option<&SymbolEntry> {
        self.symbols.get(id)
    }

    #[inline]
    pub fn package(&self, id: PackageId) -> Option<&PackageEntry> {
        self.packages.get(id)
    }

    #[inline]
    pub fn root_package(&self) -> Option<&PackageEntry> {
        self.packages.get(ROOT_PACKAGE)
    }

    #[inline]
    pub fn file_id(&self, file_name: &str) -> Option<FileId> {
        self.file_ids.get(file_name).copied()
    }

    #[inline]
    pub fn symbol_id(&self, full_name: &str) -> Option<SymbolId> {
        self.symbol_ids.get(full_name).copied()
    }

    #[inline]
    pub fn package_id(&self, full_name: &str) -> Option<PackageId> {
        self.package_ids.get(full_name).copied()
    }

    /// Raw definition bytes of one file (zero-copy).
    #[inline]
    pub fn file_bytes(&self, id: FileId) -> Option<&[u8]> {
        self.arena.slice(self.files.get(id)?.span)
    }

    #[inline]
    pub fn arena(&self) -> &BufferArena {
        &self.arena
    }
}

fn name_map<'a>(
    kind: &str,
    names: impl ExactSizeIterator<Item = &'a SmolStr>,
) -> Result<FastMap<SmolStr, usize>, IndexError> {
    let mut map = FastMap::default();
    map.reserve(names.len());
    for (i, name) in names.enumerate() {
        if map.insert(name.clone(), i).is_some() {
            return Err(IndexError::corrupt(format!("duplicate {kind} name {name:?}")));
        }
    }
    Ok(map)
}

// ─── Decoding ───────────────────────────────────────────────────────────────

struct RawFile {
    file_name: SmolStr,
    data_offset: u64,
    length: u64,
}

struct RawTables {
    files: Vec<RawFile>,
    symbols: Vec<SymbolEntry>,
    packages: Vec<PackageEntry>,
}

#[inline]
fn corrupt_wire(e: WireError) -> IndexError {
    IndexError::CorruptIndex(e.to_string())
}

fn decode_tables(bytes: &[u8]) -> Result<RawTables, IndexError> {
    let mut reader = WireReader::new(bytes);
    let mut tables = RawTables {
        files: Vec::new(),
        symbols: Vec::new(),
        packages: Vec::new(),
    };
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag().map_err(corrupt_wire)?;
        match (field, wire_type) {
            (INDEX_FILES, WIRE_LEN) => {
                let payload = reader.read_bytes().map_err(corrupt_wire)?;
                tables.files.push(decode_file(payload).map_err(corrupt_wire)?);
            }
            (INDEX_SYMBOLS, WIRE_LEN) => {
                let payload = reader.read_bytes().map_err(corrupt_wire)?;
                tables.symbols.push(decode_symbol(payload)?);
            }
            (INDEX_PACKAGES, WIRE_LEN) => {
                let payload = reader.read_bytes().map_err(corrupt_wire)?;
                tables.packages.push(decode_package(payload).map_err(corrupt_wire)?);
            }
            _ => reader.skip(field, wire_type).map_err(corrupt_wire)?,
        }
    }
    Ok(tables)
}

fn decode_file(bytes: &[u8]) -> Result<RawFile, WireError> {
    let mut reader = WireReader::new(bytes);
    let mut file = RawFile {
        file_name: SmolStr::default(),
        data_offset: 0,
        length: 0,
    };
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match (field, wire_type) {
            (FILE_NAME, WIRE_LEN) => file.file_name = SmolStr::from(reader.read_str()?),
            (FILE_DATA_OFFSET, WIRE_VARINT) => file.data_offset = reader.read_varint()?,
            (FILE_LENGTH, WIRE_VARINT) => file.length = reader.read_varint()?,
            _ => reader.skip(field, wire_type)?,
        }
    }
    Ok(file)
}

fn decode_symbol(bytes: &[u8]) -> Result<SymbolEntry, IndexError> {
    let mut reader = WireReader::new(bytes);
    let mut full_name = SmolStr::default();
    let mut file_index = 0usize;
    let mut kind = KIND_MESSAGE;
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag().map_err(corrupt_wire)?;
        match (field, wire_type) {
            (SYMBOL_FULL_NAME, WIRE_LEN) => {
                full_name = SmolStr::from(reader.read_str().map_err(corrupt_wire)?)
            }
            (SYMBOL_FILE_INDEX, WIRE_VARINT) => {
                file_index = reader.read_u32().map_err(corrupt_wire)? as usize
            }
            (SYMBOL_KIND, WIRE_VARINT) => kind = reader.read_u32().map_err(corrupt_wire)?,
            _ => reader.skip(field, wire_type).map_err(corrupt_wire)?,
        }
    }
    let kind = SymbolKind::from_tag(kind)
        .ok_or_else(|| IndexError::corrupt(format!("symbol {full_name:?} has unknown kind {kind}")))?;
    Ok(SymbolEntry {
        full_name,
        file_index,
        kind,
    })
}

fn decode_package(bytes: &[u8]) -> Result<PackageEntry, WireError> {
    let mut reader = WireReader::new(bytes);
    let mut package = PackageEntry::default();
    while !reader.is_empty() {
        let (field, wire_type) = reader.read_tag()?;
        match field {
            PACKAGE_FULL_NAME if wire_type == WIRE_LEN => {
                package.full_name = SmolStr::from(reader.read_str()?)
            }
            PACKAGE_SYMBOL_INDEXES => reader.read_repeated_u32(wire_type, &mut package.symbol_indexes)?,
            PACKAGE_NESTED_PACKAGE_INDEXES => {
                reader.read_repeated_u32(wire_type, &mut package.nested_package_indexes)?
            }
            _ => reader.skip(field, wire_type)?,
        }
    }
    Ok(package)
}

/// Package components plus the message scopes nested types live in.
const MAX_TREE_DEPTH: usize = MAX_PACKAGE_DEPTH + MAX_NESTING_DEPTH;

/// Every id in range, root named "", each symbol and non-root package owned
/// by exactly one parent, and everything reachable from the root.
fn validate_tree(
    files_len: usize,
    symbols: &[SymbolEntry],
    packages: &[PackageEntry],
) -> Result<(), IndexError> {
    for symbol in symbols {
        if symbol.file_index >= files_len {
            return Err(IndexError::corrupt(format!(
                "symbol {} references file {} of {}",
                symbol.full_name, symbol.file_index, files_len
            )));
        }
    }

    let root = packages
        .get(ROOT_PACKAGE)
        .ok_or_else(|| IndexError::corrupt("missing root package"))?;
    if !root.full_name.is_empty() {
        return Err(IndexError::corrupt(format!(
            "root package is named {:?}",
            root.full_name
        )));
    }

    let mut symbol_owned = vec![false; symbols.len()];
    let mut package_owned = vec![false; packages.len()];
    package_owned[ROOT_PACKAGE] = true;

    for package in packages {
        for &s in &package.symbol_indexes {
            match symbol_owned.get_mut(s) {
                Some(owned) if !*owned => *owned = true,
                Some(_) => return Err(IndexError::corrupt(format!("symbol {s} has two parents"))),
                None => return Err(IndexError::corrupt(format!("symbol index {s} out of range"))),
            }
        }
        for &p in &package.nested_package_indexes {
            match package_owned.get_mut(p) {
                Some(owned) if !*owned => *owned = true,
                Some(_) => {
                    return Err(IndexError::corrupt(format!(
                        "package {p} has two parents or nests the root"
                    )));
                }
                None => return Err(IndexError::corrupt(format!("package index {p} out of range"))),
            }
        }
    }
    if let Some(s) = symbol_owned.iter().position(|owned| !owned) {
        return Err(IndexError::corrupt(format!("symbol {s} has no parent package")));
    }

    // One parent each; a cycle would leave its members unreachable.
    let mut visited = vec![false; packages.len()];
    let mut stack = vec![(ROOT_PACKAGE, 0usize)];
    while let Some((p, depth)) = stack.pop() {
        if std::mem::replace(&mut visited[p], true) {
            continue;
        }
        if depth > MAX_TREE_DEPTH {
            return Err(IndexError::corrupt(format!(
                "package {p} is nested deeper than {MAX_TREE_DEPTH} levels"
            )));
        }
        stack.extend(packages[p].nested_package_indexes.iter().map(|&n| (n, depth + 1)));
    }
    if let Some(p) = visited.iter().position(|v| !v) {
        return Err(IndexError::corrupt(format!("package {p} is unreachable from the root")));
    }
    Ok(())
}
