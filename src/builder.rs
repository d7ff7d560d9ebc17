use crate::arena::BufferArena;
use crate::error::IndexError;
use crate::index::Index;
use crate::name::{self, NameTable};
use crate::scanner::{ScannedFile, scan_file, scan_file_set};
use crate::source;
use crate::types::*;
use bytes::Bytes;
use smol_str::SmolStr;
use tracing::debug;

/// Builds an [`Index`] from raw schema definitions.
///
/// Most processes never need this: a precomputed index is loaded directly.
/// This is the fallback when one is not available or is disabled.
///
/// Every add call is all-or-nothing. A batch is scanned and checked for name
/// collisions in full before anything is committed, so a failed call leaves
/// the builder exactly as it was.
#[derive(Debug, Clone)]
pub struct IndexBuilder {
    arena: BufferArena,
    files: Vec<FileEntry>,
    symbols: Vec<SymbolEntry>,
    packages: Vec<PackageEntry>,
    file_names: NameTable,
    symbol_names: NameTable,
    package_names: NameTable,
    batches: usize,
}

impl Default for IndexBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// One scanned definition waiting to be committed.
struct Pending {
    offset: usize,
    len: usize,
    file: ScannedFile,
    full_names: Vec<SmolStr>,
}

impl IndexBuilder {
    pub fn new() -> Self {
        let mut package_names = NameTable::default();
        package_names.intern("");
        Self {
            arena: BufferArena::new(),
            files: Vec::new(),
            symbols: Vec::new(),
            packages: vec![PackageEntry::new(SmolStr::default())],
            file_names: NameTable::default(),
            symbol_names: NameTable::default(),
            package_names,
            batches: 0,
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // Adding definitions
    // ════════════════════════════════════════════════════════════════════════

    /// Scan and register one encoded schema definition.
    pub fn add_schema_definition(&mut self, buffer: Bytes) -> Result<(), IndexError> {
        let file = scan_file(&buffer)?;
        let len = buffer.len();
        self.commit(buffer, vec![(0, len, file)])
    }

    /// Scan and register every definition of an encoded definition set.
    pub fn add_schema_definition_set(&mut self, buffer: Bytes) -> Result<(), IndexError> {
        let spans = scan_file_set(&buffer)?;
        let mut scanned = Vec::with_capacity(spans.len());
        for (offset, len) in spans {
            scanned.push((offset, len, scan_file(&buffer[offset..offset + len])?));
        }
        self.commit(buffer, scanned)
    }

    /// Compile `.proto` source text, then register it. Test-only entry point.
    pub fn parse_source_and_add(&mut self, file_name: &str, source_text: &str) -> Result<(), IndexError> {
        let encoded = source::compile(file_name, source_text)?;
        self.add_schema_definition(Bytes::from(encoded))
    }

    fn commit(&mut self, buffer: Bytes, scanned: Vec<(usize, usize, ScannedFile)>) -> Result<(), IndexError> {
        let pending = self.validate(&buffer, scanned)?;

        // Nothing below can fail.
        let mut added_symbols = 0usize;
        if !pending.is_empty() {
            let buffer_id = self.arena.retain(buffer);
            for p in pending {
                let file_id = self.files.len();
                self.file_names.intern(&p.file.name);
                self.files.push(FileEntry {
                    file_name: p.file.name,
                    span: FileSpan {
                        buffer: buffer_id,
                        offset: p.offset,
                        len: p.len,
                    },
                });
                for (full_name, ty) in p.full_names.into_iter().zip(&p.file.types) {
                    self.add_symbol(file_id, full_name, ty.kind);
                    added_symbols += 1;
                }
            }
        }
        self.batches += 1;

        debug!(
            batch = self.batches,
            added_symbols,
            files = self.files.len(),
            symbols = self.symbols.len(),
            packages = self.packages.len(),
            "committed schema batch"
        );
        Ok(())
    }

    /// Resolve duplicates without touching any state. Re-added files with
    /// identical bytes are dropped; anything else colliding is an error.
    fn validate(
        &self,
        buffer: &[u8],
        scanned: Vec<(usize, usize, ScannedFile)>,
    ) -> Result<Vec<Pending>, IndexError> {
        let mut pending: Vec<Pending> = Vec::with_capacity(scanned.len());
        let mut batch_files: FastMap<SmolStr, (usize, usize)> = FastMap::default();
        let mut batch_symbols: FastHashSet<SmolStr> = FastHashSet::default();

        for (offset, len, file) in scanned {
            let bytes = &buffer[offset..offset + len];

            let previous = match self.file_names.get(&file.name) {
                Some(id) => self.files.get(id).and_then(|f| self.arena.slice(f.span)),
                None => batch_files.get(&file.name).map(|(o, l)| &buffer[*o..*o + *l]),
            };
            if let Some(previous) = previous {
                if previous == bytes {
                    debug!(file = %file.name, "skipping identical schema definition");
                    continue;
                }
                return Err(IndexError::parse(format!(
                    "schema definition {} was already added with different contents",
                    file.name
                )));
            }

            let mut full_names = Vec::with_capacity(file.types.len());
            for ty in &file.types {
                let full_name = name::join(&file.package, &ty.path);
                if self.symbol_names.contains(&full_name) || !batch_symbols.insert(full_name.clone()) {
                    return Err(IndexError::parse(format!(
                        "duplicate symbol {full_name} in {}",
                        file.name
                    )));
                }
                full_names.push(full_name);
            }

            batch_files.insert(file.name.clone(), (offset, len));
            pending.push(Pending {
                offset,
                len,
                file,
                full_names,
            });
        }
        Ok(pending)
    }

    fn add_symbol(&mut self, file_index: FileId, full_name: SmolStr, kind: SymbolKind) {
        let (symbol_id, _) = self.symbol_names.intern(&full_name);
        debug_assert_eq!(symbol_id, self.symbols.len());
        let package_id = self.get_or_create_package(name::parent(&full_name).unwrap_or(""));
        self.packages[package_id].symbol_indexes.push(symbol_id);
        self.symbols.push(SymbolEntry {
            full_name,
            file_index,
            kind,
        });
    }

    /// `a.b.c` implies `a` and `a.b`; missing ancestors are created first so
    /// parents always get the lower id.
    fn get_or_create_package(&mut self, full_name: &str) -> PackageId {
        // Walk up to the nearest existing ancestor; the root always exists.
        let mut missing = Vec::new();
        let mut current = full_name;
        let mut parent_id = loop {
            if let Some(id) = self.package_names.get(current) {
                break id;
            }
            missing.push(current);
            current = name::parent(current).unwrap_or("");
        };

        for package in missing.into_iter().rev() {
            let (id, _) = self.package_names.intern(package);
            self.packages.push(PackageEntry::new(SmolStr::from(package)));
            self.packages[parent_id].nested_package_indexes.push(id);
            parent_id = id;
        }
        parent_id
    }

    // ════════════════════════════════════════════════════════════════════════
    // Finalize
    // ════════════════════════════════════════════════════════════════════════

    /// Snapshot the current tables into an [`Index`]. The builder stays
    /// usable; later batches append, so ids already handed out stay valid.
    pub fn finalize(&self) -> Result<Index, IndexError> {
        if self.batches == 0 {
            return Err(IndexError::EmptyBuilder);
        }
        Index::from_parts(
            self.files.clone(),
            self.symbols.clone(),
            self.packages.clone(),
            self.arena.clone(),
        )
    }

    #[inline]
    pub fn symbols_len(&self) -> usize {
        self.symbols.len()
    }

    #[inline]
    pub fn files_len(&self) -> usize {
        self.files.len()
    }
}
