use super::types::DatabaseConfig;
use crate::builder::IndexBuilder;
use crate::error::IndexError;
use crate::index::{Index, precomputed_layout};
use crate::name::last_component;
use crate::pool::{DescriptorHandle, ReflectivePool, SchemaSource};
use crate::types::*;
use bytes::Bytes;
use once_cell::sync::OnceCell;
use serde_json::{Map, Value, json};
use smol_str::SmolStr;
use tracing::{debug, trace, warn};

/// Catalog of schema definitions, queryable by name or dense id, that
/// resolves full descriptors lazily through an external reflective pool.
///
/// Loading takes `&mut self`; every query takes `&self`. Once loaded the
/// database can be shared across threads: each descriptor slot resolves at
/// most once, and concurrent first accesses of one id wait for the single
/// resolution instead of asking the pool twice.
pub struct DescriptorDatabase<P: ReflectivePool> {
    config: DatabaseConfig,
    pool: P,
    index: Option<Index>,
    builder: Option<IndexBuilder>,
    prebuilt_loaded: bool,
    descriptors: Vec<OnceCell<P::Handle>>,
}

impl<P: ReflectivePool> DescriptorDatabase<P> {
    pub fn new(pool: P) -> Self {
        Self::new_with_config(pool, DatabaseConfig::default())
    }

    pub fn new_with_config(pool: P, config: DatabaseConfig) -> Self {
        Self {
            config,
            pool,
            index: None,
            builder: None,
            prebuilt_loaded: false,
            descriptors: Vec::new(),
        }
    }

    // ════════════════════════════════════════════════════════════════════════
    // Loading
    // ════════════════════════════════════════════════════════════════════════

    /// Load a precomputed bundle, or a raw schema-definition set.
    ///
    /// A buffer starting with the index signature is decoded directly (the
    /// fast path) unless `skip_prebuilt_index` is set, in which case only its
    /// body is scanned. Anything else is scanned in full. On error nothing
    /// is committed and the call may be retried.
    ///
    /// A precomputed index can only be loaded into an empty database, and
    /// nothing can be loaded after it: merging would renumber ids.
    pub fn load(&mut self, buffer: Bytes) -> Result<(), IndexError> {
        if self.prebuilt_loaded {
            return Err(IndexError::AlreadyLoaded);
        }

        let layout = precomputed_layout(&buffer).inspect_err(|e| {
            warn!(error = %e, len = buffer.len(), "rejected precomputed index header");
        })?;

        match layout {
            Some(layout) if self.config.skip_prebuilt_index => {
                debug!(body_len = layout.body.len(), "precomputed index skipped by config");
                self.load_with_builder(|builder| {
                    builder.add_schema_definition_set(buffer.slice(layout.body))
                })
            }
            Some(_) => {
                if self.index.is_some() {
                    return Err(IndexError::AlreadyLoaded);
                }
                let index = Index::from_precomputed(buffer).inspect_err(|e| {
                    warn!(error = %e, "rejected precomputed index");
                })?;
                self.install(index);
                self.prebuilt_loaded = true;
                Ok(())
            }
            None => self.load_with_builder(|builder| builder.add_schema_definition_set(buffer)),
        }
    }

    /// Compile `.proto` source text and load it through the builder.
    /// Test-only; production inputs are always binary.
    pub fn parse_and_load(&mut self, file_name: &str, source_text: &str) -> Result<(), IndexError> {
        if self.prebuilt_loaded {
            return Err(IndexError::AlreadyLoaded);
        }
        self.load_with_builder(|builder| builder.parse_source_and_add(file_name, source_text))
    }

    fn load_with_builder(
        &mut self,
        add: impl FnOnce(&mut IndexBuilder) -> Result<(), IndexError>,
    ) -> Result<(), IndexError> {
        let builder = self.builder.get_or_insert_with(IndexBuilder::new);
        add(builder)?;
        let index = builder.finalize()?;
        self.install(index);
        Ok(())
    }

    /// Publish a finalized index. Builder batches only append, so existing
    /// cache slots keep their ids.
    fn install(&mut self, index: Index) {
        self.descriptors.resize_with(index.symbols_len(), OnceCell::new);
        debug!(
            files = index.files_len(),
            symbols = index.symbols_len(),
            packages = index.packages_len(),
            retained_bytes = index.arena().byte_len(),
            "descriptor index installed"
        );
        self.index = Some(index);
    }

    // ════════════════════════════════════════════════════════════════════════
    // Read access
    // ════════════════════════════════════════════════════════════════════════

    #[inline]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    #[inline]
    pub fn pool(&self) -> &P {
        &self.pool
    }

    #[inline]
    pub fn index(&self) -> Option<&Index> {
        self.index.as_ref()
    }

    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.index.is_some()
    }

    /// True once a precomputed index was loaded through the fast path.
    #[inline]
    pub fn is_prebuilt(&self) -> bool {
        self.prebuilt_loaded
    }

    #[inline]
    pub fn symbols_len(&self) -> usize {
        self.index.as_ref().map_or(0, Index::symbols_len)
    }

    #[inline]
    pub fn packages_len(&self) -> usize {
        self.index.as_ref().map_or(0, Index::packages_len)
    }

    #[inline]
    pub fn files_len(&self) -> usize {
        self.index.as_ref().map_or(0, Index::files_len)
    }

    /// O(1). A miss is not an error.
    #[inline]
    pub fn lookup_symbol_id(&self, full_name: &str) -> Option<SymbolId> {
        self.index.as_ref()?.symbol_id(full_name)
    }

    pub fn symbol_name_at(&self, id: SymbolId) -> Result<&str, IndexError> {
        Ok(self.symbol_at(id)?.full_name.as_str())
    }

    pub fn all_symbol_names(&self) -> Vec<SmolStr> {
        self.index
            .as_ref()
            .map(|index| index.symbols().iter().map(|s| s.full_name.clone()).collect())
            .unwrap_or_default()
    }

    pub fn package_at(&self, id: PackageId) -> Result<&PackageEntry, IndexError> {
        self.index
            .as_ref()
            .and_then(|index| index.package(id))
            .ok_or(IndexError::InvalidIndex {
                kind: "package",
                index: id,
                len: self.packages_len(),
            })
    }

    #[inline]
    pub fn root_package(&self) -> Option<&PackageEntry> {
        self.index.as_ref()?.root_package()
    }

    fn symbol_at(&self, id: SymbolId) -> Result<&SymbolEntry, IndexError> {
        self.index
            .as_ref()
            .and_then(|index| index.symbol(id))
            .ok_or(IndexError::InvalidIndex {
                kind: "symbol",
                index: id,
                len: self.symbols_len(),
            })
    }

    // ════════════════════════════════════════════════════════════════════════
    // Descriptor resolution
    // ════════════════════════════════════════════════════════════════════════

    /// Fetch the fully linked descriptor of symbol `id`, asking the pool on
    /// first access only.
    ///
    /// This is the one call that may trigger full, cross-file resolution.
    pub fn resolve_descriptor_at_id(&self, id: SymbolId) -> Result<P::Handle, IndexError> {
        let symbol = self.symbol_at(id)?;
        let slot = self.descriptors.get(id).ok_or_else(|| {
            IndexError::InternalInconsistency(format!("no cache slot for symbol {id}"))
        })?;
        slot.get_or_try_init(|| {
            trace!(id, name = %symbol.full_name, "resolving descriptor");
            self.pool
                .find_type_by_name(&symbol.full_name, symbol.kind, self)
                .ok_or_else(|| {
                    warn!(id, name = %symbol.full_name, "reflective pool has no descriptor for indexed symbol");
                    IndexError::InternalInconsistency(format!(
                        "symbol {} is indexed but the pool can't resolve it",
                        symbol.full_name
                    ))
                })
        })
        .cloned()
    }

    /// The cached descriptor of `id`, if it was already resolved.
    #[inline]
    pub fn cached_descriptor_at_id(&self, id: SymbolId) -> Option<&P::Handle> {
        self.descriptors.get(id)?.get()
    }

    /// Map a descriptor handed out by the pool back to its symbol id.
    pub fn symbol_id_for_descriptor(&self, descriptor: &P::Handle) -> Result<SymbolId, IndexError> {
        self.lookup_symbol_id(descriptor.full_name())
            .ok_or_else(|| IndexError::UnknownDescriptor(descriptor.full_name().to_string()))
    }

    // ════════════════════════════════════════════════════════════════════════
    // Namespace browsing
    // ════════════════════════════════════════════════════════════════════════

    /// Direct symbols and nested packages of the root package. Empty before
    /// anything is loaded.
    pub fn list_root_namespace_entries(&self) -> Vec<NamespaceEntry> {
        self.list_namespace_entries(ROOT_PACKAGE).unwrap_or_default()
    }

    /// Direct symbols first, then nested packages, each in declaration
    /// order. Callers that need a display order sort by name.
    pub fn list_namespace_entries(&self, package_id: PackageId) -> Result<Vec<NamespaceEntry>, IndexError> {
        let package = self.package_at(package_id)?;
        let Some(index) = self.index.as_ref() else {
            return Ok(Vec::new());
        };

        let mut out = Vec::with_capacity(package.symbol_indexes.len() + package.nested_package_indexes.len());
        for &id in &package.symbol_indexes {
            if let Some(symbol) = index.symbol(id) {
                out.push(NamespaceEntry {
                    id,
                    name: SmolStr::from(last_component(&symbol.full_name)),
                    is_message: true,
                });
            }
        }
        for &id in &package.nested_package_indexes {
            if let Some(nested) = index.package(id) {
                out.push(NamespaceEntry {
                    id,
                    name: SmolStr::from(last_component(&nested.full_name)),
                    is_message: false,
                });
            }
        }
        Ok(out)
    }

    /// Whole package tree as nested JSON, for debugging:
    /// `{"name": "a", "symbols": ["a.M"], "packages": [...]}`. Empty lists
    /// are omitted and symbol names are sorted.
    pub fn to_debug_json(&self) -> Value {
        match self.index.as_ref() {
            Some(index) => package_to_debug_json(index, ROOT_PACKAGE),
            None => Value::Null,
        }
    }
}

fn package_to_debug_json(index: &Index, id: PackageId) -> Value {
    let Some(package) = index.package(id) else {
        return Value::Null;
    };
    let mut out = Map::new();
    out.insert("name".into(), json!(package.full_name.as_str()));

    if !package.symbol_indexes.is_empty() {
        let mut symbols: Vec<&str> = package
            .symbol_indexes
            .iter()
            .filter_map(|&s| index.symbol(s).map(|s| s.full_name.as_str()))
            .collect();
        symbols.sort_unstable();
        out.insert("symbols".into(), json!(symbols));
    }

    if !package.nested_package_indexes.is_empty() {
        let packages: Vec<Value> = package
            .nested_package_indexes
            .iter()
            .map(|&p| package_to_debug_json(index, p))
            .collect();
        out.insert("packages".into(), Value::Array(packages));
    }

    Value::Object(out)
}

// ─── Schema Source ──────────────────────────────────────────────────────────

impl<P: ReflectivePool> SchemaSource for DescriptorDatabase<P> {
    fn find_file_by_name(&self, file_name: &str) -> Option<Vec<u8>> {
        let index = self.index.as_ref()?;
        index.file_bytes(index.file_id(file_name)?).map(<[u8]>::to_vec)
    }

    fn find_file_containing_symbol(&self, symbol_name: &str) -> Option<Vec<u8>> {
        let index = self.index.as_ref()?;
        let symbol = index.symbol(index.symbol_id(symbol_name)?)?;
        index.file_bytes(symbol.file_index).map(<[u8]>::to_vec)
    }

    fn find_all_file_names(&self) -> Vec<String> {
        self.index
            .as_ref()
            .map(|index| index.files().iter().map(|f| f.file_name.to_string()).collect())
            .unwrap_or_default()
    }
}
