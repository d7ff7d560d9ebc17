// ═══════════════════════════════════════════════════════════════════════
// Helpers
// ═══════════════════════════════════════════════════════════════════════
mod descriptor_database_tests {
    use crate::database::{DatabaseConfig, DescriptorDatabase};
    use crate::error::IndexError;
    use crate::name;
    use crate::pool::{DescriptorHandle, ReflectivePool, SchemaSource};
    use crate::scanner::{SET_FILE, scan_file};
    use crate::source::compile;
    use crate::types::*;
    use crate::wire::write_bytes_field;
    use bytes::Bytes;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    const A_PROTO: &str = "package a.b;\nmessage M {\n  string id = 1;\n}\n";
    const C_PROTO: &str = "package a.b.c;\nmessage N {\n  a.b.M parent = 1;\n}\n";

    #[derive(Debug, Clone, PartialEq, Eq)]
    struct FakeDescriptor {
        full_name: String,
        kind: SymbolKind,
        file_name: String,
    }

    impl DescriptorHandle for FakeDescriptor {
        fn full_name(&self) -> &str {
            &self.full_name
        }
    }

    /// Links a type by pulling its file from the source and scanning it.
    /// Counts every call so tests can check laziness.
    #[derive(Default)]
    struct FakePool {
        calls: AtomicUsize,
        refuse: Vec<&'static str>,
        delay: Option<Duration>,
    }

    impl FakePool {
        fn refusing(names: &[&'static str]) -> Self {
            Self {
                refuse: names.to_vec(),
                ..Self::default()
            }
        }

        fn slow(delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::default()
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl ReflectivePool for FakePool {
        type Handle = FakeDescriptor;

        fn find_type_by_name(
            &self,
            full_name: &str,
            kind: SymbolKind,
            source: &dyn SchemaSource,
        ) -> Option<FakeDescriptor> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            if self.refuse.iter().any(|r| *r == full_name) {
                return None;
            }
            let bytes = source.find_file_containing_symbol(full_name)?;
            let file = scan_file(&bytes).ok()?;
            file.types
                .iter()
                .any(|ty| ty.kind == kind && name::join(&file.package, &ty.path) == full_name)
                .then(|| FakeDescriptor {
                    full_name: full_name.to_string(),
                    kind,
                    file_name: file.name.to_string(),
                })
        }
    }

    fn loaded_db() -> DescriptorDatabase<FakePool> {
        loaded_db_with(FakePool::default())
    }

    fn loaded_db_with(pool: FakePool) -> DescriptorDatabase<FakePool> {
        let mut db = DescriptorDatabase::new(pool);
        db.parse_and_load("a.proto", A_PROTO).unwrap();
        db.parse_and_load("c.proto", C_PROTO).unwrap();
        db
    }

    /// Encode compiled files as a definition set.
    fn definition_set(files: &[(&str, &str)]) -> Bytes {
        let mut buf = Vec::new();
        for (file_name, source) in files {
            write_bytes_field(&mut buf, SET_FILE, &compile(file_name, source).unwrap());
        }
        Bytes::from(buf)
    }

    fn precomputed(db: &DescriptorDatabase<FakePool>) -> Bytes {
        Bytes::from(db.index().unwrap().write_precomputed().unwrap())
    }

    fn entry(id: usize, name: &str, is_message: bool) -> NamespaceEntry {
        NamespaceEntry {
            id,
            name: name.into(),
            is_message,
        }
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Loading
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_two_files_build_package_chain() {
        let db = loaded_db();

        assert!(db.is_loaded());
        assert!(!db.is_prebuilt());
        assert_eq!(db.symbols_len(), 2);
        assert_eq!(db.files_len(), 2);
        assert_eq!(db.all_symbol_names(), vec!["a.b.M", "a.b.c.N"]);
        assert_eq!(db.lookup_symbol_id("a.b.M"), Some(0));
        assert_eq!(db.lookup_symbol_id("a.b.c.N"), Some(1));
        assert_eq!(db.lookup_symbol_id("a.b"), None);
        assert_eq!(db.symbol_name_at(1).unwrap(), "a.b.c.N");

        assert_eq!(db.packages_len(), 4);
        let names: Vec<&str> = (0..4)
            .map(|id| db.package_at(id).unwrap().full_name.as_str())
            .collect();
        assert_eq!(names, vec!["", "a", "a.b", "a.b.c"]);
        assert_eq!(db.root_package().unwrap().nested_package_indexes, vec![1]);
        assert_eq!(db.package_at(2).unwrap().symbol_indexes, vec![0]);
        assert_eq!(db.package_at(3).unwrap().symbol_indexes, vec![1]);
    }

    #[test]
    fn test_raw_definition_set_uses_builder_path() {
        let mut db = DescriptorDatabase::new(FakePool::default());
        db.load(definition_set(&[("a.proto", A_PROTO), ("c.proto", C_PROTO)]))
            .unwrap();

        assert!(!db.is_prebuilt());
        assert_eq!(db.all_symbol_names(), vec!["a.b.M", "a.b.c.N"]);
        assert_eq!(db.resolve_descriptor_at_id(1).unwrap().file_name, "c.proto");
    }

    #[test]
    fn test_precomputed_round_trip_matches_builder() {
        let built = loaded_db();
        let mut fast = DescriptorDatabase::new(FakePool::default());
        fast.load(precomputed(&built)).unwrap();

        assert!(fast.is_prebuilt());
        assert_eq!(fast.all_symbol_names(), built.all_symbol_names());
        assert_eq!(fast.packages_len(), built.packages_len());
        for id in 0..built.packages_len() {
            assert_eq!(fast.package_at(id).unwrap(), built.package_at(id).unwrap());
            assert_eq!(
                fast.list_namespace_entries(id).unwrap(),
                built.list_namespace_entries(id).unwrap()
            );
        }
        assert_eq!(fast.to_debug_json(), built.to_debug_json());
        assert_eq!(fast.find_all_file_names(), built.find_all_file_names());
        assert_eq!(
            fast.find_file_by_name("c.proto"),
            built.find_file_by_name("c.proto")
        );

        let descriptor = fast.resolve_descriptor_at_id(0).unwrap();
        assert_eq!(descriptor, built.resolve_descriptor_at_id(0).unwrap());
    }

    #[test]
    fn test_same_inputs_same_index() {
        let first = loaded_db();
        let second = loaded_db();
        assert_eq!(first.all_symbol_names(), second.all_symbol_names());
        assert_eq!(first.to_debug_json(), second.to_debug_json());
        assert_eq!(precomputed(&first), precomputed(&second));
    }

    #[test]
    fn test_skip_prebuilt_index_scans_body() {
        let bundle = precomputed(&loaded_db());
        let config = DatabaseConfig {
            skip_prebuilt_index: true,
        };
        let mut db = DescriptorDatabase::new_with_config(FakePool::default(), config);
        db.load(bundle).unwrap();

        assert!(db.config().skip_prebuilt_index);
        assert!(!db.is_prebuilt());
        assert_eq!(db.all_symbol_names(), vec!["a.b.M", "a.b.c.N"]);

        // still on the builder path, so more definitions can be appended
        db.parse_and_load("d.proto", "package d; message D {}").unwrap();
        assert_eq!(db.lookup_symbol_id("d.D"), Some(2));
    }

    #[test]
    fn test_nothing_loads_after_precomputed_index() {
        let bundle = precomputed(&loaded_db());
        let mut db = DescriptorDatabase::new(FakePool::default());
        db.load(bundle.clone()).unwrap();

        assert!(matches!(db.load(bundle), Err(IndexError::AlreadyLoaded)));
        assert!(matches!(
            db.parse_and_load("d.proto", "package d; message D {}"),
            Err(IndexError::AlreadyLoaded)
        ));
        assert!(matches!(
            db.load(definition_set(&[("d.proto", "package d; message D {}")])),
            Err(IndexError::AlreadyLoaded)
        ));
        assert_eq!(db.symbols_len(), 2);
    }

    #[test]
    fn test_precomputed_index_rejected_after_builder_load() {
        let bundle = precomputed(&loaded_db());
        let mut db = DescriptorDatabase::new(FakePool::default());
        db.parse_and_load("d.proto", "package d; message D {}").unwrap();

        assert!(matches!(db.load(bundle), Err(IndexError::AlreadyLoaded)));
        assert!(!db.is_prebuilt());
        assert_eq!(db.all_symbol_names(), vec!["d.D"]);
    }

    #[test]
    fn test_corrupt_precomputed_index_commits_nothing() {
        let bundle = precomputed(&loaded_db());
        let mut db = DescriptorDatabase::new(FakePool::default());

        // index length pointing past the end of the buffer
        let mut oversized = bundle.to_vec();
        oversized[8..12].copy_from_slice(&u32::MAX.to_le_bytes());
        assert!(matches!(
            db.load(Bytes::from(oversized)),
            Err(IndexError::CorruptIndex(_))
        ));

        // body cut short, so the last file span runs past it
        let truncated = bundle.slice(..bundle.len() - 4);
        assert!(matches!(db.load(truncated), Err(IndexError::CorruptIndex(_))));

        assert!(!db.is_loaded());
        assert!(!db.is_prebuilt());
        assert_eq!(db.symbols_len(), 0);

        db.load(bundle).unwrap();
        assert!(db.is_prebuilt());
        assert_eq!(db.symbols_len(), 2);
    }

    #[test]
    fn test_failed_parse_can_be_retried() {
        let mut db = DescriptorDatabase::new(FakePool::default());
        assert!(matches!(
            db.parse_and_load("bad.proto", "message M { string = 1; }"),
            Err(IndexError::Parse(_))
        ));
        assert!(!db.is_loaded());

        assert!(matches!(
            db.load(Bytes::from_static(b"\x0a\xff")),
            Err(IndexError::Parse(_))
        ));
        assert!(!db.is_loaded());

        db.parse_and_load("a.proto", A_PROTO).unwrap();
        assert_eq!(db.all_symbol_names(), vec!["a.b.M"]);
    }

    #[test]
    fn test_duplicate_symbol_across_loads_keeps_previous_index() {
        let mut db = loaded_db();
        let err = db
            .parse_and_load("again.proto", "package a.b; message M {}")
            .unwrap_err();
        assert!(matches!(err, IndexError::Parse(_)));
        assert_eq!(db.symbols_len(), 2);
        assert_eq!(db.files_len(), 2);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Resolution
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_resolution_is_lazy_and_cached() {
        let db = loaded_db();
        assert_eq!(db.pool().calls(), 0);
        assert!(db.cached_descriptor_at_id(1).is_none());

        let n = db.resolve_descriptor_at_id(1).unwrap();
        assert_eq!(n.full_name, "a.b.c.N");
        assert_eq!(n.kind, SymbolKind::Message);
        assert_eq!(n.file_name, "c.proto");
        assert_eq!(db.pool().calls(), 1);

        assert_eq!(db.resolve_descriptor_at_id(1).unwrap(), n);
        assert_eq!(db.pool().calls(), 1);
        assert_eq!(db.cached_descriptor_at_id(1), Some(&n));
        assert!(db.cached_descriptor_at_id(0).is_none());
    }

    #[test]
    fn test_concurrent_first_access_resolves_once() {
        let db = loaded_db_with(FakePool::slow(Duration::from_millis(20)));

        let resolved: Vec<FakeDescriptor> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|_| s.spawn(|| db.resolve_descriptor_at_id(0).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });

        assert_eq!(db.pool().calls(), 1);
        assert!(resolved.iter().all(|d| d.full_name == "a.b.M"));
    }

    #[test]
    fn test_out_of_range_ids() {
        let db = loaded_db();
        assert!(matches!(
            db.resolve_descriptor_at_id(2),
            Err(IndexError::InvalidIndex {
                kind: "symbol",
                index: 2,
                len: 2
            })
        ));
        assert!(db.symbol_name_at(usize::MAX).is_err());
        assert!(matches!(
            db.list_namespace_entries(4),
            Err(IndexError::InvalidIndex { kind: "package", .. })
        ));
        assert!(db.cached_descriptor_at_id(9).is_none());
        assert_eq!(db.pool().calls(), 0);
    }

    #[test]
    fn test_empty_database() {
        let db = DescriptorDatabase::new(FakePool::default());
        assert!(!db.is_loaded());
        assert!(db.all_symbol_names().is_empty());
        assert!(db.list_root_namespace_entries().is_empty());
        assert!(db.root_package().is_none());
        assert_eq!(db.lookup_symbol_id("a.b.M"), None);
        assert!(matches!(
            db.resolve_descriptor_at_id(0),
            Err(IndexError::InvalidIndex { len: 0, .. })
        ));
        assert_eq!(db.to_debug_json(), serde_json::Value::Null);
        assert!(db.find_all_file_names().is_empty());
        assert_eq!(db.find_file_by_name("a.proto"), None);
    }

    #[test]
    fn test_pool_miss_is_internal_inconsistency_and_retried() {
        let db = loaded_db_with(FakePool::refusing(&["a.b.M"]));

        assert!(matches!(
            db.resolve_descriptor_at_id(0),
            Err(IndexError::InternalInconsistency(_))
        ));
        assert!(db.cached_descriptor_at_id(0).is_none());
        assert!(db.resolve_descriptor_at_id(0).is_err());
        assert_eq!(db.pool().calls(), 2);

        assert!(db.resolve_descriptor_at_id(1).is_ok());
    }

    #[test]
    fn test_descriptor_maps_back_to_id() {
        let db = loaded_db();
        for id in 0..db.symbols_len() {
            let descriptor = db.resolve_descriptor_at_id(id).unwrap();
            assert_eq!(db.symbol_id_for_descriptor(&descriptor).unwrap(), id);
        }

        let stranger = FakeDescriptor {
            full_name: "x.Y".into(),
            kind: SymbolKind::Message,
            file_name: "x.proto".into(),
        };
        assert!(matches!(
            db.symbol_id_for_descriptor(&stranger),
            Err(IndexError::UnknownDescriptor(name)) if name == "x.Y"
        ));
    }

    #[test]
    fn test_enums_resolve_with_their_kind() {
        let mut db = DescriptorDatabase::new(FakePool::default());
        db.parse_and_load("e.proto", "package e; enum Color { RED = 0; }")
            .unwrap();
        let id = db.lookup_symbol_id("e.Color").unwrap();
        assert_eq!(db.resolve_descriptor_at_id(id).unwrap().kind, SymbolKind::Enum);
        assert_eq!(
            db.list_namespace_entries(db.index().unwrap().package_id("e").unwrap())
                .unwrap(),
            vec![entry(id, "Color", true)]
        );
    }

    #[test]
    fn test_later_loads_keep_resolved_slots() {
        let mut db = DescriptorDatabase::new(FakePool::default());
        db.parse_and_load("a.proto", A_PROTO).unwrap();
        let m = db.resolve_descriptor_at_id(0).unwrap();

        db.parse_and_load("c.proto", C_PROTO).unwrap();
        assert_eq!(db.cached_descriptor_at_id(0), Some(&m));
        assert_eq!(db.lookup_symbol_id("a.b.M"), Some(0));
        assert_eq!(db.resolve_descriptor_at_id(1).unwrap().full_name, "a.b.c.N");
        assert_eq!(db.pool().calls(), 2);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Schema source
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_schema_source_serves_raw_definitions() {
        let db = loaded_db();
        let a = compile("a.proto", A_PROTO).unwrap();
        let c = compile("c.proto", C_PROTO).unwrap();

        assert_eq!(db.find_file_by_name("a.proto"), Some(a));
        assert_eq!(db.find_file_containing_symbol("a.b.c.N"), Some(c));
        assert_eq!(db.find_file_by_name("missing.proto"), None);
        assert_eq!(db.find_file_containing_symbol("a.b"), None);
        assert_eq!(db.find_all_file_names(), vec!["a.proto", "c.proto"]);

        assert_eq!(db.find_file_containing_extension("a.b.M", 100), None);
        assert_eq!(db.find_all_extension_numbers("a.b.M"), None);
    }

    // ═══════════════════════════════════════════════════════════════════════
    // Namespaces
    // ═══════════════════════════════════════════════════════════════════════

    #[test]
    fn test_namespace_listing() {
        let db = loaded_db();
        assert_eq!(db.list_root_namespace_entries(), vec![entry(1, "a", false)]);
        assert_eq!(
            db.list_namespace_entries(1).unwrap(),
            vec![entry(2, "b", false)]
        );
        assert_eq!(
            db.list_namespace_entries(2).unwrap(),
            vec![entry(0, "M", true), entry(3, "c", false)]
        );
        assert_eq!(
            db.list_namespace_entries(3).unwrap(),
            vec![entry(1, "N", true)]
        );
    }

    #[test]
    fn test_nested_types_list_under_their_message() {
        let mut db = DescriptorDatabase::new(FakePool::default());
        db.parse_and_load(
            "outer.proto",
            "message Outer { message Inner {} enum Mode { OFF = 0; } }",
        )
        .unwrap();

        assert_eq!(
            db.list_root_namespace_entries(),
            vec![entry(0, "Outer", true), entry(1, "Outer", false)]
        );
        let listed = db.list_namespace_entries(1).unwrap();
        let names: Vec<&str> = listed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["Inner", "Mode"]);
        assert!(listed.iter().all(|e| e.is_message));
    }

    #[test]
    fn test_package_tree_is_a_tree() {
        let mut db = loaded_db();
        db.parse_and_load("outer.proto", "package a; message Outer { message Inner {} }")
            .unwrap();

        let mut symbol_parents = vec![0usize; db.symbols_len()];
        let mut package_parents = vec![0usize; db.packages_len()];
        for id in 0..db.packages_len() {
            let package = db.package_at(id).unwrap();
            for &s in &package.symbol_indexes {
                symbol_parents[s] += 1;
                assert_eq!(
                    name::parent(db.symbol_name_at(s).unwrap()),
                    Some(package.full_name.as_str())
                );
            }
            for &p in &package.nested_package_indexes {
                package_parents[p] += 1;
                assert_eq!(
                    name::parent(&db.package_at(p).unwrap().full_name),
                    Some(package.full_name.as_str())
                );
            }
        }
        assert!(symbol_parents.iter().all(|&n| n == 1));
        assert_eq!(package_parents[ROOT_PACKAGE], 0);
        assert!(package_parents[1..].iter().all(|&n| n == 1));
    }

    #[test]
    fn test_debug_json() {
        let db = loaded_db();
        assert_eq!(
            db.to_debug_json(),
            json!({
                "name": "",
                "packages": [{
                    "name": "a",
                    "packages": [{
                        "name": "a.b",
                        "symbols": ["a.b.M"],
                        "packages": [{
                            "name": "a.b.c",
                            "symbols": ["a.b.c.N"]
                        }]
                    }]
                }]
            })
        );
    }

    #[test]
    fn test_debug_json_sorts_symbols() {
        let mut db = DescriptorDatabase::new(FakePool::default());
        db.parse_and_load("z.proto", "package p; message Zed {} message Alpha {}")
            .unwrap();
        let json = db.to_debug_json();
        assert_eq!(
            json["packages"][0]["symbols"],
            json!(["p.Alpha", "p.Zed"])
        );
    }
}
