//! Seams to the external reflective pool.
//!
//! The pool turns raw schema definitions into fully linked descriptors. It
//! is not part of this crate; the database consumes it through
//! [`ReflectivePool`] and feeds it raw bytes through [`SchemaSource`].

use crate::types::SymbolKind;

/// A fully linked descriptor produced by the pool.
pub trait DescriptorHandle: Clone {
    /// Fully-qualified name, without a leading dot.
    fn full_name(&self) -> &str;
}

/// Schema-source provider contract. The pool pulls raw definitions through
/// it while linking, one file at a time.
///
/// Every lookup returns an owned copy: the pool keeps what it's given.
pub trait SchemaSource {
    fn find_file_by_name(&self, file_name: &str) -> Option<Vec<u8>>;

    fn find_file_containing_symbol(&self, symbol_name: &str) -> Option<Vec<u8>>;

    /// Extensions are not indexed.
    fn find_file_containing_extension(&self, _containing_type: &str, _field_number: i32) -> Option<Vec<u8>> {
        None
    }

    /// Extensions are not indexed.
    fn find_all_extension_numbers(&self, _extendee_type: &str) -> Option<Vec<i32>> {
        None
    }

    fn find_all_file_names(&self) -> Vec<String>;
}

/// The external reflective pool.
pub trait ReflectivePool {
    type Handle: DescriptorHandle;

    /// Resolve one type, with its whole dependency closure, pulling the raw
    /// definitions it needs from `source`. `None` means the pool couldn't
    /// find or link it.
    fn find_type_by_name(&self, full_name: &str, kind: SymbolKind, source: &dyn SchemaSource) -> Option<Self::Handle>;
}
