use crate::types::FastMap;
use smol_str::SmolStr;

// ─── Dotted Names ───────────────────────────────────────────────────────────

/// Join a parent scope and a local name. The root scope is the empty string.
#[inline]
pub fn join(parent: &str, local: &str) -> SmolStr {
    if parent.is_empty() {
        SmolStr::from(local)
    } else {
        let mut out = String::with_capacity(parent.len() + 1 + local.len());
        out.push_str(parent);
        out.push('.');
        out.push_str(local);
        SmolStr::from(out)
    }
}

/// `"a.b.C"` → `"C"`. A name without dots is returned as is.
#[inline]
pub fn last_component(full_name: &str) -> &str {
    match full_name.rfind('.') {
        Some(pos) => &full_name[pos + 1..],
        None => full_name,
    }
}

/// `"a.b.C"` → `Some("a.b")`, `"a"` → `Some("")`, `""` → `None`.
#[inline]
pub fn parent(full_name: &str) -> Option<&str> {
    if full_name.is_empty() {
        return None;
    }
    Some(match full_name.rfind('.') {
        Some(pos) => &full_name[..pos],
        None => "",
    })
}

// ─── NameTable ──────────────────────────────────────────────────────────────

/// Interns fully-qualified names and hands out dense ids in insertion order.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    ids: FastMap<SmolStr, usize>,
    names: Vec<SmolStr>,
}

impl NameTable {
    /// Returns the id for `name`, inserting it if missing. The bool is true
    /// when the name was newly inserted.
    pub fn intern(&mut self, name: &str) -> (usize, bool) {
        if let Some(&id) = self.ids.get(name) {
            return (id, false);
        }
        let id = self.names.len();
        let name = SmolStr::from(name);
        self.ids.insert(name.clone(), id);
        self.names.push(name);
        (id, true)
    }

    #[inline]
    pub fn get(&self, name: &str) -> Option<usize> {
        self.ids.get(name).copied()
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.ids.contains_key(name)
    }

    #[inline]
    pub fn name(&self, id: usize) -> Option<&SmolStr> {
        self.names.get(id)
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }
}
