//! Scopes and the symbol index.
//!
//! Module scopes live as long as the program: one per unit, holding its
//! top-level declarations and its imports. Local scopes form a stack that
//! is pushed on block entry and popped on exit; lookup walks it from the
//! innermost frame outwards and falls back to the module scope.

use rustc_hash::FxHashMap;

use crate::hir::{LocalId, UnitId};
use crate::span::{FileId, Span};
use crate::types::DefId;

/// Top-level names of one unit.
#[derive(Debug, Clone, Default)]
pub struct ModuleScope {
    items: FxHashMap<String, DefId>,
    /// Alias or unit name to the imported unit, in import order.
    imports: Vec<(String, UnitId)>,
}

/// Outcome of looking a name up in module scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ModuleLookup {
    Found(DefId),
    NotFound,
    /// Several imports provide the name and none is local.
    Ambiguous(Vec<UnitId>),
}

impl ModuleScope {
    /// Register a declaration. Returns the earlier one on a clash.
    pub fn define(&mut self, name: &str, def: DefId) -> Result<(), DefId> {
        match self.items.get(name) {
            Some(&existing) => Err(existing),
            None => {
                self.items.insert(name.to_string(), def);
                Ok(())
            }
        }
    }

    /// Bind `name` to `def`, replacing any earlier binding. Used for
    /// interactive sessions, where later definitions shadow earlier ones.
    pub fn rebind(&mut self, name: &str, def: DefId) -> Option<DefId> {
        self.items.insert(name.to_string(), def)
    }

    pub fn get(&self, name: &str) -> Option<DefId> {
        self.items.get(name).copied()
    }

    pub fn add_import(&mut self, alias: &str, unit: UnitId) {
        self.imports.push((alias.to_string(), unit));
    }

    pub fn import(&self, alias: &str) -> Option<UnitId> {
        self.imports
            .iter()
            .find(|(name, _)| name == alias)
            .map(|(_, unit)| *unit)
    }

    pub fn imports(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.imports.iter().map(|(_, unit)| *unit)
    }

    /// Names declared in this unit, sorted for deterministic iteration.
    pub fn names(&self) -> Vec<(&str, DefId)> {
        let mut names: Vec<_> = self.items.iter().map(|(name, def)| (name.as_str(), *def)).collect();
        names.sort();
        names
    }
}

/// Resolve an unqualified name in `unit`: its own declarations first,
/// then the declarations of every imported unit.
pub fn lookup_module(scopes: &[ModuleScope], unit: UnitId, name: &str) -> ModuleLookup {
    let Some(scope) = scopes.get(unit.0 as usize) else {
        return ModuleLookup::NotFound;
    };
    if let Some(def) = scope.get(name) {
        return ModuleLookup::Found(def);
    }
    let mut found: Vec<(UnitId, DefId)> = Vec::new();
    for imported in scope.imports() {
        if let Some(def) = scopes.get(imported.0 as usize).and_then(|s| s.get(name)) {
            if !found.iter().any(|(_, existing)| *existing == def) {
                found.push((imported, def));
            }
        }
    }
    match found.len() {
        0 => ModuleLookup::NotFound,
        1 => ModuleLookup::Found(found[0].1),
        _ => ModuleLookup::Ambiguous(found.into_iter().map(|(unit, _)| unit).collect()),
    }
}

/// Block scopes of one function body.
#[derive(Debug, Clone)]
pub struct LocalScopes {
    frames: Vec<FxHashMap<String, LocalId>>,
}

impl Default for LocalScopes {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalScopes {
    pub fn new() -> Self {
        LocalScopes {
            frames: vec![FxHashMap::default()],
        }
    }

    pub fn push(&mut self) {
        self.frames.push(FxHashMap::default());
    }

    pub fn pop(&mut self) {
        if self.frames.len() > 1 {
            self.frames.pop();
        }
    }

    /// Bind `name` in the innermost frame. Returns the clashing binding
    /// if the frame already has one.
    pub fn define(&mut self, name: &str, local: LocalId) -> Result<(), LocalId> {
        // the outermost frame is never popped
        let last = self.frames.len() - 1;
        let frame = &mut self.frames[last];
        if let Some(&existing) = frame.get(name) {
            return Err(existing);
        }
        frame.insert(name.to_string(), local);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<LocalId> {
        self.frames.iter().rev().find_map(|frame| frame.get(name).copied())
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Innermost-first visible bindings, for completion.
    pub fn visible(&self) -> Vec<(String, LocalId)> {
        let mut seen = FxHashMap::default();
        for frame in self.frames.iter().rev() {
            for (name, local) in frame {
                seen.entry(name.clone()).or_insert(*local);
            }
        }
        let mut visible: Vec<_> = seen.into_iter().collect();
        visible.sort();
        visible
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SymbolId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Function,
    Struct,
    Class,
    Enum,
    Variant,
    Trait,
    Const,
    Static,
    Field,
    Method,
    Param,
    Local,
    GenericParam,
    Unit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SymbolDef {
    pub name: String,
    pub kind: SymbolKind,
    pub span: Span,
    pub def: Option<DefId>,
    /// Display form of the symbol's type, for hover.
    pub detail: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolRef {
    pub span: Span,
    pub target: SymbolId,
}

/// Definitions and resolved references of a whole program, for editors.
#[derive(Debug, Clone, Default)]
pub struct SymbolIndex {
    definitions: Vec<SymbolDef>,
    references: Vec<SymbolRef>,
    by_def: FxHashMap<DefId, SymbolId>,
}

impl SymbolIndex {
    pub fn define(&mut self, symbol: SymbolDef) -> SymbolId {
        let id = SymbolId(self.definitions.len() as u32);
        if let Some(def) = symbol.def {
            self.by_def.entry(def).or_insert(id);
        }
        self.definitions.push(symbol);
        id
    }

    pub fn reference(&mut self, span: Span, target: SymbolId) {
        self.references.push(SymbolRef { span, target });
    }

    pub fn reference_def(&mut self, span: Span, def: DefId) {
        if let Some(&target) = self.by_def.get(&def) {
            self.reference(span, target);
        }
    }

    /// Replace the hover text of a symbol once its type is known.
    pub fn set_detail(&mut self, id: SymbolId, detail: String) {
        if let Some(symbol) = self.definitions.get_mut(id.0 as usize) {
            symbol.detail = detail;
        }
    }

    pub fn symbol_for(&self, def: DefId) -> Option<SymbolId> {
        self.by_def.get(&def).copied()
    }

    pub fn get(&self, id: SymbolId) -> &SymbolDef {
        &self.definitions[id.0 as usize]
    }

    pub fn definitions(&self) -> &[SymbolDef] {
        &self.definitions
    }

    pub fn references(&self) -> &[SymbolRef] {
        &self.references
    }

    /// The definition named at `offset`, whether the offset is on a use or
    /// on the definition itself.
    pub fn definition_at(&self, file: FileId, offset: u32) -> Option<&SymbolDef> {
        let hit = |span: &Span| span.file == file && span.contains(offset);
        if let Some(reference) = self.references.iter().find(|r| hit(&r.span)) {
            return Some(self.get(reference.target));
        }
        self.definitions.iter().find(|d| hit(&d.span))
    }

    /// All uses of a symbol.
    pub fn references_to(&self, target: SymbolId) -> impl Iterator<Item = &SymbolRef> {
        self.references.iter().filter(move |r| r.target == target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inner_bindings_shadow_outer_ones() {
        let mut scopes = LocalScopes::new();
        scopes.define("x", LocalId(0)).unwrap();
        scopes.push();
        assert_eq!(scopes.lookup("x"), Some(LocalId(0)));
        scopes.define("x", LocalId(1)).unwrap();
        assert_eq!(scopes.lookup("x"), Some(LocalId(1)));
        scopes.pop();
        assert_eq!(scopes.lookup("x"), Some(LocalId(0)));
    }

    #[test]
    fn redefinition_in_one_frame_is_rejected() {
        let mut scopes = LocalScopes::new();
        scopes.define("x", LocalId(0)).unwrap();
        assert_eq!(scopes.define("x", LocalId(1)), Err(LocalId(0)));
    }

    #[test]
    fn module_lookup_prefers_local_items_and_detects_ambiguity() {
        let mut scopes = vec![ModuleScope::default(), ModuleScope::default(), ModuleScope::default()];
        scopes[1].define("max", DefId(10)).unwrap();
        scopes[2].define("max", DefId(20)).unwrap();
        scopes[0].add_import("a", UnitId(1));
        scopes[0].add_import("b", UnitId(2));
        assert_eq!(
            lookup_module(&scopes, UnitId(0), "max"),
            ModuleLookup::Ambiguous(vec![UnitId(1), UnitId(2)])
        );
        scopes[0].define("max", DefId(1)).unwrap();
        assert_eq!(lookup_module(&scopes, UnitId(0), "max"), ModuleLookup::Found(DefId(1)));
        assert_eq!(lookup_module(&scopes, UnitId(0), "min"), ModuleLookup::NotFound);
        assert_eq!(scopes[0].import("b"), Some(UnitId(2)));
    }

    #[test]
    fn finds_definitions_from_references() {
        let file = FileId(0);
        let mut index = SymbolIndex::default();
        let symbol = index.define(SymbolDef {
            name: "area".into(),
            kind: SymbolKind::Function,
            span: Span::new(file, 9, 13),
            def: Some(DefId(4)),
            detail: "function(f64) -> f64".into(),
        });
        index.reference_def(Span::new(file, 40, 44), DefId(4));
        assert_eq!(index.definition_at(file, 42).map(|d| d.name.as_str()), Some("area"));
        assert_eq!(index.references_to(symbol).count(), 1);
        assert!(index.definition_at(file, 30).is_none());
    }
}
