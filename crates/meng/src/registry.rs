//! Identifier registry: assigns class ids, stores descriptors, resolves
//! paths, and walks the class-loader chain on a path miss.
//!
//! Lookups by id are constant-time and assumed valid — a bad id at run time
//! is an engine bug, not a program error. Path lookups may fault in
//! non-intrinsic runtime classes through the installed loaders; each loader
//! is consulted at most once per path and the outcome is cached.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::{
    class::{ClassExtent, EnumDef, MengClass, MethodInfo},
    error::{RegError, RegResult, is_valid_class_path, short_name_of},
    id::{ClassId, MethodId},
    runtime::{ClassLoader, RuntimeClass},
};

/// Well-known class ids cached at intrinsic-registration time.
///
/// Nearly every part of the engine needs these: the opcode set references
/// the primitive classes directly, and `Formattable.FormatTo` is the hottest
/// polymorphic call target, so its method id is cached here too.
#[derive(Debug, Clone, Copy)]
pub struct CoreIds {
    pub object: ClassId,
    pub void: ClassId,
    pub formattable: ClassId,
    pub exception: ClassId,
    pub boolean: ClassId,
    pub card1: ClassId,
    pub card2: ClassId,
    pub card4: ClassId,
    pub card8: ClassId,
    pub int1: ClassId,
    pub int2: ClassId,
    pub int4: ClassId,
    pub float4: ClassId,
    pub float8: ClassId,
    pub char: ClassId,
    pub string: ClassId,
    pub string_list: ClassId,
    pub enum_base: ClassId,
    /// The `MEng.Radices` enum used by numeric formatting.
    pub radices: ClassId,
    pub mem_buf: ClassId,
    pub kv_pair: ClassId,
    pub text_in_stream: ClassId,
    pub text_out_stream: ClassId,
    pub base_info: ClassId,
    /// Method id of `Formattable.FormatTo`.
    pub format_to: MethodId,
}

impl Default for CoreIds {
    fn default() -> Self {
        Self {
            object: ClassId::BAD,
            void: ClassId::BAD,
            formattable: ClassId::BAD,
            exception: ClassId::BAD,
            boolean: ClassId::BAD,
            card1: ClassId::BAD,
            card2: ClassId::BAD,
            card4: ClassId::BAD,
            card8: ClassId::BAD,
            int1: ClassId::BAD,
            int2: ClassId::BAD,
            int4: ClassId::BAD,
            float4: ClassId::BAD,
            float8: ClassId::BAD,
            char: ClassId::BAD,
            string: ClassId::BAD,
            string_list: ClassId::BAD,
            enum_base: ClassId::BAD,
            radices: ClassId::BAD,
            mem_buf: ClassId::BAD,
            kv_pair: ClassId::BAD,
            text_in_stream: ClassId::BAD,
            text_out_stream: ClassId::BAD,
            base_info: ClassId::BAD,
            format_to: MethodId::BAD,
        }
    }
}

/// The class registry.
pub struct ClassRegistry {
    classes: Vec<MengClass>,
    by_path: AHashMap<String, ClassId>,
    handlers: AHashMap<ClassId, Arc<dyn RuntimeClass>>,
    loaders: Vec<Arc<dyn ClassLoader>>,
    /// Paths no loader could produce; consulted-once cache.
    loader_misses: AHashSet<String>,
    /// Well-known ids, filled while intrinsics register.
    pub core: CoreIds,
}

impl ClassRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            classes: Vec::new(),
            by_path: AHashMap::new(),
            handlers: AHashMap::new(),
            loaders: Vec::new(),
            loader_misses: AHashSet::new(),
            core: CoreIds::default(),
        }
    }

    /// Number of registered classes.
    #[must_use]
    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    /// Appends a loader to the chain. Loaders are asked in installation
    /// order; the default runtime-class loader is always installed first by
    /// the engine.
    pub fn add_loader(&mut self, loader: Arc<dyn ClassLoader>) {
        self.loaders.push(loader);
        // A new loader may know paths that previously missed.
        self.loader_misses.clear();
    }

    /// Registers a descriptor, assigning the next free class id.
    ///
    /// Fails with `IdOverflow` when the 16-bit id space is exhausted,
    /// `DuplicatePath` when the path is taken, `UnknownParent` when the
    /// parent id does not refer to a registered class, and `BadClassPath`
    /// for malformed paths. The descriptor is left unsealed so methods and
    /// members can still be added; seal it when registration completes.
    pub fn register_class(&mut self, mut cls: MengClass) -> RegResult<ClassId> {
        if !is_valid_class_path(cls.path()) {
            return Err(RegError::BadClassPath(cls.path().to_owned()));
        }
        if self.by_path.contains_key(cls.path()) {
            return Err(RegError::DuplicatePath(cls.path().to_owned()));
        }
        // The all-ones id is the bad sentinel, so the usable space is one short.
        if self.classes.len() >= usize::from(u16::MAX) {
            return Err(RegError::IdOverflow);
        }
        if let Some(parent) = cls.parent() {
            let Some(parent_cls) = self.classes.get(parent.index()) else {
                return Err(RegError::UnknownParent(cls.path().to_owned()));
            };
            cls.seed_method_ids(parent_cls.next_method_id());
        }
        let id = ClassId::from_index(self.classes.len() as u16);
        cls.assign_id(id);
        self.by_path.insert(cls.path().to_owned(), id);
        self.classes.push(cls);
        Ok(id)
    }

    /// Seals a class descriptor against further additions.
    pub fn seal(&mut self, id: ClassId) {
        if let Some(cls) = self.classes.get_mut(id.index()) {
            cls.seal();
        }
    }

    /// Constant-time descriptor lookup. Panics on a bad id: run-time ids come
    /// from sealed descriptors and opcode streams, so a miss is an engine bug.
    #[inline]
    #[must_use]
    pub fn class(&self, id: ClassId) -> &MengClass {
        &self.classes[id.index()]
    }

    /// Mutable descriptor access for the registration phase.
    pub fn class_mut(&mut self, id: ClassId) -> &mut MengClass {
        &mut self.classes[id.index()]
    }

    /// Fallible lookup for host-facing paths.
    #[must_use]
    pub fn try_class(&self, id: ClassId) -> Option<&MengClass> {
        self.classes.get(id.index())
    }

    /// Path lookup against registered classes only; does not consult loaders.
    #[must_use]
    pub fn find_by_path(&self, path: &str) -> Option<ClassId> {
        self.by_path.get(path).copied()
    }

    /// Path lookup that walks the loader chain on a miss.
    ///
    /// The first loader that produces a runtime class wins; the class is
    /// installed and its id returned. A path no loader knows is cached so the
    /// chain is consulted only once per path.
    pub fn find_or_load(&mut self, path: &str) -> RegResult<ClassId> {
        if let Some(id) = self.by_path.get(path) {
            return Ok(*id);
        }
        if self.loader_misses.contains(path) {
            return Err(RegError::ClassNotFound(path.to_owned()));
        }
        let loaders = self.loaders.clone();
        for loader in loaders {
            if let Some(rc) = loader.load_class(path) {
                return self.install(rc);
            }
        }
        self.loader_misses.insert(path.to_owned());
        Err(RegError::ClassNotFound(path.to_owned()))
    }

    /// Installs a runtime class: lets it register its descriptor (and any
    /// nested enum classes), seals it, and records its invoke handler.
    pub fn install(&mut self, mut rc: Box<dyn RuntimeClass>) -> RegResult<ClassId> {
        let id = rc.register(self)?;
        self.seal(id);
        self.handlers.insert(id, Arc::from(rc));
        Ok(id)
    }

    /// The invoke handler for a natively implemented class, if any.
    #[must_use]
    pub fn handler(&self, id: ClassId) -> Option<Arc<dyn RuntimeClass>> {
        self.handlers.get(&id).cloned()
    }

    /// Registers an enum class under the given path with the standard enum
    /// base as parent. Used by runtime classes for their nested error and
    /// mode enums, and by program loaders for user enums.
    pub fn register_enum(&mut self, path: &str, def: EnumDef) -> RegResult<ClassId> {
        let mut cls = MengClass::new(
            short_name_of(path).to_owned(),
            path.to_owned(),
            Some(self.core.enum_base),
            ClassExtent::Final,
        );
        cls.enum_def = Some(def);
        let id = self.register_class(cls)?;
        self.seal(id);
        Ok(id)
    }

    /// Resolves a method id against a receiver class by walking the parent
    /// chain; returns the defining class and the descriptor. The walk stops
    /// at the first class that carries the id, which for overridden methods
    /// is the most derived override.
    #[must_use]
    pub fn resolve_method(&self, class_id: ClassId, method_id: MethodId) -> Option<(ClassId, &MethodInfo)> {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let cls = self.classes.get(id.index())?;
            if let Some(info) = cls.method_by_id(method_id) {
                return Some((id, info));
            }
            cursor = cls.parent();
        }
        None
    }

    /// Finds a method by name, walking the parent chain.
    #[must_use]
    pub fn find_method(&self, class_id: ClassId, name: &str) -> Option<(ClassId, &MethodInfo)> {
        let mut cursor = Some(class_id);
        while let Some(id) = cursor {
            let cls = self.classes.get(id.index())?;
            if let Some(info) = cls.method_by_name(name) {
                return Some((id, info));
            }
            cursor = cls.parent();
        }
        None
    }

    /// True when `child` is `ancestor` or derives from it.
    #[must_use]
    pub fn is_derived_from(&self, child: ClassId, ancestor: ClassId) -> bool {
        let mut cursor = Some(child);
        while let Some(id) = cursor {
            if id == ancestor {
                return true;
            }
            cursor = self.classes.get(id.index()).and_then(MengClass::parent);
        }
        false
    }
}

impl Default for ClassRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{MethodExtent, Visibility};

    fn reg_with_root() -> (ClassRegistry, ClassId) {
        let mut reg = ClassRegistry::new();
        let root = reg
            .register_class(MengClass::new("Object", "MEng.Object", None, ClassExtent::NonFinal))
            .unwrap();
        (reg, root)
    }

    #[test]
    fn ids_are_sequential_and_stable() {
        let (mut reg, root) = reg_with_root();
        let a = reg
            .register_class(MengClass::new("A", "MEng.A", Some(root), ClassExtent::NonFinal))
            .unwrap();
        let b = reg
            .register_class(MengClass::new("B", "MEng.B", Some(root), ClassExtent::NonFinal))
            .unwrap();
        assert_eq!(a, ClassId::from_index(1));
        assert_eq!(b, ClassId::from_index(2));
        assert_eq!(reg.find_by_path("MEng.B"), Some(b));
        assert_eq!(reg.class(b).name(), "B");
    }

    #[test]
    fn duplicate_and_bad_paths_fail() {
        let (mut reg, root) = reg_with_root();
        reg.register_class(MengClass::new("A", "MEng.A", Some(root), ClassExtent::NonFinal))
            .unwrap();
        let dup = reg.register_class(MengClass::new("A", "MEng.A", Some(root), ClassExtent::NonFinal));
        assert!(matches!(dup, Err(RegError::DuplicatePath(_))));
        let bad = reg.register_class(MengClass::new("X", "NotMEng.X", Some(root), ClassExtent::NonFinal));
        assert!(matches!(bad, Err(RegError::BadClassPath(_))));
    }

    #[test]
    fn unknown_parent_fails() {
        let (mut reg, _) = reg_with_root();
        let orphan = reg.register_class(MengClass::new(
            "X",
            "MEng.X",
            Some(ClassId::from_index(40)),
            ClassExtent::NonFinal,
        ));
        assert!(matches!(orphan, Err(RegError::UnknownParent(_))));
    }

    #[test]
    fn method_resolution_walks_parent_chain() {
        let (mut reg, root) = reg_with_root();
        let base_method = reg
            .class_mut(root)
            .add_method(MethodInfo::new(
                "Virtual",
                ClassId::from_index(0),
                MethodExtent::NonFinal,
                Visibility::Public,
            ))
            .unwrap();
        let child = reg
            .register_class(MengClass::new("Child", "MEng.Child", Some(root), ClassExtent::NonFinal))
            .unwrap();
        // Child sees the inherited method through the chain walk
        let (def_class, info) = reg.resolve_method(child, base_method).unwrap();
        assert_eq!(def_class, root);
        assert_eq!(info.name(), "Virtual");

        // An override is found on the child first
        reg.class_mut(child)
            .add_override(
                base_method,
                MethodInfo::new("Virtual", ClassId::from_index(0), MethodExtent::Override, Visibility::Public),
            )
            .unwrap();
        let (def_class, _) = reg.resolve_method(child, base_method).unwrap();
        assert_eq!(def_class, child);
        assert!(reg.is_derived_from(child, root));
        assert!(!reg.is_derived_from(root, child));
    }
}
