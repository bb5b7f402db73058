//! The class metamodel: descriptors for classes, methods, parameters,
//! literals, and member variables.
//!
//! A class descriptor is built up during registration — methods, literals,
//! members, nested types — and then sealed. After sealing it is immutable for
//! the lifetime of the engine. Live instances are value objects
//! ([`crate::value::Value`]) that carry the class id of their descriptor.

use std::sync::Arc;

use ahash::AHashMap;
use indexmap::IndexMap;
use smallvec::SmallVec;
use strum::Display;

use crate::{
    error::{RegError, RegResult},
    id::{ClassId, EnumOrdinal, MemberId, MethodId},
    opcode::OpMethod,
    value::Payload,
};

/// Finality of a class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ClassExtent {
    /// Cannot be derived from.
    Final,
    /// May be derived from.
    NonFinal,
    /// Must be derived from; cannot be instantiated directly.
    Abstract,
}

/// Extensibility of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum MethodExtent {
    /// Direct dispatch; cannot be overridden.
    Final,
    /// Virtual; may be overridden.
    NonFinal,
    /// Abstract; a derived class must provide the body.
    Required,
    /// Overrides an inherited non-final or required method.
    Override,
}

/// Visibility of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Visibility {
    Public,
    Protected,
    Private,
}

/// Parameter passing mode.
///
/// In-parameters are evaluated by the caller and pushed as owned copies.
/// Out-parameters are pushed as repush items pointing at the caller's lvalue.
/// InOut is out with a caller-provided initial value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ParmDir {
    In,
    Out,
    InOut,
}

/// One parameter of a method signature.
#[derive(Debug, Clone)]
pub struct ParmInfo {
    pub name: String,
    pub class_id: ClassId,
    pub dir: ParmDir,
}

/// The body of a method: an opcode stream for program-level methods, or a
/// native marker dispatched through the owning runtime class.
#[derive(Debug, Clone)]
pub enum MethodBody {
    /// Dispatched to the runtime-class handler of the defining class.
    Native,
    /// Interpreted opcode stream produced by the external compiler.
    Opcodes(Arc<OpMethod>),
}

/// A method descriptor.
#[derive(Debug, Clone)]
pub struct MethodInfo {
    id: MethodId,
    name: String,
    pub visibility: Visibility,
    pub extent: MethodExtent,
    /// Const methods may not mutate the receiver.
    pub is_const: bool,
    pub ret_class: ClassId,
    parms: SmallVec<[ParmInfo; 4]>,
    pub body: MethodBody,
}

impl MethodInfo {
    /// Starts a new native method descriptor. The id is assigned when the
    /// method is added to a class.
    pub fn new(name: impl Into<String>, ret_class: ClassId, extent: MethodExtent, visibility: Visibility) -> Self {
        Self {
            id: MethodId::BAD,
            name: name.into(),
            visibility,
            extent,
            is_const: false,
            ret_class,
            parms: SmallVec::new(),
            body: MethodBody::Native,
        }
    }

    /// Marks the method const (receiver is read-only).
    #[must_use]
    pub fn const_method(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Attaches an opcode body, replacing the native marker.
    #[must_use]
    pub fn with_opcodes(mut self, body: OpMethod) -> Self {
        self.body = MethodBody::Opcodes(Arc::new(body));
        self
    }

    /// Adds an in-parameter.
    pub fn add_in_parm(&mut self, name: impl Into<String>, class_id: ClassId) -> &mut Self {
        self.parms.push(ParmInfo {
            name: name.into(),
            class_id,
            dir: ParmDir::In,
        });
        self
    }

    /// Adds an out-parameter.
    pub fn add_out_parm(&mut self, name: impl Into<String>, class_id: ClassId) -> &mut Self {
        self.parms.push(ParmInfo {
            name: name.into(),
            class_id,
            dir: ParmDir::Out,
        });
        self
    }

    /// Adds an in/out-parameter.
    pub fn add_inout_parm(&mut self, name: impl Into<String>, class_id: ClassId) -> &mut Self {
        self.parms.push(ParmInfo {
            name: name.into(),
            class_id,
            dir: ParmDir::InOut,
        });
        self
    }

    /// The method's id within its class. Bad until the method is added.
    #[inline]
    #[must_use]
    pub fn id(&self) -> MethodId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn parms(&self) -> &[ParmInfo] {
        &self.parms
    }

    /// Number of declared parameters.
    #[inline]
    #[must_use]
    pub fn parm_count(&self) -> usize {
        self.parms.len()
    }
}

/// A named constant owned by a class descriptor.
#[derive(Debug)]
pub struct LiteralInfo {
    pub name: String,
    pub class_id: ClassId,
    pub payload: Payload,
}

impl LiteralInfo {
    /// Renders the literal in source form — quoted strings, suffixed
    /// numerics — the way IDE tooling presents class constants.
    #[must_use]
    pub fn format_source(&self) -> String {
        match &self.payload {
            Payload::Bool(v) => if *v { "True" } else { "False" }.to_owned(),
            Payload::Card1(v) => format!("{v}#C1"),
            Payload::Card2(v) => format!("{v}#C2"),
            Payload::Card4(v) => format!("{v}#C4"),
            Payload::Card8(v) => format!("{v}#C8"),
            Payload::Int1(v) => format!("{v}#I1"),
            Payload::Int2(v) => format!("{v}#I2"),
            Payload::Int4(v) => format!("{v}#I4"),
            Payload::Float4(v) => format!("{v}#F4"),
            Payload::Float8(v) => format!("{v}#F8"),
            Payload::Char(v) => format!("'{}'", v.escape_default()),
            Payload::Str(s) => format!("\"{}\"", s.as_str().escape_default()),
            other => other.kind_name().to_owned(),
        }
    }
}

/// A member variable descriptor.
#[derive(Debug, Clone)]
pub struct MemberInfo {
    pub name: String,
    pub class_id: ClassId,
    pub is_const: bool,
}

/// One item of an enum class: a name, display text, and an optional host-side
/// integer code it maps to.
#[derive(Debug, Clone)]
pub struct EnumItem {
    pub name: String,
    pub text: String,
    pub map_val: Option<i32>,
}

/// The item set of an enum class.
#[derive(Debug, Clone, Default)]
pub struct EnumDef {
    items: Vec<EnumItem>,
}

impl EnumDef {
    /// Builds an enum definition from (name, text) pairs with no map values.
    #[must_use]
    pub fn from_pairs(pairs: &[(&str, &str)]) -> Self {
        Self {
            items: pairs
                .iter()
                .map(|(name, text)| EnumItem {
                    name: (*name).to_owned(),
                    text: (*text).to_owned(),
                    map_val: None,
                })
                .collect(),
        }
    }

    /// Adds one item, returning its ordinal.
    pub fn add_item(&mut self, name: impl Into<String>, text: impl Into<String>, map_val: Option<i32>) -> EnumOrdinal {
        let ord = self.items.len() as EnumOrdinal;
        self.items.push(EnumItem {
            name: name.into(),
            text: text.into(),
            map_val,
        });
        ord
    }

    #[must_use]
    pub fn item(&self, ordinal: EnumOrdinal) -> Option<&EnumItem> {
        self.items.get(ordinal as usize)
    }

    #[must_use]
    pub fn item_count(&self) -> u32 {
        self.items.len() as u32
    }

    /// Finds an item ordinal by name (case-sensitive).
    #[must_use]
    pub fn find_by_name(&self, name: &str) -> Option<EnumOrdinal> {
        self.items
            .iter()
            .position(|item| item.name == name)
            .map(|idx| idx as EnumOrdinal)
    }

    /// Finds the first item whose map value equals the given host code.
    #[must_use]
    pub fn find_by_map(&self, map_val: i32) -> Option<EnumOrdinal> {
        self.items
            .iter()
            .position(|item| item.map_val == Some(map_val))
            .map(|idx| idx as EnumOrdinal)
    }
}

/// A class descriptor.
///
/// Registered once, then sealed and immutable. The parent id always refers to
/// a previously registered class, so the parent chain is a tree rooted at
/// `MEng.Object` with no cycles possible by construction.
#[derive(Debug)]
pub struct MengClass {
    id: ClassId,
    name: String,
    path: String,
    parent: Option<ClassId>,
    pub extent: ClassExtent,
    /// True for classes registered automatically at engine construction.
    pub intrinsic: bool,
    sealed: bool,
    /// Next free method id; seeded from the parent's so subclass methods
    /// continue the parent's id sequence.
    next_method: MethodId,
    methods: Vec<MethodInfo>,
    methods_by_name: AHashMap<String, usize>,
    methods_by_id: AHashMap<MethodId, usize>,
    literals: IndexMap<String, LiteralInfo>,
    members: Vec<MemberInfo>,
    nested: Vec<ClassId>,
    imports: Vec<ClassId>,
    /// Present when this class is an enum class.
    pub enum_def: Option<EnumDef>,
    /// Present when this class is a vector instantiation; the element type.
    pub elem_class: Option<ClassId>,
}

impl MengClass {
    /// Creates an unsealed descriptor. Registration assigns the id; the
    /// next-method seed comes from the parent at registration time.
    pub fn new(
        name: impl Into<String>,
        path: impl Into<String>,
        parent: Option<ClassId>,
        extent: ClassExtent,
    ) -> Self {
        Self {
            id: ClassId::BAD,
            name: name.into(),
            path: path.into(),
            parent,
            extent,
            intrinsic: false,
            sealed: false,
            next_method: MethodId::from_index(0),
            methods: Vec::new(),
            methods_by_name: AHashMap::new(),
            methods_by_id: AHashMap::new(),
            literals: IndexMap::new(),
            members: Vec::new(),
            nested: Vec::new(),
            imports: Vec::new(),
            enum_def: None,
            elem_class: None,
        }
    }

    pub(crate) fn assign_id(&mut self, id: ClassId) {
        self.id = id;
    }

    pub(crate) fn seed_method_ids(&mut self, next: MethodId) {
        self.next_method = next;
    }

    /// Marks the descriptor immutable. Called at end of registration.
    pub(crate) fn seal(&mut self) {
        self.sealed = true;
    }

    fn check_unsealed(&self) -> RegResult<()> {
        if self.sealed {
            return Err(RegError::ClassSealed(self.path.clone()));
        }
        Ok(())
    }

    /// Adds a new method, assigning the next free id within this class.
    pub fn add_method(&mut self, mut info: MethodInfo) -> RegResult<MethodId> {
        self.check_unsealed()?;
        if self.methods_by_name.contains_key(info.name()) {
            return Err(RegError::DuplicateMethod {
                class: self.path.clone(),
                method: info.name().to_owned(),
            });
        }
        let id = self.next_method;
        self.next_method = self.next_method.next();
        info.id = id;
        let slot = self.methods.len();
        self.methods_by_name.insert(info.name().to_owned(), slot);
        self.methods_by_id.insert(id, slot);
        self.methods.push(info);
        Ok(id)
    }

    /// Adds an override of an inherited method: the entry keeps the parent's
    /// id so virtual dispatch stays a direct id match.
    pub fn add_override(&mut self, parent_id: MethodId, mut info: MethodInfo) -> RegResult<MethodId> {
        self.check_unsealed()?;
        info.id = parent_id;
        info.extent = MethodExtent::Override;
        let slot = self.methods.len();
        self.methods_by_name.insert(info.name().to_owned(), slot);
        self.methods_by_id.insert(parent_id, slot);
        self.methods.push(info);
        Ok(parent_id)
    }

    /// Adds a literal constant.
    pub fn add_literal(&mut self, name: impl Into<String>, class_id: ClassId, payload: Payload) -> RegResult<()> {
        self.check_unsealed()?;
        let name = name.into();
        self.literals.insert(
            name.clone(),
            LiteralInfo {
                name,
                class_id,
                payload,
            },
        );
        Ok(())
    }

    /// Adds a member variable descriptor, returning its id.
    pub fn add_member(&mut self, name: impl Into<String>, class_id: ClassId, is_const: bool) -> RegResult<MemberId> {
        self.check_unsealed()?;
        let id = MemberId::from_index(self.members.len() as u16);
        self.members.push(MemberInfo {
            name: name.into(),
            class_id,
            is_const,
        });
        Ok(id)
    }

    /// Records a nested type so later path resolution can short-circuit.
    pub fn add_nested_type(&mut self, class_id: ClassId) {
        self.nested.push(class_id);
    }

    /// Records an imported class dependency.
    pub fn add_import(&mut self, class_id: ClassId) {
        self.imports.push(class_id);
    }

    #[inline]
    #[must_use]
    pub fn id(&self) -> ClassId {
        self.id
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[inline]
    #[must_use]
    pub fn parent(&self) -> Option<ClassId> {
        self.parent
    }

    #[must_use]
    pub fn is_sealed(&self) -> bool {
        self.sealed
    }

    /// The id the next added method would get.
    #[must_use]
    pub fn next_method_id(&self) -> MethodId {
        self.next_method
    }

    /// Looks up a method defined (or overridden) directly on this class.
    #[must_use]
    pub fn method_by_id(&self, id: MethodId) -> Option<&MethodInfo> {
        self.methods_by_id.get(&id).map(|&slot| &self.methods[slot])
    }

    /// Looks up a method by name on this class only.
    #[must_use]
    pub fn method_by_name(&self, name: &str) -> Option<&MethodInfo> {
        self.methods_by_name.get(name).map(|&slot| &self.methods[slot])
    }

    #[must_use]
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    #[must_use]
    pub fn literal(&self, name: &str) -> Option<&LiteralInfo> {
        self.literals.get(name)
    }

    /// Literals in registration order.
    pub fn literals(&self) -> impl Iterator<Item = &LiteralInfo> {
        self.literals.values()
    }

    #[must_use]
    pub fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    #[must_use]
    pub fn member(&self, id: MemberId) -> Option<&MemberInfo> {
        self.members.get(id.index())
    }

    /// Finds a member id by name.
    #[must_use]
    pub fn member_by_name(&self, name: &str) -> Option<MemberId> {
        self.members
            .iter()
            .position(|m| m.name == name)
            .map(|idx| MemberId::from_index(idx as u16))
    }

    #[must_use]
    pub fn nested_types(&self) -> &[ClassId] {
        &self.nested
    }

    #[must_use]
    pub fn imports(&self) -> &[ClassId] {
        &self.imports
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_class() -> MengClass {
        let mut cls = MengClass::new("Test", "MEng.User.Test", Some(ClassId::from_index(0)), ClassExtent::NonFinal);
        cls.assign_id(ClassId::from_index(5));
        cls
    }

    #[test]
    fn method_ids_are_sequential() {
        let mut cls = test_class();
        let a = cls
            .add_method(MethodInfo::new(
                "First",
                ClassId::from_index(1),
                MethodExtent::Final,
                Visibility::Public,
            ))
            .unwrap();
        let b = cls
            .add_method(MethodInfo::new(
                "Second",
                ClassId::from_index(1),
                MethodExtent::Final,
                Visibility::Public,
            ))
            .unwrap();
        assert_eq!(a, MethodId::from_index(0));
        assert_eq!(b, MethodId::from_index(1));
        assert_eq!(cls.method_by_id(b).unwrap().name(), "Second");
    }

    #[test]
    fn override_keeps_parent_id() {
        let mut cls = test_class();
        cls.seed_method_ids(MethodId::from_index(4));
        let inherited = MethodId::from_index(2);
        let id = cls
            .add_override(
                inherited,
                MethodInfo::new("Virtual", ClassId::from_index(1), MethodExtent::Override, Visibility::Public),
            )
            .unwrap();
        assert_eq!(id, inherited);
        // A new method still continues the seeded sequence
        let fresh = cls
            .add_method(MethodInfo::new(
                "Fresh",
                ClassId::from_index(1),
                MethodExtent::Final,
                Visibility::Public,
            ))
            .unwrap();
        assert_eq!(fresh, MethodId::from_index(4));
    }

    #[test]
    fn sealed_class_rejects_additions() {
        let mut cls = test_class();
        cls.seal();
        let err = cls
            .add_method(MethodInfo::new(
                "Late",
                ClassId::from_index(1),
                MethodExtent::Final,
                Visibility::Public,
            ))
            .unwrap_err();
        assert!(matches!(err, RegError::ClassSealed(_)));
    }

    #[test]
    fn duplicate_method_name_is_rejected() {
        let mut cls = test_class();
        cls.add_method(MethodInfo::new(
            "Twice",
            ClassId::from_index(1),
            MethodExtent::Final,
            Visibility::Public,
        ))
        .unwrap();
        let err = cls
            .add_method(MethodInfo::new(
                "Twice",
                ClassId::from_index(1),
                MethodExtent::Final,
                Visibility::Public,
            ))
            .unwrap_err();
        assert!(matches!(err, RegError::DuplicateMethod { .. }));
    }

    #[test]
    fn literals_render_in_source_form() {
        let lit = LiteralInfo {
            name: "kMaxValue".into(),
            class_id: ClassId::from_index(2),
            payload: Payload::Card1(255),
        };
        assert_eq!(lit.format_source(), "255#C1");
        let lit = LiteralInfo {
            name: "kGreeting".into(),
            class_id: ClassId::from_index(3),
            payload: Payload::Str("say \"hi\"".into()),
        };
        assert_eq!(lit.format_source(), "\"say \\\"hi\\\"\"");
    }

    #[test]
    fn enum_def_lookup() {
        let mut def = EnumDef::default();
        let a = def.add_item("OpenFailed", "could not open the file", Some(3));
        let b = def.add_item("DelFailed", "could not delete the file", Some(7));
        assert_eq!(def.find_by_name("DelFailed"), Some(b));
        assert_eq!(def.find_by_map(3), Some(a));
        assert_eq!(def.find_by_map(99), None);
        assert_eq!(def.item(a).unwrap().text, "could not open the file");
    }
}
