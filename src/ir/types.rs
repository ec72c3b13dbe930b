use std::fmt;
use std::fmt::Write as _;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TypeId(pub u32);

impl TypeId {
    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TypeKind {
    Void,
    /// Signless integer, 1..=64 bits. Signedness lives on the operations.
    Int { bits: u32 },
    /// IEEE float, 32 or 64 bits.
    Float { bits: u32 },
    /// Opaque pointer. Pointee types travel on `alloca`/`load`/`store`/`gep`.
    Ptr,
    Array { elem: TypeId, len: u64 },
    Struct { fields: Vec<TypeId> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TypeInfo {
    pub kind: TypeKind,
    pub name: Option<String>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct TypeTable {
    types: Vec<TypeInfo>,
}

impl TypeTable {
    pub fn new() -> Self {
        Self { types: Vec::new() }
    }

    /// Adds an anonymous type definition to the table.
    pub fn add(&mut self, kind: TypeKind) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeInfo { kind, name: None });
        id
    }

    /// Adds a named type definition to the table.
    pub fn add_named(&mut self, kind: TypeKind, name: String) -> TypeId {
        let id = TypeId(self.types.len() as u32);
        self.types.push(TypeInfo {
            kind,
            name: Some(name),
        });
        id
    }

    pub fn get(&self, id: TypeId) -> &TypeInfo {
        &self.types[id.index()]
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.get(id).kind
    }

    /// Structural equality; the table does not intern, so distinct ids may
    /// name the same shape.
    pub fn same(&self, a: TypeId, b: TypeId) -> bool {
        if a == b {
            return true;
        }
        match (self.kind(a), self.kind(b)) {
            (TypeKind::Void, TypeKind::Void) => true,
            (TypeKind::Int { bits: x }, TypeKind::Int { bits: y }) => x == y,
            (TypeKind::Float { bits: x }, TypeKind::Float { bits: y }) => x == y,
            (TypeKind::Ptr, TypeKind::Ptr) => true,
            (TypeKind::Array { elem: ea, len: la }, TypeKind::Array { elem: eb, len: lb }) => {
                la == lb && self.same(*ea, *eb)
            }
            (TypeKind::Struct { fields: fa }, TypeKind::Struct { fields: fb }) => {
                fa.len() == fb.len() && fa.iter().zip(fb.iter()).all(|(x, y)| self.same(*x, *y))
            }
            _ => false,
        }
    }

    pub fn type_to_string(&self, id: TypeId) -> String {
        let mut out = String::new();
        let _ = self.write_ty(id, &mut out);
        out
    }

    fn write_ty(&self, id: TypeId, out: &mut String) -> fmt::Result {
        match self.kind(id) {
            TypeKind::Void => write!(out, "void"),
            TypeKind::Int { bits } => write!(out, "i{}", bits),
            TypeKind::Float { bits: 32 } => write!(out, "float"),
            TypeKind::Float { .. } => write!(out, "double"),
            TypeKind::Ptr => write!(out, "ptr"),
            TypeKind::Array { elem, len } => {
                write!(out, "[{} x ", len)?;
                self.write_ty(*elem, out)?;
                write!(out, "]")
            }
            TypeKind::Struct { fields } => {
                write!(out, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    self.write_ty(*field, out)?;
                }
                write!(out, " }}")
            }
        }
    }
}
