use parse::ast::BasicType;

/// Minimal value-type lattice for the builder: 64-bit integers, bytes,
/// and pointers to another type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kind {
    Int64,
    Ptr,
    Byte,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Type {
    pub kind: Kind,
    pub elem: Option<Box<Type>>,
}

impl Type {
    pub fn int() -> Type {
        Type { kind: Kind::Int64, elem: None }
    }

    pub fn byte() -> Type {
        Type { kind: Kind::Byte, elem: None }
    }

    pub fn pointer_to(elem: Type) -> Type {
        Type { kind: Kind::Ptr, elem: Some(Box::new(elem)) }
    }

    pub fn from_basic(bt: BasicType, ptr: bool) -> Type {
        let base = match bt {
            BasicType::Int => Type::int(),
            BasicType::Char => Type::byte(),
        };
        if ptr {
            Type::pointer_to(base)
        } else {
            base
        }
    }

    /// Size in bytes on the x86_64 target.
    pub fn size(&self) -> usize {
        match self.kind {
            Kind::Int64 | Kind::Ptr => 8,
            Kind::Byte => 1,
        }
    }

    /// Pointee size if this is a pointer, else 0.
    pub fn elem_size(&self) -> usize {
        match (&self.kind, &self.elem) {
            (Kind::Ptr, Some(e)) => e.size(),
            _ => 0,
        }
    }

    pub fn is_pointer(&self) -> bool {
        self.kind == Kind::Ptr
    }
}

impl std::fmt::Display for Type {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            Kind::Ptr => write!(f, "pointer"),
            Kind::Int64 => write!(f, "int"),
            Kind::Byte => write!(f, "char"),
        }
    }
}
