//! Type model for the C subset.
//!
//! Sizes are fixed: char=1, short=2, int=4, i64=8, pointers=8. Void is
//! given size 1 / alignment 1 so that `sizeof(void)` and void pointer
//! arithmetic never divide by zero. Struct layout pads to the maximum
//! member alignment; union members all live at offset zero.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Int,
    Short,
    Char,
    Int64,
    Void,
    Pointer,
    Array,
    Function,
    Struct,
    Union,
}

/// A named member of a struct or union, with its byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Member {
    pub name: String,
    pub ty: Type,
    pub offset: i64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    /// Size in bytes.
    pub size: i64,
    /// Alignment in bytes.
    pub align: i64,
    /// Pointee for pointers, element type for arrays.
    pub base: Option<Box<Type>>,
    /// Element count for arrays.
    pub array_len: Option<i64>,
    /// Return type for functions.
    pub return_ty: Option<Box<Type>>,
    /// Parameter types for functions, in declaration order. Each carries
    /// its declarator name.
    pub params: Vec<Type>,
    /// Members for structs and unions, in source order.
    pub members: Vec<Member>,
    /// The identifier this declarator names, once known.
    pub name: Option<String>,
}

impl Type {
    fn scalar(kind: TypeKind, size: i64, align: i64) -> Self {
        Type {
            kind,
            size,
            align,
            base: None,
            array_len: None,
            return_ty: None,
            params: Vec::new(),
            members: Vec::new(),
            name: None,
        }
    }

    pub fn int() -> Self {
        Type::scalar(TypeKind::Int, 4, 4)
    }

    pub fn short() -> Self {
        Type::scalar(TypeKind::Short, 2, 2)
    }

    pub fn char_type() -> Self {
        Type::scalar(TypeKind::Char, 1, 1)
    }

    pub fn int64() -> Self {
        Type::scalar(TypeKind::Int64, 8, 8)
    }

    pub fn void() -> Self {
        Type::scalar(TypeKind::Void, 1, 1)
    }

    pub fn pointer_to(base: Type) -> Self {
        let mut ty = Type::scalar(TypeKind::Pointer, 8, 8);
        ty.base = Some(Box::new(base));
        ty
    }

    pub fn array_of(element: Type, len: i64) -> Self {
        let mut ty = Type::scalar(TypeKind::Array, element.size * len, element.align);
        ty.base = Some(Box::new(element));
        ty.array_len = Some(len);
        ty
    }

    pub fn function(return_ty: Type, params: Vec<Type>) -> Self {
        let mut ty = Type::scalar(TypeKind::Function, 8, 8);
        ty.return_ty = Some(Box::new(return_ty));
        ty.params = params;
        ty
    }

    /// Lay out a struct: members at increasing offsets, each aligned to
    /// its own alignment; total size padded to the maximum member
    /// alignment.
    pub fn struct_of(mut members: Vec<Member>) -> Self {
        let mut offset = 0i64;
        let mut align = 1i64;
        for member in &mut members {
            offset = align_to(offset, member.ty.align);
            member.offset = offset;
            offset += member.ty.size;
            align = align.max(member.ty.align);
        }
        let mut ty = Type::scalar(TypeKind::Struct, align_to(offset, align), align);
        ty.members = members;
        ty
    }

    /// Lay out a union: every member at offset zero, size is the maximum
    /// member size.
    pub fn union_of(mut members: Vec<Member>) -> Self {
        let mut size = 0i64;
        let mut align = 1i64;
        for member in &mut members {
            member.offset = 0;
            size = size.max(member.ty.size);
            align = align.max(member.ty.align);
        }
        let mut ty = Type::scalar(TypeKind::Union, size, align);
        ty.members = members;
        ty
    }

    /// True for the arithmetic kinds.
    pub fn is_integer(&self) -> bool {
        matches!(
            self.kind,
            TypeKind::Int | TypeKind::Short | TypeKind::Char | TypeKind::Int64
        )
    }

    /// True for pointers and arrays (which decay in pointer arithmetic).
    pub fn is_pointer_like(&self) -> bool {
        matches!(self.kind, TypeKind::Pointer | TypeKind::Array)
    }

    /// Look up a member by name.
    pub fn find_member(&self, name: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.name == name)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TypeKind::Int => write!(f, "int"),
            TypeKind::Short => write!(f, "short"),
            TypeKind::Char => write!(f, "char"),
            TypeKind::Int64 => write!(f, "i64"),
            TypeKind::Void => write!(f, "void"),
            TypeKind::Pointer => {
                write!(f, "{}*", self.base.as_deref().unwrap_or(&Type::void()))
            }
            TypeKind::Array => write!(
                f,
                "{}[{}]",
                self.base.as_deref().unwrap_or(&Type::void()),
                self.array_len.unwrap_or(0)
            ),
            TypeKind::Function => {
                write!(f, "{}()", self.return_ty.as_deref().unwrap_or(&Type::void()))
            }
            TypeKind::Struct => write!(f, "struct"),
            TypeKind::Union => write!(f, "union"),
        }
    }
}

/// Round `n` up to the nearest multiple of `align`.
pub fn align_to(n: i64, align: i64) -> i64 {
    (n + align - 1) / align * align
}
