//! IR types and layout queries.
//!
//! Two layers:
//!
//! - [`ValType`]: scalar types that fit in a single machine register.
//! - [`Type`]: the full IR type language, adding `void` and aggregates.
//!
//! Aggregates are laid out C-style (natural alignment, tail padding) and can
//! be flattened into an ordered list of scalar leaves; multi-register values
//! in the backend occupy one register per leaf, in leaf order.

use std::fmt;

/// A machine-representable scalar type.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum ValType {
    /// Boolean, one bit of information stored in a byte.
    I1,
    /// 8-bit integer.
    I8,
    /// 16-bit integer.
    I16,
    /// 32-bit integer.
    I32,
    /// 64-bit integer.
    I64,
    /// 32-bit IEEE float.
    F32,
    /// 64-bit IEEE float.
    F64,
    /// Pointer, width decided by the target.
    Ptr,
}

impl ValType {
    /// Check if this is an integer type (pointers count as integers for
    /// width comparisons but not here).
    #[inline]
    #[must_use]
    pub const fn is_int(self) -> bool {
        matches!(self, Self::I1 | Self::I8 | Self::I16 | Self::I32 | Self::I64)
    }

    /// Check if this is a floating-point type.
    #[inline]
    #[must_use]
    pub const fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Width in bits, with pointers resolved to `ptr_bits`.
    #[inline]
    #[must_use]
    pub const fn bit_width(self, ptr_bits: u32) -> u32 {
        match self {
            Self::I1 => 1,
            Self::I8 => 8,
            Self::I16 => 16,
            Self::I32 | Self::F32 => 32,
            Self::I64 | Self::F64 => 64,
            Self::Ptr => ptr_bits,
        }
    }

    /// Storage size in bytes, with pointers resolved to `ptr_bytes`.
    #[inline]
    #[must_use]
    pub const fn byte_size(self, ptr_bytes: u64) -> u64 {
        match self {
            Self::I1 | Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 => 8,
            Self::Ptr => ptr_bytes,
        }
    }

    /// The integer type of exactly `bits` width, if one exists.
    #[inline]
    #[must_use]
    pub const fn int_with_bits(bits: u32) -> Option<ValType> {
        match bits {
            1 => Some(Self::I1),
            8 => Some(Self::I8),
            16 => Some(Self::I16),
            32 => Some(Self::I32),
            64 => Some(Self::I64),
            _ => None,
        }
    }
}

impl fmt::Display for ValType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::I1 => "i1",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Ptr => "ptr",
        };
        f.write_str(name)
    }
}

/// A full IR type: scalar, aggregate, or void.
#[derive(Clone, PartialEq, Eq, Hash, Debug)]
pub enum Type {
    /// No value.
    Void,
    /// A scalar.
    Val(ValType),
    /// A struct with C-style layout over its field types.
    Struct(Vec<Type>),
    /// A fixed-length array.
    Array {
        /// Element type.
        elem: Box<Type>,
        /// Number of elements.
        len: u64,
    },
}

impl Type {
    /// Shorthand for `Type::Val(ValType::I1)`.
    pub const I1: Type = Type::Val(ValType::I1);
    /// Shorthand for `Type::Val(ValType::I8)`.
    pub const I8: Type = Type::Val(ValType::I8);
    /// Shorthand for `Type::Val(ValType::I16)`.
    pub const I16: Type = Type::Val(ValType::I16);
    /// Shorthand for `Type::Val(ValType::I32)`.
    pub const I32: Type = Type::Val(ValType::I32);
    /// Shorthand for `Type::Val(ValType::I64)`.
    pub const I64: Type = Type::Val(ValType::I64);
    /// Shorthand for `Type::Val(ValType::F32)`.
    pub const F32: Type = Type::Val(ValType::F32);
    /// Shorthand for `Type::Val(ValType::F64)`.
    pub const F64: Type = Type::Val(ValType::F64);
    /// Shorthand for `Type::Val(ValType::Ptr)`.
    pub const PTR: Type = Type::Val(ValType::Ptr);

    /// The scalar type, if this is a scalar.
    #[inline]
    #[must_use]
    pub const fn as_val(&self) -> Option<ValType> {
        match self {
            Type::Val(v) => Some(*v),
            _ => None,
        }
    }

    /// Check if this is `void`.
    #[inline]
    #[must_use]
    pub const fn is_void(&self) -> bool {
        matches!(self, Type::Void)
    }

    /// Check if this is a struct or array.
    #[inline]
    #[must_use]
    pub const fn is_aggregate(&self) -> bool {
        matches!(self, Type::Struct(_) | Type::Array { .. })
    }

    /// Alignment in bytes.
    #[must_use]
    pub fn align(&self, ptr_bytes: u64) -> u64 {
        match self {
            Type::Void => 1,
            Type::Val(v) => v.byte_size(ptr_bytes),
            Type::Struct(fields) => fields
                .iter()
                .map(|f| f.align(ptr_bytes))
                .max()
                .unwrap_or(1),
            Type::Array { elem, .. } => elem.align(ptr_bytes),
        }
    }

    /// Natural size in bytes, including interior and tail padding for
    /// structs.
    #[must_use]
    pub fn size(&self, ptr_bytes: u64) -> u64 {
        match self {
            Type::Void => 0,
            Type::Val(v) => v.byte_size(ptr_bytes),
            Type::Struct(fields) => {
                let mut offset = 0u64;
                for field in fields {
                    offset = align_to(offset, field.align(ptr_bytes));
                    offset += field.size(ptr_bytes);
                }
                align_to(offset, self.align(ptr_bytes))
            }
            Type::Array { elem, len } => elem.alloc_size(ptr_bytes) * len,
        }
    }

    /// Size in bytes a value of this type occupies as an array element or
    /// allocation unit (size rounded up to alignment).
    #[inline]
    #[must_use]
    pub fn alloc_size(&self, ptr_bytes: u64) -> u64 {
        align_to(self.size(ptr_bytes), self.align(ptr_bytes))
    }

    /// Byte offset of struct field `field`.
    ///
    /// # Panics
    ///
    /// Panics if this is not a struct or the index is out of range.
    #[must_use]
    pub fn struct_field_offset(&self, field: usize, ptr_bytes: u64) -> u64 {
        let Type::Struct(fields) = self else {
            panic!("struct_field_offset on non-struct type");
        };
        let mut offset = 0u64;
        for (i, f) in fields.iter().enumerate() {
            offset = align_to(offset, f.align(ptr_bytes));
            if i == field {
                return offset;
            }
            offset += f.size(ptr_bytes);
        }
        panic!("struct field index {field} out of range");
    }

    /// Append this type's scalar leaves, depth first, in layout order.
    pub fn collect_leaves(&self, out: &mut Vec<ValType>) {
        match self {
            Type::Void => {}
            Type::Val(v) => out.push(*v),
            Type::Struct(fields) => {
                for f in fields {
                    f.collect_leaves(out);
                }
            }
            Type::Array { elem, len } => {
                for _ in 0..*len {
                    elem.collect_leaves(out);
                }
            }
        }
    }

    /// Number of scalar leaves (registers a value of this type occupies).
    #[must_use]
    pub fn leaf_count(&self) -> usize {
        match self {
            Type::Void => 0,
            Type::Val(_) => 1,
            Type::Struct(fields) => fields.iter().map(Type::leaf_count).sum(),
            Type::Array { elem, len } => elem.leaf_count() * *len as usize,
        }
    }

    /// The type reached by following a nested aggregate index path.
    ///
    /// # Panics
    ///
    /// Panics if the path does not describe a valid element.
    #[must_use]
    pub fn type_at_path(&self, path: &[u32]) -> &Type {
        let Some((&first, rest)) = path.split_first() else {
            return self;
        };
        match self {
            Type::Struct(fields) => fields[first as usize].type_at_path(rest),
            Type::Array { elem, len } => {
                assert!(u64::from(first) < *len, "array index out of range");
                elem.type_at_path(rest)
            }
            _ => panic!("aggregate index into scalar type"),
        }
    }

    /// Flattened leaf index of the element at a nested aggregate index
    /// path: the number of scalar leaves laid out before it.
    #[must_use]
    pub fn linear_leaf_index(&self, path: &[u32]) -> usize {
        let Some((&first, rest)) = path.split_first() else {
            return 0;
        };
        match self {
            Type::Struct(fields) => {
                let before: usize = fields[..first as usize]
                    .iter()
                    .map(Type::leaf_count)
                    .sum();
                before + fields[first as usize].linear_leaf_index(rest)
            }
            Type::Array { elem, .. } => {
                elem.leaf_count() * first as usize + elem.linear_leaf_index(rest)
            }
            _ => panic!("aggregate index into scalar type"),
        }
    }
}

impl From<ValType> for Type {
    fn from(v: ValType) -> Self {
        Type::Val(v)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => f.write_str("void"),
            Type::Val(v) => v.fmt(f),
            Type::Struct(fields) => {
                f.write_str("{")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    field.fmt(f)?;
                }
                f.write_str("}")
            }
            Type::Array { elem, len } => write!(f, "[{len} x {elem}]"),
        }
    }
}

#[inline]
const fn align_to(offset: u64, align: u64) -> u64 {
    (offset + align - 1) & !(align - 1)
}
