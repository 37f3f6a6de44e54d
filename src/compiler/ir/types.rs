//! IR type definitions and data layout

use std::fmt;

/// Memory domain a pointer addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AddressSpace {
    /// Memory private to the executing core (stack, heap)
    Local,
    /// Distributed-global memory; the pointer encodes its owning core
    Global,
    /// Replicated memory, valid at the same address on every core
    Symmetric,
}

impl AddressSpace {
    /// Numeric address-space tag as it appears in lowered IR
    pub fn tag(&self) -> u32 {
        match self {
            AddressSpace::Local => 0,
            AddressSpace::Global => 100,
            AddressSpace::Symmetric => 200,
        }
    }

    /// Parses a numeric address-space tag
    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(AddressSpace::Local),
            100 => Some(AddressSpace::Global),
            200 => Some(AddressSpace::Symmetric),
            _ => None,
        }
    }
}

/// Integer bit widths supported by the IR
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum IntWidth {
    /// 1-bit boolean
    I1,
    /// 8-bit integer
    I8,
    /// 16-bit integer
    I16,
    /// 32-bit integer
    I32,
    /// 64-bit integer
    I64,
}

impl IntWidth {
    /// Returns the number of value bits
    pub fn bits(&self) -> u32 {
        match self {
            IntWidth::I1 => 1,
            IntWidth::I8 => 8,
            IntWidth::I16 => 16,
            IntWidth::I32 => 32,
            IntWidth::I64 => 64,
        }
    }

    /// Returns the storage size in bytes
    pub fn bytes(&self) -> u64 {
        match self {
            IntWidth::I1 | IntWidth::I8 => 1,
            IntWidth::I16 => 2,
            IntWidth::I32 => 4,
            IntWidth::I64 => 8,
        }
    }

    /// Mask selecting the value bits of a raw 64-bit word
    pub fn mask(&self) -> u64 {
        match self {
            IntWidth::I64 => u64::MAX,
            w => (1u64 << w.bits()) - 1,
        }
    }
}

/// IR value type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// No value (stores, branches, void calls)
    Void,
    /// Integer of the given width
    Int(IntWidth),
    /// Opaque pointer tagged with an address space
    Ptr(AddressSpace),
    /// Composite record with naturally aligned fields
    Struct(Vec<Type>),
    /// Fixed-length array
    Array(Box<Type>, u64),
}

impl Type {
    /// `i1`
    pub const I1: Type = Type::Int(IntWidth::I1);
    /// `i8`
    pub const I8: Type = Type::Int(IntWidth::I8);
    /// `i16`
    pub const I16: Type = Type::Int(IntWidth::I16);
    /// `i32`
    pub const I32: Type = Type::Int(IntWidth::I32);
    /// `i64`
    pub const I64: Type = Type::Int(IntWidth::I64);

    /// Local-space pointer
    pub fn ptr() -> Self {
        Type::Ptr(AddressSpace::Local)
    }

    /// Distributed-global pointer
    pub fn global_ptr() -> Self {
        Type::Ptr(AddressSpace::Global)
    }

    /// Symmetric pointer
    pub fn symmetric_ptr() -> Self {
        Type::Ptr(AddressSpace::Symmetric)
    }

    /// Returns true if this is a pointer type
    pub fn is_pointer(&self) -> bool {
        matches!(self, Type::Ptr(_))
    }

    /// Address space of a pointer type
    pub fn address_space(&self) -> Option<AddressSpace> {
        match self {
            Type::Ptr(space) => Some(*space),
            _ => None,
        }
    }

    /// Returns the integer width of an integer type
    pub fn int_width(&self) -> Option<IntWidth> {
        match self {
            Type::Int(w) => Some(*w),
            _ => None,
        }
    }

    /// Returns true for integer and pointer types, the only types memory
    /// operations and registers carry
    pub fn is_scalar(&self) -> bool {
        matches!(self, Type::Int(_) | Type::Ptr(_))
    }

    /// Size in bytes, including tail padding
    pub fn size(&self) -> u64 {
        match self {
            Type::Void => 0,
            Type::Int(w) => w.bytes(),
            Type::Ptr(_) => 8,
            Type::Struct(fields) => {
                let mut offset = 0;
                for field in fields {
                    offset = align_to(offset, field.align()) + field.size();
                }
                align_to(offset, self.align())
            }
            Type::Array(elem, len) => elem.size() * len,
        }
    }

    /// ABI alignment in bytes
    pub fn align(&self) -> u64 {
        match self {
            Type::Void => 1,
            Type::Int(w) => w.bytes(),
            Type::Ptr(_) => 8,
            Type::Struct(fields) => fields.iter().map(Type::align).max().unwrap_or(1),
            Type::Array(elem, _) => elem.align(),
        }
    }

    /// Byte offset of a struct field
    pub fn field_offset(&self, index: usize) -> Option<u64> {
        let Type::Struct(fields) = self else {
            return None;
        };
        if index >= fields.len() {
            return None;
        }
        let mut offset = 0;
        for (i, field) in fields.iter().enumerate() {
            offset = align_to(offset, field.align());
            if i == index {
                return Some(offset);
            }
            offset += field.size();
        }
        None
    }

    /// Type reached by stepping into a struct field or array element
    pub fn element(&self, index: u64) -> Option<&Type> {
        match self {
            Type::Struct(fields) => fields.get(index as usize),
            Type::Array(elem, _) => Some(elem),
            _ => None,
        }
    }
}

fn align_to(offset: u64, align: u64) -> u64 {
    offset.div_ceil(align.max(1)) * align.max(1)
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Void => write!(f, "void"),
            Type::Int(w) => write!(f, "i{}", w.bits()),
            Type::Ptr(AddressSpace::Local) => write!(f, "ptr"),
            Type::Ptr(space) => write!(f, "ptr addrspace({})", space.tag()),
            Type::Struct(fields) => {
                write!(f, "{{ ")?;
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", field)?;
                }
                write!(f, " }}")
            }
            Type::Array(elem, len) => write!(f, "[{} x {}]", len, elem),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_struct_layout_pads_fields() {
        let ty = Type::Struct(vec![Type::I8, Type::I64, Type::I16]);
        assert_eq!(ty.field_offset(0), Some(0));
        assert_eq!(ty.field_offset(1), Some(8));
        assert_eq!(ty.field_offset(2), Some(16));
        assert_eq!(ty.size(), 24);
        assert_eq!(ty.align(), 8);
    }

    #[test]
    fn test_empty_struct_has_zero_size() {
        let ty = Type::Struct(vec![]);
        assert_eq!(ty.size(), 0);
        assert_eq!(ty.field_offset(0), None);
    }

    #[test]
    fn test_address_space_tags() {
        for space in [
            AddressSpace::Local,
            AddressSpace::Global,
            AddressSpace::Symmetric,
        ] {
            assert_eq!(AddressSpace::from_tag(space.tag()), Some(space));
        }
        assert_eq!(AddressSpace::from_tag(7), None);
    }

    #[test]
    fn test_display() {
        assert_eq!(Type::global_ptr().to_string(), "ptr addrspace(100)");
        assert_eq!(
            Type::Struct(vec![Type::I32, Type::ptr()]).to_string(),
            "{ i32, ptr }"
        );
    }
}
