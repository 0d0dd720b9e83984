//! C-compatible group layout.
//!
//! Values are addressed by index, but each variable still gets the offset it
//! would have in the equivalent C struct. Static groups declare the size they
//! expect so a mismatch between a module's idea of the group and the
//! declared variables is caught at startup.

use crate::store::value::VarType;

const INT_SIZE: usize = std::mem::size_of::<i32>();
const PTR_SIZE: usize = std::mem::size_of::<usize>();

/// Offsets and total size of a group's value area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub offsets: Vec<usize>,
    pub size: usize,
}

/// Size of one value of `ty`.
pub fn size_of(ty: VarType) -> usize {
    match ty {
        VarType::Int => INT_SIZE,
        VarType::String | VarType::Pointer => PTR_SIZE,
        // pointer + length, padded to pointer alignment
        VarType::Str => 2 * PTR_SIZE,
    }
}

fn align_of(ty: VarType) -> usize {
    match ty {
        VarType::Int => INT_SIZE,
        _ => PTR_SIZE,
    }
}

fn round_up(n: usize, align: usize) -> usize {
    n.div_ceil(align) * align
}

/// Lay the variables out in declaration order.
pub fn compute(types: impl IntoIterator<Item = VarType>) -> Layout {
    let mut offsets = Vec::new();
    let mut size = 0;
    let mut has_pointer = false;

    for ty in types {
        let offset = round_up(size, align_of(ty));
        offsets.push(offset);
        size = offset + size_of(ty);
        has_pointer |= ty != VarType::Int;
    }

    let size = if has_pointer {
        round_up(size, PTR_SIZE)
    } else {
        round_up(size, INT_SIZE)
    };
    Layout { offsets, size }
}
