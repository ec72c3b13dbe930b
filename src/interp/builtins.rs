//! Whitelist of body-less callees the evaluator understands.
//!
//! Everything else without a body is opaque and makes the surrounding call
//! unevaluable.

use super::scan::EffectKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `llvm.memcpy.*` / `llvm.memmove.*`
    MemCpy,
    /// `llvm.memset.*`
    MemSet,
    /// Lifetime and debug intrinsics; evaluate to nothing.
    NoOp,
    /// `runtime.alloc(size)`: zeroed compile-time heap storage.
    Alloc,
    /// `runtime.hashmapMake(keySize, valueSize)`: fresh map header.
    HashmapMake,
    /// `runtime.chanMake(elemSize)`: fresh channel header.
    ChanMake,
    /// `runtime.sliceCopy(dst, src, n, elemSize)`: bounded element copy.
    SliceCopy,
}

pub fn recognize(name: &str) -> Option<Builtin> {
    if name.starts_with("llvm.memcpy.") || name.starts_with("llvm.memmove.") {
        return Some(Builtin::MemCpy);
    }
    if name.starts_with("llvm.memset.") {
        return Some(Builtin::MemSet);
    }
    if name.starts_with("llvm.lifetime.") || name.starts_with("llvm.dbg.") {
        return Some(Builtin::NoOp);
    }
    match name {
        "runtime.alloc" => Some(Builtin::Alloc),
        "runtime.hashmapMake" => Some(Builtin::HashmapMake),
        "runtime.chanMake" => Some(Builtin::ChanMake),
        "runtime.sliceCopy" => Some(Builtin::SliceCopy),
        _ => None,
    }
}

/// Side-effect classification for a declaration, if whitelisted.
pub fn declared_effect(name: &str) -> Option<EffectKind> {
    recognize(name).map(|builtin| match builtin {
        Builtin::MemCpy | Builtin::MemSet | Builtin::SliceCopy => EffectKind::WritesParams,
        // Allocating builtins only mint new objects.
        Builtin::NoOp | Builtin::Alloc | Builtin::HashmapMake | Builtin::ChanMake => {
            EffectKind::Pure
        }
    })
}

/// Map headers carry three zeroed pointer/word fields followed by the key
/// and value sizes as single bytes.
pub fn hashmap_header_size(ptr_bytes: u64) -> u64 {
    3 * ptr_bytes + 2
}

/// Channel headers carry three zeroed pointer/word fields.
pub fn chan_header_size(ptr_bytes: u64) -> u64 {
    3 * ptr_bytes
}
