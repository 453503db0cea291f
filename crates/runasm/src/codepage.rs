//! The code page: OS-level executable memory holding one resolved
//! assembly unit, exposed through typed callable handles.
//!
//! The page is mapped writable, filled and patched, then re-protected to
//! read+execute, so a W^X host policy is honored. Callable handles share
//! ownership of the mapping; the memory is released when the page value
//! and every handle derived from it have been dropped.

use std::collections::BTreeMap;
use std::sync::Arc;

use memmap2::{Mmap, MmapMut};

use crate::error::AsmError;
use crate::unit::AssemblyResult;

/// Calling convention of an emitted function.
///
/// The convention is carried as metadata on the handle; the actual ABI is
/// selected by the `extern` fn type the caller casts to (`"sysv64"`,
/// `"win64"`, `"cdecl"`, `"stdcall"`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallConv {
    /// System V AMD64 (64-bit Unix).
    SystemV,
    /// Microsoft x64.
    Win64,
    /// 32-bit cdecl.
    Cdecl,
    /// 32-bit stdcall.
    Stdcall,
}

impl CallConv {
    /// The host's default 64-bit convention.
    pub fn host() -> CallConv {
        if cfg!(windows) {
            CallConv::Win64
        } else {
            CallConv::SystemV
        }
    }
}

struct PageInner {
    map: Mmap,
}

/// A region of executable memory holding one assembled unit.
pub struct CodePage {
    inner: Arc<PageInner>,
    labels: BTreeMap<String, u64>,
    code_len: usize,
}

impl CodePage {
    /// Map the resolved unit into executable memory.
    ///
    /// Absolute relocations are patched with the real base address before
    /// the mapping is re-protected; the page tail past the code is filled
    /// with `0xCC` so an accidental fall-through traps instead of
    /// executing garbage.
    ///
    /// # Errors
    ///
    /// [`AsmError::PageAllocFailed`] when the OS refuses the mapping or
    /// the protection change; [`AsmError::DisplacementOutOfRange`] when a
    /// patched absolute address does not fit its field.
    pub fn new(result: &AssemblyResult) -> Result<CodePage, AsmError> {
        // x86 page granularity; the OS page size is a multiple of this.
        const PAGE: usize = 0x1000;

        let code = result.bytes();
        let len = code.len().max(1).div_ceil(PAGE) * PAGE;
        let mut map = MmapMut::map_anon(len).map_err(|e| AsmError::PageAllocFailed {
            detail: e.to_string(),
        })?;
        map[..code.len()].copy_from_slice(code);
        for byte in &mut map[code.len()..] {
            *byte = 0xCC;
        }

        // The mapping address survives the protection flip, so absolute
        // relocations can be patched now.
        let base = map.as_ptr() as u64;
        for patch in result.relocations() {
            let target = result
                .label_offset(&patch.label)
                .expect("resolved unit defines every referenced label");
            let value = i128::from(base) + i128::from(target) + i128::from(patch.addend);
            let bits = patch.size * 8;
            if patch.size < 8 && (value < 0 || value >= 1i128 << bits) {
                return Err(AsmError::DisplacementOutOfRange {
                    value: value as i64,
                    bits,
                });
            }
            let le = (value as u64).to_le_bytes();
            map[patch.offset..patch.offset + patch.size as usize]
                .copy_from_slice(&le[..patch.size as usize]);
        }

        let map = map.make_exec().map_err(|e| AsmError::PageAllocFailed {
            detail: e.to_string(),
        })?;
        Ok(CodePage {
            inner: Arc::new(PageInner { map }),
            labels: result.labels().clone(),
            code_len: code.len(),
        })
    }

    /// Base address of the executable region.
    pub fn base(&self) -> *const u8 {
        self.inner.map.as_ptr()
    }

    /// Length of the code image (excluding trap padding).
    pub fn len(&self) -> usize {
        self.code_len
    }

    /// Whether the page holds no code.
    pub fn is_empty(&self) -> bool {
        self.code_len == 0
    }

    /// The finalized code bytes, after relocation patching.
    pub fn bytes(&self) -> &[u8] {
        &self.inner.map[..self.code_len]
    }

    /// Address of a label inside the page.
    pub fn label_address(&self, name: &str) -> Option<*const u8> {
        let off = *self.labels.get(name)?;
        Some(unsafe { self.base().add(off as usize) })
    }

    /// A callable handle to the first byte of the page.
    ///
    /// # Safety
    ///
    /// `F` must be a fn-pointer type whose ABI string matches `conv` and
    /// whose signature matches what the emitted code actually implements.
    pub unsafe fn callable<F: Copy>(&self, conv: CallConv) -> Callable<F> {
        self.callable_to(self.base(), conv)
    }

    /// A callable handle to a labelled entry point.
    ///
    /// # Safety
    ///
    /// As [`callable`](Self::callable).
    ///
    /// # Errors
    ///
    /// [`AsmError::UndefinedLabel`] when the label does not exist.
    pub unsafe fn callable_at<F: Copy>(
        &self,
        label: &str,
        conv: CallConv,
    ) -> Result<Callable<F>, AsmError> {
        let addr = self
            .label_address(label)
            .ok_or_else(|| AsmError::UndefinedLabel {
                label: label.to_owned(),
            })?;
        Ok(self.callable_to(addr, conv))
    }

    unsafe fn callable_to<F: Copy>(&self, addr: *const u8, conv: CallConv) -> Callable<F> {
        assert_eq!(
            core::mem::size_of::<F>(),
            core::mem::size_of::<*const u8>(),
            "callable type must be a fn pointer"
        );
        let f = core::mem::transmute_copy::<*const u8, F>(&addr);
        Callable {
            f,
            conv,
            _page: Arc::clone(&self.inner),
        }
    }
}

impl core::fmt::Debug for CodePage {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("CodePage")
            .field("base", &self.base())
            .field("len", &self.code_len)
            .field("labels", &self.labels)
            .finish()
    }
}

/// A typed, shared handle into a [`CodePage`].
///
/// The handle keeps its page mapped: the executable memory is released
/// only after the page and all handles are dropped.
#[derive(Clone)]
pub struct Callable<F: Copy> {
    f: F,
    conv: CallConv,
    _page: Arc<PageInner>,
}

impl<F: Copy> Callable<F> {
    /// The typed fn pointer. Calling it runs the emitted machine code.
    pub fn get(&self) -> F {
        self.f
    }

    /// The calling convention declared for this entry point.
    pub fn conv(&self) -> CallConv {
        self.conv
    }
}
