//! Relocatable dispatch stub
//!
//! Each hooked address gets its own copy of a small machine-code template.
//! The stub saves volatile state, calls the dispatcher with its own address,
//! restores state and jumps to the trampoline. The template bytes never change;
//! only three named patch sites are filled in:
//!
//! - [`PatchSite::SelfAddress`]: the stub's own base address, the dispatch key
//! - [`PatchSite::Dispatcher`]: the dispatcher entry point
//! - [`PatchSite::JumpTarget`]: the trampoline, known only after the hook is created
//!
//! Stubs are assembled in a local buffer and copied into executable memory by
//! the hooking backend, so everything here is testable without executing code.

use crate::error::{HookError, HookResult};

/// Instruction set of a stub template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arch {
    /// 32-bit x86
    X86,
    /// x86-64
    X64,
}

impl Arch {
    /// Architecture of the running process
    pub const fn native() -> Self {
        if cfg!(target_pointer_width = "64") {
            Self::X64
        } else {
            Self::X86
        }
    }
}

/// Named patch site within a template
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchSite {
    /// Stub base address passed to the dispatcher
    SelfAddress,
    /// Dispatcher entry point
    Dispatcher,
    /// Where control goes after dispatch
    JumpTarget,
}

/// How a patch site encodes its value
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiteEncoding {
    /// Absolute 32-bit immediate
    Abs32,
    /// Absolute 64-bit immediate
    Abs64,
    /// 32-bit displacement relative to the address of the next instruction,
    /// given as an offset from the stub base
    Rel32 { next_ip: usize },
}

impl SiteEncoding {
    const fn width(self) -> usize {
        match self {
            Self::Abs32 | Self::Rel32 { .. } => 4,
            Self::Abs64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Site {
    site: PatchSite,
    offset: usize,
    encoding: SiteEncoding,
}

/// A machine-code template with its patch sites
#[derive(Debug)]
pub struct StubTemplate {
    arch: Arch,
    bytes: &'static [u8],
    sites: &'static [Site],
}

// pushad; pushfd; mov eax, self; push eax; call dispatcher; add esp, 4;
// popfd; popad; jmp trampoline
#[rustfmt::skip]
const X86_BYTES: [u8; 23] = [
    0x60,
    0x9C,
    0xB8, 0x00, 0x00, 0x00, 0x00,
    0x50,
    0xE8, 0x00, 0x00, 0x00, 0x00,
    0x83, 0xC4, 0x04,
    0x9D,
    0x61,
    0xE9, 0x00, 0x00, 0x00, 0x00,
];

const X86_SITES: [Site; 3] = [
    Site {
        site: PatchSite::SelfAddress,
        offset: 3,
        encoding: SiteEncoding::Abs32,
    },
    Site {
        site: PatchSite::Dispatcher,
        offset: 9,
        encoding: SiteEncoding::Rel32 { next_ip: 13 },
    },
    Site {
        site: PatchSite::JumpTarget,
        offset: 19,
        encoding: SiteEncoding::Rel32 { next_ip: 23 },
    },
];

// Saves flags, the volatile GPRs and xmm0-5, reserves shadow space and keeps
// rsp 16-byte aligned at the call. Ends in `jmp [rip+0]` with an absolute target.
#[rustfmt::skip]
const X64_BYTES: [u8; 146] = [
    0x9C,                                     // pushfq
    0x50, 0x51, 0x52,                         // push rax, rcx, rdx
    0x41, 0x50, 0x41, 0x51,                   // push r8, r9
    0x41, 0x52, 0x41, 0x53,                   // push r10, r11
    0x48, 0x81, 0xEC, 0x88, 0x00, 0x00, 0x00, // sub rsp, 0x88
    0xF3, 0x0F, 0x7F, 0x44, 0x24, 0x20,       // movdqu [rsp+0x20], xmm0
    0xF3, 0x0F, 0x7F, 0x4C, 0x24, 0x30,
    0xF3, 0x0F, 0x7F, 0x54, 0x24, 0x40,
    0xF3, 0x0F, 0x7F, 0x5C, 0x24, 0x50,
    0xF3, 0x0F, 0x7F, 0x64, 0x24, 0x60,
    0xF3, 0x0F, 0x7F, 0x6C, 0x24, 0x70,       // movdqu [rsp+0x70], xmm5
    0x48, 0xB9, 0, 0, 0, 0, 0, 0, 0, 0,       // mov rcx, self
    0x48, 0xB8, 0, 0, 0, 0, 0, 0, 0, 0,       // mov rax, dispatcher
    0xFF, 0xD0,                               // call rax
    0xF3, 0x0F, 0x6F, 0x44, 0x24, 0x20,       // movdqu xmm0, [rsp+0x20]
    0xF3, 0x0F, 0x6F, 0x4C, 0x24, 0x30,
    0xF3, 0x0F, 0x6F, 0x54, 0x24, 0x40,
    0xF3, 0x0F, 0x6F, 0x5C, 0x24, 0x50,
    0xF3, 0x0F, 0x6F, 0x64, 0x24, 0x60,
    0xF3, 0x0F, 0x6F, 0x6C, 0x24, 0x70,       // movdqu xmm5, [rsp+0x70]
    0x48, 0x81, 0xC4, 0x88, 0x00, 0x00, 0x00, // add rsp, 0x88
    0x41, 0x5B, 0x41, 0x5A,                   // pop r11, r10
    0x41, 0x59, 0x41, 0x58,                   // pop r9, r8
    0x5A, 0x59, 0x58,                         // pop rdx, rcx, rax
    0x9D,                                     // popfq
    0xFF, 0x25, 0x00, 0x00, 0x00, 0x00,       // jmp [rip+0]
    0, 0, 0, 0, 0, 0, 0, 0,                   // trampoline
];

const X64_SITES: [Site; 3] = [
    Site {
        site: PatchSite::SelfAddress,
        offset: 57,
        encoding: SiteEncoding::Abs64,
    },
    Site {
        site: PatchSite::Dispatcher,
        offset: 67,
        encoding: SiteEncoding::Abs64,
    },
    Site {
        site: PatchSite::JumpTarget,
        offset: 138,
        encoding: SiteEncoding::Abs64,
    },
];

static X86_TEMPLATE: StubTemplate = StubTemplate {
    arch: Arch::X86,
    bytes: &X86_BYTES,
    sites: &X86_SITES,
};

static X64_TEMPLATE: StubTemplate = StubTemplate {
    arch: Arch::X64,
    bytes: &X64_BYTES,
    sites: &X64_SITES,
};

impl StubTemplate {
    /// Template for `arch`
    pub fn for_arch(arch: Arch) -> &'static Self {
        match arch {
            Arch::X86 => &X86_TEMPLATE,
            Arch::X64 => &X64_TEMPLATE,
        }
    }

    /// Template for the running process
    pub fn native() -> &'static Self {
        Self::for_arch(Arch::native())
    }

    /// Instruction set of this template
    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// Size of a stub in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// Always false; templates are never empty
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Byte offset and encoding of a patch site
    pub fn site(&self, site: PatchSite) -> (usize, SiteEncoding) {
        // Every template defines all three sites
        self.sites
            .iter()
            .find(|s| s.site == site)
            .map_or((0, SiteEncoding::Abs32), |s| (s.offset, s.encoding))
    }
}

/// A stub assembled for a fixed base address
#[derive(Debug, Clone)]
pub struct Stub {
    template: &'static StubTemplate,
    base: usize,
    bytes: Vec<u8>,
}

impl Stub {
    /// Assemble a stub at `base` calling `dispatcher`
    ///
    /// The jump target stays unset until [`Stub::set_jump_target`] is called;
    /// the stub must not be reachable before then.
    pub fn assemble(
        template: &'static StubTemplate,
        base: usize,
        dispatcher: usize,
    ) -> HookResult<Self> {
        let mut stub = Self {
            template,
            base,
            bytes: template.bytes.to_vec(),
        };
        stub.patch(PatchSite::SelfAddress, base)?;
        stub.patch(PatchSite::Dispatcher, dispatcher)?;
        Ok(stub)
    }

    /// Point the final jump at `target`
    pub fn set_jump_target(&mut self, target: usize) -> HookResult {
        self.patch(PatchSite::JumpTarget, target)
    }

    /// Fill a patch site with `value`
    pub fn patch(&mut self, site: PatchSite, value: usize) -> HookResult {
        let (offset, encoding) = self.template.site(site);
        let encoded: Vec<u8> = match encoding {
            SiteEncoding::Abs32 => u32::try_from(value)
                .map_err(|_| HookError::AddressOutOfRange(value))?
                .to_le_bytes()
                .to_vec(),
            SiteEncoding::Abs64 => (value as u64).to_le_bytes().to_vec(),
            SiteEncoding::Rel32 { next_ip } => {
                let from = self.base.wrapping_add(next_ip);
                rel32(from, value)?.to_le_bytes().to_vec()
            }
        };

        self.bytes[offset..offset + encoding.width()].copy_from_slice(&encoded);
        Ok(())
    }

    /// Decode the absolute address held by a patch site
    pub fn read_site(&self, site: PatchSite) -> usize {
        let (offset, encoding) = self.template.site(site);
        let raw = &self.bytes[offset..offset + encoding.width()];
        match encoding {
            SiteEncoding::Abs32 => {
                u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) as usize
            }
            SiteEncoding::Abs64 => {
                let mut word = [0u8; 8];
                word.copy_from_slice(raw);
                u64::from_le_bytes(word) as usize
            }
            SiteEncoding::Rel32 { next_ip } => {
                let disp = i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]);
                let next = self.base.wrapping_add(next_ip) as u32;
                next.wrapping_add_signed(disp) as usize
            }
        }
    }

    /// Base address the stub was assembled for
    pub fn base(&self) -> usize {
        self.base
    }

    /// Assembled machine code
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Template the stub was built from
    pub fn template(&self) -> &'static StubTemplate {
        self.template
    }
}

/// Displacement from `from` (address after the instruction) to `to`
///
/// Rel32 sites only occur in 32-bit code, where the instruction pointer wraps
/// at 4 GiB, so any pair of 32-bit addresses is reachable.
fn rel32(from: usize, to: usize) -> HookResult<i32> {
    match (u32::try_from(from), u32::try_from(to)) {
        (Ok(from32), Ok(to32)) => Ok(to32.wrapping_sub(from32) as i32),
        _ => Err(HookError::DisplacementOutOfRange { from, to }),
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::error::HookErrorKind;

    #[test]
    fn test_x86_layout() {
        let template = StubTemplate::for_arch(Arch::X86);
        assert_eq!(template.len(), 23);
        assert_eq!(template.site(PatchSite::SelfAddress), (3, SiteEncoding::Abs32));
        assert_eq!(
            template.site(PatchSite::JumpTarget),
            (19, SiteEncoding::Rel32 { next_ip: 23 })
        );
    }

    #[test]
    fn test_x86_displacements_decode_to_targets() {
        let template = StubTemplate::for_arch(Arch::X86);
        let mut stub = Stub::assemble(template, 0x0100_0000, 0x0040_2000).unwrap();
        stub.set_jump_target(0x0100_5000).unwrap();

        let bytes = stub.bytes();
        assert_eq!(&bytes[3..7], &0x0100_0000u32.to_le_bytes());
        // call rel32: 0x402000 - (0x1000000 + 13)
        let call_disp = 0x0040_2000i64 - (0x0100_0000i64 + 13);
        assert_eq!(&bytes[9..13], &(call_disp as i32).to_le_bytes());
        // jmp rel32: 0x1005000 - (0x1000000 + 23)
        assert_eq!(&bytes[19..23], &(0x5000i32 - 23).to_le_bytes());

        assert_eq!(stub.read_site(PatchSite::SelfAddress), 0x0100_0000);
        assert_eq!(stub.read_site(PatchSite::Dispatcher), 0x0040_2000);
        assert_eq!(stub.read_site(PatchSite::JumpTarget), 0x0100_5000);

        // Opcodes around the sites are untouched
        assert_eq!(bytes[0], 0x60);
        assert_eq!(bytes[2], 0xB8);
        assert_eq!(bytes[8], 0xE8);
        assert_eq!(bytes[18], 0xE9);
    }

    #[test]
    fn test_backward_jump() {
        let template = StubTemplate::for_arch(Arch::X86);
        let mut stub = Stub::assemble(template, 0x0200_0000, 0x0040_0000).unwrap();
        stub.set_jump_target(0x0040_1000).unwrap();
        assert_eq!(stub.read_site(PatchSite::JumpTarget), 0x0040_1000);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_displacement_out_of_range() {
        let template = StubTemplate::for_arch(Arch::X86);
        let mut stub = Stub::assemble(template, 0x1000, 0x2000).unwrap();
        let err = stub.set_jump_target(0x7FFF_0000_0000).unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::DisplacementOutOfRange);
    }

    #[test]
    #[cfg(target_pointer_width = "64")]
    fn test_wide_address_in_32_bit_site() {
        let template = StubTemplate::for_arch(Arch::X86);
        let err = Stub::assemble(template, 0x1_0000_0000, 0x2000).unwrap_err();
        assert_eq!(err.kind(), HookErrorKind::AddressOutOfRange);
        assert!(err.to_string().contains("0x100000000"), "{err}");
    }

    #[test]
    fn test_x64_absolute_sites() {
        let template = StubTemplate::for_arch(Arch::X64);
        assert_eq!(template.len(), 146);

        let base = 0x7FF0_1234usize;
        let mut stub = Stub::assemble(template, base, 0x1122_3344).unwrap();
        stub.set_jump_target(0x5566_7788).unwrap();

        let bytes = stub.bytes();
        assert_eq!(&bytes[55..57], &[0x48, 0xB9]);
        assert_eq!(&bytes[65..67], &[0x48, 0xB8]);
        assert_eq!(&bytes[75..77], &[0xFF, 0xD0]);
        assert_eq!(&bytes[132..138], &[0xFF, 0x25, 0, 0, 0, 0]);

        assert_eq!(stub.read_site(PatchSite::SelfAddress), base);
        assert_eq!(stub.read_site(PatchSite::Dispatcher), 0x1122_3344);
        assert_eq!(stub.read_site(PatchSite::JumpTarget), 0x5566_7788);
    }

    #[test]
    fn test_x64_saves_and_restores_symmetrically() {
        let bytes = StubTemplate::for_arch(Arch::X64).bytes;
        // Every movdqu store before the call has a matching load after it
        let stores = bytes[19..55].chunks(6).collect::<Vec<_>>();
        let loads = bytes[77..113].chunks(6).collect::<Vec<_>>();
        assert_eq!(stores.len(), 6);
        for (store, load) in stores.iter().zip(&loads) {
            assert_eq!(store[2], 0x7F);
            assert_eq!(load[2], 0x6F);
            assert_eq!(store[3..], load[3..]);
        }
    }
}
