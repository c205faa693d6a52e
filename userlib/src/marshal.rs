// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Managed-buffer alignment splitting and ioctlv vector layout (spec.md
//! §4.5), grounded on `cafe_nn_ipc_client_command.h`'s
//! `IpcSerialiser<ManagedBuffer>::write` and `ClientCommandHelper`.
//!
//! A managed buffer whose backing memory isn't cacheline-aligned gets torn
//! into an aligned middle region (exposed directly) and an unaligned
//! head+tail copied into scratch (exposed as a second vec entry), so the
//! server side only ever sees cacheline-aligned DMA-style buffers.

use abi::IoctlVector;
use zerocopy::{AsBytes, FromBytes, LayoutVerified};

use crate::alloc::{ScratchAllocator, ScratchHandle};

pub const CACHELINE: usize = 64;
pub const HEADER_SIZE: usize = 128;
pub const UNALIGNED_SCRATCH_SIZE: usize = 256;

/// The request header an ioctlv call's request-header vec carries
/// (spec.md §4.5: "service-id, command-id, two scratch words"),
/// grounded on `cafe_nn_ipc_client_command.h`'s `RequestHeader`.
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct RequestHeader {
    pub flags: u32,
    pub command: u32,
    pub scratch: [u32; 2],
    pub service: u32,
}

/// The matching response header (`ResponseHeader` in the original): just
/// the result code, left host-endian since both ends of this call live in
/// the same process.
#[derive(Copy, Clone, Default, AsBytes, FromBytes)]
#[repr(C)]
pub struct ResponseHeader {
    pub result: i32,
}
const PIVOT: usize = 64;

fn align_up(x: usize, to: usize) -> usize {
    (x + to - 1) / to * to
}

fn align_down(x: usize, to: usize) -> usize {
    x / to * to
}

/// A user buffer the client wants the server to read from and/or write
/// into. `input`/`output` mirror the original's `InBuffer`/`OutBuffer`/
/// `InOutBuffer` template family.
pub struct ManagedBuffer<'a> {
    pub data: &'a mut [u8],
    pub input: bool,
    pub output: bool,
}

impl<'a> ManagedBuffer<'a> {
    pub fn input(data: &'a mut [u8]) -> Self {
        ManagedBuffer { data, input: true, output: false }
    }

    pub fn output(data: &'a mut [u8]) -> Self {
        ManagedBuffer { data, input: false, output: true }
    }

    pub fn in_out(data: &'a mut [u8]) -> Self {
        ManagedBuffer { data, input: true, output: true }
    }
}

/// The aligned/unaligned split of one managed buffer's address range.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
struct Split {
    before_len: usize,
    aligned_len: usize,
    after_len: usize,
}

fn split(addr: usize, len: usize) -> Split {
    let end = addr + len;
    let aligned_start = align_up(addr, CACHELINE);
    let aligned_end = align_down(end, CACHELINE);
    if aligned_start >= aligned_end {
        // The whole buffer lives inside a single cacheline straddle; there
        // is no aligned middle, and the unaligned head covers everything.
        // `before_len` can exceed the usual 63-byte bound in this case.
        return Split { before_len: len, aligned_len: 0, after_len: 0 };
    }
    Split {
        before_len: aligned_start - addr,
        aligned_len: aligned_end - aligned_start,
        after_len: end - aligned_end,
    }
}

/// One managed buffer plus the bookkeeping needed to copy its unaligned
/// scratch back on reply.
struct Entry<'a> {
    buf: ManagedBuffer<'a>,
    scratch: ScratchHandle,
    split: Split,
}

/// Builds one ioctlv call's request header, response header, vec array,
/// and managed-buffer scratch, following the vec layout of spec.md §4.5:
///
/// ```text
/// numVecIn  = 1 + 2 * outputBufferCount
/// numVecOut = 1 + 2 * inputBufferCount
/// vec[0]                  = response header buffer (size 128)
/// vec[1 .. numVecOut-1]   = user output buffers (aligned, unaligned pairs)
/// vec[numVecOut]          = request header buffer (size 128)
/// vec[numVecOut+1 .. end] = user input buffers (aligned, unaligned pairs)
/// ```
pub struct IoctlvCall<'a> {
    request_header: ScratchHandle,
    response_header: ScratchHandle,
    vecs: Vec<IoctlVector>,
    entries: Vec<Entry<'a>>,
    num_vec_out: usize,
}

impl<'a> IoctlvCall<'a> {
    /// `buffers` may mix input, output, and in/out entries in any order;
    /// they're regrouped by direction internally the way the original's
    /// template expansion regroups `ParameterTypes...` by `Input`/`Output`
    /// count before assigning vec indices.
    pub fn build(alloc: &mut ScratchAllocator, buffers: Vec<ManagedBuffer<'a>>) -> Self {
        let input_count = buffers.iter().filter(|b| b.input).count();
        let output_count = buffers.iter().filter(|b| b.output).count();
        let num_vec_in = 1 + 2 * output_count;
        let num_vec_out = 1 + 2 * input_count;

        let request_header = alloc.alloc(HEADER_SIZE).unwrap();
        let response_header = alloc.alloc(HEADER_SIZE).unwrap();

        let mut vecs = vec![IoctlVector::default(); num_vec_in + num_vec_out];
        vecs[0] = IoctlVector {
            virtual_address: 0,
            length: HEADER_SIZE as u32,
            physical_address: alloc.get(response_header).as_ptr() as u32,
        };
        vecs[num_vec_out] = IoctlVector {
            virtual_address: 0,
            length: HEADER_SIZE as u32,
            physical_address: alloc.get(request_header).as_ptr() as u32,
        };

        let mut entries: Vec<Entry<'a>> = Vec::with_capacity(buffers.len());
        let mut in_idx = 0usize;
        let mut out_idx = 0usize;
        for buf in buffers {
            let addr = buf.data.as_ptr() as usize;
            let s = split(addr, buf.data.len());
            let scratch = alloc.alloc(UNALIGNED_SCRATCH_SIZE).unwrap();

            if buf.input {
                let region = alloc.get_mut(scratch);
                region[PIVOT - s.before_len..PIVOT].copy_from_slice(&buf.data[..s.before_len]);
                let after_start = buf.data.len() - s.after_len;
                region[PIVOT..PIVOT + s.after_len].copy_from_slice(&buf.data[after_start..]);
            }

            let (aligned_idx, unaligned_idx) = if buf.input {
                let i = 1 + num_vec_out + in_idx * 2;
                in_idx += 1;
                (i, i + 1)
            } else {
                let i = 1 + out_idx * 2;
                out_idx += 1;
                (i, i + 1)
            };

            vecs[aligned_idx] = IoctlVector {
                virtual_address: addr as u32,
                length: s.aligned_len as u32,
                physical_address: (addr + s.before_len) as u32,
            };
            if s.before_len + s.after_len > 0 {
                let scratch_addr = alloc.get(scratch).as_ptr() as u32;
                vecs[unaligned_idx] = IoctlVector {
                    virtual_address: 0,
                    length: (s.before_len + s.after_len) as u32,
                    physical_address: scratch_addr + (PIVOT - s.before_len) as u32,
                };
            }

            entries.push(Entry { buf, scratch, split: s });
        }

        IoctlvCall { request_header, response_header, vecs, entries, num_vec_out }
    }

    pub fn vecs(&self) -> &[IoctlVector] {
        &self.vecs
    }

    pub fn request_header_mut<'s>(&self, alloc: &'s mut ScratchAllocator) -> &'s mut [u8] {
        alloc.get_mut(self.request_header)
    }

    pub fn response_header<'s>(&self, alloc: &'s ScratchAllocator) -> &'s [u8] {
        alloc.get(self.response_header)
    }

    pub fn num_vec_out(&self) -> usize {
        self.num_vec_out
    }

    /// Writes the (service-id, command-id, scratch words) header into the
    /// request-header vec.
    pub fn write_request_header(&self, alloc: &mut ScratchAllocator, service: u32, command: u32, scratch: [u32; 2]) {
        let header = RequestHeader { flags: 1, command, scratch, service };
        let out = self.request_header_mut(alloc);
        out[..core::mem::size_of::<RequestHeader>()].copy_from_slice(header.as_bytes());
    }

    /// Reads the result code out of the response-header vec, written by
    /// the server handler before replying.
    pub fn read_response_header(&self, alloc: &ScratchAllocator) -> i32 {
        let buf = &self.response_header(alloc)[..core::mem::size_of::<ResponseHeader>()];
        LayoutVerified::<_, ResponseHeader>::new(buf).expect("response header buffer misaligned").into_ref().result
    }

    /// Copies the unaligned-before/-after scratch back into each output
    /// buffer's user-visible memory, then releases every allocation this
    /// call made.
    pub fn finish(self, alloc: &mut ScratchAllocator) {
        for mut entry in self.entries {
            if entry.buf.output {
                let region = alloc.get(entry.scratch).to_vec();
                let before_len = entry.split.before_len;
                let after_len = entry.split.after_len;
                entry.buf.data[..before_len].copy_from_slice(&region[PIVOT - before_len..PIVOT]);
                let after_start = entry.buf.data.len() - after_len;
                entry.buf.data[after_start..].copy_from_slice(&region[PIVOT..PIVOT + after_len]);
            }
            alloc.free(entry.scratch);
        }
        alloc.free(self.request_header);
        alloc.free(self.response_header);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aligned_buffer_has_no_unaligned_regions() {
        let layout = std::alloc::Layout::from_size_align(256, 64).unwrap();
        let ptr = unsafe { std::alloc::alloc_zeroed(layout) };
        let addr = ptr as usize;
        let s = split(addr, 256);
        assert_eq!(s.before_len, 0);
        assert_eq!(s.after_len, 0);
        assert_eq!(s.aligned_len, 256);
        unsafe { std::alloc::dealloc(ptr, layout) };
    }

    #[test]
    fn unaligned_offsets_are_bounded_by_cacheline() {
        for shift in 0..CACHELINE {
            let s = split(1000 + shift, 300);
            assert!(s.before_len < CACHELINE);
            assert!(s.after_len < CACHELINE);
            assert_eq!(s.before_len + s.aligned_len + s.after_len, 300);
        }
    }

    #[test]
    fn tiny_misaligned_buffer_has_no_aligned_middle() {
        let s = split(1001, 10);
        assert_eq!(s.aligned_len, 0);
        assert_eq!(s.before_len, 10);
    }

    #[test]
    fn ioctlv_vec_layout_matches_spec_counts() {
        let mut alloc = ScratchAllocator::new(64);
        let mut in_buf = vec![0u8; 300];
        let mut out_buf = vec![0u8; 100];
        let buffers = vec![ManagedBuffer::input(&mut in_buf), ManagedBuffer::output(&mut out_buf)];
        let call = IoctlvCall::build(&mut alloc, buffers);
        assert_eq!(call.vecs().len(), (1 + 2) + (1 + 2));
        assert_eq!(call.num_vec_out(), 1 + 2);
        call.finish(&mut alloc);
    }

    #[test]
    fn round_trip_copies_output_scratch_back_to_user_buffer() {
        let mut alloc = ScratchAllocator::new(64);
        let mut out_buf = vec![0u8; 10];
        {
            let buffers = vec![ManagedBuffer::output(&mut out_buf)];
            let call = IoctlvCall::build(&mut alloc, buffers);
            // Simulate the server writing into the unaligned scratch before
            // the caller copies it back.
            let entry_scratch = call.entries[0].scratch;
            alloc.get_mut(entry_scratch)[64 - 10..64].copy_from_slice(&[7u8; 10]);
            call.finish(&mut alloc);
        }
        assert_eq!(out_buf, vec![7u8; 10]);
    }

    proptest::proptest! {
        #[test]
        fn split_accounts_for_every_byte(addr in 0usize..1_000_000, len in 0usize..4096) {
            let s = split(addr, len);
            proptest::prop_assert_eq!(s.before_len + s.aligned_len + s.after_len, len);
            if s.aligned_len > 0 {
                proptest::prop_assert!(s.before_len < CACHELINE);
                proptest::prop_assert!(s.after_len < CACHELINE);
            } else {
                proptest::prop_assert_eq!(s.before_len, len);
                proptest::prop_assert_eq!(s.after_len, 0);
            }
        }
    }
}
