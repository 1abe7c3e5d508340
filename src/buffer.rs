//! The storage interface the core consumes, plus two reference
//! implementations used by this crate's own test suite.
//!
//! Production buffer implementations (backed by `mmap`, a loaded ELF image,
//! foreign shared memory, etc.) are out of scope for this crate — see the
//! crate-level docs. [`VecBuffer`] and [`ImmutableBuffer`] exist only so the
//! map itself can be exercised without an external loader.

use std::cell::RefCell;
use std::rc::Rc;

use crate::address::Address;

/// Shared handle to a [`Buffer`]. Buffers are reference-counted: the same
/// buffer may back many segments at once, and copy-on-write relies on being
/// able to tell whether two segments still point at the same underlying
/// storage (`Rc::ptr_eq`).
///
/// `Rc`, not `Arc`: the map is single-threaded by design (§5), so there is
/// no reason to pay for atomic refcounting.
pub type BufferHandle<A, T> = Rc<RefCell<dyn Buffer<A, T>>>;

/// Abstract random-access storage of `Value`s, addressed by an
/// [`Address`]-typed offset.
///
/// Implementors only need to guarantee that `read`/`write` return exactly
/// `n` when `offset + n <= available(offset)`; the core treats any other
/// outcome as an implementation bug (see [`crate::error::AddressMapError::InconsistentMap`]).
pub trait Buffer<A: Address, T> {
    /// Number of values readable/writable starting at `offset`.
    fn available(&self, offset: A) -> A;

    /// Copies up to `n` values starting at `offset` into `dst`, returning the
    /// number actually copied.
    fn read(&self, dst: &mut [T], offset: A, n: usize) -> usize;

    /// Copies up to `n` values from `src` into the buffer starting at `offset`,
    /// returning the number actually written.
    fn write(&mut self, src: &[T], offset: A, n: usize) -> usize;

    /// Deep-copies the buffer's content into a new, independent buffer with
    /// the same `available`.
    fn copy(&self) -> BufferHandle<A, T>;

    /// Hint that this buffer can never be written to, regardless of any
    /// segment's copy-on-write flag. The core additionally checks the
    /// segment's own `IMMUTABLE` access bit; this is a property of the
    /// storage itself (e.g. it's backed by a read-only `mmap`).
    fn is_immutable(&self) -> bool {
        false
    }
}

/// An owned, growable buffer backed by a `Vec<T>`.
#[derive(Debug, Clone)]
pub struct VecBuffer<T> {
    data: Vec<T>,
}

impl<T: Clone + Default> VecBuffer<T> {
    pub fn new(data: Vec<T>) -> Self {
        VecBuffer { data }
    }

    pub fn zeroed(len: usize) -> Self {
        VecBuffer {
            data: vec![T::default(); len],
        }
    }

    pub fn into_handle<A: Address>(self) -> BufferHandle<A, T>
    where
        T: 'static,
    {
        Rc::new(RefCell::new(self))
    }

    pub fn as_slice(&self) -> &[T] {
        &self.data
    }
}

impl<A: Address, T: Clone + Default + 'static> Buffer<A, T> for VecBuffer<T> {
    fn available(&self, offset: A) -> A {
        let len = self.data.len();
        let offset = offset.to_usize_saturating();
        if offset >= len {
            A::ZERO
        } else {
            A::from_usize_saturating(len - offset)
        }
    }

    fn read(&self, dst: &mut [T], offset: A, n: usize) -> usize {
        let offset = offset.to_usize_saturating();
        if offset >= self.data.len() {
            return 0;
        }
        let avail = (self.data.len() - offset).min(n).min(dst.len());
        dst[..avail].clone_from_slice(&self.data[offset..offset + avail]);
        avail
    }

    fn write(&mut self, src: &[T], offset: A, n: usize) -> usize {
        let offset = offset.to_usize_saturating();
        if offset >= self.data.len() {
            return 0;
        }
        let avail = (self.data.len() - offset).min(n).min(src.len());
        self.data[offset..offset + avail].clone_from_slice(&src[..avail]);
        avail
    }

    fn copy(&self) -> BufferHandle<A, T> {
        Rc::new(RefCell::new(VecBuffer {
            data: self.data.clone(),
        }))
    }
}

/// A buffer that rejects every write. Useful for exercising the
/// `IMMUTABLE`/`is_immutable` rejection path in tests without needing real
/// memory-protection semantics.
#[derive(Debug, Clone)]
pub struct ImmutableBuffer<T> {
    data: Vec<T>,
}

impl<T: Clone + Default> ImmutableBuffer<T> {
    pub fn new(data: Vec<T>) -> Self {
        ImmutableBuffer { data }
    }

    pub fn into_handle<A: Address>(self) -> BufferHandle<A, T>
    where
        T: 'static,
    {
        Rc::new(RefCell::new(self))
    }
}

impl<A: Address, T: Clone + Default + 'static> Buffer<A, T> for ImmutableBuffer<T> {
    fn available(&self, offset: A) -> A {
        let len = self.data.len();
        let offset = offset.to_usize_saturating();
        if offset >= len {
            A::ZERO
        } else {
            A::from_usize_saturating(len - offset)
        }
    }

    fn read(&self, dst: &mut [T], offset: A, n: usize) -> usize {
        let offset = offset.to_usize_saturating();
        if offset >= self.data.len() {
            return 0;
        }
        let avail = (self.data.len() - offset).min(n).min(dst.len());
        dst[..avail].clone_from_slice(&self.data[offset..offset + avail]);
        avail
    }

    fn write(&mut self, _src: &[T], _offset: A, _n: usize) -> usize {
        0
    }

    fn copy(&self) -> BufferHandle<A, T> {
        Rc::new(RefCell::new(ImmutableBuffer {
            data: self.data.clone(),
        }))
    }

    fn is_immutable(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_buffer_available_shrinks_with_offset() {
        let buf = VecBuffer::<u8>::new(vec![1, 2, 3, 4, 5]);
        let b: &dyn Buffer<u32, u8> = &buf;
        assert_eq!(b.available(0), 5);
        assert_eq!(b.available(3), 2);
        assert_eq!(b.available(10), 0);
    }

    #[test]
    fn vec_buffer_read_write_roundtrip() {
        let mut buf = VecBuffer::<u8>::new(vec![0; 5]);
        let b: &mut dyn Buffer<u32, u8> = &mut buf;
        assert_eq!(b.write(&[1, 2, 3], 1, 3), 3);
        let mut dst = [0u8; 3];
        assert_eq!(b.read(&mut dst, 1, 3), 3);
        assert_eq!(dst, [1, 2, 3]);
    }

    #[test]
    fn immutable_buffer_rejects_writes() {
        let mut buf = ImmutableBuffer::<u8>::new(vec![9; 4]);
        let b: &mut dyn Buffer<u32, u8> = &mut buf;
        assert_eq!(b.write(&[1, 2], 0, 2), 0);
        assert!(b.is_immutable());
    }

    #[test]
    fn copy_is_independent() {
        let buf = VecBuffer::<u8>::new(vec![1, 2, 3]);
        let copy: BufferHandle<u32, u8> = Buffer::<u32, u8>::copy(&buf);
        copy.borrow_mut().write(&[9, 9, 9], 0, 3);
        assert_eq!(buf.as_slice(), &[1, 2, 3]);
        let mut dst = [0u8; 3];
        copy.borrow().read(&mut dst, 0, 3);
        assert_eq!(dst, [9, 9, 9]);
    }
}
