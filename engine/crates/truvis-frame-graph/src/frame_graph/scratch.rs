//! 工作单元的临时内存
//!
//! 每个节点（或并行节点的每个分块）都有独立的 [`ScratchAllocator`]，
//! 用来拼装常量数据、间接参数等 POD 数据，工作单元结束后整体丢弃。

use std::mem;

/// 在 scratch 中的一段数据
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScratchSlice {
    pub offset: usize,
    pub len: usize,
}

/// 线性分配器
#[derive(Default)]
pub struct ScratchAllocator {
    bytes: Vec<u8>,
}

// new & init
impl ScratchAllocator {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            bytes: Vec::with_capacity(capacity),
        }
    }
}

impl ScratchAllocator {
    /// 按 `T` 的对齐写入一组 POD 数据
    pub fn push<T: bytemuck::Pod>(&mut self, values: &[T]) -> ScratchSlice {
        let align = mem::align_of::<T>();
        let offset = self.bytes.len().next_multiple_of(align);
        self.bytes.resize(offset, 0);
        self.bytes.extend_from_slice(bytemuck::cast_slice(values));

        ScratchSlice {
            offset,
            len: self.bytes.len() - offset,
        }
    }

    #[inline]
    pub fn bytes(&self, slice: ScratchSlice) -> &[u8] {
        &self.bytes[slice.offset..slice.offset + slice.len]
    }

    /// 读回写入的数据
    ///
    /// 底层存储只保证字节对齐，因此这里拷贝出来
    pub fn read<T: bytemuck::Pod>(&self, slice: ScratchSlice) -> Vec<T> {
        self.bytes(slice).chunks_exact(mem::size_of::<T>()).map(bytemuck::pod_read_unaligned).collect()
    }

    #[inline]
    pub fn used(&self) -> usize {
        self.bytes.len()
    }

    #[inline]
    pub fn reset(&mut self) {
        self.bytes.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_respects_alignment() {
        let mut scratch = ScratchAllocator::default();
        let a = scratch.push(&[1u8, 2, 3]);
        let b = scratch.push(&[7u32, 8]);

        assert_eq!(a, ScratchSlice { offset: 0, len: 3 });
        assert_eq!(b.offset, 4);
        assert_eq!(scratch.read::<u32>(b), vec![7, 8]);
        assert_eq!(scratch.used(), 12);

        scratch.reset();
        assert_eq!(scratch.used(), 0);
    }
}
