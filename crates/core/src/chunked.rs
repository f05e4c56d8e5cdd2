/// Segmented storage for very long sequences.
///
/// Elements live in chunks of at most `chunk_capacity` entries so that
/// growing the sequence never reallocates what is already stored. Every
/// chunk except the last holds exactly `chunk_capacity` elements, which keeps
/// random access O(1).
///
/// Each chunk distinguishes its logical length from the elements physically
/// written to its backing buffer. [`truncate`](Self::truncate) only lowers
/// the logical length; the stale elements stay in place and are overwritten
/// by later appends, until [`trim_last_chunk`](Self::trim_last_chunk) drops
/// them (still without releasing the allocation).
#[derive(Debug, Clone)]
pub struct ChunkedArray<T> {
    chunk_capacity: usize,
    chunks: Vec<Chunk<T>>,
    len: usize,
}

#[derive(Debug, Clone)]
struct Chunk<T> {
    data: Vec<T>,
    len: usize,
}

impl<T> Chunk<T> {
    fn from_vec(data: Vec<T>) -> Self {
        let len = data.len();
        Self { data, len }
    }

    fn as_slice(&self) -> &[T] {
        &self.data[..self.len]
    }
}

impl<T> ChunkedArray<T> {
    /// # Panics
    ///
    /// Panics if `chunk_capacity` is zero.
    pub fn new(chunk_capacity: usize) -> Self {
        assert!(chunk_capacity > 0, "chunk_capacity must be > 0");
        Self {
            chunk_capacity,
            chunks: Vec::new(),
            len: 0,
        }
    }

    pub fn from_vec(chunk_capacity: usize, values: Vec<T>) -> Self {
        let mut out = Self::new(chunk_capacity);
        out.append_chunk(values);
        out
    }

    pub fn chunk_capacity(&self) -> usize {
        self.chunk_capacity
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Logical lengths of every chunk, in order.
    pub fn chunk_lengths(&self) -> impl Iterator<Item = usize> + '_ {
        self.chunks.iter().map(|c| c.len)
    }

    /// Append a caller-built buffer.
    ///
    /// A buffer of at most `chunk_capacity` elements becomes a chunk as-is,
    /// without copying, when the tail chunk is full. An oversized buffer is
    /// split into `ceil(n / chunk_capacity)` freshly allocated chunks. If the
    /// current tail is only partially filled it is topped up first so that
    /// all chunks but the last stay full.
    pub fn append_chunk(&mut self, mut values: Vec<T>) {
        if values.is_empty() {
            return;
        }

        let n = values.len();
        let room = self.tail_room();
        if room > 0 {
            let take = room.min(values.len());
            let rest = values.split_off(take);
            for value in values {
                self.push_into_tail(value);
            }
            values = rest;
        }

        if values.len() <= self.chunk_capacity {
            if !values.is_empty() {
                self.chunks.push(Chunk::from_vec(values));
            }
        } else {
            let mut iter = values.into_iter();
            loop {
                let chunk: Vec<T> = iter.by_ref().take(self.chunk_capacity).collect();
                if chunk.is_empty() {
                    break;
                }
                self.chunks.push(Chunk::from_vec(chunk));
            }
        }

        self.len += n;
    }

    /// Append one element, opening a new full-capacity chunk when needed.
    pub fn append_direct(&mut self, value: T) {
        if self.tail_room() == 0 {
            self.chunks.push(Chunk {
                data: Vec::with_capacity(self.chunk_capacity),
                len: 0,
            });
        }
        self.push_into_tail(value);
        self.len += 1;
    }

    /// Drop stale elements past the last chunk's logical length, keeping
    /// the allocation. Returns how many elements were dropped.
    pub fn trim_last_chunk(&mut self) -> usize {
        match self.chunks.last_mut() {
            Some(chunk) => {
                let stale = chunk.data.len() - chunk.len;
                chunk.data.truncate(chunk.len);
                stale
            }
            None => 0,
        }
    }

    /// Shorten the logical length. Whole chunks past the new end are
    /// released; the new tail keeps its backing elements.
    pub fn truncate(&mut self, new_len: usize) {
        if new_len >= self.len {
            return;
        }

        let keep_chunks = new_len.div_ceil(self.chunk_capacity);
        self.chunks.truncate(keep_chunks);
        if let Some(tail) = self.chunks.last_mut() {
            let tail_len = new_len - (keep_chunks - 1) * self.chunk_capacity;
            tail.len = tail_len;
        }
        self.len = new_len;
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
        self.len = 0;
    }

    pub fn get(&self, index: usize) -> Option<&T> {
        if index >= self.len {
            return None;
        }
        let chunk = &self.chunks[index / self.chunk_capacity];
        chunk.as_slice().get(index % self.chunk_capacity)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut T> {
        if index >= self.len {
            return None;
        }
        let cap = self.chunk_capacity;
        let chunk = &mut self.chunks[index / cap];
        let local = index % cap;
        if local < chunk.len {
            chunk.data.get_mut(local)
        } else {
            None
        }
    }

    /// Lazy forward iteration in chunk order. Call again to restart.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.chunks.iter().flat_map(|c| c.as_slice().iter())
    }

    /// Iterate over the logical contents of each chunk.
    pub fn chunks(&self) -> impl Iterator<Item = &[T]> + '_ {
        self.chunks.iter().map(Chunk::as_slice)
    }

    fn tail_room(&self) -> usize {
        match self.chunks.last() {
            Some(chunk) => self.chunk_capacity.saturating_sub(chunk.len),
            None => 0,
        }
    }

    fn push_into_tail(&mut self, value: T) {
        let Some(chunk) = self.chunks.last_mut() else {
            return;
        };
        if chunk.len < chunk.data.len() {
            chunk.data[chunk.len] = value;
        } else {
            chunk.data.push(value);
        }
        chunk.len += 1;
    }
}

impl<T: Clone> ChunkedArray<T> {
    pub fn append_slice(&mut self, values: &[T]) {
        self.append_chunk(values.to_vec());
    }

    pub fn to_vec(&self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.len);
        for chunk in self.chunks() {
            out.extend_from_slice(chunk);
        }
        out
    }
}

impl<T> Extend<T> for ChunkedArray<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.append_direct(value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ChunkedArray;
    use proptest::prelude::*;

    fn assert_shape<T>(arr: &ChunkedArray<T>) {
        let lengths: Vec<usize> = arr.chunk_lengths().collect();
        let cap = arr.chunk_capacity();
        for (i, len) in lengths.iter().enumerate() {
            assert!(*len <= cap);
            assert!(*len > 0, "empty chunk at {}", i);
            if i + 1 < lengths.len() {
                assert_eq!(*len, cap, "non-tail chunk {} is not full", i);
            }
        }
        assert_eq!(lengths.iter().sum::<usize>(), arr.len());
    }

    #[test]
    fn new_is_empty() {
        let arr: ChunkedArray<u32> = ChunkedArray::new(4);
        assert!(arr.is_empty());
        assert_eq!(arr.chunk_count(), 0);
        assert!(arr.iter().next().is_none());
        assert_eq!(arr.get(0), None);
    }

    #[test]
    #[should_panic]
    fn zero_capacity_panics() {
        let _ = ChunkedArray::<u8>::new(0);
    }

    #[test]
    fn exact_capacity_chunk_is_moved_without_copy() {
        let mut arr = ChunkedArray::new(4);
        let values = vec![1, 2, 3, 4];
        let ptr = values.as_ptr();
        arr.append_chunk(values);
        assert_eq!(arr.chunk_count(), 1);
        assert_eq!(arr.chunks().next().unwrap().as_ptr(), ptr);
    }

    #[test]
    fn oversized_chunk_is_split() {
        let mut arr = ChunkedArray::new(4);
        arr.append_chunk((0..10).collect());
        assert_eq!(arr.len(), 10);
        assert_eq!(arr.chunk_lengths().collect::<Vec<_>>(), vec![4, 4, 2]);
        assert_eq!(arr.to_vec(), (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn partial_tail_is_topped_up_first() {
        let mut arr = ChunkedArray::new(4);
        arr.append_chunk(vec![0, 1]);
        arr.append_chunk(vec![2, 3, 4]);
        assert_eq!(arr.chunk_lengths().collect::<Vec<_>>(), vec![4, 1]);
        assert_eq!(arr.to_vec(), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn append_direct_allocates_when_full() {
        let mut arr = ChunkedArray::new(3);
        for i in 0..7 {
            arr.append_direct(i);
        }
        assert_eq!(arr.len(), 7);
        assert_eq!(arr.chunk_count(), 3);
        assert_eq!(arr.get(6), Some(&6));
        assert_shape(&arr);
    }

    #[test]
    fn truncate_keeps_backing_then_overwrites() {
        let mut arr = ChunkedArray::new(4);
        arr.append_chunk(vec![10, 11, 12, 13, 14, 15]);
        arr.truncate(5);
        assert_eq!(arr.len(), 5);
        assert_eq!(arr.get(5), None);
        arr.append_direct(99);
        assert_eq!(arr.to_vec(), vec![10, 11, 12, 13, 14, 99]);
        assert_shape(&arr);
    }

    #[test]
    fn trim_last_chunk_drops_stale_elements() {
        let mut arr = ChunkedArray::new(8);
        for i in 0..6 {
            arr.append_direct(i);
        }
        arr.truncate(3);
        assert_eq!(arr.trim_last_chunk(), 3);
        assert_eq!(arr.trim_last_chunk(), 0);
        assert_eq!(arr.len(), 3);
        arr.append_direct(7);
        assert_eq!(arr.to_vec(), vec![0, 1, 2, 7]);
    }

    #[test]
    fn truncate_across_chunks() {
        let mut arr = ChunkedArray::new(2);
        arr.append_chunk((0..7).collect());
        arr.truncate(3);
        assert_eq!(arr.chunk_lengths().collect::<Vec<_>>(), vec![2, 1]);
        arr.truncate(0);
        assert!(arr.is_empty());
        assert_eq!(arr.chunk_count(), 0);
    }

    #[test]
    fn get_mut_updates_in_place() {
        let mut arr = ChunkedArray::from_vec(3, vec![1, 2, 3, 4]);
        *arr.get_mut(3).unwrap() = 40;
        assert_eq!(arr.get(3), Some(&40));
        assert!(arr.get_mut(4).is_none());
    }

    #[test]
    fn iteration_is_restartable_and_stops_early() {
        let arr = ChunkedArray::from_vec(2, vec![1, 2, 3, 4, 5]);
        let first: Vec<_> = arr.iter().take(3).copied().collect();
        let again: Vec<_> = arr.iter().copied().collect();
        assert_eq!(first, vec![1, 2, 3]);
        assert_eq!(again, vec![1, 2, 3, 4, 5]);
    }

    proptest! {
        #[test]
        fn append_chunk_preserves_shape(cap in 1usize..64, n in 0usize..600) {
            let mut arr = ChunkedArray::new(cap);
            arr.append_chunk((0..n).collect());
            prop_assert_eq!(arr.len(), n);
            assert_shape(&arr);
            prop_assert_eq!(arr.to_vec(), (0..n).collect::<Vec<_>>());
        }

        #[test]
        fn mixed_appends_keep_order(
            cap in 1usize..16,
            ops in prop::collection::vec((any::<bool>(), 0usize..40), 0..30),
        ) {
            let mut arr = ChunkedArray::new(cap);
            let mut expected = Vec::new();
            let mut next = 0u32;
            for (bulk, count) in ops {
                if bulk {
                    let values: Vec<u32> = (next..next + count as u32).collect();
                    expected.extend_from_slice(&values);
                    arr.append_chunk(values);
                } else {
                    for v in next..next + count as u32 {
                        expected.push(v);
                        arr.append_direct(v);
                    }
                }
                next += count as u32;
            }
            assert_shape(&arr);
            prop_assert_eq!(arr.to_vec(), expected.clone());
            for (i, v) in expected.iter().enumerate() {
                prop_assert_eq!(arr.get(i), Some(v));
            }
        }
    }
}
