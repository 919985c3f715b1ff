//! Frequency table shared between the network thread and the audio thread
//!
//! Ownership is split explicitly:
//! - exactly one [`TableWriter`] exists, owned by the network receiver;
//! - any number of readers hold an `Arc<FrequencyTable>`, in practice the
//!   render loop.
//!
//! Cells are individual atomics, so a reader never sees a torn `f32`, but a
//! table being rewritten is not consistent as a whole. The `in_init` flag
//! gates that window: while it is set the reader gets nothing back. The
//! published count is stored before the flag is cleared (`Release`) and read
//! after the flag is observed clear (`Acquire`).

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;

/// Index-addressed oscillator frequencies with an atomic readiness flag
#[derive(Debug)]
pub struct FrequencyTable {
    cells: Box<[AtomicU32]>,
    in_init: AtomicBool,
    count: AtomicUsize,
}

impl FrequencyTable {
    /// Create an unpublished table and the single writer handle for it
    pub fn new(capacity: usize) -> (Arc<Self>, TableWriter) {
        let cells = (0..capacity)
            .map(|_| AtomicU32::new(0f32.to_bits()))
            .collect::<Vec<_>>()
            .into_boxed_slice();

        let table = Arc::new(Self {
            cells,
            in_init: AtomicBool::new(false),
            count: AtomicUsize::new(0),
        });

        let writer = TableWriter {
            table: table.clone(),
        };
        (table, writer)
    }

    pub fn capacity(&self) -> usize {
        self.cells.len()
    }

    /// True while a handshake is rewriting the table
    pub fn is_in_init(&self) -> bool {
        self.in_init.load(Ordering::Acquire)
    }

    /// Number of authoritative entries, or `None` while a handshake is in
    /// progress or before the first one completed
    pub fn published_len(&self) -> Option<usize> {
        if self.in_init.load(Ordering::Acquire) {
            return None;
        }
        match self.count.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    /// Frequency of oscillator `index`, if the table is published and
    /// `index` lies inside the published range
    pub fn get(&self, index: usize) -> Option<f32> {
        let len = self.published_len()?;
        if index >= len {
            return None;
        }
        Some(self.load(index))
    }

    /// Raw read of a cell, bypassing the readiness gate.
    ///
    /// Callers must have checked [`published_len`](Self::published_len)
    /// for this block.
    #[inline]
    pub fn load(&self, index: usize) -> f32 {
        f32::from_bits(self.cells[index].load(Ordering::Relaxed))
    }
}

/// The one handle allowed to mutate a [`FrequencyTable`]
#[derive(Debug)]
pub struct TableWriter {
    table: Arc<FrequencyTable>,
}

impl TableWriter {
    pub fn table(&self) -> &Arc<FrequencyTable> {
        &self.table
    }

    pub fn capacity(&self) -> usize {
        self.table.capacity()
    }

    /// Enter init mode and clear every cell
    pub fn begin(&mut self) {
        self.table.in_init.store(true, Ordering::Release);
        self.table.count.store(0, Ordering::Release);
        for cell in self.table.cells.iter() {
            cell.store(0f32.to_bits(), Ordering::Relaxed);
        }
    }

    /// Store `frequency` at `index`; returns `false` if out of range
    pub fn write(&mut self, index: usize, frequency: f32) -> bool {
        match self.table.cells.get(index) {
            Some(cell) => {
                cell.store(frequency.to_bits(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Make the first `count` entries authoritative and leave init mode
    pub fn publish(&mut self, count: usize) {
        let count = count.min(self.table.capacity());
        self.table.count.store(count, Ordering::Release);
        self.table.in_init.store(false, Ordering::Release);
    }

    /// Leave init mode without publishing anything
    pub fn discard(&mut self) {
        self.table.count.store(0, Ordering::Release);
        self.table.in_init.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpublished_table_reads_nothing() {
        let (table, _writer) = FrequencyTable::new(8);
        assert_eq!(table.published_len(), None);
        assert_eq!(table.get(0), None);
        assert!(!table.is_in_init());
    }

    #[test]
    fn test_publish_gates_reads() {
        let (table, mut writer) = FrequencyTable::new(8);

        writer.begin();
        assert!(table.is_in_init());
        writer.write(0, 110.0);
        writer.write(1, 220.0);
        // Not visible mid-session
        assert_eq!(table.get(0), None);

        writer.publish(2);
        assert_eq!(table.published_len(), Some(2));
        assert_eq!(table.get(0), Some(110.0));
        assert_eq!(table.get(1), Some(220.0));
        assert_eq!(table.get(2), None);
    }

    #[test]
    fn test_begin_clears_previous_session() {
        let (table, mut writer) = FrequencyTable::new(4);
        writer.begin();
        writer.write(3, 999.0);
        writer.publish(4);
        assert_eq!(table.get(3), Some(999.0));

        writer.begin();
        assert_eq!(table.published_len(), None);
        assert_eq!(table.load(3), 0.0);
    }

    #[test]
    fn test_write_out_of_range() {
        let (_table, mut writer) = FrequencyTable::new(2);
        assert!(writer.write(1, 1.0));
        assert!(!writer.write(2, 1.0));
    }

    #[test]
    fn test_discard_leaves_table_unpublished() {
        let (table, mut writer) = FrequencyTable::new(4);
        writer.begin();
        writer.write(0, 50.0);
        writer.discard();
        assert!(!table.is_in_init());
        assert_eq!(table.published_len(), None);
    }
}
