pub mod core;
pub mod encoding;
pub mod analysis;
pub mod compression;
pub mod postings;
pub mod storage;
pub mod literal;
pub mod numeric;
pub mod vector;
pub mod memtable;
pub mod sstable;
pub mod query;
pub mod engine;

/*
┌──────────────────────────────────────────────────────────────────────────┐
│                          LAYER ARCHITECTURE                              │
└──────────────────────────────────────────────────────────────────────────┘

  IndexEngine ──owns──> ColumnIndexState ──owns──> MemtableIndex
       │                      │                        │
       │                      └──owns──> SSTableIndex (per flushed SSTable)
       │                                     │
       │                                     ├── SegmentSearcher (literal)
       │                                     │       └── TermsReader ── fst trie ── PostingsReader
       │                                     ├── SegmentSearcher (numeric)
       │                                     │       └── BkdReader ── kd-tree ── PostingsReader
       │                                     └── SegmentSearcher (vector)
       │                                             └── VectorIndexReader ── graph + PQ
       │
       ├──owns──> SegmentBufferLimiter (global build-memory accounting)
       ├──owns──> FaultRegistry (named injection points)
       │
       └──serves──> QueryExecutor
                         │
                         ├── union across segments (per column)
                         ├── intersection across columns
                         ├── complement for the NOT family
                         └── filter-then-sort for ANN ordering

  SSTableIndexBuilder ──flushes──> per-column component regions + META
       │                               └── COLUMN_COMPLETION_MARKER
       └──writes──> primary-key map + token values
                        └── GROUP_COMPLETION_MARKER
*/
