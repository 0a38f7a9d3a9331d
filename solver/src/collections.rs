mod heap;

pub use heap::IdxHeap;
