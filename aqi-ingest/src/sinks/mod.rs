pub mod series;
pub mod storage;

pub use series::{SeriesSink, SeriesStore};
pub use storage::{DirStorage, MemoryStorage, SeriesStorage, StoreError};
