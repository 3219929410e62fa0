pub mod chunker;
pub mod core;

pub use self::core::Indexer;
