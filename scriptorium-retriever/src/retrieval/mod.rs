pub mod change_detector;
pub mod chunking_strategy;
pub mod directory_watcher;
pub mod indexing_engine;
pub mod memory;
pub mod search;
