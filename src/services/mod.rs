pub mod edit_window;
pub mod merge;
pub mod storage;
pub mod trips;
pub mod visibility;
