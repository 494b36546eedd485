pub mod mtx;
pub mod sparse;
