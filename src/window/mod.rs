pub mod finalize;

pub use finalize::{finalize_page, ClosedPage, Element, ScanWindow};
