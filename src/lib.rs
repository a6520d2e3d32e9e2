//! Windowed continuous-scroll pager for sequences of page images.

pub mod config;
pub mod error;
pub mod layout;
pub mod page;
pub mod requests;
pub mod source;
pub mod view;
pub mod worker;

pub use config::PagerConfig;
pub use error::PageError;
pub use page::{Page, PageRef, Size};
pub use source::{DirectorySource, MemorySource, PageSource};
pub use view::{Pager, PagerEvent};
pub use worker::{ImagePipeline, ImageWorker};
