pub mod config;
pub mod lemma;
pub mod model;
pub mod storage;

pub type SiteId = u32;
pub type PageId = u32;
pub type LemmaId = u32;
pub type RecordId = u32;
