pub mod failure;
pub mod store;
pub mod work_item;

pub use failure::FailureRecord;
pub use store::{load_work_item, save_work_item, ItemStore, JsonDirStore};
pub use work_item::{Episode, EpisodeRef, ItemId, Unit, WorkItem};
