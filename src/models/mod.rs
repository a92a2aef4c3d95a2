mod airing;
mod event;
mod fragment;

pub use airing::ProgramAiring;
pub use event::{EventKind, WatchEvent};
pub use fragment::{ConsolidatedInterval, Fragment};
