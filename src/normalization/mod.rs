pub mod block_list;
pub mod candidate;
pub mod name;

pub use block_list::BlockList;
pub use candidate::{CandidateFilter, CandidateReport, Extraction, Rejection};
pub use name::{display_form, normalize, NameKey};
