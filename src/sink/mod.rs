pub mod boundary;
pub mod controller;

pub use boundary::{BoundaryRequest, BoundaryRequester, IgnoreRequests};
pub use controller::{ControllerStatus, FinalizedSegment, PublishedPlaylist, SegmentController};
