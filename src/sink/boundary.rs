use std::time::Duration;

/// "Please start a new segment at `position`" sent upstream to the producer.
///
/// Best effort: the producer may honor it late or not at all. The only
/// visible consequence is the next `on_segment_finalized` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryRequest {
    /// Presentation position the new segment should start at
    pub position: Duration,
    /// Index the segment closed by this boundary is published under
    pub sequence_index: u32,
    /// File name for that index, from the segment location template
    pub location: String,
}

/// Upstream side of the controller: whatever can force a new segment.
pub trait BoundaryRequester: Send + Sync {
    fn request_boundary(&self, request: BoundaryRequest);
}

impl<F> BoundaryRequester for F
where
    F: Fn(BoundaryRequest) + Send + Sync,
{
    fn request_boundary(&self, request: BoundaryRequest) {
        self(request)
    }
}

/// Requester for producers that cut segments on their own schedule.
#[derive(Debug, Default, Clone, Copy)]
pub struct IgnoreRequests;

impl BoundaryRequester for IgnoreRequests {
    fn request_boundary(&self, _request: BoundaryRequest) {}
}
