use site_align_core::ModelTransform;

use crate::ModeledMarkers;

/// Everything a matcher needs to know about the site being inspected.
///
/// Built once by whoever bootstraps the session and handed to the
/// [`CoordinateMatcher`](crate::CoordinateMatcher).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SessionContext {
    pub markers: ModeledMarkers,
    /// Authored placement of the model root before any alignment.
    pub model_origin: ModelTransform,
}

impl SessionContext {
    pub fn new(markers: ModeledMarkers, model_origin: ModelTransform) -> Self {
        Self {
            markers,
            model_origin,
        }
    }
}
