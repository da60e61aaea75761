use std::sync::Arc;

use crate::frame::Frame;

/// Frame tree changes published by the [`FrameManager`](crate::FrameManager).
#[derive(Clone, Debug)]
pub enum FrameEvent {
    FrameAttached(Arc<Frame>),
    /// Published per frame, innermost first, after the frame is unregistered.
    FrameDetached(Arc<Frame>),
    FrameNavigated(Arc<Frame>),
    FrameNavigatedWithinDocument(Arc<Frame>),
    LifecycleEvent { frame: Arc<Frame>, name: String },
}

impl FrameEvent {
    pub fn frame(&self) -> &Arc<Frame> {
        match self {
            FrameEvent::FrameAttached(frame)
            | FrameEvent::FrameDetached(frame)
            | FrameEvent::FrameNavigated(frame)
            | FrameEvent::FrameNavigatedWithinDocument(frame)
            | FrameEvent::LifecycleEvent { frame, .. } => frame,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FrameEvent::FrameAttached(_) => "frame_attached",
            FrameEvent::FrameDetached(_) => "frame_detached",
            FrameEvent::FrameNavigated(_) => "frame_navigated",
            FrameEvent::FrameNavigatedWithinDocument(_) => "frame_navigated_within_document",
            FrameEvent::LifecycleEvent { .. } => "lifecycle",
        }
    }
}
