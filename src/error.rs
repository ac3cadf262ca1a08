use ash::vk;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Vulkan error: {0}")]
    Vulkan(#[from] vk::Result),

    /// A previous native submission on this queue failed. The driver defines no
    /// recovery mid-submission, so the queue refuses any further work.
    #[error("queue {0:?} is lost after a failed submission")]
    ContextLost(crate::queue::QueueType),

    #[error("no queue family supports {0:?}")]
    NoSuitableQueueFamily(vk::QueueFlags),

    #[error("failed to spawn the completion thread: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
