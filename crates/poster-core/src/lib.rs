pub mod clock;
pub mod errors;
pub mod ids;
pub mod personality;
pub mod post;
pub mod provider;
pub mod publisher;
pub mod scene;

pub use clock::{Clock, ManualClock, SystemClock};
pub use errors::ExternalError;
pub use ids::PostId;
pub use personality::{PersonalityMemory, PersonalityTraits};
pub use post::{PostRecord, PostStatus};
pub use provider::{GenerationOutput, GenerationRequest, SamplingParams, TextGenerator, TokenUsage};
pub use publisher::Publisher;
pub use scene::ContextKey;
