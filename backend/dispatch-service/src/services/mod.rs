pub mod channel;
pub mod dispatcher;
pub mod inbox;

pub use channel::{ChannelClient, SendOutcome};
pub use dispatcher::{CampaignDispatcher, CampaignRequest, DispatchProgress, DispatchReport};
pub use inbox::InboxService;
