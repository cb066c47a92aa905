mod channel_broker;

pub use channel_broker::ChannelBroker;
